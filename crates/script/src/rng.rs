//! The seeded random stream shared by the language's stochastic
//! built-ins and the host engine.
//!
//! A simulation instance owns exactly one stream; every draw — engine
//! kernels and script functions alike — consumes from it, so a seed
//! fully determines a run. Xoshiro256++ is used for speed.

use std::cell::RefCell;
use std::rc::Rc;

use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;

pub struct Stream {
    rng: Xoshiro256PlusPlus,
    last_seed: i64,
}

impl Stream {
    /// Create a stream with an explicit seed.
    pub fn new(seed: i64) -> Self {
        Self {
            rng: Xoshiro256PlusPlus::seed_from_u64(seed as u64),
            last_seed: seed,
        }
    }

    /// Create a stream seeded from process entropy; the chosen seed is
    /// still recorded and can be queried for reproduction.
    pub fn from_entropy() -> Self {
        let seed: i64 = rand::rng().random();
        Self::new(seed)
    }

    /// Fully reset the stream.
    pub fn set_seed(&mut self, seed: i64) {
        self.rng = Xoshiro256PlusPlus::seed_from_u64(seed as u64);
        self.last_seed = seed;
    }

    /// The last seed set.
    pub fn seed(&self) -> i64 {
        self.last_seed
    }

    /// Uniform draw in [0, 1).
    pub fn uniform(&mut self) -> f64 {
        self.rng.random::<f64>()
    }

    /// Uniform draw in [min, max).
    pub fn uniform_range(&mut self, min: f64, max: f64) -> f64 {
        min + (max - min) * self.uniform()
    }

    /// Uniform integer draw in [0, n).
    pub fn uniform_index(&mut self, n: usize) -> usize {
        self.rng.random_range(0..n)
    }

    /// Bernoulli draw.
    pub fn chance(&mut self, p: f64) -> bool {
        self.rng.random::<f64>() < p
    }

    /// Direct access for `rand_distr` distributions.
    pub fn rng_mut(&mut self) -> &mut Xoshiro256PlusPlus {
        &mut self.rng
    }
}

/// The shared handle the interpreter and engine both hold.
pub type SharedStream = Rc<RefCell<Stream>>;

pub fn shared(seed: i64) -> SharedStream {
    Rc::new(RefCell::new(Stream::new(seed)))
}
