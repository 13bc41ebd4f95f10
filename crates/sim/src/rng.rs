//! Stochastic kernels on top of the shared stream: cached-exponential
//! Poisson draws and the precomputed weighted discrete sampler.
//!
//! The per-meiosis hot path draws the joint (mutation count, breakpoint
//! count) pair with a single uniform most of the time; the cached
//! `exp(-rate)` values make the sequential-search Poisson cheap for the
//! small rates typical of per-gamete totals.

use demevo_script::Stream;

use crate::errors::SimulationError;

/// Sequential-search Poisson draw using a precomputed `exp(-lambda)`.
/// Falls back to a normal-approximation-free library-style draw for
/// large rates where the cached exponential underflows.
pub fn poisson(stream: &mut Stream, lambda: f64, exp_neg_lambda: f64) -> u32 {
    if lambda > 128.0 {
        return poisson_large(stream, lambda);
    }
    let u = stream.uniform();
    let mut x = 0u32;
    let mut p = exp_neg_lambda;
    let mut s = p;
    while u > s {
        x += 1;
        p *= lambda / x as f64;
        s += p;
        if x > 10_000 {
            break;
        }
    }
    x
}

/// Poisson draw conditioned on a non-zero result. The uniform is drawn
/// in (exp(-lambda), 1], which excludes the zero outcome without
/// rejection sampling.
pub fn poisson_nonzero(stream: &mut Stream, lambda: f64, exp_neg_lambda: f64) -> u32 {
    if lambda > 128.0 {
        loop {
            let x = poisson_large(stream, lambda);
            if x > 0 {
                return x;
            }
        }
    }
    let u = exp_neg_lambda + stream.uniform() * (1.0 - exp_neg_lambda);
    let mut x = 0u32;
    let mut p = exp_neg_lambda;
    let mut s = p;
    while u > s {
        x += 1;
        p *= lambda / x as f64;
        s += p;
        if x > 10_000 {
            break;
        }
    }
    x.max(1)
}

fn poisson_large(stream: &mut Stream, lambda: f64) -> u32 {
    use rand_distr::Distribution;
    let poisson = rand_distr::Poisson::new(lambda).expect("positive rate");
    poisson.sample(stream.rng_mut()) as u32
}

/// Geometric draw with the given mean (support starting at 1), used for
/// gene-conversion tract lengths.
pub fn geometric_tract_length(stream: &mut Stream, mean: f64) -> u32 {
    debug_assert!(mean >= 1.0);
    let p = 1.0 / mean;
    // inverse-transform; u in (0, 1]
    let u = 1.0 - stream.uniform();
    if p >= 1.0 {
        return 1;
    }
    let draws = (u.ln() / (1.0 - p).ln()).floor() as u32;
    draws + 1
}

/// A precomputed cumulative-weight table for weighted discrete draws.
///
/// Built once per configuration change (element weights, recombination
/// intervals) or per generation (parent fitness), then sampled many
/// times with a binary search.
#[derive(Debug, Clone)]
pub struct DiscreteSampler {
    cumulative: Vec<f64>,
    total: f64,
}

impl DiscreteSampler {
    pub fn new(weights: &[f64]) -> Result<Self, SimulationError> {
        if weights.is_empty() {
            return Err(SimulationError::InvalidParameter(
                "weighted sampler requires at least one weight".into(),
            ));
        }
        let mut cumulative = Vec::with_capacity(weights.len());
        let mut total = 0.0;
        for &w in weights {
            if !w.is_finite() || w < 0.0 {
                return Err(SimulationError::InvalidParameter(format!(
                    "weighted sampler requires finite non-negative weights ({w} supplied)"
                )));
            }
            total += w;
            cumulative.push(total);
        }
        if total <= 0.0 {
            return Err(SimulationError::InvalidParameter(
                "weighted sampler requires a positive total weight".into(),
            ));
        }
        Ok(Self { cumulative, total })
    }

    pub fn len(&self) -> usize {
        self.cumulative.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cumulative.is_empty()
    }

    pub fn total(&self) -> f64 {
        self.total
    }

    /// Draw one index with probability proportional to its weight.
    pub fn sample(&self, stream: &mut Stream) -> usize {
        let target = stream.uniform() * self.total;
        let idx = self.cumulative.partition_point(|&c| c <= target);
        idx.min(self.cumulative.len() - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream() -> Stream {
        Stream::new(42)
    }

    #[test]
    fn test_poisson_zero_rate_behavior() {
        let mut s = stream();
        // rate so small that zero dominates
        let lambda: f64 = 1e-12;
        let exp_neg = (-lambda).exp();
        for _ in 0..100 {
            assert_eq!(poisson(&mut s, lambda, exp_neg), 0);
        }
    }

    #[test]
    fn test_poisson_mean() {
        let mut s = stream();
        let lambda: f64 = 3.0;
        let exp_neg = (-lambda).exp();
        let n = 20_000;
        let total: u64 = (0..n).map(|_| poisson(&mut s, lambda, exp_neg) as u64).sum();
        let mean = total as f64 / n as f64;
        assert!((mean - lambda).abs() < 0.05, "mean {mean}");
    }

    #[test]
    fn test_poisson_nonzero_never_zero() {
        let mut s = stream();
        let lambda: f64 = 0.01;
        let exp_neg = (-lambda).exp();
        for _ in 0..1000 {
            assert!(poisson_nonzero(&mut s, lambda, exp_neg) >= 1);
        }
    }

    #[test]
    fn test_poisson_nonzero_conditional_mean() {
        // E[X | X > 0] = lambda / (1 - exp(-lambda))
        let mut s = stream();
        let lambda: f64 = 0.5;
        let exp_neg = (-lambda).exp();
        let n = 20_000;
        let total: u64 = (0..n)
            .map(|_| poisson_nonzero(&mut s, lambda, exp_neg) as u64)
            .sum();
        let mean = total as f64 / n as f64;
        let expected = lambda / (1.0 - exp_neg);
        assert!((mean - expected).abs() < 0.02, "mean {mean} vs {expected}");
    }

    #[test]
    fn test_geometric_tract_mean() {
        let mut s = stream();
        let mean = 20.0;
        let n = 20_000;
        let total: u64 = (0..n)
            .map(|_| geometric_tract_length(&mut s, mean) as u64)
            .sum();
        let observed = total as f64 / n as f64;
        assert!((observed - mean).abs() < 0.5, "mean {observed}");
    }

    #[test]
    fn test_discrete_sampler_validation() {
        assert!(DiscreteSampler::new(&[]).is_err());
        assert!(DiscreteSampler::new(&[0.0, 0.0]).is_err());
        assert!(DiscreteSampler::new(&[-1.0, 2.0]).is_err());
        assert!(DiscreteSampler::new(&[1.0, f64::NAN]).is_err());
        assert!(DiscreteSampler::new(&[1.0, 2.0]).is_ok());
    }

    #[test]
    fn test_discrete_sampler_proportions() {
        let sampler = DiscreteSampler::new(&[1.0, 3.0]).unwrap();
        let mut s = stream();
        let mut counts = [0usize; 2];
        for _ in 0..10_000 {
            counts[sampler.sample(&mut s)] += 1;
        }
        let ratio = counts[1] as f64 / counts[0] as f64;
        assert!((ratio - 3.0).abs() < 0.3, "ratio {ratio}");
    }

    #[test]
    fn test_discrete_sampler_zero_weight_never_drawn() {
        let sampler = DiscreteSampler::new(&[0.0, 1.0, 0.0]).unwrap();
        let mut s = stream();
        for _ in 0..1000 {
            assert_eq!(sampler.sample(&mut s), 1);
        }
    }

    #[test]
    fn test_discrete_sampler_determinism() {
        let sampler = DiscreteSampler::new(&[0.2, 0.3, 0.5]).unwrap();
        let mut a = Stream::new(9);
        let mut b = Stream::new(9);
        let da: Vec<usize> = (0..64).map(|_| sampler.sample(&mut a)).collect();
        let db: Vec<usize> = (0..64).map(|_| sampler.sample(&mut b)).collect();
        assert_eq!(da, db);
    }
}
