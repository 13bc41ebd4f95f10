//! # Simulation Engine
//!
//! The `sim` crate provides the forward-time population-genetics
//! engine: the genetic data model (mutations, genomes, chromosomes,
//! subpopulations), the per-generation life cycle with its
//! crossover-mutation kernel, and the host-object bridge that exposes
//! simulation entities to the embedded scripting language.

pub mod chromosome;
pub mod engine;
pub mod errors;
pub mod genome;
pub mod host;
pub mod mutation;
pub mod population;
pub mod rng;
pub mod script_block;
pub mod subpopulation;

pub use chromosome::{Chromosome, GenomicElement, GenomicElementType, RateMap};
pub use engine::{RunOptions, SimCore, Simulation};
pub use errors::SimulationError;
pub use genome::Genome;
pub use mutation::{Mutation, MutationType, SelectionDistribution};
pub use population::{Population, Substitution};
pub use script_block::{BlockKind, ScriptBlock};
pub use subpopulation::{diploid_fitness, Subpopulation};
