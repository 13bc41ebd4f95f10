//! The chromosome model: genomic elements, piecewise-constant rate
//! maps, and the precomputed draw tables behind the crossover-mutation
//! kernel.
//!
//! Only the portions of the chromosome covered by genomic elements can
//! mutate; recombination follows its own rate map. `initialize_draws`
//! builds the weighted samplers and the cached exponentials that make
//! the joint (mutation count, breakpoint count) draw a single uniform
//! in the common all-zero case.

use std::cell::RefCell;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use demevo_script::{SharedStream, Stream};

use crate::errors::SimulationError;
use crate::mutation::{Mutation, MutationType};
use crate::rng::{geometric_tract_length, poisson_nonzero, DiscreteSampler};

/// A piecewise-constant rate over positions: interval `i` runs from the
/// previous end (exclusive) to `ends[i]` (inclusive), starting at 0.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateMap {
    ends: Vec<u32>,
    rates: Vec<f64>,
}

impl RateMap {
    pub fn new(ends: Vec<u32>, rates: Vec<f64>) -> Result<Self, SimulationError> {
        if ends.is_empty() || ends.len() != rates.len() {
            return Err(SimulationError::InconsistentRateMap(format!(
                "{} end positions against {} rates",
                ends.len(),
                rates.len()
            )));
        }
        if !ends.windows(2).all(|w| w[0] < w[1]) {
            return Err(SimulationError::InconsistentRateMap(
                "end positions must be strictly increasing".into(),
            ));
        }
        for &r in &rates {
            if !r.is_finite() || r < 0.0 {
                return Err(SimulationError::InvalidRate("rate", r));
            }
        }
        Ok(Self { ends, rates })
    }

    pub fn uniform(rate: f64, last_position: u32) -> Result<Self, SimulationError> {
        Self::new(vec![last_position], vec![rate])
    }

    pub fn last_position(&self) -> u32 {
        *self.ends.last().expect("non-empty map")
    }

    pub fn intervals(&self) -> impl Iterator<Item = (u32, u32, f64)> + '_ {
        self.ends.iter().enumerate().map(|(i, &end)| {
            let start = if i == 0 { 0 } else { self.ends[i - 1] + 1 };
            (start, end, self.rates[i])
        })
    }

    pub fn rate_at(&self, position: u32) -> f64 {
        for (start, end, rate) in self.intervals() {
            if position >= start && position <= end {
                return rate;
            }
        }
        0.0
    }

    /// Total rate mass over the inclusive position range, counting one
    /// unit of rate per base position.
    pub fn integral(&self, from: u32, to: u32) -> f64 {
        let mut total = 0.0;
        for (start, end, rate) in self.intervals() {
            let lo = start.max(from);
            let hi = end.min(to);
            if lo <= hi {
                total += rate * (hi - lo + 1) as f64;
            }
        }
        total
    }
}

/// A mixture of mutation types with positive weights.
#[derive(Debug)]
pub struct GenomicElementType {
    pub id: i64,
    mutation_types: Vec<Rc<MutationType>>,
    weights: Vec<f64>,
    sampler: DiscreteSampler,
}

impl GenomicElementType {
    pub fn new(
        id: i64,
        mutation_types: Vec<Rc<MutationType>>,
        weights: Vec<f64>,
    ) -> Result<Self, SimulationError> {
        if mutation_types.is_empty() || mutation_types.len() != weights.len() {
            return Err(SimulationError::InvalidParameter(format!(
                "genomic element type g{id} requires matching mutation types and weights"
            )));
        }
        for &w in &weights {
            if !w.is_finite() || w <= 0.0 {
                return Err(SimulationError::InvalidParameter(format!(
                    "genomic element type g{id} requires positive weights ({w} supplied)"
                )));
            }
        }
        let sampler = DiscreteSampler::new(&weights)?;
        Ok(Self {
            id,
            mutation_types,
            weights,
            sampler,
        })
    }

    pub fn symbol(&self) -> String {
        format!("g{}", self.id)
    }

    pub fn mutation_types(&self) -> &[Rc<MutationType>] {
        &self.mutation_types
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn set_fractions(
        &mut self,
        mutation_types: Vec<Rc<MutationType>>,
        weights: Vec<f64>,
    ) -> Result<(), SimulationError> {
        let rebuilt = Self::new(self.id, mutation_types, weights)?;
        *self = rebuilt;
        Ok(())
    }

    pub fn draw_mutation_type(&self, stream: &mut Stream) -> Rc<MutationType> {
        Rc::clone(&self.mutation_types[self.sampler.sample(stream)])
    }
}

/// A contiguous chromosome interval assigned a mutation-type mixture.
#[derive(Debug)]
pub struct GenomicElement {
    pub element_type: Rc<RefCell<GenomicElementType>>,
    pub start: u32,
    pub end: u32,
}

impl GenomicElement {
    pub fn new(
        element_type: Rc<RefCell<GenomicElementType>>,
        start: u32,
        end: u32,
    ) -> Result<Self, SimulationError> {
        if start > end {
            return Err(SimulationError::OverlappingElements { start, end });
        }
        Ok(Self {
            element_type,
            start,
            end,
        })
    }

    pub fn len(&self) -> u32 {
        self.end - self.start + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }
}

/// Derived draw tables, built once after initialization.
#[derive(Debug)]
struct DrawCaches {
    last_position: u32,
    overall_mutation_rate: f64,
    overall_recombination_rate: f64,
    exp_neg_mutation: f64,
    exp_neg_recombination: f64,
    // cumulative branch thresholds for the single-uniform joint draw
    prob_both_zero: f64,
    prob_through_break_only: f64,
    prob_through_mutation_only: f64,
    element_sampler: Option<DiscreteSampler>,
    recombination_sampler: Option<DiscreteSampler>,
    recombination_intervals: Vec<(u32, u32)>,
}

/// The chromosome: an ordered tiling of genomic elements plus mutation
/// and recombination rate maps and gene-conversion parameters.
#[derive(Debug, Default)]
pub struct Chromosome {
    elements: Vec<Rc<GenomicElement>>,
    mutation_map: Option<RateMap>,
    recombination_map: Option<RateMap>,
    gene_conversion_fraction: f64,
    gene_conversion_mean_length: f64,
    caches: Option<DrawCaches>,
}

impl Chromosome {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn elements(&self) -> &[Rc<GenomicElement>] {
        &self.elements
    }

    pub fn gene_conversion_fraction(&self) -> f64 {
        self.gene_conversion_fraction
    }

    pub fn gene_conversion_mean_length(&self) -> f64 {
        self.gene_conversion_mean_length
    }

    pub fn mutation_map(&self) -> Option<&RateMap> {
        self.mutation_map.as_ref()
    }

    pub fn recombination_map(&self) -> Option<&RateMap> {
        self.recombination_map.as_ref()
    }

    /// Append an element; elements must arrive sorted and non-overlapping.
    pub fn add_element(&mut self, element: GenomicElement) -> Result<(), SimulationError> {
        if let Some(last) = self.elements.last() {
            if element.start <= last.end {
                return Err(SimulationError::OverlappingElements {
                    start: element.start,
                    end: element.end,
                });
            }
        }
        self.elements.push(Rc::new(element));
        self.caches = None;
        Ok(())
    }

    pub fn set_mutation_map(&mut self, map: RateMap) {
        self.mutation_map = Some(map);
        self.caches = None;
    }

    pub fn set_recombination_map(&mut self, map: RateMap) {
        self.recombination_map = Some(map);
        self.caches = None;
    }

    pub fn set_gene_conversion(
        &mut self,
        fraction: f64,
        mean_length: f64,
    ) -> Result<(), SimulationError> {
        if !(0.0..=1.0).contains(&fraction) {
            return Err(SimulationError::InvalidRate("gene conversion fraction", fraction));
        }
        if fraction > 0.0 && mean_length < 1.0 {
            return Err(SimulationError::InvalidRate(
                "gene conversion mean tract length",
                mean_length,
            ));
        }
        self.gene_conversion_fraction = fraction;
        self.gene_conversion_mean_length = mean_length;
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.caches.is_some()
    }

    pub fn last_position(&self) -> u32 {
        self.caches
            .as_ref()
            .map(|c| c.last_position)
            .unwrap_or_else(|| self.elements.last().map(|e| e.end).unwrap_or(0))
    }

    pub fn overall_mutation_rate(&self) -> f64 {
        self.caches.as_ref().map_or(0.0, |c| c.overall_mutation_rate)
    }

    pub fn overall_recombination_rate(&self) -> f64 {
        self.caches
            .as_ref()
            .map_or(0.0, |c| c.overall_recombination_rate)
    }

    /// Precompute the weighted samplers and cached exponentials. Must
    /// run after initialization and before any kernel draw.
    pub fn initialize_draws(&mut self) -> Result<(), SimulationError> {
        if self.elements.is_empty() {
            return Err(SimulationError::EmptyChromosome);
        }
        let mutation_map = self.mutation_map.as_ref().ok_or_else(|| {
            SimulationError::InconsistentRateMap("mutation rate was never initialized".into())
        })?;
        let recombination_map = self.recombination_map.as_ref().ok_or_else(|| {
            SimulationError::InconsistentRateMap(
                "recombination rate was never initialized".into(),
            )
        })?;

        let element_end = self.elements.last().expect("non-empty").end;
        if mutation_map.last_position() < element_end {
            return Err(SimulationError::InconsistentRateMap(format!(
                "mutation map ends at {} but elements extend to {element_end}",
                mutation_map.last_position()
            )));
        }
        if recombination_map.last_position() < element_end {
            return Err(SimulationError::InconsistentRateMap(format!(
                "recombination map ends at {} but elements extend to {element_end}",
                recombination_map.last_position()
            )));
        }

        let last_position = element_end
            .max(mutation_map.last_position())
            .max(recombination_map.last_position());

        // per-element mutation mass, integrated over the rate map
        let element_weights: Vec<f64> = self
            .elements
            .iter()
            .map(|e| mutation_map.integral(e.start, e.end))
            .collect();
        let overall_mutation_rate: f64 = element_weights.iter().sum();
        let element_sampler = if overall_mutation_rate > 0.0 {
            Some(DiscreteSampler::new(&element_weights)?)
        } else {
            None
        };

        let mut interval_weights = Vec::new();
        let mut recombination_intervals = Vec::new();
        for (start, end, rate) in recombination_map.intervals() {
            interval_weights.push(rate * (end - start + 1) as f64);
            recombination_intervals.push((start, end));
        }
        let overall_recombination_rate: f64 = interval_weights.iter().sum();
        let recombination_sampler = if overall_recombination_rate > 0.0 {
            Some(DiscreteSampler::new(&interval_weights)?)
        } else {
            None
        };

        let exp_neg_mutation = (-overall_mutation_rate).exp();
        let exp_neg_recombination = (-overall_recombination_rate).exp();
        let prob_both_zero = exp_neg_mutation * exp_neg_recombination;
        let prob_through_break_only =
            prob_both_zero + exp_neg_mutation * (1.0 - exp_neg_recombination);
        let prob_through_mutation_only =
            prob_through_break_only + (1.0 - exp_neg_mutation) * exp_neg_recombination;

        self.caches = Some(DrawCaches {
            last_position,
            overall_mutation_rate,
            overall_recombination_rate,
            exp_neg_mutation,
            exp_neg_recombination,
            prob_both_zero,
            prob_through_break_only,
            prob_through_mutation_only,
            element_sampler,
            recombination_sampler,
            recombination_intervals,
        });
        Ok(())
    }

    fn caches(&self) -> &DrawCaches {
        self.caches
            .as_ref()
            .expect("initialize_draws must run before kernel draws")
    }

    /// Draw the joint (mutation count, breakpoint count) for one
    /// meiosis. A single uniform resolves the common all-zero case and
    /// selects among the three non-zero branches.
    pub fn draw_event_counts(&self, stream: &mut Stream) -> (u32, u32) {
        let c = self.caches();
        let u = stream.uniform();
        if u <= c.prob_both_zero {
            (0, 0)
        } else if u <= c.prob_through_break_only {
            (
                0,
                poisson_nonzero(
                    stream,
                    c.overall_recombination_rate,
                    c.exp_neg_recombination,
                ),
            )
        } else if u <= c.prob_through_mutation_only {
            (
                poisson_nonzero(stream, c.overall_mutation_rate, c.exp_neg_mutation),
                0,
            )
        } else {
            (
                poisson_nonzero(stream, c.overall_mutation_rate, c.exp_neg_mutation),
                poisson_nonzero(
                    stream,
                    c.overall_recombination_rate,
                    c.exp_neg_recombination,
                ),
            )
        }
    }

    /// Draw sorted breakpoint positions. A drawn breakpoint is promoted
    /// into a gene-conversion tract (a paired second breakpoint at a
    /// geometric tract length) with the configured fraction.
    pub fn draw_breakpoints(&self, count: u32, stream: &mut Stream) -> Vec<u32> {
        let c = self.caches();
        let Some(sampler) = &c.recombination_sampler else {
            return Vec::new();
        };
        let mut breakpoints = Vec::with_capacity(count as usize * 2);
        for _ in 0..count {
            let (start, end) = c.recombination_intervals[sampler.sample(stream)];
            let span = (end - start + 1) as usize;
            let position = start + stream.uniform_index(span) as u32;
            breakpoints.push(position);

            if self.gene_conversion_fraction > 0.0
                && stream.chance(self.gene_conversion_fraction)
            {
                let tract = geometric_tract_length(stream, self.gene_conversion_mean_length);
                breakpoints.push(position.saturating_add(tract));
            }
        }
        breakpoints.sort_unstable();
        breakpoints
    }

    /// Draw one new mutation: element by mutation mass, position
    /// uniformly within the element, type by the element's mixture,
    /// selection coefficient from the type's distribution.
    pub fn draw_new_mutation(
        &self,
        stream: &SharedStream,
        subpop_origin: i64,
        generation_origin: i64,
    ) -> Result<Rc<Mutation>, SimulationError> {
        let (position, mutation_type) = {
            let mut guard = stream.borrow_mut();
            let c = self.caches();
            let sampler = c.element_sampler.as_ref().ok_or_else(|| {
                SimulationError::InconsistentRateMap(
                    "cannot draw a mutation with a zero overall mutation rate".into(),
                )
            })?;
            let element = &self.elements[sampler.sample(&mut guard)];
            let span = element.len() as usize;
            let position = element.start + guard.uniform_index(span) as u32;
            let mutation_type = element.element_type.borrow().draw_mutation_type(&mut guard);
            (position, mutation_type)
        };
        // the selection-coefficient draw may re-enter the stream (and,
        // for script distributions, the interpreter), so the guard must
        // be released first
        let selection_coeff = mutation_type.draw_selection_coeff(stream)?;
        Ok(Mutation::new(
            mutation_type,
            position,
            selection_coeff,
            subpop_origin,
            generation_origin,
        ))
    }
}
