//! Subpopulations: the parents/children genome arrays, cached fitness,
//! selfing, and migration fractions.
//!
//! A subpopulation of N diploids holds 2N parental genomes (published,
//! read-only for the generation) and 2N child genomes being filled by
//! the offspring kernel. `swap_generations` promotes children to
//! parents; this is the only point where the arrays change roles.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use demevo_script::Stream;

use crate::errors::SimulationError;
use crate::genome::Genome;
use crate::mutation::Mutation;
use crate::rng::DiscreteSampler;

pub struct Subpopulation {
    pub id: i64,
    size: usize,
    child_size: usize,
    selfing_fraction: f64,
    migration_fractions: BTreeMap<i64, f64>,
    parents: Vec<Rc<RefCell<Genome>>>,
    children: Vec<Rc<RefCell<Genome>>>,
    parent_fitness: Vec<f64>,
    fitness_sampler: Option<DiscreteSampler>,
}

impl std::fmt::Debug for Subpopulation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Subpopulation(p{}, N={})", self.id, self.size)
    }
}

fn empty_genomes(count: usize) -> Vec<Rc<RefCell<Genome>>> {
    (0..count)
        .map(|_| Rc::new(RefCell::new(Genome::new())))
        .collect()
}

impl Subpopulation {
    pub fn new(id: i64, size: usize) -> Result<Self, SimulationError> {
        if size == 0 {
            return Err(SimulationError::InvalidPopulationSize(0));
        }
        Ok(Self {
            id,
            size,
            child_size: size,
            selfing_fraction: 0.0,
            migration_fractions: BTreeMap::new(),
            parents: empty_genomes(2 * size),
            children: empty_genomes(2 * size),
            parent_fitness: Vec::new(),
            fitness_sampler: None,
        })
    }

    pub fn symbol(&self) -> String {
        format!("p{}", self.id)
    }

    /// The current number of parental diploids.
    pub fn size(&self) -> usize {
        self.size
    }

    /// The number of diploids in the generation being produced.
    pub fn child_size(&self) -> usize {
        self.child_size
    }

    /// Resize the next generation. Takes effect at the coming swap.
    pub fn set_child_size(&mut self, size: usize) -> Result<(), SimulationError> {
        if size == 0 {
            return Err(SimulationError::InvalidPopulationSize(0));
        }
        self.child_size = size;
        Ok(())
    }

    pub fn selfing_fraction(&self) -> f64 {
        self.selfing_fraction
    }

    pub fn set_selfing_fraction(&mut self, fraction: f64) -> Result<(), SimulationError> {
        if !(0.0..=1.0).contains(&fraction) {
            return Err(SimulationError::InvalidRate("selfing fraction", fraction));
        }
        self.selfing_fraction = fraction;
        Ok(())
    }

    pub fn migration_fractions(&self) -> &BTreeMap<i64, f64> {
        &self.migration_fractions
    }

    /// Replace the migration-rate map (source id -> incoming fraction).
    /// The native fraction is the remainder to 1.
    pub fn set_migration_fractions(
        &mut self,
        fractions: BTreeMap<i64, f64>,
    ) -> Result<(), SimulationError> {
        let mut total = 0.0;
        for (&source, &fraction) in &fractions {
            if source == self.id {
                return Err(SimulationError::InvalidParameter(format!(
                    "subpopulation p{} cannot receive migrants from itself",
                    self.id
                )));
            }
            if !(0.0..=1.0).contains(&fraction) {
                return Err(SimulationError::InvalidRate("migration fraction", fraction));
            }
            total += fraction;
        }
        if total > 1.0 {
            return Err(SimulationError::InvalidRate("total migration fraction", total));
        }
        self.migration_fractions = fractions;
        Ok(())
    }

    // -- genomes ----------------------------------------------------------

    pub fn parent_genomes(&self) -> &[Rc<RefCell<Genome>>] {
        &self.parents
    }

    pub fn child_genomes(&self) -> &[Rc<RefCell<Genome>>] {
        &self.children
    }

    /// The two genome handles of parent individual `index`.
    pub fn parent_pair(&self, index: usize) -> (Rc<RefCell<Genome>>, Rc<RefCell<Genome>>) {
        (
            Rc::clone(&self.parents[2 * index]),
            Rc::clone(&self.parents[2 * index + 1]),
        )
    }

    /// Install a freshly produced gamete into a child genome slot.
    pub fn set_child_genome(&mut self, slot: usize, genome: Genome) {
        *self.children[slot].borrow_mut() = genome;
    }

    /// Replace the parental genomes wholesale (population load).
    pub fn set_parent_genomes(&mut self, genomes: Vec<Genome>) -> Result<(), SimulationError> {
        if genomes.len() != 2 * self.size {
            return Err(SimulationError::InvalidParameter(format!(
                "subpopulation p{} expects {} genomes, {} supplied",
                self.id,
                2 * self.size,
                genomes.len()
            )));
        }
        self.parents = genomes
            .into_iter()
            .map(|g| Rc::new(RefCell::new(g)))
            .collect();
        self.parent_fitness.clear();
        self.fitness_sampler = None;
        Ok(())
    }

    /// Make sure the children array matches the configured child size.
    pub fn prepare_children(&mut self) {
        if self.children.len() != 2 * self.child_size {
            self.children = empty_genomes(2 * self.child_size);
        }
    }

    /// Publish children as the new parents. The old parent array is
    /// recycled as the next children array.
    pub fn swap_generations(&mut self) {
        std::mem::swap(&mut self.parents, &mut self.children);
        self.size = self.child_size;
        for genome in &self.children {
            genome.borrow_mut().clear();
        }
        self.prepare_children();
        self.parent_fitness.clear();
        self.fitness_sampler = None;
    }

    // -- fitness ----------------------------------------------------------

    pub fn cached_fitness(&self) -> &[f64] {
        &self.parent_fitness
    }

    /// Install per-individual fitness values and rebuild the weighted
    /// parent sampler. Uniform fitness (including the all-zero
    /// degenerate case) selects parents uniformly.
    pub fn set_fitness_values(&mut self, values: Vec<f64>) -> Result<(), SimulationError> {
        if values.len() != self.size {
            return Err(SimulationError::InvalidParameter(format!(
                "subpopulation p{} expects {} fitness values, {} supplied",
                self.id,
                self.size,
                values.len()
            )));
        }
        let total: f64 = values.iter().sum();
        let uniform = total <= 0.0
            || values
                .windows(2)
                .all(|w| (w[0] - w[1]).abs() < f64::EPSILON);
        self.fitness_sampler = if uniform {
            None
        } else {
            Some(DiscreteSampler::new(&values)?)
        };
        self.parent_fitness = values;
        Ok(())
    }

    /// Draw a parent individual index, weighted by cached fitness.
    pub fn select_parent(&self, stream: &mut Stream) -> usize {
        match &self.fitness_sampler {
            Some(sampler) => sampler.sample(stream),
            None => stream.uniform_index(self.size),
        }
    }

    /// Draw a parent index from externally supplied weights (as a
    /// mate-choice block provides them).
    pub fn select_parent_weighted(
        &self,
        weights: &[f64],
        stream: &mut Stream,
    ) -> Result<usize, SimulationError> {
        if weights.len() != self.size {
            return Err(SimulationError::InvalidParameter(format!(
                "mate-choice weights must have size {} (got {})",
                self.size,
                weights.len()
            )));
        }
        let sampler = DiscreteSampler::new(weights)?;
        Ok(sampler.sample(stream))
    }
}

/// Diploid fitness: the product over sites of per-site contributions,
/// clamped at zero. Mutations present in both genomes with the same
/// type and selection coefficient pair off as homozygous `(1 + s)`;
/// the unmatched remainder contributes `(1 + h*s)` each. Neutral sites
/// (s == 0) are skipped.
pub fn diploid_fitness(g1: &Genome, g2: &Genome) -> f64 {
    fitness_walk(g1, g2, true, |_, _, default| Ok(default))
        .expect("identity site closure cannot fail")
}

/// Diploid fitness with a per-site override: `site` sees every site
/// (neutral ones included, so a block can promote them) and returns the
/// contribution to use.
pub fn diploid_fitness_with<F>(g1: &Genome, g2: &Genome, site: F) -> Result<f64, SimulationError>
where
    F: FnMut(&Rc<Mutation>, bool, f64) -> Result<f64, SimulationError>,
{
    fitness_walk(g1, g2, false, site)
}

fn fitness_walk<F>(
    g1: &Genome,
    g2: &Genome,
    skip_neutral: bool,
    mut site: F,
) -> Result<f64, SimulationError>
where
    F: FnMut(&Rc<Mutation>, bool, f64) -> Result<f64, SimulationError>,
{
    let a = g1.mutations();
    let b = g2.mutations();
    let mut i = 0;
    let mut j = 0;
    let mut w = 1.0f64;

    while i < a.len() || j < b.len() {
        let position = match (a.get(i), b.get(j)) {
            (Some(x), Some(y)) => x.position.min(y.position),
            (Some(x), None) => x.position,
            (None, Some(y)) => y.position,
            (None, None) => unreachable!(),
        };

        let a_end = a[i..]
            .iter()
            .position(|m| m.position != position)
            .map_or(a.len(), |k| i + k);
        let b_end = b[j..]
            .iter()
            .position(|m| m.position != position)
            .map_or(b.len(), |k| j + k);

        let site_a = &a[i..a_end];
        let site_b = &b[j..b_end];
        let mut b_used = vec![false; site_b.len()];

        // pair homozygous matches first (stable order), then apply the
        // heterozygous contribution to the unmatched remainder
        for am in site_a {
            let matched = site_b.iter().enumerate().position(|(k, bm)| {
                !b_used[k]
                    && bm.mutation_type.id == am.mutation_type.id
                    && bm.selection_coeff == am.selection_coeff
            });
            match matched {
                Some(k) => {
                    b_used[k] = true;
                    let s = am.selection_coeff;
                    if !skip_neutral || s != 0.0 {
                        w *= site(am, true, 1.0 + s)?;
                    }
                }
                None => {
                    let s = am.selection_coeff;
                    let h = am.mutation_type.dominance_coeff;
                    if !skip_neutral || s != 0.0 {
                        w *= site(am, false, 1.0 + h * s)?;
                    }
                }
            }
        }
        for (k, bm) in site_b.iter().enumerate() {
            if b_used[k] {
                continue;
            }
            let s = bm.selection_coeff;
            let h = bm.mutation_type.dominance_coeff;
            if !skip_neutral || s != 0.0 {
                w *= site(bm, false, 1.0 + h * s)?;
            }
        }

        i = a_end;
        j = b_end;
    }

    Ok(w.max(0.0))
}
