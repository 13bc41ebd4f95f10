//! Genomes: the two haplotype carriers of a diploid individual.
//!
//! A genome is a strictly position-sorted sequence of shared mutation
//! references. Ties are permitted; within a tie the insertion sequence
//! is preserved. Once a generation's genomes are published as parents
//! they are treated as immutable until the next swap.

use std::rc::Rc;

use crate::mutation::{mutation_key, Mutation};

#[derive(Debug, Clone, Default)]
pub struct Genome {
    mutations: Vec<Rc<Mutation>>,
}

impl Genome {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            mutations: Vec::with_capacity(capacity),
        }
    }

    pub fn from_mutations(mut mutations: Vec<Rc<Mutation>>) -> Self {
        mutations.sort_by_key(|m| m.position);
        Self { mutations }
    }

    pub fn mutations(&self) -> &[Rc<Mutation>] {
        &self.mutations
    }

    pub fn len(&self) -> usize {
        self.mutations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }

    pub fn clear(&mut self) {
        self.mutations.clear();
    }

    /// Whether this genome carries exactly this mutation object.
    pub fn contains(&self, mutation: &Rc<Mutation>) -> bool {
        let key = mutation_key(mutation);
        self.mutations.iter().any(|m| mutation_key(m) == key)
    }

    pub fn count_of_type(&self, type_id: i64) -> usize {
        self.mutations
            .iter()
            .filter(|m| m.mutation_type.id == type_id)
            .count()
    }

    /// Remove every mutation whose allocation key is in `keys`
    /// (substitution stripping).
    pub fn remove_by_keys(&mut self, keys: &std::collections::HashSet<usize>) {
        self.mutations.retain(|m| !keys.contains(&mutation_key(m)));
    }

    /// Verify the sorted invariant (used by tests and debug assertions).
    pub fn is_sorted(&self) -> bool {
        self.mutations.windows(2).all(|w| w[0].position <= w[1].position)
    }

    /// Produce a gamete by walking two parental genomes across sorted
    /// crossover breakpoints, then merging in newly drawn mutations.
    ///
    /// The copy starts on `first`, and switches strands at every
    /// breakpoint. A mutation at position p belongs to the segment
    /// with p < breakpoint. `new_mutations` need not be sorted; within
    /// a position tie they land after inherited mutations.
    pub fn recombine(
        first: &Genome,
        second: &Genome,
        breakpoints: &[u32],
        new_mutations: Vec<Rc<Mutation>>,
    ) -> Genome {
        debug_assert!(breakpoints.windows(2).all(|w| w[0] <= w[1]));

        let capacity = first.len().max(second.len()) + new_mutations.len();
        let mut inherited = Vec::with_capacity(capacity);

        let strands = [first, second];
        let mut cursor = [0usize, 0usize];
        let mut active = 0usize;

        for &bp in breakpoints {
            // copy from the active strand up to the breakpoint
            let strand = strands[active];
            while cursor[active] < strand.len()
                && strand.mutations[cursor[active]].position < bp
            {
                inherited.push(Rc::clone(&strand.mutations[cursor[active]]));
                cursor[active] += 1;
            }
            // skip the other strand past the breakpoint
            let other = 1 - active;
            let strand = strands[other];
            while cursor[other] < strand.len()
                && strand.mutations[cursor[other]].position < bp
            {
                cursor[other] += 1;
            }
            active = other;
        }
        // tail of the final strand
        let strand = strands[active];
        inherited.extend(
            strand.mutations[cursor[active]..]
                .iter()
                .map(Rc::clone),
        );

        if new_mutations.is_empty() {
            return Genome { mutations: inherited };
        }

        let mut fresh = new_mutations;
        fresh.sort_by_key(|m| m.position);

        // stable merge; inherited mutations precede new ones at a tie
        let mut merged = Vec::with_capacity(inherited.len() + fresh.len());
        let mut i = 0;
        let mut j = 0;
        while i < inherited.len() && j < fresh.len() {
            if inherited[i].position <= fresh[j].position {
                merged.push(Rc::clone(&inherited[i]));
                i += 1;
            } else {
                merged.push(Rc::clone(&fresh[j]));
                j += 1;
            }
        }
        merged.extend(inherited[i..].iter().map(Rc::clone));
        merged.extend(fresh[j..].iter().map(Rc::clone));

        Genome { mutations: merged }
    }
}
