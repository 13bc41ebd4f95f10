//! The population: subpopulations keyed by id, the substitutions
//! registry, fixation sweeps, and the line-oriented dump/load format.
//!
//! The dump format is an exact-inverse wire format:
//!
//! ```text
//! #OUT: <generation> A
//! Populations:
//! p1 <size> <selfing>
//! Mutations:
//! <index> m<type> <position> <selection> p<origin> <generation> <count>
//! Genomes:
//! p1:<genome-index> <mutation indices...>
//! ```

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::{BufRead, Write};
use std::rc::Rc;

use demevo_script::Stream;

use crate::errors::SimulationError;
use crate::genome::Genome;
use crate::mutation::{mutation_key, Mutation, MutationType};
use crate::subpopulation::Subpopulation;

/// A mutation that reached fixation and left the genomes.
#[derive(Debug)]
pub struct Substitution {
    pub mutation: Rc<Mutation>,
    pub fixation_generation: i64,
}

#[derive(Default, Debug)]
pub struct Population {
    subpops: BTreeMap<i64, Rc<RefCell<Subpopulation>>>,
    substitutions: Vec<Rc<Substitution>>,
}

impl Population {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ids(&self) -> Vec<i64> {
        self.subpops.keys().copied().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.subpops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.subpops.len()
    }

    pub fn subpop(&self, id: i64) -> Result<Rc<RefCell<Subpopulation>>, SimulationError> {
        self.subpops
            .get(&id)
            .cloned()
            .ok_or(SimulationError::UnknownSubpopulation(id))
    }

    pub fn subpops(&self) -> impl Iterator<Item = (&i64, &Rc<RefCell<Subpopulation>>)> {
        self.subpops.iter()
    }

    pub fn add_subpopulation(
        &mut self,
        id: i64,
        size: usize,
    ) -> Result<Rc<RefCell<Subpopulation>>, SimulationError> {
        if self.subpops.contains_key(&id) {
            return Err(SimulationError::DuplicateSubpopulation(id));
        }
        let subpop = Rc::new(RefCell::new(Subpopulation::new(id, size)?));
        self.subpops.insert(id, Rc::clone(&subpop));
        Ok(subpop)
    }

    /// Found a subpopulation from individuals of an existing one:
    /// parental genome pairs are drawn uniformly from the source.
    pub fn add_subpopulation_split(
        &mut self,
        id: i64,
        size: usize,
        source_id: i64,
        stream: &mut Stream,
    ) -> Result<Rc<RefCell<Subpopulation>>, SimulationError> {
        if self.subpops.contains_key(&id) {
            return Err(SimulationError::DuplicateSubpopulation(id));
        }
        let source = self.subpop(source_id)?;
        let mut genomes = Vec::with_capacity(2 * size);
        {
            let source = source.borrow();
            for _ in 0..size {
                let parent = stream.uniform_index(source.size());
                let (g1, g2) = source.parent_pair(parent);
                genomes.push(g1.borrow().clone());
                genomes.push(g2.borrow().clone());
            }
        }
        let subpop = Rc::new(RefCell::new(Subpopulation::new(id, size)?));
        subpop.borrow_mut().set_parent_genomes(genomes)?;
        self.subpops.insert(id, Rc::clone(&subpop));
        Ok(subpop)
    }

    /// Remove a subpopulation. Lingering script references to it become
    /// stale at this point and must not be dereferenced.
    pub fn remove_subpopulation(&mut self, id: i64) -> Result<(), SimulationError> {
        self.subpops
            .remove(&id)
            .map(|_| ())
            .ok_or(SimulationError::UnknownSubpopulation(id))
    }

    pub fn substitutions(&self) -> &[Rc<Substitution>] {
        &self.substitutions
    }

    // -- mutation bookkeeping over published (parent) genomes -----------

    /// Every distinct segregating mutation, in deterministic first-seen
    /// order over (subpopulation id, genome index, genome order).
    pub fn unique_mutations(&self) -> Vec<Rc<Mutation>> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for subpop in self.subpops.values() {
            let subpop = subpop.borrow();
            for genome in subpop.parent_genomes() {
                for m in genome.borrow().mutations() {
                    if seen.insert(mutation_key(m)) {
                        out.push(Rc::clone(m));
                    }
                }
            }
        }
        out
    }

    /// Occurrence counts of every mutation across the parent genomes of
    /// the given subpopulations (all when `ids` is None), plus the
    /// total number of genomes counted.
    pub fn mutation_counts(&self, ids: Option<&[i64]>) -> (HashMap<usize, usize>, usize) {
        let mut counts = HashMap::new();
        let mut genome_total = 0usize;
        for (id, subpop) in &self.subpops {
            if let Some(ids) = ids {
                if !ids.contains(id) {
                    continue;
                }
            }
            let subpop = subpop.borrow();
            for genome in subpop.parent_genomes() {
                genome_total += 1;
                for m in genome.borrow().mutations() {
                    *counts.entry(mutation_key(m)).or_insert(0) += 1;
                }
            }
        }
        (counts, genome_total)
    }

    /// Move mutations at frequency 1 across all child genomes into the
    /// substitutions registry and strip them from the genomes. Runs
    /// between the late events and the generation swap.
    pub fn remove_fixed_in_children(&mut self, generation: i64) -> usize {
        let mut counts: HashMap<usize, (usize, Rc<Mutation>)> = HashMap::new();
        let mut genome_total = 0usize;
        for subpop in self.subpops.values() {
            let subpop = subpop.borrow();
            for genome in subpop.child_genomes() {
                genome_total += 1;
                for m in genome.borrow().mutations() {
                    counts
                        .entry(mutation_key(m))
                        .and_modify(|(n, _)| *n += 1)
                        .or_insert_with(|| (1, Rc::clone(m)));
                }
            }
        }
        if genome_total == 0 {
            return 0;
        }

        let mut fixed: Vec<Rc<Mutation>> = counts
            .into_iter()
            .filter(|(_, (n, _))| *n == genome_total)
            .map(|(_, (_, m))| m)
            .collect();
        if fixed.is_empty() {
            return 0;
        }
        // deterministic substitution order regardless of hash iteration
        fixed.sort_by_key(|m| (m.position, m.generation_origin, m.subpop_origin));

        let keys: HashSet<usize> = fixed.iter().map(mutation_key).collect();
        for subpop in self.subpops.values() {
            let subpop = subpop.borrow();
            for genome in subpop.child_genomes() {
                genome.borrow_mut().remove_by_keys(&keys);
            }
        }

        let count = fixed.len();
        for mutation in fixed {
            self.substitutions.push(Rc::new(Substitution {
                mutation,
                fixation_generation: generation,
            }));
        }
        count
    }

    // -- dump and load ---------------------------------------------------

    /// Write the population state (parent genomes) as text.
    pub fn dump(&self, out: &mut dyn Write, generation: i64) -> Result<(), SimulationError> {
        writeln!(out, "#OUT: {generation} A")?;

        writeln!(out, "Populations:")?;
        for (id, subpop) in &self.subpops {
            let subpop = subpop.borrow();
            writeln!(out, "p{id} {} {}", subpop.size(), subpop.selfing_fraction())?;
        }

        // index mutations in first-seen order and count occurrences
        let uniques = self.unique_mutations();
        let (counts, _) = self.mutation_counts(None);
        let mut index_of: HashMap<usize, usize> = HashMap::new();
        for (idx, m) in uniques.iter().enumerate() {
            index_of.insert(mutation_key(m), idx);
        }

        writeln!(out, "Mutations:")?;
        for (idx, m) in uniques.iter().enumerate() {
            let count = counts.get(&mutation_key(m)).copied().unwrap_or(0);
            writeln!(
                out,
                "{idx} m{} {} {} p{} {} {count}",
                m.mutation_type.id,
                m.position,
                m.selection_coeff,
                m.subpop_origin,
                m.generation_origin,
            )?;
        }

        writeln!(out, "Genomes:")?;
        for (id, subpop) in &self.subpops {
            let subpop = subpop.borrow();
            for (gi, genome) in subpop.parent_genomes().iter().enumerate() {
                write!(out, "p{id}:{gi}")?;
                for m in genome.borrow().mutations() {
                    write!(out, " {}", index_of[&mutation_key(m)])?;
                }
                writeln!(out)?;
            }
        }
        Ok(())
    }

    /// Rebuild a population from dump text. The exact inverse of
    /// `dump` under the same mutation-type registry; returns the
    /// recorded generation alongside the population.
    pub fn load(
        reader: &mut dyn BufRead,
        mutation_types: &BTreeMap<i64, Rc<MutationType>>,
    ) -> Result<(Self, i64), SimulationError> {
        let mut lines = Vec::new();
        for line in reader.lines() {
            lines.push(line?);
        }
        let bad = |line: usize, message: &str| SimulationError::ParseDump {
            line: line + 1,
            message: message.to_string(),
        };

        let mut cursor = 0usize;
        let header = lines
            .first()
            .ok_or_else(|| bad(0, "empty population file"))?;
        let generation: i64 = header
            .strip_prefix("#OUT: ")
            .and_then(|rest| rest.split_whitespace().next())
            .and_then(|g| g.parse().ok())
            .ok_or_else(|| bad(0, "expected '#OUT: <generation> <tag>' header"))?;
        cursor += 1;

        if lines.get(cursor).map(String::as_str) != Some("Populations:") {
            return Err(bad(cursor, "expected 'Populations:' section"));
        }
        cursor += 1;

        let mut population = Population::new();
        let mut selfing: Vec<(i64, f64)> = Vec::new();
        while cursor < lines.len() && lines[cursor] != "Mutations:" {
            let fields: Vec<&str> = lines[cursor].split_whitespace().collect();
            if fields.len() != 3 {
                return Err(bad(cursor, "expected 'p<id> <size> <selfing>'"));
            }
            let id = parse_tagged(fields[0], 'p').ok_or_else(|| bad(cursor, "bad subpop id"))?;
            let size: usize = fields[1]
                .parse()
                .map_err(|_| bad(cursor, "bad subpop size"))?;
            let fraction: f64 = fields[2]
                .parse()
                .map_err(|_| bad(cursor, "bad selfing fraction"))?;
            population.add_subpopulation(id, size)?;
            selfing.push((id, fraction));
            cursor += 1;
        }
        for (id, fraction) in selfing {
            population.subpop(id)?.borrow_mut().set_selfing_fraction(fraction)?;
        }

        if lines.get(cursor).map(String::as_str) != Some("Mutations:") {
            return Err(bad(cursor, "expected 'Mutations:' section"));
        }
        cursor += 1;

        let mut mutations: HashMap<usize, Rc<Mutation>> = HashMap::new();
        while cursor < lines.len() && lines[cursor] != "Genomes:" {
            let fields: Vec<&str> = lines[cursor].split_whitespace().collect();
            if fields.len() != 7 {
                return Err(bad(
                    cursor,
                    "expected '<index> m<type> <pos> <s> p<origin> <gen> <count>'",
                ));
            }
            let index: usize = fields[0]
                .parse()
                .map_err(|_| bad(cursor, "bad mutation index"))?;
            let type_id =
                parse_tagged(fields[1], 'm').ok_or_else(|| bad(cursor, "bad mutation type"))?;
            let position: u32 = fields[2]
                .parse()
                .map_err(|_| bad(cursor, "bad position"))?;
            let selection: f64 = fields[3]
                .parse()
                .map_err(|_| bad(cursor, "bad selection coefficient"))?;
            let origin =
                parse_tagged(fields[4], 'p').ok_or_else(|| bad(cursor, "bad origin subpop"))?;
            let origin_generation: i64 = fields[5]
                .parse()
                .map_err(|_| bad(cursor, "bad origin generation"))?;

            let mutation_type = mutation_types
                .get(&type_id)
                .cloned()
                .ok_or(SimulationError::UnknownMutationType(type_id))?;
            mutations.insert(
                index,
                Mutation::new(mutation_type, position, selection, origin, origin_generation),
            );
            cursor += 1;
        }

        if lines.get(cursor).map(String::as_str) != Some("Genomes:") {
            return Err(bad(cursor, "expected 'Genomes:' section"));
        }
        cursor += 1;

        let mut genome_lists: HashMap<i64, Vec<Option<Genome>>> = HashMap::new();
        for (&id, subpop) in population.subpops.iter() {
            genome_lists.insert(id, vec![None; 2 * subpop.borrow().size()]);
        }
        while cursor < lines.len() {
            if lines[cursor].trim().is_empty() {
                cursor += 1;
                continue;
            }
            let mut fields = lines[cursor].split_whitespace();
            let tag = fields.next().ok_or_else(|| bad(cursor, "empty genome line"))?;
            let (subpop_tag, genome_index) = tag
                .split_once(':')
                .ok_or_else(|| bad(cursor, "expected 'p<id>:<index>'"))?;
            let id =
                parse_tagged(subpop_tag, 'p').ok_or_else(|| bad(cursor, "bad subpop tag"))?;
            let genome_index: usize = genome_index
                .parse()
                .map_err(|_| bad(cursor, "bad genome index"))?;

            let list = genome_lists
                .get_mut(&id)
                .ok_or(SimulationError::UnknownSubpopulation(id))?;
            if genome_index >= list.len() {
                return Err(bad(cursor, "genome index out of range"));
            }

            let mut carried = Vec::new();
            for field in fields {
                let index: usize = field
                    .parse()
                    .map_err(|_| bad(cursor, "bad mutation reference"))?;
                let mutation = mutations
                    .get(&index)
                    .ok_or_else(|| bad(cursor, "reference to undefined mutation"))?;
                carried.push(Rc::clone(mutation));
            }
            list[genome_index] = Some(Genome::from_mutations(carried));
            cursor += 1;
        }

        for (id, list) in genome_lists {
            let genomes: Vec<Genome> = list
                .into_iter()
                .map(|g| g.unwrap_or_default())
                .collect();
            population.subpop(id)?.borrow_mut().set_parent_genomes(genomes)?;
        }

        Ok((population, generation))
    }
}

fn parse_tagged(field: &str, tag: char) -> Option<i64> {
    field.strip_prefix(tag)?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mutation::SelectionDistribution;

    fn mut_type(id: i64) -> Rc<MutationType> {
        Rc::new(MutationType::new(id, 0.5, SelectionDistribution::Fixed { s: 0.0 }).unwrap())
    }

    fn type_registry(mt: &Rc<MutationType>) -> BTreeMap<i64, Rc<MutationType>> {
        let mut map = BTreeMap::new();
        map.insert(mt.id, Rc::clone(mt));
        map
    }

    fn seed_population(mt: &Rc<MutationType>) -> (Population, Rc<Mutation>) {
        let mut pop = Population::new();
        pop.add_subpopulation(1, 2).unwrap();
        let m = Mutation::new(Rc::clone(mt), 100, 0.1, 1, 3);
        let subpop = pop.subpop(1).unwrap();
        {
            let mut sp = subpop.borrow_mut();
            sp.set_parent_genomes(vec![
                Genome::from_mutations(vec![Rc::clone(&m)]),
                Genome::new(),
                Genome::from_mutations(vec![Rc::clone(&m)]),
                Genome::new(),
            ])
            .unwrap();
            sp.set_selfing_fraction(0.25).unwrap();
        }
        (pop, m)
    }

    #[test]
    fn test_add_and_remove_subpopulations() {
        let mut pop = Population::new();
        pop.add_subpopulation(1, 10).unwrap();
        assert!(matches!(
            pop.add_subpopulation(1, 5),
            Err(SimulationError::DuplicateSubpopulation(1))
        ));
        pop.add_subpopulation(2, 5).unwrap();
        assert_eq!(pop.ids(), vec![1, 2]);

        pop.remove_subpopulation(1).unwrap();
        assert!(matches!(
            pop.subpop(1),
            Err(SimulationError::UnknownSubpopulation(1))
        ));
        assert!(pop.remove_subpopulation(9).is_err());
    }

    #[test]
    fn test_split_copies_source_genomes() {
        let mt = mut_type(1);
        let (mut pop, m) = seed_population(&mt);
        let mut stream = Stream::new(5);
        pop.add_subpopulation_split(2, 3, 1, &mut stream).unwrap();

        let p2 = pop.subpop(2).unwrap();
        let p2 = p2.borrow();
        assert_eq!(p2.size(), 3);
        assert_eq!(p2.parent_genomes().len(), 6);
        // every odd genome in the source is empty, every even carries m
        for pair in 0..3 {
            let (g1, g2) = p2.parent_pair(pair);
            assert!(g1.borrow().contains(&m));
            assert!(g2.borrow().is_empty());
        }
    }

    #[test]
    fn test_split_from_unknown_source() {
        let mut pop = Population::new();
        let mut stream = Stream::new(5);
        assert!(pop.add_subpopulation_split(2, 3, 1, &mut stream).is_err());
    }

    #[test]
    fn test_unique_mutations_and_counts() {
        let mt = mut_type(1);
        let (pop, m) = seed_population(&mt);
        let uniques = pop.unique_mutations();
        assert_eq!(uniques.len(), 1);
        assert!(Rc::ptr_eq(&uniques[0], &m));

        let (counts, total) = pop.mutation_counts(None);
        assert_eq!(total, 4);
        assert_eq!(counts[&mutation_key(&m)], 2);
    }

    #[test]
    fn test_fixation_sweep() {
        let mt = mut_type(1);
        let mut pop = Population::new();
        pop.add_subpopulation(1, 1).unwrap();
        let fixed = Mutation::new(Rc::clone(&mt), 10, 0.05, 1, 2);
        let segregating = Mutation::new(Rc::clone(&mt), 20, 0.0, 1, 2);
        {
            let subpop = pop.subpop(1).unwrap();
            let mut sp = subpop.borrow_mut();
            sp.set_child_genome(
                0,
                Genome::from_mutations(vec![Rc::clone(&fixed), Rc::clone(&segregating)]),
            );
            sp.set_child_genome(1, Genome::from_mutations(vec![Rc::clone(&fixed)]));
        }

        let substituted = pop.remove_fixed_in_children(7);
        assert_eq!(substituted, 1);
        assert_eq!(pop.substitutions().len(), 1);
        let sub = &pop.substitutions()[0];
        assert!(Rc::ptr_eq(&sub.mutation, &fixed));
        assert_eq!(sub.fixation_generation, 7);

        // the fixed mutation left the genomes; the segregating one stayed
        let subpop = pop.subpop(1).unwrap();
        let sp = subpop.borrow();
        assert!(!sp.child_genomes()[0].borrow().contains(&fixed));
        assert!(sp.child_genomes()[0].borrow().contains(&segregating));
        assert!(sp.child_genomes()[1].borrow().is_empty());
    }

    #[test]
    fn test_fixation_requires_every_genome() {
        let mt = mut_type(1);
        let mut pop = Population::new();
        pop.add_subpopulation(1, 1).unwrap();
        pop.add_subpopulation(2, 1).unwrap();
        let m = Mutation::new(Rc::clone(&mt), 10, 0.0, 1, 1);
        {
            let p1 = pop.subpop(1).unwrap();
            let mut sp = p1.borrow_mut();
            sp.set_child_genome(0, Genome::from_mutations(vec![Rc::clone(&m)]));
            sp.set_child_genome(1, Genome::from_mutations(vec![Rc::clone(&m)]));
        }
        // p2's children never carry m, so it must not substitute
        assert_eq!(pop.remove_fixed_in_children(3), 0);
        assert!(pop.substitutions().is_empty());
    }

    #[test]
    fn test_dump_format() {
        let mt = mut_type(1);
        let (pop, _) = seed_population(&mt);
        let mut out = Vec::new();
        pop.dump(&mut out, 12).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "#OUT: 12 A");
        assert_eq!(lines[1], "Populations:");
        assert_eq!(lines[2], "p1 2 0.25");
        assert_eq!(lines[3], "Mutations:");
        assert_eq!(lines[4], "0 m1 100 0.1 p1 3 2");
        assert_eq!(lines[5], "Genomes:");
        assert_eq!(lines[6], "p1:0 0");
        assert_eq!(lines[7], "p1:1");
        assert_eq!(lines[8], "p1:2 0");
        assert_eq!(lines[9], "p1:3");
    }

    #[test]
    fn test_dump_load_round_trip() {
        let mt = mut_type(1);
        let (pop, _) = seed_population(&mt);
        let registry = type_registry(&mt);

        let mut first = Vec::new();
        pop.dump(&mut first, 12).unwrap();

        let (loaded, generation) =
            Population::load(&mut first.as_slice(), &registry).unwrap();
        assert_eq!(generation, 12);

        let mut second = Vec::new();
        loaded.dump(&mut second, 12).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_load_rejects_unknown_type() {
        let mt = mut_type(1);
        let (pop, _) = seed_population(&mt);
        let mut out = Vec::new();
        pop.dump(&mut out, 1).unwrap();

        let registry = type_registry(&mut_type(9));
        let err = Population::load(&mut out.as_slice(), &registry).unwrap_err();
        assert!(matches!(err, SimulationError::UnknownMutationType(1)));
    }

    #[test]
    fn test_load_rejects_malformed_input() {
        let registry = type_registry(&mut_type(1));
        let text = "#OUT: 1 A\nPopulations:\np1 two 0.0\nMutations:\nGenomes:\n";
        let err = Population::load(&mut text.as_bytes(), &registry).unwrap_err();
        assert!(matches!(err, SimulationError::ParseDump { line: 3, .. }));

        let text = "no header\n";
        let err = Population::load(&mut text.as_bytes(), &registry).unwrap_err();
        assert!(matches!(err, SimulationError::ParseDump { line: 1, .. }));
    }
}
