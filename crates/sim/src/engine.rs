//! The simulation engine: script-driven setup, the per-generation life
//! cycle, and the embedder surface.
//!
//! A `Simulation` owns the interpreter and the engine state (`SimCore`)
//! behind a shared handle that host objects also hold. The engine never
//! keeps a core borrow alive across a script callback: kernels borrow,
//! release, and callbacks run against short re-borrows, which is what
//! makes the single-threaded cooperative model sound.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::io::{BufRead, Write};
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use demevo_script::{
    AstNode, CallSignature, ErrorKind, FunctionRegistry, HostFunction, Interpreter, ScriptError,
    SharedStream, Stream, TypeMask, Value,
};

use crate::chromosome::{Chromosome, GenomicElement, GenomicElementType, RateMap};
use crate::errors::SimulationError;
use crate::genome::Genome;
use crate::host;
use crate::mutation::{MutationType, SelectionDistribution};
use crate::population::Population;
use crate::script_block::{BlockKind, ScriptBlock};
use crate::rng::DiscreteSampler;
use crate::subpopulation::{diploid_fitness, diploid_fitness_with, Subpopulation};

/// Engine state shared with host objects.
pub struct SimCore {
    pub stream: SharedStream,
    pub chromosome: Chromosome,
    pub mutation_types: BTreeMap<i64, Rc<MutationType>>,
    pub element_types: BTreeMap<i64, Rc<RefCell<GenomicElementType>>>,
    pub population: Population,
    pub blocks: Vec<Rc<RefCell<ScriptBlock>>>,
    pub generation: i64,
    pub finished: bool,
}

/// Run configuration an embedder can persist for reproducibility.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunOptions {
    pub seed: Option<i64>,
    pub max_generations: Option<i64>,
}

/// Rate arguments staged by `initializeMutationRate` and
/// `initializeRecombinationRate`; resolved against the element extent
/// once initialization finishes.
#[derive(Default)]
struct InitStaging {
    mutation_rate: Option<(Vec<f64>, Option<Vec<u32>>)>,
    recombination_rate: Option<(Vec<f64>, Option<Vec<u32>>)>,
}

pub struct Simulation {
    core: Rc<RefCell<SimCore>>,
    interpreter: Interpreter,
    initialized: bool,
}

impl Simulation {
    /// Parse a top-level script and set up an engine around it. The
    /// initialization blocks run lazily on the first generation step
    /// (or via `initialize`).
    pub fn new(script_source: &str, seed: Option<i64>) -> Result<Self, SimulationError> {
        let registry = FunctionRegistry::standard();
        let stream: SharedStream = Rc::new(RefCell::new(match seed {
            Some(seed) => Stream::new(seed),
            None => Stream::from_entropy(),
        }));

        let blocks = crate::script_block::parse_script(script_source, &registry)?
            .into_iter()
            .map(|b| Rc::new(RefCell::new(b)))
            .collect();

        let core = Rc::new(RefCell::new(SimCore {
            stream: Rc::clone(&stream),
            chromosome: Chromosome::new(),
            mutation_types: BTreeMap::new(),
            element_types: BTreeMap::new(),
            population: Population::new(),
            blocks,
            generation: 0,
            finished: false,
        }));

        let mut interpreter = Interpreter::new(registry, stream);
        let sim_object = host::simulation_object(Rc::clone(&core), interpreter.output_handle());
        interpreter
            .symbols
            .define_constant("sim", sim_object)
            .map_err(SimulationError::from)?;

        Ok(Self {
            core,
            interpreter,
            initialized: false,
        })
    }

    pub fn generation(&self) -> i64 {
        self.core.borrow().generation
    }

    pub fn is_finished(&self) -> bool {
        self.core.borrow().finished
    }

    pub fn set_seed(&mut self, seed: i64) {
        self.core.borrow().stream.borrow_mut().set_seed(seed);
    }

    pub fn get_seed(&self) -> i64 {
        self.core.borrow().stream.borrow().seed()
    }

    /// Evaluate a script string against the live simulation state and
    /// return its value.
    pub fn evaluate(&mut self, source: &str) -> Result<Value, ScriptError> {
        let value = self.interpreter.evaluate_source(source)?;
        self.sync_symbols()?;
        Ok(value)
    }

    /// Drain accumulated script output.
    pub fn take_output(&mut self) -> String {
        self.interpreter.take_output()
    }

    pub fn dump_population(&self, out: &mut dyn Write) -> Result<(), SimulationError> {
        let core = self.core.borrow();
        core.population.dump(out, core.generation)
    }

    pub fn load_population(&mut self, reader: &mut dyn BufRead) -> Result<(), SimulationError> {
        {
            let mut core = self.core.borrow_mut();
            let (population, generation) = Population::load(reader, &core.mutation_types)?;
            core.population = population;
            core.generation = generation;
        }
        self.sync_symbols()?;
        Ok(())
    }

    /// Run the zero-generation phase: execute `initialize` blocks with
    /// the initialization functions registered, then freeze the
    /// chromosome and enter generation 1.
    pub fn initialize(&mut self) -> Result<(), SimulationError> {
        if self.initialized {
            return Ok(());
        }
        let staging = Rc::new(RefCell::new(InitStaging::default()));
        self.register_initialize_functions(&staging);

        let blocks = self.applicable_blocks(0, |kind| matches!(kind, BlockKind::Initialize));
        let run_result: Result<(), SimulationError> = (|| {
            for root in blocks {
                self.interpreter.evaluate_block(&root)?;
            }
            Ok(())
        })();

        for name in INITIALIZE_FUNCTION_NAMES {
            self.interpreter.unregister_host_function(name);
        }
        run_result?;

        self.finish_initialization(&staging)?;
        self.sync_symbols()?;
        self.initialized = true;
        Ok(())
    }

    /// Advance the simulation by one generation. Returns false once the
    /// run has terminated (the generation passed the last registered
    /// block, or a script called `simulationFinished`).
    pub fn run_one_generation(&mut self) -> Result<bool, SimulationError> {
        self.initialize()?;

        let generation = {
            let core = self.core.borrow();
            if core.finished || core.generation > self.last_block_end() {
                return Ok(false);
            }
            core.generation
        };

        // 1. early events
        self.run_events(generation, |kind| matches!(kind, BlockKind::Early))?;
        self.sync_symbols()?;

        // 2. fitness evaluation (with fitness callbacks)
        self.update_fitness(generation)?;

        // 3. offspring generation with migration, selfing, and the
        //    mateChoice / modifyChild / recombination callbacks
        self.reproduce(generation)?;

        // 4. late events
        self.run_events(generation, |kind| matches!(kind, BlockKind::Late))?;
        self.sync_symbols()?;

        // 5. fixation sweep over the children
        // 6. child/parent swap
        // 7. next generation
        {
            let mut core = self.core.borrow_mut();
            let generation = core.generation;
            core.population.remove_fixed_in_children(generation);
            for (_, subpop) in core.population.subpops() {
                subpop.borrow_mut().swap_generations();
            }
            core.generation += 1;
        }
        Ok(true)
    }

    /// Run until termination, up to an optional generation cap.
    pub fn run(&mut self, max_generations: Option<i64>) -> Result<i64, SimulationError> {
        let mut steps = 0;
        loop {
            if let Some(cap) = max_generations {
                if steps >= cap {
                    return Ok(steps);
                }
            }
            if !self.run_one_generation()? {
                return Ok(steps);
            }
            steps += 1;
        }
    }

    // -- internals ------------------------------------------------------

    fn last_block_end(&self) -> i64 {
        self.core
            .borrow()
            .blocks
            .iter()
            .map(|b| b.borrow().end)
            .max()
            .unwrap_or(0)
    }

    /// Roots of the active blocks of a kind for a generation, in
    /// registration order.
    fn applicable_blocks(
        &self,
        generation: i64,
        matches_kind: impl Fn(&BlockKind) -> bool,
    ) -> Vec<Rc<AstNode>> {
        self.core
            .borrow()
            .blocks
            .iter()
            .filter_map(|b| {
                let b = b.borrow();
                let runs = matches_kind(&b.kind) && (generation == 0 || b.applies_to(generation));
                runs.then(|| Rc::clone(&b.root))
            })
            .collect()
    }

    fn run_events(
        &mut self,
        generation: i64,
        matches_kind: impl Fn(&BlockKind) -> bool,
    ) -> Result<(), SimulationError> {
        for root in self.applicable_blocks(generation, matches_kind) {
            if let Err(e) = self.interpreter.evaluate_block(&root) {
                // an uncaught script error poisons the run
                self.core.borrow_mut().finished = true;
                return Err(e.into());
            }
        }
        Ok(())
    }

    /// Bind p1-style constants for subpopulations that scripts created
    /// since the last sync.
    fn sync_symbols(&mut self) -> Result<(), SimulationError> {
        let subpops: Vec<(i64, Rc<RefCell<Subpopulation>>)> = {
            let core = self.core.borrow();
            core.population
                .subpops()
                .map(|(id, sp)| (*id, Rc::clone(sp)))
                .collect()
        };
        for (id, subpop) in subpops {
            let name = format!("p{id}");
            if self.interpreter.symbols.lookup(&name).is_none() {
                let value = host::subpop_object(subpop, Rc::clone(&self.core));
                self.interpreter
                    .symbols
                    .define_constant(&name, value)
                    .map_err(SimulationError::from)?;
            }
        }
        Ok(())
    }

    fn fitness_callbacks(
        &self,
        generation: i64,
    ) -> Result<Vec<(Option<i64>, Rc<AstNode>)>, SimulationError> {
        let core = self.core.borrow();
        let mut out = Vec::new();
        for block in &core.blocks {
            let block = block.borrow();
            if !block.applies_to(generation) {
                continue;
            }
            if let BlockKind::Fitness(symbol) = &block.kind {
                let type_id = match symbol {
                    None => None,
                    Some(symbol) => {
                        let id = symbol
                            .strip_prefix('m')
                            .and_then(|rest| rest.parse::<i64>().ok())
                            .ok_or_else(|| {
                                SimulationError::InvalidParameter(format!(
                                    "\"{symbol}\" is not a mutation-type symbol"
                                ))
                            })?;
                        if !core.mutation_types.contains_key(&id) {
                            return Err(SimulationError::UnknownMutationType(id));
                        }
                        Some(id)
                    }
                };
                out.push((type_id, Rc::clone(&block.root)));
            }
        }
        Ok(out)
    }

    /// Recompute parental fitness for every subpopulation and rebuild
    /// the weighted parent samplers.
    fn update_fitness(&mut self, generation: i64) -> Result<(), SimulationError> {
        let callbacks = self.fitness_callbacks(generation)?;
        let ids: Vec<i64> = self.core.borrow().population.ids();

        for id in ids {
            let subpop_rc = self.core.borrow().population.subpop(id)?;
            let (pairs, stream) = {
                let subpop = subpop_rc.borrow();
                let n = subpop.size();
                let mut pairs = Vec::with_capacity(n);
                for i in 0..n {
                    let (g1, g2) = subpop.parent_pair(i);
                    pairs.push((g1.borrow().clone(), g2.borrow().clone()));
                }
                (pairs, Rc::clone(&self.core.borrow().stream))
            };

            let mut values = Vec::with_capacity(pairs.len());
            if callbacks.is_empty() {
                for (g1, g2) in &pairs {
                    values.push(diploid_fitness(g1, g2));
                }
            } else {
                let subpop_value = host::subpop_object(Rc::clone(&subpop_rc), Rc::clone(&self.core));
                let interpreter = &mut self.interpreter;
                for (g1, g2) in &pairs {
                    let w = diploid_fitness_with(g1, g2, |mutation, homozygous, default| {
                        let mut contribution = default;
                        let mut any = false;
                        for (type_id, root) in &callbacks {
                            if type_id.is_some_and(|t| t != mutation.mutation_type.id) {
                                continue;
                            }
                            any = true;
                            let bindings = vec![
                                (
                                    "mut",
                                    host::mutation_object(Rc::clone(mutation), Rc::clone(&stream)),
                                ),
                                ("homozygous", Value::logical(homozygous)),
                                ("relFitness", Value::float(contribution)),
                                ("subpop", subpop_value.to_visible()),
                            ];
                            let result = run_callback(interpreter, root, bindings)?;
                            if result.count() != 1 {
                                return Err(ScriptError::new(
                                    ErrorKind::Shape,
                                    "fitness callback must return a numeric singleton",
                                )
                                .into());
                            }
                            contribution = result.float_at(0).map_err(SimulationError::from)?;
                        }
                        // a neutral site with no applicable callback keeps
                        // its skipped contribution of 1
                        if !any && mutation.selection_coeff == 0.0 {
                            return Ok(1.0);
                        }
                        Ok(contribution)
                    })?;
                    values.push(w);
                }
            }
            subpop_rc.borrow_mut().set_fitness_values(values)?;
        }
        Ok(())
    }

    /// Offspring generation (life-cycle step 3).
    fn reproduce(&mut self, generation: i64) -> Result<(), SimulationError> {
        let mate_choice = self.applicable_blocks(generation, |k| *k == BlockKind::MateChoice);
        let modify_child = self.applicable_blocks(generation, |k| *k == BlockKind::ModifyChild);
        let recombination =
            self.applicable_blocks(generation, |k| *k == BlockKind::Recombination);

        let ids: Vec<i64> = self.core.borrow().population.ids();
        for &target_id in &ids {
            let target_rc = self.core.borrow().population.subpop(target_id)?;
            target_rc.borrow_mut().prepare_children();

            // migration: a per-slot draw over (sources..., native)
            let (sources, migration_sampler, child_count, selfing) = {
                let target = target_rc.borrow();
                let fractions = target.migration_fractions().clone();
                for source in fractions.keys() {
                    self.core.borrow().population.subpop(*source)?;
                }
                let sources: Vec<i64> = fractions.keys().copied().collect();
                let sampler = if sources.is_empty() {
                    None
                } else {
                    let mut weights: Vec<f64> = fractions.values().copied().collect();
                    weights.push(1.0 - weights.iter().sum::<f64>());
                    Some(DiscreteSampler::new(&weights)?)
                };
                (
                    sources,
                    sampler,
                    target.child_size(),
                    target.selfing_fraction(),
                )
            };

            for slot in 0..child_count {
                'redraw: loop {
                    let source_id = match &migration_sampler {
                        None => target_id,
                        Some(sampler) => {
                            let stream = Rc::clone(&self.core.borrow().stream);
                            let idx = sampler.sample(&mut stream.borrow_mut());
                            sources.get(idx).copied().unwrap_or(target_id)
                        }
                    };
                    let source_rc = self.core.borrow().population.subpop(source_id)?;

                    let stream = Rc::clone(&self.core.borrow().stream);
                    let parent1 = source_rc.borrow().select_parent(&mut stream.borrow_mut());

                    let parent2 = if mate_choice.is_empty() {
                        let mut guard = stream.borrow_mut();
                        if selfing > 0.0 && guard.chance(selfing) {
                            parent1
                        } else {
                            source_rc.borrow().select_parent(&mut guard)
                        }
                    } else {
                        let n = source_rc.borrow().size();
                        let mut weights = {
                            let source = source_rc.borrow();
                            if source.cached_fitness().is_empty() {
                                vec![1.0; n]
                            } else {
                                source.cached_fitness().to_vec()
                            }
                        };
                        let source_value =
                            host::subpop_object(Rc::clone(&source_rc), Rc::clone(&self.core));
                        let mut rejected = false;
                        for root in &mate_choice {
                            let bindings = vec![
                                ("subpop", source_value.to_visible()),
                                ("weights", Value::float_vec(weights.clone())),
                            ];
                            let result = run_callback(&mut self.interpreter, root, bindings)?;
                            if result.is_null() {
                                continue;
                            }
                            if result.value_type() == demevo_script::ValueType::Logical
                                && result.count() == 0
                            {
                                rejected = true;
                                break;
                            }
                            let replacement =
                                result.float_elements().map_err(SimulationError::from)?;
                            if replacement.len() != n {
                                return Err(SimulationError::InvalidParameter(format!(
                                    "mateChoice weights must have size {n}"
                                )));
                            }
                            weights = replacement;
                        }
                        if rejected {
                            continue 'redraw;
                        }
                        let mut guard = stream.borrow_mut();
                        source_rc.borrow().select_parent_weighted(&weights, &mut guard)?
                    };

                    let gamete1 =
                        self.make_gamete(&source_rc, parent1, source_id, generation, &recombination)?;
                    let gamete2 =
                        self.make_gamete(&source_rc, parent2, source_id, generation, &recombination)?;

                    if !modify_child.is_empty() {
                        let g1 = Rc::new(RefCell::new(gamete1));
                        let g2 = Rc::new(RefCell::new(gamete2));
                        let target_value =
                            host::subpop_object(Rc::clone(&target_rc), Rc::clone(&self.core));
                        let mut accepted = true;
                        for root in &modify_child {
                            let bindings = vec![
                                (
                                    "childGenome1",
                                    host::genome_object(Rc::clone(&g1), Rc::clone(&stream)),
                                ),
                                (
                                    "childGenome2",
                                    host::genome_object(Rc::clone(&g2), Rc::clone(&stream)),
                                ),
                                ("parent1", Value::int(parent1 as i64)),
                                ("parent2", Value::int(parent2 as i64)),
                                ("subpop", target_value.to_visible()),
                            ];
                            let result = run_callback(&mut self.interpreter, root, bindings)?;
                            if result.count() != 1 {
                                return Err(ScriptError::new(
                                    ErrorKind::Shape,
                                    "modifyChild callback must return a logical singleton",
                                )
                                .into());
                            }
                            if !result.logical_at(0).map_err(SimulationError::from)? {
                                accepted = false;
                                break;
                            }
                        }
                        if !accepted {
                            continue 'redraw;
                        }
                        let mut target = target_rc.borrow_mut();
                        target.set_child_genome(2 * slot, g1.borrow().clone());
                        target.set_child_genome(2 * slot + 1, g2.borrow().clone());
                    } else {
                        let mut target = target_rc.borrow_mut();
                        target.set_child_genome(2 * slot, gamete1);
                        target.set_child_genome(2 * slot + 1, gamete2);
                    }
                    break;
                }
            }
        }
        Ok(())
    }

    /// Produce one gamete from a parent individual: draw event counts,
    /// breakpoints (possibly revised by a recombination callback), and
    /// new mutations, then merge across the parent's two genomes.
    fn make_gamete(
        &mut self,
        source: &Rc<RefCell<Subpopulation>>,
        parent: usize,
        source_id: i64,
        generation: i64,
        recombination_blocks: &[Rc<AstNode>],
    ) -> Result<Genome, SimulationError> {
        let (mut breakpoints, new_mutations, start_with_first) = {
            let core = self.core.borrow();
            let stream_rc = Rc::clone(&core.stream);
            let (mutation_count, breakpoint_count) = {
                let mut stream = stream_rc.borrow_mut();
                core.chromosome.draw_event_counts(&mut stream)
            };
            let (breakpoints, start_with_first) = {
                let mut stream = stream_rc.borrow_mut();
                let bps = core.chromosome.draw_breakpoints(breakpoint_count, &mut stream);
                (bps, stream.chance(0.5))
            };
            let mut new_mutations = Vec::with_capacity(mutation_count as usize);
            for _ in 0..mutation_count {
                new_mutations.push(core.chromosome.draw_new_mutation(
                    &stream_rc,
                    source_id,
                    generation,
                )?);
            }
            (breakpoints, new_mutations, start_with_first)
        };

        if !recombination_blocks.is_empty() {
            for root in recombination_blocks {
                let interpreter = &mut self.interpreter;
                interpreter.symbols.push_scope();
                let run = interpreter
                    .symbols
                    .set_local(
                        "breakpoints",
                        Value::int_vec(breakpoints.iter().map(|&b| b as i64).collect()),
                    )
                    .and_then(|_| interpreter.evaluate_block(root));
                let outcome = match run {
                    Ok(result) => {
                        if result.count() == 1
                            && result.logical_at(0).unwrap_or(false)
                        {
                            // the block reassigned `breakpoints`
                            interpreter.symbols.lookup("breakpoints")
                        } else {
                            None
                        }
                    }
                    Err(e) => {
                        interpreter.symbols.pop_scope();
                        return Err(e.into());
                    }
                };
                interpreter.symbols.pop_scope();
                if let Some(revised) = outcome {
                    let mut positions = Vec::with_capacity(revised.count());
                    for i in 0..revised.count() {
                        let p = revised.int_at(i).map_err(SimulationError::from)?;
                        if p < 0 {
                            return Err(SimulationError::InvalidParameter(
                                "breakpoints must be non-negative".into(),
                            ));
                        }
                        positions.push(p as u32);
                    }
                    positions.sort_unstable();
                    breakpoints = positions;
                }
            }
        }

        let subpop = source.borrow();
        let (g1, g2) = subpop.parent_pair(parent);
        let (first, second) = if start_with_first { (g1, g2) } else { (g2, g1) };
        let first = first.borrow();
        let second = second.borrow();
        Ok(Genome::recombine(&first, &second, &breakpoints, new_mutations))
    }

    // -- zero-generation functions ---------------------------------------

    fn register_initialize_functions(&mut self, staging: &Rc<RefCell<InitStaging>>) {
        let numeric = TypeMask::NUMERIC;

        let staged = Rc::clone(staging);
        self.interpreter.register_host_function(HostFunction::new(
            CallSignature::function("initializeMutationRate", TypeMask::NULL)
                .arg("rates", numeric)
                .optional_arg("ends", TypeMask::INT.or(TypeMask::NULL)),
            move |_, args| stage_rates(&staged, true, &args),
        ));

        let staged = Rc::clone(staging);
        self.interpreter.register_host_function(HostFunction::new(
            CallSignature::function("initializeRecombinationRate", TypeMask::NULL)
                .arg("rates", numeric)
                .optional_arg("ends", TypeMask::INT.or(TypeMask::NULL)),
            move |_, args| stage_rates(&staged, false, &args),
        ));

        let core = Rc::clone(&self.core);
        self.interpreter.register_host_function(HostFunction::new(
            CallSignature::function("initializeMutationType", TypeMask::OBJECT.singleton())
                .arg("id", TypeMask::INT.or(TypeMask::STRING).singleton())
                .arg("dominanceCoeff", numeric.singleton())
                .arg("distributionType", TypeMask::STRING.singleton())
                .ellipsis(TypeMask::NUMERIC.or(TypeMask::STRING)),
            move |interp, args| {
                let id = host::tagged_id_from(&args[0], 0, 'm')?;
                let dominance = args[1].float_at(0)?;
                let code = args[2].string_at(0)?;

                let distribution = if code == "s" {
                    let source = args
                        .get(3)
                        .filter(|v| v.count() == 1)
                        .ok_or_else(|| {
                            ScriptError::new(
                                ErrorKind::Type,
                                "distribution \"s\" requires one script-expression argument",
                            )
                        })?
                        .string_at(0)?;
                    SelectionDistribution::Script { source }
                } else {
                    let mut params = Vec::new();
                    for v in &args[3..] {
                        for i in 0..v.count() {
                            params.push(v.float_at(i)?);
                        }
                    }
                    SelectionDistribution::from_code(&code, &params)
                        .map_err(ScriptError::from)?
                };

                let mut core_mut = core.borrow_mut();
                if core_mut.mutation_types.contains_key(&id) {
                    return Err(SimulationError::DuplicateMutationType(id).into());
                }
                let mutation_type = Rc::new(
                    MutationType::new(id, dominance, distribution).map_err(ScriptError::from)?,
                );
                core_mut
                    .mutation_types
                    .insert(id, Rc::clone(&mutation_type));
                let stream = Rc::clone(&core_mut.stream);
                drop(core_mut);

                let object = host::mutation_type_object(mutation_type, stream);
                interp
                    .symbols
                    .define_constant(&format!("m{id}"), object.to_visible())?;
                Ok(object)
            },
        ));

        let core = Rc::clone(&self.core);
        self.interpreter.register_host_function(HostFunction::new(
            CallSignature::function(
                "initializeGenomicElementType",
                TypeMask::OBJECT.singleton(),
            )
            .arg("id", TypeMask::INT.or(TypeMask::STRING).singleton())
            .arg("mutationTypes", TypeMask::OBJECT.or(TypeMask::INT).or(TypeMask::STRING))
            .arg("proportions", numeric),
            move |interp, args| {
                let id = host::tagged_id_from(&args[0], 0, 'g')?;
                let mut core_mut = core.borrow_mut();
                if core_mut.element_types.contains_key(&id) {
                    return Err(SimulationError::DuplicateElementType(id).into());
                }

                let mut types = Vec::with_capacity(args[1].count());
                for i in 0..args[1].count() {
                    let mutation_type = match args[1].value_type() {
                        demevo_script::ValueType::Object => host::mutation_type_from(&args[1], i)?,
                        _ => {
                            let type_id = host::tagged_id_from(&args[1], i, 'm')?;
                            core_mut
                                .mutation_types
                                .get(&type_id)
                                .cloned()
                                .ok_or(SimulationError::UnknownMutationType(type_id))?
                        }
                    };
                    types.push(mutation_type);
                }
                let weights = args[2].float_elements()?;
                let element_type = Rc::new(RefCell::new(
                    GenomicElementType::new(id, types, weights).map_err(ScriptError::from)?,
                ));
                core_mut
                    .element_types
                    .insert(id, Rc::clone(&element_type));
                let stream = Rc::clone(&core_mut.stream);
                drop(core_mut);

                let object = host::element_type_object(element_type, stream);
                interp
                    .symbols
                    .define_constant(&format!("g{id}"), object.to_visible())?;
                Ok(object)
            },
        ));

        let core = Rc::clone(&self.core);
        self.interpreter.register_host_function(HostFunction::new(
            CallSignature::function("initializeGenomicElement", TypeMask::NULL)
                .arg(
                    "genomicElementType",
                    TypeMask::OBJECT.or(TypeMask::INT).or(TypeMask::STRING).singleton(),
                )
                .arg("start", TypeMask::INT.singleton())
                .arg("end", TypeMask::INT.singleton()),
            move |_, args| {
                let mut core_mut = core.borrow_mut();
                let element_type = match args[0].value_type() {
                    demevo_script::ValueType::Object => {
                        let element = args[0].object_at(0)?;
                        element
                            .as_any()
                            .downcast_ref::<host::GenomicElementTypeHandle>()
                            .map(|h| Rc::clone(&h.inner))
                            .ok_or_else(|| {
                                ScriptError::new(
                                    ErrorKind::Type,
                                    format!(
                                        "expected a GenomicElementType, not {}",
                                        element.class_name()
                                    ),
                                )
                            })?
                    }
                    _ => {
                        let id = host::tagged_id_from(&args[0], 0, 'g')?;
                        core_mut
                            .element_types
                            .get(&id)
                            .cloned()
                            .ok_or(SimulationError::UnknownElementType(id))?
                    }
                };
                let start = args[1].int_at(0)?;
                let end = args[2].int_at(0)?;
                if start < 0 || end < 0 || end > u32::MAX as i64 {
                    return Err(ScriptError::new(
                        ErrorKind::Domain,
                        "genomic element positions must be non-negative 32-bit values",
                    ));
                }
                let element =
                    GenomicElement::new(element_type, start as u32, end as u32)
                        .map_err(ScriptError::from)?;
                core_mut
                    .chromosome
                    .add_element(element)
                    .map_err(ScriptError::from)?;
                Ok(Value::invisible_null())
            },
        ));

        let core = Rc::clone(&self.core);
        self.interpreter.register_host_function(HostFunction::new(
            CallSignature::function("initializeGeneConversion", TypeMask::NULL)
                .arg("fraction", numeric.singleton())
                .arg("meanLength", numeric.singleton()),
            move |_, args| {
                core.borrow_mut()
                    .chromosome
                    .set_gene_conversion(args[0].float_at(0)?, args[1].float_at(0)?)
                    .map_err(ScriptError::from)?;
                Ok(Value::invisible_null())
            },
        ));
    }

    fn finish_initialization(
        &mut self,
        staging: &Rc<RefCell<InitStaging>>,
    ) -> Result<(), SimulationError> {
        let mut core = self.core.borrow_mut();
        let element_end = core
            .chromosome
            .elements()
            .last()
            .map(|e| e.end)
            .ok_or(SimulationError::EmptyChromosome)?;

        let staging = staging.borrow();
        let build = |spec: &Option<(Vec<f64>, Option<Vec<u32>>)>, what: &str| match spec {
            None => Err(SimulationError::InconsistentRateMap(format!(
                "{what} rate was never initialized"
            ))),
            Some((rates, None)) => {
                if rates.len() != 1 {
                    return Err(SimulationError::InconsistentRateMap(format!(
                        "{what} rate without end positions must be a single uniform rate"
                    )));
                }
                RateMap::uniform(rates[0], element_end)
            }
            Some((rates, Some(ends))) => RateMap::new(ends.clone(), rates.clone()),
        };

        let mutation_map = build(&staging.mutation_rate, "mutation")?;
        let recombination_map = build(&staging.recombination_rate, "recombination")?;
        core.chromosome.set_mutation_map(mutation_map);
        core.chromosome.set_recombination_map(recombination_map);
        core.chromosome.initialize_draws()?;
        core.generation = 1;
        Ok(())
    }
}

const INITIALIZE_FUNCTION_NAMES: &[&str] = &[
    "initializeMutationRate",
    "initializeMutationType",
    "initializeGenomicElementType",
    "initializeGenomicElement",
    "initializeRecombinationRate",
    "initializeGeneConversion",
];

fn stage_rates(
    staging: &Rc<RefCell<InitStaging>>,
    mutation: bool,
    args: &[Value],
) -> Result<Value, ScriptError> {
    let rates = args[0].float_elements()?;
    let ends = match args.get(1) {
        Some(v) if !v.is_null() => {
            let mut ends = Vec::with_capacity(v.count());
            for i in 0..v.count() {
                let e = v.int_at(i)?;
                if e < 0 || e > u32::MAX as i64 {
                    return Err(ScriptError::new(
                        ErrorKind::Domain,
                        "rate map end positions must be non-negative 32-bit values",
                    ));
                }
                ends.push(e as u32);
            }
            Some(ends)
        }
        _ => None,
    };
    let mut staging = staging.borrow_mut();
    if mutation {
        staging.mutation_rate = Some((rates, ends));
    } else {
        staging.recombination_rate = Some((rates, ends));
    }
    Ok(Value::invisible_null())
}

/// Run a callback block in a transient scope with the given bindings.
fn run_callback(
    interpreter: &mut Interpreter,
    root: &Rc<AstNode>,
    bindings: Vec<(&str, Value)>,
) -> Result<Value, SimulationError> {
    interpreter.symbols.push_scope();
    let mut run = || -> Result<Value, ScriptError> {
        for (name, value) in bindings {
            interpreter.symbols.set_local(name, value)?;
        }
        interpreter.evaluate_block(root)
    };
    let result = run();
    interpreter.symbols.pop_scope();
    Ok(result?)
}
