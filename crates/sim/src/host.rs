//! The host-object bridge: simulation entities as script objects.
//!
//! Each engine entity is wrapped in a lightweight handle implementing
//! [`HostObject`]. Handles are created freshly per property read;
//! identity comparisons go through the wrapped entity's address, so
//! two handles to the same entity compare as the same element.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::sync::OnceLock;

use demevo_script::object::{unknown_method, unknown_property};
use demevo_script::{
    CallSignature, ErrorKind, HostObject, ScriptError, ScriptResult, SharedStream, TypeMask,
    Value,
};

use crate::engine::SimCore;
use crate::genome::Genome;
use crate::mutation::{mutation_key, Mutation, MutationType};
use crate::population::Substitution;
use crate::script_block::ScriptBlock;
use crate::subpopulation::Subpopulation;

// -- argument helpers -------------------------------------------------

/// Accept a subpopulation argument as an object, an integer id, or a
/// "p1"-style string.
pub fn subpop_id_from(value: &Value, index: usize) -> ScriptResult<i64> {
    match value.value_type() {
        demevo_script::ValueType::Int => Ok(value.int_at(index)?),
        demevo_script::ValueType::String => {
            let s = value.string_at(index)?;
            s.strip_prefix('p')
                .and_then(|rest| rest.parse().ok())
                .ok_or_else(|| {
                    ScriptError::new(
                        ErrorKind::Type,
                        format!("\"{s}\" is not a subpopulation identifier"),
                    )
                })
        }
        demevo_script::ValueType::Object => {
            let element = value.object_at(index)?;
            let handle = element
                .as_any()
                .downcast_ref::<SubpopulationHandle>()
                .ok_or_else(|| {
                    ScriptError::new(
                        ErrorKind::Type,
                        format!("expected a Subpopulation, not {}", element.class_name()),
                    )
                })?;
            let id = handle.inner.borrow().id;
            Ok(id)
        }
        t => Err(ScriptError::new(
            ErrorKind::Type,
            format!("cannot interpret {t} as a subpopulation"),
        )),
    }
}

/// Accept an entity id as an integer or a tagged string ("m1", "g1",
/// "p1" depending on `tag`).
pub fn tagged_id_from(value: &Value, index: usize, tag: char) -> ScriptResult<i64> {
    match value.value_type() {
        demevo_script::ValueType::Int => Ok(value.int_at(index)?),
        demevo_script::ValueType::String => {
            let s = value.string_at(index)?;
            s.strip_prefix(tag)
                .and_then(|rest| rest.parse().ok())
                .ok_or_else(|| {
                    ScriptError::new(
                        ErrorKind::Type,
                        format!("\"{s}\" is not a valid {tag}-prefixed identifier"),
                    )
                })
        }
        t => Err(ScriptError::new(
            ErrorKind::Type,
            format!("cannot interpret {t} as an identifier"),
        )),
    }
}

pub fn mutation_type_from(value: &Value, index: usize) -> ScriptResult<Rc<MutationType>> {
    let element = value.object_at(index)?;
    element
        .as_any()
        .downcast_ref::<MutationTypeHandle>()
        .map(|h| Rc::clone(&h.inner))
        .ok_or_else(|| {
            ScriptError::new(
                ErrorKind::Type,
                format!("expected a MutationType, not {}", element.class_name()),
            )
        })
}

pub fn mutation_from(value: &Value, index: usize) -> ScriptResult<Rc<Mutation>> {
    let element = value.object_at(index)?;
    element
        .as_any()
        .downcast_ref::<MutationHandle>()
        .map(|h| Rc::clone(&h.inner))
        .ok_or_else(|| {
            ScriptError::new(
                ErrorKind::Type,
                format!("expected a Mutation, not {}", element.class_name()),
            )
        })
}

// -- object-vector constructors --------------------------------------

pub fn mutation_object(inner: Rc<Mutation>, stream: SharedStream) -> Value {
    Value::object(Rc::new(MutationHandle { inner, stream }))
}

pub fn mutations_object(mutations: Vec<Rc<Mutation>>, stream: &SharedStream) -> Value {
    let elements: Vec<Rc<dyn HostObject>> = mutations
        .into_iter()
        .map(|inner| {
            Rc::new(MutationHandle {
                inner,
                stream: Rc::clone(stream),
            }) as Rc<dyn HostObject>
        })
        .collect();
    Value::object_vec("Mutation", elements)
}

pub fn mutation_type_object(inner: Rc<MutationType>, stream: SharedStream) -> Value {
    Value::object(Rc::new(MutationTypeHandle { inner, stream }))
}

pub fn element_type_object(
    inner: Rc<RefCell<crate::chromosome::GenomicElementType>>,
    stream: SharedStream,
) -> Value {
    Value::object(Rc::new(GenomicElementTypeHandle { inner, stream }))
}

pub fn subpop_object(inner: Rc<RefCell<Subpopulation>>, core: Rc<RefCell<SimCore>>) -> Value {
    Value::object(Rc::new(SubpopulationHandle { inner, core }))
}

pub fn genome_object(inner: Rc<RefCell<Genome>>, stream: SharedStream) -> Value {
    Value::object(Rc::new(GenomeHandle { inner, stream }))
}

pub fn simulation_object(
    core: Rc<RefCell<SimCore>>,
    output: Rc<RefCell<String>>,
) -> Value {
    Value::object(Rc::new(SimulationHandle { core, output }))
}

// -- Mutation ---------------------------------------------------------

pub struct MutationHandle {
    pub inner: Rc<Mutation>,
    stream: SharedStream,
}

impl HostObject for MutationHandle {
    fn class_name(&self) -> &'static str {
        "Mutation"
    }

    fn identity(&self) -> usize {
        Rc::as_ptr(&self.inner) as usize
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn get_property(&self, name: &str) -> ScriptResult<Value> {
        match name {
            "mutationType" => Ok(mutation_type_object(
                Rc::clone(&self.inner.mutation_type),
                Rc::clone(&self.stream),
            )),
            "position" => Ok(Value::int(self.inner.position as i64)),
            "selectionCoeff" => Ok(Value::float(self.inner.selection_coeff)),
            "subpopID" => Ok(Value::int(self.inner.subpop_origin)),
            "originGeneration" => Ok(Value::int(self.inner.generation_origin)),
            _ => Err(unknown_property(self.class_name(), name)),
        }
    }

    fn method_signature(&self, _name: &str) -> Option<&CallSignature> {
        None
    }

    fn call_method(&self, name: &str, _args: &[Value]) -> ScriptResult<Value> {
        Err(unknown_method(self.class_name(), name))
    }
}

// -- MutationType -----------------------------------------------------

pub struct MutationTypeHandle {
    pub inner: Rc<MutationType>,
    stream: SharedStream,
}

fn mutation_type_signatures() -> &'static [CallSignature] {
    static SIGS: OnceLock<Vec<CallSignature>> = OnceLock::new();
    SIGS.get_or_init(|| {
        vec![CallSignature::method("drawSelectionCoefficient", TypeMask::FLOAT)
            .optional_arg("n", TypeMask::INT.singleton())]
    })
}

impl HostObject for MutationTypeHandle {
    fn class_name(&self) -> &'static str {
        "MutationType"
    }

    fn identity(&self) -> usize {
        Rc::as_ptr(&self.inner) as usize
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn get_property(&self, name: &str) -> ScriptResult<Value> {
        match name {
            "id" => Ok(Value::int(self.inner.id)),
            "dominanceCoeff" => Ok(Value::float(self.inner.dominance_coeff)),
            "distributionType" => Ok(Value::string(self.inner.distribution.kind_letter())),
            "distributionParams" => Ok(Value::float_vec(self.inner.distribution.parameters())),
            _ => Err(unknown_property(self.class_name(), name)),
        }
    }

    fn method_signature(&self, name: &str) -> Option<&CallSignature> {
        mutation_type_signatures().iter().find(|s| s.name == name)
    }

    fn call_method(&self, name: &str, args: &[Value]) -> ScriptResult<Value> {
        match name {
            "drawSelectionCoefficient" => {
                let n = match args.first() {
                    Some(v) if !v.is_null() => v.int_at(0)?,
                    _ => 1,
                };
                if n < 0 {
                    return Err(ScriptError::new(
                        ErrorKind::Domain,
                        "drawSelectionCoefficient() requires n >= 0",
                    ));
                }
                let mut draws = Vec::with_capacity(n as usize);
                for _ in 0..n {
                    draws.push(
                        self.inner
                            .draw_selection_coeff(&self.stream)
                            .map_err(ScriptError::from)?,
                    );
                }
                if draws.len() == 1 {
                    Ok(Value::float(draws[0]))
                } else {
                    Ok(Value::float_vec(draws))
                }
            }
            _ => Err(unknown_method(self.class_name(), name)),
        }
    }
}

// -- GenomicElementType -----------------------------------------------

pub struct GenomicElementTypeHandle {
    pub inner: Rc<RefCell<crate::chromosome::GenomicElementType>>,
    stream: SharedStream,
}

fn element_type_signatures() -> &'static [CallSignature] {
    static SIGS: OnceLock<Vec<CallSignature>> = OnceLock::new();
    SIGS.get_or_init(|| {
        vec![CallSignature::method("setMutationFractions", TypeMask::NULL)
            .arg("mutationTypes", TypeMask::OBJECT)
            .arg("proportions", TypeMask::NUMERIC)]
    })
}

impl HostObject for GenomicElementTypeHandle {
    fn class_name(&self) -> &'static str {
        "GenomicElementType"
    }

    fn identity(&self) -> usize {
        Rc::as_ptr(&self.inner) as usize
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn get_property(&self, name: &str) -> ScriptResult<Value> {
        let inner = self.inner.borrow();
        match name {
            "id" => Ok(Value::int(inner.id)),
            "mutationFractions" => Ok(Value::float_vec(inner.weights().to_vec())),
            "mutationTypes" => {
                let elements: Vec<Rc<dyn HostObject>> = inner
                    .mutation_types()
                    .iter()
                    .map(|mt| {
                        Rc::new(MutationTypeHandle {
                            inner: Rc::clone(mt),
                            stream: Rc::clone(&self.stream),
                        }) as Rc<dyn HostObject>
                    })
                    .collect();
                Ok(Value::object_vec("MutationType", elements))
            }
            _ => Err(unknown_property(self.class_name(), name)),
        }
    }

    fn method_signature(&self, name: &str) -> Option<&CallSignature> {
        element_type_signatures().iter().find(|s| s.name == name)
    }

    fn call_method(&self, name: &str, args: &[Value]) -> ScriptResult<Value> {
        match name {
            "setMutationFractions" => {
                let count = args[0].count();
                let mut types = Vec::with_capacity(count);
                for i in 0..count {
                    types.push(mutation_type_from(&args[0], i)?);
                }
                let weights = args[1].float_elements()?;
                self.inner
                    .borrow_mut()
                    .set_fractions(types, weights)
                    .map_err(ScriptError::from)?;
                Ok(Value::invisible_null())
            }
            _ => Err(unknown_method(self.class_name(), name)),
        }
    }
}

// -- GenomicElement ---------------------------------------------------

pub struct GenomicElementHandle {
    pub inner: Rc<crate::chromosome::GenomicElement>,
    stream: SharedStream,
}

impl HostObject for GenomicElementHandle {
    fn class_name(&self) -> &'static str {
        "GenomicElement"
    }

    fn identity(&self) -> usize {
        Rc::as_ptr(&self.inner) as usize
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn get_property(&self, name: &str) -> ScriptResult<Value> {
        match name {
            "genomicElementType" => Ok(element_type_object(
                Rc::clone(&self.inner.element_type),
                Rc::clone(&self.stream),
            )),
            "startPosition" => Ok(Value::int(self.inner.start as i64)),
            "endPosition" => Ok(Value::int(self.inner.end as i64)),
            _ => Err(unknown_property(self.class_name(), name)),
        }
    }

    fn method_signature(&self, _name: &str) -> Option<&CallSignature> {
        None
    }

    fn call_method(&self, name: &str, _args: &[Value]) -> ScriptResult<Value> {
        Err(unknown_method(self.class_name(), name))
    }
}

// -- Genome -----------------------------------------------------------

pub struct GenomeHandle {
    pub inner: Rc<RefCell<Genome>>,
    stream: SharedStream,
}

fn genome_signatures() -> &'static [CallSignature] {
    static SIGS: OnceLock<Vec<CallSignature>> = OnceLock::new();
    SIGS.get_or_init(|| {
        vec![
            CallSignature::method("containsMutation", TypeMask::LOGICAL.singleton())
                .arg("mut", TypeMask::OBJECT.singleton()),
            CallSignature::method("countOfMutationsOfType", TypeMask::INT.singleton())
                .arg("mutType", TypeMask::OBJECT.or(TypeMask::INT).singleton()),
        ]
    })
}

impl HostObject for GenomeHandle {
    fn class_name(&self) -> &'static str {
        "Genome"
    }

    fn identity(&self) -> usize {
        Rc::as_ptr(&self.inner) as usize
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn get_property(&self, name: &str) -> ScriptResult<Value> {
        match name {
            "mutations" => {
                let mutations = self.inner.borrow().mutations().to_vec();
                Ok(mutations_object(mutations, &self.stream))
            }
            "size" => Ok(Value::int(self.inner.borrow().len() as i64)),
            _ => Err(unknown_property(self.class_name(), name)),
        }
    }

    fn method_signature(&self, name: &str) -> Option<&CallSignature> {
        genome_signatures().iter().find(|s| s.name == name)
    }

    fn call_method(&self, name: &str, args: &[Value]) -> ScriptResult<Value> {
        match name {
            "containsMutation" => {
                let mutation = mutation_from(&args[0], 0)?;
                Ok(Value::logical(self.inner.borrow().contains(&mutation)))
            }
            "countOfMutationsOfType" => {
                let type_id = match args[0].value_type() {
                    demevo_script::ValueType::Object => mutation_type_from(&args[0], 0)?.id,
                    _ => args[0].int_at(0)?,
                };
                Ok(Value::int(self.inner.borrow().count_of_type(type_id) as i64))
            }
            _ => Err(unknown_method(self.class_name(), name)),
        }
    }
}

// -- Subpopulation ----------------------------------------------------

pub struct SubpopulationHandle {
    pub inner: Rc<RefCell<Subpopulation>>,
    core: Rc<RefCell<SimCore>>,
}

fn subpop_signatures() -> &'static [CallSignature] {
    static SIGS: OnceLock<Vec<CallSignature>> = OnceLock::new();
    SIGS.get_or_init(|| {
        vec![
            CallSignature::method("setMigrationRates", TypeMask::NULL)
                .arg("sourceSubpops", TypeMask::OBJECT.or(TypeMask::INT))
                .arg("rates", TypeMask::NUMERIC),
            CallSignature::method("setSelfingRate", TypeMask::NULL)
                .arg("rate", TypeMask::NUMERIC.singleton()),
            CallSignature::method("setSubpopulationSize", TypeMask::NULL)
                .arg("size", TypeMask::INT.singleton()),
            CallSignature::method("cachedFitness", TypeMask::FLOAT)
                .optional_arg("indices", TypeMask::INT.or(TypeMask::NULL)),
        ]
    })
}

impl HostObject for SubpopulationHandle {
    fn class_name(&self) -> &'static str {
        "Subpopulation"
    }

    fn identity(&self) -> usize {
        Rc::as_ptr(&self.inner) as usize
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn get_property(&self, name: &str) -> ScriptResult<Value> {
        match name {
            "id" => Ok(Value::int(self.inner.borrow().id)),
            "individualCount" => Ok(Value::int(self.inner.borrow().size() as i64)),
            "selfingFraction" => Ok(Value::float(self.inner.borrow().selfing_fraction())),
            "genomes" => {
                let stream = Rc::clone(&self.core.borrow().stream);
                let genomes = self.inner.borrow().parent_genomes().to_vec();
                let elements: Vec<Rc<dyn HostObject>> = genomes
                    .into_iter()
                    .map(|inner| {
                        Rc::new(GenomeHandle {
                            inner,
                            stream: Rc::clone(&stream),
                        }) as Rc<dyn HostObject>
                    })
                    .collect();
                Ok(Value::object_vec("Genome", elements))
            }
            _ => Err(unknown_property(self.class_name(), name)),
        }
    }

    fn method_signature(&self, name: &str) -> Option<&CallSignature> {
        subpop_signatures().iter().find(|s| s.name == name)
    }

    fn call_method(&self, name: &str, args: &[Value]) -> ScriptResult<Value> {
        match name {
            "setMigrationRates" => {
                if args[0].count() != args[1].count() {
                    return Err(ScriptError::new(
                        ErrorKind::Shape,
                        "setMigrationRates() requires matching sources and rates",
                    ));
                }
                let mut fractions = BTreeMap::new();
                for i in 0..args[0].count() {
                    let source = subpop_id_from(&args[0], i)?;
                    // sources must exist right now
                    self.core
                        .borrow()
                        .population
                        .subpop(source)
                        .map_err(ScriptError::from)?;
                    fractions.insert(source, args[1].float_at(i)?);
                }
                self.inner
                    .borrow_mut()
                    .set_migration_fractions(fractions)
                    .map_err(ScriptError::from)?;
                Ok(Value::invisible_null())
            }
            "setSelfingRate" => {
                self.inner
                    .borrow_mut()
                    .set_selfing_fraction(args[0].float_at(0)?)
                    .map_err(ScriptError::from)?;
                Ok(Value::invisible_null())
            }
            "setSubpopulationSize" => {
                let size = args[0].int_at(0)?;
                if size < 0 {
                    return Err(ScriptError::new(
                        ErrorKind::Domain,
                        "setSubpopulationSize() requires size >= 0",
                    ));
                }
                if size == 0 {
                    // removal; outstanding references go stale here
                    let id = self.inner.borrow().id;
                    self.core
                        .borrow_mut()
                        .population
                        .remove_subpopulation(id)
                        .map_err(ScriptError::from)?;
                } else {
                    self.inner
                        .borrow_mut()
                        .set_child_size(size as usize)
                        .map_err(ScriptError::from)?;
                }
                Ok(Value::invisible_null())
            }
            "cachedFitness" => {
                let inner = self.inner.borrow();
                let cached = inner.cached_fitness();
                match args.first() {
                    Some(v) if !v.is_null() => {
                        let mut out = Vec::with_capacity(v.count());
                        for i in 0..v.count() {
                            let idx = v.int_at(i)?;
                            if idx < 0 || idx as usize >= cached.len() {
                                return Err(ScriptError::new(
                                    ErrorKind::Shape,
                                    format!(
                                        "index {idx} out of range for {} cached fitness values",
                                        cached.len()
                                    ),
                                ));
                            }
                            out.push(cached[idx as usize]);
                        }
                        Ok(Value::float_vec(out))
                    }
                    _ => Ok(Value::float_vec(cached.to_vec())),
                }
            }
            _ => Err(unknown_method(self.class_name(), name)),
        }
    }
}

// -- Substitution -----------------------------------------------------

pub struct SubstitutionHandle {
    pub inner: Rc<Substitution>,
    pub stream: SharedStream,
}

impl HostObject for SubstitutionHandle {
    fn class_name(&self) -> &'static str {
        "Substitution"
    }

    fn identity(&self) -> usize {
        Rc::as_ptr(&self.inner) as usize
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn get_property(&self, name: &str) -> ScriptResult<Value> {
        match name {
            "mutationType" => Ok(mutation_type_object(
                Rc::clone(&self.inner.mutation.mutation_type),
                Rc::clone(&self.stream),
            )),
            "position" => Ok(Value::int(self.inner.mutation.position as i64)),
            "selectionCoeff" => Ok(Value::float(self.inner.mutation.selection_coeff)),
            "fixationGeneration" => Ok(Value::int(self.inner.fixation_generation)),
            _ => Err(unknown_property(self.class_name(), name)),
        }
    }

    fn method_signature(&self, _name: &str) -> Option<&CallSignature> {
        None
    }

    fn call_method(&self, name: &str, _args: &[Value]) -> ScriptResult<Value> {
        Err(unknown_method(self.class_name(), name))
    }
}

// -- ScriptBlock ------------------------------------------------------

pub struct ScriptBlockHandle {
    pub inner: Rc<RefCell<ScriptBlock>>,
}

impl HostObject for ScriptBlockHandle {
    fn class_name(&self) -> &'static str {
        "ScriptBlock"
    }

    fn identity(&self) -> usize {
        Rc::as_ptr(&self.inner) as usize
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn get_property(&self, name: &str) -> ScriptResult<Value> {
        let inner = self.inner.borrow();
        match name {
            "id" => Ok(Value::int(inner.id)),
            "start" => Ok(Value::int(inner.start)),
            "end" => Ok(Value::int(inner.end)),
            "type" => Ok(Value::string(inner.kind.label())),
            "active" => Ok(Value::logical(inner.active)),
            "source" => Ok(Value::string(inner.source.clone())),
            _ => Err(unknown_property(self.class_name(), name)),
        }
    }

    fn set_property(&self, name: &str, value: &Value) -> ScriptResult<()> {
        match name {
            "active" => {
                self.inner.borrow_mut().active = value.logical_at(0)?;
                Ok(())
            }
            _ => Err(ScriptError::new(
                ErrorKind::Name,
                format!("property {name} of class ScriptBlock is not writable"),
            )),
        }
    }

    fn method_signature(&self, _name: &str) -> Option<&CallSignature> {
        None
    }

    fn call_method(&self, name: &str, _args: &[Value]) -> ScriptResult<Value> {
        Err(unknown_method(self.class_name(), name))
    }
}

// -- Chromosome -------------------------------------------------------

pub struct ChromosomeHandle {
    pub core: Rc<RefCell<SimCore>>,
}

impl HostObject for ChromosomeHandle {
    fn class_name(&self) -> &'static str {
        "Chromosome"
    }

    fn identity(&self) -> usize {
        Rc::as_ptr(&self.core) as usize
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn get_property(&self, name: &str) -> ScriptResult<Value> {
        let core = self.core.borrow();
        let chromosome = &core.chromosome;
        match name {
            "genomicElements" => {
                let elements: Vec<Rc<dyn HostObject>> = chromosome
                    .elements()
                    .iter()
                    .map(|e| {
                        Rc::new(GenomicElementHandle {
                            inner: Rc::clone(e),
                            stream: Rc::clone(&core.stream),
                        }) as Rc<dyn HostObject>
                    })
                    .collect();
                Ok(Value::object_vec("GenomicElement", elements))
            }
            "lastPosition" => Ok(Value::int(chromosome.last_position() as i64)),
            "overallMutationRate" => Ok(Value::float(chromosome.overall_mutation_rate())),
            "overallRecombinationRate" => {
                Ok(Value::float(chromosome.overall_recombination_rate()))
            }
            "geneConversionFraction" => Ok(Value::float(chromosome.gene_conversion_fraction())),
            "geneConversionMeanLength" => {
                Ok(Value::float(chromosome.gene_conversion_mean_length()))
            }
            _ => Err(unknown_property(self.class_name(), name)),
        }
    }

    fn method_signature(&self, _name: &str) -> Option<&CallSignature> {
        None
    }

    fn call_method(&self, name: &str, _args: &[Value]) -> ScriptResult<Value> {
        Err(unknown_method(self.class_name(), name))
    }
}

// -- Simulation -------------------------------------------------------

pub struct SimulationHandle {
    pub core: Rc<RefCell<SimCore>>,
    output: Rc<RefCell<String>>,
}

fn simulation_signatures() -> &'static [CallSignature] {
    static SIGS: OnceLock<Vec<CallSignature>> = OnceLock::new();
    SIGS.get_or_init(|| {
        let subpop_ref = TypeMask::OBJECT.or(TypeMask::INT).or(TypeMask::STRING);
        vec![
            CallSignature::method("addSubpop", TypeMask::OBJECT.singleton())
                .arg("subpopID", TypeMask::INT.or(TypeMask::STRING).singleton())
                .arg("size", TypeMask::INT.singleton()),
            CallSignature::method("addSubpopSplit", TypeMask::OBJECT.singleton())
                .arg("subpopID", TypeMask::INT.or(TypeMask::STRING).singleton())
                .arg("size", TypeMask::INT.singleton())
                .arg("sourceSubpop", subpop_ref.singleton()),
            CallSignature::method("mutationFrequencies", TypeMask::FLOAT)
                .arg("subpops", TypeMask::OBJECT.or(TypeMask::NULL))
                .optional_arg("mutations", TypeMask::OBJECT.or(TypeMask::NULL)),
            CallSignature::method("outputFull", TypeMask::NULL)
                .optional_arg("filePath", TypeMask::STRING.singleton()),
            CallSignature::method("readFromPopulationFile", TypeMask::NULL)
                .arg("filePath", TypeMask::STRING.singleton()),
            CallSignature::method("deregisterScriptBlock", TypeMask::NULL)
                .arg("id", TypeMask::INT.singleton()),
            CallSignature::method("simulationFinished", TypeMask::NULL),
        ]
    })
}

impl HostObject for SimulationHandle {
    fn class_name(&self) -> &'static str {
        "Simulation"
    }

    fn identity(&self) -> usize {
        Rc::as_ptr(&self.core) as usize
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn get_property(&self, name: &str) -> ScriptResult<Value> {
        match name {
            "generation" => Ok(Value::int(self.core.borrow().generation)),
            "chromosome" => Ok(Value::object(Rc::new(ChromosomeHandle {
                core: Rc::clone(&self.core),
            }))),
            "mutations" => {
                let core = self.core.borrow();
                let stream = Rc::clone(&core.stream);
                Ok(mutations_object(core.population.unique_mutations(), &stream))
            }
            "mutationTypes" => {
                let core = self.core.borrow();
                let elements: Vec<Rc<dyn HostObject>> = core
                    .mutation_types
                    .values()
                    .map(|mt| {
                        Rc::new(MutationTypeHandle {
                            inner: Rc::clone(mt),
                            stream: Rc::clone(&core.stream),
                        }) as Rc<dyn HostObject>
                    })
                    .collect();
                Ok(Value::object_vec("MutationType", elements))
            }
            "genomicElementTypes" => {
                let core = self.core.borrow();
                let elements: Vec<Rc<dyn HostObject>> = core
                    .element_types
                    .values()
                    .map(|et| {
                        Rc::new(GenomicElementTypeHandle {
                            inner: Rc::clone(et),
                            stream: Rc::clone(&core.stream),
                        }) as Rc<dyn HostObject>
                    })
                    .collect();
                Ok(Value::object_vec("GenomicElementType", elements))
            }
            "subpopulations" => {
                let core = self.core.borrow();
                let elements: Vec<Rc<dyn HostObject>> = core
                    .population
                    .subpops()
                    .map(|(_, sp)| {
                        Rc::new(SubpopulationHandle {
                            inner: Rc::clone(sp),
                            core: Rc::clone(&self.core),
                        }) as Rc<dyn HostObject>
                    })
                    .collect();
                Ok(Value::object_vec("Subpopulation", elements))
            }
            "substitutions" => {
                let core = self.core.borrow();
                let elements: Vec<Rc<dyn HostObject>> = core
                    .population
                    .substitutions()
                    .iter()
                    .map(|s| {
                        Rc::new(SubstitutionHandle {
                            inner: Rc::clone(s),
                            stream: Rc::clone(&core.stream),
                        }) as Rc<dyn HostObject>
                    })
                    .collect();
                Ok(Value::object_vec("Substitution", elements))
            }
            "scriptBlocks" => {
                let core = self.core.borrow();
                let elements: Vec<Rc<dyn HostObject>> = core
                    .blocks
                    .iter()
                    .map(|b| {
                        Rc::new(ScriptBlockHandle { inner: Rc::clone(b) }) as Rc<dyn HostObject>
                    })
                    .collect();
                Ok(Value::object_vec("ScriptBlock", elements))
            }
            _ => Err(unknown_property(self.class_name(), name)),
        }
    }

    fn method_signature(&self, name: &str) -> Option<&CallSignature> {
        simulation_signatures().iter().find(|s| s.name == name)
    }

    fn call_method(&self, name: &str, args: &[Value]) -> ScriptResult<Value> {
        match name {
            "addSubpop" => {
                let id = tagged_id_from(&args[0], 0, 'p')?;
                let size = args[1].int_at(0)?;
                if size <= 0 {
                    return Err(ScriptError::new(
                        ErrorKind::Domain,
                        "addSubpop() requires size > 0",
                    ));
                }
                let subpop = self
                    .core
                    .borrow_mut()
                    .population
                    .add_subpopulation(id, size as usize)
                    .map_err(ScriptError::from)?;
                Ok(subpop_object(subpop, Rc::clone(&self.core)))
            }
            "addSubpopSplit" => {
                let id = tagged_id_from(&args[0], 0, 'p')?;
                let size = args[1].int_at(0)?;
                if size <= 0 {
                    return Err(ScriptError::new(
                        ErrorKind::Domain,
                        "addSubpopSplit() requires size > 0",
                    ));
                }
                let source = subpop_id_from(&args[2], 0)?;
                let subpop = {
                    let mut core = self.core.borrow_mut();
                    let stream = Rc::clone(&core.stream);
                    let mut stream = stream.borrow_mut();
                    core.population
                        .add_subpopulation_split(id, size as usize, source, &mut stream)
                        .map_err(ScriptError::from)?
                };
                Ok(subpop_object(subpop, Rc::clone(&self.core)))
            }
            "mutationFrequencies" => {
                let core = self.core.borrow();
                let ids: Option<Vec<i64>> = if args[0].is_null() {
                    None
                } else {
                    let mut ids = Vec::with_capacity(args[0].count());
                    for i in 0..args[0].count() {
                        ids.push(subpop_id_from(&args[0], i)?);
                    }
                    Some(ids)
                };
                let (counts, total) = core.population.mutation_counts(ids.as_deref());
                if total == 0 {
                    return Err(ScriptError::new(
                        ErrorKind::Simulation,
                        "mutationFrequencies() requires at least one genome",
                    ));
                }

                let targets: Vec<Rc<Mutation>> = match args.get(1) {
                    Some(v) if !v.is_null() => {
                        let mut out = Vec::with_capacity(v.count());
                        for i in 0..v.count() {
                            out.push(mutation_from(v, i)?);
                        }
                        out
                    }
                    _ => core.population.unique_mutations(),
                };

                let frequencies: Vec<f64> = targets
                    .iter()
                    .map(|m| {
                        counts.get(&mutation_key(m)).copied().unwrap_or(0) as f64 / total as f64
                    })
                    .collect();
                Ok(Value::float_vec(frequencies))
            }
            "outputFull" => {
                let core = self.core.borrow();
                let mut text = Vec::new();
                core.population
                    .dump(&mut text, core.generation)
                    .map_err(ScriptError::from)?;
                match args.first() {
                    Some(v) if !v.is_null() => {
                        let path = v.string_at(0)?;
                        std::fs::write(&path, &text).map_err(|e| {
                            ScriptError::new(
                                ErrorKind::Simulation,
                                format!("cannot write population file {path}: {e}"),
                            )
                        })?;
                    }
                    _ => {
                        let text = String::from_utf8(text).expect("dump output is UTF-8");
                        self.output.borrow_mut().push_str(&text);
                    }
                }
                Ok(Value::invisible_null())
            }
            "readFromPopulationFile" => {
                let path = args[0].string_at(0)?;
                let file = std::fs::File::open(&path).map_err(|e| {
                    ScriptError::new(
                        ErrorKind::Simulation,
                        format!("cannot read population file {path}: {e}"),
                    )
                })?;
                let mut reader = std::io::BufReader::new(file);
                let mut core = self.core.borrow_mut();
                let (population, generation) =
                    crate::population::Population::load(&mut reader, &core.mutation_types)
                        .map_err(ScriptError::from)?;
                core.population = population;
                core.generation = generation;
                Ok(Value::invisible_null())
            }
            "deregisterScriptBlock" => {
                let id = args[0].int_at(0)?;
                let core = self.core.borrow();
                let block = core
                    .blocks
                    .iter()
                    .find(|b| b.borrow().id == id)
                    .ok_or_else(|| {
                        ScriptError::new(
                            ErrorKind::Simulation,
                            format!("no script block with id {id}"),
                        )
                    })?;
                block.borrow_mut().active = false;
                Ok(Value::invisible_null())
            }
            "simulationFinished" => {
                self.core.borrow_mut().finished = true;
                Ok(Value::invisible_null())
            }
            _ => Err(unknown_method(self.class_name(), name)),
        }
    }
}
