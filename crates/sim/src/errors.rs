use std::error;
use std::fmt;

use demevo_script::{ErrorKind, ScriptError};

/// Errors raised by the simulation engine and its data model.
#[derive(Debug, Clone)]
pub enum SimulationError {
    /// A rate or fraction outside its valid range.
    InvalidRate(&'static str, f64),
    /// A mutation-type id registered twice.
    DuplicateMutationType(i64),
    /// A genomic-element-type id registered twice.
    DuplicateElementType(i64),
    /// A subpopulation id registered twice.
    DuplicateSubpopulation(i64),
    /// A reference to an unregistered mutation type.
    UnknownMutationType(i64),
    /// A reference to an unregistered genomic-element type.
    UnknownElementType(i64),
    /// A reference to an unregistered subpopulation.
    UnknownSubpopulation(i64),
    /// A genomic element overlapping or out of order with its neighbors.
    OverlappingElements { start: u32, end: u32 },
    /// A rate map that does not cover the chromosome or is malformed.
    InconsistentRateMap(String),
    /// Simulation started without any genomic elements defined.
    EmptyChromosome,
    /// A population or subpopulation size that makes no sense.
    InvalidPopulationSize(i64),
    /// An invalid parameter to a model component.
    InvalidParameter(String),
    /// A script-layer failure that surfaced during a life-cycle step.
    Script(ScriptError),
    /// An I/O failure during dump or load.
    Io(String),
    /// A malformed population file.
    ParseDump { line: usize, message: String },
}

impl fmt::Display for SimulationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidRate(name, value) => {
                write!(f, "Invalid {name}: {value} (out of range)")
            }
            Self::DuplicateMutationType(id) => {
                write!(f, "Mutation type m{id} is already defined")
            }
            Self::DuplicateElementType(id) => {
                write!(f, "Genomic element type g{id} is already defined")
            }
            Self::DuplicateSubpopulation(id) => {
                write!(f, "Subpopulation p{id} already exists")
            }
            Self::UnknownMutationType(id) => write!(f, "Unknown mutation type m{id}"),
            Self::UnknownElementType(id) => write!(f, "Unknown genomic element type g{id}"),
            Self::UnknownSubpopulation(id) => write!(f, "Unknown subpopulation p{id}"),
            Self::OverlappingElements { start, end } => {
                write!(
                    f,
                    "Genomic element [{start}, {end}] overlaps or precedes an earlier element"
                )
            }
            Self::InconsistentRateMap(msg) => write!(f, "Inconsistent rate map: {msg}"),
            Self::EmptyChromosome => {
                write!(f, "No genomic elements were defined during initialization")
            }
            Self::InvalidPopulationSize(n) => write!(f, "Invalid population size: {n}"),
            Self::InvalidParameter(msg) => write!(f, "Invalid parameter: {msg}"),
            Self::Script(e) => write!(f, "{e}"),
            Self::Io(msg) => write!(f, "I/O error: {msg}"),
            Self::ParseDump { line, message } => {
                write!(f, "Malformed population file at line {line}: {message}")
            }
        }
    }
}

impl error::Error for SimulationError {}

impl From<ScriptError> for SimulationError {
    fn from(e: ScriptError) -> Self {
        Self::Script(e)
    }
}

impl From<std::io::Error> for SimulationError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

/// Host-object implementations raise through the script error surface;
/// engine errors crossing that boundary keep their message under the
/// simulation error kind.
impl From<SimulationError> for ScriptError {
    fn from(e: SimulationError) -> Self {
        match e {
            SimulationError::Script(inner) => inner,
            other => ScriptError::new(ErrorKind::Simulation, other.to_string()),
        }
    }
}
