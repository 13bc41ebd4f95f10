use std::error;
use std::fmt;

/// Classification of a script-level failure.
///
/// Every error carries one of these kinds so that embedders and tests can
/// distinguish, say, a tokenizer problem from a shape mismatch without
/// parsing the message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Unrecognized token, illegal escape, unterminated string, or an
    /// out-of-range numeric literal.
    Tokenize,
    /// Unexpected token or missing terminator during parsing.
    Parse,
    /// Incompatible operand or argument types.
    Type,
    /// Vector-length mismatch, out-of-range subscript, or a non-singleton
    /// where a singleton is required.
    Shape,
    /// Integer overflow or an invalid numeric range.
    Numeric,
    /// Undefined identifier, assignment to a constant, unknown property
    /// or method.
    Name,
    /// A value outside the domain of a function (e.g. a probability
    /// outside [0, 1]).
    Domain,
    /// A failure raised by the host simulation (invalid subpopulation id,
    /// duplicate type id, inconsistent rate map).
    Simulation,
    /// A violated internal contract, such as a built-in returning a value
    /// outside its declared return mask.
    Internal,
}

impl ErrorKind {
    fn label(self) -> &'static str {
        match self {
            ErrorKind::Tokenize => "tokenize error",
            ErrorKind::Parse => "parse error",
            ErrorKind::Type => "type error",
            ErrorKind::Shape => "shape error",
            ErrorKind::Numeric => "numeric error",
            ErrorKind::Name => "name error",
            ErrorKind::Domain => "domain error",
            ErrorKind::Simulation => "simulation error",
            ErrorKind::Internal => "internal error",
        }
    }
}

/// An error produced while tokenizing, parsing, or interpreting a script.
///
/// The position, when present, is a byte offset into the source that was
/// being processed; for runtime errors it is the offset of the token of
/// the AST node that raised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptError {
    pub kind: ErrorKind,
    pub message: String,
    pub position: Option<usize>,
}

impl ScriptError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            position: None,
        }
    }

    pub fn at(kind: ErrorKind, message: impl Into<String>, position: usize) -> Self {
        Self {
            kind,
            message: message.into(),
            position: Some(position),
        }
    }

    /// Attach a position if the error does not already carry one.
    pub fn with_position(mut self, position: usize) -> Self {
        self.position.get_or_insert(position);
        self
    }
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.position {
            Some(pos) => write!(f, "{} at {}: {}", self.kind.label(), pos, self.message),
            None => write!(f, "{}: {}", self.kind.label(), self.message),
        }
    }
}

impl error::Error for ScriptError {}

/// Convenience alias used throughout the runtime.
pub type ScriptResult<T> = Result<T, ScriptError>;
