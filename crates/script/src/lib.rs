//! # Scripting Runtime
//!
//! The `script` crate provides the vector-oriented scripting language
//! embedded in the demevo simulator: the tagged value layer, the
//! tokenizer and recursive-descent parser, a tree-walking interpreter
//! with typed call signatures, and the host-object trait through which
//! the engine exposes simulation entities to scripts.

pub mod error;
pub mod functions;
pub mod interpreter;
pub mod object;
pub mod parser;
pub mod rng;
pub mod signature;
pub mod symbols;
pub mod token;
pub mod value;

pub use error::{ErrorKind, ScriptError, ScriptResult};
pub use functions::{BuiltinFunction, FunctionRegistry, HostFunction};
pub use interpreter::Interpreter;
pub use object::HostObject;
pub use parser::{parse_and_optimize, AstNode, Parser};
pub use rng::{SharedStream, Stream};
pub use signature::{CallSignature, MaskSpec, TypeMask};
pub use symbols::SymbolTable;
pub use value::{Value, ValueType};
