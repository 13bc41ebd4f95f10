//! Call signatures for built-in functions and host-object methods.
//!
//! A signature carries a return mask and an ordered list of argument
//! masks. Masks are bitfields over the six element types plus the
//! singleton modifier; optional arguments form a trailing run and an
//! ellipsis accepts any number of remaining arguments.

use crate::error::{ErrorKind, ScriptError, ScriptResult};
use crate::value::{Value, ValueType};

/// Bitfield over the element types a signature slot accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeMask(u8);

impl TypeMask {
    pub const NULL: TypeMask = TypeMask(1 << 0);
    pub const LOGICAL: TypeMask = TypeMask(1 << 1);
    pub const INT: TypeMask = TypeMask(1 << 2);
    pub const FLOAT: TypeMask = TypeMask(1 << 3);
    pub const STRING: TypeMask = TypeMask(1 << 4);
    pub const OBJECT: TypeMask = TypeMask(1 << 5);

    pub const NUMERIC: TypeMask = TypeMask(Self::INT.0 | Self::FLOAT.0);
    pub const ANY_BASE: TypeMask = TypeMask(
        Self::NULL.0 | Self::LOGICAL.0 | Self::INT.0 | Self::FLOAT.0 | Self::STRING.0,
    );
    pub const ANY: TypeMask = TypeMask(Self::ANY_BASE.0 | Self::OBJECT.0);

    pub const fn or(self, other: TypeMask) -> TypeMask {
        TypeMask(self.0 | other.0)
    }

    pub fn accepts(self, t: ValueType) -> bool {
        let bit = match t {
            ValueType::Null => Self::NULL.0,
            ValueType::Logical => Self::LOGICAL.0,
            ValueType::Int => Self::INT.0,
            ValueType::Float => Self::FLOAT.0,
            ValueType::String => Self::STRING.0,
            ValueType::Object => Self::OBJECT.0,
        };
        self.0 & bit != 0
    }

    /// Human-readable list of the accepted types, for error messages.
    pub fn describe(self) -> String {
        let mut names = Vec::new();
        for (bit, name) in [
            (Self::NULL, "NULL"),
            (Self::LOGICAL, "logical"),
            (Self::INT, "integer"),
            (Self::FLOAT, "float"),
            (Self::STRING, "string"),
            (Self::OBJECT, "object"),
        ] {
            if self.0 & bit.0 != 0 {
                names.push(name);
            }
        }
        names.join(" or ")
    }

    /// This mask with the singleton modifier.
    pub const fn singleton(self) -> MaskSpec {
        MaskSpec {
            mask: self,
            singleton: true,
        }
    }

    pub const fn spec(self) -> MaskSpec {
        MaskSpec {
            mask: self,
            singleton: false,
        }
    }
}

/// A type mask plus the singleton modifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaskSpec {
    pub mask: TypeMask,
    pub singleton: bool,
}

impl From<TypeMask> for MaskSpec {
    fn from(mask: TypeMask) -> Self {
        mask.spec()
    }
}

/// One declared argument slot.
#[derive(Debug, Clone)]
pub struct ArgMask {
    pub name: &'static str,
    pub spec: MaskSpec,
    pub optional: bool,
}

/// The complete signature of a callable: name, return mask, argument
/// masks, and an optional trailing ellipsis.
#[derive(Debug, Clone)]
pub struct CallSignature {
    pub name: &'static str,
    pub return_spec: MaskSpec,
    pub args: Vec<ArgMask>,
    pub ellipsis: Option<TypeMask>,
}

impl CallSignature {
    pub fn function(name: &'static str, return_spec: impl Into<MaskSpec>) -> Self {
        Self {
            name,
            return_spec: return_spec.into(),
            args: Vec::new(),
            ellipsis: None,
        }
    }

    pub fn method(name: &'static str, return_spec: impl Into<MaskSpec>) -> Self {
        Self::function(name, return_spec)
    }

    pub fn arg(mut self, name: &'static str, spec: impl Into<MaskSpec>) -> Self {
        debug_assert!(
            self.args.iter().all(|a| !a.optional),
            "required argument after optional argument in signature {}",
            self.name
        );
        self.args.push(ArgMask {
            name,
            spec: spec.into(),
            optional: false,
        });
        self
    }

    pub fn optional_arg(mut self, name: &'static str, spec: impl Into<MaskSpec>) -> Self {
        self.args.push(ArgMask {
            name,
            spec: spec.into(),
            optional: true,
        });
        self
    }

    pub fn ellipsis(mut self, mask: TypeMask) -> Self {
        self.ellipsis = Some(mask);
        self
    }

    fn required_count(&self) -> usize {
        self.args.iter().filter(|a| !a.optional).count()
    }

    fn check_one(
        &self,
        call_type: &str,
        index: usize,
        spec: MaskSpec,
        value: &Value,
    ) -> ScriptResult<()> {
        let t = value.value_type();
        if !spec.mask.accepts(t) {
            return Err(ScriptError::new(
                ErrorKind::Type,
                format!(
                    "argument {} of {call_type} {}() cannot be type {}; expected {}",
                    index + 1,
                    self.name,
                    t,
                    spec.mask.describe()
                ),
            ));
        }
        // a permitted NULL stands in for an omitted argument and is
        // exempt from the singleton requirement
        if spec.singleton && !value.is_null() && value.count() != 1 {
            return Err(ScriptError::new(
                ErrorKind::Shape,
                format!(
                    "argument {} of {call_type} {}() must be a singleton, but size is {}",
                    index + 1,
                    self.name,
                    value.count()
                ),
            ));
        }
        Ok(())
    }

    /// Verify argument count, per-argument element types, and singleton
    /// constraints, in that order. `call_type` is "function" or "method"
    /// and appears in the raised message.
    pub fn check_arguments(&self, call_type: &str, args: &[Value]) -> ScriptResult<()> {
        if args.len() < self.required_count() {
            return Err(ScriptError::new(
                ErrorKind::Type,
                format!(
                    "missing required argument for {call_type} {}(): {} supplied, {} required",
                    self.name,
                    args.len(),
                    self.required_count()
                ),
            ));
        }
        if args.len() > self.args.len() && self.ellipsis.is_none() {
            return Err(ScriptError::new(
                ErrorKind::Type,
                format!(
                    "{call_type} {}() requires at most {} argument(s), but {} are supplied",
                    self.name,
                    self.args.len(),
                    args.len()
                ),
            ));
        }
        for (i, value) in args.iter().enumerate() {
            match self.args.get(i) {
                Some(arg) => self.check_one(call_type, i, arg.spec, value)?,
                None => {
                    let mask = self.ellipsis.expect("excess arguments imply ellipsis");
                    self.check_one(call_type, i, mask.spec(), value)?;
                }
            }
        }
        Ok(())
    }

    /// Verify a produced return value against the return mask. A
    /// violation here is an internal error: the callee is at fault, not
    /// the caller.
    pub fn check_return(&self, call_type: &str, value: &Value) -> ScriptResult<()> {
        let t = value.value_type();
        if !self.return_spec.mask.accepts(t) {
            return Err(ScriptError::new(
                ErrorKind::Internal,
                format!(
                    "return value of {call_type} {}() cannot be type {}; expected {}",
                    self.name,
                    t,
                    self.return_spec.mask.describe()
                ),
            ));
        }
        if self.return_spec.singleton && !value.is_null() && value.count() != 1 {
            return Err(ScriptError::new(
                ErrorKind::Internal,
                format!(
                    "return value of {call_type} {}() must be a singleton, but size is {}",
                    self.name,
                    value.count()
                ),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sig() -> CallSignature {
        CallSignature::function("rep", TypeMask::ANY_BASE)
            .arg("x", TypeMask::ANY_BASE)
            .arg("count", TypeMask::INT.singleton())
            .optional_arg("flag", TypeMask::LOGICAL.singleton())
    }

    #[test]
    fn test_mask_accepts() {
        assert!(TypeMask::NUMERIC.accepts(ValueType::Int));
        assert!(TypeMask::NUMERIC.accepts(ValueType::Float));
        assert!(!TypeMask::NUMERIC.accepts(ValueType::String));
        assert!(TypeMask::ANY.accepts(ValueType::Object));
        assert!(!TypeMask::ANY_BASE.accepts(ValueType::Object));
    }

    #[test]
    fn test_argument_count_checks() {
        let s = sig();
        let err = s.check_arguments("function", &[Value::int(1)]).unwrap_err();
        assert!(err.message.contains("missing required argument"));

        let four = vec![Value::int(1), Value::int(2), Value::logical(true), Value::int(9)];
        let err = s.check_arguments("function", &four).unwrap_err();
        assert!(err.message.contains("at most 3 argument(s)"));
    }

    #[test]
    fn test_optional_arguments() {
        let s = sig();
        assert!(s
            .check_arguments("function", &[Value::int_vec(vec![1, 2]), Value::int(3)])
            .is_ok());
        assert!(s
            .check_arguments(
                "function",
                &[Value::int_vec(vec![1, 2]), Value::int(3), Value::logical(true)]
            )
            .is_ok());
    }

    #[test]
    fn test_type_mismatch_message() {
        let s = sig();
        let err = s
            .check_arguments("function", &[Value::int(1), Value::string("x")])
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Type);
        assert!(err.message.contains("argument 2 of function rep()"));
        assert!(err.message.contains("string"));
        assert!(err.message.contains("integer"));
    }

    #[test]
    fn test_singleton_constraint() {
        let s = sig();
        let err = s
            .check_arguments("function", &[Value::int(1), Value::int_vec(vec![1, 2])])
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Shape);
        assert!(err.message.contains("must be a singleton"));
    }

    #[test]
    fn test_ellipsis() {
        let s = CallSignature::function("c", TypeMask::ANY).ellipsis(TypeMask::ANY);
        assert!(s
            .check_arguments("function", &[Value::int(1), Value::string("a"), Value::null()])
            .is_ok());

        let strict = CallSignature::function("f", TypeMask::NULL).ellipsis(TypeMask::NUMERIC);
        let err = strict
            .check_arguments("function", &[Value::string("a")])
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Type);
    }

    #[test]
    fn test_return_check_is_internal() {
        let s = CallSignature::function("size", TypeMask::INT.singleton());
        let err = s.check_return("function", &Value::string("x")).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Internal);
        let err = s
            .check_return("function", &Value::int_vec(vec![1, 2]))
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Internal);
    }
}
