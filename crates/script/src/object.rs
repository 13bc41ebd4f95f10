//! Host objects: engine-side entities exposed to scripts.
//!
//! An object value holds shared references to elements implementing
//! [`HostObject`]. Each element belongs to an element class (identified
//! by name) that declares properties and methods. Property reads and
//! method calls on a multi-element object value are dispatched per
//! element and the results concatenated by the rules of `c()`.

use std::rc::Rc;

use crate::error::{ErrorKind, ScriptError, ScriptResult};
use crate::signature::CallSignature;
use crate::value::{concat, Value};

/// Implemented by every engine entity visible from scripts.
pub trait HostObject {
    /// The element-class name, e.g. "Mutation" or "Subpopulation".
    fn class_name(&self) -> &'static str;

    /// A stable address identifying the underlying entity. Wrapper
    /// handles return the address of the entity they wrap, so that two
    /// handles to the same entity compare as identical.
    fn identity(&self) -> usize;

    /// Concrete-type access for hosts that need to recover their own
    /// element types from argument values.
    fn as_any(&self) -> &dyn std::any::Any;

    /// Read a property. Unknown names are a name error.
    fn get_property(&self, name: &str) -> ScriptResult<Value>;

    /// Write a read-write property. The default refuses everything.
    fn set_property(&self, name: &str, _value: &Value) -> ScriptResult<()> {
        Err(ScriptError::new(
            ErrorKind::Name,
            format!(
                "property {name} of class {} is not writable",
                self.class_name()
            ),
        ))
    }

    /// The signature of a method, used for argument checking before
    /// dispatch. None means the method does not exist.
    fn method_signature(&self, name: &str) -> Option<&CallSignature>;

    /// Invoke a method on this element. Arguments have already been
    /// checked against the signature.
    fn call_method(&self, name: &str, args: &[Value]) -> ScriptResult<Value>;
}

pub fn unknown_property(class: &str, name: &str) -> ScriptError {
    ScriptError::new(
        ErrorKind::Name,
        format!("class {class} has no property {name}"),
    )
}

pub fn unknown_method(class: &str, name: &str) -> ScriptError {
    ScriptError::new(ErrorKind::Name, format!("class {class} has no method {name}()"))
}

/// Read `name` across all elements of an object value and concatenate.
pub fn read_property(object: &Value, name: &str) -> ScriptResult<Value> {
    let elements = object.object_elements()?;
    if elements.is_empty() {
        return Ok(Value::null());
    }
    if elements.len() == 1 {
        return elements[0].get_property(name);
    }
    let mut parts = Vec::with_capacity(elements.len());
    for e in &elements {
        parts.push(e.get_property(name)?);
    }
    concat(&parts)
}

/// Write a property across all elements. The assigned value must have
/// count 1 (broadcast) or the element count of the object.
pub fn write_property(object: &Value, name: &str, value: &Value) -> ScriptResult<()> {
    let elements = object.object_elements()?;
    if value.count() != 1 && value.count() != elements.len() {
        return Err(ScriptError::new(
            ErrorKind::Shape,
            format!(
                "property assignment requires a value of size 1 or {}, not {}",
                elements.len(),
                value.count()
            ),
        ));
    }
    for (i, e) in elements.iter().enumerate() {
        let elem_value = if value.count() == 1 {
            value.element_value(0)?
        } else {
            value.element_value(i)?
        };
        e.set_property(name, &elem_value)?;
    }
    Ok(())
}

/// Call method `name` on every element of an object value, checking
/// arguments once against the class signature, and concatenate the
/// per-element results.
pub fn call_object_method(object: &Value, name: &str, args: &[Value]) -> ScriptResult<Value> {
    let elements = object.object_elements()?;
    let Some(first) = elements.first() else {
        // a method call on a zero-length object does nothing
        return Ok(Value::invisible_null());
    };

    let signature = first
        .method_signature(name)
        .ok_or_else(|| unknown_method(first.class_name(), name))?;
    signature.check_arguments("method", args)?;

    let mut parts = Vec::with_capacity(elements.len());
    for e in &elements {
        parts.push(e.call_method(name, args)?);
    }
    let result = if parts.len() == 1 {
        parts.pop().expect("one result")
    } else {
        concat(&parts)?
    };
    first
        .method_signature(name)
        .expect("signature still present")
        .check_return("method", &result)?;
    Ok(result)
}

/// Identity comparison between two elements (same underlying entity,
/// possibly reached through distinct wrapper handles).
pub fn same_element(a: &Rc<dyn HostObject>, b: &Rc<dyn HostObject>) -> bool {
    Rc::ptr_eq(a, b) || (a.class_name() == b.class_name() && a.identity() == b.identity())
}

#[cfg(test)]
pub mod testing {
    //! A minimal host class used by unit tests across the crate.

    use super::*;
    use crate::signature::{CallSignature, TypeMask};
    use std::cell::Cell;
    use std::sync::OnceLock;

    pub struct TestCounter {
        id: i64,
        value: Cell<i64>,
    }

    impl TestCounter {
        pub fn new(id: i64) -> Self {
            Self {
                id,
                value: Cell::new(0),
            }
        }
    }

    fn signatures() -> &'static [CallSignature] {
        static SIGS: OnceLock<Vec<CallSignature>> = OnceLock::new();
        SIGS.get_or_init(|| {
            vec![CallSignature::method("increment", TypeMask::INT.singleton())
                .optional_arg("by", TypeMask::INT.singleton())]
        })
    }

    impl HostObject for TestCounter {
        fn class_name(&self) -> &'static str {
            "TestCounter"
        }

        fn identity(&self) -> usize {
            self as *const Self as usize
        }

        fn as_any(&self) -> &dyn std::any::Any {
            self
        }

        fn get_property(&self, name: &str) -> ScriptResult<Value> {
            match name {
                "id" => Ok(Value::int(self.id)),
                "value" => Ok(Value::int(self.value.get())),
                _ => Err(unknown_property(self.class_name(), name)),
            }
        }

        fn set_property(&self, name: &str, value: &Value) -> ScriptResult<()> {
            match name {
                "value" => {
                    self.value.set(value.int_at(0)?);
                    Ok(())
                }
                _ => Err(unknown_property(self.class_name(), name)),
            }
        }

        fn method_signature(&self, name: &str) -> Option<&CallSignature> {
            signatures().iter().find(|s| s.name == name)
        }

        fn call_method(&self, name: &str, args: &[Value]) -> ScriptResult<Value> {
            match name {
                "increment" => {
                    let by = if args.is_empty() || args[0].is_null() {
                        1
                    } else {
                        args[0].int_at(0)?
                    };
                    self.value.set(self.value.get() + by);
                    Ok(Value::int(self.value.get()))
                }
                _ => Err(unknown_method(self.class_name(), name)),
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_property_read_concatenates() {
            let obj = Value::object_vec(
                "TestCounter",
                vec![Rc::new(TestCounter::new(3)), Rc::new(TestCounter::new(7))],
            );
            let ids = read_property(&obj, "id").unwrap();
            assert_eq!(ids, Value::int_vec(vec![3, 7]));
        }

        #[test]
        fn test_property_write_broadcast() {
            let a = Rc::new(TestCounter::new(1));
            let b = Rc::new(TestCounter::new(2));
            let obj = Value::object_vec("TestCounter", vec![a.clone(), b.clone()]);
            write_property(&obj, "value", &Value::int(9)).unwrap();
            assert_eq!(a.value.get(), 9);
            assert_eq!(b.value.get(), 9);
        }

        #[test]
        fn test_property_write_shape_mismatch() {
            let obj = Value::object_vec(
                "TestCounter",
                vec![Rc::new(TestCounter::new(1)), Rc::new(TestCounter::new(2))],
            );
            let err = write_property(&obj, "value", &Value::int_vec(vec![1, 2, 3])).unwrap_err();
            assert_eq!(err.kind, ErrorKind::Shape);
        }

        #[test]
        fn test_method_call_per_element() {
            let obj = Value::object_vec(
                "TestCounter",
                vec![Rc::new(TestCounter::new(1)), Rc::new(TestCounter::new(2))],
            );
            let out = call_object_method(&obj, "increment", &[Value::int(5)]).unwrap();
            assert_eq!(out, Value::int_vec(vec![5, 5]));
        }

        #[test]
        fn test_method_argument_checking() {
            let obj = Value::object(Rc::new(TestCounter::new(1)));
            let err =
                call_object_method(&obj, "increment", &[Value::string("x")]).unwrap_err();
            assert_eq!(err.kind, ErrorKind::Type);
        }

        #[test]
        fn test_unknown_method() {
            let obj = Value::object(Rc::new(TestCounter::new(1)));
            let err = call_object_method(&obj, "reset", &[]).unwrap_err();
            assert_eq!(err.kind, ErrorKind::Name);
        }

        #[test]
        fn test_zero_length_method_call() {
            let obj = Value::object_vec("TestCounter", Vec::new());
            let out = call_object_method(&obj, "anything", &[]).unwrap();
            assert!(out.is_null());
        }
    }
}
