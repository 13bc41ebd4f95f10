//! The tagged vector value type underlying the scripting runtime.
//!
//! Every script value is conceptually a vector over one of six element
//! types. Values of count 1 for int, float, string, and object are held
//! in compact singleton representations; singletons are immutable and
//! must be promoted to vector form (`ensure_vector`) before in-place
//! element mutation. The `invisible` flag suppresses auto-printing of a
//! statement result and is never inherited by a copy.

use std::fmt;
use std::rc::Rc;

use crate::error::{ErrorKind, ScriptError, ScriptResult};
use crate::object::HostObject;

/// Element type of a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Null,
    Logical,
    Int,
    Float,
    String,
    Object,
}

impl ValueType {
    pub fn name(self) -> &'static str {
        match self {
            ValueType::Null => "NULL",
            ValueType::Logical => "logical",
            ValueType::Int => "integer",
            ValueType::Float => "float",
            ValueType::String => "string",
            ValueType::Object => "object",
        }
    }

    /// Rank in the promotion order logical < int < float < string.
    /// NULL ranks below everything; object values do not participate.
    pub fn promotion_rank(self) -> Option<u8> {
        match self {
            ValueType::Null => Some(0),
            ValueType::Logical => Some(1),
            ValueType::Int => Some(2),
            ValueType::Float => Some(3),
            ValueType::String => Some(4),
            ValueType::Object => None,
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An object vector: zero or more shared references to host elements of
/// a common element class.
#[derive(Clone)]
pub struct ObjectVector {
    class: &'static str,
    elements: Vec<Rc<dyn HostObject>>,
}

impl ObjectVector {
    pub fn new(class: &'static str, elements: Vec<Rc<dyn HostObject>>) -> Self {
        Self { class, elements }
    }

    pub fn class(&self) -> &'static str {
        self.class
    }

    pub fn elements(&self) -> &[Rc<dyn HostObject>] {
        &self.elements
    }
}

#[derive(Clone)]
enum ValueData {
    Null,
    Logical(Vec<bool>),
    IntSingleton(i64),
    Int(Vec<i64>),
    FloatSingleton(f64),
    Float(Vec<f64>),
    StringSingleton(String),
    String(Vec<String>),
    ObjectSingleton(Rc<dyn HostObject>),
    Object(ObjectVector),
}

/// A scripting value: a typed vector plus the invisibility flag.
#[derive(Clone)]
pub struct Value {
    data: ValueData,
    invisible: bool,
}

impl Value {
    // -- constructors ---------------------------------------------------

    pub fn null() -> Self {
        Self {
            data: ValueData::Null,
            invisible: false,
        }
    }

    /// The NULL produced by statements whose result should not print.
    pub fn invisible_null() -> Self {
        Self {
            data: ValueData::Null,
            invisible: true,
        }
    }

    pub fn logical(v: bool) -> Self {
        Self {
            data: ValueData::Logical(vec![v]),
            invisible: false,
        }
    }

    pub fn logical_vec(v: Vec<bool>) -> Self {
        Self {
            data: ValueData::Logical(v),
            invisible: false,
        }
    }

    pub fn int(v: i64) -> Self {
        Self {
            data: ValueData::IntSingleton(v),
            invisible: false,
        }
    }

    pub fn int_vec(v: Vec<i64>) -> Self {
        Self {
            data: ValueData::Int(v),
            invisible: false,
        }
    }

    pub fn float(v: f64) -> Self {
        Self {
            data: ValueData::FloatSingleton(v),
            invisible: false,
        }
    }

    pub fn float_vec(v: Vec<f64>) -> Self {
        Self {
            data: ValueData::Float(v),
            invisible: false,
        }
    }

    pub fn string(v: impl Into<String>) -> Self {
        Self {
            data: ValueData::StringSingleton(v.into()),
            invisible: false,
        }
    }

    pub fn string_vec(v: Vec<String>) -> Self {
        Self {
            data: ValueData::String(v),
            invisible: false,
        }
    }

    pub fn object(element: Rc<dyn HostObject>) -> Self {
        Self {
            data: ValueData::ObjectSingleton(element),
            invisible: false,
        }
    }

    pub fn object_vec(class: &'static str, elements: Vec<Rc<dyn HostObject>>) -> Self {
        Self {
            data: ValueData::Object(ObjectVector::new(class, elements)),
            invisible: false,
        }
    }

    // -- basic inspection ----------------------------------------------

    pub fn value_type(&self) -> ValueType {
        match &self.data {
            ValueData::Null => ValueType::Null,
            ValueData::Logical(_) => ValueType::Logical,
            ValueData::IntSingleton(_) | ValueData::Int(_) => ValueType::Int,
            ValueData::FloatSingleton(_) | ValueData::Float(_) => ValueType::Float,
            ValueData::StringSingleton(_) | ValueData::String(_) => ValueType::String,
            ValueData::ObjectSingleton(_) | ValueData::Object(_) => ValueType::Object,
        }
    }

    pub fn count(&self) -> usize {
        match &self.data {
            ValueData::Null => 0,
            ValueData::Logical(v) => v.len(),
            ValueData::IntSingleton(_)
            | ValueData::FloatSingleton(_)
            | ValueData::StringSingleton(_)
            | ValueData::ObjectSingleton(_) => 1,
            ValueData::Int(v) => v.len(),
            ValueData::Float(v) => v.len(),
            ValueData::String(v) => v.len(),
            ValueData::Object(v) => v.elements.len(),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self.data, ValueData::Null)
    }

    /// True when the value is held in a compact singleton representation.
    pub fn is_singleton_specialized(&self) -> bool {
        matches!(
            self.data,
            ValueData::IntSingleton(_)
                | ValueData::FloatSingleton(_)
                | ValueData::StringSingleton(_)
                | ValueData::ObjectSingleton(_)
        )
    }

    /// The element class of an object value.
    pub fn object_class(&self) -> Option<&'static str> {
        match &self.data {
            ValueData::ObjectSingleton(e) => Some(e.class_name()),
            ValueData::Object(v) => Some(v.class),
            _ => None,
        }
    }

    // -- invisibility ---------------------------------------------------

    pub fn invisible(&self) -> bool {
        self.invisible
    }

    pub fn mark_invisible(mut self) -> Self {
        self.invisible = true;
        self
    }

    /// A copy of this value with the invisible flag cleared. All copy
    /// operations in the runtime go through this: invisibility is not
    /// inherited by copies.
    pub fn to_visible(&self) -> Self {
        Self {
            data: self.data.clone(),
            invisible: false,
        }
    }

    // -- element access -------------------------------------------------

    fn index_error(&self, index: usize) -> ScriptError {
        out_of_range(index, self.count())
    }

    pub fn logical_at(&self, index: usize) -> ScriptResult<bool> {
        match &self.data {
            ValueData::Logical(v) => v.get(index).copied().ok_or_else(|| self.index_error(index)),
            ValueData::IntSingleton(x) if index == 0 => Ok(*x != 0),
            ValueData::Int(v) => v
                .get(index)
                .map(|x| *x != 0)
                .ok_or_else(|| self.index_error(index)),
            ValueData::FloatSingleton(x) if index == 0 => float_to_logical(*x),
            ValueData::Float(v) => match v.get(index) {
                Some(x) => float_to_logical(*x),
                None => Err(self.index_error(index)),
            },
            _ => Err(ScriptError::new(
                ErrorKind::Type,
                format!("cannot coerce {} to logical", self.value_type()),
            )),
        }
    }

    pub fn int_at(&self, index: usize) -> ScriptResult<i64> {
        match &self.data {
            ValueData::Logical(v) => v
                .get(index)
                .map(|b| *b as i64)
                .ok_or_else(|| self.index_error(index)),
            ValueData::IntSingleton(x) if index == 0 => Ok(*x),
            ValueData::Int(v) => v.get(index).copied().ok_or_else(|| self.index_error(index)),
            ValueData::FloatSingleton(x) if index == 0 => float_to_int(*x),
            ValueData::Float(v) => match v.get(index) {
                Some(x) => float_to_int(*x),
                None => Err(self.index_error(index)),
            },
            _ => Err(ScriptError::new(
                ErrorKind::Type,
                format!("cannot coerce {} to integer", self.value_type()),
            )),
        }
    }

    pub fn float_at(&self, index: usize) -> ScriptResult<f64> {
        match &self.data {
            ValueData::Logical(v) => v
                .get(index)
                .map(|b| *b as i64 as f64)
                .ok_or_else(|| self.index_error(index)),
            ValueData::IntSingleton(x) if index == 0 => Ok(*x as f64),
            ValueData::Int(v) => v
                .get(index)
                .map(|x| *x as f64)
                .ok_or_else(|| self.index_error(index)),
            ValueData::FloatSingleton(x) if index == 0 => Ok(*x),
            ValueData::Float(v) => v.get(index).copied().ok_or_else(|| self.index_error(index)),
            _ => Err(ScriptError::new(
                ErrorKind::Type,
                format!("cannot coerce {} to float", self.value_type()),
            )),
        }
    }

    pub fn string_at(&self, index: usize) -> ScriptResult<String> {
        if index >= self.count() {
            return Err(self.index_error(index));
        }
        match &self.data {
            ValueData::Logical(v) => Ok(if v[index] { "T" } else { "F" }.to_string()),
            ValueData::IntSingleton(x) => Ok(x.to_string()),
            ValueData::Int(v) => Ok(v[index].to_string()),
            ValueData::FloatSingleton(x) => Ok(format_float(*x)),
            ValueData::Float(v) => Ok(format_float(v[index])),
            ValueData::StringSingleton(s) => Ok(s.clone()),
            ValueData::String(v) => Ok(v[index].clone()),
            ValueData::ObjectSingleton(_) | ValueData::Object(_) => Err(ScriptError::new(
                ErrorKind::Type,
                "cannot coerce object to string",
            )),
            ValueData::Null => Err(self.index_error(index)),
        }
    }

    pub fn object_at(&self, index: usize) -> ScriptResult<Rc<dyn HostObject>> {
        match &self.data {
            ValueData::ObjectSingleton(e) if index == 0 => Ok(Rc::clone(e)),
            ValueData::Object(v) => v
                .elements
                .get(index)
                .map(Rc::clone)
                .ok_or_else(|| self.index_error(index)),
            _ => Err(ScriptError::new(
                ErrorKind::Type,
                format!("{} value is not an object", self.value_type()),
            )),
        }
    }

    pub fn object_elements(&self) -> ScriptResult<Vec<Rc<dyn HostObject>>> {
        match &self.data {
            ValueData::ObjectSingleton(e) => Ok(vec![Rc::clone(e)]),
            ValueData::Object(v) => Ok(v.elements.clone()),
            _ => Err(ScriptError::new(
                ErrorKind::Type,
                format!("{} value is not an object", self.value_type()),
            )),
        }
    }

    // -- in-place mutation ----------------------------------------------

    fn singleton_mutation_error() -> ScriptError {
        ScriptError::new(
            ErrorKind::Internal,
            "cannot mutate a singleton value in place; promote to vector form first",
        )
    }

    /// Promote a singleton representation to its vector form so the value
    /// can be mutated element-wise. This is the mutable-copy operation.
    pub fn ensure_vector(&mut self) {
        let promoted = match &self.data {
            ValueData::IntSingleton(x) => Some(ValueData::Int(vec![*x])),
            ValueData::FloatSingleton(x) => Some(ValueData::Float(vec![*x])),
            ValueData::StringSingleton(s) => Some(ValueData::String(vec![s.clone()])),
            ValueData::ObjectSingleton(e) => Some(ValueData::Object(ObjectVector::new(
                e.class_name(),
                vec![Rc::clone(e)],
            ))),
            _ => None,
        };
        if let Some(data) = promoted {
            self.data = data;
        }
    }

    pub fn set_logical_at(&mut self, index: usize, v: bool) -> ScriptResult<()> {
        let count = self.count();
        match &mut self.data {
            ValueData::Logical(vec) => match vec.get_mut(index) {
                Some(slot) => {
                    *slot = v;
                    Ok(())
                }
                None => Err(out_of_range(index, count)),
            },
            _ => Err(Self::singleton_mutation_error()),
        }
    }

    pub fn set_int_at(&mut self, index: usize, v: i64) -> ScriptResult<()> {
        let count = self.count();
        let value_type = self.value_type();
        match &mut self.data {
            ValueData::Int(vec) => match vec.get_mut(index) {
                Some(slot) => {
                    *slot = v;
                    Ok(())
                }
                None => Err(out_of_range(index, count)),
            },
            ValueData::IntSingleton(_) => Err(Self::singleton_mutation_error()),
            _ => Err(ScriptError::new(
                ErrorKind::Type,
                format!("cannot store integer into {value_type} value"),
            )),
        }
    }

    pub fn set_float_at(&mut self, index: usize, v: f64) -> ScriptResult<()> {
        let count = self.count();
        let value_type = self.value_type();
        match &mut self.data {
            ValueData::Float(vec) => match vec.get_mut(index) {
                Some(slot) => {
                    *slot = v;
                    Ok(())
                }
                None => Err(out_of_range(index, count)),
            },
            ValueData::FloatSingleton(_) => Err(Self::singleton_mutation_error()),
            _ => Err(ScriptError::new(
                ErrorKind::Type,
                format!("cannot store float into {value_type} value"),
            )),
        }
    }

    pub fn set_string_at(&mut self, index: usize, v: String) -> ScriptResult<()> {
        let count = self.count();
        let value_type = self.value_type();
        match &mut self.data {
            ValueData::String(vec) => match vec.get_mut(index) {
                Some(slot) => {
                    *slot = v;
                    Ok(())
                }
                None => Err(out_of_range(index, count)),
            },
            ValueData::StringSingleton(_) => Err(Self::singleton_mutation_error()),
            _ => Err(ScriptError::new(
                ErrorKind::Type,
                format!("cannot store string into {value_type} value"),
            )),
        }
    }

    pub fn set_object_at(&mut self, index: usize, v: Rc<dyn HostObject>) -> ScriptResult<()> {
        let count = self.count();
        let value_type = self.value_type();
        match &mut self.data {
            ValueData::Object(vec) => match vec.elements.get_mut(index) {
                Some(slot) => {
                    *slot = v;
                    Ok(())
                }
                None => Err(out_of_range(index, count)),
            },
            ValueData::ObjectSingleton(_) => Err(Self::singleton_mutation_error()),
            _ => Err(ScriptError::new(
                ErrorKind::Type,
                format!("cannot store object into {value_type} value"),
            )),
        }
    }

    // -- whole-vector views ----------------------------------------------

    pub fn logical_elements(&self) -> ScriptResult<Vec<bool>> {
        (0..self.count()).map(|i| self.logical_at(i)).collect()
    }

    pub fn int_elements(&self) -> ScriptResult<Vec<i64>> {
        (0..self.count()).map(|i| self.int_at(i)).collect()
    }

    pub fn float_elements(&self) -> ScriptResult<Vec<f64>> {
        (0..self.count()).map(|i| self.float_at(i)).collect()
    }

    pub fn string_elements(&self) -> ScriptResult<Vec<String>> {
        (0..self.count()).map(|i| self.string_at(i)).collect()
    }

    /// An empty value of the same type as this one.
    pub fn empty_like(&self) -> Value {
        match self.value_type() {
            ValueType::Null => Value::null(),
            ValueType::Logical => Value::logical_vec(Vec::new()),
            ValueType::Int => Value::int_vec(Vec::new()),
            ValueType::Float => Value::float_vec(Vec::new()),
            ValueType::String => Value::string_vec(Vec::new()),
            ValueType::Object => {
                Value::object_vec(self.object_class().unwrap_or("Object"), Vec::new())
            }
        }
    }

    /// A single-element copy of the element at `index`, as a value.
    pub fn element_value(&self, index: usize) -> ScriptResult<Value> {
        match self.value_type() {
            ValueType::Null => Err(self.index_error(index)),
            ValueType::Logical => Ok(Value::logical(self.logical_at(index)?)),
            ValueType::Int => Ok(Value::int(self.int_at(index)?)),
            ValueType::Float => Ok(Value::float(self.float_at(index)?)),
            ValueType::String => Ok(Value::string(self.string_at(index)?)),
            ValueType::Object => Ok(Value::object(self.object_at(index)?)),
        }
    }

    /// A printable rendering of the whole value, elements separated by
    /// single spaces. NULL renders as "NULL".
    pub fn display_string(&self) -> String {
        if self.is_null() {
            return "NULL".to_string();
        }
        let mut parts = Vec::with_capacity(self.count());
        for i in 0..self.count() {
            match self.value_type() {
                ValueType::Object => {
                    let e = self.object_at(i).expect("object element");
                    parts.push(format!("<{}>", e.class_name()));
                }
                _ => parts.push(self.string_at(i).expect("element string")),
            }
        }
        parts.join(" ")
    }
}

fn out_of_range(index: usize, len: usize) -> ScriptError {
    ScriptError::new(
        ErrorKind::Shape,
        format!("index {index} out of range for value of size {len}"),
    )
}

fn float_to_logical(x: f64) -> ScriptResult<bool> {
    if x.is_nan() {
        return Err(ScriptError::new(
            ErrorKind::Type,
            "NAN cannot be coerced to logical",
        ));
    }
    Ok(x != 0.0)
}

fn float_to_int(x: f64) -> ScriptResult<i64> {
    if x.is_nan() || x.is_infinite() {
        return Err(ScriptError::new(
            ErrorKind::Numeric,
            format!("{} cannot be coerced to integer", format_float(x)),
        ));
    }
    Ok(x.trunc() as i64)
}

/// Render a float the way scripts print numbers: integral values without
/// a decimal point, NAN/INF spelled in the language's own constants.
pub fn format_float(x: f64) -> String {
    if x.is_nan() {
        "NAN".to_string()
    } else if x.is_infinite() {
        if x > 0.0 { "INF".to_string() } else { "-INF".to_string() }
    } else if x == x.trunc() && x.abs() < 1e15 {
        format!("{}", x as i64)
    } else {
        format!("{x}")
    }
}

/// Concatenate values by the rules of `c()`: NULL arguments vanish, the
/// result type is the highest base type present, and object values only
/// mix with object values of the same element class.
pub fn concat(values: &[Value]) -> ScriptResult<Value> {
    let mut has_object = false;
    let mut rank = 0u8;
    for v in values {
        match v.value_type().promotion_rank() {
            Some(r) => rank = rank.max(r),
            None => has_object = true,
        }
    }

    if has_object {
        if rank > 0 {
            return Err(ScriptError::new(
                ErrorKind::Type,
                "object values cannot be mixed with base-type values",
            ));
        }
        let mut class: Option<&'static str> = None;
        let mut elements = Vec::new();
        for v in values {
            if v.is_null() {
                continue;
            }
            let vclass = v.object_class().expect("object value");
            if v.count() > 0 {
                match class {
                    None => class = Some(vclass),
                    Some(c) if c != vclass => {
                        return Err(ScriptError::new(
                            ErrorKind::Type,
                            format!("cannot mix objects of classes {c} and {vclass}"),
                        ));
                    }
                    _ => {}
                }
            }
            elements.extend(v.object_elements()?);
        }
        if elements.len() == 1 {
            return Ok(Value::object(elements.pop().expect("one element")));
        }
        return Ok(Value::object_vec(class.unwrap_or("Object"), elements));
    }

    match rank {
        0 => Ok(Value::null()),
        1 => {
            let mut out = Vec::new();
            for v in values {
                out.extend(v.logical_elements()?);
            }
            Ok(Value::logical_vec(out))
        }
        2 => {
            let mut out = Vec::new();
            for v in values {
                out.extend(v.int_elements()?);
            }
            if out.len() == 1 {
                Ok(Value::int(out[0]))
            } else {
                Ok(Value::int_vec(out))
            }
        }
        3 => {
            let mut out = Vec::new();
            for v in values {
                out.extend(v.float_elements()?);
            }
            if out.len() == 1 {
                Ok(Value::float(out[0]))
            } else {
                Ok(Value::float_vec(out))
            }
        }
        _ => {
            let mut out = Vec::new();
            for v in values {
                out.extend(v.string_elements()?);
            }
            if out.len() == 1 {
                Ok(Value::string(out.pop().expect("one element")))
            } else {
                Ok(Value::string_vec(out))
            }
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        if self.value_type() != other.value_type() || self.count() != other.count() {
            return false;
        }
        match self.value_type() {
            ValueType::Null => true,
            ValueType::Logical => {
                self.logical_elements().ok() == other.logical_elements().ok()
            }
            ValueType::Int => self.int_elements().ok() == other.int_elements().ok(),
            ValueType::Float => self.float_elements().ok() == other.float_elements().ok(),
            ValueType::String => self.string_elements().ok() == other.string_elements().ok(),
            ValueType::Object => {
                let a = self.object_elements().expect("object");
                let b = other.object_elements().expect("object");
                a.iter().zip(b.iter()).all(|(x, y)| Rc::ptr_eq(x, y))
            }
        }
    }
}

// Debug is hand-written because object elements are trait objects.
impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.value_type() {
            ValueType::Object => write!(
                f,
                "Value(object<{}>[{}])",
                self.object_class().unwrap_or("?"),
                self.count()
            ),
            t => write!(f, "Value({t}: {})", self.display_string()),
        }
    }
}
