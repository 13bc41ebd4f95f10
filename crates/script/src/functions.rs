//! The built-in function registry and implementations.
//!
//! Every callable carries a [`CallSignature`]; arguments are checked
//! before dispatch and the produced value is checked against the return
//! mask afterwards. Host-provided functions (the zero-generation
//! `initialize*` family) are registered on the interpreter at runtime
//! and resolve late; everything else resolves at tree-optimization
//! time.

use std::collections::HashMap;
use std::rc::Rc;

use rand_distr::Distribution;

use crate::error::{ErrorKind, ScriptError, ScriptResult};
use crate::interpreter::Interpreter;
use crate::signature::{CallSignature, TypeMask};
use crate::value::{concat, Value, ValueType};

pub type BuiltinImpl = fn(&mut Interpreter, Vec<Value>) -> ScriptResult<Value>;

/// A statically registered built-in function.
pub struct BuiltinFunction {
    pub signature: CallSignature,
    pub imp: BuiltinImpl,
}

impl std::fmt::Debug for BuiltinFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<function {}>", self.signature.name)
    }
}

/// A function provided by the host embedding, installed on the
/// interpreter for the phase in which it is legal.
pub struct HostFunction {
    pub signature: CallSignature,
    pub imp: Rc<dyn Fn(&mut Interpreter, Vec<Value>) -> ScriptResult<Value>>,
}

impl HostFunction {
    pub fn new(
        signature: CallSignature,
        imp: impl Fn(&mut Interpreter, Vec<Value>) -> ScriptResult<Value> + 'static,
    ) -> Self {
        Self {
            signature,
            imp: Rc::new(imp),
        }
    }
}

/// Names that are absent from the registry but known to resolve late,
/// during the initialization phase of a hosting simulation.
const ZERO_GENERATION_NAMES: &[&str] = &[
    "initializeMutationRate",
    "initializeMutationType",
    "initializeGenomicElementType",
    "initializeGenomicElement",
    "initializeRecombinationRate",
    "initializeGeneConversion",
];

pub struct FunctionRegistry {
    map: HashMap<&'static str, Rc<BuiltinFunction>>,
}

impl FunctionRegistry {
    pub fn lookup(&self, name: &str) -> Option<Rc<BuiltinFunction>> {
        self.map.get(name).cloned()
    }

    pub fn is_zero_generation_name(&self, name: &str) -> bool {
        ZERO_GENERATION_NAMES.contains(&name)
    }

    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.map.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// The standard library shared by every interpreter.
    pub fn standard() -> Rc<Self> {
        let mut map: HashMap<&'static str, Rc<BuiltinFunction>> = HashMap::new();
        let mut add = |signature: CallSignature, imp: BuiltinImpl| {
            map.insert(signature.name, Rc::new(BuiltinFunction { signature, imp }));
        };

        use TypeMask as M;
        let numeric = M::NUMERIC;
        let base = M::ANY_BASE;
        let stats = M::LOGICAL.or(M::INT).or(M::FLOAT);

        // construction
        add(CallSignature::function("c", M::ANY).ellipsis(M::ANY), fx_c);
        add(
            CallSignature::function("rep", base)
                .arg("x", base)
                .arg("count", M::INT.singleton()),
            fx_rep,
        );
        add(
            CallSignature::function("repEach", base)
                .arg("x", base)
                .arg("count", M::INT),
            fx_rep_each,
        );
        add(
            CallSignature::function("seq", numeric)
                .arg("from", numeric.singleton())
                .arg("to", numeric.singleton())
                .optional_arg("by", numeric.or(M::NULL).singleton()),
            fx_seq,
        );
        add(
            CallSignature::function("seqAlong", M::INT).arg("x", M::ANY),
            fx_seq_along,
        );
        add(
            CallSignature::function("logical", M::LOGICAL).arg("length", M::INT.singleton()),
            fx_logical,
        );
        add(
            CallSignature::function("integer", M::INT).arg("length", M::INT.singleton()),
            fx_integer,
        );
        add(
            CallSignature::function("float", M::FLOAT).arg("length", M::INT.singleton()),
            fx_float,
        );
        add(
            CallSignature::function("string", M::STRING).arg("length", M::INT.singleton()),
            fx_string,
        );
        add(CallSignature::function("object", M::OBJECT), fx_object);

        // inspection and manipulation
        add(
            CallSignature::function("size", M::INT.singleton()).arg("x", M::ANY),
            fx_size,
        );
        add(CallSignature::function("rev", base).arg("x", base), fx_rev);
        add(
            CallSignature::function("sort", stats.or(M::STRING))
                .arg("x", stats.or(M::STRING))
                .optional_arg("ascending", M::LOGICAL.singleton()),
            fx_sort,
        );
        add(
            CallSignature::function("unique", M::ANY).arg("x", M::ANY),
            fx_unique,
        );
        add(
            CallSignature::function("which", M::INT).arg("x", M::LOGICAL),
            fx_which,
        );
        add(
            CallSignature::function("whichMax", M::INT.singleton()).arg("x", stats),
            fx_which_max,
        );
        add(
            CallSignature::function("whichMin", M::INT.singleton()).arg("x", stats),
            fx_which_min,
        );
        add(
            CallSignature::function("any", M::LOGICAL.singleton())
                .arg("x", M::LOGICAL)
                .ellipsis(M::LOGICAL),
            fx_any,
        );
        add(
            CallSignature::function("all", M::LOGICAL.singleton())
                .arg("x", M::LOGICAL)
                .ellipsis(M::LOGICAL),
            fx_all,
        );
        add(
            CallSignature::function("match", M::INT)
                .arg("x", M::ANY)
                .arg("table", M::ANY),
            fx_match,
        );

        // math and statistics
        add(
            CallSignature::function("sum", numeric.singleton()).arg("x", stats),
            fx_sum,
        );
        add(
            CallSignature::function("product", numeric.singleton()).arg("x", stats),
            fx_product,
        );
        add(
            CallSignature::function("mean", M::FLOAT.singleton()).arg("x", stats),
            fx_mean,
        );
        add(
            CallSignature::function("sd", M::FLOAT.singleton()).arg("x", stats),
            fx_sd,
        );
        add(
            CallSignature::function("max", stats.or(M::STRING).singleton())
                .arg("x", stats.or(M::STRING))
                .ellipsis(stats.or(M::STRING)),
            fx_max,
        );
        add(
            CallSignature::function("min", stats.or(M::STRING).singleton())
                .arg("x", stats.or(M::STRING))
                .ellipsis(stats.or(M::STRING)),
            fx_min,
        );
        add(
            CallSignature::function("range", numeric)
                .arg("x", stats)
                .ellipsis(stats),
            fx_range,
        );
        add(CallSignature::function("abs", numeric).arg("x", numeric), fx_abs);
        add(CallSignature::function("exp", M::FLOAT).arg("x", numeric), fx_exp);
        add(CallSignature::function("log", M::FLOAT).arg("x", numeric), fx_log);
        add(CallSignature::function("sqrt", M::FLOAT).arg("x", numeric), fx_sqrt);
        add(CallSignature::function("floor", M::FLOAT).arg("x", numeric), fx_floor);
        add(CallSignature::function("ceil", M::FLOAT).arg("x", numeric), fx_ceil);
        add(CallSignature::function("round", M::FLOAT).arg("x", numeric), fx_round);

        // type tests and coercion
        add(CallSignature::function("isNULL", M::LOGICAL.singleton()).arg("x", M::ANY), fx_is_null);
        add(
            CallSignature::function("isLogical", M::LOGICAL.singleton()).arg("x", M::ANY),
            fx_is_logical,
        );
        add(
            CallSignature::function("isInteger", M::LOGICAL.singleton()).arg("x", M::ANY),
            fx_is_integer,
        );
        add(
            CallSignature::function("isFloat", M::LOGICAL.singleton()).arg("x", M::ANY),
            fx_is_float,
        );
        add(
            CallSignature::function("isString", M::LOGICAL.singleton()).arg("x", M::ANY),
            fx_is_string,
        );
        add(
            CallSignature::function("isObject", M::LOGICAL.singleton()).arg("x", M::ANY),
            fx_is_object,
        );
        add(
            CallSignature::function("asLogical", M::LOGICAL).arg("x", base),
            fx_as_logical,
        );
        add(
            CallSignature::function("asInteger", M::INT).arg("x", base),
            fx_as_integer,
        );
        add(
            CallSignature::function("asFloat", M::FLOAT).arg("x", base),
            fx_as_float,
        );
        add(
            CallSignature::function("asString", M::STRING).arg("x", base),
            fx_as_string,
        );

        // strings and output
        add(
            CallSignature::function("nchar", M::INT).arg("x", M::STRING),
            fx_nchar,
        );
        add(
            CallSignature::function("strsplit", M::STRING)
                .arg("x", M::STRING.singleton())
                .optional_arg("sep", M::STRING.singleton()),
            fx_strsplit,
        );
        add(
            CallSignature::function("paste", M::STRING.singleton())
                .arg("x", M::ANY)
                .optional_arg("sep", M::STRING.singleton()),
            fx_paste,
        );
        add(CallSignature::function("print", M::NULL).arg("x", M::ANY), fx_print);
        add(
            CallSignature::function("cat", M::NULL)
                .arg("x", M::ANY)
                .optional_arg("sep", M::STRING.singleton()),
            fx_cat,
        );
        add(CallSignature::function("str", M::NULL).arg("x", M::ANY), fx_str);

        // random draws; all consume the shared stream
        add(
            CallSignature::function("setSeed", M::NULL).arg("seed", M::INT.singleton()),
            fx_set_seed,
        );
        add(CallSignature::function("getSeed", M::INT.singleton()), fx_get_seed);
        add(
            CallSignature::function("runif", M::FLOAT)
                .arg("n", M::INT.singleton())
                .optional_arg("min", numeric.singleton())
                .optional_arg("max", numeric.singleton()),
            fx_runif,
        );
        add(
            CallSignature::function("rnorm", M::FLOAT)
                .arg("n", M::INT.singleton())
                .optional_arg("mean", numeric.singleton())
                .optional_arg("sd", numeric.singleton()),
            fx_rnorm,
        );
        add(
            CallSignature::function("rpois", M::INT)
                .arg("n", M::INT.singleton())
                .arg("lambda", numeric.singleton()),
            fx_rpois,
        );
        add(
            CallSignature::function("rbinom", M::INT)
                .arg("n", M::INT.singleton())
                .arg("size", M::INT.singleton())
                .arg("prob", numeric.singleton()),
            fx_rbinom,
        );
        add(
            CallSignature::function("rexp", M::FLOAT)
                .arg("n", M::INT.singleton())
                .optional_arg("mu", numeric.singleton()),
            fx_rexp,
        );
        add(
            CallSignature::function("rgamma", M::FLOAT)
                .arg("n", M::INT.singleton())
                .arg("mean", numeric.singleton())
                .arg("shape", numeric.singleton()),
            fx_rgamma,
        );
        add(
            CallSignature::function("sample", M::ANY)
                .arg("x", M::ANY)
                .arg("size", M::INT.singleton())
                .optional_arg("replace", M::LOGICAL.singleton())
                .optional_arg("weights", numeric.or(M::NULL)),
            fx_sample,
        );

        // environment
        add(
            CallSignature::function("defineConstant", M::NULL)
                .arg("symbol", M::STRING.singleton())
                .arg("value", M::ANY),
            fx_define_constant,
        );
        add(
            CallSignature::function("rm", M::NULL)
                .arg("variableNames", M::STRING)
                .optional_arg("removeConstants", M::LOGICAL.singleton()),
            fx_rm,
        );
        add(
            CallSignature::function("apply", M::ANY)
                .arg("x", M::ANY)
                .arg("lambdaSource", M::STRING.singleton()),
            fx_apply,
        );
        add(
            CallSignature::function("executeLambda", M::ANY)
                .arg("lambdaSource", M::STRING.singleton()),
            fx_execute_lambda,
        );
        add(
            CallSignature::function("doCall", M::ANY)
                .arg("functionName", M::STRING.singleton())
                .ellipsis(M::ANY),
            fx_do_call,
        );

        Rc::new(Self { map })
    }
}

// -- helpers ----------------------------------------------------------

fn opt_arg(args: &[Value], index: usize) -> Option<&Value> {
    match args.get(index) {
        Some(v) if !v.is_null() => Some(v),
        _ => None,
    }
}

fn domain_error(message: impl Into<String>) -> ScriptError {
    ScriptError::new(ErrorKind::Domain, message)
}

fn int_result(out: Vec<i64>) -> Value {
    if out.len() == 1 {
        Value::int(out[0])
    } else {
        Value::int_vec(out)
    }
}

fn float_result(out: Vec<f64>) -> Value {
    if out.len() == 1 {
        Value::float(out[0])
    } else {
        Value::float_vec(out)
    }
}

fn string_result(mut out: Vec<String>) -> Value {
    if out.len() == 1 {
        Value::string(out.pop().expect("one element"))
    } else {
        Value::string_vec(out)
    }
}

fn map_float(x: &Value, f: impl Fn(f64) -> f64) -> ScriptResult<Value> {
    let out: Vec<f64> = x.float_elements()?.into_iter().map(f).collect();
    Ok(float_result(out))
}

// -- construction -----------------------------------------------------

fn fx_c(_interp: &mut Interpreter, args: Vec<Value>) -> ScriptResult<Value> {
    concat(&args)
}

fn fx_rep(_interp: &mut Interpreter, args: Vec<Value>) -> ScriptResult<Value> {
    let count = args[1].int_at(0)?;
    if count < 0 {
        return Err(domain_error("rep() requires count >= 0"));
    }
    let parts = vec![args[0].to_visible(); count as usize];
    concat(&parts)
}

fn fx_rep_each(_interp: &mut Interpreter, args: Vec<Value>) -> ScriptResult<Value> {
    let x = &args[0];
    let counts = &args[1];
    if counts.count() != 1 && counts.count() != x.count() {
        return Err(ScriptError::new(
            ErrorKind::Shape,
            "repEach() requires that its second argument's size() either (1) be equal to 1, \
             or (2) be equal to the size() of its first argument",
        ));
    }
    let mut parts = Vec::new();
    for i in 0..x.count() {
        let n = if counts.count() == 1 {
            counts.int_at(0)?
        } else {
            counts.int_at(i)?
        };
        if n < 0 {
            return Err(domain_error("repEach() requires counts >= 0"));
        }
        let element = x.element_value(i)?;
        for _ in 0..n {
            parts.push(element.clone());
        }
    }
    if parts.is_empty() {
        return Ok(x.empty_like());
    }
    concat(&parts)
}

fn fx_seq(_interp: &mut Interpreter, args: Vec<Value>) -> ScriptResult<Value> {
    let int_args = args[0].value_type() == ValueType::Int
        && args[1].value_type() == ValueType::Int
        && opt_arg(&args, 2).map_or(true, |v| v.value_type() == ValueType::Int);

    let from = args[0].float_at(0)?;
    let to = args[1].float_at(0)?;
    let by = match opt_arg(&args, 2) {
        Some(v) => v.float_at(0)?,
        None => {
            if to >= from {
                1.0
            } else {
                -1.0
            }
        }
    };
    if by == 0.0 {
        return Err(domain_error("seq() requires a by argument != 0"));
    }
    if (to - from) * by < 0.0 {
        return Err(domain_error("seq() by argument has incorrect sign"));
    }

    let n = ((to - from) / by).floor() as usize + 1;
    if int_args {
        let from = args[0].int_at(0)?;
        let by = match opt_arg(&args, 2) {
            Some(v) => v.int_at(0)?,
            None => if to >= from as f64 { 1 } else { -1 },
        };
        let out: Vec<i64> = (0..n).map(|i| from + by * i as i64).collect();
        Ok(int_result(out))
    } else {
        let out: Vec<f64> = (0..n).map(|i| from + by * i as f64).collect();
        Ok(float_result(out))
    }
}

fn fx_seq_along(_interp: &mut Interpreter, args: Vec<Value>) -> ScriptResult<Value> {
    let n = args[0].count() as i64;
    Ok(int_result((0..n).collect()))
}

fn fx_logical(_interp: &mut Interpreter, args: Vec<Value>) -> ScriptResult<Value> {
    let n = constructor_length(&args[0], "logical")?;
    Ok(Value::logical_vec(vec![false; n]))
}

fn fx_integer(_interp: &mut Interpreter, args: Vec<Value>) -> ScriptResult<Value> {
    let n = constructor_length(&args[0], "integer")?;
    Ok(Value::int_vec(vec![0; n]))
}

fn fx_float(_interp: &mut Interpreter, args: Vec<Value>) -> ScriptResult<Value> {
    let n = constructor_length(&args[0], "float")?;
    Ok(Value::float_vec(vec![0.0; n]))
}

fn fx_string(_interp: &mut Interpreter, args: Vec<Value>) -> ScriptResult<Value> {
    let n = constructor_length(&args[0], "string")?;
    Ok(Value::string_vec(vec![String::new(); n]))
}

fn fx_object(_interp: &mut Interpreter, _args: Vec<Value>) -> ScriptResult<Value> {
    Ok(Value::object_vec("Object", Vec::new()))
}

fn constructor_length(v: &Value, name: &str) -> ScriptResult<usize> {
    let n = v.int_at(0)?;
    if n < 0 {
        return Err(domain_error(format!("{name}() requires length >= 0")));
    }
    Ok(n as usize)
}

// -- inspection -------------------------------------------------------

fn fx_size(_interp: &mut Interpreter, args: Vec<Value>) -> ScriptResult<Value> {
    Ok(Value::int(args[0].count() as i64))
}

fn fx_rev(_interp: &mut Interpreter, args: Vec<Value>) -> ScriptResult<Value> {
    let x = &args[0];
    let parts: ScriptResult<Vec<Value>> =
        (0..x.count()).rev().map(|i| x.element_value(i)).collect();
    let parts = parts?;
    if parts.is_empty() {
        return Ok(x.empty_like());
    }
    concat(&parts)
}

fn fx_sort(_interp: &mut Interpreter, args: Vec<Value>) -> ScriptResult<Value> {
    let ascending = match opt_arg(&args, 1) {
        Some(v) => v.logical_at(0)?,
        None => true,
    };
    let x = &args[0];
    match x.value_type() {
        ValueType::String => {
            let mut v = x.string_elements()?;
            v.sort();
            if !ascending {
                v.reverse();
            }
            Ok(string_result(v))
        }
        ValueType::Int | ValueType::Logical => {
            let mut v = x.int_elements()?;
            v.sort_unstable();
            if !ascending {
                v.reverse();
            }
            if x.value_type() == ValueType::Logical {
                Ok(Value::logical_vec(v.into_iter().map(|b| b != 0).collect()))
            } else {
                Ok(int_result(v))
            }
        }
        _ => {
            let mut v = x.float_elements()?;
            v.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            if !ascending {
                v.reverse();
            }
            Ok(float_result(v))
        }
    }
}

fn fx_unique(_interp: &mut Interpreter, args: Vec<Value>) -> ScriptResult<Value> {
    let x = &args[0];
    let mut kept: Vec<Value> = Vec::new();
    for i in 0..x.count() {
        let candidate = x.element_value(i)?;
        if !kept.iter().any(|seen| *seen == candidate) {
            kept.push(candidate);
        }
    }
    if kept.is_empty() {
        return Ok(x.empty_like());
    }
    concat(&kept)
}

fn fx_which(_interp: &mut Interpreter, args: Vec<Value>) -> ScriptResult<Value> {
    let mut out = Vec::new();
    for i in 0..args[0].count() {
        if args[0].logical_at(i)? {
            out.push(i as i64);
        }
    }
    Ok(Value::int_vec(out))
}

fn fx_which_max(_interp: &mut Interpreter, args: Vec<Value>) -> ScriptResult<Value> {
    extreme_index(&args[0], true)
}

fn fx_which_min(_interp: &mut Interpreter, args: Vec<Value>) -> ScriptResult<Value> {
    extreme_index(&args[0], false)
}

fn extreme_index(x: &Value, want_max: bool) -> ScriptResult<Value> {
    if x.count() == 0 {
        return Err(domain_error("argument must not be empty"));
    }
    let values = x.float_elements()?;
    let mut best = 0usize;
    for (i, v) in values.iter().enumerate().skip(1) {
        let better = if want_max {
            *v > values[best]
        } else {
            *v < values[best]
        };
        if better {
            best = i;
        }
    }
    Ok(Value::int(best as i64))
}

fn fx_any(_interp: &mut Interpreter, args: Vec<Value>) -> ScriptResult<Value> {
    for arg in &args {
        for i in 0..arg.count() {
            if arg.logical_at(i)? {
                return Ok(Value::logical(true));
            }
        }
    }
    Ok(Value::logical(false))
}

fn fx_all(_interp: &mut Interpreter, args: Vec<Value>) -> ScriptResult<Value> {
    for arg in &args {
        for i in 0..arg.count() {
            if !arg.logical_at(i)? {
                return Ok(Value::logical(false));
            }
        }
    }
    Ok(Value::logical(true))
}

fn fx_match(_interp: &mut Interpreter, args: Vec<Value>) -> ScriptResult<Value> {
    let x = &args[0];
    let table = &args[1];

    let x_object = x.value_type() == ValueType::Object;
    let t_object = table.value_type() == ValueType::Object;
    if x_object != t_object {
        return Err(ScriptError::new(
            ErrorKind::Type,
            "match() cannot compare object and non-object arguments",
        ));
    }

    let mut out = Vec::with_capacity(x.count());
    for i in 0..x.count() {
        let needle = x.element_value(i)?;
        let mut found = -1i64;
        for j in 0..table.count() {
            if elements_equal(&needle, table, j)? {
                found = j as i64;
                break;
            }
        }
        out.push(found);
    }
    Ok(Value::int_vec(out))
}

/// Equality of a singleton `needle` against element `j` of `table`,
/// under the usual promotion rules.
fn elements_equal(needle: &Value, table: &Value, j: usize) -> ScriptResult<bool> {
    if needle.value_type() == ValueType::Object {
        let a = needle.object_at(0)?;
        let b = table.object_at(j)?;
        return Ok(crate::object::same_element(&a, &b));
    }
    let rank = needle
        .value_type()
        .promotion_rank()
        .max(table.value_type().promotion_rank())
        .unwrap_or(0);
    if rank >= 4 {
        Ok(needle.string_at(0)? == table.string_at(j)?)
    } else if rank >= 3 {
        Ok(needle.float_at(0)? == table.float_at(j)?)
    } else {
        Ok(needle.int_at(0)? == table.int_at(j)?)
    }
}

// -- math and statistics ----------------------------------------------

fn fx_sum(_interp: &mut Interpreter, args: Vec<Value>) -> ScriptResult<Value> {
    let x = &args[0];
    if x.value_type() == ValueType::Float {
        Ok(Value::float(x.float_elements()?.iter().sum()))
    } else {
        let mut total = 0i64;
        for i in 0..x.count() {
            total = total
                .checked_add(x.int_at(i)?)
                .ok_or_else(|| ScriptError::new(ErrorKind::Numeric, "integer overflow in sum()"))?;
        }
        Ok(Value::int(total))
    }
}

fn fx_product(_interp: &mut Interpreter, args: Vec<Value>) -> ScriptResult<Value> {
    let x = &args[0];
    if x.value_type() == ValueType::Float {
        Ok(Value::float(x.float_elements()?.iter().product()))
    } else {
        // stay in integer space while the product fits
        let mut total = 1i64;
        for i in 0..x.count() {
            match total.checked_mul(x.int_at(i)?) {
                Some(t) => total = t,
                None => {
                    let product: f64 = x.float_elements()?.iter().product();
                    return Ok(Value::float(product));
                }
            }
        }
        Ok(Value::int(total))
    }
}

fn fx_mean(_interp: &mut Interpreter, args: Vec<Value>) -> ScriptResult<Value> {
    let values = args[0].float_elements()?;
    if values.is_empty() {
        return Err(domain_error("mean() requires a non-empty argument"));
    }
    Ok(Value::float(values.iter().sum::<f64>() / values.len() as f64))
}

fn fx_sd(_interp: &mut Interpreter, args: Vec<Value>) -> ScriptResult<Value> {
    let values = args[0].float_elements()?;
    if values.len() < 2 {
        return Err(domain_error("sd() requires at least two elements"));
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let ss: f64 = values.iter().map(|v| (v - mean) * (v - mean)).sum();
    Ok(Value::float((ss / (values.len() - 1) as f64).sqrt()))
}

fn fx_max(_interp: &mut Interpreter, args: Vec<Value>) -> ScriptResult<Value> {
    extreme_value(&args, true)
}

fn fx_min(_interp: &mut Interpreter, args: Vec<Value>) -> ScriptResult<Value> {
    extreme_value(&args, false)
}

fn extreme_value(args: &[Value], want_max: bool) -> ScriptResult<Value> {
    let joined = concat(args)?;
    if joined.count() == 0 {
        return Err(domain_error("argument must not be empty"));
    }
    match joined.value_type() {
        ValueType::String => {
            let values = joined.string_elements()?;
            let best = if want_max {
                values.into_iter().max()
            } else {
                values.into_iter().min()
            };
            Ok(Value::string(best.expect("non-empty")))
        }
        ValueType::Float => {
            let values = joined.float_elements()?;
            let mut best = values[0];
            for v in &values[1..] {
                let better = if want_max { *v > best } else { *v < best };
                if better || best.is_nan() {
                    best = *v;
                }
            }
            Ok(Value::float(best))
        }
        _ => {
            let values = joined.int_elements()?;
            let best = if want_max {
                values.into_iter().max()
            } else {
                values.into_iter().min()
            };
            Ok(Value::int(best.expect("non-empty")))
        }
    }
}

fn fx_range(interp: &mut Interpreter, args: Vec<Value>) -> ScriptResult<Value> {
    let lo = fx_min(interp, args.clone())?;
    let hi = fx_max(interp, args)?;
    concat(&[lo, hi])
}

fn fx_abs(_interp: &mut Interpreter, args: Vec<Value>) -> ScriptResult<Value> {
    let x = &args[0];
    if x.value_type() == ValueType::Int {
        let mut out = Vec::with_capacity(x.count());
        for i in 0..x.count() {
            let v = x.int_at(i)?;
            out.push(v.checked_abs().ok_or_else(|| {
                ScriptError::new(ErrorKind::Numeric, "integer overflow in abs()")
            })?);
        }
        Ok(int_result(out))
    } else {
        map_float(x, f64::abs)
    }
}

fn fx_exp(_interp: &mut Interpreter, args: Vec<Value>) -> ScriptResult<Value> {
    map_float(&args[0], f64::exp)
}

fn fx_log(_interp: &mut Interpreter, args: Vec<Value>) -> ScriptResult<Value> {
    map_float(&args[0], f64::ln)
}

fn fx_sqrt(_interp: &mut Interpreter, args: Vec<Value>) -> ScriptResult<Value> {
    map_float(&args[0], f64::sqrt)
}

fn fx_floor(_interp: &mut Interpreter, args: Vec<Value>) -> ScriptResult<Value> {
    map_float(&args[0], f64::floor)
}

fn fx_ceil(_interp: &mut Interpreter, args: Vec<Value>) -> ScriptResult<Value> {
    map_float(&args[0], f64::ceil)
}

fn fx_round(_interp: &mut Interpreter, args: Vec<Value>) -> ScriptResult<Value> {
    map_float(&args[0], f64::round)
}

// -- type tests and coercion ------------------------------------------

fn fx_is_null(_interp: &mut Interpreter, args: Vec<Value>) -> ScriptResult<Value> {
    Ok(Value::logical(args[0].is_null()))
}

fn fx_is_logical(_interp: &mut Interpreter, args: Vec<Value>) -> ScriptResult<Value> {
    Ok(Value::logical(args[0].value_type() == ValueType::Logical))
}

fn fx_is_integer(_interp: &mut Interpreter, args: Vec<Value>) -> ScriptResult<Value> {
    Ok(Value::logical(args[0].value_type() == ValueType::Int))
}

fn fx_is_float(_interp: &mut Interpreter, args: Vec<Value>) -> ScriptResult<Value> {
    Ok(Value::logical(args[0].value_type() == ValueType::Float))
}

fn fx_is_string(_interp: &mut Interpreter, args: Vec<Value>) -> ScriptResult<Value> {
    Ok(Value::logical(args[0].value_type() == ValueType::String))
}

fn fx_is_object(_interp: &mut Interpreter, args: Vec<Value>) -> ScriptResult<Value> {
    Ok(Value::logical(args[0].value_type() == ValueType::Object))
}

fn fx_as_logical(_interp: &mut Interpreter, args: Vec<Value>) -> ScriptResult<Value> {
    let x = &args[0];
    if x.value_type() == ValueType::String {
        let mut out = Vec::with_capacity(x.count());
        for i in 0..x.count() {
            let s = x.string_at(i)?;
            out.push(match s.as_str() {
                "T" | "TRUE" | "true" => true,
                "F" | "FALSE" | "false" => false,
                other => {
                    return Err(ScriptError::new(
                        ErrorKind::Type,
                        format!("cannot coerce \"{other}\" to logical"),
                    ));
                }
            });
        }
        return Ok(Value::logical_vec(out));
    }
    Ok(Value::logical_vec(x.logical_elements()?))
}

fn fx_as_integer(_interp: &mut Interpreter, args: Vec<Value>) -> ScriptResult<Value> {
    let x = &args[0];
    if x.value_type() == ValueType::String {
        let mut out = Vec::with_capacity(x.count());
        for i in 0..x.count() {
            let s = x.string_at(i)?;
            out.push(s.trim().parse::<i64>().map_err(|_| {
                ScriptError::new(ErrorKind::Type, format!("cannot coerce \"{s}\" to integer"))
            })?);
        }
        return Ok(int_result(out));
    }
    Ok(int_result(x.int_elements()?))
}

fn fx_as_float(_interp: &mut Interpreter, args: Vec<Value>) -> ScriptResult<Value> {
    let x = &args[0];
    if x.value_type() == ValueType::String {
        let mut out = Vec::with_capacity(x.count());
        for i in 0..x.count() {
            let s = x.string_at(i)?;
            out.push(s.trim().parse::<f64>().map_err(|_| {
                ScriptError::new(ErrorKind::Type, format!("cannot coerce \"{s}\" to float"))
            })?);
        }
        return Ok(float_result(out));
    }
    Ok(float_result(x.float_elements()?))
}

fn fx_as_string(_interp: &mut Interpreter, args: Vec<Value>) -> ScriptResult<Value> {
    Ok(string_result(args[0].string_elements()?))
}

// -- strings and output -----------------------------------------------

fn fx_nchar(_interp: &mut Interpreter, args: Vec<Value>) -> ScriptResult<Value> {
    let out: Vec<i64> = args[0]
        .string_elements()?
        .iter()
        .map(|s| s.chars().count() as i64)
        .collect();
    Ok(int_result(out))
}

fn fx_strsplit(_interp: &mut Interpreter, args: Vec<Value>) -> ScriptResult<Value> {
    let s = args[0].string_at(0)?;
    let sep = match opt_arg(&args, 1) {
        Some(v) => v.string_at(0)?,
        None => " ".to_string(),
    };
    let parts: Vec<String> = if sep.is_empty() {
        s.chars().map(|c| c.to_string()).collect()
    } else {
        s.split(sep.as_str()).map(str::to_string).collect()
    };
    Ok(Value::string_vec(parts))
}

fn fx_paste(_interp: &mut Interpreter, args: Vec<Value>) -> ScriptResult<Value> {
    let sep = match opt_arg(&args, 1) {
        Some(v) => v.string_at(0)?,
        None => " ".to_string(),
    };
    Ok(Value::string(args[0].string_elements()?.join(&sep)))
}

fn fx_print(interp: &mut Interpreter, args: Vec<Value>) -> ScriptResult<Value> {
    let text = format!("{}\n", args[0].display_string());
    interp.write_output(&text);
    Ok(Value::invisible_null())
}

fn fx_cat(interp: &mut Interpreter, args: Vec<Value>) -> ScriptResult<Value> {
    let sep = match opt_arg(&args, 1) {
        Some(v) => v.string_at(0)?,
        None => " ".to_string(),
    };
    let text = if args[0].is_null() {
        String::new()
    } else if args[0].value_type() == ValueType::Object {
        args[0].display_string()
    } else {
        args[0].string_elements()?.join(&sep)
    };
    interp.write_output(&text);
    Ok(Value::invisible_null())
}

fn fx_str(interp: &mut Interpreter, args: Vec<Value>) -> ScriptResult<Value> {
    let x = &args[0];
    let summary = match x.value_type() {
        ValueType::Object => format!(
            "({}<{}>[{}])\n",
            x.value_type(),
            x.object_class().unwrap_or("?"),
            x.count()
        ),
        t => format!("({t}[{}]) {}\n", x.count(), x.display_string()),
    };
    interp.write_output(&summary);
    Ok(Value::invisible_null())
}

// -- random draws -----------------------------------------------------

fn fx_set_seed(interp: &mut Interpreter, args: Vec<Value>) -> ScriptResult<Value> {
    let seed = args[0].int_at(0)?;
    interp.stream().borrow_mut().set_seed(seed);
    Ok(Value::invisible_null())
}

fn fx_get_seed(interp: &mut Interpreter, _args: Vec<Value>) -> ScriptResult<Value> {
    let seed = interp.stream().borrow().seed();
    Ok(Value::int(seed))
}

fn draw_count(v: &Value) -> ScriptResult<usize> {
    let n = v.int_at(0)?;
    if n < 0 {
        return Err(domain_error("requires n >= 0"));
    }
    Ok(n as usize)
}

fn fx_runif(interp: &mut Interpreter, args: Vec<Value>) -> ScriptResult<Value> {
    let n = draw_count(&args[0])?;
    let min = opt_arg(&args, 1).map_or(Ok(0.0), |v| v.float_at(0))?;
    let max = opt_arg(&args, 2).map_or(Ok(1.0), |v| v.float_at(0))?;
    if min > max {
        return Err(domain_error(format!("runif() requires min <= max ({min} > {max})")));
    }
    let stream = interp.stream();
    let mut stream = stream.borrow_mut();
    let out: Vec<f64> = (0..n).map(|_| stream.uniform_range(min, max)).collect();
    Ok(float_result(out))
}

fn fx_rnorm(interp: &mut Interpreter, args: Vec<Value>) -> ScriptResult<Value> {
    let n = draw_count(&args[0])?;
    let mean = opt_arg(&args, 1).map_or(Ok(0.0), |v| v.float_at(0))?;
    let sd = opt_arg(&args, 2).map_or(Ok(1.0), |v| v.float_at(0))?;
    if sd < 0.0 {
        return Err(domain_error("rnorm() requires sd >= 0"));
    }
    let normal = rand_distr::Normal::new(mean, sd)
        .map_err(|e| domain_error(format!("rnorm(): {e}")))?;
    let stream = interp.stream();
    let mut stream = stream.borrow_mut();
    let out: Vec<f64> = (0..n).map(|_| normal.sample(stream.rng_mut())).collect();
    Ok(float_result(out))
}

fn fx_rpois(interp: &mut Interpreter, args: Vec<Value>) -> ScriptResult<Value> {
    let n = draw_count(&args[0])?;
    let lambda = args[1].float_at(0)?;
    if lambda <= 0.0 {
        return Err(domain_error("rpois() requires lambda > 0"));
    }
    let poisson = rand_distr::Poisson::new(lambda)
        .map_err(|e| domain_error(format!("rpois(): {e}")))?;
    let stream = interp.stream();
    let mut stream = stream.borrow_mut();
    let out: Vec<i64> = (0..n)
        .map(|_| poisson.sample(stream.rng_mut()) as i64)
        .collect();
    Ok(int_result(out))
}

fn fx_rbinom(interp: &mut Interpreter, args: Vec<Value>) -> ScriptResult<Value> {
    let n = draw_count(&args[0])?;
    let size = args[1].int_at(0)?;
    let prob = args[2].float_at(0)?;
    if size < 0 {
        return Err(domain_error("rbinom() requires size >= 0"));
    }
    if !(0.0..=1.0).contains(&prob) {
        return Err(domain_error(format!(
            "rbinom() requires probability in [0.0, 1.0] ({prob} supplied)"
        )));
    }
    let binomial = rand_distr::Binomial::new(size as u64, prob)
        .map_err(|e| domain_error(format!("rbinom(): {e}")))?;
    let stream = interp.stream();
    let mut stream = stream.borrow_mut();
    let out: Vec<i64> = (0..n)
        .map(|_| binomial.sample(stream.rng_mut()) as i64)
        .collect();
    Ok(int_result(out))
}

fn fx_rexp(interp: &mut Interpreter, args: Vec<Value>) -> ScriptResult<Value> {
    let n = draw_count(&args[0])?;
    let mu = opt_arg(&args, 1).map_or(Ok(1.0), |v| v.float_at(0))?;
    if mu <= 0.0 {
        return Err(domain_error("rexp() requires mu > 0"));
    }
    let stream = interp.stream();
    let mut stream = stream.borrow_mut();
    let out: Vec<f64> = (0..n)
        .map(|_| -mu * (1.0 - stream.uniform()).ln())
        .collect();
    Ok(float_result(out))
}

fn fx_rgamma(interp: &mut Interpreter, args: Vec<Value>) -> ScriptResult<Value> {
    let n = draw_count(&args[0])?;
    let mean = args[1].float_at(0)?;
    let shape = args[2].float_at(0)?;
    if shape <= 0.0 {
        return Err(domain_error("rgamma() requires shape > 0"));
    }
    if mean == 0.0 {
        return Err(domain_error("rgamma() requires mean != 0"));
    }
    let scale = (mean / shape).abs();
    let sign = if mean < 0.0 { -1.0 } else { 1.0 };
    let gamma = rand_distr::Gamma::new(shape, scale)
        .map_err(|e| domain_error(format!("rgamma(): {e}")))?;
    let stream = interp.stream();
    let mut stream = stream.borrow_mut();
    let out: Vec<f64> = (0..n)
        .map(|_| sign * gamma.sample(stream.rng_mut()))
        .collect();
    Ok(float_result(out))
}

fn fx_sample(interp: &mut Interpreter, args: Vec<Value>) -> ScriptResult<Value> {
    let x = &args[0];
    let size = args[1].int_at(0)?;
    if size < 0 {
        return Err(domain_error("sample() requires size >= 0"));
    }
    let size = size as usize;
    let replace = match opt_arg(&args, 2) {
        Some(v) => v.logical_at(0)?,
        None => false,
    };
    let weights = match opt_arg(&args, 3) {
        Some(v) => {
            if v.count() != x.count() {
                return Err(ScriptError::new(
                    ErrorKind::Shape,
                    "sample() weights must match the size of x",
                ));
            }
            let w = v.float_elements()?;
            if w.iter().any(|&p| p < 0.0 || !p.is_finite()) {
                return Err(domain_error("sample() weights must be finite and non-negative"));
            }
            if w.iter().sum::<f64>() <= 0.0 {
                return Err(domain_error("sample() weights must not sum to zero"));
            }
            Some(w)
        }
        None => None,
    };

    if !replace && size > x.count() {
        return Err(domain_error(
            "sample() cannot draw without replacement beyond the population size",
        ));
    }
    if size > 0 && x.count() == 0 {
        return Err(domain_error("sample() cannot draw from an empty vector"));
    }

    let stream = interp.stream();
    let mut picked = Vec::with_capacity(size);
    match weights {
        None if !replace => {
            // partial Fisher-Yates over an index vector
            let mut stream = stream.borrow_mut();
            let mut indices: Vec<usize> = (0..x.count()).collect();
            for k in 0..size {
                let j = k + stream.uniform_index(indices.len() - k);
                indices.swap(k, j);
                picked.push(indices[k]);
            }
        }
        None => {
            let mut stream = stream.borrow_mut();
            for _ in 0..size {
                picked.push(stream.uniform_index(x.count()));
            }
        }
        Some(mut w) => {
            let mut stream = stream.borrow_mut();
            let mut total: f64 = w.iter().sum();
            for _ in 0..size {
                let mut target = stream.uniform() * total;
                let mut chosen = w.len() - 1;
                for (i, &weight) in w.iter().enumerate() {
                    target -= weight;
                    if target <= 0.0 && weight > 0.0 {
                        chosen = i;
                        break;
                    }
                }
                picked.push(chosen);
                if !replace {
                    total -= w[chosen];
                    w[chosen] = 0.0;
                }
            }
        }
    }

    let parts: ScriptResult<Vec<Value>> = picked.iter().map(|&i| x.element_value(i)).collect();
    let parts = parts?;
    if parts.is_empty() {
        return Ok(x.empty_like());
    }
    concat(&parts)
}

// -- environment ------------------------------------------------------

fn fx_define_constant(interp: &mut Interpreter, args: Vec<Value>) -> ScriptResult<Value> {
    let name = args[0].string_at(0)?;
    interp.symbols.define_constant(&name, args[1].to_visible())?;
    Ok(Value::invisible_null())
}

fn fx_rm(interp: &mut Interpreter, args: Vec<Value>) -> ScriptResult<Value> {
    let force = match opt_arg(&args, 1) {
        Some(v) => v.logical_at(0)?,
        None => false,
    };
    for name in args[0].string_elements()? {
        interp.symbols.remove(&name, force)?;
    }
    Ok(Value::invisible_null())
}

fn fx_apply(interp: &mut Interpreter, args: Vec<Value>) -> ScriptResult<Value> {
    let x = args[0].clone();
    let source = args[1].string_at(0)?;
    let root = crate::parser::parse_and_optimize(&source, interp.registry())?;

    let mut parts = Vec::with_capacity(x.count());
    for i in 0..x.count() {
        let element = x.element_value(i)?;
        interp.symbols.push_scope();
        let result = interp
            .symbols
            .set_local("applyValue", element)
            .and_then(|_| interp.evaluate_block(&root));
        interp.symbols.pop_scope();
        parts.push(result?);
    }
    concat(&parts)
}

fn fx_execute_lambda(interp: &mut Interpreter, args: Vec<Value>) -> ScriptResult<Value> {
    let source = args[0].string_at(0)?;
    interp.evaluate_source(&source)
}

fn fx_do_call(interp: &mut Interpreter, mut args: Vec<Value>) -> ScriptResult<Value> {
    let name = args[0].string_at(0)?;
    let rest = args.split_off(1);
    interp.call_function_by_name(&name, rest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng;

    fn interp() -> Interpreter {
        Interpreter::new(FunctionRegistry::standard(), rng::shared(1))
    }

    fn eval(src: &str) -> Value {
        interp().evaluate_source(src).unwrap()
    }

    fn eval_err(src: &str) -> ScriptError {
        interp().evaluate_source(src).unwrap_err()
    }

    #[test]
    fn test_sum_and_product() {
        assert_eq!(eval("sum(1:100);"), Value::int(5050));
        assert_eq!(eval("product(1:5);"), Value::int(120));
        assert_eq!(eval("sum(c(0.5, 1.5));"), Value::float(2.0));
        assert_eq!(eval("sum(c(T, T, F));"), Value::int(2));
    }

    #[test]
    fn test_rep_and_rep_each() {
        assert_eq!(eval("rep(c(3, 7), 2);"), Value::int_vec(vec![3, 7, 3, 7]));
        assert_eq!(
            eval("repEach(c(3, 7), c(2, 3));"),
            Value::int_vec(vec![3, 3, 7, 7, 7])
        );
        assert_eq!(eval("repEach(c(3, 7), 2);"), Value::int_vec(vec![3, 3, 7, 7]));
        let err = eval_err("repEach(c(3, 7), c(1, 2, 3));");
        assert_eq!(err.kind, ErrorKind::Shape);
    }

    #[test]
    fn test_seq() {
        assert_eq!(eval("seq(1, 10, 2);"), Value::int_vec(vec![1, 3, 5, 7, 9]));
        assert_eq!(eval("seq(5, 1);"), Value::int_vec(vec![5, 4, 3, 2, 1]));
        assert_eq!(eval("seq(1.0, 2.0, 0.5);"), Value::float_vec(vec![1.0, 1.5, 2.0]));
        assert_eq!(eval_err("seq(1, 10, 0);").kind, ErrorKind::Domain);
        assert_eq!(eval_err("seq(1, 10, -1);").kind, ErrorKind::Domain);
    }

    #[test]
    fn test_seq_along_and_size() {
        assert_eq!(eval("seqAlong(c('a','b','c'));"), Value::int_vec(vec![0, 1, 2]));
        assert_eq!(eval("size(1:42);"), Value::int(42));
        assert_eq!(eval("size(NULL);"), Value::int(0));
    }

    #[test]
    fn test_match() {
        assert_eq!(
            eval("match(c(1, 2, 2, 9, 5, 1), c(5, 1, 9));"),
            Value::int_vec(vec![1, -1, -1, 2, 0, 1])
        );
        // promotion: float table against int needles
        assert_eq!(eval("match(2, c(1.0, 2.0));"), Value::int_vec(vec![1]));
    }

    #[test]
    fn test_vector_utilities() {
        assert_eq!(eval("rev(1:4);"), Value::int_vec(vec![4, 3, 2, 1]));
        assert_eq!(eval("sort(c(3, 1, 2));"), Value::int_vec(vec![1, 2, 3]));
        assert_eq!(eval("sort(c(3, 1, 2), F);"), Value::int_vec(vec![3, 2, 1]));
        assert_eq!(eval("unique(c(1, 2, 1, 3, 2));"), Value::int_vec(vec![1, 2, 3]));
        assert_eq!(eval("which(c(F, T, F, T));"), Value::int_vec(vec![1, 3]));
        assert_eq!(eval("whichMax(c(1, 9, 3));"), Value::int(1));
        assert_eq!(eval("whichMin(c(4, 2, 8));"), Value::int(1));
    }

    #[test]
    fn test_any_all() {
        assert_eq!(eval("any(c(F, F), c(F, T));"), Value::logical(true));
        assert_eq!(eval("all(c(T, T), T);"), Value::logical(true));
        assert_eq!(eval("all(c(T, F));"), Value::logical(false));
        assert_eq!(eval("any(logical(0));"), Value::logical(false));
    }

    #[test]
    fn test_math() {
        assert_eq!(eval("abs(c(-3, 4));"), Value::int_vec(vec![3, 4]));
        assert_eq!(eval("abs(-1.5);"), Value::float(1.5));
        assert_eq!(eval("sqrt(16);"), Value::float(4.0));
        assert_eq!(eval("floor(1.7);"), Value::float(1.0));
        assert_eq!(eval("ceil(1.2);"), Value::float(2.0));
        assert_eq!(eval("round(1.5);"), Value::float(2.0));
        assert_eq!(eval("exp(0);"), Value::float(1.0));
        assert_eq!(eval("log(E);"), Value::float(1.0));
        assert_eq!(eval("mean(1:4);"), Value::float(2.5));
        assert_eq!(eval("max(1:5, 9);"), Value::int(9));
        assert_eq!(eval("min(c(2.5, 1.5));"), Value::float(1.5));
        assert_eq!(eval("range(c(4, 1, 7));"), Value::int_vec(vec![1, 7]));
    }

    #[test]
    fn test_type_tests_and_coercions() {
        assert_eq!(eval("isNULL(NULL);"), Value::logical(true));
        assert_eq!(eval("isInteger(1);"), Value::logical(true));
        assert_eq!(eval("isFloat(1);"), Value::logical(false));
        assert_eq!(eval("asInteger('42');"), Value::int(42));
        assert_eq!(eval("asFloat(c(T, F));"), Value::float_vec(vec![1.0, 0.0]));
        assert_eq!(eval("asString(1:3);"), Value::string_vec(vec!["1".into(), "2".into(), "3".into()]));
        assert_eq!(eval("asLogical('T');"), Value::logical_vec(vec![true]));
        assert_eq!(eval_err("asInteger('abc');").kind, ErrorKind::Type);
    }

    #[test]
    fn test_string_functions() {
        assert_eq!(eval("nchar(c('ab', 'xyz'));"), Value::int_vec(vec![2, 3]));
        assert_eq!(
            eval("strsplit('a-b-c', '-');"),
            Value::string_vec(vec!["a".into(), "b".into(), "c".into()])
        );
        assert_eq!(eval("paste(1:3, '+');"), Value::string("1+2+3"));
        assert_eq!(eval("paste(c('a', 'b'));"), Value::string("a b"));
    }

    #[test]
    fn test_print_and_cat_output() {
        let mut it = interp();
        it.evaluate_source("print(1:3); cat('x'); cat(c(1, 2), '-');").unwrap();
        assert_eq!(it.take_output(), "1 2 3\nx1-2");
        // drained
        assert_eq!(it.take_output(), "");
    }

    #[test]
    fn test_seed_functions() {
        let mut it = interp();
        it.evaluate_source("setSeed(1234);").unwrap();
        assert_eq!(it.evaluate_source("getSeed();").unwrap(), Value::int(1234));
    }

    #[test]
    fn test_sampling_determinism() {
        let mut a = interp();
        let mut b = interp();
        let draw = "setSeed(7); sample(1:5, 5, F);";
        let va = a.evaluate_source(draw).unwrap();
        let vb = b.evaluate_source(draw).unwrap();
        assert_eq!(va, vb);
        // a permutation of 1..5
        let mut sorted = va.int_elements().unwrap();
        sorted.sort_unstable();
        assert_eq!(sorted, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_sample_domain_errors() {
        assert_eq!(eval_err("sample(1:5, 6, F);").kind, ErrorKind::Domain);
        assert_eq!(eval_err("sample(1:5, 2, T, c(1.0, 1.0));").kind, ErrorKind::Shape);
        assert_eq!(
            eval_err("sample(1:2, 1, T, c(0.0, 0.0));").kind,
            ErrorKind::Domain
        );
    }

    #[test]
    fn test_sample_weighted() {
        // all weight on one element: every draw must be it
        assert_eq!(
            eval("setSeed(3); sample(1:4, 6, T, c(0.0, 0.0, 1.0, 0.0));"),
            Value::int_vec(vec![3, 3, 3, 3, 3, 3])
        );
    }

    #[test]
    fn test_random_draw_domains() {
        assert_eq!(eval_err("runif(1, 2, 1);").kind, ErrorKind::Domain);
        assert_eq!(eval_err("rbinom(1, 10, 1.5);").kind, ErrorKind::Domain);
        assert_eq!(eval_err("rpois(1, 0);").kind, ErrorKind::Domain);
        assert_eq!(eval_err("rnorm(1, 0, -1);").kind, ErrorKind::Domain);
        assert_eq!(eval("runif(0);").count(), 0);
    }

    #[test]
    fn test_rnorm_draws() {
        let v = eval("setSeed(5); rnorm(100, 10.0, 0.1);");
        assert_eq!(v.count(), 100);
        let mean: f64 = v.float_elements().unwrap().iter().sum::<f64>() / 100.0;
        assert!((mean - 10.0).abs() < 0.1);
    }

    #[test]
    fn test_define_constant_and_rm() {
        let mut it = interp();
        it.evaluate_source("defineConstant('K', 500);").unwrap();
        assert_eq!(it.evaluate_source("K;").unwrap(), Value::int(500));
        assert_eq!(
            it.evaluate_source("K = 1;").unwrap_err().kind,
            ErrorKind::Name
        );
        assert_eq!(
            it.evaluate_source("defineConstant('K', 2);").unwrap_err().kind,
            ErrorKind::Name
        );
        assert_eq!(
            it.evaluate_source("rm('K', T);").unwrap_err().kind,
            ErrorKind::Name
        );

        it.evaluate_source("x = 1; rm('x');").unwrap();
        assert_eq!(it.evaluate_source("x;").unwrap_err().kind, ErrorKind::Name);
    }

    #[test]
    fn test_apply() {
        assert_eq!(
            eval("apply(1:4, 'applyValue * 2;');"),
            Value::int_vec(vec![2, 4, 6, 8])
        );
        // NULL results vanish in the concatenation
        assert_eq!(
            eval("apply(1:4, 'if (applyValue % 2 == 0.0) applyValue; else NULL;');"),
            Value::int_vec(vec![2, 4])
        );
    }

    #[test]
    fn test_apply_scope_is_transient() {
        let mut it = interp();
        it.evaluate_source("apply(1:3, 'applyValue;');").unwrap();
        assert_eq!(
            it.evaluate_source("applyValue;").unwrap_err().kind,
            ErrorKind::Name
        );
    }

    #[test]
    fn test_execute_lambda_shares_scope() {
        assert_eq!(eval("x = 1; executeLambda('x = x + 41;'); x;"), Value::int(42));
    }

    #[test]
    fn test_do_call() {
        assert_eq!(eval("doCall('sum', 1:10);"), Value::int(55));
        assert_eq!(eval_err("doCall('nope');").kind, ErrorKind::Name);
    }

    #[test]
    fn test_constructors() {
        assert_eq!(eval("integer(3);"), Value::int_vec(vec![0, 0, 0]));
        assert_eq!(eval("float(2);"), Value::float_vec(vec![0.0, 0.0]));
        assert_eq!(eval("logical(1);"), Value::logical_vec(vec![false]));
        assert_eq!(eval("string(0);").count(), 0);
    }

    #[test]
    fn test_concat_type_promotion_law() {
        // c(x, y).type() is the higher of the two operand types
        assert_eq!(eval("c(T, 1);").value_type(), ValueType::Int);
        assert_eq!(eval("c(1, 1.5);").value_type(), ValueType::Float);
        assert_eq!(eval("c(1.5, 'a');").value_type(), ValueType::String);
        assert_eq!(eval("c(T, 'a');").value_type(), ValueType::String);
    }

    #[test]
    fn test_zero_generation_name_outside_initialize() {
        let err = eval_err("initializeMutationRate(1e-7);");
        assert_eq!(err.kind, ErrorKind::Name);
        assert!(err.message.contains("initialization"));
    }
}
