//! The tree-walking interpreter and its operator semantics.
//!
//! Evaluation is single-threaded and cooperative: a script runs to
//! completion or raises. Loop control (`next`, `break`) and `return`
//! travel upward as a control-flow variant; expression evaluation can
//! only produce plain values.

use std::collections::HashMap;
use std::rc::Rc;

use crate::error::{ErrorKind, ScriptError, ScriptResult};
use crate::functions::{FunctionRegistry, HostFunction};
use crate::object::{call_object_method, read_property, same_element, write_property};
use crate::parser::{parse_and_optimize, AstNode};
use crate::rng::SharedStream;
use crate::symbols::SymbolTable;
use crate::token::{self, TokenKind};
use crate::value::{Value, ValueType};

/// Result of a statement: a value, or an in-flight control transfer.
enum Flow {
    Value(Value),
    Next,
    Break,
    Return(Value),
}

pub struct Interpreter {
    pub symbols: SymbolTable,
    functions: Rc<FunctionRegistry>,
    host_functions: HashMap<String, Rc<HostFunction>>,
    stream: SharedStream,
    // shared so host objects can interleave their own output with the
    // script's print/cat output in execution order
    output: Rc<std::cell::RefCell<String>>,
}

impl Interpreter {
    pub fn new(functions: Rc<FunctionRegistry>, stream: SharedStream) -> Self {
        Self {
            symbols: SymbolTable::new(),
            functions,
            host_functions: HashMap::new(),
            stream,
            output: Rc::new(std::cell::RefCell::new(String::new())),
        }
    }

    pub fn registry(&self) -> &Rc<FunctionRegistry> {
        &self.functions
    }

    pub fn stream(&self) -> SharedStream {
        Rc::clone(&self.stream)
    }

    /// Install a host-provided function (a zero-generation name). The
    /// engine registers these while initialization blocks run.
    pub fn register_host_function(&mut self, f: HostFunction) {
        self.host_functions.insert(f.signature.name.to_string(), Rc::new(f));
    }

    pub fn unregister_host_function(&mut self, name: &str) {
        self.host_functions.remove(name);
    }

    /// Accumulated `print`/`cat` output; draining clears the buffer.
    pub fn take_output(&mut self) -> String {
        std::mem::take(&mut *self.output.borrow_mut())
    }

    pub fn write_output(&mut self, text: &str) {
        self.output.borrow_mut().push_str(text);
    }

    /// The shared output buffer, for host objects that emit output of
    /// their own (e.g. a population dump to the console).
    pub fn output_handle(&self) -> Rc<std::cell::RefCell<String>> {
        Rc::clone(&self.output)
    }

    /// Parse, optimize, and evaluate a source string in the current
    /// scope. The value of the last statement is returned.
    pub fn evaluate_source(&mut self, source: &str) -> ScriptResult<Value> {
        let root = parse_and_optimize(source, &self.functions)?;
        self.evaluate_block(&root)
    }

    /// Evaluate a parsed interpreter block. A `return` anywhere in the
    /// block yields its payload; otherwise the last statement's value.
    pub fn evaluate_block(&mut self, root: &AstNode) -> ScriptResult<Value> {
        let mut last = Value::invisible_null();
        for statement in &root.children {
            match self.eval_statement(statement)? {
                Flow::Value(v) => last = v,
                Flow::Return(v) => return Ok(v),
                Flow::Next => {
                    return Err(ScriptError::at(
                        ErrorKind::Parse,
                        "next used outside of a loop",
                        statement.position(),
                    ));
                }
                Flow::Break => {
                    return Err(ScriptError::at(
                        ErrorKind::Parse,
                        "break used outside of a loop",
                        statement.position(),
                    ));
                }
            }
        }
        Ok(last)
    }

    /// Invoke a function by name, as `doCall` does. Host functions take
    /// precedence only in the sense that they are the sole route to
    /// zero-generation names; the two name sets never overlap.
    pub fn call_function_by_name(&mut self, name: &str, args: Vec<Value>) -> ScriptResult<Value> {
        if let Some(f) = self.functions.lookup(name) {
            f.signature.check_arguments("function", &args)?;
            let result = (f.imp)(self, args)?;
            f.signature.check_return("function", &result)?;
            return Ok(result);
        }
        if let Some(f) = self.host_functions.get(name).cloned() {
            f.signature.check_arguments("function", &args)?;
            let result = (f.imp)(self, args)?;
            f.signature.check_return("function", &result)?;
            return Ok(result);
        }
        if self.functions.is_zero_generation_name(name) {
            return Err(ScriptError::new(
                ErrorKind::Name,
                format!("function {name}() may only be called during initialization"),
            ));
        }
        Err(ScriptError::new(
            ErrorKind::Name,
            format!("unrecognized function name {name}"),
        ))
    }

    // -- statements -----------------------------------------------------

    fn eval_statement(&mut self, node: &AstNode) -> ScriptResult<Flow> {
        match node.kind() {
            TokenKind::LBrace => {
                if let Some(v) = &node.cached_value {
                    return Ok(Flow::Value(v.clone()));
                }
                let mut last = Value::invisible_null();
                for child in &node.children {
                    match self.eval_statement(child)? {
                        Flow::Value(v) => last = v,
                        other => return Ok(other),
                    }
                }
                Ok(Flow::Value(last))
            }
            TokenKind::Semicolon => Ok(Flow::Value(Value::invisible_null())),
            TokenKind::If => {
                let condition = self.eval_expr(&node.children[0])?;
                if self.condition_true(&condition, &node.children[0])? {
                    self.eval_statement(&node.children[1])
                } else if let Some(else_branch) = node.children.get(2) {
                    self.eval_statement(else_branch)
                } else {
                    Ok(Flow::Value(Value::invisible_null()))
                }
            }
            TokenKind::While => loop {
                let condition = self.eval_expr(&node.children[0])?;
                if !self.condition_true(&condition, &node.children[0])? {
                    return Ok(Flow::Value(Value::invisible_null()));
                }
                match self.eval_statement(&node.children[1])? {
                    Flow::Next | Flow::Value(_) => {}
                    Flow::Break => return Ok(Flow::Value(Value::invisible_null())),
                    ret @ Flow::Return(_) => return Ok(ret),
                }
            },
            TokenKind::Do => loop {
                match self.eval_statement(&node.children[0])? {
                    Flow::Next | Flow::Value(_) => {}
                    Flow::Break => return Ok(Flow::Value(Value::invisible_null())),
                    ret @ Flow::Return(_) => return Ok(ret),
                }
                let condition = self.eval_expr(&node.children[1])?;
                if !self.condition_true(&condition, &node.children[1])? {
                    return Ok(Flow::Value(Value::invisible_null()));
                }
            },
            TokenKind::For => {
                let name = node.children[0].token.text.clone();
                let iterated = self.eval_expr(&node.children[1])?;
                for i in 0..iterated.count() {
                    let element = iterated
                        .element_value(i)
                        .map_err(|e| e.with_position(node.children[1].position()))?;
                    self.symbols
                        .set(&name, element)
                        .map_err(|e| e.with_position(node.children[0].position()))?;
                    match self.eval_statement(&node.children[2])? {
                        Flow::Next | Flow::Value(_) => {}
                        Flow::Break => return Ok(Flow::Value(Value::invisible_null())),
                        ret @ Flow::Return(_) => return Ok(ret),
                    }
                }
                Ok(Flow::Value(Value::invisible_null()))
            }
            TokenKind::Next => Ok(Flow::Next),
            TokenKind::Break => Ok(Flow::Break),
            TokenKind::Return => {
                if let Some(v) = &node.cached_value {
                    return Ok(Flow::Return(v.clone()));
                }
                let value = match node.children.first() {
                    Some(child) => self.eval_expr(child)?,
                    None => Value::null(),
                };
                Ok(Flow::Return(value))
            }
            _ => Ok(Flow::Value(self.eval_expr(node)?)),
        }
    }

    fn condition_true(&self, condition: &Value, node: &AstNode) -> ScriptResult<bool> {
        if condition.count() != 1 {
            return Err(ScriptError::at(
                ErrorKind::Shape,
                format!("condition must be of size 1, not {}", condition.count()),
                node.position(),
            ));
        }
        condition
            .logical_at(0)
            .map_err(|e| e.with_position(node.position()))
    }

    // -- expressions ----------------------------------------------------

    pub fn eval_expr(&mut self, node: &AstNode) -> ScriptResult<Value> {
        if let Some(v) = &node.cached_value {
            return Ok(v.clone());
        }
        let pos = node.position();
        match node.kind() {
            TokenKind::IntLiteral => {
                // reached only when the optimization pass was skipped
                let v = token::int_literal_value(&node.token.text).ok_or_else(|| {
                    ScriptError::at(ErrorKind::Tokenize, "integer literal out of range", pos)
                })?;
                Ok(Value::int(v))
            }
            TokenKind::FloatLiteral => {
                Ok(Value::float(token::float_literal_value(&node.token.text)))
            }
            TokenKind::StringLiteral => Ok(Value::string(node.token.text.clone())),
            TokenKind::Identifier => self.symbols.lookup(&node.token.text).ok_or_else(|| {
                ScriptError::at(
                    ErrorKind::Name,
                    format!("undefined identifier {}", node.token.text),
                    pos,
                )
            }),
            TokenKind::Assign => {
                self.eval_assignment(node)?;
                Ok(Value::invisible_null())
            }
            TokenKind::Plus if node.children.len() == 1 => {
                let operand = self.eval_expr(&node.children[0])?;
                unary_plus(&operand).map_err(|e| e.with_position(pos))
            }
            TokenKind::Minus if node.children.len() == 1 => {
                let operand = self.eval_expr(&node.children[0])?;
                unary_minus(&operand).map_err(|e| e.with_position(pos))
            }
            TokenKind::Not => {
                let operand = self.eval_expr(&node.children[0])?;
                unary_not(&operand).map_err(|e| e.with_position(pos))
            }
            TokenKind::Plus
            | TokenKind::Minus
            | TokenKind::Star
            | TokenKind::Slash
            | TokenKind::Percent
            | TokenKind::Caret => {
                let left = self.eval_expr(&node.children[0])?;
                let right = self.eval_expr(&node.children[1])?;
                binary_arith(node.kind(), &left, &right).map_err(|e| e.with_position(pos))
            }
            TokenKind::Eq
            | TokenKind::NotEq
            | TokenKind::Lt
            | TokenKind::LtEq
            | TokenKind::Gt
            | TokenKind::GtEq => {
                let left = self.eval_expr(&node.children[0])?;
                let right = self.eval_expr(&node.children[1])?;
                binary_compare(node.kind(), &left, &right).map_err(|e| e.with_position(pos))
            }
            TokenKind::And | TokenKind::Or => {
                let left = self.eval_expr(&node.children[0])?;
                let right = self.eval_expr(&node.children[1])?;
                binary_logical(node.kind(), &left, &right).map_err(|e| e.with_position(pos))
            }
            TokenKind::Colon => {
                let left = self.eval_expr(&node.children[0])?;
                let right = self.eval_expr(&node.children[1])?;
                range_values(&left, &right).map_err(|e| e.with_position(pos))
            }
            TokenKind::LBracket => {
                let target = self.eval_expr(&node.children[0])?;
                let index = self.eval_expr(&node.children[1])?;
                subscript_read(&target, &index).map_err(|e| e.with_position(pos))
            }
            TokenKind::Dot => {
                let receiver = self.eval_expr(&node.children[0])?;
                let member = node.children[1].token.text.as_str();
                if receiver.value_type() != ValueType::Object {
                    return Err(ScriptError::at(
                        ErrorKind::Type,
                        format!("operand of '.' must be an object, not {}", receiver.value_type()),
                        pos,
                    ));
                }
                read_property(&receiver, member).map_err(|e| e.with_position(pos))
            }
            TokenKind::LParen => self.eval_call(node),
            other => Err(ScriptError::at(
                ErrorKind::Internal,
                format!("unexpected node {} in expression position", other.describe()),
                pos,
            )),
        }
    }

    fn eval_call(&mut self, node: &AstNode) -> ScriptResult<Value> {
        let pos = node.position();
        let callee = &node.children[0];

        let mut args = Vec::with_capacity(node.children.len() - 1);
        for arg in &node.children[1..] {
            args.push(self.eval_expr(arg)?);
        }

        if callee.kind() == TokenKind::Dot {
            let receiver = self.eval_expr(&callee.children[0])?;
            let method = callee.children[1].token.text.as_str();
            if receiver.value_type() != ValueType::Object {
                return Err(ScriptError::at(
                    ErrorKind::Type,
                    format!(
                        "method call requires an object receiver, not {}",
                        receiver.value_type()
                    ),
                    pos,
                ));
            }
            return call_object_method(&receiver, method, &args).map_err(|e| e.with_position(pos));
        }

        if callee.kind() != TokenKind::Identifier {
            return Err(ScriptError::at(
                ErrorKind::Type,
                "called expression is not a function",
                callee.position(),
            ));
        }

        if let Some(f) = node.cached_function.clone() {
            f.signature
                .check_arguments("function", &args)
                .map_err(|e| e.with_position(pos))?;
            let result = (f.imp)(self, args).map_err(|e| e.with_position(pos))?;
            f.signature.check_return("function", &result)?;
            return Ok(result);
        }

        self.call_function_by_name(&callee.token.text, args)
            .map_err(|e| e.with_position(pos))
    }

    fn eval_assignment(&mut self, node: &AstNode) -> ScriptResult<()> {
        let pos = node.position();
        let lhs = &node.children[0];
        let rhs = self.eval_expr(&node.children[1])?.to_visible();

        match lhs.kind() {
            TokenKind::Identifier => self
                .symbols
                .set(&lhs.token.text, rhs)
                .map_err(|e| e.with_position(lhs.position())),
            TokenKind::LBracket => {
                let index = self.eval_expr(&lhs.children[1])?;
                let base = &lhs.children[0];
                match base.kind() {
                    TokenKind::Identifier => {
                        let name = base.token.text.as_str();
                        let mut target = self.symbols.lookup(name).ok_or_else(|| {
                            ScriptError::at(
                                ErrorKind::Name,
                                format!("undefined identifier {name}"),
                                base.position(),
                            )
                        })?;
                        subscript_assign(&mut target, &index, &rhs)
                            .map_err(|e| e.with_position(pos))?;
                        self.symbols
                            .set(name, target)
                            .map_err(|e| e.with_position(base.position()))
                    }
                    TokenKind::Dot => {
                        // obj.prop[idx] = v: read, modify, write back
                        let receiver = self.eval_expr(&base.children[0])?;
                        let member = base.children[1].token.text.as_str();
                        let mut target = read_property(&receiver, member)
                            .map_err(|e| e.with_position(base.position()))?;
                        subscript_assign(&mut target, &index, &rhs)
                            .map_err(|e| e.with_position(pos))?;
                        write_property(&receiver, member, &target)
                            .map_err(|e| e.with_position(base.position()))
                    }
                    _ => Err(ScriptError::at(
                        ErrorKind::Type,
                        "cannot assign into this expression",
                        base.position(),
                    )),
                }
            }
            TokenKind::Dot => {
                let receiver = self.eval_expr(&lhs.children[0])?;
                let member = lhs.children[1].token.text.as_str();
                if receiver.value_type() != ValueType::Object {
                    return Err(ScriptError::at(
                        ErrorKind::Type,
                        format!("operand of '.' must be an object, not {}", receiver.value_type()),
                        lhs.position(),
                    ));
                }
                write_property(&receiver, member, &rhs).map_err(|e| e.with_position(pos))
            }
            _ => Err(ScriptError::at(
                ErrorKind::Type,
                "cannot assign into this expression",
                lhs.position(),
            )),
        }
    }
}

// -- operator semantics -----------------------------------------------

fn reject_null_operand(op: &str, l: &Value, r: &Value) -> ScriptResult<()> {
    if l.is_null() || r.is_null() {
        return Err(ScriptError::new(
            ErrorKind::Type,
            format!("operand of '{op}' may not be NULL"),
        ));
    }
    Ok(())
}

fn reject_object_operand(op: &str, l: &Value, r: &Value) -> ScriptResult<()> {
    for v in [l, r] {
        if v.value_type() == ValueType::Object {
            return Err(ScriptError::new(
                ErrorKind::Type,
                format!("operand of '{op}' may not be an object"),
            ));
        }
    }
    Ok(())
}

/// Resolve the broadcast counts of a vector-vector operation: equal
/// lengths, or one side of length 1.
fn broadcast_count(op: &str, l: &Value, r: &Value) -> ScriptResult<usize> {
    let (lc, rc) = (l.count(), r.count());
    if lc == rc {
        Ok(lc)
    } else if lc == 1 {
        Ok(rc)
    } else if rc == 1 {
        Ok(lc)
    } else {
        Err(ScriptError::new(
            ErrorKind::Shape,
            format!(
                "the '{op}' operator requires that either both operands have the same size(), \
                 or that one operand has size() 1 ({lc} vs {rc})"
            ),
        ))
    }
}

#[inline]
fn bidx(i: usize, count: usize) -> usize {
    if count == 1 { 0 } else { i }
}

fn op_text(kind: TokenKind) -> &'static str {
    match kind {
        TokenKind::Plus => "+",
        TokenKind::Minus => "-",
        TokenKind::Star => "*",
        TokenKind::Slash => "/",
        TokenKind::Percent => "%",
        TokenKind::Caret => "^",
        TokenKind::Eq => "==",
        TokenKind::NotEq => "!=",
        TokenKind::Lt => "<",
        TokenKind::LtEq => "<=",
        TokenKind::Gt => ">",
        TokenKind::GtEq => ">=",
        TokenKind::And => "&",
        TokenKind::Or => "|",
        _ => "?",
    }
}

fn overflow_error(op: &str) -> ScriptError {
    ScriptError::new(
        ErrorKind::Numeric,
        format!("integer overflow in '{op}' operation"),
    )
}

pub(crate) fn binary_arith(kind: TokenKind, l: &Value, r: &Value) -> ScriptResult<Value> {
    let op = op_text(kind);
    reject_null_operand(op, l, r)?;
    reject_object_operand(op, l, r)?;

    let string_concat = kind == TokenKind::Plus
        && (l.value_type() == ValueType::String || r.value_type() == ValueType::String);
    if string_concat {
        let n = broadcast_count(op, l, r)?;
        let mut out = Vec::with_capacity(n);
        for i in 0..n {
            let a = l.string_at(bidx(i, l.count()))?;
            let b = r.string_at(bidx(i, r.count()))?;
            out.push(format!("{a}{b}"));
        }
        return Ok(if out.len() == 1 {
            Value::string(out.pop().expect("one element"))
        } else {
            Value::string_vec(out)
        });
    }

    for v in [l, r] {
        if !matches!(
            v.value_type(),
            ValueType::Logical | ValueType::Int | ValueType::Float
        ) {
            return Err(ScriptError::new(
                ErrorKind::Type,
                format!("operand of '{op}' cannot be type {}", v.value_type()),
            ));
        }
    }

    let n = broadcast_count(op, l, r)?;

    // / % ^ always produce float; + - * stay int when both sides are
    // integer-ranked (logical operands promote to int)
    let int_result = matches!(kind, TokenKind::Plus | TokenKind::Minus | TokenKind::Star)
        && l.value_type() != ValueType::Float
        && r.value_type() != ValueType::Float;

    if int_result {
        let mut out = Vec::with_capacity(n);
        for i in 0..n {
            let a = l.int_at(bidx(i, l.count()))?;
            let b = r.int_at(bidx(i, r.count()))?;
            let c = match kind {
                TokenKind::Plus => a.checked_add(b),
                TokenKind::Minus => a.checked_sub(b),
                TokenKind::Star => a.checked_mul(b),
                _ => unreachable!(),
            }
            .ok_or_else(|| overflow_error(op))?;
            out.push(c);
        }
        return Ok(if out.len() == 1 {
            Value::int(out[0])
        } else {
            Value::int_vec(out)
        });
    }

    let mut out = Vec::with_capacity(n);
    for i in 0..n {
        let a = l.float_at(bidx(i, l.count()))?;
        let b = r.float_at(bidx(i, r.count()))?;
        let c = match kind {
            TokenKind::Plus => a + b,
            TokenKind::Minus => a - b,
            TokenKind::Star => a * b,
            TokenKind::Slash => a / b,
            TokenKind::Percent => a % b,
            TokenKind::Caret => a.powf(b),
            _ => unreachable!(),
        };
        out.push(c);
    }
    Ok(if out.len() == 1 {
        Value::float(out[0])
    } else {
        Value::float_vec(out)
    })
}

pub(crate) fn binary_compare(kind: TokenKind, l: &Value, r: &Value) -> ScriptResult<Value> {
    let op = op_text(kind);
    if l.is_null() || r.is_null() {
        return Err(ScriptError::new(
            ErrorKind::Type,
            format!("testing NULL with the '{op}' operator is an error"),
        ));
    }

    let l_object = l.value_type() == ValueType::Object;
    let r_object = r.value_type() == ValueType::Object;
    if l_object != r_object {
        return Err(ScriptError::new(
            ErrorKind::Type,
            format!("the '{op}' operator cannot compare object and non-object operands"),
        ));
    }
    if l_object {
        if !matches!(kind, TokenKind::Eq | TokenKind::NotEq) {
            return Err(ScriptError::new(
                ErrorKind::Type,
                format!("the '{op}' operator cannot order object operands"),
            ));
        }
        let n = broadcast_count(op, l, r)?;
        let mut out = Vec::with_capacity(n);
        for i in 0..n {
            let a = l.object_at(bidx(i, l.count()))?;
            let b = r.object_at(bidx(i, r.count()))?;
            let same = same_element(&a, &b);
            out.push(if kind == TokenKind::Eq { same } else { !same });
        }
        return Ok(Value::logical_vec(out));
    }

    let rank = l
        .value_type()
        .promotion_rank()
        .max(r.value_type().promotion_rank())
        .expect("base operands");
    let n = broadcast_count(op, l, r)?;
    let mut out = Vec::with_capacity(n);
    for i in 0..n {
        let ordering: Option<std::cmp::Ordering> = if rank >= 4 {
            let a = l.string_at(bidx(i, l.count()))?;
            let b = r.string_at(bidx(i, r.count()))?;
            Some(a.cmp(&b))
        } else {
            // logical and int promote losslessly into float comparison
            let a = l.float_at(bidx(i, l.count()))?;
            let b = r.float_at(bidx(i, r.count()))?;
            a.partial_cmp(&b)
        };
        let truth = match (kind, ordering) {
            // NaN: unordered compares false, except != which is true
            (TokenKind::NotEq, None) => true,
            (_, None) => false,
            (TokenKind::Eq, Some(o)) => o.is_eq(),
            (TokenKind::NotEq, Some(o)) => o.is_ne(),
            (TokenKind::Lt, Some(o)) => o.is_lt(),
            (TokenKind::LtEq, Some(o)) => o.is_le(),
            (TokenKind::Gt, Some(o)) => o.is_gt(),
            (TokenKind::GtEq, Some(o)) => o.is_ge(),
            _ => unreachable!(),
        };
        out.push(truth);
    }
    Ok(Value::logical_vec(out))
}

pub(crate) fn binary_logical(kind: TokenKind, l: &Value, r: &Value) -> ScriptResult<Value> {
    let op = op_text(kind);
    reject_null_operand(op, l, r)?;
    reject_object_operand(op, l, r)?;
    let n = broadcast_count(op, l, r)?;
    let mut out = Vec::with_capacity(n);
    for i in 0..n {
        let a = l.logical_at(bidx(i, l.count()))?;
        let b = r.logical_at(bidx(i, r.count()))?;
        out.push(if kind == TokenKind::And { a && b } else { a || b });
    }
    Ok(Value::logical_vec(out))
}

pub(crate) fn unary_plus(v: &Value) -> ScriptResult<Value> {
    match v.value_type() {
        ValueType::Int | ValueType::Float => Ok(v.to_visible()),
        t => Err(ScriptError::new(
            ErrorKind::Type,
            format!("operand of unary '+' cannot be type {t}"),
        )),
    }
}

pub(crate) fn unary_minus(v: &Value) -> ScriptResult<Value> {
    match v.value_type() {
        ValueType::Int => {
            let mut out = Vec::with_capacity(v.count());
            for i in 0..v.count() {
                let x = v.int_at(i)?;
                out.push(x.checked_neg().ok_or_else(|| overflow_error("unary -"))?);
            }
            Ok(if out.len() == 1 {
                Value::int(out[0])
            } else {
                Value::int_vec(out)
            })
        }
        ValueType::Float => {
            let out: Vec<f64> = v.float_elements()?.iter().map(|x| -x).collect();
            Ok(if out.len() == 1 {
                Value::float(out[0])
            } else {
                Value::float_vec(out)
            })
        }
        t => Err(ScriptError::new(
            ErrorKind::Type,
            format!("operand of unary '-' cannot be type {t}"),
        )),
    }
}

pub(crate) fn unary_not(v: &Value) -> ScriptResult<Value> {
    if v.is_null() {
        return Err(ScriptError::new(
            ErrorKind::Type,
            "operand of '!' may not be NULL",
        ));
    }
    let out: Vec<bool> = v.logical_elements()?.iter().map(|b| !b).collect();
    Ok(Value::logical_vec(out))
}

/// The `:` operator. Integer endpoints yield a contiguous int vector
/// (ascending or descending); a float endpoint yields floats stepping
/// by one. NAN or infinite endpoints raise.
pub(crate) fn range_values(l: &Value, r: &Value) -> ScriptResult<Value> {
    reject_null_operand(":", l, r)?;
    reject_object_operand(":", l, r)?;
    if l.count() != 1 || r.count() != 1 {
        return Err(ScriptError::new(
            ErrorKind::Shape,
            "operands of ':' must be singletons",
        ));
    }

    let int_range = l.value_type() != ValueType::Float && r.value_type() != ValueType::Float;
    if int_range {
        let a = l.int_at(0)?;
        let b = r.int_at(0)?;
        let n = a.abs_diff(b) as usize + 1;
        check_range_size(n)?;
        let mut out = Vec::with_capacity(n);
        if a <= b {
            out.extend(a..=b);
        } else {
            out.extend((b..=a).rev());
        }
        return Ok(if out.len() == 1 {
            Value::int(out[0])
        } else {
            Value::int_vec(out)
        });
    }

    let a = l.float_at(0)?;
    let b = r.float_at(0)?;
    if a.is_nan() || b.is_nan() || a.is_infinite() || b.is_infinite() {
        return Err(ScriptError::new(
            ErrorKind::Numeric,
            "range endpoints must be finite",
        ));
    }
    let n = (a - b).abs().floor() as usize + 1;
    check_range_size(n)?;
    let step = if a <= b { 1.0 } else { -1.0 };
    let out: Vec<f64> = (0..n).map(|i| a + step * i as f64).collect();
    Ok(if out.len() == 1 {
        Value::float(out[0])
    } else {
        Value::float_vec(out)
    })
}

fn check_range_size(n: usize) -> ScriptResult<()> {
    const MAX_RANGE: usize = 100_000_000;
    if n > MAX_RANGE {
        return Err(ScriptError::new(
            ErrorKind::Numeric,
            format!("range of {n} elements exceeds the maximum of {MAX_RANGE}"),
        ));
    }
    Ok(())
}

/// Resolve a subscript index value into element positions of `target`.
fn resolve_indices(target: &Value, index: &Value) -> ScriptResult<Vec<usize>> {
    match index.value_type() {
        ValueType::Null => Err(ScriptError::new(
            ErrorKind::Type,
            "NULL cannot be used as an index",
        )),
        ValueType::Logical => {
            if index.count() != target.count() {
                return Err(ScriptError::new(
                    ErrorKind::Shape,
                    format!(
                        "logical index of size {} does not match value of size {}",
                        index.count(),
                        target.count()
                    ),
                ));
            }
            let mut positions = Vec::new();
            for i in 0..index.count() {
                if index.logical_at(i)? {
                    positions.push(i);
                }
            }
            Ok(positions)
        }
        ValueType::Int | ValueType::Float => {
            let mut positions = Vec::with_capacity(index.count());
            for i in 0..index.count() {
                let raw = index.int_at(i)?;
                if raw < 0 || raw as usize >= target.count() {
                    return Err(ScriptError::new(
                        ErrorKind::Shape,
                        format!(
                            "index {raw} out of range for value of size {}",
                            target.count()
                        ),
                    ));
                }
                positions.push(raw as usize);
            }
            Ok(positions)
        }
        t => Err(ScriptError::new(
            ErrorKind::Type,
            format!("{t} cannot be used as an index"),
        )),
    }
}

pub(crate) fn subscript_read(target: &Value, index: &Value) -> ScriptResult<Value> {
    if target.is_null() {
        // NULL subsets (including by NULL) to NULL
        return Ok(Value::null());
    }
    let positions = resolve_indices(target, index)?;
    if positions.is_empty() {
        return Ok(target.empty_like());
    }
    if positions.len() == 1 {
        return target.element_value(positions[0]);
    }
    let parts: ScriptResult<Vec<Value>> =
        positions.iter().map(|&i| target.element_value(i)).collect();
    crate::value::concat(&parts?)
}

/// Subscripted assignment `x[idx] = v`. The stored value's count must be
/// 1 or the index count; int widens into a float target, nothing else
/// converts, and NULL never assigns.
pub(crate) fn subscript_assign(target: &mut Value, index: &Value, rhs: &Value) -> ScriptResult<()> {
    if rhs.is_null() {
        return Err(ScriptError::new(
            ErrorKind::Type,
            "NULL may not be assigned into a subscript",
        ));
    }
    let positions = resolve_indices(target, index)?;
    if rhs.count() != 1 && rhs.count() != positions.len() {
        return Err(ScriptError::new(
            ErrorKind::Shape,
            format!(
                "subscripted assignment requires a value of size 1 or {}, not {}",
                positions.len(),
                rhs.count()
            ),
        ));
    }

    let compatible = rhs.value_type() == target.value_type()
        || (target.value_type() == ValueType::Float && rhs.value_type() == ValueType::Int);
    if !compatible {
        return Err(ScriptError::new(
            ErrorKind::Type,
            format!(
                "cannot assign {} into a {} vector",
                rhs.value_type(),
                target.value_type()
            ),
        ));
    }

    target.ensure_vector();
    for (k, &p) in positions.iter().enumerate() {
        let src = bidx(k, rhs.count());
        match target.value_type() {
            ValueType::Logical => target.set_logical_at(p, rhs.logical_at(src)?)?,
            ValueType::Int => target.set_int_at(p, rhs.int_at(src)?)?,
            ValueType::Float => target.set_float_at(p, rhs.float_at(src)?)?,
            ValueType::String => target.set_string_at(p, rhs.string_at(src)?)?,
            ValueType::Object => {
                let elem = rhs.object_at(src)?;
                if target.object_class() != rhs.object_class() {
                    return Err(ScriptError::new(
                        ErrorKind::Type,
                        "cannot assign objects of a different class",
                    ));
                }
                target.set_object_at(p, elem)?;
            }
            ValueType::Null => unreachable!("null targets have no positions"),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::functions::FunctionRegistry;
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
    fn test_arithmetic_basics() {
        assert_eq!(eval("1 + 2;"), Value::int(3));
        assert_eq!(eval("2 * 3 + 4;"), Value::int(10));
        assert_eq!(eval("7 % 3;"), Value::float(1.0));
        assert_eq!(eval("1 / 2;"), Value::float(0.5));
        assert_eq!(eval("2 ^ 10;"), Value::float(1024.0));
        assert_eq!(eval("-2^2;"), Value::float(4.0));
    }

    #[test]
    fn test_int_float_promotion() {
        assert_eq!(eval("1 + 2.5;"), Value::float(3.5));
        assert_eq!(eval("T + 1;"), Value::int(2));
    }

    #[test]
    fn test_string_concatenation() {
        assert_eq!(eval("'a' + 'b';"), Value::string("ab"));
        assert_eq!(eval("'x=' + 5;"), Value::string("x=5"));
        assert_eq!(eval("1.5 + 's';"), Value::string("1.5s"));
    }

    #[test]
    fn test_vector_broadcast() {
        assert_eq!(eval("(1:3) + 10;"), Value::int_vec(vec![11, 12, 13]));
        assert_eq!(eval("(15:13)+(0:2);"), Value::int_vec(vec![15, 15, 15]));
    }

    #[test]
    fn test_length_mismatch_raises() {
        let err = eval_err("(15:12)+(0:2);");
        assert_eq!(err.kind, ErrorKind::Shape);
        assert!(err.message.contains("operator requires that either"));
    }

    #[test]
    fn test_integer_overflow() {
        let err = eval_err("9223372036854775807 + 1;");
        assert_eq!(err.kind, ErrorKind::Numeric);
        let err = eval_err("-9223372036854775807 - 2;");
        assert_eq!(err.kind, ErrorKind::Numeric);
    }

    #[test]
    fn test_division_semantics() {
        assert_eq!(eval("1/0;"), Value::float(f64::INFINITY));
        assert_eq!(eval("-1/0;"), Value::float(f64::NEG_INFINITY));
        assert!(eval("0/0;").float_at(0).unwrap().is_nan());
    }

    #[test]
    fn test_null_operand_rejected() {
        let err = eval_err("NULL + 1;");
        assert_eq!(err.kind, ErrorKind::Type);
        let err = eval_err("NULL == 1;");
        assert!(err.message.contains("testing NULL"));
    }

    #[test]
    fn test_comparisons() {
        assert_eq!(eval("1 < 2;"), Value::logical_vec(vec![true]));
        assert_eq!(eval("'a' < 'b';"), Value::logical_vec(vec![true]));
        assert_eq!(eval("1 == 1.0;"), Value::logical_vec(vec![true]));
        assert_eq!(eval("(1:3) >= 2;"), Value::logical_vec(vec![false, true, true]));
        // NaN compares unequal to everything, including itself
        assert_eq!(eval("NAN == NAN;"), Value::logical_vec(vec![false]));
        assert_eq!(eval("NAN != NAN;"), Value::logical_vec(vec![true]));
    }

    #[test]
    fn test_logical_operators() {
        assert_eq!(eval("T & F;"), Value::logical_vec(vec![false]));
        assert_eq!(eval("T | F;"), Value::logical_vec(vec![true]));
        assert_eq!(eval("!T;"), Value::logical_vec(vec![false]));
        assert_eq!(
            eval("c(T,T,F) & c(T,F,F);"),
            Value::logical_vec(vec![true, false, false])
        );
    }

    #[test]
    fn test_ranges() {
        assert_eq!(eval("1:5;"), Value::int_vec(vec![1, 2, 3, 4, 5]));
        assert_eq!(eval("5:1;"), Value::int_vec(vec![5, 4, 3, 2, 1]));
        assert_eq!(eval("1.5:3.0;"), Value::float_vec(vec![1.5, 2.5]));
        let err = eval_err("1:INF;");
        assert_eq!(err.kind, ErrorKind::Numeric);
        let err = eval_err("NAN:3;");
        assert_eq!(err.kind, ErrorKind::Numeric);
    }

    #[test]
    fn test_subscripts() {
        assert_eq!(eval("x = 10:20; x[0];"), Value::int(10));
        assert_eq!(eval("x = 10:20; x[c(0,2)];"), Value::int_vec(vec![10, 12]));
        assert_eq!(eval("x = 1:3; x[x > 1];"), Value::int_vec(vec![2, 3]));
        assert_eq!(eval("x = 1:3; x[1.9];"), Value::int(2));
        // empty index yields an empty of the same type
        let v = eval("x = 1:3; x[integer(0)];");
        assert_eq!(v.value_type(), ValueType::Int);
        assert_eq!(v.count(), 0);
    }

    #[test]
    fn test_subscript_errors() {
        let err = eval_err("x = 1:3; x[5];");
        assert_eq!(err.kind, ErrorKind::Shape);
        let err = eval_err("x = 1:3; x[NULL];");
        assert_eq!(err.kind, ErrorKind::Type);
        let err = eval_err("x = 1:3; x[c(T,F)];");
        assert_eq!(err.kind, ErrorKind::Shape);
    }

    #[test]
    fn test_null_subscript_of_null() {
        assert!(eval("NULL[NULL];").is_null());
    }

    #[test]
    fn test_subscript_assignment() {
        assert_eq!(
            eval("x = 1:5; x[x % 2 == 1.0] = 10; x;"),
            Value::int_vec(vec![10, 2, 10, 4, 10])
        );
        assert_eq!(eval("x = 1:3; x[1] = 9; x;"), Value::int_vec(vec![1, 9, 3]));
        // int widens into a float target
        assert_eq!(
            eval("x = c(1.5, 2.5); x[0] = 2; x;"),
            Value::float_vec(vec![2.0, 2.5])
        );
    }

    #[test]
    fn test_subscript_assignment_errors() {
        let err = eval_err("x = 1:3; x[0] = NULL;");
        assert_eq!(err.kind, ErrorKind::Type);
        let err = eval_err("x = 1:3; x[0] = 1.5;");
        assert_eq!(err.kind, ErrorKind::Type);
        let err = eval_err("x = 1:4; x[c(0,1,2)] = c(1,2);");
        assert_eq!(err.kind, ErrorKind::Shape);
    }

    #[test]
    fn test_control_flow() {
        assert_eq!(eval("x = 0; if (T) x = 1; else x = 2; x;"), Value::int(1));
        assert_eq!(eval("x = 0; while (x < 5) x = x + 1; x;"), Value::int(5));
        assert_eq!(eval("x = 0; do x = x + 1; while (x < 3); x;"), Value::int(3));
        assert_eq!(eval("s = 0; for (i in 1:10) s = s + i; s;"), Value::int(55));
    }

    #[test]
    fn test_next_and_break() {
        assert_eq!(
            eval("s = 0; for (i in 1:10) { if (i % 2 == 0.0) next; s = s + i; } s;"),
            Value::int(25)
        );
        assert_eq!(
            eval("s = 0; for (i in 1:10) { if (i == 4) break; s = s + i; } s;"),
            Value::int(6)
        );
    }

    #[test]
    fn test_return_unwinds_block() {
        assert_eq!(eval("for (i in 1:10) { if (i == 3) return i * 100; } 0;"), Value::int(300));
    }

    #[test]
    fn test_condition_shape() {
        let err = eval_err("if (c(T, T)) 1;");
        assert_eq!(err.kind, ErrorKind::Shape);
        let err = eval_err("if (NAN) 1;");
        assert_eq!(err.kind, ErrorKind::Type);
    }

    #[test]
    fn test_assignment_invisible() {
        let v = eval("x = 3;");
        assert!(v.is_null());
        assert!(v.invisible());
        // but reading the variable back is visible
        assert!(!eval("x = 3; x;").invisible());
    }

    #[test]
    fn test_assignment_to_constant() {
        let err = eval_err("T = F;");
        assert_eq!(err.kind, ErrorKind::Name);
        let err = eval_err("PI = 3;");
        assert_eq!(err.kind, ErrorKind::Name);
    }

    #[test]
    fn test_undefined_identifier_position() {
        let err = eval_err("1 + nope;");
        assert_eq!(err.kind, ErrorKind::Name);
        assert_eq!(err.position, Some(4));
    }

    #[test]
    fn test_object_comparison() {
        use crate::object::testing::TestCounter;
        let mut it = interp();
        let a: Rc<dyn crate::object::HostObject> = Rc::new(TestCounter::new(1));
        it.symbols.set("a", Value::object(Rc::clone(&a))).unwrap();
        it.symbols.set("b", Value::object(a)).unwrap();
        it.symbols
            .set("c", Value::object(Rc::new(TestCounter::new(1))))
            .unwrap();
        assert_eq!(it.evaluate_source("a == b;").unwrap(), Value::logical_vec(vec![true]));
        assert_eq!(it.evaluate_source("a == c;").unwrap(), Value::logical_vec(vec![false]));
        let err = it.evaluate_source("a < b;").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Type);
        let err = it.evaluate_source("a == 1;").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Type);
    }

    #[test]
    fn test_property_and_method_access() {
        use crate::object::testing::TestCounter;
        let mut it = interp();
        it.symbols
            .set("counter", Value::object(Rc::new(TestCounter::new(11))))
            .unwrap();
        assert_eq!(it.evaluate_source("counter.id;").unwrap(), Value::int(11));
        assert_eq!(it.evaluate_source("counter.increment(4);").unwrap(), Value::int(4));
        assert_eq!(it.evaluate_source("counter.value;").unwrap(), Value::int(4));
        it.evaluate_source("counter.value = 100;").unwrap();
        assert_eq!(it.evaluate_source("counter.value;").unwrap(), Value::int(100));
        let err = it.evaluate_source("counter.nothing;").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Name);
    }
}
