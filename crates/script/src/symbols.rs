//! Scoped symbol tables with a protected constants table.
//!
//! Lookup walks from the innermost scope outward and falls back to the
//! constants table. `T F NULL INF NAN E PI` are pre-defined constants;
//! assigning to any constant raises, and `defineConstant` promotes a
//! name into the constants table permanently.

use std::collections::HashMap;

use crate::error::{ErrorKind, ScriptError, ScriptResult};
use crate::value::Value;

pub struct SymbolTable {
    scopes: Vec<HashMap<String, Value>>,
    constants: HashMap<String, Value>,
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolTable {
    pub fn new() -> Self {
        let mut constants = HashMap::new();
        constants.insert("T".to_string(), Value::logical(true));
        constants.insert("F".to_string(), Value::logical(false));
        constants.insert("NULL".to_string(), Value::null());
        constants.insert("INF".to_string(), Value::float(f64::INFINITY));
        constants.insert("NAN".to_string(), Value::float(f64::NAN));
        constants.insert("E".to_string(), Value::float(std::f64::consts::E));
        constants.insert("PI".to_string(), Value::float(std::f64::consts::PI));
        Self {
            scopes: vec![HashMap::new()],
            constants,
        }
    }

    /// Open a transient inner scope (used by `apply`).
    pub fn push_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    pub fn pop_scope(&mut self) {
        debug_assert!(self.scopes.len() > 1, "cannot pop the global scope");
        self.scopes.pop();
    }

    pub fn is_constant(&self, name: &str) -> bool {
        self.constants.contains_key(name)
    }

    /// Look up a name, innermost scope first, then constants. The
    /// returned value is a copy with the invisible flag cleared.
    pub fn lookup(&self, name: &str) -> Option<Value> {
        for scope in self.scopes.iter().rev() {
            if let Some(v) = scope.get(name) {
                return Some(v.to_visible());
            }
        }
        self.constants.get(name).map(Value::to_visible)
    }

    /// Assign a variable. Writes to the scope that already binds the
    /// name, or the innermost scope when the name is new.
    pub fn set(&mut self, name: &str, value: Value) -> ScriptResult<()> {
        if self.is_constant(name) {
            return Err(ScriptError::new(
                ErrorKind::Name,
                format!("cannot assign to the constant {name}"),
            ));
        }
        for scope in self.scopes.iter_mut().rev() {
            if let Some(slot) = scope.get_mut(name) {
                *slot = value;
                return Ok(());
            }
        }
        self.scopes
            .last_mut()
            .expect("at least one scope")
            .insert(name.to_string(), value);
        Ok(())
    }

    /// Bind a name in the innermost scope, shadowing any outer binding.
    /// Used for transient bindings such as `applyValue` and the
    /// variables a host callback provides to its block.
    pub fn set_local(&mut self, name: &str, value: Value) -> ScriptResult<()> {
        if self.is_constant(name) {
            return Err(ScriptError::new(
                ErrorKind::Name,
                format!("cannot assign to the constant {name}"),
            ));
        }
        self.scopes
            .last_mut()
            .expect("at least one scope")
            .insert(name.to_string(), value);
        Ok(())
    }

    /// Promote a name into the constants table. The name may have been a
    /// variable (it is removed from the variable scopes); re-defining an
    /// existing constant raises.
    pub fn define_constant(&mut self, name: &str, value: Value) -> ScriptResult<()> {
        if self.is_constant(name) {
            return Err(ScriptError::new(
                ErrorKind::Name,
                format!("identifier {name} is already a constant"),
            ));
        }
        for scope in self.scopes.iter_mut() {
            scope.remove(name);
        }
        self.constants.insert(name.to_string(), value);
        Ok(())
    }

    /// Remove a variable. Constants refuse removal even when `force` is
    /// set; unknown names raise.
    pub fn remove(&mut self, name: &str, _force: bool) -> ScriptResult<()> {
        if self.is_constant(name) {
            return Err(ScriptError::new(
                ErrorKind::Name,
                format!("cannot remove the constant {name}"),
            ));
        }
        for scope in self.scopes.iter_mut().rev() {
            if scope.remove(name).is_some() {
                return Ok(());
            }
        }
        Err(ScriptError::new(
            ErrorKind::Name,
            format!("undefined identifier {name}"),
        ))
    }

}
