//! Expression interpreter interface and the default implementation.
//!
//! An interpreter is scoped to one logical row: callers `clear` it, bind the
//! row's variables, then `eval` field or attribute derivations.

use crate::error::Result;
use crate::values::{Attributes, SourceValues};
use std::collections::BTreeMap;
use vdir_mapping::{Derivation, Value};

pub trait Interpreter {
    /// Bind a variable. Names compare case-insensitively.
    fn set(&mut self, name: &str, values: Vec<Value>);

    /// Evaluate a derivation. `Ok(None)` means "no value".
    fn eval(&self, derivation: &Derivation) -> Result<Option<Vec<Value>>>;

    fn clear(&mut self);

    /// Bind every `<alias>.<field>` key.
    fn set_values(&mut self, values: &SourceValues) {
        for (key, vs) in values.iter() {
            self.set(key, vs.to_vec());
        }
    }

    /// Bind every logical attribute by name.
    fn set_attributes(&mut self, attributes: &Attributes) {
        for (name, vs) in attributes.iter() {
            self.set(name, vs.to_vec());
        }
    }
}

/// Creates one interpreter per operation.
pub trait InterpreterFactory: Send + Sync {
    fn create(&self) -> Box<dyn Interpreter>;
}

// ============================================================================
// Default interpreter
// ============================================================================

/// Evaluates constants, variables and `${name}` templates.
///
/// Templates use the first value of each referenced variable.
#[derive(Debug, Default, Clone)]
pub struct DefaultInterpreter {
    variables: BTreeMap<String, Vec<Value>>,
}

impl DefaultInterpreter {
    pub fn new() -> Self {
        Self::default()
    }

    fn lookup(&self, name: &str) -> Option<&Vec<Value>> {
        self.variables
            .get(&name.to_lowercase())
            .filter(|v| !v.is_empty())
    }
}

impl Interpreter for DefaultInterpreter {
    fn set(&mut self, name: &str, values: Vec<Value>) {
        self.variables.insert(name.to_lowercase(), values);
    }

    fn eval(&self, derivation: &Derivation) -> Result<Option<Vec<Value>>> {
        Ok(match derivation {
            Derivation::Constant(c) => Some(vec![Value::text(c.clone())]),
            Derivation::Variable(name) => self.lookup(name).cloned(),
            Derivation::Expression(template) => Derivation::expand_template(template, |name| {
                self.lookup(name)
                    .and_then(|vs| vs.first())
                    .map(|v| v.to_string())
            })
            .map(|s| vec![Value::Text(s)]),
        })
    }

    fn clear(&mut self) {
        self.variables.clear();
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultInterpreterFactory;

impl InterpreterFactory for DefaultInterpreterFactory {
    fn create(&self) -> Box<dyn Interpreter> {
        Box::new(DefaultInterpreter::new())
    }
}
