//! Per-enumeration execution state: the caller's parameter values and the
//! value sets bound by pre-steps.

use std::collections::HashMap;

use crate::datatype::Value;
use crate::error::{Result, SearchlinkError};
use crate::model::NameHasher;

/// Named values supplied by the caller when a compiled query is enumerated.
#[derive(Debug, Clone, Default)]
pub struct Parameters {
    values: HashMap<String, Value, NameHasher>,
}

impl Parameters {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.values.insert(name.to_string(), value.into());
        self
    }
    pub fn set(&mut self, name: &str, value: impl Into<Value>) {
        self.values.insert(name.to_string(), value.into());
    }
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }
}

/// Owned by exactly one enumeration and dropped with it, so bindings never
/// leak between enumerations of the same compiled query.
#[derive(Debug)]
pub struct QueryContext {
    parameters: Parameters,
    bound: HashMap<String, Vec<Value>, NameHasher>,
}

impl QueryContext {
    pub fn new(parameters: Parameters) -> Self {
        Self { parameters, bound: HashMap::default() }
    }
    pub fn parameter(&self, name: &str) -> Result<&Value> {
        self.parameters
            .get(name)
            .ok_or_else(|| SearchlinkError::Execution(format!("no value supplied for parameter @{name}")))
    }
    /// Stores the value set for `name`, replacing any earlier binding.
    pub fn bind(&mut self, name: &str, values: Vec<Value>) {
        self.bound.insert(name.to_string(), values);
    }
    /// The value set bound under `name`. Resolving a name nothing has bound
    /// means the execution chain was assembled in the wrong order.
    pub fn resolve(&self, name: &str) -> Result<&[Value]> {
        self.bound.get(name).map(Vec::as_slice).ok_or_else(|| {
            SearchlinkError::Invariant(format!("parameter '{name}' resolved before it was bound"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_overwrites_and_resolve_requires_bind() {
        let mut ctx = QueryContext::new(Parameters::new());
        assert!(matches!(ctx.resolve("ids"), Err(SearchlinkError::Invariant(_))));
        ctx.bind("ids", vec![Value::from("A")]);
        ctx.bind("ids", vec![Value::from("B"), Value::from("C")]);
        assert_eq!(ctx.resolve("ids").unwrap(), &[Value::from("B"), Value::from("C")]);
    }

    #[test]
    fn missing_caller_parameters_are_execution_errors() {
        let ctx = QueryContext::new(Parameters::new().with("city", "London"));
        assert_eq!(ctx.parameter("city").unwrap(), &Value::from("London"));
        assert!(matches!(ctx.parameter("country"), Err(SearchlinkError::Execution(_))));
    }
}
