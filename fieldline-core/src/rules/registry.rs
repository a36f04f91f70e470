//! Registry of operator-supplied named functions for `custom` rules.

use crate::error::RuleFailure;
use crate::types::value_to_text;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// A named function invoked by a `custom` rule with the rule's source values
/// and declared parameters.
pub trait CustomFunction: Send + Sync {
    fn call(&self, args: &[Value], params: &Map<String, Value>) -> Result<Value, RuleFailure>;
}

impl<F> CustomFunction for F
where
    F: Fn(&[Value], &Map<String, Value>) -> Result<Value, RuleFailure> + Send + Sync,
{
    fn call(&self, args: &[Value], params: &Map<String, Value>) -> Result<Value, RuleFailure> {
        self(args, params)
    }
}

/// Functions available to `custom` rules, checked when the rule set compiles.
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, Arc<dyn CustomFunction>>,
}

impl std::fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.functions.keys().collect();
        names.sort();
        f.debug_struct("FunctionRegistry")
            .field("functions", &names)
            .finish()
    }
}

impl FunctionRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the built-in text helpers:
    /// `upper`, `lower`, `trim`, `coalesce`, `default_if_empty`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("upper", map_text(|s| s.to_uppercase()));
        registry.register("lower", map_text(|s| s.to_lowercase()));
        registry.register("trim", map_text(|s| s.trim().to_string()));
        registry.register(
            "coalesce",
            |args: &[Value], _: &Map<String, Value>| -> Result<Value, RuleFailure> {
                Ok(args.iter().find(|v| !v.is_null()).cloned().unwrap_or(Value::Null))
            },
        );
        registry.register(
            "default_if_empty",
            |args: &[Value], params: &Map<String, Value>| -> Result<Value, RuleFailure> {
                let first = args.first().cloned().unwrap_or(Value::Null);
                if value_to_text(&first).trim().is_empty() {
                    Ok(params.get("value").cloned().unwrap_or(Value::Null))
                } else {
                    Ok(first)
                }
            },
        );
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, function: impl CustomFunction + 'static) {
        self.functions.insert(name.into(), Arc::new(function));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn CustomFunction>> {
        self.functions.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

/// Apply a text mapping to the first argument; null stays null.
fn map_text(
    f: fn(&str) -> String,
) -> impl Fn(&[Value], &Map<String, Value>) -> Result<Value, RuleFailure> + Send + Sync {
    move |args: &[Value], _: &Map<String, Value>| match args.first() {
        None | Some(Value::Null) => Ok(Value::Null),
        Some(Value::String(s)) => Ok(Value::String(f(s))),
        Some(other) => Ok(Value::String(f(&value_to_text(other)))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builtins() {
        let registry = FunctionRegistry::with_builtins();
        let none = Map::new();
        let upper = registry.get("upper").unwrap();
        assert_eq!(upper.call(&[json!("abc")], &none).unwrap(), json!("ABC"));
        assert_eq!(upper.call(&[Value::Null], &none).unwrap(), Value::Null);

        let coalesce = registry.get("coalesce").unwrap();
        assert_eq!(
            coalesce
                .call(&[Value::Null, json!("b"), json!("c")], &none)
                .unwrap(),
            json!("b")
        );

        let mut params = Map::new();
        params.insert("value".into(), json!("n/a"));
        let fallback = registry.get("default_if_empty").unwrap();
        assert_eq!(fallback.call(&[json!(" ")], &params).unwrap(), json!("n/a"));
        assert_eq!(fallback.call(&[json!("x")], &params).unwrap(), json!("x"));
    }

    #[test]
    fn test_register_closure() {
        let mut registry = FunctionRegistry::new();
        registry.register(
            "fail",
            |_: &[Value], _: &Map<String, Value>| -> Result<Value, RuleFailure> {
                Err(RuleFailure::Custom {
                    function: "fail".into(),
                    message: "always".into(),
                })
            },
        );
        assert!(registry.contains("fail"));
        assert!(!registry.contains("upper"));
        let err = registry.get("fail").unwrap().call(&[], &Map::new()).unwrap_err();
        assert!(matches!(err, RuleFailure::Custom { .. }));
    }
}
