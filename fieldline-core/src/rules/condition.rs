//! Guard and branch condition evaluation.

use crate::error::ConfigError;
use crate::rules::model::{Condition, ConditionOp, ConditionTree};
use crate::types::{value_as_f64, value_to_text};
use regex::Regex;
use serde_json::Value;
use std::cmp::Ordering;

static NULL: Value = Value::Null;

/// Equality with numeric coercion: `"10"` equals `10`.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    if a.is_null() || b.is_null() {
        return a.is_null() && b.is_null();
    }
    match (value_as_f64(a), value_as_f64(b)) {
        (Some(x), Some(y)) if !matches!((a, b), (Value::Bool(_), _) | (_, Value::Bool(_))) => {
            x == y
        }
        _ => value_to_text(a) == value_to_text(b),
    }
}

/// Numeric ordering when both sides are numeric, text ordering when
/// neither is. `None` for nulls and mixed numeric/text pairs.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    if a.is_null() || b.is_null() {
        return None;
    }
    match (value_as_f64(a), value_as_f64(b)) {
        (Some(x), Some(y)) => x.partial_cmp(&y),
        (None, None) => Some(value_to_text(a).cmp(&value_to_text(b))),
        _ => None,
    }
}

/// A condition with its pattern compiled.
#[derive(Debug, Clone)]
pub struct CompiledCondition {
    field: String,
    op: ConditionOp,
    value: Value,
    regex: Option<Regex>,
}

impl CompiledCondition {
    pub fn compile(condition: &Condition, owner: &str) -> Result<Self, ConfigError> {
        let regex = match condition.op {
            ConditionOp::Matches => {
                let pattern = condition.value.as_str().ok_or_else(|| ConfigError::InvalidRule {
                    rule_id: owner.to_string(),
                    reason: format!("'matches' on '{}' needs a string pattern", condition.field),
                })?;
                Some(Regex::new(pattern).map_err(|e| ConfigError::InvalidPattern {
                    rule_id: owner.to_string(),
                    message: e.to_string(),
                })?)
            }
            ConditionOp::In | ConditionOp::NotIn if !condition.value.is_array() => {
                return Err(ConfigError::InvalidRule {
                    rule_id: owner.to_string(),
                    reason: format!("'in' on '{}' needs an array value", condition.field),
                });
            }
            _ => None,
        };
        Ok(Self {
            field: condition.field.clone(),
            op: condition.op,
            value: condition.value.clone(),
            regex,
        })
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    /// Evaluate against a row; `resolve` returns `None` for absent fields.
    pub fn evaluate<'a>(&self, resolve: &dyn Fn(&str) -> Option<&'a Value>) -> bool {
        let actual = resolve(&self.field).unwrap_or(&NULL);
        let expected = &self.value;
        match self.op {
            ConditionOp::IsNull => actual.is_null(),
            ConditionOp::IsNotNull => !actual.is_null(),
            ConditionOp::Eq => values_equal(actual, expected),
            ConditionOp::Ne => !values_equal(actual, expected),
            ConditionOp::Gt => compare_values(actual, expected) == Some(Ordering::Greater),
            ConditionOp::Gte => matches!(
                compare_values(actual, expected),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            ConditionOp::Lt => compare_values(actual, expected) == Some(Ordering::Less),
            ConditionOp::Lte => matches!(
                compare_values(actual, expected),
                Some(Ordering::Less | Ordering::Equal)
            ),
            ConditionOp::In => in_list(actual, expected),
            ConditionOp::NotIn => !in_list(actual, expected),
            ConditionOp::Contains => {
                !actual.is_null() && value_to_text(actual).contains(&value_to_text(expected))
            }
            ConditionOp::StartsWith => {
                !actual.is_null() && value_to_text(actual).starts_with(&value_to_text(expected))
            }
            ConditionOp::EndsWith => {
                !actual.is_null() && value_to_text(actual).ends_with(&value_to_text(expected))
            }
            ConditionOp::Matches => match &self.regex {
                Some(regex) => !actual.is_null() && regex.is_match(&value_to_text(actual)),
                None => false,
            },
        }
    }
}

fn in_list(actual: &Value, list: &Value) -> bool {
    list.as_array()
        .is_some_and(|items| items.iter().any(|item| values_equal(actual, item)))
}

/// Compiled boolean tree.
#[derive(Debug, Clone)]
pub enum CompiledTree {
    All(Vec<CompiledTree>),
    Any(Vec<CompiledTree>),
    Not(Box<CompiledTree>),
    Leaf(CompiledCondition),
}

impl CompiledTree {
    pub fn compile(tree: &ConditionTree, owner: &str) -> Result<Self, ConfigError> {
        Ok(match tree {
            ConditionTree::All(items) => Self::All(
                items
                    .iter()
                    .map(|t| Self::compile(t, owner))
                    .collect::<Result<_, _>>()?,
            ),
            ConditionTree::Any(items) => Self::Any(
                items
                    .iter()
                    .map(|t| Self::compile(t, owner))
                    .collect::<Result<_, _>>()?,
            ),
            ConditionTree::Not(inner) => Self::Not(Box::new(Self::compile(inner, owner)?)),
            ConditionTree::Field(condition) => {
                Self::Leaf(CompiledCondition::compile(condition, owner)?)
            }
        })
    }

    /// `All([])` is true, `Any([])` is false.
    pub fn evaluate<'a>(&self, resolve: &dyn Fn(&str) -> Option<&'a Value>) -> bool {
        match self {
            Self::All(items) => items.iter().all(|t| t.evaluate(resolve)),
            Self::Any(items) => items.iter().any(|t| t.evaluate(resolve)),
            Self::Not(inner) => !inner.evaluate(resolve),
            Self::Leaf(condition) => condition.evaluate(resolve),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Record;
    use serde_json::json;

    fn row() -> Record {
        let mut r = Record::new();
        r.insert("amount".into(), json!("1500"));
        r.insert("country".into(), json!("DE"));
        r.insert("email".into(), json!("jane@example.com"));
        r.insert("note".into(), Value::Null);
        r
    }

    fn check(field: &str, op: ConditionOp, value: Value) -> bool {
        let record = row();
        let resolve = |name: &str| record.get(name);
        CompiledCondition::compile(&Condition::new(field, op, value), "test")
            .unwrap()
            .evaluate(&resolve)
    }

    #[test]
    fn test_numeric_coercion() {
        assert!(check("amount", ConditionOp::Eq, json!(1500)));
        assert!(check("amount", ConditionOp::Gt, json!(1000)));
        assert!(check("amount", ConditionOp::Lte, json!("1500")));
        assert!(!check("amount", ConditionOp::Lt, json!(100)));
    }

    #[test]
    fn test_null_handling() {
        assert!(check("note", ConditionOp::IsNull, Value::Null));
        assert!(check("missing", ConditionOp::IsNull, Value::Null));
        assert!(check("amount", ConditionOp::IsNotNull, Value::Null));
        assert!(!check("note", ConditionOp::Gt, json!(0)));
        assert!(!check("note", ConditionOp::Contains, json!("")));
    }

    #[test]
    fn test_text_ops() {
        assert!(check("country", ConditionOp::In, json!(["FR", "DE"])));
        assert!(check("country", ConditionOp::NotIn, json!(["US"])));
        assert!(check("email", ConditionOp::EndsWith, json!("@example.com")));
        assert!(check("email", ConditionOp::StartsWith, json!("jane")));
        assert!(check("email", ConditionOp::Matches, json!(r"^[a-z]+@")));
    }

    #[test]
    fn test_compile_errors() {
        let bad_regex = Condition::new("a", ConditionOp::Matches, json!("("));
        assert!(matches!(
            CompiledCondition::compile(&bad_regex, "r"),
            Err(ConfigError::InvalidPattern { .. })
        ));
        let bad_in = Condition::new("a", ConditionOp::In, json!("x"));
        assert!(matches!(
            CompiledCondition::compile(&bad_in, "r"),
            Err(ConfigError::InvalidRule { .. })
        ));
    }

    #[test]
    fn test_tree() {
        let tree = ConditionTree::All(vec![
            ConditionTree::Field(Condition::new("country", ConditionOp::Eq, json!("DE"))),
            ConditionTree::Not(Box::new(ConditionTree::Field(Condition::new(
                "amount",
                ConditionOp::Lt,
                json!(1000),
            )))),
        ]);
        let compiled = CompiledTree::compile(&tree, "t").unwrap();
        let record = row();
        assert!(compiled.evaluate(&|name| record.get(name)));
        assert!(!CompiledTree::Any(Vec::new()).evaluate(&|name| record.get(name)));
    }
}
