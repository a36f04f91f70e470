//! Declarative rule model, deserialized from configuration.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One transformation bound to a single target field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformRule {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Ordered source field names.
    #[serde(default)]
    pub sources: Vec<String>,
    pub target: String,
    pub transform: TransformKind,
    /// Guard conditions; all must hold for the rule to apply.
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Higher priorities are evaluated first.
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Written to the target when the rule fails.
    #[serde(default)]
    pub default: Option<Value>,
    #[serde(default)]
    pub tags: Vec<String>,
}

fn default_enabled() -> bool {
    true
}

impl TransformRule {
    pub fn new(
        id: impl Into<String>,
        sources: Vec<String>,
        target: impl Into<String>,
        transform: TransformKind,
    ) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            sources,
            target: target.into(),
            transform,
            conditions: Vec::new(),
            priority: 0,
            enabled: true,
            default: None,
            tags: Vec::new(),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Kinds that generate a value without reading source fields.
    pub fn is_generator(&self) -> bool {
        matches!(
            self.transform,
            TransformKind::Constant { .. } | TransformKind::Custom { .. }
        )
    }
}

/// What a rule computes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransformKind {
    /// Copy the single source field.
    DirectCopy,
    /// Join all sources; null and missing become "".
    Concatenate {
        #[serde(default)]
        separator: String,
    },
    /// Reference-table lookup keyed by the first source.
    Lookup {
        table: String,
        /// Used on a miss instead of failing.
        #[serde(default)]
        default: Option<Value>,
    },
    Calculation {
        calculation: Calculation,
    },
    /// Capture group of a pattern applied to the first source.
    PatternExtract {
        pattern: String,
        /// Defaults to 1 (or the whole match when the pattern has no groups).
        #[serde(default)]
        group: Option<usize>,
    },
    Conditional {
        branches: Vec<Branch>,
        #[serde(default)]
        otherwise: Option<BranchValue>,
    },
    /// A registered named function over the source values.
    Custom {
        function: String,
        #[serde(default)]
        params: serde_json::Map<String, Value>,
    },
    Constant {
        value: Value,
    },
}

impl TransformKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::DirectCopy => "direct_copy",
            Self::Concatenate { .. } => "concatenate",
            Self::Lookup { .. } => "lookup",
            Self::Calculation { .. } => "calculation",
            Self::PatternExtract { .. } => "pattern_extract",
            Self::Conditional { .. } => "conditional",
            Self::Custom { .. } => "custom",
            Self::Constant { .. } => "constant",
        }
    }
}

/// Arithmetic and aggregation over source values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Calculation {
    /// Parse a localized decimal string from the first source.
    ParseDecimal {
        #[serde(default = "default_thousands")]
        thousands_separator: String,
        #[serde(default = "default_decimal")]
        decimal_separator: String,
    },
    Sum,
    Product,
    Mean,
    Min,
    Max,
    /// Arithmetic over `{field}` references, e.g. `{price} * {qty} - {discount}`.
    Expression {
        formula: String,
    },
}

fn default_thousands() -> String {
    ",".to_string()
}
fn default_decimal() -> String {
    ".".to_string()
}

impl Calculation {
    pub fn parse_decimal() -> Self {
        Self::ParseDecimal {
            thousands_separator: default_thousands(),
            decimal_separator: default_decimal(),
        }
    }
}

/// A field/operator/value triple.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,
    pub op: ConditionOp,
    #[serde(default)]
    pub value: Value,
}

impl Condition {
    pub fn new(field: impl Into<String>, op: ConditionOp, value: Value) -> Self {
        Self {
            field: field.into(),
            op,
            value,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    NotIn,
    Contains,
    StartsWith,
    EndsWith,
    Matches,
    IsNull,
    IsNotNull,
}

/// Boolean combination of conditions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionTree {
    All(Vec<ConditionTree>),
    Any(Vec<ConditionTree>),
    Not(Box<ConditionTree>),
    Field(Condition),
}

/// One arm of a conditional rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Branch {
    pub when: ConditionTree,
    pub then: BranchValue,
}

/// What a conditional arm produces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BranchValue {
    Literal { value: Value },
    /// Value of another field of the row.
    Field { name: String },
    /// A nested transform over the rule's sources.
    Transform { transform: Box<TransformKind> },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_transform_kind_tagging() {
        let kind: TransformKind = serde_json::from_value(json!({
            "kind": "calculation",
            "calculation": { "op": "parse_decimal" }
        }))
        .unwrap();
        assert_eq!(
            kind,
            TransformKind::Calculation {
                calculation: Calculation::parse_decimal()
            }
        );
        assert_eq!(kind.name(), "calculation");
    }

    #[test]
    fn test_conditional_from_toml() {
        let text = r#"
            id = "tier"
            sources = ["amount"]
            target = "tier"

            [transform]
            kind = "conditional"
            otherwise = { type = "literal", value = "standard" }

            [[transform.branches]]
            when = { field = { field = "amount", op = "gte", value = 1000 } }
            then = { type = "literal", value = "gold" }
        "#;
        let rule: TransformRule = toml::from_str(text).unwrap();
        assert!(rule.enabled);
        let TransformKind::Conditional { branches, otherwise } = &rule.transform else {
            panic!("expected conditional");
        };
        assert_eq!(branches.len(), 1);
        assert!(matches!(
            &branches[0].when,
            ConditionTree::Field(c) if c.op == ConditionOp::Gte
        ));
        assert_eq!(
            otherwise,
            &Some(BranchValue::Literal {
                value: json!("standard")
            })
        );
    }

    #[test]
    fn test_generator_kinds() {
        let constant = TransformRule::new(
            "c",
            Vec::new(),
            "t",
            TransformKind::Constant { value: json!(1) },
        );
        assert!(constant.is_generator());
        let copy = TransformRule::new("d", vec!["a".into()], "t", TransformKind::DirectCopy);
        assert!(!copy.is_generator());
    }
}
