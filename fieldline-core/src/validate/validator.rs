//! Per-batch validation of transformed rows.

use crate::config::ValidationConfig;
use crate::error::{ConfigError, ValidationError};
use crate::rules::{ConditionOp, LookupRegistry, compare_values, values_equal};
use crate::types::{OutputRow, Record, value_as_f64, value_to_text};
use crate::validate::checks::{FieldFormat, check_format};
use crate::validate::metrics::{QualityCounts, QualityWeights};
use crate::validate::model::{CrossFieldRule, FieldRule, Severity, ValidationIssue, ValidationResult};
use serde_json::Value;
use std::cmp::Ordering;
use tracing::debug;

static NULL: Value = Value::Null;

/// Validates batches against declared field and cross-field rules.
///
/// Holds no mutable state, so one instance is shared by every worker.
#[derive(Debug, Clone)]
pub struct Validator {
    fields: Vec<FieldRule>,
    cross_field: Vec<CrossFieldRule>,
    strict: bool,
    weights: QualityWeights,
    lookups: LookupRegistry,
}

impl Validator {
    /// Build a validator, checking that every referenced lookup table is
    /// registered and every cross-field operator is a comparison.
    pub fn new(config: &ValidationConfig, lookups: LookupRegistry) -> Result<Self, ConfigError> {
        for rule in &config.fields {
            if rule.field.is_empty() {
                return Err(ConfigError::Invalid(
                    "validation field rule has an empty field name".into(),
                ));
            }
            if let Some(table) = &rule.reference_table {
                if !lookups.contains(table) {
                    return Err(ConfigError::UnknownLookupTable {
                        owner: format!("validation.{}", rule.field),
                        table: table.clone(),
                    });
                }
            }
            if let (Some(min), Some(max)) = (rule.min, rule.max) {
                if min > max {
                    return Err(ConfigError::Invalid(format!(
                        "validation.{}: min {min} exceeds max {max}",
                        rule.field
                    )));
                }
            }
        }
        for rule in &config.cross_field {
            if !is_comparison(rule.op) {
                return Err(ConfigError::Invalid(format!(
                    "cross-field rule {} {:?} {}: operator must be a comparison",
                    rule.left, rule.op, rule.right
                )));
            }
        }
        Ok(Self {
            fields: config.fields.clone(),
            cross_field: config.cross_field.clone(),
            strict: config.strict,
            weights: config.weights,
            lookups,
        })
    }

    pub fn weights(&self) -> &QualityWeights {
        &self.weights
    }

    /// Validate one batch. In strict mode the first error aborts with
    /// [`ValidationError::Strict`]; otherwise issues accumulate.
    pub fn validate(&self, rows: &[OutputRow]) -> Result<ValidationResult, ValidationError> {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        let mut counts = QualityCounts {
            rows: rows.len() as u64,
            ..QualityCounts::default()
        };

        for row in rows {
            let before = errors.len();
            for rule in &self.fields {
                let value = row.record.get(&rule.field).unwrap_or(&NULL);
                if rule.required {
                    counts.required_cells += 1;
                    if !value.is_null() {
                        counts.filled_required_cells += 1;
                    }
                }
                let Some(message) = self.check_field(rule, value) else {
                    continue;
                };
                let issue = ValidationIssue {
                    row: row.ordinal,
                    field: rule.field.clone(),
                    value: value.clone(),
                    message,
                };
                match rule.severity {
                    Severity::Error => {
                        if self.strict {
                            return Err(ValidationError::Strict {
                                row: issue.row,
                                field: issue.field,
                                message: issue.message,
                            });
                        }
                        errors.push(issue);
                    }
                    Severity::Warning => warnings.push(issue),
                }
            }
            if errors.len() > before {
                counts.error_rows += 1;
            }

            let contradictions = self.contradictions(row.ordinal, &row.record);
            if !contradictions.is_empty() {
                counts.contradicting_rows += 1;
                warnings.extend(contradictions);
            }
        }

        let metrics = counts.metrics(&self.weights);
        debug!(
            rows = metrics.rows,
            errors = errors.len(),
            warnings = warnings.len(),
            quality = metrics.quality_score,
            "Validated batch"
        );
        Ok(ValidationResult {
            valid: errors.is_empty(),
            errors,
            warnings,
            metrics,
        })
    }

    /// Type and format checks first; business rules only for values that
    /// pass them. Returns the first failure.
    fn check_field(&self, rule: &FieldRule, value: &Value) -> Option<String> {
        if value.is_null() {
            return rule.required.then(|| "required field is missing".to_string());
        }
        let text = value_to_text(value);

        if let Some(format) = rule.format {
            let numeric_value = format == FieldFormat::Numeric && value.is_number();
            if !numeric_value {
                let outcome = check_format(format, &text, rule.date_format.as_deref());
                if !outcome.ok {
                    return outcome.reason;
                }
            }
        }

        if rule.min.is_some() || rule.max.is_some() {
            let Some(n) = value_as_f64(value).filter(|_| !value.is_boolean()) else {
                return Some(format!("'{text}' is not numeric, cannot check range"));
            };
            if let Some(min) = rule.min {
                if n < min {
                    return Some(format!("{n} is below minimum {min}"));
                }
            }
            if let Some(max) = rule.max {
                if n > max {
                    return Some(format!("{n} is above maximum {max}"));
                }
            }
        }

        if !rule.allowed.is_empty() && !rule.allowed.iter().any(|a| values_equal(a, value)) {
            return Some(format!("'{text}' is not an allowed value"));
        }

        if let Some(table) = &rule.reference_table {
            let exists = self
                .lookups
                .get(table)
                .is_some_and(|source| source.contains(&text));
            if !exists {
                return Some(format!("'{text}' not found in reference table '{table}'"));
            }
        }
        None
    }

    fn contradictions(&self, row: u64, record: &Record) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        for rule in &self.cross_field {
            let (Some(left), Some(right)) = (record.get(&rule.left), record.get(&rule.right)) else {
                continue;
            };
            if left.is_null() || right.is_null() {
                continue;
            }
            let holds = match rule.op {
                ConditionOp::Eq => Some(values_equal(left, right)),
                ConditionOp::Ne => Some(!values_equal(left, right)),
                op => compare_values(left, right).map(|ord| ordering_holds(op, ord)),
            };
            // Incomparable pairs are not contradictions.
            if holds == Some(false) {
                let message = rule.message.clone().unwrap_or_else(|| {
                    format!(
                        "'{}' ({}) must be {:?} '{}' ({})",
                        rule.left,
                        value_to_text(left),
                        rule.op,
                        rule.right,
                        value_to_text(right)
                    )
                });
                issues.push(ValidationIssue {
                    row,
                    field: format!("{}/{}", rule.left, rule.right),
                    value: Value::Array(vec![left.clone(), right.clone()]),
                    message,
                });
            }
        }
        issues
    }
}

fn is_comparison(op: ConditionOp) -> bool {
    matches!(
        op,
        ConditionOp::Eq
            | ConditionOp::Ne
            | ConditionOp::Gt
            | ConditionOp::Gte
            | ConditionOp::Lt
            | ConditionOp::Lte
    )
}

fn ordering_holds(op: ConditionOp, ord: Ordering) -> bool {
    match op {
        ConditionOp::Gt => ord == Ordering::Greater,
        ConditionOp::Gte => ord != Ordering::Less,
        ConditionOp::Lt => ord == Ordering::Less,
        ConditionOp::Lte => ord != Ordering::Greater,
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::InMemoryLookup;
    use crate::validate::metrics::summarize;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Arc;

    fn row(ordinal: u64, record: Value) -> OutputRow {
        let Value::Object(record) = record else {
            panic!("record must be an object");
        };
        OutputRow {
            id: format!("out-{ordinal}"),
            inputs: vec![format!("in-{ordinal}")],
            source: "customers.csv".into(),
            ordinal,
            record,
        }
    }

    fn config(fields: Vec<FieldRule>) -> ValidationConfig {
        ValidationConfig {
            fields,
            ..ValidationConfig::default()
        }
    }

    #[test]
    fn test_clean_batch() {
        let validator = Validator::new(
            &config(vec![
                FieldRule::new("name").required(),
                FieldRule::new("amount")
                    .required()
                    .with_format(FieldFormat::Numeric),
            ]),
            LookupRegistry::new(),
        )
        .unwrap();
        let result = validator
            .validate(&[row(1, json!({"name": "Jane Doe", "amount": 1234.5}))])
            .unwrap();
        assert!(result.valid);
        assert!(result.errors.is_empty());
        assert_eq!(result.metrics.completeness, 1.0);
        assert_eq!(result.metrics.quality_score, 1.0);
    }

    #[test]
    fn test_missing_required_and_format_errors() {
        let validator = Validator::new(
            &config(vec![
                FieldRule::new("email")
                    .required()
                    .with_format(FieldFormat::Email),
                FieldRule::new("phone").with_format(FieldFormat::Phone).warning(),
            ]),
            LookupRegistry::new(),
        )
        .unwrap();
        let rows = [
            row(1, json!({"email": "jane@example.com", "phone": "555"})),
            row(2, json!({"email": null})),
            row(3, json!({"email": "not-an-email"})),
        ];
        let result = validator.validate(&rows).unwrap();
        assert!(!result.valid);
        assert_eq!(result.errors.len(), 2);
        assert_eq!(result.errors[0].row, 2);
        assert_eq!(result.errors[0].message, "required field is missing");
        assert_eq!(result.errors[1].value, json!("not-an-email"));
        assert_eq!(result.warnings.len(), 1);
        assert_eq!(result.warnings[0].field, "phone");

        let counts = result.metrics.counts;
        assert_eq!(counts.required_cells, 3);
        assert_eq!(counts.filled_required_cells, 2);
        assert_eq!(counts.error_rows, 2);
        assert!((result.metrics.completeness - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_business_rules_after_type_checks() {
        let mut lookups = LookupRegistry::new();
        let countries: InMemoryLookup = [("US", json!("United States")), ("DE", json!("Germany"))]
            .into_iter()
            .collect();
        lookups.register("countries", Arc::new(countries));

        let age = FieldRule::new("age")
            .with_format(FieldFormat::Numeric)
            .with_range(Some(0.0), Some(130.0));
        let mut status = FieldRule::new("status");
        status.allowed = vec![json!("active"), json!("closed")];
        let mut country = FieldRule::new("country");
        country.reference_table = Some("countries".into());

        let validator = Validator::new(&config(vec![age, status, country]), lookups).unwrap();
        let rows = [
            row(1, json!({"age": "42", "status": "active", "country": "US"})),
            row(2, json!({"age": "abc", "status": "gone", "country": "FR"})),
            row(3, json!({"age": 200})),
        ];
        let result = validator.validate(&rows).unwrap();
        let messages: Vec<(u64, &str)> = result
            .errors
            .iter()
            .map(|e| (e.row, e.field.as_str()))
            .collect();
        assert_eq!(
            messages,
            vec![(2, "age"), (2, "status"), (2, "country"), (3, "age")]
        );
        // A type failure skips the range check.
        assert!(result.errors[0].message.contains("not a number"));
        assert!(result.errors[3].message.contains("above maximum"));
    }

    #[test]
    fn test_unknown_reference_table_rejected() {
        let mut rule = FieldRule::new("country");
        rule.reference_table = Some("countries".into());
        let err = Validator::new(&config(vec![rule]), LookupRegistry::new()).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownLookupTable { .. }));
    }

    #[test]
    fn test_cross_field_contradictions() {
        let validation = ValidationConfig {
            cross_field: vec![CrossFieldRule {
                left: "end".into(),
                op: ConditionOp::Gte,
                right: "start".into(),
                message: None,
            }],
            ..ValidationConfig::default()
        };
        let validator = Validator::new(&validation, LookupRegistry::new()).unwrap();
        let rows = [
            row(1, json!({"start": 1, "end": 5})),
            row(2, json!({"start": 9, "end": 5})),
            row(3, json!({"start": null, "end": 5})),
            row(4, json!({"start": 1})),
        ];
        let result = validator.validate(&rows).unwrap();
        assert!(result.valid);
        assert_eq!(result.warnings.len(), 1);
        assert_eq!(result.warnings[0].row, 2);
        assert_eq!(result.metrics.counts.contradicting_rows, 1);
        assert!((result.metrics.consistency - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_cross_field_rejects_non_comparison() {
        let validation = ValidationConfig {
            cross_field: vec![CrossFieldRule {
                left: "a".into(),
                op: ConditionOp::Matches,
                right: "b".into(),
                message: None,
            }],
            ..ValidationConfig::default()
        };
        assert!(Validator::new(&validation, LookupRegistry::new()).is_err());
    }

    #[test]
    fn test_strict_mode_stops_at_first_error() {
        let mut validation = config(vec![FieldRule::new("name").required()]);
        validation.strict = true;
        let validator = Validator::new(&validation, LookupRegistry::new()).unwrap();
        let rows = [
            row(1, json!({"name": "ok"})),
            row(7, json!({})),
            row(8, json!({})),
        ];
        match validator.validate(&rows) {
            Err(ValidationError::Strict { row, field, .. }) => {
                assert_eq!(row, 7);
                assert_eq!(field, "name");
            }
            other => panic!("expected strict failure, got {other:?}"),
        }
    }

    #[test]
    fn test_summary_over_batches() {
        let validator = Validator::new(
            &config(vec![FieldRule::new("name").required()]),
            LookupRegistry::new(),
        )
        .unwrap();
        let first = validator
            .validate(&[row(1, json!({"name": "a"})), row(2, json!({"name": "b"}))])
            .unwrap();
        let second = validator.validate(&[row(3, json!({}))]).unwrap();
        let run = summarize([&first, &second], validator.weights());
        assert_eq!(run.metrics.rows, 3);
        assert_eq!(run.errors, 1);
        assert!((run.metrics.completeness - 2.0 / 3.0).abs() < 1e-9);
        assert!(run.metrics.quality_score < 1.0);
    }
}
