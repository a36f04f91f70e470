//! Declared validation rules and per-batch results.

use crate::rules::ConditionOp;
use crate::validate::checks::FieldFormat;
use crate::validate::metrics::QualityMetrics;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Whether a failed check counts against validity or is only reported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    #[default]
    Error,
    Warning,
}

/// Checks declared for one output field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldRule {
    pub field: String,
    /// The field must be present and non-null.
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub format: Option<FieldFormat>,
    /// Date format tried before the built-in list when `format = "date"`.
    #[serde(default)]
    pub date_format: Option<String>,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
    /// When non-empty, the value must equal one of these.
    #[serde(default)]
    pub allowed: Vec<Value>,
    /// The value must exist as a key of this lookup table.
    #[serde(default)]
    pub reference_table: Option<String>,
    #[serde(default)]
    pub severity: Severity,
}

impl FieldRule {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            ..Self::default()
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_format(mut self, format: FieldFormat) -> Self {
        self.format = Some(format);
        self
    }

    pub fn with_range(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    pub fn warning(mut self) -> Self {
        self.severity = Severity::Warning;
        self
    }
}

/// A relation expected to hold between two fields of the same row, e.g.
/// `end_date gte start_date`. Rows where it does not hold are
/// contradictions. Rows where either side is null are not evaluated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossFieldRule {
    pub left: String,
    pub op: ConditionOp,
    pub right: String,
    #[serde(default)]
    pub message: Option<String>,
}

/// One failed check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
    /// Source ordinal of the row.
    pub row: u64,
    pub field: String,
    pub value: Value,
    pub message: String,
}

/// Outcome of validating one batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    /// No errors. Warnings do not affect validity.
    pub valid: bool,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
    pub metrics: QualityMetrics,
}
