//! Validator: format checks, business rules, cross-field consistency and
//! composite quality scoring.

pub mod checks;
pub mod metrics;
pub mod model;
pub mod validator;

pub use checks::{
    CheckOutcome, FieldFormat, check_date, check_email, check_format, check_numeric, check_phone,
    check_postal_code,
};
pub use metrics::{QualityCounts, QualityMetrics, QualityWeights, RunQuality, summarize};
pub use model::{CrossFieldRule, FieldRule, Severity, ValidationIssue, ValidationResult};
pub use validator::Validator;
