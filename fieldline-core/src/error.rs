//! Error types for the Fieldline engine.
//!
//! Uses `thiserror` for public API error types with structured variants
//! covering ingestion, configuration, mapping, rule application, validation
//! and sink domains. Recoverable conditions (malformed rows, rule failures,
//! validation issues) are captured as data and only surface here when a run
//! is configured as strict.

use serde::{Deserialize, Serialize};

/// Top-level error type for the Fieldline core library.
#[derive(Debug, thiserror::Error)]
pub enum FieldlineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Ingestion error: {0}")]
    Ingest(#[from] IngestError),

    #[error("Mapping error: {0}")]
    Mapping(#[from] MappingError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("Run cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors raised while reading and decoding a source.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("No candidate encoding decodes the sample of '{source_name}'")]
    EncodingDetection { source_name: String },

    #[error("Unknown encoding label '{label}'")]
    UnknownEncoding { label: String },

    #[error(
        "Malformed row {ordinal} in '{source_name}': expected {expected} columns, found {found}"
    )]
    MalformedInput {
        source_name: String,
        ordinal: u64,
        expected: usize,
        found: usize,
    },

    #[error("CSV parse error in '{source_name}': {message}")]
    Csv {
        source_name: String,
        message: String,
    },

    #[error("Source '{source_name}' is unreadable: {message}")]
    Unreadable {
        source_name: String,
        message: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors found while loading or compiling configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("Invalid rule '{rule_id}': {reason}")]
    InvalidRule { rule_id: String, reason: String },

    #[error("Invalid pattern in rule '{rule_id}': {message}")]
    InvalidPattern { rule_id: String, message: String },

    #[error("Invalid expression in rule '{rule_id}': {message}")]
    InvalidExpression { rule_id: String, message: String },

    #[error("Rule '{rule_id}' references unknown function '{function}'")]
    UnknownFunction { rule_id: String, function: String },

    #[error("'{owner}' references unknown lookup table '{table}'")]
    UnknownLookupTable { owner: String, table: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Errors raised by the auto mapper.
#[derive(Debug, thiserror::Error)]
pub enum MappingError {
    #[error("No candidate above threshold for mandatory targets: {}", targets.join(", "))]
    Ambiguous { targets: Vec<String> },

    #[error("Invalid mapping chain for '{target}': {reason}")]
    InvalidChain { target: String, reason: String },
}

/// Fatal validation errors (strict mode only).
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("Row {row}, field '{field}': {message}")]
    Strict {
        row: u64,
        field: String,
        message: String,
    },

    #[error("Quality score {score:.3} below required {threshold:.3}")]
    QualityBelowThreshold { score: f64, threshold: f64 },
}

/// Errors reported by a sink collaborator.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("Sink write failed: {message}")]
    Write { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A per-rule failure. Recorded against the target field; never aborts the row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleFailure {
    #[error("cannot parse '{value}': {message}")]
    Parse { value: String, message: String },

    #[error("key '{key}' not found in lookup table '{table}'")]
    LookupMiss { table: String, key: String },

    #[error("arithmetic error: {message}")]
    Arithmetic { message: String },

    #[error("cannot coerce '{value}' to {expected}")]
    TypeCoercion { value: String, expected: String },

    #[error("source field '{field}' is missing")]
    MissingSource { field: String },

    #[error("function '{function}' failed: {message}")]
    Custom { function: String, message: String },
}

impl RuleFailure {
    pub fn parse(value: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Parse {
            value: value.into(),
            message: message.into(),
        }
    }

    pub fn arithmetic(message: impl Into<String>) -> Self {
        Self::Arithmetic {
            message: message.into(),
        }
    }

    pub fn coercion(value: impl Into<String>, expected: impl Into<String>) -> Self {
        Self::TypeCoercion {
            value: value.into(),
            expected: expected.into(),
        }
    }
}

/// Result type alias for Fieldline operations.
pub type Result<T> = std::result::Result<T, FieldlineError>;
