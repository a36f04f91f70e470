//! Content-derived record identities.

use crate::types::Record;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 of a record's canonical serialization.
pub type RecordId = String;

/// Identity of an input row: its source, data-row ordinal and fields.
pub fn input_id(source: &str, ordinal: u64, fields: &Record) -> RecordId {
    digest(&json!({
        "source": source,
        "ordinal": ordinal,
        "fields": fields,
    }))
}

/// Identity of an output record: the inputs it derives from and its fields.
pub fn output_id(inputs: &[RecordId], fields: &Record) -> RecordId {
    digest(&json!({
        "inputs": inputs,
        "fields": fields,
    }))
}

/// Record keys are sorted, so the compact JSON form is canonical.
fn digest(value: &Value) -> RecordId {
    let mut hasher = Sha256::new();
    hasher.update(value.to_string().as_bytes());
    format!("{:x}", hasher.finalize())
}
