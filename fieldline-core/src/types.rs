//! Shared record, chunk and error-row types.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// A record: field name to value, with sorted keys so its canonical
/// serialization is stable.
pub type Record = serde_json::Map<String, Value>;

/// One decoded input row with its 1-based data-row ordinal within the source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRow {
    pub ordinal: u64,
    pub fields: Vec<String>,
}

/// A bounded batch of decoded input rows processed as one unit.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Name of the source the chunk was read from.
    pub source: String,
    /// 0-based chunk index within its source.
    pub index: u64,
    /// Resolved header shared by every chunk of the source.
    pub header: Arc<Vec<String>>,
    pub rows: Vec<SourceRow>,
    /// Rows diverted because their column count did not match the header.
    pub error_rows: Vec<ErrorRow>,
}

impl Chunk {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Zip the header with a row's fields. Empty cells become `null`.
    pub fn record(&self, row: &SourceRow) -> Record {
        let mut record = Record::new();
        for (name, value) in self.header.iter().zip(row.fields.iter()) {
            let cell = if value.is_empty() {
                Value::Null
            } else {
                Value::String(value.clone())
            };
            record.insert(name.clone(), cell);
        }
        record
    }
}

/// Why a row ended up in the error stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Column count mismatch against the header.
    MalformedInput,
    /// Accumulated rule failures exceeded the per-record threshold.
    RecordRejected,
}

/// A row diverted to the error sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRow {
    pub source: String,
    pub ordinal: u64,
    pub kind: ErrorKind,
    pub reason: String,
    /// Raw field values as read.
    pub raw: Vec<String>,
}

/// One transformed output row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputRow {
    /// Content-derived identity of the output record.
    pub id: String,
    /// Identities of the input records it was derived from.
    pub inputs: Vec<String>,
    pub source: String,
    pub ordinal: u64,
    pub record: Record,
}

/// A transformed batch ready for a sink.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutputBatch {
    pub source: String,
    pub index: u64,
    pub rows: Vec<OutputRow>,
}

/// Render a value the way a delimited file would have carried it.
/// `null` renders as the empty string.
pub fn value_to_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

/// Interpret a value as a float: numbers directly, strings by parsing.
pub fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

/// Build a JSON number from a float, preferring an integer representation
/// when the value is integral.
pub fn number_value(n: f64) -> Option<Value> {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 9.0e15 {
        return Some(Value::from(n as i64));
    }
    serde_json::Number::from_f64(n).map(Value::Number)
}

/// Maximum characters kept per sampled value.
pub const SAMPLE_VALUE_CHARS: usize = 64;
/// Maximum fields kept per sample.
pub const SAMPLE_FIELDS: usize = 8;

/// Bounded copy of selected fields for audit display.
pub fn bounded_sample<'a>(fields: impl IntoIterator<Item = (&'a str, &'a Value)>) -> Record {
    let mut sample = Record::new();
    for (name, value) in fields.into_iter().take(SAMPLE_FIELDS) {
        let value = match value {
            Value::String(s) if s.chars().count() > SAMPLE_VALUE_CHARS => {
                let cut: String = s.chars().take(SAMPLE_VALUE_CHARS).collect();
                Value::String(format!("{cut}..."))
            }
            other => other.clone(),
        };
        sample.insert(name.to_string(), value);
    }
    sample
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_chunk_record_maps_empty_to_null() {
        let chunk = Chunk {
            source: "s".into(),
            index: 0,
            header: Arc::new(vec!["a".into(), "b".into()]),
            rows: vec![SourceRow {
                ordinal: 1,
                fields: vec!["x".into(), String::new()],
            }],
            error_rows: Vec::new(),
        };
        let record = chunk.record(&chunk.rows[0]);
        assert_eq!(record["a"], json!("x"));
        assert_eq!(record["b"], Value::Null);
    }

    #[test]
    fn test_number_value_integral() {
        assert_eq!(number_value(3.0), Some(json!(3)));
        assert_eq!(number_value(1234.5), Some(json!(1234.5)));
        assert_eq!(number_value(f64::NAN), None);
    }

    #[test]
    fn test_bounded_sample_truncates() {
        let long = Value::String("x".repeat(100));
        let sample = bounded_sample([("f", &long)]);
        let text = sample["f"].as_str().unwrap();
        assert_eq!(text.chars().count(), SAMPLE_VALUE_CHARS + 3);
    }
}
