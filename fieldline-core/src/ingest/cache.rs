//! Per-run cache of encoding and delimiter detections.

use crate::ingest::delimiter::DelimiterMethod;
use crate::ingest::encoding::EncodingMethod;
use encoding_rs::Encoding;
use serde::{Serialize, Serializer};
use std::collections::HashMap;
use std::sync::RwLock;

/// Resolved format of one source.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Detection {
    #[serde(serialize_with = "serialize_encoding")]
    pub encoding: &'static Encoding,
    pub encoding_method: EncodingMethod,
    #[serde(serialize_with = "serialize_delimiter")]
    pub delimiter: u8,
    pub delimiter_method: DelimiterMethod,
    pub degraded: bool,
}

fn serialize_encoding<S: Serializer>(
    encoding: &&'static Encoding,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(encoding.name())
}

fn serialize_delimiter<S: Serializer>(delimiter: &u8, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&(*delimiter as char).to_string())
}

/// Detections keyed by source name, scoped to one run.
#[derive(Debug, Default)]
pub struct DetectionCache {
    entries: RwLock<HashMap<String, Detection>>,
}

impl DetectionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, source: &str) -> Option<Detection> {
        self.entries
            .read()
            .ok()
            .and_then(|entries| entries.get(source).copied())
    }

    pub fn insert(&self, source: &str, detection: Detection) {
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(source.to_string(), detection);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
