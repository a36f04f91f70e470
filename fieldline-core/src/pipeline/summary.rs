//! Run status and the run summary handed to the sink.

use crate::config::Compression;
use crate::ingest::{Detection, StreamStats};
use crate::merge::MergeReport;
use crate::validate::RunQuality;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Why a run failed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum FailureReason {
    SourceUnreadable { source: String, message: String },
    MalformedInput { source: String, ordinal: u64, message: String },
    EncodingDetection { source: String },
    ValidationFailure { row: u64, field: String, message: String },
    QualityBelowThreshold { score: f64, threshold: f64 },
    MappingAmbiguous { targets: Vec<String> },
    Sink { message: String },
    /// A worker task panicked or was aborted.
    Worker { message: String },
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SourceUnreadable { source, message } => {
                write!(f, "source '{source}' unreadable: {message}")
            }
            Self::MalformedInput { message, .. } => write!(f, "malformed input: {message}"),
            Self::EncodingDetection { source } => {
                write!(f, "no encoding decodes source '{source}'")
            }
            Self::ValidationFailure {
                row,
                field,
                message,
            } => write!(f, "validation failed at row {row}, field '{field}': {message}"),
            Self::QualityBelowThreshold { score, threshold } => {
                write!(f, "quality score {score:.3} below required {threshold:.3}")
            }
            Self::MappingAmbiguous { targets } => write!(
                f,
                "no mapping candidate for mandatory targets: {}",
                targets.join(", ")
            ),
            Self::Sink { message } => write!(f, "sink failed: {message}"),
            Self::Worker { message } => write!(f, "worker failed: {message}"),
        }
    }
}

/// Outcome of a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "failure")]
pub enum RunStatus {
    Success,
    SuccessWithWarnings,
    Failed(FailureReason),
}

impl RunStatus {
    pub fn is_failed(&self) -> bool {
        matches!(self, RunStatus::Failed(_))
    }
}

/// Per-source ingestion details.
#[derive(Debug, Clone, Serialize)]
pub struct SourceSummary {
    pub name: String,
    pub header: Vec<String>,
    pub detection: Option<Detection>,
    pub compression: Option<Compression>,
    pub stats: StreamStats,
}

impl SourceSummary {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            header: Vec::new(),
            detection: None,
            compression: None,
            stats: StreamStats::default(),
        }
    }
}

/// Counters accumulated while the run progresses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunCounts {
    pub rows_in: u64,
    pub rows_out: u64,
    pub malformed_rows: u64,
    pub rejected_rows: u64,
    pub rule_failures: u64,
    pub chunks: u64,
    /// Chunks dropped because cancellation arrived before they started.
    pub discarded_chunks: u64,
    pub lineage_edges: u64,
    pub lineage_compacted: u64,
}

/// Everything a sink receives at the end of a run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub sources: Vec<SourceSummary>,
    pub counts: RunCounts,
    pub quality: RunQuality,
    pub merge: MergeReport,
    /// Target fields the auto mapper could not map.
    pub unmapped_targets: Vec<String>,
    pub cancelled: bool,
    pub warnings: Vec<String>,
}

impl RunSummary {
    pub fn is_success(&self) -> bool {
        !self.status.is_failed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_serialization() {
        assert_eq!(
            serde_json::to_value(RunStatus::SuccessWithWarnings).unwrap(),
            json!({"status": "success_with_warnings"})
        );
        let failed = RunStatus::Failed(FailureReason::MappingAmbiguous {
            targets: vec!["email".into()],
        });
        assert_eq!(
            serde_json::to_value(&failed).unwrap(),
            json!({
                "status": "failed",
                "failure": {"reason": "mapping_ambiguous", "targets": ["email"]}
            })
        );
        assert!(failed.is_failed());
    }

    #[test]
    fn test_failure_display() {
        let reason = FailureReason::QualityBelowThreshold {
            score: 0.5,
            threshold: 0.9,
        };
        assert_eq!(reason.to_string(), "quality score 0.500 below required 0.900");
    }
}
