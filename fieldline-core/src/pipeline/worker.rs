//! Per-chunk work: apply rules row by row, record lineage, validate.

use crate::error::{RuleFailure, ValidationError};
use crate::lineage::{EdgeDraft, LineageStore, input_id, output_id};
use crate::rules::{RuleApplication, RuleEngine};
use crate::types::{Chunk, ErrorKind, ErrorRow, OutputBatch, OutputRow, Record, bounded_sample};
use crate::validate::{ValidationResult, Validator};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Tag placed on edges of rule applications that failed.
pub const FAILED_TAG: &str = "rule_failure";

/// Shared, read-only state every worker uses.
#[derive(Debug, Clone)]
pub struct ChunkProcessor {
    pub(crate) engine: Arc<RuleEngine>,
    /// `None` when validation runs after the merge instead.
    pub(crate) validator: Option<Arc<Validator>>,
    pub(crate) lineage: Option<Arc<LineageStore>>,
    pub(crate) systems: Vec<String>,
    pub(crate) cancel: CancellationToken,
}

/// Everything produced from one chunk.
#[derive(Debug, Clone)]
pub struct ProcessedChunk {
    pub batch: OutputBatch,
    /// Malformed rows diverted by the streamer plus rejected records.
    pub error_rows: Vec<ErrorRow>,
    pub validation: Option<ValidationResult>,
    pub rows_in: u64,
    pub rejected: u64,
    pub rule_failures: u64,
    pub edges: u64,
}

/// Result of handing a chunk to a worker.
#[derive(Debug)]
pub enum ChunkOutcome {
    Processed(Box<ProcessedChunk>),
    /// Cancellation arrived before the chunk started.
    Discarded,
    /// Strict validation rejected the chunk.
    Invalid(ValidationError),
}

impl ChunkProcessor {
    pub fn process(&self, chunk: Chunk) -> ChunkOutcome {
        if self.cancel.is_cancelled() {
            tracing::debug!(source = %chunk.source, chunk = chunk.index, "Discarding chunk after cancellation");
            return ChunkOutcome::Discarded;
        }

        let recorder = self
            .lineage
            .as_ref()
            .map(|store| store.begin_batch(format!("{}#{}", chunk.source, chunk.index)));

        let mut rows = Vec::with_capacity(chunk.rows.len());
        let mut error_rows = chunk.error_rows.clone();
        let mut rejected = 0;
        let mut rule_failures = 0;
        let mut edges = 0;

        for row in &chunk.rows {
            let input = chunk.record(row);
            let in_id = input_id(&chunk.source, row.ordinal, &input);
            let outcome = self.engine.apply(&input);
            let out_id = output_id(std::slice::from_ref(&in_id), &outcome.output);
            rule_failures += outcome.failures.len() as u64;

            if let Some(recorder) = &recorder {
                for application in &outcome.applications {
                    recorder.record(edge(application, &in_id, &out_id, &input, &outcome.output));
                    edges += 1;
                }
            }

            if outcome.rejected {
                rejected += 1;
                let reasons: Vec<String> = outcome
                    .failures
                    .iter()
                    .map(|f| format!("{} ({}): {}", f.field, f.rule_id, f.failure))
                    .collect();
                error_rows.push(ErrorRow {
                    source: chunk.source.clone(),
                    ordinal: row.ordinal,
                    kind: ErrorKind::RecordRejected,
                    reason: reasons.join("; "),
                    raw: row.fields.clone(),
                });
                continue;
            }

            if let Some(store) = &self.lineage {
                if !self.systems.is_empty() {
                    store.tag(&out_id, self.systems.iter().cloned());
                }
            }
            rows.push(OutputRow {
                id: out_id,
                inputs: vec![in_id],
                source: chunk.source.clone(),
                ordinal: row.ordinal,
                record: outcome.output,
            });
        }
        error_rows.sort_by_key(|r| r.ordinal);

        let validation = match &self.validator {
            Some(validator) => match validator.validate(&rows) {
                Ok(result) => Some(result),
                Err(e) => return ChunkOutcome::Invalid(e),
            },
            None => None,
        };

        tracing::debug!(
            source = %chunk.source,
            chunk = chunk.index,
            rows_in = chunk.rows.len(),
            rows_out = rows.len(),
            rejected,
            rule_failures,
            "Processed chunk"
        );

        ChunkOutcome::Processed(Box::new(ProcessedChunk {
            batch: OutputBatch {
                source: chunk.source.clone(),
                index: chunk.index,
                rows,
            },
            error_rows,
            validation,
            rows_in: chunk.rows.len() as u64,
            rejected,
            rule_failures,
            edges,
        }))
    }
}

fn edge(
    application: &RuleApplication,
    in_id: &str,
    out_id: &str,
    input: &Record,
    output: &Record,
) -> EdgeDraft {
    let input_sample = bounded_sample(
        application
            .sources
            .iter()
            .filter_map(|name| input.get(name).map(|v| (name.as_str(), v))),
    );
    let output_sample = bounded_sample(
        output
            .get(&application.target)
            .map(|v| (application.target.as_str(), v)),
    );
    EdgeDraft {
        input_ids: vec![in_id.to_string()],
        output_id: out_id.to_string(),
        rule_id: application.rule_id.clone(),
        input_sample,
        output_sample,
        tags: application
            .failure
            .as_ref()
            .map(|f: &RuleFailure| vec![FAILED_TAG.to_string(), f.to_string()])
            .unwrap_or_default(),
    }
}
