//! Fan-in of chunk results: ordered concatenation or keyed outer join.

use crate::config::MergeConfig;
use crate::lineage::{LineageStore, RecordId, output_id};
use crate::types::{OutputBatch, OutputRow, Record, bounded_sample, value_to_text};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, info};

/// Rule identity of lineage edges written by the join.
pub const JOIN_RULE_ID: &str = "merge:join";

/// How chunk results are combined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum MergeMode {
    /// Results in (source order, chunk index) order.
    Concatenate,
    /// Full outer join of all sources on an output field.
    Join { key: String },
}

impl MergeMode {
    pub fn from_config(config: &MergeConfig) -> Self {
        match &config.join_key {
            Some(key) => MergeMode::Join { key: key.clone() },
            None => MergeMode::Concatenate,
        }
    }
}

/// What the merge did.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MergeReport {
    pub rows: usize,
    /// Distinct join keys seen.
    pub keys: usize,
    /// Keys missing from at least one source, in first-seen order.
    pub unmatched_keys: Vec<String>,
    /// Rows without a join key value, passed through unjoined.
    pub unkeyed_rows: usize,
}

/// Collects worker results and emits them merged.
///
/// In concatenation mode batches are released as soon as every batch
/// before them has arrived. In join mode everything is held until
/// [`Merger::finish`].
#[derive(Debug)]
pub struct Merger {
    mode: MergeMode,
    sources: Vec<String>,
    pending: BTreeMap<(usize, u64), OutputBatch>,
    next: (usize, u64),
    closed: BTreeSet<usize>,
    emitted_rows: usize,
}

impl Merger {
    pub fn new(mode: MergeMode, sources: Vec<String>) -> Self {
        Self {
            mode,
            sources,
            pending: BTreeMap::new(),
            next: (0, 0),
            closed: BTreeSet::new(),
            emitted_rows: 0,
        }
    }

    pub fn mode(&self) -> &MergeMode {
        &self.mode
    }

    /// Accept the result of chunk `batch.index` of source `source_index`,
    /// returning batches ready for the sink.
    pub fn push(&mut self, source_index: usize, batch: OutputBatch) -> Vec<OutputBatch> {
        self.pending.insert((source_index, batch.index), batch);
        match self.mode {
            MergeMode::Concatenate => self.release(),
            MergeMode::Join { .. } => Vec::new(),
        }
    }

    /// Mark a source as exhausted so later sources can be released.
    pub fn close_source(&mut self, source_index: usize) -> Vec<OutputBatch> {
        self.closed.insert(source_index);
        match self.mode {
            MergeMode::Concatenate => self.release(),
            MergeMode::Join { .. } => Vec::new(),
        }
    }

    fn release(&mut self) -> Vec<OutputBatch> {
        let mut ready = Vec::new();
        loop {
            if let Some(batch) = self.pending.remove(&self.next) {
                self.next.1 += 1;
                self.emitted_rows += batch.rows.len();
                ready.push(batch);
            } else if self.closed.contains(&self.next.0) {
                self.next = (self.next.0 + 1, 0);
            } else {
                break;
            }
        }
        ready
    }

    /// Emit whatever is still held. Join mode performs the join here and
    /// records one lineage edge per joined row.
    pub fn finish(mut self, lineage: Option<&LineageStore>) -> (Vec<OutputBatch>, MergeReport) {
        let pending = std::mem::take(&mut self.pending);
        match self.mode.clone() {
            MergeMode::Concatenate => {
                // Gaps come from chunks that were never processed.
                let rest: Vec<OutputBatch> = pending.into_values().collect();
                let rows = self.emitted_rows + rest.iter().map(|b| b.rows.len()).sum::<usize>();
                let report = MergeReport {
                    rows,
                    ..MergeReport::default()
                };
                debug!(rows, "Concatenated results");
                (rest, report)
            }
            MergeMode::Join { key } => {
                let mut per_source: Vec<Vec<OutputRow>> = vec![Vec::new(); self.sources.len()];
                for ((source_index, _), batch) in pending {
                    if source_index >= per_source.len() {
                        per_source.resize_with(source_index + 1, Vec::new);
                    }
                    per_source[source_index].extend(batch.rows);
                }
                let (rows, report) = join(&key, &self.sources, per_source, lineage);
                let batch = OutputBatch {
                    source: JOIN_RULE_ID.to_string(),
                    index: 0,
                    rows,
                };
                (vec![batch], report)
            }
        }
    }
}

/// Full outer join of per-source rows on `key`.
fn join(
    key: &str,
    sources: &[String],
    per_source: Vec<Vec<OutputRow>>,
    lineage: Option<&LineageStore>,
) -> (Vec<OutputRow>, MergeReport) {
    let width = per_source.len();
    let field_sets: Vec<BTreeSet<String>> = per_source
        .iter()
        .map(|rows| rows.iter().flat_map(|r| r.record.keys().cloned()).collect())
        .collect();

    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<Vec<OutputRow>>> = HashMap::new();
    let mut unkeyed: Vec<(usize, OutputRow)> = Vec::new();
    for (source_index, rows) in per_source.into_iter().enumerate() {
        for row in rows {
            match row.record.get(key).filter(|v| !v.is_null()) {
                Some(value) => {
                    let text = value_to_text(value);
                    let group = groups.entry(text.clone()).or_insert_with(|| {
                        order.push(text);
                        vec![Vec::new(); width]
                    });
                    group[source_index].push(row);
                }
                None => unkeyed.push((source_index, row)),
            }
        }
    }

    let source_label = sources.join("+");
    let mut report = MergeReport {
        keys: order.len(),
        unkeyed_rows: unkeyed.len(),
        ..MergeReport::default()
    };
    let mut out = Vec::new();

    for key_text in &order {
        let Some(group) = groups.remove(key_text) else {
            continue;
        };
        if group.iter().any(Vec::is_empty) {
            report.unmatched_keys.push(key_text.clone());
        }
        for combo in cross_product(&group) {
            out.push(combine(&combo, &field_sets, &source_label, lineage));
        }
    }
    for (source_index, row) in unkeyed {
        let mut combo: Vec<Option<&OutputRow>> = vec![None; width];
        combo[source_index] = Some(&row);
        out.push(combine(&combo, &field_sets, &source_label, lineage));
    }

    for (i, row) in out.iter_mut().enumerate() {
        row.ordinal = i as u64 + 1;
    }
    report.rows = out.len();
    info!(
        rows = report.rows,
        keys = report.keys,
        unmatched = report.unmatched_keys.len(),
        unkeyed = report.unkeyed_rows,
        "Joined results"
    );
    (out, report)
}

/// Every combination taking one row per source; a source without rows
/// contributes `None`.
fn cross_product(group: &[Vec<OutputRow>]) -> Vec<Vec<Option<&OutputRow>>> {
    let mut combos: Vec<Vec<Option<&OutputRow>>> = vec![Vec::new()];
    for rows in group {
        let choices: Vec<Option<&OutputRow>> = if rows.is_empty() {
            vec![None]
        } else {
            rows.iter().map(Some).collect()
        };
        combos = combos
            .into_iter()
            .flat_map(|prefix| {
                choices.iter().map(move |choice| {
                    let mut next = prefix.clone();
                    next.push(*choice);
                    next
                })
            })
            .collect();
    }
    combos
}

/// Combine one row per source into a joined row. The first non-null
/// value wins on field collisions; absent sources are null-filled.
fn combine(
    combo: &[Option<&OutputRow>],
    field_sets: &[BTreeSet<String>],
    source_label: &str,
    lineage: Option<&LineageStore>,
) -> OutputRow {
    let mut record = Record::new();
    let mut inputs: Vec<RecordId> = Vec::new();
    for (choice, fields) in combo.iter().zip(field_sets) {
        match choice {
            Some(row) => {
                inputs.push(row.id.clone());
                for (name, value) in &row.record {
                    let slot = record.entry(name.clone()).or_insert(Value::Null);
                    if slot.is_null() {
                        *slot = value.clone();
                    }
                }
            }
            None => {
                for name in fields {
                    record.entry(name.clone()).or_insert(Value::Null);
                }
            }
        }
    }

    let id = output_id(&inputs, &record);
    if let Some(store) = lineage {
        let input_sample = combo
            .iter()
            .flatten()
            .next()
            .map(|row| bounded_sample(row.record.iter().map(|(k, v)| (k.as_str(), v))))
            .unwrap_or_default();
        let output_sample = bounded_sample(record.iter().map(|(k, v)| (k.as_str(), v)));
        store.record(
            inputs.clone(),
            id.clone(),
            JOIN_RULE_ID,
            input_sample,
            output_sample,
        );
    }
    OutputRow {
        id,
        inputs,
        source: source_label.to_string(),
        ordinal: 0,
        record,
    }
}
