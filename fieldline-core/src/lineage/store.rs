//! Append-only lineage edge log with derived indices.

use crate::config::LineageConfig;
use crate::lineage::identity::RecordId;
use crate::types::Record;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Largest retention representable as a `chrono::Duration`.
const MAX_RETENTION_SECS: u64 = (i64::MAX / 1000) as u64;

/// One provenance edge: a set of inputs produced an output through a rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineageEdge {
    /// Position in the append log.
    pub sequence: u64,
    pub input_ids: Vec<RecordId>,
    pub output_id: RecordId,
    pub rule_id: String,
    /// Batch the edge was recorded under, if any.
    pub batch: Option<String>,
    pub recorded_at: DateTime<Utc>,
    pub input_sample: Record,
    pub output_sample: Record,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Edge contents supplied by a caller; the store assigns sequence, batch
/// and timestamp.
#[derive(Debug, Clone, Default)]
pub struct EdgeDraft {
    pub input_ids: Vec<RecordId>,
    pub output_id: RecordId,
    pub rule_id: String,
    pub input_sample: Record,
    pub output_sample: Record,
    pub tags: Vec<String>,
}

/// Answer to an ancestor query.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AncestorReport {
    /// Transitive closure of contributing identities.
    pub ancestors: BTreeSet<RecordId>,
    /// Simple paths, each from an ancestor to the queried output.
    pub paths: Vec<Vec<RecordId>>,
    /// Set when the path list hit the configured cap.
    pub truncated: bool,
}

/// Blast radius of a change to one source record.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ImpactReport {
    pub downstream_count: usize,
    pub systems: BTreeSet<String>,
}

/// Provenance graph shared by all workers of a run.
///
/// Edges are never mutated. `by_output` and `by_input` index edge sequences
/// per identity; the tag index attaches systems to records.
pub struct LineageStore {
    pub(crate) edges: DashMap<u64, Arc<LineageEdge>>,
    pub(crate) by_output: DashMap<RecordId, Vec<u64>>,
    pub(crate) by_input: DashMap<RecordId, Vec<u64>>,
    pub(crate) tags: DashMap<RecordId, BTreeSet<String>>,
    pub(crate) pinned: DashMap<String, usize>,
    next_sequence: AtomicU64,
    pub(crate) retention: chrono::Duration,
    max_paths: usize,
}

impl std::fmt::Debug for LineageStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LineageStore")
            .field("edges", &self.edges.len())
            .field("pinned_batches", &self.pinned.len())
            .field("retention", &self.retention)
            .field("max_paths", &self.max_paths)
            .finish()
    }
}

impl Default for LineageStore {
    fn default() -> Self {
        Self::new(&LineageConfig::default())
    }
}

impl LineageStore {
    pub fn new(config: &LineageConfig) -> Self {
        Self {
            edges: DashMap::new(),
            by_output: DashMap::new(),
            by_input: DashMap::new(),
            tags: DashMap::new(),
            pinned: DashMap::new(),
            next_sequence: AtomicU64::new(0),
            retention: chrono::Duration::seconds(
                config.retention_secs.min(MAX_RETENTION_SECS) as i64,
            ),
            max_paths: config.max_paths,
        }
    }

    /// Append one edge outside of any batch.
    pub fn record(
        &self,
        input_ids: Vec<RecordId>,
        output_id: RecordId,
        rule_id: &str,
        input_sample: Record,
        output_sample: Record,
    ) -> u64 {
        self.append(
            None,
            EdgeDraft {
                input_ids,
                output_id,
                rule_id: rule_id.to_string(),
                input_sample,
                output_sample,
                tags: Vec::new(),
            },
        )
    }

    fn append(&self, batch: Option<&str>, draft: EdgeDraft) -> u64 {
        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
        for input in &draft.input_ids {
            self.by_input
                .entry(input.clone())
                .or_default()
                .push(sequence);
        }
        self.by_output
            .entry(draft.output_id.clone())
            .or_default()
            .push(sequence);
        let edge = LineageEdge {
            sequence,
            input_ids: draft.input_ids,
            output_id: draft.output_id,
            rule_id: draft.rule_id,
            batch: batch.map(str::to_string),
            recorded_at: Utc::now(),
            input_sample: draft.input_sample,
            output_sample: draft.output_sample,
            tags: draft.tags,
        };
        self.edges.insert(sequence, Arc::new(edge));
        sequence
    }

    /// Pin a batch for the lifetime of the returned guard. Edges of pinned
    /// batches survive compaction.
    pub fn begin_batch(&self, batch: impl Into<String>) -> BatchRecorder<'_> {
        let batch = batch.into();
        *self.pinned.entry(batch.clone()).or_insert(0) += 1;
        BatchRecorder { store: self, batch }
    }

    pub fn is_pinned(&self, batch: &str) -> bool {
        self.pinned.contains_key(batch)
    }

    /// Attach systems or tags to a record.
    pub fn tag<I, S>(&self, record: &RecordId, tags: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut entry = self.tags.entry(record.clone()).or_default();
        entry.extend(tags.into_iter().map(Into::into));
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    /// Sequence number the next appended edge will get.
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// All live edges ordered by sequence.
    pub fn snapshot(&self) -> Vec<LineageEdge> {
        let mut edges: Vec<LineageEdge> = self
            .edges
            .iter()
            .map(|entry| entry.value().as_ref().clone())
            .collect();
        edges.sort_by_key(|e| e.sequence);
        edges
    }

    fn edge_ids(index: &DashMap<RecordId, Vec<u64>>, id: &str) -> Vec<u64> {
        index
            .get(id)
            .map(|seqs| seqs.value().clone())
            .unwrap_or_default()
    }

    /// Distinct direct inputs of a record.
    fn parents(&self, id: &str) -> BTreeSet<RecordId> {
        let mut parents = BTreeSet::new();
        for seq in Self::edge_ids(&self.by_output, id) {
            if let Some(edge) = self.edges.get(&seq) {
                parents.extend(edge.input_ids.iter().cloned());
            }
        }
        parents
    }

    /// Distinct direct outputs of a record.
    fn children(&self, id: &str) -> BTreeSet<RecordId> {
        let mut children = BTreeSet::new();
        for seq in Self::edge_ids(&self.by_input, id) {
            if let Some(edge) = self.edges.get(&seq) {
                children.insert(edge.output_id.clone());
            }
        }
        children
    }

    /// Every identity that contributed to `output_id`, plus every simple path
    /// from each ancestor to it (capped at the configured maximum).
    pub fn ancestors(&self, output_id: &str) -> AncestorReport {
        let mut report = AncestorReport::default();

        let mut queue = VecDeque::from([output_id.to_string()]);
        while let Some(id) = queue.pop_front() {
            for parent in self.parents(&id) {
                if parent != output_id && report.ancestors.insert(parent.clone()) {
                    queue.push_back(parent);
                }
            }
        }

        // Depth-first over reversed paths; each extension yields one path.
        let mut stack: Vec<Vec<RecordId>> = vec![vec![output_id.to_string()]];
        'walk: while let Some(path) = stack.pop() {
            let Some(head) = path.last() else {
                continue;
            };
            for parent in self.parents(head) {
                if path.contains(&parent) {
                    continue;
                }
                if report.paths.len() >= self.max_paths {
                    report.truncated = true;
                    break 'walk;
                }
                let mut extended = path.clone();
                extended.push(parent);
                report.paths.push(extended.iter().rev().cloned().collect());
                stack.push(extended);
            }
        }
        report.paths.sort();
        report
    }

    /// Every record `source_id` transitively contributed to.
    pub fn descendants(&self, source_id: &str) -> BTreeSet<RecordId> {
        let mut seen = BTreeSet::new();
        let mut queue = VecDeque::from([source_id.to_string()]);
        while let Some(id) = queue.pop_front() {
            for child in self.children(&id) {
                if child != source_id && seen.insert(child.clone()) {
                    queue.push_back(child);
                }
            }
        }
        seen
    }

    /// Downstream count and the systems attached to those records.
    pub fn impact(&self, source_id: &str) -> ImpactReport {
        let downstream = self.descendants(source_id);
        let mut systems = BTreeSet::new();
        for id in &downstream {
            if let Some(tags) = self.tags.get(id) {
                systems.extend(tags.iter().cloned());
            }
        }
        ImpactReport {
            downstream_count: downstream.len(),
            systems,
        }
    }

    pub(crate) fn unpin(&self, batch: &str) {
        let remove = match self.pinned.get_mut(batch) {
            Some(mut count) => {
                *count = count.saturating_sub(1);
                *count == 0
            }
            None => false,
        };
        if remove {
            self.pinned.remove_if(batch, |_, count| *count == 0);
        }
    }
}

/// Records edges under a pinned batch; unpins on drop.
pub struct BatchRecorder<'a> {
    store: &'a LineageStore,
    batch: String,
}

impl BatchRecorder<'_> {
    pub fn batch(&self) -> &str {
        &self.batch
    }

    pub fn record(&self, draft: EdgeDraft) -> u64 {
        self.store.append(Some(&self.batch), draft)
    }
}

impl Drop for BatchRecorder<'_> {
    fn drop(&mut self) {
        self.store.unpin(&self.batch);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn id(name: &str) -> RecordId {
        name.to_string()
    }

    fn link(store: &LineageStore, inputs: &[&str], output: &str) {
        store.record(
            inputs.iter().map(|s| id(s)).collect(),
            id(output),
            "r",
            Record::new(),
            Record::new(),
        );
    }

    /// a -> x, b -> x, x -> y, c -> y
    fn diamond() -> LineageStore {
        let store = LineageStore::default();
        link(&store, &["a", "b"], "x");
        link(&store, &["x"], "y");
        link(&store, &["c"], "y");
        store
    }

    #[test]
    fn test_record_is_append_only() {
        let store = diamond();
        let snapshot = store.snapshot();
        assert_eq!(snapshot.len(), 3);
        assert_eq!(
            snapshot.iter().map(|e| e.sequence).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        link(&store, &["a"], "z");
        assert_eq!(&store.snapshot()[..3], &snapshot[..]);
    }

    #[test]
    fn test_ancestors_and_paths() {
        let store = diamond();
        let report = store.ancestors("y");
        let expected: BTreeSet<RecordId> = ["a", "b", "c", "x"].iter().map(|s| id(s)).collect();
        assert_eq!(report.ancestors, expected);
        let mut expected_paths = vec![
            vec![id("a"), id("x"), id("y")],
            vec![id("b"), id("x"), id("y")],
            vec![id("c"), id("y")],
            vec![id("x"), id("y")],
        ];
        expected_paths.sort();
        assert_eq!(report.paths, expected_paths);
        assert!(!report.truncated);
    }

    #[test]
    fn test_path_cap() {
        let config = LineageConfig {
            max_paths: 2,
            ..LineageConfig::default()
        };
        let store = LineageStore::new(&config);
        link(&store, &["a", "b", "c"], "x");
        let report = store.ancestors("x");
        assert_eq!(report.ancestors.len(), 3);
        assert_eq!(report.paths.len(), 2);
        assert!(report.truncated);
    }

    #[test]
    fn test_descendants_and_impact() {
        let store = diamond();
        let down: Vec<RecordId> = store.descendants("a").into_iter().collect();
        assert_eq!(down, vec![id("x"), id("y")]);
        assert!(store.descendants("y").is_empty());

        store.tag(&id("y"), ["warehouse"]);
        store.tag(&id("x"), ["crm", "warehouse"]);
        let impact = store.impact("a");
        assert_eq!(impact.downstream_count, 2);
        assert_eq!(
            impact.systems.into_iter().collect::<Vec<_>>(),
            vec!["crm".to_string(), "warehouse".to_string()]
        );
        assert_eq!(store.impact("c").systems.len(), 1);
    }

    #[test]
    fn test_cycle_safe_queries() {
        let store = LineageStore::default();
        link(&store, &["a"], "b");
        link(&store, &["b"], "a");
        assert_eq!(store.ancestors("a").ancestors.len(), 1);
        assert_eq!(store.descendants("a").len(), 1);
    }

    #[test]
    fn test_batch_pinning() {
        let store = LineageStore::default();
        {
            let recorder = store.begin_batch("s#0");
            let _second = store.begin_batch("s#0");
            recorder.record(EdgeDraft {
                input_ids: vec![id("a")],
                output_id: id("b"),
                rule_id: "r".into(),
                ..EdgeDraft::default()
            });
            assert!(store.is_pinned("s#0"));
        }
        assert!(!store.is_pinned("s#0"));
        assert_eq!(store.snapshot()[0].batch.as_deref(), Some("s#0"));
    }
}
