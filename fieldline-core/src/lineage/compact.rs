//! Export and compaction of settled lineage edges.

use crate::error::SinkError;
use crate::lineage::store::{LineageEdge, LineageStore};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::debug;

/// Destination for exported lineage edges.
pub trait LineageExporter {
    fn export(&mut self, edges: &[LineageEdge]) -> Result<(), SinkError>;
}

impl LineageExporter for Vec<LineageEdge> {
    fn export(&mut self, edges: &[LineageEdge]) -> Result<(), SinkError> {
        self.extend_from_slice(edges);
        Ok(())
    }
}

impl LineageStore {
    /// Export, then remove, every edge older than the retention window whose
    /// batch is not pinned. Returns the number of edges compacted.
    ///
    /// Edges of in-flight batches stay, so queries about records still being
    /// processed keep working. Nothing is removed if the export fails.
    pub fn compact(
        &self,
        now: DateTime<Utc>,
        exporter: &mut dyn LineageExporter,
    ) -> Result<usize, SinkError> {
        let cutoff = now - self.retention;
        let mut expired: Vec<LineageEdge> = self
            .edges
            .iter()
            .filter(|entry| {
                let edge = entry.value();
                edge.recorded_at <= cutoff
                    && edge
                        .batch
                        .as_deref()
                        .is_none_or(|batch| !self.pinned.contains_key(batch))
            })
            .map(|entry| entry.value().as_ref().clone())
            .collect();
        if expired.is_empty() {
            return Ok(0);
        }
        expired.sort_by_key(|e| e.sequence);
        exporter.export(&expired)?;

        for edge in &expired {
            self.edges.remove(&edge.sequence);
            for input in &edge.input_ids {
                forget(&self.by_input, input, edge.sequence);
            }
            forget(&self.by_output, &edge.output_id, edge.sequence);
        }
        for edge in &expired {
            for id in edge.input_ids.iter().chain(std::iter::once(&edge.output_id)) {
                if !self.by_output.contains_key(id) && !self.by_input.contains_key(id) {
                    self.tags.remove(id);
                }
            }
        }
        debug!(
            compacted = expired.len(),
            remaining = self.edges.len(),
            "Compacted lineage edges"
        );
        Ok(expired.len())
    }

    /// Export every live edge without removing it.
    pub fn export_all(&self, exporter: &mut dyn LineageExporter) -> Result<usize, SinkError> {
        self.export_from(0, exporter)
    }

    /// Export live edges with `sequence >= first`, in sequence order,
    /// without removing them.
    pub fn export_from(
        &self,
        first: u64,
        exporter: &mut dyn LineageExporter,
    ) -> Result<usize, SinkError> {
        let edges: Vec<LineageEdge> = self
            .snapshot()
            .into_iter()
            .filter(|e| e.sequence >= first)
            .collect();
        if !edges.is_empty() {
            exporter.export(&edges)?;
        }
        Ok(edges.len())
    }
}

fn forget(index: &DashMap<String, Vec<u64>>, id: &str, sequence: u64) {
    if let Some(mut seqs) = index.get_mut(id) {
        seqs.retain(|s| *s != sequence);
    }
    index.remove_if(id, |_, seqs| seqs.is_empty());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lineage::store::EdgeDraft;
    use crate::types::Record;
    use chrono::Duration;

    fn draft(input: &str, output: &str) -> EdgeDraft {
        EdgeDraft {
            input_ids: vec![input.to_string()],
            output_id: output.to_string(),
            rule_id: "r".into(),
            ..EdgeDraft::default()
        }
    }

    #[test]
    fn test_compact_skips_recent_edges() {
        let store = LineageStore::default();
        store.record(vec!["a".into()], "x".into(), "r", Record::new(), Record::new());
        let mut exported = Vec::new();
        assert_eq!(store.compact(Utc::now(), &mut exported).unwrap(), 0);
        assert!(exported.is_empty());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_compact_exports_and_preserves_pinned_batches() {
        let store = LineageStore::default();
        let later = Utc::now() + Duration::hours(2);

        {
            let done = store.begin_batch("s#0");
            done.record(draft("a", "x"));
        }
        let in_flight = store.begin_batch("s#1");
        in_flight.record(draft("b", "y"));

        let mut exported = Vec::new();
        let compacted = store.compact(later, &mut exported).unwrap();
        assert_eq!(compacted, 1);
        assert_eq!(exported[0].output_id, "x");

        // Settled records are gone from the live graph; in-flight ones remain.
        assert!(store.ancestors("x").ancestors.is_empty());
        assert!(store.descendants("a").is_empty());
        assert_eq!(store.ancestors("y").ancestors.len(), 1);
        assert_eq!(store.descendants("b").len(), 1);

        drop(in_flight);
        assert_eq!(store.compact(later, &mut exported).unwrap(), 1);
        assert!(store.is_empty());
    }

    #[test]
    fn test_compact_drops_tags_of_removed_records() {
        let store = LineageStore::default();
        let later = Utc::now() + Duration::hours(2);

        {
            let done = store.begin_batch("s#0");
            done.record(draft("a", "x"));
        }
        let in_flight = store.begin_batch("s#1");
        in_flight.record(draft("b", "y"));
        store.tag(&"x".to_string(), ["crm"]);
        store.tag(&"y".to_string(), ["crm"]);

        let mut exported = Vec::new();
        assert_eq!(store.compact(later, &mut exported).unwrap(), 1);
        assert!(!store.tags.contains_key("x"));
        assert!(store.tags.contains_key("y"));
        assert_eq!(store.impact("b").systems.len(), 1);

        drop(in_flight);
        store.compact(later, &mut exported).unwrap();
        assert!(store.tags.is_empty());
    }

    #[test]
    fn test_export_all_keeps_edges() {
        let store = LineageStore::default();
        store.record(vec!["a".into()], "x".into(), "r", Record::new(), Record::new());
        store.record(vec!["x".into()], "y".into(), "r", Record::new(), Record::new());
        let mut exported = Vec::new();
        assert_eq!(store.export_all(&mut exported).unwrap(), 2);
        assert_eq!(exported.len(), 2);
        assert_eq!(store.len(), 2);

        let mut later = Vec::new();
        let first = store.next_sequence();
        store.record(vec!["y".into()], "z".into(), "r", Record::new(), Record::new());
        assert_eq!(store.export_from(first, &mut later).unwrap(), 1);
        assert_eq!(later[0].output_id, "z");
    }

    struct Failing;

    impl LineageExporter for Failing {
        fn export(&mut self, _: &[LineageEdge]) -> Result<(), SinkError> {
            Err(SinkError::Write {
                message: "disk full".into(),
            })
        }
    }

    #[test]
    fn test_failed_export_removes_nothing() {
        let store = LineageStore::default();
        store.record(vec!["a".into()], "x".into(), "r", Record::new(), Record::new());
        let later = Utc::now() + Duration::hours(2);
        assert!(store.compact(later, &mut Failing).is_err());
        assert_eq!(store.len(), 1);
    }
}
