//! Lineage tracker: content-addressed provenance graph with ancestor,
//! descendant and impact queries.

pub mod compact;
pub mod identity;
pub mod store;

pub use compact::LineageExporter;
pub use identity::{RecordId, input_id, output_id};
pub use store::{AncestorReport, BatchRecorder, EdgeDraft, ImpactReport, LineageEdge, LineageStore};
