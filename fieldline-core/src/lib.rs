//! # Fieldline Core
//!
//! Field-level transformation and reconciliation engine for data migrations.
//! Streams delimited sources of any size, proposes source-to-target field
//! mappings, applies declarative transformation rules, records lineage per
//! output record, scores data quality and merges results from parallel
//! workers in a deterministic order.

pub mod config;
pub mod error;
pub mod ingest;
pub mod lineage;
pub mod mapping;
pub mod merge;
pub mod pipeline;
pub mod rules;
pub mod sink;
pub mod types;
pub mod validate;

// Re-export commonly used types at the crate root.
pub use config::{EngineConfig, TargetField, from_toml_str, load_config};
pub use error::{FieldlineError, Result};
pub use ingest::{ChunkStream, DetectionCache, SourceInput};
pub use lineage::{LineageEdge, LineageStore};
pub use mapping::{AutoMapper, MappingPlan, SemanticType};
pub use merge::{MergeMode, Merger};
pub use pipeline::{FailureReason, Pipeline, RunCounts, RunStatus, RunSummary};
pub use rules::{RuleEngine, RuleSet, TransformKind, TransformRule};
pub use sink::{JsonlSink, MemorySink, RunSink};
pub use types::{Chunk, OutputBatch, OutputRow, Record};
pub use validate::{QualityMetrics, ValidationResult, Validator};
