//! Auto mapper: proposes source to target field mappings from name, type,
//! sample and heuristic signals.

pub mod auto;
pub mod infer;
pub mod model;
pub mod similarity;

pub use auto::{AutoMapper, MappingCandidate, MappingPlan, ScoreBreakdown, ScoreWeights};
pub use infer::{infer_semantic_type, source_nodes, target_nodes};
pub use model::{
    MappingEdge, MappingNode, NodeRole, ResolvedMapping, SemanticType, resolve_chains,
};
pub use similarity::{HeuristicScorer, SampleShape, SynonymHeuristic};
