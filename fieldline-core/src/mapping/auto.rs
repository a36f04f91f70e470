//! Auto mapper: scores every source/target pair and proposes at most one
//! source per target.

use crate::config::TargetField;
use crate::error::MappingError;
use crate::mapping::model::{MappingEdge, MappingNode, NodeRole};
use crate::mapping::similarity::{
    HeuristicScorer, SynonymHeuristic, name_similarity, pattern_score, type_compatibility,
};
use crate::rules::{TransformKind, TransformRule};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// Scores this close below the threshold still count as reaching it.
const THRESHOLD_EPSILON: f64 = 1e-9;

/// Relative weight of each similarity signal.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreWeights {
    pub name: f64,
    pub type_compat: f64,
    pub pattern: f64,
    pub heuristic: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            name: 0.4,
            type_compat: 0.3,
            pattern: 0.2,
            heuristic: 0.1,
        }
    }
}

/// Individual signals and the weighted total for one pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub name: f64,
    pub type_compat: f64,
    pub pattern: f64,
    /// `None` when no heuristic scorer is configured.
    pub heuristic: Option<f64>,
    pub total: f64,
}

/// An accepted source/target pairing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingCandidate {
    pub source: String,
    pub target: String,
    pub score: ScoreBreakdown,
}

/// Scores source/target catalogs and selects mappings.
#[derive(Clone)]
pub struct AutoMapper {
    threshold: f64,
    weights: ScoreWeights,
    heuristic: Option<Arc<dyn HeuristicScorer>>,
}

impl std::fmt::Debug for AutoMapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutoMapper")
            .field("threshold", &self.threshold)
            .field("weights", &self.weights)
            .field("heuristic", &self.heuristic.is_some())
            .finish()
    }
}

impl Default for AutoMapper {
    fn default() -> Self {
        Self::new(0.7)
    }
}

impl AutoMapper {
    /// A mapper with default weights and the built-in synonym heuristic.
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            weights: ScoreWeights::default(),
            heuristic: Some(Arc::new(SynonymHeuristic::default())),
        }
    }

    pub fn with_heuristic(mut self, heuristic: Arc<dyn HeuristicScorer>) -> Self {
        self.heuristic = Some(heuristic);
        self
    }

    /// Drop the heuristic signal; the remaining weights are renormalized.
    pub fn without_heuristic(mut self) -> Self {
        self.heuristic = None;
        self
    }

    pub fn with_weights(mut self, weights: ScoreWeights) -> Self {
        self.weights = weights;
        self
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Composite score of one pair.
    pub fn score(&self, source: &MappingNode, target: &MappingNode) -> ScoreBreakdown {
        let w = &self.weights;
        let name = name_similarity(&source.name, &target.name);
        let type_compat = type_compatibility(source.semantic_type, target.semantic_type);
        let pattern = pattern_score(source, target);
        let heuristic = self.heuristic.as_ref().map(|h| h.score(source, target));

        let mut weighted = w.name * name + w.type_compat * type_compat + w.pattern * pattern;
        let mut weight_sum = w.name + w.type_compat + w.pattern;
        if let Some(h) = heuristic {
            weighted += w.heuristic * h;
            weight_sum += w.heuristic;
        }
        let total = if weight_sum > 0.0 {
            weighted / weight_sum
        } else {
            0.0
        };
        ScoreBreakdown {
            name,
            type_compat,
            pattern,
            heuristic,
            total,
        }
    }

    /// Propose mappings: for each target in declaration order, the single
    /// best source at or above the threshold. Ties go to the earlier source.
    pub fn propose(&self, sources: &[MappingNode], targets: &[MappingNode]) -> MappingPlan {
        let mut plan = MappingPlan {
            nodes: sources.iter().chain(targets.iter()).cloned().collect(),
            ..MappingPlan::default()
        };

        for target in targets {
            let mut best: Option<(&MappingNode, ScoreBreakdown)> = None;
            for source in sources {
                let score = self.score(source, target);
                if score.total + THRESHOLD_EPSILON < self.threshold {
                    continue;
                }
                let better = match &best {
                    Some((_, current)) => score.total > current.total,
                    None => true,
                };
                if better {
                    best = Some((source, score));
                }
            }

            match best {
                Some((source, score)) => {
                    debug!(
                        source = %source.name,
                        target = %target.name,
                        score = score.total,
                        "Auto-mapped field"
                    );
                    let mut edge = MappingEdge::new(source.id.clone(), target.id.clone());
                    edge.confidence = Some(score.total);
                    plan.edges.push(edge);
                    plan.candidates.push(MappingCandidate {
                        source: source.name.clone(),
                        target: target.name.clone(),
                        score,
                    });
                }
                None => {
                    debug!(target = %target.name, "No source reached the mapping threshold");
                    plan.unmapped.push(target.name.clone());
                }
            }
        }

        info!(
            mapped = plan.candidates.len(),
            unmapped = plan.unmapped.len(),
            threshold = self.threshold,
            "Auto mapping complete"
        );
        plan
    }
}

/// Result of an auto-mapping pass, advisory until converted to rules.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MappingPlan {
    pub nodes: Vec<MappingNode>,
    pub edges: Vec<MappingEdge>,
    pub candidates: Vec<MappingCandidate>,
    /// Target names no source reached the threshold for.
    pub unmapped: Vec<String>,
}

impl MappingPlan {
    /// Add an explicit multi-source edge without scoring. Replaces any
    /// scored edge into the same target.
    pub fn with_composite(mut self, sources: &[&str], target: &str, separator: &str) -> Self {
        let target_id = self.ensure_node(target, NodeRole::Target);
        let from = sources
            .iter()
            .map(|s| self.ensure_node(s, NodeRole::Source))
            .collect();

        self.edges.retain(|e| e.to != target_id);
        self.candidates.retain(|c| c.target != target);
        self.unmapped.retain(|t| t != target);

        let mut edge = MappingEdge::new("", target_id);
        edge.from = from;
        edge.function = Some("concatenate".to_string());
        edge.params.insert(
            "separator".to_string(),
            serde_json::Value::String(separator.to_string()),
        );
        self.edges.push(edge);
        self
    }

    fn ensure_node(&mut self, name: &str, role: NodeRole) -> String {
        if let Some(node) = self.nodes.iter().find(|n| n.role == role && n.name == name) {
            return node.id.clone();
        }
        let node = match role {
            NodeRole::Target => MappingNode::target(name, Default::default()),
            _ => MappingNode::source(name, Default::default()),
        };
        let id = node.id.clone();
        self.nodes.push(node);
        id
    }

    fn node_name(&self, id: &str) -> Option<&str> {
        self.nodes
            .iter()
            .find(|n| n.id == id)
            .map(|n| n.name.as_str())
    }

    /// Convert edges into rule stubs: `direct_copy` for single-source edges,
    /// `concatenate` for composite ones. Stubs stay disabled unless `activate`.
    pub fn rule_stubs(&self, activate: bool) -> Vec<TransformRule> {
        let mut rules = Vec::with_capacity(self.edges.len());
        for edge in &self.edges {
            let Some(target) = self.node_name(&edge.to) else {
                continue;
            };
            let sources: Vec<String> = edge
                .from
                .iter()
                .filter_map(|id| self.node_name(id).map(str::to_string))
                .collect();
            if sources.is_empty() {
                continue;
            }
            let transform = if sources.len() == 1 {
                TransformKind::DirectCopy
            } else {
                let separator = edge
                    .params
                    .get("separator")
                    .and_then(|v| v.as_str())
                    .unwrap_or(" ")
                    .to_string();
                TransformKind::Concatenate { separator }
            };
            let mut rule = TransformRule::new(format!("auto:{target}"), sources, target, transform);
            rule.name = format!("auto-mapped {target}");
            rule.enabled = activate;
            rule.tags.push("auto".to_string());
            rules.push(rule);
        }
        rules
    }

    /// Fail when any mandatory target was left unmapped.
    pub fn require_mandatory(&self, targets: &[TargetField]) -> Result<(), MappingError> {
        let missing: Vec<String> = targets
            .iter()
            .filter(|t| t.mandatory && self.unmapped.contains(&t.name))
            .map(|t| t.name.clone())
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(MappingError::Ambiguous { targets: missing })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::model::SemanticType;
    use pretty_assertions::assert_eq;

    fn sources() -> Vec<MappingNode> {
        vec![
            MappingNode::source("Full_Name", SemanticType::String).with_sample("Jane Doe"),
            MappingNode::source("amt", SemanticType::Decimal).with_sample("1,234.50"),
            MappingNode::source("zip_code", SemanticType::PostalCode).with_sample("94105"),
        ]
    }

    fn targets() -> Vec<MappingNode> {
        vec![
            MappingNode::target("name", SemanticType::String),
            MappingNode::target("amount", SemanticType::Decimal),
            MappingNode::target("postal_code", SemanticType::PostalCode),
            MappingNode::target("loyalty_tier", SemanticType::Integer),
        ]
    }

    struct Fixed(f64);

    impl HeuristicScorer for Fixed {
        fn score(&self, _: &MappingNode, _: &MappingNode) -> f64 {
            self.0
        }
    }

    #[test]
    fn test_propose_maps_obvious_fields() {
        let plan = AutoMapper::new(0.7).propose(&sources(), &targets());
        let pairs: Vec<(&str, &str)> = plan
            .candidates
            .iter()
            .map(|c| (c.source.as_str(), c.target.as_str()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("Full_Name", "name"),
                ("amt", "amount"),
                ("zip_code", "postal_code")
            ]
        );
        assert_eq!(plan.unmapped, vec!["loyalty_tier".to_string()]);
        assert!(plan.edges.iter().all(|e| e.confidence.is_some()));
    }

    #[test]
    fn test_propose_is_idempotent() {
        let mapper = AutoMapper::default();
        let a = mapper.propose(&sources(), &targets());
        let b = mapper.propose(&sources(), &targets());
        assert_eq!(a, b);
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let source = MappingNode::source("order_total", SemanticType::Decimal);
        let target = MappingNode::target("total", SemanticType::Float);
        let probe = AutoMapper::new(0.0).score(&source, &target).total;

        let at = AutoMapper::new(probe).propose(&[source.clone()], &[target.clone()]);
        assert_eq!(at.candidates.len(), 1);

        let above = AutoMapper::new(probe + 1e-6).propose(&[source], &[target]);
        assert!(above.candidates.is_empty());
        assert_eq!(above.unmapped, vec!["total".to_string()]);
    }

    #[test]
    fn test_ties_go_to_earlier_source() {
        let first = MappingNode::source("code", SemanticType::String);
        let second = MappingNode::source("code ", SemanticType::String);
        let target = MappingNode::target("code", SemanticType::String);
        let plan = AutoMapper::new(0.5).propose(&[first, second], &[target]);
        assert_eq!(plan.edges[0].from, vec!["source:code".to_string()]);
    }

    #[test]
    fn test_heuristic_is_pluggable() {
        let source = MappingNode::source("a", SemanticType::Unknown);
        let target = MappingNode::target("b", SemanticType::Unknown);
        let low = AutoMapper::new(0.7)
            .with_heuristic(Arc::new(Fixed(0.0)))
            .score(&source, &target);
        let high = AutoMapper::new(0.7)
            .with_heuristic(Arc::new(Fixed(1.0)))
            .score(&source, &target);
        assert!((high.total - low.total - 0.1).abs() < 1e-9);

        let none = AutoMapper::new(0.7)
            .without_heuristic()
            .score(&source, &target);
        assert_eq!(none.heuristic, None);
    }

    #[test]
    fn test_rule_stubs_and_composite() {
        let plan = AutoMapper::new(0.7)
            .propose(&sources(), &targets())
            .with_composite(&["first", "last"], "loyalty_tier", "-");
        assert!(plan.unmapped.is_empty());

        let stubs = plan.rule_stubs(false);
        assert_eq!(stubs.len(), 4);
        assert!(stubs.iter().all(|r| !r.enabled));
        assert_eq!(stubs[0].id, "auto:name");
        assert!(matches!(stubs[0].transform, TransformKind::DirectCopy));
        assert_eq!(stubs[0].sources, vec!["Full_Name".to_string()]);

        let composite = &stubs[3];
        assert_eq!(composite.sources, vec!["first".to_string(), "last".to_string()]);
        assert!(matches!(
            &composite.transform,
            TransformKind::Concatenate { separator } if separator == "-"
        ));

        assert!(plan.rule_stubs(true).iter().all(|r| r.enabled));
    }

    #[test]
    fn test_require_mandatory() {
        let plan = AutoMapper::new(0.7).propose(&sources(), &targets());
        let optional = vec![TargetField {
            name: "loyalty_tier".into(),
            semantic_type: SemanticType::Integer,
            sample: None,
            mandatory: false,
        }];
        assert!(plan.require_mandatory(&optional).is_ok());

        let mandatory = vec![TargetField {
            mandatory: true,
            ..optional[0].clone()
        }];
        let err = plan.require_mandatory(&mandatory).unwrap_err();
        assert!(err.to_string().contains("loyalty_tier"));
    }
}
