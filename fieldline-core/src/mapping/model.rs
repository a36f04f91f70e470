//! Mapping graph model: nodes, edges and resolved chains.

use crate::error::MappingError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Declared semantic type of a field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SemanticType {
    String,
    Integer,
    Float,
    Decimal,
    Boolean,
    Date,
    DateTime,
    Email,
    Phone,
    PostalCode,
    #[default]
    Unknown,
}

/// Role of a node in the mapping graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRole {
    Source,
    Target,
    Transformation,
}

/// A field (or transformation step) in the mapping graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingNode {
    pub id: String,
    pub name: String,
    pub role: NodeRole,
    #[serde(default)]
    pub semantic_type: SemanticType,
    #[serde(default)]
    pub sample: Option<String>,
    /// Layout hint for visualization only.
    #[serde(default)]
    pub position: (f32, f32),
}

impl MappingNode {
    pub fn source(name: impl Into<String>, semantic_type: SemanticType) -> Self {
        let name = name.into();
        Self {
            id: format!("source:{name}"),
            name,
            role: NodeRole::Source,
            semantic_type,
            sample: None,
            position: (0.0, 0.0),
        }
    }

    pub fn target(name: impl Into<String>, semantic_type: SemanticType) -> Self {
        let name = name.into();
        Self {
            id: format!("target:{name}"),
            name,
            role: NodeRole::Target,
            semantic_type,
            sample: None,
            position: (0.0, 0.0),
        }
    }

    pub fn transformation(id: impl Into<String>, function: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: function.into(),
            role: NodeRole::Transformation,
            semantic_type: SemanticType::Unknown,
            sample: None,
            position: (0.0, 0.0),
        }
    }

    pub fn with_sample(mut self, sample: impl Into<String>) -> Self {
        self.sample = Some(sample.into());
        self
    }

    pub fn at(mut self, x: f32, y: f32) -> Self {
        self.position = (x, y);
        self
    }
}

/// A directed edge between mapping nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingEdge {
    /// Ordered source node ids (more than one for composite edges).
    pub from: Vec<String>,
    pub to: String,
    #[serde(default)]
    pub function: Option<String>,
    #[serde(default)]
    pub params: serde_json::Map<String, serde_json::Value>,
    /// Composite score when produced by the auto mapper.
    #[serde(default)]
    pub confidence: Option<f64>,
}

impl MappingEdge {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: vec![from.into()],
            to: to.into(),
            function: None,
            params: serde_json::Map::new(),
            confidence: None,
        }
    }
}

/// One target resolved back through transformation nodes to its sources.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedMapping {
    pub target: String,
    /// Source node ids, in first-reached order.
    pub sources: Vec<String>,
    /// Transformation node ids, ordered source side first.
    pub transformations: Vec<String>,
}

/// Resolve every target node that has incoming edges into its chain.
///
/// Errors on dangling node references, cycles, and chains that end at a
/// transformation node with no inputs.
pub fn resolve_chains(
    nodes: &[MappingNode],
    edges: &[MappingEdge],
) -> Result<Vec<ResolvedMapping>, MappingError> {
    let by_id: HashMap<&str, &MappingNode> = nodes.iter().map(|n| (n.id.as_str(), n)).collect();
    let mut incoming: BTreeMap<&str, Vec<&MappingEdge>> = BTreeMap::new();
    for edge in edges {
        for id in edge.from.iter().chain(std::iter::once(&edge.to)) {
            if !by_id.contains_key(id.as_str()) {
                return Err(MappingError::InvalidChain {
                    target: edge.to.clone(),
                    reason: format!("unknown node '{id}'"),
                });
            }
        }
        incoming.entry(edge.to.as_str()).or_default().push(edge);
    }

    let mut resolved = Vec::new();
    for node in nodes.iter().filter(|n| n.role == NodeRole::Target) {
        if !incoming.contains_key(node.id.as_str()) {
            continue;
        }
        let mut mapping = ResolvedMapping {
            target: node.id.clone(),
            sources: Vec::new(),
            transformations: Vec::new(),
        };
        let mut on_path = HashSet::new();
        walk_back(&node.id, &node.id, &by_id, &incoming, &mut on_path, &mut mapping)?;
        resolved.push(mapping);
    }
    Ok(resolved)
}

fn walk_back(
    target: &str,
    id: &str,
    by_id: &HashMap<&str, &MappingNode>,
    incoming: &BTreeMap<&str, Vec<&MappingEdge>>,
    on_path: &mut HashSet<String>,
    mapping: &mut ResolvedMapping,
) -> Result<(), MappingError> {
    if !on_path.insert(id.to_string()) {
        return Err(MappingError::InvalidChain {
            target: target.to_string(),
            reason: format!("cycle through '{id}'"),
        });
    }
    let Some(edges) = incoming.get(id) else {
        on_path.remove(id);
        return Ok(());
    };
    for edge in edges {
        for from in &edge.from {
            let node = by_id[from.as_str()];
            match node.role {
                NodeRole::Source => {
                    if !mapping.sources.contains(from) {
                        mapping.sources.push(from.clone());
                    }
                }
                NodeRole::Transformation => {
                    if !incoming.contains_key(from.as_str()) {
                        return Err(MappingError::InvalidChain {
                            target: target.to_string(),
                            reason: format!("transformation '{from}' has no inputs"),
                        });
                    }
                    walk_back(target, from, by_id, incoming, on_path, mapping)?;
                    if !mapping.transformations.contains(from) {
                        mapping.transformations.push(from.clone());
                    }
                }
                NodeRole::Target => {
                    return Err(MappingError::InvalidChain {
                        target: target.to_string(),
                        reason: format!("target '{from}' used as an input"),
                    });
                }
            }
        }
    }
    on_path.remove(id);
    Ok(())
}
