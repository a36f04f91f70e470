//! Source catalog inference from sampled column values.

use crate::config::TargetField;
use crate::mapping::model::{MappingNode, SemanticType};
use crate::mapping::similarity::{SampleShape, classify_sample};
use crate::types::Chunk;

/// Infer a semantic type from sample values. Blank values are ignored;
/// an all-blank column is `Unknown`.
pub fn infer_semantic_type<'a>(samples: impl IntoIterator<Item = &'a str>) -> SemanticType {
    let mut shapes: Vec<SampleShape> = Vec::new();
    for sample in samples {
        if sample.trim().is_empty() {
            continue;
        }
        let shape = classify_sample(sample);
        if !shapes.contains(&shape) {
            shapes.push(shape);
        }
    }

    match shapes.as_slice() {
        [] => SemanticType::Unknown,
        [only] => shape_type(*only),
        mixed if mixed
            .iter()
            .all(|s| matches!(s, SampleShape::Integer | SampleShape::Decimal)) =>
        {
            SemanticType::Decimal
        }
        mixed if mixed
            .iter()
            .all(|s| matches!(s, SampleShape::Date | SampleShape::DateTime)) =>
        {
            SemanticType::DateTime
        }
        mixed if mixed
            .iter()
            .all(|s| matches!(s, SampleShape::Integer | SampleShape::PostalCode)) =>
        {
            SemanticType::PostalCode
        }
        _ => SemanticType::String,
    }
}

fn shape_type(shape: SampleShape) -> SemanticType {
    match shape {
        SampleShape::Boolean => SemanticType::Boolean,
        SampleShape::Integer => SemanticType::Integer,
        SampleShape::Decimal => SemanticType::Decimal,
        SampleShape::Date => SemanticType::Date,
        SampleShape::DateTime => SemanticType::DateTime,
        SampleShape::Email => SemanticType::Email,
        SampleShape::Phone => SemanticType::Phone,
        SampleShape::PostalCode => SemanticType::PostalCode,
        SampleShape::Text => SemanticType::String,
    }
}

/// Build source nodes for every header column of a chunk, inferring types
/// from up to `sample_rows` rows. The first non-blank value becomes the
/// node's sample.
pub fn source_nodes(chunk: &Chunk, sample_rows: usize) -> Vec<MappingNode> {
    let rows = &chunk.rows[..chunk.rows.len().min(sample_rows)];
    chunk
        .header
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let values: Vec<&str> = rows
                .iter()
                .filter_map(|row| row.fields.get(i).map(String::as_str))
                .collect();
            let mut node = MappingNode::source(name.clone(), infer_semantic_type(values.iter().copied()))
                .at(0.0, i as f32);
            if let Some(sample) = values.iter().find(|v| !v.trim().is_empty()) {
                node = node.with_sample(*sample);
            }
            node
        })
        .collect()
}

/// Target nodes for the configured target schema, in declaration order.
pub fn target_nodes(targets: &[TargetField]) -> Vec<MappingNode> {
    targets
        .iter()
        .enumerate()
        .map(|(i, field)| {
            let node = MappingNode::target(field.name.clone(), field.semantic_type).at(1.0, i as f32);
            match &field.sample {
                Some(sample) => node.with_sample(sample.clone()),
                None => node,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SourceRow;
    use std::sync::Arc;

    #[test]
    fn test_infer_single_shape() {
        assert_eq!(infer_semantic_type(["1", "2", "30"]), SemanticType::Integer);
        assert_eq!(
            infer_semantic_type(["a@b.io", "", "c@d.org"]),
            SemanticType::Email
        );
        assert_eq!(infer_semantic_type(["", " "]), SemanticType::Unknown);
    }

    #[test]
    fn test_infer_mixed_shapes() {
        assert_eq!(infer_semantic_type(["1", "2.5"]), SemanticType::Decimal);
        assert_eq!(
            infer_semantic_type(["2024-01-01", "2024-01-01T10:00:00"]),
            SemanticType::DateTime
        );
        assert_eq!(infer_semantic_type(["1", "Jane"]), SemanticType::String);
    }

    #[test]
    fn test_source_nodes_from_chunk() {
        let chunk = Chunk {
            source: "s".into(),
            index: 0,
            header: Arc::new(vec!["id".into(), "email".into()]),
            rows: vec![
                SourceRow {
                    ordinal: 1,
                    fields: vec!["1".into(), String::new()],
                },
                SourceRow {
                    ordinal: 2,
                    fields: vec!["2".into(), "x@y.com".into()],
                },
            ],
            error_rows: Vec::new(),
        };
        let nodes = source_nodes(&chunk, 50);
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].id, "source:id");
        assert_eq!(nodes[0].semantic_type, SemanticType::Integer);
        assert_eq!(nodes[1].semantic_type, SemanticType::Email);
        assert_eq!(nodes[1].sample.as_deref(), Some("x@y.com"));
    }
}
