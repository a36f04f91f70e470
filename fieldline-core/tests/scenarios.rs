//! End-to-end acceptance scenarios for the engine.

use fieldline_core::config::EngineConfig;
use fieldline_core::ingest::{ChunkStream, DetectionCache, SourceInput};
use fieldline_core::pipeline::{FailureReason, Pipeline, RunStatus};
use fieldline_core::rules::{Calculation, TransformKind, TransformRule};
use fieldline_core::sink::MemorySink;
use fieldline_core::validate::{FieldFormat, FieldRule};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use std::io::Cursor;

fn copy(id: &str, source: &str, target: &str) -> TransformRule {
    TransformRule::new(id, vec![source.into()], target, TransformKind::DirectCopy)
}

#[tokio::test]
async fn scenario_direct_copy_and_decimal_parse() {
    let mut config = EngineConfig::default();
    config.stream.delimiter = ",".into();
    config.rules = vec![
        copy("name", "Full_Name", "name"),
        TransformRule::new(
            "amount",
            vec!["amt".into()],
            "amount",
            TransformKind::Calculation {
                calculation: Calculation::parse_decimal(),
            },
        ),
    ];
    config.validation.fields = vec![
        FieldRule::new("name").required(),
        FieldRule::new("amount")
            .required()
            .with_format(FieldFormat::Numeric),
    ];

    let pipeline = Pipeline::new(config);
    let mut sink = MemorySink::new();
    let source = SourceInput::from_bytes("people.csv", "Full_Name,amt\nJane Doe,\"1,234.50\"\n");
    let summary = pipeline.run(vec![source], &mut sink).await.unwrap();

    let rows: Vec<_> = sink.rows().collect();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].record["name"], json!("Jane Doe"));
    assert_eq!(rows[0].record["amount"], json!(1234.5));
    assert_eq!(summary.quality.errors, 0);
    assert_eq!(summary.status, RunStatus::Success);
}

#[test]
fn scenario_semicolon_source_is_one_chunk() {
    let config = fieldline_core::config::StreamConfig {
        chunk_size: 3,
        ..Default::default()
    };
    let cache = DetectionCache::new();
    let text = "id;name;city\n1;Ann;Oslo\n2;Bob;Rome\n3;Cy;Lima\n";
    let mut stream = ChunkStream::open(
        "cities.csv",
        Box::new(Cursor::new(text.as_bytes().to_vec())),
        &config,
        &cache,
    )
    .unwrap();

    assert_eq!(stream.header().as_slice(), ["id", "name", "city"]);
    let chunks: Vec<_> = stream.by_ref().map(|c| c.unwrap()).collect();
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].rows.len(), 3);
    assert_eq!(stream.detection().delimiter, b';');
}

#[tokio::test]
async fn scenario_lookup_miss_keeps_row() {
    let mut config = EngineConfig::default();
    config.lookups = BTreeMap::from([(
        "countries".to_string(),
        BTreeMap::from([("DE".to_string(), json!("Germany"))]),
    )]);
    config.rules = vec![TransformRule::new(
        "country",
        vec!["country".into()],
        "country_name",
        TransformKind::Lookup {
            table: "countries".into(),
            default: None,
        },
    )];
    config.rule_engine.max_rule_failures = 1;

    let pipeline = Pipeline::new(config);
    let mut sink = MemorySink::new();
    let source = SourceInput::from_bytes("orders.csv", "country\nXX\n");
    let summary = pipeline.run(vec![source], &mut sink).await.unwrap();

    let rows: Vec<_> = sink.rows().collect();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].record["country_name"], json!(null));
    assert_eq!(summary.counts.rule_failures, 1);
    assert_eq!(summary.counts.rejected_rows, 0);
    assert!(sink.error_rows.is_empty());
    assert_eq!(summary.status, RunStatus::SuccessWithWarnings);
}

#[tokio::test]
async fn scenario_strict_malformed_row_aborts() {
    let mut config = EngineConfig::default();
    config.stream.strict = true;
    config.rules = vec![copy("a", "a", "a")];

    let pipeline = Pipeline::new(config);
    let mut sink = MemorySink::new();
    let source = SourceInput::from_bytes("wide.csv", "a,b,c,d\n1,2,3,4\n1,2,3,4,5\n");
    let summary = pipeline.run(vec![source], &mut sink).await.unwrap();

    match &summary.status {
        RunStatus::Failed(FailureReason::MalformedInput {
            source, ordinal, ..
        }) => {
            assert_eq!(source, "wide.csv");
            assert_eq!(*ordinal, 2);
        }
        other => panic!("expected malformed input failure, got {other:?}"),
    }
    assert_eq!(sink.rows().count(), 0);
    assert_eq!(summary.counts.rows_out, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn scenario_lineage_stays_within_chunk() {
    let mut config = EngineConfig::default();
    config.stream.chunk_size = 10;
    config.stream.worker_pool_size = 2;
    config.rules = vec![copy("id", "id", "id")];

    let mut text = String::from("id\n");
    for i in 0..20 {
        text.push_str(&format!("{i}\n"));
    }
    let pipeline = Pipeline::new(config);
    let mut sink = MemorySink::new();
    let summary = pipeline
        .run(vec![SourceInput::from_bytes("ids.csv", text)], &mut sink)
        .await
        .unwrap();

    assert_eq!(summary.counts.chunks, 2);
    assert_eq!(summary.counts.lineage_edges, 20);
    assert_eq!(sink.lineage.len(), 20);

    let rows: Vec<_> = sink.rows().collect();
    assert_eq!(rows.len(), 20);
    let first_chunk_inputs: BTreeSet<_> = rows[..10]
        .iter()
        .flat_map(|r| r.inputs.iter().cloned())
        .collect();

    let store = pipeline.lineage();
    for row in &rows[10..] {
        let report = store.ancestors(&row.id);
        let expected: BTreeSet<_> = row.inputs.iter().cloned().collect();
        assert_eq!(report.ancestors, expected);
        assert!(report.ancestors.is_disjoint(&first_chunk_inputs));
    }
}
