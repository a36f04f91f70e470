//! Property-based tests for core components using proptest.

use proptest::prelude::*;

use fieldline_core::config::ValidationConfig;
use fieldline_core::lineage::{input_id, output_id};
use fieldline_core::mapping::{AutoMapper, MappingNode, SemanticType};
use fieldline_core::rules::{LookupRegistry, RuleContext, RuleEngine, RuleSet, TransformKind, TransformRule};
use fieldline_core::types::{OutputRow, Record};
use fieldline_core::validate::{FieldRule, Validator};
use serde_json::{Value, json};
use std::sync::Arc;

fn engine(rules: &[TransformRule]) -> RuleEngine {
    let set = RuleSet::compile(rules, &RuleContext::default()).unwrap();
    RuleEngine::new(Arc::new(set), 1)
}

fn field_name() -> impl Strategy<Value = String> {
    "[a-z][a-z_]{0,11}"
}

// --- Auto mapper properties ---

proptest! {
    #[test]
    fn mapping_proposal_is_deterministic(
        sources in prop::collection::vec(field_name(), 1..8),
        targets in prop::collection::vec(field_name(), 1..6),
    ) {
        let sources: Vec<_> = sources
            .iter()
            .map(|n| MappingNode::source(n.as_str(), SemanticType::String))
            .collect();
        let targets: Vec<_> = targets
            .iter()
            .map(|n| MappingNode::target(n.as_str(), SemanticType::String))
            .collect();
        let mapper = AutoMapper::new(0.7);
        let first = mapper.propose(&sources, &targets);
        let second = mapper.propose(&sources, &targets);
        prop_assert_eq!(first, second);
    }

    #[test]
    fn identical_names_always_map(name in field_name()) {
        let sources = vec![MappingNode::source(name.as_str(), SemanticType::String)];
        let targets = vec![MappingNode::target(name.as_str(), SemanticType::String)];
        let plan = AutoMapper::new(0.7).propose(&sources, &targets);
        prop_assert!(plan.unmapped.is_empty());
        prop_assert_eq!(plan.edges.len(), 1);
    }

    #[test]
    fn scores_stay_in_unit_range(a in field_name(), b in field_name()) {
        let score = AutoMapper::new(0.7).score(
            &MappingNode::source(a.as_str(), SemanticType::String),
            &MappingNode::target(b.as_str(), SemanticType::Integer),
        );
        prop_assert!((0.0..=1.0).contains(&score.total));
    }
}

// --- Rule engine properties ---

proptest! {
    #[test]
    fn direct_copy_preserves_text(value in ".{0,40}") {
        let engine = engine(&[TransformRule::new(
            "copy",
            vec!["src".into()],
            "dst",
            TransformKind::DirectCopy,
        )]);
        let mut input = Record::new();
        input.insert("src".into(), Value::String(value.clone()));
        let outcome = engine.apply(&input);
        prop_assert_eq!(&outcome.output["dst"], &Value::String(value));
        prop_assert!(outcome.failures.is_empty());
    }

    #[test]
    fn every_rule_for_a_target_is_applied(p1 in -50i32..50, p2 in -50i32..50) {
        prop_assume!(p1 != p2);
        let rules = vec![
            TransformRule::new("first", Vec::new(), "tier", TransformKind::Constant { value: json!("first") })
                .with_priority(p1),
            TransformRule::new("second", Vec::new(), "tier", TransformKind::Constant { value: json!("second") })
                .with_priority(p2),
        ];
        let outcome = engine(&rules).apply(&Record::new());
        let (high, low) = if p1 > p2 { ("first", "second") } else { ("second", "first") };
        let order: Vec<&str> = outcome.applications.iter().map(|a| a.rule_id.as_str()).collect();
        prop_assert_eq!(order, vec![high, low]);
        // The last applied rule writes the final value.
        prop_assert_eq!(&outcome.output["tier"], &json!(low));
    }

    #[test]
    fn disabling_lower_priority_rule_keeps_higher_output(
        a in ".{0,20}",
        b in ".{0,20}",
        lower_enabled in any::<bool>(),
    ) {
        let mut lower = TransformRule::new("r2", vec!["b".into()], "y", TransformKind::DirectCopy)
            .with_priority(5);
        lower.enabled = lower_enabled;
        let rules = vec![
            TransformRule::new("r1", vec!["a".into()], "x", TransformKind::DirectCopy)
                .with_priority(10),
            lower,
        ];
        let mut input = Record::new();
        input.insert("a".into(), json!(a.clone()));
        input.insert("b".into(), json!(b));

        let toggled = engine(&rules).apply(&input);
        let mut baseline_rules = rules.clone();
        baseline_rules[1].enabled = !lower_enabled;
        let baseline = engine(&baseline_rules).apply(&input);
        prop_assert_eq!(toggled.output.get("x"), baseline.output.get("x"));
        prop_assert_eq!(toggled.output.get("x"), Some(&json!(a)));
        prop_assert_eq!(toggled.output.contains_key("y"), lower_enabled);
    }

    #[test]
    fn rule_application_is_repeatable(a in ".{0,20}", b in ".{0,20}") {
        let engine = engine(&[TransformRule::new(
            "full",
            vec!["a".into(), "b".into()],
            "full",
            TransformKind::Concatenate { separator: " ".into() },
        )]);
        let mut input = Record::new();
        input.insert("a".into(), json!(a));
        input.insert("b".into(), json!(b));
        prop_assert_eq!(engine.apply(&input), engine.apply(&input));
    }
}

// --- Lineage identity properties ---

proptest! {
    #[test]
    fn record_identity_is_content_derived(value in ".{0,30}", ordinal in 1u64..10_000) {
        let mut fields = Record::new();
        fields.insert("v".into(), json!(value));
        let a = input_id("s.csv", ordinal, &fields);
        let b = input_id("s.csv", ordinal, &fields);
        prop_assert_eq!(&a, &b);
        prop_assert_ne!(&a, &input_id("s.csv", ordinal + 1, &fields));
        prop_assert_eq!(output_id(&[a.clone()], &fields), output_id(&[b], &fields));
    }
}

// --- Quality metric properties ---

proptest! {
    #[test]
    fn quality_metrics_are_bounded_and_complete_iff_no_nulls(
        cells in prop::collection::vec(prop::option::of("[a-z0-9@.]{0,12}"), 0..40),
    ) {
        let config = ValidationConfig {
            fields: vec![FieldRule::new("email").required()],
            ..ValidationConfig::default()
        };
        let validator = Validator::new(&config, LookupRegistry::new()).unwrap();
        let rows: Vec<OutputRow> = cells
            .iter()
            .enumerate()
            .map(|(i, cell)| {
                let mut record = Record::new();
                record.insert("email".into(), cell.clone().map(Value::String).unwrap_or(Value::Null));
                OutputRow {
                    id: format!("out-{i}"),
                    inputs: vec![format!("in-{i}")],
                    source: "s.csv".into(),
                    ordinal: i as u64 + 1,
                    record,
                }
            })
            .collect();
        let metrics = validator.validate(&rows).unwrap().metrics;
        prop_assert!((0.0..=1.0).contains(&metrics.completeness));
        prop_assert!((0.0..=1.0).contains(&metrics.consistency));
        prop_assert!((0.0..=1.0).contains(&metrics.error_rate));
        prop_assert!((0.0..=1.0).contains(&metrics.quality_score));
        prop_assert_eq!(metrics.completeness == 1.0, cells.iter().all(Option::is_some));
    }
}
