mod common;

use common::*;
use recon_kg::field_preferences::PreferenceSet;
use recon_kg::knowledge_graph::{RelationshipSource, RelationshipType};
use recon_kg::nl::{Classification, FilterOperator, NlParser, Operation, ParsedDefinition, QueryIntent, StopWords};
use recon_kg::retry::CallPolicy;
use recon_kg::sql::{Dialect, GenerationContext, SqlGenerator, StrategyKind};
use std::sync::Arc;
use std::time::Duration;

async fn parse_query(text: &str) -> QueryIntent {
    let kg = inventory_graph();
    let stop_words = StopWords::default();
    let parser = NlParser::new(&kg, &stop_words, None, CallPolicy::new(Duration::from_secs(1)));
    match parser.parse(text).await.unwrap() {
        ParsedDefinition::Query(intent) => intent,
        other => panic!("expected a query, got {:?}", other),
    }
}

#[test]
fn test_field_hint_seeds_the_join_edge() {
    let kg = inventory_graph();
    let edge = kg.best_edge_between("rbp.RBP_GPU", "ops.OPS_EXCEL").unwrap();
    assert_eq!(edge.relationship_type, RelationshipType::FieldHint);
    assert_eq!(edge.source, RelationshipSource::AutoDetected);
    assert_eq!(edge.confidence, 0.9);
}

#[tokio::test]
async fn test_not_in_scenario_generates_left_join() {
    let intent = parse_query(NOT_IN_TEXT).await;
    assert_eq!(intent.classification, Classification::ComparisonQuery);
    assert_eq!(intent.operation, Operation::NotIn);
    assert_eq!(intent.source_table, "rbp.RBP_GPU");
    assert_eq!(intent.target_table.as_deref(), Some("ops.OPS_EXCEL"));

    let kg = inventory_graph();
    let preferences = inventory_preferences();
    let ctx = GenerationContext {
        kg: &kg,
        preferences: &preferences,
        dialect: Dialect::DoubleQuotes,
        row_limit: 100,
        min_confidence: 0.7,
    };
    let outcome = SqlGenerator::with_defaults(None, CallPolicy::new(Duration::from_secs(1)))
        .generate(&intent, &ctx)
        .await
        .unwrap();
    assert_eq!(outcome.generated.strategy, StrategyKind::Template);
    assert!(outcome.generated.sql.contains("LEFT JOIN"));
    assert!(outcome.generated.sql.contains(r#"t."PLANNING_SKU" IS NULL"#));
    assert!(outcome.failed_attempts.is_empty());
}

#[tokio::test]
async fn test_active_products_scenario() {
    let intent = parse_query(ACTIVE_TEXT).await;
    assert_eq!(intent.operation, Operation::In);
    assert_eq!(intent.target_table, None);
    assert_eq!(intent.filters.len(), 1);
    assert_eq!(intent.filters[0].column, "Status");
    assert_eq!(intent.filters[0].operator, FilterOperator::EqIgnoreCase);
    assert_eq!(intent.filters[0].value, "active");
}

#[tokio::test]
async fn test_drop_table_response_falls_back_to_template() {
    let kg = inventory_graph();
    let preferences = PreferenceSet::default();
    let intent = parse_query(NOT_IN_TEXT).await;
    let completion = Arc::new(ScriptedCompletion::direct_sql(
        r#"SELECT s.* FROM "rbp"."RBP_GPU" s; DROP TABLE "ops"."OPS_EXCEL""#,
        0.98,
    ));
    let generator = SqlGenerator::with_defaults(Some(completion.clone()), CallPolicy::new(Duration::from_secs(1)));
    let ctx = GenerationContext {
        kg: &kg,
        preferences: &preferences,
        dialect: Dialect::DoubleQuotes,
        row_limit: 100,
        min_confidence: 0.7,
    };
    let outcome = generator.generate(&intent, &ctx).await.unwrap();

    assert_eq!(outcome.generated.strategy, StrategyKind::Template);
    assert!(!outcome.generated.sql.to_uppercase().contains("DROP"));
    assert_eq!(outcome.failed_attempts.len(), 1);
    assert_eq!(outcome.failed_attempts[0].strategy, StrategyKind::Direct);
    assert_eq!(outcome.failed_attempts[0].code, "VALIDATION_FAILED");
    assert_eq!(completion.calls.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_stop_words_alone_resolve_nothing() {
    let kg = inventory_graph();
    let stop_words = StopWords::default();
    let parser = NlParser::new(&kg, &stop_words, None, CallPolicy::new(Duration::from_secs(1)));
    let err = parser.parse("show me all the records which are not in the list").await.unwrap_err();
    assert_eq!(err.code(), "NO_TABLE_RESOLVED");
}
