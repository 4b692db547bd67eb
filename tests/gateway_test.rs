mod common;

use common::*;
use recon_kg::execution::{Defined, ExecutionGateway, ExecutionStatus, QueryDefinition, RunTrigger};
use recon_kg::executor::QueryOutput;
use recon_kg::sql::{SqlGenerator, StrategyKind, TemplateStrategy};
use recon_kg::store::{CacheRepository, DefinitionRepository, ExecutionHistory, SqliteStore};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const CACHED_SQL: &str = r#"SELECT s."Material" FROM "rbp"."RBP_GPU" s WHERE s."Plant" = 'P1'"#;

struct Harness {
    gateway: ExecutionGateway,
    store: Arc<SqliteStore>,
    executor: Arc<RecordingExecutor>,
    generator_calls: Arc<AtomicUsize>,
}

fn harness(executor: RecordingExecutor) -> Harness {
    let store = Arc::new(SqliteStore::in_memory().unwrap());
    let executor = Arc::new(executor);
    let (counting, generator_calls) = CountingStrategy::wrap(Box::new(TemplateStrategy));
    let gateway = ExecutionGateway::new(
        inventory_graph(),
        inventory_preferences(),
        store.clone(),
        executor.clone(),
        settings(),
    )
    .with_generator(SqlGenerator::new(vec![Box::new(counting)]));
    Harness {
        gateway,
        store,
        executor,
        generator_calls,
    }
}

async fn define_query(gateway: &ExecutionGateway, text: &str) -> QueryDefinition {
    match gateway.define("products", text).await.unwrap() {
        Defined::Query(definition) => definition,
        Defined::Relationship(r) => panic!("expected a query definition, got {:?}", r),
    }
}

#[tokio::test]
async fn test_cache_hit_skips_generation_and_runs_sql_verbatim() {
    let h = harness(RecordingExecutor::returning(QueryOutput {
        columns: vec!["Material".into()],
        rows: vec![vec![json!("GPU-1")]],
    }));
    let definition = define_query(&h.gateway, NOT_IN_TEXT).await;
    h.gateway.accept(&definition.id, CACHED_SQL, true).unwrap();

    let report = h.gateway.run(&definition.id, RunTrigger::Scheduled).await.unwrap();

    assert_eq!(h.generator_calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.executor.executed(), vec![CACHED_SQL.to_string()]);
    assert!(report.cache_hit);
    assert_eq!(report.strategy, StrategyKind::Cached);
    assert_eq!(report.sql, CACHED_SQL);
    assert_eq!(report.record_count, 1);

    let history = h.store.recent_executions(&definition.id, 5).unwrap();
    assert_eq!(history.len(), 1);
    assert!(history[0].cache_hit);
    assert_eq!(history[0].executed_sql, CACHED_SQL);
}

#[tokio::test]
async fn test_disabling_cache_regenerates() {
    let h = harness(RecordingExecutor::empty());
    let definition = define_query(&h.gateway, NOT_IN_TEXT).await;
    h.gateway.accept(&definition.id, CACHED_SQL, true).unwrap();
    let entry = h.gateway.set_cache_enabled(&definition.id, false).unwrap();
    assert!(entry.accepted);
    assert_eq!(entry.cached_sql.as_deref(), Some(CACHED_SQL));

    let report = h.gateway.run(&definition.id, RunTrigger::Manual).await.unwrap();
    assert_eq!(h.generator_calls.load(Ordering::SeqCst), 1);
    assert!(!report.cache_hit);
    assert_eq!(report.strategy, StrategyKind::Template);
    assert!(report.sql.contains("LEFT JOIN"));
    assert_eq!(h.executor.executed(), vec![report.sql.clone()]);
}

#[tokio::test]
async fn test_accept_without_cache_keeps_generating() {
    let h = harness(RecordingExecutor::empty());
    let definition = define_query(&h.gateway, ACTIVE_TEXT).await;
    let entry = h.gateway.accept(&definition.id, CACHED_SQL, false).unwrap();
    assert!(entry.accepted);
    assert!(!entry.sql_cached);

    let report = h.gateway.run(&definition.id, RunTrigger::Manual).await.unwrap();
    assert!(!report.cache_hit);
    assert_eq!(h.generator_calls.load(Ordering::SeqCst), 1);
    assert!(report.sql.contains("LOWER(s.\"Status\") = LOWER('active')"));
}

#[tokio::test]
async fn test_accept_rejects_mutating_sql() {
    let h = harness(RecordingExecutor::empty());
    let definition = define_query(&h.gateway, NOT_IN_TEXT).await;
    let err = h
        .gateway
        .accept(&definition.id, "DELETE FROM \"rbp\".\"RBP_GPU\"", true)
        .unwrap_err();
    assert_eq!(err.code(), "VALIDATION_FAILED");
    assert!(h.store.get_cache_entry(&definition.id).unwrap().is_none());
}

#[tokio::test]
async fn test_cached_sql_with_keyword_literal_runs_verbatim() {
    let h = harness(RecordingExecutor::empty());
    let definition = define_query(&h.gateway, NOT_IN_TEXT).await;
    let sql = r#"SELECT s."Material" FROM "rbp"."RBP_GPU" s WHERE s."Status" = 'Update pending'"#;
    h.gateway.accept(&definition.id, sql, true).unwrap();

    let report = h.gateway.run(&definition.id, RunTrigger::Manual).await.unwrap();

    assert!(report.cache_hit);
    assert_eq!(h.executor.executed(), vec![sql.to_string()]);
}

#[tokio::test]
async fn test_zero_rows_is_a_recorded_success() {
    let h = harness(RecordingExecutor::empty());
    let definition = define_query(&h.gateway, ACTIVE_TEXT).await;

    let report = h.gateway.run(&definition.id, RunTrigger::Manual).await.unwrap();
    assert!(report.success);
    assert_eq!(report.record_count, 0);
    assert!(report.confidence.is_some());

    let history = h.store.recent_executions(&definition.id, 5).unwrap();
    assert_eq!(history[0].status, ExecutionStatus::Success);
    assert_eq!(history[0].record_count, 0);
    assert_eq!(history[0].error, None);
}

#[tokio::test]
async fn test_execution_failure_is_recorded() {
    let h = harness(RecordingExecutor::empty().failing_on("LEFT JOIN"));
    let definition = define_query(&h.gateway, NOT_IN_TEXT).await;

    let err = h.gateway.run(&definition.id, RunTrigger::Manual).await.unwrap_err();
    assert_eq!(err.code(), "DIALECT_ERROR");
    // dialect errors are not transient, so no retry
    assert_eq!(h.executor.executed().len(), 1);

    let history = h.store.recent_executions(&definition.id, 5).unwrap();
    assert_eq!(history[0].status, ExecutionStatus::Failed);
    assert!(history[0].error.as_deref().unwrap().starts_with("DIALECT_ERROR"));
    assert!(history[0].executed_sql.contains("LEFT JOIN"));
}

#[tokio::test]
async fn test_transient_failure_is_retried_once() {
    let h = harness(RecordingExecutor::empty().with_transient_failures(1));
    let definition = define_query(&h.gateway, ACTIVE_TEXT).await;

    let report = h.gateway.run(&definition.id, RunTrigger::Manual).await.unwrap();
    assert!(report.success);
    assert_eq!(h.executor.executed().len(), 2);
}

#[tokio::test]
async fn test_batch_failures_are_isolated() {
    let h = harness(RecordingExecutor::empty());
    let definitions = vec![
        ("not in ops".to_string(), NOT_IN_TEXT.to_string()),
        ("nothing".to_string(), "Show me all the active ones".to_string()),
        ("active".to_string(), ACTIVE_TEXT.to_string()),
    ];
    let output = h.gateway.define_batch(&definitions).await;
    assert_eq!(output.report.succeeded, 2);
    assert_eq!(output.report.failed, 1);
    assert_eq!(output.report.items[1].code.as_deref(), Some("NO_TABLE_RESOLVED"));
    assert_eq!(output.queries.len(), 2);
    assert_eq!(h.store.list_definitions().unwrap().len(), 2);

    let mut ids: Vec<String> = output.queries.iter().map(|d| d.id.clone()).collect();
    ids.insert(1, "no-such-definition".to_string());
    let report = h.gateway.run_batch(&ids, RunTrigger::Scheduled).await;
    assert_eq!(report.succeeded, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.items[1].code.as_deref(), Some("NOT_FOUND"));
    assert!(report.items[0].success);
    assert!(report.items[2].success);
}

#[tokio::test]
async fn test_relationship_definitions_are_returned_not_stored() {
    let h = harness(RecordingExecutor::empty());
    let defined = h
        .gateway
        .define("plant link", "RBP_GPU.Plant maps to OPS_EXCEL.Region")
        .await
        .unwrap();
    let Defined::Relationship(relationship) = defined else {
        panic!("expected a relationship");
    };
    assert_eq!(relationship.source_column, "Plant");
    assert_eq!(relationship.target_column, "Region");
    assert!(h.store.list_definitions().unwrap().is_empty());
}
