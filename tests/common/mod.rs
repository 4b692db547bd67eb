#![allow(dead_code)]

use async_trait::async_trait;
use recon_kg::error::{EngineError, ExecutionErrorKind, Result};
use recon_kg::executor::{QueryExecutor, QueryOutput};
use recon_kg::field_preferences::PreferenceSet;
use recon_kg::knowledge_graph::{build_knowledge_graph, BuildOptions, KnowledgeGraph};
use recon_kg::llm::{CompletionRequest, CompletionService};
use recon_kg::nl::QueryIntent;
use recon_kg::retry::CallPolicy;
use recon_kg::schema::{ColumnSchema, SchemaSnapshot, TableSchema};
use recon_kg::sql::{Dialect, GeneratedSql, GenerationContext, SqlStrategy, StrategyKind};
use recon_kg::execution::GatewaySettings;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const NOT_IN_TEXT: &str = "Show me all the products in RBP GPU which are not in OPS Excel";
pub const ACTIVE_TEXT: &str = "Show me all active products in RBP GPU";

pub fn inventory_schemas() -> Vec<SchemaSnapshot> {
    vec![
        SchemaSnapshot {
            schema: "rbp".into(),
            tables: vec![TableSchema::new(
                "RBP_GPU",
                vec![
                    ColumnSchema::new("Material", "varchar").primary_key(),
                    ColumnSchema::new("Status", "varchar"),
                    ColumnSchema::new("Plant", "varchar"),
                ],
            )],
        },
        SchemaSnapshot {
            schema: "ops".into(),
            tables: vec![TableSchema::new(
                "OPS_EXCEL",
                vec![
                    ColumnSchema::new("PLANNING_SKU", "varchar"),
                    ColumnSchema::new("Region", "varchar"),
                ],
            )],
        },
    ]
}

pub fn inventory_preferences() -> PreferenceSet {
    PreferenceSet::from_json(
        r#"[{"table_name": "RBP_GPU", "field_hints": {"Material": "OPS_EXCEL.PLANNING_SKU"}}]"#,
    )
    .unwrap()
}

pub fn inventory_graph() -> KnowledgeGraph {
    build_knowledge_graph(
        "inventory",
        &inventory_schemas(),
        &inventory_preferences(),
        &BuildOptions::default(),
    )
    .graph
}

pub fn settings() -> GatewaySettings {
    GatewaySettings {
        dialect: Dialect::DoubleQuotes,
        row_limit: 100,
        min_confidence: 0.7,
        policy: CallPolicy::new(Duration::from_secs(5)),
    }
}

/// Records every SQL string it receives. Fails for SQL containing `fail_on`,
/// and returns transient connection errors while `transient_failures` lasts.
pub struct RecordingExecutor {
    pub executed: Mutex<Vec<String>>,
    output: QueryOutput,
    fail_on: Option<String>,
    transient_failures: AtomicUsize,
}

impl RecordingExecutor {
    pub fn returning(output: QueryOutput) -> Self {
        Self {
            executed: Mutex::new(Vec::new()),
            output,
            fail_on: None,
            transient_failures: AtomicUsize::new(0),
        }
    }

    pub fn empty() -> Self {
        Self::returning(QueryOutput {
            columns: vec!["Material".into()],
            rows: Vec::new(),
        })
    }

    pub fn failing_on(mut self, fragment: &str) -> Self {
        self.fail_on = Some(fragment.to_string());
        self
    }

    pub fn with_transient_failures(self, count: usize) -> Self {
        self.transient_failures.store(count, Ordering::SeqCst);
        self
    }

    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }
}

#[async_trait]
impl QueryExecutor for RecordingExecutor {
    async fn execute(&self, sql: &str, _row_limit: usize) -> Result<QueryOutput> {
        self.executed.lock().unwrap().push(sql.to_string());
        if self.transient_failures.load(Ordering::SeqCst) > 0 {
            self.transient_failures.fetch_sub(1, Ordering::SeqCst);
            return Err(EngineError::execution(ExecutionErrorKind::Connection, "connection reset"));
        }
        if let Some(fragment) = &self.fail_on {
            if sql.contains(fragment.as_str()) {
                return Err(EngineError::execution(ExecutionErrorKind::Dialect, "relation does not exist"));
            }
        }
        Ok(self.output.clone())
    }
}

/// Counts how often the wrapped strategy is asked for SQL.
pub struct CountingStrategy {
    inner: Box<dyn SqlStrategy>,
    pub calls: Arc<AtomicUsize>,
}

impl CountingStrategy {
    pub fn wrap(inner: Box<dyn SqlStrategy>) -> (Self, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Self {
                inner,
                calls: calls.clone(),
            },
            calls,
        )
    }
}

#[async_trait]
impl SqlStrategy for CountingStrategy {
    fn kind(&self) -> StrategyKind {
        self.inner.kind()
    }

    async fn generate(&self, intent: &QueryIntent, ctx: &GenerationContext<'_>) -> Result<GeneratedSql> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.generate(intent, ctx).await
    }
}

/// Replays canned completion responses in order.
pub struct ScriptedCompletion {
    responses: Mutex<VecDeque<Result<Value>>>,
    pub calls: AtomicUsize,
}

impl ScriptedCompletion {
    pub fn new(responses: Vec<Result<Value>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn direct_sql(sql: &str, confidence: f64) -> Self {
        Self::new(vec![Ok(json!({
            "sql": sql,
            "confidence": confidence,
            "explanation": "generated"
        }))])
    }
}

#[async_trait]
impl CompletionService for ScriptedCompletion {
    async fn complete_json(&self, _request: &CompletionRequest) -> Result<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(EngineError::Llm("no scripted response left".into())))
    }

    fn context_budget_tokens(&self) -> usize {
        100_000
    }
}
