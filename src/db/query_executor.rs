use super::connection::map_sqlx_error;
use crate::error::{EngineError, ExecutionErrorKind, Result};
use crate::executor::{QueryExecutor, QueryOutput};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::{Column, Executor, PgPool, Statement};
use tracing::debug;

/// Runs read-only SQL against PostgreSQL. Rows come back through
/// `row_to_json`, so every column type maps onto JSON without per-type decoding.
pub struct PgQueryExecutor {
    pool: PgPool,
}

impl PgQueryExecutor {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn strip_terminator(sql: &str) -> &str {
    sql.trim().trim_end_matches(';').trim_end()
}

fn wrap_for_json(sql: &str, row_limit: usize) -> String {
    format!(
        "SELECT row_to_json(q)::text FROM ({}) AS q LIMIT {}",
        strip_terminator(sql),
        row_limit
    )
}

fn project_row(columns: &[String], raw: &str) -> Result<Vec<Value>> {
    let object: serde_json::Map<String, Value> = serde_json::from_str(raw).map_err(|e| {
        EngineError::execution(ExecutionErrorKind::Dialect, format!("unreadable row {}: {}", raw, e))
    })?;
    Ok(columns
        .iter()
        .map(|c| object.get(c).cloned().unwrap_or(Value::Null))
        .collect())
}

#[async_trait]
impl QueryExecutor for PgQueryExecutor {
    async fn execute(&self, sql: &str, row_limit: usize) -> Result<QueryOutput> {
        let inner = strip_terminator(sql);
        let statement = (&self.pool)
            .prepare(inner)
            .await
            .map_err(|e| map_sqlx_error("prepare", e))?;
        let columns: Vec<String> = statement.columns().iter().map(|c| c.name().to_string()).collect();

        let raw_rows: Vec<String> = sqlx::query_scalar(&wrap_for_json(inner, row_limit))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("query", e))?;
        debug!("Query returned {} rows", raw_rows.len());

        let rows = raw_rows
            .iter()
            .map(|raw| project_row(&columns, raw))
            .collect::<Result<Vec<_>>>()?;
        Ok(QueryOutput { columns, rows })
    }
}
