//! PostgreSQL connection pool

use crate::error::{EngineError, ExecutionErrorKind, Result};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

pub type DbPool = PgPool;

/// Connects and checks the connection with a trivial query.
pub async fn init_pool(database_url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(30))
        .connect(database_url)
        .await
        .map_err(|e| map_sqlx_error("connect", e))?;

    sqlx::query("SELECT 1")
        .execute(&pool)
        .await
        .map_err(|e| map_sqlx_error("connection check", e))?;

    Ok(pool)
}

/// Pool and socket problems are transient; anything the server rejects is not.
pub fn map_sqlx_error(context: &str, err: sqlx::Error) -> EngineError {
    let kind = match &err {
        sqlx::Error::PoolTimedOut => ExecutionErrorKind::Timeout,
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed
        | sqlx::Error::Protocol(_) => ExecutionErrorKind::Connection,
        _ => ExecutionErrorKind::Dialect,
    };
    EngineError::execution(kind, format!("{} failed: {}", context, err))
}
