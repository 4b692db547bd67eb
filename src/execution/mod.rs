//! Execution and cached-SQL gateway
//!
//! Manual and scheduled runs share one code path. A definition whose cache
//! entry is enabled and holds SQL runs that SQL verbatim; everything else is
//! parsed and generated fresh. Every run is recorded, zero-row runs included.

pub mod batch;
pub mod gateway;

pub use batch::{BatchItemOutcome, BatchReport, DefineBatchOutput};
pub use gateway::{Defined, ExecutionGateway, GatewaySettings, Preview};

use crate::sql::StrategyKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// A persisted natural-language query definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryDefinition {
    pub id: String,
    pub name: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

impl QueryDefinition {
    pub fn new(name: &str, text: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            text: text.to_string(),
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedSqlEntry {
    pub definition_id: String,
    pub accepted: bool,
    pub sql_cached: bool,
    pub cached_sql: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl CachedSqlEntry {
    pub fn empty(definition_id: &str) -> Self {
        Self {
            definition_id: definition_id.to_string(),
            accepted: false,
            sql_cached: false,
            cached_sql: None,
            updated_at: Utc::now(),
        }
    }

    /// SQL to run without generation, if the entry is usable.
    pub fn usable_sql(&self) -> Option<&str> {
        if !self.sql_cached {
            return None;
        }
        self.cached_sql
            .as_deref()
            .map(str::trim)
            .filter(|sql| !sql.is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Success,
    Failed,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunTrigger {
    Manual,
    Scheduled,
}

/// History row written for every run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub definition_id: String,
    pub status: ExecutionStatus,
    pub record_count: usize,
    pub executed_sql: String,
    pub execution_time_ms: u64,
    pub confidence: Option<f64>,
    pub explanation: Option<String>,
    pub cache_hit: bool,
    pub error: Option<String>,
    pub trigger: RunTrigger,
    pub executed_at: DateTime<Utc>,
}

/// What a caller gets back from a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub success: bool,
    pub record_count: usize,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    /// Seconds.
    pub execution_time: f64,
    pub sql: String,
    pub confidence: Option<f64>,
    pub explanation: Option<String>,
    pub cache_hit: bool,
    pub strategy: StrategyKind,
}
