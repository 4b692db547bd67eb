//! SQL generation
//!
//! Strategies are tried in order (direct generation, then templates). Each
//! strategy's failure is captured on its own; only validated SQL ever leaves
//! this module.

pub mod dialect;
pub mod direct;
pub mod generator;
pub mod template;
pub mod validation;

pub use dialect::Dialect;
pub use direct::DirectStrategy;
pub use generator::{GenerationOutcome, SqlGenerator, StrategyAttempt};
pub use template::TemplateStrategy;
pub use validation::{ensure_read_only, validate_generated};

use crate::error::Result;
use crate::field_preferences::PreferenceSet;
use crate::knowledge_graph::KnowledgeGraph;
use crate::nl::QueryIntent;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Direct,
    Template,
    /// Accepted SQL replayed from the cache.
    Cached,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyKind::Direct => write!(f, "direct"),
            StrategyKind::Template => write!(f, "template"),
            StrategyKind::Cached => write!(f, "cached"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedSql {
    pub sql: String,
    pub confidence: f64,
    pub tables_used: Vec<String>,
    pub join_columns: Vec<(String, String)>,
    pub explanation: String,
    pub strategy: StrategyKind,
}

/// Everything a strategy may read besides the intent itself.
#[derive(Clone, Copy)]
pub struct GenerationContext<'a> {
    pub kg: &'a KnowledgeGraph,
    pub preferences: &'a PreferenceSet,
    pub dialect: Dialect,
    pub row_limit: usize,
    pub min_confidence: f64,
}

#[async_trait]
pub trait SqlStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    async fn generate(&self, intent: &QueryIntent, ctx: &GenerationContext<'_>) -> Result<GeneratedSql>;
}
