//! Persistence contracts
//!
//! Everything the engine keeps between runs goes through these traits:
//! versioned graph snapshots, field preferences and approved aliases,
//! rulesets, query definitions, cached SQL and execution history.
//! Writes are last-writer-wins.

pub mod sqlite;

pub use sqlite::SqliteStore;

use crate::error::Result;
use crate::execution::{CachedSqlEntry, ExecutionResult, QueryDefinition};
use crate::field_preferences::PreferenceSet;
use crate::knowledge_graph::{AliasDictionary, KnowledgeGraph};
use crate::reconciliation::Ruleset;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphSummary {
    pub name: String,
    pub version: u64,
    pub node_count: usize,
    pub relationship_count: usize,
    pub saved_at: DateTime<Utc>,
}

pub trait KnowledgeGraphRepository: Send + Sync {
    /// Stores a new snapshot and returns the version assigned to it.
    fn save_graph(&self, kg: &KnowledgeGraph) -> Result<u64>;
    /// Latest version of the named graph.
    fn load_graph(&self, name: &str) -> Result<KnowledgeGraph>;
    fn load_graph_version(&self, name: &str, version: u64) -> Result<KnowledgeGraph>;
    /// Latest version of every graph, by name.
    fn list_graphs(&self) -> Result<Vec<GraphSummary>>;
}

pub trait PreferenceRepository: Send + Sync {
    /// Replaces the stored preferences wholesale.
    fn save_preferences(&self, preferences: &PreferenceSet) -> Result<()>;
    fn load_preferences(&self) -> Result<PreferenceSet>;
    fn add_alias(&self, table_name: &str, alias: &str) -> Result<()>;
    fn remove_alias(&self, table_name: &str, alias: &str) -> Result<bool>;
    fn alias_dictionary(&self) -> Result<AliasDictionary>;
}

pub trait RulesetRepository: Send + Sync {
    fn save_ruleset(&self, ruleset: &Ruleset) -> Result<()>;
    fn load_ruleset(&self, name: &str) -> Result<Ruleset>;
    fn list_rulesets(&self) -> Result<Vec<String>>;
}

pub trait DefinitionRepository: Send + Sync {
    fn save_definition(&self, definition: &QueryDefinition) -> Result<()>;
    fn get_definition(&self, id: &str) -> Result<QueryDefinition>;
    fn list_definitions(&self) -> Result<Vec<QueryDefinition>>;
}

pub trait CacheRepository: Send + Sync {
    fn get_cache_entry(&self, definition_id: &str) -> Result<Option<CachedSqlEntry>>;
    fn put_cache_entry(&self, entry: &CachedSqlEntry) -> Result<()>;
}

pub trait ExecutionHistory: Send + Sync {
    fn record_execution(&self, result: &ExecutionResult) -> Result<()>;
    /// Newest first.
    fn recent_executions(&self, definition_id: &str, limit: usize) -> Result<Vec<ExecutionResult>>;
}

/// Everything the gateway and the CLI need from one backing store.
pub trait EngineStore:
    KnowledgeGraphRepository
    + PreferenceRepository
    + RulesetRepository
    + DefinitionRepository
    + CacheRepository
    + ExecutionHistory
{
}

impl<T> EngineStore for T where
    T: KnowledgeGraphRepository
        + PreferenceRepository
        + RulesetRepository
        + DefinitionRepository
        + CacheRepository
        + ExecutionHistory
{
}
