pub mod config;
pub mod db;
pub mod error;
pub mod execution;
pub mod executor;
pub mod field_preferences;
pub mod knowledge_graph;
pub mod llm;
pub mod nl;
pub mod reconciliation;
pub mod retry;
pub mod schema;
pub mod sql;
pub mod store;
pub mod telemetry;

pub use config::EngineConfig;
pub use error::{EngineError, Result};
pub use execution::{ExecutionGateway, ExecutionReport};
pub use knowledge_graph::KnowledgeGraph;
pub use reconciliation::{generate_reconciliation_rules, ReconciliationRule};
