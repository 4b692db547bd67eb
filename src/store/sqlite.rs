//! SQLite-backed store
//!
//! Graph snapshots, preferences and rulesets are stored as JSON documents;
//! cache entries and execution history get real columns so they can be
//! queried without deserializing.

use super::{
    CacheRepository, DefinitionRepository, ExecutionHistory, GraphSummary, KnowledgeGraphRepository,
    PreferenceRepository, RulesetRepository,
};
use crate::error::{EngineError, Result};
use crate::execution::{CachedSqlEntry, ExecutionResult, ExecutionStatus, QueryDefinition, RunTrigger};
use crate::field_preferences::{FieldPreference, PreferenceSet};
use crate::knowledge_graph::{AliasDictionary, KnowledgeGraph};
use crate::reconciliation::Ruleset;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

pub struct SqliteStore {
    db: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let db = Connection::open(path)
            .map_err(|e| EngineError::Persistence(format!("Failed to open {}: {}", path.display(), e)))?;
        let store = Self { db: Mutex::new(db) };
        store.init_schema()?;
        info!("Opened store at {}", path.display());
        Ok(store)
    }

    pub fn in_memory() -> Result<Self> {
        let store = Self {
            db: Mutex::new(Connection::open_in_memory()?),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.db
            .lock()
            .map_err(|_| EngineError::Persistence("store connection lock poisoned".to_string()))
    }

    fn init_schema(&self) -> Result<()> {
        let db = self.conn()?;
        db.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS kg_snapshots (
                name TEXT NOT NULL,
                version INTEGER NOT NULL,
                node_count INTEGER NOT NULL,
                relationship_count INTEGER NOT NULL,
                document TEXT NOT NULL,
                saved_at TEXT NOT NULL,
                PRIMARY KEY (name, version)
            );

            CREATE TABLE IF NOT EXISTS field_preferences (
                table_name TEXT PRIMARY KEY COLLATE NOCASE,
                document TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS table_aliases (
                table_name TEXT NOT NULL COLLATE NOCASE,
                alias TEXT NOT NULL COLLATE NOCASE,
                approved_at TEXT NOT NULL,
                UNIQUE (table_name, alias)
            );

            CREATE TABLE IF NOT EXISTS rulesets (
                name TEXT PRIMARY KEY,
                document TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS query_definitions (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                text TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS sql_cache (
                definition_id TEXT PRIMARY KEY,
                accepted INTEGER NOT NULL DEFAULT 0,
                sql_cached INTEGER NOT NULL DEFAULT 0,
                cached_sql TEXT,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS execution_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                definition_id TEXT NOT NULL,
                status TEXT NOT NULL,
                record_count INTEGER NOT NULL,
                executed_sql TEXT NOT NULL,
                execution_time_ms INTEGER NOT NULL,
                confidence REAL,
                explanation TEXT,
                cache_hit INTEGER NOT NULL,
                error TEXT,
                run_trigger TEXT NOT NULL,
                executed_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_execution_history_definition
                ON execution_history(definition_id, id);
            "#,
        )?;
        Ok(())
    }
}

fn parse_timestamp(idx: usize, raw: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

impl KnowledgeGraphRepository for SqliteStore {
    fn save_graph(&self, kg: &KnowledgeGraph) -> Result<u64> {
        let mut db = self.conn()?;
        let tx = db.transaction()?;
        let latest: Option<i64> = tx.query_row(
            "SELECT MAX(version) FROM kg_snapshots WHERE name = ?1",
            params![kg.name],
            |row| row.get(0),
        )?;
        let version = latest.unwrap_or(0) + 1;

        let mut snapshot = kg.clone();
        snapshot.version = version as u64;
        snapshot.updated_at = Utc::now();
        let document = serde_json::to_string(&snapshot)?;

        tx.execute(
            r#"
            INSERT INTO kg_snapshots (name, version, node_count, relationship_count, document, saved_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                kg.name,
                version,
                kg.nodes.len() as i64,
                kg.relationships.len() as i64,
                document,
                snapshot.updated_at.to_rfc3339()
            ],
        )?;
        tx.commit()?;

        info!(
            "Saved knowledge graph '{}' version {} ({} relationships)",
            kg.name,
            version,
            kg.relationships.len()
        );
        Ok(version as u64)
    }

    fn load_graph(&self, name: &str) -> Result<KnowledgeGraph> {
        let db = self.conn()?;
        let document: Option<String> = db
            .query_row(
                "SELECT document FROM kg_snapshots WHERE name = ?1 ORDER BY version DESC LIMIT 1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        let document = document.ok_or_else(|| EngineError::NotFound(format!("knowledge graph '{}'", name)))?;
        Ok(serde_json::from_str(&document)?)
    }

    fn load_graph_version(&self, name: &str, version: u64) -> Result<KnowledgeGraph> {
        let db = self.conn()?;
        let document: Option<String> = db
            .query_row(
                "SELECT document FROM kg_snapshots WHERE name = ?1 AND version = ?2",
                params![name, version as i64],
                |row| row.get(0),
            )
            .optional()?;
        let document = document
            .ok_or_else(|| EngineError::NotFound(format!("knowledge graph '{}' version {}", name, version)))?;
        Ok(serde_json::from_str(&document)?)
    }

    fn list_graphs(&self) -> Result<Vec<GraphSummary>> {
        let db = self.conn()?;
        let mut stmt = db.prepare(
            r#"
            SELECT s.name, s.version, s.node_count, s.relationship_count, s.saved_at
            FROM kg_snapshots s
            WHERE s.version = (SELECT MAX(version) FROM kg_snapshots WHERE name = s.name)
            ORDER BY s.name
            "#,
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(GraphSummary {
                name: row.get(0)?,
                version: row.get::<_, i64>(1)? as u64,
                node_count: row.get::<_, i64>(2)? as usize,
                relationship_count: row.get::<_, i64>(3)? as usize,
                saved_at: parse_timestamp(4, row.get(4)?)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

impl PreferenceRepository for SqliteStore {
    fn save_preferences(&self, preferences: &PreferenceSet) -> Result<()> {
        let mut db = self.conn()?;
        let tx = db.transaction()?;
        tx.execute("DELETE FROM field_preferences", [])?;
        for preference in preferences.iter() {
            tx.execute(
                "INSERT INTO field_preferences (table_name, document) VALUES (?1, ?2)",
                params![preference.table_name, serde_json::to_string(preference)?],
            )?;
        }
        tx.commit()?;
        debug!("Stored {} field preferences", preferences.iter().count());
        Ok(())
    }

    fn load_preferences(&self) -> Result<PreferenceSet> {
        let db = self.conn()?;
        let mut stmt = db.prepare("SELECT document FROM field_preferences ORDER BY table_name")?;
        let documents = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        let preferences = documents
            .iter()
            .map(|doc| serde_json::from_str::<FieldPreference>(doc).map_err(EngineError::from))
            .collect::<Result<Vec<_>>>()?;
        PreferenceSet::new(preferences)
    }

    fn add_alias(&self, table_name: &str, alias: &str) -> Result<()> {
        let alias = alias.trim();
        if alias.is_empty() {
            return Err(EngineError::InvalidPreference(format!(
                "empty alias for table {}",
                table_name
            )));
        }
        let db = self.conn()?;
        db.execute(
            "INSERT OR IGNORE INTO table_aliases (table_name, alias, approved_at) VALUES (?1, ?2, ?3)",
            params![table_name, alias, Utc::now().to_rfc3339()],
        )?;
        info!("Approved alias '{}' for {}", alias, table_name);
        Ok(())
    }

    fn remove_alias(&self, table_name: &str, alias: &str) -> Result<bool> {
        let db = self.conn()?;
        let removed = db.execute(
            "DELETE FROM table_aliases WHERE table_name = ?1 AND alias = ?2",
            params![table_name, alias],
        )?;
        Ok(removed > 0)
    }

    fn alias_dictionary(&self) -> Result<AliasDictionary> {
        let db = self.conn()?;
        let mut stmt = db.prepare("SELECT table_name, alias FROM table_aliases ORDER BY table_name, alias")?;
        let pairs = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        let mut dictionary = AliasDictionary::new();
        for (table, alias) in pairs {
            dictionary.entry(table).or_default().push(alias);
        }
        Ok(dictionary)
    }
}

impl RulesetRepository for SqliteStore {
    fn save_ruleset(&self, ruleset: &Ruleset) -> Result<()> {
        let db = self.conn()?;
        db.execute(
            "INSERT OR REPLACE INTO rulesets (name, document, created_at) VALUES (?1, ?2, ?3)",
            params![ruleset.name, serde_json::to_string(ruleset)?, ruleset.created_at.to_rfc3339()],
        )?;
        info!("Saved ruleset '{}' with {} rules", ruleset.name, ruleset.rules.len());
        Ok(())
    }

    fn load_ruleset(&self, name: &str) -> Result<Ruleset> {
        let db = self.conn()?;
        let document: Option<String> = db
            .query_row("SELECT document FROM rulesets WHERE name = ?1", params![name], |row| row.get(0))
            .optional()?;
        let document = document.ok_or_else(|| EngineError::NotFound(format!("ruleset '{}'", name)))?;
        Ok(serde_json::from_str(&document)?)
    }

    fn list_rulesets(&self) -> Result<Vec<String>> {
        let db = self.conn()?;
        let mut stmt = db.prepare("SELECT name FROM rulesets ORDER BY name")?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(names)
    }
}

fn definition_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<QueryDefinition> {
    Ok(QueryDefinition {
        id: row.get(0)?,
        name: row.get(1)?,
        text: row.get(2)?,
        created_at: parse_timestamp(3, row.get(3)?)?,
    })
}

impl DefinitionRepository for SqliteStore {
    fn save_definition(&self, definition: &QueryDefinition) -> Result<()> {
        let db = self.conn()?;
        db.execute(
            "INSERT OR REPLACE INTO query_definitions (id, name, text, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                definition.id,
                definition.name,
                definition.text,
                definition.created_at.to_rfc3339()
            ],
        )?;
        Ok(())
    }

    fn get_definition(&self, id: &str) -> Result<QueryDefinition> {
        let db = self.conn()?;
        db.query_row(
            "SELECT id, name, text, created_at FROM query_definitions WHERE id = ?1",
            params![id],
            definition_from_row,
        )
        .optional()?
        .ok_or_else(|| EngineError::NotFound(format!("query definition '{}'", id)))
    }

    fn list_definitions(&self) -> Result<Vec<QueryDefinition>> {
        let db = self.conn()?;
        let mut stmt = db.prepare("SELECT id, name, text, created_at FROM query_definitions ORDER BY created_at, id")?;
        let definitions = stmt
            .query_map([], definition_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(definitions)
    }
}

impl CacheRepository for SqliteStore {
    fn get_cache_entry(&self, definition_id: &str) -> Result<Option<CachedSqlEntry>> {
        let db = self.conn()?;
        let entry = db
            .query_row(
                r#"
                SELECT definition_id, accepted, sql_cached, cached_sql, updated_at
                FROM sql_cache WHERE definition_id = ?1
                "#,
                params![definition_id],
                |row| {
                    Ok(CachedSqlEntry {
                        definition_id: row.get(0)?,
                        accepted: row.get(1)?,
                        sql_cached: row.get(2)?,
                        cached_sql: row.get(3)?,
                        updated_at: parse_timestamp(4, row.get(4)?)?,
                    })
                },
            )
            .optional()?;
        Ok(entry)
    }

    fn put_cache_entry(&self, entry: &CachedSqlEntry) -> Result<()> {
        let db = self.conn()?;
        db.execute(
            r#"
            INSERT OR REPLACE INTO sql_cache (definition_id, accepted, sql_cached, cached_sql, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                entry.definition_id,
                entry.accepted,
                entry.sql_cached,
                entry.cached_sql,
                entry.updated_at.to_rfc3339()
            ],
        )?;
        Ok(())
    }
}

impl ExecutionHistory for SqliteStore {
    fn record_execution(&self, result: &ExecutionResult) -> Result<()> {
        let db = self.conn()?;
        let trigger = match result.trigger {
            RunTrigger::Manual => "manual",
            RunTrigger::Scheduled => "scheduled",
        };
        db.execute(
            r#"
            INSERT INTO execution_history (
                definition_id, status, record_count, executed_sql, execution_time_ms,
                confidence, explanation, cache_hit, error, run_trigger, executed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
            params![
                result.definition_id,
                result.status.as_str(),
                result.record_count as i64,
                result.executed_sql,
                result.execution_time_ms as i64,
                result.confidence,
                result.explanation,
                result.cache_hit,
                result.error,
                trigger,
                result.executed_at.to_rfc3339()
            ],
        )?;
        Ok(())
    }

    fn recent_executions(&self, definition_id: &str, limit: usize) -> Result<Vec<ExecutionResult>> {
        let db = self.conn()?;
        let mut stmt = db.prepare(
            r#"
            SELECT definition_id, status, record_count, executed_sql, execution_time_ms,
                   confidence, explanation, cache_hit, error, run_trigger, executed_at
            FROM execution_history
            WHERE definition_id = ?1
            ORDER BY id DESC
            LIMIT ?2
            "#,
        )?;
        let results = stmt
            .query_map(params![definition_id, limit as i64], |row| {
                let status: String = row.get(1)?;
                let trigger: String = row.get(9)?;
                Ok(ExecutionResult {
                    definition_id: row.get(0)?,
                    status: if status == "success" {
                        ExecutionStatus::Success
                    } else {
                        ExecutionStatus::Failed
                    },
                    record_count: row.get::<_, i64>(2)? as usize,
                    executed_sql: row.get(3)?,
                    execution_time_ms: row.get::<_, i64>(4)? as u64,
                    confidence: row.get(5)?,
                    explanation: row.get(6)?,
                    cache_hit: row.get(7)?,
                    error: row.get(8)?,
                    trigger: if trigger == "scheduled" {
                        RunTrigger::Scheduled
                    } else {
                        RunTrigger::Manual
                    },
                    executed_at: parse_timestamp(10, row.get(10)?)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field_preferences::FilterHint;
    use crate::knowledge_graph::test_support::{column, node};

    #[test]
    fn test_graph_versions_increment_per_name() {
        let store = SqliteStore::in_memory().unwrap();
        let mut kg = KnowledgeGraph::new("inventory");
        kg.nodes.push(node("rbp", "RBP_GPU", vec![column("Material", "varchar")]));

        assert_eq!(store.save_graph(&kg).unwrap(), 1);
        kg.nodes.push(node("ops", "OPS_EXCEL", vec![column("PLANNING_SKU", "varchar")]));
        assert_eq!(store.save_graph(&kg).unwrap(), 2);
        assert_eq!(store.save_graph(&KnowledgeGraph::new("finance")).unwrap(), 1);

        let latest = store.load_graph("inventory").unwrap();
        assert_eq!(latest.version, 2);
        assert_eq!(latest.nodes.len(), 2);
        assert_eq!(store.load_graph_version("inventory", 1).unwrap().nodes.len(), 1);

        let summaries = store.list_graphs().unwrap();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[1].name, "inventory");
        assert_eq!(summaries[1].version, 2);
    }

    #[test]
    fn test_missing_graph_is_not_found() {
        let store = SqliteStore::in_memory().unwrap();
        assert_eq!(store.load_graph("nope").unwrap_err().code(), "NOT_FOUND");
    }

    #[test]
    fn test_preferences_and_aliases() {
        let store = SqliteStore::in_memory().unwrap();
        let mut preference = FieldPreference::new("RBP_GPU");
        preference.priority_fields.push("Material".into());
        preference
            .filter_hints
            .insert("status".into(), FilterHint::Equals("active".into()));
        store
            .save_preferences(&PreferenceSet::new(vec![preference.clone()]).unwrap())
            .unwrap();
        let loaded = store.load_preferences().unwrap().into_vec();
        assert_eq!(loaded, vec![preference]);

        store.add_alias("RBP_GPU", "rbp gpu").unwrap();
        store.add_alias("RBP_GPU", "RBP GPU").unwrap();
        store.add_alias("OPS_EXCEL", "ops sheet").unwrap();
        let dictionary = store.alias_dictionary().unwrap();
        assert_eq!(dictionary["RBP_GPU"], vec!["rbp gpu".to_string()]);
        assert!(store.remove_alias("OPS_EXCEL", "ops sheet").unwrap());
        assert!(!store.alias_dictionary().unwrap().contains_key("OPS_EXCEL"));
    }

    #[test]
    fn test_cache_entry_last_writer_wins() {
        let store = SqliteStore::in_memory().unwrap();
        assert!(store.get_cache_entry("d1").unwrap().is_none());

        let mut entry = CachedSqlEntry::empty("d1");
        entry.accepted = true;
        entry.sql_cached = true;
        entry.cached_sql = Some("SELECT 1".into());
        store.put_cache_entry(&entry).unwrap();

        entry.sql_cached = false;
        store.put_cache_entry(&entry).unwrap();
        let stored = store.get_cache_entry("d1").unwrap().unwrap();
        assert!(stored.accepted);
        assert!(!stored.sql_cached);
        assert_eq!(stored.cached_sql.as_deref(), Some("SELECT 1"));
    }

    #[test]
    fn test_history_is_newest_first() {
        let store = SqliteStore::in_memory().unwrap();
        for (i, status) in [ExecutionStatus::Success, ExecutionStatus::Failed].iter().enumerate() {
            store
                .record_execution(&ExecutionResult {
                    definition_id: "d1".into(),
                    status: *status,
                    record_count: i,
                    executed_sql: "SELECT 1".into(),
                    execution_time_ms: 5,
                    confidence: Some(0.9),
                    explanation: None,
                    cache_hit: false,
                    error: None,
                    trigger: RunTrigger::Scheduled,
                    executed_at: Utc::now(),
                })
                .unwrap();
        }
        let history = store.recent_executions("d1", 10).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].status, ExecutionStatus::Failed);
        assert_eq!(history[1].record_count, 0);
        assert_eq!(history[1].trigger, RunTrigger::Scheduled);
    }
}
