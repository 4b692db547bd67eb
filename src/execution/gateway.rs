use super::{
    CachedSqlEntry, ExecutionReport, ExecutionResult, ExecutionStatus, QueryDefinition, RunTrigger,
};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::executor::{QueryExecutor, QueryOutput};
use crate::field_preferences::PreferenceSet;
use crate::knowledge_graph::KnowledgeGraph;
use crate::llm::CompletionService;
use crate::nl::{NlParser, NlRelationship, ParsedDefinition, StopWords};
use crate::retry::{call_with_retry, CallPolicy};
use crate::sql::{
    ensure_read_only, Dialect, GeneratedSql, GenerationContext, SqlGenerator, StrategyAttempt, StrategyKind,
};
use crate::store::EngineStore;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy)]
pub struct GatewaySettings {
    pub dialect: Dialect,
    pub row_limit: usize,
    pub min_confidence: f64,
    pub policy: CallPolicy,
}

impl GatewaySettings {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            dialect: config.dialect,
            row_limit: config.row_limit,
            min_confidence: config.min_generation_confidence,
            policy: CallPolicy::new(config.collaborator_timeout()),
        }
    }
}

/// Parse and generation result for a definition, without executing it.
#[derive(Debug, Clone, Serialize)]
pub struct Preview {
    pub parsed: ParsedDefinition,
    pub generated: Option<GeneratedSql>,
    pub failed_attempts: Vec<StrategyAttempt>,
}

/// Result of registering a natural-language definition.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Defined {
    /// Stored and runnable by id.
    Query(QueryDefinition),
    /// Not stored here; callers merge it into the graph.
    Relationship(NlRelationship),
}

#[derive(Default)]
struct RunState {
    sql: String,
    confidence: Option<f64>,
    explanation: Option<String>,
    cache_hit: bool,
    strategy: Option<StrategyKind>,
}

pub struct ExecutionGateway {
    kg: KnowledgeGraph,
    preferences: PreferenceSet,
    store: Arc<dyn EngineStore>,
    executor: Arc<dyn QueryExecutor>,
    completion: Option<Arc<dyn CompletionService>>,
    generator: SqlGenerator,
    stop_words: StopWords,
    settings: GatewaySettings,
}

impl ExecutionGateway {
    /// Template-only generation until a completion service is attached.
    pub fn new(
        kg: KnowledgeGraph,
        preferences: PreferenceSet,
        store: Arc<dyn EngineStore>,
        executor: Arc<dyn QueryExecutor>,
        settings: GatewaySettings,
    ) -> Self {
        Self {
            kg,
            preferences,
            store,
            executor,
            completion: None,
            generator: SqlGenerator::with_defaults(None, settings.policy),
            stop_words: StopWords::default(),
            settings,
        }
    }

    /// Enables LLM classification fallback and direct generation.
    pub fn with_completion(mut self, completion: Arc<dyn CompletionService>) -> Self {
        self.generator = SqlGenerator::with_defaults(Some(completion.clone()), self.settings.policy);
        self.completion = Some(completion);
        self
    }

    pub fn with_generator(mut self, generator: SqlGenerator) -> Self {
        self.generator = generator;
        self
    }

    pub fn with_stop_words(mut self, stop_words: StopWords) -> Self {
        self.stop_words = stop_words;
        self
    }

    pub fn knowledge_graph(&self) -> &KnowledgeGraph {
        &self.kg
    }

    fn parser(&self) -> NlParser<'_> {
        NlParser::new(&self.kg, &self.stop_words, self.completion.as_deref(), self.settings.policy)
    }

    fn context(&self) -> GenerationContext<'_> {
        GenerationContext {
            kg: &self.kg,
            preferences: &self.preferences,
            dialect: self.settings.dialect,
            row_limit: self.settings.row_limit,
            min_confidence: self.settings.min_confidence,
        }
    }

    /// Parses `text`; query definitions are stored, relationships are returned to the caller.
    pub async fn define(&self, name: &str, text: &str) -> Result<Defined> {
        match self.parser().parse(text).await? {
            ParsedDefinition::Query(intent) => {
                let definition = QueryDefinition::new(name, text);
                self.store.save_definition(&definition)?;
                info!(
                    "Defined query '{}' ({}) over {}",
                    name,
                    intent.classification,
                    intent.tables().join(", ")
                );
                Ok(Defined::Query(definition))
            }
            ParsedDefinition::Relationship(relationship) => {
                info!(
                    "Parsed relationship {}.{} -> {}.{}",
                    relationship.source_table,
                    relationship.source_column,
                    relationship.target_table,
                    relationship.target_column
                );
                Ok(Defined::Relationship(relationship))
            }
        }
    }

    pub async fn preview(&self, text: &str) -> Result<Preview> {
        let parsed = self.parser().parse(text).await?;
        let (generated, failed_attempts) = match &parsed {
            ParsedDefinition::Query(intent) => {
                let outcome = self.generator.generate(intent, &self.context()).await?;
                (Some(outcome.generated), outcome.failed_attempts)
            }
            ParsedDefinition::Relationship(_) => (None, Vec::new()),
        };
        Ok(Preview {
            parsed,
            generated,
            failed_attempts,
        })
    }

    /// Marks `sql` as the accepted SQL for a definition, cached for reuse when `cache` is set.
    pub fn accept(&self, definition_id: &str, sql: &str, cache: bool) -> Result<CachedSqlEntry> {
        self.store.get_definition(definition_id)?;
        let sql = sql.trim();
        if sql.is_empty() {
            return Err(EngineError::validation_failed("accepted SQL is empty"));
        }
        ensure_read_only(sql, self.settings.dialect)?;

        let mut entry = self
            .store
            .get_cache_entry(definition_id)?
            .unwrap_or_else(|| CachedSqlEntry::empty(definition_id));
        entry.accepted = true;
        entry.sql_cached = cache;
        entry.cached_sql = Some(sql.to_string());
        entry.updated_at = Utc::now();
        self.store.put_cache_entry(&entry)?;
        info!("Accepted SQL for definition {} (cached: {})", definition_id, cache);
        Ok(entry)
    }

    pub fn set_cache_enabled(&self, definition_id: &str, enabled: bool) -> Result<CachedSqlEntry> {
        self.store.get_definition(definition_id)?;
        let mut entry = self
            .store
            .get_cache_entry(definition_id)?
            .unwrap_or_else(|| CachedSqlEntry::empty(definition_id));
        if enabled && entry.cached_sql.is_none() {
            warn!(
                "Cache enabled for definition {} without accepted SQL; runs keep generating",
                definition_id
            );
        }
        entry.sql_cached = enabled;
        entry.updated_at = Utc::now();
        self.store.put_cache_entry(&entry)?;
        Ok(entry)
    }

    /// Runs a stored definition. Manual and scheduled runs share this path.
    pub async fn run(&self, definition_id: &str, trigger: RunTrigger) -> Result<ExecutionReport> {
        let definition = self.store.get_definition(definition_id)?;
        let cache = self.store.get_cache_entry(definition_id)?;

        let started = Instant::now();
        let mut state = RunState::default();
        let outcome = self.execute_definition(&definition, cache.as_ref(), &mut state).await;
        let elapsed = started.elapsed();

        let result = ExecutionResult {
            definition_id: definition.id.clone(),
            status: if outcome.is_ok() {
                ExecutionStatus::Success
            } else {
                ExecutionStatus::Failed
            },
            record_count: outcome.as_ref().map(QueryOutput::record_count).unwrap_or(0),
            executed_sql: state.sql.clone(),
            execution_time_ms: elapsed.as_millis() as u64,
            confidence: state.confidence,
            explanation: state.explanation.clone(),
            cache_hit: state.cache_hit,
            error: outcome.as_ref().err().map(|e| format!("{}: {}", e.code(), e)),
            trigger,
            executed_at: Utc::now(),
        };
        self.store.record_execution(&result)?;

        let output = outcome?;
        info!(
            "Definition '{}' returned {} rows in {} ms (cache hit: {})",
            definition.name,
            output.record_count(),
            result.execution_time_ms,
            state.cache_hit
        );
        Ok(ExecutionReport {
            success: true,
            record_count: output.record_count(),
            columns: output.columns,
            rows: output.rows,
            execution_time: elapsed.as_secs_f64(),
            sql: state.sql,
            confidence: state.confidence,
            explanation: state.explanation,
            cache_hit: state.cache_hit,
            strategy: state.strategy.unwrap_or(StrategyKind::Cached),
        })
    }

    async fn execute_definition(
        &self,
        definition: &QueryDefinition,
        cache: Option<&CachedSqlEntry>,
        state: &mut RunState,
    ) -> Result<QueryOutput> {
        match cache.and_then(CachedSqlEntry::usable_sql) {
            Some(sql) => {
                info!("Using cached SQL for definition {}", definition.id);
                state.sql = sql.to_string();
                state.cache_hit = true;
                state.strategy = Some(StrategyKind::Cached);
            }
            None => {
                let generated = self.generate(&definition.text).await?;
                state.sql = generated.sql;
                state.confidence = Some(generated.confidence);
                state.explanation = Some(generated.explanation);
                state.strategy = Some(generated.strategy);
            }
        }

        ensure_read_only(&state.sql, self.settings.dialect)?;
        let sql = state.sql.as_str();
        let row_limit = self.settings.row_limit;
        call_with_retry("query execution", self.settings.policy, || {
            self.executor.execute(sql, row_limit)
        })
        .await
    }

    async fn generate(&self, text: &str) -> Result<GeneratedSql> {
        match self.parser().parse(text).await? {
            ParsedDefinition::Query(intent) => {
                let outcome = self.generator.generate(&intent, &self.context()).await?;
                Ok(outcome.generated)
            }
            ParsedDefinition::Relationship(_) => Err(EngineError::generation_failed(format!(
                "'{}' defines a relationship, not a query",
                text
            ))),
        }
    }
}
