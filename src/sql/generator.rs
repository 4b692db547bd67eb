use super::validation::ensure_read_only;
use super::{DirectStrategy, GeneratedSql, GenerationContext, SqlStrategy, StrategyKind, TemplateStrategy};
use crate::error::{EngineError, Result};
use crate::llm::CompletionService;
use crate::nl::QueryIntent;
use crate::retry::CallPolicy;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// One failed strategy in a fallback chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyAttempt {
    pub strategy: StrategyKind,
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct GenerationOutcome {
    pub generated: GeneratedSql,
    /// Strategies that failed before `generated` was produced.
    pub failed_attempts: Vec<StrategyAttempt>,
}

pub struct SqlGenerator {
    strategies: Vec<Box<dyn SqlStrategy>>,
}

impl SqlGenerator {
    pub fn new(strategies: Vec<Box<dyn SqlStrategy>>) -> Self {
        Self { strategies }
    }

    /// Direct generation first when a completion service is available, templates last.
    pub fn with_defaults(completion: Option<Arc<dyn CompletionService>>, policy: CallPolicy) -> Self {
        let mut strategies: Vec<Box<dyn SqlStrategy>> = Vec::new();
        if let Some(completion) = completion {
            strategies.push(Box::new(DirectStrategy::new(completion, policy)));
        }
        strategies.push(Box::new(TemplateStrategy));
        Self::new(strategies)
    }

    pub fn strategy_kinds(&self) -> Vec<StrategyKind> {
        self.strategies.iter().map(|s| s.kind()).collect()
    }

    pub async fn generate(&self, intent: &QueryIntent, ctx: &GenerationContext<'_>) -> Result<GenerationOutcome> {
        let mut failed_attempts = Vec::new();
        for strategy in &self.strategies {
            let result = match strategy.generate(intent, ctx).await {
                Ok(generated) => ensure_read_only(&generated.sql, ctx.dialect).map(|_| generated),
                Err(e) => Err(e),
            };
            match result {
                Ok(generated) => {
                    info!(
                        "Generated SQL with {} strategy (confidence {:.2})",
                        strategy.kind(),
                        generated.confidence
                    );
                    return Ok(GenerationOutcome {
                        generated,
                        failed_attempts,
                    });
                }
                Err(e) => {
                    warn!("{} strategy failed: {}", strategy.kind(), e);
                    failed_attempts.push(StrategyAttempt {
                        strategy: strategy.kind(),
                        code: e.code().to_string(),
                        message: e.to_string(),
                    });
                }
            }
        }

        let summary = failed_attempts
            .iter()
            .map(|a| format!("{} [{}]: {}", a.strategy, a.code, a.message))
            .collect::<Vec<_>>()
            .join("; ");
        Err(EngineError::generation_failed(if summary.is_empty() {
            "no SQL strategy configured".to_string()
        } else {
            summary
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field_preferences::PreferenceSet;
    use crate::knowledge_graph::test_support::{column, node};
    use crate::knowledge_graph::{Cardinality, KnowledgeGraph, Relationship, RelationshipSource, RelationshipType};
    use crate::llm::test_support::ScriptedCompletion;
    use crate::nl::{Classification, Operation};
    use crate::sql::Dialect;
    use serde_json::json;
    use std::time::Duration;

    fn graph() -> KnowledgeGraph {
        let mut kg = KnowledgeGraph::new("t");
        kg.nodes.push(node("rbp", "RBP_GPU", vec![column("Material", "varchar")]));
        kg.nodes.push(node("ops", "OPS_EXCEL", vec![column("PLANNING_SKU", "varchar")]));
        kg.relationships.push(Relationship::new(
            "rbp.RBP_GPU", "Material", "ops.OPS_EXCEL", "PLANNING_SKU",
            RelationshipType::FieldHint, 0.9, RelationshipSource::AutoDetected,
            Cardinality::Unknown, "hint",
        ));
        kg
    }

    fn intent() -> QueryIntent {
        QueryIntent {
            definition_text: "Show me all the products in RBP GPU which are not in OPS Excel".into(),
            classification: Classification::ComparisonQuery,
            source_table: "rbp.RBP_GPU".into(),
            target_table: Some("ops.OPS_EXCEL".into()),
            operation: Operation::NotIn,
            filters: Vec::new(),
            join_columns: vec![("Material".into(), "PLANNING_SKU".into())],
            aggregation: None,
        }
    }

    fn ctx<'a>(kg: &'a KnowledgeGraph, prefs: &'a PreferenceSet) -> GenerationContext<'a> {
        GenerationContext {
            kg,
            preferences: prefs,
            dialect: Dialect::DoubleQuotes,
            row_limit: 100,
            min_confidence: 0.7,
        }
    }

    #[tokio::test]
    async fn test_drop_table_falls_back_to_template() {
        let (kg, prefs) = (graph(), PreferenceSet::default());
        let service = Arc::new(ScriptedCompletion::new(vec![Ok(json!({
            "sql": "SELECT * FROM \"rbp\".\"RBP_GPU\"; DROP TABLE \"ops\".\"OPS_EXCEL\"",
            "confidence": 0.99,
            "explanation": "oops"
        }))]));
        let generator = SqlGenerator::with_defaults(Some(service), CallPolicy::new(Duration::from_secs(1)));
        let outcome = generator.generate(&intent(), &ctx(&kg, &prefs)).await.unwrap();
        assert_eq!(outcome.generated.strategy, StrategyKind::Template);
        assert!(outcome.generated.sql.contains("LEFT JOIN"));
        assert!(outcome.generated.sql.contains("IS NULL"));
        assert_eq!(outcome.failed_attempts.len(), 1);
        assert_eq!(outcome.failed_attempts[0].code, "VALIDATION_FAILED");
    }

    #[tokio::test]
    async fn test_all_strategies_failing() {
        let (mut kg, prefs) = (graph(), PreferenceSet::default());
        kg.relationships.clear();
        let mut i = intent();
        i.join_columns.clear();
        let generator = SqlGenerator::with_defaults(None, CallPolicy::new(Duration::from_secs(1)));
        let err = generator.generate(&i, &ctx(&kg, &prefs)).await.unwrap_err();
        assert_eq!(err.code(), "SQL_GENERATION_FAILED");
        assert!(err.to_string().contains("template"));
    }

    #[test]
    fn test_default_order() {
        let service: Arc<dyn CompletionService> = Arc::new(ScriptedCompletion::new(vec![]));
        let generator = SqlGenerator::with_defaults(Some(service), CallPolicy::new(Duration::from_secs(1)));
        assert_eq!(generator.strategy_kinds(), vec![StrategyKind::Direct, StrategyKind::Template]);
    }
}
