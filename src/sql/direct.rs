//! Direct SQL generation through the completion service.
//!
//! The prompt carries only the candidate tables: the tables the intent resolved
//! plus tables owning priority fields. Oversized prompts fail before sending.

use super::validation::validate_generated;
use super::{GeneratedSql, GenerationContext, SqlStrategy, StrategyKind};
use crate::error::{EngineError, Result};
use crate::knowledge_graph::TableNode;
use crate::llm::{complete_structured, CompletionRequest, CompletionService, ResponseShape};
use crate::nl::QueryIntent;
use crate::retry::CallPolicy;
use async_trait::async_trait;
use itertools::Itertools;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

pub struct DirectStrategy {
    completion: Arc<dyn CompletionService>,
    policy: CallPolicy,
}

#[derive(Debug, Deserialize)]
struct DirectResponse {
    sql: String,
    confidence: f64,
    #[serde(default)]
    explanation: String,
}

impl DirectStrategy {
    pub fn new(completion: Arc<dyn CompletionService>, policy: CallPolicy) -> Self {
        Self { completion, policy }
    }

    fn candidate_tables<'k>(intent: &QueryIntent, ctx: &GenerationContext<'k>) -> Vec<&'k TableNode> {
        let mut ids = intent.tables();
        for node in &ctx.kg.nodes {
            if !node.metadata.priority_fields.is_empty()
                || ctx
                    .preferences
                    .for_table(&node.schema, &node.name)
                    .map(|p| !p.priority_fields.is_empty())
                    .unwrap_or(false)
            {
                ids.push(node.id.clone());
            }
        }
        ids.into_iter()
            .unique_by(|id| id.to_lowercase())
            .filter_map(|id| ctx.kg.node(&id))
            .collect()
    }

    fn describe_table(node: &TableNode, ctx: &GenerationContext<'_>) -> String {
        let columns = node
            .active_columns()
            .map(|c| {
                let mut text = format!("{} {}", ctx.dialect.quote_ident(&c.name), c.data_type);
                if c.is_primary_key {
                    text.push_str(" PK");
                }
                if node.metadata.priority_fields.iter().any(|p| p.eq_ignore_ascii_case(&c.name)) {
                    text.push_str(" (priority)");
                }
                text
            })
            .join(", ");
        let aliases = node.aliases.iter().map(|a| a.text.as_str()).join(", ");
        if aliases.is_empty() {
            format!("- {}: {}", ctx.dialect.quote_table(&node.id), columns)
        } else {
            format!("- {} (also called: {}): {}", ctx.dialect.quote_table(&node.id), aliases, columns)
        }
    }

    pub fn build_request(&self, intent: &QueryIntent, ctx: &GenerationContext<'_>) -> CompletionRequest {
        let tables = Self::candidate_tables(intent, ctx);
        let table_lines = tables.iter().map(|n| Self::describe_table(n, ctx)).join("\n");

        let mut join_lines = Vec::new();
        for (i, a) in tables.iter().enumerate() {
            for b in tables.iter().skip(i + 1) {
                for edge in ctx.kg.edges_between(&a.id, &b.id) {
                    join_lines.push(format!(
                        "- {}.{} = {}.{} ({}, confidence {:.2})",
                        edge.source_id, edge.source_column, edge.target_id, edge.target_column,
                        edge.relationship_type, edge.confidence
                    ));
                }
            }
        }
        let joins = if join_lines.is_empty() {
            "- none known".to_string()
        } else {
            join_lines.join("\n")
        };

        let filters = intent
            .filters
            .iter()
            .map(|f| format!("{}.{} {} {}", f.table, f.column, f.operator.symbol(), f.value))
            .join("; ");

        let prompt = format!(
            "Write one read-only SQL SELECT for this request.\n\n\
             Request: \"{}\"\n\
             Parsed as: {} ({:?}), source {}, target {}{}\n\n\
             Tables:\n{}\n\n\
             Known joins:\n{}\n\n\
             {} Return at most {} rows. Never modify data.",
            intent.definition_text,
            intent.classification,
            intent.operation,
            intent.source_table,
            intent.target_table.as_deref().unwrap_or("none"),
            if filters.is_empty() { String::new() } else { format!(", filters: {}", filters) },
            table_lines,
            joins,
            ctx.dialect.quoting_rule(),
            ctx.row_limit
        );

        CompletionRequest {
            system: "You write SQL for a data reconciliation engine.".to_string(),
            prompt,
            response_shape: ResponseShape::new(
                "direct_sql",
                &["sql", "confidence", "explanation"],
                json!({"sql": "SELECT ...", "confidence": 0.9, "explanation": "why this query answers the request"}),
            ),
        }
    }
}

#[async_trait]
impl SqlStrategy for DirectStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Direct
    }

    async fn generate(&self, intent: &QueryIntent, ctx: &GenerationContext<'_>) -> Result<GeneratedSql> {
        let request = self.build_request(intent, ctx);
        let value = complete_structured(self.completion.as_ref(), &request, self.policy).await?;
        let response: DirectResponse = serde_json::from_value(value)
            .map_err(|e| EngineError::Llm(format!("direct_sql response is malformed: {}", e)))?;

        validate_generated(&response.sql, response.confidence, ctx.min_confidence, ctx.dialect)?;
        info!("Direct generation produced SQL with confidence {:.2}", response.confidence);

        Ok(GeneratedSql {
            sql: response.sql.trim().to_string(),
            confidence: response.confidence,
            tables_used: Self::candidate_tables(intent, ctx).iter().map(|n| n.id.clone()).collect(),
            join_columns: intent.join_columns.clone(),
            explanation: response.explanation,
            strategy: StrategyKind::Direct,
        })
    }
}
