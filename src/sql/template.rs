//! Template SQL built directly from the intent and KG edges.

use super::{Dialect, GeneratedSql, GenerationContext, SqlStrategy, StrategyKind};
use crate::error::{EngineError, Result};
use crate::field_preferences::quote_literal;
use crate::nl::{AggregateFunction, Filter, FilterOperator, Operation, QueryIntent};
use async_trait::async_trait;
use tracing::{debug, warn};

const SOURCE_ALIAS: &str = "s";
const TARGET_ALIAS: &str = "t";

pub struct TemplateStrategy;

struct Join {
    target: String,
    source_column: String,
    target_column: String,
    confidence: f64,
}

fn render_value(filter: &Filter) -> String {
    match filter.operator {
        FilterOperator::Gt | FilterOperator::Lt | FilterOperator::Gte | FilterOperator::Lte
            if filter.value.parse::<f64>().is_ok() =>
        {
            filter.value.clone()
        }
        _ => quote_literal(&filter.value),
    }
}

fn render_filter(filter: &Filter, alias: &str, dialect: Dialect) -> String {
    let column = format!("{}.{}", alias, dialect.quote_ident(&filter.column));
    match filter.operator {
        FilterOperator::EqIgnoreCase => format!("LOWER({}) = LOWER({})", column, quote_literal(&filter.value)),
        op => format!("{} {} {}", column, op.symbol(), render_value(filter)),
    }
}

impl TemplateStrategy {
    fn resolve_join(&self, intent: &QueryIntent, ctx: &GenerationContext<'_>) -> Result<Option<Join>> {
        let Some(target) = intent.target_table.as_deref() else {
            return Ok(None);
        };
        let edge = ctx.kg.best_edge_between(&intent.source_table, target);
        let (source_column, target_column, confidence) = match (intent.join_columns.first(), edge) {
            (Some((s, t)), edge) => (s.clone(), t.clone(), edge.map(|e| e.confidence).unwrap_or(1.0)),
            (None, Some(edge)) => {
                let (s, t) = edge.oriented_from(&intent.source_table);
                (s, t, edge.confidence)
            }
            (None, None) => {
                return Err(EngineError::generation_failed(format!(
                    "no knowledge graph edge joins {} and {}",
                    intent.source_table, target
                )))
            }
        };
        Ok(Some(Join {
            target: target.to_string(),
            source_column,
            target_column,
            confidence,
        }))
    }

    pub fn build(&self, intent: &QueryIntent, ctx: &GenerationContext<'_>) -> Result<GeneratedSql> {
        let d = ctx.dialect;
        let join = self.resolve_join(intent, ctx)?;
        if intent.operation == Operation::NotIn && join.is_none() {
            return Err(EngineError::generation_failed("NOT_IN needs a target table"));
        }

        let mut predicates: Vec<String> = Vec::new();
        for filter in &intent.filters {
            let alias = if filter.table.eq_ignore_ascii_case(&intent.source_table) {
                SOURCE_ALIAS
            } else if join.as_ref().map(|j| j.target.eq_ignore_ascii_case(&filter.table)).unwrap_or(false) {
                TARGET_ALIAS
            } else {
                warn!("Dropping filter on {}.{}: table not in query", filter.table, filter.column);
                continue;
            };
            predicates.push(render_filter(filter, alias, d));
        }

        let from = format!("{} {}", d.quote_table(&intent.source_table), SOURCE_ALIAS);
        let join_clause = join.as_ref().map(|j| {
            let kind = if intent.operation == Operation::NotIn { "LEFT JOIN" } else { "INNER JOIN" };
            format!(
                "{} {} {} ON {}.{} = {}.{}",
                kind,
                d.quote_table(&j.target),
                TARGET_ALIAS,
                SOURCE_ALIAS,
                d.quote_ident(&j.source_column),
                TARGET_ALIAS,
                d.quote_ident(&j.target_column)
            )
        });
        if let (Operation::NotIn, Some(j)) = (intent.operation, &join) {
            predicates.insert(0, format!("{}.{} IS NULL", TARGET_ALIAS, d.quote_ident(&j.target_column)));
        }

        let (select_list, group_by) = match (&intent.operation, &intent.aggregation) {
            (Operation::Aggregate, Some(agg)) => {
                let measure = match (&agg.function, &agg.column) {
                    (AggregateFunction::Count, None) => "COUNT(*) AS record_count".to_string(),
                    (function, Some(column)) => format!(
                        "{}({}.{}) AS {}",
                        function.sql_name(),
                        SOURCE_ALIAS,
                        d.quote_ident(column),
                        d.quote_ident(&format!("{}_{}", function.sql_name().to_lowercase(), column))
                    ),
                    (_, None) => {
                        return Err(EngineError::generation_failed(
                            "aggregation needs a column for anything but COUNT",
                        ))
                    }
                };
                let groups: Vec<String> = agg
                    .group_by
                    .iter()
                    .map(|c| format!("{}.{}", SOURCE_ALIAS, d.quote_ident(c)))
                    .collect();
                let mut select = groups.clone();
                select.push(measure);
                let group_by = (!groups.is_empty()).then(|| format!("GROUP BY {}", groups.join(", ")));
                (select.join(", "), group_by)
            }
            (Operation::Aggregate, None) => ("COUNT(*) AS record_count".to_string(), None),
            _ => (format!("{}.*", SOURCE_ALIAS), None),
        };

        let mut sql = if d.uses_top() {
            format!("SELECT TOP {} {} FROM {}", ctx.row_limit, select_list, from)
        } else {
            format!("SELECT {} FROM {}", select_list, from)
        };
        if let Some(join_clause) = &join_clause {
            sql.push(' ');
            sql.push_str(join_clause);
        }
        if !predicates.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&predicates.join(" AND "));
        }
        if let Some(group_by) = group_by {
            sql.push(' ');
            sql.push_str(&group_by);
        }
        if !d.uses_top() {
            sql.push_str(&format!(" LIMIT {}", ctx.row_limit));
        }
        debug!("Template SQL: {}", sql);

        let mut tables_used = vec![intent.source_table.clone()];
        let mut join_columns = Vec::new();
        let mut confidence = 1.0;
        if let Some(j) = &join {
            tables_used.push(j.target.clone());
            join_columns.push((j.source_column.clone(), j.target_column.clone()));
            confidence = j.confidence;
        }

        let explanation = match (&intent.operation, &join) {
            (Operation::NotIn, Some(j)) => format!(
                "Rows of {} with no match in {} on {} = {}",
                intent.source_table, j.target, j.source_column, j.target_column
            ),
            (_, Some(j)) => format!(
                "Rows of {} matched to {} on {} = {}",
                intent.source_table, j.target, j.source_column, j.target_column
            ),
            (Operation::Aggregate, None) => format!("Aggregate over {}", intent.source_table),
            (_, None) => format!("Rows of {}", intent.source_table),
        };

        Ok(GeneratedSql {
            sql,
            confidence,
            tables_used,
            join_columns,
            explanation,
            strategy: StrategyKind::Template,
        })
    }
}

#[async_trait]
impl SqlStrategy for TemplateStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Template
    }

    async fn generate(&self, intent: &QueryIntent, ctx: &GenerationContext<'_>) -> Result<GeneratedSql> {
        self.build(intent, ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field_preferences::PreferenceSet;
    use crate::knowledge_graph::test_support::{column, node};
    use crate::knowledge_graph::{Cardinality, KnowledgeGraph, Relationship, RelationshipSource, RelationshipType};
    use crate::nl::{AggregationSpec, Classification};

    fn graph() -> KnowledgeGraph {
        let mut kg = KnowledgeGraph::new("t");
        kg.nodes.push(node("rbp", "RBP_GPU", vec![column("Material", "varchar"), column("Status", "varchar")]));
        kg.nodes.push(node("ops", "OPS_EXCEL", vec![column("PLANNING_SKU", "varchar")]));
        kg.relationships.push(Relationship::new(
            "rbp.RBP_GPU", "Material", "ops.OPS_EXCEL", "PLANNING_SKU",
            RelationshipType::FieldHint, 0.9, RelationshipSource::AutoDetected,
            Cardinality::Unknown, "hint",
        ));
        kg
    }

    fn intent(operation: Operation, target: Option<&str>) -> QueryIntent {
        QueryIntent {
            definition_text: "test".into(),
            classification: Classification::ComparisonQuery,
            source_table: "rbp.RBP_GPU".into(),
            target_table: target.map(str::to_string),
            operation,
            filters: Vec::new(),
            join_columns: Vec::new(),
            aggregation: None,
        }
    }

    fn ctx<'a>(kg: &'a KnowledgeGraph, prefs: &'a PreferenceSet, dialect: Dialect) -> GenerationContext<'a> {
        GenerationContext { kg, preferences: prefs, dialect, row_limit: 100, min_confidence: 0.7 }
    }

    #[test]
    fn test_not_in_left_join() {
        let (kg, prefs) = (graph(), PreferenceSet::default());
        let generated = TemplateStrategy
            .build(&intent(Operation::NotIn, Some("ops.OPS_EXCEL")), &ctx(&kg, &prefs, Dialect::DoubleQuotes))
            .unwrap();
        assert_eq!(
            generated.sql,
            r#"SELECT s.* FROM "rbp"."RBP_GPU" s LEFT JOIN "ops"."OPS_EXCEL" t ON s."Material" = t."PLANNING_SKU" WHERE t."PLANNING_SKU" IS NULL LIMIT 100"#
        );
        assert_eq!(generated.confidence, 0.9);
        assert_eq!(generated.tables_used.len(), 2);
    }

    #[test]
    fn test_in_with_brackets_uses_top() {
        let (kg, prefs) = (graph(), PreferenceSet::default());
        let generated = TemplateStrategy
            .build(&intent(Operation::In, Some("ops.OPS_EXCEL")), &ctx(&kg, &prefs, Dialect::Brackets))
            .unwrap();
        assert!(generated.sql.starts_with("SELECT TOP 100 s.* FROM [rbp].[RBP_GPU] s INNER JOIN"));
        assert!(!generated.sql.contains("LIMIT"));
    }

    #[test]
    fn test_single_table_status_filter() {
        let (kg, prefs) = (graph(), PreferenceSet::default());
        let mut i = intent(Operation::In, None);
        i.filters.push(Filter {
            table: "rbp.RBP_GPU".into(),
            column: "Status".into(),
            operator: FilterOperator::EqIgnoreCase,
            value: "active".into(),
        });
        let generated = TemplateStrategy.build(&i, &ctx(&kg, &prefs, Dialect::DoubleQuotes)).unwrap();
        assert_eq!(
            generated.sql,
            r#"SELECT s.* FROM "rbp"."RBP_GPU" s WHERE LOWER(s."Status") = LOWER('active') LIMIT 100"#
        );
    }

    #[test]
    fn test_aggregate_group_by() {
        let (kg, prefs) = (graph(), PreferenceSet::default());
        let mut i = intent(Operation::Aggregate, None);
        i.aggregation = Some(AggregationSpec {
            function: AggregateFunction::Count,
            column: None,
            group_by: vec!["Status".into()],
        });
        let generated = TemplateStrategy.build(&i, &ctx(&kg, &prefs, Dialect::DoubleQuotes)).unwrap();
        assert_eq!(
            generated.sql,
            r#"SELECT s."Status", COUNT(*) AS record_count FROM "rbp"."RBP_GPU" s GROUP BY s."Status" LIMIT 100"#
        );
    }

    #[test]
    fn test_missing_edge_fails() {
        let prefs = PreferenceSet::default();
        let mut kg = graph();
        kg.relationships.clear();
        let err = TemplateStrategy
            .build(&intent(Operation::NotIn, Some("ops.OPS_EXCEL")), &ctx(&kg, &prefs, Dialect::DoubleQuotes))
            .unwrap_err();
        assert_eq!(err.code(), "SQL_GENERATION_FAILED");
    }
}
