//! NL definition parser
//!
//! Turns one sentence into a [`ParsedDefinition`] using only the knowledge graph's
//! registry. Join targets and join columns come from KG edges; nothing is guessed.

use super::classifier::Classifier;
use super::filters::extract_filters;
use super::operation::{detect_aggregate_function, detect_operation, needs_target};
use super::resolver::{tokenize, ColumnMention, TableMention, TableResolver};
use super::vocabulary::StopWords;
use super::{
    AggregateFunction, AggregationSpec, Classification, NlRelationship, Operation, ParsedDefinition,
    QueryIntent,
};
use crate::error::{EngineError, Result};
use crate::knowledge_graph::builder::column_similarity;
use crate::knowledge_graph::{KnowledgeGraph, RelationshipType, SemanticRole};
use crate::llm::CompletionService;
use crate::retry::CallPolicy;
use crate::schema::types_compatible;
use lazy_static::lazy_static;
use regex::Regex;
use tracing::{debug, info};

pub const EXPLICIT_COLUMNS_CONFIDENCE: f64 = 0.95;
pub const INFERRED_COLUMNS_CONFIDENCE: f64 = 0.8;

lazy_static! {
    static ref SUPPLIED_BY: Regex = Regex::new(r"(?i)\bsupplied\s+by\b").unwrap();
    static ref REFERENCES: Regex = Regex::new(r"(?i)\breferences?\b|\brefers\s+to\b").unwrap();
    static ref MATCHES: Regex =
        Regex::new(r"(?i)\bmaps?\s+to\b|\bmatch(?:es)?\b|\bsame\s+as\b|\bcorresponds?\s+to\b|\bjoins?\s+(?:on|with)\b").unwrap();
    static ref BELONGS_TO: Regex = Regex::new(r"(?i)\bbelongs?\s+to\b").unwrap();
}

fn relationship_type_for(text: &str) -> RelationshipType {
    if SUPPLIED_BY.is_match(text) {
        RelationshipType::SuppliedBy
    } else if REFERENCES.is_match(text) {
        RelationshipType::References
    } else if BELONGS_TO.is_match(text) {
        RelationshipType::BelongsTo
    } else if MATCHES.is_match(text) {
        RelationshipType::Matches
    } else {
        RelationshipType::RelatedTo
    }
}

pub struct NlParser<'a> {
    kg: &'a KnowledgeGraph,
    resolver: TableResolver<'a>,
    classifier: Classifier<'a>,
}

impl<'a> NlParser<'a> {
    pub fn new(
        kg: &'a KnowledgeGraph,
        stop_words: &'a StopWords,
        completion: Option<&'a dyn CompletionService>,
        policy: CallPolicy,
    ) -> Self {
        Self {
            kg,
            resolver: TableResolver::new(kg, stop_words),
            classifier: Classifier::new(completion, policy),
        }
    }

    pub async fn parse(&self, text: &str) -> Result<ParsedDefinition> {
        let classification = self.classifier.classify(text).await?;
        let tables = self.resolver.resolve_tables(text);
        if tables.is_empty() {
            return Err(EngineError::no_table_resolved(format!(
                "no table or alias of '{}' found in: {}",
                self.kg.name, text
            )));
        }
        debug!(
            "Resolved tables {:?} for {} definition",
            tables.iter().map(|t| t.table_id.as_str()).collect::<Vec<_>>(),
            classification
        );

        let parsed = match classification {
            Classification::Relationship => ParsedDefinition::Relationship(self.parse_relationship(text, &tables)?),
            _ => ParsedDefinition::Query(self.parse_query(text, classification, &tables)?),
        };
        info!("Parsed definition as {}", classification);
        Ok(parsed)
    }

    /// The only neighbour of `table_id` in the graph, if there is exactly one.
    fn unique_neighbor(&self, table_id: &str) -> Result<String> {
        let neighbors = self.kg.neighbors(table_id);
        match neighbors.as_slice() {
            [only] => Ok(only.clone()),
            [] => Err(EngineError::ambiguous_join_target(format!(
                "only {} was named and it has no related table in the knowledge graph",
                table_id
            ))),
            many => Err(EngineError::ambiguous_join_target(format!(
                "only {} was named and it relates to {} tables: {}",
                table_id,
                many.len(),
                many.join(", ")
            ))),
        }
    }

    fn parse_query(
        &self,
        text: &str,
        classification: Classification,
        tables: &[TableMention],
    ) -> Result<QueryIntent> {
        let operation = detect_operation(text, classification);
        let source_table = tables[0].table_id.clone();
        let target_table = match tables.get(1) {
            Some(second) => Some(second.table_id.clone()),
            None if needs_target(operation, classification) => Some(self.unique_neighbor(&source_table)?),
            None => None,
        };

        let join_columns = target_table
            .as_deref()
            .and_then(|target| self.kg.best_edge_between(&source_table, target))
            .map(|edge| vec![edge.oriented_from(&source_table)])
            .unwrap_or_default();

        let filters = extract_filters(text, self.kg, tables);
        let aggregation = (operation == Operation::Aggregate)
            .then(|| self.aggregation_spec(text, &source_table, tables));

        Ok(QueryIntent {
            definition_text: text.to_string(),
            classification,
            source_table,
            target_table,
            operation,
            filters,
            join_columns,
            aggregation,
        })
    }

    fn aggregation_spec(&self, text: &str, table_id: &str, tables: &[TableMention]) -> AggregationSpec {
        let function = detect_aggregate_function(text);
        let tokens = tokenize(text);
        let columns = self.resolver.resolve_columns(text, table_id, tables);
        let follows_grouping = |m: &ColumnMention| {
            m.start > 0 && matches!(tokens[m.start - 1].as_str(), "by" | "per" | "each")
        };

        let group_by: Vec<String> = columns
            .iter()
            .filter(|m| follows_grouping(m))
            .map(|m| m.column.clone())
            .collect();

        let column = match function {
            AggregateFunction::Count => None,
            _ => columns
                .iter()
                .filter(|m| !follows_grouping(m))
                .map(|m| m.column.clone())
                .next()
                .or_else(|| {
                    self.kg.node(table_id).and_then(|n| {
                        n.active_columns()
                            .find(|c| c.semantic_role == Some(SemanticRole::Measure))
                            .map(|c| c.name.clone())
                    })
                }),
        };

        AggregationSpec {
            function,
            column,
            group_by,
        }
    }

    fn parse_relationship(&self, text: &str, tables: &[TableMention]) -> Result<NlRelationship> {
        let source_table = tables[0].table_id.clone();
        let target_table = match tables.get(1) {
            Some(second) => second.table_id.clone(),
            None => self.unique_neighbor(&source_table)?,
        };

        let source_columns = self.resolver.resolve_columns(text, &source_table, tables);
        let target_columns = self.resolver.resolve_columns(text, &target_table, tables);
        let relationship_type = relationship_type_for(text);

        // Explicit columns: one named for each side, the source one mentioned first.
        let explicit = source_columns.iter().find_map(|s| {
            target_columns
                .iter()
                .find(|t| t.start != s.start)
                .map(|t| (s.column.clone(), t.column.clone()))
        });
        if let Some((source_column, target_column)) = explicit {
            return Ok(NlRelationship {
                definition_text: text.to_string(),
                source_table,
                source_column,
                target_table,
                target_column,
                relationship_type,
                confidence: EXPLICIT_COLUMNS_CONFIDENCE,
                explicit_columns: true,
            });
        }

        let (source_column, target_column) = self
            .inferred_columns(&source_table, &target_table)
            .ok_or_else(|| {
                EngineError::ambiguous_join_target(format!(
                    "no joinable column pair between {} and {}",
                    source_table, target_table
                ))
            })?;
        Ok(NlRelationship {
            definition_text: text.to_string(),
            source_table,
            source_column,
            target_table,
            target_column,
            relationship_type,
            confidence: INFERRED_COLUMNS_CONFIDENCE,
            explicit_columns: false,
        })
    }

    /// Best existing edge, else the most similar type-compatible identifier pair.
    fn inferred_columns(&self, source: &str, target: &str) -> Option<(String, String)> {
        if let Some(edge) = self.kg.best_edge_between(source, target) {
            return Some(edge.oriented_from(source));
        }
        let (s, t) = (self.kg.node(source)?, self.kg.node(target)?);
        let mut best: Option<(f64, String, String)> = None;
        for sc in s.active_columns() {
            for tc in t.active_columns() {
                if !types_compatible(&sc.data_type, &tc.data_type) {
                    continue;
                }
                let similarity = column_similarity(&sc.name, &tc.name);
                if similarity < 0.6 {
                    continue;
                }
                if best.as_ref().map(|(b, _, _)| similarity > *b).unwrap_or(true) {
                    best = Some((similarity, sc.name.clone(), tc.name.clone()));
                }
            }
        }
        best.map(|(_, a, b)| (a, b))
    }
}
