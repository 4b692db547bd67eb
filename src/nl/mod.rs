//! Natural language definitions
//!
//! Pipeline: classify -> resolve tables -> detect operation -> extract filters.
//! The output is a [`ParsedDefinition`]; failures are typed errors, never strings.

pub mod classifier;
pub mod filters;
pub mod operation;
pub mod parser;
pub mod resolver;
pub mod vocabulary;

pub use classifier::{classify_heuristic, Classifier};
pub use parser::NlParser;
pub use resolver::{TableMention, TableResolver};
pub use vocabulary::StopWords;

use crate::error::{EngineError, Result};
use crate::knowledge_graph::{Cardinality, Relationship, RelationshipSource, RelationshipType};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Classification {
    Relationship,
    ComparisonQuery,
    FilterQuery,
    AggregationQuery,
}

impl Classification {
    pub const ALL: [Classification; 4] = [
        Classification::Relationship,
        Classification::ComparisonQuery,
        Classification::FilterQuery,
        Classification::AggregationQuery,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Relationship => "RELATIONSHIP",
            Self::ComparisonQuery => "COMPARISON_QUERY",
            Self::FilterQuery => "FILTER_QUERY",
            Self::AggregationQuery => "AGGREGATION_QUERY",
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Classification {
    type Err = EngineError;

    /// Exact enum names only; anything else is a hard failure.
    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == s.trim())
            .ok_or_else(|| EngineError::Llm(format!("'{}' is not a known classification", s)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operation {
    NotIn,
    In,
    Equals,
    Contains,
    Aggregate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOperator {
    Eq,
    /// Case-insensitive equality, used for status vocabulary.
    EqIgnoreCase,
    NotEq,
    Gt,
    Lt,
    Gte,
    Lte,
    Like,
}

impl FilterOperator {
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Eq | Self::EqIgnoreCase => "=",
            Self::NotEq => "<>",
            Self::Gt => ">",
            Self::Lt => "<",
            Self::Gte => ">=",
            Self::Lte => "<=",
            Self::Like => "LIKE",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    /// Node id of the table owning the column.
    pub table: String,
    pub column: String,
    pub operator: FilterOperator,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AggregateFunction {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggregateFunction {
    pub fn sql_name(&self) -> &'static str {
        match self {
            Self::Count => "COUNT",
            Self::Sum => "SUM",
            Self::Avg => "AVG",
            Self::Min => "MIN",
            Self::Max => "MAX",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationSpec {
    pub function: AggregateFunction,
    /// `None` means `COUNT(*)`.
    pub column: Option<String>,
    #[serde(default)]
    pub group_by: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryIntent {
    pub definition_text: String,
    pub classification: Classification,
    pub source_table: String,
    pub target_table: Option<String>,
    pub operation: Operation,
    #[serde(default)]
    pub filters: Vec<Filter>,
    /// `(source column, target column)` pairs.
    #[serde(default)]
    pub join_columns: Vec<(String, String)>,
    #[serde(default)]
    pub aggregation: Option<AggregationSpec>,
}

impl QueryIntent {
    /// Tables the generator may reference.
    pub fn tables(&self) -> Vec<String> {
        let mut tables = vec![self.source_table.clone()];
        if let Some(target) = &self.target_table {
            tables.push(target.clone());
        }
        tables
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NlRelationship {
    pub definition_text: String,
    pub source_table: String,
    pub source_column: String,
    pub target_table: String,
    pub target_column: String,
    pub relationship_type: RelationshipType,
    pub confidence: f64,
    /// Both columns were named in the text rather than inferred.
    pub explicit_columns: bool,
}

impl NlRelationship {
    pub fn to_relationship(&self) -> Relationship {
        Relationship::new(
            &self.source_table,
            &self.source_column,
            &self.target_table,
            &self.target_column,
            self.relationship_type,
            self.confidence,
            RelationshipSource::NaturalLanguage,
            Cardinality::Unknown,
            format!("Defined in natural language: {}", self.definition_text),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "definition", rename_all = "snake_case")]
pub enum ParsedDefinition {
    Relationship(NlRelationship),
    Query(QueryIntent),
}
