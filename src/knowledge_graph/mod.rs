//! Knowledge Graph - tables, columns and confidence-scored relationships
//!
//! A graph is a named, versioned document. It is passed by reference into
//! every operation; nothing in the crate keeps a "current" graph around.
//! Build, enrichment and merge passes return new graphs instead of mutating.

pub mod builder;
pub mod enrich;
pub mod merge;

pub use builder::{build_knowledge_graph, AliasDictionary, BuildOptions, BuildOutcome, HintVeto};
pub use enrich::{enrich_with_completion, EnrichmentOptions, EnrichmentReport};
pub use merge::{
    add_nl_relationships_to_kg, get_relationship_statistics, merge_relationships, MergeStrategy,
    RelationshipStatistics,
};

use crate::field_preferences::FilterHint;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Edges at or above this confidence count as high confidence.
pub const HIGH_CONFIDENCE: f64 = 0.7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipType {
    ForeignKey,
    NameMatch,
    SimilarName,
    NamingConvention,
    FieldHint,
    Semantic,
    SuppliedBy,
    References,
    Matches,
    BelongsTo,
    RelatedTo,
}

impl RelationshipType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ForeignKey => "foreign_key",
            Self::NameMatch => "name_match",
            Self::SimilarName => "similar_name",
            Self::NamingConvention => "naming_convention",
            Self::FieldHint => "field_hint",
            Self::Semantic => "semantic",
            Self::SuppliedBy => "supplied_by",
            Self::References => "references",
            Self::Matches => "matches",
            Self::BelongsTo => "belongs_to",
            Self::RelatedTo => "related_to",
        }
    }
}

impl fmt::Display for RelationshipType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipSource {
    AutoDetected,
    NaturalLanguage,
}

impl RelationshipSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AutoDetected => "auto_detected",
            Self::NaturalLanguage => "natural_language",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    OneToOne,
    OneToMany,
    ManyToOne,
    ManyToMany,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipProperties {
    pub cardinality: Cardinality,
    pub reasoning: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub source_id: String,
    pub source_column: String,
    pub target_id: String,
    pub target_column: String,
    #[serde(rename = "type")]
    pub relationship_type: RelationshipType,
    #[serde(deserialize_with = "deserialize_confidence")]
    pub confidence: f64,
    pub source: RelationshipSource,
    pub properties: RelationshipProperties,
}

/// Identity of an edge for deduplication: both endpoints (case-insensitive) and the type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EdgeKey {
    pub source_id: String,
    pub source_column: String,
    pub target_id: String,
    pub target_column: String,
    pub relationship_type: RelationshipType,
}

pub fn clamp_confidence(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Stored documents go through the same clamp as freshly built edges.
fn deserialize_confidence<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    f64::deserialize(deserializer).map(clamp_confidence)
}

impl Relationship {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        source_id: &str,
        source_column: &str,
        target_id: &str,
        target_column: &str,
        relationship_type: RelationshipType,
        confidence: f64,
        source: RelationshipSource,
        cardinality: Cardinality,
        reasoning: impl Into<String>,
    ) -> Self {
        Self {
            source_id: source_id.to_string(),
            source_column: source_column.to_string(),
            target_id: target_id.to_string(),
            target_column: target_column.to_string(),
            relationship_type,
            confidence: clamp_confidence(confidence),
            source,
            properties: RelationshipProperties {
                cardinality,
                reasoning: reasoning.into(),
            },
        }
    }

    pub fn key(&self) -> EdgeKey {
        EdgeKey {
            source_id: self.source_id.to_lowercase(),
            source_column: self.source_column.to_lowercase(),
            target_id: self.target_id.to_lowercase(),
            target_column: self.target_column.to_lowercase(),
            relationship_type: self.relationship_type,
        }
    }

    pub fn is_natural_language(&self) -> bool {
        self.source == RelationshipSource::NaturalLanguage
    }

    /// True when the edge joins the two tables, in either direction.
    pub fn connects(&self, a: &str, b: &str) -> bool {
        (self.source_id.eq_ignore_ascii_case(a) && self.target_id.eq_ignore_ascii_case(b))
            || (self.source_id.eq_ignore_ascii_case(b) && self.target_id.eq_ignore_ascii_case(a))
    }

    pub fn touches(&self, table_id: &str, column: &str) -> bool {
        (self.source_id.eq_ignore_ascii_case(table_id) && self.source_column.eq_ignore_ascii_case(column))
            || (self.target_id.eq_ignore_ascii_case(table_id) && self.target_column.eq_ignore_ascii_case(column))
    }

    /// Join columns oriented as `(column on from_table, column on the other table)`.
    pub fn oriented_from(&self, from_table: &str) -> (String, String) {
        if self.source_id.eq_ignore_ascii_case(from_table) {
            (self.source_column.clone(), self.target_column.clone())
        } else {
            (self.target_column.clone(), self.source_column.clone())
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SemanticRole {
    Identifier,
    Status,
    Measure,
    Timestamp,
    Descriptor,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnNode {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
    #[serde(default)]
    pub is_primary_key: bool,
    #[serde(default)]
    pub semantic_role: Option<SemanticRole>,
    /// Removed from relationship detection by a field preference.
    #[serde(default)]
    pub excluded: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AliasOrigin {
    Derived,
    Dictionary,
    NaturalLanguage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alias {
    pub text: String,
    #[serde(deserialize_with = "deserialize_confidence")]
    pub confidence: f64,
    pub origin: AliasOrigin,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeMetadata {
    /// Copied into reconciliation rules; never evaluated by the graph itself.
    #[serde(default)]
    pub filter_hints: BTreeMap<String, FilterHint>,
    #[serde(default)]
    pub priority_fields: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableNode {
    pub id: String,
    pub schema: String,
    pub name: String,
    pub columns: Vec<ColumnNode>,
    #[serde(default)]
    pub aliases: Vec<Alias>,
    #[serde(default)]
    pub metadata: NodeMetadata,
}

impl TableNode {
    pub fn column(&self, name: &str) -> Option<&ColumnNode> {
        self.columns.iter().find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn active_columns(&self) -> impl Iterator<Item = &ColumnNode> {
        self.columns.iter().filter(|c| !c.excluded)
    }

    pub fn status_column(&self) -> Option<&ColumnNode> {
        self.active_columns()
            .find(|c| c.semantic_role == Some(SemanticRole::Status))
    }

    pub fn primary_key(&self) -> Option<&ColumnNode> {
        self.active_columns().find(|c| c.is_primary_key)
    }

    pub fn has_alias(&self, text: &str) -> bool {
        self.aliases.iter().any(|a| a.text.eq_ignore_ascii_case(text))
    }

    pub fn matches_name(&self, name: &str) -> bool {
        self.id.eq_ignore_ascii_case(name) || self.name.eq_ignore_ascii_case(name) || self.has_alias(name)
    }
}

/// How a rule-based confidence and an LLM score for the same edge are combined.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ConfidenceMerge {
    Max,
    WeightedAverage { llm_weight: f64 },
}

impl Default for ConfidenceMerge {
    fn default() -> Self {
        ConfidenceMerge::Max
    }
}

impl ConfidenceMerge {
    pub fn combine(self, rule_based: f64, llm: f64) -> f64 {
        let combined = match self {
            ConfidenceMerge::Max => rule_based.max(llm),
            ConfidenceMerge::WeightedAverage { llm_weight } => {
                let w = clamp_confidence(llm_weight);
                rule_based * (1.0 - w) + llm * w
            }
        };
        clamp_confidence(combined)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeGraph {
    pub name: String,
    /// Assigned by the repository when the snapshot is saved.
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub nodes: Vec<TableNode>,
    pub relationships: Vec<Relationship>,
}

impl KnowledgeGraph {
    pub fn new(name: &str) -> Self {
        let now = Utc::now();
        Self {
            name: name.to_string(),
            version: 0,
            created_at: now,
            updated_at: now,
            nodes: Vec::new(),
            relationships: Vec::new(),
        }
    }

    pub fn node(&self, id: &str) -> Option<&TableNode> {
        self.nodes.iter().find(|n| n.id.eq_ignore_ascii_case(id))
    }

    /// Looks a table up by id, canonical name or alias.
    pub fn find_node(&self, name: &str) -> Option<&TableNode> {
        self.node(name)
            .or_else(|| self.nodes.iter().find(|n| n.name.eq_ignore_ascii_case(name)))
            .or_else(|| self.nodes.iter().find(|n| n.has_alias(name)))
    }

    pub fn edges_between<'s>(&'s self, a: &str, b: &str) -> impl Iterator<Item = &'s Relationship> + 's {
        let (a, b) = (a.to_string(), b.to_string());
        self.relationships.iter().filter(move |r| r.connects(&a, &b))
    }

    /// Highest-confidence edge between two tables. Ties prefer natural-language edges.
    pub fn best_edge_between(&self, a: &str, b: &str) -> Option<&Relationship> {
        self.edges_between(a, b).fold(None, |best: Option<&Relationship>, edge| match best {
            None => Some(edge),
            Some(current) => {
                if edge.confidence > current.confidence
                    || (edge.confidence == current.confidence
                        && edge.is_natural_language()
                        && !current.is_natural_language())
                {
                    Some(edge)
                } else {
                    Some(current)
                }
            }
        })
    }

    /// Distinct tables sharing at least one edge with `table_id`.
    pub fn neighbors(&self, table_id: &str) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for edge in &self.relationships {
            let other = if edge.source_id.eq_ignore_ascii_case(table_id) {
                &edge.target_id
            } else if edge.target_id.eq_ignore_ascii_case(table_id) {
                &edge.source_id
            } else {
                continue;
            };
            if other.eq_ignore_ascii_case(table_id) {
                continue;
            }
            if !out.iter().any(|o| o.eq_ignore_ascii_case(other)) {
                out.push(other.clone());
            }
        }
        out.sort();
        out
    }
}

/// Lowercase alphanumerics only; `PLANNING_SKU` and `planning sku` compare equal.
pub fn normalize_name(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(|c| c.to_lowercase())
        .collect()
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub fn column(name: &str, data_type: &str) -> ColumnNode {
        ColumnNode {
            name: name.to_string(),
            data_type: data_type.to_string(),
            nullable: true,
            is_primary_key: false,
            semantic_role: None,
            excluded: false,
        }
    }

    pub fn node(schema: &str, name: &str, columns: Vec<ColumnNode>) -> TableNode {
        TableNode {
            id: format!("{}.{}", schema, name),
            schema: schema.to_string(),
            name: name.to_string(),
            columns,
            aliases: Vec::new(),
            metadata: NodeMetadata::default(),
        }
    }

    pub fn edge(
        source: &str,
        target: &str,
        relationship_type: RelationshipType,
        confidence: f64,
        origin: RelationshipSource,
    ) -> Relationship {
        Relationship::new(
            source,
            "a",
            target,
            "b",
            relationship_type,
            confidence,
            origin,
            Cardinality::Unknown,
            "test",
        )
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn test_loaded_confidence_is_clamped() {
        let mut e = edge("s.a", "s.b", RelationshipType::NameMatch, 0.5, RelationshipSource::AutoDetected);
        let mut doc = serde_json::to_value(&e).unwrap();
        doc["confidence"] = serde_json::json!(3.5);
        e = serde_json::from_value(doc).unwrap();
        assert_eq!(e.confidence, 1.0);

        let alias: Alias =
            serde_json::from_value(serde_json::json!({"text": "gpu", "confidence": -1.0, "origin": "derived"}))
                .unwrap();
        assert_eq!(alias.confidence, 0.0);
    }

    #[test]
    fn test_confidence_is_clamped() {
        let e = edge("s.a", "s.b", RelationshipType::NameMatch, 1.4, RelationshipSource::AutoDetected);
        assert_eq!(e.confidence, 1.0);
        let e = edge("s.a", "s.b", RelationshipType::NameMatch, -0.2, RelationshipSource::AutoDetected);
        assert_eq!(e.confidence, 0.0);
    }

    #[test]
    fn test_best_edge_prefers_natural_language_on_tie() {
        let mut kg = KnowledgeGraph::new("t");
        kg.relationships.push(edge("s.a", "s.b", RelationshipType::NameMatch, 0.8, RelationshipSource::AutoDetected));
        kg.relationships.push(edge("s.b", "s.a", RelationshipType::Matches, 0.8, RelationshipSource::NaturalLanguage));
        let best = kg.best_edge_between("s.a", "s.b").unwrap();
        assert!(best.is_natural_language());
    }

    #[test]
    fn test_neighbors_are_distinct() {
        let mut kg = KnowledgeGraph::new("t");
        kg.relationships.push(edge("s.a", "s.b", RelationshipType::NameMatch, 0.8, RelationshipSource::AutoDetected));
        kg.relationships.push(edge("s.b", "s.a", RelationshipType::ForeignKey, 0.9, RelationshipSource::AutoDetected));
        kg.relationships.push(edge("s.c", "s.a", RelationshipType::ForeignKey, 0.9, RelationshipSource::AutoDetected));
        assert_eq!(kg.neighbors("s.a"), vec!["s.b".to_string(), "s.c".to_string()]);
    }

    #[test]
    fn test_weighted_average_merge() {
        let merge = ConfidenceMerge::WeightedAverage { llm_weight: 0.25 };
        assert!((merge.combine(0.8, 0.4) - 0.7).abs() < 1e-9);
        assert_eq!(ConfidenceMerge::Max.combine(0.6, 0.9), 0.9);
    }

    #[test]
    fn test_find_node_by_alias() {
        let mut kg = KnowledgeGraph::new("t");
        let mut n = node("ops", "OPS_EXCEL", vec![column("PLANNING_SKU", "varchar")]);
        n.aliases.push(Alias { text: "OPS Excel".into(), confidence: 0.95, origin: AliasOrigin::Derived });
        kg.nodes.push(n);
        assert_eq!(kg.find_node("ops excel").unwrap().id, "ops.OPS_EXCEL");
        assert_eq!(kg.find_node("OPS.ops_excel").unwrap().name, "OPS_EXCEL");
    }

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("PLANNING_SKU"), "planningsku");
        assert_eq!(normalize_name("Planning Sku"), "planningsku");
    }
}
