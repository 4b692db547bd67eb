//! Rule-based knowledge graph construction from introspected schemas
//!
//! Detection order (a column pair is claimed by the first detector that fires):
//! 1. field hints (forced pairs, 0.9, type-compatibility veto)
//! 2. declared foreign keys (0.95)
//! 3. exact normalized name matches (0.85)
//! 4. near name matches, Jaro-Winkler >= threshold (0.9 x similarity)
//! 5. `<table>_id` naming convention against the referenced primary key (0.75)
//!
//! Priority fields then add a +0.1 bonus, capped at 1.0.

use super::{
    normalize_name, Alias, AliasOrigin, Cardinality, ColumnNode, KnowledgeGraph, NodeMetadata,
    Relationship, RelationshipSource, RelationshipType, SemanticRole, TableNode,
};
use crate::field_preferences::PreferenceSet;
use crate::schema::{types_compatible, ColumnSchema, SchemaSnapshot, TypeFamily};
use itertools::Itertools;
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info, warn};

pub const FIELD_HINT_CONFIDENCE: f64 = 0.9;
pub const FOREIGN_KEY_CONFIDENCE: f64 = 0.95;
pub const NAME_MATCH_CONFIDENCE: f64 = 0.85;
pub const NAMING_CONVENTION_CONFIDENCE: f64 = 0.75;
pub const PRIORITY_BONUS: f64 = 0.1;

/// Learned aliases keyed by table name or id.
pub type AliasDictionary = BTreeMap<String, Vec<String>>;

lazy_static! {
    /// Audit and surrogate columns that share names across almost every table.
    static ref GENERIC_COLUMNS: HashSet<&'static str> = [
        "id", "createdat", "updatedat", "created", "updated", "modifiedat", "modified",
        "createdby", "updatedby", "name", "description", "notes", "comment", "comments",
        "version", "rowid",
    ]
    .into_iter()
    .collect();
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildOptions {
    pub near_match_threshold: f64,
    /// Shorter normalized names are only matched exactly.
    pub min_fuzzy_length: usize,
    pub alias_dictionary: AliasDictionary,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            near_match_threshold: 0.88,
            min_fuzzy_length: 3,
            alias_dictionary: AliasDictionary::new(),
        }
    }
}

/// A field hint that could not be turned into an edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HintVeto {
    pub table: String,
    pub source_column: String,
    pub target_column: String,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct BuildOutcome {
    pub graph: KnowledgeGraph,
    pub vetoed_hints: Vec<HintVeto>,
}

/// Similarity of two column names on their normalized forms, in [0, 1].
pub fn column_similarity(a: &str, b: &str) -> f64 {
    let (na, nb) = (normalize_name(a), normalize_name(b));
    if na.is_empty() || nb.is_empty() {
        return 0.0;
    }
    if na == nb {
        return 1.0;
    }
    strsim::jaro_winkler(&na, &nb)
}

pub fn infer_semantic_role(column: &ColumnSchema) -> Option<SemanticRole> {
    let lower = column.name.to_lowercase();
    let normalized = normalize_name(&column.name);
    let family = TypeFamily::of(&column.data_type);

    if lower.contains("status")
        || lower.contains("active")
        || lower.contains("state")
        || lower.ends_with("_flag")
        || lower.starts_with("is_")
        || family == TypeFamily::Boolean
    {
        return Some(SemanticRole::Status);
    }
    if column.is_primary_key
        || lower.ends_with("_id")
        || (normalized.ends_with("id") && normalized.len() > 2)
        || ["sku", "code", "key", "material", "number", "num", "no"]
            .iter()
            .any(|suffix| lower.ends_with(suffix))
    {
        return Some(SemanticRole::Identifier);
    }
    if family == TypeFamily::Temporal {
        return Some(SemanticRole::Timestamp);
    }
    if matches!(family, TypeFamily::Integer | TypeFamily::Decimal) {
        return Some(SemanticRole::Measure);
    }
    if family == TypeFamily::Text {
        return Some(SemanticRole::Descriptor);
    }
    None
}

fn derived_aliases(name: &str) -> Vec<Alias> {
    let mut aliases = Vec::new();
    let spaced = name
        .split(|c: char| c == '_' || c == '-' || c == '.')
        .filter(|p| !p.is_empty())
        .join(" ");
    if !spaced.is_empty() && !spaced.eq_ignore_ascii_case(name) {
        aliases.push(Alias {
            text: spaced,
            confidence: 0.95,
            origin: AliasOrigin::Derived,
        });
    }
    aliases
}

fn build_nodes(
    schemas: &[SchemaSnapshot],
    preferences: &PreferenceSet,
    options: &BuildOptions,
) -> Vec<TableNode> {
    let mut nodes = Vec::new();
    for snapshot in schemas {
        for table in &snapshot.tables {
            let preference = preferences.for_table(&snapshot.schema, &table.name);
            let columns = table
                .columns
                .iter()
                .map(|c| ColumnNode {
                    name: c.name.clone(),
                    data_type: c.data_type.clone(),
                    nullable: c.nullable,
                    is_primary_key: c.is_primary_key,
                    semantic_role: infer_semantic_role(c),
                    excluded: preference.map(|p| p.is_excluded(&c.name)).unwrap_or(false),
                })
                .collect();

            let id = format!("{}.{}", snapshot.schema, table.name);
            let mut aliases = derived_aliases(&table.name);
            for (key, learned) in &options.alias_dictionary {
                if key.eq_ignore_ascii_case(&table.name) || key.eq_ignore_ascii_case(&id) {
                    for text in learned {
                        if !text.eq_ignore_ascii_case(&table.name)
                            && !aliases.iter().any(|a: &Alias| a.text.eq_ignore_ascii_case(text))
                        {
                            aliases.push(Alias {
                                text: text.clone(),
                                confidence: 0.9,
                                origin: AliasOrigin::Dictionary,
                            });
                        }
                    }
                }
            }

            let metadata = preference
                .map(|p| NodeMetadata {
                    filter_hints: p.filter_hints.clone(),
                    priority_fields: p.priority_fields.clone(),
                })
                .unwrap_or_default();

            nodes.push(TableNode {
                id,
                schema: snapshot.schema.clone(),
                name: table.name.clone(),
                columns,
                aliases,
                metadata,
            });
        }
    }
    nodes.sort_by(|a, b| a.id.cmp(&b.id));
    nodes
}

/// Unordered endpoint pair used to make sure one column pair yields one edge.
fn pair_key(a_table: &str, a_col: &str, b_table: &str, b_col: &str) -> (String, String) {
    let a = format!("{}.{}", a_table, a_col).to_lowercase();
    let b = format!("{}.{}", b_table, b_col).to_lowercase();
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

struct EdgeCollector {
    claimed: HashSet<(String, String)>,
    edges: Vec<Relationship>,
}

impl EdgeCollector {
    fn new() -> Self {
        Self {
            claimed: HashSet::new(),
            edges: Vec::new(),
        }
    }

    fn is_claimed(&self, a_table: &str, a_col: &str, b_table: &str, b_col: &str) -> bool {
        self.claimed.contains(&pair_key(a_table, a_col, b_table, b_col))
    }

    fn push(&mut self, edge: Relationship) -> bool {
        let key = pair_key(&edge.source_id, &edge.source_column, &edge.target_id, &edge.target_column);
        if !self.claimed.insert(key) {
            return false;
        }
        self.edges.push(edge);
        true
    }
}

fn cardinality_for(a: &ColumnNode, b: &ColumnNode) -> Cardinality {
    match (a.is_primary_key, b.is_primary_key) {
        (true, true) => Cardinality::OneToOne,
        (true, false) => Cardinality::OneToMany,
        (false, true) => Cardinality::ManyToOne,
        (false, false) => Cardinality::Unknown,
    }
}

fn detect_field_hints(
    nodes: &[TableNode],
    preferences: &PreferenceSet,
    collector: &mut EdgeCollector,
    vetoes: &mut Vec<HintVeto>,
) {
    for node in nodes {
        let Some(preference) = preferences.for_table(&node.schema, &node.name) else {
            continue;
        };
        for (from, to) in &preference.field_hints {
            let mut veto = |reason: String| {
                warn!("Field hint {}.{} -> {} vetoed: {}", node.name, from, to, reason);
                vetoes.push(HintVeto {
                    table: node.id.clone(),
                    source_column: from.clone(),
                    target_column: to.clone(),
                    reason,
                });
            };

            let Some(source_col) = node.column(from) else {
                veto(format!("column {} does not exist", from));
                continue;
            };
            if source_col.excluded {
                veto(format!("column {} is excluded", from));
                continue;
            }

            let (table_filter, target_name) = match to.rsplit_once('.') {
                Some((table, column)) => (Some(table), column),
                None => (None, to.as_str()),
            };
            let targets: Vec<(&TableNode, &ColumnNode)> = nodes
                .iter()
                .filter(|n| n.id != node.id)
                .filter(|n| table_filter.map(|t| n.matches_name(t)).unwrap_or(true))
                .filter_map(|n| n.column(target_name).map(|c| (n, c)))
                .collect();

            if targets.is_empty() {
                veto(format!("no other table has a column named {}", target_name));
                continue;
            }

            for (target_node, target_col) in targets {
                if target_col.excluded {
                    veto(format!("column {}.{} is excluded", target_node.name, target_col.name));
                    continue;
                }
                if !types_compatible(&source_col.data_type, &target_col.data_type) {
                    veto(format!(
                        "incompatible types {} and {}",
                        source_col.data_type, target_col.data_type
                    ));
                    continue;
                }
                collector.push(Relationship::new(
                    &node.id,
                    &source_col.name,
                    &target_node.id,
                    &target_col.name,
                    RelationshipType::FieldHint,
                    FIELD_HINT_CONFIDENCE,
                    RelationshipSource::AutoDetected,
                    cardinality_for(source_col, target_col),
                    format!(
                        "Field hint maps {}.{} to {}.{}",
                        node.name, source_col.name, target_node.name, target_col.name
                    ),
                ));
            }
        }
    }
}

fn detect_foreign_keys(schemas: &[SchemaSnapshot], nodes: &[TableNode], collector: &mut EdgeCollector) {
    for snapshot in schemas {
        for table in &snapshot.tables {
            let source_id = format!("{}.{}", snapshot.schema, table.name);
            let Some(source) = nodes.iter().find(|n| n.id == source_id) else {
                continue;
            };
            for fk in &table.foreign_keys {
                let target_schema = fk.references_schema.as_deref().unwrap_or(&snapshot.schema);
                let target_id = format!("{}.{}", target_schema, fk.references_table);
                let target = nodes.iter().find(|n| n.id.eq_ignore_ascii_case(&target_id));
                let (Some(source_col), Some(target)) = (source.column(&fk.column), target) else {
                    debug!(
                        "Skipping foreign key {}.{} -> {}: unknown endpoint",
                        source_id, fk.column, target_id
                    );
                    continue;
                };
                let Some(target_col) = target.column(&fk.references_column) else {
                    continue;
                };
                if source_col.excluded || target_col.excluded {
                    continue;
                }
                collector.push(Relationship::new(
                    &source.id,
                    &source_col.name,
                    &target.id,
                    &target_col.name,
                    RelationshipType::ForeignKey,
                    FOREIGN_KEY_CONFIDENCE,
                    RelationshipSource::AutoDetected,
                    Cardinality::ManyToOne,
                    format!(
                        "Declared foreign key {}.{} references {}.{}",
                        source.name, source_col.name, target.name, target_col.name
                    ),
                ));
            }
        }
    }
}

fn detect_name_matches(nodes: &[TableNode], options: &BuildOptions, collector: &mut EdgeCollector) {
    for (i, a) in nodes.iter().enumerate() {
        for b in nodes.iter().skip(i + 1) {
            for ca in a.active_columns() {
                for cb in b.active_columns() {
                    if collector.is_claimed(&a.id, &ca.name, &b.id, &cb.name) {
                        continue;
                    }
                    if !types_compatible(&ca.data_type, &cb.data_type) {
                        continue;
                    }
                    let (na, nb) = (normalize_name(&ca.name), normalize_name(&cb.name));
                    if na.is_empty() || nb.is_empty() {
                        continue;
                    }
                    if na == nb {
                        if GENERIC_COLUMNS.contains(na.as_str()) {
                            continue;
                        }
                        collector.push(Relationship::new(
                            &a.id,
                            &ca.name,
                            &b.id,
                            &cb.name,
                            RelationshipType::NameMatch,
                            NAME_MATCH_CONFIDENCE,
                            RelationshipSource::AutoDetected,
                            cardinality_for(ca, cb),
                            format!("Column names match: {}.{} = {}.{}", a.name, ca.name, b.name, cb.name),
                        ));
                        continue;
                    }
                    if na.len() < options.min_fuzzy_length || nb.len() < options.min_fuzzy_length {
                        continue;
                    }
                    let similarity = strsim::jaro_winkler(&na, &nb);
                    if similarity >= options.near_match_threshold {
                        collector.push(Relationship::new(
                            &a.id,
                            &ca.name,
                            &b.id,
                            &cb.name,
                            RelationshipType::SimilarName,
                            0.9 * similarity,
                            RelationshipSource::AutoDetected,
                            cardinality_for(ca, cb),
                            format!("Similar column names {} ~ {} (similarity {:.2})", ca.name, cb.name, similarity),
                        ));
                    }
                }
            }
        }
    }
}

fn detect_naming_conventions(nodes: &[TableNode], collector: &mut EdgeCollector) {
    for source in nodes {
        for column in source.active_columns() {
            let lower = column.name.to_lowercase();
            let Some(stem) = lower.strip_suffix("_id").or_else(|| lower.strip_suffix("id")) else {
                continue;
            };
            let stem = normalize_name(stem);
            if stem.is_empty() {
                continue;
            }
            for target in nodes.iter().filter(|n| n.id != source.id) {
                let table = normalize_name(&target.name);
                let refers = table == stem
                    || table == format!("{}s", stem)
                    || table == format!("{}es", stem)
                    || table.strip_suffix('s') == Some(stem.as_str());
                if !refers {
                    continue;
                }
                let Some(key) = target.primary_key().or_else(|| target.column("id")) else {
                    continue;
                };
                if key.excluded
                    || !types_compatible(&column.data_type, &key.data_type)
                    || collector.is_claimed(&source.id, &column.name, &target.id, &key.name)
                {
                    continue;
                }
                collector.push(Relationship::new(
                    &source.id,
                    &column.name,
                    &target.id,
                    &key.name,
                    RelationshipType::NamingConvention,
                    NAMING_CONVENTION_CONFIDENCE,
                    RelationshipSource::AutoDetected,
                    Cardinality::ManyToOne,
                    format!("{}.{} names table {}", source.name, column.name, target.name),
                ));
            }
        }
    }
}

fn apply_priority_bonus(nodes: &[TableNode], edges: &mut [Relationship]) {
    let is_priority = |table_id: &str, column: &str| {
        nodes
            .iter()
            .find(|n| n.id == table_id)
            .map(|n| n.metadata.priority_fields.iter().any(|f| f.eq_ignore_ascii_case(column)))
            .unwrap_or(false)
    };
    for edge in edges.iter_mut() {
        if is_priority(&edge.source_id, &edge.source_column) || is_priority(&edge.target_id, &edge.target_column) {
            edge.confidence = (edge.confidence + PRIORITY_BONUS).min(1.0);
            edge.properties.reasoning.push_str(" (priority field bonus)");
        }
    }
}

/// Builds a fresh graph. Pure: identical inputs produce identical nodes and edges.
pub fn build_knowledge_graph(
    name: &str,
    schemas: &[SchemaSnapshot],
    preferences: &PreferenceSet,
    options: &BuildOptions,
) -> BuildOutcome {
    let nodes = build_nodes(schemas, preferences, options);
    let mut collector = EdgeCollector::new();
    let mut vetoed_hints = Vec::new();

    detect_field_hints(&nodes, preferences, &mut collector, &mut vetoed_hints);
    detect_foreign_keys(schemas, &nodes, &mut collector);
    detect_name_matches(&nodes, options, &mut collector);
    detect_naming_conventions(&nodes, &mut collector);

    let mut edges = collector.edges;
    apply_priority_bonus(&nodes, &mut edges);
    edges.sort_by(|a, b| a.key().cmp(&b.key()));

    info!(
        "Built knowledge graph '{}': {} tables, {} relationships, {} vetoed hints",
        name,
        nodes.len(),
        edges.len(),
        vetoed_hints.len()
    );

    let mut graph = KnowledgeGraph::new(name);
    graph.nodes = nodes;
    graph.relationships = edges;
    BuildOutcome { graph, vetoed_hints }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field_preferences::{FieldPreference, FilterHint};
    use crate::schema::{ForeignKey, TableSchema};

    fn schemas() -> Vec<SchemaSnapshot> {
        vec![
            SchemaSnapshot {
                schema: "rbp".into(),
                tables: vec![TableSchema::new(
                    "RBP_GPU",
                    vec![
                        ColumnSchema::new("Material", "varchar"),
                        ColumnSchema::new("Status", "varchar"),
                        ColumnSchema::new("Plant_Code", "varchar"),
                    ],
                )],
            },
            SchemaSnapshot {
                schema: "ops".into(),
                tables: vec![
                    TableSchema::new(
                        "OPS_EXCEL",
                        vec![
                            ColumnSchema::new("PLANNING_SKU", "varchar"),
                            ColumnSchema::new("PlantCode", "varchar"),
                            ColumnSchema::new("Active_Inactive", "varchar"),
                        ],
                    ),
                    TableSchema {
                        name: "SUPPLIER_LINKS".into(),
                        columns: vec![
                            ColumnSchema::new("link_id", "int").primary_key(),
                            ColumnSchema::new("sku", "varchar"),
                            ColumnSchema::new("supplier_id", "int"),
                        ],
                        foreign_keys: vec![ForeignKey {
                            column: "sku".into(),
                            references_schema: None,
                            references_table: "OPS_EXCEL".into(),
                            references_column: "PLANNING_SKU".into(),
                        }],
                    },
                    TableSchema::new(
                        "SUPPLIERS",
                        vec![ColumnSchema::new("id", "int").primary_key(), ColumnSchema::new("created_at", "timestamp")],
                    ),
                ],
            },
        ]
    }

    fn has_edge(kg: &KnowledgeGraph, a: &str, b: &str, t: RelationshipType) -> Option<f64> {
        kg.relationships
            .iter()
            .find(|r| {
                r.relationship_type == t
                    && ((r.source_column.eq_ignore_ascii_case(a) && r.target_column.eq_ignore_ascii_case(b))
                        || (r.source_column.eq_ignore_ascii_case(b) && r.target_column.eq_ignore_ascii_case(a)))
            })
            .map(|r| r.confidence)
    }

    #[test]
    fn test_detects_foreign_key_and_names() {
        let outcome = build_knowledge_graph("t", &schemas(), &PreferenceSet::default(), &BuildOptions::default());
        let kg = outcome.graph;
        assert_eq!(kg.nodes.len(), 4);
        assert_eq!(has_edge(&kg, "sku", "PLANNING_SKU", RelationshipType::ForeignKey), Some(0.95));
        let similar = has_edge(&kg, "Plant_Code", "PlantCode", RelationshipType::NameMatch);
        assert_eq!(similar, Some(NAME_MATCH_CONFIDENCE));
        assert_eq!(
            has_edge(&kg, "supplier_id", "id", RelationshipType::NamingConvention),
            Some(NAMING_CONVENTION_CONFIDENCE)
        );
        assert!(kg.relationships.iter().all(|r| (0.0..=1.0).contains(&r.confidence)));
    }

    #[test]
    fn test_field_hint_forced_pair() {
        let mut preference = FieldPreference::new("RBP_GPU");
        preference.field_hints.insert("Material".into(), "PLANNING_SKU".into());
        let prefs = PreferenceSet::new(vec![preference]).unwrap();
        let outcome = build_knowledge_graph("t", &schemas(), &prefs, &BuildOptions::default());
        assert_eq!(
            has_edge(&outcome.graph, "Material", "PLANNING_SKU", RelationshipType::FieldHint),
            Some(FIELD_HINT_CONFIDENCE)
        );
        assert!(outcome.vetoed_hints.is_empty());
    }

    #[test]
    fn test_field_hint_type_veto() {
        let mut preference = FieldPreference::new("SUPPLIERS");
        preference.field_hints.insert("created_at".into(), "PLANNING_SKU".into());
        let prefs = PreferenceSet::new(vec![preference]).unwrap();
        let outcome = build_knowledge_graph("t", &schemas(), &prefs, &BuildOptions::default());
        assert_eq!(outcome.vetoed_hints.len(), 1);
        assert!(outcome.vetoed_hints[0].reason.contains("incompatible"));
        assert!(has_edge(&outcome.graph, "created_at", "PLANNING_SKU", RelationshipType::FieldHint).is_none());
    }

    #[test]
    fn test_exclusion_and_priority() {
        let mut ops = FieldPreference::new("OPS_EXCEL");
        ops.exclude_fields.push("PlantCode".into());
        ops.filter_hints.insert("Active_Inactive".into(), FilterHint::Equals("Active".into()));
        let mut links = FieldPreference::new("SUPPLIER_LINKS");
        links.priority_fields.push("sku".into());
        let prefs = PreferenceSet::new(vec![ops, links]).unwrap();
        let outcome = build_knowledge_graph("t", &schemas(), &prefs, &BuildOptions::default());
        let kg = outcome.graph;

        assert!(kg.relationships.iter().all(|r| !r.touches("ops.OPS_EXCEL", "PlantCode")));
        assert_eq!(has_edge(&kg, "sku", "PLANNING_SKU", RelationshipType::ForeignKey), Some(1.0));
        let ops_node = kg.node("ops.OPS_EXCEL").unwrap();
        assert_eq!(ops_node.metadata.filter_hints.len(), 1);
        assert!(ops_node.column("PlantCode").unwrap().excluded);
    }

    #[test]
    fn test_aliases_and_roles() {
        let mut options = BuildOptions::default();
        options.alias_dictionary.insert("OPS_EXCEL".into(), vec!["OPS".into()]);
        let kg = build_knowledge_graph("t", &schemas(), &PreferenceSet::default(), &options).graph;
        let ops = kg.node("ops.OPS_EXCEL").unwrap();
        assert!(ops.has_alias("OPS Excel"));
        assert!(ops.has_alias("ops"));
        assert_eq!(ops.status_column().unwrap().name, "Active_Inactive");
        let rbp = kg.node("rbp.RBP_GPU").unwrap();
        assert_eq!(rbp.column("Material").unwrap().semantic_role, Some(SemanticRole::Identifier));
        assert_eq!(rbp.status_column().unwrap().name, "Status");
    }

    #[test]
    fn test_build_is_deterministic() {
        let a = build_knowledge_graph("t", &schemas(), &PreferenceSet::default(), &BuildOptions::default()).graph;
        let b = build_knowledge_graph("t", &schemas(), &PreferenceSet::default(), &BuildOptions::default()).graph;
        assert_eq!(a.nodes, b.nodes);
        assert_eq!(a.relationships, b.relationships);
    }
}
