//! Reconciliation rule generation
//!
//! Rules are read off the knowledge graph and the field preferences. The graph
//! is never modified here.

use crate::error::{EngineError, Result};
use crate::field_preferences::{render_where_clause, FilterHint, PreferenceSet};
use crate::knowledge_graph::{KnowledgeGraph, Relationship, RelationshipType, TableNode, HIGH_CONFIDENCE};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use tracing::{info, warn};

pub const HINT_RULE_CONFIDENCE: f64 = 0.9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    Exact,
    Semantic,
    Fuzzy,
}

impl MatchType {
    pub fn for_edge(edge: &Relationship) -> Self {
        if edge.is_natural_language() {
            return MatchType::Exact;
        }
        match edge.relationship_type {
            RelationshipType::Semantic => MatchType::Semantic,
            RelationshipType::SimilarName | RelationshipType::NamingConvention => MatchType::Fuzzy,
            _ => MatchType::Exact,
        }
    }
}

impl FromStr for MatchType {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "exact" => Ok(Self::Exact),
            "semantic" => Ok(Self::Semantic),
            "fuzzy" => Ok(Self::Fuzzy),
            other => Err(EngineError::Config(format!(
                "unknown match type '{}' (expected exact, semantic or fuzzy)",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationRule {
    pub source_table: String,
    pub source_columns: Vec<String>,
    pub target_table: String,
    pub target_columns: Vec<String>,
    pub match_type: MatchType,
    pub confidence: f64,
    /// Filter hints of both tables, verbatim. The source table wins a column collision.
    #[serde(default)]
    pub filter_conditions: BTreeMap<String, FilterHint>,
    #[serde(default)]
    pub source_filters: BTreeMap<String, FilterHint>,
    #[serde(default)]
    pub target_filters: BTreeMap<String, FilterHint>,
    /// Number of priority fields the rule touches; higher sorts first.
    pub priority: u32,
    #[serde(default)]
    pub reasoning: String,
}

impl ReconciliationRule {
    /// `WHERE` clause for the rule's filter conditions.
    pub fn where_clause(&self) -> Option<String> {
        render_where_clause(&self.filter_conditions)
    }

    /// `WHERE` clause with every condition qualified by its owning table, for
    /// queries that join both sides.
    pub fn qualified_where_clause(&self) -> Option<String> {
        let qualify = |table: &str, filters: &BTreeMap<String, FilterHint>| -> Vec<String> {
            filters
                .iter()
                .map(|(column, hint)| hint.render(&format!("{}.{}", table, column)))
                .collect()
        };
        let mut predicates = qualify(&self.source_table, &self.source_filters);
        predicates.extend(qualify(&self.target_table, &self.target_filters));
        if predicates.is_empty() {
            return None;
        }
        Some(format!("WHERE {}", predicates.join(" AND ")))
    }

    fn dedup_key(&self) -> (String, String) {
        let a = format!(
            "{}.{}",
            self.source_table.to_lowercase(),
            self.source_columns.join(",").to_lowercase()
        );
        let b = format!(
            "{}.{}",
            self.target_table.to_lowercase(),
            self.target_columns.join(",").to_lowercase()
        );
        if a <= b {
            (a, b)
        } else {
            (b, a)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleGenerationOptions {
    pub min_confidence: f64,
    pub allowed_match_types: Vec<MatchType>,
}

impl Default for RuleGenerationOptions {
    fn default() -> Self {
        Self {
            min_confidence: HIGH_CONFIDENCE,
            allowed_match_types: vec![MatchType::Exact, MatchType::Semantic, MatchType::Fuzzy],
        }
    }
}

/// A candidate rule dropped because a preference contradicts it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleConflict {
    pub table: String,
    pub column: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleGenerationOutput {
    pub rules: Vec<ReconciliationRule>,
    pub conflicts: Vec<RuleConflict>,
}

/// A named, persisted rule set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ruleset {
    pub name: String,
    pub rules: Vec<ReconciliationRule>,
    pub created_at: DateTime<Utc>,
}

impl Ruleset {
    pub fn new(name: &str, rules: Vec<ReconciliationRule>) -> Self {
        Self {
            name: name.to_string(),
            rules,
            created_at: Utc::now(),
        }
    }
}

fn is_excluded(node: &TableNode, column: &str, preferences: &PreferenceSet) -> bool {
    node.column(column).map(|c| c.excluded).unwrap_or(false)
        || preferences.is_excluded(&node.schema, &node.name, column)
}

fn is_priority(node: &TableNode, column: &str, preferences: &PreferenceSet) -> bool {
    node.metadata.priority_fields.iter().any(|p| p.eq_ignore_ascii_case(column))
        || preferences.is_priority(&node.schema, &node.name, column)
}

fn table_filters(node: &TableNode, preferences: &PreferenceSet) -> BTreeMap<String, FilterHint> {
    preferences
        .for_table(&node.schema, &node.name)
        .map(|p| p.filter_hints.clone())
        .unwrap_or_else(|| node.metadata.filter_hints.clone())
}

fn merged_filters(
    source: &BTreeMap<String, FilterHint>,
    target: &BTreeMap<String, FilterHint>,
) -> BTreeMap<String, FilterHint> {
    let mut conditions = source.clone();
    for (column, hint) in target {
        conditions.entry(column.clone()).or_insert_with(|| hint.clone());
    }
    conditions
}

#[allow(clippy::too_many_arguments)]
fn rule_between(
    source: &TableNode,
    source_column: &str,
    target: &TableNode,
    target_column: &str,
    match_type: MatchType,
    confidence: f64,
    preferences: &PreferenceSet,
    reasoning: String,
) -> ReconciliationRule {
    let priority = [
        is_priority(source, source_column, preferences),
        is_priority(target, target_column, preferences),
    ]
    .iter()
    .filter(|p| **p)
    .count() as u32;
    let source_filters = table_filters(source, preferences);
    let target_filters = table_filters(target, preferences);
    ReconciliationRule {
        source_table: source.id.clone(),
        source_columns: vec![source_column.to_string()],
        target_table: target.id.clone(),
        target_columns: vec![target_column.to_string()],
        match_type,
        confidence,
        filter_conditions: merged_filters(&source_filters, &target_filters),
        source_filters,
        target_filters,
        priority,
        reasoning,
    }
}

fn hint_rules(
    kg: &KnowledgeGraph,
    preferences: &PreferenceSet,
    conflicts: &mut Vec<RuleConflict>,
) -> Vec<ReconciliationRule> {
    let mut rules = Vec::new();
    for preference in preferences.iter() {
        let source = kg.nodes.iter().find(|n| preference.applies_to(&n.schema, &n.name));
        let Some(source) = source else {
            continue;
        };
        for (from, to) in &preference.field_hints {
            let (table_filter, target_column) = match to.rsplit_once('.') {
                Some((table, column)) => (Some(table), column),
                None => (None, to.as_str()),
            };
            let targets: Vec<&TableNode> = kg
                .nodes
                .iter()
                .filter(|n| n.id != source.id)
                .filter(|n| table_filter.map(|t| n.matches_name(t)).unwrap_or(true))
                .filter(|n| n.column(target_column).is_some())
                .collect();

            for target in targets {
                let excluded = if is_excluded(source, from, preferences) {
                    Some((source.id.clone(), from.clone()))
                } else if is_excluded(target, target_column, preferences) {
                    Some((target.id.clone(), target_column.to_string()))
                } else {
                    None
                };
                if let Some((table, column)) = excluded {
                    warn!("Field hint {}.{} -> {} dropped: {} is excluded", source.name, from, to, column);
                    conflicts.push(RuleConflict {
                        table,
                        column,
                        reason: format!("field hint {} -> {} targets an excluded field", from, to),
                    });
                    continue;
                }
                let target_name = target
                    .column(target_column)
                    .map(|c| c.name.clone())
                    .unwrap_or_else(|| target_column.to_string());
                let source_name = source.column(from).map(|c| c.name.clone()).unwrap_or_else(|| from.clone());
                rules.push(rule_between(
                    source,
                    &source_name,
                    target,
                    &target_name,
                    MatchType::Exact,
                    HINT_RULE_CONFIDENCE,
                    preferences,
                    format!("Field hint {} -> {}", from, to),
                ));
            }
        }
    }
    rules
}

pub fn generate_reconciliation_rules(
    kg: &KnowledgeGraph,
    preferences: &PreferenceSet,
    options: &RuleGenerationOptions,
) -> RuleGenerationOutput {
    let mut conflicts = Vec::new();
    let mut candidates = hint_rules(kg, preferences, &mut conflicts);

    for edge in &kg.relationships {
        if edge.confidence < options.min_confidence {
            continue;
        }
        let (Some(source), Some(target)) = (kg.node(&edge.source_id), kg.node(&edge.target_id))
        else {
            continue;
        };
        if is_excluded(source, &edge.source_column, preferences)
            || is_excluded(target, &edge.target_column, preferences)
        {
            continue;
        }
        candidates.push(rule_between(
            source,
            &edge.source_column,
            target,
            &edge.target_column,
            MatchType::for_edge(edge),
            edge.confidence,
            preferences,
            edge.properties.reasoning.clone(),
        ));
    }

    candidates.retain(|r| {
        options.allowed_match_types.contains(&r.match_type) && r.confidence >= options.min_confidence
    });

    let mut rules: Vec<ReconciliationRule> = Vec::new();
    let mut slots: HashMap<(String, String), usize> = HashMap::new();
    for rule in candidates {
        let key = rule.dedup_key();
        match slots.get(&key) {
            Some(&slot) if rule.confidence > rules[slot].confidence => rules[slot] = rule,
            Some(_) => {}
            None => {
                slots.insert(key, rules.len());
                rules.push(rule);
            }
        }
    }

    rules.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then(b.confidence.total_cmp(&a.confidence))
            .then(a.dedup_key().cmp(&b.dedup_key()))
    });

    info!("Generated {} reconciliation rules ({} conflicts)", rules.len(), conflicts.len());
    RuleGenerationOutput { rules, conflicts }
}
