//! Relationship merge strategies and statistics. All functions here are pure.

use super::{
    KnowledgeGraph, Relationship, RelationshipSource, RelationshipType, HIGH_CONFIDENCE,
};
use crate::error::{EngineError, Result};
use crate::nl::NlRelationship;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// Keep everything, parallel edges included.
    Union,
    /// Collapse edges with the same identity, keeping the most confident one.
    Deduplicate,
    /// Drop every edge below the high-confidence floor, whatever its provenance.
    HighConfidence,
}

impl FromStr for MergeStrategy {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "union" => Ok(Self::Union),
            "deduplicate" | "dedup" => Ok(Self::Deduplicate),
            "high_confidence" => Ok(Self::HighConfidence),
            other => Err(EngineError::Config(format!(
                "unknown merge strategy '{}' (expected union, deduplicate or high_confidence)",
                other
            ))),
        }
    }
}

/// Appends one `natural_language` edge per definition. Existing edges are kept,
/// so an NL edge may run parallel to an auto-detected one.
pub fn add_nl_relationships_to_kg(
    kg: &KnowledgeGraph,
    relationships: &[NlRelationship],
) -> KnowledgeGraph {
    let mut merged = kg.clone();
    for nl in relationships {
        merged.relationships.push(nl.to_relationship());
    }
    info!(
        "Added {} natural language relationships to '{}'",
        relationships.len(),
        kg.name
    );
    merged
}

fn prefer(candidate: &Relationship, current: &Relationship) -> bool {
    candidate.confidence > current.confidence
        || (candidate.confidence == current.confidence
            && candidate.is_natural_language()
            && !current.is_natural_language())
}

pub fn merge_relationships(kg: &KnowledgeGraph, strategy: MergeStrategy) -> KnowledgeGraph {
    let mut merged = kg.clone();
    merged.relationships = match strategy {
        MergeStrategy::Union => kg.relationships.clone(),
        MergeStrategy::Deduplicate => {
            let mut kept: Vec<Relationship> = Vec::new();
            let mut slots = HashMap::new();
            for edge in &kg.relationships {
                match slots.get(&edge.key()) {
                    Some(&slot) => {
                        if prefer(edge, &kept[slot]) {
                            kept[slot] = edge.clone();
                        }
                    }
                    None => {
                        slots.insert(edge.key(), kept.len());
                        kept.push(edge.clone());
                    }
                }
            }
            kept
        }
        MergeStrategy::HighConfidence => kg
            .relationships
            .iter()
            .filter(|r| r.confidence >= HIGH_CONFIDENCE)
            .cloned()
            .collect(),
    };
    info!(
        "Merged '{}' with {:?}: {} -> {} relationships",
        kg.name,
        strategy,
        kg.relationships.len(),
        merged.relationships.len()
    );
    merged
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipStatistics {
    pub total: usize,
    pub by_type: BTreeMap<RelationshipType, usize>,
    pub by_source: BTreeMap<RelationshipSource, usize>,
    pub nl_defined: usize,
    pub auto_detected: usize,
    pub average_confidence: f64,
    pub high_confidence_count: usize,
}

pub fn get_relationship_statistics(kg: &KnowledgeGraph) -> RelationshipStatistics {
    let mut by_type = BTreeMap::new();
    let mut by_source = BTreeMap::new();
    for edge in &kg.relationships {
        *by_type.entry(edge.relationship_type).or_insert(0) += 1;
        *by_source.entry(edge.source).or_insert(0) += 1;
    }
    let total = kg.relationships.len();
    let average_confidence = if total == 0 {
        0.0
    } else {
        kg.relationships.iter().map(|r| r.confidence).sum::<f64>() / total as f64
    };
    RelationshipStatistics {
        total,
        nl_defined: by_source.get(&RelationshipSource::NaturalLanguage).copied().unwrap_or(0),
        auto_detected: by_source.get(&RelationshipSource::AutoDetected).copied().unwrap_or(0),
        by_type,
        by_source,
        average_confidence,
        high_confidence_count: kg
            .relationships
            .iter()
            .filter(|r| r.confidence >= HIGH_CONFIDENCE)
            .count(),
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::edge;
    use super::*;
    use std::collections::HashSet;

    fn graph() -> KnowledgeGraph {
        let mut kg = KnowledgeGraph::new("t");
        kg.relationships = vec![
            edge("s.a", "s.b", RelationshipType::NameMatch, 0.6, RelationshipSource::AutoDetected),
            edge("s.A", "s.B", RelationshipType::NameMatch, 0.85, RelationshipSource::AutoDetected),
            edge("s.a", "s.c", RelationshipType::Matches, 0.7, RelationshipSource::AutoDetected),
            edge("s.a", "s.c", RelationshipType::Matches, 0.7, RelationshipSource::NaturalLanguage),
            edge("s.c", "s.d", RelationshipType::ForeignKey, 0.95, RelationshipSource::AutoDetected),
            edge("s.d", "s.e", RelationshipType::Semantic, 0.3, RelationshipSource::NaturalLanguage),
        ];
        kg
    }

    #[test]
    fn test_deduplicate_leaves_unique_keys() {
        let merged = merge_relationships(&graph(), MergeStrategy::Deduplicate);
        let keys: HashSet<_> = merged.relationships.iter().map(|r| r.key()).collect();
        assert_eq!(keys.len(), merged.relationships.len());
        assert_eq!(merged.relationships.len(), 4);
        assert_eq!(merged.relationships[0].confidence, 0.85);
        assert!(merged.relationships[1].is_natural_language());
    }

    #[test]
    fn test_high_confidence_floor_applies_to_nl_edges() {
        let merged = merge_relationships(&graph(), MergeStrategy::HighConfidence);
        assert!(merged.relationships.iter().all(|r| r.confidence >= 0.7));
        assert_eq!(merged.relationships.len(), 4);
    }

    #[test]
    fn test_union_is_idempotent() {
        let kg = graph();
        let once = merge_relationships(&kg, MergeStrategy::Union);
        let twice = merge_relationships(&once, MergeStrategy::Union);
        assert_eq!(once.relationships, kg.relationships);
        assert_eq!(twice.relationships, once.relationships);
        let dedup = merge_relationships(&kg, MergeStrategy::Deduplicate);
        assert_eq!(merge_relationships(&dedup, MergeStrategy::Deduplicate).relationships, dedup.relationships);
    }

    #[test]
    fn test_statistics() {
        let stats = get_relationship_statistics(&graph());
        assert_eq!(stats.total, 6);
        assert_eq!(stats.nl_defined, 2);
        assert_eq!(stats.auto_detected, 4);
        assert_eq!(stats.by_type[&RelationshipType::NameMatch], 2);
        assert_eq!(stats.high_confidence_count, 4);
        assert!((stats.average_confidence - 4.1 / 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_graph_statistics() {
        let stats = get_relationship_statistics(&KnowledgeGraph::new("empty"));
        assert_eq!(stats.total, 0);
        assert_eq!(stats.average_confidence, 0.0);
    }

    #[test]
    fn test_strategy_parsing() {
        assert_eq!("high-confidence".parse::<MergeStrategy>().unwrap(), MergeStrategy::HighConfidence);
        assert!("merge_all".parse::<MergeStrategy>().is_err());
    }
}
