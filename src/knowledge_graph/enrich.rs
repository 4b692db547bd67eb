//! Optional LLM scoring pass over a rule-based graph.
//!
//! The completion is only asked about pairs the rules are unsure of: near-miss
//! column names and auto-detected edges below `rescore_below`. On any completion
//! failure the input graph is returned unchanged.

use super::builder::column_similarity;
use super::{
    clamp_confidence, Cardinality, ConfidenceMerge, KnowledgeGraph, Relationship,
    RelationshipSource, RelationshipType,
};
use crate::llm::{complete_structured, CompletionRequest, CompletionService, ResponseShape};
use crate::retry::CallPolicy;
use crate::schema::types_compatible;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashSet;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentOptions {
    /// Lower bound of the ambiguous similarity band.
    pub ambiguous_floor: f64,
    /// Upper bound (exclusive); pairs at or above it were already seeded by the builder.
    pub near_match_threshold: f64,
    pub rescore_below: f64,
    pub max_pairs: usize,
    /// Minimum LLM score for a brand new semantic edge.
    pub accept_threshold: f64,
    pub merge: ConfidenceMerge,
}

impl Default for EnrichmentOptions {
    fn default() -> Self {
        Self {
            ambiguous_floor: 0.6,
            near_match_threshold: 0.88,
            rescore_below: 0.8,
            max_pairs: 40,
            accept_threshold: 0.5,
            merge: ConfidenceMerge::Max,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentReport {
    pub candidates: usize,
    pub rescored: usize,
    pub added: usize,
    /// Set when the completion failed and the rule-based graph was kept.
    pub fallback_reason: Option<String>,
}

#[derive(Debug, Clone)]
struct Candidate {
    source_id: String,
    source_column: String,
    target_id: String,
    target_column: String,
    /// Index of the existing edge being rescored.
    existing: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct ScoredPair {
    index: usize,
    confidence: f64,
    #[serde(default)]
    reasoning: String,
}

#[derive(Debug, Deserialize)]
struct ScoreResponse {
    scores: Vec<ScoredPair>,
}

fn collect_candidates(kg: &KnowledgeGraph, options: &EnrichmentOptions) -> Vec<Candidate> {
    let mut candidates = Vec::new();

    for (index, edge) in kg.relationships.iter().enumerate() {
        if edge.is_natural_language() || edge.confidence >= options.rescore_below {
            continue;
        }
        candidates.push(Candidate {
            source_id: edge.source_id.clone(),
            source_column: edge.source_column.clone(),
            target_id: edge.target_id.clone(),
            target_column: edge.target_column.clone(),
            existing: Some(index),
        });
    }

    for (i, a) in kg.nodes.iter().enumerate() {
        for b in kg.nodes.iter().skip(i + 1) {
            for ca in a.active_columns() {
                for cb in b.active_columns() {
                    if !types_compatible(&ca.data_type, &cb.data_type) {
                        continue;
                    }
                    let similarity = column_similarity(&ca.name, &cb.name);
                    if similarity < options.ambiguous_floor || similarity >= options.near_match_threshold {
                        continue;
                    }
                    let already_linked = kg
                        .relationships
                        .iter()
                        .any(|r| r.touches(&a.id, &ca.name) && r.touches(&b.id, &cb.name));
                    if already_linked {
                        continue;
                    }
                    candidates.push(Candidate {
                        source_id: a.id.clone(),
                        source_column: ca.name.clone(),
                        target_id: b.id.clone(),
                        target_column: cb.name.clone(),
                        existing: None,
                    });
                }
            }
        }
    }

    candidates.truncate(options.max_pairs);
    candidates
}

fn scoring_request(kg: &KnowledgeGraph, candidates: &[Candidate]) -> CompletionRequest {
    let describe = |table_id: &str, column: &str| {
        let data_type = kg
            .node(table_id)
            .and_then(|n| n.column(column))
            .map(|c| c.data_type.as_str())
            .unwrap_or("unknown");
        format!("{}.{} ({})", table_id, column, data_type)
    };
    let lines: Vec<String> = candidates
        .iter()
        .enumerate()
        .map(|(i, c)| {
            format!(
                "{}. {} <-> {}",
                i,
                describe(&c.source_id, &c.source_column),
                describe(&c.target_id, &c.target_column)
            )
        })
        .collect();

    CompletionRequest {
        system: "You judge whether two database columns hold the same business key.".to_string(),
        prompt: format!(
            "For each numbered column pair, give a confidence between 0.0 and 1.0 that the two \
             columns can be joined on equal values.\n\n{}",
            lines.join("\n")
        ),
        response_shape: ResponseShape::new(
            "relationship_scores",
            &["scores"],
            json!({"scores": [{"index": 0, "confidence": 0.85, "reasoning": "both hold the planning SKU"}]}),
        ),
    }
}

fn parse_scores(value: Value, candidates: usize) -> crate::error::Result<Vec<ScoredPair>> {
    let response: ScoreResponse = serde_json::from_value(value).map_err(|e| {
        crate::error::EngineError::Llm(format!("relationship_scores response is malformed: {}", e))
    })?;
    if let Some(bad) = response.scores.iter().find(|s| s.index >= candidates) {
        return Err(crate::error::EngineError::Llm(format!(
            "relationship_scores refers to unknown pair {}",
            bad.index
        )));
    }
    let mut seen = HashSet::new();
    if let Some(repeated) = response.scores.iter().find(|s| !seen.insert(s.index)) {
        return Err(crate::error::EngineError::Llm(format!(
            "relationship_scores scores pair {} more than once",
            repeated.index
        )));
    }
    Ok(response.scores)
}

/// Returns the enriched graph. The input graph is never modified.
pub async fn enrich_with_completion(
    kg: &KnowledgeGraph,
    completion: &dyn CompletionService,
    options: &EnrichmentOptions,
    policy: CallPolicy,
) -> (KnowledgeGraph, EnrichmentReport) {
    let candidates = collect_candidates(kg, options);
    let mut report = EnrichmentReport {
        candidates: candidates.len(),
        ..EnrichmentReport::default()
    };
    if candidates.is_empty() {
        return (kg.clone(), report);
    }

    let request = scoring_request(kg, &candidates);
    let scores = match complete_structured(completion, &request, policy).await {
        Ok(value) => parse_scores(value, candidates.len()),
        Err(e) => Err(e),
    };
    let scores = match scores {
        Ok(scores) => scores,
        Err(e) => {
            warn!("Enrichment fell back to rule-based graph: {}", e);
            report.fallback_reason = Some(e.to_string());
            return (kg.clone(), report);
        }
    };

    let mut enriched = kg.clone();
    for scored in scores {
        let candidate = &candidates[scored.index];
        let llm_score = clamp_confidence(scored.confidence);
        match candidate.existing {
            Some(index) => {
                let edge = &mut enriched.relationships[index];
                edge.confidence = options.merge.combine(edge.confidence, llm_score);
                if !scored.reasoning.is_empty() {
                    edge.properties.reasoning = format!("{}; LLM: {}", edge.properties.reasoning, scored.reasoning);
                }
                report.rescored += 1;
            }
            None if llm_score >= options.accept_threshold => {
                enriched.relationships.push(Relationship::new(
                    &candidate.source_id,
                    &candidate.source_column,
                    &candidate.target_id,
                    &candidate.target_column,
                    RelationshipType::Semantic,
                    llm_score,
                    RelationshipSource::AutoDetected,
                    Cardinality::Unknown,
                    if scored.reasoning.is_empty() {
                        "LLM judged the columns joinable".to_string()
                    } else {
                        scored.reasoning.clone()
                    },
                ));
                report.added += 1;
            }
            None => {}
        }
    }

    info!(
        "Enriched '{}': {} candidates, {} rescored, {} added",
        kg.name, report.candidates, report.rescored, report.added
    );
    (enriched, report)
}
