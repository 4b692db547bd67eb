//! Four-way classification of NL definitions.

use super::Classification;
use crate::error::{EngineError, Result};
use crate::llm::{complete_structured, CompletionRequest, CompletionService, ResponseShape};
use crate::retry::CallPolicy;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::json;
use tracing::{debug, warn};

lazy_static! {
    static ref RELATIONSHIP: Regex = Regex::new(
        r"(?i)\b(?:(?:is|are)\s+)?supplied\s+by\b|\breferences?\b|\brefers\s+to\b|\bmaps?\s+to\b|\bbelongs?\s+to\b|\b(?:is|are)\s+related\s+to\b|\brelates\s+to\b|\bcorresponds?\s+to\b|\b(?:is|are)\s+the\s+same\s+as\b|\bjoins?\s+(?:on|with)\b"
    )
    .unwrap();
    static ref AGGREGATION: Regex = Regex::new(
        r"(?i)\b(?:count|how\s+many|sum|total|average|avg|mean|group\s+by|minimum|maximum|number\s+of)\b"
    )
    .unwrap();
    static ref COMPARISON: Regex = Regex::new(
        r"(?i)\bnot\s+in\b|\bmissing\b|\babsent\b|\bcompare\b|\bmismatch(?:es|ed)?\b|\bin\s+both\b|\bmatching\b|\bbut\s+not\b"
    )
    .unwrap();
    static ref FILTER: Regex =
        Regex::new(r"(?i)\b(?:show|find|list|which|get|display|give)\b").unwrap();
}

/// Keyword classification. `None` means the text is ambiguous.
pub fn classify_heuristic(text: &str) -> Option<Classification> {
    if RELATIONSHIP.is_match(text) {
        Some(Classification::Relationship)
    } else if AGGREGATION.is_match(text) {
        Some(Classification::AggregationQuery)
    } else if COMPARISON.is_match(text) {
        Some(Classification::ComparisonQuery)
    } else if FILTER.is_match(text) {
        Some(Classification::FilterQuery)
    } else {
        None
    }
}

pub struct Classifier<'a> {
    completion: Option<&'a dyn CompletionService>,
    policy: CallPolicy,
}

impl<'a> Classifier<'a> {
    pub fn new(completion: Option<&'a dyn CompletionService>, policy: CallPolicy) -> Self {
        Self { completion, policy }
    }

    pub async fn classify(&self, text: &str) -> Result<Classification> {
        if let Some(classification) = classify_heuristic(text) {
            debug!("Classified '{}' as {} by keywords", text, classification);
            return Ok(classification);
        }
        let Some(completion) = self.completion else {
            warn!("No completion service for ambiguous definition '{}', treating it as FILTER_QUERY", text);
            return Ok(Classification::FilterQuery);
        };

        let labels: Vec<&str> = Classification::ALL.iter().map(|c| c.as_str()).collect();
        let request = CompletionRequest {
            system: "You classify data definitions for a reconciliation engine.".to_string(),
            prompt: format!(
                "Classify the definition into exactly one of: {}.\n\nDefinition: \"{}\"",
                labels.join(", "),
                text
            ),
            response_shape: ResponseShape::new(
                "classification",
                &["classification"],
                json!({"classification": "FILTER_QUERY"}),
            ),
        };
        let value = complete_structured(completion, &request, self.policy).await?;
        let label = value["classification"]
            .as_str()
            .ok_or_else(|| EngineError::Llm("classification must be a string".to_string()))?;
        label.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::test_support::ScriptedCompletion;
    use std::time::Duration;

    #[test]
    fn test_keyword_classification() {
        assert_eq!(
            classify_heuristic("Show me all the products in RBP GPU which are not in OPS Excel"),
            Some(Classification::ComparisonQuery)
        );
        assert_eq!(
            classify_heuristic("Show me all active products in RBP GPU"),
            Some(Classification::FilterQuery)
        );
        assert_eq!(
            classify_heuristic("RBP GPU products are supplied by OPS Excel"),
            Some(Classification::Relationship)
        );
        assert_eq!(
            classify_heuristic("How many products per plant in RBP GPU"),
            Some(Classification::AggregationQuery)
        );
        assert_eq!(classify_heuristic("RBP GPU against OPS Excel"), None);
    }

    #[tokio::test]
    async fn test_ambiguous_text_goes_to_completion() {
        let service = ScriptedCompletion::new(vec![Ok(json!({"classification": "COMPARISON_QUERY"}))]);
        let classifier = Classifier::new(Some(&service), CallPolicy::new(Duration::from_secs(1)));
        let classification = classifier.classify("RBP GPU against OPS Excel").await.unwrap();
        assert_eq!(classification, Classification::ComparisonQuery);
        assert_eq!(service.calls(), 1);
    }

    #[tokio::test]
    async fn test_out_of_enum_answer_is_hard_failure() {
        let service = ScriptedCompletion::new(vec![Ok(json!({"classification": "JOIN"}))]);
        let classifier = Classifier::new(Some(&service), CallPolicy::new(Duration::from_secs(1)));
        let err = classifier.classify("RBP GPU against OPS Excel").await.unwrap_err();
        assert_eq!(err.code(), "LLM_ERROR");
    }

    #[tokio::test]
    async fn test_without_completion_defaults_to_filter() {
        let classifier = Classifier::new(None, CallPolicy::new(Duration::from_secs(1)));
        assert_eq!(
            classifier.classify("RBP GPU against OPS Excel").await.unwrap(),
            Classification::FilterQuery
        );
    }
}
