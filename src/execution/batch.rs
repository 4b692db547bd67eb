//! Batch runs. Each item succeeds or fails on its own; one failure never
//! stops the rest of the batch.

use super::gateway::{Defined, ExecutionGateway};
use super::{QueryDefinition, RunTrigger};
use crate::error::EngineError;
use crate::nl::NlRelationship;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchItemOutcome {
    /// Definition id for runs, definition text for defines.
    pub text: String,
    pub success: bool,
    pub record_count: Option<usize>,
    pub code: Option<String>,
    pub message: Option<String>,
}

impl BatchItemOutcome {
    fn succeeded(text: &str, record_count: Option<usize>) -> Self {
        Self {
            text: text.to_string(),
            success: true,
            record_count,
            code: None,
            message: None,
        }
    }

    fn failed(text: &str, err: &EngineError) -> Self {
        Self {
            text: text.to_string(),
            success: false,
            record_count: None,
            code: Some(err.code().to_string()),
            message: Some(err.to_string()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub items: Vec<BatchItemOutcome>,
    pub succeeded: usize,
    pub failed: usize,
}

impl BatchReport {
    fn push(&mut self, outcome: BatchItemOutcome) {
        if outcome.success {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
        self.items.push(outcome);
    }
}

/// What a define batch produced besides its report.
#[derive(Debug, Clone, Default)]
pub struct DefineBatchOutput {
    pub report: BatchReport,
    pub queries: Vec<QueryDefinition>,
    pub relationships: Vec<NlRelationship>,
}

impl ExecutionGateway {
    pub async fn run_batch(&self, definition_ids: &[String], trigger: RunTrigger) -> BatchReport {
        let mut report = BatchReport::default();
        for id in definition_ids {
            match self.run(id, trigger).await {
                Ok(execution) => report.push(BatchItemOutcome::succeeded(id, Some(execution.record_count))),
                Err(e) => {
                    warn!("Batch run of {} failed: {}", id, e);
                    report.push(BatchItemOutcome::failed(id, &e));
                }
            }
        }
        info!(
            "Batch run finished: {} succeeded, {} failed",
            report.succeeded, report.failed
        );
        report
    }

    /// Defines each `(name, text)` pair independently.
    pub async fn define_batch(&self, definitions: &[(String, String)]) -> DefineBatchOutput {
        let mut output = DefineBatchOutput::default();
        for (name, text) in definitions {
            match self.define(name, text).await {
                Ok(Defined::Query(definition)) => {
                    output.report.push(BatchItemOutcome::succeeded(text, None));
                    output.queries.push(definition);
                }
                Ok(Defined::Relationship(relationship)) => {
                    output.report.push(BatchItemOutcome::succeeded(text, None));
                    output.relationships.push(relationship);
                }
                Err(e) => {
                    warn!("Definition '{}' rejected: {}", text, e);
                    output.report.push(BatchItemOutcome::failed(text, &e));
                }
            }
        }
        info!(
            "Define batch finished: {} succeeded, {} failed",
            output.report.succeeded, output.report.failed
        );
        output
    }
}
