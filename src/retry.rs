//! Timeout + single-retry wrapper for collaborator calls.

use crate::error::{EngineError, ExecutionErrorKind, Result};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Copy)]
pub struct CallPolicy {
    pub timeout: Duration,
    /// Retries after the first attempt. Collaborator calls never use more than one.
    pub retries: u8,
}

impl CallPolicy {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout, retries: 1 }
    }

    pub fn without_retry(timeout: Duration) -> Self {
        Self { timeout, retries: 0 }
    }
}

/// Runs `op` under the policy's timeout. Transient failures (timeouts and
/// connection errors) are retried once; anything else returns immediately.
pub async fn call_with_retry<T, F, Fut>(label: &str, policy: CallPolicy, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let retries = policy.retries.min(1);
    let mut attempt = 0u8;
    loop {
        let outcome = match tokio::time::timeout(policy.timeout, op()).await {
            Ok(result) => result,
            Err(_) => Err(EngineError::execution(
                ExecutionErrorKind::Timeout,
                format!("{} timed out after {:?}", label, policy.timeout),
            )),
        };

        match outcome {
            Err(err) if err.is_transient() && attempt < retries => {
                attempt += 1;
                warn!("{} failed transiently ({}), retrying once", label, err);
            }
            other => return other,
        }
    }
}
