//! Completion service contract and the OpenAI-compatible client.
//!
//! Every completion is structured: the caller names the JSON shape it expects and a
//! response that does not match is a hard failure, never repaired or re-parsed.

use crate::config::LlmConfig;
use crate::error::{EngineError, ExecutionErrorKind, Result};
use crate::retry::{call_with_retry, CallPolicy};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};

/// Expected top-level shape of a JSON completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseShape {
    pub name: String,
    pub required_fields: Vec<String>,
    /// Example object embedded in the prompt.
    pub example: Value,
}

impl ResponseShape {
    pub fn new(name: &str, required_fields: &[&str], example: Value) -> Self {
        Self {
            name: name.to_string(),
            required_fields: required_fields.iter().map(|f| f.to_string()).collect(),
            example,
        }
    }

    pub fn check(&self, value: &Value) -> Result<()> {
        let object = value.as_object().ok_or_else(|| {
            EngineError::Llm(format!("{} response is not a JSON object", self.name))
        })?;
        for field in &self.required_fields {
            if !object.contains_key(field) {
                return Err(EngineError::Llm(format!(
                    "{} response is missing field '{}'",
                    self.name, field
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub system: String,
    pub prompt: String,
    pub response_shape: ResponseShape,
}

impl CompletionRequest {
    /// Full text that will be sent, used for the budget estimate.
    pub fn rendered(&self) -> String {
        format!(
            "{}\n\n{}\n\nReturn JSON in this exact format:\n{}\n\nOnly return the JSON, no other text.",
            self.system, self.prompt, self.response_shape.example
        )
    }
}

#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete_json(&self, request: &CompletionRequest) -> Result<Value>;

    /// Maximum estimated prompt size this service accepts.
    fn context_budget_tokens(&self) -> usize;
}

/// Rough token estimate: one token per four characters.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// Budget check, timeout with one retry, then shape validation.
pub async fn complete_structured(
    service: &dyn CompletionService,
    request: &CompletionRequest,
    policy: CallPolicy,
) -> Result<Value> {
    let estimated = estimate_tokens(&request.rendered());
    let budget = service.context_budget_tokens();
    if estimated > budget {
        return Err(EngineError::ContextBudget(format!(
            "{} prompt needs ~{} tokens, budget is {}",
            request.response_shape.name, estimated, budget
        )));
    }
    let value = call_with_retry(&request.response_shape.name, policy, || {
        service.complete_json(request)
    })
    .await?;
    request.response_shape.check(&value)?;
    Ok(value)
}

pub struct LlmClient {
    api_key: String,
    model: String,
    base_url: String,
    context_budget_tokens: usize,
    http: reqwest::Client,
}

impl LlmClient {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| EngineError::Config("OPENAI_API_KEY is not set".to_string()))?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| EngineError::Config(format!("Failed to build HTTP client: {}", e)))?;
        info!("LLM client configured for model {} at {}", config.model, config.base_url);
        Ok(Self {
            api_key,
            model: config.model.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            context_budget_tokens: config.context_budget_tokens,
            http,
        })
    }

    async fn call_llm(&self, request: &CompletionRequest) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": format!("{} You are a precise JSON-only responder. Always return valid JSON, no other text.", request.system)},
                {"role": "user", "content": format!(
                    "{}\n\nReturn JSON in this exact format:\n{}\n\nOnly return the JSON, no other text.",
                    request.prompt, request.response_shape.example
                )}
            ],
            "temperature": 0.0,
            "response_format": {"type": "json_object"}
        });

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(EngineError::execution(
                ExecutionErrorKind::Connection,
                format!("LLM API returned {}", status),
            ));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(EngineError::Llm(format!("LLM API returned {}: {}", status, text)));
        }

        let response_json: Value = response
            .json()
            .await
            .map_err(|e| EngineError::Llm(format!("Failed to parse LLM response: {}", e)))?;

        let content = response_json["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| EngineError::Llm("No content in LLM response".to_string()))?;

        Ok(content.to_string())
    }
}

fn map_transport_error(e: reqwest::Error) -> EngineError {
    if e.is_timeout() {
        EngineError::execution(ExecutionErrorKind::Timeout, format!("LLM API call timed out: {}", e))
    } else if e.is_connect() || e.is_request() {
        EngineError::execution(ExecutionErrorKind::Connection, format!("LLM API call failed: {}", e))
    } else {
        EngineError::Llm(format!("LLM API call failed: {}", e))
    }
}

#[async_trait]
impl CompletionService for LlmClient {
    async fn complete_json(&self, request: &CompletionRequest) -> Result<Value> {
        debug!("Sending {} completion", request.response_shape.name);
        let content = self.call_llm(request).await?;
        let value: Value = serde_json::from_str(content.trim()).map_err(|e| {
            EngineError::Llm(format!(
                "{} response is not valid JSON: {}",
                request.response_shape.name, e
            ))
        })?;
        Ok(value)
    }

    fn context_budget_tokens(&self) -> usize {
        self.context_budget_tokens
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::ScriptedCompletion;
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn request(prompt: &str) -> CompletionRequest {
        CompletionRequest {
            system: "You classify.".into(),
            prompt: prompt.into(),
            response_shape: ResponseShape::new(
                "classification",
                &["classification"],
                json!({"classification": "FILTER_QUERY"}),
            ),
        }
    }

    fn policy() -> CallPolicy {
        CallPolicy::new(Duration::from_secs(1))
    }

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[tokio::test]
    async fn test_over_budget_is_not_sent() {
        let mut service = ScriptedCompletion::new(vec![Ok(json!({"classification": "X"}))]);
        service.budget = 10;
        let err = complete_structured(&service, &request(&"x".repeat(400)), policy())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "CONTEXT_BUDGET_ERROR");
        assert_eq!(service.calls(), 0);
    }

    #[tokio::test]
    async fn test_shape_violation_is_hard_failure() {
        let service = ScriptedCompletion::new(vec![Ok(json!({"label": "FILTER_QUERY"}))]);
        let err = complete_structured(&service, &request("show rows"), policy())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("missing field 'classification'"));
        assert_eq!(service.calls(), 1);
    }

    #[tokio::test]
    async fn test_transient_failure_retried_once() {
        let service = ScriptedCompletion::new(vec![
            Err(EngineError::execution(ExecutionErrorKind::Connection, "reset")),
            Ok(json!({"classification": "FILTER_QUERY"})),
        ]);
        let value = complete_structured(&service, &request("show rows"), policy()).await.unwrap();
        assert_eq!(value["classification"], "FILTER_QUERY");
        assert_eq!(service.calls(), 2);
    }

    /// Minimal chat-completions endpoint that answers every request with `content`.
    async fn serve_chat(content: &'static str) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        tokio::spawn(async move {
            loop {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut buf = Vec::new();
                let mut chunk = [0u8; 4096];
                loop {
                    let n = socket.read(&mut chunk).await.unwrap();
                    if n == 0 {
                        break;
                    }
                    buf.extend_from_slice(&chunk[..n]);
                    let text = String::from_utf8_lossy(&buf).to_string();
                    if let Some(end) = text.find("\r\n\r\n") {
                        let length = text[..end]
                            .lines()
                            .find_map(|l| {
                                let lower = l.to_ascii_lowercase();
                                lower
                                    .strip_prefix("content-length:")
                                    .map(|v| v.trim().parse::<usize>().unwrap_or(0))
                            })
                            .unwrap_or(0);
                        if buf.len() >= end + 4 + length {
                            break;
                        }
                    }
                }
                counter.fetch_add(1, Ordering::SeqCst);
                let body = json!({"choices": [{"message": {"content": content}}]}).to_string();
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                socket.write_all(response.as_bytes()).await.unwrap();
                socket.shutdown().await.ok();
            }
        });
        (format!("http://{}", addr), hits)
    }

    #[tokio::test]
    async fn test_identical_requests_each_reach_the_service() {
        let (base_url, hits) = serve_chat(r#"{"classification": "FILTER_QUERY"}"#).await;
        let client = LlmClient::new(&LlmConfig {
            api_key: Some("test-key".into()),
            base_url,
            timeout_secs: 5,
            ..LlmConfig::default()
        })
        .unwrap();

        let req = request("show active products");
        let first = client.complete_json(&req).await.unwrap();
        let second = client.complete_json(&req).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first["classification"], "FILTER_QUERY");
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_client_requires_api_key() {
        let config = LlmConfig {
            api_key: None,
            ..LlmConfig::default()
        };
        assert_eq!(LlmClient::new(&config).err().unwrap().code(), "CONFIG_ERROR");
    }
}
