//! Engine configuration
//!
//! Values come from the environment (a `.env` file is honoured through `dotenv`)
//! or from a JSON document. Every field has a default so an empty environment
//! still yields a usable offline configuration.

use crate::error::{EngineError, Result};
use crate::knowledge_graph::ConfidenceMerge;
use crate::sql::Dialect;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub llm: LlmConfig,
    pub database_url: Option<String>,
    pub store_path: PathBuf,
    pub dialect: Dialect,
    /// Direct-generation answers below this confidence are rejected.
    pub min_generation_confidence: f64,
    pub row_limit: usize,
    pub collaborator_timeout_secs: u64,
    pub confidence_merge: ConfidenceMerge,
    pub stop_words: StopWordOverrides,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
    /// Fixed context budget of the completion service, in estimated tokens.
    pub context_budget_tokens: usize,
    pub timeout_secs: u64,
}

/// Deployment-level adjustments to the parser's stop-word list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StopWordOverrides {
    pub add: Vec<String>,
    pub remove: Vec<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            context_budget_tokens: 6_000,
            timeout_secs: 60,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            llm: LlmConfig::default(),
            database_url: None,
            store_path: PathBuf::from("recon_kg.db"),
            dialect: Dialect::DoubleQuotes,
            min_generation_confidence: 0.7,
            row_limit: 1_000,
            collaborator_timeout_secs: 30,
            confidence_merge: ConfidenceMerge::Max,
            stop_words: StopWordOverrides::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        let mut config = Self::default();

        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            if !key.trim().is_empty() {
                config.llm.api_key = Some(key);
            }
        }
        if let Ok(model) = std::env::var("OPENAI_MODEL") {
            config.llm.model = model;
        }
        if let Ok(base_url) = std::env::var("OPENAI_BASE_URL") {
            config.llm.base_url = base_url;
        }
        if let Some(budget) = env_parse::<usize>("RECON_KG_CONTEXT_BUDGET")? {
            config.llm.context_budget_tokens = budget;
        }
        if let Some(secs) = env_parse::<u64>("RECON_KG_LLM_TIMEOUT_SECS")? {
            config.llm.timeout_secs = secs;
        }
        if let Ok(url) = std::env::var("DATABASE_URL") {
            config.database_url = Some(url);
        }
        if let Ok(path) = std::env::var("RECON_KG_STORE") {
            config.store_path = PathBuf::from(path);
        }
        if let Ok(dialect) = std::env::var("RECON_KG_DIALECT") {
            config.dialect = dialect.parse()?;
        }
        if let Some(threshold) = env_parse::<f64>("RECON_KG_MIN_CONFIDENCE")? {
            config.min_generation_confidence = threshold;
        }
        if let Some(limit) = env_parse::<usize>("RECON_KG_ROW_LIMIT")? {
            config.row_limit = limit;
        }
        if let Some(secs) = env_parse::<u64>("RECON_KG_TIMEOUT_SECS")? {
            config.collaborator_timeout_secs = secs;
        }
        if let Ok(words) = std::env::var("RECON_KG_STOP_WORDS_ADD") {
            config.stop_words.add = split_list(&words);
        }
        if let Ok(words) = std::env::var("RECON_KG_STOP_WORDS_REMOVE") {
            config.stop_words.remove = split_list(&words);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        let config: EngineConfig = serde_json::from_str(&content)
            .map_err(|e| EngineError::Config(format!("Failed to parse {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.min_generation_confidence) {
            return Err(EngineError::Config(format!(
                "min_generation_confidence must be within [0, 1], got {}",
                self.min_generation_confidence
            )));
        }
        if self.row_limit == 0 {
            return Err(EngineError::Config("row_limit must be positive".to_string()));
        }
        if let ConfidenceMerge::WeightedAverage { llm_weight } = self.confidence_merge {
            if !(0.0..=1.0).contains(&llm_weight) {
                return Err(EngineError::Config(format!(
                    "llm_weight must be within [0, 1], got {}",
                    llm_weight
                )));
            }
        }
        Ok(())
    }

    pub fn collaborator_timeout(&self) -> Duration {
        Duration::from_secs(self.collaborator_timeout_secs)
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| EngineError::Config(format!("{} has an invalid value: {}", name, raw))),
        Err(_) => Ok(None),
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|w| w.trim().to_lowercase())
        .filter(|w| !w.is_empty())
        .collect()
}
