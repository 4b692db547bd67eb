use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClassificationErrorKind {
    NoTableResolved,
    AmbiguousJoinTarget,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GenerationErrorKind {
    SqlGenerationFailed,
    ValidationFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionErrorKind {
    Connection,
    Timeout,
    Dialect,
}

impl fmt::Display for ClassificationErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoTableResolved => write!(f, "NO_TABLE_RESOLVED"),
            Self::AmbiguousJoinTarget => write!(f, "AMBIGUOUS_JOIN_TARGET"),
        }
    }
}

impl fmt::Display for GenerationErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SqlGenerationFailed => write!(f, "SQL_GENERATION_FAILED"),
            Self::ValidationFailed => write!(f, "VALIDATION_FAILED"),
        }
    }
}

impl fmt::Display for ExecutionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection => write!(f, "CONNECTION_FAILURE"),
            Self::Timeout => write!(f, "TIMEOUT"),
            Self::Dialect => write!(f, "DIALECT_ERROR"),
        }
    }
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Classification error [{kind}]: {message}")]
    Classification {
        kind: ClassificationErrorKind,
        message: String,
    },

    #[error("Generation error [{kind}]: {message}")]
    Generation {
        kind: GenerationErrorKind,
        message: String,
    },

    #[error("Execution error [{kind}]: {message}")]
    Execution {
        kind: ExecutionErrorKind,
        message: String,
    },

    #[error("Context budget exceeded: {0}")]
    ContextBudget(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Invalid field preference: {0}")]
    InvalidPreference(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl EngineError {
    pub fn no_table_resolved(message: impl Into<String>) -> Self {
        Self::Classification {
            kind: ClassificationErrorKind::NoTableResolved,
            message: message.into(),
        }
    }

    pub fn ambiguous_join_target(message: impl Into<String>) -> Self {
        Self::Classification {
            kind: ClassificationErrorKind::AmbiguousJoinTarget,
            message: message.into(),
        }
    }

    pub fn generation_failed(message: impl Into<String>) -> Self {
        Self::Generation {
            kind: GenerationErrorKind::SqlGenerationFailed,
            message: message.into(),
        }
    }

    pub fn validation_failed(message: impl Into<String>) -> Self {
        Self::Generation {
            kind: GenerationErrorKind::ValidationFailed,
            message: message.into(),
        }
    }

    pub fn execution(kind: ExecutionErrorKind, message: impl Into<String>) -> Self {
        Self::Execution {
            kind,
            message: message.into(),
        }
    }

    /// Stable machine-readable code, surfaced per definition in batch reports.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Classification { kind, .. } => match kind {
                ClassificationErrorKind::NoTableResolved => "NO_TABLE_RESOLVED",
                ClassificationErrorKind::AmbiguousJoinTarget => "AMBIGUOUS_JOIN_TARGET",
            },
            Self::Generation { kind, .. } => match kind {
                GenerationErrorKind::SqlGenerationFailed => "SQL_GENERATION_FAILED",
                GenerationErrorKind::ValidationFailed => "VALIDATION_FAILED",
            },
            Self::Execution { kind, .. } => match kind {
                ExecutionErrorKind::Connection => "CONNECTION_FAILURE",
                ExecutionErrorKind::Timeout => "TIMEOUT",
                ExecutionErrorKind::Dialect => "DIALECT_ERROR",
            },
            Self::ContextBudget(_) => "CONTEXT_BUDGET_ERROR",
            Self::Llm(_) => "LLM_ERROR",
            Self::InvalidPreference(_) => "INVALID_PREFERENCE",
            Self::Persistence(_) => "PERSISTENCE_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Io(_) => "IO_ERROR",
            Self::Json(_) => "JSON_ERROR",
        }
    }

    /// Transient failures get one retry before the next fallback takes over.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Execution {
                kind: ExecutionErrorKind::Connection | ExecutionErrorKind::Timeout,
                ..
            }
        )
    }
}

impl From<rusqlite::Error> for EngineError {
    fn from(err: rusqlite::Error) -> Self {
        EngineError::Persistence(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
