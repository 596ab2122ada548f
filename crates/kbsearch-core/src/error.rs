use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// External collaborators the engine calls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    VectorStore,
    KeywordIndex,
    ChunkSource,
    ClassifierModel,
    RerankModel,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Backend::VectorStore => "vector store",
            Backend::KeywordIndex => "keyword index",
            Backend::ChunkSource => "chunk source",
            Backend::ClassifierModel => "classifier model",
            Backend::RerankModel => "rerank model",
        })
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("{backend} unavailable: {reason}")]
    BackendUnavailable { backend: Backend, reason: String },

    #[error("Query did not finish within {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Failed to parse model output: {0}")]
    Parse(String),

    #[error("Keyword index for '{collection}' is stale")]
    IndexStale { collection: String },

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    pub fn backend(backend: Backend, reason: impl fmt::Display) -> Self {
        Error::BackendUnavailable { backend, reason: reason.to_string() }
    }

    /// Stable machine-readable discriminator used in serialized errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Validation(_) => "validation",
            Error::BackendUnavailable { .. } => "backend_unavailable",
            Error::Timeout { .. } => "timeout",
            Error::Parse(_) => "parse",
            Error::IndexStale { .. } => "index_stale",
            Error::Cancelled(_) => "cancelled",
            Error::InvalidConfig(_) => "invalid_config",
            Error::Io(_) => "io",
            Error::Serialization(_) => "serialization",
        }
    }

    pub fn payload(&self) -> ErrorPayload {
        ErrorPayload { kind: self.kind().to_string(), message: self.to_string() }
    }
}

/// Serialized form of an [`Error`]: `{kind, message}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub kind: String,
    pub message: String,
}

impl From<&Error> for ErrorPayload {
    fn from(e: &Error) -> Self {
        e.payload()
    }
}

pub type Result<T> = std::result::Result<T, Error>;
