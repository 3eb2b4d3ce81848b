//! Error taxonomy shared by the engine, the service facade and both front-ends.
//!
//! Every failure is a [`KnowledgeError`]; front-ends render it as an
//! [`ErrorBody`] so callers always get a kind plus a human-readable message.

use serde::Serialize;

pub type Result<T, E = KnowledgeError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum KnowledgeError {
    /// Malformed or missing required input. Raised before any side effect.
    #[error("validation failed: {}", .fields.join("; "))]
    Validation { fields: Vec<String> },

    /// The embedding provider failed, timed out, or returned a bad vector.
    #[error("embedding unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Out-of-range or unknown argument (bad `k`, unknown kind).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The operation requires an identified caller.
    #[error("authentication required: {0}")]
    Unauthenticated(String),

    #[error("insufficient tier: required {required}, caller has {actual}")]
    Forbidden { required: u32, actual: u32 },

    /// Store unreachable, timed out, or a constraint was violated.
    #[error("storage error: {0}")]
    Storage(String),
}

impl KnowledgeError {
    /// Build a validation error from a single field message.
    pub fn invalid_field(message: impl Into<String>) -> Self {
        Self::Validation {
            fields: vec![message.into()],
        }
    }

    /// Stable machine-readable kind, used in [`ErrorBody`] and audit outcomes.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation_error",
            Self::EmbeddingUnavailable(_) => "embedding_unavailable",
            Self::NotFound(_) => "not_found",
            Self::InvalidArgument(_) => "invalid_argument",
            Self::Unauthenticated(_) => "unauthenticated",
            Self::Forbidden { .. } => "forbidden",
            Self::Storage(_) => "storage_error",
        }
    }

    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            error: self.kind(),
            message: self.to_string(),
        }
    }
}

impl From<rusqlite::Error> for KnowledgeError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for KnowledgeError {
    fn from(e: serde_json::Error) -> Self {
        Self::Storage(format!("serialization failed: {e}"))
    }
}

/// Structured error object returned to callers of either front-end.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
}
