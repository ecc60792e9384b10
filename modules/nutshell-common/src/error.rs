use thiserror::Error;
use uuid::Uuid;

use crate::types::VerificationStatus;

pub type Result<T> = std::result::Result<T, NutshellError>;

#[derive(Error, Debug)]
pub enum NutshellError {
    #[error("Invalid candidate: {0}")]
    InvalidCandidate(String),

    #[error("Embedding unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("Node not found: {0}")]
    NotFound(Uuid),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Invalid verification transition: {from} -> {to}")]
    InvalidTransition {
        from: VerificationStatus,
        to: VerificationStatus,
    },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl NutshellError {
    /// Transient failures the caller may retry with the same candidate.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::EmbeddingUnavailable(_) | Self::Store(_))
    }
}
