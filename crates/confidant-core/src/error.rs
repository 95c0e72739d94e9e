//! Error types shared by the conversation store and its callers.

use thiserror::Error;

/// Durable-store failure (`PersistenceFailure`).
///
/// An append that returns this error has not touched the in-memory cache.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to open conversation database: {0}")]
    Open(String),

    #[error("conversation database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("failed to encode message content: {0}")]
    Encode(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;
