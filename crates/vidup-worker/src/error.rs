//! Worker error types.
//!
//! These cover the registry and submission surface. Failures inside a running
//! pipeline never surface here: they end the job in the `error` stage.

use thiserror::Error;
use vidup_models::{JobId, ModelError};

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Job not found: {0}")]
    NotFound(JobId),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Worker is shutting down")]
    ShuttingDown,

    #[error("State error: {0}")]
    State(#[from] ModelError),

    #[error("Storage error: {0}")]
    Storage(#[from] vidup_storage::StorageError),

    #[error("Media error: {0}")]
    Media(#[from] vidup_media::MediaError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn not_found(id: &JobId) -> Self {
        Self::NotFound(id.clone())
    }

    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, WorkerError::NotFound(_))
    }
}
