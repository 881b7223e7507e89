//! Model error types.

use thiserror::Error;

use crate::job::Stage;

/// Result type for model operations.
pub type ModelResult<T> = Result<T, ModelError>;

/// Errors raised by the job state machine and request validation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModelError {
    #[error("Job is already terminal ({0})")]
    AlreadyTerminal(Stage),

    #[error("Invalid stage transition from {from} to {to}")]
    InvalidTransition { from: Stage, to: Stage },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl ModelError {
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }
}
