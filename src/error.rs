use thiserror::Error;
use uuid::Uuid;

use crate::models::message::Channel;

/// Error taxonomy for the submission path. Validation and not-found errors
/// fail the synchronous call; everything else is retryable by the caller.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("user {0} not found")]
    UserNotFound(Uuid),

    #[error("user has no {0} target on file")]
    MissingRecipient(Channel),

    #[error("template {0} not found")]
    TemplateNotFound(String),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("upstream call failed: {0}")]
    Upstream(String),
}

impl DispatchError {
    /// Whether the caller may safely resubmit. True only for failures that
    /// left no durable state behind.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DispatchError::Queue(_) | DispatchError::Storage(_) | DispatchError::Upstream(_)
        )
    }
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue {0} is at capacity")]
    CapacityExceeded(&'static str),

    #[error("broker unavailable: {0}")]
    Broker(String),

    #[error("malformed queue payload: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Status-store write/read failure. Never fatal to message processing:
/// workers log these and keep going.
#[derive(Debug, Error)]
#[error("status store: {0}")]
pub struct StorageError(pub String);

/// Delivery sink failure, tagged so the worker can skip retries for
/// clearly permanent rejections.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("transient delivery failure: {0}")]
    Transient(String),

    #[error("permanent delivery failure: {0}")]
    Permanent(String),
}

impl SinkError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, SinkError::Transient(_))
    }
}
