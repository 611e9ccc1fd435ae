use thiserror::Error;

use crate::ledger::LedgerError;
use crate::queue::QueueError;
use crate::storage::StorageError;

/// Errors surfaced by lifecycle operations and jobs
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("post not found: {0}")]
    NotFound(String),

    #[error("principal '{principal}' does not own post {post_id}")]
    Forbidden { post_id: String, principal: String },

    #[error("object storage unavailable: {0}")]
    StorageUnavailable(#[from] StorageError),

    #[error("post store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl From<LedgerError> for LifecycleError {
    fn from(value: LedgerError) -> Self {
        match value {
            LedgerError::PostNotFound(id) => LifecycleError::NotFound(id),
            other => LifecycleError::StoreUnavailable(other.to_string()),
        }
    }
}

impl From<QueueError> for LifecycleError {
    fn from(value: QueueError) -> Self {
        LifecycleError::StoreUnavailable(format!("deletion queue: {value}"))
    }
}

pub type Result<T> = std::result::Result<T, LifecycleError>;
