use common::SubmissionStatus;
use mq::MqError;
use sea_orm::DbErr;
use thiserror::Error;

/// Failure of the storage collaborator.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Db(#[from] DbErr),

    #[error("Task {0} not found")]
    TaskNotFound(i32),

    #[error("Submission {0} not found")]
    SubmissionNotFound(i32),
}

/// Why a dispatch did not happen.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Submission {0} not found")]
    SubmissionNotFound(i32),

    #[error("Task {0} not found")]
    TaskNotFound(i32),

    #[error("Submission {id} is {status}, expected {expected}")]
    NotDispatchable {
        id: i32,
        status: SubmissionStatus,
        expected: SubmissionStatus,
    },

    #[error("Submission {0} is already being dispatched")]
    AlreadyClaimed(i32),

    #[error("Failed to publish grading request: {0}")]
    Transport(#[from] MqError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl DispatchError {
    /// Whether the submission was left `Received` for a later attempt to pick up.
    pub fn is_retryable(&self) -> bool {
        match self {
            DispatchError::Transport(e) => e.is_transient(),
            DispatchError::Store(_) => true,
            _ => false,
        }
    }
}

/// Failure while applying a decoded result. Both variants settle the delivery
/// with a reject so the broker redelivers it.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Submission {0} has not been marked dispatched yet")]
    NotYetDispatched(i32),
}
