//! Storage capabilities the pipeline needs from the relational store.
//!
//! Every status change goes through a conditional update (`transition only if
//! the current status matches`), never a read-then-write sequence.

pub mod memory;
pub mod relational;
pub mod types;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use common::{DispatchToken, SubmissionStatus};

use crate::error::StoreError;

pub use memory::MemoryStore;
pub use relational::DbStore;
pub use types::*;

#[async_trait]
pub trait SubmissionStore: Send + Sync {
    async fn create_task(&self, task: NewTask) -> Result<TaskLimits, StoreError>;

    async fn task_limits(&self, task_id: i32) -> Result<Option<TaskLimits>, StoreError>;

    /// Insert a `Received` submission with the next attempt order for (user, task).
    async fn create_submission(&self, new: NewSubmission) -> Result<Submission, StoreError>;

    async fn get_submission(&self, id: i32) -> Result<Option<Submission>, StoreError>;

    async fn get_result(&self, submission_id: i32)
    -> Result<Option<SubmissionResult>, StoreError>;

    /// Take the dispatch lease if the submission is in `expected` status and no
    /// live lease exists. Increments `dispatch_attempts`.
    ///
    /// Returns `None` when another dispatch holds the lease or the status differs.
    async fn claim_for_dispatch(
        &self,
        id: i32,
        expected: SubmissionStatus,
        lease_ttl: Duration,
    ) -> Result<Option<DispatchClaim>, StoreError>;

    /// Mark a claimed submission `Dispatched`, stamp `last_dispatched_at`,
    /// bump `requests_sent` and clear the lease. `expected` is `Received` for a first dispatch and
    /// `Dispatched` for a re-dispatch.
    async fn finish_dispatch(
        &self,
        id: i32,
        expected: SubmissionStatus,
        claimed_at: DateTime<Utc>,
    ) -> Result<TransitionOutcome, StoreError>;

    /// Drop the lease without changing status.
    async fn release_claim(&self, id: i32, claimed_at: DateTime<Utc>) -> Result<(), StoreError>;

    /// Conditional `from -> to`. Terminal targets stamp `checked_at`.
    ///
    /// `Evaluated` is only reachable through [`SubmissionStore::record_evaluation`].
    async fn transition(
        &self,
        id: i32,
        from: SubmissionStatus,
        to: SubmissionStatus,
        status_message: Option<String>,
    ) -> Result<TransitionOutcome, StoreError>;

    /// `Dispatched -> Evaluated` plus the result and all of its test results,
    /// as one unit of work.
    async fn record_evaluation(
        &self,
        id: i32,
        result: NewSubmissionResult,
    ) -> Result<TransitionOutcome, StoreError>;

    /// Submissions in `status` whose last dispatch (or submission, if never
    /// dispatched) happened at or before `cutoff`, oldest first.
    async fn find_stuck(
        &self,
        status: SubmissionStatus,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Submission>, StoreError>;
}

#[async_trait]
pub trait CorrelationStore: Send + Sync {
    /// Persist `token -> submission_id`. Recording the same token twice
    /// returns the existing record.
    async fn record(
        &self,
        token: &DispatchToken,
        submission_id: i32,
    ) -> Result<CorrelationRecord, StoreError>;

    async fn resolve(&self, token: &DispatchToken)
    -> Result<Option<CorrelationRecord>, StoreError>;

    /// Stamp `resolved_at` once. Returns false if the token was unknown or
    /// already resolved.
    async fn mark_resolved(&self, token: &DispatchToken) -> Result<bool, StoreError>;

    async fn records_for(&self, submission_id: i32) -> Result<Vec<CorrelationRecord>, StoreError>;
}

/// Edge check shared by both store implementations.
pub(crate) fn check_edge(
    from: SubmissionStatus,
    to: SubmissionStatus,
) -> Option<TransitionOutcome> {
    if from.can_transition_to(to) {
        None
    } else {
        Some(TransitionOutcome::InvalidEdge { from, to })
    }
}
