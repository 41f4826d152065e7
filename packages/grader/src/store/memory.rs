use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use common::{DispatchToken, SubmissionStatus};
use tokio::sync::Mutex;

use super::types::*;
use super::{CorrelationStore, SubmissionStore, check_edge};
use crate::error::StoreError;

#[derive(Debug, Default)]
struct MemoryState {
    tasks: BTreeMap<i32, TaskLimits>,
    submissions: BTreeMap<i32, Submission>,
    /// Keyed by submission id.
    results: HashMap<i32, SubmissionResult>,
    correlations: HashMap<String, CorrelationRecord>,
    last_task_id: i32,
    last_submission_id: i32,
    last_result_id: i32,
    last_test_result_id: i32,
}

/// In-process implementation of both store capabilities.
///
/// A single lock guards all rows, so every operation is trivially atomic.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rewind a submission's clock, so age thresholds can be crossed without sleeping.
    pub async fn backdate(&self, id: i32, by: Duration) {
        let mut state = self.state.lock().await;
        if let Some(submission) = state.submissions.get_mut(&id) {
            submission.submitted_at -= by;
            if let Some(at) = submission.last_dispatched_at.as_mut() {
                *at -= by;
            }
        }
    }
}

fn lease_is_free(submission: &Submission, now: DateTime<Utc>, lease_ttl: Duration) -> bool {
    match submission.dispatch_claimed_at {
        None => true,
        Some(claimed_at) => claimed_at < now - lease_ttl,
    }
}

#[async_trait]
impl SubmissionStore for MemoryStore {
    async fn create_task(&self, task: NewTask) -> Result<TaskLimits, StoreError> {
        let mut state = self.state.lock().await;
        state.last_task_id += 1;
        let limits = TaskLimits {
            task_id: state.last_task_id,
            time_limit_ms: task.time_limit_ms,
            memory_limit_kb: task.memory_limit_kb,
        };
        state.tasks.insert(limits.task_id, limits);
        Ok(limits)
    }

    async fn task_limits(&self, task_id: i32) -> Result<Option<TaskLimits>, StoreError> {
        Ok(self.state.lock().await.tasks.get(&task_id).copied())
    }

    async fn create_submission(&self, new: NewSubmission) -> Result<Submission, StoreError> {
        let mut state = self.state.lock().await;
        if !state.tasks.contains_key(&new.task_id) {
            return Err(StoreError::TaskNotFound(new.task_id));
        }

        let previous = state
            .submissions
            .values()
            .filter(|s| s.user_id == new.user_id && s.task_id == new.task_id)
            .count() as i32;

        state.last_submission_id += 1;
        let submission = Submission {
            id: state.last_submission_id,
            user_id: new.user_id,
            task_id: new.task_id,
            attempt_order: previous + 1,
            language: new.language,
            source_location: new.source_location,
            status: SubmissionStatus::Received,
            status_message: None,
            dispatch_attempts: 0,
            requests_sent: 0,
            dispatch_claimed_at: None,
            last_dispatched_at: None,
            submitted_at: store_now(),
            checked_at: None,
        };
        state.submissions.insert(submission.id, submission.clone());
        Ok(submission)
    }

    async fn get_submission(&self, id: i32) -> Result<Option<Submission>, StoreError> {
        Ok(self.state.lock().await.submissions.get(&id).cloned())
    }

    async fn get_result(
        &self,
        submission_id: i32,
    ) -> Result<Option<SubmissionResult>, StoreError> {
        Ok(self.state.lock().await.results.get(&submission_id).cloned())
    }

    async fn claim_for_dispatch(
        &self,
        id: i32,
        expected: SubmissionStatus,
        lease_ttl: Duration,
    ) -> Result<Option<DispatchClaim>, StoreError> {
        let mut state = self.state.lock().await;
        let now = store_now();

        let Some(submission) = state.submissions.get_mut(&id) else {
            return Ok(None);
        };
        if submission.status != expected || !lease_is_free(submission, now, lease_ttl) {
            return Ok(None);
        }

        submission.dispatch_claimed_at = Some(now);
        submission.dispatch_attempts += 1;

        Ok(Some(DispatchClaim {
            submission: submission.clone(),
            claimed_at: now,
        }))
    }

    async fn finish_dispatch(
        &self,
        id: i32,
        expected: SubmissionStatus,
        claimed_at: DateTime<Utc>,
    ) -> Result<TransitionOutcome, StoreError> {
        if expected != SubmissionStatus::Dispatched {
            if let Some(invalid) = check_edge(expected, SubmissionStatus::Dispatched) {
                return Ok(invalid);
            }
        }

        let mut state = self.state.lock().await;
        let Some(submission) = state.submissions.get_mut(&id) else {
            return Ok(TransitionOutcome::Stale { current: None });
        };
        if submission.status != expected || submission.dispatch_claimed_at != Some(claimed_at) {
            return Ok(TransitionOutcome::Stale {
                current: Some(submission.status),
            });
        }

        submission.status = SubmissionStatus::Dispatched;
        submission.requests_sent += 1;
        submission.last_dispatched_at = Some(store_now());
        submission.dispatch_claimed_at = None;
        Ok(TransitionOutcome::Applied)
    }

    async fn release_claim(&self, id: i32, claimed_at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if let Some(submission) = state.submissions.get_mut(&id) {
            if submission.dispatch_claimed_at == Some(claimed_at) {
                submission.dispatch_claimed_at = None;
            }
        }
        Ok(())
    }

    async fn transition(
        &self,
        id: i32,
        from: SubmissionStatus,
        to: SubmissionStatus,
        status_message: Option<String>,
    ) -> Result<TransitionOutcome, StoreError> {
        if to == SubmissionStatus::Evaluated {
            return Ok(TransitionOutcome::InvalidEdge { from, to });
        }
        if let Some(invalid) = check_edge(from, to) {
            return Ok(invalid);
        }

        let mut state = self.state.lock().await;
        let Some(submission) = state.submissions.get_mut(&id) else {
            return Ok(TransitionOutcome::Stale { current: None });
        };
        if submission.status != from {
            return Ok(TransitionOutcome::Stale {
                current: Some(submission.status),
            });
        }

        submission.status = to;
        if to.is_terminal() {
            submission.status_message = status_message;
            submission.checked_at = Some(store_now());
        }
        Ok(TransitionOutcome::Applied)
    }

    async fn record_evaluation(
        &self,
        id: i32,
        result: NewSubmissionResult,
    ) -> Result<TransitionOutcome, StoreError> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        let Some(submission) = state.submissions.get_mut(&id) else {
            return Ok(TransitionOutcome::Stale { current: None });
        };
        if submission.status != SubmissionStatus::Dispatched {
            return Ok(TransitionOutcome::Stale {
                current: Some(submission.status),
            });
        }

        let now = store_now();
        submission.status = SubmissionStatus::Evaluated;
        submission.checked_at = Some(now);

        state.last_result_id += 1;
        let result_id = state.last_result_id;

        let mut tests = Vec::with_capacity(result.tests.len());
        for (index, test) in result.tests.into_iter().enumerate() {
            state.last_test_result_id += 1;
            tests.push(TestResult {
                id: state.last_test_result_id,
                position: index as i32 + 1,
                test_case_id: test.test_case_id,
                passed: test.passed,
                error_message: test.error_message,
            });
        }

        state.results.insert(
            id,
            SubmissionResult {
                id: result_id,
                submission_id: id,
                outcome_code: result.outcome_code,
                message: result.message,
                tests,
                created_at: now,
            },
        );

        Ok(TransitionOutcome::Applied)
    }

    async fn find_stuck(
        &self,
        status: SubmissionStatus,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Submission>, StoreError> {
        Ok(self
            .state
            .lock()
            .await
            .submissions
            .values()
            .filter(|s| s.status == status && s.last_activity() <= cutoff)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl CorrelationStore for MemoryStore {
    async fn record(
        &self,
        token: &DispatchToken,
        submission_id: i32,
    ) -> Result<CorrelationRecord, StoreError> {
        let mut state = self.state.lock().await;
        if !state.submissions.contains_key(&submission_id) {
            return Err(StoreError::SubmissionNotFound(submission_id));
        }

        let record = state
            .correlations
            .entry(token.as_str().to_string())
            .or_insert_with(|| CorrelationRecord {
                dispatch_token: token.clone(),
                submission_id,
                dispatched_at: store_now(),
                resolved_at: None,
            });
        Ok(record.clone())
    }

    async fn resolve(
        &self,
        token: &DispatchToken,
    ) -> Result<Option<CorrelationRecord>, StoreError> {
        Ok(self
            .state
            .lock()
            .await
            .correlations
            .get(token.as_str())
            .cloned())
    }

    async fn mark_resolved(&self, token: &DispatchToken) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        match state.correlations.get_mut(token.as_str()) {
            Some(record) if record.resolved_at.is_none() => {
                record.resolved_at = Some(store_now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn records_for(&self, submission_id: i32) -> Result<Vec<CorrelationRecord>, StoreError> {
        let mut records: Vec<_> = self
            .state
            .lock()
            .await
            .correlations
            .values()
            .filter(|r| r.submission_id == submission_id)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.dispatched_at);
        Ok(records)
    }
}
