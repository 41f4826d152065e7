use chrono::{DateTime, SubsecRound, Utc};
use common::grading_result::TestVerdict;
use common::{DispatchToken, OutcomeCode, SubmissionStatus};

use crate::entity::{correlation_record, submission, submission_result, task, test_result};

/// Current time at the precision the relational store keeps (microseconds).
///
/// Lease timestamps are compared for equality, so they must survive a round trip.
pub fn store_now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewTask {
    pub title: String,
    pub time_limit_ms: i32,
    pub memory_limit_kb: i32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TaskLimits {
    pub task_id: i32,
    pub time_limit_ms: i32,
    pub memory_limit_kb: i32,
}

impl From<task::Model> for TaskLimits {
    fn from(model: task::Model) -> Self {
        Self {
            task_id: model.id,
            time_limit_ms: model.time_limit,
            memory_limit_kb: model.memory_limit,
        }
    }
}

/// What the HTTP layer hands over when a user submits.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewSubmission {
    pub user_id: i32,
    pub task_id: i32,
    pub language: String,
    pub source_location: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Submission {
    pub id: i32,
    pub user_id: i32,
    pub task_id: i32,
    pub attempt_order: i32,
    pub language: String,
    pub source_location: String,
    pub status: SubmissionStatus,
    pub status_message: Option<String>,
    pub dispatch_attempts: i32,
    pub requests_sent: i32,
    pub dispatch_claimed_at: Option<DateTime<Utc>>,
    pub last_dispatched_at: Option<DateTime<Utc>>,
    pub submitted_at: DateTime<Utc>,
    pub checked_at: Option<DateTime<Utc>>,
}

impl Submission {
    /// Requests published after the first one. Claims whose publish
    /// failed are not counted.
    pub fn redispatch_count(&self) -> u32 {
        self.requests_sent.saturating_sub(1).max(0) as u32
    }

    /// Timestamp the recovery age threshold is measured from.
    pub fn last_activity(&self) -> DateTime<Utc> {
        self.last_dispatched_at.unwrap_or(self.submitted_at)
    }
}

impl From<submission::Model> for Submission {
    fn from(model: submission::Model) -> Self {
        Self {
            id: model.id,
            user_id: model.user_id,
            task_id: model.task_id,
            attempt_order: model.attempt_order,
            language: model.language,
            source_location: model.source_location,
            status: model.status,
            status_message: model.status_message,
            dispatch_attempts: model.dispatch_attempts,
            requests_sent: model.requests_sent,
            dispatch_claimed_at: model.dispatch_claimed_at,
            last_dispatched_at: model.last_dispatched_at,
            submitted_at: model.submitted_at,
            checked_at: model.checked_at,
        }
    }
}

/// A dispatch lease held on a submission.
///
/// `claimed_at` doubles as the fencing value: finishing or releasing the
/// claim only succeeds while the row still carries this exact timestamp.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DispatchClaim {
    pub submission: Submission,
    pub claimed_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewTestResult {
    pub test_case_id: Option<i32>,
    pub passed: bool,
    pub error_message: Option<String>,
}

impl From<TestVerdict> for NewTestResult {
    fn from(verdict: TestVerdict) -> Self {
        Self {
            test_case_id: verdict.test_case_id,
            passed: verdict.passed,
            error_message: verdict.error_message,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewSubmissionResult {
    pub outcome_code: OutcomeCode,
    pub message: String,
    pub tests: Vec<NewTestResult>,
}

impl NewSubmissionResult {
    /// Build the result row set for a graded submission.
    ///
    /// Without a worker message the summary reads like "1/2 tests passed".
    pub fn from_verdicts(message: Option<String>, tests: Vec<TestVerdict>) -> Self {
        let outcome_code = OutcomeCode::classify(&tests);
        let message = message.unwrap_or_else(|| {
            let passed = tests.iter().filter(|t| t.passed).count();
            format!("{}/{} tests passed", passed, tests.len())
        });

        Self {
            outcome_code,
            message,
            tests: tests.into_iter().map(NewTestResult::from).collect(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TestResult {
    pub id: i32,
    pub position: i32,
    pub test_case_id: Option<i32>,
    pub passed: bool,
    pub error_message: Option<String>,
}

impl From<test_result::Model> for TestResult {
    fn from(model: test_result::Model) -> Self {
        Self {
            id: model.id,
            position: model.position,
            test_case_id: model.test_case_id,
            passed: model.passed,
            error_message: model.error_message,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubmissionResult {
    pub id: i32,
    pub submission_id: i32,
    pub outcome_code: OutcomeCode,
    pub message: String,
    pub tests: Vec<TestResult>,
    pub created_at: DateTime<Utc>,
}

impl SubmissionResult {
    pub(crate) fn from_models(
        model: submission_result::Model,
        mut tests: Vec<test_result::Model>,
    ) -> Self {
        tests.sort_by_key(|t| t.position);
        Self {
            id: model.id,
            submission_id: model.submission_id,
            outcome_code: model.outcome_code,
            message: model.message,
            tests: tests.into_iter().map(TestResult::from).collect(),
            created_at: model.created_at,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CorrelationRecord {
    pub dispatch_token: DispatchToken,
    pub submission_id: i32,
    pub dispatched_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl CorrelationRecord {
    pub fn is_resolved(&self) -> bool {
        self.resolved_at.is_some()
    }
}

impl From<correlation_record::Model> for CorrelationRecord {
    fn from(model: correlation_record::Model) -> Self {
        Self {
            dispatch_token: DispatchToken::from(model.dispatch_token),
            submission_id: model.submission_id,
            dispatched_at: model.dispatched_at,
            resolved_at: model.resolved_at,
        }
    }
}

/// Result of a conditional status update. Never an error: a mismatch is
/// reported to the caller, who logs it as an inconsistency.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransitionOutcome {
    Applied,
    /// The row was not in the expected status (or no longer exists).
    Stale { current: Option<SubmissionStatus> },
    /// `from -> to` is not an edge of the lifecycle; nothing was touched.
    InvalidEdge {
        from: SubmissionStatus,
        to: SubmissionStatus,
    },
}

impl TransitionOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, TransitionOutcome::Applied)
    }
}
