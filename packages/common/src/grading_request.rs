use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dispatch_token::DispatchToken;
use crate::mq::Message;

/// Resource limits the worker enforces while grading.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradingLimits {
    /// Time limit in milliseconds
    pub time_limit_ms: i32,
    /// Memory limit in kilobytes
    pub memory_limit_kb: i32,
}

/// A grading request sent to the worker queue.
///
/// The worker answers with exactly one result message carrying the same
/// `dispatch_token`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradingRequest {
    /// Correlates the eventual result with this request
    pub dispatch_token: DispatchToken,
    /// ID of the submission being graded
    pub submission_id: i32,
    /// ID of the submitting user
    pub user_id: i32,
    /// ID of the task
    pub task_id: i32,
    /// Attempt order of this submission for (user, task)
    pub attempt_order: i32,
    /// Programming language (e.g., "cpp", "java", "python")
    pub language: String,
    /// Where the worker fetches the source artifact from
    pub source_location: String,
    pub limits: GradingLimits,
    pub dispatched_at: DateTime<Utc>,
}

impl Message for GradingRequest {
    fn message_type() -> &'static str {
        "grading_request"
    }

    fn message_id(&self) -> &str {
        self.dispatch_token.as_str()
    }
}
