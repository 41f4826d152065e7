#[cfg(feature = "sea-orm")]
use sea_orm::prelude::StringLen;

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::dispatch_token::DispatchToken;
use crate::mq::Message;

/// Result message as published by the worker.
///
/// This is the raw wire shape; call [`GradingResultMessage::decode`] (or
/// [`GradingResult::from_json`]) to get the closed form the consumer works with.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct GradingResultMessage {
    #[serde(alias = "token")]
    pub dispatch_token: String,
    /// 1 = success, 2 = worker failure, 3 = internal error.
    pub status_code: i32,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default, alias = "tests")]
    pub per_test_results: Vec<TestResultMessage>,
}

/// Result for a single test case execution.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TestResultMessage {
    #[serde(default)]
    pub test_case_id: Option<i32>,
    pub passed: bool,
    #[serde(default)]
    pub error: Option<String>,
}

impl Message for GradingResultMessage {
    fn message_type() -> &'static str {
        "grading_result"
    }

    fn message_id(&self) -> &str {
        &self.dispatch_token
    }
}

/// Coarse status carried by a result message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResultStatus {
    Success,
    WorkerFailure,
    InternalError,
}

impl ResultStatus {
    pub const SUCCESS_CODE: i32 = 1;
    pub const WORKER_FAILURE_CODE: i32 = 2;
    pub const INTERNAL_ERROR_CODE: i32 = 3;
}

impl TryFrom<i32> for ResultStatus {
    type Error = DecodeError;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        match code {
            Self::SUCCESS_CODE => Ok(Self::Success),
            Self::WORKER_FAILURE_CODE => Ok(Self::WorkerFailure),
            Self::INTERNAL_ERROR_CODE => Ok(Self::InternalError),
            other => Err(DecodeError::UnknownStatusCode(other)),
        }
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Malformed result payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unknown status code {0}")]
    UnknownStatusCode(i32),

    #[error("Result message has an empty dispatch token")]
    MissingToken,
}

/// Verdict of one test case, as recorded for a submission.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TestVerdict {
    pub test_case_id: Option<i32>,
    pub passed: bool,
    pub error_message: Option<String>,
}

/// What the worker reported, decoded once at the boundary.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GradingOutcome {
    /// Grading ran; per-test verdicts in evaluation order.
    Graded {
        message: Option<String>,
        tests: Vec<TestVerdict>,
    },
    /// Grading itself failed on the worker (e.g. the source did not build).
    WorkerFailure { message: String },
    /// The worker hit an internal error.
    InternalError { message: String },
}

/// A decoded result message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GradingResult {
    pub token: DispatchToken,
    pub outcome: GradingOutcome,
}

impl GradingResult {
    /// Decode a raw broker payload.
    pub fn from_json(payload: serde_json::Value) -> Result<Self, DecodeError> {
        let message: GradingResultMessage = serde_json::from_value(payload)?;
        message.decode()
    }
}

impl GradingResultMessage {
    pub fn decode(self) -> Result<GradingResult, DecodeError> {
        if self.dispatch_token.trim().is_empty() {
            return Err(DecodeError::MissingToken);
        }

        let status = ResultStatus::try_from(self.status_code)?;
        let outcome = match status {
            ResultStatus::Success => GradingOutcome::Graded {
                message: self.message,
                tests: self
                    .per_test_results
                    .into_iter()
                    .map(|t| TestVerdict {
                        test_case_id: t.test_case_id,
                        passed: t.passed,
                        error_message: t.error,
                    })
                    .collect(),
            },
            ResultStatus::WorkerFailure => GradingOutcome::WorkerFailure {
                message: self
                    .message
                    .unwrap_or_else(|| "Grading failed on the worker".to_string()),
            },
            ResultStatus::InternalError => GradingOutcome::InternalError {
                message: self
                    .message
                    .unwrap_or_else(|| "Internal grading error".to_string()),
            },
        };

        Ok(GradingResult {
            token: DispatchToken::from(self.dispatch_token),
            outcome,
        })
    }
}

/// Coarse classification of an evaluated submission.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(
    feature = "sea-orm",
    derive(sea_orm::DeriveActiveEnum, sea_orm::EnumIter),
    sea_orm(rs_type = "String", db_type = "String(StringLen::None)")
)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeCode {
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "all_passed"))]
    AllPassed,
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "partial"))]
    Partial,
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "none_passed"))]
    NonePassed,
}

impl OutcomeCode {
    /// Classify a set of test verdicts. An empty set counts as nothing passed.
    pub fn classify(tests: &[TestVerdict]) -> Self {
        let passed = tests.iter().filter(|t| t.passed).count();
        if passed == 0 {
            Self::NonePassed
        } else if passed == tests.len() {
            Self::AllPassed
        } else {
            Self::Partial
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AllPassed => "all_passed",
            Self::Partial => "partial",
            Self::NonePassed => "none_passed",
        }
    }
}

impl fmt::Display for OutcomeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
