#[cfg(feature = "sea-orm")]
use sea_orm::prelude::StringLen;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Status of a submission during the grading lifecycle.
///
/// Statuses only move forward:
///
/// ```text
/// Received -> Dispatched -> Evaluated | Failed | Lost
/// ```
///
/// When the `sea-orm` feature is enabled, this enum can be used directly in SeaORM entities.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(
    feature = "sea-orm",
    derive(sea_orm::DeriveActiveEnum, sea_orm::EnumIter),
    sea_orm(rs_type = "String", db_type = "String(StringLen::None)")
)]
#[serde(rename_all = "PascalCase")]
pub enum SubmissionStatus {
    /// Stored, not yet handed to the broker.
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "Received"))]
    Received,
    /// Grading request published, waiting for a result.
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "Dispatched"))]
    Dispatched,
    /// Result and test results recorded.
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "Evaluated"))]
    Evaluated,
    /// The worker reported that grading itself failed.
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "Failed"))]
    Failed,
    /// Recovery gave up waiting for a result.
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "Lost"))]
    Lost,
}

impl SubmissionStatus {
    /// Returns true if no further transition is permitted.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Evaluated | Self::Failed | Self::Lost)
    }

    /// Returns true if `self -> next` is an edge of the lifecycle.
    pub fn can_transition_to(&self, next: SubmissionStatus) -> bool {
        matches!(
            (self, next),
            (Self::Received, Self::Dispatched)
                | (Self::Dispatched, Self::Evaluated)
                | (Self::Dispatched, Self::Failed)
                | (Self::Dispatched, Self::Lost)
        )
    }

    /// All possible status values.
    pub const ALL: &'static [SubmissionStatus] = &[
        Self::Received,
        Self::Dispatched,
        Self::Evaluated,
        Self::Failed,
        Self::Lost,
    ];

    /// All terminal statuses.
    pub const TERMINAL: &'static [SubmissionStatus] = &[Self::Evaluated, Self::Failed, Self::Lost];

    /// Returns the string representation (PascalCase).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "Received",
            Self::Dispatched => "Dispatched",
            Self::Evaluated => "Evaluated",
            Self::Failed => "Failed",
            Self::Lost => "Lost",
        }
    }
}

impl fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Default for SubmissionStatus {
    fn default() -> Self {
        Self::Received
    }
}

/// Error when parsing an invalid status string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseStatusError {
    invalid: String,
}

impl fmt::Display for ParseStatusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Invalid status '{}'. Valid values: {}",
            self.invalid,
            SubmissionStatus::ALL
                .iter()
                .map(|s| s.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        )
    }
}

impl std::error::Error for ParseStatusError {}

impl FromStr for SubmissionStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Received" => Ok(Self::Received),
            "Dispatched" => Ok(Self::Dispatched),
            "Evaluated" => Ok(Self::Evaluated),
            "Failed" => Ok(Self::Failed),
            "Lost" => Ok(Self::Lost),
            _ => Err(ParseStatusError {
                invalid: s.to_string(),
            }),
        }
    }
}
