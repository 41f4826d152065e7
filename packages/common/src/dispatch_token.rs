use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Opaque identifier tying one outbound grading request to its inbound result.
///
/// Unique per request, not per submission: a recovered submission is dispatched
/// again under a fresh token.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DispatchToken(String);

impl DispatchToken {
    /// Generate a fresh random token.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DispatchToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for DispatchToken {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for DispatchToken {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl AsRef<str> for DispatchToken {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
