use thiserror::Error;

#[derive(Debug, Error)]
pub enum MqError {
    #[error("Broker unavailable: {0}")]
    Unavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Internal(String),
}

impl MqError {
    /// Whether retrying the same operation later can succeed.
    pub fn is_transient(&self) -> bool {
        !matches!(self, MqError::Serialization(_))
    }
}

impl From<broccoli_queue::error::BroccoliError> for MqError {
    fn from(e: broccoli_queue::error::BroccoliError) -> Self {
        MqError::Internal(e.to_string())
    }
}
