use serde::Deserialize;

/// Broker configuration shared by every process that talks to the grading queues.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct MqAppConfig {
    /// Redis connection URL. Default: "redis://localhost:6379".
    #[serde(default = "default_mq_url")]
    pub url: String,
    /// Connection pool size. Default: 5.
    #[serde(default = "default_mq_pool_size")]
    pub pool_size: u8,
    /// Queue for grading requests (grader publishes, worker consumes). Default: "grading_requests".
    #[serde(default = "default_mq_request_queue_name")]
    pub request_queue_name: String,
    /// Queue for grading results (worker publishes, grader consumes). Default: "grading_results".
    #[serde(default = "default_mq_result_queue_name")]
    pub result_queue_name: String,
    /// Deliveries of one message before the broker parks it in `<queue>_failed`.
    /// Default: 50.
    #[serde(default = "default_mq_max_delivery_attempts")]
    pub max_delivery_attempts: u8,
}

fn default_mq_url() -> String {
    "redis://localhost:6379".into()
}
fn default_mq_pool_size() -> u8 {
    5
}
fn default_mq_request_queue_name() -> String {
    "grading_requests".into()
}
fn default_mq_result_queue_name() -> String {
    "grading_results".into()
}
fn default_mq_max_delivery_attempts() -> u8 {
    50
}

impl Default for MqAppConfig {
    fn default() -> Self {
        Self {
            url: default_mq_url(),
            pool_size: default_mq_pool_size(),
            request_queue_name: default_mq_request_queue_name(),
            result_queue_name: default_mq_result_queue_name(),
            max_delivery_attempts: default_mq_max_delivery_attempts(),
        }
    }
}
