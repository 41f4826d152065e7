use common::config::MqAppConfig;

/// Connection settings for the Redis-backed broker.
#[derive(Debug, Clone)]
pub struct MqConfig {
    pub url: String,
    pub pool_size: u8,
    pub max_delivery_attempts: u8,
}

impl From<&MqAppConfig> for MqConfig {
    fn from(config: &MqAppConfig) -> Self {
        Self {
            url: config.url.clone(),
            pool_size: config.pool_size,
            max_delivery_attempts: config.max_delivery_attempts,
        }
    }
}
