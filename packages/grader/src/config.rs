use common::config::MqAppConfig;
use common::retry::Backoff;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    20
}

/// Result consumer tuning.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ConsumerConfig {
    /// Extra lookups of an unknown token (or of a submission not yet marked
    /// dispatched) before giving up on a delivery.
    pub lookup_retries: u8,
    pub lookup_base_delay_ms: u64,
    pub lookup_max_delay_ms: u64,
    /// Backoff after the broker fails to hand out a delivery.
    pub receive_retry_base_ms: u64,
    pub receive_retry_max_ms: u64,
    /// Delay before a failed delivery is rejected, grown with the delivery's
    /// attempt count so `mq.max_delivery_attempts` spans a store outage.
    pub redelivery_base_delay_ms: u64,
    pub redelivery_max_delay_ms: u64,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            lookup_retries: 3,
            lookup_base_delay_ms: 200,
            lookup_max_delay_ms: 2000,
            receive_retry_base_ms: 500,
            receive_retry_max_ms: 30_000,
            redelivery_base_delay_ms: 1000,
            redelivery_max_delay_ms: 60_000,
        }
    }
}

impl ConsumerConfig {
    pub fn lookup_backoff(&self) -> Backoff {
        Backoff::new(self.lookup_base_delay_ms, self.lookup_max_delay_ms)
    }

    pub fn receive_backoff(&self) -> Backoff {
        Backoff::new(self.receive_retry_base_ms, self.receive_retry_max_ms)
    }

    pub fn redelivery_backoff(&self) -> Backoff {
        Backoff::new(self.redelivery_base_delay_ms, self.redelivery_max_delay_ms)
    }
}

/// Recovery sweeper schedule and limits.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct RecoveryConfig {
    pub enabled: bool,
    pub scan_interval_secs: u64,
    /// Age (since last dispatch, or submission) after which a submission counts as stuck.
    pub age_threshold_secs: u64,
    /// Re-dispatches allowed before a submission is marked Lost.
    pub max_attempts: u32,
    /// Lifetime of a dispatch lease.
    pub claim_ttl_secs: u64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            scan_interval_secs: 60,
            age_threshold_secs: 600,
            max_attempts: 2,
            claim_ttl_secs: 30,
        }
    }
}

impl RecoveryConfig {
    pub fn age_threshold(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.age_threshold_secs as i64)
    }

    pub fn claim_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.claim_ttl_secs as i64)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub mq: MqAppConfig,
    #[serde(default)]
    pub consumer: ConsumerConfig,
    #[serde(default)]
    pub recovery: RecoveryConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let path =
            std::env::var("GRADER_CONFIG").unwrap_or_else(|_| "config/config".to_string());
        Self::load_from(&path)
    }

    pub fn load_from(path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .set_default("database.max_connections", 20)?
            // Load from config/config.toml
            .add_source(File::with_name(path).required(false))
            // Override from environment (e.g., GRADER__DATABASE__URL)
            .add_source(Environment::with_prefix("GRADER").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}
