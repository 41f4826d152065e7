pub mod broker;
pub mod config;
pub mod error;
pub mod memory;
pub mod models;

pub use broker::{Broker, BrokerExt, Delivery};
pub use config::MqConfig;
pub use error::MqError;
pub use memory::InMemoryBroker;
pub use models::{MqQueue, init_mq};
