use std::sync::Arc;

use anyhow::Context;
use grader::config::AppConfig;
use grader::database::init_db;
use grader::state::AppState;
use grader::store::DbStore;
use mq::{MqConfig, init_mq};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_target(false).init();

    let config = AppConfig::load().context("Failed to load config")?;

    let db = init_db(&config.database.url, config.database.max_connections)
        .await
        .context("Failed to connect to database")?;
    info!("Database connected");

    let mq = init_mq(MqConfig::from(&config.mq))
        .await
        .context("Failed to initialize MQ")?;
    info!(
        request_queue = %config.mq.request_queue_name,
        result_queue = %config.mq.result_queue_name,
        "MQ connected"
    );

    let store = Arc::new(DbStore::new(db));
    let state = AppState::new(config, store.clone(), store, Arc::new(mq));

    let cancel = CancellationToken::new();

    let consumer = {
        let consumer = state.result_consumer();
        let cancel = cancel.clone();
        tokio::spawn(async move { consumer.run(cancel).await })
    };

    let sweeper = if state.config.recovery.enabled {
        let sweeper = state.recovery_sweeper();
        let recovery = state.config.recovery.clone();
        let cancel = cancel.clone();
        Some(tokio::spawn(async move { sweeper.run(recovery, cancel).await }))
    } else {
        info!("Recovery sweeper disabled");
        None
    };

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown requested, finishing in-flight work");
    cancel.cancel();

    if let Err(e) = consumer.await {
        error!(error = %e, "Result consumer task panicked");
    }
    if let Some(sweeper) = sweeper {
        if let Err(e) = sweeper.await {
            error!(error = %e, "Recovery sweeper task panicked");
        }
    }

    info!("Grader stopped");
    Ok(())
}
