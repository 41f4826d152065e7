use std::sync::Arc;

use mq::Broker;

use crate::config::AppConfig;
use crate::consumers::ResultConsumer;
use crate::dispatcher::Dispatcher;
use crate::recovery::RecoverySweeper;
use crate::store::{CorrelationStore, SubmissionStore};

/// The wired pipeline: one dispatcher shared by the submission path and the
/// sweeper, plus the long-running consumer.
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub submissions: Arc<dyn SubmissionStore>,
    pub correlations: Arc<dyn CorrelationStore>,
    pub broker: Arc<dyn Broker>,
    pub dispatcher: Dispatcher,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        submissions: Arc<dyn SubmissionStore>,
        correlations: Arc<dyn CorrelationStore>,
        broker: Arc<dyn Broker>,
    ) -> Self {
        let dispatcher = Dispatcher::new(
            submissions.clone(),
            correlations.clone(),
            broker.clone(),
            config.mq.request_queue_name.clone(),
        )
        .with_lease_ttl(config.recovery.claim_ttl());

        Self {
            config,
            submissions,
            correlations,
            broker,
            dispatcher,
        }
    }

    pub fn result_consumer(&self) -> ResultConsumer {
        ResultConsumer::new(
            self.submissions.clone(),
            self.correlations.clone(),
            self.broker.clone(),
            self.config.mq.result_queue_name.clone(),
            &self.config.consumer,
        )
    }

    pub fn recovery_sweeper(&self) -> RecoverySweeper {
        RecoverySweeper::new(self.submissions.clone(), self.dispatcher.clone())
    }
}
