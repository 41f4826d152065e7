use std::sync::Arc;

use common::SubmissionStatus;
use common::grading_result::{GradingOutcome, GradingResult};
use common::retry::Backoff;
use mq::{Broker, Delivery};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::ConsumerConfig;
use crate::error::IngestError;
use crate::store::{
    CorrelationRecord, CorrelationStore, NewSubmissionResult, SubmissionStore, TransitionOutcome,
};

/// What became of one inbound result message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Result and test results written, submission `Evaluated`.
    Evaluated,
    /// Worker-side failure recorded, submission `Failed`.
    Failed,
    /// The submission was already terminal; nothing changed.
    Duplicate,
    /// No correlation record for the token.
    UnknownToken,
    /// The store refused the transition for a reason other than a duplicate.
    Inconsistent,
    /// The payload could not be decoded.
    Malformed,
}

impl IngestOutcome {
    pub fn changed_state(&self) -> bool {
        matches!(self, IngestOutcome::Evaluated | IngestOutcome::Failed)
    }
}

/// Applies grading results from the result queue to the submission store.
pub struct ResultConsumer {
    submissions: Arc<dyn SubmissionStore>,
    correlations: Arc<dyn CorrelationStore>,
    broker: Arc<dyn Broker>,
    queue: String,
    lookup_retries: u8,
    lookup_backoff: Backoff,
    receive_backoff: Backoff,
    redelivery_backoff: Backoff,
}

impl ResultConsumer {
    pub fn new(
        submissions: Arc<dyn SubmissionStore>,
        correlations: Arc<dyn CorrelationStore>,
        broker: Arc<dyn Broker>,
        queue: impl Into<String>,
        config: &ConsumerConfig,
    ) -> Self {
        Self {
            submissions,
            correlations,
            broker,
            queue: queue.into(),
            lookup_retries: config.lookup_retries,
            lookup_backoff: config.lookup_backoff(),
            receive_backoff: config.receive_backoff(),
            redelivery_backoff: config.redelivery_backoff(),
        }
    }

    /// Pull and apply results one at a time until `cancel` fires.
    ///
    /// A delivery already taken is applied and settled before the loop checks
    /// again. Cancellation cuts short only the waits: for the next delivery,
    /// and before rejecting a failed one.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(queue = %self.queue, "Starting grading result consumer");

        let mut receive_failures: u8 = 0;
        loop {
            let received = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                received = self.broker.receive(&self.queue) => received,
            };

            match received {
                Ok(delivery) => {
                    receive_failures = 0;
                    let _ = self.settle(delivery, &cancel).await;
                }
                Err(e) => {
                    receive_failures = receive_failures.saturating_add(1);
                    error!(
                        queue = %self.queue,
                        error = %e,
                        failures = receive_failures,
                        "Failed to receive grading result"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = self.receive_backoff.wait(receive_failures) => {}
                    }
                }
            }
        }

        info!(queue = %self.queue, "Grading result consumer stopped");
    }

    /// Apply one delivery, then settle it.
    ///
    /// The delivery is acknowledged only after the store write has returned.
    /// Store failures and results that arrived ahead of their dispatch are
    /// rejected so the broker hands them out again, after a delay that grows
    /// with the delivery's attempt count.
    pub async fn handle_delivery(&self, delivery: Delivery) -> Result<IngestOutcome, IngestError> {
        self.settle(delivery, &CancellationToken::new()).await
    }

    async fn settle(
        &self,
        delivery: Delivery,
        cancel: &CancellationToken,
    ) -> Result<IngestOutcome, IngestError> {
        let message_id = delivery.message_id.clone();
        let result = self.ingest(delivery.payload.clone()).await;

        let settled = match &result {
            Ok(outcome) => {
                debug!(message_id = %message_id, ?outcome, "Acknowledging grading result");
                self.broker.ack(&self.queue, delivery).await
            }
            Err(e) => {
                let attempt = delivery.attempts.saturating_add(1);
                warn!(
                    message_id = %message_id,
                    error = %e,
                    attempt,
                    "Rejecting grading result for redelivery"
                );
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = self.redelivery_backoff.wait(attempt) => {}
                }
                self.broker.reject(&self.queue, delivery).await
            }
        };

        if let Err(e) = settled {
            error!(message_id = %message_id, error = %e, "Failed to settle delivery");
        }

        result
    }

    /// Decode a raw payload and apply it.
    ///
    /// Malformed payloads and unknown tokens are logged and reported as
    /// outcomes, never as errors.
    pub async fn ingest(&self, payload: serde_json::Value) -> Result<IngestOutcome, IngestError> {
        let result = match GradingResult::from_json(payload) {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "Dropping malformed grading result");
                return Ok(IngestOutcome::Malformed);
            }
        };

        self.apply_result(result).await
    }

    #[instrument(skip_all, fields(dispatch_token = %result.token))]
    async fn apply_result(&self, result: GradingResult) -> Result<IngestOutcome, IngestError> {
        let Some(record) = self.lookup(&result).await? else {
            warn!("Unknown dispatch token, dropping grading result");
            return Ok(IngestOutcome::UnknownToken);
        };

        let mut attempt = 0;
        let outcome = loop {
            match self.apply_to(&record, &result.outcome).await {
                Err(IngestError::NotYetDispatched(id)) if attempt < self.lookup_retries => {
                    attempt += 1;
                    debug!(submission_id = id, attempt, "Result arrived ahead of dispatch");
                    self.lookup_backoff.wait(attempt).await;
                }
                other => break other?,
            }
        };

        if outcome.changed_state() {
            match self.correlations.mark_resolved(&result.token).await {
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Failed to mark correlation record resolved"),
            }
        }

        Ok(outcome)
    }

    /// Resolve the token, retrying while the dispatch side may still be writing it.
    async fn lookup(&self, result: &GradingResult) -> Result<Option<CorrelationRecord>, IngestError> {
        let mut attempt = 0;
        loop {
            if let Some(record) = self.correlations.resolve(&result.token).await? {
                return Ok(Some(record));
            }
            if attempt >= self.lookup_retries {
                return Ok(None);
            }
            attempt += 1;
            debug!(attempt, "Dispatch token not found yet, retrying lookup");
            self.lookup_backoff.wait(attempt).await;
        }
    }

    async fn apply_to(
        &self,
        record: &CorrelationRecord,
        outcome: &GradingOutcome,
    ) -> Result<IngestOutcome, IngestError> {
        let id = record.submission_id;

        let (transition, applied) = match outcome {
            GradingOutcome::Graded { message, tests } => {
                let result = NewSubmissionResult::from_verdicts(message.clone(), tests.clone());
                let code = result.outcome_code;
                let transition = self.submissions.record_evaluation(id, result).await?;
                if transition.is_applied() {
                    info!(
                        submission_id = id,
                        outcome_code = %code,
                        tests = tests.len(),
                        "Submission evaluated"
                    );
                }
                (transition, IngestOutcome::Evaluated)
            }
            GradingOutcome::WorkerFailure { message } | GradingOutcome::InternalError { message } => {
                let transition = self
                    .submissions
                    .transition(
                        id,
                        SubmissionStatus::Dispatched,
                        SubmissionStatus::Failed,
                        Some(message.clone()),
                    )
                    .await?;
                if transition.is_applied() {
                    info!(submission_id = id, message = %message, "Submission failed on worker");
                }
                (transition, IngestOutcome::Failed)
            }
        };

        match transition {
            TransitionOutcome::Applied => Ok(applied),
            TransitionOutcome::Stale {
                current: Some(status),
            } if status.is_terminal() => {
                info!(
                    submission_id = id,
                    %status,
                    "Submission already terminal, discarding duplicate result"
                );
                Ok(IngestOutcome::Duplicate)
            }
            TransitionOutcome::Stale {
                current: Some(SubmissionStatus::Received),
            } => Err(IngestError::NotYetDispatched(id)),
            other => {
                warn!(submission_id = id, outcome = ?other, "Inconsistent grading result");
                Ok(IngestOutcome::Inconsistent)
            }
        }
    }
}
