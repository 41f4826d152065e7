use std::sync::Arc;
use std::time::Duration;

use common::SubmissionStatus;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::RecoveryConfig;
use crate::dispatcher::Dispatcher;
use crate::error::{DispatchError, StoreError};
use crate::store::{Submission, SubmissionStore, TransitionOutcome, store_now};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecoveryAction {
    /// A `Received` submission whose first dispatch never went out.
    Dispatched,
    Redispatched,
    MarkedLost,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Recovered {
    pub submission_id: i32,
    pub action: RecoveryAction,
}

/// Periodic scan for submissions stuck before a result arrived.
pub struct RecoverySweeper {
    submissions: Arc<dyn SubmissionStore>,
    dispatcher: Dispatcher,
}

impl RecoverySweeper {
    pub fn new(submissions: Arc<dyn SubmissionStore>, dispatcher: Dispatcher) -> Self {
        Self {
            submissions,
            dispatcher,
        }
    }

    /// Sweep every `scan_interval_secs` until `cancel` fires.
    pub async fn run(&self, config: RecoveryConfig, cancel: CancellationToken) {
        let scan_interval = Duration::from_secs(config.scan_interval_secs.max(1));

        info!(
            age_threshold_secs = config.age_threshold_secs,
            scan_interval_secs = config.scan_interval_secs,
            max_attempts = config.max_attempts,
            "Starting recovery sweeper"
        );

        let mut interval = tokio::time::interval(scan_interval);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }

            match self
                .sweep(config.age_threshold(), config.max_attempts)
                .await
            {
                Ok(recovered) if !recovered.is_empty() => {
                    info!(count = recovered.len(), "Recovery sweep finished");
                }
                Ok(_) => {}
                Err(e) => error!(error = %e, "Recovery sweep failed"),
            }
        }

        info!("Recovery sweeper stopped");
    }

    /// One pass over stuck submissions.
    ///
    /// Stuck `Received` submissions are dispatched. Stuck `Dispatched` ones are
    /// re-dispatched up to `max_attempts` times, then marked `Lost`. A result
    /// that lands first always wins: every change is conditional on the status
    /// the scan saw.
    pub async fn sweep(
        &self,
        age_threshold: chrono::Duration,
        max_attempts: u32,
    ) -> Result<Vec<Recovered>, StoreError> {
        let cutoff = store_now() - age_threshold;
        let mut recovered = Vec::new();

        // Both scans run before anything is dispatched, so a submission sent
        // by this pass is not also re-dispatched by it.
        let never_sent = self
            .submissions
            .find_stuck(SubmissionStatus::Received, cutoff)
            .await?;
        let unanswered = self
            .submissions
            .find_stuck(SubmissionStatus::Dispatched, cutoff)
            .await?;

        if !never_sent.is_empty() {
            info!(count = never_sent.len(), "Found undispatched submissions");
        }
        for submission in never_sent {
            if self.retry_dispatch(submission.id, false).await {
                recovered.push(Recovered {
                    submission_id: submission.id,
                    action: RecoveryAction::Dispatched,
                });
            }
        }

        if !unanswered.is_empty() {
            info!(count = unanswered.len(), "Found submissions without a result");
        }
        for submission in unanswered {
            if submission.redispatch_count() < max_attempts {
                if self.retry_dispatch(submission.id, true).await {
                    recovered.push(Recovered {
                        submission_id: submission.id,
                        action: RecoveryAction::Redispatched,
                    });
                }
                continue;
            }

            match self.mark_lost(&submission).await {
                Ok(true) => recovered.push(Recovered {
                    submission_id: submission.id,
                    action: RecoveryAction::MarkedLost,
                }),
                Ok(false) => {}
                Err(e) => error!(
                    submission_id = submission.id,
                    error = %e,
                    "Failed to mark submission lost"
                ),
            }
        }

        Ok(recovered)
    }

    async fn retry_dispatch(&self, id: i32, redispatch: bool) -> bool {
        let result = if redispatch {
            self.dispatcher.redispatch(id).await
        } else {
            self.dispatcher.dispatch(id).await
        };

        match result {
            Ok(_) => true,
            Err(e @ (DispatchError::AlreadyClaimed(_) | DispatchError::NotDispatchable { .. })) => {
                debug!(submission_id = id, reason = %e, "Submission moved on, skipping");
                false
            }
            Err(e) => {
                warn!(submission_id = id, error = %e, "Recovery dispatch failed");
                false
            }
        }
    }

    async fn mark_lost(&self, submission: &Submission) -> Result<bool, StoreError> {
        let message = format!(
            "No grading result after {} dispatch attempt(s)",
            submission.requests_sent
        );

        match self
            .submissions
            .transition(
                submission.id,
                SubmissionStatus::Dispatched,
                SubmissionStatus::Lost,
                Some(message),
            )
            .await?
        {
            TransitionOutcome::Applied => {
                warn!(
                    submission_id = submission.id,
                    requests_sent = submission.requests_sent,
                    "Submission marked lost"
                );
                Ok(true)
            }
            outcome => {
                debug!(
                    submission_id = submission.id,
                    ?outcome,
                    "Submission changed during sweep, leaving it"
                );
                Ok(false)
            }
        }
    }
}
