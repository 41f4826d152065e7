use std::sync::Arc;

use chrono::Duration;
use common::grading_request::{GradingLimits, GradingRequest};
use common::{DispatchToken, SubmissionStatus};
use mq::{Broker, BrokerExt};
use tracing::{error, info, instrument, warn};

use crate::error::DispatchError;
use crate::store::{CorrelationStore, DispatchClaim, SubmissionStore, TransitionOutcome};

/// How long a dispatch lease stays exclusive if its holder never finishes.
pub const DEFAULT_LEASE_TTL_SECS: i64 = 30;

/// Turns submissions into grading requests on the request queue.
///
/// Cheap to clone; every clone shares the same stores and broker handle.
#[derive(Clone)]
pub struct Dispatcher {
    submissions: Arc<dyn SubmissionStore>,
    correlations: Arc<dyn CorrelationStore>,
    broker: Arc<dyn Broker>,
    request_queue: String,
    lease_ttl: Duration,
}

impl Dispatcher {
    pub fn new(
        submissions: Arc<dyn SubmissionStore>,
        correlations: Arc<dyn CorrelationStore>,
        broker: Arc<dyn Broker>,
        request_queue: impl Into<String>,
    ) -> Self {
        Self {
            submissions,
            correlations,
            broker,
            request_queue: request_queue.into(),
            lease_ttl: Duration::seconds(DEFAULT_LEASE_TTL_SECS),
        }
    }

    pub fn with_lease_ttl(mut self, lease_ttl: Duration) -> Self {
        self.lease_ttl = lease_ttl;
        self
    }

    /// Send a `Received` submission to the graders.
    ///
    /// On a transport failure the submission stays `Received` and the error is
    /// retryable; the recovery sweep will try again.
    #[instrument(skip(self), fields(submission_id = id))]
    pub async fn dispatch(&self, id: i32) -> Result<DispatchToken, DispatchError> {
        self.dispatch_from(id, SubmissionStatus::Received).await
    }

    /// Send a fresh request for a submission that is already `Dispatched`.
    ///
    /// The status does not change; a new token is issued and the dispatch
    /// clock restarts. Results for older tokens still resolve.
    #[instrument(skip(self), fields(submission_id = id))]
    pub async fn redispatch(&self, id: i32) -> Result<DispatchToken, DispatchError> {
        self.dispatch_from(id, SubmissionStatus::Dispatched).await
    }

    async fn dispatch_from(
        &self,
        id: i32,
        expected: SubmissionStatus,
    ) -> Result<DispatchToken, DispatchError> {
        let Some(claim) = self
            .submissions
            .claim_for_dispatch(id, expected, self.lease_ttl)
            .await?
        else {
            return Err(self.explain_missed_claim(id, expected).await?);
        };

        let token = match self.publish_claimed(&claim).await {
            Ok(token) => token,
            Err(e) => {
                if let Err(release_err) = self
                    .submissions
                    .release_claim(id, claim.claimed_at)
                    .await
                {
                    error!(
                        error = %release_err,
                        "Failed to release dispatch lease; it will expire on its own"
                    );
                }
                return Err(e);
            }
        };

        match self
            .submissions
            .finish_dispatch(id, expected, claim.claimed_at)
            .await?
        {
            TransitionOutcome::Applied => {
                info!(
                    dispatch_token = %token,
                    attempt = claim.submission.dispatch_attempts,
                    "Submission dispatched"
                );
            }
            outcome => {
                // The request is already on the queue; the worker's answer is still
                // matched through the correlation record.
                warn!(
                    dispatch_token = %token,
                    ?outcome,
                    "Submission changed while dispatching, status left as is"
                );
            }
        }

        Ok(token)
    }

    async fn publish_claimed(&self, claim: &DispatchClaim) -> Result<DispatchToken, DispatchError> {
        let submission = &claim.submission;

        let limits = self
            .submissions
            .task_limits(submission.task_id)
            .await?
            .ok_or(DispatchError::TaskNotFound(submission.task_id))?;

        let token = DispatchToken::generate();
        let record = self.correlations.record(&token, submission.id).await?;

        let request = GradingRequest {
            dispatch_token: token.clone(),
            submission_id: submission.id,
            user_id: submission.user_id,
            task_id: submission.task_id,
            attempt_order: submission.attempt_order,
            language: submission.language.clone(),
            source_location: submission.source_location.clone(),
            limits: GradingLimits {
                time_limit_ms: limits.time_limit_ms,
                memory_limit_kb: limits.memory_limit_kb,
            },
            dispatched_at: record.dispatched_at,
        };

        // Keep the record: the broker may have taken the request before erroring.
        if let Err(e) = self.broker.publish(&self.request_queue, &request).await {
            warn!(dispatch_token = %token, error = %e, "Failed to publish grading request");
            return Err(e.into());
        }

        Ok(token)
    }

    async fn explain_missed_claim(
        &self,
        id: i32,
        expected: SubmissionStatus,
    ) -> Result<DispatchError, DispatchError> {
        let err = match self.submissions.get_submission(id).await? {
            None => DispatchError::SubmissionNotFound(id),
            Some(s) if s.status != expected => DispatchError::NotDispatchable {
                id,
                status: s.status,
                expected,
            },
            Some(_) => DispatchError::AlreadyClaimed(id),
        };
        Ok(err)
    }
}
