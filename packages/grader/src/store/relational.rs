use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use common::{DispatchToken, SubmissionStatus};
use sea_orm::sea_query::{Expr, ExprTrait};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, DatabaseConnection, DbErr,
    EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set, SqlErr, TransactionTrait,
};
use tracing::{debug, warn};

use super::types::*;
use super::{CorrelationStore, SubmissionStore, check_edge};
use crate::entity::{correlation_record, submission, submission_result, task, test_result};
use crate::error::StoreError;

/// Concurrent submitters for the same (user, task) race on `attempt_order`;
/// the loser retries with a fresh count.
const CREATE_SUBMISSION_ATTEMPTS: usize = 3;

/// Both store capabilities backed by the relational database.
#[derive(Clone, Debug)]
pub struct DbStore {
    db: DatabaseConnection,
}

impl DbStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    async fn current_status<C: ConnectionTrait>(
        conn: &C,
        id: i32,
    ) -> Result<Option<SubmissionStatus>, DbErr> {
        Ok(submission::Entity::find_by_id(id)
            .one(conn)
            .await?
            .map(|s| s.status))
    }

    async fn stale<C: ConnectionTrait>(conn: &C, id: i32) -> Result<TransitionOutcome, DbErr> {
        Ok(TransitionOutcome::Stale {
            current: Self::current_status(conn, id).await?,
        })
    }

    async fn insert_submission(&self, new: &NewSubmission) -> Result<submission::Model, DbErr> {
        let txn = self.db.begin().await?;

        let previous = submission::Entity::find()
            .filter(submission::Column::UserId.eq(new.user_id))
            .filter(submission::Column::TaskId.eq(new.task_id))
            .count(&txn)
            .await?;

        let model = submission::ActiveModel {
            user_id: Set(new.user_id),
            task_id: Set(new.task_id),
            attempt_order: Set(previous as i32 + 1),
            language: Set(new.language.clone()),
            source_location: Set(new.source_location.clone()),
            status: Set(SubmissionStatus::Received),
            status_message: Set(None),
            dispatch_attempts: Set(0),
            requests_sent: Set(0),
            dispatch_claimed_at: Set(None),
            last_dispatched_at: Set(None),
            submitted_at: Set(store_now()),
            checked_at: Set(None),
            ..Default::default()
        };
        let inserted = model.insert(&txn).await?;

        txn.commit().await?;
        Ok(inserted)
    }
}

fn is_unique_violation(e: &DbErr) -> bool {
    matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}

#[async_trait]
impl SubmissionStore for DbStore {
    async fn create_task(&self, new: NewTask) -> Result<TaskLimits, StoreError> {
        let model = task::ActiveModel {
            title: Set(new.title),
            time_limit: Set(new.time_limit_ms),
            memory_limit: Set(new.memory_limit_kb),
            created_at: Set(Utc::now()),
            ..Default::default()
        };
        Ok(model.insert(&self.db).await?.into())
    }

    async fn task_limits(&self, task_id: i32) -> Result<Option<TaskLimits>, StoreError> {
        Ok(task::Entity::find_by_id(task_id)
            .one(&self.db)
            .await?
            .map(TaskLimits::from))
    }

    async fn create_submission(&self, new: NewSubmission) -> Result<Submission, StoreError> {
        if task::Entity::find_by_id(new.task_id)
            .one(&self.db)
            .await?
            .is_none()
        {
            return Err(StoreError::TaskNotFound(new.task_id));
        }

        let mut attempt = 1;
        loop {
            match self.insert_submission(&new).await {
                Ok(model) => return Ok(model.into()),
                Err(e) if is_unique_violation(&e) && attempt < CREATE_SUBMISSION_ATTEMPTS => {
                    debug!(
                        user_id = new.user_id,
                        task_id = new.task_id,
                        attempt,
                        "Attempt order taken concurrently, retrying"
                    );
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn get_submission(&self, id: i32) -> Result<Option<Submission>, StoreError> {
        Ok(submission::Entity::find_by_id(id)
            .one(&self.db)
            .await?
            .map(Submission::from))
    }

    async fn get_result(
        &self,
        submission_id: i32,
    ) -> Result<Option<SubmissionResult>, StoreError> {
        let Some(result) = submission_result::Entity::find()
            .filter(submission_result::Column::SubmissionId.eq(submission_id))
            .one(&self.db)
            .await?
        else {
            return Ok(None);
        };

        let tests = test_result::Entity::find()
            .filter(test_result::Column::SubmissionResultId.eq(result.id))
            .order_by_asc(test_result::Column::Position)
            .all(&self.db)
            .await?;

        Ok(Some(SubmissionResult::from_models(result, tests)))
    }

    async fn claim_for_dispatch(
        &self,
        id: i32,
        expected: SubmissionStatus,
        lease_ttl: Duration,
    ) -> Result<Option<DispatchClaim>, StoreError> {
        let now = store_now();

        let update = submission::Entity::update_many()
            .col_expr(submission::Column::DispatchClaimedAt, Expr::value(now))
            .col_expr(
                submission::Column::DispatchAttempts,
                Expr::col(submission::Column::DispatchAttempts).add(1),
            )
            .filter(submission::Column::Id.eq(id))
            .filter(submission::Column::Status.eq(expected))
            .filter(
                Condition::any()
                    .add(submission::Column::DispatchClaimedAt.is_null())
                    .add(submission::Column::DispatchClaimedAt.lt(now - lease_ttl)),
            )
            .exec(&self.db)
            .await?;

        if update.rows_affected == 0 {
            return Ok(None);
        }

        let model = submission::Entity::find_by_id(id)
            .one(&self.db)
            .await?
            .ok_or(StoreError::SubmissionNotFound(id))?;

        Ok(Some(DispatchClaim {
            submission: model.into(),
            claimed_at: now,
        }))
    }

    async fn finish_dispatch(
        &self,
        id: i32,
        expected: SubmissionStatus,
        claimed_at: DateTime<Utc>,
    ) -> Result<TransitionOutcome, StoreError> {
        if expected != SubmissionStatus::Dispatched {
            if let Some(invalid) = check_edge(expected, SubmissionStatus::Dispatched) {
                return Ok(invalid);
            }
        }

        let update = submission::Entity::update_many()
            .col_expr(
                submission::Column::Status,
                Expr::value(SubmissionStatus::Dispatched),
            )
            .col_expr(
                submission::Column::RequestsSent,
                Expr::col(submission::Column::RequestsSent).add(1),
            )
            .col_expr(submission::Column::LastDispatchedAt, Expr::value(store_now()))
            .col_expr(
                submission::Column::DispatchClaimedAt,
                Expr::value(Option::<DateTime<Utc>>::None),
            )
            .filter(submission::Column::Id.eq(id))
            .filter(submission::Column::Status.eq(expected))
            .filter(submission::Column::DispatchClaimedAt.eq(claimed_at))
            .exec(&self.db)
            .await?;

        if update.rows_affected > 0 {
            Ok(TransitionOutcome::Applied)
        } else {
            Ok(Self::stale(&self.db, id).await?)
        }
    }

    async fn release_claim(&self, id: i32, claimed_at: DateTime<Utc>) -> Result<(), StoreError> {
        let update = submission::Entity::update_many()
            .col_expr(
                submission::Column::DispatchClaimedAt,
                Expr::value(Option::<DateTime<Utc>>::None),
            )
            .filter(submission::Column::Id.eq(id))
            .filter(submission::Column::DispatchClaimedAt.eq(claimed_at))
            .exec(&self.db)
            .await?;

        if update.rows_affected == 0 {
            debug!(submission_id = id, "Dispatch lease already gone on release");
        }
        Ok(())
    }

    async fn transition(
        &self,
        id: i32,
        from: SubmissionStatus,
        to: SubmissionStatus,
        status_message: Option<String>,
    ) -> Result<TransitionOutcome, StoreError> {
        if to == SubmissionStatus::Evaluated {
            return Ok(TransitionOutcome::InvalidEdge { from, to });
        }
        if let Some(invalid) = check_edge(from, to) {
            return Ok(invalid);
        }

        let mut update = submission::Entity::update_many()
            .col_expr(submission::Column::Status, Expr::value(to))
            .filter(submission::Column::Id.eq(id))
            .filter(submission::Column::Status.eq(from));

        if to.is_terminal() {
            update = update
                .col_expr(submission::Column::StatusMessage, Expr::value(status_message))
                .col_expr(submission::Column::CheckedAt, Expr::value(store_now()));
        }

        let result = update.exec(&self.db).await?;
        if result.rows_affected > 0 {
            Ok(TransitionOutcome::Applied)
        } else {
            Ok(Self::stale(&self.db, id).await?)
        }
    }

    async fn record_evaluation(
        &self,
        id: i32,
        result: NewSubmissionResult,
    ) -> Result<TransitionOutcome, StoreError> {
        let txn = self.db.begin().await?;
        let now = store_now();

        let update = submission::Entity::update_many()
            .col_expr(
                submission::Column::Status,
                Expr::value(SubmissionStatus::Evaluated),
            )
            .col_expr(submission::Column::CheckedAt, Expr::value(now))
            .filter(submission::Column::Id.eq(id))
            .filter(submission::Column::Status.eq(SubmissionStatus::Dispatched))
            .exec(&txn)
            .await?;

        if update.rows_affected == 0 {
            let outcome = Self::stale(&txn, id).await?;
            txn.rollback().await?;
            return Ok(outcome);
        }

        let result_model = submission_result::ActiveModel {
            outcome_code: Set(result.outcome_code),
            message: Set(result.message),
            submission_id: Set(id),
            created_at: Set(now),
            ..Default::default()
        }
        .insert(&txn)
        .await?;

        for (index, test) in result.tests.into_iter().enumerate() {
            let model = test_result::ActiveModel {
                submission_result_id: Set(result_model.id),
                position: Set(index as i32 + 1),
                test_case_id: Set(test.test_case_id),
                passed: Set(test.passed),
                error_message: Set(test.error_message),
                created_at: Set(now),
                ..Default::default()
            };
            model.insert(&txn).await?;
        }

        txn.commit().await?;
        Ok(TransitionOutcome::Applied)
    }

    async fn find_stuck(
        &self,
        status: SubmissionStatus,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Submission>, StoreError> {
        let stuck = submission::Entity::find()
            .filter(submission::Column::Status.eq(status))
            .filter(
                Condition::any()
                    .add(submission::Column::LastDispatchedAt.lte(cutoff))
                    .add(
                        Condition::all()
                            .add(submission::Column::LastDispatchedAt.is_null())
                            .add(submission::Column::SubmittedAt.lte(cutoff)),
                    ),
            )
            .order_by_asc(submission::Column::Id)
            .all(&self.db)
            .await?;

        Ok(stuck.into_iter().map(Submission::from).collect())
    }
}

#[async_trait]
impl CorrelationStore for DbStore {
    async fn record(
        &self,
        token: &DispatchToken,
        submission_id: i32,
    ) -> Result<CorrelationRecord, StoreError> {
        if submission::Entity::find_by_id(submission_id)
            .one(&self.db)
            .await?
            .is_none()
        {
            return Err(StoreError::SubmissionNotFound(submission_id));
        }

        let model = correlation_record::ActiveModel {
            dispatch_token: Set(token.as_str().to_string()),
            submission_id: Set(submission_id),
            dispatched_at: Set(store_now()),
            resolved_at: Set(None),
            ..Default::default()
        };

        match model.insert(&self.db).await {
            Ok(inserted) => Ok(inserted.into()),
            Err(e) if is_unique_violation(&e) => {
                let existing = correlation_record::Entity::find_by_id(token.as_str())
                    .one(&self.db)
                    .await?
                    .ok_or_else(|| {
                        DbErr::Custom(
                            "UniqueConstraintViolation but existing row not found".to_string(),
                        )
                    })?;

                if existing.submission_id != submission_id {
                    warn!(
                        token = %token,
                        submission_id,
                        existing_submission_id = existing.submission_id,
                        "Dispatch token already mapped to another submission"
                    );
                }
                Ok(existing.into())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn resolve(
        &self,
        token: &DispatchToken,
    ) -> Result<Option<CorrelationRecord>, StoreError> {
        Ok(correlation_record::Entity::find_by_id(token.as_str())
            .one(&self.db)
            .await?
            .map(CorrelationRecord::from))
    }

    async fn mark_resolved(&self, token: &DispatchToken) -> Result<bool, StoreError> {
        let update = correlation_record::Entity::update_many()
            .col_expr(correlation_record::Column::ResolvedAt, Expr::value(store_now()))
            .filter(correlation_record::Column::DispatchToken.eq(token.as_str()))
            .filter(correlation_record::Column::ResolvedAt.is_null())
            .exec(&self.db)
            .await?;

        Ok(update.rows_affected > 0)
    }

    async fn records_for(&self, submission_id: i32) -> Result<Vec<CorrelationRecord>, StoreError> {
        let records = correlation_record::Entity::find()
            .filter(correlation_record::Column::SubmissionId.eq(submission_id))
            .order_by_asc(correlation_record::Column::DispatchedAt)
            .all(&self.db)
            .await?;

        Ok(records.into_iter().map(CorrelationRecord::from).collect())
    }
}
