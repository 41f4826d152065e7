use common::SubmissionStatus;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "submission")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    #[sea_orm(unique_key = "user_task_attempt")]
    pub user_id: i32,
    #[sea_orm(unique_key = "user_task_attempt")]
    pub task_id: i32,
    #[sea_orm(belongs_to, from = "task_id", to = "id")]
    pub task: HasOne<super::task::Entity>,
    /// 1, 2, 3... per user per task.
    #[sea_orm(unique_key = "user_task_attempt")]
    pub attempt_order: i32,

    pub language: String,
    #[sea_orm(column_type = "Text")]
    pub source_location: String,

    #[sea_orm(indexed)]
    pub status: SubmissionStatus,
    /// Set only on Failed/Lost.
    #[sea_orm(column_type = "Text", nullable)]
    pub status_message: Option<String>,

    /// Number of dispatch claims taken so far (first dispatch included).
    pub dispatch_attempts: i32,
    /// Grading requests actually published; bumped only by a finished dispatch.
    pub requests_sent: i32,
    /// Live dispatch lease; NULL when no dispatch is in flight.
    pub dispatch_claimed_at: Option<DateTimeUtc>,
    pub last_dispatched_at: Option<DateTimeUtc>,

    #[sea_orm(has_one)]
    pub result: HasOne<super::submission_result::Entity>,

    #[sea_orm(has_many)]
    pub correlation_records: HasMany<super::correlation_record::Entity>,

    pub submitted_at: DateTimeUtc,
    /// Set by the first (and only) terminal transition.
    pub checked_at: Option<DateTimeUtc>,
}

impl ActiveModelBehavior for ActiveModel {}
