use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Maps one outbound grading request to the submission it grades.
///
/// Rows are retained after ingestion; `resolved_at` marks the first result applied.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "correlation_record")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub dispatch_token: String,

    #[sea_orm(indexed)]
    pub submission_id: i32,
    #[sea_orm(belongs_to, from = "submission_id", to = "id")]
    pub submission: HasOne<super::submission::Entity>,

    pub dispatched_at: DateTimeUtc,
    pub resolved_at: Option<DateTimeUtc>,
}

impl ActiveModelBehavior for ActiveModel {}
