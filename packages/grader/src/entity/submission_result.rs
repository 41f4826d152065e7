use common::OutcomeCode;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "submission_result")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    pub outcome_code: OutcomeCode,
    #[sea_orm(column_type = "Text")]
    pub message: String,

    #[sea_orm(unique)]
    pub submission_id: i32,
    #[sea_orm(belongs_to, from = "submission_id", to = "id")]
    pub submission: HasOne<super::submission::Entity>,

    #[sea_orm(has_many)]
    pub test_results: HasMany<super::test_result::Entity>,

    pub created_at: DateTimeUtc,
}

impl ActiveModelBehavior for ActiveModel {}
