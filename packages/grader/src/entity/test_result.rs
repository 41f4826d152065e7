use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "test_result")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    #[sea_orm(unique_key = "result_position")]
    pub submission_result_id: i32,
    #[sea_orm(belongs_to, from = "submission_result_id", to = "id")]
    pub submission_result: HasOne<super::submission_result::Entity>,
    /// 1-based evaluation order within the result.
    #[sea_orm(unique_key = "result_position")]
    pub position: i32,

    /// Worker-side test case reference, when the worker reports one.
    pub test_case_id: Option<i32>,
    pub passed: bool,
    #[sea_orm(column_type = "Text", nullable)]
    pub error_message: Option<String>,

    pub created_at: DateTimeUtc,
}

impl ActiveModelBehavior for ActiveModel {}
