use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// One outstanding or resolved write-through to an external list.
/// `(user_id, anime_id, provider, action)` is unique.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "library_sync_log")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub user_id: String,
    pub anime_id: String,
    pub provider: String,
    pub action: String,
    #[sea_orm(indexed)]
    pub status: String,
    /// `{status?, watched_episodes?}` as JSON text.
    #[sea_orm(column_type = "Text")]
    pub payload: String,
    pub error_message: Option<String>,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
