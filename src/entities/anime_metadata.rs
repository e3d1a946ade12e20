use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "anime_metadata")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub mal_id: i32,
    #[sea_orm(column_type = "Text")]
    pub description: String,
    pub main_picture_url: String,
    pub media_type: String,
    pub rating: String,
    pub airing_status: String,
    pub avg_episode_duration: i32,
    pub total_episodes: i32,
    pub studio: String,
    pub rank: i32,
    pub mean: f64,
    pub scoring_users: i32,
    pub popularity: i32,
    pub airing_start_date: String,
    pub airing_end_date: String,
    pub source: String,
    pub season_year: i32,
    pub season: String,
    pub trailer_embed_url: Option<String>,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// True while the row is younger than `ttl`.
    #[must_use]
    pub fn is_fresh(&self, now: DateTimeUtc, ttl: chrono::Duration) -> bool {
        now.signed_duration_since(self.updated_at) < ttl
    }
}
