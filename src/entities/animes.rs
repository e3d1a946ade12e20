use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "animes")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    /// Natural key on the scrape source, e.g. `naruto-677`.
    #[sea_orm(unique)]
    pub hi_anime_id: String,

    pub ename: String,
    pub jname: String,
    pub image_url: String,

    /// Comma-joined genre names.
    pub genre: String,

    pub season: String,
    pub season_year: i32,

    #[sea_orm(indexed)]
    pub mal_id: Option<i32>,
    #[sea_orm(indexed)]
    pub anilist_id: Option<i32>,

    pub last_episode: i32,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// MAL id when known; stored zeros count as unknown.
    #[must_use]
    pub fn known_mal_id(&self) -> Option<i32> {
        self.mal_id.filter(|id| *id > 0)
    }

    #[must_use]
    pub fn genres(&self) -> Vec<&str> {
        self.genre
            .split(',')
            .map(str::trim)
            .filter(|g| !g.is_empty())
            .collect()
    }
}
