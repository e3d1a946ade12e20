use crate::domain::LibraryStatus;
use crate::entities::library;
use crate::error::{CoreError, CoreResult};
use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    Set,
};

pub struct LibraryRepository {
    conn: DatabaseConnection,
}

impl LibraryRepository {
    #[must_use]
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    pub async fn get(&self, user_id: &str, anime_id: &str) -> CoreResult<Option<library::Model>> {
        Ok(library::Entity::find()
            .filter(library::Column::UserId.eq(user_id))
            .filter(library::Column::AnimeId.eq(anime_id))
            .one(&self.conn)
            .await?)
    }

    pub async fn is_in_library(&self, user_id: &str, anime_id: &str) -> CoreResult<bool> {
        let count = library::Entity::find()
            .filter(library::Column::UserId.eq(user_id))
            .filter(library::Column::AnimeId.eq(anime_id))
            .count(&self.conn)
            .await?;
        Ok(count > 0)
    }

    pub async fn insert(
        &self,
        user_id: &str,
        anime_id: &str,
        status: LibraryStatus,
        watched_episodes: i32,
        at: DateTime<Utc>,
    ) -> CoreResult<library::Model> {
        let model = library::ActiveModel {
            user_id: Set(user_id.to_string()),
            anime_id: Set(anime_id.to_string()),
            status: Set(status.to_string()),
            watched_episodes: Set(watched_episodes.max(0)),
            created_at: Set(at),
            updated_at: Set(at),
            ..Default::default()
        };
        Ok(model.insert(&self.conn).await?)
    }

    pub async fn update(
        &self,
        user_id: &str,
        anime_id: &str,
        status: LibraryStatus,
        watched_episodes: i32,
        at: DateTime<Utc>,
    ) -> CoreResult<library::Model> {
        let existing = self
            .get(user_id, anime_id)
            .await?
            .ok_or(CoreError::not_found("library entry"))?;

        let mut model: library::ActiveModel = existing.into();
        model.status = Set(status.to_string());
        model.watched_episodes = Set(watched_episodes.max(0));
        model.updated_at = Set(at);
        Ok(model.update(&self.conn).await?)
    }

    pub async fn delete(&self, user_id: &str, anime_id: &str) -> CoreResult<bool> {
        let result = library::Entity::delete_many()
            .filter(library::Column::UserId.eq(user_id))
            .filter(library::Column::AnimeId.eq(anime_id))
            .exec(&self.conn)
            .await?;
        Ok(result.rows_affected > 0)
    }
}
