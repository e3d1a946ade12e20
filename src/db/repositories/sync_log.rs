use crate::domain::{Provider, SyncAction, SyncStatus};
use crate::entities::library_sync_log;
use crate::error::{CoreError, CoreResult};
use chrono::Utc;
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};

pub struct SyncLogRepository {
    conn: DatabaseConnection,
}

impl SyncLogRepository {
    #[must_use]
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    pub async fn get(&self, id: i64) -> CoreResult<Option<library_sync_log::Model>> {
        Ok(library_sync_log::Entity::find_by_id(id)
            .one(&self.conn)
            .await?)
    }

    pub async fn find(
        &self,
        user_id: &str,
        anime_id: &str,
        provider: Provider,
        action: SyncAction,
    ) -> CoreResult<Option<library_sync_log::Model>> {
        Ok(library_sync_log::Entity::find()
            .filter(library_sync_log::Column::UserId.eq(user_id))
            .filter(library_sync_log::Column::AnimeId.eq(anime_id))
            .filter(library_sync_log::Column::Provider.eq(provider.as_str()))
            .filter(library_sync_log::Column::Action.eq(action.as_str()))
            .one(&self.conn)
            .await?)
    }

    /// Rows the retry scan re-dispatches, oldest first.
    pub async fn list_retryable(&self) -> CoreResult<Vec<library_sync_log::Model>> {
        Ok(library_sync_log::Entity::find()
            .filter(library_sync_log::Column::Status.is_in([
                SyncStatus::Pending.as_str(),
                SyncStatus::Failed.as_str(),
            ]))
            .order_by_asc(library_sync_log::Column::UpdatedAt)
            .all(&self.conn)
            .await?)
    }

    /// Queues a pending row for the key, resetting an existing one. The
    /// Postgres trigger does the same on library mutations.
    pub async fn enqueue(
        &self,
        user_id: &str,
        anime_id: &str,
        provider: Provider,
        action: SyncAction,
        payload: &serde_json::Value,
    ) -> CoreResult<()> {
        let now = Utc::now();
        let model = library_sync_log::ActiveModel {
            user_id: Set(user_id.to_string()),
            anime_id: Set(anime_id.to_string()),
            provider: Set(provider.to_string()),
            action: Set(action.to_string()),
            status: Set(SyncStatus::Pending.to_string()),
            payload: Set(payload.to_string()),
            error_message: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        };

        library_sync_log::Entity::insert(model)
            .on_conflict(
                OnConflict::columns([
                    library_sync_log::Column::UserId,
                    library_sync_log::Column::AnimeId,
                    library_sync_log::Column::Provider,
                    library_sync_log::Column::Action,
                ])
                .update_columns([
                    library_sync_log::Column::Status,
                    library_sync_log::Column::Payload,
                    library_sync_log::Column::ErrorMessage,
                    library_sync_log::Column::UpdatedAt,
                ])
                .to_owned(),
            )
            .exec_without_returning(&self.conn)
            .await?;
        Ok(())
    }

    pub async fn set_status(
        &self,
        user_id: &str,
        anime_id: &str,
        provider: Provider,
        action: SyncAction,
        status: SyncStatus,
        error: Option<String>,
    ) -> CoreResult<()> {
        let row = self
            .find(user_id, anime_id, provider, action)
            .await?
            .ok_or(CoreError::not_found("library sync"))?;

        let mut model: library_sync_log::ActiveModel = row.into();
        model.status = Set(status.to_string());
        model.error_message = Set(error);
        model.updated_at = Set(Utc::now());
        model.update(&self.conn).await?;
        Ok(())
    }
}
