use crate::entities::anime_metadata;
use crate::error::{CoreError, CoreResult};
use chrono::Utc;
use sea_orm::sea_query::OnConflict;
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, IntoActiveModel, Set};

pub struct AnimeMetadataRepository {
    conn: DatabaseConnection,
}

impl AnimeMetadataRepository {
    #[must_use]
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    pub async fn get(&self, mal_id: i32) -> CoreResult<Option<anime_metadata::Model>> {
        Ok(anime_metadata::Entity::find_by_id(mal_id)
            .one(&self.conn)
            .await?)
    }

    /// Inserts or overwrites the row for `model.mal_id`. `created_at` and an
    /// already scraped trailer survive the overwrite.
    pub async fn upsert(&self, model: anime_metadata::Model) -> CoreResult<()> {
        let active = model.into_active_model();

        anime_metadata::Entity::insert(active)
            .on_conflict(
                OnConflict::column(anime_metadata::Column::MalId)
                    .update_columns([
                        anime_metadata::Column::Description,
                        anime_metadata::Column::MainPictureUrl,
                        anime_metadata::Column::MediaType,
                        anime_metadata::Column::Rating,
                        anime_metadata::Column::AiringStatus,
                        anime_metadata::Column::AvgEpisodeDuration,
                        anime_metadata::Column::TotalEpisodes,
                        anime_metadata::Column::Studio,
                        anime_metadata::Column::Rank,
                        anime_metadata::Column::Mean,
                        anime_metadata::Column::ScoringUsers,
                        anime_metadata::Column::Popularity,
                        anime_metadata::Column::AiringStartDate,
                        anime_metadata::Column::AiringEndDate,
                        anime_metadata::Column::Source,
                        anime_metadata::Column::SeasonYear,
                        anime_metadata::Column::Season,
                        anime_metadata::Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(&self.conn)
            .await?;
        Ok(())
    }

    pub async fn update_trailer(&self, mal_id: i32, trailer: &str) -> CoreResult<()> {
        let model = anime_metadata::ActiveModel {
            mal_id: Set(mal_id),
            trailer_embed_url: Set(Some(trailer.to_string())),
            updated_at: Set(Utc::now()),
            ..Default::default()
        };
        match model.update(&self.conn).await {
            Ok(_) => Ok(()),
            Err(sea_orm::DbErr::RecordNotUpdated) => Err(CoreError::not_found("anime metadata")),
            Err(e) => Err(e.into()),
        }
    }
}
