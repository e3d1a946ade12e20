use crate::entities::{anime_metadata, animes};
use sea_orm_migration::prelude::*;
use sea_orm_migration::sea_orm::Schema;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let schema = Schema::new(manager.get_database_backend());

        manager
            .create_table(
                schema
                    .create_table_from_entity(animes::Entity)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                schema
                    .create_table_from_entity(anime_metadata::Entity)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        for (name, column) in [
            ("idx_animes_mal_id", Animes::MalId),
            ("idx_animes_anilist_id", Animes::AnilistId),
            ("idx_animes_updated_at", Animes::UpdatedAt),
            ("idx_animes_season_year", Animes::SeasonYear),
        ] {
            manager
                .create_index(
                    Index::create()
                        .name(name)
                        .table(Animes::Table)
                        .col(column)
                        .if_not_exists()
                        .to_owned(),
                )
                .await?;
        }

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(AnimeMetadata::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Animes::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Animes {
    Table,
    MalId,
    AnilistId,
    UpdatedAt,
    SeasonYear,
}

#[derive(DeriveIden)]
enum AnimeMetadata {
    Table,
}
