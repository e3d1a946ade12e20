use crate::entities::{library, library_import_jobs, library_sync_log, oauth_tokens};
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
                    .create_table_from_entity(library::Entity)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                schema
                    .create_table_from_entity(library_sync_log::Entity)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                schema
                    .create_table_from_entity(library_import_jobs::Entity)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                schema
                    .create_table_from_entity(oauth_tokens::Entity)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_library_user_anime")
                    .table(Library::Table)
                    .col(Library::UserId)
                    .col(Library::AnimeId)
                    .unique()
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_library_sync_log_key")
                    .table(LibrarySyncLog::Table)
                    .col(LibrarySyncLog::UserId)
                    .col(LibrarySyncLog::AnimeId)
                    .col(LibrarySyncLog::Provider)
                    .col(LibrarySyncLog::Action)
                    .unique()
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_library_sync_log_status")
                    .table(LibrarySyncLog::Table)
                    .col(LibrarySyncLog::Status)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_oauth_tokens_user_provider")
                    .table(OauthTokens::Table)
                    .col(OauthTokens::UserId)
                    .col(OauthTokens::Provider)
                    .unique()
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_oauth_tokens_expires_at")
                    .table(OauthTokens::Table)
                    .col(OauthTokens::ExpiresAt)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(OauthTokens::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(LibraryImportJobs::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(LibrarySyncLog::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Library::Table).to_owned())
            .await?;
        Ok(())
    }
}

#[derive(DeriveIden)]
enum Library {
    Table,
    UserId,
    AnimeId,
}

#[derive(DeriveIden)]
enum LibrarySyncLog {
    Table,
    UserId,
    AnimeId,
    Provider,
    Action,
    Status,
}

#[derive(DeriveIden)]
enum LibraryImportJobs {
    Table,
}

#[derive(DeriveIden)]
enum OauthTokens {
    Table,
    UserId,
    Provider,
    ExpiresAt,
}
