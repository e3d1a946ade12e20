use crate::clients::hianime::ScrapedAnime;
use crate::domain::{ImportJobStatus, LibraryStatus, Provider, SyncAction, SyncStatus};
use crate::entities::{
    anime_metadata, animes, library, library_import_jobs, library_sync_log, oauth_tokens,
};
use crate::error::{CoreError, CoreResult};
use anyhow::Result;
use chrono::{DateTime, Utc};
use sea_orm::sqlx::postgres::PgListener;
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseBackend, DatabaseConnection, Statement,
};
use std::path::Path;
use std::time::Duration;
use tracing::info;

pub mod migrator;
pub mod repositories;

pub use repositories::anime::{Page as AnimePage, new_active_model as new_anime_row};

/// Channel carrying one JSON object per queued library sync.
pub const LIBRARY_SYNC_CHANNEL: &str = "library_sync";

/// Channel carrying one JSON object per created import job.
pub const IMPORT_JOBS_CHANNEL: &str = "library_import_jobs";

#[derive(Clone)]
pub struct Store {
    pub conn: DatabaseConnection,
}

impl Store {
    pub async fn new(db_url: &str) -> Result<Self> {
        Self::with_pool_options(db_url, 10, 2).await
    }

    pub async fn with_pool_options(
        db_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self> {
        use sea_orm_migration::MigratorTrait;

        if let Some(path_str) = db_url.strip_prefix("sqlite:") {
            let path_str = path_str.trim_start_matches("//");
            if !path_str.starts_with(":memory:") {
                let path_str = path_str.split('?').next().unwrap_or(path_str);
                if let Some(parent) = Path::new(path_str).parent() {
                    tokio::fs::create_dir_all(parent).await.ok();
                }
                if !Path::new(path_str).exists() {
                    std::fs::File::create(path_str)?;
                }
            }
        }

        let mut opt = ConnectOptions::new(db_url.to_string());
        opt.max_connections(max_connections)
            .min_connections(min_connections)
            .connect_timeout(Duration::from_secs(10))
            .acquire_timeout(Duration::from_secs(10))
            .idle_timeout(Duration::from_secs(300))
            .max_lifetime(Duration::from_secs(600))
            .sqlx_logging(false);

        let conn = Database::connect(opt).await?;

        migrator::Migrator::up(&conn, None).await?;

        info!(
            "Database connected & migrations applied (pool: {}-{})",
            min_connections, max_connections
        );

        Ok(Self { conn })
    }

    pub async fn ping(&self) -> Result<()> {
        let backend = self.conn.get_database_backend();
        self.conn
            .query_one(Statement::from_string(backend, "SELECT 1".to_string()))
            .await?;
        Ok(())
    }

    #[must_use]
    pub fn is_postgres(&self) -> bool {
        self.conn.get_database_backend() == DatabaseBackend::Postgres
    }

    /// Dedicated connection subscribed to `channel`. Postgres only.
    pub async fn listen(&self, channel: &str) -> CoreResult<PgListener> {
        if !self.is_postgres() {
            return Err(CoreError::Database(format!(
                "LISTEN {channel} requires a Postgres backend"
            )));
        }
        let pool = self.conn.get_postgres_connection_pool();
        let mut listener = PgListener::connect_with(pool)
            .await
            .map_err(|e| CoreError::Database(e.to_string()))?;
        listener
            .listen(channel)
            .await
            .map_err(|e| CoreError::Database(e.to_string()))?;
        Ok(listener)
    }

    fn anime_repo(&self) -> repositories::anime::AnimeRepository {
        repositories::anime::AnimeRepository::new(self.conn.clone())
    }

    fn anime_metadata_repo(&self) -> repositories::anime_metadata::AnimeMetadataRepository {
        repositories::anime_metadata::AnimeMetadataRepository::new(self.conn.clone())
    }

    fn library_repo(&self) -> repositories::library::LibraryRepository {
        repositories::library::LibraryRepository::new(self.conn.clone())
    }

    fn sync_log_repo(&self) -> repositories::sync_log::SyncLogRepository {
        repositories::sync_log::SyncLogRepository::new(self.conn.clone())
    }

    fn import_job_repo(&self) -> repositories::import_jobs::ImportJobRepository {
        repositories::import_jobs::ImportJobRepository::new(self.conn.clone())
    }

    fn oauth_token_repo(&self) -> repositories::oauth_tokens::OauthTokenRepository {
        repositories::oauth_tokens::OauthTokenRepository::new(self.conn.clone())
    }

    // Catalog

    pub async fn get_anime(&self, id: &str) -> CoreResult<Option<animes::Model>> {
        self.anime_repo().get(id).await
    }

    pub async fn get_anime_by_hi_anime_id(
        &self,
        hi_anime_id: &str,
    ) -> CoreResult<Option<animes::Model>> {
        self.anime_repo().get_by_hi_anime_id(hi_anime_id).await
    }

    pub async fn get_animes_by_hi_anime_ids(
        &self,
        ids: &[String],
    ) -> CoreResult<Vec<animes::Model>> {
        self.anime_repo().get_by_hi_anime_ids(ids).await
    }

    pub async fn get_animes_by_mal_id(&self, mal_id: i32) -> CoreResult<Vec<animes::Model>> {
        self.anime_repo().list_by_mal_id(mal_id).await
    }

    pub async fn get_animes_by_mal_ids(&self, mal_ids: &[i32]) -> CoreResult<Vec<animes::Model>> {
        self.anime_repo().get_by_mal_ids(mal_ids).await
    }

    pub async fn get_animes_by_anilist_id(
        &self,
        anilist_id: i32,
    ) -> CoreResult<Vec<animes::Model>> {
        self.anime_repo().list_by_anilist_id(anilist_id).await
    }

    pub async fn count_animes(&self) -> CoreResult<u64> {
        self.anime_repo().count().await
    }

    pub async fn recently_updated_animes(&self, page: u64, size: u64) -> CoreResult<AnimePage> {
        self.anime_repo().recently_updated(page, size).await
    }

    pub async fn animes_by_year(&self, year: i32, page: u64, size: u64) -> CoreResult<AnimePage> {
        self.anime_repo().by_year(year, page, size).await
    }

    pub async fn animes_by_season(
        &self,
        season: &str,
        year: i32,
        page: u64,
        size: u64,
    ) -> CoreResult<AnimePage> {
        self.anime_repo().by_season(season, year, page, size).await
    }

    pub async fn animes_by_genre(
        &self,
        genre: &str,
        page: u64,
        size: u64,
    ) -> CoreResult<AnimePage> {
        self.anime_repo().by_genre(genre, page, size).await
    }

    pub async fn random_anime(&self, genre: Option<&str>) -> CoreResult<Option<animes::Model>> {
        self.anime_repo().random(genre).await
    }

    pub async fn search_animes(
        &self,
        query: &str,
        genre: Option<&str>,
        page: u64,
        size: u64,
    ) -> CoreResult<AnimePage> {
        self.anime_repo().search(query, genre, page, size).await
    }

    pub async fn anime_genres(&self) -> CoreResult<Vec<String>> {
        self.anime_repo().genres().await
    }

    pub async fn insert_animes(&self, rows: Vec<animes::ActiveModel>) -> CoreResult<u64> {
        self.anime_repo().insert_many(rows).await
    }

    pub async fn insert_anime(
        &self,
        anime: &ScrapedAnime,
        at: DateTime<Utc>,
    ) -> CoreResult<animes::Model> {
        self.anime_repo().insert(anime, at).await
    }

    pub async fn update_anime(
        &self,
        id: &str,
        anime: &ScrapedAnime,
        at: DateTime<Utc>,
    ) -> CoreResult<animes::Model> {
        self.anime_repo().update(id, anime, at).await
    }

    // Metadata

    pub async fn get_anime_metadata(
        &self,
        mal_id: i32,
    ) -> CoreResult<Option<anime_metadata::Model>> {
        self.anime_metadata_repo().get(mal_id).await
    }

    pub async fn upsert_anime_metadata(&self, model: anime_metadata::Model) -> CoreResult<()> {
        self.anime_metadata_repo().upsert(model).await
    }

    pub async fn update_metadata_trailer(&self, mal_id: i32, trailer: &str) -> CoreResult<()> {
        self.anime_metadata_repo()
            .update_trailer(mal_id, trailer)
            .await
    }

    // Library

    pub async fn get_library_entry(
        &self,
        user_id: &str,
        anime_id: &str,
    ) -> CoreResult<Option<library::Model>> {
        self.library_repo().get(user_id, anime_id).await
    }

    pub async fn is_in_library(&self, user_id: &str, anime_id: &str) -> CoreResult<bool> {
        self.library_repo().is_in_library(user_id, anime_id).await
    }

    pub async fn insert_library_entry(
        &self,
        user_id: &str,
        anime_id: &str,
        status: LibraryStatus,
        watched_episodes: i32,
        at: DateTime<Utc>,
    ) -> CoreResult<library::Model> {
        self.library_repo()
            .insert(user_id, anime_id, status, watched_episodes, at)
            .await
    }

    pub async fn update_library_entry(
        &self,
        user_id: &str,
        anime_id: &str,
        status: LibraryStatus,
        watched_episodes: i32,
        at: DateTime<Utc>,
    ) -> CoreResult<library::Model> {
        self.library_repo()
            .update(user_id, anime_id, status, watched_episodes, at)
            .await
    }

    pub async fn delete_library_entry(&self, user_id: &str, anime_id: &str) -> CoreResult<bool> {
        self.library_repo().delete(user_id, anime_id).await
    }

    // Library sync log

    pub async fn get_library_sync(
        &self,
        user_id: &str,
        anime_id: &str,
        provider: Provider,
        action: SyncAction,
    ) -> CoreResult<Option<library_sync_log::Model>> {
        self.sync_log_repo()
            .find(user_id, anime_id, provider, action)
            .await
    }

    pub async fn retryable_library_syncs(&self) -> CoreResult<Vec<library_sync_log::Model>> {
        self.sync_log_repo().list_retryable().await
    }

    pub async fn enqueue_library_sync(
        &self,
        user_id: &str,
        anime_id: &str,
        provider: Provider,
        action: SyncAction,
        payload: &serde_json::Value,
    ) -> CoreResult<()> {
        self.sync_log_repo()
            .enqueue(user_id, anime_id, provider, action, payload)
            .await
    }

    pub async fn set_library_sync_status(
        &self,
        user_id: &str,
        anime_id: &str,
        provider: Provider,
        action: SyncAction,
        status: SyncStatus,
        error: Option<String>,
    ) -> CoreResult<()> {
        self.sync_log_repo()
            .set_status(user_id, anime_id, provider, action, status, error)
            .await
    }

    // Import jobs

    pub async fn get_import_job(&self, id: &str) -> CoreResult<Option<library_import_jobs::Model>> {
        self.import_job_repo().get(id).await
    }

    pub async fn create_import_job(
        &self,
        user_id: &str,
        provider: Provider,
    ) -> CoreResult<library_import_jobs::Model> {
        self.import_job_repo().create(user_id, provider).await
    }

    pub async fn set_import_job_status(
        &self,
        id: &str,
        status: ImportJobStatus,
        error: Option<String>,
    ) -> CoreResult<()> {
        self.import_job_repo().set_status(id, status, error).await
    }

    // OAuth tokens

    pub async fn get_oauth_token(
        &self,
        user_id: &str,
        provider: Provider,
    ) -> CoreResult<Option<oauth_tokens::Model>> {
        self.oauth_token_repo().get(user_id, provider).await
    }

    pub async fn tokens_expiring_before(
        &self,
        deadline: DateTime<Utc>,
    ) -> CoreResult<Vec<oauth_tokens::Model>> {
        self.oauth_token_repo().expiring_before(deadline).await
    }

    pub async fn save_oauth_token(
        &self,
        user_id: &str,
        provider: Provider,
        token: &str,
        refresh_token: &str,
        expires_at: DateTime<Utc>,
    ) -> CoreResult<()> {
        self.oauth_token_repo()
            .upsert(user_id, provider, token, refresh_token, expires_at)
            .await
    }

    pub async fn update_oauth_token(
        &self,
        user_id: &str,
        provider: Provider,
        token: &str,
        refresh_token: &str,
        expires_at: DateTime<Utc>,
    ) -> CoreResult<()> {
        self.oauth_token_repo()
            .update(user_id, provider, token, refresh_token, expires_at)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_store() -> Store {
        Store::with_pool_options("sqlite::memory:", 1, 1).await.unwrap()
    }

    fn scraped(hi: &str, episode: i32) -> ScrapedAnime {
        ScrapedAnime {
            hi_anime_id: hi.to_string(),
            ename: format!("{hi} title"),
            jname: format!("{hi} jname"),
            poster_url: "https://img/p.jpg".to_string(),
            genre: "Action, Comedy".to_string(),
            mal_id: 20,
            anilist_id: 20,
            last_episode: episode,
            season: "fall".to_string(),
            season_year: 2002,
        }
    }

    #[tokio::test]
    async fn insert_and_lookup_catalog_rows() {
        let store = memory_store().await;
        let now = Utc::now();

        let row = store.insert_anime(&scraped("naruto-677", 220), now).await.unwrap();
        assert_eq!(store.count_animes().await.unwrap(), 1);

        let by_hi = store
            .get_anime_by_hi_anime_id("naruto-677")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_hi.id, row.id);
        assert_eq!(store.get_animes_by_mal_id(20).await.unwrap().len(), 1);
        assert_eq!(store.get_animes_by_mal_ids(&[20, 21]).await.unwrap().len(), 1);

        let updated = store
            .update_anime(&row.id, &scraped("naruto-677", 221), now)
            .await
            .unwrap();
        assert_eq!(updated.last_episode, 221);
        assert_eq!(updated.created_at, row.created_at);
    }

    #[tokio::test]
    async fn insert_many_skips_existing_hi_ids() {
        let store = memory_store().await;
        let now = Utc::now();
        store.insert_anime(&scraped("a-1", 1), now).await.unwrap();

        let written = store
            .insert_animes(vec![
                new_anime_row(&scraped("a-1", 2), now),
                new_anime_row(&scraped("b-2", 3), now),
            ])
            .await
            .unwrap();

        assert_eq!(written, 1);
        assert_eq!(store.count_animes().await.unwrap(), 2);
        let a = store.get_anime_by_hi_anime_id("a-1").await.unwrap().unwrap();
        assert_eq!(a.last_episode, 1);
    }

    #[tokio::test]
    async fn listings_search_and_genres() {
        let store = memory_store().await;
        let base = Utc::now();
        for (i, hi) in ["one-piece-100", "bleach-806", "naruto-677"].iter().enumerate() {
            let at = base + chrono::Duration::milliseconds(20 * i64::try_from(i).unwrap());
            store.insert_anime(&scraped(hi, 1), at).await.unwrap();
        }

        let (items, total) = store.recently_updated_animes(1, 2).await.unwrap();
        assert_eq!(total, 3);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].hi_anime_id, "naruto-677");

        let (found, total) = store.search_animes("BLEACH", None, 1, 10).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(found[0].hi_anime_id, "bleach-806");

        let (_, total) = store.animes_by_season("fall", 2002, 1, 10).await.unwrap();
        assert_eq!(total, 3);

        assert_eq!(
            store.anime_genres().await.unwrap(),
            vec!["Action".to_string(), "Comedy".to_string()]
        );
        assert!(store.random_anime(Some("Action")).await.unwrap().is_some());
        assert!(store.random_anime(Some("Romance")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn metadata_upsert_keeps_trailer() {
        let store = memory_store().await;
        let now = Utc::now();
        let model = anime_metadata::Model {
            mal_id: 16498,
            description: "Titans".to_string(),
            main_picture_url: String::new(),
            media_type: "tv".to_string(),
            rating: "r".to_string(),
            airing_status: "finished_airing".to_string(),
            avg_episode_duration: 1440,
            total_episodes: 25,
            studio: "Wit Studio".to_string(),
            rank: 1,
            mean: 8.5,
            scoring_users: 10,
            popularity: 1,
            airing_start_date: "2013-04-07".to_string(),
            airing_end_date: "2013-09-29".to_string(),
            source: "manga".to_string(),
            season_year: 2013,
            season: "spring".to_string(),
            trailer_embed_url: None,
            created_at: now,
            updated_at: now,
        };

        store.upsert_anime_metadata(model.clone()).await.unwrap();
        store
            .update_metadata_trailer(16498, "https://youtube/embed/x")
            .await
            .unwrap();

        let mut again = model;
        again.total_episodes = 26;
        store.upsert_anime_metadata(again).await.unwrap();

        let row = store.get_anime_metadata(16498).await.unwrap().unwrap();
        assert_eq!(row.total_episodes, 26);
        assert_eq!(
            row.trailer_embed_url.as_deref(),
            Some("https://youtube/embed/x")
        );

        let missing = store.update_metadata_trailer(1, "x").await;
        assert!(matches!(missing, Err(CoreError::NotFound { .. })));
    }

    #[tokio::test]
    async fn library_and_sync_log_lifecycle() {
        let store = memory_store().await;
        let now = Utc::now();

        store
            .insert_library_entry("u1", "a1", LibraryStatus::Watching, 3, now)
            .await
            .unwrap();
        assert!(store.is_in_library("u1", "a1").await.unwrap());
        let dup = store
            .insert_library_entry("u1", "a1", LibraryStatus::Watching, 3, now)
            .await;
        assert!(matches!(dup, Err(CoreError::Conflict(_))));

        let payload = serde_json::json!({"status": "completed", "watched_episodes": 12});
        store
            .enqueue_library_sync("u1", "a1", Provider::MyAnimeList, SyncAction::AddEntry, &payload)
            .await
            .unwrap();
        store
            .enqueue_library_sync("u1", "a1", Provider::MyAnimeList, SyncAction::AddEntry, &payload)
            .await
            .unwrap();
        assert_eq!(store.retryable_library_syncs().await.unwrap().len(), 1);

        store
            .set_library_sync_status(
                "u1",
                "a1",
                Provider::MyAnimeList,
                SyncAction::AddEntry,
                SyncStatus::Success,
                None,
            )
            .await
            .unwrap();
        assert!(store.retryable_library_syncs().await.unwrap().is_empty());

        assert!(store.delete_library_entry("u1", "a1").await.unwrap());
        assert!(!store.is_in_library("u1", "a1").await.unwrap());
    }

    #[tokio::test]
    async fn import_jobs_and_tokens() {
        let store = memory_store().await;

        let job = store.create_import_job("u1", Provider::Anilist).await.unwrap();
        assert_eq!(job.status, "pending");
        store
            .set_import_job_status(&job.id, ImportJobStatus::Failed, Some("boom".to_string()))
            .await
            .unwrap();
        let job = store.get_import_job(&job.id).await.unwrap().unwrap();
        assert_eq!(job.status, "failed");
        assert!(job.completed_at.is_some());

        let soon = Utc::now() + chrono::Duration::hours(1);
        store
            .save_oauth_token("u1", Provider::MyAnimeList, "at", "rt", soon)
            .await
            .unwrap();
        let expiring = store
            .tokens_expiring_before(Utc::now() + chrono::Duration::days(1))
            .await
            .unwrap();
        assert_eq!(expiring.len(), 1);

        store
            .update_oauth_token("u1", Provider::MyAnimeList, "at2", "rt2", soon)
            .await
            .unwrap();
        let token = store
            .get_oauth_token("u1", Provider::MyAnimeList)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(token.token, "at2");
    }
}
