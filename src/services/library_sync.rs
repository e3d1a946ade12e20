//! Write-through of library mutations to the linked external lists.
//!
//! Database triggers queue a `library_sync_log` row and notify
//! [`LIBRARY_SYNC_CHANNEL`]. Each notification is dispatched on its own task;
//! the row's final status records the outcome.

use futures::StreamExt;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::clients::anilist::AnilistClient;
use crate::clients::myanimelist::MalClient;
use crate::constants::limits::LIBRARY_SYNC_TIMEOUT_SECS;
use crate::context::Context;
use crate::db::{LIBRARY_SYNC_CHANNEL, Store};
use crate::domain::{LibraryStatus, Provider, SyncAction, SyncStatus};
use crate::entities::library_sync_log;
use crate::error::{CoreError, CoreResult};

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SyncPayload {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default, alias = "watchedEpisodes")]
    pub watched_episodes: Option<i32>,
}

/// One queued sync, as carried by the notification or the log row.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SyncRequest {
    #[serde(alias = "userId")]
    pub user_id: String,
    #[serde(alias = "animeId")]
    pub anime_id: String,
    pub provider: Provider,
    pub action: SyncAction,
    #[serde(default)]
    pub payload: Option<SyncPayload>,
}

impl TryFrom<library_sync_log::Model> for SyncRequest {
    type Error = CoreError;

    fn try_from(row: library_sync_log::Model) -> Result<Self, Self::Error> {
        let provider = row
            .provider
            .parse()
            .map_err(|e| CoreError::parse("library_sync", e))?;
        let action = row
            .action
            .parse()
            .map_err(|e| CoreError::parse("library_sync", e))?;
        let payload = if row.payload.trim().is_empty() {
            None
        } else {
            serde_json::from_str(&row.payload).map_err(|e| CoreError::parse("library_sync", e))?
        };
        Ok(Self {
            user_id: row.user_id,
            anime_id: row.anime_id,
            provider,
            action,
            payload,
        })
    }
}

/// Remote fields an action writes: `(status, watched_episodes)`.
fn fields_for(
    action: SyncAction,
    payload: &SyncPayload,
) -> (Option<LibraryStatus>, Option<i32>) {
    let status = payload.status.as_deref().map(LibraryStatus::lossy);
    match action {
        SyncAction::AddEntry => (status, payload.watched_episodes),
        SyncAction::UpdateProgress => (None, payload.watched_episodes),
        SyncAction::UpdateStatus => (status, None),
        SyncAction::DeleteEntry => (None, None),
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryReport {
    pub attempted: usize,
    pub succeeded: usize,
}

#[derive(Clone)]
pub struct LibrarySync {
    store: Store,
    mal: MalClient,
    anilist: AnilistClient,
    retry_concurrency: usize,
}

impl LibrarySync {
    #[must_use]
    pub fn new(
        store: Store,
        mal: MalClient,
        anilist: AnilistClient,
        retry_concurrency: usize,
    ) -> Self {
        Self {
            store,
            mal,
            anilist,
            retry_concurrency: retry_concurrency.max(1),
        }
    }

    /// Consumes notifications until `ctx` is cancelled.
    pub async fn listen(&self, ctx: &Context) -> CoreResult<()> {
        let mut listener = self.store.listen(LIBRARY_SYNC_CHANNEL).await?;
        info!(channel = LIBRARY_SYNC_CHANNEL, "Listening for library syncs");

        loop {
            let notification = tokio::select! {
                () = ctx.cancelled() => {
                    info!(channel = LIBRARY_SYNC_CHANNEL, "Library sync listener stopped");
                    return Ok(());
                }
                res = listener.recv() => res.map_err(|e| CoreError::Database(e.to_string()))?,
            };

            let request: SyncRequest = match serde_json::from_str(notification.payload()) {
                Ok(request) => request,
                Err(e) => {
                    warn!(error = %e, payload = notification.payload(), "Malformed library sync notification");
                    continue;
                }
            };

            let this = self.clone();
            let ctx = ctx.child();
            tokio::spawn(async move {
                this.handle(&ctx, request).await;
            });
        }
    }

    /// Dispatches one sync and records its outcome. Returns `None` when the
    /// row was left untouched.
    pub async fn handle(&self, ctx: &Context, request: SyncRequest) -> Option<SyncStatus> {
        let SyncRequest {
            user_id,
            anime_id,
            provider,
            action,
            payload,
        } = request;

        let token = match self.store.get_oauth_token(&user_id, provider).await {
            Ok(Some(token)) => token,
            Ok(None) => {
                debug!(%user_id, %provider, "No linked account, sync left pending");
                return None;
            }
            Err(e) => {
                warn!(%user_id, %provider, error = %e, "Token lookup failed");
                return None;
            }
        };

        let anime = match self.store.get_anime(&anime_id).await {
            Ok(Some(anime)) => anime,
            Ok(None) => {
                warn!(%anime_id, "Library sync for unknown anime");
                return None;
            }
            Err(e) => {
                warn!(%anime_id, error = %e, "Anime lookup failed");
                return None;
            }
        };

        let (status, error) = match anime.known_mal_id() {
            None => (
                SyncStatus::Skipped,
                Some(format!("anime {anime_id} has no MAL id")),
            ),
            Some(mal_id) => {
                let payload = payload.unwrap_or_default();
                let res = ctx
                    .run_with_timeout(
                        provider.as_str(),
                        Duration::from_secs(LIBRARY_SYNC_TIMEOUT_SECS),
                        self.dispatch(&token.token, provider, action, mal_id, &payload),
                    )
                    .await;
                match res {
                    Ok(()) => (SyncStatus::Success, None),
                    Err(e) => {
                        warn!(%user_id, %anime_id, %provider, %action, error = %e, "Library sync failed");
                        (SyncStatus::Failed, Some(e.to_string()))
                    }
                }
            }
        };

        if let Err(e) = self
            .store
            .set_library_sync_status(&user_id, &anime_id, provider, action, status, error)
            .await
        {
            warn!(%user_id, %anime_id, error = %e, "Failed to record library sync status");
        }
        debug!(%user_id, %anime_id, %provider, %action, %status, "Library sync finished");
        Some(status)
    }

    async fn dispatch(
        &self,
        token: &str,
        provider: Provider,
        action: SyncAction,
        mal_id: i32,
        payload: &SyncPayload,
    ) -> CoreResult<()> {
        let (status, watched) = fields_for(action, payload);
        match (provider, action) {
            (Provider::MyAnimeList, SyncAction::DeleteEntry) => {
                self.mal.delete_list(token, mal_id).await
            }
            (Provider::MyAnimeList, _) => self.mal.update_list(token, mal_id, status, watched).await,
            (Provider::Anilist, SyncAction::DeleteEntry) => {
                self.anilist.delete_entry(token, mal_id).await
            }
            (Provider::Anilist, _) => {
                self.anilist
                    .save_entry(token, mal_id, status, watched)
                    .await
            }
        }
    }

    /// Re-dispatches every pending or failed row.
    pub async fn retry_failed(&self, ctx: &Context) -> CoreResult<RetryReport> {
        let requests: Vec<SyncRequest> = self
            .store
            .retryable_library_syncs()
            .await?
            .into_iter()
            .filter_map(|row| {
                let id = row.id;
                SyncRequest::try_from(row)
                    .map_err(|e| warn!(id, error = %e, "Skipping malformed library sync row"))
                    .ok()
            })
            .collect();

        let attempted = requests.len();
        info!(attempted, "Retrying library syncs");

        let succeeded = futures::stream::iter(requests)
            .map(|request| async move { self.handle(ctx, request).await })
            .buffer_unordered(self.retry_concurrency)
            .filter(|status| futures::future::ready(*status == Some(SyncStatus::Success)))
            .count()
            .await;

        info!(attempted, succeeded, "Library sync retry finished");
        Ok(RetryReport {
            attempted,
            succeeded,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::build_shared_http_client;
    use crate::clients::hianime::ScrapedAnime;
    use chrono::{Duration as TimeDelta, Utc};
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct Fixture {
        sync: LibrarySync,
        store: Store,
        anime_id: String,
    }

    async fn fixture(server: &MockServer, mal_id: i32) -> Fixture {
        let store = Store::with_pool_options("sqlite::memory:", 1, 1)
            .await
            .unwrap();
        let client = build_shared_http_client().unwrap();
        let uri = server.uri();
        let mal = MalClient::with_base_urls(client.clone(), &uri, &uri, "id", "secret");
        let anilist = AnilistClient::with_endpoint(client, &format!("{uri}/graphql"));

        let anime = store
            .insert_anime(
                &ScrapedAnime {
                    hi_anime_id: "naruto-677".to_string(),
                    ename: "Naruto".to_string(),
                    mal_id,
                    ..ScrapedAnime::default()
                },
                Utc::now(),
            )
            .await
            .unwrap();

        Fixture {
            sync: LibrarySync::new(store.clone(), mal, anilist, 5),
            store,
            anime_id: anime.id,
        }
    }

    async fn link_mal(store: &Store) {
        store
            .save_oauth_token(
                "u1",
                Provider::MyAnimeList,
                "access",
                "refresh",
                Utc::now() + TimeDelta::days(30),
            )
            .await
            .unwrap();
    }

    fn request(anime_id: &str, action: SyncAction) -> SyncRequest {
        SyncRequest {
            user_id: "u1".to_string(),
            anime_id: anime_id.to_string(),
            provider: Provider::MyAnimeList,
            action,
            payload: Some(SyncPayload {
                status: Some("watching".to_string()),
                watched_episodes: Some(3),
            }),
        }
    }

    async fn enqueue(store: &Store, anime_id: &str, action: SyncAction) {
        store
            .enqueue_library_sync(
                "u1",
                anime_id,
                Provider::MyAnimeList,
                action,
                &json!({"status": "watching", "watched_episodes": 3}),
            )
            .await
            .unwrap();
    }

    async fn row_status(store: &Store, anime_id: &str, action: SyncAction) -> (String, Option<String>) {
        let row = store
            .get_library_sync("u1", anime_id, Provider::MyAnimeList, action)
            .await
            .unwrap()
            .unwrap();
        (row.status, row.error_message)
    }

    #[test]
    fn notification_accepts_both_spellings() {
        let snake: SyncRequest = serde_json::from_str(
            r#"{"user_id":"u","anime_id":"a","provider":"anilist","action":"update_progress","payload":{"watched_episodes":4}}"#,
        )
        .unwrap();
        let camel: SyncRequest = serde_json::from_str(
            r#"{"userId":"u","animeId":"a","provider":"anilist","action":"update_progress","payload":{"watchedEpisodes":4}}"#,
        )
        .unwrap();
        assert_eq!(snake, camel);
        assert_eq!(snake.payload.unwrap().watched_episodes, Some(4));
    }

    #[test]
    fn actions_select_their_fields() {
        let payload = SyncPayload {
            status: Some("on_hold".to_string()),
            watched_episodes: Some(7),
        };
        assert_eq!(
            fields_for(SyncAction::AddEntry, &payload),
            (Some(LibraryStatus::OnHold), Some(7))
        );
        assert_eq!(fields_for(SyncAction::UpdateProgress, &payload), (None, Some(7)));
        assert_eq!(
            fields_for(SyncAction::UpdateStatus, &payload),
            (Some(LibraryStatus::OnHold), None)
        );
    }

    #[tokio::test]
    async fn successful_write_marks_row_success() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/anime/20/my_list_status"))
            .and(body_string_contains("num_watched_episodes=3"))
            .and(body_string_contains("status=watching"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let f = fixture(&server, 20).await;
        link_mal(&f.store).await;
        enqueue(&f.store, &f.anime_id, SyncAction::AddEntry).await;

        let status = f
            .sync
            .handle(&Context::background(), request(&f.anime_id, SyncAction::AddEntry))
            .await;
        assert_eq!(status, Some(SyncStatus::Success));
        assert_eq!(
            row_status(&f.store, &f.anime_id, SyncAction::AddEntry).await,
            ("success".to_string(), None)
        );
    }

    #[tokio::test]
    async fn upstream_error_marks_row_failed() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/anime/20/my_list_status"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let f = fixture(&server, 20).await;
        link_mal(&f.store).await;
        enqueue(&f.store, &f.anime_id, SyncAction::UpdateProgress).await;

        let status = f
            .sync
            .handle(
                &Context::background(),
                request(&f.anime_id, SyncAction::UpdateProgress),
            )
            .await;
        assert_eq!(status, Some(SyncStatus::Failed));
        let (status, error) = row_status(&f.store, &f.anime_id, SyncAction::UpdateProgress).await;
        assert_eq!(status, "failed");
        assert!(error.is_some());
    }

    #[tokio::test]
    async fn missing_token_leaves_row_pending() {
        let server = MockServer::start().await;
        let f = fixture(&server, 20).await;
        enqueue(&f.store, &f.anime_id, SyncAction::DeleteEntry).await;

        let status = f
            .sync
            .handle(
                &Context::background(),
                request(&f.anime_id, SyncAction::DeleteEntry),
            )
            .await;
        assert_eq!(status, None);
        assert_eq!(
            row_status(&f.store, &f.anime_id, SyncAction::DeleteEntry).await.0,
            "pending"
        );
    }

    #[tokio::test]
    async fn titles_without_mal_id_are_skipped() {
        let server = MockServer::start().await;
        let f = fixture(&server, 0).await;
        link_mal(&f.store).await;
        enqueue(&f.store, &f.anime_id, SyncAction::UpdateStatus).await;

        let status = f
            .sync
            .handle(
                &Context::background(),
                request(&f.anime_id, SyncAction::UpdateStatus),
            )
            .await;
        assert_eq!(status, Some(SyncStatus::Skipped));
    }

    #[tokio::test]
    async fn retry_scan_redispatches_failed_rows() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/anime/20/my_list_status"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let f = fixture(&server, 20).await;
        link_mal(&f.store).await;
        enqueue(&f.store, &f.anime_id, SyncAction::DeleteEntry).await;
        f.store
            .set_library_sync_status(
                "u1",
                &f.anime_id,
                Provider::MyAnimeList,
                SyncAction::DeleteEntry,
                SyncStatus::Failed,
                Some("boom".to_string()),
            )
            .await
            .unwrap();

        let report = f.sync.retry_failed(&Context::background()).await.unwrap();
        assert_eq!(
            report,
            RetryReport {
                attempted: 1,
                succeeded: 1
            }
        );
        assert_eq!(
            row_status(&f.store, &f.anime_id, SyncAction::DeleteEntry).await,
            ("success".to_string(), None)
        );
    }
}
