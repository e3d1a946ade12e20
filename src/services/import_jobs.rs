//! Imports a user's remote list into the local library.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::clients::anilist::AnilistClient;
use crate::clients::myanimelist::{AnimeListQuery, MalClient};
use crate::constants::limits::IMPORT_PAGE_SIZE;
use crate::context::Context;
use crate::db::{IMPORT_JOBS_CHANNEL, Store};
use crate::domain::{ImportJobStatus, LibraryStatus, Provider};
use crate::error::{CoreError, CoreResult};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ImportJobNotification {
    pub id: String,
    #[serde(alias = "userId")]
    pub user_id: String,
    pub provider: Provider,
    #[serde(default)]
    pub status: Option<ImportJobStatus>,
}

/// One remote list entry reduced to what the library stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RemoteEntry {
    mal_id: i32,
    status: LibraryStatus,
    watched_episodes: i32,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub imported: usize,
    pub unmatched: usize,
}

#[derive(Clone)]
pub struct ImportJobs {
    store: Store,
    mal: MalClient,
    anilist: AnilistClient,
}

impl ImportJobs {
    #[must_use]
    pub const fn new(store: Store, mal: MalClient, anilist: AnilistClient) -> Self {
        Self {
            store,
            mal,
            anilist,
        }
    }

    pub async fn listen(&self, ctx: &Context) -> CoreResult<()> {
        let mut listener = self.store.listen(IMPORT_JOBS_CHANNEL).await?;
        info!(channel = IMPORT_JOBS_CHANNEL, "Listening for import jobs");

        loop {
            let notification = tokio::select! {
                () = ctx.cancelled() => {
                    info!(channel = IMPORT_JOBS_CHANNEL, "Import job listener stopped");
                    return Ok(());
                }
                res = listener.recv() => res.map_err(|e| CoreError::Database(e.to_string()))?,
            };

            let job: ImportJobNotification = match serde_json::from_str(notification.payload()) {
                Ok(job) => job,
                Err(e) => {
                    warn!(error = %e, payload = notification.payload(), "Malformed import job notification");
                    continue;
                }
            };

            let this = self.clone();
            let ctx = ctx.child();
            tokio::spawn(async move {
                this.run(&ctx, job).await;
            });
        }
    }

    /// Runs one job to a terminal state. Returns that state, or `None` when
    /// the job could not be started.
    pub async fn run(&self, ctx: &Context, job: ImportJobNotification) -> Option<ImportJobStatus> {
        info!(job_id = %job.id, user_id = %job.user_id, provider = %job.provider, "Processing import job");

        let token = match self.store.get_oauth_token(&job.user_id, job.provider).await {
            Ok(Some(token)) => token.token,
            Ok(None) => {
                warn!(job_id = %job.id, "No linked account for import");
                return None;
            }
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "Token lookup failed");
                return None;
            }
        };

        if let Err(e) = self
            .store
            .set_import_job_status(&job.id, ImportJobStatus::InProgress, None)
            .await
        {
            warn!(job_id = %job.id, error = %e, "Failed to start import job");
            return None;
        }

        let (status, error) = match self.import(ctx, &job, &token).await {
            Ok(summary) => {
                info!(
                    job_id = %job.id,
                    imported = summary.imported,
                    unmatched = summary.unmatched,
                    "Import job completed"
                );
                (ImportJobStatus::Completed, None)
            }
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "Import job failed");
                (ImportJobStatus::Failed, Some(e.to_string()))
            }
        };

        if let Err(e) = self.store.set_import_job_status(&job.id, status, error).await {
            warn!(job_id = %job.id, error = %e, "Failed to record import job status");
        }
        Some(status)
    }

    async fn import(
        &self,
        ctx: &Context,
        job: &ImportJobNotification,
        token: &str,
    ) -> CoreResult<ImportSummary> {
        let mut summary = ImportSummary::default();
        let mut page = 1;
        loop {
            let entries = ctx.run(self.remote_page(job.provider, token, page)).await?;
            if entries.is_empty() {
                return Ok(summary);
            }
            debug!(job_id = %job.id, page, entries = entries.len(), "Importing list page");

            for entry in entries {
                if self.apply(&job.user_id, entry).await? {
                    summary.imported += 1;
                } else {
                    summary.unmatched += 1;
                }
            }
            page += 1;
        }
    }

    async fn remote_page(
        &self,
        provider: Provider,
        token: &str,
        page: u32,
    ) -> CoreResult<Vec<RemoteEntry>> {
        let now = Utc::now();
        match provider {
            Provider::MyAnimeList => {
                let list = self
                    .mal
                    .anime_list(
                        token,
                        AnimeListQuery {
                            page,
                            limit: IMPORT_PAGE_SIZE,
                            ..AnimeListQuery::default()
                        },
                    )
                    .await?;
                Ok(list
                    .data
                    .into_iter()
                    .map(|item| RemoteEntry {
                        mal_id: item.node.id,
                        status: item.list_status.library_status(),
                        watched_episodes: item.list_status.num_watched_episodes,
                        updated_at: item.list_status.updated_at_or(now),
                    })
                    .collect())
            }
            Provider::Anilist => {
                let list = self.anilist.user_list(token, page, IMPORT_PAGE_SIZE).await?;
                Ok(list
                    .into_iter()
                    .map(|item| RemoteEntry {
                        mal_id: item.mal_id(),
                        status: item.library_status(),
                        watched_episodes: item.progress,
                        updated_at: now,
                    })
                    .collect())
            }
        }
    }

    /// Writes one entry. Returns `false` when no catalog row matches.
    async fn apply(&self, user_id: &str, entry: RemoteEntry) -> CoreResult<bool> {
        if entry.mal_id <= 0 {
            return Ok(false);
        }
        let rows = self.store.get_animes_by_mal_id(entry.mal_id).await?;
        let Some(first) = rows.first() else {
            debug!(mal_id = entry.mal_id, "No catalog row for imported entry");
            return Ok(false);
        };

        let mut existing = None;
        for row in &rows {
            if self.store.is_in_library(user_id, &row.id).await? {
                existing = Some(row.id.as_str());
                break;
            }
        }

        match existing {
            Some(anime_id) => {
                self.store
                    .update_library_entry(
                        user_id,
                        anime_id,
                        entry.status,
                        entry.watched_episodes,
                        entry.updated_at,
                    )
                    .await?;
            }
            None => {
                self.store
                    .insert_library_entry(
                        user_id,
                        &first.id,
                        entry.status,
                        entry.watched_episodes,
                        entry.updated_at,
                    )
                    .await?;
            }
        }
        Ok(true)
    }
}
