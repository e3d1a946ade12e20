//! Operator-driven re-scrape of catalog rows by source id.
//!
//! Jobs run in the background and are observed through [`JobManager`]
//! snapshots. Per-id failures never fail a job; the failure list is the
//! product and can be fed into a retry job.

mod jobs;

pub use jobs::{BulkJob, JobHandle, JobManager};

use chrono::Utc;
use futures::StreamExt;
use serde::de::{self, Deserializer as _, SeqAccess, Visitor};
use std::fmt;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::clients::hianime::{HianimeClient, ScrapedAnime};
use crate::config::WorkersConfig;
use crate::constants::limits::MAX_BULK_IDS;
use crate::constants::retry::{DETAIL_ATTEMPTS, DETAIL_DELAY};
use crate::context::Context;
use crate::db::Store;
use crate::domain::Season;
use crate::entities::animes;
use crate::error::{CoreError, CoreResult};
use crate::models::bulk::{
    BulkJobResultDto, BulkJobStatusDto, ReprocessError, ReprocessResult,
};
use crate::services::retry::with_retry;

const UPDATED: &str = "Successfully updated anime details";
const UNCHANGED: &str = "No changes detected, skipped update";
const CREATED: &str = "Successfully created new anime";

struct IdList;

impl<'de> Visitor<'de> for IdList {
    type Value = Vec<String>;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a JSON array of anime ids")
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
        let mut ids: Vec<String> = Vec::new();
        loop {
            let index = ids.len();
            let next = seq
                .next_element::<String>()
                .map_err(|e| de::Error::custom(format!("invalid anime ID at index {index}: {e}")))?;
            let Some(id) = next else {
                return Ok(ids);
            };
            if id.is_empty() {
                return Err(de::Error::custom(format!("empty anime ID at index {index}")));
            }
            if index == MAX_BULK_IDS {
                return Err(de::Error::custom(format!(
                    "too many IDs requested, maximum allowed: {MAX_BULK_IDS}"
                )));
            }
            ids.push(id);
        }
    }
}

/// Parses an uploaded id file. Stops at the first bad entry.
pub fn parse_id_file(bytes: &[u8]) -> CoreResult<Vec<String>> {
    let mut de = serde_json::Deserializer::from_slice(bytes);
    let ids = (&mut de)
        .deserialize_seq(IdList)
        .and_then(|ids| de.end().map(|()| ids))
        .map_err(|e| CoreError::invalid("file", e.to_string()))?;
    if ids.is_empty() {
        return Err(CoreError::invalid("file", "no anime IDs found in JSON array"));
    }
    Ok(ids)
}

/// Checks an inline id list with the same rules as the file upload.
pub fn check_ids(ids: &[String]) -> CoreResult<()> {
    if ids.is_empty() {
        return Err(CoreError::invalid("ids", "no anime IDs provided"));
    }
    if ids.len() > MAX_BULK_IDS {
        return Err(CoreError::invalid(
            "ids",
            format!("too many anime IDs, maximum {MAX_BULK_IDS} allowed"),
        ));
    }
    if let Some(index) = ids.iter().position(String::is_empty) {
        return Err(CoreError::invalid("ids", format!("empty anime ID at index {index}")));
    }
    Ok(())
}

/// Whether the scraped detail differs from the stored row in any tracked
/// field. Seasons compare in their stored spelling.
fn has_changes(row: &animes::Model, detail: &ScrapedAnime) -> bool {
    row.ename != detail.ename
        || row.jname != detail.jname
        || row.image_url != detail.poster_url
        || row.genre != detail.genre
        || row.hi_anime_id != detail.hi_anime_id
        || row.last_episode != detail.last_episode
        || row.season != Season::lossy(&detail.season).as_str()
        || row.season_year != detail.season_year
        || row.mal_id.unwrap_or(0) != detail.mal_id.max(0)
        || row.anilist_id.unwrap_or(0) != detail.anilist_id.max(0)
}

#[derive(Clone)]
pub struct BulkReprocessor {
    store: Store,
    hianime: HianimeClient,
    jobs: JobManager,
    chunk_size: usize,
    workers: usize,
    retry_delay: Duration,
    shutdown: CancellationToken,
}

impl BulkReprocessor {
    #[must_use]
    pub fn new(
        store: Store,
        hianime: HianimeClient,
        config: &WorkersConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            store,
            hianime,
            jobs: JobManager::new(),
            chunk_size: config.bulk_chunk_size.max(1),
            workers: config.bulk_workers.max(1),
            retry_delay: DETAIL_DELAY,
            shutdown,
        }
    }

    #[must_use]
    pub const fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    /// Starts a job over an inline id list.
    pub async fn start_from_ids(&self, ids: Vec<String>) -> CoreResult<String> {
        check_ids(&ids)?;
        let job = self.jobs.create(ids.clone()).await;
        let id = job.read().await.id.clone();
        self.spawn(job, ids);
        Ok(id)
    }

    /// Starts a job over an uploaded file. The file is validated inside the
    /// job, so a bad file shows up as a failed job.
    pub async fn start_from_file(&self, bytes: Vec<u8>) -> String {
        let job = self.jobs.create(Vec::new()).await;
        let id = job.read().await.id.clone();

        let this = self.clone();
        tokio::spawn(async move {
            match parse_id_file(&bytes) {
                Ok(ids) => {
                    job.write().await.ids.clone_from(&ids);
                    this.process(&job, ids).await;
                }
                Err(e) => {
                    let reason = match &e {
                        CoreError::InvalidInput { reason, .. } => reason.clone(),
                        other => other.to_string(),
                    };
                    warn!(error = %e, "Bulk id file rejected");
                    jobs::fail(&job, &reason).await;
                }
            }
        });
        id
    }

    /// Starts a child job over the parent's failed ids. The parent's
    /// successes are carried over as the child's first results.
    pub async fn retry(&self, parent_id: &str) -> CoreResult<String> {
        let parent = self
            .jobs
            .get(parent_id)
            .await
            .ok_or(CoreError::not_found("bulk job"))?;
        let (failed_ids, carried) = {
            let parent = parent.read().await;
            (parent.failed_ids(), parent.results.clone())
        };
        if failed_ids.is_empty() {
            return Err(CoreError::invalid("jobId", "job has no failed ids to retry"));
        }

        let job = self.jobs.create(failed_ids.clone()).await;
        jobs::carry_over(&job, carried).await;
        let id = job.read().await.id.clone();
        info!(parent_id, job_id = %id, ids = failed_ids.len(), "Retrying failed bulk ids");
        self.spawn(job, failed_ids);
        Ok(id)
    }

    pub async fn status(&self, job_id: &str) -> CoreResult<BulkJobStatusDto> {
        let job = self.job(job_id).await?;
        let snapshot = job.read().await.to_status();
        Ok(snapshot)
    }

    pub async fn result(&self, job_id: &str) -> CoreResult<BulkJobResultDto> {
        let job = self.job(job_id).await?;
        let snapshot = job.read().await.to_result();
        Ok(snapshot)
    }

    pub async fn failed_ids(&self, job_id: &str) -> CoreResult<Vec<String>> {
        let job = self.job(job_id).await?;
        let ids = job.read().await.failed_ids();
        Ok(ids)
    }

    async fn job(&self, job_id: &str) -> CoreResult<JobHandle> {
        self.jobs
            .get(job_id)
            .await
            .ok_or(CoreError::not_found("bulk job"))
    }

    fn spawn(&self, job: JobHandle, ids: Vec<String>) {
        let this = self.clone();
        tokio::spawn(async move {
            this.process(&job, ids).await;
        });
    }

    async fn process(&self, job: &JobHandle, ids: Vec<String>) {
        let ctx = Context::with_token(self.shutdown.child_token());
        jobs::start(job, ids.len()).await;
        info!(pending = ids.len(), "Bulk reprocess started");

        for chunk in ids.chunks(self.chunk_size) {
            if ctx.is_cancelled() {
                jobs::fail(job, &CoreError::Cancelled.to_string()).await;
                return;
            }

            let outcomes: Vec<Result<ReprocessResult, ReprocessError>> =
                futures::stream::iter(chunk.iter().map(|id| self.reprocess(&ctx, id)).collect::<Vec<_>>())
                    .buffer_unordered(self.workers)
                    .collect()
                    .await;

            let (results, errors): (Vec<_>, Vec<_>) = outcomes.into_iter().partition(Result::is_ok);
            jobs::record_chunk(
                job,
                chunk.len(),
                results.into_iter().filter_map(Result::ok).collect(),
                errors.into_iter().filter_map(Result::err).collect(),
            )
            .await;
        }

        jobs::complete(job).await;
        let job = job.read().await;
        info!(job_id = %job.id, success = job.success, failed = job.failed, "Bulk reprocess finished");
    }

    async fn reprocess(
        &self,
        ctx: &Context,
        hi_anime_id: &str,
    ) -> Result<ReprocessResult, ReprocessError> {
        let failure = |error: String| ReprocessError {
            hi_anime_id: hi_anime_id.to_string(),
            error,
        };
        let success = |message: &str| ReprocessResult {
            hi_anime_id: hi_anime_id.to_string(),
            success: true,
            message: message.to_string(),
        };

        let mut detail = with_retry(ctx, DETAIL_ATTEMPTS, self.retry_delay, || {
            ctx.run(self.hianime.anime_info(hi_anime_id))
        })
        .await
        .map_err(|e| {
            failure(format!(
                "Failed to fetch anime details after {DETAIL_ATTEMPTS} attempts: {e}"
            ))
        })?;
        if detail.hi_anime_id.is_empty() {
            detail.hi_anime_id = hi_anime_id.to_string();
        }

        let existing = self
            .store
            .get_anime_by_hi_anime_id(hi_anime_id)
            .await
            .map_err(|e| failure(format!("Failed to check existing anime: {e}")))?;

        match existing {
            None => {
                self.store
                    .insert_anime(&detail, Utc::now())
                    .await
                    .map_err(|e| failure(format!("Failed to create new anime in database: {e}")))?;
                Ok(success(CREATED))
            }
            Some(row) if has_changes(&row, &detail) => {
                self.store
                    .update_anime(&row.id, &detail, Utc::now())
                    .await
                    .map_err(|e| failure(format!("Failed to update anime in database: {e}")))?;
                Ok(success(UPDATED))
            }
            Some(_) => Ok(success(UNCHANGED)),
        }
    }
}
