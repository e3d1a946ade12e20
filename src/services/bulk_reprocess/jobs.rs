use chrono::{DateTime, SecondsFormat, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::domain::BulkJobStatus;
use crate::models::bulk::{BulkJobResultDto, BulkJobStatusDto, ReprocessError, ReprocessResult};

#[derive(Debug)]
pub struct BulkJob {
    pub id: String,
    pub status: BulkJobStatus,
    pub total: usize,
    pub processed: usize,
    pub success: usize,
    pub failed: usize,
    pub message: String,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub ids: Vec<String>,
    pub results: Vec<ReprocessResult>,
    pub errors: Vec<ReprocessError>,
}

fn rfc3339(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

impl BulkJob {
    fn new(ids: Vec<String>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            status: BulkJobStatus::Pending,
            total: ids.len(),
            processed: 0,
            success: 0,
            failed: 0,
            message: "Job created, waiting to start".to_string(),
            started_at: now,
            updated_at: now,
            ids,
            results: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Percentage of processed ids, 0 for an empty job.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn progress(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.processed as f64 * 100.0 / self.total as f64
    }

    #[must_use]
    pub fn failed_ids(&self) -> Vec<String> {
        self.errors.iter().map(|e| e.hi_anime_id.clone()).collect()
    }

    #[must_use]
    pub fn to_status(&self) -> BulkJobStatusDto {
        BulkJobStatusDto {
            job_id: self.id.clone(),
            status: self.status,
            total: self.total,
            processed: self.processed,
            success: self.success,
            failed: self.failed,
            progress: self.progress(),
            message: self.message.clone(),
            started_at: rfc3339(self.started_at),
            updated_at: rfc3339(self.updated_at),
        }
    }

    #[must_use]
    pub fn to_result(&self) -> BulkJobResultDto {
        BulkJobResultDto {
            job_id: self.id.clone(),
            status: self.status,
            total: self.total,
            processed: self.processed,
            success: self.success,
            failed: self.failed,
            started_at: rfc3339(self.started_at),
            updated_at: rfc3339(self.updated_at),
            results: self.results.clone(),
            errors: self.errors.clone(),
            failed_ids: self.failed_ids(),
        }
    }

    fn touch(&mut self, message: impl Into<String>) {
        self.message = message.into();
        self.updated_at = Utc::now();
    }
}

pub type JobHandle = Arc<RwLock<BulkJob>>;

/// In-memory registry of bulk jobs. Jobs live until the process exits.
#[derive(Clone, Default)]
pub struct JobManager {
    jobs: Arc<RwLock<HashMap<String, JobHandle>>>,
}

impl JobManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create(&self, ids: Vec<String>) -> JobHandle {
        let job = BulkJob::new(ids);
        let id = job.id.clone();
        let handle = Arc::new(RwLock::new(job));
        self.jobs.write().await.insert(id, Arc::clone(&handle));
        handle
    }

    pub async fn get(&self, id: &str) -> Option<JobHandle> {
        self.jobs.read().await.get(id).cloned()
    }
}

/// Seeds a pending job with results finished elsewhere. They count as
/// processed successes.
pub async fn carry_over(job: &JobHandle, results: Vec<ReprocessResult>) {
    let mut job = job.write().await;
    if job.status != BulkJobStatus::Pending {
        return;
    }
    job.processed += results.len();
    job.total += results.len();
    job.results.extend(results);
    job.success = job.results.len();
}

/// Transitions below leave terminal jobs untouched.
///
/// `pending` is the number of ids still to process; ids carried over
/// before the start stay in the total.
pub async fn start(job: &JobHandle, pending: usize) {
    let mut job = job.write().await;
    if job.status.is_terminal() {
        return;
    }
    job.status = BulkJobStatus::Running;
    job.total = job.processed + pending;
    let total = job.total;
    job.touch(format!("Job initialized with {total} anime IDs"));
}

pub async fn record_chunk(
    job: &JobHandle,
    chunk_len: usize,
    results: Vec<ReprocessResult>,
    errors: Vec<ReprocessError>,
) {
    let mut job = job.write().await;
    if job.status.is_terminal() {
        return;
    }
    job.processed += chunk_len;
    job.results.extend(results);
    job.errors.extend(errors);
    job.success = job.results.len();
    job.failed = job.errors.len();
    let message = format!("Processed {}/{} anime IDs", job.processed, job.total);
    job.touch(message);
}

pub async fn complete(job: &JobHandle) {
    let mut job = job.write().await;
    if job.status.is_terminal() {
        return;
    }
    job.status = BulkJobStatus::Completed;
    job.processed = job.total;
    let message = if job.errors.is_empty() {
        "All anime processed successfully".to_string()
    } else {
        format!("Job completed with {} failures", job.errors.len())
    };
    job.touch(message);
}

pub async fn fail(job: &JobHandle, reason: &str) {
    let mut job = job.write().await;
    if job.status.is_terminal() {
        return;
    }
    job.status = BulkJobStatus::Failed;
    job.touch(format!("Job failed: {reason}"));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(id: &str) -> ReprocessResult {
        ReprocessResult {
            hi_anime_id: id.to_string(),
            success: true,
            message: "Successfully created new anime".to_string(),
        }
    }

    fn err(id: &str) -> ReprocessError {
        ReprocessError {
            hi_anime_id: id.to_string(),
            error: "boom".to_string(),
        }
    }

    #[tokio::test]
    async fn progress_follows_chunks() {
        let manager = JobManager::new();
        let job = manager.create(vec!["a".into(), "b".into(), "c".into(), "d".into()]).await;
        start(&job, 4).await;
        record_chunk(&job, 1, vec![ok("a")], vec![]).await;

        let status = job.read().await.to_status();
        assert_eq!(status.status, BulkJobStatus::Running);
        assert!((status.progress - 25.0).abs() < f64::EPSILON);
        assert_eq!(status.message, "Processed 1/4 anime IDs");

        record_chunk(&job, 3, vec![ok("b")], vec![err("c"), err("d")]).await;
        complete(&job).await;

        let job = job.read().await;
        assert_eq!(job.status, BulkJobStatus::Completed);
        assert_eq!(job.message, "Job completed with 2 failures");
        assert_eq!(job.failed_ids(), vec!["c".to_string(), "d".to_string()]);
        assert_eq!((job.success, job.failed), (2, 2));
    }

    #[tokio::test]
    async fn carried_results_count_as_processed() {
        let manager = JobManager::new();
        let job = manager.create(vec!["c".into()]).await;
        carry_over(&job, vec![ok("a"), ok("b")]).await;
        start(&job, 1).await;
        {
            let job = job.read().await;
            assert_eq!((job.total, job.processed, job.success), (3, 2, 2));
            assert_eq!(job.message, "Job initialized with 3 anime IDs");
        }

        record_chunk(&job, 1, vec![], vec![err("c")]).await;
        complete(&job).await;

        let job = job.read().await;
        assert_eq!(job.processed, job.success + job.failed);
        assert_eq!((job.total, job.processed), (3, 3));
        assert_eq!((job.success, job.failed), (2, 1));
    }

    #[tokio::test]
    async fn terminal_states_are_absorbing() {
        let manager = JobManager::new();
        let job = manager.create(Vec::new()).await;
        fail(&job, "expected JSON array").await;
        start(&job, 3).await;
        complete(&job).await;

        let job = job.read().await;
        assert_eq!(job.status, BulkJobStatus::Failed);
        assert_eq!(job.message, "Job failed: expected JSON array");
        assert_eq!(job.total, 0);
    }

    #[tokio::test]
    async fn lookup_by_id() {
        let manager = JobManager::new();
        let job = manager.create(vec!["x".into()]).await;
        let id = job.read().await.id.clone();
        assert!(manager.get(&id).await.is_some());
        assert!(manager.get("missing").await.is_none());
    }
}
