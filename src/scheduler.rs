use anyhow::{Context as _, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info};

use crate::config::SchedulerConfig;
use crate::context::Context;
use crate::services::library_sync::LibrarySync;
use crate::services::scraper::DeltaScraper;
use crate::services::token_refresher::TokenRefresher;

/// Work the scheduler triggers. Each entry point is also reachable from the
/// command line.
pub struct Jobs {
    pub delta: DeltaScraper,
    pub tokens: TokenRefresher,
    pub library: LibrarySync,
}

impl Jobs {
    pub async fn delta_scrape(&self, ctx: &Context) -> Result<()> {
        self.delta
            .run(ctx)
            .await
            .context("Delta scrape failed")?;
        Ok(())
    }

    pub async fn refresh_tokens(&self, ctx: &Context) -> Result<()> {
        self.tokens
            .run(ctx)
            .await
            .context("Token refresh failed")?;
        Ok(())
    }

    pub async fn retry_library_syncs(&self, ctx: &Context) -> Result<()> {
        let report = self
            .library
            .retry_failed(ctx)
            .await
            .context("Library sync retry failed")?;
        info!(
            attempted = report.attempted,
            succeeded = report.succeeded,
            "Library sync retry pass done"
        );
        Ok(())
    }
}

/// Runs `job` with the lifecycle events every scheduled job emits.
pub async fn run_logged<F>(job_name: &'static str, job: F) -> Result<()>
where
    F: Future<Output = Result<()>>,
{
    let start = Instant::now();
    info!(event = "job_started", job_name, "Starting scheduled job");

    let result = job.await;
    let duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
    match &result {
        Ok(()) => {
            metrics::counter!("scheduler_job_runs_total", "job" => job_name, "outcome" => "success")
                .increment(1);
            info!(event = "job_finished", job_name, duration_ms, "Scheduled job finished");
        }
        Err(e) => {
            metrics::counter!("scheduler_job_runs_total", "job" => job_name, "outcome" => "failure")
                .increment(1);
            error!(event = "job_failed", job_name, duration_ms, error = format!("{e:#}"), "Scheduled job failed");
        }
    }
    result
}

type JobFn = fn(Arc<Jobs>, Context) -> std::pin::Pin<Box<dyn Future<Output = Result<()>> + Send>>;

pub struct Scheduler {
    config: SchedulerConfig,
    jobs: Arc<Jobs>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl Scheduler {
    #[must_use]
    pub fn new(config: SchedulerConfig, jobs: Arc<Jobs>, shutdown: CancellationToken) -> Self {
        Self {
            config,
            jobs,
            shutdown,
            tracker: TaskTracker::new(),
        }
    }

    fn job(&self, cron: &str, job_name: &'static str, run: JobFn) -> Result<Job> {
        let jobs = Arc::clone(&self.jobs);
        let tracker = self.tracker.clone();
        let shutdown = self.shutdown.clone();

        Job::new_async(cron, move |_uuid, _lock| {
            let jobs = Arc::clone(&jobs);
            let tracker = tracker.clone();
            let ctx = Context::with_token(shutdown.child_token());
            Box::pin(async move {
                if ctx.is_cancelled() {
                    return;
                }
                // Errors are logged by run_logged.
                let _ = tracker.track_future(run_logged(job_name, run(jobs, ctx))).await;
            })
        })
        .with_context(|| format!("Invalid cron expression for {job_name}: {cron}"))
    }

    /// Registers the periodic jobs and blocks until shutdown. In-flight runs
    /// are awaited before returning.
    pub async fn run(&self) -> Result<()> {
        if !self.config.enabled {
            info!("Scheduler is disabled in config");
            return Ok(());
        }

        let mut sched = JobScheduler::new().await?;
        sched
            .add(self.job(&self.config.delta_cron, "delta_scrape", |jobs, ctx| {
                Box::pin(async move { jobs.delta_scrape(&ctx).await })
            })?)
            .await?;
        sched
            .add(self.job(&self.config.token_refresh_cron, "refresh_tokens", |jobs, ctx| {
                Box::pin(async move { jobs.refresh_tokens(&ctx).await })
            })?)
            .await?;
        sched
            .add(self.job(
                &self.config.library_retry_cron,
                "retry_library_syncs",
                |jobs, ctx| Box::pin(async move { jobs.retry_library_syncs(&ctx).await }),
            )?)
            .await?;
        sched.start().await?;

        info!(
            delta = %self.config.delta_cron,
            tokens = %self.config.token_refresh_cron,
            library_retry = %self.config.library_retry_cron,
            "Scheduler running"
        );

        self.shutdown.cancelled().await;
        info!("Stopping scheduler...");
        sched.shutdown().await?;
        self.tracker.close();
        self.tracker.wait().await;
        info!("Scheduler stopped");
        Ok(())
    }
}
