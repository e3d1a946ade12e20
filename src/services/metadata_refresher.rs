//! Background refresh of MAL metadata rows.
//!
//! Ids are deduplicated by an in-flight set, queued on a bounded channel and
//! drained by a fixed pool of workers that share one rate limiter.

use chrono::Utc;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clients::myanimelist::MalClient;
use crate::config::WorkersConfig;
use crate::constants::limits::METADATA_FETCH_TIMEOUT_SECS;
use crate::context::Context;
use crate::db::Store;
use crate::domain::MalId;
use crate::error::{CoreError, CoreResult};
use crate::services::rate_limiter::RateLimiter;

const SERVICE: &str = "myanimelist";

struct Inner {
    store: Store,
    mal: MalClient,
    limiter: RateLimiter,
    ttl: chrono::Duration,
    in_flight: Mutex<HashSet<i32>>,
    queue: mpsc::Sender<i32>,
}

/// Removes the id from the in-flight set when the worker is done with it,
/// whichever way it finishes.
struct InFlightGuard<'a> {
    set: &'a Mutex<HashSet<i32>>,
    id: i32,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

#[derive(Clone)]
pub struct MetadataRefresher {
    inner: Arc<Inner>,
}

impl MetadataRefresher {
    /// Builds the refresher and spawns its workers. Workers stop when
    /// `shutdown` is cancelled.
    #[must_use]
    pub fn spawn(
        store: Store,
        mal: MalClient,
        config: &WorkersConfig,
        shutdown: &CancellationToken,
    ) -> Self {
        let (tx, rx) = mpsc::channel(config.refresher_queue_capacity.max(1));
        let inner = Arc::new(Inner {
            store,
            mal,
            limiter: RateLimiter::per_minute(config.mal_requests_per_minute),
            ttl: chrono::Duration::days(i64::from(config.metadata_ttl_days)),
            in_flight: Mutex::new(HashSet::new()),
            queue: tx,
        });

        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        for worker_id in 0..config.refresher_workers.max(1) {
            let inner = Arc::clone(&inner);
            let rx = Arc::clone(&rx);
            let ctx = Context::with_token(shutdown.child_token());
            tokio::spawn(async move {
                loop {
                    let next = tokio::select! {
                        () = ctx.cancelled() => None,
                        id = async { rx.lock().await.recv().await } => id,
                    };
                    let Some(mal_id) = next else { break };
                    inner.process(&ctx, mal_id).await;
                }
                debug!(worker_id, "Metadata refresher worker stopped");
            });
        }

        info!(
            workers = config.refresher_workers,
            queue = config.refresher_queue_capacity,
            "Metadata refresher started"
        );

        Self { inner }
    }

    /// Queues `mal_id` for a background refresh. Unknown ids, ids already
    /// queued or running, and ids arriving while the queue is full are
    /// dropped.
    pub fn enqueue(&self, mal_id: i32) {
        if MalId::new(mal_id).is_none() {
            return;
        }

        {
            let mut in_flight = self
                .inner
                .in_flight
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if !in_flight.insert(mal_id) {
                return;
            }
        }

        if let Err(e) = self.inner.queue.try_send(mal_id) {
            self.inner
                .in_flight
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&mal_id);
            warn!(mal_id, error = %e, "Metadata refresh queue full, dropping request");
        }
    }

    pub fn enqueue_all<I: IntoIterator<Item = Option<i32>>>(&self, ids: I) {
        for id in ids.into_iter().flatten() {
            self.enqueue(id);
        }
    }

    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn ttl(&self) -> chrono::Duration {
        self.inner.ttl
    }

    /// Fetches and stores metadata for `mal_id` now, consuming one rate
    /// token. Fails with `RateLimited` rather than waiting past the fetch
    /// deadline.
    pub async fn refresh_blocking(&self, ctx: &Context, mal_id: i32) -> CoreResult<()> {
        let mal_id = MalId::new(mal_id)
            .ok_or_else(|| CoreError::invalid("mal_id", "must be positive"))?
            .value();

        self.inner
            .limiter
            .acquire_within(ctx, Duration::from_secs(METADATA_FETCH_TIMEOUT_SECS))
            .await?;
        self.inner.fetch_and_store(ctx, mal_id).await
    }
}

impl Inner {
    async fn process(&self, ctx: &Context, mal_id: i32) {
        let _guard = InFlightGuard {
            set: &self.in_flight,
            id: mal_id,
        };

        match self.store.get_anime_metadata(mal_id).await {
            Ok(Some(row)) if row.is_fresh(Utc::now(), self.ttl) => {
                debug!(mal_id, "Metadata still fresh, skipping");
                return;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(mal_id, error = %e, "Metadata lookup failed");
                return;
            }
        }

        if let Err(e) = self.limiter.acquire(ctx).await {
            debug!(mal_id, error = %e, "Rate limiter wait aborted");
            return;
        }

        match self.fetch_and_store(ctx, mal_id).await {
            Ok(()) => debug!(mal_id, "Metadata refreshed"),
            Err(e) => warn!(mal_id, kind = e.kind(), error = %e, "Metadata refresh failed"),
        }
    }

    async fn fetch_and_store(&self, ctx: &Context, mal_id: i32) -> CoreResult<()> {
        let metadata = ctx
            .run_with_timeout(
                SERVICE,
                Duration::from_secs(METADATA_FETCH_TIMEOUT_SECS),
                self.mal.anime_metadata(mal_id),
            )
            .await?;
        self.store
            .upsert_anime_metadata(metadata.into_model(Utc::now()))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::build_shared_http_client;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn workers() -> WorkersConfig {
        WorkersConfig {
            refresher_workers: 4,
            refresher_queue_capacity: 8,
            mal_requests_per_minute: 60_000,
            ..WorkersConfig::default()
        }
    }

    fn metadata_body(id: i32) -> serde_json::Value {
        serde_json::json!({
            "id": id,
            "title": "Shingeki no Kyojin",
            "synopsis": "Titans",
            "media_type": "tv",
            "num_episodes": 25,
            "mean": 8.5,
            "studios": [{"id": 858, "name": "Wit Studio"}],
            "start_season": {"year": 2013, "season": "spring"}
        })
    }

    async fn setup(server: &MockServer) -> (Store, MalClient) {
        let store = Store::with_pool_options("sqlite::memory:", 1, 1)
            .await
            .unwrap();
        let mal = MalClient::with_base_urls(
            build_shared_http_client().unwrap(),
            &server.uri(),
            &server.uri(),
            "client",
            "secret",
        );
        (store, mal)
    }

    async fn wait_idle(refresher: &MetadataRefresher) {
        for _ in 0..200 {
            if refresher.in_flight() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("refresher did not drain");
    }

    #[tokio::test]
    async fn duplicate_enqueues_collapse() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/anime/16498"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(metadata_body(16498))
                    .set_delay(Duration::from_millis(100)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let (store, mal) = setup(&server).await;
        let shutdown = CancellationToken::new();
        let refresher = MetadataRefresher::spawn(store.clone(), mal, &workers(), &shutdown);

        for _ in 0..5 {
            refresher.enqueue(16498);
        }
        refresher.enqueue(0);
        refresher.enqueue(-1);
        wait_idle(&refresher).await;

        let row = store.get_anime_metadata(16498).await.unwrap().unwrap();
        assert_eq!(row.total_episodes, 25);
        assert_eq!(row.studio, "Wit Studio");

        // Fresh rows are not fetched again.
        refresher.enqueue(16498);
        wait_idle(&refresher).await;
        shutdown.cancel();
    }

    #[tokio::test]
    async fn blocking_refresh_surfaces_upstream_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/anime/1"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let (store, mal) = setup(&server).await;
        let shutdown = CancellationToken::new();
        let refresher = MetadataRefresher::spawn(store.clone(), mal, &workers(), &shutdown);
        let ctx = Context::background();

        let err = refresher.refresh_blocking(&ctx, 1).await.unwrap_err();
        assert!(matches!(err, CoreError::UpstreamStatus { code: 502, .. }));
        assert!(store.get_anime_metadata(1).await.unwrap().is_none());

        let err = refresher.refresh_blocking(&ctx, 0).await.unwrap_err();
        assert!(matches!(err, CoreError::InvalidInput { .. }));
        shutdown.cancel();
    }
}
