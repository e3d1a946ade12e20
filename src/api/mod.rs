use axum::{
    Router,
    http::HeaderValue,
    middleware,
    routing::{get, post},
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::context::{Context, Logger};
use crate::services::{AdminKey, AnimeService};
use crate::state::SharedState;

mod admin;
mod anime;
pub mod auth;
mod episodes;
mod error;
mod observability;
mod proxy;
mod system;
mod types;

pub use error::ApiError;
pub use types::*;

#[derive(Clone)]
pub struct AppState {
    pub shared: SharedState,

    pub admin_key: AdminKey,

    pub start_time: std::time::Instant,

    pub prometheus_handle: Option<PrometheusHandle>,
}

impl AppState {
    #[must_use]
    pub fn new(
        shared: SharedState,
        admin_key: AdminKey,
        prometheus_handle: Option<PrometheusHandle>,
    ) -> Arc<Self> {
        Arc::new(Self {
            shared,
            admin_key,
            start_time: std::time::Instant::now(),
            prometheus_handle,
        })
    }

    #[must_use]
    pub fn anime(&self) -> &dyn AnimeService {
        self.shared.anime_service.as_ref()
    }

    /// Request context: cancelled on shutdown, logging into the request span.
    #[must_use]
    pub fn context(&self) -> Context {
        Context::with_token(self.shared.shutdown.child_token())
            .with(Logger(tracing::Span::current()))
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    let cors_origins = state.shared.config.server.allowed_origins.clone();

    let admin_routes = create_admin_router(state.clone());

    let cors_layer = if cors_origins.iter().any(|o| o == "*") {
        CorsLayer::new().allow_origin(Any)
    } else {
        let origins: Vec<HeaderValue> =
            cors_origins.iter().filter_map(|s| s.parse().ok()).collect();
        CorsLayer::new().allow_origin(origins)
    };

    Router::new()
        .nest("/api", anime_routes())
        .nest("/__admin", admin_routes)
        .route(
            "/proxy",
            get(proxy::proxy_stream).options(proxy::preflight),
        )
        .route("/health", get(system::health))
        .route("/health/z", get(system::health))
        .route("/metrics", get(observability::get_metrics))
        .with_state(state)
        .layer(cors_layer.allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(observability::logging_middleware))
}

fn anime_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/anime/recently-updated", get(anime::recently_updated))
        .route("/anime/seasonal", get(anime::seasonal))
        .route("/anime/random", get(anime::random))
        .route("/anime/genres", get(anime::genres))
        .route("/anime/genres/{genre}", get(anime::by_genre))
        .route("/anime/search", get(anime::search))
        .route("/anime/trending", get(anime::trending))
        .route("/anime/popular", get(anime::popular))
        .route("/anime/years/{year}", get(anime::by_year))
        .route("/anime/seasons/{season}/{year}", get(anime::by_season))
        .route("/anime/{id}", get(anime::get_anime))
        .route("/anime/{id}/trailer", get(anime::trailer))
        .route("/anime/{id}/banner", get(anime::banner))
        .route("/anime/{id}/franchise", get(anime::franchise))
        .route("/anime/{id}/characters", get(anime::characters))
        .route("/anime/{id}/episodes", get(episodes::list_episodes))
        .route(
            "/anime/{id}/episodes/{episode_id}/servers",
            get(episodes::episode_servers),
        )
        .route(
            "/anime/{id}/episodes/{episode_id}/stream/{stream_type}",
            get(episodes::episode_stream),
        )
        .route(
            "/anime/{id}/episodes/{episode_id}/metadata/{stream_type}",
            get(episodes::stream_metadata),
        )
}

fn create_admin_router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/bulk-reprocess-anime-file",
            post(admin::bulk_reprocess_file),
        )
        .route("/bulk-reprocess-anime", post(admin::bulk_reprocess_ids))
        .route("/bulk-job/{job_id}", get(admin::job_status))
        .route("/bulk-job/{job_id}/result", get(admin::job_result))
        .route("/bulk-job/{job_id}/failed-ids", get(admin::job_failed_ids))
        .route("/bulk-job/{job_id}/download", get(admin::job_download))
        .route("/bulk-job/{job_id}/retry", post(admin::retry_job))
        .route_layer(middleware::from_fn_with_state(state, auth::auth_middleware))
}
