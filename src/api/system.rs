use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

use super::{AppState, HealthResponse, HealthServices};

/// `GET /health`
///
/// 503 when the database does not answer. A failing cache only degrades the
/// report, since reads fall back to the source.
pub async fn health(State(state): State<Arc<AppState>>) -> Response {
    let db_ok = state.shared.store.ping().await.is_ok();

    let cache = if !state.shared.cache.is_enabled() {
        "disabled"
    } else if state.shared.cache.ping().await.is_ok() {
        "healthy"
    } else {
        "unhealthy"
    };

    let (status_code, status) = if db_ok {
        (StatusCode::OK, "healthy")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "unhealthy")
    };

    (
        status_code,
        Json(HealthResponse {
            status,
            timestamp: chrono::Utc::now().to_rfc3339(),
            services: HealthServices {
                database: if db_ok { "healthy" } else { "unhealthy" },
                cache,
            },
            version: env!("CARGO_PKG_VERSION"),
            uptime_seconds: state.start_time.elapsed().as_secs(),
        }),
    )
        .into_response()
}
