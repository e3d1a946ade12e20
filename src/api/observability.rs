use crate::api::AppState;
use axum::{
    extract::{MatchedPath, Request, State},
    http::{StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use std::time::Instant;
use tracing::{Instrument, info, info_span};
use uuid::Uuid;

pub async fn get_metrics(State(state): State<Arc<AppState>>) -> Response {
    match &state.prometheus_handle {
        Some(handle) => handle.render().into_response(),
        None => (StatusCode::NOT_FOUND, "Metrics not enabled").into_response(),
    }
}

/// Which part of the HTTP surface a route belongs to.
fn surface(route: Option<&str>) -> &'static str {
    match route {
        Some(r) if r.starts_with("/api/") => "catalog",
        Some(r) if r.starts_with("/__admin/") => "admin",
        Some("/proxy") => "proxy",
        Some(_) => "system",
        None => "unmatched",
    }
}

fn outcome(status: StatusCode) -> &'static str {
    if status.is_server_error() {
        "error"
    } else if status.is_client_error() {
        "client_error"
    } else {
        "success"
    }
}

pub async fn logging_middleware(req: Request, next: Next) -> Response {
    let started = Instant::now();

    // Proxy targets and ids stay out of metric labels, so only the route template is used.
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|m| m.as_str().to_owned());
    let method = req.method().clone();
    let user_agent = req
        .headers()
        .get(header::USER_AGENT)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("unknown")
        .to_owned();
    let surface = surface(route.as_deref());

    let span = info_span!(
        "request",
        request_id = %Uuid::new_v4(),
        method = %method,
        path = %req.uri().path(),
        route = route.as_deref(),
        surface,
        user_id = tracing::field::Empty,
    );

    async move {
        let response = next.run(req).await;
        let status = response.status();
        let elapsed = started.elapsed();

        let labels = [
            ("method", method.to_string()),
            ("route", route.unwrap_or_else(|| "unmatched".to_owned())),
            ("surface", surface.to_owned()),
            ("status", status.as_u16().to_string()),
        ];
        metrics::counter!("aniways_http_requests_total", &labels).increment(1);
        metrics::histogram!("aniways_http_request_duration_seconds", &labels)
            .record(elapsed.as_secs_f64());

        info!(
            event = "http_request_finished",
            duration_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            status_code = status.as_u16(),
            user_agent = %user_agent,
            outcome = outcome(status),
            "Request finished"
        );

        response
    }
    .instrument(span)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routes_map_to_surfaces() {
        assert_eq!(surface(Some("/api/anime/{id}")), "catalog");
        assert_eq!(surface(Some("/__admin/bulk-job/{job_id}")), "admin");
        assert_eq!(surface(Some("/proxy")), "proxy");
        assert_eq!(surface(Some("/health")), "system");
        assert_eq!(surface(None), "unmatched");
    }

    #[test]
    fn statuses_map_to_outcomes() {
        assert_eq!(outcome(StatusCode::OK), "success");
        assert_eq!(outcome(StatusCode::NOT_FOUND), "client_error");
        assert_eq!(outcome(StatusCode::BAD_GATEWAY), "error");
    }
}
