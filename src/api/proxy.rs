use axum::{
    body::Body,
    extract::{Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use std::sync::Arc;

use super::{ApiError, AppState};
use crate::services::proxy::{
    PLAYLIST_CACHE_CONTROL, SEGMENT_CACHE_CONTROL, content_type_for, decode_target, extension,
    is_playlist, rewrite_playlist,
};

#[derive(Debug, Deserialize)]
pub struct ProxyQuery {
    pub p: Option<String>,
    #[serde(default)]
    pub s: String,
}

/// Headers that describe the upstream connection rather than the payload.
fn is_hop_by_hop(name: &header::HeaderName) -> bool {
    name == header::CONNECTION
        || name == header::TRANSFER_ENCODING
        || name == header::UPGRADE
        || name == header::TE
}

pub async fn preflight() -> impl IntoResponse {
    (
        StatusCode::NO_CONTENT,
        [
            (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
            (header::ACCESS_CONTROL_ALLOW_METHODS, "GET, OPTIONS"),
            (header::ACCESS_CONTROL_ALLOW_HEADERS, "*"),
        ],
    )
}

pub async fn proxy_stream(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ProxyQuery>,
) -> Result<Response, ApiError> {
    let encoded = query
        .p
        .filter(|p| !p.is_empty())
        .ok_or_else(|| ApiError::validation("Missing p parameter"))?;
    let target = decode_target(&encoded)?;
    let ext = extension(target.path());

    let upstream = state
        .shared
        .proxy
        .fetch(&target, &query.s)
        .await
        .map_err(ApiError::upstream)?;
    let status = upstream.status();
    let playlist = is_playlist(&ext);

    let mut headers = HeaderMap::new();
    for (name, value) in upstream.headers() {
        if is_hop_by_hop(name) {
            continue;
        }
        if playlist && name == header::CONTENT_LENGTH {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    if !headers.contains_key(header::CONTENT_TYPE) {
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static(content_type_for(&ext)),
        );
    }

    let body = if playlist && status.is_success() {
        headers.insert(
            header::CACHE_CONTROL,
            HeaderValue::from_static(PLAYLIST_CACHE_CONTROL),
        );
        Body::from_stream(rewrite_playlist(
            Box::pin(upstream.bytes_stream()),
            target,
            query.s,
        ))
    } else {
        if status.is_success() {
            headers.insert(
                header::CACHE_CONTROL,
                HeaderValue::from_static(SEGMENT_CACHE_CONTROL),
            );
        }
        Body::from_stream(upstream.bytes_stream())
    };

    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    Ok(response)
}
