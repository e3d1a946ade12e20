pub mod anilist;
pub mod hianime;
pub mod jikan;
pub mod myanimelist;
pub mod shikimori;

use reqwest::{Client, Response};
use serde::de::DeserializeOwned;

use crate::constants::http as http_consts;
use crate::error::{CoreError, CoreResult};

/// Builds the HTTP client shared by every upstream adapter.
///
/// Transparent compression stays off: reqwest is built without the
/// gzip/brotli features.
pub fn build_shared_http_client() -> anyhow::Result<Client> {
    Client::builder()
        .timeout(http_consts::REQUEST_TIMEOUT)
        .user_agent(http_consts::USER_AGENT)
        .pool_max_idle_per_host(http_consts::POOL_MAX_IDLE_PER_HOST)
        .pool_idle_timeout(http_consts::POOL_IDLE_TIMEOUT)
        .build()
        .map_err(|e| anyhow::anyhow!("Failed to build shared HTTP client: {e}"))
}

/// Sends a prepared request and fails on any non-2xx status.
pub(crate) async fn send(
    service: &'static str,
    request: reqwest::RequestBuilder,
) -> CoreResult<Response> {
    let response = request
        .send()
        .await
        .map_err(|e| CoreError::from_reqwest(service, &e))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        tracing::debug!(service, status = status.as_u16(), body = %truncate(&body, 256), "Upstream error response");
        return Err(CoreError::UpstreamStatus {
            service,
            code: status.as_u16(),
        });
    }

    Ok(response)
}

/// Sends and decodes a JSON body. The body is read fully before decoding.
pub(crate) async fn send_json<T: DeserializeOwned>(
    service: &'static str,
    request: reqwest::RequestBuilder,
) -> CoreResult<T> {
    let body = send_text(service, request).await?;
    serde_json::from_str(&body).map_err(|e| CoreError::parse(service, e))
}

pub(crate) async fn send_text(
    service: &'static str,
    request: reqwest::RequestBuilder,
) -> CoreResult<String> {
    send(service, request)
        .await?
        .text()
        .await
        .map_err(|e| CoreError::from_reqwest(service, &e))
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
