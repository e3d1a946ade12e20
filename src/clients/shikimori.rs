//! Franchise graphs from Shikimori, cached per anchor.
//!
//! Every member of a fetched franchise gets a `derived_from` pointer to the
//! anchor it was fetched for, so any member resolves to the same cache line.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::cache::Cache;
use crate::clients::send_json;
use crate::constants::cache::FRANCHISE_TTL;
use crate::error::CoreResult;

const SERVICE: &str = "shikimori";
const SHIKIMORI_API: &str = "https://shikimori.one/api";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FranchiseLink {
    #[serde(default)]
    pub id: i64,
    pub source_id: i32,
    pub target_id: i32,
    #[serde(default)]
    pub relation: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FranchiseNode {
    pub id: i32,
    #[serde(default)]
    pub weight: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Franchise {
    #[serde(default)]
    pub links: Vec<FranchiseLink>,
    #[serde(default)]
    pub nodes: Vec<FranchiseNode>,
    #[serde(default)]
    pub current_id: i32,
}

fn franchise_key(anchor: i32) -> String {
    format!("shikimori:franchise:{anchor}")
}

fn derived_from_key(mal_id: i32) -> String {
    format!("shikimori:derived_from:{mal_id}")
}

#[derive(Clone)]
pub struct ShikimoriClient {
    client: Client,
    base_url: String,
    cache: Cache,
}

impl ShikimoriClient {
    #[must_use]
    pub fn new(client: Client, cache: Cache) -> Self {
        Self::with_base_url(client, cache, SHIKIMORI_API)
    }

    #[must_use]
    pub fn with_base_url(client: Client, cache: Cache, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            cache,
        }
    }

    /// Uncached upstream call.
    pub async fn fetch_franchise(&self, mal_id: i32) -> CoreResult<Franchise> {
        let request = self
            .client
            .get(format!("{}/animes/{mal_id}/franchise", self.base_url))
            .header(reqwest::header::ACCEPT, "application/json");
        send_json(SERVICE, request).await
    }

    /// Franchise containing `mal_id`, served from the anchor's cache line
    /// when any member has been fetched before.
    pub async fn franchise(&self, mal_id: i32) -> CoreResult<Franchise> {
        let anchor = match self.cache.get::<i32>(&derived_from_key(mal_id)).await {
            Ok(Some(anchor)) => anchor,
            Ok(None) => mal_id,
            Err(e) => {
                warn!(mal_id, error = %e, "Franchise anchor lookup failed");
                mal_id
            }
        };

        let key = franchise_key(anchor);
        match self.cache.get::<Franchise>(&key).await {
            Ok(Some(franchise)) => return Ok(franchise),
            Ok(None) => {}
            Err(e) => warn!(anchor, error = %e, "Franchise cache read failed"),
        }

        let franchise = self.fetch_franchise(anchor).await?;

        let mut pipe = self.cache.pipeline();
        let queued = pipe.set(&key, &franchise, FRANCHISE_TTL).and_then(|pipe| {
            for node in &franchise.nodes {
                pipe.set(&derived_from_key(node.id), &anchor, FRANCHISE_TTL)?;
            }
            Ok(())
        });
        if let Err(e) = queued {
            warn!(anchor, error = %e, "Failed to queue franchise cache writes");
        } else if let Err(e) = pipe.exec().await {
            warn!(anchor, error = %e, "Franchise cache write failed");
        }

        Ok(franchise)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::build_shared_http_client;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn fetches_and_decodes_franchise() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/animes/11061/franchise"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "links": [
                    {"id": 1, "source_id": 11061, "target_id": 20583, "relation": "sequel"},
                    {"id": 2, "source_id": 20583, "target_id": 11061, "relation": "prequel"}
                ],
                "nodes": [{"id": 11061, "weight": 10}, {"id": 20583, "weight": 8}],
                "current_id": 11061
            })))
            .expect(2)
            .mount(&server)
            .await;

        let client = ShikimoriClient::with_base_url(
            build_shared_http_client().unwrap(),
            Cache::disabled(),
            &server.uri(),
        );

        let franchise = client.franchise(11061).await.unwrap();
        assert_eq!(franchise.nodes.len(), 2);
        assert_eq!(franchise.links[0].relation, "sequel");

        // Without a cache every call reaches upstream.
        client.franchise(11061).await.unwrap();
    }
}
