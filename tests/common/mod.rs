#![allow(dead_code)]

use aniways::api::{self, AppState};
use aniways::cache::Cache;
use aniways::clients::anilist::AnilistClient;
use aniways::clients::build_shared_http_client;
use aniways::clients::hianime::{HianimeClient, ScrapedAnime};
use aniways::clients::jikan::JikanClient;
use aniways::clients::myanimelist::MalClient;
use aniways::clients::shikimori::ShikimoriClient;
use aniways::config::Config;
use aniways::db::Store;
use aniways::entities::animes;
use aniways::services::AdminKey;
use aniways::state::{SharedState, Upstreams};
use axum::{
    Router,
    body::Body,
    http::{Request, Response},
};
use chrono::Utc;
use http_body_util::BodyExt;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;
use wiremock::MockServer;

pub const ADMIN_KEY: &str = "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";

pub struct TestApp {
    pub router: Router,
    pub state: SharedState,
    pub upstream: MockServer,
    shutdown: CancellationToken,
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn upstreams(uri: &str, cache: &Cache) -> Upstreams {
    let http = build_shared_http_client().unwrap();
    Upstreams {
        hianime: HianimeClient::with_base_urls(
            http.clone(),
            uri,
            &format!("{uri}/megaplay"),
            &format!("{uri}/keys.json"),
        ),
        mal: MalClient::with_base_urls(http.clone(), uri, uri, "client-id", "client-secret"),
        anilist: AnilistClient::with_endpoint(http.clone(), &format!("{uri}/graphql")),
        jikan: JikanClient::with_base_url(http.clone(), uri),
        shikimori: ShikimoriClient::with_base_url(http, cache.clone(), uri),
    }
}

pub async fn spawn_app() -> TestApp {
    let upstream = MockServer::start().await;

    let mut config = Config::default();
    config.database.url = "sqlite::memory:".to_string();
    config.workers.mal_requests_per_minute = 60_000;

    let store = Store::with_pool_options("sqlite::memory:", 1, 1)
        .await
        .expect("Failed to open in-memory database");
    let cache = Cache::disabled();
    let shutdown = CancellationToken::new();
    let upstreams = upstreams(&upstream.uri(), &cache);

    let mut state = SharedState::from_parts(config, store, cache, upstreams, shutdown.clone())
        .expect("Failed to build shared state");
    state.bulk = state.bulk.clone().with_retry_delay(Duration::from_millis(1));

    let admin_key = AdminKey::load_or_create(admin_key_file()).expect("admin key");
    let router = api::router(AppState::new(state.clone(), admin_key, None));

    TestApp {
        router,
        state,
        upstream,
        shutdown,
    }
}

/// Key file with a fixed key, so requests can authenticate.
fn admin_key_file() -> std::path::PathBuf {
    let path = std::env::temp_dir().join(format!("aniways-test-{}.key", uuid::Uuid::new_v4()));
    std::fs::write(&path, ADMIN_KEY).unwrap();
    path
}

impl TestApp {
    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(request).await.unwrap()
    }

    pub async fn get(&self, uri: &str) -> Response<Body> {
        self.send(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
    }

    pub async fn admin_get(&self, uri: &str) -> Response<Body> {
        self.send(
            Request::builder()
                .uri(uri)
                .header("Authorization", format!("Bearer {ADMIN_KEY}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    pub async fn admin_post_json(&self, uri: &str, body: &serde_json::Value) -> Response<Body> {
        self.send(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("Authorization", format!("Bearer {ADMIN_KEY}"))
                .header("Content-Type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    pub async fn seed(&self, hi_anime_id: &str, mal_id: i32) -> animes::Model {
        let scraped = ScrapedAnime {
            hi_anime_id: hi_anime_id.to_string(),
            ename: format!("{hi_anime_id} title"),
            jname: format!("{hi_anime_id} jname"),
            genre: "Action, Adventure".to_string(),
            mal_id,
            season: "fall".to_string(),
            season_year: 2002,
            last_episode: 220,
            ..ScrapedAnime::default()
        };
        self.state
            .store
            .insert_anime(&scraped, Utc::now())
            .await
            .unwrap()
    }
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

/// Scraped info page for one title.
pub fn info_page(title: &str, mal_id: i32, anilist_id: i32) -> String {
    format!(
        r#"<script id="syncData" type="application/json">{{"mal_id":"{mal_id}","anilist_id":"{anilist_id}"}}</script>
        <div class="film-poster"><img src="https://img.example/{mal_id}.jpg"></div>
        <h2 class="film-name dynamic-name" data-jname="{title}">{title}</h2>
        <div class="tick-item tick-sub">12</div>
        <div class="anisc-info">
          <div class="item item-list"><a href="/genre/action">Action</a></div>
          <div class="item item-title">
            <span class="item-head">Premiered:</span><span class="name">Spring 2013</span>
          </div>
        </div>"#
    )
}
