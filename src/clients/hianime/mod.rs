//! Catalog scraper for the hianime site and its embedded players.

mod megacloud;
mod parse;
mod token;

use rand::Rng;
use reqwest::Client;
use scraper::Html;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::clients::{send_json, send_text};
use crate::error::{CoreError, CoreResult};
pub use crate::models::pagination::{PageInfo, Pagination};
use parse::Selectors;

const SERVICE: &str = "hianime";
const HIANIME_BASE: &str = "https://hianimez.to";
const MEGAPLAY_BASE: &str = "https://megaplay.buzz";
const MEGACLOUD_KEYS_URL: &str =
    "https://raw.githubusercontent.com/yogesh-hacker/MegacloudKeys/refs/heads/main/keys.json";

const USER_AGENTS: [&str; 3] = [
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/92.0.4515.107 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/93.0.4577.63 Safari/537.36",
];

/// One catalog entry as scraped. Listing pages only fill the identity,
/// titles, poster and last episode.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapedAnime {
    pub hi_anime_id: String,
    pub ename: String,
    pub jname: String,
    pub poster_url: String,
    pub genre: String,
    pub mal_id: i32,
    pub anilist_id: i32,
    pub last_episode: i32,
    pub season: String,
    pub season_year: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapedEpisode {
    pub episode_id: String,
    pub title: String,
    pub number: i32,
    pub is_filler: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapedEpisodeServer {
    #[serde(rename = "type")]
    pub kind: String,
    pub server_name: String,
    pub server_id: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    #[serde(default)]
    pub start: i64,
    #[serde(default)]
    pub end: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    #[serde(default)]
    pub file: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub default: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamMetadata {
    pub server_name: String,
    pub hls: Option<String>,
    pub iframe: String,
    pub intro: Segment,
    pub outro: Segment,
    pub tracks: Vec<Track>,
}

/// Player backends. Selected by server name: `hd*` servers are served by
/// the megacloud embed, everything else by megaplay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamingProvider {
    Hianime,
    Megaplay,
}

impl StreamingProvider {
    #[must_use]
    pub fn from_server_name(name: &str) -> Self {
        let lower = name.trim().to_ascii_lowercase();
        if lower.starts_with("hd") {
            Self::Hianime
        } else {
            Self::Megaplay
        }
    }

    /// Referer/Origin expected by the provider's CDN.
    #[must_use]
    pub const fn cdn_origin(self) -> &'static str {
        match self {
            Self::Hianime => "https://megacloud.blog",
            Self::Megaplay => MEGAPLAY_BASE,
        }
    }
}

#[derive(Deserialize)]
struct HtmlEnvelope {
    #[serde(default)]
    html: String,
}

#[derive(Deserialize)]
struct SourceLink {
    link: String,
}

#[derive(Deserialize)]
struct MegaplaySources {
    sources: MegaplayFile,
    #[serde(default)]
    intro: Segment,
    #[serde(default)]
    outro: Segment,
    #[serde(default)]
    tracks: Vec<Track>,
}

#[derive(Deserialize)]
struct MegaplayFile {
    #[serde(default)]
    file: String,
}

#[derive(Deserialize)]
struct EmbedSources {
    #[serde(default)]
    sources: serde_json::Value,
    #[serde(default)]
    tracks: Vec<Track>,
    #[serde(default)]
    intro: Segment,
    #[serde(default)]
    outro: Segment,
    #[serde(default)]
    encrypted: bool,
}

#[derive(Deserialize)]
struct EmbedFile {
    file: String,
}

#[derive(Clone)]
pub struct HianimeClient {
    client: Client,
    base_url: String,
    megaplay_url: String,
    keys_url: String,
}

impl HianimeClient {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self::with_base_urls(client, HIANIME_BASE, MEGAPLAY_BASE, MEGACLOUD_KEYS_URL)
    }

    #[must_use]
    pub fn with_base_urls(client: Client, base: &str, megaplay: &str, keys: &str) -> Self {
        Self {
            client,
            base_url: base.trim_end_matches('/').to_string(),
            megaplay_url: megaplay.trim_end_matches('/').to_string(),
            keys_url: keys.to_string(),
        }
    }

    fn random_user_agent() -> &'static str {
        USER_AGENTS[rand::rng().random_range(0..USER_AGENTS.len())]
    }

    fn selectors() -> CoreResult<&'static Selectors> {
        Selectors::get().ok_or_else(|| CoreError::parse(SERVICE, "invalid CSS selector table"))
    }

    async fn document(&self, path: &str, referer: &str) -> CoreResult<String> {
        let request = self
            .client
            .get(format!("{}{path}", self.base_url))
            .header(reqwest::header::REFERER, referer)
            .header(reqwest::header::USER_AGENT, Self::random_user_agent());
        send_text(SERVICE, request).await
    }

    async fn ajax<T: serde::de::DeserializeOwned>(&self, path: &str, referer: &str) -> CoreResult<T> {
        let request = self
            .client
            .get(format!("{}{path}", self.base_url))
            .header(reqwest::header::REFERER, referer)
            .header(reqwest::header::USER_AGENT, Self::random_user_agent())
            .header("X-Requested-With", "XMLHttpRequest");
        send_json(SERVICE, request).await
    }

    async fn listing(&self, path: &str, referer: &str) -> CoreResult<Pagination<ScrapedAnime>> {
        let body = self.document(path, referer).await?;
        let s = Self::selectors()?;
        let doc = Html::parse_document(&body);
        Ok(Pagination {
            page_info: parse::page_info(&doc, s),
            items: parse::listing_items(&doc, s),
        })
    }

    pub async fn az_list(&self, page: u32) -> CoreResult<Pagination<ScrapedAnime>> {
        let referer = format!("{}/az-list", self.base_url);
        self.listing(&format!("/az-list?page={page}"), &referer).await
    }

    pub async fn recently_updated(&self, page: u32) -> CoreResult<Pagination<ScrapedAnime>> {
        let referer = format!("{}/home", self.base_url);
        self.listing(&format!("/recently-updated?page={page}"), &referer)
            .await
    }

    pub async fn anime_info(&self, hi_anime_id: &str) -> CoreResult<ScrapedAnime> {
        let body = self
            .document(&format!("/{hi_anime_id}"), &self.base_url)
            .await?;
        let s = Self::selectors()?;
        let doc = Html::parse_document(&body);
        Ok(parse::anime_info(&doc, s, hi_anime_id))
    }

    pub async fn episodes(&self, hi_anime_id: &str) -> CoreResult<Vec<ScrapedEpisode>> {
        let numeric_id = hi_anime_id.rsplit('-').next().unwrap_or(hi_anime_id);
        let referer = format!("{}/watch/{hi_anime_id}", self.base_url);
        let envelope: HtmlEnvelope = self
            .ajax(&format!("/ajax/v2/episode/list/{numeric_id}"), &referer)
            .await?;

        let s = Self::selectors()?;
        let doc = Html::parse_document(&envelope.html);
        Ok(parse::episodes(&doc, s))
    }

    pub async fn episode_servers(
        &self,
        hi_anime_id: &str,
        episode_id: &str,
    ) -> CoreResult<Vec<ScrapedEpisodeServer>> {
        let referer = format!("{}/watch/{hi_anime_id}", self.base_url);
        let envelope: HtmlEnvelope = self
            .ajax(
                &format!(
                    "/ajax/v2/episode/servers?episodeId={}",
                    urlencoding::encode(episode_id)
                ),
                &referer,
            )
            .await?;

        let s = Self::selectors()?;
        let doc = Html::parse_document(&envelope.html);
        Ok(parse::episode_servers(&doc, s, episode_id))
    }

    /// Resolves the raw HLS playlist for an episode through megaplay.
    pub async fn episode_stream(&self, episode_id: &str, stream_type: &str) -> CoreResult<String> {
        let sources = self.megaplay_sources(episode_id, stream_type).await?;
        Ok(sources.sources.file)
    }

    async fn megaplay_sources(
        &self,
        episode_id: &str,
        stream_type: &str,
    ) -> CoreResult<MegaplaySources> {
        let page_url = format!("{}/stream/s-2/{episode_id}/{stream_type}", self.megaplay_url);
        let body = send_text(
            SERVICE,
            self.client
                .get(&page_url)
                .header(reqwest::header::REFERER, &self.megaplay_url),
        )
        .await?;

        let media_id = {
            let s = Self::selectors()?;
            let doc = Html::parse_document(&body);
            parse::megaplay_media_id(&doc, s)
        }
        .ok_or_else(|| CoreError::parse(SERVICE, "no media id in megaplay player"))?;

        let sources: MegaplaySources = send_json(
            SERVICE,
            self.client
                .get(format!("{}/stream/getSources", self.megaplay_url))
                .query(&[("id", media_id.as_str())])
                .header(reqwest::header::REFERER, &self.megaplay_url)
                .header(reqwest::header::ORIGIN, &page_url)
                .header("X-Requested-With", "XMLHttpRequest"),
        )
        .await?;

        if sources.sources.file.is_empty() {
            return Err(CoreError::parse(SERVICE, "no sources in megaplay response"));
        }
        Ok(sources)
    }

    /// Intro/outro markers, subtitle tracks and the playlist for one
    /// episode. The first server of the requested type is used; a raw
    /// server satisfies a sub request.
    pub async fn stream_metadata(
        &self,
        hi_anime_id: &str,
        episode_id: &str,
        stream_type: &str,
    ) -> CoreResult<StreamMetadata> {
        let servers = self.episode_servers(hi_anime_id, episode_id).await?;
        let server = servers
            .iter()
            .find(|s| s.kind == stream_type || (stream_type == "sub" && s.kind == "raw"))
            .ok_or(CoreError::not_found("stream server"))?;

        self.stream_data(&server.server_id, stream_type, &server.server_name)
            .await
    }

    pub async fn stream_data(
        &self,
        server_id: &str,
        stream_type: &str,
        server_name: &str,
    ) -> CoreResult<StreamMetadata> {
        match StreamingProvider::from_server_name(server_name) {
            StreamingProvider::Megaplay => {
                let sources = self.megaplay_sources(server_id, stream_type).await?;
                Ok(StreamMetadata {
                    server_name: server_name.to_string(),
                    hls: Some(sources.sources.file),
                    iframe: format!("{}/stream/s-2/{server_id}/{stream_type}", self.megaplay_url),
                    intro: sources.intro,
                    outro: sources.outro,
                    tracks: sources.tracks,
                })
            }
            StreamingProvider::Hianime => self.megacloud_stream(server_id, server_name).await,
        }
    }

    async fn megacloud_stream(
        &self,
        server_id: &str,
        server_name: &str,
    ) -> CoreResult<StreamMetadata> {
        let link: SourceLink = self
            .ajax(
                &format!("/ajax/v2/episode/sources?id={}", urlencoding::encode(server_id)),
                &self.base_url,
            )
            .await?;

        let mut embed = Url::parse(&link.link).map_err(|e| CoreError::parse(SERVICE, e))?;
        let xrax = embed
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .unwrap_or_default()
            .to_string();
        let dir = embed
            .path()
            .rsplit_once('/')
            .map(|(dir, _)| dir.to_string())
            .unwrap_or_default();
        embed.set_path(&dir);
        embed.set_query(None);

        let embed_html = send_text(
            SERVICE,
            self.client
                .get(&link.link)
                .header(reqwest::header::REFERER, format!("{}/", self.base_url)),
        )
        .await?;
        let client_token = token::extract_client_token(&embed_html).unwrap_or_else(|| {
            tracing::debug!(server_id, "No client token on embed page");
            String::new()
        });

        let payload: EmbedSources = send_json(
            SERVICE,
            self.client
                .get(format!("{embed}/getSources"))
                .query(&[("id", xrax.as_str()), ("_k", client_token.as_str())]),
        )
        .await?;

        let hls = if payload.encrypted {
            let encrypted = match &payload.sources {
                serde_json::Value::String(s) => s.clone(),
                other => megacloud::unquote(&other.to_string()),
            };
            if encrypted.is_empty() {
                return Err(CoreError::parse(SERVICE, "no sources in encrypted response"));
            }
            let key = self.megacloud_key().await?;
            megacloud::decrypt(&encrypted, &client_token, &key)?
        } else {
            let files: Vec<EmbedFile> =
                serde_json::from_value(payload.sources).map_err(|e| CoreError::parse(SERVICE, e))?;
            files
                .into_iter()
                .next()
                .map(|f| f.file)
                .ok_or_else(|| CoreError::parse(SERVICE, "no sources in embed response"))?
        };

        Ok(StreamMetadata {
            server_name: server_name.to_string(),
            hls: Some(hls),
            iframe: link.link,
            intro: payload.intro,
            outro: payload.outro,
            tracks: payload.tracks,
        })
    }

    async fn megacloud_key(&self) -> CoreResult<String> {
        let keys: std::collections::HashMap<String, String> =
            send_json(SERVICE, self.client.get(&self.keys_url)).await?;
        keys.get("mega")
            .cloned()
            .ok_or_else(|| CoreError::parse(SERVICE, "no decryption key for 'mega'"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> HianimeClient {
        let uri = server.uri();
        HianimeClient::with_base_urls(
            Client::new(),
            &uri,
            &format!("{uri}/megaplay"),
            &format!("{uri}/keys.json"),
        )
    }

    #[test]
    fn provider_is_chosen_by_prefix() {
        assert_eq!(
            StreamingProvider::from_server_name("HD-1"),
            StreamingProvider::Hianime
        );
        assert_eq!(
            StreamingProvider::from_server_name("hd-2"),
            StreamingProvider::Hianime
        );
        assert_eq!(
            StreamingProvider::from_server_name("Megaplay"),
            StreamingProvider::Megaplay
        );
    }

    #[tokio::test]
    async fn recently_updated_parses_listing() {
        let server = MockServer::start().await;
        let html = r#"
            <div class="flw-item">
              <div class="film-poster"><div class="tick-sub">12</div>
                <img data-src="https://x/a.jpg"><a href="/watch/show-1"></a></div>
              <div class="film-detail"><h3 class="film-name"><a data-jname="Shou">Show</a></h3></div>
            </div>"#;
        Mock::given(method("GET"))
            .and(path("/recently-updated"))
            .and(query_param("page", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_string(html))
            .mount(&server)
            .await;

        let page = client_for(&server).recently_updated(1).await.unwrap();
        assert_eq!(page.page_info, PageInfo::single());
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].hi_anime_id, "show-1");
        assert_eq!(page.items[0].last_episode, 12);
    }

    #[tokio::test]
    async fn episodes_use_numeric_suffix() {
        let server = MockServer::start().await;
        let body = serde_json::json!({
            "html": r#"<div class="detail-infor-content"><div class="ss-list">
                <a title="One" data-number="1" href="/watch/naruto-677?ep=100"></a></div></div>"#
        });
        Mock::given(method("GET"))
            .and(path("/ajax/v2/episode/list/677"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&server)
            .await;

        let eps = client_for(&server).episodes("naruto-677").await.unwrap();
        assert_eq!(eps.len(), 1);
        assert_eq!(eps[0].episode_id, "100");
    }

    #[tokio::test]
    async fn episode_stream_follows_megaplay_chain() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/megaplay/stream/s-2/100/sub"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"<div id="megaplay-player" data-id="m-1"></div>"#),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/megaplay/stream/getSources"))
            .and(query_param("id", "m-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "sources": {"file": "https://cdn.example/master.m3u8"},
                "intro": {"start": 1, "end": 90},
                "tracks": []
            })))
            .mount(&server)
            .await;

        let url = client_for(&server).episode_stream("100", "sub").await.unwrap();
        assert_eq!(url, "https://cdn.example/master.m3u8");
    }

    #[tokio::test]
    async fn missing_player_is_a_parse_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/megaplay/stream/s-2/100/dub"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<p>gone</p>"))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .episode_stream("100", "dub")
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Parse { .. }));
    }

    #[tokio::test]
    async fn stream_metadata_reads_unencrypted_embed() {
        let server = MockServer::start().await;
        let uri = server.uri();
        Mock::given(method("GET"))
            .and(path("/ajax/v2/episode/servers"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "html": r#"<div class="server-item" data-type="sub" data-id="srv-9" data-server-id="4">HD-1</div>"#
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/ajax/v2/episode/sources"))
            .and(query_param("id", "srv-9"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "link": format!("{uri}/embed-2/v3/e-1/XYZ?k=1")
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/embed-2/v3/e-1/XYZ"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"<meta name="_gg_fb" content="tok">"#),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/embed-2/v3/e-1/getSources"))
            .and(query_param("id", "XYZ"))
            .and(query_param("_k", "tok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "sources": [{"file": "https://cdn.example/hd.m3u8"}],
                "tracks": [{"file": "https://cdn.example/en.vtt", "kind": "captions", "label": "English"}],
                "intro": {"start": 10, "end": 100},
                "outro": {"start": 1300, "end": 1400},
                "encrypted": false
            })))
            .mount(&server)
            .await;

        let meta = client_for(&server)
            .stream_metadata("show-1", "100", "sub")
            .await
            .unwrap();
        assert_eq!(meta.server_name, "HD-1");
        assert_eq!(meta.hls.as_deref(), Some("https://cdn.example/hd.m3u8"));
        assert_eq!(meta.intro, Segment { start: 10, end: 100 });
        assert_eq!(meta.tracks.len(), 1);
    }
}
