//! MyAnimeList REST adapter: anime metadata, trailer scraping, the user's
//! anime list and OAuth token refresh.

use chrono::{DateTime, Utc};
use reqwest::Client;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};

use crate::clients::{send, send_json, send_text};
use crate::domain::{LibraryStatus, Season};
use crate::entities::anime_metadata;
use crate::error::{CoreError, CoreResult};

const SERVICE: &str = "myanimelist";
const MAL_API: &str = "https://api.myanimelist.net/v2";
const MAL_WEB: &str = "https://myanimelist.net";
const CLIENT_ID_HEADER: &str = "X-MAL-CLIENT-ID";
const DEFAULT_LIST_LIMIT: u32 = 30;

const METADATA_FIELDS: &str = "alternative_titles,synopsis,main_picture,media_type,rating,\
average_episode_duration,status,num_episodes,studios,rank,mean,num_scoring_users,popularity,\
start_date,end_date,source,start_season";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Picture {
    #[serde(default)]
    pub medium: String,
    #[serde(default)]
    pub large: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AlternativeTitles {
    #[serde(default, rename = "en")]
    pub english: String,
    #[serde(default, rename = "ja")]
    pub japanese: String,
    #[serde(default)]
    pub synonyms: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Studio {
    pub id: i32,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StartSeason {
    #[serde(default)]
    pub year: i32,
    #[serde(default)]
    pub season: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MalAnimeMetadata {
    pub id: i32,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub main_picture: Option<Picture>,
    #[serde(default)]
    pub alternative_titles: Option<AlternativeTitles>,
    #[serde(default)]
    pub synopsis: String,
    #[serde(default)]
    pub media_type: String,
    #[serde(default)]
    pub rating: String,
    #[serde(default)]
    pub average_episode_duration: i32,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub num_episodes: i32,
    #[serde(default)]
    pub studios: Vec<Studio>,
    #[serde(default)]
    pub rank: i32,
    #[serde(default)]
    pub mean: f64,
    #[serde(default)]
    pub num_scoring_users: i32,
    #[serde(default)]
    pub popularity: i32,
    #[serde(default)]
    pub start_date: String,
    #[serde(default)]
    pub end_date: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub start_season: Option<StartSeason>,
}

fn or_unknown(value: &str) -> String {
    if value.is_empty() {
        "unknown".to_string()
    } else {
        value.to_string()
    }
}

impl MalAnimeMetadata {
    /// Builds the stored metadata row. The trailer is left unset; it is
    /// scraped separately on demand.
    #[must_use]
    pub fn into_model(self, now: DateTime<Utc>) -> anime_metadata::Model {
        let picture = self
            .main_picture
            .map(|p| if p.large.is_empty() { p.medium } else { p.large })
            .unwrap_or_default();

        let studio = self
            .studios
            .first()
            .map(|s| s.name.clone())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| "Unknown".to_string());

        let start_season = self.start_season.unwrap_or_default();
        let season = if start_season.season.is_empty() {
            Season::Unknown
        } else {
            Season::lossy(&start_season.season)
        };

        anime_metadata::Model {
            mal_id: self.id,
            description: self.synopsis,
            main_picture_url: picture,
            media_type: self.media_type,
            rating: or_unknown(&self.rating),
            airing_status: or_unknown(&self.status),
            avg_episode_duration: self.average_episode_duration,
            total_episodes: self.num_episodes,
            studio,
            rank: self.rank,
            mean: self.mean,
            scoring_users: self.num_scoring_users,
            popularity: self.popularity,
            airing_start_date: self.start_date,
            airing_end_date: self.end_date,
            source: self.source,
            season_year: start_season.year,
            season: season.to_string(),
            trailer_embed_url: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListStatus {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub num_watched_episodes: i32,
    #[serde(default)]
    pub updated_at: String,
}

impl ListStatus {
    #[must_use]
    pub fn library_status(&self) -> LibraryStatus {
        LibraryStatus::lossy(&self.status)
    }

    /// Remote update time, falling back to `now` when unparsable.
    #[must_use]
    pub fn updated_at_or(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(&self.updated_at)
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or(now)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnimeListEntry {
    pub node: MalAnimeMetadata,
    pub list_status: ListStatus,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AnimeList {
    #[serde(default)]
    pub data: Vec<AnimeListEntry>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
    #[serde(default)]
    pub token_type: String,
}

/// Query for one page of the authenticated user's list.
#[derive(Debug, Clone, Default)]
pub struct AnimeListQuery<'a> {
    pub status: Option<LibraryStatus>,
    pub sort: Option<&'a str>,
    pub page: u32,
    pub limit: u32,
}

#[derive(Clone)]
pub struct MalClient {
    client: Client,
    api_url: String,
    web_url: String,
    client_id: String,
    client_secret: String,
}

impl MalClient {
    #[must_use]
    pub fn new(client: Client, client_id: &str, client_secret: &str) -> Self {
        Self::with_base_urls(client, MAL_API, MAL_WEB, client_id, client_secret)
    }

    #[must_use]
    pub fn with_base_urls(
        client: Client,
        api_url: &str,
        web_url: &str,
        client_id: &str,
        client_secret: &str,
    ) -> Self {
        Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            web_url: web_url.trim_end_matches('/').to_string(),
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
        }
    }

    pub async fn anime_metadata(&self, mal_id: i32) -> CoreResult<MalAnimeMetadata> {
        let request = self
            .client
            .get(format!("{}/anime/{mal_id}", self.api_url))
            .query(&[("fields", METADATA_FIELDS)])
            .header(CLIENT_ID_HEADER, &self.client_id);

        let metadata: MalAnimeMetadata = send_json(SERVICE, request).await?;
        if metadata.id != mal_id {
            return Err(CoreError::parse(
                SERVICE,
                format!("requested id {mal_id}, got {}", metadata.id),
            ));
        }
        Ok(metadata)
    }

    /// Scrapes the embed link of the promotional video from the anime page.
    pub async fn trailer(&self, mal_id: i32) -> CoreResult<String> {
        let body = send_text(
            SERVICE,
            self.client.get(format!("{}/anime/{mal_id}", self.web_url)),
        )
        .await?;

        let selector =
            Selector::parse("a.iframe").map_err(|e| CoreError::parse(SERVICE, e))?;
        let doc = Html::parse_document(&body);
        doc.select(&selector)
            .next()
            .and_then(|a| a.value().attr("href"))
            .filter(|href| !href.is_empty())
            .map(ToString::to_string)
            .ok_or(CoreError::not_found("trailer"))
    }

    pub async fn anime_list(&self, token: &str, query: AnimeListQuery<'_>) -> CoreResult<AnimeList> {
        let limit = if query.limit == 0 {
            DEFAULT_LIST_LIMIT
        } else {
            query.limit
        };
        let offset = query.page.saturating_sub(1) * limit;

        let mut params = vec![
            ("limit", limit.to_string()),
            ("offset", offset.to_string()),
            ("fields", "list_status".to_string()),
        ];
        if let Some(status) = query.status {
            params.push(("status", status.to_string()));
        }
        if let Some(sort) = query.sort.filter(|s| !s.is_empty()) {
            params.push(("sort", sort.to_string()));
        }

        let request = self
            .client
            .get(format!("{}/users/@me/animelist", self.api_url))
            .query(&params)
            .bearer_auth(token);
        send_json(SERVICE, request).await
    }

    /// Upserts the list entry. Absent fields are left untouched remotely.
    pub async fn update_list(
        &self,
        token: &str,
        mal_id: i32,
        status: Option<LibraryStatus>,
        watched_episodes: Option<i32>,
    ) -> CoreResult<()> {
        let mut form: Vec<(&str, String)> = Vec::with_capacity(2);
        if let Some(status) = status {
            form.push(("status", status.to_string()));
        }
        if let Some(watched) = watched_episodes.filter(|n| *n >= 0) {
            form.push(("num_watched_episodes", watched.to_string()));
        }

        let request = self
            .client
            .patch(self.list_status_url(mal_id))
            .bearer_auth(token)
            .form(&form);
        send(SERVICE, request).await.map(drop)
    }

    /// Removes the entry. A missing entry is already the desired state.
    pub async fn delete_list(&self, token: &str, mal_id: i32) -> CoreResult<()> {
        let request = self
            .client
            .delete(self.list_status_url(mal_id))
            .bearer_auth(token);
        match send(SERVICE, request).await {
            Ok(_) | Err(CoreError::UpstreamStatus { code: 404, .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub async fn refresh_token(&self, refresh_token: &str) -> CoreResult<TokenResponse> {
        let form = [
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ];
        let request = self
            .client
            .post(format!("{}/v1/oauth2/token", self.web_url))
            .form(&form);
        send_json(SERVICE, request).await
    }

    fn list_status_url(&self, mal_id: i32) -> String {
        format!("{}/anime/{mal_id}/my_list_status", self.api_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::build_shared_http_client;
    use wiremock::matchers::{body_string_contains, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn client_for(server: &MockServer) -> MalClient {
        MalClient::with_base_urls(
            build_shared_http_client().unwrap(),
            &server.uri(),
            &server.uri(),
            "cid",
            "secret",
        )
    }

    fn metadata_json(id: i32) -> serde_json::Value {
        serde_json::json!({
            "id": id,
            "title": "Attack on Titan",
            "main_picture": {"medium": "https://cdn/m.jpg", "large": ""},
            "synopsis": "Walls.",
            "media_type": "tv",
            "rating": "",
            "status": "finished_airing",
            "num_episodes": 25,
            "studios": [{"id": 858, "name": "Wit Studio"}],
            "mean": 8.54,
            "start_season": {"year": 2013, "season": "spring"}
        })
    }

    #[tokio::test]
    async fn fetches_metadata_with_client_id_header() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/anime/16498"))
            .and(header(CLIENT_ID_HEADER, "cid"))
            .and(query_param("fields", METADATA_FIELDS))
            .respond_with(ResponseTemplate::new(200).set_body_json(metadata_json(16498)))
            .expect(1)
            .mount(&server)
            .await;

        let metadata = client_for(&server).await.anime_metadata(16498).await.unwrap();
        let row = metadata.into_model(Utc::now());

        assert_eq!(row.mal_id, 16498);
        assert_eq!(row.main_picture_url, "https://cdn/m.jpg");
        assert_eq!(row.rating, "unknown");
        assert_eq!(row.airing_status, "finished_airing");
        assert_eq!(row.studio, "Wit Studio");
        assert_eq!(row.season, "spring");
        assert_eq!(row.season_year, 2013);
        assert!(row.trailer_embed_url.is_none());
    }

    #[tokio::test]
    async fn id_mismatch_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/anime/1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(metadata_json(2)))
            .mount(&server)
            .await;

        let err = client_for(&server).await.anime_metadata(1).await.unwrap_err();
        assert!(matches!(err, CoreError::Parse { .. }));
    }

    #[test]
    fn empty_studio_list_maps_to_unknown() {
        let row = MalAnimeMetadata {
            id: 5,
            ..Default::default()
        }
        .into_model(Utc::now());
        assert_eq!(row.studio, "Unknown");
        assert_eq!(row.season, "unknown");
        assert_eq!(row.airing_status, "unknown");
    }

    #[tokio::test]
    async fn trailer_is_scraped_from_anchor() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/anime/5"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<div class="video-promotion"><a class="iframe" href="https://youtube.com/embed/x"></a></div>"#,
            ))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/anime/6"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<p>none</p>"))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        assert_eq!(client.trailer(5).await.unwrap(), "https://youtube.com/embed/x");
        assert!(matches!(
            client.trailer(6).await,
            Err(CoreError::NotFound { entity: "trailer" })
        ));
    }

    #[tokio::test]
    async fn list_paging_uses_offset() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/@me/animelist"))
            .and(query_param("limit", "100"))
            .and(query_param("offset", "200"))
            .and(header("authorization", "Bearer tok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{
                    "node": {"id": 21, "title": "One Piece"},
                    "list_status": {"status": "on_hold", "num_watched_episodes": 40, "updated_at": "2024-01-02T03:04:05+00:00"}
                }]
            })))
            .mount(&server)
            .await;

        let list = client_for(&server)
            .await
            .anime_list(
                "tok",
                AnimeListQuery {
                    page: 3,
                    limit: 100,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(list.data.len(), 1);
        let entry = &list.data[0];
        assert_eq!(entry.node.id, 21);
        assert_eq!(entry.list_status.library_status(), LibraryStatus::OnHold);
        assert_eq!(entry.list_status.num_watched_episodes, 40);
    }

    #[tokio::test]
    async fn update_sends_only_present_fields() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/anime/21/my_list_status"))
            .and(body_string_contains("status=completed"))
            .and(body_string_contains("num_watched_episodes=12"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        client_for(&server)
            .await
            .update_list("tok", 21, Some(LibraryStatus::Completed), Some(12))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn update_surfaces_upstream_status() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .await
            .update_list("tok", 21, None, Some(3))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::UpstreamStatus { code: 502, .. }));
    }

    #[tokio::test]
    async fn delete_treats_missing_entry_as_done() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/anime/21/my_list_status"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        client_for(&server).await.delete_list("tok", 21).await.unwrap();
    }

    #[tokio::test]
    async fn refresh_posts_grant() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/oauth2/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=old"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "new-access",
                "refresh_token": "new-refresh",
                "expires_in": 2_678_400,
                "token_type": "Bearer"
            })))
            .mount(&server)
            .await;

        let token = client_for(&server).await.refresh_token("old").await.unwrap();
        assert_eq!(token.access_token, "new-access");
        assert_eq!(token.expires_in, 2_678_400);
    }
}
