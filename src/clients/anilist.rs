//! AniList GraphQL adapter: catalog pages used by the listings and the
//! authenticated user's media list.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use lru::LruCache;
use serde_json::{Value, json};
use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::clients::send_json;
use crate::domain::LibraryStatus;
use crate::error::{CoreError, CoreResult};

const SERVICE: &str = "anilist";
const ANILIST_API: &str = "https://graphql.anilist.co";
/// Entries kept per lookup table before the least recently used is evicted.
const LOOKUP_CAPACITY: NonZeroUsize = NonZeroUsize::MIN.saturating_add(4095);

const MEDIA_FIELDS: &str = "id idMal bannerImage description(asHtml: false) type episodes \
    startDate { year month day }";

const SEASONAL_QUERY: &str = r"
query ($year: Int, $season: MediaSeason) {
    Page(page: 1, perPage: 20) {
        media(seasonYear: $year, season: $season, type: ANIME, sort: POPULARITY_DESC, isAdult: false) {
            MEDIA_FIELDS
        }
    }
}";

const TRENDING_QUERY: &str = r"
query {
    Page(page: 1, perPage: 20) {
        media(type: ANIME, sort: TRENDING_DESC, isAdult: false) {
            MEDIA_FIELDS
        }
    }
}";

const POPULAR_QUERY: &str = r"
query {
    Page(page: 1, perPage: 20) {
        media(type: ANIME, sort: POPULARITY_DESC, isAdult: false) {
            MEDIA_FIELDS
        }
    }
}";

const DETAILS_QUERY: &str = r"
query ($idMal: Int) {
    Media(idMal: $idMal, type: ANIME) {
        MEDIA_FIELDS
    }
}";

const MEDIA_ID_QUERY: &str = r"
query ($idMal: Int) {
    Media(idMal: $idMal, type: ANIME) { id }
}";

const USER_LIST_QUERY: &str = r"
query ($page: Int, $perPage: Int, $userId: Int) {
    Page(page: $page, perPage: $perPage) {
        mediaList(userId: $userId, type: ANIME) {
            id
            status
            progress
            media { id idMal }
        }
    }
}";

const SAVE_ENTRY_MUTATION: &str = r"
mutation ($mediaId: Int, $status: MediaListStatus, $progress: Int) {
    SaveMediaListEntry(mediaId: $mediaId, status: $status, progress: $progress) { id }
}";

const ENTRY_ID_QUERY: &str = r"
query ($mediaId: Int, $userId: Int) {
    MediaList(mediaId: $mediaId, userId: $userId) { id }
}";

const DELETE_ENTRY_MUTATION: &str = r"
mutation ($id: Int) {
    DeleteMediaListEntry(id: $id) { deleted }
}";

#[derive(Serialize)]
struct GraphQLRequest<'a> {
    query: &'a str,
    variables: Value,
}

#[derive(Deserialize)]
struct GraphQLResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphQLError>,
}

#[derive(Deserialize)]
struct GraphQLError {
    message: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FuzzyDate {
    pub year: Option<i32>,
    pub month: Option<u32>,
    pub day: Option<u32>,
}

impl FuzzyDate {
    /// Midnight UTC in epoch milliseconds; missing parts default to the
    /// first month/day.
    #[must_use]
    pub fn epoch_millis(&self) -> Option<i64> {
        let date = chrono::NaiveDate::from_ymd_opt(
            self.year?,
            self.month.unwrap_or(1).max(1),
            self.day.unwrap_or(1).max(1),
        )?;
        Some(date.and_hms_opt(0, 0, 0)?.and_utc().timestamp_millis())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Media {
    pub id: i32,
    pub id_mal: Option<i32>,
    pub banner_image: Option<String>,
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub episodes: Option<i32>,
    pub start_date: Option<FuzzyDate>,
}

#[derive(Deserialize)]
struct PageData<T> {
    #[serde(rename = "Page")]
    page: T,
}

#[derive(Deserialize)]
struct MediaPage {
    #[serde(default)]
    media: Vec<Media>,
}

#[derive(Deserialize)]
struct MediaData<T> {
    #[serde(rename = "Media")]
    media: Option<T>,
}

#[derive(Deserialize)]
struct IdOnly {
    id: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MediaIds {
    pub id: i32,
    #[serde(rename = "idMal")]
    pub id_mal: Option<i32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MediaListEntry {
    pub id: i32,
    pub status: Option<String>,
    #[serde(default)]
    pub progress: i32,
    pub media: MediaIds,
}

impl MediaListEntry {
    #[must_use]
    pub fn library_status(&self) -> LibraryStatus {
        self.status
            .as_deref()
            .map_or(LibraryStatus::PlanToWatch, status_from_anilist)
    }

    #[must_use]
    pub fn mal_id(&self) -> i32 {
        self.media.id_mal.unwrap_or(0)
    }
}

#[derive(Deserialize)]
struct MediaListPage {
    #[serde(default, rename = "mediaList")]
    media_list: Vec<MediaListEntry>,
}

#[derive(Deserialize)]
struct SaveEntryData {
    #[serde(rename = "SaveMediaListEntry")]
    entry: IdOnly,
}

#[derive(Deserialize)]
struct EntryIdData {
    #[serde(rename = "MediaList")]
    entry: Option<IdOnly>,
}

#[derive(Deserialize)]
struct DeleteEntryData {
    #[serde(rename = "DeleteMediaListEntry")]
    _deleted: Value,
}

#[must_use]
pub const fn status_to_anilist(status: LibraryStatus) -> &'static str {
    match status {
        LibraryStatus::Watching => "CURRENT",
        LibraryStatus::Completed => "COMPLETED",
        LibraryStatus::OnHold => "PAUSED",
        LibraryStatus::Dropped => "DROPPED",
        LibraryStatus::PlanToWatch => "PLANNING",
    }
}

#[must_use]
pub fn status_from_anilist(status: &str) -> LibraryStatus {
    match status {
        "CURRENT" | "REPEATING" => LibraryStatus::Watching,
        "COMPLETED" => LibraryStatus::Completed,
        "PAUSED" => LibraryStatus::OnHold,
        "DROPPED" => LibraryStatus::Dropped,
        _ => LibraryStatus::PlanToWatch,
    }
}

/// Reads the `sub` claim of an AniList access token without verifying it.
/// The claim may be a JSON number or a numeric string.
pub fn user_id_from_token(token: &str) -> CoreResult<i64> {
    let mut parts = token.split('.');
    let (Some(_), Some(payload), Some(_), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(CoreError::InvalidToken);
    };

    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|_| CoreError::InvalidToken)?;
    let claims: Value = serde_json::from_slice(&bytes).map_err(|_| CoreError::InvalidToken)?;

    match claims.get("sub") {
        Some(Value::Number(n)) => n.as_i64().ok_or(CoreError::InvalidToken),
        Some(Value::String(s)) => s.parse().map_err(|_| CoreError::InvalidToken),
        _ => Err(CoreError::InvalidToken),
    }
}

struct Lookups {
    user_ids: LruCache<String, i64>,
    media_ids: LruCache<i32, i32>,
    entry_ids: LruCache<(i64, i32), i32>,
}

impl Lookups {
    fn new(capacity: NonZeroUsize) -> Self {
        Self {
            user_ids: LruCache::new(capacity),
            media_ids: LruCache::new(capacity),
            entry_ids: LruCache::new(capacity),
        }
    }
}

#[derive(Clone)]
pub struct AnilistClient {
    client: Client,
    endpoint: String,
    lookups: Arc<RwLock<Lookups>>,
}

impl AnilistClient {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self::with_endpoint(client, ANILIST_API)
    }

    #[must_use]
    pub fn with_endpoint(client: Client, endpoint: &str) -> Self {
        Self {
            client,
            endpoint: endpoint.to_string(),
            lookups: Arc::new(RwLock::new(Lookups::new(LOOKUP_CAPACITY))),
        }
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        query: &str,
        variables: Value,
        token: Option<&str>,
    ) -> CoreResult<T> {
        let query = query.replace("MEDIA_FIELDS", MEDIA_FIELDS);
        let mut request = self
            .client
            .post(&self.endpoint)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&GraphQLRequest {
                query: &query,
                variables,
            });
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }

        let response: GraphQLResponse<T> = send_json(SERVICE, request).await?;
        if let Some(err) = response.errors.first() {
            return Err(CoreError::parse(SERVICE, &err.message));
        }
        response
            .data
            .ok_or_else(|| CoreError::parse(SERVICE, "response carried no data"))
    }

    /// `season` is one of WINTER, SPRING, SUMMER, FALL.
    pub async fn seasonal(&self, year: i32, season: &str) -> CoreResult<Vec<Media>> {
        let data: PageData<MediaPage> = self
            .execute(
                SEASONAL_QUERY,
                json!({ "year": year, "season": season }),
                None,
            )
            .await?;
        Ok(data.page.media)
    }

    pub async fn trending(&self) -> CoreResult<Vec<Media>> {
        let data: PageData<MediaPage> = self.execute(TRENDING_QUERY, json!({}), None).await?;
        Ok(data.page.media)
    }

    pub async fn popular(&self) -> CoreResult<Vec<Media>> {
        let data: PageData<MediaPage> = self.execute(POPULAR_QUERY, json!({}), None).await?;
        Ok(data.page.media)
    }

    pub async fn details_by_mal_id(&self, mal_id: i32) -> CoreResult<Media> {
        let data: MediaData<Media> = self
            .execute(DETAILS_QUERY, json!({ "idMal": mal_id }), None)
            .await?;
        data.media.ok_or(CoreError::not_found("anilist media"))
    }

    pub async fn user_id(&self, token: &str) -> CoreResult<i64> {
        if let Some(id) = self.lookups.write().await.user_ids.get(token) {
            return Ok(*id);
        }
        let id = user_id_from_token(token)?;
        self.lookups
            .write()
            .await
            .user_ids
            .put(token.to_string(), id);
        Ok(id)
    }

    async fn media_id(&self, mal_id: i32) -> CoreResult<i32> {
        if let Some(id) = self.lookups.write().await.media_ids.get(&mal_id) {
            return Ok(*id);
        }
        let data: MediaData<IdOnly> = self
            .execute(MEDIA_ID_QUERY, json!({ "idMal": mal_id }), None)
            .await?;
        let id = data
            .media
            .ok_or(CoreError::not_found("anilist media"))?
            .id;
        self.lookups.write().await.media_ids.put(mal_id, id);
        Ok(id)
    }

    pub async fn user_list(
        &self,
        token: &str,
        page: u32,
        per_page: u32,
    ) -> CoreResult<Vec<MediaListEntry>> {
        let user_id = self.user_id(token).await?;
        let data: PageData<MediaListPage> = self
            .execute(
                USER_LIST_QUERY,
                json!({ "page": page, "perPage": per_page, "userId": user_id }),
                Some(token),
            )
            .await?;
        Ok(data.page.media_list)
    }

    /// Creates or updates the entry for `mal_id`. Absent fields are not
    /// sent and stay unchanged remotely.
    pub async fn save_entry(
        &self,
        token: &str,
        mal_id: i32,
        status: Option<LibraryStatus>,
        progress: Option<i32>,
    ) -> CoreResult<()> {
        let user_id = self.user_id(token).await?;
        let media_id = self.media_id(mal_id).await?;

        let mut variables = json!({ "mediaId": media_id });
        if let Some(status) = status {
            variables["status"] = json!(status_to_anilist(status));
        }
        if let Some(progress) = progress.filter(|p| *p >= 0) {
            variables["progress"] = json!(progress);
        }

        let data: SaveEntryData = self
            .execute(SAVE_ENTRY_MUTATION, variables, Some(token))
            .await?;
        self.lookups
            .write()
            .await
            .entry_ids
            .put((user_id, mal_id), data.entry.id);
        Ok(())
    }

    pub async fn delete_entry(&self, token: &str, mal_id: i32) -> CoreResult<()> {
        let user_id = self.user_id(token).await?;
        let cached = self
            .lookups
            .write()
            .await
            .entry_ids
            .get(&(user_id, mal_id))
            .copied();

        let entry_id = match cached {
            Some(id) => id,
            None => {
                let media_id = self.media_id(mal_id).await?;
                let data: EntryIdData = self
                    .execute(
                        ENTRY_ID_QUERY,
                        json!({ "mediaId": media_id, "userId": user_id }),
                        Some(token),
                    )
                    .await?;
                data.entry.ok_or(CoreError::not_found("anilist list entry"))?.id
            }
        };

        let _: DeleteEntryData = self
            .execute(DELETE_ENTRY_MUTATION, json!({ "id": entry_id }), Some(token))
            .await?;
        self.lookups
            .write()
            .await
            .entry_ids
            .pop(&(user_id, mal_id));
        Ok(())
    }
}
