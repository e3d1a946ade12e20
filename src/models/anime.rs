use serde::{Deserialize, Serialize};

use crate::clients::anilist::Media;
use crate::entities::{anime_metadata, animes};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnimeDto {
    pub id: String,
    pub ename: String,
    pub jname: String,
    pub image_url: String,
    pub genre: String,
    pub season: String,
    pub season_year: i32,
    /// Zero when unknown.
    pub mal_id: i32,
    pub anilist_id: i32,
    pub last_episode: i32,
}

impl From<&animes::Model> for AnimeDto {
    fn from(row: &animes::Model) -> Self {
        Self {
            id: row.id.clone(),
            ename: row.ename.clone(),
            jname: row.jname.clone(),
            image_url: row.image_url.clone(),
            genre: row.genre.clone(),
            season: row.season.clone(),
            season_year: row.season_year,
            mal_id: row.mal_id.unwrap_or(0),
            anilist_id: row.anilist_id.unwrap_or(0),
            last_episode: row.last_episode,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnimeMetadataDto {
    pub mal_id: i32,
    pub description: String,
    pub main_picture_url: String,
    pub media_type: String,
    pub rating: String,
    pub airing_status: String,
    pub avg_episode_duration: i32,
    pub total_episodes: i32,
    pub studio: String,
    pub rank: i32,
    pub mean: f64,
    pub scoring_users: i32,
    pub popularity: i32,
    pub airing_start_date: String,
    pub airing_end_date: String,
    pub source: String,
    pub season_year: i32,
    pub season: String,
    pub trailer_embed_url: Option<String>,
}

impl From<&anime_metadata::Model> for AnimeMetadataDto {
    fn from(m: &anime_metadata::Model) -> Self {
        Self {
            mal_id: m.mal_id,
            description: m.description.clone(),
            main_picture_url: m.main_picture_url.clone(),
            media_type: m.media_type.clone(),
            rating: m.rating.clone(),
            airing_status: m.airing_status.clone(),
            avg_episode_duration: m.avg_episode_duration,
            total_episodes: m.total_episodes,
            studio: m.studio.clone(),
            rank: m.rank,
            mean: m.mean,
            scoring_users: m.scoring_users,
            popularity: m.popularity,
            airing_start_date: m.airing_start_date.clone(),
            airing_end_date: m.airing_end_date.clone(),
            source: m.source.clone(),
            season_year: m.season_year,
            season: m.season.clone(),
            trailer_embed_url: m.trailer_embed_url.clone(),
        }
    }
}

/// Catalog row with its MAL metadata, when any has been fetched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnimeWithMetadataDto {
    #[serde(flatten)]
    pub anime: AnimeDto,
    pub metadata: Option<AnimeMetadataDto>,
}

impl AnimeWithMetadataDto {
    #[must_use]
    pub fn new(row: &animes::Model, metadata: Option<&anime_metadata::Model>) -> Self {
        Self {
            anime: row.into(),
            metadata: metadata.map(AnimeMetadataDto::from),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrailerDto {
    pub trailer: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BannerDto {
    pub banner: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationsDto {
    pub watch_order: Vec<AnimeDto>,
    pub related: Vec<AnimeDto>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeasonalAnimeDto {
    pub id: String,
    pub banner_image_url: String,
    pub description: String,
    #[serde(rename = "type")]
    pub kind: String,
    /// Start date in epoch milliseconds; zero when unknown.
    pub start_date: i64,
    pub episodes: i32,
    pub anime: AnimeDto,
}

impl SeasonalAnimeDto {
    #[must_use]
    pub fn new(media: &Media, row: &animes::Model) -> Self {
        Self {
            id: row.id.clone(),
            banner_image_url: media.banner_image.clone().unwrap_or_default(),
            description: media.description.clone().unwrap_or_default(),
            kind: media.kind.clone().unwrap_or_default(),
            start_date: media
                .start_date
                .as_ref()
                .and_then(crate::clients::anilist::FuzzyDate::epoch_millis)
                .unwrap_or(0),
            episodes: media.episodes.unwrap_or(0),
            anime: row.into(),
        }
    }
}

/// Playable source: `url` routes through the playlist proxy, `raw_url` is
/// the upstream address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EpisodeSourceDto {
    pub url: String,
    pub raw_url: String,
}
