//! Read paths over the catalog and its enrichments.

use crate::clients::hianime::{ScrapedEpisode, ScrapedEpisodeServer, StreamMetadata};
use crate::clients::jikan::CharacterNode;
use crate::context::Context;
use crate::error::CoreResult;
use crate::models::anime::{
    AnimeDto, AnimeWithMetadataDto, BannerDto, EpisodeSourceDto, RelationsDto, SeasonalAnimeDto,
    TrailerDto,
};
use crate::models::pagination::Pagination;

/// Catalog queries used by the HTTP layer.
///
/// Listings enqueue every returned row's MAL id for a background metadata
/// refresh; page sizes are limited to `1..=100`.
#[async_trait::async_trait]
pub trait AnimeService: Send + Sync {
    async fn recently_updated(
        &self,
        ctx: &Context,
        page: u64,
        size: u64,
    ) -> CoreResult<Pagination<AnimeDto>>;

    async fn by_year(
        &self,
        ctx: &Context,
        year: i32,
        page: u64,
        size: u64,
    ) -> CoreResult<Pagination<AnimeDto>>;

    async fn by_season(
        &self,
        ctx: &Context,
        season: &str,
        year: i32,
        page: u64,
        size: u64,
    ) -> CoreResult<Pagination<AnimeDto>>;

    async fn by_genre(
        &self,
        ctx: &Context,
        genre: &str,
        page: u64,
        size: u64,
    ) -> CoreResult<Pagination<AnimeDto>>;

    async fn search(
        &self,
        ctx: &Context,
        query: &str,
        genre: Option<&str>,
        page: u64,
        size: u64,
    ) -> CoreResult<Pagination<AnimeDto>>;

    /// Picks one row at random, optionally restricted to `genre`.
    ///
    /// # Errors
    ///
    /// `NotFound` when nothing matches.
    async fn random(&self, ctx: &Context, genre: Option<&str>) -> CoreResult<AnimeDto>;

    async fn genres(&self, ctx: &Context) -> CoreResult<Vec<String>>;

    /// AniList's view of last month's season, restricted to titles in the
    /// catalog.
    async fn seasonal(&self, ctx: &Context) -> CoreResult<Vec<SeasonalAnimeDto>>;

    async fn trending(&self, ctx: &Context) -> CoreResult<Vec<AnimeDto>>;

    async fn popular(&self, ctx: &Context) -> CoreResult<Vec<AnimeDto>>;

    /// Row plus MAL metadata. Stale or missing metadata is refreshed inline;
    /// the upstream error is surfaced only when there is nothing to fall
    /// back to.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the row does not exist
    /// - the refresh error when no metadata was ever stored
    async fn anime_by_id(&self, ctx: &Context, id: &str) -> CoreResult<AnimeWithMetadataDto>;

    async fn trailer(&self, ctx: &Context, id: &str) -> CoreResult<TrailerDto>;

    async fn banner(&self, ctx: &Context, id: &str) -> CoreResult<BannerDto>;

    async fn relations(&self, ctx: &Context, id: &str) -> CoreResult<RelationsDto>;

    async fn characters(&self, ctx: &Context, id: &str) -> CoreResult<Vec<CharacterNode>>;

    /// # Errors
    ///
    /// `NotFound` for an unknown row or an empty episode list.
    async fn episodes(&self, ctx: &Context, id: &str) -> CoreResult<Vec<ScrapedEpisode>>;

    async fn episode_servers(
        &self,
        ctx: &Context,
        id: &str,
        episode_id: &str,
    ) -> CoreResult<Vec<ScrapedEpisodeServer>>;

    /// Playlist address for an episode, wrapped for the playlist proxy.
    async fn episode_stream(
        &self,
        ctx: &Context,
        id: &str,
        episode_id: &str,
        stream_type: &str,
    ) -> CoreResult<EpisodeSourceDto>;

    async fn stream_metadata(
        &self,
        ctx: &Context,
        id: &str,
        episode_id: &str,
        stream_type: &str,
    ) -> CoreResult<StreamMetadata>;
}
