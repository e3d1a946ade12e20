//! `SeaORM` + Redis implementation of [`AnimeService`].

use chrono::{DateTime, Datelike, Months, Utc};
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::cache::Cache;
use crate::clients::anilist::{AnilistClient, Media};
use crate::clients::hianime::{
    HianimeClient, ScrapedEpisode, ScrapedEpisodeServer, StreamMetadata,
};
use crate::clients::jikan::{CharacterNode, JikanClient};
use crate::clients::myanimelist::MalClient;
use crate::constants::cache::{
    BANNER_TTL, CHARACTERS_TTL, EPISODE_SERVERS_TTL, EPISODES_TTL, GENRES_TTL, SEASONAL_TTL,
    STREAM_TTL, TRENDING_TTL, anime_episodes_key,
};
use crate::context::Context;
use crate::db::{AnimePage, Store};
use crate::domain::Season;
use crate::entities::animes;
use crate::error::{CoreError, CoreResult};
use crate::models::anime::{
    AnimeDto, AnimeWithMetadataDto, BannerDto, EpisodeSourceDto, RelationsDto, SeasonalAnimeDto,
    TrailerDto,
};
use crate::models::pagination::{self, Pagination};
use crate::services::anime_service::AnimeService;
use crate::services::metadata_refresher::MetadataRefresher;
use crate::services::proxy::proxied_url;
use crate::services::relations::RelationsResolver;

const STREAM_TYPES: [&str; 3] = ["sub", "dub", "raw"];
const STREAM_SERVER: &str = "megaplay";

/// Upstream clients the read paths fan out to.
#[derive(Clone)]
pub struct CatalogClients {
    pub hianime: HianimeClient,
    pub mal: MalClient,
    pub anilist: AnilistClient,
    pub jikan: JikanClient,
}

#[derive(Clone)]
pub struct CatalogService {
    store: Store,
    cache: Cache,
    clients: CatalogClients,
    relations: RelationsResolver,
    refresher: MetadataRefresher,
}

/// AniList season name and year for the season containing `at`.
#[must_use]
pub fn anilist_season(at: DateTime<Utc>) -> (i32, &'static str) {
    let season = match at.month() {
        1..=3 => "WINTER",
        4..=6 => "SPRING",
        7..=9 => "SUMMER",
        _ => "FALL",
    };
    (at.year(), season)
}

fn check_stream_type(stream_type: &str) -> CoreResult<()> {
    if STREAM_TYPES.contains(&stream_type) {
        Ok(())
    } else {
        Err(CoreError::invalid(
            "type",
            format!("must be one of sub, dub, raw; got {stream_type:?}"),
        ))
    }
}

impl CatalogService {
    #[must_use]
    pub const fn new(
        store: Store,
        cache: Cache,
        clients: CatalogClients,
        relations: RelationsResolver,
        refresher: MetadataRefresher,
    ) -> Self {
        Self {
            store,
            cache,
            clients,
            relations,
            refresher,
        }
    }

    async fn row(&self, id: &str) -> CoreResult<animes::Model> {
        self.store
            .get_anime(id)
            .await?
            .ok_or(CoreError::not_found("anime"))
    }

    async fn row_with_mal_id(&self, id: &str) -> CoreResult<(animes::Model, i32)> {
        let row = self.row(id).await?;
        let mal_id = row
            .known_mal_id()
            .ok_or_else(|| CoreError::invalid("mal_id", format!("anime {id} has no MAL id")))?;
        Ok((row, mal_id))
    }

    fn listing(&self, page: u64, size: u64, (rows, total): AnimePage) -> Pagination<AnimeDto> {
        self.refresher.enqueue_all(rows.iter().map(|r| r.mal_id));
        let items = rows.iter().map(AnimeDto::from).collect();
        Pagination::new(page, size, total, items)
    }

    /// Catalog rows for the MAL ids AniList returned, keyed by MAL id.
    async fn catalog_rows(&self, media: &[Media]) -> CoreResult<HashMap<i32, animes::Model>> {
        let ids: Vec<i32> = media
            .iter()
            .filter_map(|m| m.id_mal)
            .filter(|id| *id > 0)
            .collect();
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let rows = self.store.get_animes_by_mal_ids(&ids).await?;
        let mut by_mal = HashMap::with_capacity(rows.len());
        for row in rows {
            if let Some(mal_id) = row.known_mal_id() {
                self.refresher.enqueue(mal_id);
                by_mal.entry(mal_id).or_insert(row);
            }
        }
        Ok(by_mal)
    }

    async fn ranked(&self, media: Vec<Media>) -> CoreResult<Vec<AnimeDto>> {
        let rows = self.catalog_rows(&media).await?;
        Ok(media
            .iter()
            .filter_map(|m| m.id_mal.and_then(|id| rows.get(&id)))
            .map(AnimeDto::from)
            .collect())
    }
}

#[async_trait::async_trait]
impl AnimeService for CatalogService {
    async fn recently_updated(
        &self,
        _ctx: &Context,
        page: u64,
        size: u64,
    ) -> CoreResult<Pagination<AnimeDto>> {
        pagination::validate(page, size)?;
        let result = self.store.recently_updated_animes(page, size).await?;
        Ok(self.listing(page, size, result))
    }

    async fn by_year(
        &self,
        _ctx: &Context,
        year: i32,
        page: u64,
        size: u64,
    ) -> CoreResult<Pagination<AnimeDto>> {
        pagination::validate(page, size)?;
        let result = self.store.animes_by_year(year, page, size).await?;
        Ok(self.listing(page, size, result))
    }

    async fn by_season(
        &self,
        _ctx: &Context,
        season: &str,
        year: i32,
        page: u64,
        size: u64,
    ) -> CoreResult<Pagination<AnimeDto>> {
        pagination::validate(page, size)?;
        let season = Season::lossy(season);
        let result = self
            .store
            .animes_by_season(season.as_str(), year, page, size)
            .await?;
        Ok(self.listing(page, size, result))
    }

    async fn by_genre(
        &self,
        _ctx: &Context,
        genre: &str,
        page: u64,
        size: u64,
    ) -> CoreResult<Pagination<AnimeDto>> {
        pagination::validate(page, size)?;
        if genre.trim().is_empty() {
            return Err(CoreError::invalid("genre", "must not be empty"));
        }
        let result = self.store.animes_by_genre(genre.trim(), page, size).await?;
        Ok(self.listing(page, size, result))
    }

    async fn search(
        &self,
        _ctx: &Context,
        query: &str,
        genre: Option<&str>,
        page: u64,
        size: u64,
    ) -> CoreResult<Pagination<AnimeDto>> {
        pagination::validate(page, size)?;
        let genre = genre.map(str::trim).filter(|g| !g.is_empty());
        let result = self
            .store
            .search_animes(query.trim(), genre, page, size)
            .await?;
        Ok(self.listing(page, size, result))
    }

    async fn random(&self, _ctx: &Context, genre: Option<&str>) -> CoreResult<AnimeDto> {
        let genre = match genre.map(str::trim) {
            Some("") => return Err(CoreError::invalid("genre", "must not be empty")),
            other => other,
        };
        let row = self
            .store
            .random_anime(genre)
            .await?
            .ok_or(CoreError::not_found("anime"))?;
        self.refresher.enqueue_all([row.mal_id]);
        Ok(AnimeDto::from(&row))
    }

    async fn genres(&self, _ctx: &Context) -> CoreResult<Vec<String>> {
        self.cache
            .get_or_fill("anime_genres", GENRES_TTL, || self.store.anime_genres())
            .await
    }

    async fn seasonal(&self, ctx: &Context) -> CoreResult<Vec<SeasonalAnimeDto>> {
        self.cache
            .get_or_fill("seasonal_animes", SEASONAL_TTL, || async {
                let now = Utc::now();
                let reference = now.checked_sub_months(Months::new(1)).unwrap_or(now);
                let (year, season) = anilist_season(reference);
                let media = ctx.run(self.clients.anilist.seasonal(year, season)).await?;
                let rows = self.catalog_rows(&media).await?;
                debug!(year, season, media = media.len(), matched = rows.len(), "Seasonal titles resolved");

                Ok(media
                    .iter()
                    .filter_map(|m| {
                        let row = m.id_mal.and_then(|id| rows.get(&id))?;
                        Some(SeasonalAnimeDto::new(m, row))
                    })
                    .collect())
            })
            .await
    }

    async fn trending(&self, ctx: &Context) -> CoreResult<Vec<AnimeDto>> {
        self.cache
            .get_or_fill("trending_animes", TRENDING_TTL, || async {
                let media = ctx.run(self.clients.anilist.trending()).await?;
                self.ranked(media).await
            })
            .await
    }

    async fn popular(&self, ctx: &Context) -> CoreResult<Vec<AnimeDto>> {
        self.cache
            .get_or_fill("popular_animes", TRENDING_TTL, || async {
                let media = ctx.run(self.clients.anilist.popular()).await?;
                self.ranked(media).await
            })
            .await
    }

    async fn anime_by_id(&self, ctx: &Context, id: &str) -> CoreResult<AnimeWithMetadataDto> {
        let row = self.row(id).await?;
        let Some(mal_id) = row.known_mal_id() else {
            return Ok(AnimeWithMetadataDto::new(&row, None));
        };

        let prior = self.store.get_anime_metadata(mal_id).await?;
        if let Some(meta) = &prior {
            if meta.is_fresh(Utc::now(), self.refresher.ttl()) {
                return Ok(AnimeWithMetadataDto::new(&row, Some(meta)));
            }
        }

        let refresh = self.refresher.refresh_blocking(ctx, mal_id).await;
        if let Err(e) = &refresh {
            warn!(mal_id, kind = e.kind(), error = %e, "Inline metadata refresh failed");
        }

        match (self.store.get_anime_metadata(mal_id).await?, refresh) {
            (Some(meta), _) => Ok(AnimeWithMetadataDto::new(&row, Some(&meta))),
            (None, Err(e)) => Err(e),
            (None, Ok(())) => Err(CoreError::not_found("anime metadata")),
        }
    }

    async fn trailer(&self, ctx: &Context, id: &str) -> CoreResult<TrailerDto> {
        let details = self.anime_by_id(ctx, id).await?;
        let stored = details
            .metadata
            .as_ref()
            .and_then(|m| m.trailer_embed_url.clone())
            .filter(|t| !t.is_empty());
        if let Some(trailer) = stored {
            return Ok(TrailerDto { trailer });
        }

        let mal_id = details.anime.mal_id;
        if mal_id <= 0 {
            return Err(CoreError::not_found("trailer"));
        }
        let trailer = match ctx.run(self.clients.mal.trailer(mal_id)).await {
            Ok(trailer) => trailer,
            Err(CoreError::Cancelled) => return Err(CoreError::Cancelled),
            Err(e) => {
                warn!(mal_id, error = %e, "Trailer scrape failed");
                return Err(CoreError::not_found("trailer"));
            }
        };

        if details.metadata.is_some() {
            self.store.update_metadata_trailer(mal_id, &trailer).await?;
            debug!(mal_id, "Trailer stored");
        }
        Ok(TrailerDto { trailer })
    }

    async fn banner(&self, ctx: &Context, id: &str) -> CoreResult<BannerDto> {
        let key = format!("anime_banner:{id}");
        let banner = self
            .cache
            .get_or_fill(&key, BANNER_TTL, || async {
                let (_, mal_id) = self.row_with_mal_id(id).await?;
                let media = ctx.run(self.clients.anilist.details_by_mal_id(mal_id)).await?;
                media
                    .banner_image
                    .filter(|b| !b.is_empty())
                    .ok_or(CoreError::not_found("banner"))
            })
            .await?;
        Ok(BannerDto { banner })
    }

    async fn relations(&self, ctx: &Context, id: &str) -> CoreResult<RelationsDto> {
        self.relations.relations(ctx, id).await
    }

    async fn characters(&self, ctx: &Context, id: &str) -> CoreResult<Vec<CharacterNode>> {
        let key = format!("anime_characters:{id}");
        self.cache
            .get_or_fill(&key, CHARACTERS_TTL, || async {
                let (_, mal_id) = self.row_with_mal_id(id).await?;
                ctx.run(self.clients.jikan.anime_characters(mal_id)).await
            })
            .await
    }

    async fn episodes(&self, ctx: &Context, id: &str) -> CoreResult<Vec<ScrapedEpisode>> {
        self.cache
            .get_or_fill(&anime_episodes_key(id), EPISODES_TTL, || async {
                let row = self.row(id).await?;
                let episodes = ctx.run(self.clients.hianime.episodes(&row.hi_anime_id)).await?;
                if episodes.is_empty() {
                    return Err(CoreError::not_found("episodes"));
                }
                Ok(episodes)
            })
            .await
    }

    async fn episode_servers(
        &self,
        ctx: &Context,
        id: &str,
        episode_id: &str,
    ) -> CoreResult<Vec<ScrapedEpisodeServer>> {
        let key = format!("episode_servers:{id}:{episode_id}");
        self.cache
            .get_or_fill(&key, EPISODE_SERVERS_TTL, || async {
                let row = self.row(id).await?;
                ctx.run(
                    self.clients
                        .hianime
                        .episode_servers(&row.hi_anime_id, episode_id),
                )
                .await
            })
            .await
    }

    async fn episode_stream(
        &self,
        ctx: &Context,
        id: &str,
        episode_id: &str,
        stream_type: &str,
    ) -> CoreResult<EpisodeSourceDto> {
        check_stream_type(stream_type)?;
        let key = format!("source:{id}:{episode_id}:{stream_type}");
        self.cache
            .get_or_fill(&key, STREAM_TTL, || async {
                self.row(id).await?;
                let raw_url = ctx
                    .run(self.clients.hianime.episode_stream(episode_id, stream_type))
                    .await?;
                Ok(EpisodeSourceDto {
                    url: proxied_url(&raw_url, STREAM_SERVER),
                    raw_url,
                })
            })
            .await
    }

    async fn stream_metadata(
        &self,
        ctx: &Context,
        id: &str,
        episode_id: &str,
        stream_type: &str,
    ) -> CoreResult<StreamMetadata> {
        check_stream_type(stream_type)?;
        let key = format!("stream-metadata:{id}:{episode_id}:{stream_type}");
        self.cache
            .get_or_fill(&key, STREAM_TTL, || async {
                let row = self.row(id).await?;
                ctx.run(self.clients.hianime.stream_metadata(
                    &row.hi_anime_id,
                    episode_id,
                    stream_type,
                ))
                .await
            })
            .await
    }
}
