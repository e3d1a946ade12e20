use axum::{
    Json,
    extract::{Path, Query, State},
};
use std::sync::Arc;

use super::{ApiError, ApiResponse, AppState, GenreFilter, PageQuery, SearchQuery};
use crate::clients::jikan::CharacterNode;
use crate::models::anime::{
    AnimeDto, AnimeWithMetadataDto, BannerDto, RelationsDto, SeasonalAnimeDto, TrailerDto,
};
use crate::models::pagination::Pagination;

type Page = Result<Json<ApiResponse<Pagination<AnimeDto>>>, ApiError>;

pub async fn recently_updated(
    State(state): State<Arc<AppState>>,
    Query(paging): Query<PageQuery>,
) -> Page {
    let page = state
        .anime()
        .recently_updated(&state.context(), paging.page, paging.items_per_page)
        .await?;
    Ok(Json(ApiResponse::success(page)))
}

pub async fn by_year(
    State(state): State<Arc<AppState>>,
    Path(year): Path<i32>,
    Query(paging): Query<PageQuery>,
) -> Page {
    let page = state
        .anime()
        .by_year(&state.context(), year, paging.page, paging.items_per_page)
        .await?;
    Ok(Json(ApiResponse::success(page)))
}

pub async fn by_season(
    State(state): State<Arc<AppState>>,
    Path((season, year)): Path<(String, i32)>,
    Query(paging): Query<PageQuery>,
) -> Page {
    let page = state
        .anime()
        .by_season(
            &state.context(),
            &season,
            year,
            paging.page,
            paging.items_per_page,
        )
        .await?;
    Ok(Json(ApiResponse::success(page)))
}

pub async fn by_genre(
    State(state): State<Arc<AppState>>,
    Path(genre): Path<String>,
    Query(paging): Query<PageQuery>,
) -> Page {
    let page = state
        .anime()
        .by_genre(&state.context(), &genre, paging.page, paging.items_per_page)
        .await?;
    Ok(Json(ApiResponse::success(page)))
}

pub async fn search(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SearchQuery>,
) -> Page {
    let page = state
        .anime()
        .search(
            &state.context(),
            query.q.trim(),
            query.genre.as_deref(),
            query.page,
            query.items_per_page,
        )
        .await?;
    Ok(Json(ApiResponse::success(page)))
}

pub async fn random(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<GenreFilter>,
) -> Result<Json<ApiResponse<AnimeDto>>, ApiError> {
    let anime = state
        .anime()
        .random(&state.context(), filter.genre.as_deref())
        .await?;
    Ok(Json(ApiResponse::success(anime)))
}

pub async fn genres(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<Vec<String>>>, ApiError> {
    let genres = state.anime().genres(&state.context()).await?;
    Ok(Json(ApiResponse::success(genres)))
}

pub async fn seasonal(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<Vec<SeasonalAnimeDto>>>, ApiError> {
    let items = state.anime().seasonal(&state.context()).await?;
    Ok(Json(ApiResponse::success(items)))
}

pub async fn trending(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<Vec<AnimeDto>>>, ApiError> {
    let items = state.anime().trending(&state.context()).await?;
    Ok(Json(ApiResponse::success(items)))
}

pub async fn popular(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<Vec<AnimeDto>>>, ApiError> {
    let items = state.anime().popular(&state.context()).await?;
    Ok(Json(ApiResponse::success(items)))
}

pub async fn get_anime(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<AnimeWithMetadataDto>>, ApiError> {
    let anime = state.anime().anime_by_id(&state.context(), &id).await?;
    Ok(Json(ApiResponse::success(anime)))
}

pub async fn trailer(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<TrailerDto>>, ApiError> {
    let trailer = state.anime().trailer(&state.context(), &id).await?;
    Ok(Json(ApiResponse::success(trailer)))
}

pub async fn banner(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<BannerDto>>, ApiError> {
    let banner = state.anime().banner(&state.context(), &id).await?;
    Ok(Json(ApiResponse::success(banner)))
}

pub async fn franchise(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<RelationsDto>>, ApiError> {
    let relations = state.anime().relations(&state.context(), &id).await?;
    Ok(Json(ApiResponse::success(relations)))
}

pub async fn characters(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<Vec<CharacterNode>>>, ApiError> {
    let characters = state.anime().characters(&state.context(), &id).await?;
    Ok(Json(ApiResponse::success(characters)))
}
