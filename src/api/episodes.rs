use axum::{
    Json,
    extract::{Path, State},
};
use std::sync::Arc;

use super::{ApiError, ApiResponse, AppState};
use crate::clients::hianime::{ScrapedEpisode, ScrapedEpisodeServer, StreamMetadata};
use crate::models::anime::EpisodeSourceDto;

pub async fn list_episodes(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<Vec<ScrapedEpisode>>>, ApiError> {
    let episodes = state.anime().episodes(&state.context(), &id).await?;
    Ok(Json(ApiResponse::success(episodes)))
}

pub async fn episode_servers(
    State(state): State<Arc<AppState>>,
    Path((id, episode_id)): Path<(String, String)>,
) -> Result<Json<ApiResponse<Vec<ScrapedEpisodeServer>>>, ApiError> {
    let servers = state
        .anime()
        .episode_servers(&state.context(), &id, &episode_id)
        .await?;
    Ok(Json(ApiResponse::success(servers)))
}

/// The returned `url` goes through `/proxy`; `rawUrl` is the upstream playlist.
pub async fn episode_stream(
    State(state): State<Arc<AppState>>,
    Path((id, episode_id, stream_type)): Path<(String, String, String)>,
) -> Result<Json<ApiResponse<EpisodeSourceDto>>, ApiError> {
    let source = state
        .anime()
        .episode_stream(&state.context(), &id, &episode_id, &stream_type)
        .await?;
    Ok(Json(ApiResponse::success(source)))
}

pub async fn stream_metadata(
    State(state): State<Arc<AppState>>,
    Path((id, episode_id, stream_type)): Path<(String, String, String)>,
) -> Result<Json<ApiResponse<StreamMetadata>>, ApiError> {
    let metadata = state
        .anime()
        .stream_metadata(&state.context(), &id, &episode_id, &stream_type)
        .await?;
    Ok(Json(ApiResponse::success(metadata)))
}
