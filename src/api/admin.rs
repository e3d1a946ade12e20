//! Operator endpoints under `/__admin`.

use axum::{
    Json,
    extract::{Multipart, Path, State},
    http::{HeaderValue, header},
    response::{IntoResponse, Response},
};
use std::sync::Arc;

use super::{ApiError, ApiResponse, AppState};
use crate::models::bulk::{
    BulkJobResultDto, BulkJobStatusDto, BulkReprocessRequest, BulkReprocessResponse,
};

fn started(job_id: String) -> Json<ApiResponse<BulkReprocessResponse>> {
    Json(ApiResponse::success(BulkReprocessResponse {
        job_id,
        message: "Bulk reprocess job started".to_string(),
    }))
}

/// Accepts a multipart upload whose `file` field holds a JSON array of ids.
pub async fn bulk_reprocess_file(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<ApiResponse<BulkReprocessResponse>>, ApiError> {
    let limit = state.shared.config.admin.max_upload_bytes;
    let mut upload = None;

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::validation(format!("Invalid multipart body: {e}")))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let mut bytes = Vec::new();
        while let Some(chunk) = field
            .chunk()
            .await
            .map_err(|e| ApiError::validation(format!("Failed to read upload: {e}")))?
        {
            if bytes.len() + chunk.len() > limit {
                return Err(ApiError::validation(format!(
                    "File exceeds the {limit} byte limit"
                )));
            }
            bytes.extend_from_slice(&chunk);
        }
        upload = Some(bytes);
        break;
    }

    let bytes = upload.ok_or_else(|| ApiError::validation("Missing file field"))?;
    let job_id = state.shared.bulk.start_from_file(bytes).await;
    tracing::info!(job_id = %job_id, "Bulk reprocess started from upload");
    Ok(started(job_id))
}

pub async fn bulk_reprocess_ids(
    State(state): State<Arc<AppState>>,
    Json(request): Json<BulkReprocessRequest>,
) -> Result<Json<ApiResponse<BulkReprocessResponse>>, ApiError> {
    let count = request.ids.len();
    let job_id = state.shared.bulk.start_from_ids(request.ids).await?;
    tracing::info!(job_id = %job_id, ids = count, "Bulk reprocess started");
    Ok(started(job_id))
}

pub async fn job_status(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> Result<Json<ApiResponse<BulkJobStatusDto>>, ApiError> {
    let status = state.shared.bulk.status(&job_id).await?;
    Ok(Json(ApiResponse::success(status)))
}

pub async fn job_result(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> Result<Json<ApiResponse<BulkJobResultDto>>, ApiError> {
    let result = state.shared.bulk.result(&job_id).await?;
    Ok(Json(ApiResponse::success(result)))
}

/// Bare JSON array, ready to be uploaded again.
pub async fn job_failed_ids(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> Result<Json<Vec<String>>, ApiError> {
    let ids = state.shared.bulk.failed_ids(&job_id).await?;
    Ok(Json(ids))
}

pub async fn job_download(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> Result<Response, ApiError> {
    let result = state.shared.bulk.result(&job_id).await?;
    let body = serde_json::to_vec_pretty(&result)
        .map_err(|e| ApiError::internal(format!("Failed to serialize job result: {e}")))?;

    let disposition = HeaderValue::from_str(&format!(
        "attachment; filename=\"bulk-job-{}.json\"",
        result.job_id
    ))
    .map_err(|e| ApiError::internal(format!("Invalid job id for download: {e}")))?;

    Ok((
        [
            (header::CONTENT_TYPE, HeaderValue::from_static("application/json")),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    )
        .into_response())
}

pub async fn retry_job(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> Result<Json<ApiResponse<BulkReprocessResponse>>, ApiError> {
    let child = state.shared.bulk.retry(&job_id).await?;
    Ok(Json(ApiResponse::success(BulkReprocessResponse {
        job_id: child,
        message: format!("Retry of {job_id} started"),
    })))
}
