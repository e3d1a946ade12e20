use serde::{Deserialize, Serialize};

use crate::domain::BulkJobStatus;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReprocessResult {
    pub hi_anime_id: String,
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReprocessError {
    pub hi_anime_id: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkReprocessResponse {
    pub job_id: String,
    pub message: String,
}

/// Inline body of `POST /__admin/bulk-reprocess-anime`.
#[derive(Debug, Clone, Deserialize)]
pub struct BulkReprocessRequest {
    pub ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkJobStatusDto {
    pub job_id: String,
    pub status: BulkJobStatus,
    pub total: usize,
    pub processed: usize,
    pub success: usize,
    pub failed: usize,
    pub progress: f64,
    pub message: String,
    pub started_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkJobResultDto {
    pub job_id: String,
    pub status: BulkJobStatus,
    pub total: usize,
    pub processed: usize,
    pub success: usize,
    pub failed: usize,
    pub started_at: String,
    pub updated_at: String,
    pub results: Vec<ReprocessResult>,
    pub errors: Vec<ReprocessError>,
    pub failed_ids: Vec<String>,
}
