//! Indexer Status Endpoint

use axum::{extract::State, Json};
use serde::Serialize;

use crate::db::IndexerWatermark;
use crate::error::ApiError;
use crate::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexerStatusResponse {
    pub success: bool,
    pub watermarks: Vec<IndexerWatermark>,
    pub head_block: Option<u64>,
}

/// GET /api/indexer/status
///
/// 스트림별 watermark와 현재 chain head (지연 확인용)
pub async fn indexer_status(State(state): State<AppState>) -> Result<Json<IndexerStatusResponse>, ApiError> {
    let watermarks = state.repo.list_watermarks().await?;
    let head_block = state.chain.block_number().await.ok();

    Ok(Json(IndexerStatusResponse {
        success: true,
        watermarks,
        head_block,
    }))
}
