//! Market Endpoints

use axum::{
    extract::{Path, State},
    Json,
};

use super::normalize_address;
use crate::db::MarketSnapshotRow;
use crate::error::ApiError;
use crate::AppState;

/// GET /markets/:address/snapshot
///
/// 가장 최근 블록의 마켓 파라미터 스냅샷
pub async fn get_latest_snapshot(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Result<Json<MarketSnapshotRow>, ApiError> {
    let address = normalize_address(&address)?;

    state
        .store
        .latest_market_snapshot(&address)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Snapshot for market {}", address)))
}
