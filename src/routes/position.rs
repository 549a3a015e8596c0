//! Position Endpoints
//!
//! Per-user positions and paginated transaction history, served straight
//! from the indexed tables.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};

use super::normalize_address;
use crate::db::{PositionRow, TransactionRow};
use crate::error::ApiError;
use crate::AppState;

// ============ Request/Response Types ============

/// 포지션 조회 응답
#[derive(Debug, Serialize)]
pub struct PositionsResponse {
    pub address: String,
    /// 마켓별 포지션 (잔고 0인 포지션 포함)
    pub positions: Vec<PositionRow>,
}

/// 히스토리 쿼리 파라미터
#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    /// 페이지 (0부터 시작)
    pub page: Option<u32>,
    /// 페이지 크기 (기본 20, 최대 100)
    pub limit: Option<u32>,
}

/// 히스토리 응답
#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub address: String,
    pub transactions: Vec<TransactionRow>,
    pub pagination: Pagination,
}

#[derive(Debug, Serialize)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
    pub total: u64,
    pub has_next: bool,
}

// ============ Handlers ============

/// GET /positions/:address
///
/// # Response
///
/// ```json
/// {
///   "address": "0x...",
///   "positions": [{
///     "id": "0x...-0x...",
///     "market": "0x628f...",
///     "borrow_balance": "1500000000000000000",
///     "supply_balance": "0",
///     "last_updated_block": 28205900,
///     "last_updated_timestamp": 1733000000
///   }]
/// }
/// ```
pub async fn get_positions(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Result<Json<PositionsResponse>, ApiError> {
    let address = normalize_address(&address)?;
    let positions = state.store.positions_for_user(&address).await?;

    Ok(Json(PositionsResponse { address, positions }))
}

/// GET /positions/:address/transactions
///
/// 트랜잭션 히스토리 (최신순, 페이지네이션)
pub async fn get_transactions(
    State(state): State<AppState>,
    Path(address): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let address = normalize_address(&address)?;

    let page = query.page.unwrap_or(0);
    let limit = query.limit.unwrap_or(20).clamp(1, 100);

    let (transactions, total) = state
        .store
        .transactions_for_user(&address, page, limit)
        .await?;

    let total = total.max(0) as u64;
    let has_next = (page as u64 + 1) * (limit as u64) < total;

    Ok(Json(HistoryResponse {
        address,
        transactions,
        pagination: Pagination {
            page,
            limit,
            total,
            has_next,
        },
    }))
}
