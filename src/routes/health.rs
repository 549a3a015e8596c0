//! Health Check Endpoint
//!
//! # Interview Q&A
//!
//! Q: Health check 엔드포인트는 왜 필요한가?
//! A: 3가지 용도
//!    1. 로드밸런서 헬스체크 (ALB, nginx)
//!    2. Kubernetes liveness/readiness probe
//!    3. 인덱싱 진행 상황 확인 (체크포인트 블록)
//!
//! Q: DB 연결 상태도 체크하는 이유는?
//! A: "깊은 헬스체크"(deep health check) 패턴
//!    - 단순 200 OK: 프로세스 살아있음
//!    - DB 체크: 실제로 인덱싱/조회 가능한 상태

use axum::{extract::State, Json};
use serde::Serialize;

use crate::types::hex_address;
use crate::AppState;

/// Health check 응답
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub database: DatabaseStatus,
    pub indexer: IndexerStatus,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
pub struct DatabaseStatus {
    pub connected: bool,
    pub latency_ms: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct IndexerStatus {
    pub chain_id: u64,
    /// 마지막으로 완료된 배치의 끝 블록
    pub last_indexed_block: Option<u64>,
    pub markets: Vec<String>,
}

/// GET /health
///
/// 서버, DB, 인덱싱 상태 확인
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let db_start = std::time::Instant::now();
    let db_status = match state.store.health_check().await {
        Ok(_) => DatabaseStatus {
            connected: true,
            latency_ms: Some(db_start.elapsed().as_millis() as u64),
        },
        Err(_) => DatabaseStatus {
            connected: false,
            latency_ms: None,
        },
    };

    let last_indexed_block = if db_status.connected {
        state
            .store
            .load_checkpoint(state.config.chain_id)
            .await
            .ok()
            .flatten()
    } else {
        None
    };

    Json(HealthResponse {
        status: if db_status.connected { "healthy" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        database: db_status,
        indexer: IndexerStatus {
            chain_id: state.config.chain_id,
            last_indexed_block,
            markets: state
                .config
                .markets
                .iter()
                .map(|m| format!("{}:{}", m.symbol, hex_address(&m.address)))
                .collect(),
        },
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}
