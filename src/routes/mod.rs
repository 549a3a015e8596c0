//! API Routes Module
//!
//! 인덱싱된 상태를 조회하는 읽기 전용 엔드포인트
//!
//! # Routes
//!
//! ```text
//! GET /health                                - 서버/DB/인덱싱 상태
//! GET /positions/:address                    - 사용자 포지션
//! GET /positions/:address/transactions       - 트랜잭션 히스토리 (?page=&limit=)
//! GET /markets/:address/snapshot             - 최신 마켓 스냅샷
//! ```

pub mod health;
pub mod market;
pub mod position;

use axum::http::{header, HeaderValue, Method};
use axum::{routing::get, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::error::ApiError;
use crate::AppState;

/// 라우터 생성
pub fn create_router(state: AppState) -> Router {
    // CORS 설정
    // 프로덕션: ALLOWED_ORIGINS 에 나열된 도메인만 허용
    // 개발: localhost 허용
    let cors = if state.config.is_production() {
        let allowed_origins = std::env::var("ALLOWED_ORIGINS").unwrap_or_default();
        let origins: Vec<HeaderValue> = allowed_origins
            .split(',')
            .filter_map(|s| s.trim().parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([Method::GET])
            .allow_headers([header::CONTENT_TYPE])
    } else {
        CorsLayer::new()
            .allow_origin([
                HeaderValue::from_static("http://localhost:5173"),
                HeaderValue::from_static("http://localhost:3000"),
                HeaderValue::from_static("http://127.0.0.1:5173"),
            ])
            .allow_methods(Any)
            .allow_headers(Any)
    };

    Router::new()
        .route("/health", get(health::health_check))
        .route("/positions/:address", get(position::get_positions))
        .route(
            "/positions/:address/transactions",
            get(position::get_transactions),
        )
        .route("/markets/:address/snapshot", get(market::get_latest_snapshot))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// 주소 검증 후 소문자로 변환 (저장 형식과 일치)
pub(crate) fn normalize_address(addr: &str) -> Result<String, ApiError> {
    // 0x로 시작하고 40자리 hex
    let valid = addr.len() == 42
        && addr.starts_with("0x")
        && addr[2..].chars().all(|c| c.is_ascii_hexdigit());

    if !valid {
        return Err(ApiError::ValidationError(format!(
            "Invalid Ethereum address: {}",
            addr
        )));
    }
    Ok(addr.to_lowercase())
}
