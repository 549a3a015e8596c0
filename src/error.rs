//! Error Handling Module
//!
//! Two error families live here:
//! - `IndexerError`: 리컨실리에이션 엔진, 컨트랙트 리더, 스토어, 피드에서 발생하는 에러
//! - `ApiError`: 조회 API의 HTTP 상태 코드 매핑
//!
//! Uses thiserror for domain errors and integrates with tracing for structured logging.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// 인덱서 내부 에러 타입
///
/// # Error Classes
///
/// - Read / ReadTimeout: 일시적 조회 실패. 호출자가 필드를 0으로 대체하고 경고만 남김
/// - Write / WriteTimeout: 스토어 쓰기 실패. 해당 브랜치만 실패로 보고
/// - MalformedEvent / UnknownMarket: 해당 이벤트만 실패, 다음 이벤트는 계속 처리
///
/// 어떤 variant도 프로세스를 종료시키지 않음
#[derive(Debug, Error)]
pub enum IndexerError {
    #[error("contract read {function} on {contract} failed: {message}")]
    Read {
        contract: String,
        function: &'static str,
        message: String,
    },

    #[error("contract read {function} on {contract} timed out after {timeout_ms}ms")]
    ReadTimeout {
        contract: String,
        function: &'static str,
        timeout_ms: u64,
    },

    #[error("write to {entity} ({id}) failed: {message}")]
    Write {
        entity: &'static str,
        id: String,
        message: String,
    },

    #[error("write to {entity} ({id}) timed out after {timeout_ms}ms")]
    WriteTimeout {
        entity: &'static str,
        id: String,
        timeout_ms: u64,
    },

    #[error("malformed event: {0}")]
    MalformedEvent(String),

    #[error("event emitted by untracked market {0}")]
    UnknownMarket(String),

    #[error("rpc error: {0}")]
    Rpc(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type IndexerResult<T> = Result<T, IndexerError>;

impl IndexerError {
    /// 스토어 쓰기 실패를 엔티티/식별자 컨텍스트와 함께 감쌈
    pub fn write(entity: &'static str, id: impl Into<String>, err: sqlx::Error) -> Self {
        IndexerError::Write {
            entity,
            id: id.into(),
            message: err.to_string(),
        }
    }
}

/// API 에러 타입
///
/// # Design Decision
///
/// 각 에러 variant는 적절한 HTTP 상태 코드에 매핑됨
/// - 클라이언트 에러: 4xx (잘못된 주소, 없는 리소스)
/// - 서버 에러: 5xx (내부 오류)
///
/// 민감한 내부 정보는 클라이언트에 노출하지 않음
#[derive(Debug, Error)]
pub enum ApiError {
    // ============ 400 Bad Request ============
    #[error("Validation failed: {0}")]
    ValidationError(String),

    // ============ 404 Not Found ============
    #[error("Resource not found: {0}")]
    NotFound(String),

    // ============ 500 Internal Server Error ============
    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Internal server error")]
    InternalError,
}

/// API 에러 응답 구조
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message, details) = match &self {
            ApiError::ValidationError(msg) => (
                StatusCode::BAD_REQUEST,
                "VALIDATION_ERROR",
                "Validation failed".to_string(),
                Some(msg.clone()),
            ),
            ApiError::NotFound(resource) => (
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                format!("{} not found", resource),
                None,
            ),

            // 5xx 서버 에러
            ApiError::DatabaseError(_) => {
                // 내부 에러는 클라이언트에 상세 정보 노출 안 함
                tracing::error!("Database error: {:?}", self);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "DATABASE_ERROR",
                    "Database error occurred".to_string(),
                    None,
                )
            }
            ApiError::InternalError => {
                tracing::error!("Internal error: {:?}", self);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                    None,
                )
            }
        };

        let body = ErrorResponse {
            error: message,
            code: code.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => ApiError::NotFound("Resource".to_string()),
            _ => ApiError::DatabaseError(err.to_string()),
        }
    }
}

/// 스토어 에러를 ApiError로 변환
impl From<IndexerError> for ApiError {
    fn from(err: IndexerError) -> Self {
        match err {
            IndexerError::Database(e) => ApiError::DatabaseError(e.to_string()),
            IndexerError::Write { message, .. } => ApiError::DatabaseError(message),
            e @ IndexerError::WriteTimeout { .. } => ApiError::DatabaseError(e.to_string()),
            other => {
                tracing::error!("Indexer error: {:?}", other);
                ApiError::InternalError
            }
        }
    }
}
