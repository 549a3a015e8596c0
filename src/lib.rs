//! Lending Market Indexer Library
//!
//! # Overview
//!
//! 렌딩 프로토콜(Moonwell/Compound 계열)의 이벤트와 주기적 블록 틱을 받아
//! 컨트랙트 조회로 보정한 뒤 PostgreSQL에 마켓/포지션 상태를 기록합니다.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   FeedBatch   ┌──────────────┐  item   ┌──────────────────────┐
//! │   LogFeed    │ ────────────► │  Dispatcher  │ ──────► │ ReconciliationEngine │
//! │ (eth_getLogs)│     mpsc      │ (locks/limit)│         │ records ∥ positions  │
//! └──────────────┘               └──────┬───────┘         │ snapshots (ticks)    │
//!                                       │ checkpoint      └───┬─────────────┬────┘
//!                                       ▼                     │ reads       │ writes
//!                                ┌──────────────┐      ┌──────▼───────┐     │
//!                                │  PostgreSQL  │◄─────┼──────────────┼─────┘
//!                                └──────▲───────┘      │ContractReader│
//!                                       │              └──────────────┘
//!                                ┌──────┴───────┐
//!                                │  Query API   │
//!                                └──────────────┘
//! ```
//!
//! ## Modules
//!
//! - `config`: 환경 설정 관리
//! - `error`: 에러 타입 및 처리
//! - `types`: 이벤트/피드 공통 타입
//! - `services`: 체인 접근 (ContractReader, LogFeed)
//! - `engine`: 리컨실리에이션 엔진, 디스패처
//! - `db`: 데이터베이스 연동
//! - `routes`: 조회 API 핸들러
//!
//! ## Usage
//!
//! ```rust,ignore
//! use lending_indexer::{config::Config, db::Database};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let db = Database::connect(
//!         &config.database_url,
//!         config.db_max_connections,
//!         config.write_timeout,
//!     )
//!     .await?;
//!     db.run_migrations().await?;
//!
//!     // ... 피드, 디스패처, 서버 시작
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod routes;
pub mod services;
pub mod types;

// Re-exports for convenience
pub use config::Config;
pub use db::{Database, LendingStore};
pub use engine::{Dispatcher, ReconciliationEngine};
pub use error::{ApiError, IndexerError, IndexerResult};

/// 조회 API 상태
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn LendingStore>,
    pub config: Arc<Config>,
}
