//! Database Module
//!
//! # Interview Q&A
//!
//! Q: 왜 PostgreSQL을 선택했는가?
//! A: 인덱서 저장소에 필요한 것
//!
//!    1. 원자적 upsert: `INSERT ... ON CONFLICT` 로 같은 키 쓰기를 직렬화
//!    2. NUMERIC(78,0): uint256 값을 정밀도 손실 없이 저장
//!    3. 인덱싱: 주소별, 블록별 조회 최적화
//!
//! Q: 재처리(replay) 시 중복 행은 어떻게 막는가?
//! A: 식별자 기반 충돌 처리
//!
//!    - 트랜잭션/스냅샷: `ON CONFLICT (id) DO NOTHING` → rows_affected == 0 이면 Duplicate
//!    - 포지션: `ON CONFLICT (id) DO UPDATE` 로 잔고와 블록 스탬프 전체 덮어쓰기
//!      단, 저장된 블록보다 오래된 쓰기는 WHERE 조건으로 무시
//!
//! Q: 커넥션 풀은 어떻게 관리하는가?
//! A: SQLx의 PgPool 사용
//!    - 최대 커넥션 수는 `DB_MAX_CONNECTIONS` (기본값은 MAX_IN_FLIGHT 기준)
//!    - acquire 타임아웃, statement_timeout 모두 WRITE_TIMEOUT_MS
//!    - 엔진 쪽에서도 쓰기마다 같은 타임아웃 적용 → 실패로 보고 (해당 브랜치만)

mod models;
mod repository;

pub use models::*;
pub use repository::LendingStore;

#[cfg(test)]
pub use repository::mock;

use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{
    postgres::{PgConnectOptions, PgPoolOptions},
    PgPool,
};

use crate::error::{IndexerError, IndexerResult};
use crate::types::{hex_address, hex_hash};

/// 데이터베이스 연결 및 쿼리 담당
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// 데이터베이스 연결
    ///
    /// # Connection Pool Settings
    ///
    /// - max_connections: 설정값 (동시 처리 아이템 수에 맞춰 조정)
    /// - min_connections: 1 (idle 시 최소 유지)
    /// - acquire_timeout: 쓰기 타임아웃과 동일 (커넥션 획득 대기)
    /// - statement_timeout: 쓰기 타임아웃과 동일 (서버 쪽에서 쿼리 중단)
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        write_timeout: Duration,
    ) -> Result<Self> {
        let options = PgConnectOptions::from_str(database_url)
            .context("DATABASE_URL must be a valid postgres URL")?
            .options([("statement_timeout", write_timeout.as_millis().to_string())]);

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(1)
            .acquire_timeout(write_timeout)
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    /// 마이그레이션 실행
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl LendingStore for Database {
    async fn insert_transaction(&self, record: &TransactionRecord) -> IndexerResult<InsertOutcome> {
        let result = sqlx::query(
            r#"
            INSERT INTO user_transactions (
                id, user_address, market, transaction_type, amount, token_amount,
                block_number, block_timestamp, transaction_hash, related_address
            )
            VALUES ($1, $2, $3, $4, $5::NUMERIC, $6::NUMERIC, $7, $8, $9, $10)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(&record.id)
        .bind(hex_address(&record.user_address))
        .bind(hex_address(&record.market))
        .bind(record.kind.as_str())
        .bind(record.amount.to_string())
        .bind(record.token_amount.map(|a| a.to_string()))
        .bind(record.block_number as i64)
        .bind(record.block_timestamp as i64)
        .bind(hex_hash(&record.tx_hash))
        .bind(record.related_address.as_ref().map(hex_address))
        .execute(&self.pool)
        .await
        .map_err(|e| IndexerError::write("user_transactions", record.id.clone(), e))?;

        Ok(if result.rows_affected() == 0 {
            InsertOutcome::Duplicate
        } else {
            InsertOutcome::Inserted
        })
    }

    async fn upsert_position(&self, position: &PositionRecord) -> IndexerResult<()> {
        let id = position.id();
        sqlx::query(
            r#"
            INSERT INTO user_positions (
                id, user_address, market, borrow_balance, supply_balance,
                last_updated_block, last_updated_timestamp
            )
            VALUES ($1, $2, $3, $4::NUMERIC, $5::NUMERIC, $6, $7)
            ON CONFLICT (id)
            DO UPDATE SET
                borrow_balance = EXCLUDED.borrow_balance,
                supply_balance = EXCLUDED.supply_balance,
                last_updated_block = EXCLUDED.last_updated_block,
                last_updated_timestamp = EXCLUDED.last_updated_timestamp
            WHERE user_positions.last_updated_block <= EXCLUDED.last_updated_block
            "#,
        )
        .bind(&id)
        .bind(hex_address(&position.user_address))
        .bind(hex_address(&position.market))
        .bind(position.borrow_balance.to_string())
        .bind(position.supply_balance.to_string())
        .bind(position.last_updated_block as i64)
        .bind(position.last_updated_timestamp as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| IndexerError::write("user_positions", id.clone(), e))?;

        Ok(())
    }

    async fn insert_market_snapshot(
        &self,
        snapshot: &MarketSnapshot,
    ) -> IndexerResult<InsertOutcome> {
        let id = snapshot.id();
        let result = sqlx::query(
            r#"
            INSERT INTO market_parameters (
                id, market, block_number, block_timestamp, price, total_borrows, cash,
                utilization, reserves, reserve_factor, supply_cap, borrow_cap,
                collateral_factor, liquidation_incentive, borrow_enabled
            )
            VALUES (
                $1, $2, $3, $4, $5::NUMERIC, $6::NUMERIC, $7::NUMERIC,
                $8, $9::NUMERIC, $10::NUMERIC, $11::NUMERIC, $12::NUMERIC,
                $13::NUMERIC, $14::NUMERIC, $15
            )
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(&id)
        .bind(hex_address(&snapshot.market))
        .bind(snapshot.block_number as i64)
        .bind(snapshot.block_timestamp as i64)
        .bind(snapshot.price.to_string())
        .bind(snapshot.total_borrows.to_string())
        .bind(snapshot.cash.to_string())
        .bind(snapshot.utilization)
        .bind(snapshot.reserves.to_string())
        .bind(snapshot.reserve_factor.to_string())
        .bind(snapshot.supply_cap.to_string())
        .bind(snapshot.borrow_cap.to_string())
        .bind(snapshot.collateral_factor.to_string())
        .bind(snapshot.liquidation_incentive.to_string())
        .bind(snapshot.borrow_enabled)
        .execute(&self.pool)
        .await
        .map_err(|e| IndexerError::write("market_parameters", id.clone(), e))?;

        Ok(if result.rows_affected() == 0 {
            InsertOutcome::Duplicate
        } else {
            InsertOutcome::Inserted
        })
    }

    /// 사용자의 마켓별 포지션 조회
    async fn positions_for_user(&self, user: &str) -> IndexerResult<Vec<PositionRow>> {
        let rows = sqlx::query_as::<_, PositionRow>(
            r#"
            SELECT
                id,
                user_address,
                market,
                borrow_balance::TEXT AS borrow_balance,
                supply_balance::TEXT AS supply_balance,
                last_updated_block,
                last_updated_timestamp
            FROM user_positions
            WHERE user_address = $1
            ORDER BY market
            "#,
        )
        .bind(user.to_lowercase())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// 트랜잭션 히스토리 조회 (페이지네이션)
    async fn transactions_for_user(
        &self,
        user: &str,
        page: u32,
        limit: u32,
    ) -> IndexerResult<(Vec<TransactionRow>, i64)> {
        let offset = page as i64 * limit as i64;

        let rows = sqlx::query_as::<_, TransactionRow>(
            r#"
            SELECT
                id,
                user_address,
                market,
                transaction_type,
                amount::TEXT AS amount,
                token_amount::TEXT AS token_amount,
                block_number,
                block_timestamp,
                transaction_hash,
                related_address
            FROM user_transactions
            WHERE user_address = $1
            ORDER BY block_number DESC, id DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(user.to_lowercase())
        .bind(limit as i64)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        // 전체 개수
        let count: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM user_transactions WHERE user_address = $1")
                .bind(user.to_lowercase())
                .fetch_one(&self.pool)
                .await?;

        Ok((rows, count.0))
    }

    async fn latest_market_snapshot(
        &self,
        market: &str,
    ) -> IndexerResult<Option<MarketSnapshotRow>> {
        let row = sqlx::query_as::<_, MarketSnapshotRow>(
            r#"
            SELECT
                id,
                market,
                block_number,
                block_timestamp,
                price::TEXT AS price,
                total_borrows::TEXT AS total_borrows,
                cash::TEXT AS cash,
                utilization,
                reserves::TEXT AS reserves,
                reserve_factor::TEXT AS reserve_factor,
                supply_cap::TEXT AS supply_cap,
                borrow_cap::TEXT AS borrow_cap,
                collateral_factor::TEXT AS collateral_factor,
                liquidation_incentive::TEXT AS liquidation_incentive,
                borrow_enabled
            FROM market_parameters
            WHERE market = $1
            ORDER BY block_number DESC
            LIMIT 1
            "#,
        )
        .bind(market.to_lowercase())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn load_checkpoint(&self, chain_id: u64) -> IndexerResult<Option<u64>> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT last_block FROM indexer_checkpoints WHERE chain_id = $1")
                .bind(chain_id as i64)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(|(block,)| block as u64))
    }

    /// 체크포인트는 뒤로 가지 않음
    async fn save_checkpoint(&self, chain_id: u64, block_number: u64) -> IndexerResult<()> {
        sqlx::query(
            r#"
            INSERT INTO indexer_checkpoints (chain_id, last_block, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (chain_id)
            DO UPDATE SET
                last_block = GREATEST(indexer_checkpoints.last_block, EXCLUDED.last_block),
                updated_at = NOW()
            "#,
        )
        .bind(chain_id as i64)
        .bind(block_number as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| IndexerError::write("indexer_checkpoints", chain_id.to_string(), e))?;

        Ok(())
    }

    /// Health check
    async fn health_check(&self) -> IndexerResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
