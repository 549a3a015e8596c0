//! Repository Pattern Implementation
//!
//! # Interview Q&A
//!
//! Q: 엔진이 `Database`를 직접 쓰지 않고 trait을 거치는 이유는?
//! A: 엔진 테스트에서 실패 주입이 필요함
//!
//!    - 쓰기 실패 시 다른 브랜치가 계속 진행되는지
//!    - 중복 식별자 쓰기가 no-op인지
//!    - 같은 키에 대한 last-writer-wins 병합
//!
//!    ```rust,ignore
//!    // 엔진
//!    let outcome = store.insert_transaction(&record).await?;
//!
//!    // PostgreSQL 구현: db/mod.rs의 Database
//!    // 테스트용 Mock: mock::MemoryStore
//!    ```
//!
//! Q: 스토어 쓰기 계약은?
//! A: - 트랜잭션/스냅샷: insert, 식별자 충돌 시 `InsertOutcome::Duplicate` (에러 아님)
//!    - 포지션: 없으면 insert, 있으면 잔고/블록 스탬프 전체 덮어쓰기
//!      (저장된 블록보다 오래된 쓰기는 무시)

use async_trait::async_trait;

use super::models::{
    InsertOutcome, MarketSnapshot, MarketSnapshotRow, PositionRecord, PositionRow,
    TransactionRecord, TransactionRow,
};
use crate::error::IndexerResult;

/// Lending 상태 저장소 인터페이스
#[async_trait]
pub trait LendingStore: Send + Sync {
    async fn insert_transaction(&self, record: &TransactionRecord) -> IndexerResult<InsertOutcome>;

    async fn upsert_position(&self, position: &PositionRecord) -> IndexerResult<()>;

    async fn insert_market_snapshot(&self, snapshot: &MarketSnapshot)
        -> IndexerResult<InsertOutcome>;

    async fn positions_for_user(&self, user: &str) -> IndexerResult<Vec<PositionRow>>;

    async fn transactions_for_user(
        &self,
        user: &str,
        page: u32,
        limit: u32,
    ) -> IndexerResult<(Vec<TransactionRow>, i64)>;

    async fn latest_market_snapshot(&self, market: &str)
        -> IndexerResult<Option<MarketSnapshotRow>>;

    async fn load_checkpoint(&self, chain_id: u64) -> IndexerResult<Option<u64>>;

    async fn save_checkpoint(&self, chain_id: u64, block_number: u64) -> IndexerResult<()>;

    async fn health_check(&self) -> IndexerResult<()>;
}

// PostgreSQL 구현은 db/mod.rs의 Database 구조체에 있음
// 테스트용 Mock 구현:

#[cfg(test)]
pub mod mock {
    use super::*;
    use crate::error::IndexerError;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::RwLock;

    /// 메모리 스토어 (실패 주입 가능)
    #[derive(Default)]
    pub struct MemoryStore {
        transactions: RwLock<HashMap<String, TransactionRecord>>,
        positions: RwLock<HashMap<String, PositionRecord>>,
        snapshots: RwLock<Vec<MarketSnapshot>>,
        checkpoints: RwLock<HashMap<u64, u64>>,
        /// 호출 순서대로 (position id, block)
        upserts: RwLock<Vec<(String, u64)>>,
        pub fail_transactions: AtomicBool,
        pub fail_positions: AtomicBool,
        pub fail_snapshots: AtomicBool,
        /// 트랜잭션/포지션/스냅샷 쓰기가 끝나지 않음 (응답 없는 DB)
        pub stall_writes: AtomicBool,
    }

    impl MemoryStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn transaction(&self, id: &str) -> Option<TransactionRecord> {
            self.transactions.read().unwrap().get(id).cloned()
        }

        pub fn transaction_count(&self) -> usize {
            self.transactions.read().unwrap().len()
        }

        pub fn position(&self, id: &str) -> Option<PositionRecord> {
            self.positions.read().unwrap().get(id).cloned()
        }

        pub fn position_count(&self) -> usize {
            self.positions.read().unwrap().len()
        }

        pub fn snapshots(&self) -> Vec<MarketSnapshot> {
            self.snapshots.read().unwrap().clone()
        }

        /// upsert 호출 이력 (stale 쓰기 포함)
        pub fn upsert_history(&self) -> Vec<(String, u64)> {
            self.upserts.read().unwrap().clone()
        }

        async fn maybe_stall(&self) {
            if self.stall_writes.load(Ordering::SeqCst) {
                futures::future::pending::<()>().await;
            }
        }

        fn injected(flag: &AtomicBool, entity: &'static str, id: String) -> IndexerResult<()> {
            if flag.load(Ordering::SeqCst) {
                return Err(IndexerError::Write {
                    entity,
                    id,
                    message: "injected failure".to_string(),
                });
            }
            Ok(())
        }
    }

    #[async_trait]
    impl LendingStore for MemoryStore {
        async fn insert_transaction(
            &self,
            record: &TransactionRecord,
        ) -> IndexerResult<InsertOutcome> {
            self.maybe_stall().await;
            Self::injected(&self.fail_transactions, "user_transactions", record.id.clone())?;
            let mut txs = self.transactions.write().unwrap();
            if txs.contains_key(&record.id) {
                return Ok(InsertOutcome::Duplicate);
            }
            txs.insert(record.id.clone(), record.clone());
            Ok(InsertOutcome::Inserted)
        }

        async fn upsert_position(&self, position: &PositionRecord) -> IndexerResult<()> {
            self.maybe_stall().await;
            Self::injected(&self.fail_positions, "user_positions", position.id())?;
            self.upserts
                .write()
                .unwrap()
                .push((position.id(), position.last_updated_block));
            let mut positions = self.positions.write().unwrap();
            let stale = positions
                .get(&position.id())
                .map(|p| p.last_updated_block > position.last_updated_block)
                .unwrap_or(false);
            if !stale {
                positions.insert(position.id(), position.clone());
            }
            Ok(())
        }

        async fn insert_market_snapshot(
            &self,
            snapshot: &MarketSnapshot,
        ) -> IndexerResult<InsertOutcome> {
            self.maybe_stall().await;
            Self::injected(&self.fail_snapshots, "market_parameters", snapshot.id())?;
            let mut snapshots = self.snapshots.write().unwrap();
            if snapshots.iter().any(|s| s.id() == snapshot.id()) {
                return Ok(InsertOutcome::Duplicate);
            }
            snapshots.push(snapshot.clone());
            Ok(InsertOutcome::Inserted)
        }

        async fn positions_for_user(&self, user: &str) -> IndexerResult<Vec<PositionRow>> {
            let positions = self.positions.read().unwrap();
            let mut rows: Vec<PositionRow> = positions
                .values()
                .map(PositionRow::from)
                .filter(|r| r.user_address == user)
                .collect();
            rows.sort_by(|a, b| a.market.cmp(&b.market));
            Ok(rows)
        }

        async fn transactions_for_user(
            &self,
            user: &str,
            page: u32,
            limit: u32,
        ) -> IndexerResult<(Vec<TransactionRow>, i64)> {
            let txs = self.transactions.read().unwrap();
            let mut rows: Vec<TransactionRow> = txs
                .values()
                .map(TransactionRow::from)
                .filter(|r| r.user_address == user)
                .collect();
            rows.sort_by(|a, b| {
                b.block_number
                    .cmp(&a.block_number)
                    .then_with(|| b.id.cmp(&a.id))
            });
            let total = rows.len() as i64;
            let page_rows = rows
                .into_iter()
                .skip((page * limit) as usize)
                .take(limit as usize)
                .collect();
            Ok((page_rows, total))
        }

        async fn latest_market_snapshot(
            &self,
            market: &str,
        ) -> IndexerResult<Option<MarketSnapshotRow>> {
            let snapshots = self.snapshots.read().unwrap();
            Ok(snapshots
                .iter()
                .map(MarketSnapshotRow::from)
                .filter(|s| s.market == market)
                .max_by_key(|s| s.block_number))
        }

        async fn load_checkpoint(&self, chain_id: u64) -> IndexerResult<Option<u64>> {
            Ok(self.checkpoints.read().unwrap().get(&chain_id).copied())
        }

        async fn save_checkpoint(&self, chain_id: u64, block_number: u64) -> IndexerResult<()> {
            let mut checkpoints = self.checkpoints.write().unwrap();
            let entry = checkpoints.entry(chain_id).or_insert(block_number);
            *entry = (*entry).max(block_number);
            Ok(())
        }

        async fn health_check(&self) -> IndexerResult<()> {
            Ok(())
        }
    }
}
