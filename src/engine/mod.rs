//! Reconciliation Engine
//!
//! # Interview Q&A
//!
//! Q: 이벤트 하나는 어떻게 처리되는가?
//! A: 두 브랜치가 독립적으로 실행됨
//!
//!    ```text
//!    RECEIVED ─► RECORD_BUILT ─┬─► RECORD_WRITTEN | RECORD_WRITE_FAILED
//!                              └─► POSITION_READ ─► POSITION_WRITTEN | POSITION_WRITE_FAILED
//!    ```
//!
//!    두 브랜치가 모두 끝나면 이벤트 완료. 롤백 없음
//!
//! Q: 재시도/재처리 시 상태가 깨지지 않는 이유는?
//! A: - 트랜잭션 레코드: 식별자 충돌 시 no-op (exactly-once)
//!    - 포지션: 전체 행 덮어쓰기 + 오래된 블록 쓰기 무시 (last-writer-wins)
//!    - 스냅샷: (market, block) 당 1행
//!
//! Q: 조회가 실패하면?
//! A: 해당 필드만 0으로 대체하고 경고. 다른 필드, 다른 브랜치, 다음 이벤트는 계속 진행
//!
//! Q: DB가 응답하지 않으면?
//! A: 쓰기마다 `WRITE_TIMEOUT_MS` 타임아웃. 만료 시 일반 쓰기 실패와 같이 보고하고
//!    해당 키의 티켓을 놓아 다음 이벤트와 배치가 진행됨
//!
//! Q: 같은 사용자의 이벤트가 동시에 들어오면?
//! A: Dispatcher가 도착 순서대로 `LockKey::Position` 티켓을 발급
//!    앞선 이벤트의 쓰기가 끝나야 다음 이벤트가 조회를 시작함

pub mod classifier;
pub mod dispatcher;
pub mod locks;
pub mod position;
pub mod reads;
pub mod snapshot;
pub mod writer;

pub use dispatcher::{BatchSummary, Dispatcher};
pub use locks::{KeyedLocks, LockKey};
pub use position::{PositionOutcome, PositionTouch};
pub use reads::{attempt_with_default, Attempt, ChainReads};
pub use snapshot::{utilization, SnapshotOutcome};
pub use writer::{bounded_write, RecordOutcome};

use std::sync::Arc;
use std::time::Duration;

use ethers::types::Address;
use futures::future::join_all;
use tracing::{debug, warn};

use crate::config::MarketConfig;
use crate::db::{position_id, LendingStore};
use crate::error::{IndexerError, IndexerResult};
use crate::types::{hex_address, BlockRef, FeedItem, LendingEvent};
use classifier::{build_records, validate_event};
use position::{position_touches, PositionReconciler};
use snapshot::SnapshotBuilder;
use writer::TransactionWriter;

/// 이벤트 하나의 처리 결과
#[derive(Debug, Clone, PartialEq)]
pub struct EventReport {
    pub source: String,
    /// (레코드 id, 결과)
    pub records: Vec<(String, RecordOutcome)>,
    /// (포지션 id, 결과)
    pub positions: Vec<(String, PositionOutcome)>,
}

impl EventReport {
    pub fn record_failures(&self) -> usize {
        self.records.iter().filter(|(_, o)| o.is_failed()).count()
    }

    pub fn position_failures(&self) -> usize {
        self.positions.iter().filter(|(_, o)| o.is_failed()).count()
    }
}

/// 피드 아이템 하나의 처리 결과
#[derive(Debug)]
pub enum ItemReport {
    Event(IndexerResult<EventReport>),
    Tick {
        block: u64,
        outcomes: Vec<(Address, SnapshotOutcome)>,
    },
}

/// 이벤트/틱 → 상태 변경
pub struct ReconciliationEngine {
    reads: ChainReads,
    store: Arc<dyn LendingStore>,
    markets: Vec<MarketConfig>,
    tracked: Vec<Address>,
    write_timeout: Duration,
}

impl ReconciliationEngine {
    pub fn new(
        reads: ChainReads,
        store: Arc<dyn LendingStore>,
        markets: Vec<MarketConfig>,
        write_timeout: Duration,
    ) -> Self {
        let tracked = markets.iter().map(|m| m.address).collect();
        Self {
            reads,
            store,
            markets,
            tracked,
            write_timeout,
        }
    }

    /// 스토어 쓰기 1건당 타임아웃
    pub fn write_timeout(&self) -> Duration {
        self.write_timeout
    }

    pub async fn process(&self, item: &FeedItem) -> ItemReport {
        match item {
            FeedItem::Event(event) => {
                let result = self.process_event(event).await;
                if let Err(e) = &result {
                    warn!(source = %event.source(), error = %e, "Event skipped");
                }
                ItemReport::Event(result)
            }
            FeedItem::BlockTick(block) => ItemReport::Tick {
                block: block.number,
                outcomes: self.process_tick(*block).await,
            },
        }
    }

    /// 이벤트 하나 처리: 레코드 브랜치 ∥ 포지션 브랜치
    pub async fn process_event(&self, event: &LendingEvent) -> IndexerResult<EventReport> {
        if !self.tracked.contains(&event.meta.market) {
            return Err(IndexerError::UnknownMarket(hex_address(&event.meta.market)));
        }
        validate_event(event)?;

        let source = event.source();
        let records = build_records(event);
        let touches = position_touches(event, &self.tracked);

        debug!(
            source = %source,
            event = event.kind.name(),
            block = event.meta.block.number,
            records = records.len(),
            positions = touches.len(),
            "Processing event"
        );

        let writer = &TransactionWriter::new(self.store.as_ref(), self.write_timeout);
        let reconciler =
            &PositionReconciler::new(&self.reads, self.store.as_ref(), self.write_timeout);
        let block = event.meta.block;
        let src = source.as_str();

        let record_branch = join_all(records.iter().map(|record| async move {
            (record.id.clone(), writer.write(record, src).await)
        }));
        let position_branch = join_all(touches.iter().map(|touch| async move {
            (
                position_id(&touch.user, &touch.market),
                reconciler.reconcile(touch, block, src).await,
            )
        }));

        let (records, positions) = tokio::join!(record_branch, position_branch);

        Ok(EventReport {
            source,
            records,
            positions,
        })
    }

    /// 블록 틱: 추적 중인 모든 마켓 스냅샷
    pub async fn process_tick(&self, block: BlockRef) -> Vec<(Address, SnapshotOutcome)> {
        let builder = &SnapshotBuilder::new(&self.reads, self.store.as_ref(), self.write_timeout);
        join_all(
            self.markets
                .iter()
                .map(|market| async move { (market.address, builder.capture(market, block).await) }),
        )
        .await
    }

    /// 아이템이 점유할 키 목록
    pub fn lock_keys(&self, item: &FeedItem) -> Vec<LockKey> {
        match item {
            FeedItem::Event(event) => position_touches(event, &self.tracked)
                .into_iter()
                .map(|t| LockKey::Position {
                    user: t.user,
                    market: t.market,
                })
                .collect(),
            FeedItem::BlockTick(_) => self.tracked.iter().copied().map(LockKey::Market).collect(),
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::db::mock::MemoryStore;
    use crate::services::mock::MockContractReader;
    use std::time::Duration;

    pub fn markets() -> Vec<MarketConfig> {
        vec![
            MarketConfig {
                symbol: "mETH".to_string(),
                address: classifier::fixtures::market(),
                comptroller: Address::repeat_byte(0xC0),
                decimals: 18,
            },
            MarketConfig {
                symbol: "mUSDC".to_string(),
                address: Address::repeat_byte(0xCC),
                comptroller: Address::repeat_byte(0xC0),
                decimals: 6,
            },
        ]
    }

    pub fn engine(
        reader: Arc<MockContractReader>,
        store: Arc<MemoryStore>,
    ) -> ReconciliationEngine {
        ReconciliationEngine::new(
            ChainReads::new(reader, Duration::from_millis(100), true),
            store,
            markets(),
            Duration::from_millis(100),
        )
    }
}
