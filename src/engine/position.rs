//! Position Reconciler
//!
//! For each (user, market) an event touches, fetch the authoritative
//! balances and merge them into the stored position (last-writer-wins).
//!
//! - Borrow / RepayBorrow carry `accountBorrows`, so only the supply
//!   balance is read.
//! - Mint / Redeem / LiquidateBorrow read both balances.
//! - Each read fails on its own and degrades to zero with a warning.

use std::time::Duration;

use ethers::types::{Address, U256};
use tracing::{debug, error, warn};

use super::reads::ChainReads;
use super::writer::bounded_write;
use crate::db::{LendingStore, PositionRecord};
use crate::services::UintQuery;
use crate::types::{hex_address, BlockRef, LendingEvent, LendingEventKind};

/// 쓰기 조건
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteRule {
    Always,
    /// 두 잔고가 모두 0이면 쓰지 않음 (청산자 포지션)
    SkipIfEmpty,
}

/// 이벤트가 건드리는 포지션 하나
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionTouch {
    pub user: Address,
    pub market: Address,
    /// 이벤트 payload로 이미 알고 있는 대출 잔고
    pub known_borrow: Option<U256>,
    pub rule: WriteRule,
}

/// 이벤트 → 갱신할 포지션 목록
///
/// 청산 시 담보 마켓이 별도로 추적 중인 마켓이면 해당 마켓의 포지션도 포함
pub fn position_touches(event: &LendingEvent, tracked: &[Address]) -> Vec<PositionTouch> {
    let market = event.meta.market;
    let touch = |user, market, known_borrow, rule| PositionTouch {
        user,
        market,
        known_borrow,
        rule,
    };

    match &event.kind {
        LendingEventKind::Borrow {
            borrower,
            account_borrows,
            ..
        }
        | LendingEventKind::RepayBorrow {
            borrower,
            account_borrows,
            ..
        } => vec![touch(*borrower, market, Some(*account_borrows), WriteRule::Always)],

        LendingEventKind::Mint { minter: user, .. }
        | LendingEventKind::Redeem { redeemer: user, .. } => {
            vec![touch(*user, market, None, WriteRule::Always)]
        }

        LendingEventKind::LiquidateBorrow {
            liquidator,
            borrower,
            m_token_collateral,
            ..
        } => {
            let mut touches = vec![
                touch(*borrower, market, None, WriteRule::Always),
                touch(*liquidator, market, None, WriteRule::SkipIfEmpty),
            ];
            if *m_token_collateral != market && tracked.contains(m_token_collateral) {
                touches.push(touch(*borrower, *m_token_collateral, None, WriteRule::Always));
                touches.push(touch(
                    *liquidator,
                    *m_token_collateral,
                    None,
                    WriteRule::SkipIfEmpty,
                ));
            }
            touches
        }
    }
}

/// 포지션 처리 결과
#[derive(Debug, Clone, PartialEq)]
pub enum PositionOutcome {
    Written {
        position: PositionRecord,
        /// 하나 이상의 잔고 조회가 실패해 0으로 대체됨
        degraded: bool,
    },
    /// 청산자 잔고가 모두 0
    Suppressed,
    Failed(String),
}

impl PositionOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, PositionOutcome::Failed(_))
    }
}

pub struct PositionReconciler<'a> {
    reads: &'a ChainReads,
    store: &'a dyn LendingStore,
    write_timeout: Duration,
}

impl<'a> PositionReconciler<'a> {
    pub fn new(reads: &'a ChainReads, store: &'a dyn LendingStore, write_timeout: Duration) -> Self {
        Self {
            reads,
            store,
            write_timeout,
        }
    }

    pub async fn reconcile(
        &self,
        touch: &PositionTouch,
        block: BlockRef,
        source: &str,
    ) -> PositionOutcome {
        let borrow_read = async {
            match touch.known_borrow {
                Some(known) => (known, true),
                None => {
                    let a = self
                        .reads
                        .uint(touch.market, UintQuery::BorrowBalance(touch.user), block.number)
                        .await;
                    (a.value, a.succeeded)
                }
            }
        };
        let supply_read = self
            .reads
            .uint(touch.market, UintQuery::SupplyBalance(touch.user), block.number);

        let ((borrow_balance, borrow_ok), supply) = tokio::join!(borrow_read, supply_read);
        let degraded = !(borrow_ok && supply.succeeded);

        let position = PositionRecord {
            user_address: touch.user,
            market: touch.market,
            borrow_balance,
            supply_balance: supply.value,
            last_updated_block: block.number,
            last_updated_timestamp: block.timestamp,
        };

        if touch.rule == WriteRule::SkipIfEmpty && position.is_empty() {
            debug!(
                user = %hex_address(&touch.user),
                market = %hex_address(&touch.market),
                source,
                "Skipping empty position"
            );
            return PositionOutcome::Suppressed;
        }

        if degraded {
            warn!(
                position = %position.id(),
                block = block.number,
                source,
                "Writing position with defaulted balance"
            );
        }

        let id = position.id();
        let upsert = self.store.upsert_position(&position);
        match bounded_write("user_positions", &id, self.write_timeout, upsert).await {
            Ok(()) => PositionOutcome::Written { position, degraded },
            Err(e) => {
                error!(position = %id, source, error = %e, "Position write failed");
                PositionOutcome::Failed(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::mock::MemoryStore;
    use crate::engine::classifier::fixtures::{event, market};
    use crate::services::mock::MockContractReader;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use std::time::Duration;

    const WRITE_TIMEOUT: Duration = Duration::from_millis(100);

    fn addr(b: u8) -> Address {
        Address::repeat_byte(b)
    }

    fn block(number: u64) -> BlockRef {
        BlockRef {
            number,
            timestamp: 1_000 + number,
        }
    }

    fn liquidation(collateral: Address) -> LendingEvent {
        event(
            50,
            1,
            LendingEventKind::LiquidateBorrow {
                liquidator: addr(0x0B),
                borrower: addr(0x0C),
                repay_amount: U256::one(),
                m_token_collateral: collateral,
                seize_tokens: U256::one(),
            },
        )
    }

    #[test]
    fn test_touches_for_borrow_use_known_balance() {
        let ev = event(
            1,
            0,
            LendingEventKind::Borrow {
                borrower: addr(1),
                borrow_amount: U256::from(5u64),
                account_borrows: U256::from(15u64),
                total_borrows: U256::from(100u64),
            },
        );
        let touches = position_touches(&ev, &[market()]);
        assert_eq!(touches.len(), 1);
        assert_eq!(touches[0].known_borrow, Some(U256::from(15u64)));
        assert_eq!(touches[0].rule, WriteRule::Always);
    }

    #[test]
    fn test_touches_for_liquidation_include_tracked_collateral() {
        let collateral = addr(0xCC);

        let same = position_touches(&liquidation(market()), &[market()]);
        assert_eq!(same.len(), 2);
        assert_eq!(same[1].rule, WriteRule::SkipIfEmpty);

        let untracked = position_touches(&liquidation(collateral), &[market()]);
        assert_eq!(untracked.len(), 2);

        let tracked = position_touches(&liquidation(collateral), &[market(), collateral]);
        assert_eq!(tracked.len(), 4);
        assert!(tracked[2..].iter().all(|t| t.market == collateral));
        assert_eq!(tracked[3].user, addr(0x0B));
        assert_eq!(tracked[3].rule, WriteRule::SkipIfEmpty);
    }

    #[tokio::test]
    async fn test_failed_supply_read_degrades_to_zero() {
        let reader = Arc::new(MockContractReader::new());
        reader.fail("balanceOf");
        let reads = ChainReads::new(reader, Duration::from_millis(100), true);
        let store = MemoryStore::new();

        let touch = PositionTouch {
            user: addr(1),
            market: market(),
            known_borrow: Some(U256::from(15u64)),
            rule: WriteRule::Always,
        };

        let outcome = PositionReconciler::new(&reads, &store, WRITE_TIMEOUT)
            .reconcile(&touch, block(10), "test")
            .await;

        match outcome {
            PositionOutcome::Written { position, degraded } => {
                assert!(degraded);
                assert_eq!(position.borrow_balance, U256::from(15u64));
                assert!(position.supply_balance.is_zero());
            }
            other => panic!("expected write, got {:?}", other),
        }
        assert_eq!(store.position_count(), 1);
    }

    #[tokio::test]
    async fn test_empty_liquidator_position_is_suppressed() {
        let reader = Arc::new(MockContractReader::new());
        let reads = ChainReads::new(reader.clone(), Duration::from_millis(100), true);
        let store = MemoryStore::new();

        let touch = PositionTouch {
            user: addr(0x0B),
            market: market(),
            known_borrow: None,
            rule: WriteRule::SkipIfEmpty,
        };

        let outcome = PositionReconciler::new(&reads, &store, WRITE_TIMEOUT)
            .reconcile(&touch, block(10), "test")
            .await;
        assert_eq!(outcome, PositionOutcome::Suppressed);
        assert_eq!(store.position_count(), 0);

        reader.set_uint(UintQuery::SupplyBalance(addr(0x0B)), 3);
        let outcome = PositionReconciler::new(&reads, &store, WRITE_TIMEOUT)
            .reconcile(&touch, block(11), "test")
            .await;
        assert!(matches!(outcome, PositionOutcome::Written { degraded: false, .. }));
        assert_eq!(store.position_count(), 1);
    }

    #[tokio::test]
    async fn test_write_failure_is_reported() {
        let reads = ChainReads::new(
            Arc::new(MockContractReader::new()),
            Duration::from_millis(100),
            true,
        );
        let store = MemoryStore::new();
        store.fail_positions.store(true, Ordering::SeqCst);

        let touch = PositionTouch {
            user: addr(1),
            market: market(),
            known_borrow: None,
            rule: WriteRule::Always,
        };
        let outcome = PositionReconciler::new(&reads, &store, WRITE_TIMEOUT)
            .reconcile(&touch, block(10), "test")
            .await;
        assert!(outcome.is_failed());
    }

    #[tokio::test]
    async fn test_known_borrow_skips_borrow_read() {
        let reader = Arc::new(MockContractReader::new());
        reader.set_uint(UintQuery::BorrowBalance(addr(1)), 999);
        let reads = ChainReads::new(reader.clone(), Duration::from_millis(100), true);
        let store = MemoryStore::new();

        let touch = PositionTouch {
            user: addr(1),
            market: market(),
            known_borrow: Some(U256::from(15u64)),
            rule: WriteRule::Always,
        };
        let outcome = PositionReconciler::new(&reads, &store, WRITE_TIMEOUT)
            .reconcile(&touch, block(10), "test")
            .await;

        // balanceOf 한 번만 조회
        assert_eq!(reader.calls(), 1);
        match outcome {
            PositionOutcome::Written { position, .. } => {
                assert_eq!(position.borrow_balance, U256::from(15u64))
            }
            other => panic!("expected write, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_stalled_upsert_is_reported_as_failure() {
        let reads = ChainReads::new(
            Arc::new(MockContractReader::new()),
            Duration::from_millis(100),
            true,
        );
        let store = MemoryStore::new();
        store.stall_writes.store(true, Ordering::SeqCst);

        let touch = PositionTouch {
            user: addr(1),
            market: market(),
            known_borrow: None,
            rule: WriteRule::Always,
        };
        let outcome = tokio::time::timeout(
            Duration::from_secs(2),
            PositionReconciler::new(&reads, &store, WRITE_TIMEOUT).reconcile(&touch, block(10), "test"),
        )
        .await
        .expect("reconcile must not hang");

        assert!(outcome.is_failed());
        assert_eq!(store.position_count(), 0);
    }
}
