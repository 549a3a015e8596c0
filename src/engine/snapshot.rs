//! Market Snapshot Builder
//!
//! On each block tick, read every market parameter independently and
//! append one `market_parameters` row. A failed read zeroes its field; the
//! row is written regardless.

use std::time::Duration;

use ethers::types::U256;
use tracing::{error, info, warn};

use super::reads::{Attempt, ChainReads};
use super::writer::bounded_write;
use crate::config::MarketConfig;
use crate::db::{InsertOutcome, LendingStore, MarketSnapshot};
use crate::services::{FlagQuery, UintQuery};
use crate::types::{hex_address, u256_to_f64, Amount, BlockRef};

/// `totalBorrows / (totalBorrows + cash)`, 분모가 0이면 0
pub fn utilization(total_borrows: U256, cash: U256) -> f64 {
    let borrows = u256_to_f64(total_borrows);
    let denominator = borrows + u256_to_f64(cash);
    if denominator > 0.0 {
        borrows / denominator
    } else {
        0.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SnapshotOutcome {
    Written {
        snapshot: MarketSnapshot,
        failed_reads: usize,
    },
    /// 같은 (market, block) 스냅샷이 이미 존재
    Duplicate,
    Failed(String),
}

pub struct SnapshotBuilder<'a> {
    reads: &'a ChainReads,
    store: &'a dyn LendingStore,
    write_timeout: Duration,
}

impl<'a> SnapshotBuilder<'a> {
    pub fn new(reads: &'a ChainReads, store: &'a dyn LendingStore, write_timeout: Duration) -> Self {
        Self {
            reads,
            store,
            write_timeout,
        }
    }

    pub async fn capture(&self, market: &MarketConfig, block: BlockRef) -> SnapshotOutcome {
        let m = market.address;
        let c = market.comptroller;
        let n = block.number;
        let r = self.reads;

        let (
            total_borrows,
            cash,
            reserves,
            reserve_factor,
            collateral_factor,
            borrow_cap,
            supply_cap,
            liquidation_incentive,
            is_listed,
            borrow_paused,
        ) = tokio::join!(
            r.uint(m, UintQuery::TotalBorrows, n),
            r.uint(m, UintQuery::Cash, n),
            r.uint(m, UintQuery::TotalReserves, n),
            r.uint(m, UintQuery::ReserveFactor, n),
            r.uint(c, UintQuery::CollateralFactor(m), n),
            r.uint(c, UintQuery::BorrowCap(m), n),
            r.uint(c, UintQuery::SupplyCap(m), n),
            r.uint(c, UintQuery::LiquidationIncentive, n),
            r.flag(c, FlagQuery::IsListed(m), n),
            r.flag(c, FlagQuery::BorrowPaused(m), n),
        );

        let uints: [&Attempt<U256>; 8] = [
            &total_borrows,
            &cash,
            &reserves,
            &reserve_factor,
            &collateral_factor,
            &borrow_cap,
            &supply_cap,
            &liquidation_incentive,
        ];
        let failed_reads = uints.iter().filter(|a| !a.succeeded).count()
            + [&is_listed, &borrow_paused]
                .iter()
                .filter(|a| !a.succeeded)
                .count();

        // 두 플래그 모두 읽혀야 대출 가능으로 판단
        let borrow_enabled = is_listed.succeeded
            && borrow_paused.succeeded
            && is_listed.value
            && !borrow_paused.value;

        let snapshot = MarketSnapshot {
            market: m,
            block_number: block.number,
            block_timestamp: block.timestamp,
            price: U256::zero(),
            total_borrows: total_borrows.value,
            cash: cash.value,
            utilization: utilization(total_borrows.value, cash.value),
            reserves: reserves.value,
            reserve_factor: reserve_factor.value,
            supply_cap: supply_cap.value,
            borrow_cap: borrow_cap.value,
            collateral_factor: collateral_factor.value,
            liquidation_incentive: liquidation_incentive.value,
            borrow_enabled,
        };

        if failed_reads > 0 {
            warn!(
                market = %market.symbol,
                block = block.number,
                failed_reads,
                "Snapshot has defaulted fields"
            );
        }

        let id = snapshot.id();
        let insert = self.store.insert_market_snapshot(&snapshot);
        match bounded_write("market_parameters", &id, self.write_timeout, insert).await {
            Ok(InsertOutcome::Inserted) => {
                log_summary(market, &snapshot);
                SnapshotOutcome::Written {
                    snapshot,
                    failed_reads,
                }
            }
            Ok(InsertOutcome::Duplicate) => SnapshotOutcome::Duplicate,
            Err(e) => {
                error!(
                    snapshot = %id,
                    market = %hex_address(&m),
                    error = %e,
                    "Market snapshot write failed"
                );
                SnapshotOutcome::Failed(e.to_string())
            }
        }
    }
}

fn log_summary(market: &MarketConfig, s: &MarketSnapshot) {
    let asset = |v: U256| Amount::new(v, market.decimals).to_human_readable();
    let pct = |v: U256| Amount::mantissa(v).to_human_readable() * 100.0;

    info!(
        market = %market.symbol,
        block = s.block_number,
        total_borrows = asset(s.total_borrows),
        cash = asset(s.cash),
        reserves = asset(s.reserves),
        utilization_pct = s.utilization * 100.0,
        reserve_factor_pct = pct(s.reserve_factor),
        collateral_factor_pct = pct(s.collateral_factor),
        liquidation_incentive_pct = pct(s.liquidation_incentive),
        borrow_cap = asset(s.borrow_cap),
        supply_cap = asset(s.supply_cap),
        borrow_enabled = s.borrow_enabled,
        "Market snapshot"
    );
}
