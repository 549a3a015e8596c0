//! Database Models
//!
//! Write-side records produced by the reconciliation engine, and the
//! read-side rows returned to the query API.
//!
//! 256비트 금액은 `NUMERIC(78,0)` 컬럼에 저장하고 문자열로 바인딩/조회함

use ethers::types::{Address, H256, U256};
use serde::Serialize;
use sqlx::FromRow;

use crate::types::{hex_address, hex_hash, TransactionKind};

/// 사용자 트랜잭션 기록 (append-only)
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionRecord {
    /// `{txHash}-{logIndex}[-{role}]`
    pub id: String,
    pub user_address: Address,
    pub market: Address,
    pub kind: TransactionKind,
    pub amount: U256,
    pub token_amount: Option<U256>,
    pub block_number: u64,
    pub block_timestamp: u64,
    pub tx_hash: H256,
    pub related_address: Option<Address>,
}

/// 사용자 포지션 (user + market 당 1행)
#[derive(Debug, Clone, PartialEq)]
pub struct PositionRecord {
    pub user_address: Address,
    pub market: Address,
    pub borrow_balance: U256,
    pub supply_balance: U256,
    pub last_updated_block: u64,
    pub last_updated_timestamp: u64,
}

impl PositionRecord {
    /// `{user}-{market}`
    pub fn id(&self) -> String {
        position_id(&self.user_address, &self.market)
    }

    pub fn is_empty(&self) -> bool {
        self.borrow_balance.is_zero() && self.supply_balance.is_zero()
    }
}

pub fn position_id(user: &Address, market: &Address) -> String {
    format!("{}-{}", hex_address(user), hex_address(market))
}

/// 블록별 마켓 파라미터 스냅샷 (append-only)
#[derive(Debug, Clone, PartialEq)]
pub struct MarketSnapshot {
    pub market: Address,
    pub block_number: u64,
    pub block_timestamp: u64,
    /// 오라클 연동 전까지 항상 0
    pub price: U256,
    pub total_borrows: U256,
    pub cash: U256,
    /// 0.0 ~ 1.0
    pub utilization: f64,
    pub reserves: U256,
    pub reserve_factor: U256,
    pub supply_cap: U256,
    pub borrow_cap: U256,
    pub collateral_factor: U256,
    pub liquidation_incentive: U256,
    pub borrow_enabled: bool,
}

impl MarketSnapshot {
    /// `{market}-{blockNumber}`
    pub fn id(&self) -> String {
        format!("{}-{}", hex_address(&self.market), self.block_number)
    }
}

/// Append-only 쓰기 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// 같은 식별자가 이미 존재 (재처리, no-op)
    Duplicate,
}

// ============ Read-side rows ============

#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct PositionRow {
    pub id: String,
    pub user_address: String,
    pub market: String,
    pub borrow_balance: String,
    pub supply_balance: String,
    pub last_updated_block: i64,
    pub last_updated_timestamp: i64,
}

impl From<&PositionRecord> for PositionRow {
    fn from(p: &PositionRecord) -> Self {
        Self {
            id: p.id(),
            user_address: hex_address(&p.user_address),
            market: hex_address(&p.market),
            borrow_balance: p.borrow_balance.to_string(),
            supply_balance: p.supply_balance.to_string(),
            last_updated_block: p.last_updated_block as i64,
            last_updated_timestamp: p.last_updated_timestamp as i64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct TransactionRow {
    pub id: String,
    pub user_address: String,
    pub market: String,
    pub transaction_type: String,
    pub amount: String,
    pub token_amount: Option<String>,
    pub block_number: i64,
    pub block_timestamp: i64,
    pub transaction_hash: String,
    pub related_address: Option<String>,
}

impl From<&TransactionRecord> for TransactionRow {
    fn from(t: &TransactionRecord) -> Self {
        Self {
            id: t.id.clone(),
            user_address: hex_address(&t.user_address),
            market: hex_address(&t.market),
            transaction_type: t.kind.as_str().to_string(),
            amount: t.amount.to_string(),
            token_amount: t.token_amount.map(|a| a.to_string()),
            block_number: t.block_number as i64,
            block_timestamp: t.block_timestamp as i64,
            transaction_hash: hex_hash(&t.tx_hash),
            related_address: t.related_address.as_ref().map(hex_address),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct MarketSnapshotRow {
    pub id: String,
    pub market: String,
    pub block_number: i64,
    pub block_timestamp: i64,
    pub price: String,
    pub total_borrows: String,
    pub cash: String,
    pub utilization: f64,
    pub reserves: String,
    pub reserve_factor: String,
    pub supply_cap: String,
    pub borrow_cap: String,
    pub collateral_factor: String,
    pub liquidation_incentive: String,
    pub borrow_enabled: bool,
}

impl From<&MarketSnapshot> for MarketSnapshotRow {
    fn from(s: &MarketSnapshot) -> Self {
        Self {
            id: s.id(),
            market: hex_address(&s.market),
            block_number: s.block_number as i64,
            block_timestamp: s.block_timestamp as i64,
            price: s.price.to_string(),
            total_borrows: s.total_borrows.to_string(),
            cash: s.cash.to_string(),
            utilization: s.utilization,
            reserves: s.reserves.to_string(),
            reserve_factor: s.reserve_factor.to_string(),
            supply_cap: s.supply_cap.to_string(),
            borrow_cap: s.borrow_cap.to_string(),
            collateral_factor: s.collateral_factor.to_string(),
            liquidation_incentive: s.liquidation_incentive.to_string(),
            borrow_enabled: s.borrow_enabled,
        }
    }
}
