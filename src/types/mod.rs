//! Common Types Module
//!
//! 피드, 엔진, 스토어가 공유하는 도메인 타입 정의

use ethers::types::{Address, H256, U256};
use serde::{Deserialize, Serialize};

/// 블록 번호 + 타임스탬프
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRef {
    pub number: u64,
    /// unix seconds
    pub timestamp: u64,
}

/// 이벤트가 발생한 위치
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventMeta {
    /// 이벤트를 발생시킨 MToken (마켓 식별자)
    pub market: Address,
    pub block: BlockRef,
    pub tx_hash: H256,
    pub log_index: u64,
}

/// 디코딩된 MToken 이벤트
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LendingEventKind {
    Borrow {
        borrower: Address,
        borrow_amount: U256,
        account_borrows: U256,
        total_borrows: U256,
    },
    RepayBorrow {
        payer: Address,
        borrower: Address,
        repay_amount: U256,
        account_borrows: U256,
        total_borrows: U256,
    },
    Mint {
        minter: Address,
        mint_amount: U256,
        mint_tokens: U256,
    },
    Redeem {
        redeemer: Address,
        redeem_amount: U256,
        redeem_tokens: U256,
    },
    LiquidateBorrow {
        liquidator: Address,
        borrower: Address,
        repay_amount: U256,
        m_token_collateral: Address,
        seize_tokens: U256,
    },
}

impl LendingEventKind {
    pub fn name(&self) -> &'static str {
        match self {
            LendingEventKind::Borrow { .. } => "Borrow",
            LendingEventKind::RepayBorrow { .. } => "RepayBorrow",
            LendingEventKind::Mint { .. } => "Mint",
            LendingEventKind::Redeem { .. } => "Redeem",
            LendingEventKind::LiquidateBorrow { .. } => "LiquidateBorrow",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LendingEvent {
    pub meta: EventMeta,
    pub kind: LendingEventKind,
}

impl LendingEvent {
    /// 로그 출력용 이벤트 소스 (`txHash-logIndex`)
    pub fn source(&self) -> String {
        format!("{:#x}-{}", self.meta.tx_hash, self.meta.log_index)
    }
}

/// 피드가 전달하는 단위
#[derive(Debug, Clone, PartialEq)]
pub enum FeedItem {
    Event(LendingEvent),
    /// 블록 틱: 추적 중인 모든 마켓의 스냅샷을 트리거
    BlockTick(BlockRef),
}

impl FeedItem {
    pub fn block_number(&self) -> u64 {
        match self {
            FeedItem::Event(e) => e.meta.block.number,
            FeedItem::BlockTick(b) => b.number,
        }
    }
}

/// 블록 범위 하나에 해당하는 피드 아이템 묶음
///
/// 배치 내 모든 아이템이 끝나야 `to_block`까지 체크포인트가 전진함
#[derive(Debug, Clone, PartialEq)]
pub struct FeedBatch {
    pub from_block: u64,
    pub to_block: u64,
    pub items: Vec<FeedItem>,
}

/// 트랜잭션 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionKind {
    Supply,
    Withdraw,
    Borrow,
    Repay,
    Liquidate,
    Liquidated,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Supply => "SUPPLY",
            TransactionKind::Withdraw => "WITHDRAW",
            TransactionKind::Borrow => "BORROW",
            TransactionKind::Repay => "REPAY",
            TransactionKind::Liquidate => "LIQUIDATE",
            TransactionKind::Liquidated => "LIQUIDATED",
        }
    }
}

impl std::fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 주소를 전체 소문자 hex로 (`Display`는 축약형이라 사용하지 않음)
pub fn hex_address(address: &Address) -> String {
    format!("{:#x}", address)
}

pub fn hex_hash(hash: &H256) -> String {
    format!("{:#x}", hash)
}

/// 금액 타입 (로그/표시용 변환)
#[derive(Debug, Clone, Copy)]
pub struct Amount {
    pub value: U256,
    pub decimals: u8,
}

impl Amount {
    pub fn new(value: U256, decimals: u8) -> Self {
        Self { value, decimals }
    }

    /// Mantissa (1e18 스케일) 값
    pub fn mantissa(value: U256) -> Self {
        Self { value, decimals: 18 }
    }

    /// 사람이 읽기 쉬운 형태로 변환
    pub fn to_human_readable(&self) -> f64 {
        u256_to_f64(self.value) / 10f64.powi(self.decimals as i32)
    }
}

/// U256 → f64 (정밀도 손실 허용, 비율/표시 전용)
pub fn u256_to_f64(value: U256) -> f64 {
    value
        .0
        .iter()
        .rev()
        .fold(0f64, |acc, limb| acc * 18_446_744_073_709_551_616f64 + *limb as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_address_is_full_lowercase() {
        let addr: Address = "0x628ff693426583D9a7FB391E54366292F509D457".parse().unwrap();
        assert_eq!(hex_address(&addr), "0x628ff693426583d9a7fb391e54366292f509d457");
    }

    #[test]
    fn test_transaction_kind_labels() {
        assert_eq!(TransactionKind::Supply.as_str(), "SUPPLY");
        assert_eq!(TransactionKind::Liquidated.to_string(), "LIQUIDATED");
        assert_eq!(
            serde_json::to_string(&TransactionKind::Withdraw).unwrap(),
            "\"WITHDRAW\""
        );
    }

    #[test]
    fn test_amount_human_readable() {
        let eth = Amount::new(U256::from(1_500_000_000_000_000_000u128), 18); // 1.5 ETH
        assert!((eth.to_human_readable() - 1.5).abs() < 0.0001);

        let usdc = Amount::new(U256::from(1_500_000u64), 6); // 1.5 USDC
        assert!((usdc.to_human_readable() - 1.5).abs() < 0.0001);
    }

    #[test]
    fn test_u256_to_f64_beyond_u128() {
        let big = U256::from(u128::MAX) * U256::from(4u64);
        let expected = u128::MAX as f64 * 4.0;
        assert!((u256_to_f64(big) / expected - 1.0).abs() < 1e-12);
    }
}
