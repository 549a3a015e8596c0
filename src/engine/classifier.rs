//! Event Classifier & Record Builder
//!
//! Maps one decoded event to its transaction record drafts. No reads, no
//! side effects.
//!
//! | Event           | Kind                   | user                  | related               |
//! |-----------------|------------------------|-----------------------|-----------------------|
//! | Borrow          | BORROW                 | borrower              | -                     |
//! | RepayBorrow     | REPAY                  | borrower              | payer if ≠ borrower   |
//! | Mint            | SUPPLY                 | minter                | -                     |
//! | Redeem          | WITHDRAW               | redeemer              | -                     |
//! | LiquidateBorrow | LIQUIDATED / LIQUIDATE | borrower / liquidator | liquidator / borrower |

use ethers::types::{Address, U256};

use crate::db::TransactionRecord;
use crate::error::{IndexerError, IndexerResult};
use crate::types::{LendingEvent, LendingEventKind, TransactionKind};

/// 이벤트 필드 검증
///
/// 참여 주소가 zero address인 이벤트는 처리하지 않음
pub fn validate_event(event: &LendingEvent) -> IndexerResult<()> {
    let participants: Vec<(&str, &Address)> = match &event.kind {
        LendingEventKind::Borrow { borrower, .. } => vec![("borrower", borrower)],
        LendingEventKind::RepayBorrow { payer, borrower, .. } => {
            vec![("payer", payer), ("borrower", borrower)]
        }
        LendingEventKind::Mint { minter, .. } => vec![("minter", minter)],
        LendingEventKind::Redeem { redeemer, .. } => vec![("redeemer", redeemer)],
        LendingEventKind::LiquidateBorrow {
            liquidator,
            borrower,
            ..
        } => vec![("liquidator", liquidator), ("borrower", borrower)],
    };

    for (role, address) in participants {
        if address.is_zero() {
            return Err(IndexerError::MalformedEvent(format!(
                "{} {} has zero {}",
                event.kind.name(),
                event.source(),
                role
            )));
        }
    }
    Ok(())
}

/// 이벤트 하나 → 트랜잭션 레코드 1~2개
pub fn build_records(event: &LendingEvent) -> Vec<TransactionRecord> {
    let base_id = event.source();

    let draft = |id: String,
                 user: Address,
                 kind: TransactionKind,
                 amount: U256,
                 token_amount: Option<U256>,
                 related: Option<Address>| TransactionRecord {
        id,
        user_address: user,
        market: event.meta.market,
        kind,
        amount,
        token_amount,
        block_number: event.meta.block.number,
        block_timestamp: event.meta.block.timestamp,
        tx_hash: event.meta.tx_hash,
        related_address: related,
    };

    match &event.kind {
        LendingEventKind::Borrow {
            borrower,
            borrow_amount,
            ..
        } => vec![draft(
            base_id,
            *borrower,
            TransactionKind::Borrow,
            *borrow_amount,
            None,
            None,
        )],

        LendingEventKind::RepayBorrow {
            payer,
            borrower,
            repay_amount,
            ..
        } => vec![draft(
            base_id,
            *borrower,
            TransactionKind::Repay,
            *repay_amount,
            None,
            (payer != borrower).then_some(*payer),
        )],

        LendingEventKind::Mint {
            minter,
            mint_amount,
            mint_tokens,
        } => vec![draft(
            base_id,
            *minter,
            TransactionKind::Supply,
            *mint_amount,
            Some(*mint_tokens),
            None,
        )],

        LendingEventKind::Redeem {
            redeemer,
            redeem_amount,
            redeem_tokens,
        } => vec![draft(
            base_id,
            *redeemer,
            TransactionKind::Withdraw,
            *redeem_amount,
            Some(*redeem_tokens),
            None,
        )],

        LendingEventKind::LiquidateBorrow {
            liquidator,
            borrower,
            repay_amount,
            seize_tokens,
            ..
        } => vec![
            draft(
                format!("{}-borrower", base_id),
                *borrower,
                TransactionKind::Liquidated,
                *repay_amount,
                Some(*seize_tokens),
                Some(*liquidator),
            ),
            draft(
                format!("{}-liquidator", base_id),
                *liquidator,
                TransactionKind::Liquidate,
                *repay_amount,
                Some(*seize_tokens),
                Some(*borrower),
            ),
        ],
    }
}
