//! Contract Bindings
//!
//! MToken / Comptroller ABI 중 인덱서가 사용하는 부분만 선언

use ethers::contract::abigen;

use crate::types::LendingEventKind;

abigen!(
    MToken,
    r#"[
        function totalBorrows() external view returns (uint256)
        function getCash() external view returns (uint256)
        function totalReserves() external view returns (uint256)
        function reserveFactorMantissa() external view returns (uint256)
        function borrowBalanceStored(address account) external view returns (uint256)
        function balanceOf(address owner) external view returns (uint256)
        event Borrow(address borrower, uint256 borrowAmount, uint256 accountBorrows, uint256 totalBorrows)
        event RepayBorrow(address payer, address borrower, uint256 repayAmount, uint256 accountBorrows, uint256 totalBorrows)
        event Mint(address minter, uint256 mintAmount, uint256 mintTokens)
        event Redeem(address redeemer, uint256 redeemAmount, uint256 redeemTokens)
        event LiquidateBorrow(address liquidator, address borrower, uint256 repayAmount, address mTokenCollateral, uint256 seizeTokens)
    ]"#
);

abigen!(
    Comptroller,
    r#"[
        function markets(address mTokenAddress) external view returns (bool, uint256, bool)
        function borrowCaps(address mToken) external view returns (uint256)
        function supplyCaps(address mToken) external view returns (uint256)
        function liquidationIncentiveMantissa() external view returns (uint256)
        function borrowGuardianPaused(address mToken) external view returns (bool)
    ]"#
);

impl From<MTokenEvents> for LendingEventKind {
    fn from(event: MTokenEvents) -> Self {
        match event {
            MTokenEvents::BorrowFilter(e) => LendingEventKind::Borrow {
                borrower: e.borrower,
                borrow_amount: e.borrow_amount,
                account_borrows: e.account_borrows,
                total_borrows: e.total_borrows,
            },
            MTokenEvents::RepayBorrowFilter(e) => LendingEventKind::RepayBorrow {
                payer: e.payer,
                borrower: e.borrower,
                repay_amount: e.repay_amount,
                account_borrows: e.account_borrows,
                total_borrows: e.total_borrows,
            },
            MTokenEvents::MintFilter(e) => LendingEventKind::Mint {
                minter: e.minter,
                mint_amount: e.mint_amount,
                mint_tokens: e.mint_tokens,
            },
            MTokenEvents::RedeemFilter(e) => LendingEventKind::Redeem {
                redeemer: e.redeemer,
                redeem_amount: e.redeem_amount,
                redeem_tokens: e.redeem_tokens,
            },
            MTokenEvents::LiquidateBorrowFilter(e) => LendingEventKind::LiquidateBorrow {
                liquidator: e.liquidator,
                borrower: e.borrower,
                repay_amount: e.repay_amount,
                m_token_collateral: e.m_token_collateral,
                seize_tokens: e.seize_tokens,
            },
        }
    }
}
