//! Contract Reader Service
//!
//! Point-in-time contract reads used to fill in fields that events do not
//! carry (balances, market totals, risk parameters).
//!
//! # Features
//! - MToken / Comptroller view calls through generated bindings
//! - Optional block pinning (archive reads at the event's block)

use std::sync::Arc;

use async_trait::async_trait;
use ethers::abi::Detokenize;
use ethers::contract::{ContractCall, ContractError};
use ethers::providers::Middleware;
use ethers::types::{Address, BlockId, BlockNumber, U256};

use super::bindings::{Comptroller, MToken};
use crate::error::{IndexerError, IndexerResult};
use crate::types::hex_address;

/// uint256을 반환하는 조회
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UintQuery {
    // MToken
    TotalBorrows,
    Cash,
    TotalReserves,
    ReserveFactor,
    BorrowBalance(Address),
    /// mToken 잔고 (공급 포지션)
    SupplyBalance(Address),

    // Comptroller (인자는 MToken 주소)
    CollateralFactor(Address),
    BorrowCap(Address),
    SupplyCap(Address),
    LiquidationIncentive,
}

impl UintQuery {
    /// ABI 함수 이름 (로그용)
    pub fn function_name(&self) -> &'static str {
        match self {
            UintQuery::TotalBorrows => "totalBorrows",
            UintQuery::Cash => "getCash",
            UintQuery::TotalReserves => "totalReserves",
            UintQuery::ReserveFactor => "reserveFactorMantissa",
            UintQuery::BorrowBalance(_) => "borrowBalanceStored",
            UintQuery::SupplyBalance(_) => "balanceOf",
            UintQuery::CollateralFactor(_) => "markets.collateralFactorMantissa",
            UintQuery::BorrowCap(_) => "borrowCaps",
            UintQuery::SupplyCap(_) => "supplyCaps",
            UintQuery::LiquidationIncentive => "liquidationIncentiveMantissa",
        }
    }
}

/// bool을 반환하는 조회 (Comptroller)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlagQuery {
    IsListed(Address),
    BorrowPaused(Address),
}

impl FlagQuery {
    pub fn function_name(&self) -> &'static str {
        match self {
            FlagQuery::IsListed(_) => "markets.isListed",
            FlagQuery::BorrowPaused(_) => "borrowGuardianPaused",
        }
    }
}

/// 조회 요청: 컨트랙트 + 함수/인자 + 기준 블록
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadRequest<Q> {
    pub contract: Address,
    pub query: Q,
    /// None이면 latest
    pub block: Option<u64>,
}

/// 컨트랙트 조회 인터페이스
///
/// 실패는 일시적인 것으로 간주. 기본값 대체는 호출자(engine::reads)가 담당
#[async_trait]
pub trait ContractReader: Send + Sync {
    async fn read_uint(&self, request: &ReadRequest<UintQuery>) -> IndexerResult<U256>;

    async fn read_flag(&self, request: &ReadRequest<FlagQuery>) -> IndexerResult<bool>;
}

/// ethers 기반 ContractReader
pub struct EthContractReader<M> {
    client: Arc<M>,
}

impl<M: Middleware + 'static> EthContractReader<M> {
    pub fn new(client: Arc<M>) -> Self {
        Self { client }
    }
}

async fn call_at<M, D>(call: ContractCall<M, D>, block: Option<u64>) -> Result<D, ContractError<M>>
where
    M: Middleware + 'static,
    D: Detokenize,
{
    let call = match block {
        Some(number) => call.block(BlockId::Number(BlockNumber::Number(number.into()))),
        None => call,
    };
    call.call().await
}

fn read_error<Q, E: std::fmt::Display>(
    request: &ReadRequest<Q>,
    function: &'static str,
    err: E,
) -> IndexerError {
    IndexerError::Read {
        contract: hex_address(&request.contract),
        function,
        message: err.to_string(),
    }
}

#[async_trait]
impl<M: Middleware + 'static> ContractReader for EthContractReader<M> {
    async fn read_uint(&self, request: &ReadRequest<UintQuery>) -> IndexerResult<U256> {
        let mtoken = MToken::new(request.contract, self.client.clone());
        let comptroller = Comptroller::new(request.contract, self.client.clone());
        let block = request.block;

        let result = match request.query {
            UintQuery::TotalBorrows => call_at(mtoken.total_borrows(), block).await,
            UintQuery::Cash => call_at(mtoken.get_cash(), block).await,
            UintQuery::TotalReserves => call_at(mtoken.total_reserves(), block).await,
            UintQuery::ReserveFactor => call_at(mtoken.reserve_factor_mantissa(), block).await,
            UintQuery::BorrowBalance(account) => {
                call_at(mtoken.borrow_balance_stored(account), block).await
            }
            UintQuery::SupplyBalance(account) => call_at(mtoken.balance_of(account), block).await,
            UintQuery::CollateralFactor(market) => call_at(comptroller.markets(market), block)
                .await
                .map(|(_, collateral_factor, _)| collateral_factor),
            UintQuery::BorrowCap(market) => call_at(comptroller.borrow_caps(market), block).await,
            UintQuery::SupplyCap(market) => call_at(comptroller.supply_caps(market), block).await,
            UintQuery::LiquidationIncentive => {
                call_at(comptroller.liquidation_incentive_mantissa(), block).await
            }
        };

        result.map_err(|e| read_error(request, request.query.function_name(), e))
    }

    async fn read_flag(&self, request: &ReadRequest<FlagQuery>) -> IndexerResult<bool> {
        let comptroller = Comptroller::new(request.contract, self.client.clone());
        let block = request.block;

        let result = match request.query {
            FlagQuery::IsListed(market) => call_at(comptroller.markets(market), block)
                .await
                .map(|(is_listed, _, _)| is_listed),
            FlagQuery::BorrowPaused(market) => {
                call_at(comptroller.borrow_guardian_paused(market), block).await
            }
        };

        result.map_err(|e| read_error(request, request.query.function_name(), e))
    }
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::RwLock;
    use std::time::Duration;

    /// 조회 결과를 미리 지정하는 Mock
    ///
    /// 지정되지 않은 uint 조회는 0, flag 조회는 false 반환
    #[derive(Default)]
    pub struct MockContractReader {
        uints: RwLock<HashMap<UintQuery, U256>>,
        flags: RwLock<HashMap<FlagQuery, bool>>,
        failing: RwLock<HashSet<&'static str>>,
        slow: RwLock<HashSet<&'static str>>,
        slow_blocks: RwLock<HashSet<u64>>,
        calls: AtomicUsize,
        last_block: RwLock<Option<u64>>,
    }

    impl MockContractReader {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set_uint(&self, query: UintQuery, value: u64) {
            self.uints.write().unwrap().insert(query, U256::from(value));
        }

        pub fn set_flag(&self, query: FlagQuery, value: bool) {
            self.flags.write().unwrap().insert(query, value);
        }

        /// 함수 이름 단위로 실패 주입
        pub fn fail(&self, function: &'static str) {
            self.failing.write().unwrap().insert(function);
        }

        /// 함수 이름 단위로 지연 주입 (타임아웃 테스트)
        pub fn stall(&self, function: &'static str) {
            self.slow.write().unwrap().insert(function);
        }

        /// 해당 블록에 고정된 조회 전체에 지연 주입
        pub fn stall_block(&self, block: u64) {
            self.slow_blocks.write().unwrap().insert(block);
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        pub fn last_block(&self) -> Option<u64> {
            *self.last_block.read().unwrap()
        }

        async fn enter<Q>(&self, request: &ReadRequest<Q>, function: &'static str) -> IndexerResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_block.write().unwrap() = request.block;
            let stalled = self.slow.read().unwrap().contains(function)
                || request
                    .block
                    .map_or(false, |b| self.slow_blocks.read().unwrap().contains(&b));
            if stalled {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            if self.failing.read().unwrap().contains(function) {
                return Err(read_error(request, function, "injected failure"));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl ContractReader for MockContractReader {
        async fn read_uint(&self, request: &ReadRequest<UintQuery>) -> IndexerResult<U256> {
            self.enter(request, request.query.function_name()).await?;
            let value = self.uints.read().unwrap().get(&request.query).copied();
            Ok(value.unwrap_or_default())
        }

        async fn read_flag(&self, request: &ReadRequest<FlagQuery>) -> IndexerResult<bool> {
            self.enter(request, request.query.function_name()).await?;
            let value = self.flags.read().unwrap().get(&request.query).copied();
            Ok(value.unwrap_or_default())
        }
    }
}
