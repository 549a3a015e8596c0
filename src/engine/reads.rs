//! Attempt-with-default reads
//!
//! Every external read goes through `attempt_with_default`: the call is
//! timed out on its own, and any failure is replaced with the type's
//! default (zero / false) plus a warning. Read failures never propagate.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use ethers::types::{Address, U256};
use tracing::warn;

use crate::error::{IndexerError, IndexerResult};
use crate::services::{ContractReader, FlagQuery, ReadRequest, UintQuery};
use crate::types::hex_address;

/// 조회 결과 + 성공 여부
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attempt<T> {
    pub value: T,
    pub succeeded: bool,
}

impl<T: Default> Attempt<T> {
    fn fallback() -> Self {
        Self {
            value: T::default(),
            succeeded: false,
        }
    }
}

/// 타임아웃 + 실패 시 기본값 대체
///
/// 경고 로그에 컨트랙트, 쿼리 인자, 고정 블록을 남겨 어느 마켓/사용자의 조회인지 추적 가능
pub async fn attempt_with_default<T, Q, F>(
    request: &ReadRequest<Q>,
    function: &'static str,
    timeout: Duration,
    read: F,
) -> Attempt<T>
where
    T: Default,
    Q: fmt::Debug,
    F: Future<Output = IndexerResult<T>>,
{
    let e = match tokio::time::timeout(timeout, read).await {
        Ok(Ok(value)) => {
            return Attempt {
                value,
                succeeded: true,
            }
        }
        Ok(Err(e)) => e,
        Err(_) => IndexerError::ReadTimeout {
            contract: hex_address(&request.contract),
            function,
            timeout_ms: timeout.as_millis() as u64,
        },
    };

    warn!(
        function,
        contract = %hex_address(&request.contract),
        query = ?request.query,
        block = ?request.block,
        error = %e,
        "Read failed, using default"
    );
    Attempt::fallback()
}

/// 엔진이 사용하는 조회 핸들 (리더 + 타임아웃 + 블록 고정 여부)
#[derive(Clone)]
pub struct ChainReads {
    reader: Arc<dyn ContractReader>,
    timeout: Duration,
    pin_to_block: bool,
}

impl ChainReads {
    pub fn new(reader: Arc<dyn ContractReader>, timeout: Duration, pin_to_block: bool) -> Self {
        Self {
            reader,
            timeout,
            pin_to_block,
        }
    }

    fn request<Q>(&self, contract: Address, query: Q, block: u64) -> ReadRequest<Q> {
        ReadRequest {
            contract,
            query,
            block: self.pin_to_block.then_some(block),
        }
    }

    pub async fn uint(&self, contract: Address, query: UintQuery, block: u64) -> Attempt<U256> {
        let request = self.request(contract, query, block);
        attempt_with_default(
            &request,
            query.function_name(),
            self.timeout,
            self.reader.read_uint(&request),
        )
        .await
    }

    pub async fn flag(&self, contract: Address, query: FlagQuery, block: u64) -> Attempt<bool> {
        let request = self.request(contract, query, block);
        attempt_with_default(
            &request,
            query.function_name(),
            self.timeout,
            self.reader.read_flag(&request),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::mock::MockContractReader;

    fn reads(reader: Arc<MockContractReader>, pin: bool) -> ChainReads {
        ChainReads::new(reader, Duration::from_millis(50), pin)
    }

    #[tokio::test]
    async fn test_successful_read() {
        let reader = Arc::new(MockContractReader::new());
        reader.set_uint(UintQuery::TotalBorrows, 42);

        let attempt = reads(reader, true)
            .uint(Address::zero(), UintQuery::TotalBorrows, 7)
            .await;
        assert_eq!(attempt, Attempt { value: U256::from(42u64), succeeded: true });
    }

    #[tokio::test]
    async fn test_failed_read_defaults_to_zero() {
        let reader = Arc::new(MockContractReader::new());
        reader.set_uint(UintQuery::Cash, 10);
        reader.fail("getCash");

        let attempt = reads(reader, true).uint(Address::zero(), UintQuery::Cash, 7).await;
        assert!(!attempt.succeeded);
        assert!(attempt.value.is_zero());
    }

    #[tokio::test]
    async fn test_timed_out_read_defaults() {
        let reader = Arc::new(MockContractReader::new());
        let market = Address::repeat_byte(3);
        reader.set_flag(FlagQuery::IsListed(market), true);
        reader.stall("markets.isListed");

        let attempt = reads(reader, true)
            .flag(Address::zero(), FlagQuery::IsListed(market), 7)
            .await;
        assert_eq!(attempt, Attempt { value: false, succeeded: false });
    }

    #[tokio::test]
    async fn test_timeout_error_names_contract() {
        let request = ReadRequest {
            contract: Address::repeat_byte(0x42),
            query: UintQuery::SupplyBalance(Address::repeat_byte(7)),
            block: Some(12),
        };

        let attempt: Attempt<U256> = attempt_with_default(
            &request,
            "balanceOf",
            Duration::from_millis(10),
            std::future::pending(),
        )
        .await;
        assert!(!attempt.succeeded);

        let e = IndexerError::ReadTimeout {
            contract: hex_address(&request.contract),
            function: "balanceOf",
            timeout_ms: 10,
        };
        assert!(e.to_string().contains(&hex_address(&Address::repeat_byte(0x42))));
    }

    #[tokio::test]
    async fn test_block_pinning() {
        let reader = Arc::new(MockContractReader::new());

        reads(reader.clone(), true)
            .uint(Address::zero(), UintQuery::TotalReserves, 99)
            .await;
        assert_eq!(reader.last_block(), Some(99));

        reads(reader.clone(), false)
            .uint(Address::zero(), UintQuery::TotalReserves, 99)
            .await;
        assert_eq!(reader.last_block(), None);
    }
}
