//! Event Feed Service
//!
//! Polls the chain head, pulls MToken logs for every tracked market and
//! hands them to the dispatcher as ordered block-range batches.
//!
//! ```text
//!   eth_blockNumber ──► cursor..=to ──► eth_getLogs (5 event topics)
//!                                          │
//!                                          ▼
//!                         decode ──► + block ticks ──► eth_getBlockByNumber
//!                                          │             (timestamps)
//!                                          ▼
//!                                  FeedBatch { items } ──► mpsc
//! ```
//!
//! Items inside a batch are ordered by (block, log index); a block's tick
//! comes after that block's events.

use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use backoff::ExponentialBackoff;
use ethers::abi::RawLog;
use ethers::contract::{EthEvent, EthLogDecode};
use ethers::providers::Middleware;
use ethers::types::{Address, Filter, Log, H256};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::bindings::{
    BorrowFilter, LiquidateBorrowFilter, MTokenEvents, MintFilter, RedeemFilter,
    RepayBorrowFilter,
};
use crate::config::Config;
use crate::error::{IndexerError, IndexerResult};
use crate::types::{BlockRef, EventMeta, FeedBatch, FeedItem, LendingEvent, LendingEventKind};

/// 피드 설정
#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub markets: Vec<Address>,
    /// 블록 틱 기준점 (보통 START_BLOCK)
    pub tick_anchor: u64,
    pub block_interval: u64,
    pub max_block_range: u64,
    pub poll_interval: Duration,
    pub confirmations: u64,
}

impl From<&Config> for FeedConfig {
    fn from(config: &Config) -> Self {
        Self {
            markets: config.markets.iter().map(|m| m.address).collect(),
            tick_anchor: config.start_block,
            block_interval: config.block_interval,
            max_block_range: config.max_block_range,
            poll_interval: config.poll_interval,
            confirmations: config.confirmations,
        }
    }
}

/// 디코딩된 로그 (타임스탬프 붙이기 전)
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedLog {
    pub market: Address,
    pub block_number: u64,
    pub tx_hash: H256,
    pub log_index: u64,
    pub kind: LendingEventKind,
}

/// 로그 폴링 기반 이벤트 피드
pub struct LogFeed<M> {
    client: Arc<M>,
    config: FeedConfig,
}

impl<M: Middleware + 'static> LogFeed<M> {
    pub fn new(client: Arc<M>, config: FeedConfig) -> Self {
        Self { client, config }
    }

    /// `from_block`부터 헤드를 따라가며 배치 전송
    ///
    /// 취소되거나 수신측이 닫히면 종료
    pub async fn run(
        self,
        from_block: u64,
        tx: mpsc::Sender<FeedBatch>,
        cancel: CancellationToken,
    ) -> IndexerResult<()> {
        let mut cursor = from_block;
        info!(from_block, markets = self.config.markets.len(), "Event feed started");

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let head = match self.safe_head().await {
                Ok(head) => head,
                Err(e) => {
                    warn!(error = %e, "Failed to fetch chain head");
                    if self.pause(&cancel).await {
                        break;
                    }
                    continue;
                }
            };

            if cursor > head {
                if self.pause(&cancel).await {
                    break;
                }
                continue;
            }

            let to_block = head.min(cursor + self.config.max_block_range - 1);
            let batch = match self.fetch_batch(cursor, to_block).await {
                Ok(batch) => batch,
                Err(e) => {
                    error!(from_block = cursor, to_block, error = %e, "Failed to build feed batch");
                    if self.pause(&cancel).await {
                        break;
                    }
                    continue;
                }
            };

            debug!(from_block = cursor, to_block, items = batch.items.len(), "Feed batch ready");

            tokio::select! {
                _ = cancel.cancelled() => break,
                sent = tx.send(batch) => {
                    if sent.is_err() {
                        warn!("Dispatcher channel closed, stopping feed");
                        break;
                    }
                }
            }

            cursor = to_block + 1;
        }

        info!(next_block = cursor, "Event feed stopped");
        Ok(())
    }

    /// true면 취소됨
    async fn pause(&self, cancel: &CancellationToken) -> bool {
        tokio::select! {
            _ = cancel.cancelled() => true,
            _ = tokio::time::sleep(self.config.poll_interval) => false,
        }
    }

    async fn safe_head(&self) -> IndexerResult<u64> {
        let head = self
            .client
            .get_block_number()
            .await
            .map_err(|e| IndexerError::Rpc(format!("eth_blockNumber: {}", e)))?;
        Ok(head.as_u64().saturating_sub(self.config.confirmations))
    }

    /// 블록 범위 하나를 배치로 변환
    pub async fn fetch_batch(&self, from_block: u64, to_block: u64) -> IndexerResult<FeedBatch> {
        let filter = Filter::new()
            .address(self.config.markets.clone())
            .topic0(event_signatures())
            .from_block(from_block)
            .to_block(to_block);

        let logs = with_retry("eth_getLogs", || self.client.get_logs(&filter)).await?;

        let tracked = &self.config.markets;
        let decoded: Vec<DecodedLog> = logs
            .iter()
            .filter(|log| tracked.contains(&log.address))
            .filter_map(decode_log)
            .collect();

        let ticks = tick_blocks(
            from_block,
            to_block,
            self.config.tick_anchor,
            self.config.block_interval,
        );

        let needed: BTreeSet<u64> = decoded
            .iter()
            .map(|d| d.block_number)
            .chain(ticks.iter().copied())
            .collect();

        let mut timestamps = HashMap::with_capacity(needed.len());
        for number in needed {
            timestamps.insert(number, self.block_timestamp(number).await?);
        }

        assemble_batch(from_block, to_block, decoded, &ticks, &timestamps)
    }

    async fn block_timestamp(&self, number: u64) -> IndexerResult<u64> {
        let block = with_retry("eth_getBlockByNumber", || self.client.get_block(number)).await?;
        block
            .map(|b| b.timestamp.as_u64())
            .ok_or_else(|| IndexerError::Rpc(format!("block {} not found", number)))
    }
}

/// 구독 대상 이벤트 topic0 목록
pub fn event_signatures() -> Vec<H256> {
    vec![
        BorrowFilter::signature(),
        RepayBorrowFilter::signature(),
        MintFilter::signature(),
        RedeemFilter::signature(),
        LiquidateBorrowFilter::signature(),
    ]
}

/// 로그 하나를 디코딩. 디코딩 불가/필드 누락 로그는 경고 후 건너뜀
pub fn decode_log(log: &Log) -> Option<DecodedLog> {
    if log.removed == Some(true) {
        return None;
    }

    let (Some(block_number), Some(tx_hash), Some(log_index)) =
        (log.block_number, log.transaction_hash, log.log_index)
    else {
        warn!(market = ?log.address, "Skipping log without block/tx/index metadata");
        return None;
    };

    let raw = RawLog {
        topics: log.topics.clone(),
        data: log.data.to_vec(),
    };

    match MTokenEvents::decode_log(&raw) {
        Ok(event) => Some(DecodedLog {
            market: log.address,
            block_number: block_number.as_u64(),
            tx_hash,
            log_index: log_index.as_u64(),
            kind: event.into(),
        }),
        Err(e) => {
            warn!(
                tx_hash = ?tx_hash,
                log_index = %log_index,
                error = %e,
                "Skipping undecodable log"
            );
            None
        }
    }
}

/// `[from, to]` 범위에서 `(block - anchor) % interval == 0` 인 블록
pub fn tick_blocks(from_block: u64, to_block: u64, anchor: u64, interval: u64) -> Vec<u64> {
    if interval == 0 {
        return Vec::new();
    }
    let start = from_block.max(anchor);
    if start > to_block {
        return Vec::new();
    }
    let offset = (start - anchor) % interval;
    let first = if offset == 0 {
        start
    } else {
        start + (interval - offset)
    };
    (first..=to_block).step_by(interval as usize).collect()
}

/// 이벤트와 틱을 블록 순서로 합쳐 배치 생성
pub fn assemble_batch(
    from_block: u64,
    to_block: u64,
    decoded: Vec<DecodedLog>,
    ticks: &[u64],
    timestamps: &HashMap<u64, u64>,
) -> IndexerResult<FeedBatch> {
    let block_ref = |number: u64| -> IndexerResult<BlockRef> {
        timestamps
            .get(&number)
            .map(|&timestamp| BlockRef { number, timestamp })
            .ok_or_else(|| IndexerError::Rpc(format!("missing timestamp for block {}", number)))
    };

    // (block, 0=event / 1=tick, log index)
    let mut keyed: Vec<((u64, u8, u64), FeedItem)> = Vec::with_capacity(decoded.len() + ticks.len());

    for d in decoded {
        let block = block_ref(d.block_number)?;
        keyed.push((
            (d.block_number, 0, d.log_index),
            FeedItem::Event(LendingEvent {
                meta: EventMeta {
                    market: d.market,
                    block,
                    tx_hash: d.tx_hash,
                    log_index: d.log_index,
                },
                kind: d.kind,
            }),
        ));
    }

    for &number in ticks {
        keyed.push(((number, 1, 0), FeedItem::BlockTick(block_ref(number)?)));
    }

    keyed.sort_by_key(|(key, _)| *key);

    Ok(FeedBatch {
        from_block,
        to_block,
        items: keyed.into_iter().map(|(_, item)| item).collect(),
    })
}

/// RPC 호출 재시도 (모든 에러를 일시적 에러로 취급)
///
/// 지연: 0.4, 0.8, 1.6, ... 최대 30초 간격, 총 2분
async fn with_retry<T, E, F, Fut>(what: &'static str, mut op: F) -> IndexerResult<T>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let policy = ExponentialBackoff {
        initial_interval: Duration::from_millis(400),
        randomization_factor: 0.1,
        multiplier: 2.0,
        max_interval: Duration::from_secs(30),
        max_elapsed_time: Some(Duration::from_secs(120)),
        ..Default::default()
    };

    backoff::future::retry(policy, || {
        let fut = op();
        async move {
            fut.await.map_err(|e| {
                debug!(call = what, error = %e, "Retrying RPC call");
                backoff::Error::transient(e)
            })
        }
    })
    .await
    .map_err(|e| IndexerError::Rpc(format!("{}: {}", what, e)))
}
