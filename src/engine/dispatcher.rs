//! Dispatcher
//!
//! Consumes feed batches, fans items out to the engine under a
//! concurrency limit, and advances the chain checkpoint once a whole
//! batch has completed.
//!
//! ```text
//!   FeedBatch ─► for item (arrival order):
//!                  permit  = semaphore (MAX_IN_FLIGHT)
//!                  ticket  = locks.acquire(engine.lock_keys(item))
//!                  spawn { ticket.ready(); engine.process(item) }
//!                ─► join all ─► save_checkpoint(to_block)
//! ```

use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::locks::{KeyedLocks, LockKey};
use super::snapshot::SnapshotOutcome;
use super::writer::bounded_write;
use super::{ItemReport, ReconciliationEngine};
use crate::db::LendingStore;
use crate::error::IndexerResult;
use crate::types::FeedBatch;

/// 배치 처리 통계
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub events: usize,
    pub ticks: usize,
    /// UnknownMarket / MalformedEvent
    pub skipped_events: usize,
    pub record_failures: usize,
    pub position_failures: usize,
    pub snapshot_failures: usize,
    /// panic으로 끝난 작업
    pub aborted: usize,
    /// 취소로 중단됨 (체크포인트 미갱신)
    pub interrupted: bool,
}

impl BatchSummary {
    fn absorb(&mut self, report: &ItemReport) {
        match report {
            ItemReport::Event(Ok(event)) => {
                self.events += 1;
                self.record_failures += event.record_failures();
                self.position_failures += event.position_failures();
            }
            ItemReport::Event(Err(_)) => {
                self.events += 1;
                self.skipped_events += 1;
            }
            ItemReport::Tick { outcomes, .. } => {
                self.ticks += 1;
                self.snapshot_failures += outcomes
                    .iter()
                    .filter(|(_, o)| matches!(o, SnapshotOutcome::Failed(_)))
                    .count();
            }
        }
    }
}

pub struct Dispatcher {
    engine: Arc<ReconciliationEngine>,
    store: Arc<dyn LendingStore>,
    chain_id: u64,
    semaphore: Arc<Semaphore>,
    locks: KeyedLocks<LockKey>,
}

impl Dispatcher {
    pub fn new(
        engine: Arc<ReconciliationEngine>,
        store: Arc<dyn LendingStore>,
        chain_id: u64,
        max_in_flight: usize,
    ) -> Self {
        Self {
            engine,
            store,
            chain_id,
            semaphore: Arc::new(Semaphore::new(max_in_flight.max(1))),
            locks: KeyedLocks::new(),
        }
    }

    /// 재시작 시 시작 블록: `max(start_block, checkpoint + 1)`
    pub async fn resume_block(
        store: &dyn LendingStore,
        chain_id: u64,
        start_block: u64,
    ) -> IndexerResult<u64> {
        let checkpoint = store.load_checkpoint(chain_id).await?;
        Ok(match checkpoint {
            Some(block) => start_block.max(block + 1),
            None => start_block,
        })
    }

    /// 채널이 닫히거나 취소될 때까지 배치 처리
    pub async fn run(mut self, mut batches: mpsc::Receiver<FeedBatch>, cancel: CancellationToken) {
        info!(chain_id = self.chain_id, "Dispatcher started");

        loop {
            let batch = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                batch = batches.recv() => match batch {
                    Some(batch) => batch,
                    None => break,
                },
            };

            let summary = self.process_batch(batch, &cancel).await;
            if summary.interrupted {
                break;
            }
        }

        info!("Dispatcher stopped");
    }

    /// 배치 하나 처리. 모든 아이템이 끝나야 체크포인트 전진
    pub async fn process_batch(
        &mut self,
        batch: FeedBatch,
        cancel: &CancellationToken,
    ) -> BatchSummary {
        let FeedBatch {
            from_block,
            to_block,
            items,
        } = batch;

        let mut summary = BatchSummary::default();
        let mut tasks = JoinSet::new();

        for item in items {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                permit = self.semaphore.clone().acquire_owned() => permit.ok(),
            };
            let Some(permit) = permit else {
                summary.interrupted = true;
                break;
            };

            let mut ticket = self.locks.acquire(self.engine.lock_keys(&item));
            let engine = self.engine.clone();

            tasks.spawn(async move {
                let _permit = permit;
                ticket.ready().await;
                let report = engine.process(&item).await;
                drop(ticket);
                report
            });
        }

        // 취소 시에도 진행 중인 작업은 끝까지 기다림
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(report) => summary.absorb(&report),
                Err(e) => {
                    summary.aborted += 1;
                    error!(error = %e, "Feed item task aborted");
                }
            }
        }
        self.locks.clear();

        if summary.interrupted {
            warn!(from_block, to_block, "Batch interrupted, checkpoint not advanced");
            return summary;
        }

        let save = self.store.save_checkpoint(self.chain_id, to_block);
        let id = self.chain_id.to_string();
        let timeout = self.engine.write_timeout();
        if let Err(e) = bounded_write("indexer_checkpoints", &id, timeout, save).await {
            // 다음 배치의 체크포인트가 덮어씀
            error!(to_block, error = %e, "Failed to save checkpoint");
        }

        info!(
            from_block,
            to_block,
            events = summary.events,
            ticks = summary.ticks,
            skipped = summary.skipped_events,
            record_failures = summary.record_failures,
            position_failures = summary.position_failures,
            snapshot_failures = summary.snapshot_failures,
            "Batch complete"
        );

        summary
    }
}
