//! Transaction Writer
//!
//! Idempotent persistence of transaction record drafts. A duplicate
//! identity counts as success; a genuine failure is logged and reported
//! for that record only.
//!
//! Every store write is bounded by `bounded_write`. A write that does not
//! finish in time is reported like any other write failure, so a stalled
//! query cannot hold its position key or the batch open.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, error};

use crate::db::{InsertOutcome, LendingStore, TransactionRecord};
use crate::error::{IndexerError, IndexerResult};

/// 스토어 쓰기 1건에 타임아웃 적용
pub async fn bounded_write<T, F>(
    entity: &'static str,
    id: &str,
    timeout: Duration,
    write: F,
) -> IndexerResult<T>
where
    F: Future<Output = IndexerResult<T>>,
{
    match tokio::time::timeout(timeout, write).await {
        Ok(result) => result,
        Err(_) => Err(IndexerError::WriteTimeout {
            entity,
            id: id.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        }),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    Written,
    /// 재처리로 이미 존재 (no-op)
    Duplicate,
    Failed(String),
}

impl RecordOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, RecordOutcome::Failed(_))
    }
}

pub struct TransactionWriter<'a> {
    store: &'a dyn LendingStore,
    timeout: Duration,
}

impl<'a> TransactionWriter<'a> {
    pub fn new(store: &'a dyn LendingStore, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    pub async fn write(&self, record: &TransactionRecord, source: &str) -> RecordOutcome {
        let insert = self.store.insert_transaction(record);
        match bounded_write("user_transactions", &record.id, self.timeout, insert).await {
            Ok(InsertOutcome::Inserted) => {
                debug!(id = %record.id, kind = %record.kind, "Transaction recorded");
                RecordOutcome::Written
            }
            Ok(InsertOutcome::Duplicate) => {
                debug!(id = %record.id, "Transaction already recorded");
                RecordOutcome::Duplicate
            }
            Err(e) => {
                error!(id = %record.id, source, error = %e, "Transaction write failed");
                RecordOutcome::Failed(e.to_string())
            }
        }
    }
}
