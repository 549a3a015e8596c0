//! Per-key ordering
//!
//! The dispatcher takes a ticket for every feed item in arrival order.
//! A ticket becomes ready once every earlier ticket sharing one of its
//! keys has been dropped, so same-key work runs in feed order while
//! different keys run in parallel.
//!
//! ```text
//!   item A {k1}      ──► ready immediately
//!   item B {k1, k2}  ──► waits for A
//!   item C {k2}      ──► waits for B
//!   item D {k3}      ──► ready immediately
//! ```

use std::collections::HashMap;
use std::hash::Hash;

use ethers::types::Address;
use tokio::sync::oneshot;

/// 락 대상
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LockKey {
    Position { user: Address, market: Address },
    /// 마켓 스냅샷 (틱 순서 보장)
    Market(Address),
}

/// 키별 마지막 티켓의 완료 신호
pub struct KeyedLocks<K> {
    tails: HashMap<K, oneshot::Receiver<()>>,
}

impl<K: Eq + Hash + Ord> KeyedLocks<K> {
    pub fn new() -> Self {
        Self {
            tails: HashMap::new(),
        }
    }

    /// 도착 순서대로 호출해야 함
    pub fn acquire(&mut self, mut keys: Vec<K>) -> LockTicket {
        keys.sort();
        keys.dedup();

        let mut waits = Vec::new();
        let mut releases = Vec::with_capacity(keys.len());

        for key in keys {
            let (tx, rx) = oneshot::channel();
            if let Some(previous) = self.tails.insert(key, rx) {
                waits.push(previous);
            }
            releases.push(tx);
        }

        LockTicket {
            waits,
            _releases: releases,
        }
    }

    /// 진행 중인 티켓이 없을 때(배치 경계) 호출
    pub fn clear(&mut self) {
        self.tails.clear();
    }

    pub fn len(&self) -> usize {
        self.tails.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tails.is_empty()
    }
}

impl<K: Eq + Hash + Ord> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self::new()
    }
}

/// drop 시 같은 키의 다음 티켓을 깨움
pub struct LockTicket {
    waits: Vec<oneshot::Receiver<()>>,
    _releases: Vec<oneshot::Sender<()>>,
}

impl LockTicket {
    /// 앞선 티켓이 모두 끝날 때까지 대기
    pub async fn ready(&mut self) {
        // 중간에 취소돼도 남은 대기 대상은 유지
        while let Some(previous) = self.waits.last_mut() {
            // 송신측 drop = 앞선 작업 종료 (panic 포함)
            let _ = previous.await;
            self.waits.pop();
        }
    }
}
