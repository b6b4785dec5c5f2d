//! Per-conversation turn serialization.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::warn;
use ulid::Ulid;

use rag_core::{RagError, Result};

/// One async mutex per conversation. Waiters are served in arrival order.
///
/// An entry lives only while some turn holds or waits for it.
pub struct ConversationLocks {
    locks: DashMap<Ulid, Arc<Mutex<()>>>,
    timeout: Duration,
}

impl ConversationLocks {
    pub fn new(timeout: Duration) -> Self {
        Self {
            locks: DashMap::new(),
            timeout,
        }
    }

    /// Wait for the conversation's turn, up to the configured timeout.
    pub async fn acquire(&self, id: Ulid) -> Result<TurnGuard<'_>> {
        let lock = self.locks.entry(id).or_default().clone();
        match tokio::time::timeout(self.timeout, lock.lock_owned()).await {
            Ok(guard) => Ok(TurnGuard {
                locks: &self.locks,
                id,
                guard: Some(guard),
            }),
            Err(_) => {
                release_if_idle(&self.locks, id);
                warn!("Timed out after {:?} waiting for conversation {}", self.timeout, id);
                Err(RagError::ConversationBusy { id: id.to_string() })
            }
        }
    }

    /// Forget a deleted conversation's lock.
    pub fn remove(&self, id: Ulid) {
        self.locks.remove(&id);
    }

    /// Number of conversations with a held or awaited lock.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Holds a conversation's turn; dropping it frees the lock entry when no
/// other turn is waiting.
pub struct TurnGuard<'a> {
    locks: &'a DashMap<Ulid, Arc<Mutex<()>>>,
    id: Ulid,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for TurnGuard<'_> {
    fn drop(&mut self) {
        // the owned guard holds a clone of the Arc; release it first
        self.guard.take();
        release_if_idle(self.locks, self.id);
    }
}

/// Remove the entry unless another task holds a clone of it. `entry()` clones
/// under the same shard lock, so a concurrent acquire keeps the entry alive.
fn release_if_idle(locks: &DashMap<Ulid, Arc<Mutex<()>>>, id: Ulid) {
    locks.remove_if(&id, |_, lock| Arc::strong_count(lock) == 1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_second_turn_waits_for_first() {
        let locks = ConversationLocks::new(Duration::from_millis(50));
        let id = Ulid::new();

        let first = locks.acquire(id).await.unwrap();
        let busy = locks.acquire(id).await;
        assert!(matches!(busy, Err(RagError::ConversationBusy { .. })));

        drop(first);
        assert!(locks.acquire(id).await.is_ok());
    }

    #[tokio::test]
    async fn test_idle_locks_are_released() {
        let locks = ConversationLocks::new(Duration::from_millis(50));
        for _ in 0..1000 {
            let guard = locks.acquire(Ulid::new()).await.unwrap();
            assert_eq!(locks.len(), 1);
            drop(guard);
        }
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_entry_kept_while_a_turn_waits() {
        let locks = Arc::new(ConversationLocks::new(Duration::from_secs(5)));
        let id = Ulid::new();

        let first = locks.acquire(id).await.unwrap();
        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _second = locks.acquire(id).await.unwrap();
                tokio::time::sleep(Duration::from_millis(20)).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(first);
        assert_eq!(locks.len(), 1);

        waiter.await.unwrap();
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_timed_out_waiter_does_not_leak_entry() {
        let locks = ConversationLocks::new(Duration::from_millis(20));
        let id = Ulid::new();

        let first = locks.acquire(id).await.unwrap();
        assert!(locks.acquire(id).await.is_err());
        drop(first);
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_different_conversations_do_not_block() {
        let locks = ConversationLocks::new(Duration::from_millis(50));
        let _a = locks.acquire(Ulid::new()).await.unwrap();
        assert!(locks.acquire(Ulid::new()).await.is_ok());
    }
}
