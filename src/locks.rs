//! Per-entity mutual exclusion.
//!
//! Every load → evaluate → mutate → save sequence runs while holding the
//! lock for the entity it touches. Locks are created on first use and
//! evicted as soon as no holder or waiter references them.

use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::models::BlobRef;

/// Identity of a lockable entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntityKey {
    Container { account: String, container: String },
    Blob(BlobRef),
}

impl EntityKey {
    pub fn container(account: &str, container: &str) -> Self {
        EntityKey::Container {
            account: account.to_string(),
            container: container.to_string(),
        }
    }

    pub fn blob(blob_ref: &BlobRef) -> Self {
        EntityKey::Blob(blob_ref.clone())
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKey::Container { account, container } => write!(f, "{}/{}", account, container),
            EntityKey::Blob(blob_ref) => write!(f, "{}", blob_ref),
        }
    }
}

/// Keyed async mutex map.
#[derive(Debug, Clone, Default)]
pub struct LockManager {
    locks: Arc<DashMap<EntityKey, Arc<Mutex<()>>>>,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive access to `key`.
    pub async fn lock(&self, key: EntityKey) -> EntityGuard {
        let mutex = self
            .locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = mutex.lock_owned().await;
        EntityGuard {
            locks: Arc::clone(&self.locks),
            key,
            guard: Some(guard),
        }
    }

    /// Number of live lock entries.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Exclusive access to one entity; released on drop.
pub struct EntityGuard {
    locks: Arc<DashMap<EntityKey, Arc<Mutex<()>>>>,
    key: EntityKey,
    guard: Option<OwnedMutexGuard<()>>,
}

impl EntityGuard {
    pub fn key(&self) -> &EntityKey {
        &self.key
    }
}

impl Drop for EntityGuard {
    fn drop(&mut self) {
        self.guard.take();
        // Only the map itself still references an uncontended lock.
        self.locks
            .remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;

    fn key(name: &str) -> EntityKey {
        EntityKey::blob(&BlobRef::new("acct", "container", name))
    }

    #[tokio::test]
    async fn test_serializes_same_key() {
        let locks = LockManager::new();
        let counter = Arc::new(AtomicU64::new(0));

        let tasks: Vec<_> = (0..32)
            .map(|_| {
                let locks = locks.clone();
                let counter = Arc::clone(&counter);
                tokio::spawn(async move {
                    let _guard = locks.lock(key("shared")).await;
                    let seen = counter.load(Ordering::SeqCst);
                    tokio::task::yield_now().await;
                    counter.store(seen + 1, Ordering::SeqCst);
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(counter.load(Ordering::SeqCst), 32);
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_different_keys_do_not_block() {
        let locks = LockManager::new();
        let _held = locks.lock(key("a")).await;

        let other = tokio::time::timeout(Duration::from_secs(1), locks.lock(key("b"))).await;
        assert!(other.is_ok());

        let same = tokio::time::timeout(Duration::from_millis(50), locks.lock(key("a"))).await;
        assert!(same.is_err());
    }

    #[tokio::test]
    async fn test_entries_evicted_when_released() {
        let locks = LockManager::new();
        {
            let _a = locks.lock(key("a")).await;
            let _c = locks.lock(EntityKey::container("acct", "container")).await;
            assert_eq!(locks.len(), 2);
        }
        assert_eq!(locks.len(), 0);
    }
}
