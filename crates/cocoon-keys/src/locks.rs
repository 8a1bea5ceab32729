use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use cocoon_core::error::{CocoonError, Result};
use tokio::sync::OwnedMutexGuard;

/// One async mutex per user id; serializes writers for the same user.
/// Entries nobody holds or waits on are dropped on the next acquire.
#[derive(Default)]
pub(crate) struct UserLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl UserLocks {
    pub(crate) async fn acquire(&self, user_id: &str) -> Result<OwnedMutexGuard<()>> {
        let lock = {
            let mut locks = self
                .locks
                .lock()
                .map_err(|_| CocoonError::Storage("user lock table poisoned".to_string()))?;
            // The map's own reference is the only one left once a user's
            // guard and all waiters are gone.
            locks.retain(|id, lock| id == user_id || Arc::strong_count(lock) > 1);
            locks.entry(user_id.to_string()).or_default().clone()
        };
        Ok(lock.lock_owned().await)
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().map(|locks| locks.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn idle_entries_are_pruned() {
        let locks = UserLocks::default();
        for user in ["alice", "bob", "carol"] {
            drop(locks.acquire(user).await.unwrap());
        }
        assert_eq!(locks.len(), 1);
    }

    #[tokio::test]
    async fn held_entries_survive_pruning() {
        let locks = UserLocks::default();
        let alice = locks.acquire("alice").await.unwrap();
        drop(locks.acquire("bob").await.unwrap());
        assert_eq!(locks.len(), 2);

        drop(alice);
        drop(locks.acquire("carol").await.unwrap());
        assert_eq!(locks.len(), 1);
    }

    #[tokio::test]
    async fn same_user_is_serialized() {
        let locks = Arc::new(UserLocks::default());
        let guard = locks.acquire("alice").await.unwrap();

        let waiter = tokio::spawn({
            let locks = locks.clone();
            async move { locks.acquire("alice").await.map(|_| ()) }
        });
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        drop(guard);
        waiter.await.unwrap().unwrap();
    }
}
