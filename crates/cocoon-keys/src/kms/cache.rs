//! Session-scoped cache of KMS-issued DEKs.
//!
//! Held in process memory only and never written to disk, so a compromised
//! device at rest yields no server-issued key material. Each new session
//! fetches again.

use std::collections::HashMap;
use std::sync::Arc;

use cocoon_core::types::KmsKeyRecord;
use tokio::sync::RwLock;

#[derive(Default)]
struct CacheSlot {
    current: Option<KmsKeyRecord>,
    /// DEKs replaced during this session, oldest first.
    retired: Vec<KmsKeyRecord>,
}

#[derive(Clone, Default)]
pub struct DekCache {
    slots: Arc<RwLock<HashMap<(String, String), CacheSlot>>>,
}

impl DekCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The current DEK for a user and scope.
    pub async fn get(&self, user_id: &str, app_scope: &str) -> Option<KmsKeyRecord> {
        self.slots
            .read()
            .await
            .get(&(user_id.to_string(), app_scope.to_string()))
            .and_then(|slot| slot.current.clone())
    }

    /// Make `record` current, keeping the one it replaces as retired.
    /// Returns the replaced record, if any.
    pub async fn insert(&self, record: KmsKeyRecord) -> Option<KmsKeyRecord> {
        let mut slots = self.slots.write().await;
        let slot = slots
            .entry((record.user_id.clone(), record.app_scope.clone()))
            .or_default();

        let previous = slot.current.replace(record);
        match previous {
            Some(prev) => {
                let same = slot
                    .current
                    .as_ref()
                    .is_some_and(|cur| cur.fingerprint() == prev.fingerprint());
                if !same {
                    slot.retired.push(prev.clone());
                }
                Some(prev)
            }
            None => None,
        }
    }

    /// Current or retired DEK for a user, in any scope.
    pub async fn find_by_fingerprint(
        &self,
        user_id: &str,
        fingerprint: &str,
    ) -> Option<KmsKeyRecord> {
        let slots = self.slots.read().await;
        slots
            .iter()
            .filter(|((user, _), _)| user == user_id)
            .flat_map(|(_, slot)| slot.current.iter().chain(slot.retired.iter()))
            .find(|record| record.fingerprint() == fingerprint)
            .cloned()
    }

    /// Number of user/scope pairs with a current DEK.
    pub async fn len(&self) -> usize {
        self.slots
            .read()
            .await
            .values()
            .filter(|slot| slot.current.is_some())
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(user: &str, byte: u8, version: u32) -> KmsKeyRecord {
        KmsKeyRecord::new(user, "journal", [byte; 32], version, Utc::now())
    }

    #[tokio::test]
    async fn empty_cache_misses() {
        let cache = DekCache::new();
        assert!(cache.get("alice", "journal").await.is_none());
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn insert_and_get() {
        let cache = DekCache::new();
        assert!(cache.insert(record("alice", 1, 1)).await.is_none());
        let hit = cache.get("alice", "journal").await.unwrap();
        assert_eq!(hit.key_version, 1);
        assert!(cache.get("alice", "other-scope").await.is_none());
        assert!(cache.get("bob", "journal").await.is_none());
    }

    #[tokio::test]
    async fn replaced_dek_stays_findable() {
        let cache = DekCache::new();
        let v1 = record("alice", 1, 1);
        let v1_fp = v1.fingerprint();
        cache.insert(v1).await;
        let replaced = cache.insert(record("alice", 2, 2)).await.unwrap();
        assert_eq!(replaced.fingerprint(), v1_fp);

        assert_eq!(cache.get("alice", "journal").await.unwrap().key_version, 2);
        assert!(cache.find_by_fingerprint("alice", &v1_fp).await.is_some());
        assert!(cache.find_by_fingerprint("bob", &v1_fp).await.is_none());
        assert_eq!(cache.len().await, 1);
    }
}
