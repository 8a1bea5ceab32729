use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use super::KeyStore;
use crate::error::{CocoonError, Result};
use crate::types::{KeyBackupRecord, KeyRecord, KeyRotationEvent};

#[derive(Default)]
struct UserSlot {
    active: Option<KeyRecord>,
    /// Retired keys, oldest first.
    ring: Vec<KeyRecord>,
    rotations: Vec<KeyRotationEvent>,
    backups: Vec<KeyBackupRecord>,
}

/// Process-local key store. Not durable; used for tests and ephemeral
/// sessions.
#[derive(Default)]
pub struct MemoryKeyStore {
    users: Mutex<HashMap<String, UserSlot>>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, UserSlot>>> {
        self.users
            .lock()
            .map_err(|_| CocoonError::Storage("key store lock poisoned".to_string()))
    }
}

#[async_trait]
impl KeyStore for MemoryKeyStore {
    async fn get_active(&self, user_id: &str) -> Result<Option<KeyRecord>> {
        let users = self.lock()?;
        Ok(users.get(user_id).and_then(|slot| slot.active.clone()))
    }

    async fn insert_active_if_absent(&self, record: &KeyRecord) -> Result<KeyRecord> {
        let mut users = self.lock()?;
        let slot = users.entry(record.user_id.clone()).or_default();
        Ok(slot.active.get_or_insert_with(|| record.clone()).clone())
    }

    async fn replace_active(
        &self,
        next: &KeyRecord,
        event: Option<&KeyRotationEvent>,
    ) -> Result<()> {
        let mut users = self.lock()?;
        let slot = users.entry(next.user_id.clone()).or_default();
        let next_fp = next.fingerprint();

        if let Some(current) = slot.active.take() {
            let current_fp = current.fingerprint();
            if current_fp != next_fp && !slot.ring.iter().any(|k| k.fingerprint() == current_fp) {
                slot.ring.push(current);
            }
        }
        slot.ring.retain(|k| k.fingerprint() != next_fp);
        slot.active = Some(next.clone());
        if let Some(event) = event {
            slot.rotations.push(event.clone());
        }
        Ok(())
    }

    async fn get_by_fingerprint(
        &self,
        user_id: &str,
        fingerprint: &str,
    ) -> Result<Option<KeyRecord>> {
        let users = self.lock()?;
        let Some(slot) = users.get(user_id) else {
            return Ok(None);
        };
        Ok(slot
            .active
            .iter()
            .chain(slot.ring.iter())
            .find(|k| k.fingerprint() == fingerprint)
            .cloned())
    }

    async fn list_fingerprints(&self, user_id: &str) -> Result<Vec<String>> {
        let users = self.lock()?;
        let Some(slot) = users.get(user_id) else {
            return Ok(Vec::new());
        };
        let mut retired: Vec<&KeyRecord> = slot.ring.iter().collect();
        retired.sort_by(|a, b| b.version.cmp(&a.version));
        Ok(slot
            .active
            .iter()
            .chain(retired)
            .map(|k| k.fingerprint())
            .collect())
    }

    async fn append_rotation_event(&self, event: &KeyRotationEvent) -> Result<()> {
        let mut users = self.lock()?;
        users
            .entry(event.user_id.clone())
            .or_default()
            .rotations
            .push(event.clone());
        Ok(())
    }

    async fn rotation_events(&self, user_id: &str) -> Result<Vec<KeyRotationEvent>> {
        let users = self.lock()?;
        Ok(users
            .get(user_id)
            .map(|slot| slot.rotations.clone())
            .unwrap_or_default())
    }

    async fn append_backup_record(&self, record: &KeyBackupRecord) -> Result<()> {
        let mut users = self.lock()?;
        users
            .entry(record.user_id.clone())
            .or_default()
            .backups
            .push(record.clone());
        Ok(())
    }

    async fn backup_records(&self, user_id: &str) -> Result<Vec<KeyBackupRecord>> {
        let users = self.lock()?;
        Ok(users
            .get(user_id)
            .map(|slot| slot.backups.clone())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn insert_if_absent_keeps_first_writer() {
        let store = MemoryKeyStore::new();
        let first = KeyRecord::generate("alice", 1);
        let second = KeyRecord::generate("alice", 1);

        store.insert_active_if_absent(&first).await.unwrap();
        let won = store.insert_active_if_absent(&second).await.unwrap();
        assert_eq!(won.fingerprint(), first.fingerprint());
    }

    #[tokio::test]
    async fn replace_keeps_keyring() {
        let store = MemoryKeyStore::new();
        let v1 = KeyRecord::generate("alice", 1);
        let v2 = KeyRecord::generate("alice", 2);
        let v3 = KeyRecord::generate("alice", 3);
        store.put(&v1).await.unwrap();
        store.put(&v2).await.unwrap();
        store
            .replace_active(&v3, Some(&KeyRotationEvent::new(&v2, &v3, "manual")))
            .await
            .unwrap();

        assert_eq!(
            store.list_fingerprints("alice").await.unwrap(),
            vec![v3.fingerprint(), v2.fingerprint(), v1.fingerprint()]
        );
        assert!(
            store
                .get_by_fingerprint("alice", &v1.fingerprint())
                .await
                .unwrap()
                .is_some()
        );
        assert_eq!(store.rotation_events("alice").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn users_are_isolated() {
        let store = MemoryKeyStore::new();
        let alice = KeyRecord::generate("alice", 1);
        store.put(&alice).await.unwrap();

        assert!(store.get_active("bob").await.unwrap().is_none());
        assert!(
            store
                .get_by_fingerprint("bob", &alice.fingerprint())
                .await
                .unwrap()
                .is_none()
        );
    }
}
