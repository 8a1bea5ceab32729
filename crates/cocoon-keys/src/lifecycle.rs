//! Key lifecycle: provisioning, rotation, fingerprinting and the keyring of
//! retired keys.
//!
//! All writes for a user go through that user's lock, and the store's own
//! compare-and-swap guards first-key provisioning as well, so two racing
//! `get_or_create_active_key` calls always agree on one key.

use std::sync::Arc;

use chrono::Utc;
use cocoon_core::error::{CocoonError, Result};
use cocoon_core::store::KeyStore;
use cocoon_core::types::{
    EncryptedPayload, KEY_SIZE, KeyBackupRecord, KeyRecord, KeyRotationEvent, KeySource,
};
use tracing::{debug, info};

use crate::locks::UserLocks;

pub struct KeyLifecycleManager {
    store: Arc<dyn KeyStore>,
    locks: UserLocks,
}

impl KeyLifecycleManager {
    pub fn new(store: Arc<dyn KeyStore>) -> Self {
        Self {
            store,
            locks: UserLocks::default(),
        }
    }

    pub fn store(&self) -> &Arc<dyn KeyStore> {
        &self.store
    }

    /// Deterministic, non-secret identifier of a key.
    pub fn fingerprint(record: &KeyRecord) -> String {
        record.fingerprint()
    }

    /// Return the user's active key, generating and persisting version 1 if
    /// none exists.
    pub async fn get_or_create_active_key(&self, user_id: &str) -> Result<KeyRecord> {
        if let Some(existing) = self.store.get_active(user_id).await? {
            return Ok(existing);
        }

        let _guard = self.locks.acquire(user_id).await?;
        if let Some(existing) = self.store.get_active(user_id).await? {
            return Ok(existing);
        }

        let fresh = KeyRecord::generate(user_id, 1);
        let active = self.store.insert_active_if_absent(&fresh).await?;
        if active.fingerprint() == fresh.fingerprint() {
            info!(user_id, fingerprint = %active.fingerprint(), "Provisioned new key");
        } else {
            debug!(user_id, "Lost provisioning race, using existing key");
        }
        Ok(active)
    }

    /// The active key without provisioning one.
    pub async fn active_key(&self, user_id: &str) -> Result<KeyRecord> {
        self.store
            .get_active(user_id)
            .await?
            .ok_or_else(|| CocoonError::KeyNotFound(format!("No active key for {user_id}")))
    }

    /// Generate a new key at `version + 1`, retire the current one into the
    /// keyring and log a rotation event, all in one store transaction.
    pub async fn rotate(&self, user_id: &str, reason: &str) -> Result<KeyRecord> {
        let _guard = self.locks.acquire(user_id).await?;
        let current = self.active_key(user_id).await?;

        let version = current.version.checked_add(1).ok_or_else(|| {
            CocoonError::KeyRotation(format!("Key version overflow for {user_id}"))
        })?;
        let next = KeyRecord::generate(user_id, version);
        let event = KeyRotationEvent::new(&current, &next, reason);

        self.store
            .replace_active(&next, Some(&event))
            .await
            .map_err(|e| CocoonError::KeyRotation(e.to_string()))?;

        info!(
            user_id,
            old = %event.old_key_fingerprint,
            new = %event.new_key_fingerprint,
            version,
            reason,
            "Rotated key"
        );
        Ok(next)
    }

    /// Any active or retired key for the user, by fingerprint.
    pub async fn key_by_fingerprint(&self, user_id: &str, fingerprint: &str) -> Result<KeyRecord> {
        self.store
            .get_by_fingerprint(user_id, fingerprint)
            .await?
            .ok_or_else(|| {
                CocoonError::KeyNotFound(format!("No key {fingerprint} for {user_id}"))
            })
    }

    /// The key a payload was sealed under.
    pub async fn key_for_payload(
        &self,
        user_id: &str,
        payload: &EncryptedPayload,
    ) -> Result<KeyRecord> {
        self.key_by_fingerprint(user_id, &payload.key_id).await
    }

    /// Active fingerprint first, then retired ones, newest first.
    pub async fn list_key_fingerprints(&self, user_id: &str) -> Result<Vec<String>> {
        self.store.list_fingerprints(user_id).await
    }

    pub async fn rotation_history(&self, user_id: &str) -> Result<Vec<KeyRotationEvent>> {
        self.store.rotation_events(user_id).await
    }

    pub async fn backup_history(&self, user_id: &str) -> Result<Vec<KeyBackupRecord>> {
        self.store.backup_records(user_id).await
    }

    /// Make recovered key material the active key. The previous key, if
    /// different, is retired to the keyring. Re-installing the current key is
    /// a no-op.
    pub(crate) async fn install_restored_key(
        &self,
        user_id: &str,
        raw: &[u8; KEY_SIZE],
    ) -> Result<KeyRecord> {
        let _guard = self.locks.acquire(user_id).await?;
        let current = self.store.get_active(user_id).await?;
        let fingerprint = cocoon_core::crypto::fingerprint(raw);

        if let Some(current) = &current {
            if current.fingerprint() == fingerprint {
                debug!(user_id, "Restored key is already active");
                return Ok(current.clone());
            }
        }

        let version = match &current {
            Some(current) => current.version.saturating_add(1),
            None => 1,
        };
        let record = KeyRecord::from_raw(user_id, *raw, version, KeySource::Local, Utc::now());
        self.store.put(&record).await?;
        Ok(record)
    }
}
