//! Durable, user-scoped key storage.
//!
//! Every operation takes the owning user id; there is no way to enumerate or
//! read another user's records through this API. Absence is `Ok(None)`,
//! never an error.

mod memory;
mod schema;
mod sqlite;

pub use memory::MemoryKeyStore;
pub use sqlite::SqliteKeyStore;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{KeyBackupRecord, KeyRecord, KeyRotationEvent};

#[async_trait]
pub trait KeyStore: Send + Sync {
    /// The active key for a user, if one has been provisioned.
    async fn get_active(&self, user_id: &str) -> Result<Option<KeyRecord>>;

    /// Atomically store `record` as the active key unless the user already
    /// has one. Returns whichever record is active afterwards.
    async fn insert_active_if_absent(&self, record: &KeyRecord) -> Result<KeyRecord>;

    /// Atomically make `next` the active key for `next.user_id`.
    ///
    /// The superseded key (if any) moves into the user's keyring, and `event`
    /// (if given) is appended in the same transaction. On error nothing is
    /// changed.
    async fn replace_active(
        &self,
        next: &KeyRecord,
        event: Option<&KeyRotationEvent>,
    ) -> Result<()>;

    /// Overwrite the active key without an audit event.
    async fn put(&self, record: &KeyRecord) -> Result<()> {
        self.replace_active(record, None).await
    }

    /// Look up an active or retired key by fingerprint.
    async fn get_by_fingerprint(
        &self,
        user_id: &str,
        fingerprint: &str,
    ) -> Result<Option<KeyRecord>>;

    /// Fingerprints of the active key followed by retired keys, newest first.
    async fn list_fingerprints(&self, user_id: &str) -> Result<Vec<String>>;

    async fn append_rotation_event(&self, event: &KeyRotationEvent) -> Result<()>;

    /// Rotation events for a user, oldest first.
    async fn rotation_events(&self, user_id: &str) -> Result<Vec<KeyRotationEvent>>;

    async fn append_backup_record(&self, record: &KeyBackupRecord) -> Result<()>;

    /// Backup metadata for a user, oldest first.
    async fn backup_records(&self, user_id: &str) -> Result<Vec<KeyBackupRecord>>;
}
