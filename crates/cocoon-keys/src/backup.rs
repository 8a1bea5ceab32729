//! Password-protected export and import of a user's active key.
//!
//! Backup string: `base64(salt (16) ‖ nonce (12) ‖ ciphertext ‖ tag (16))`,
//! where the ciphertext is the raw 32-byte key sealed under a wrapping key
//! derived with PBKDF2-HMAC-SHA256. Only metadata is kept locally; the
//! backup string itself is handed back to the caller.

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use cocoon_core::config::MIN_KDF_ITERATIONS;
use cocoon_core::crypto::{self, NONCE_SIZE, TAG_SIZE};
use cocoon_core::error::{CocoonError, Result};
use cocoon_core::types::{KEY_SIZE, KeyBackupRecord};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::Sha256;
use tracing::{info, warn};
use zeroize::Zeroizing;

use crate::lifecycle::KeyLifecycleManager;

pub const SALT_SIZE: usize = 16;

/// Decoded length of every well-formed backup.
pub const BACKUP_LEN: usize = SALT_SIZE + NONCE_SIZE + KEY_SIZE + TAG_SIZE;

pub struct BackupService {
    manager: Arc<KeyLifecycleManager>,
    iterations: u32,
}

impl BackupService {
    /// `iterations` below the 100 000 floor are raised to it.
    pub fn new(manager: Arc<KeyLifecycleManager>, iterations: u32) -> Self {
        Self {
            manager,
            iterations: iterations.max(MIN_KDF_ITERATIONS),
        }
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    /// Wrap the user's active key under `password` and record the export.
    pub async fn create_backup(&self, user_id: &str, password: &str) -> Result<String> {
        if password.is_empty() {
            return Err(CocoonError::Encryption(
                "Backup password must not be empty".to_string(),
            ));
        }

        let key = self.manager.active_key(user_id).await?;

        let mut salt = [0u8; SALT_SIZE];
        OsRng.fill_bytes(&mut salt);
        let wrapping_key = derive_wrapping_key(password, &salt, self.iterations)
            .await
            .map_err(|e| CocoonError::Encryption(e.to_string()))?;
        let sealed = crypto::seal(&wrapping_key, key.key_bytes())?;

        let mut output = Vec::with_capacity(BACKUP_LEN);
        output.extend_from_slice(&salt);
        output.extend_from_slice(&sealed);

        let record = KeyBackupRecord::new(user_id, key.fingerprint());
        self.manager.store().append_backup_record(&record).await?;

        info!(user_id, fingerprint = %record.backup_fingerprint, "Created key backup");
        Ok(STANDARD.encode(output))
    }

    /// Unwrap a backup and make the recovered key active for `user_id`.
    /// On any failure the existing key is left untouched.
    pub async fn restore_from_backup(
        &self,
        user_id: &str,
        backup: &str,
        password: &str,
    ) -> Result<()> {
        let raw = self.unwrap_backup(backup, password).await?;
        let record = self.manager.install_restored_key(user_id, &raw).await?;
        info!(
            user_id,
            fingerprint = %record.fingerprint(),
            version = record.version,
            "Restored key from backup"
        );
        Ok(())
    }

    /// Fingerprint of the key inside a backup, without installing it.
    pub async fn verify_backup(&self, backup: &str, password: &str) -> Result<String> {
        let raw = self.unwrap_backup(backup, password).await?;
        Ok(crypto::fingerprint(&raw))
    }

    async fn unwrap_backup(
        &self,
        backup: &str,
        password: &str,
    ) -> Result<Zeroizing<[u8; KEY_SIZE]>> {
        if password.is_empty() {
            return Err(CocoonError::Restore("Password must not be empty".to_string()));
        }

        let data = STANDARD
            .decode(backup.trim())
            .map_err(|_| CocoonError::Restore("Backup is not valid base64".to_string()))?;
        if data.len() != BACKUP_LEN {
            return Err(CocoonError::Restore(format!(
                "Backup has unexpected length: expected {BACKUP_LEN} bytes, got {}",
                data.len()
            )));
        }

        let (salt, sealed) = data.split_at(SALT_SIZE);

        // Backups carry no iteration count; fall back to the default floor so
        // a raised setting can still open older exports.
        let mut attempts = vec![self.iterations];
        if self.iterations != MIN_KDF_ITERATIONS {
            attempts.push(MIN_KDF_ITERATIONS);
        }

        for iterations in attempts {
            let wrapping_key = derive_wrapping_key(password, salt, iterations)
                .await
                .map_err(|e| CocoonError::Restore(e.to_string()))?;
            if let Ok(plaintext) = crypto::open(&wrapping_key, sealed) {
                let plaintext = Zeroizing::new(plaintext);
                let mut raw = Zeroizing::new([0u8; KEY_SIZE]);
                if plaintext.len() != KEY_SIZE {
                    return Err(CocoonError::Restore(
                        "Backup does not contain a 256-bit key".to_string(),
                    ));
                }
                raw.copy_from_slice(&plaintext);
                return Ok(raw);
            }
        }

        warn!("Backup could not be unwrapped");
        Err(CocoonError::Restore(
            "Wrong password or corrupted backup".to_string(),
        ))
    }
}

/// PBKDF2 is deliberately slow, so it runs on the blocking pool.
async fn derive_wrapping_key(
    password: &str,
    salt: &[u8],
    iterations: u32,
) -> std::result::Result<Zeroizing<[u8; KEY_SIZE]>, tokio::task::JoinError> {
    let password = Zeroizing::new(password.as_bytes().to_vec());
    let salt = salt.to_vec();
    tokio::task::spawn_blocking(move || {
        let mut key = Zeroizing::new([0u8; KEY_SIZE]);
        pbkdf2_hmac::<Sha256>(&password, &salt, iterations, &mut key[..]);
        key
    })
    .await
}
