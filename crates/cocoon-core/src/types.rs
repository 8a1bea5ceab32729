use chrono::{DateTime, Utc};
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::ZeroizeOnDrop;

use crate::crypto::fingerprint;
use crate::error::{CocoonError, Result};

/// The only algorithm keys and payloads are issued under.
pub const ALGORITHM: &str = "AES-256-GCM";

/// Raw key length in bytes (256-bit).
pub const KEY_SIZE: usize = 32;

/// Where a key's material came from. Stored as an explicit tag, never
/// inferred from the shape of the record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum KeySource {
    Local,
    Kms { app_scope: String },
}

impl fmt::Display for KeySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeySource::Local => write!(f, "local"),
            KeySource::Kms { app_scope } => write!(f, "kms ({app_scope})"),
        }
    }
}

/// A user's symmetric data key. Zeroized on drop.
#[derive(Clone, ZeroizeOnDrop)]
pub struct KeyRecord {
    #[zeroize(skip)]
    pub user_id: String,
    key: [u8; KEY_SIZE],
    #[zeroize(skip)]
    pub algorithm: String,
    #[zeroize(skip)]
    pub created_at: DateTime<Utc>,
    #[zeroize(skip)]
    pub version: u32,
    #[zeroize(skip)]
    pub source: KeySource,
}

impl KeyRecord {
    /// Generate a fresh random local key from the OS CSPRNG.
    pub fn generate(user_id: &str, version: u32) -> Self {
        let mut key = [0u8; KEY_SIZE];
        OsRng.fill_bytes(&mut key);
        Self::from_raw(user_id, key, version, KeySource::Local, Utc::now())
    }

    pub fn from_raw(
        user_id: &str,
        key: [u8; KEY_SIZE],
        version: u32,
        source: KeySource,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id: user_id.to_string(),
            key,
            algorithm: ALGORITHM.to_string(),
            created_at,
            version,
            source,
        }
    }

    /// Build a record from a byte slice, checking the length.
    pub fn from_slice(
        user_id: &str,
        bytes: &[u8],
        version: u32,
        source: KeySource,
        created_at: DateTime<Utc>,
    ) -> Result<Self> {
        let key: [u8; KEY_SIZE] = bytes.try_into().map_err(|_| {
            CocoonError::Storage(format!(
                "key material for {user_id}: expected {KEY_SIZE} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self::from_raw(user_id, key, version, source, created_at))
    }

    pub fn key_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.key
    }

    /// Non-secret identifier for this key.
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.key)
    }
}

impl fmt::Debug for KeyRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyRecord")
            .field("user_id", &self.user_id)
            .field("key", &"[REDACTED]")
            .field("algorithm", &self.algorithm)
            .field("created_at", &self.created_at)
            .field("version", &self.version)
            .field("source", &self.source)
            .finish()
    }
}

/// Append-only audit entry written once per rotation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyRotationEvent {
    pub user_id: String,
    pub old_key_fingerprint: String,
    pub new_key_fingerprint: String,
    pub rotated_at: DateTime<Utc>,
    pub reason: String,
}

impl KeyRotationEvent {
    pub fn new(old: &KeyRecord, new: &KeyRecord, reason: &str) -> Self {
        Self {
            user_id: new.user_id.clone(),
            old_key_fingerprint: old.fingerprint(),
            new_key_fingerprint: new.fingerprint(),
            rotated_at: Utc::now(),
            reason: reason.to_string(),
        }
    }
}

/// Local metadata about an exported backup. Holds neither the password nor
/// the wrapped key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyBackupRecord {
    pub id: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub backup_fingerprint: String,
}

impl KeyBackupRecord {
    pub fn new(user_id: &str, backup_fingerprint: String) -> Self {
        Self {
            id: uuid::Uuid::now_v7().to_string(),
            user_id: user_id.to_string(),
            created_at: Utc::now(),
            backup_fingerprint,
        }
    }
}

/// Ciphertext as exchanged with journal storage.
///
/// `encrypted_value` is `base64(nonce ‖ ciphertext ‖ tag)` and `key_id` is the
/// fingerprint of the exact key that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedPayload {
    pub encrypted_value: String,
    pub key_id: String,
    pub algorithm: String,
    pub created_at: DateTime<Utc>,
}

impl EncryptedPayload {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| CocoonError::Decryption(format!("Malformed payload: {e}")))
    }
}

/// A data encryption key issued by the remote KMS, cached for the session.
#[derive(Clone, ZeroizeOnDrop)]
pub struct KmsKeyRecord {
    #[zeroize(skip)]
    pub user_id: String,
    #[zeroize(skip)]
    pub app_scope: String,
    dek: [u8; KEY_SIZE],
    #[zeroize(skip)]
    pub key_version: u32,
    #[zeroize(skip)]
    pub created_at: DateTime<Utc>,
    #[zeroize(skip)]
    pub is_kms_protected: bool,
}

impl KmsKeyRecord {
    pub fn new(
        user_id: &str,
        app_scope: &str,
        dek: [u8; KEY_SIZE],
        key_version: u32,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id: user_id.to_string(),
            app_scope: app_scope.to_string(),
            dek,
            key_version,
            created_at,
            is_kms_protected: true,
        }
    }

    pub fn fingerprint(&self) -> String {
        fingerprint(&self.dek)
    }

    /// View this DEK as an ordinary key handle for the envelope cipher.
    pub fn to_key_record(&self) -> KeyRecord {
        KeyRecord::from_raw(
            &self.user_id,
            self.dek,
            self.key_version,
            KeySource::Kms {
                app_scope: self.app_scope.clone(),
            },
            self.created_at,
        )
    }
}

impl fmt::Debug for KmsKeyRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KmsKeyRecord")
            .field("user_id", &self.user_id)
            .field("app_scope", &self.app_scope)
            .field("dek", &"[REDACTED]")
            .field("key_version", &self.key_version)
            .field("created_at", &self.created_at)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_keys_are_distinct() {
        let a = KeyRecord::generate("alice", 1);
        let b = KeyRecord::generate("alice", 1);
        assert_ne!(a.key_bytes(), b.key_bytes());
        assert_ne!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.algorithm, ALGORITHM);
        assert_eq!(a.source, KeySource::Local);
    }

    #[test]
    fn debug_redacts_key_material() {
        let key = KeyRecord::from_raw("alice", [0xAB; 32], 1, KeySource::Local, Utc::now());
        let dbg = format!("{key:?}");
        assert!(dbg.contains("[REDACTED]"));
        assert!(!dbg.to_lowercase().contains("abab"));

        let kms = KmsKeyRecord::new("alice", "journal", [0xAB; 32], 3, Utc::now());
        assert!(format!("{kms:?}").contains("[REDACTED]"));
    }

    #[test]
    fn from_slice_rejects_wrong_length() {
        let result = KeyRecord::from_slice("bob", &[1u8; 16], 1, KeySource::Local, Utc::now());
        assert!(result.is_err());
    }

    #[test]
    fn key_source_is_tagged() {
        let json = serde_json::to_string(&KeySource::Kms {
            app_scope: "journal".into(),
        })
        .unwrap();
        assert_eq!(json, r#"{"kind":"kms","app_scope":"journal"}"#);

        let local: KeySource = serde_json::from_str(r#"{"kind":"local"}"#).unwrap();
        assert_eq!(local, KeySource::Local);
        assert!(serde_json::from_str::<KeySource>(r#"{"app_scope":"x"}"#).is_err());
    }

    #[test]
    fn payload_uses_camel_case_fields() {
        let payload = EncryptedPayload {
            encrypted_value: "AAAA".into(),
            key_id: "abcd".into(),
            algorithm: ALGORITHM.into(),
            created_at: Utc::now(),
        };
        let value: serde_json::Value = serde_json::from_str(&payload.to_json().unwrap()).unwrap();
        assert_eq!(value["encryptedValue"], "AAAA");
        assert_eq!(value["keyId"], "abcd");
        assert_eq!(value["algorithm"], ALGORITHM);
        assert!(value["createdAt"].is_string());
    }

    #[test]
    fn malformed_payload_json_is_decryption_error() {
        let err = EncryptedPayload::from_json("{not json").unwrap_err();
        assert!(matches!(err, CocoonError::Decryption(_)));
    }

    #[test]
    fn kms_record_converts_to_tagged_key_record() {
        let kms = KmsKeyRecord::new("alice", "journal", [7u8; 32], 4, Utc::now());
        assert!(kms.is_kms_protected);
        let record = kms.to_key_record();
        assert_eq!(record.version, 4);
        assert_eq!(record.fingerprint(), kms.fingerprint());
        assert_eq!(
            record.source,
            KeySource::Kms {
                app_scope: "journal".into()
            }
        );
    }

    #[test]
    fn rotation_event_captures_both_fingerprints() {
        let old = KeyRecord::generate("alice", 1);
        let new = KeyRecord::generate("alice", 2);
        let event = KeyRotationEvent::new(&old, &new, "scheduled");
        assert_eq!(event.user_id, "alice");
        assert_eq!(event.old_key_fingerprint, old.fingerprint());
        assert_eq!(event.new_key_fingerprint, new.fingerprint());
        assert_eq!(event.reason, "scheduled");
    }
}
