//! Remote key-management integration.
//!
//! The remote service issues per-user data encryption keys (DEKs) over an
//! authenticated RPC. [`hybrid::HybridKeyProvider`] prefers it and falls back
//! to the local lifecycle manager when configured to.

pub mod cache;
pub mod http;
pub mod hybrid;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use cocoon_core::error::{CocoonError, Result};
use cocoon_core::types::KEY_SIZE;
use serde::{Deserialize, Serialize};
use zeroize::{ZeroizeOnDrop, Zeroizing};

/// Response shape of `generateUserDEK` / `rotateUserDEK`.
#[derive(Clone, Serialize, Deserialize, ZeroizeOnDrop)]
#[serde(rename_all = "camelCase")]
pub struct RemoteDek {
    /// Base64 of the raw 32-byte key.
    pub dek: String,
    #[zeroize(skip)]
    pub key_version: u32,
    #[zeroize(skip)]
    pub created_at: DateTime<Utc>,
}

impl RemoteDek {
    /// Decode the DEK, rejecting anything that is not exactly 256 bits.
    pub fn decode(&self) -> Result<Zeroizing<[u8; KEY_SIZE]>> {
        let bytes = Zeroizing::new(
            STANDARD
                .decode(&self.dek)
                .map_err(|_| CocoonError::KmsUnavailable("DEK is not valid base64".to_string()))?,
        );
        if bytes.len() != KEY_SIZE {
            return Err(CocoonError::KmsUnavailable(format!(
                "DEK has {} bytes, expected {KEY_SIZE}",
                bytes.len()
            )));
        }
        let mut key = Zeroizing::new([0u8; KEY_SIZE]);
        key.copy_from_slice(&bytes);
        Ok(key)
    }
}

impl std::fmt::Debug for RemoteDek {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteDek")
            .field("dek", &"[REDACTED]")
            .field("key_version", &self.key_version)
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// Server-side key issuance. Calls are authenticated as the signed-in user.
#[async_trait]
pub trait RemoteKeyService: Send + Sync {
    /// The user's current DEK for `app_scope`, provisioning one if needed.
    async fn generate_user_dek(&self, app_scope: &str) -> Result<RemoteDek>;

    /// Replace the user's DEK for `app_scope`.
    async fn rotate_user_dek(&self, app_scope: &str) -> Result<RemoteDek>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dek(bytes: &[u8]) -> RemoteDek {
        RemoteDek {
            dek: STANDARD.encode(bytes),
            key_version: 1,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn decodes_256_bit_dek() {
        let key = dek(&[5u8; 32]).decode().unwrap();
        assert_eq!(*key, [5u8; 32]);
    }

    #[test]
    fn short_dek_rejected() {
        assert!(matches!(
            dek(&[5u8; 16]).decode(),
            Err(CocoonError::KmsUnavailable(_))
        ));
    }

    #[test]
    fn response_is_camel_case() {
        let json = r#"{"dek":"AAAA","keyVersion":7,"createdAt":"2026-01-01T00:00:00Z"}"#;
        let parsed: RemoteDek = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.key_version, 7);
        assert!(format!("{parsed:?}").contains("[REDACTED]"));
    }
}
