use async_trait::async_trait;
use cocoon_core::crypto;
use cocoon_core::error::{CocoonError, Result};
use cocoon_core::types::{EncryptedPayload, KeyRecord};

/// Source of a user's active data key. Chosen once at construction by
/// [`crate::factory::create_key_provider`].
#[async_trait]
pub trait KeyProvider: Send + Sync {
    /// The key new data should be sealed under, provisioning one if needed.
    async fn active_key(&self, user_id: &str) -> Result<KeyRecord>;

    /// Replace the active key. Returns the new key.
    async fn rotate_key(&self, user_id: &str, reason: &str) -> Result<KeyRecord>;

    /// Any key (active or retired) this provider knows for the user.
    async fn key_by_fingerprint(&self, user_id: &str, fingerprint: &str) -> Result<KeyRecord>;

    /// Provider name for display.
    fn name(&self) -> &str;

    /// Encrypt under the active key.
    async fn encrypt_for_user(&self, user_id: &str, plaintext: &str) -> Result<EncryptedPayload> {
        let key = self.active_key(user_id).await?;
        crypto::encrypt(plaintext, &key)
    }

    /// Decrypt with whichever key the payload names. A payload whose key is
    /// unknown is reported as a decryption failure, not a missing key.
    async fn decrypt_for_user(&self, user_id: &str, payload: &EncryptedPayload) -> Result<String> {
        let key = match self.key_by_fingerprint(user_id, &payload.key_id).await {
            Ok(key) => key,
            Err(CocoonError::KeyNotFound(_)) => {
                return Err(CocoonError::Decryption(format!(
                    "No key with fingerprint {} is available for {user_id}",
                    payload.key_id
                )));
            }
            Err(e) => return Err(e),
        };
        crypto::decrypt(payload, &key)
    }
}
