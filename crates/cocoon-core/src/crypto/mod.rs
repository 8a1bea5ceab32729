//! Envelope cipher: stateless AES-256-GCM over a caller-supplied key.
//!
//! Wire layout of every sealed value is `nonce (12) ‖ ciphertext ‖ tag (16)`.
//! Payloads going to journal storage carry that layout base64-encoded, tagged
//! with the fingerprint of the key that produced them.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::Utc;
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::error::{CocoonError, Result};
use crate::types::{ALGORITHM, EncryptedPayload, KEY_SIZE, KeyRecord};

pub const NONCE_SIZE: usize = 12;
pub const TAG_SIZE: usize = 16;

/// Number of SHA-256 bytes kept in a fingerprint.
const FINGERPRINT_BYTES: usize = 16;

/// Fingerprint of raw key material: hex of the first 16 bytes of SHA-256.
pub fn fingerprint(key: &[u8; KEY_SIZE]) -> String {
    let digest = Sha256::digest(key);
    hex::encode(&digest[..FINGERPRINT_BYTES])
}

/// Constant-time fingerprint comparison.
pub fn fingerprints_match(a: &str, b: &str) -> bool {
    a.len() == b.len() && bool::from(a.as_bytes().ct_eq(b.as_bytes()))
}

/// Encrypt bytes under `key` with a fresh random nonce.
/// Returns `nonce ‖ ciphertext ‖ tag`.
pub fn seal(key: &[u8; KEY_SIZE], plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| CocoonError::Encryption(format!("Invalid key: {e}")))?;

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| CocoonError::Encryption(format!("Encryption failed: {e}")))?;

    let mut output = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    output.extend_from_slice(&nonce_bytes);
    output.extend_from_slice(&ciphertext);
    Ok(output)
}

/// Decrypt `nonce ‖ ciphertext ‖ tag`. All-or-nothing: any authentication
/// failure yields an error and no plaintext.
pub fn open(key: &[u8; KEY_SIZE], sealed: &[u8]) -> Result<Vec<u8>> {
    if sealed.len() < NONCE_SIZE + TAG_SIZE {
        return Err(CocoonError::Decryption(format!(
            "Ciphertext too short: {} bytes",
            sealed.len()
        )));
    }

    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| CocoonError::Decryption(format!("Invalid key: {e}")))?;

    let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_SIZE);
    let nonce = Nonce::from_slice(nonce_bytes);

    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| CocoonError::Decryption("Authentication failed".to_string()))
}

/// Encrypt a string for storage, tagging it with the key's fingerprint.
pub fn encrypt(plaintext: &str, key: &KeyRecord) -> Result<EncryptedPayload> {
    let sealed = seal(key.key_bytes(), plaintext.as_bytes())?;

    Ok(EncryptedPayload {
        encrypted_value: STANDARD.encode(sealed),
        key_id: key.fingerprint(),
        algorithm: ALGORITHM.to_string(),
        created_at: Utc::now(),
    })
}

/// Decrypt a payload. Fails with `Decryption` on fingerprint mismatch,
/// unknown algorithm, malformed encoding, or tag verification failure.
pub fn decrypt(payload: &EncryptedPayload, key: &KeyRecord) -> Result<String> {
    if !fingerprints_match(&payload.key_id, &key.fingerprint()) {
        return Err(CocoonError::Decryption(format!(
            "Key fingerprint mismatch: payload was sealed under {}",
            payload.key_id
        )));
    }
    if payload.algorithm != ALGORITHM {
        return Err(CocoonError::Decryption(format!(
            "Unsupported algorithm: {}",
            payload.algorithm
        )));
    }

    let sealed = STANDARD
        .decode(&payload.encrypted_value)
        .map_err(|e| CocoonError::Decryption(format!("Malformed payload: {e}")))?;

    let plaintext = open(key.key_bytes(), &sealed)?;
    String::from_utf8(plaintext)
        .map_err(|_| CocoonError::Decryption("Plaintext is not valid UTF-8".to_string()))
}
