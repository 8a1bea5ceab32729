use thiserror::Error;

#[derive(Debug, Error)]
pub enum CocoonError {
    // IO
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Config
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Configuration file not found at {0}; run `cocoon init` first")]
    ConfigNotFound(String),

    // Keys
    #[error("Key not found: {0}")]
    KeyNotFound(String),

    #[error("Key rotation failed: {0}")]
    KeyRotation(String),

    // Crypto
    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Decryption error: {0}")]
    Decryption(String),

    // Backup
    #[error("Restore failed: {0}")]
    Restore(String),

    // Remote KMS
    #[error("KMS unavailable: {0}")]
    KmsUnavailable(String),

    // Storage
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    // Serialization
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("TOML deserialization error: {0}")]
    TomlDe(String),

    #[error("TOML serialization error: {0}")]
    TomlSer(String),
}

impl CocoonError {
    /// True when the failure means "no key provisioned yet" rather than bad
    /// data or a wrong key.
    pub fn is_not_found(&self) -> bool {
        matches!(self, CocoonError::KeyNotFound(_))
    }

    /// True for errors originating in the durable store (I/O, SQLite, lock).
    pub fn is_storage(&self) -> bool {
        matches!(
            self,
            CocoonError::Storage(_) | CocoonError::Database(_) | CocoonError::Io(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, CocoonError>;
