use crate::error::{CocoonError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Minimum PBKDF2 iteration count accepted for backup wrapping keys.
pub const MIN_KDF_ITERATIONS: u32 = 100_000;

/// Top-level Cocoon configuration stored as TOML. Read once at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CocoonConfig {
    pub cocoon: CocoonSettings,
    #[serde(default)]
    pub kms: KmsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CocoonSettings {
    /// Path to the SQLite key store.
    pub db_path: String,
    /// PBKDF2-HMAC-SHA256 iterations for backup wrapping keys.
    #[serde(default = "default_kdf_iterations")]
    pub kdf_iterations: u32,
}

/// Remote key-management settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KmsConfig {
    /// Request data keys from the remote KMS.
    #[serde(default)]
    pub enabled: bool,
    /// Fall back to local keys when the KMS cannot be reached.
    #[serde(default = "default_hybrid_mode")]
    pub hybrid_mode: bool,
    /// Scope the remote service issues keys under.
    #[serde(default = "default_app_scope")]
    pub app_scope: String,
    /// Base URL of the KMS API.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Upper bound on a single remote call.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for KmsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            hybrid_mode: default_hybrid_mode(),
            app_scope: default_app_scope(),
            endpoint: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_kdf_iterations() -> u32 {
    MIN_KDF_ITERATIONS
}

fn default_hybrid_mode() -> bool {
    true
}

fn default_app_scope() -> String {
    "journal".to_string()
}

fn default_timeout_secs() -> u64 {
    10
}

impl CocoonConfig {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(CocoonError::ConfigNotFound(path.display().to_string()));
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self =
            toml::from_str(&content).map_err(|e| CocoonError::TomlDe(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| CocoonError::TomlSer(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.cocoon.kdf_iterations < MIN_KDF_ITERATIONS {
            return Err(CocoonError::Config(format!(
                "kdf_iterations must be at least {MIN_KDF_ITERATIONS}, got {}",
                self.cocoon.kdf_iterations
            )));
        }
        if self.kms.timeout_secs == 0 {
            return Err(CocoonError::Config(
                "kms.timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.kms.app_scope.trim().is_empty() {
            return Err(CocoonError::Config("kms.app_scope is empty".to_string()));
        }
        if self.kms.enabled && self.kms.endpoint.is_none() {
            return Err(CocoonError::Config(
                "kms.enabled requires kms.endpoint".to_string(),
            ));
        }
        Ok(())
    }

    /// Default config for `cocoon init`.
    pub fn default_config(base_dir: &Path) -> Self {
        Self {
            cocoon: CocoonSettings {
                db_path: base_dir.join("keys.db").display().to_string(),
                kdf_iterations: MIN_KDF_ITERATIONS,
            },
            kms: KmsConfig::default(),
        }
    }

    /// Resolve the config file path: `<base_dir>/cocoon.toml`
    pub fn default_path(base_dir: &Path) -> PathBuf {
        base_dir.join("cocoon.toml")
    }

    /// Resolve the default cocoon home directory: `~/.cocoon`
    pub fn default_base_dir() -> Result<PathBuf> {
        dirs::home_dir()
            .map(|h| h.join(".cocoon"))
            .ok_or_else(|| CocoonError::Config("Cannot determine home directory".to_string()))
    }
}
