//! Wiring: pick the key provider from configuration and assemble a session.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use cocoon_core::config::{CocoonConfig, KmsConfig};
use cocoon_core::error::{CocoonError, Result};
use cocoon_core::store::SqliteKeyStore;
use tracing::{debug, warn};

use crate::backup::BackupService;
use crate::kms::RemoteKeyService;
use crate::kms::http::HttpKmsClient;
use crate::kms::hybrid::HybridKeyProvider;
use crate::lifecycle::KeyLifecycleManager;
use crate::local::LocalKeyProvider;
use crate::provider::KeyProvider;

/// Choose the provider once, at construction:
/// - KMS disabled: [`LocalKeyProvider`]
/// - KMS enabled: [`HybridKeyProvider`] over `remote`
pub fn create_key_provider(
    config: &KmsConfig,
    manager: Arc<KeyLifecycleManager>,
    remote: Option<Arc<dyn RemoteKeyService>>,
) -> Result<Arc<dyn KeyProvider>> {
    if !config.enabled {
        return Ok(Arc::new(LocalKeyProvider::new(manager)));
    }
    let remote = remote.ok_or_else(|| {
        CocoonError::Config("KMS is enabled but no remote key service was supplied".to_string())
    })?;
    Ok(Arc::new(HybridKeyProvider::new(
        manager,
        Some(remote),
        config.clone(),
    )?))
}

/// Everything a front end needs for one signed-in session.
pub struct KeySession {
    pub manager: Arc<KeyLifecycleManager>,
    pub provider: Arc<dyn KeyProvider>,
    pub backups: BackupService,
}

/// Open the on-disk store and build the provider stack described by `config`.
/// `kms_token` is the bearer credential for the remote service, if any.
pub async fn open_session(config: &CocoonConfig, kms_token: Option<String>) -> Result<KeySession> {
    let store = SqliteKeyStore::open(Path::new(&config.cocoon.db_path))?;
    let manager = Arc::new(KeyLifecycleManager::new(Arc::new(store)));

    let remote: Option<Arc<dyn RemoteKeyService>> = match (&config.kms.endpoint, config.kms.enabled) {
        (Some(endpoint), true) => {
            let client =
                HttpKmsClient::new(endpoint, Duration::from_secs(config.kms.timeout_secs))?;
            if let Some(token) = kms_token {
                client.set_bearer_token(token).await;
            }
            if !client.is_authenticated().await {
                warn!("KMS is enabled but no bearer credential was supplied");
            }
            Some(Arc::new(client))
        }
        _ => None,
    };

    let provider = create_key_provider(&config.kms, manager.clone(), remote)?;
    debug!(provider = provider.name(), db = %config.cocoon.db_path, "Opened key session");

    Ok(KeySession {
        backups: BackupService::new(manager.clone(), config.cocoon.kdf_iterations),
        manager,
        provider,
    })
}
