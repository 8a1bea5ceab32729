use std::sync::Arc;

use async_trait::async_trait;
use cocoon_core::error::Result;
use cocoon_core::types::KeyRecord;

use crate::lifecycle::KeyLifecycleManager;
use crate::provider::KeyProvider;

/// Device-local keys only. Every operation goes to the lifecycle manager.
pub struct LocalKeyProvider {
    manager: Arc<KeyLifecycleManager>,
}

impl LocalKeyProvider {
    pub fn new(manager: Arc<KeyLifecycleManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl KeyProvider for LocalKeyProvider {
    async fn active_key(&self, user_id: &str) -> Result<KeyRecord> {
        self.manager.get_or_create_active_key(user_id).await
    }

    async fn rotate_key(&self, user_id: &str, reason: &str) -> Result<KeyRecord> {
        self.manager.rotate(user_id, reason).await
    }

    async fn key_by_fingerprint(&self, user_id: &str, fingerprint: &str) -> Result<KeyRecord> {
        self.manager.key_by_fingerprint(user_id, fingerprint).await
    }

    fn name(&self) -> &str {
        "local"
    }
}
