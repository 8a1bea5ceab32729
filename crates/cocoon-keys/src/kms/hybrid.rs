//! KMS-preferring key provider with local fallback.
//!
//! Per-user state:
//!
//! ```text
//! Disabled        KMS off in config; every call goes to the local manager
//! LocalOnly       KMS on, user not served yet
//! KmsActive       last remote call succeeded; DEK cached for the session
//! FallbackLocal   last remote call failed, hybrid mode served a local key
//! Unavailable     last remote call failed, hybrid mode off
//! ```
//!
//! Every operation's remote calls share one `kms.timeout_secs` deadline and
//! are never retried. A rotation on a session that has not seen the current
//! DEK fetches it first, so the audit event can name the key it replaces.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cocoon_core::config::KmsConfig;
use cocoon_core::error::{CocoonError, Result};
use cocoon_core::types::{KeyRecord, KeyRotationEvent, KmsKeyRecord};
use tracing::{info, warn};

use super::RemoteKeyService;
use super::cache::DekCache;
use crate::lifecycle::KeyLifecycleManager;
use crate::locks::UserLocks;
use crate::provider::KeyProvider;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KmsState {
    Disabled,
    LocalOnly,
    KmsActive,
    FallbackLocal,
    Unavailable,
}

impl fmt::Display for KmsState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KmsState::Disabled => write!(f, "disabled"),
            KmsState::LocalOnly => write!(f, "local-only"),
            KmsState::KmsActive => write!(f, "kms-active"),
            KmsState::FallbackLocal => write!(f, "fallback-local"),
            KmsState::Unavailable => write!(f, "unavailable"),
        }
    }
}

#[derive(Clone, Copy)]
enum RemoteOp {
    Generate,
    Rotate,
}

pub struct HybridKeyProvider {
    manager: Arc<KeyLifecycleManager>,
    remote: Option<Arc<dyn RemoteKeyService>>,
    config: KmsConfig,
    cache: DekCache,
    /// One entry per user seen this session; the provider lives as long as
    /// the signed-in session, so entries are not pruned.
    states: Mutex<HashMap<String, KmsState>>,
    locks: UserLocks,
}

impl HybridKeyProvider {
    /// Enabling KMS without a remote service is a configuration error.
    pub fn new(
        manager: Arc<KeyLifecycleManager>,
        remote: Option<Arc<dyn RemoteKeyService>>,
        config: KmsConfig,
    ) -> Result<Self> {
        if config.enabled && remote.is_none() {
            return Err(CocoonError::Config(
                "KMS is enabled but no remote key service was supplied".to_string(),
            ));
        }
        Ok(Self {
            manager,
            remote,
            config,
            cache: DekCache::new(),
            states: Mutex::new(HashMap::new()),
            locks: UserLocks::default(),
        })
    }

    pub fn state(&self, user_id: &str) -> KmsState {
        if !self.config.enabled {
            return KmsState::Disabled;
        }
        self.states
            .lock()
            .ok()
            .and_then(|states| states.get(user_id).copied())
            .unwrap_or(KmsState::LocalOnly)
    }

    pub fn cache(&self) -> &DekCache {
        &self.cache
    }

    fn set_state(&self, user_id: &str, state: KmsState) {
        if let Ok(mut states) = self.states.lock() {
            states.insert(user_id.to_string(), state);
        }
    }

    fn enabled_remote(&self) -> Option<&Arc<dyn RemoteKeyService>> {
        if self.config.enabled {
            self.remote.as_ref()
        } else {
            None
        }
    }

    /// The active key: cached DEK, else a fresh remote fetch, else (hybrid)
    /// the local key.
    pub async fn get_key(&self, user_id: &str) -> Result<KeyRecord> {
        let Some(remote) = self.enabled_remote() else {
            return self.manager.get_or_create_active_key(user_id).await;
        };
        let scope = self.config.app_scope.as_str();

        if let Some(cached) = self.cache.get(user_id, scope).await {
            return Ok(cached.to_key_record());
        }

        let _guard = self.locks.acquire(user_id).await?;
        if let Some(cached) = self.cache.get(user_id, scope).await {
            return Ok(cached.to_key_record());
        }

        match self.call_remote(remote, RemoteOp::Generate, user_id).await {
            Ok(record) => {
                let key = record.to_key_record();
                info!(user_id, fingerprint = %key.fingerprint(), "Obtained DEK from KMS");
                self.cache.insert(record).await;
                self.set_state(user_id, KmsState::KmsActive);
                Ok(key)
            }
            Err(e) => {
                self.on_remote_failure(user_id, e)?;
                self.manager.get_or_create_active_key(user_id).await
            }
        }
    }

    /// Rotate through the KMS. The rotation event is written before the
    /// cache changes, so a failed append leaves the active DEK in place. On
    /// remote failure in hybrid mode the local key is rotated instead (or
    /// provisioned, if the user has none yet).
    pub async fn rotate(&self, user_id: &str, reason: &str) -> Result<KeyRecord> {
        let Some(remote) = self.enabled_remote() else {
            return self.manager.rotate(user_id, reason).await;
        };

        let _guard = self.locks.acquire(user_id).await?;
        let cached = self.cache.get(user_id, &self.config.app_scope).await;
        let was_cached = cached.is_some();

        match self.remote_rotation(remote, user_id, cached).await {
            Ok((previous, next)) => {
                let key = next.to_key_record();
                let event = KeyRotationEvent::new(&previous.to_key_record(), &key, reason);
                self.manager
                    .store()
                    .append_rotation_event(&event)
                    .await
                    .map_err(|e| CocoonError::KeyRotation(e.to_string()))?;

                if !was_cached {
                    self.cache.insert(previous).await;
                }
                self.cache.insert(next).await;
                self.set_state(user_id, KmsState::KmsActive);
                info!(
                    user_id,
                    old = %event.old_key_fingerprint,
                    new = %event.new_key_fingerprint,
                    version = key.version,
                    "Rotated DEK via KMS"
                );
                Ok(key)
            }
            Err(e) => {
                self.on_remote_failure(user_id, e)?;
                match self.manager.rotate(user_id, reason).await {
                    Err(e) if e.is_not_found() => {
                        self.manager.get_or_create_active_key(user_id).await
                    }
                    other => other,
                }
            }
        }
    }

    pub async fn find_key(&self, user_id: &str, fingerprint: &str) -> Result<KeyRecord> {
        if let Some(record) = self.cache.find_by_fingerprint(user_id, fingerprint).await {
            return Ok(record.to_key_record());
        }
        self.manager.key_by_fingerprint(user_id, fingerprint).await
    }

    async fn call_remote(
        &self,
        remote: &Arc<dyn RemoteKeyService>,
        op: RemoteOp,
        user_id: &str,
    ) -> Result<KmsKeyRecord> {
        self.within_timeout(self.fetch_dek(remote, op, user_id)).await
    }

    /// The DEK being replaced and its replacement. When the session has not
    /// seen the current DEK yet it is fetched first, under the same deadline.
    async fn remote_rotation(
        &self,
        remote: &Arc<dyn RemoteKeyService>,
        user_id: &str,
        cached: Option<KmsKeyRecord>,
    ) -> Result<(KmsKeyRecord, KmsKeyRecord)> {
        self.within_timeout(async move {
            let previous = match cached {
                Some(record) => record,
                None => self.fetch_dek(remote, RemoteOp::Generate, user_id).await?,
            };
            let next = self.fetch_dek(remote, RemoteOp::Rotate, user_id).await?;
            Ok((previous, next))
        })
        .await
    }

    async fn within_timeout<T>(&self, call: impl Future<Output = Result<T>>) -> Result<T> {
        let timeout = Duration::from_secs(self.config.timeout_secs);
        tokio::time::timeout(timeout, call).await.map_err(|_| {
            CocoonError::KmsUnavailable(format!(
                "No response within {}s",
                self.config.timeout_secs
            ))
        })?
    }

    async fn fetch_dek(
        &self,
        remote: &Arc<dyn RemoteKeyService>,
        op: RemoteOp,
        user_id: &str,
    ) -> Result<KmsKeyRecord> {
        let scope = self.config.app_scope.as_str();
        let dek = match op {
            RemoteOp::Generate => remote.generate_user_dek(scope).await?,
            RemoteOp::Rotate => remote.rotate_user_dek(scope).await?,
        };
        let raw = dek.decode()?;

        Ok(KmsKeyRecord::new(
            user_id,
            scope,
            *raw,
            dek.key_version,
            dek.created_at,
        ))
    }

    /// Record the failure and decide whether the local path may serve it.
    fn on_remote_failure(&self, user_id: &str, err: CocoonError) -> Result<()> {
        let err = match err {
            CocoonError::KmsUnavailable(_) => err,
            other => CocoonError::KmsUnavailable(other.to_string()),
        };

        if self.config.hybrid_mode {
            warn!(user_id, error = %err, "KMS call failed, falling back to local key");
            self.set_state(user_id, KmsState::FallbackLocal);
            Ok(())
        } else {
            warn!(user_id, error = %err, "KMS call failed, no fallback permitted");
            self.set_state(user_id, KmsState::Unavailable);
            Err(err)
        }
    }
}

#[async_trait]
impl KeyProvider for HybridKeyProvider {
    async fn active_key(&self, user_id: &str) -> Result<KeyRecord> {
        self.get_key(user_id).await
    }

    async fn rotate_key(&self, user_id: &str, reason: &str) -> Result<KeyRecord> {
        self.rotate(user_id, reason).await
    }

    async fn key_by_fingerprint(&self, user_id: &str, fingerprint: &str) -> Result<KeyRecord> {
        self.find_key(user_id, fingerprint).await
    }

    fn name(&self) -> &str {
        "hybrid-kms"
    }
}
