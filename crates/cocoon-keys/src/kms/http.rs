//! HTTP client for the remote KMS.
//!
//! `POST {endpoint}/v1/dek/generate` and `POST {endpoint}/v1/dek/rotate`, both
//! with body `{"appScope": ...}` and a bearer credential for the signed-in user.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cocoon_core::error::{CocoonError, Result};
use reqwest::{Client, StatusCode};
use tokio::sync::RwLock;
use tracing::debug;
use zeroize::Zeroizing;

use super::{RemoteDek, RemoteKeyService};

const GENERATE_PATH: &str = "/v1/dek/generate";
const ROTATE_PATH: &str = "/v1/dek/rotate";

pub struct HttpKmsClient {
    client: Client,
    endpoint: String,
    token: Arc<RwLock<Option<Zeroizing<String>>>>,
}

impl HttpKmsClient {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CocoonError::Config(format!("Failed to build KMS HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            token: Arc::new(RwLock::new(None)),
        })
    }

    /// Install the bearer credential of the signed-in user.
    pub async fn set_bearer_token(&self, token: String) {
        *self.token.write().await = Some(Zeroizing::new(token));
    }

    pub async fn is_authenticated(&self) -> bool {
        self.token.read().await.is_some()
    }

    async fn call(&self, path: &str, app_scope: &str) -> Result<RemoteDek> {
        let token = self
            .token
            .read()
            .await
            .clone()
            .ok_or_else(|| CocoonError::KmsUnavailable("No bearer credential".to_string()))?;

        let url = format!("{}{}", self.endpoint, path);
        debug!(%url, app_scope, "KMS request");

        let resp = self
            .client
            .post(&url)
            .bearer_auth(token.as_str())
            .json(&serde_json::json!({ "appScope": app_scope }))
            .send()
            .await
            .map_err(|e| CocoonError::KmsUnavailable(format!("Request to {url} failed: {e}")))?;

        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(CocoonError::KmsUnavailable(format!(
                "Unauthorized ({status})"
            )));
        }
        if !status.is_success() {
            return Err(CocoonError::KmsUnavailable(format!(
                "{path} returned {status}"
            )));
        }

        resp.json::<RemoteDek>()
            .await
            .map_err(|e| CocoonError::KmsUnavailable(format!("Invalid KMS response: {e}")))
    }
}

#[async_trait]
impl RemoteKeyService for HttpKmsClient {
    async fn generate_user_dek(&self, app_scope: &str) -> Result<RemoteDek> {
        self.call(GENERATE_PATH, app_scope).await
    }

    async fn rotate_user_dek(&self, app_scope: &str) -> Result<RemoteDek> {
        self.call(ROTATE_PATH, app_scope).await
    }
}
