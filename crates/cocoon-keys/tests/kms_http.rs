//! Hybrid provider against a mock KMS over HTTP.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use cocoon_core::CocoonError;
use cocoon_core::config::KmsConfig;
use cocoon_core::store::MemoryKeyStore;
use cocoon_core::types::KeySource;
use cocoon_keys::kms::RemoteKeyService;
use cocoon_keys::kms::http::HttpKmsClient;
use cocoon_keys::kms::hybrid::{HybridKeyProvider, KmsState};
use cocoon_keys::lifecycle::KeyLifecycleManager;
use cocoon_keys::provider::KeyProvider;
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TOKEN: &str = "test-session-token";

fn dek_body(byte: u8, version: u32) -> serde_json::Value {
    json!({
        "dek": STANDARD.encode([byte; 32]),
        "keyVersion": version,
        "createdAt": "2026-03-01T12:00:00Z",
    })
}

fn config(server: &MockServer, hybrid_mode: bool) -> KmsConfig {
    KmsConfig {
        enabled: true,
        hybrid_mode,
        endpoint: Some(server.uri()),
        timeout_secs: 1,
        ..KmsConfig::default()
    }
}

async fn client(server: &MockServer, token: Option<&str>) -> Arc<HttpKmsClient> {
    let client = HttpKmsClient::new(&server.uri(), Duration::from_secs(5)).unwrap();
    if let Some(token) = token {
        client.set_bearer_token(token.to_string()).await;
    }
    Arc::new(client)
}

fn manager() -> Arc<KeyLifecycleManager> {
    Arc::new(KeyLifecycleManager::new(Arc::new(MemoryKeyStore::new())))
}

fn provider(
    manager: Arc<KeyLifecycleManager>,
    remote: Arc<HttpKmsClient>,
    config: KmsConfig,
) -> HybridKeyProvider {
    let remote: Arc<dyn RemoteKeyService> = remote;
    HybridKeyProvider::new(manager, Some(remote), config).unwrap()
}

/// A fresh provider over a shared store, as each CLI invocation builds.
async fn session(server: &MockServer, manager: Arc<KeyLifecycleManager>) -> HybridKeyProvider {
    provider(manager, client(server, Some(TOKEN)).await, config(server, true))
}

#[tokio::test]
async fn client_sends_scope_and_bearer() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/dek/generate"))
        .and(header("authorization", format!("Bearer {TOKEN}").as_str()))
        .and(body_json(json!({ "appScope": "journal" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(dek_body(7, 3)))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server, Some(TOKEN)).await;
    let dek = client.generate_user_dek("journal").await.unwrap();
    assert_eq!(dek.key_version, 3);
    assert_eq!(*dek.decode().unwrap(), [7u8; 32]);
}

#[tokio::test]
async fn missing_token_never_reaches_server() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(dek_body(7, 1)))
        .expect(0)
        .mount(&server)
        .await;

    let client = client(&server, None).await;
    assert!(!client.is_authenticated().await);
    assert!(matches!(
        client.generate_user_dek("journal").await,
        Err(CocoonError::KmsUnavailable(_))
    ));
}

#[tokio::test]
async fn kms_key_served_and_cached() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/dek/generate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(dek_body(9, 1)))
        .expect(1)
        .mount(&server)
        .await;

    let manager = manager();
    let provider = provider(
        manager.clone(),
        client(&server, Some(TOKEN)).await,
        config(&server, true),
    );

    let payload = provider.encrypt_for_user("alice", "cycle day 14").await.unwrap();
    let again = provider.active_key("alice").await.unwrap();

    assert_eq!(payload.key_id, again.fingerprint());
    assert_eq!(
        again.source,
        KeySource::Kms {
            app_scope: "journal".into()
        }
    );
    assert_eq!(provider.state("alice"), KmsState::KmsActive);
    assert_eq!(
        provider.decrypt_for_user("alice", &payload).await.unwrap(),
        "cycle day 14"
    );
    // Server-issued keys never land in the local store.
    assert!(manager.active_key("alice").await.is_err());
}

#[tokio::test]
async fn server_error_falls_back_in_hybrid_mode() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let manager = manager();
    let provider = provider(
        manager.clone(),
        client(&server, Some(TOKEN)).await,
        config(&server, true),
    );

    let key = provider.active_key("alice").await.unwrap();
    assert_eq!(key.source, KeySource::Local);
    assert_eq!(provider.state("alice"), KmsState::FallbackLocal);
    assert_eq!(
        manager.active_key("alice").await.unwrap().fingerprint(),
        key.fingerprint()
    );
}

#[tokio::test]
async fn unauthorized_falls_back_in_hybrid_mode() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let provider = provider(
        manager(),
        client(&server, Some("expired")).await,
        config(&server, true),
    );
    let key = provider.active_key("alice").await.unwrap();
    assert_eq!(key.source, KeySource::Local);
}

#[tokio::test]
async fn server_error_is_unavailable_without_hybrid() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let manager = manager();
    let provider = provider(
        manager.clone(),
        client(&server, Some(TOKEN)).await,
        config(&server, false),
    );

    let err = provider.active_key("alice").await.unwrap_err();
    assert!(matches!(err, CocoonError::KmsUnavailable(_)));
    assert_eq!(provider.state("alice"), KmsState::Unavailable);
    assert!(manager.active_key("alice").await.is_err());
}

#[tokio::test]
async fn slow_kms_times_out_and_falls_back() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(dek_body(1, 1))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let provider = provider(
        manager(),
        client(&server, Some(TOKEN)).await,
        config(&server, true),
    );

    let started = std::time::Instant::now();
    let key = provider.active_key("alice").await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(key.source, KeySource::Local);
    assert_eq!(provider.state("alice"), KmsState::FallbackLocal);
}

#[tokio::test]
async fn malformed_dek_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "dek": STANDARD.encode([1u8; 16]),
            "keyVersion": 1,
            "createdAt": "2026-03-01T12:00:00Z",
        })))
        .mount(&server)
        .await;

    let provider = provider(
        manager(),
        client(&server, Some(TOKEN)).await,
        config(&server, false),
    );
    assert!(matches!(
        provider.active_key("alice").await,
        Err(CocoonError::KmsUnavailable(_))
    ));
}

#[tokio::test]
async fn rotation_via_kms_keeps_old_payloads_readable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/dek/generate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(dek_body(1, 1)))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/dek/rotate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(dek_body(2, 2)))
        .expect(1)
        .mount(&server)
        .await;

    let manager = manager();
    let provider = provider(
        manager.clone(),
        client(&server, Some(TOKEN)).await,
        config(&server, true),
    );

    let old = provider.encrypt_for_user("alice", "before").await.unwrap();
    let rotated = provider.rotate_key("alice", "manual").await.unwrap();
    assert_eq!(rotated.version, 2);

    let new = provider.encrypt_for_user("alice", "after").await.unwrap();
    assert_eq!(new.key_id, rotated.fingerprint());
    assert_ne!(old.key_id, new.key_id);
    assert_eq!(provider.decrypt_for_user("alice", &old).await.unwrap(), "before");

    let history = manager.rotation_history("alice").await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].new_key_fingerprint, rotated.fingerprint());
}

#[tokio::test]
async fn kms_rotation_across_sessions() {
    let server = MockServer::start().await;
    // Until the rotation lands the KMS keeps handing out version 1.
    Mock::given(method("POST"))
        .and(path("/v1/dek/generate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(dek_body(1, 1)))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/dek/generate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(dek_body(2, 2)))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/dek/rotate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(dek_body(2, 2)))
        .expect(1)
        .mount(&server)
        .await;

    let manager = manager();
    let old = session(&server, manager.clone())
        .await
        .encrypt_for_user("alice", "before")
        .await
        .unwrap();

    let rotating = session(&server, manager.clone()).await;
    let rotated = rotating.rotate_key("alice", "manual").await.unwrap();
    assert_eq!(rotated.version, 2);
    let history = manager.rotation_history("alice").await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].old_key_fingerprint, old.key_id);
    assert_eq!(rotating.decrypt_for_user("alice", &old).await.unwrap(), "before");

    // Server-issued DEKs are not persisted, so a later session cannot open
    // entries sealed under the replaced one.
    let later = session(&server, manager.clone()).await;
    assert_eq!(
        later.active_key("alice").await.unwrap().fingerprint(),
        rotated.fingerprint()
    );
    assert!(matches!(
        later.decrypt_for_user("alice", &old).await,
        Err(CocoonError::Decryption(_))
    ));
}
