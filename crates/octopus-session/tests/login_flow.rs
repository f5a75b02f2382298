use std::sync::Arc;

use octopus_session::{
    AuthError, FileTokenStore, LogoutOutcome, NativeAppClient, NativeAppConfig, SessionConfig,
    SessionManager, TokenStore, DEFAULT_FABRIC_RESOURCE_SERVER,
};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn manager(
    server: &MockServer,
    dir: &tempfile::TempDir,
) -> (SessionManager, Arc<FileTokenStore>) {
    let client = NativeAppClient::new(NativeAppConfig {
        base_url: server.uri(),
        ..NativeAppConfig::default()
    })
    .unwrap();
    let store = Arc::new(FileTokenStore::new(dir.path().join("tokens.json")));
    let config = SessionConfig {
        client_id: Some("native-client".into()),
        ..SessionConfig::default()
    };
    (
        SessionManager::new(config, Arc::new(client), store.clone()),
        store,
    )
}

fn token_body() -> serde_json::Value {
    serde_json::json!({
        "access_token": "identity-at",
        "resource_server": "auth.globus.org",
        "expires_in": 3600,
        "scope": "openid",
        "token_type": "Bearer",
        "refresh_token": "identity-rt",
        "other_tokens": [{
            "access_token": "fabric-at",
            "resource_server": DEFAULT_FABRIC_RESOURCE_SERVER,
            "expires_in": 3600,
            "scope": "action_all",
            "token_type": "Bearer",
            "refresh_token": "fabric-rt"
        }]
    })
}

#[tokio::test]
async fn login_persist_and_logout_over_http() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    Mock::given(method("POST"))
        .and(path("/v2/oauth2/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body()))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v2/oauth2/token/revoke"))
        .respond_with(ResponseTemplate::new(200))
        .expect(4)
        .mount(&server)
        .await;

    let (mgr, store) = manager(&server, &dir).await;

    let url = mgr.begin_authentication().await.unwrap();
    assert!(url.starts_with(&server.uri()));
    assert!(url.contains("client_id=native-client"));

    mgr.complete_authentication("abc123").await.unwrap();
    assert!(mgr.state().await.authenticated());
    assert_eq!(mgr.fabric_token().await.unwrap(), "fabric-at");
    assert_eq!(store.load().await.unwrap().unwrap().len(), 2);

    let outcome = mgr.logout().await.unwrap();
    assert_eq!(
        outcome,
        LogoutOutcome::Revoked {
            tokens: 2,
            failures: 0
        }
    );
    assert!(store.load().await.unwrap().is_none());
    assert_eq!(mgr.logout().await.unwrap(), LogoutOutcome::NothingCached);
}

#[tokio::test]
async fn rejected_code_keeps_session_logged_out() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    Mock::given(method("POST"))
        .and(path("/v2/oauth2/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "error": "invalid_grant"
        })))
        .mount(&server)
        .await;

    let (mgr, store) = manager(&server, &dir).await;
    mgr.begin_authentication().await.unwrap();

    let err = mgr.complete_authentication("bogus").await.unwrap_err();
    assert!(matches!(err, AuthError::Exchange(_)));
    assert!(!mgr.state().await.authenticated());
    assert!(store.load().await.unwrap().is_none());
}
