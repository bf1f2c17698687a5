//! Integration tests for the token manager against a mock token endpoint.
//!
//! A local `wiremock` server stands in for the provider, so exchange and
//! refresh run over real HTTP without reaching Google or Microsoft.

#![allow(clippy::unwrap_used)]

use std::error::Error as _;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use smtp_oauth::{
    AuthConfig, AuthErrorCode, Endpoint, Error, MemoryTokenStore, ProviderError, ProviderKind,
    Token, TokenManager, TokenStore,
};

const KEY: [u8; 32] = [5u8; 32];

fn config() -> AuthConfig {
    AuthConfig::new(
        ProviderKind::Generic,
        "test-client",
        "test-secret",
        "http://localhost:8080/callback",
    )
    .with_scopes(["mail.send"])
}

fn endpoint(server: &MockServer) -> Endpoint {
    Endpoint::new(
        "Mock",
        format!("{}/authorize", server.uri()),
        format!("{}/token", server.uri()),
    )
    .unwrap()
}

fn manager(server: &MockServer) -> TokenManager {
    TokenManager::with_endpoint(config(), endpoint(server)).unwrap()
}

fn token_body(access: &str, refresh: Option<&str>) -> serde_json::Value {
    let mut body = json!({
        "access_token": access,
        "token_type": "Bearer",
        "expires_in": 3600,
        "scope": "mail.send",
    });
    if let Some(refresh) = refresh {
        body["refresh_token"] = json!(refresh);
    }
    body
}

fn expired_token(refresh: &str) -> Token {
    Token::new("ya29.expired", "Bearer", Utc::now() - chrono::Duration::minutes(10))
        .with_refresh_token(refresh)
        .with_scope("mail.send")
}

#[tokio::test]
async fn test_exchange_code_success() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains("code=good-code"))
        .and(body_string_contains("client_id=test-client"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("ya29.new", Some("rt-1"))))
        .expect(1)
        .mount(&server)
        .await;

    let token = manager(&server).exchange_code("good-code").await.unwrap();

    assert_eq!(token.access_token, "ya29.new");
    assert_eq!(token.token_type, "Bearer");
    assert_eq!(token.refresh_token.as_deref(), Some("rt-1"));
    assert_eq!(token.scope.as_deref(), Some("mail.send"));
    assert!(token.expiry > Utc::now() + chrono::Duration::minutes(59));
}

#[tokio::test]
async fn test_exchange_code_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant",
            "error_description": "Bad Request",
        })))
        .mount(&server)
        .await;

    let err = manager(&server).exchange_code("bad-code").await.unwrap_err();

    assert_eq!(err.code(), Some(AuthErrorCode::CodeExchangeFailed));
    assert!(!err.is_retryable());
    match err {
        Error::Authentication {
            source: Some(ProviderError::OAuth { error, description }),
            ..
        } => {
            assert_eq!(error, "invalid_grant");
            assert_eq!(description, "Bad Request");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_exchange_code_server_error_without_json() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(503).set_body_string("upstream unavailable"))
        .mount(&server)
        .await;

    let err = manager(&server).exchange_code("code").await.unwrap_err();
    assert!(matches!(
        err,
        Error::Authentication {
            code: AuthErrorCode::CodeExchangeFailed,
            source: Some(ProviderError::Status(503)),
        }
    ));
}

#[tokio::test]
async fn test_exchange_code_missing_expiry() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "ya29.new",
            "token_type": "Bearer",
        })))
        .mount(&server)
        .await;

    let err = manager(&server).exchange_code("code").await.unwrap_err();
    assert!(matches!(
        err,
        Error::Authentication {
            source: Some(ProviderError::InvalidResponse(_)),
            ..
        }
    ));
}

async fn mount_huge_lifetime(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "ya29.forever",
            "token_type": "Bearer",
            "expires_in": 9_223_372_036_854_775_807_u64,
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_exchange_code_lifetime_out_of_range() {
    let server = MockServer::start().await;
    mount_huge_lifetime(&server).await;

    let err = manager(&server).exchange_code("code").await.unwrap_err();
    assert!(matches!(
        err,
        Error::Authentication {
            code: AuthErrorCode::CodeExchangeFailed,
            source: Some(ProviderError::InvalidResponse(_)),
        }
    ));
}

#[tokio::test]
async fn test_refresh_lifetime_out_of_range() {
    let server = MockServer::start().await;
    mount_huge_lifetime(&server).await;

    let err = manager(&server)
        .refresh_token(&expired_token("rt"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Authentication {
            code: AuthErrorCode::TokenRefreshFailed,
            source: Some(ProviderError::InvalidResponse(_)),
        }
    ));
}

#[tokio::test]
async fn test_get_token_refresh_lifetime_out_of_range_keeps_record() {
    let server = MockServer::start().await;
    mount_huge_lifetime(&server).await;

    let store = Arc::new(MemoryTokenStore::new(&KEY).unwrap());
    let stored = expired_token("rt-stored");
    store.store_token("alice@example.com", &stored).unwrap();
    let manager = manager(&server).with_store(store.clone());

    let err = manager.get_token("alice@example.com").await.unwrap_err();
    assert_eq!(err.code(), Some(AuthErrorCode::TokenRefreshFailed));
    assert_eq!(store.get_token("alice@example.com").unwrap(), stored);
}

#[tokio::test]
async fn test_error_messages_never_contain_secrets() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": "invalid_client",
        })))
        .mount(&server)
        .await;

    let err = manager(&server)
        .refresh_token(&expired_token("rt-secret-value"))
        .await
        .unwrap_err();

    let mut chain = vec![err.to_string()];
    let mut source = err.source();
    while let Some(cause) = source {
        chain.push(cause.to_string());
        source = cause.source();
    }
    let rendered = format!("{} {err:?}", chain.join(" | "));

    assert!(rendered.contains("invalid_client"));
    assert!(!rendered.contains("rt-secret-value"));
    assert!(!rendered.contains("test-secret"));
}

#[tokio::test]
async fn test_refresh_preserves_refresh_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=rt-old"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("ya29.fresh", None)))
        .expect(1)
        .mount(&server)
        .await;

    let refreshed = manager(&server)
        .refresh_token(&expired_token("rt-old"))
        .await
        .unwrap();

    assert_eq!(refreshed.access_token, "ya29.fresh");
    assert_eq!(refreshed.refresh_token.as_deref(), Some("rt-old"));
    assert!(!refreshed.is_expired());
}

#[tokio::test]
async fn test_refresh_uses_rotated_refresh_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(token_body("ya29.fresh", Some("rt-rotated"))),
        )
        .mount(&server)
        .await;

    let refreshed = manager(&server)
        .refresh_token(&expired_token("rt-old"))
        .await
        .unwrap();
    assert_eq!(refreshed.refresh_token.as_deref(), Some("rt-rotated"));
}

#[tokio::test]
async fn test_refresh_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant",
            "error_description": "Token has been expired or revoked.",
        })))
        .mount(&server)
        .await;

    let err = manager(&server)
        .refresh_token(&expired_token("rt-revoked"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Authentication {
            code: AuthErrorCode::TokenRefreshFailed,
            source: Some(_),
        }
    ));
}

#[tokio::test]
async fn test_timeout_releases_lock() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(token_body("ya29.slow", None))
                .set_delay(Duration::from_secs(2)),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("ya29.fast", None)))
        .mount(&server)
        .await;

    let manager = TokenManager::with_endpoint(
        config().with_timeout(Duration::from_millis(200)),
        endpoint(&server),
    )
    .unwrap();

    let err = manager.exchange_code("code").await.unwrap_err();
    assert!(matches!(
        err,
        Error::Timeout {
            code: AuthErrorCode::CodeExchangeFailed,
            timeout,
        } if timeout == Duration::from_millis(200)
    ));
    assert!(err.is_retryable());

    let token = manager.exchange_code("code").await.unwrap();
    assert_eq!(token.access_token, "ya29.fast");
}

#[tokio::test]
async fn test_unreachable_endpoint_is_connection_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let endpoint = Endpoint::new(
        "Closed",
        format!("http://{addr}/authorize"),
        format!("http://{addr}/token"),
    )
    .unwrap();
    let manager = TokenManager::with_endpoint(config(), endpoint).unwrap();

    let err = manager
        .refresh_token(&expired_token("rt"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Connection {
            code: AuthErrorCode::TokenRefreshFailed,
            ..
        }
    ));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_authorize_then_get_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("ya29.first", Some("rt-1"))))
        .expect(1)
        .mount(&server)
        .await;

    let store = Arc::new(MemoryTokenStore::new(&KEY).unwrap());
    let manager = manager(&server).with_store(store.clone());

    let issued = manager.authorize("alice@example.com", "code").await.unwrap();
    let loaded = manager.get_token("alice@example.com").await.unwrap();

    assert_eq!(loaded, issued);
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn test_get_token_refreshes_and_persists() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("refresh_token=rt-stored"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("ya29.renewed", None)))
        .expect(1)
        .mount(&server)
        .await;

    let store = Arc::new(MemoryTokenStore::new(&KEY).unwrap());
    store
        .store_token("alice@example.com", &expired_token("rt-stored"))
        .unwrap();
    let manager = manager(&server).with_store(store.clone());

    let token = manager.get_token("alice@example.com").await.unwrap();
    assert_eq!(token.access_token, "ya29.renewed");
    assert_eq!(token.refresh_token.as_deref(), Some("rt-stored"));

    // Second call is served from the store without another request.
    let persisted = store.get_token("alice@example.com").unwrap();
    assert_eq!(persisted, token);
    assert_eq!(manager.get_token("alice@example.com").await.unwrap(), token);
}

#[tokio::test]
async fn test_concurrent_refreshes_share_manager() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("ya29.shared", None)))
        .expect(8)
        .mount(&server)
        .await;

    let manager = Arc::new(manager(&server));
    let tasks: Vec<_> = (0..8)
        .map(|i| {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move {
                manager
                    .refresh_token(&expired_token(&format!("rt-{i}")))
                    .await
            })
        })
        .collect();

    for (i, task) in tasks.into_iter().enumerate() {
        let token = task.await.unwrap().unwrap();
        assert_eq!(token.access_token, "ya29.shared");
        assert_eq!(token.refresh_token, Some(format!("rt-{i}")));
    }
}
