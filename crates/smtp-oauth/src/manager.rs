//! Token lifecycle orchestration.
//!
//! [`TokenManager`] owns one [`OAuthClient`] per provider configuration and
//! runs the authorization code exchange and refresh grant against it under
//! a deadline. With a [`TokenStore`] attached it also hands out per-identity
//! tokens, refreshing and re-persisting them when they expire.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::error::Elapsed;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::AuthConfig;
use crate::error::{AuthErrorCode, Error, ProviderError, Result};
use crate::flow::OAuthClient;
use crate::provider::{Endpoint, ProviderKind, resolve_endpoint};
use crate::store::TokenStore;
use crate::token::Token;
use crate::validator::{
    ValidationError, validate_authorization_code, validate_config, validate_refreshable,
    validate_token,
};

/// Runs the `OAuth2` exchange and refresh grants for one provider.
///
/// Share it between tasks behind an `Arc`. Building the authorization URL
/// takes a shared lock on the client; exchange and refresh take it
/// exclusively, and the lock wait counts against the timeout.
pub struct TokenManager {
    client: RwLock<OAuthClient>,
    provider: ProviderKind,
    timeout: Duration,
    store: Option<Arc<dyn TokenStore>>,
}

impl TokenManager {
    /// Creates a manager for the configured provider.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if the configuration is malformed and
    /// [`Error::UnsupportedProvider`] if no endpoint is known for the
    /// provider.
    pub fn new(config: AuthConfig) -> Result<Self> {
        validate_config(&config)?;
        let endpoint = resolve_endpoint(&config)?;
        Ok(Self::build(config, endpoint))
    }

    /// Creates a manager that talks to an explicit endpoint.
    ///
    /// This is how a generic provider is used.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if the configuration is malformed.
    pub fn with_endpoint(config: AuthConfig, endpoint: Endpoint) -> Result<Self> {
        validate_config(&config)?;
        Ok(Self::build(config, endpoint))
    }

    fn build(config: AuthConfig, endpoint: Endpoint) -> Self {
        let timeout = config.effective_timeout();
        let provider = config.provider;

        info!(
            provider = %provider,
            endpoint = %endpoint.name,
            timeout = ?timeout,
            "Token manager created"
        );

        let client = OAuthClient::new(
            config.client_id,
            config.client_secret,
            config.redirect_url,
            endpoint,
        )
        .with_scopes(config.scopes);

        Self {
            client: RwLock::new(client),
            provider,
            timeout,
            store: None,
        }
    }

    /// Attaches a token store used by [`get_token`](Self::get_token),
    /// [`authorize`](Self::authorize) and [`revoke_local`](Self::revoke_local).
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn TokenStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Returns the provider this manager was built for.
    #[must_use]
    pub const fn provider(&self) -> ProviderKind {
        self.provider
    }

    /// Returns the deadline applied to exchange and refresh.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Builds the URL the user visits to grant access.
    pub async fn authorization_url(&self, state: &str) -> Url {
        self.client.read().await.authorization_url(state)
    }

    /// Exchanges an authorization code for a token.
    ///
    /// The token is returned, not stored; see [`authorize`](Self::authorize).
    ///
    /// # Errors
    ///
    /// - [`Error::Validation`] if the code is blank
    /// - [`Error::Authentication`] with `CODE_EXCHANGE_FAILED` if the provider
    ///   rejects the code
    /// - [`Error::Connection`] if the provider cannot be reached
    /// - [`Error::Timeout`] if the deadline elapses
    pub async fn exchange_code(&self, code: &str) -> Result<Token> {
        validate_authorization_code(code)?;

        let result = tokio::time::timeout(self.timeout, async {
            let client = self.client.write().await;
            client.exchange_code(code).await
        })
        .await;

        let token = self.settle(AuthErrorCode::CodeExchangeFailed, result)?;
        info!(
            provider = %self.provider,
            expiry = %token.expiry,
            has_refresh_token = token.can_refresh(),
            "Authorization code exchanged"
        );
        Ok(token)
    }

    /// Obtains a fresh access token for `token`.
    ///
    /// The old refresh token (and scope) carry over when the provider does
    /// not return new ones.
    ///
    /// # Errors
    ///
    /// - [`Error::Validation`] if the token has no refresh token
    /// - [`Error::Authentication`] with `TOKEN_REFRESH_FAILED` if the
    ///   provider rejects the refresh token
    /// - [`Error::Connection`] if the provider cannot be reached
    /// - [`Error::Timeout`] if the deadline elapses
    pub async fn refresh_token(&self, token: &Token) -> Result<Token> {
        validate_refreshable(token)?;
        let refresh_token = token
            .refresh_token
            .as_deref()
            .ok_or(ValidationError::MissingRefreshToken)?;

        let result = tokio::time::timeout(self.timeout, async {
            let client = self.client.write().await;
            client.refresh_token(refresh_token).await
        })
        .await;

        let mut refreshed = self.settle(AuthErrorCode::TokenRefreshFailed, result)?;
        let rotated = refreshed.refresh_token.is_some();
        if !rotated {
            refreshed.refresh_token.clone_from(&token.refresh_token);
        }
        if refreshed.scope.is_none() {
            refreshed.scope.clone_from(&token.scope);
        }

        info!(
            provider = %self.provider,
            expiry = %refreshed.expiry,
            rotated,
            "Access token refreshed"
        );
        Ok(refreshed)
    }

    /// Returns a usable token for `identity` from the attached store.
    ///
    /// An expired token with a refresh token is refreshed and stored again
    /// before it is returned.
    ///
    /// # Errors
    ///
    /// - [`Error::NoTokenStore`] if no store is attached
    /// - [`Error::NotFound`] if nothing is stored for the identity
    /// - [`Error::Decryption`] if the stored record is corrupt
    /// - [`Error::Authentication`] with `TOKEN_EXPIRED` if the token expired
    ///   and cannot be refreshed
    /// - any error from [`refresh_token`](Self::refresh_token)
    pub async fn get_token(&self, identity: &str) -> Result<Token> {
        let store = self.store()?;
        let token = store.get_token(identity)?;

        match validate_token(&token) {
            Ok(()) => return Ok(token),
            Err(reason) => debug!(identity, reason = reason.code(), "Stored token unusable"),
        }

        if !token.can_refresh() {
            warn!(identity, "Stored token expired and has no refresh token");
            return Err(Error::Authentication {
                code: AuthErrorCode::TokenExpired,
                source: None,
            });
        }

        let refreshed = self.refresh_token(&token).await?;
        store.store_token(identity, &refreshed)?;
        Ok(refreshed)
    }

    /// Exchanges `code` and stores the resulting token under `identity`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoTokenStore`] if no store is attached (checked
    /// before any network call), or any error from
    /// [`exchange_code`](Self::exchange_code) or the store.
    pub async fn authorize(&self, identity: &str, code: &str) -> Result<Token> {
        let store = self.store()?;
        let token = self.exchange_code(code).await?;
        store.store_token(identity, &token)?;
        info!(identity, provider = %self.provider, "Identity authorized");
        Ok(token)
    }

    /// Forgets the stored token for `identity`.
    ///
    /// Nothing is sent to the provider.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoTokenStore`] if no store is attached.
    pub fn revoke_local(&self, identity: &str) -> Result<()> {
        self.store()?.delete_token(identity)
    }

    fn store(&self) -> Result<&Arc<dyn TokenStore>> {
        self.store.as_ref().ok_or(Error::NoTokenStore)
    }

    fn settle(
        &self,
        code: AuthErrorCode,
        result: std::result::Result<std::result::Result<Token, ProviderError>, Elapsed>,
    ) -> Result<Token> {
        match result {
            Ok(Ok(token)) => Ok(token),
            Ok(Err(source)) => {
                warn!(provider = %self.provider, %code, error = %source, "Token request failed");
                Err(Error::from_provider(code, source, self.timeout))
            }
            Err(_) => {
                warn!(
                    provider = %self.provider,
                    %code,
                    timeout = ?self.timeout,
                    "Token request timed out"
                );
                Err(Error::Timeout {
                    code,
                    timeout: self.timeout,
                })
            }
        }
    }
}

impl fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenManager")
            .field("provider", &self.provider)
            .field("timeout", &self.timeout)
            .field("has_store", &self.store.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;
    use crate::store::MemoryTokenStore;
    use chrono::{Duration as ChronoDuration, Utc};

    fn gmail_config() -> AuthConfig {
        AuthConfig::new(
            ProviderKind::Gmail,
            "client-id.apps.googleusercontent.com",
            "client-secret",
            "http://localhost:8080/callback",
        )
    }

    fn manager_with_store() -> (TokenManager, Arc<MemoryTokenStore>) {
        let store = Arc::new(MemoryTokenStore::new(&[9u8; 32]).unwrap());
        let manager = TokenManager::new(gmail_config())
            .unwrap()
            .with_store(store.clone());
        (manager, store)
    }

    #[test]
    fn test_new_validates_config() {
        let config = AuthConfig::new(ProviderKind::Gmail, "", "secret", "http://localhost");
        assert!(matches!(
            TokenManager::new(config),
            Err(Error::Validation(ValidationError::MissingClientId))
        ));

        let config = AuthConfig::new(ProviderKind::Office365, "id", "secret", "http://localhost");
        assert!(matches!(
            TokenManager::new(config),
            Err(Error::Validation(ValidationError::MissingTenantId))
        ));
    }

    #[test]
    fn test_generic_provider_needs_explicit_endpoint() {
        let config = AuthConfig::new(ProviderKind::Generic, "id", "secret", "http://localhost")
            .with_scopes(["mail.send"]);
        assert!(matches!(
            TokenManager::new(config.clone()),
            Err(Error::UnsupportedProvider(ProviderKind::Generic))
        ));

        let endpoint = Endpoint::new(
            "Self-hosted",
            "https://sso.example.com/authorize",
            "https://sso.example.com/token",
        )
        .unwrap();
        let manager = TokenManager::with_endpoint(config, endpoint).unwrap();
        assert_eq!(manager.provider(), ProviderKind::Generic);
    }

    #[test]
    fn test_timeout_defaults_and_overrides() {
        let manager = TokenManager::new(gmail_config()).unwrap();
        assert_eq!(manager.timeout(), Duration::from_secs(30));

        let config = gmail_config().with_timeout(Duration::from_secs(5));
        let manager = TokenManager::new(config).unwrap();
        assert_eq!(manager.timeout(), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_authorization_url_gmail() {
        let manager = TokenManager::new(gmail_config()).unwrap();
        let url = manager.authorization_url("state-123").await;

        assert!(url.as_str().starts_with("https://accounts.google.com/o/oauth2/v2/auth?"));
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        let has = |k: &str, v: &str| pairs.iter().any(|(pk, pv)| pk == k && pv == v);

        assert!(has("client_id", "client-id.apps.googleusercontent.com"));
        assert!(has("response_type", "code"));
        assert!(has("redirect_uri", "http://localhost:8080/callback"));
        assert!(has("scope", "https://mail.google.com/"));
        assert!(has("state", "state-123"));
        assert!(has("access_type", "offline"));
        assert!(has("prompt", "consent"));
    }

    #[tokio::test]
    async fn test_authorization_url_office365_adds_offline_access() {
        let config = AuthConfig::new(ProviderKind::Office365, "id", "secret", "http://localhost")
            .with_tenant_id("contoso.onmicrosoft.com")
            .with_scopes(["https://outlook.office.com/SMTP.Send"]);
        let manager = TokenManager::new(config).unwrap();
        let url = manager.authorization_url("xyz").await;

        assert_eq!(
            url.path(),
            "/contoso.onmicrosoft.com/oauth2/v2.0/authorize"
        );
        let scope = url
            .query_pairs()
            .find(|(k, _)| k == "scope")
            .map(|(_, v)| v.into_owned())
            .unwrap();
        assert_eq!(scope, "https://outlook.office.com/SMTP.Send offline_access");
    }

    #[tokio::test]
    async fn test_exchange_rejects_blank_code() {
        let manager = TokenManager::new(gmail_config()).unwrap();
        let err = manager.exchange_code("  ").await.unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(ValidationError::MissingAuthorizationCode)
        ));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_refresh_requires_refresh_token() {
        let manager = TokenManager::new(gmail_config()).unwrap();
        let token = Token::new("access", "Bearer", Utc::now() - ChronoDuration::hours(1));
        assert!(matches!(
            manager.refresh_token(&token).await,
            Err(Error::Validation(ValidationError::MissingRefreshToken))
        ));
    }

    #[tokio::test]
    async fn test_store_operations_need_store() {
        let manager = TokenManager::new(gmail_config()).unwrap();
        assert!(matches!(
            manager.get_token("alice").await,
            Err(Error::NoTokenStore)
        ));
        assert!(matches!(
            manager.authorize("alice", "code").await,
            Err(Error::NoTokenStore)
        ));
        assert!(matches!(manager.revoke_local("alice"), Err(Error::NoTokenStore)));
    }

    #[tokio::test]
    async fn test_get_token_returns_valid_stored_token() {
        let (manager, store) = manager_with_store();
        let token = Token::new("ya29.valid", "Bearer", Utc::now() + ChronoDuration::hours(1));
        store.store_token("alice", &token).unwrap();

        assert_eq!(manager.get_token("alice").await.unwrap(), token);
    }

    #[tokio::test]
    async fn test_get_token_missing_identity() {
        let (manager, _store) = manager_with_store();
        assert!(matches!(
            manager.get_token("nobody").await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_get_token_expired_without_refresh() {
        let (manager, store) = manager_with_store();
        let token = Token::new("ya29.old", "Bearer", Utc::now() - ChronoDuration::minutes(5));
        store.store_token("alice", &token).unwrap();

        let err = manager.get_token("alice").await.unwrap_err();
        assert!(matches!(
            err,
            Error::Authentication {
                code: AuthErrorCode::TokenExpired,
                source: None
            }
        ));
        assert_eq!(err.code(), Some(AuthErrorCode::TokenExpired));
    }

    #[test]
    fn test_revoke_local_is_idempotent() {
        let (manager, store) = manager_with_store();
        let token = Token::new("a", "Bearer", Utc::now() + ChronoDuration::hours(1));
        store.store_token("alice", &token).unwrap();

        manager.revoke_local("alice").unwrap();
        manager.revoke_local("alice").unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_debug_hides_secrets() {
        let manager = TokenManager::new(gmail_config()).unwrap();
        let debug = format!("{manager:?}");
        assert!(debug.contains("Gmail"));
        assert!(!debug.contains("client-secret"));
    }
}
