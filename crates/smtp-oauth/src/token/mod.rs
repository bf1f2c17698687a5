//! `OAuth2` token types.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::validator::EXPIRY_MARGIN_SECS;

/// `OAuth2` access token with metadata.
///
/// `Debug` output never shows the access or refresh token.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    /// Access token string.
    pub access_token: String,
    /// Token type (usually "Bearer").
    pub token_type: String,
    /// Absolute expiration time.
    pub expiry: DateTime<Utc>,
    /// Refresh token for obtaining new access tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Scope granted by authorization server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl Token {
    /// Creates a new token.
    #[must_use]
    pub fn new(
        access_token: impl Into<String>,
        token_type: impl Into<String>,
        expiry: DateTime<Utc>,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            token_type: token_type.into(),
            expiry,
            refresh_token: None,
            scope: None,
        }
    }

    /// Creates a token from a token endpoint response received at `now`.
    ///
    /// # Errors
    ///
    /// Returns an error if the response has no access token, no lifetime, or
    /// a lifetime that does not fit in a timestamp.
    pub fn from_response(response: TokenResponse, now: DateTime<Utc>) -> Result<Self, ProviderError> {
        if response.access_token.trim().is_empty() {
            return Err(ProviderError::InvalidResponse(
                "missing access_token".into(),
            ));
        }
        let expires_in = response
            .expires_in
            .ok_or_else(|| ProviderError::InvalidResponse("missing expires_in".into()))?;
        let expiry = i64::try_from(expires_in)
            .ok()
            .and_then(Duration::try_seconds)
            .and_then(|lifetime| now.checked_add_signed(lifetime))
            .ok_or_else(|| ProviderError::InvalidResponse("expires_in out of range".into()))?;

        Ok(Self {
            access_token: response.access_token,
            token_type: response.token_type,
            expiry,
            refresh_token: response.refresh_token.filter(|r| !r.is_empty()),
            scope: response.scope,
        })
    }

    /// Checks if the token is expired at `now` (with 60 second margin).
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now + Duration::seconds(EXPIRY_MARGIN_SECS) >= self.expiry
    }

    /// Checks if the token is expired (with 60 second margin).
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Returns true if the token has a non-blank refresh token.
    #[must_use]
    pub fn can_refresh(&self) -> bool {
        self.refresh_token
            .as_deref()
            .is_some_and(|refresh| !refresh.trim().is_empty())
    }

    /// Sets the refresh token.
    #[must_use]
    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }

    /// Sets the scope.
    #[must_use]
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("access_token", &"[redacted]")
            .field("token_type", &self.token_type)
            .field("expiry", &self.expiry)
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[redacted]"),
            )
            .field("scope", &self.scope)
            .finish()
    }
}

/// Token response from `OAuth2` server.
#[derive(Clone, Deserialize, Serialize)]
pub struct TokenResponse {
    /// Access token.
    pub access_token: String,
    /// Token type.
    #[serde(default = "default_token_type")]
    pub token_type: String,
    /// Expires in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
    /// Refresh token.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Scope.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

/// Error response from `OAuth2` server.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorResponse {
    /// Error code.
    pub error: String,
    /// Error description.
    #[serde(default)]
    pub error_description: String,
}

impl ErrorResponse {
    /// Converts to a provider error.
    #[must_use]
    pub fn into_error(self) -> ProviderError {
        ProviderError::oauth_error(self.error, self.error_description)
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

    fn response() -> TokenResponse {
        TokenResponse {
            access_token: "test_token".to_string(),
            token_type: "Bearer".to_string(),
            expires_in: Some(3600),
            refresh_token: Some("refresh".to_string()),
            scope: Some("https://mail.google.com/".to_string()),
        }
    }

    #[test]
    fn test_token_creation() {
        let expiry = Utc::now() + Duration::hours(1);
        let token = Token::new("access123", "Bearer", expiry);
        assert_eq!(token.access_token, "access123");
        assert_eq!(token.token_type, "Bearer");
        assert_eq!(token.expiry, expiry);
        assert!(token.refresh_token.is_none());
        assert!(!token.can_refresh());
    }

    #[test]
    fn test_token_expiration() {
        let now = Utc::now();
        let expired = Token::new("access123", "Bearer", now - Duration::seconds(120));
        assert!(expired.is_expired_at(now));

        let soon = Token::new("access123", "Bearer", now + Duration::seconds(30));
        assert!(soon.is_expired_at(now));

        let valid = Token::new("access123", "Bearer", now + Duration::seconds(3600));
        assert!(!valid.is_expired_at(now));
        assert!(!valid.is_expired());
    }

    #[test]
    fn test_token_from_response() {
        let now = Utc::now();
        let token = Token::from_response(response(), now).unwrap();
        assert_eq!(token.access_token, "test_token");
        assert_eq!(token.expiry, now + Duration::seconds(3600));
        assert!(token.can_refresh());
    }

    #[test]
    fn test_response_without_lifetime_is_invalid() {
        let mut response = response();
        response.expires_in = None;
        assert!(matches!(
            Token::from_response(response, Utc::now()),
            Err(ProviderError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_response_with_huge_lifetime_is_invalid() {
        for expires_in in [
            u64::MAX,
            9_223_372_036_854_775_807,
            9_223_372_036_854_775,
            1 << 45,
        ] {
            let mut response = response();
            response.expires_in = Some(expires_in);
            assert!(matches!(
                Token::from_response(response, Utc::now()),
                Err(ProviderError::InvalidResponse(_))
            ));
        }
    }

    #[test]
    fn test_response_token_type_defaults_to_bearer() {
        let json = r#"{"access_token":"abc","expires_in":3599}"#;
        let response: TokenResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.token_type, "Bearer");
        assert!(response.refresh_token.is_none());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let token = Token::new("ya29.secret-access", "Bearer", Utc::now())
            .with_refresh_token("1//secret-refresh");
        let debug = format!("{token:?}");
        assert!(!debug.contains("secret-access"));
        assert!(!debug.contains("secret-refresh"));
        assert!(debug.contains("Bearer"));
    }

    #[test]
    fn test_serde_keeps_exact_expiry() {
        let token = Token::new("a", "Bearer", Utc::now()).with_refresh_token("r");
        let json = serde_json::to_vec(&token).unwrap();
        let back: Token = serde_json::from_slice(&json).unwrap();
        assert_eq!(back, token);
    }
}
