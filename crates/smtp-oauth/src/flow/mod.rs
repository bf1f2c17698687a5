//! `OAuth2` authorization code grant and refresh grant.

mod code;

pub use code::generate_state;

use std::fmt;

use chrono::Utc;
use reqwest::Client;

use crate::error::ProviderError;
use crate::provider::Endpoint;
use crate::token::{ErrorResponse, Token, TokenResponse};

/// `OAuth2` client bound to one provider endpoint.
#[derive(Clone)]
pub struct OAuthClient {
    /// Client ID from provider.
    pub client_id: String,
    /// Client secret.
    client_secret: String,
    /// Redirect URI registered with the provider.
    pub redirect_uri: String,
    /// Scopes requested during authorization.
    pub scopes: Vec<String>,
    /// Resolved provider endpoint.
    pub endpoint: Endpoint,
    /// HTTP client.
    http_client: Client,
}

impl OAuthClient {
    /// Creates a new OAuth client.
    #[must_use]
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        redirect_uri: impl Into<String>,
        endpoint: Endpoint,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            redirect_uri: redirect_uri.into(),
            scopes: Vec::new(),
            endpoint,
            http_client: Client::new(),
        }
    }

    /// Sets the requested scopes.
    #[must_use]
    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }

    /// Exchanges an authorization code for tokens.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the provider rejects the code.
    pub async fn exchange_code(&self, code: &str) -> Result<Token, ProviderError> {
        self.request_token(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.redirect_uri.as_str()),
        ])
        .await
    }

    /// Obtains a new access token using a refresh token.
    ///
    /// The returned token carries a refresh token only if the provider
    /// rotated it.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the provider rejects the
    /// refresh token.
    pub async fn refresh_token(&self, refresh_token: &str) -> Result<Token, ProviderError> {
        self.request_token(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ])
        .await
    }

    async fn request_token(&self, grant: &[(&str, &str)]) -> Result<Token, ProviderError> {
        let mut params: Vec<(&str, &str)> = grant.to_vec();
        params.push(("client_id", self.client_id.as_str()));
        params.push(("client_secret", self.client_secret.as_str()));

        let response = self
            .http_client
            .post(self.endpoint.token_url.clone())
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&params)
            .send()
            .await?;

        let status = response.status();
        let body = response.bytes().await?;

        if !status.is_success() {
            return Err(serde_json::from_slice::<ErrorResponse>(&body)
                .map_or(ProviderError::Status(status.as_u16()), ErrorResponse::into_error));
        }

        let token_response: TokenResponse = serde_json::from_slice(&body)
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
        Token::from_response(token_response, Utc::now())
    }
}

impl fmt::Debug for OAuthClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthClient")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[redacted]")
            .field("redirect_uri", &self.redirect_uri)
            .field("scopes", &self.scopes)
            .field("endpoint", &self.endpoint.name)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_oauth_client_creation() {
        let endpoint = Endpoint::google().unwrap();
        let client = OAuthClient::new("test_client_id", "secret", "http://localhost:8080", endpoint)
            .with_scopes(vec!["https://mail.google.com/".to_string()]);
        assert_eq!(client.client_id, "test_client_id");
        assert_eq!(client.redirect_uri, "http://localhost:8080");
        assert_eq!(client.scopes.len(), 1);
    }

    #[test]
    fn test_debug_redacts_client_secret() {
        let endpoint = Endpoint::google().unwrap();
        let client = OAuthClient::new("id", "s3cr3t", "http://localhost", endpoint);
        let debug = format!("{client:?}");
        assert!(debug.contains("client_id"));
        assert!(!debug.contains("s3cr3t"));
    }
}
