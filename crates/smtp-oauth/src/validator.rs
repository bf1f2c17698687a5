//! Configuration and token validation.
//!
//! Pure checks that run before any network call. A validation failure is
//! final for the call that triggered it.

use chrono::{DateTime, Duration, Utc};
use url::Url;

use crate::config::AuthConfig;
use crate::provider::ProviderKind;
use crate::token::Token;

/// Tokens expiring within this margin are treated as already expired.
pub const EXPIRY_MARGIN_SECS: i64 = 60;

/// Validation error for configuration, tokens and request inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Provider name is not gmail, office365 or generic.
    InvalidProvider(String),
    /// Client ID is empty.
    MissingClientId,
    /// Client secret is empty.
    MissingClientSecret,
    /// Redirect URL is empty.
    MissingRedirectUrl,
    /// Redirect URL does not parse.
    InvalidRedirectUrl(String),
    /// No scopes requested.
    MissingScopes,
    /// A scope is blank.
    InvalidScope,
    /// Office365 requires a tenant.
    MissingTenantId,
    /// Access token is empty.
    MissingAccessToken,
    /// Token is expired or expires within the margin.
    TokenExpired,
    /// Refresh requested for a token without a refresh token.
    MissingRefreshToken,
    /// Authorization code is empty.
    MissingAuthorizationCode,
}

impl ValidationError {
    /// Get human-readable error message.
    #[must_use]
    pub const fn message(&self) -> &'static str {
        match self {
            Self::InvalidProvider(_) => "Provider must be gmail, office365 or generic",
            Self::MissingClientId => "Client ID is required",
            Self::MissingClientSecret => "Client secret is required",
            Self::MissingRedirectUrl => "Redirect URL is required",
            Self::InvalidRedirectUrl(_) => "Redirect URL is not a valid URL",
            Self::MissingScopes => "At least one scope is required",
            Self::InvalidScope => "Scopes must not be blank",
            Self::MissingTenantId => "Tenant ID is required for Office365",
            Self::MissingAccessToken => "Access token is required",
            Self::TokenExpired => "Token is expired or expires within a minute",
            Self::MissingRefreshToken => "Token has no refresh token",
            Self::MissingAuthorizationCode => "Authorization code is required",
        }
    }

    /// Get the field name this error relates to.
    #[must_use]
    pub const fn field(&self) -> &'static str {
        match self {
            Self::InvalidProvider(_) => "provider",
            Self::MissingClientId => "client_id",
            Self::MissingClientSecret => "client_secret",
            Self::MissingRedirectUrl | Self::InvalidRedirectUrl(_) => "redirect_url",
            Self::MissingScopes | Self::InvalidScope => "scopes",
            Self::MissingTenantId => "tenant_id",
            Self::MissingAccessToken => "access_token",
            Self::TokenExpired => "expiry",
            Self::MissingRefreshToken => "refresh_token",
            Self::MissingAuthorizationCode => "code",
        }
    }

    /// Get the stable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidProvider(_) => "INVALID_PROVIDER",
            Self::MissingClientId => "MISSING_CLIENT_ID",
            Self::MissingClientSecret => "MISSING_CLIENT_SECRET",
            Self::MissingRedirectUrl => "MISSING_REDIRECT_URL",
            Self::InvalidRedirectUrl(_) => "INVALID_REDIRECT_URL",
            Self::MissingScopes => "MISSING_SCOPES",
            Self::InvalidScope => "INVALID_SCOPE",
            Self::MissingTenantId => "MISSING_TENANT_ID",
            Self::MissingAccessToken => "MISSING_ACCESS_TOKEN",
            Self::TokenExpired => "TOKEN_EXPIRED",
            Self::MissingRefreshToken => "MISSING_REFRESH_TOKEN",
            Self::MissingAuthorizationCode => "MISSING_AUTHORIZATION_CODE",
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidProvider(name) => write!(f, "{}: {name}", self.message()),
            Self::InvalidRedirectUrl(reason) => write!(f, "{}: {reason}", self.message()),
            _ => write!(f, "{}", self.message()),
        }
    }
}

impl std::error::Error for ValidationError {}

/// Validate an `OAuth2` client configuration.
///
/// Checks provider, client credentials, redirect URL, scopes and (for
/// Office365) the tenant, in that order.
///
/// # Errors
///
/// Returns the first `ValidationError` found.
pub fn validate_config(config: &AuthConfig) -> Result<(), ValidationError> {
    // The enum already restricts the provider to known kinds.
    let provider = config.provider;

    if config.client_id.trim().is_empty() {
        return Err(ValidationError::MissingClientId);
    }
    if config.client_secret.trim().is_empty() {
        return Err(ValidationError::MissingClientSecret);
    }

    validate_redirect_url(&config.redirect_url)?;
    validate_scopes(&config.scopes)?;

    if provider == ProviderKind::Office365
        && config
            .tenant_id
            .as_deref()
            .is_none_or(|tenant| tenant.trim().is_empty())
    {
        return Err(ValidationError::MissingTenantId);
    }

    Ok(())
}

fn validate_redirect_url(redirect_url: &str) -> Result<(), ValidationError> {
    if redirect_url.trim().is_empty() {
        return Err(ValidationError::MissingRedirectUrl);
    }
    Url::parse(redirect_url)
        .map(drop)
        .map_err(|e| ValidationError::InvalidRedirectUrl(e.to_string()))
}

fn validate_scopes(scopes: &[String]) -> Result<(), ValidationError> {
    if scopes.is_empty() {
        return Err(ValidationError::MissingScopes);
    }
    if scopes.iter().any(|scope| scope.trim().is_empty()) {
        return Err(ValidationError::InvalidScope);
    }
    Ok(())
}

/// Validate that a token can be used right now.
///
/// # Errors
///
/// Returns an error if the access token is blank or the token expires
/// within [`EXPIRY_MARGIN_SECS`].
pub fn validate_token(token: &Token) -> Result<(), ValidationError> {
    validate_token_at(token, Utc::now())
}

/// Validate a token against an explicit clock reading.
///
/// # Errors
///
/// Returns an error if the access token is blank or `expiry <= now + 60s`.
pub fn validate_token_at(token: &Token, now: DateTime<Utc>) -> Result<(), ValidationError> {
    if token.access_token.trim().is_empty() {
        return Err(ValidationError::MissingAccessToken);
    }
    if token.expiry <= now + Duration::seconds(EXPIRY_MARGIN_SECS) {
        return Err(ValidationError::TokenExpired);
    }
    Ok(())
}

/// Validate that a token carries a refresh token.
///
/// Expiry is not checked: refreshing is how expired tokens are renewed.
///
/// # Errors
///
/// Returns an error if the refresh token is missing or blank.
pub fn validate_refreshable(token: &Token) -> Result<(), ValidationError> {
    match token.refresh_token.as_deref() {
        Some(refresh) if !refresh.trim().is_empty() => Ok(()),
        _ => Err(ValidationError::MissingRefreshToken),
    }
}

/// Validate an authorization code before exchanging it.
///
/// # Errors
///
/// Returns an error if the code is blank.
pub fn validate_authorization_code(code: &str) -> Result<(), ValidationError> {
    if code.trim().is_empty() {
        return Err(ValidationError::MissingAuthorizationCode);
    }
    Ok(())
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
    use proptest::prelude::*;

    fn gmail_config() -> AuthConfig {
        AuthConfig::new(
            ProviderKind::Gmail,
            "client-id",
            "client-secret",
            "http://localhost:8080/callback",
        )
    }

    fn office_config() -> AuthConfig {
        AuthConfig::new(
            ProviderKind::Office365,
            "client-id",
            "client-secret",
            "http://localhost:8080/callback",
        )
    }

    #[test]
    fn test_valid_gmail_config_needs_no_tenant() {
        assert!(validate_config(&gmail_config()).is_ok());
    }

    #[test]
    fn test_office365_requires_tenant() {
        assert_eq!(
            validate_config(&office_config()),
            Err(ValidationError::MissingTenantId)
        );
        assert_eq!(
            validate_config(&office_config().with_tenant_id("   ")),
            Err(ValidationError::MissingTenantId)
        );
        assert!(validate_config(&office_config().with_tenant_id("contoso")).is_ok());
    }

    #[test]
    fn test_blank_credentials() {
        let mut config = gmail_config();
        config.client_id = "  ".to_string();
        assert_eq!(
            validate_config(&config),
            Err(ValidationError::MissingClientId)
        );

        let mut config = gmail_config();
        config.client_secret = "\t".to_string();
        assert_eq!(
            validate_config(&config),
            Err(ValidationError::MissingClientSecret)
        );
    }

    #[test]
    fn test_redirect_url() {
        let mut config = gmail_config();
        config.redirect_url = String::new();
        assert_eq!(
            validate_config(&config),
            Err(ValidationError::MissingRedirectUrl)
        );

        config.redirect_url = "not a url".to_string();
        let err = validate_config(&config).unwrap_err();
        assert_eq!(err.code(), "INVALID_REDIRECT_URL");
        assert_eq!(err.field(), "redirect_url");
    }

    #[test]
    fn test_scopes() {
        let config = gmail_config().with_scopes(Vec::<String>::new());
        assert_eq!(validate_config(&config), Err(ValidationError::MissingScopes));

        let config = gmail_config().with_scopes(["https://mail.google.com/", " "]);
        assert_eq!(validate_config(&config), Err(ValidationError::InvalidScope));
    }

    #[test]
    fn test_first_error_wins() {
        let mut config = office_config().with_scopes(Vec::<String>::new());
        config.client_id = String::new();
        assert_eq!(
            validate_config(&config),
            Err(ValidationError::MissingClientId)
        );
    }

    #[test]
    fn test_token_validation() {
        let now = Utc::now();
        let token = Token::new("access", "Bearer", now + Duration::hours(1));
        assert!(validate_token_at(&token, now).is_ok());

        let blank = Token::new("  ", "Bearer", now + Duration::hours(1));
        assert_eq!(
            validate_token_at(&blank, now),
            Err(ValidationError::MissingAccessToken)
        );

        let boundary = Token::new("access", "Bearer", now + Duration::seconds(60));
        assert_eq!(
            validate_token_at(&boundary, now),
            Err(ValidationError::TokenExpired)
        );

        let just_after = Token::new("access", "Bearer", now + Duration::seconds(61));
        assert!(validate_token_at(&just_after, now).is_ok());
    }

    #[test]
    fn test_refreshable() {
        let expiry = Utc::now() - Duration::hours(1);
        let token = Token::new("access", "Bearer", expiry);
        assert_eq!(
            validate_refreshable(&token),
            Err(ValidationError::MissingRefreshToken)
        );

        let token = token.with_refresh_token(" ");
        assert_eq!(
            validate_refreshable(&token),
            Err(ValidationError::MissingRefreshToken)
        );

        let token = token.with_refresh_token("refresh");
        assert!(validate_refreshable(&token).is_ok());
    }

    #[test]
    fn test_authorization_code() {
        assert_eq!(
            validate_authorization_code(""),
            Err(ValidationError::MissingAuthorizationCode)
        );
        assert!(validate_authorization_code("4/0Ab").is_ok());
    }

    #[test]
    fn test_display_includes_detail() {
        let err = ValidationError::InvalidProvider("yahoo".to_string());
        assert_eq!(
            err.to_string(),
            "Provider must be gmail, office365 or generic: yahoo"
        );
    }

    proptest! {
        #[test]
        fn prop_expired_within_margin(offset in -86_400i64..=EXPIRY_MARGIN_SECS) {
            let now = Utc::now();
            let token = Token::new("access", "Bearer", now + Duration::seconds(offset));
            prop_assert_eq!(validate_token_at(&token, now), Err(ValidationError::TokenExpired));
        }

        #[test]
        fn prop_valid_beyond_margin(offset in (EXPIRY_MARGIN_SECS + 1)..86_400i64) {
            let now = Utc::now();
            let token = Token::new("access", "Bearer", now + Duration::seconds(offset));
            prop_assert!(validate_token_at(&token, now).is_ok());
        }

        #[test]
        fn prop_gmail_valid_for_any_tenant(tenant in proptest::option::of("[a-z0-9. ]{0,16}")) {
            let mut config = gmail_config();
            config.tenant_id = tenant;
            prop_assert!(validate_config(&config).is_ok());
        }
    }
}
