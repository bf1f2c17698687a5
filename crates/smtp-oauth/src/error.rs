//! Error types for `OAuth2` credential operations.

use std::fmt;
use std::time::Duration;

use crate::provider::ProviderKind;
use crate::validator::ValidationError;

/// Result type alias for `OAuth2` credential operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Operation-level code attached to authentication, connection and timeout
/// failures so callers can tell which step failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthErrorCode {
    /// Exchanging an authorization code for a token failed.
    CodeExchangeFailed,
    /// Refreshing an access token failed.
    TokenRefreshFailed,
    /// A stored token expired and cannot be refreshed.
    TokenExpired,
}

impl AuthErrorCode {
    /// Returns the stable string form of the code.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CodeExchangeFailed => "CODE_EXCHANGE_FAILED",
            Self::TokenRefreshFailed => "TOKEN_REFRESH_FAILED",
            Self::TokenExpired => "TOKEN_EXPIRED",
        }
    }
}

impl fmt::Display for AuthErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Upstream failure reported while talking to a provider's token endpoint.
///
/// Messages carry the provider's error code and description, never the
/// request parameters, so no secret reaches a log line through this type.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// `OAuth2` error response from the token endpoint.
    #[error("OAuth2 error: {error} - {description}")]
    OAuth {
        /// Error code (e.g., `invalid_grant`).
        error: String,
        /// Human-readable description.
        description: String,
    },

    /// Non-success status without a parseable `OAuth2` error body.
    #[error("token endpoint returned HTTP {0}")]
    Status(u16),

    /// Success status but the body is not a usable token response.
    #[error("Invalid token response: {0}")]
    InvalidResponse(String),

    /// Transport-level failure.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl ProviderError {
    /// Creates an `OAuth2` error from error code and description.
    #[must_use]
    pub fn oauth_error(error: impl Into<String>, description: impl Into<String>) -> Self {
        Self::OAuth {
            error: error.into(),
            description: description.into(),
        }
    }

    /// Returns true if the failure happened before the provider could answer.
    #[must_use]
    pub fn is_transport(&self) -> bool {
        match self {
            Self::Http(e) => e.is_connect() || e.is_request() || e.is_body(),
            _ => false,
        }
    }

    /// Returns true if the HTTP client gave up waiting.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Http(e) if e.is_timeout())
    }
}

/// `OAuth2` credential error types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Configuration or token failed validation. Raised before any network
    /// call; retrying will not help.
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// No endpoint is known for the provider.
    #[error("Unsupported OAuth2 provider: {0}")]
    UnsupportedProvider(ProviderKind),

    /// Provider rejected the exchange or refresh, or a token expired at use.
    #[error("Authentication failed [{code}]")]
    Authentication {
        /// Which operation failed.
        code: AuthErrorCode,
        /// Upstream cause, if the provider was involved.
        #[source]
        source: Option<ProviderError>,
    },

    /// The token endpoint could not be reached.
    #[error("Connection failed [{code}]")]
    Connection {
        /// Which operation failed.
        code: AuthErrorCode,
        /// Upstream cause.
        #[source]
        source: ProviderError,
    },

    /// The call did not finish within the configured timeout.
    #[error("Timed out [{code}] after {} ms", .timeout.as_millis())]
    Timeout {
        /// Which operation failed.
        code: AuthErrorCode,
        /// The deadline that elapsed.
        timeout: Duration,
    },

    /// No token is stored for the identity.
    #[error("No token stored for identity {0}")]
    NotFound(String),

    /// The stored record failed authentication (tampered, corrupt or
    /// sealed under another key).
    #[error("Stored token for identity {0} failed decryption")]
    Decryption(String),

    /// The encryption key is unusable.
    #[error("Invalid encryption key: {0}")]
    InvalidKey(String),

    /// Sealing a token failed; nothing was written.
    #[error("Token encryption failed: {0}")]
    Encryption(String),

    /// The manager has no token store attached.
    #[error("No token store configured")]
    NoTokenStore,

    /// Invalid configuration outside the validator's rules.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The SMTP server sent a challenge that is not valid XOAUTH2.
    #[error("Malformed XOAUTH2 challenge: {0}")]
    InvalidChallenge(String),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// URL parsing error.
    #[error("URL error: {0}")]
    UrlError(#[from] url::ParseError),
}

impl Error {
    /// Wraps a provider failure for `code`, separating transport problems
    /// and client-side timeouts from provider rejections.
    #[must_use]
    pub fn from_provider(code: AuthErrorCode, source: ProviderError, timeout: Duration) -> Self {
        if source.is_timeout() {
            Self::Timeout { code, timeout }
        } else if source.is_transport() {
            Self::Connection { code, source }
        } else {
            Self::Authentication {
                code,
                source: Some(source),
            }
        }
    }

    /// Returns the operation code for authentication, connection and
    /// timeout errors.
    #[must_use]
    pub const fn code(&self) -> Option<AuthErrorCode> {
        match self {
            Self::Authentication { code, .. }
            | Self::Connection { code, .. }
            | Self::Timeout { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Returns true for failures that may succeed on a later attempt.
    ///
    /// Nothing in this crate retries; the policy belongs to the caller.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Timeout { .. })
    }

    /// Returns true if the error is a validation failure.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_code_strings() {
        assert_eq!(
            AuthErrorCode::CodeExchangeFailed.to_string(),
            "CODE_EXCHANGE_FAILED"
        );
        assert_eq!(
            AuthErrorCode::TokenRefreshFailed.as_str(),
            "TOKEN_REFRESH_FAILED"
        );
    }

    #[test]
    fn test_provider_rejection_is_authentication() {
        let err = Error::from_provider(
            AuthErrorCode::CodeExchangeFailed,
            ProviderError::oauth_error("invalid_grant", "Bad code"),
            Duration::from_secs(30),
        );
        assert_eq!(err.code(), Some(AuthErrorCode::CodeExchangeFailed));
        assert!(!err.is_retryable());

        let source = err.source().unwrap();
        assert!(source.to_string().contains("invalid_grant"));
    }

    #[test]
    fn test_retryable_classification() {
        let timeout = Error::Timeout {
            code: AuthErrorCode::TokenRefreshFailed,
            timeout: Duration::from_millis(250),
        };
        assert!(timeout.is_retryable());
        assert_eq!(
            timeout.to_string(),
            "Timed out [TOKEN_REFRESH_FAILED] after 250 ms"
        );

        assert!(!Error::NotFound("user@example.com".into()).is_retryable());
        assert!(Error::Validation(ValidationError::MissingClientId).is_validation());
    }
}
