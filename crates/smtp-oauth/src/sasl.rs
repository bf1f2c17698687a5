//! SMTP `AUTH` initial responses built from `OAuth2` tokens.
//!
//! Implements:
//! - XOAUTH2 (Google/Microsoft) - what Gmail and Office365 SMTP expect
//! - OAUTHBEARER (RFC 7628) - the standardized equivalent
//!
//! Both builders check the token first, so an expired token fails here
//! instead of as a `535` from the server.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::token::Token;
use crate::validator::validate_token;

/// Generates the XOAUTH2 initial response.
///
/// Format: `user=<user>\x01auth=Bearer <token>\x01\x01` (base64 encoded)
///
/// # Errors
///
/// Returns [`Error::Validation`] if the token is blank or about to expire.
///
/// # Example
///
/// ```ignore
/// let response = smtp_oauth::sasl::xoauth2_response("user@gmail.com", &token)?;
/// // Send: AUTH XOAUTH2 {response}
/// ```
pub fn xoauth2_response(user: &str, token: &Token) -> Result<String> {
    validate_token(token)?;
    let auth_string = format!("user={user}\x01auth=Bearer {}\x01\x01", token.access_token);
    Ok(STANDARD.encode(auth_string.as_bytes()))
}

/// Generates the OAUTHBEARER initial response (RFC 7628).
///
/// Format: `n,a=<user>,\x01auth=Bearer <token>\x01\x01` (base64 encoded)
///
/// # Errors
///
/// Returns [`Error::Validation`] if the token is blank or about to expire.
pub fn oauthbearer_response(user: &str, token: &Token) -> Result<String> {
    validate_token(token)?;
    let auth_string = format!(
        "n,a={user},\x01auth=Bearer {}\x01\x01",
        token.access_token
    );
    Ok(STANDARD.encode(auth_string.as_bytes()))
}

/// Parses the base64 challenge an SMTP server sends when XOAUTH2 fails.
///
/// The decoded challenge is JSON: `{"status":"401","schemes":"bearer","scope":"..."}`.
/// The client answers it with an empty line and the server then reports
/// the final `535`.
///
/// # Errors
///
/// Returns [`Error::InvalidChallenge`] if the challenge is not base64 or
/// not the expected JSON.
pub fn parse_xoauth2_challenge(challenge: &str) -> Result<XOAuth2Challenge> {
    let decoded = STANDARD
        .decode(challenge.trim())
        .map_err(|e| Error::InvalidChallenge(format!("not base64: {e}")))?;
    serde_json::from_slice(&decoded)
        .map_err(|e| Error::InvalidChallenge(format!("not a JSON status object: {e}")))
}

/// Failure details from an XOAUTH2 challenge.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct XOAuth2Challenge {
    /// HTTP-style status (e.g., "401", "400").
    pub status: String,
    /// Authentication schemes supported.
    #[serde(default)]
    pub schemes: String,
    /// Scope the server requires.
    #[serde(default)]
    pub scope: Option<String>,
}

impl XOAuth2Challenge {
    /// Returns true if the server rejected the token itself (status 401),
    /// which a refresh may fix.
    #[must_use]
    pub fn is_invalid_token(&self) -> bool {
        self.status == "401"
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
    use crate::validator::ValidationError;
    use chrono::{Duration, Utc};

    fn token(access: &str) -> Token {
        Token::new(access, "Bearer", Utc::now() + Duration::hours(1))
    }

    fn decode(response: &str) -> String {
        String::from_utf8(STANDARD.decode(response).unwrap()).unwrap()
    }

    #[test]
    fn test_xoauth2_format() {
        let response = xoauth2_response("test@test.com", &token("abc")).unwrap();
        assert_eq!(
            decode(&response),
            "user=test@test.com\x01auth=Bearer abc\x01\x01"
        );
    }

    #[test]
    fn test_oauthbearer_format() {
        let response = oauthbearer_response("test@test.com", &token("abc")).unwrap();
        assert_eq!(
            decode(&response),
            "n,a=test@test.com,\x01auth=Bearer abc\x01\x01"
        );
    }

    #[test]
    fn test_expired_token_rejected() {
        let expired = Token::new("abc", "Bearer", Utc::now() - Duration::minutes(1));
        assert!(matches!(
            xoauth2_response("user@example.com", &expired),
            Err(Error::Validation(ValidationError::TokenExpired))
        ));

        let blank = token("");
        assert!(matches!(
            oauthbearer_response("user@example.com", &blank),
            Err(Error::Validation(ValidationError::MissingAccessToken))
        ));
    }

    #[test]
    fn test_responses_are_base64() {
        let response = xoauth2_response("user@example.com", &token("token")).unwrap();
        assert!(!response.contains("user@example.com"));
        assert!(STANDARD.decode(&response).is_ok());
    }

    #[test]
    fn test_parse_xoauth2_challenge() {
        let json = r#"{"status":"401","schemes":"bearer","scope":"https://mail.google.com/"}"#;
        let challenge = parse_xoauth2_challenge(&STANDARD.encode(json)).unwrap();

        assert_eq!(challenge.status, "401");
        assert_eq!(challenge.schemes, "bearer");
        assert_eq!(challenge.scope.as_deref(), Some("https://mail.google.com/"));
        assert!(challenge.is_invalid_token());
    }

    #[test]
    fn test_parse_xoauth2_challenge_rejects_garbage() {
        assert!(matches!(
            parse_xoauth2_challenge("%%%"),
            Err(Error::InvalidChallenge(_))
        ));
        assert!(matches!(
            parse_xoauth2_challenge(&STANDARD.encode("not json")),
            Err(Error::InvalidChallenge(_))
        ));
        assert!(matches!(
            parse_xoauth2_challenge(&STANDARD.encode(r#"{"schemes":"bearer"}"#)),
            Err(Error::InvalidChallenge(_))
        ));
    }
}
