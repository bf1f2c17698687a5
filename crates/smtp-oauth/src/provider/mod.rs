//! `OAuth2` provider kinds and endpoint resolution.
//!
//! Endpoints are resolved through a static table keyed by [`ProviderKind`];
//! adding a provider means adding a row, not a branch.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::AuthConfig;
use crate::error::{Error, Result};
use crate::validator::ValidationError;

const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const AZURE_AD_BASE: &str = "https://login.microsoftonline.com/";

/// Supported `OAuth2` provider kinds.
///
/// Deserialization goes through [`FromStr`], so configuration files and
/// `str::parse` accept the same names and report the same error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum ProviderKind {
    /// Google / Gmail.
    Gmail,
    /// Microsoft 365 / Azure AD.
    Office365,
    /// Any other provider; needs an explicit [`Endpoint`].
    Generic,
}

impl ProviderKind {
    /// Returns the lowercase name used in configuration.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Gmail => "gmail",
            Self::Office365 => "office365",
            Self::Generic => "generic",
        }
    }

    /// Default scopes for SMTP access.
    ///
    /// - Gmail: `https://mail.google.com/`
    /// - Office365: `https://outlook.office.com/SMTP.Send`, `offline_access`
    #[must_use]
    pub fn default_scopes(self) -> Vec<String> {
        let scopes: &[&str] = match self {
            Self::Gmail => &["https://mail.google.com/"],
            Self::Office365 => &["https://outlook.office.com/SMTP.Send", "offline_access"],
            Self::Generic => &[],
        };
        scopes.iter().map(ToString::to_string).collect()
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for ProviderKind {
    type Error = ValidationError;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

impl FromStr for ProviderKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gmail" => Ok(Self::Gmail),
            "office365" => Ok(Self::Office365),
            "generic" => Ok(Self::Generic),
            _ => Err(ValidationError::InvalidProvider(s.to_string())),
        }
    }
}

/// Resolved `OAuth2` endpoint pair plus provider-specific request details.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Display name (e.g., "Google").
    pub name: String,
    /// Authorization endpoint URL.
    pub auth_url: Url,
    /// Token endpoint URL.
    pub token_url: Url,
    /// Extra query parameters for the authorization URL.
    pub auth_params: Vec<(String, String)>,
    /// Scopes appended to the authorization request when missing.
    pub required_scopes: Vec<String>,
}

impl Endpoint {
    /// Creates an endpoint from explicit URLs.
    ///
    /// Every endpoint asks for offline access so a refresh token is issued.
    ///
    /// # Errors
    ///
    /// Returns an error if URLs are invalid.
    pub fn new(
        name: impl Into<String>,
        auth_url: impl AsRef<str>,
        token_url: impl AsRef<str>,
    ) -> Result<Self> {
        Ok(Self {
            name: name.into(),
            auth_url: Url::parse(auth_url.as_ref())?,
            token_url: Url::parse(token_url.as_ref())?,
            auth_params: vec![("access_type".to_string(), "offline".to_string())],
            required_scopes: Vec::new(),
        })
    }

    /// Adds an authorization URL parameter.
    #[must_use]
    pub fn with_auth_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.auth_params.push((key.into(), value.into()));
        self
    }

    /// Adds a scope that every authorization request must include.
    #[must_use]
    pub fn with_required_scope(mut self, scope: impl Into<String>) -> Self {
        self.required_scopes.push(scope.into());
        self
    }

    /// Google `OAuth2` endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if URL parsing fails.
    pub fn google() -> Result<Self> {
        Ok(Self::new("Google", GOOGLE_AUTH_URL, GOOGLE_TOKEN_URL)?.with_auth_param("prompt", "consent"))
    }

    /// Azure AD v2 endpoint for a tenant.
    ///
    /// Azure only issues refresh tokens for the `offline_access` scope, so
    /// it is always requested.
    ///
    /// # Errors
    ///
    /// Returns an error if the tenant is blank or the URL cannot be built.
    pub fn azure_ad(tenant_id: &str) -> Result<Self> {
        let tenant_id = tenant_id.trim();
        if tenant_id.is_empty() {
            return Err(ValidationError::MissingTenantId.into());
        }

        let auth_url = azure_ad_url(tenant_id, "authorize")?;
        let token_url = azure_ad_url(tenant_id, "token")?;

        Ok(Self::new("Microsoft", auth_url, token_url)?
            .with_auth_param("prompt", "consent")
            .with_required_scope("offline_access"))
    }
}

fn azure_ad_url(tenant_id: &str, action: &str) -> Result<Url> {
    let mut url = Url::parse(AZURE_AD_BASE)?;
    url.path_segments_mut()
        .map_err(|()| Error::InvalidConfig("Azure AD base URL cannot hold a path".into()))?
        .pop_if_empty()
        .extend([tenant_id, "oauth2", "v2.0", action]);
    Ok(url)
}

type EndpointResolver = fn(&AuthConfig) -> Result<Endpoint>;

const ENDPOINT_RESOLVERS: &[(ProviderKind, EndpointResolver)] = &[
    (ProviderKind::Gmail, |_| Endpoint::google()),
    (ProviderKind::Office365, |cfg| {
        Endpoint::azure_ad(cfg.tenant_id.as_deref().unwrap_or_default())
    }),
];

/// Resolves the endpoint for the configured provider.
///
/// # Errors
///
/// Returns [`Error::UnsupportedProvider`] if the provider has no entry in
/// the endpoint table.
pub fn resolve_endpoint(config: &AuthConfig) -> Result<Endpoint> {
    let (_, resolve) = ENDPOINT_RESOLVERS
        .iter()
        .find(|(kind, _)| *kind == config.provider)
        .ok_or(Error::UnsupportedProvider(config.provider))?;
    resolve(config)
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

    fn config(provider: ProviderKind) -> AuthConfig {
        AuthConfig::new(provider, "client", "secret", "http://localhost:8080/callback")
            .with_scopes(["scope"])
    }

    #[test]
    fn test_gmail_resolves_to_google() {
        let endpoint = resolve_endpoint(&config(ProviderKind::Gmail)).unwrap();
        assert_eq!(endpoint, Endpoint::google().unwrap());
        assert_eq!(endpoint.auth_url.as_str(), GOOGLE_AUTH_URL);
        assert_eq!(endpoint.token_url.as_str(), GOOGLE_TOKEN_URL);
    }

    #[test]
    fn test_gmail_ignores_tenant() {
        let endpoint =
            resolve_endpoint(&config(ProviderKind::Gmail).with_tenant_id("contoso")).unwrap();
        assert_eq!(endpoint.token_url.as_str(), GOOGLE_TOKEN_URL);
    }

    #[test]
    fn test_office365_uses_tenant() {
        let endpoint =
            resolve_endpoint(&config(ProviderKind::Office365).with_tenant_id("contoso.onmicrosoft.com"))
                .unwrap();
        assert_eq!(
            endpoint.auth_url.as_str(),
            "https://login.microsoftonline.com/contoso.onmicrosoft.com/oauth2/v2.0/authorize"
        );
        assert_eq!(
            endpoint.token_url.as_str(),
            "https://login.microsoftonline.com/contoso.onmicrosoft.com/oauth2/v2.0/token"
        );
        assert_eq!(endpoint.required_scopes, vec!["offline_access".to_string()]);
    }

    #[test]
    fn test_office365_without_tenant_fails() {
        let err = resolve_endpoint(&config(ProviderKind::Office365)).unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(ValidationError::MissingTenantId)
        ));
    }

    #[test]
    fn test_generic_is_unsupported() {
        let err = resolve_endpoint(&config(ProviderKind::Generic)).unwrap_err();
        assert!(matches!(
            err,
            Error::UnsupportedProvider(ProviderKind::Generic)
        ));
    }

    #[test]
    fn test_provider_kind_parsing() {
        assert_eq!("gmail".parse::<ProviderKind>().unwrap(), ProviderKind::Gmail);
        assert_eq!(" Office365 ".parse::<ProviderKind>().unwrap(), ProviderKind::Office365);
        assert_eq!(
            "yahoo".parse::<ProviderKind>().unwrap_err(),
            ValidationError::InvalidProvider("yahoo".to_string())
        );
    }

    #[test]
    fn test_provider_kind_deserialize_matches_parse() {
        let kind: ProviderKind = serde_json::from_str(r#""Office365""#).unwrap();
        assert_eq!(kind, ProviderKind::Office365);
        assert_eq!(serde_json::to_string(&kind).unwrap(), r#""office365""#);

        let err = serde_json::from_str::<ProviderKind>(r#""yahoo""#).unwrap_err();
        let expected = "yahoo".parse::<ProviderKind>().unwrap_err();
        assert!(err.to_string().contains(&expected.to_string()));
    }

    #[test]
    fn test_default_scopes() {
        assert_eq!(
            ProviderKind::Gmail.default_scopes(),
            vec!["https://mail.google.com/".to_string()]
        );
        assert_eq!(ProviderKind::Office365.default_scopes().len(), 2);
        assert!(ProviderKind::Generic.default_scopes().is_empty());
    }

    #[test]
    fn test_endpoints_request_offline_access() {
        for endpoint in [Endpoint::google().unwrap(), Endpoint::azure_ad("t").unwrap()] {
            assert!(endpoint
                .auth_params
                .contains(&("access_type".to_string(), "offline".to_string())));
        }
    }
}
