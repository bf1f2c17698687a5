//! Configuration for the token manager and the token store.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::error::{Error, Result};
use crate::provider::ProviderKind;

/// Timeout applied to network calls when none is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default interval between store sweeps.
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Default age after which stored records are swept.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

/// `OAuth2` client configuration for one provider.
///
/// Built once at startup; the [`TokenManager`](crate::TokenManager) keeps
/// its own copy.
#[derive(Clone, Deserialize)]
pub struct AuthConfig {
    /// Provider kind.
    pub provider: ProviderKind,
    /// Client ID from the provider.
    pub client_id: String,
    /// Client secret.
    pub client_secret: String,
    /// Redirect URL registered with the provider.
    pub redirect_url: String,
    /// Requested scopes, in order.
    #[serde(default)]
    pub scopes: Vec<String>,
    /// Azure AD tenant (Office365 only).
    #[serde(default)]
    pub tenant_id: Option<String>,
    /// Network timeout for exchange and refresh.
    #[serde(default, rename = "timeout_secs", deserialize_with = "deserialize_secs")]
    pub timeout: Option<Duration>,
}

impl AuthConfig {
    /// Creates a configuration with the provider's default scopes.
    #[must_use]
    pub fn new(
        provider: ProviderKind,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        redirect_url: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            redirect_url: redirect_url.into(),
            scopes: provider.default_scopes(),
            tenant_id: None,
            timeout: None,
        }
    }

    /// Replaces the requested scopes.
    #[must_use]
    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the Azure AD tenant.
    #[must_use]
    pub fn with_tenant_id(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    /// Sets the network timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Returns the configured timeout, or [`DEFAULT_TIMEOUT`] if unset or zero.
    #[must_use]
    pub fn effective_timeout(&self) -> Duration {
        self.timeout
            .filter(|timeout| !timeout.is_zero())
            .unwrap_or(DEFAULT_TIMEOUT)
    }

    /// Loads the configuration for `provider` from environment variables.
    ///
    /// Reads `<PREFIX>_CLIENT_ID`, `<PREFIX>_CLIENT_SECRET`,
    /// `<PREFIX>_REDIRECT_URL`, `<PREFIX>_SCOPES` (comma or space separated),
    /// `<PREFIX>_TENANT_ID` and `<PREFIX>_TIMEOUT_SECS`, where the prefix is
    /// `GMAIL`, `OFFICE365` or `GENERIC`. Missing values are left empty for
    /// the validator to report.
    ///
    /// # Errors
    ///
    /// Returns an error if `<PREFIX>_TIMEOUT_SECS` is not a number.
    pub fn from_env(provider: ProviderKind) -> Result<Self> {
        Self::from_lookup(provider, |name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a custom variable lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if the timeout value is not a number.
    pub fn from_lookup<F>(provider: ProviderKind, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let prefix = provider.as_str().to_ascii_uppercase();
        let var = |suffix: &str| lookup(&format!("{prefix}_{suffix}"));

        let mut config = Self::new(
            provider,
            var("CLIENT_ID").unwrap_or_default(),
            var("CLIENT_SECRET").unwrap_or_default(),
            var("REDIRECT_URL").unwrap_or_default(),
        );

        if let Some(scopes) = var("SCOPES") {
            config.scopes = scopes
                .split(|c: char| c == ',' || c.is_whitespace())
                .filter(|scope| !scope.is_empty())
                .map(ToString::to_string)
                .collect();
        }

        config.tenant_id = var("TENANT_ID");

        if let Some(secs) = var("TIMEOUT_SECS") {
            let secs = secs.trim().parse::<u64>().map_err(|e| {
                Error::InvalidConfig(format!("{prefix}_TIMEOUT_SECS is not a number: {e}"))
            })?;
            config.timeout = Some(Duration::from_secs(secs));
        }

        Ok(config)
    }
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("provider", &self.provider)
            .field("client_id", &self.client_id)
            .field("client_secret", &"[redacted]")
            .field("redirect_url", &self.redirect_url)
            .field("scopes", &self.scopes)
            .field("tenant_id", &self.tenant_id)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Token store tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct StoreConfig {
    /// Interval between background sweeps.
    #[serde(
        default = "default_cleanup_interval",
        rename = "cleanup_interval_secs",
        deserialize_with = "deserialize_required_secs"
    )]
    pub cleanup_interval: Duration,
    /// Records stored longer ago than this are swept.
    #[serde(
        default = "default_retention",
        rename = "retention_secs",
        deserialize_with = "deserialize_required_secs"
    )]
    pub retention: Duration,
}

impl StoreConfig {
    /// Sets the sweep interval.
    #[must_use]
    pub const fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    /// Sets the retention window.
    #[must_use]
    pub const fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
            retention: DEFAULT_RETENTION,
        }
    }
}

const fn default_cleanup_interval() -> Duration {
    DEFAULT_CLEANUP_INTERVAL
}

const fn default_retention() -> Duration {
    DEFAULT_RETENTION
}

fn deserialize_secs<'de, D>(deserializer: D) -> std::result::Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<u64>::deserialize(deserializer).map(|secs| secs.map(Duration::from_secs))
}

fn deserialize_required_secs<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    u64::deserialize(deserializer).map(Duration::from_secs)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::validator::ValidationError;
    use std::collections::HashMap;

    #[test]
    fn test_new_uses_default_scopes() {
        let config = AuthConfig::new(ProviderKind::Gmail, "id", "secret", "http://localhost");
        assert_eq!(config.scopes, vec!["https://mail.google.com/".to_string()]);
        assert_eq!(config.effective_timeout(), DEFAULT_TIMEOUT);
    }

    #[test]
    fn test_zero_timeout_falls_back_to_default() {
        let config = AuthConfig::new(ProviderKind::Gmail, "id", "secret", "http://localhost")
            .with_timeout(Duration::ZERO);
        assert_eq!(config.effective_timeout(), DEFAULT_TIMEOUT);

        let config = config.with_timeout(Duration::from_secs(5));
        assert_eq!(config.effective_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let config = AuthConfig::new(ProviderKind::Gmail, "id", "hunter2", "http://localhost");
        let debug = format!("{config:?}");
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("[redacted]"));
    }

    #[test]
    fn test_from_lookup() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("OFFICE365_CLIENT_ID", "client"),
            ("OFFICE365_CLIENT_SECRET", "secret"),
            ("OFFICE365_REDIRECT_URL", "http://localhost:8080/callback"),
            ("OFFICE365_TENANT_ID", "contoso"),
            ("OFFICE365_SCOPES", "https://outlook.office.com/SMTP.Send, offline_access"),
            ("OFFICE365_TIMEOUT_SECS", "10"),
        ]);

        let config = AuthConfig::from_lookup(ProviderKind::Office365, |name| {
            vars.get(name).map(ToString::to_string)
        })
        .unwrap();

        assert_eq!(config.client_id, "client");
        assert_eq!(config.tenant_id.as_deref(), Some("contoso"));
        assert_eq!(
            config.scopes,
            vec![
                "https://outlook.office.com/SMTP.Send".to_string(),
                "offline_access".to_string()
            ]
        );
        assert_eq!(config.effective_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_from_lookup_bad_timeout() {
        let result = AuthConfig::from_lookup(ProviderKind::Gmail, |name| {
            (name == "GMAIL_TIMEOUT_SECS").then(|| "soon".to_string())
        });
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_deserialize_auth_config() {
        let json = r#"{
            "provider": "gmail",
            "client_id": "id",
            "client_secret": "secret",
            "redirect_url": "http://localhost:8080",
            "scopes": ["https://mail.google.com/"],
            "timeout_secs": 12
        }"#;

        let config: AuthConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.provider, ProviderKind::Gmail);
        assert_eq!(config.timeout, Some(Duration::from_secs(12)));
        assert!(config.tenant_id.is_none());
    }

    #[test]
    fn test_deserialize_unknown_provider() {
        let json = r#"{
            "provider": "yahoo",
            "client_id": "id",
            "client_secret": "secret",
            "redirect_url": "http://localhost:8080"
        }"#;

        let err = serde_json::from_str::<AuthConfig>(json).unwrap_err();
        assert!(err
            .to_string()
            .contains(&ValidationError::InvalidProvider("yahoo".to_string()).to_string()));
    }

    #[test]
    fn test_deserialize_store_config_defaults() {
        let config: StoreConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, StoreConfig::default());

        let config: StoreConfig = serde_json::from_str(r#"{"retention_secs": 60}"#).unwrap();
        assert_eq!(config.retention, Duration::from_secs(60));
        assert_eq!(config.cleanup_interval, DEFAULT_CLEANUP_INTERVAL);
    }
}
