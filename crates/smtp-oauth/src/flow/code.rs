//! Authorization URL construction for the authorization code grant.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use url::Url;

use super::OAuthClient;

/// Generates a random anti-CSRF `state` value (32 bytes, URL-safe base64).
#[must_use]
pub fn generate_state() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

impl OAuthClient {
    /// Builds the authorization URL for user consent.
    ///
    /// The URL requests offline access so the provider issues a refresh
    /// token, and carries `state` for the redirect to echo back.
    #[must_use]
    pub fn authorization_url(&self, state: &str) -> Url {
        let mut url = self.endpoint.auth_url.clone();

        let mut scopes = self.scopes.clone();
        for required in &self.endpoint.required_scopes {
            if !scopes.contains(required) {
                scopes.push(required.clone());
            }
        }

        {
            let mut pairs = url.query_pairs_mut();
            pairs
                .append_pair("client_id", &self.client_id)
                .append_pair("response_type", "code")
                .append_pair("redirect_uri", &self.redirect_uri);

            if !scopes.is_empty() {
                pairs.append_pair("scope", &scopes.join(" "));
            }

            pairs.append_pair("state", state);

            for (key, value) in &self.endpoint.auth_params {
                pairs.append_pair(key, value);
            }
        }

        url
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::provider::Endpoint;

    fn client(endpoint: Endpoint) -> OAuthClient {
        OAuthClient::new("test_client", "secret", "http://localhost:8080", endpoint)
    }

    #[test]
    fn test_authorization_url() {
        let client = client(Endpoint::google().unwrap())
            .with_scopes(vec!["https://mail.google.com/".to_string()]);
        let url = client.authorization_url("random_state");

        assert!(url.as_str().starts_with("https://accounts.google.com/o/oauth2/v2/auth?"));
        assert!(url.as_str().contains("client_id=test_client"));
        assert!(url.as_str().contains("response_type=code"));
        assert!(url.as_str().contains("state=random_state"));
        assert!(
            url.as_str()
                .contains("redirect_uri=http%3A%2F%2Flocalhost%3A8080")
        );
        assert!(url.as_str().contains("access_type=offline"));
        assert!(url.as_str().contains("prompt=consent"));
    }

    #[test]
    fn test_scopes_are_space_joined() {
        let client = client(Endpoint::google().unwrap())
            .with_scopes(vec!["email".to_string(), "profile".to_string()]);
        let url = client.authorization_url("s");

        // Space becomes + in query parameters
        assert!(url.as_str().contains("scope=email+profile"));
    }

    #[test]
    fn test_azure_adds_offline_access_once() {
        let client = client(Endpoint::azure_ad("contoso").unwrap())
            .with_scopes(vec!["https://outlook.office.com/SMTP.Send".to_string()]);
        let url = client.authorization_url("s");
        let scope = url
            .query_pairs()
            .find(|(key, _)| key == "scope")
            .map(|(_, value)| value.into_owned())
            .unwrap();
        assert_eq!(scope, "https://outlook.office.com/SMTP.Send offline_access");

        let client = client.with_scopes(vec!["offline_access".to_string()]);
        let url = client.authorization_url("s");
        let scope_count = url.query_pairs().filter(|(key, _)| key == "scope").count();
        assert_eq!(scope_count, 1);
        assert!(url.as_str().contains("scope=offline_access&"));
    }

    #[test]
    fn test_state_is_url_encoded() {
        let client = client(Endpoint::google().unwrap());
        let url = client.authorization_url("a b&c");
        let state = url
            .query_pairs()
            .find(|(key, _)| key == "state")
            .map(|(_, value)| value.into_owned())
            .unwrap();
        assert_eq!(state, "a b&c");
    }

    #[test]
    fn test_generate_state_unique() {
        let first = generate_state();
        let second = generate_state();
        assert_eq!(first.len(), 43);
        assert_ne!(first, second);
        assert!(first.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }
}
