//! # smtp-oauth
//!
//! `OAuth2` credential lifecycle for SMTP clients sending through Gmail and
//! Office365.
//!
//! ## Features
//!
//! - **Validation**: configuration and token checks before any network call
//! - **Token management**: authorization code exchange and refresh under a
//!   deadline, with provider-specific endpoints
//! - **Encrypted storage**: AES-256-GCM token store keyed by identity, with
//!   retention-based eviction
//! - **SASL mechanisms**: XOAUTH2 and OAUTHBEARER (RFC 7628)
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use smtp_oauth::{AuthConfig, MemoryTokenStore, ProviderKind, StoreConfig, TokenManager};
//!
//! #[tokio::main]
//! async fn main() -> smtp_oauth::Result<()> {
//!     let config = AuthConfig::from_env(ProviderKind::Gmail)?;
//!     let store = Arc::new(MemoryTokenStore::from_env(StoreConfig::default())?);
//!     let _cleanup = store.spawn_cleanup();
//!
//!     let manager = TokenManager::new(config)?.with_store(store);
//!
//!     let state = smtp_oauth::generate_state();
//!     println!("Visit: {}", manager.authorization_url(&state).await);
//!
//!     // After the redirect comes back with ?code=...&state=...
//!     manager.authorize("user@gmail.com", "code_from_redirect").await?;
//!
//!     // Later: refreshed automatically when expired
//!     let token = manager.get_token("user@gmail.com").await?;
//!     let auth = smtp_oauth::sasl::xoauth2_response("user@gmail.com", &token)?;
//!     // Send: AUTH XOAUTH2 {auth}
//!     Ok(())
//! }
//! ```
//!
//! ## Provider Support
//!
//! - **Gmail** - Google endpoints, `https://mail.google.com/` scope
//! - **Office365** - Azure AD v2 endpoints for a tenant, `SMTP.Send` scope
//! - **Generic** - any `OAuth2` provider via [`TokenManager::with_endpoint`]

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod config;
mod error;
pub mod flow;
mod manager;
pub mod provider;
pub mod sasl;
pub mod store;
pub mod token;
pub mod validator;

pub use config::{AuthConfig, StoreConfig};
pub use error::{AuthErrorCode, Error, ProviderError, Result};
pub use flow::{OAuthClient, generate_state};
pub use manager::TokenManager;
pub use provider::{Endpoint, ProviderKind};
pub use store::{CleanupTask, MemoryTokenStore, TokenStore};
pub use token::Token;
pub use validator::{ValidationError, validate_config, validate_token};
