//! Example: `OAuth2` credentials for Gmail SMTP
//!
//! This example demonstrates how to:
//! 1. Load the Gmail client configuration from the environment
//! 2. Send the user to Google's consent page
//! 3. Exchange the authorization code and keep the token in the encrypted store
//! 4. Build the SMTP `AUTH XOAUTH2` string from the stored token
//!
//! ## Prerequisites
//!
//! 1. Create an OAuth client in the Google Cloud console:
//!    - APIs & Services > Credentials > Create credentials > OAuth client ID
//!    - Application type "Web application" with redirect URI `http://localhost:8080`
//!
//! 2. Set environment variables:
//!    ```bash
//!    export GMAIL_CLIENT_ID="your-client-id.apps.googleusercontent.com"
//!    export GMAIL_CLIENT_SECRET="your-client-secret"
//!    export GMAIL_REDIRECT_URL="http://localhost:8080"
//!    export TOKEN_ENCRYPTION_KEY="$(openssl rand -base64 32)"
//!    export OAUTH_EMAIL="you@gmail.com"
//!    ```
//!
//! ## Running
//!
//! ```bash
//! RUST_LOG=smtp_oauth=debug cargo run --example gmail_oauth2
//! ```

use std::io::{self, Write};
use std::sync::Arc;

use anyhow::Context;
use smtp_oauth::{
    AuthConfig, MemoryTokenStore, ProviderKind, StoreConfig, TokenManager, generate_state,
};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .init();

    let email = std::env::var("OAUTH_EMAIL").context("OAUTH_EMAIL is not set")?;

    println!("smtp-oauth Example - Gmail");
    println!("==========================\n");

    // Step 1: Configuration and store
    println!("Step 1: Loading configuration...");
    let config = AuthConfig::from_env(ProviderKind::Gmail)?;
    println!("  Scopes: {:?}", config.scopes);

    let store = Arc::new(
        MemoryTokenStore::from_env(StoreConfig::default())
            .context("TOKEN_ENCRYPTION_KEY must hold a base64-encoded 32-byte key")?,
    );
    let _cleanup = store.spawn_cleanup();

    let manager = TokenManager::new(config)?.with_store(store.clone());
    println!("  Timeout: {:?}\n", manager.timeout());

    // Step 2: Consent
    println!("Step 2: Generating authorization URL...");
    let state = generate_state();
    let auth_url = manager.authorization_url(&state).await;

    println!("\nVisit this URL to authorize the application:\n");
    println!("{auth_url}\n");
    println!("After authorizing, you'll be redirected to:");
    println!("  http://localhost:8080/?state={state}&code=AUTHORIZATION_CODE\n");

    // Step 3: Exchange and store
    print!("Enter the authorization code from the redirect URL: ");
    io::stdout().flush()?;

    let mut code = String::new();
    io::stdin().read_line(&mut code)?;
    let code = code.trim();

    if code.is_empty() {
        println!("\nNo code entered. Exiting.");
        return Ok(());
    }

    println!("\nStep 3: Exchanging authorization code...");
    let token = manager
        .authorize(&email, code)
        .await
        .context("authorization code exchange failed")?;

    println!("  Token obtained: {token:?}");
    println!("  Stored records: {}\n", store.len());

    // Step 4: SMTP
    println!("Step 4: Building SMTP XOAUTH2 string...");
    let token = manager.get_token(&email).await?;
    let auth_string = smtp_oauth::sasl::xoauth2_response(&email, &token)?;
    println!("  AUTH XOAUTH2 <{} bytes of base64>", auth_string.len());
    println!("  Connect to smtp.gmail.com:587, STARTTLS, then send the line above.\n");

    if token.can_refresh() {
        println!("The token refreshes automatically on the next get_token after it expires.");
    }

    Ok(())
}
