//! Encrypted in-memory token storage.
//!
//! Tokens are serialized, sealed with AES-256-GCM under a 256-bit key
//! supplied at construction, and kept in a map keyed by identity (a mailbox
//! or user id). Plaintext only exists for the duration of a single
//! `store_token` / `get_token` call and is wiped when dropped.
//!
//! A background sweep evicts records stored longer ago than the retention
//! window. This bounds memory for abandoned identities; token freshness is
//! decided by the token's own expiry.
//!
//! # Example
//!
//! ```ignore
//! use smtp_oauth::{MemoryTokenStore, StoreConfig, TokenStore};
//!
//! let store = MemoryTokenStore::from_env(StoreConfig::default())?;
//! let _cleanup = store.spawn_cleanup();
//!
//! store.store_token("user@example.com", &token)?;
//! let token = store.get_token("user@example.com")?;
//! ```

mod cipher;
mod clock;

pub use cipher::{KEY_SIZE, NONCE_SIZE};
pub use clock::{Clock, ManualClock, SystemClock};

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::config::StoreConfig;
use crate::error::{Error, Result};
use crate::token::Token;
use cipher::TokenCipher;

/// Environment variable holding the base64-encoded store key.
pub const ENCRYPTION_KEY_VAR: &str = "TOKEN_ENCRYPTION_KEY";

/// Persistence for tokens, keyed by identity.
pub trait TokenStore: Send + Sync {
    /// Stores a token, replacing any previous token for the identity.
    ///
    /// # Errors
    ///
    /// Returns an error if the token cannot be serialized or sealed; in that
    /// case nothing is written.
    fn store_token(&self, identity: &str, token: &Token) -> Result<()>;

    /// Retrieves the token for an identity.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if nothing is stored and
    /// [`Error::Decryption`] if the stored record fails verification.
    fn get_token(&self, identity: &str) -> Result<Token>;

    /// Removes the token for an identity. Removing a missing identity is
    /// not an error.
    ///
    /// # Errors
    ///
    /// Implementations backed by I/O may fail.
    fn delete_token(&self, identity: &str) -> Result<()>;
}

#[derive(Clone)]
struct EncryptedTokenRecord {
    ciphertext: Vec<u8>,
    nonce: [u8; NONCE_SIZE],
    stored_at: DateTime<Utc>,
}

#[derive(Debug)]
struct StoreInner {
    records: Mutex<HashMap<String, EncryptedTokenRecord>>,
    cipher: TokenCipher,
    clock: Arc<dyn Clock>,
    config: StoreConfig,
}

impl StoreInner {
    fn records(&self) -> MutexGuard<'_, HashMap<String, EncryptedTokenRecord>> {
        // Records are inserted and removed whole, so a poisoned map is
        // still consistent.
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the oldest `stored_at` that is still retained.
    fn cutoff(&self) -> Option<DateTime<Utc>> {
        let retention = chrono::Duration::from_std(self.config.retention).ok()?;
        self.clock.now().checked_sub_signed(retention)
    }

    fn sweep(&self) -> usize {
        let Some(cutoff) = self.cutoff() else {
            return 0;
        };

        let mut records = self.records();
        let before = records.len();
        records.retain(|_, record| record.stored_at >= cutoff);
        before - records.len()
    }
}

impl std::fmt::Debug for EncryptedTokenRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptedTokenRecord")
            .field("len", &self.ciphertext.len())
            .field("stored_at", &self.stored_at)
            .finish_non_exhaustive()
    }
}

/// AES-256-GCM encrypted token store held in memory.
///
/// Cloning is cheap and shares the same records.
#[derive(Debug, Clone)]
pub struct MemoryTokenStore {
    inner: Arc<StoreInner>,
}

impl MemoryTokenStore {
    /// Creates a store with default retention and sweep interval.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidKey`] unless `key` is exactly 32 bytes.
    pub fn new(key: &[u8]) -> Result<Self> {
        Self::with_config(key, StoreConfig::default())
    }

    /// Creates a store with explicit tuning.
    ///
    /// # Errors
    ///
    /// Returns an error if the key length is wrong or the sweep interval is
    /// zero.
    pub fn with_config(key: &[u8], config: StoreConfig) -> Result<Self> {
        Self::with_clock(key, config, Arc::new(SystemClock))
    }

    /// Creates a store that reads time from `clock`.
    ///
    /// # Errors
    ///
    /// Returns an error if the key length is wrong or the sweep interval is
    /// zero.
    pub fn with_clock(key: &[u8], config: StoreConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let cipher = TokenCipher::new(key)?;
        if config.cleanup_interval.is_zero() {
            return Err(Error::InvalidConfig(
                "cleanup interval must be greater than zero".into(),
            ));
        }

        Ok(Self {
            inner: Arc::new(StoreInner {
                records: Mutex::new(HashMap::new()),
                cipher,
                clock,
                config,
            }),
        })
    }

    /// Creates a store from a base64-encoded 32-byte key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidKey`] if the value is not base64 or does not
    /// decode to 32 bytes.
    pub fn from_base64(key: &str, config: StoreConfig) -> Result<Self> {
        let key = Zeroizing::new(
            STANDARD
                .decode(key.trim())
                .map_err(|e| Error::InvalidKey(format!("not valid base64: {e}")))?,
        );
        Self::with_config(&key, config)
    }

    /// Creates a store from the [`ENCRYPTION_KEY_VAR`] environment variable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidKey`] if the variable is unset or invalid.
    pub fn from_env(config: StoreConfig) -> Result<Self> {
        let key = Zeroizing::new(
            std::env::var(ENCRYPTION_KEY_VAR)
                .map_err(|_| Error::InvalidKey(format!("{ENCRYPTION_KEY_VAR} is not set")))?,
        );
        Self::from_base64(&key, config)
    }

    /// Returns the store configuration.
    #[must_use]
    pub fn config(&self) -> StoreConfig {
        self.inner.config
    }

    /// Number of records currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.records().len()
    }

    /// Returns true if no records are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Evicts records older than the retention window.
    ///
    /// Returns the number of evicted records.
    pub fn sweep(&self) -> usize {
        let evicted = self.inner.sweep();
        if evicted > 0 {
            info!(evicted, "Swept stale token records");
        }
        evicted
    }

    /// Starts the periodic sweep on the current tokio runtime.
    ///
    /// The task stops when every handle to the store is dropped, or when the
    /// returned [`CleanupTask`] is dropped.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    #[must_use = "dropping the CleanupTask stops the sweep"]
    pub fn spawn_cleanup(&self) -> CleanupTask {
        let period = self.inner.config.cleanup_interval;
        let store: Weak<StoreInner> = Arc::downgrade(&self.inner);

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick completes immediately
            interval.tick().await;

            loop {
                interval.tick().await;
                let Some(inner) = store.upgrade() else {
                    debug!("Token store dropped, stopping cleanup");
                    break;
                };
                let evicted = inner.sweep();
                if evicted > 0 {
                    info!(evicted, "Swept stale token records");
                }
            }
        });

        info!(
            interval_secs = period.as_secs(),
            retention_secs = self.inner.config.retention.as_secs(),
            "Token store cleanup task started"
        );
        CleanupTask { handle }
    }
}

impl TokenStore for MemoryTokenStore {
    fn store_token(&self, identity: &str, token: &Token) -> Result<()> {
        let plaintext = Zeroizing::new(serde_json::to_vec(token)?);
        let (nonce, ciphertext) = self.inner.cipher.seal(identity, &plaintext)?;

        let mut records = self.inner.records();
        let replaced = records
            .insert(
                identity.to_string(),
                EncryptedTokenRecord {
                    ciphertext,
                    nonce,
                    stored_at: self.inner.clock.now(),
                },
            )
            .is_some();
        drop(records);

        debug!(identity, replaced, expiry = %token.expiry, "Stored token");
        Ok(())
    }

    fn get_token(&self, identity: &str) -> Result<Token> {
        let cutoff = self.inner.cutoff();
        let record = {
            let mut records = self.inner.records();
            match records.get(identity) {
                Some(record) if cutoff.is_some_and(|cutoff| record.stored_at < cutoff) => {
                    records.remove(identity);
                    None
                }
                Some(record) => Some(record.clone()),
                None => None,
            }
        }
        .ok_or_else(|| Error::NotFound(identity.to_string()))?;

        let plaintext = self
            .inner
            .cipher
            .open(identity, &record.nonce, &record.ciphertext)?;

        // A parse error message could quote token material.
        serde_json::from_slice(&plaintext).map_err(|_| Error::Decryption(identity.to_string()))
    }

    fn delete_token(&self, identity: &str) -> Result<()> {
        let removed = self.inner.records().remove(identity).is_some();
        debug!(identity, removed, "Deleted token");
        Ok(())
    }
}

/// Handle to the background sweep. Dropping it stops the sweep.
#[derive(Debug)]
pub struct CleanupTask {
    handle: JoinHandle<()>,
}

impl CleanupTask {
    /// Stops the sweep.
    pub fn abort(&self) {
        self.handle.abort();
    }

    /// Returns true once the sweep has stopped.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for CleanupTask {
    fn drop(&mut self) {
        self.handle.abort();
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
    use chrono::Duration;

    const KEY: [u8; KEY_SIZE] = [42u8; KEY_SIZE];

    fn token(access: &str) -> Token {
        Token::new(access, "Bearer", Utc::now() + Duration::hours(1))
            .with_refresh_token(format!("{access}-refresh"))
            .with_scope("https://mail.google.com/")
    }

    fn manual_store(retention: std::time::Duration) -> (MemoryTokenStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let config = StoreConfig::default().with_retention(retention);
        let store = MemoryTokenStore::with_clock(&KEY, config, clock.clone()).unwrap();
        (store, clock)
    }

    #[test]
    fn test_roundtrip() {
        let store = MemoryTokenStore::new(&KEY).unwrap();
        let original = token("ya29.alice");
        store.store_token("alice@example.com", &original).unwrap();

        let loaded = store.get_token("alice@example.com").unwrap();
        assert_eq!(loaded, original);
    }

    #[test]
    fn test_short_key_rejected() {
        let err = MemoryTokenStore::new(&[0u8; 16]).unwrap_err();
        assert!(matches!(err, Error::InvalidKey(_)));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let config = StoreConfig::default().with_cleanup_interval(std::time::Duration::ZERO);
        assert!(matches!(
            MemoryTokenStore::with_config(&KEY, config),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_from_base64() {
        let encoded = STANDARD.encode(KEY);
        let store = MemoryTokenStore::from_base64(&encoded, StoreConfig::default()).unwrap();
        assert!(store.is_empty());

        let short = STANDARD.encode([0u8; 16]);
        assert!(matches!(
            MemoryTokenStore::from_base64(&short, StoreConfig::default()),
            Err(Error::InvalidKey(_))
        ));
        assert!(matches!(
            MemoryTokenStore::from_base64("not base64!", StoreConfig::default()),
            Err(Error::InvalidKey(_))
        ));
    }

    #[test]
    fn test_missing_identity() {
        let store = MemoryTokenStore::new(&KEY).unwrap();
        assert!(matches!(
            store.get_token("nobody"),
            Err(Error::NotFound(id)) if id == "nobody"
        ));
    }

    #[test]
    fn test_overwrite_replaces_record() {
        let store = MemoryTokenStore::new(&KEY).unwrap();
        store.store_token("alice", &token("first")).unwrap();
        store.store_token("alice", &token("second")).unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(store.get_token("alice").unwrap().access_token, "second");
    }

    #[test]
    fn test_each_write_uses_fresh_nonce() {
        let store = MemoryTokenStore::new(&KEY).unwrap();
        let original = token("same");

        store.store_token("alice", &original).unwrap();
        let first = store.inner.records().get("alice").cloned().unwrap();
        store.store_token("alice", &original).unwrap();
        let second = store.inner.records().get("alice").cloned().unwrap();

        assert_ne!(first.nonce, second.nonce);
        assert_ne!(first.ciphertext, second.ciphertext);
    }

    #[test]
    fn test_ciphertext_hides_token() {
        let store = MemoryTokenStore::new(&KEY).unwrap();
        store.store_token("alice", &token("ya29.visible")).unwrap();

        let record = store.inner.records().get("alice").cloned().unwrap();
        let needle = b"ya29.visible";
        assert!(!record
            .ciphertext
            .windows(needle.len())
            .any(|window| window == needle));
    }

    #[test]
    fn test_tampered_ciphertext_is_decryption_error() {
        let store = MemoryTokenStore::new(&KEY).unwrap();
        store.store_token("alice", &token("a")).unwrap();

        store
            .inner
            .records()
            .get_mut("alice")
            .unwrap()
            .ciphertext[0] ^= 0x01;

        assert!(matches!(
            store.get_token("alice"),
            Err(Error::Decryption(id)) if id == "alice"
        ));
    }

    #[test]
    fn test_tampered_nonce_is_decryption_error() {
        let store = MemoryTokenStore::new(&KEY).unwrap();
        store.store_token("alice", &token("a")).unwrap();

        store.inner.records().get_mut("alice").unwrap().nonce[0] ^= 0x80;

        assert!(matches!(
            store.get_token("alice"),
            Err(Error::Decryption(_))
        ));
    }

    #[test]
    fn test_record_moved_between_identities_fails() {
        let store = MemoryTokenStore::new(&KEY).unwrap();
        store.store_token("alice", &token("a")).unwrap();

        let record = store.inner.records().get("alice").cloned().unwrap();
        store.inner.records().insert("bob".to_string(), record);

        assert!(matches!(store.get_token("bob"), Err(Error::Decryption(_))));
        assert!(store.get_token("alice").is_ok());
    }

    #[test]
    fn test_delete_is_idempotent() {
        let store = MemoryTokenStore::new(&KEY).unwrap();
        store.store_token("alice", &token("a")).unwrap();

        store.delete_token("alice").unwrap();
        store.delete_token("alice").unwrap();
        store.delete_token("never-stored").unwrap();

        assert!(matches!(store.get_token("alice"), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_sweep_evicts_only_stale_records() {
        let (store, clock) = manual_store(std::time::Duration::from_secs(24 * 60 * 60));

        store.store_token("old", &token("old")).unwrap();
        clock.advance(Duration::hours(20));
        store.store_token("new", &token("new")).unwrap();
        clock.advance(Duration::hours(5));

        assert_eq!(store.sweep(), 1);
        assert!(matches!(store.get_token("old"), Err(Error::NotFound(_))));
        assert!(store.get_token("new").is_ok());
    }

    #[test]
    fn test_sweep_ignores_token_expiry() {
        let (store, clock) = manual_store(std::time::Duration::from_secs(24 * 60 * 60));

        let expired = Token::new("a", "Bearer", Utc::now() - Duration::hours(3));
        store.store_token("alice", &expired).unwrap();
        clock.advance(Duration::hours(1));

        assert_eq!(store.sweep(), 0);
        assert_eq!(store.get_token("alice").unwrap(), expired);
    }

    #[test]
    fn test_get_hides_stale_record_before_sweep() {
        let (store, clock) = manual_store(std::time::Duration::from_secs(60));
        store.store_token("alice", &token("a")).unwrap();
        clock.advance(Duration::seconds(61));

        assert!(matches!(store.get_token("alice"), Err(Error::NotFound(_))));
        assert!(store.is_empty());
    }

    #[test]
    fn test_concurrent_distinct_identities() {
        let store = MemoryTokenStore::new(&KEY).unwrap();

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let store = store.clone();
                std::thread::spawn(move || {
                    let identity = format!("user{i}@example.com");
                    for round in 0..25 {
                        let access = format!("token-{i}-{round}");
                        store.store_token(&identity, &token(&access)).unwrap();
                        let loaded = store.get_token(&identity).unwrap();
                        assert_eq!(loaded.access_token, access);
                    }
                    store.delete_token(&identity).unwrap();
                    assert!(matches!(
                        store.get_token(&identity),
                        Err(Error::NotFound(_))
                    ));
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_cleanup_runs() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let config = StoreConfig::default()
            .with_cleanup_interval(std::time::Duration::from_secs(60))
            .with_retention(std::time::Duration::from_secs(120));
        let store = MemoryTokenStore::with_clock(&KEY, config, clock.clone()).unwrap();
        let task = store.spawn_cleanup();

        store.store_token("alice", &token("a")).unwrap();
        clock.advance(Duration::seconds(180));

        tokio::time::sleep(std::time::Duration::from_secs(61)).await;
        tokio::task::yield_now().await;

        assert_eq!(store.len(), 0);
        assert!(!task.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_stops_when_store_dropped() {
        let config = StoreConfig::default().with_cleanup_interval(std::time::Duration::from_secs(1));
        let store = MemoryTokenStore::with_config(&KEY, config).unwrap();
        let task = store.spawn_cleanup();
        drop(store);

        tokio::time::sleep(std::time::Duration::from_secs(2)).await;
        tokio::task::yield_now().await;

        assert!(task.is_finished());
    }
}
