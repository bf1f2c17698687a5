//! AES-256-GCM sealing for stored tokens.
//!
//! Every seal draws a fresh 96-bit nonce from the OS RNG. The identity is
//! bound in as associated data, so a record copied under another identity
//! fails to open.

use std::fmt;

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::RngCore;
use rand::rngs::OsRng;
use zeroize::Zeroizing;

use crate::error::{Error, Result};

/// Size of the encryption key in bytes (256 bits).
pub const KEY_SIZE: usize = 32;

/// Size of the nonce in bytes (96 bits, standard for GCM).
pub const NONCE_SIZE: usize = 12;

pub(crate) struct TokenCipher {
    cipher: Aes256Gcm,
}

impl TokenCipher {
    pub(crate) fn new(key: &[u8]) -> Result<Self> {
        if key.len() != KEY_SIZE {
            return Err(Error::InvalidKey(format!(
                "expected {KEY_SIZE} bytes, got {}",
                key.len()
            )));
        }

        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|_| Error::InvalidKey("rejected by AES-256-GCM".into()))?;
        Ok(Self { cipher })
    }

    /// Encrypts `plaintext`, returning the nonce and ciphertext.
    ///
    /// Nothing is returned if the RNG fails.
    pub(crate) fn seal(&self, identity: &str, plaintext: &[u8]) -> Result<([u8; NONCE_SIZE], Vec<u8>)> {
        let mut nonce = [0u8; NONCE_SIZE];
        OsRng
            .try_fill_bytes(&mut nonce)
            .map_err(|e| Error::Encryption(format!("nonce generation failed: {e}")))?;

        let ciphertext = self
            .cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: plaintext,
                    aad: identity.as_bytes(),
                },
            )
            .map_err(|_| Error::Encryption("AES-GCM seal failed".into()))?;

        Ok((nonce, ciphertext))
    }

    /// Decrypts and verifies a sealed record.
    pub(crate) fn open(
        &self,
        identity: &str,
        nonce: &[u8; NONCE_SIZE],
        ciphertext: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>> {
        self.cipher
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad: identity.as_bytes(),
                },
            )
            .map(Zeroizing::new)
            .map_err(|_| Error::Decryption(identity.to_string()))
    }
}

impl fmt::Debug for TokenCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCipher")
            .field("algorithm", &"AES-256-GCM")
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_key_length() {
        assert!(TokenCipher::new(&[0u8; 32]).is_ok());
        assert!(matches!(
            TokenCipher::new(&[0u8; 16]),
            Err(Error::InvalidKey(_))
        ));
        assert!(matches!(
            TokenCipher::new(&[0u8; 64]),
            Err(Error::InvalidKey(_))
        ));
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let cipher = TokenCipher::new(&[7u8; 32]).unwrap();
        let (nonce, ciphertext) = cipher.seal("alice", b"secret-payload").unwrap();
        assert_ne!(ciphertext.as_slice(), b"secret-payload");

        let plaintext = cipher.open("alice", &nonce, &ciphertext).unwrap();
        assert_eq!(plaintext.as_slice(), b"secret-payload");
    }

    #[test]
    fn test_nonces_differ() {
        let cipher = TokenCipher::new(&[7u8; 32]).unwrap();
        let (nonce1, ciphertext1) = cipher.seal("alice", b"same").unwrap();
        let (nonce2, ciphertext2) = cipher.seal("alice", b"same").unwrap();
        assert_ne!(nonce1, nonce2);
        assert_ne!(ciphertext1, ciphertext2);
    }

    #[test]
    fn test_wrong_identity_fails() {
        let cipher = TokenCipher::new(&[7u8; 32]).unwrap();
        let (nonce, ciphertext) = cipher.seal("alice", b"secret").unwrap();
        assert!(matches!(
            cipher.open("mallory", &nonce, &ciphertext),
            Err(Error::Decryption(id)) if id == "mallory"
        ));
    }

    #[test]
    fn test_wrong_key_fails() {
        let cipher1 = TokenCipher::new(&[1u8; 32]).unwrap();
        let cipher2 = TokenCipher::new(&[2u8; 32]).unwrap();
        let (nonce, ciphertext) = cipher1.seal("alice", b"secret").unwrap();
        assert!(cipher2.open("alice", &nonce, &ciphertext).is_err());
    }
}
