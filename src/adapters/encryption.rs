//! AES-256-GCM encryption for datasource passwords
//!
//! Stored passwords are tokens of the form `base64(nonce || ciphertext || tag)` with
//! a 12-byte random nonce and a 16-byte tag. The key is the SHA-256 digest of the
//! configured secret.
//!
//! # CLI Commands
//!
//! ```sh
//! fedsql --secret-key "$KEY" encrypt "db-password"
//! fedsql --secret-key "$KEY" decrypt "q2b1...=="
//! fedsql generate-key
//! ```

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::domain::FederationError;

/// Nonce length in bytes
pub const NONCE_LEN: usize = 12;

const KEY_LEN: usize = 32;

/// Symmetric cipher for credentials at rest. Read-only after construction.
pub struct CredentialCipher {
    cipher: Aes256Gcm,
}

impl CredentialCipher {
    pub fn new(secret: &SecretString) -> Result<Self, FederationError> {
        if secret.expose_secret().trim().is_empty() {
            return Err(FederationError::Configuration(
                "encryption secret must not be blank".to_string(),
            ));
        }

        let key = Sha256::digest(secret.expose_secret().as_bytes());
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| FederationError::Configuration(format!("invalid key: {}", e)))?;
        Ok(Self { cipher })
    }

    /// Encrypt with a fresh random nonce. Two calls never yield the same token.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, FederationError> {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let sealed = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_bytes())
            .map_err(|_| FederationError::EncryptionFailed("AES-GCM seal failed".to_string()))?;

        let mut token = Vec::with_capacity(NONCE_LEN + sealed.len());
        token.extend_from_slice(&nonce);
        token.extend_from_slice(&sealed);
        Ok(STANDARD.encode(token))
    }

    /// Authenticated decryption. Tampering, a wrong key or a malformed token all fail.
    pub fn decrypt(&self, token: &str) -> Result<String, FederationError> {
        let raw = STANDARD
            .decode(token.trim())
            .map_err(|_| FederationError::DecryptionFailed("token is not valid base64".to_string()))?;

        if raw.len() <= NONCE_LEN {
            return Err(FederationError::DecryptionFailed("token is too short".to_string()));
        }

        let (nonce, sealed) = raw.split_at(NONCE_LEN);
        let plain = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| {
                FederationError::DecryptionFailed("authentication tag mismatch".to_string())
            })?;

        String::from_utf8(plain)
            .map_err(|_| FederationError::DecryptionFailed("plaintext is not UTF-8".to_string()))
    }

    /// Heuristic: valid base64 whose decoded length exceeds the nonce length.
    /// Plaintext that happens to look like that is misclassified.
    pub fn is_encrypted(value: &str) -> bool {
        let value = value.trim();
        !value.is_empty()
            && STANDARD
                .decode(value)
                .map(|raw| raw.len() > NONCE_LEN)
                .unwrap_or(false)
    }

    /// Decrypt a stored password if it looks encrypted, otherwise return it as-is.
    pub fn reveal(&self, stored: &str) -> Result<SecretString, FederationError> {
        if Self::is_encrypted(stored) {
            self.decrypt(stored).map(SecretString::from)
        } else {
            Ok(SecretString::from(stored.to_string()))
        }
    }

    /// Random 256-bit secret, base64 encoded.
    pub fn generate_secret() -> String {
        let mut key = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut key);
        STANDARD.encode(key)
    }
}

impl fmt::Debug for CredentialCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialCipher").finish_non_exhaustive()
    }
}
