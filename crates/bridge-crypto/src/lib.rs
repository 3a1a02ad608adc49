//! # bridge-crypto: Password Hashing
//!
//! PBKDF2-HMAC-SHA512 over a fresh 256-byte random salt, producing a 512-byte
//! derived key. Hashes and salts travel as standard base64 strings.
//!
//! ## Security Contract
//! - Salts come from the operating system CSPRNG, one per call.
//! - Verification uses [`constant_time_eq`]; never `==`.
//! - Plain text is held as a [`SecretString`] and never formatted.
//! - Derivation runs on the blocking pool so other connections keep moving.

pub mod compare;

pub use compare::constant_time_eq;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use pbkdf2::pbkdf2_hmac;
use rand::rngs::OsRng;
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::Sha512;
use zeroize::Zeroizing;

/// Random salt size in bytes.
pub const SALT_LEN: usize = 256;
/// Derived key size in bytes.
pub const HASH_LEN: usize = 512;
pub const DEFAULT_ITERATIONS: u32 = 100_000;

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("random source failure: {0}")]
    RandomSource(String),
    #[error("stored hash is not valid base64: {0}")]
    MalformedHash(String),
    #[error("key derivation failed: {0}")]
    Derivation(String),
}

/// Result of hashing a password. Both fields are base64 text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashRecord {
    pub hash: String,
    pub salt: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PasswordCheck {
    pub password_is_valid: bool,
}

/// Stateless hasher; the only parameter is the iteration count.
#[derive(Debug, Clone, Copy)]
pub struct PasswordHasher {
    iterations: u32,
}

impl Default for PasswordHasher {
    fn default() -> Self {
        Self::new(DEFAULT_ITERATIONS)
    }
}

impl PasswordHasher {
    /// Zero iterations is raised to one.
    pub fn new(iterations: u32) -> Self {
        Self {
            iterations: iterations.max(1),
        }
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    /// Hashes `plain_text` under a new salt without blocking the runtime.
    pub async fn hash(&self, plain_text: SecretString) -> Result<HashRecord, CryptoError> {
        let hasher = *self;
        tokio::task::spawn_blocking(move || hasher.hash_blocking(&plain_text))
            .await
            .map_err(|e| CryptoError::Derivation(e.to_string()))?
    }

    /// Re-derives from `plain_text` and the stored salt, then compares.
    pub async fn check(
        &self,
        stored: HashRecord,
        plain_text: SecretString,
    ) -> Result<PasswordCheck, CryptoError> {
        let hasher = *self;
        tokio::task::spawn_blocking(move || hasher.check_blocking(&stored, &plain_text))
            .await
            .map_err(|e| CryptoError::Derivation(e.to_string()))?
    }

    pub fn hash_blocking(&self, plain_text: &SecretString) -> Result<HashRecord, CryptoError> {
        let salt = generate_salt()?;
        let derived = self.derive(plain_text.expose_secret(), &salt);
        Ok(HashRecord {
            hash: STANDARD.encode(&*derived),
            salt,
        })
    }

    pub fn check_blocking(
        &self,
        stored: &HashRecord,
        plain_text: &SecretString,
    ) -> Result<PasswordCheck, CryptoError> {
        let stored_hash = Zeroizing::new(
            STANDARD
                .decode(&stored.hash)
                .map_err(|e| CryptoError::MalformedHash(e.to_string()))?,
        );
        let derived = self.derive(plain_text.expose_secret(), &stored.salt);
        Ok(PasswordCheck {
            password_is_valid: constant_time_eq(&derived, &stored_hash),
        })
    }

    // The salt is keyed in its encoded form so stored records stay verifiable
    // by any implementation that treats the salt as opaque text.
    fn derive(&self, plain_text: &str, salt: &str) -> Zeroizing<Vec<u8>> {
        let mut out = Zeroizing::new(vec![0u8; HASH_LEN]);
        pbkdf2_hmac::<Sha512>(plain_text.as_bytes(), salt.as_bytes(), self.iterations, &mut out);
        out
    }
}

fn generate_salt() -> Result<String, CryptoError> {
    let mut salt = Zeroizing::new([0u8; SALT_LEN]);
    OsRng
        .try_fill_bytes(&mut *salt)
        .map_err(|e| CryptoError::RandomSource(e.to_string()))?;
    Ok(STANDARD.encode(&*salt))
}
