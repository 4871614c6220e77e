use std::fmt;
use std::str::FromStr;

use anyhow::{Result, anyhow, bail};
use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng as SaltRng},
};
use rand_core::{OsRng, RngCore};
use sha2::Sha256;

/// PBKDF2-HMAC-SHA256 work factor. Changing it invalidates every stored hash.
pub const PBKDF2_ITERATIONS: u32 = 100_000;

const SALT_BYTES: usize = 16;
const HASH_BYTES: usize = 32;
const DELIMITER: char = '$';
const ARGON2_PREFIX: &str = "$argon2";

/// Key derivation used for newly hashed passwords.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PasswordScheme {
    /// `{salt_hex}${hash_hex}`, PBKDF2-HMAC-SHA256 over the salt's ASCII text.
    #[default]
    Pbkdf2Sha256,
    /// Argon2id PHC string.
    Argon2id,
}

impl FromStr for PasswordScheme {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pbkdf2" | "pbkdf2-sha256" => Ok(Self::Pbkdf2Sha256),
            "argon2" | "argon2id" => Ok(Self::Argon2id),
            other => bail!("Unknown password scheme: {}", other),
        }
    }
}

impl fmt::Display for PasswordScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pbkdf2Sha256 => f.write_str("pbkdf2-sha256"),
            Self::Argon2id => f.write_str("argon2id"),
        }
    }
}

/// Derives and checks salted password hashes.
///
/// `verify` understands both encodings no matter which scheme is configured,
/// so switching schemes does not lock out existing accounts.
#[derive(Debug, Clone, Copy, Default)]
pub struct CredentialHasher {
    scheme: PasswordScheme,
}

impl CredentialHasher {
    pub fn new(scheme: PasswordScheme) -> Self {
        Self { scheme }
    }

    /// Hash a password under a fresh random salt.
    pub fn hash(&self, password: &str) -> Result<String> {
        match self.scheme {
            PasswordScheme::Pbkdf2Sha256 => {
                let mut salt = [0u8; SALT_BYTES];
                OsRng
                    .try_fill_bytes(&mut salt)
                    .map_err(|e| anyhow!("OS randomness unavailable: {}", e))?;
                let salt = hex::encode(salt);
                let derived = hex::encode(derive_pbkdf2(password, &salt));
                Ok(format!("{}{}{}", salt, DELIMITER, derived))
            }
            PasswordScheme::Argon2id => {
                let salt = SaltString::generate(&mut SaltRng);
                let hash = Argon2::default()
                    .hash_password(password.as_bytes(), &salt)
                    .map_err(|e| anyhow!("Argon2 hashing failed: {}", e))?;
                Ok(hash.to_string())
            }
        }
    }

    /// Check a password against a stored hash string. Malformed input is a
    /// plain `false`.
    pub fn verify(&self, password: &str, stored: &str) -> bool {
        if stored.starts_with(ARGON2_PREFIX) {
            return verify_argon2(password, stored);
        }

        let mut parts = stored.split(DELIMITER);
        let (Some(salt), Some(expected), None) = (parts.next(), parts.next(), parts.next()) else {
            return false;
        };
        if salt.is_empty() {
            return false;
        }
        let Ok(expected) = hex::decode(expected) else {
            return false;
        };
        if expected.len() != HASH_BYTES {
            return false;
        }

        constant_time_eq(&derive_pbkdf2(password, salt), &expected)
    }

    /// Whether `stored` was produced by a different scheme than the one
    /// configured. Such rows get re-hashed on the next successful login, so
    /// stored hashes converge on the configured scheme and `burn` costs the
    /// same as a real check.
    pub fn needs_rehash(&self, stored: &str) -> bool {
        let is_argon2 = stored.starts_with(ARGON2_PREFIX);
        match self.scheme {
            PasswordScheme::Pbkdf2Sha256 => is_argon2,
            PasswordScheme::Argon2id => !is_argon2,
        }
    }

    /// Spend one derivation's worth of work under the configured scheme and
    /// throw the result away. Used when there is no stored hash to check
    /// against.
    pub fn burn(&self, password: &str) {
        let _ = self.hash(password);
    }
}

fn derive_pbkdf2(password: &str, salt: &str) -> [u8; HASH_BYTES] {
    let mut out = [0u8; HASH_BYTES];
    pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt.as_bytes(), PBKDF2_ITERATIONS, &mut out);
    out
}

fn verify_argon2(password: &str, stored: &str) -> bool {
    match PasswordHash::new(stored) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

/// Constant-time byte comparison.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
