use anyhow::{Result, anyhow};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand_core::{OsRng, RngCore};
use sha2::{Digest, Sha256};

/// Raw token entropy: 32 bytes = 256 bits, 43 base64url characters.
pub const TOKEN_BYTES: usize = 32;

/// Upper bound on anything worth looking up as a token.
const MAX_TOKEN_LEN: usize = 256;

/// Generate a URL-safe session token from the OS RNG.
pub fn generate_token() -> Result<String> {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| anyhow!("OS randomness unavailable: {}", e))?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

/// SHA-256 hex digest of a token. This is what gets stored.
pub fn token_digest(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Cheap shape check before touching the store.
pub fn is_well_formed(token: &str) -> bool {
    !token.is_empty()
        && token.len() <= MAX_TOKEN_LEN
        && token
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}
