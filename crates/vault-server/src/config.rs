use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result, anyhow, bail};

use vault_api::auth::DEFAULT_MIN_PASSWORD_LEN;
use vault_api::session::DEFAULT_SESSION_TTL_HOURS;
use vault_crypto::PasswordScheme;

/// Ten years.
const MAX_SESSION_TTL_HOURS: i64 = 10 * 365 * 24;
const MAX_RETENTION_DAYS: i64 = 100 * 365;

/// Server settings, read once from `VAULT_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub storage_dir: PathBuf,
    pub public_base_url: String,
    /// Decoded upload limit in bytes, from `VAULT_MAX_UPLOAD_MB`.
    pub max_upload_bytes: usize,
    pub session_ttl_hours: i64,
    pub min_password_len: usize,
    pub password_scheme: PasswordScheme,
    /// Days an expired session row is kept before the sweeper drops it. 0 keeps them.
    pub session_retention_days: i64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source; `lookup` returns `None` for unset names.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let max_upload_mb: usize = parse_var(&lookup, "VAULT_MAX_UPLOAD_MB", 50)?;
        if max_upload_mb == 0 {
            bail!("VAULT_MAX_UPLOAD_MB must be positive");
        }
        let max_upload_bytes = max_upload_mb
            .checked_mul(1024 * 1024)
            .ok_or_else(|| anyhow!("VAULT_MAX_UPLOAD_MB={} is too large", max_upload_mb))?;

        let session_ttl_hours = parse_var(&lookup, "VAULT_SESSION_TTL_HOURS", DEFAULT_SESSION_TTL_HOURS)?;
        if !(1..=MAX_SESSION_TTL_HOURS).contains(&session_ttl_hours) {
            bail!("VAULT_SESSION_TTL_HOURS must be between 1 and {}", MAX_SESSION_TTL_HOURS);
        }

        let session_retention_days = parse_var(&lookup, "VAULT_SESSION_RETENTION_DAYS", 0)?;
        if !(0..=MAX_RETENTION_DAYS).contains(&session_retention_days) {
            bail!("VAULT_SESSION_RETENTION_DAYS must be between 0 and {}", MAX_RETENTION_DAYS);
        }

        Ok(Self {
            host: var_or(&lookup, "VAULT_HOST", "0.0.0.0"),
            port: parse_var(&lookup, "VAULT_PORT", 3000)?,
            db_path: var_or(&lookup, "VAULT_DB_PATH", "vault.db").into(),
            storage_dir: var_or(&lookup, "VAULT_STORAGE_DIR", "./bucket").into(),
            public_base_url: var_or(&lookup, "VAULT_PUBLIC_BASE_URL", "http://localhost:3000/bucket/"),
            max_upload_bytes,
            session_ttl_hours,
            min_password_len: parse_var(&lookup, "VAULT_MIN_PASSWORD_LEN", DEFAULT_MIN_PASSWORD_LEN)?,
            password_scheme: parse_var(&lookup, "VAULT_PASSWORD_SCHEME", PasswordScheme::default())?,
            session_retention_days,
        })
    }
}

fn var_or(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: &str) -> String {
    lookup(name).unwrap_or_else(|| default.into())
}

/// Unset means the default; set but unparsable is a startup error.
fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|e| anyhow!("{}", e))
            .with_context(|| format!("invalid {}={:?}", name, raw)),
        _ => Ok(default),
    }
}
