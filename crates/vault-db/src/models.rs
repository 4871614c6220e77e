//! Database row types. These map directly to SQLite rows and stay
//! independent of the vault-types wire models.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Row;
use rusqlite::types::Type;

pub struct UserRow {
    pub id: String,
    pub email: String,
    pub password_hash: String,
    pub full_name: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

pub struct NewSession<'a> {
    pub id: &'a str,
    pub user_id: &'a str,
    pub token_digest: &'a str,
    pub expires_at: DateTime<Utc>,
    pub ip_address: &'a str,
    pub user_agent: &'a str,
    pub created_at: DateTime<Utc>,
}

/// Session joined to its owner, as returned by a token lookup.
pub struct SessionIdentityRow {
    pub session_id: String,
    pub user_id: String,
    pub email: String,
    pub full_name: Option<String>,
    pub expires_at: DateTime<Utc>,
}

pub struct FileRow {
    pub id: String,
    pub user_id: String,
    pub file_name: String,
    pub file_size: i64,
    pub file_type: String,
    pub storage_path: String,
    pub is_archived: bool,
    pub uploaded_at: DateTime<Utc>,
}

/// Fixed-width RFC 3339 text, so string order equals time order.
pub fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_ts(raw: &str) -> chrono::ParseResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw).map(|ts| ts.with_timezone(&Utc))
}

pub(crate) fn read_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_ts(&raw).map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn read_opt_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|raw| {
        parse_ts(&raw)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}
