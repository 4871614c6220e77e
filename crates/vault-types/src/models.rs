use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Public projection of a user account. Never carries password material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicUser {
    pub id: Uuid,
    pub email: String,
    pub full_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

/// Identity resolved from a live session token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: Uuid,
    pub email: String,
    pub full_name: Option<String>,
}

/// Where a login came from. Kept on the session row for audit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientMetadata {
    pub ip_address: String,
    pub user_agent: String,
}

impl Default for ClientMetadata {
    fn default() -> Self {
        Self {
            ip_address: "unknown".into(),
            user_agent: "unknown".into(),
        }
    }
}

/// A stored file as listed back to its owner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEntry {
    pub id: Uuid,
    pub name: String,
    pub size: u64,
    #[serde(rename = "type")]
    pub file_type: String,
    pub uploaded: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archived: Option<bool>,
    pub url: String,
}
