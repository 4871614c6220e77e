use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use tracing::debug;
use uuid::Uuid;

use vault_crypto::token::{generate_token, is_well_formed, token_digest};
use vault_db::Database;
use vault_db::models::NewSession;
use vault_types::models::{ClientMetadata, Identity};

/// Default absolute session lifetime.
pub const DEFAULT_SESSION_TTL_HOURS: i64 = 7 * 24;

/// A freshly issued session. The only place the plaintext token exists.
#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Issues, resolves and revokes bearer tokens.
///
/// Only the SHA-256 digest of a token reaches the database, so a token
/// cannot be recovered from storage after `issue` returns it.
#[derive(Clone)]
pub struct SessionStore {
    db: Arc<Database>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(db: Arc<Database>, ttl: Duration) -> Self {
        Self { db, ttl }
    }

    pub fn issue(&self, user_id: Uuid, client: &ClientMetadata) -> Result<IssuedSession> {
        let token = generate_token()?;
        let now = Utc::now();
        let expires_at = now + self.ttl;
        let session_id = Uuid::new_v4().to_string();
        let user_id = user_id.to_string();
        let digest = token_digest(&token);

        self.db.insert_session(&NewSession {
            id: &session_id,
            user_id: &user_id,
            token_digest: &digest,
            expires_at,
            ip_address: &client.ip_address,
            user_agent: &client.user_agent,
            created_at: now,
        })?;

        debug!("Session {} issued for user {}", session_id, user_id);
        Ok(IssuedSession { token, expires_at })
    }

    /// Identity behind a live token. Unknown, expired and malformed tokens
    /// all come back as `None`.
    pub fn resolve(&self, token: &str) -> Result<Option<Identity>> {
        if !is_well_formed(token) {
            return Ok(None);
        }

        let Some(row) = self.db.find_live_session(&token_digest(token), Utc::now())? else {
            return Ok(None);
        };

        let id = row
            .user_id
            .parse::<Uuid>()
            .with_context(|| format!("Session {} has a malformed user id", row.session_id))?;

        Ok(Some(Identity {
            id,
            email: row.email,
            full_name: row.full_name,
        }))
    }

    /// Expire the session now. Returns `false` if no session row matches,
    /// whether or not it had already expired.
    pub fn invalidate(&self, token: &str) -> Result<bool> {
        if !is_well_formed(token) {
            return Ok(false);
        }
        let matched = self.db.update_session_expiry(&token_digest(token), Utc::now())?;
        Ok(matched > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_user() -> (SessionStore, Arc<Database>, Uuid) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let user_id = Uuid::new_v4();
        db.create_user(
            &user_id.to_string(),
            "alice@example.com",
            "salt$hash",
            Some("Alice"),
            Utc::now(),
        )
        .unwrap();
        let store = SessionStore::new(db.clone(), Duration::hours(DEFAULT_SESSION_TTL_HOURS));
        (store, db, user_id)
    }

    #[test]
    fn issue_then_resolve() {
        let (store, _db, user_id) = store_with_user();
        let issued = store.issue(user_id, &ClientMetadata::default()).unwrap();

        let identity = store.resolve(&issued.token).unwrap().unwrap();
        assert_eq!(identity.id, user_id);
        assert_eq!(identity.email, "alice@example.com");
        assert_eq!(identity.full_name.as_deref(), Some("Alice"));
    }

    #[test]
    fn expiry_is_seven_days_out() {
        let (store, _db, user_id) = store_with_user();
        let before = Utc::now();
        let issued = store.issue(user_id, &ClientMetadata::default()).unwrap();

        let lifetime = issued.expires_at - before;
        assert!(lifetime >= Duration::days(7));
        assert!(lifetime < Duration::days(7) + Duration::minutes(1));
    }

    #[test]
    fn expired_sessions_do_not_resolve() {
        let (store, db, user_id) = store_with_user();
        let issued = store.issue(user_id, &ClientMetadata::default()).unwrap();

        db.update_session_expiry(&token_digest(&issued.token), Utc::now() - Duration::seconds(5))
            .unwrap();
        assert!(store.resolve(&issued.token).unwrap().is_none());
    }

    #[test]
    fn deactivated_owner_stops_resolving() {
        let (store, db, user_id) = store_with_user();
        let issued = store.issue(user_id, &ClientMetadata::default()).unwrap();

        assert!(db.set_user_active(&user_id.to_string(), false).unwrap());
        assert!(store.resolve(&issued.token).unwrap().is_none());

        db.set_user_active(&user_id.to_string(), true).unwrap();
        assert!(store.resolve(&issued.token).unwrap().is_some());
    }

    #[test]
    fn invalidate_then_resolve_fails() {
        let (store, _db, user_id) = store_with_user();
        let issued = store.issue(user_id, &ClientMetadata::default()).unwrap();

        assert!(store.invalidate(&issued.token).unwrap());
        assert!(store.resolve(&issued.token).unwrap().is_none());

        // already invalidated: row still matches, still dead
        assert!(store.invalidate(&issued.token).unwrap());
        assert!(store.resolve(&issued.token).unwrap().is_none());
    }

    #[test]
    fn invalidate_unknown_token_reports_not_found() {
        let (store, _db, _user_id) = store_with_user();
        assert!(!store.invalidate("never-issued").unwrap());
        assert!(!store.invalidate("").unwrap());
    }

    #[test]
    fn malformed_tokens_resolve_to_nothing() {
        let (store, _db, _user_id) = store_with_user();
        for token in ["", "   ", "has spaces", "x';DROP TABLE sessions;--"] {
            assert!(store.resolve(token).unwrap().is_none());
        }
    }

    #[test]
    fn plaintext_token_is_not_stored() {
        let (store, db, user_id) = store_with_user();
        let client = ClientMetadata {
            ip_address: "203.0.113.9".into(),
            user_agent: "curl/8.0".into(),
        };
        let issued = store.issue(user_id, &client).unwrap();

        let (digest, ip, agent): (String, String, String) = db
            .with_conn(|conn| {
                Ok(conn.query_row(
                    "SELECT token_digest, ip_address, user_agent FROM sessions",
                    [],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )?)
            })
            .unwrap();

        assert_ne!(digest, issued.token);
        assert_eq!(digest, token_digest(&issued.token));
        assert_eq!(ip, "203.0.113.9");
        assert_eq!(agent, "curl/8.0");
    }

    #[test]
    fn concurrent_logins_get_independent_sessions() {
        let (store, db, user_id) = store_with_user();
        let a = store.issue(user_id, &ClientMetadata::default()).unwrap();
        let b = store.issue(user_id, &ClientMetadata::default()).unwrap();

        assert_ne!(a.token, b.token);
        assert_eq!(db.count_sessions_for_user(&user_id.to_string()).unwrap(), 2);

        store.invalidate(&a.token).unwrap();
        assert!(store.resolve(&a.token).unwrap().is_none());
        assert!(store.resolve(&b.token).unwrap().is_some());
    }
}
