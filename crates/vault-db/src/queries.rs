use crate::Database;
use crate::models::{
    FileRow, NewSession, SessionIdentityRow, UserRow, format_ts, read_opt_ts, read_ts,
};
use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, ErrorCode};

const USER_COLUMNS: &str =
    "id, email, password_hash, full_name, is_active, created_at, last_login";

impl Database {
    // -- Users --

    /// Insert a user. Returns `false` when the email is already taken.
    pub fn create_user(
        &self,
        id: &str,
        email: &str,
        password_hash: &str,
        full_name: Option<&str>,
        created_at: DateTime<Utc>,
    ) -> Result<bool> {
        self.with_conn(|conn| {
            let result = conn.execute(
                "INSERT INTO users (id, email, password_hash, full_name, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![id, email, password_hash, full_name, format_ts(created_at)],
            );

            match result {
                Ok(_) => Ok(true),
                Err(rusqlite::Error::SqliteFailure(err, _))
                    if err.code == ErrorCode::ConstraintViolation =>
                {
                    Ok(false)
                }
                Err(e) => Err(e.into()),
            }
        })
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "email = ?1", email))
    }

    pub fn get_active_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "email = ?1 AND is_active = 1", email))
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id = ?1", id))
    }

    pub fn update_last_login(&self, user_id: &str, at: DateTime<Utc>) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE users SET last_login = ?1 WHERE id = ?2",
                rusqlite::params![format_ts(at), user_id],
            )?;
            Ok(())
        })
    }

    /// Replace a stored hash, e.g. after re-hashing under a new scheme.
    pub fn update_password_hash(&self, user_id: &str, password_hash: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users SET password_hash = ?1 WHERE id = ?2",
                rusqlite::params![password_hash, user_id],
            )?;
            Ok(changed > 0)
        })
    }

    /// Flip the active flag. Account administration lives outside this
    /// service; login and session lookup both honour it.
    pub fn set_user_active(&self, user_id: &str, active: bool) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users SET is_active = ?1 WHERE id = ?2",
                rusqlite::params![active, user_id],
            )?;
            Ok(changed > 0)
        })
    }

    // -- Sessions --

    pub fn insert_session(&self, session: &NewSession<'_>) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO sessions (id, user_id, token_digest, expires_at, ip_address, user_agent, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    session.id,
                    session.user_id,
                    session.token_digest,
                    format_ts(session.expires_at),
                    session.ip_address,
                    session.user_agent,
                    format_ts(session.created_at),
                ],
            )?;
            Ok(())
        })
    }

    /// Session + owner for a token digest, only if the session expires
    /// strictly after `now` and the owner is still active.
    pub fn find_live_session(
        &self,
        token_digest: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<SessionIdentityRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT s.id, s.user_id, u.email, u.full_name, s.expires_at
                 FROM sessions s
                 JOIN users u ON s.user_id = u.id
                 WHERE s.token_digest = ?1 AND s.expires_at > ?2 AND u.is_active = 1",
            )?;

            let row = stmt
                .query_row(rusqlite::params![token_digest, format_ts(now)], |row| {
                    Ok(SessionIdentityRow {
                        session_id: row.get(0)?,
                        user_id: row.get(1)?,
                        email: row.get(2)?,
                        full_name: row.get(3)?,
                        expires_at: read_ts(row, 4)?,
                    })
                })
                .optional()?;

            Ok(row)
        })
    }

    /// Move a session's expiry. Returns the number of rows matched.
    pub fn update_session_expiry(&self, token_digest: &str, expires_at: DateTime<Utc>) -> Result<usize> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE sessions SET expires_at = ?1 WHERE token_digest = ?2",
                rusqlite::params![format_ts(expires_at), token_digest],
            )?;
            Ok(changed)
        })
    }

    /// Physically remove sessions that expired before `cutoff`.
    pub fn purge_sessions_expired_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        self.with_conn(|conn| {
            let deleted = conn.execute(
                "DELETE FROM sessions WHERE expires_at < ?1",
                [format_ts(cutoff)],
            )?;
            Ok(deleted)
        })
    }

    pub fn count_sessions_for_user(&self, user_id: &str) -> Result<u64> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM sessions WHERE user_id = ?1",
                [user_id],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
    }

    // -- Files --

    pub fn insert_file(&self, file: &FileRow) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO files (id, user_id, file_name, file_size, file_type, storage_path, is_archived, uploaded_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![
                    file.id,
                    file.user_id,
                    file.file_name,
                    file.file_size,
                    file.file_type,
                    file.storage_path,
                    file.is_archived,
                    format_ts(file.uploaded_at),
                ],
            )?;
            Ok(())
        })
    }

    /// All files owned by a user, newest first.
    pub fn list_files_for_user(&self, user_id: &str) -> Result<Vec<FileRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, file_name, file_size, file_type, storage_path, is_archived, uploaded_at
                 FROM files
                 WHERE user_id = ?1
                 ORDER BY uploaded_at DESC",
            )?;

            let rows = stmt
                .query_map([user_id], |row| {
                    Ok(FileRow {
                        id: row.get(0)?,
                        user_id: row.get(1)?,
                        file_name: row.get(2)?,
                        file_size: row.get(3)?,
                        file_type: row.get(4)?,
                        storage_path: row.get(5)?,
                        is_archived: row.get(6)?,
                        uploaded_at: read_ts(row, 7)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    /// Archive a file if it belongs to `user_id`. Returns whether a row matched.
    pub fn archive_file(&self, file_id: &str, user_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE files SET is_archived = 1 WHERE id = ?1 AND user_id = ?2",
                [file_id, user_id],
            )?;
            Ok(changed > 0)
        })
    }
}

fn query_user(conn: &Connection, filter: &str, value: &str) -> Result<Option<UserRow>> {
    let sql = format!("SELECT {} FROM users WHERE {}", USER_COLUMNS, filter);
    let mut stmt = conn.prepare(&sql)?;

    let row = stmt
        .query_row([value], |row| {
            Ok(UserRow {
                id: row.get(0)?,
                email: row.get(1)?,
                password_hash: row.get(2)?,
                full_name: row.get(3)?,
                is_active: row.get(4)?,
                created_at: read_ts(row, 5)?,
                last_login: read_opt_ts(row, 6)?,
            })
        })
        .optional()?;

    Ok(row)
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use uuid::Uuid;

    fn new_id() -> String {
        Uuid::new_v4().to_string()
    }

    fn seed_user(db: &Database, email: &str) -> String {
        let id = new_id();
        assert!(db.create_user(&id, email, "salt$hash", None, Utc::now()).unwrap());
        id
    }

    fn seed_session(db: &Database, user_id: &str, digest: &str, expires_at: DateTime<Utc>) {
        let id = new_id();
        db.insert_session(&NewSession {
            id: &id,
            user_id,
            token_digest: digest,
            expires_at,
            ip_address: "127.0.0.1",
            user_agent: "test",
            created_at: Utc::now(),
        })
        .unwrap();
    }

    fn file_row(user_id: &str, name: &str, uploaded_at: DateTime<Utc>) -> FileRow {
        FileRow {
            id: new_id(),
            user_id: user_id.to_string(),
            file_name: name.to_string(),
            file_size: 3,
            file_type: "text/plain".to_string(),
            storage_path: format!("files/{}/{}", user_id, name),
            is_archived: false,
            uploaded_at,
        }
    }

    #[test]
    fn duplicate_email_is_reported_not_raised() {
        let db = Database::open_in_memory().unwrap();
        seed_user(&db, "a@example.com");

        let inserted = db
            .create_user(&new_id(), "a@example.com", "x$y", None, Utc::now())
            .unwrap();
        assert!(!inserted);
    }

    #[test]
    fn inactive_users_are_hidden_from_active_lookup() {
        let db = Database::open_in_memory().unwrap();
        let id = seed_user(&db, "a@example.com");

        assert!(db.get_active_user_by_email("a@example.com").unwrap().is_some());
        assert!(db.set_user_active(&id, false).unwrap());
        assert!(db.get_active_user_by_email("a@example.com").unwrap().is_none());
        assert!(db.get_user_by_email("a@example.com").unwrap().is_some());
    }

    #[test]
    fn password_hash_can_be_replaced() {
        let db = Database::open_in_memory().unwrap();
        let id = seed_user(&db, "alice@example.com");

        assert!(db.update_password_hash(&id, "$argon2id$new").unwrap());
        assert_eq!(db.get_user_by_id(&id).unwrap().unwrap().password_hash, "$argon2id$new");
        assert!(!db.update_password_hash("missing", "x").unwrap());
    }

    #[test]
    fn last_login_is_recorded() {
        let db = Database::open_in_memory().unwrap();
        let id = seed_user(&db, "a@example.com");
        assert!(db.get_user_by_id(&id).unwrap().unwrap().last_login.is_none());

        let at = Utc::now();
        db.update_last_login(&id, at).unwrap();

        let user = db.get_user_by_id(&id).unwrap().unwrap();
        assert_eq!(user.last_login.map(format_ts), Some(format_ts(at)));
    }

    #[test]
    fn live_session_requires_future_expiry() {
        let db = Database::open_in_memory().unwrap();
        let user_id = seed_user(&db, "a@example.com");
        let now = Utc::now();
        seed_session(&db, &user_id, "live", now + Duration::hours(1));
        seed_session(&db, &user_id, "dead", now - Duration::seconds(1));
        seed_session(&db, &user_id, "edge", now);

        let found = db.find_live_session("live", now).unwrap().unwrap();
        assert_eq!(found.user_id, user_id);
        assert_eq!(found.email, "a@example.com");
        assert!(db.find_live_session("dead", now).unwrap().is_none());
        assert!(db.find_live_session("edge", now).unwrap().is_none());
        assert!(db.find_live_session("missing", now).unwrap().is_none());
    }

    #[test]
    fn expiry_update_reports_matches() {
        let db = Database::open_in_memory().unwrap();
        let user_id = seed_user(&db, "a@example.com");
        let now = Utc::now();
        seed_session(&db, &user_id, "tok", now + Duration::days(7));

        assert_eq!(db.update_session_expiry("tok", now).unwrap(), 1);
        assert_eq!(db.update_session_expiry("other", now).unwrap(), 0);
        assert!(db.find_live_session("tok", now).unwrap().is_none());
    }

    #[test]
    fn purge_only_removes_old_sessions() {
        let db = Database::open_in_memory().unwrap();
        let user_id = seed_user(&db, "a@example.com");
        let now = Utc::now();
        seed_session(&db, &user_id, "ancient", now - Duration::days(100));
        seed_session(&db, &user_id, "recent", now - Duration::days(1));
        seed_session(&db, &user_id, "live", now + Duration::days(1));

        let purged = db.purge_sessions_expired_before(now - Duration::days(30)).unwrap();
        assert_eq!(purged, 1);
        assert_eq!(db.count_sessions_for_user(&user_id).unwrap(), 2);
    }

    #[test]
    fn files_list_newest_first_and_archive_checks_owner() {
        let db = Database::open_in_memory().unwrap();
        let alice = seed_user(&db, "alice@example.com");
        let bob = seed_user(&db, "bob@example.com");
        let now = Utc::now();

        let older = file_row(&alice, "old.txt", now - Duration::minutes(5));
        let newer = file_row(&alice, "new.txt", now);
        db.insert_file(&older).unwrap();
        db.insert_file(&newer).unwrap();
        db.insert_file(&file_row(&bob, "bob.txt", now)).unwrap();

        let files = db.list_files_for_user(&alice).unwrap();
        let names: Vec<_> = files.iter().map(|f| f.file_name.as_str()).collect();
        assert_eq!(names, ["new.txt", "old.txt"]);

        assert!(!db.archive_file(&older.id, &bob).unwrap());
        assert!(db.archive_file(&older.id, &alice).unwrap());

        let files = db.list_files_for_user(&alice).unwrap();
        assert!(files.iter().find(|f| f.id == older.id).unwrap().is_archived);
        assert!(!files.iter().find(|f| f.id == newer.id).unwrap().is_archived);
    }
}
