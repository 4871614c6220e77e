use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 =
        conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))?;

    if version < 1 {
        info!("Running migration v1 (users, sessions, files)");
        conn.execute_batch(
            "
            CREATE TABLE users (
                id              TEXT PRIMARY KEY,
                email           TEXT NOT NULL UNIQUE,
                password_hash   TEXT NOT NULL,
                full_name       TEXT,
                is_active       INTEGER NOT NULL DEFAULT 1,
                created_at      TEXT NOT NULL,
                last_login      TEXT
            );

            CREATE TABLE sessions (
                id              TEXT PRIMARY KEY,
                user_id         TEXT NOT NULL REFERENCES users(id),
                token_digest    TEXT NOT NULL UNIQUE,
                expires_at      TEXT NOT NULL,
                ip_address      TEXT,
                user_agent      TEXT,
                created_at      TEXT NOT NULL
            );

            CREATE INDEX idx_sessions_user ON sessions(user_id);
            CREATE INDEX idx_sessions_expires ON sessions(expires_at);

            CREATE TABLE files (
                id              TEXT PRIMARY KEY,
                user_id         TEXT NOT NULL REFERENCES users(id),
                file_name       TEXT NOT NULL,
                file_size       INTEGER NOT NULL,
                file_type       TEXT NOT NULL,
                storage_path    TEXT NOT NULL,
                is_archived     INTEGER NOT NULL DEFAULT 0,
                uploaded_at     TEXT NOT NULL
            );

            CREATE INDEX idx_files_user ON files(user_id, uploaded_at);

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
