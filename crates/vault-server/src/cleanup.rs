use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};

use vault_db::Database;

/// Background task that drops session rows that expired more than
/// `retention_days` ago. Expired sessions already fail verification, so
/// this only keeps the table from growing forever.
pub async fn run_session_sweep(db: Arc<Database>, retention_days: i64, interval_secs: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));

    loop {
        interval.tick().await;

        let cutoff = Utc::now() - chrono::Duration::days(retention_days);
        let db = db.clone();
        match tokio::task::spawn_blocking(move || db.purge_sessions_expired_before(cutoff)).await {
            Ok(Ok(count)) => {
                if count > 0 {
                    info!("Session sweep: purged {} expired sessions", count);
                }
            }
            Ok(Err(e)) => warn!("Session sweep error: {}", e),
            Err(e) => warn!("Session sweep task failed: {}", e),
        }
    }
}
