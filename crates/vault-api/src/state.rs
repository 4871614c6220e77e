use std::sync::Arc;

use anyhow::anyhow;
use tracing::error;

use vault_db::Database;

use crate::auth::AuthService;
use crate::error::ApiError;
use crate::files::FileService;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub auth: AuthService,
    pub files: FileService,
}

/// Run store or hashing work off the async executor.
pub(crate) async fn run_blocking<F, T>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, ApiError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        ApiError::Storage(anyhow!("blocking task failed"))
    })?
}
