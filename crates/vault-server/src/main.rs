mod cleanup;
mod config;

use std::net::SocketAddr;
use std::sync::Arc;

use chrono::Duration;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use vault_api::auth::AuthService;
use vault_api::files::FileService;
use vault_api::storage::{LocalStore, ObjectStore};
use vault_api::{AppState, AppStateInner};
use vault_crypto::CredentialHasher;
use vault_db::Database;

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vault=debug,vault_api=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    let db = Arc::new(Database::open(&config.db_path)?);

    let local = LocalStore::new(config.storage_dir.clone()).await?;
    let bucket_dir = ServeDir::new(local.root());
    let store: Arc<dyn ObjectStore> = Arc::new(local);

    if config.session_retention_days > 0 {
        tokio::spawn(cleanup::run_session_sweep(
            db.clone(),
            config.session_retention_days,
            3600,
        ));
    }

    let auth = AuthService::new(
        db.clone(),
        CredentialHasher::new(config.password_scheme),
        Duration::hours(config.session_ttl_hours),
        config.min_password_len,
    );
    let files = FileService::new(
        db.clone(),
        store.clone(),
        config.public_base_url.clone(),
        config.max_upload_bytes,
    );
    let state: AppState = Arc::new(AppStateInner { db, auth, files });

    let app = vault_api::router(state)
        .nest_service("/bucket", bucket_dir)
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Vault server listening on {}", addr);
    info!(
        "Storage: {} | passwords: {} | sessions: {}h",
        store.backend(),
        config.password_scheme,
        config.session_ttl_hours
    );
    if config.session_retention_days == 0 {
        info!("Session sweep disabled; expired sessions are kept");
    }

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                warn!("Could not install SIGTERM handler: {}", e);
                ctrl_c.await.ok();
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
