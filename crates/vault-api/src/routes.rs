use std::time::Duration;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{
        Method,
        header::{AUTHORIZATION, CONTENT_TYPE},
    },
    middleware,
    routing::{get, post},
};
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::auth;
use crate::files;
use crate::middleware::{X_AUTHORIZATION, require_auth};
use crate::state::AppState;

/// Both handlers on one router: `POST /auth`, `GET|POST|PUT /files`,
/// `GET /health`.
pub fn router(state: AppState) -> Router {
    let auth_routes = Router::new()
        .route("/auth", post(auth::auth_action))
        .with_state(state.clone());

    let file_routes = Router::new()
        .route(
            "/files",
            get(files::list_files)
                .post(files::upload_file)
                .put(files::archive_file),
        )
        .layer(DefaultBodyLimit::max(state.files.max_request_bytes()))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .with_state(state);

    Router::new()
        .route("/health", get(health))
        .merge(auth_routes)
        .merge(file_routes)
        .layer(cors())
}

/// Browsers call both handlers cross-origin.
fn cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::any())
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE, AUTHORIZATION, X_AUTHORIZATION])
        .max_age(Duration::from_secs(86_400))
}

async fn health() -> &'static str {
    "ok"
}
