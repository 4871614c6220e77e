use axum::{
    extract::{Request, State},
    http::{HeaderMap, HeaderName, header},
    middleware::Next,
    response::Response,
};

use vault_types::models::Identity;

use crate::error::ApiError;
use crate::session::SessionStore;
use crate::state::{AppState, run_blocking};

/// Header the web client sends the session token in.
pub const X_AUTHORIZATION: HeaderName = HeaderName::from_static("x-authorization");

/// Turn a raw header value into a trusted identity.
///
/// A leading `Bearer ` is optional. Never reveals why a token was refused
/// beyond "missing" versus "invalid".
pub fn authorize(sessions: &SessionStore, raw_header_value: &str) -> Result<Identity, ApiError> {
    let raw = raw_header_value.trim_start();
    let token = raw.strip_prefix("Bearer ").unwrap_or(raw).trim();
    if token.is_empty() {
        return Err(ApiError::Unauthorized("Unauthorized"));
    }

    sessions
        .resolve(token)?
        .ok_or(ApiError::Unauthorized("Invalid token"))
}

/// Raw credential from `X-Authorization`, falling back to `Authorization`.
pub fn bearer_header(headers: &HeaderMap) -> String {
    headers
        .get(X_AUTHORIZATION)
        .or_else(|| headers.get(header::AUTHORIZATION))
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

/// Resolve the caller's session and attach their [`Identity`] to the request.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let raw = bearer_header(req.headers());
    let identity = run_blocking(move || authorize(state.auth.sessions(), &raw)).await?;

    req.extensions_mut().insert(identity);
    Ok(next.run(req).await)
}
