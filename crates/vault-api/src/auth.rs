use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json,
    body::to_bytes,
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, header},
    response::{IntoResponse, Response},
};
use chrono::{Duration, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use vault_crypto::CredentialHasher;
use vault_db::Database;
use vault_types::api::{
    AuthAction, LoginResponse, RegisterResponse, SuccessResponse, VerifyResponse,
};
use vault_types::models::{ClientMetadata, Identity, PublicUser};

use crate::error::ApiError;
use crate::session::{DEFAULT_SESSION_TTL_HOURS, SessionStore};
use crate::state::{AppState, run_blocking};

/// Minimum password length accepted at registration.
pub const DEFAULT_MIN_PASSWORD_LEN: usize = 6;

/// Auth payloads are tiny; anything bigger is not a valid action.
const MAX_AUTH_BODY: usize = 64 * 1024;

const INVALID_CREDENTIALS: &str = "Invalid email or password";
const INVALID_SESSION: &str = "Invalid or expired session";

/// Outcome of a successful login.
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub token: String,
    pub user: PublicUser,
}

/// Registration, login, verification and logout on top of the credential
/// hasher and the session store.
pub struct AuthService {
    db: Arc<Database>,
    hasher: CredentialHasher,
    sessions: SessionStore,
    min_password_len: usize,
}

impl AuthService {
    pub fn new(
        db: Arc<Database>,
        hasher: CredentialHasher,
        session_ttl: Duration,
        min_password_len: usize,
    ) -> Self {
        let sessions = SessionStore::new(db.clone(), session_ttl);
        Self {
            db,
            hasher,
            sessions,
            min_password_len,
        }
    }

    /// Service with the stock settings: PBKDF2, 7-day sessions, 6-char passwords.
    pub fn with_defaults(db: Arc<Database>) -> Self {
        Self::new(
            db,
            CredentialHasher::default(),
            Duration::hours(DEFAULT_SESSION_TTL_HOURS),
            DEFAULT_MIN_PASSWORD_LEN,
        )
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn register(
        &self,
        email: &str,
        password: &str,
        full_name: &str,
    ) -> Result<PublicUser, ApiError> {
        let email = normalize_email(email);
        if email.is_empty() || password.is_empty() {
            return Err(ApiError::validation("Email and password are required"));
        }
        if password.chars().count() < self.min_password_len {
            return Err(ApiError::Validation(format!(
                "Password must be at least {} characters",
                self.min_password_len
            )));
        }

        if self.db.get_user_by_email(&email)?.is_some() {
            return Err(ApiError::Conflict("A user with this email already exists".into()));
        }

        let password_hash = self.hasher.hash(password)?;
        let full_name = Some(full_name.trim()).filter(|n| !n.is_empty());
        let user_id = Uuid::new_v4();
        let created_at = Utc::now();

        let inserted = self.db.create_user(
            &user_id.to_string(),
            &email,
            &password_hash,
            full_name,
            created_at,
        )?;
        if !inserted {
            return Err(ApiError::Conflict("A user with this email already exists".into()));
        }

        info!("Registered user {} ({})", user_id, email);
        Ok(PublicUser {
            id: user_id,
            email,
            full_name: full_name.map(str::to_string),
            created_at: Some(created_at),
        })
    }

    pub fn login(
        &self,
        email: &str,
        password: &str,
        client: &ClientMetadata,
    ) -> Result<LoginOutcome, ApiError> {
        let email = normalize_email(email);
        if email.is_empty() || password.is_empty() {
            return Err(ApiError::validation("Email and password are required"));
        }

        let Some(user) = self.db.get_active_user_by_email(&email)? else {
            // Same work as a real check, so timing does not reveal the account.
            self.hasher.burn(password);
            warn!("Failed login for {}", email);
            return Err(ApiError::Auth(INVALID_CREDENTIALS));
        };

        if !self.hasher.verify(password, &user.password_hash) {
            warn!("Failed login for {}", email);
            return Err(ApiError::Auth(INVALID_CREDENTIALS));
        }

        let user_id: Uuid = user
            .id
            .parse()
            .map_err(|e| anyhow::anyhow!("User row {} has a malformed id: {}", user.id, e))?;

        if self.hasher.needs_rehash(&user.password_hash) {
            let upgraded = self.hasher.hash(password)?;
            self.db.update_password_hash(&user.id, &upgraded)?;
            info!("Re-hashed password for user {} under the configured scheme", user_id);
        }

        let issued = self.sessions.issue(user_id, client)?;
        self.db.update_last_login(&user.id, Utc::now())?;

        info!("User {} logged in from {}", user_id, client.ip_address);
        Ok(LoginOutcome {
            token: issued.token,
            user: PublicUser {
                id: user_id,
                email: user.email,
                full_name: user.full_name,
                created_at: None,
            },
        })
    }

    pub fn verify(&self, token: &str) -> Result<Identity, ApiError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(ApiError::validation("Token required"));
        }

        self.sessions
            .resolve(token)?
            .ok_or(ApiError::Auth(INVALID_SESSION))
    }

    /// Revoke a session. Reports success even when nothing matched, so the
    /// response says nothing about the token's state.
    pub fn logout(&self, token: &str) -> Result<(), ApiError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(ApiError::validation("Token required"));
        }

        if self.sessions.invalidate(token)? {
            info!("Session revoked");
        } else {
            tracing::debug!("Logout for a token with no session row");
        }
        Ok(())
    }
}

/// Trimmed, lower-cased email: the form used for lookups and storage.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// POST /auth: dispatches on the body's `action` field.
pub async fn auth_action(
    State(state): State<AppState>,
    request: Request,
) -> Result<Response, ApiError> {
    let client = client_metadata(
        request.headers(),
        request.extensions().get::<ConnectInfo<SocketAddr>>(),
    );

    let body = to_bytes(request.into_body(), MAX_AUTH_BODY)
        .await
        .map_err(|_| ApiError::validation("Invalid action"))?;
    let action: AuthAction =
        serde_json::from_slice(&body).map_err(|_| ApiError::validation("Invalid action"))?;

    let response = match action {
        AuthAction::Register(req) => {
            let user = run_blocking(move || {
                state.auth.register(&req.email, &req.password, &req.full_name)
            })
            .await?;
            Json(RegisterResponse {
                success: true,
                user,
            })
            .into_response()
        }
        AuthAction::Login(req) => {
            let outcome =
                run_blocking(move || state.auth.login(&req.email, &req.password, &client)).await?;
            Json(LoginResponse {
                success: true,
                token: outcome.token,
                user: outcome.user,
            })
            .into_response()
        }
        AuthAction::Verify(req) => {
            let user = run_blocking(move || state.auth.verify(&req.token)).await?;
            Json(VerifyResponse { valid: true, user }).into_response()
        }
        AuthAction::Logout(req) => {
            run_blocking(move || state.auth.logout(&req.token)).await?;
            Json(SuccessResponse::ok()).into_response()
        }
    };

    Ok(response)
}

/// Client address and agent for the session audit columns. A proxy's
/// `X-Forwarded-For` wins over the socket peer.
fn client_metadata(headers: &HeaderMap, peer: Option<&ConnectInfo<SocketAddr>>) -> ClientMetadata {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string);

    let ip_address = forwarded
        .or_else(|| peer.map(|ConnectInfo(addr)| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".into());

    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .unwrap_or("unknown")
        .to_string();

    ClientMetadata {
        ip_address,
        user_agent,
    }
}
