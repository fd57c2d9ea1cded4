/// Session authentication middleware for Axum
///
/// Verifies the Supabase session on every request, provisions or refreshes
/// the local user row, and adds an [`AuthContext`] to request extensions.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use axum::{middleware, routing::get, Extension, Router};
/// use changemaker_shared::auth::middleware::{session_auth, AuthContext, SessionAuthState};
/// use sqlx::PgPool;
///
/// async fn whoami(Extension(auth): Extension<AuthContext>) -> String {
///     format!("Hello, {}!", auth.email)
/// }
///
/// fn router(pool: PgPool) -> Router {
///     let state = SessionAuthState {
///         pool,
///         jwt_secret: Arc::from("project-jwt-secret-of-at-least-32-chars"),
///         audience: Arc::from("authenticated"),
///     };
///
///     Router::new()
///         .route("/whoami", get(whoami))
///         .layer(middleware::from_fn_with_state(state, session_auth))
/// }
/// ```

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::{debug, error};
use uuid::Uuid;

use super::session::{extract_token, verify_access_token, SessionError};
use crate::models::user::User;

/// Authenticated caller, added to request extensions
///
/// Handlers extract it with `Extension<AuthContext>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthContext {
    /// Local user ID
    pub user_id: Uuid,

    /// Supabase auth user ID
    pub supabase_user_id: Uuid,

    pub email: String,

    /// Platform admins pass every workspace check
    pub is_platform_admin: bool,
}

impl From<&User> for AuthContext {
    fn from(user: &User) -> Self {
        Self {
            user_id: user.id,
            supabase_user_id: user.supabase_user_id,
            email: user.email.clone(),
            is_platform_admin: user.is_platform_admin,
        }
    }
}

/// Error type for authentication middleware
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// No bearer header or session cookie
    #[error("Missing credentials")]
    MissingCredentials,

    /// Token verification failed
    #[error("{0}")]
    InvalidToken(String),

    /// Database error while provisioning the user
    #[error("Database error: {0}")]
    DatabaseError(String),
}

impl From<SessionError> for AuthError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Expired => AuthError::InvalidToken("Session expired".to_string()),
            SessionError::InvalidAudience => {
                AuthError::InvalidToken("Invalid session audience".to_string())
            }
            other => AuthError::InvalidToken(format!("Invalid session: {}", other)),
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, error, message) = match &self {
            AuthError::MissingCredentials => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                "Missing credentials".to_string(),
            ),
            AuthError::InvalidToken(msg) => (StatusCode::UNAUTHORIZED, "unauthorized", msg.clone()),
            AuthError::DatabaseError(msg) => {
                error!(error = %msg, "Session lookup failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "Internal server error".to_string(),
                )
            }
        };

        (
            status,
            Json(serde_json::json!({ "error": error, "message": message })),
        )
            .into_response()
    }
}

/// State the session middleware needs
#[derive(Clone)]
pub struct SessionAuthState {
    pub pool: PgPool,

    /// Supabase project JWT secret
    pub jwt_secret: Arc<str>,

    /// Expected `aud` claim
    pub audience: Arc<str>,
}

/// Resolves the caller from their Supabase session
///
/// # Errors
///
/// Returns 401 Unauthorized if the token is missing, malformed, expired, has
/// the wrong audience, or carries no email. Returns 500 if the user row
/// cannot be written.
pub async fn session_auth(
    State(state): State<SessionAuthState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let token = extract_token(req.headers()).ok_or(AuthError::MissingCredentials)?;

    let claims = verify_access_token(&token, &state.jwt_secret, &state.audience)?;

    let email = claims
        .email
        .as_deref()
        .filter(|e| !e.trim().is_empty())
        .ok_or_else(|| AuthError::InvalidToken("Session has no email".to_string()))?;

    let user = User::upsert_from_session(&state.pool, claims.sub, email)
        .await
        .map_err(|e| AuthError::DatabaseError(e.to_string()))?;

    debug!(user_id = %user.id, "Authenticated session");

    req.extensions_mut().insert(AuthContext::from(&user));
    Ok(next.run(req).await)
}
