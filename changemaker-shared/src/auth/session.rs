/// Supabase session token verification
///
/// Supabase signs user access tokens with the project's JWT secret (HS256).
/// We never issue sessions ourselves; we only verify the token the browser
/// sends, either as `Authorization: Bearer <token>` or in the
/// `sb-access-token` cookie.
///
/// # Validation
///
/// - **Algorithm**: HS256 only
/// - **Expiration**: `exp` is required and enforced
/// - **Audience**: must match the configured audience (`authenticated`)
///
/// # Example
///
/// ```
/// use changemaker_shared::auth::session::{create_token, verify_access_token, SupabaseClaims};
/// use uuid::Uuid;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let secret = "super-secret-jwt-token-with-at-least-32-characters";
/// let claims = SupabaseClaims::new(Uuid::new_v4(), "ada@example.com", "authenticated");
/// let token = create_token(&claims, secret)?;
///
/// let verified = verify_access_token(&token, secret, "authenticated")?;
/// assert_eq!(verified.sub, claims.sub);
/// # Ok(())
/// # }
/// ```

use axum::http::{header, HeaderMap};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Cookie Supabase auth helpers store the access token in
pub const SESSION_COOKIE: &str = "sb-access-token";

/// Error type for session verification
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Failed to sign a token
    #[error("Failed to create token: {0}")]
    CreateError(String),

    /// Token has expired
    #[error("Token has expired")]
    Expired,

    /// Audience claim doesn't match
    #[error("Invalid token audience")]
    InvalidAudience,

    /// Signature, format or claims are invalid
    #[error("Invalid token: {0}")]
    Invalid(String),
}

/// Claims carried by a Supabase access token
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SupabaseClaims {
    /// Supabase auth user ID
    pub sub: Uuid,

    /// Account email
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// Audience, `authenticated` for signed-in users
    pub aud: String,

    /// Expiration (Unix timestamp)
    pub exp: i64,

    /// Issued at (Unix timestamp)
    pub iat: i64,

    /// Postgres role Supabase assigns to the session
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

impl SupabaseClaims {
    /// Claims for a one-hour session, matching Supabase's default lifetime
    pub fn new(sub: Uuid, email: impl Into<String>, audience: impl Into<String>) -> Self {
        let now = Utc::now();
        let audience = audience.into();
        Self {
            sub,
            email: Some(email.into()),
            role: Some(audience.clone()),
            aud: audience,
            iat: now.timestamp(),
            exp: (now + Duration::hours(1)).timestamp(),
        }
    }

    /// Overrides the expiration relative to now
    pub fn expires_in(mut self, duration: Duration) -> Self {
        self.exp = (Utc::now() + duration).timestamp();
        self
    }
}

/// Signs claims with the project secret
///
/// The API never hands these out; this exists for tests and local tooling
/// that need a session without a running Supabase.
pub fn create_token(claims: &SupabaseClaims, secret: &str) -> Result<String, SessionError> {
    let key = EncodingKey::from_secret(secret.as_bytes());
    encode(&Header::new(Algorithm::HS256), claims, &key)
        .map_err(|e| SessionError::CreateError(e.to_string()))
}

/// Verifies a Supabase access token and returns its claims
///
/// # Errors
///
/// - `SessionError::Expired` if `exp` has passed
/// - `SessionError::InvalidAudience` if `aud` doesn't match
/// - `SessionError::Invalid` for bad signatures, algorithms or shapes
pub fn verify_access_token(
    token: &str,
    secret: &str,
    audience: &str,
) -> Result<SupabaseClaims, SessionError> {
    let key = DecodingKey::from_secret(secret.as_bytes());

    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_audience(&[audience]);
    validation.set_required_spec_claims(&["exp", "sub", "aud"]);
    validation.validate_exp = true;

    let token_data = decode::<SupabaseClaims>(token, &key, &validation).map_err(|e| match e.kind() {
        ErrorKind::ExpiredSignature => SessionError::Expired,
        ErrorKind::InvalidAudience => SessionError::InvalidAudience,
        _ => SessionError::Invalid(e.to_string()),
    })?;

    Ok(token_data.claims)
}

/// Pulls the session token out of request headers
///
/// The `Authorization: Bearer` header wins over the session cookie.
pub fn extract_token(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty());

    if let Some(token) = bearer {
        return Some(token.to_string());
    }

    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == SESSION_COOKIE && !value.is_empty())
        .map(|(_, value)| value.to_string())
}
