/// Rate limiting for the AI email composer
///
/// Each user may start `ai.requests_per_window` generations per
/// `ai.window_secs`, counted by a process-local sliding window. With several
/// API instances each one enforces the limit separately.
///
/// # Headers
///
/// - `X-RateLimit-Limit`: generations allowed per window
/// - `X-RateLimit-Remaining`: generations left in the current window
/// - `Retry-After`: seconds to wait (429 responses only)

use crate::app::AppState;
use crate::error::ApiError;
use axum::{
    extract::{Extension, Request, State},
    http::HeaderValue,
    middleware::Next,
    response::Response,
};
use changemaker_shared::ai::rate_limit::RateDecision;
use changemaker_shared::auth::middleware::AuthContext;

/// Limiter key for a user
pub fn limiter_key(auth: &AuthContext) -> String {
    format!("ai:user:{}", auth.user_id)
}

/// Rejects the request with 429 when the caller is over their AI limit
///
/// Must run after session authentication.
pub async fn ai_rate_limit(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let decision = state.ai_limiter.check(&limiter_key(&auth));

    if !decision.allowed {
        tracing::info!(
            user_id = %auth.user_id,
            retry_after = decision.retry_after_secs(),
            "AI generation rate limited"
        );
        return Err(rate_limit_error(&decision));
    }

    let mut response = next.run(request).await;

    let headers = response.headers_mut();
    headers.insert(
        "X-RateLimit-Limit",
        HeaderValue::from(state.ai_limiter.limit()),
    );
    headers.insert(
        "X-RateLimit-Remaining",
        HeaderValue::from(decision.remaining),
    );

    Ok(response)
}

/// Creates a rate limit exceeded error response
pub fn rate_limit_error(decision: &RateDecision) -> ApiError {
    let retry_after = decision.retry_after_secs();
    ApiError::RateLimitExceeded {
        retry_after,
        message: format!(
            "Too many AI generations. Try again in {} seconds",
            retry_after
        ),
    }
}
