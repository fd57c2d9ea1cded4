/// RewardSTACK webhook receiver
///
/// `POST /api/webhooks/rewardstack` is public but every delivery must carry
/// a valid `X-RewardStack-Signature` over the raw body. Valid deliveries are
/// always acknowledged with `200 OK`, including ones that change nothing, so
/// the sender stops redelivering them.

use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
};
use axum::{extract::State, http::HeaderMap, Json};
use bytes::Bytes;
use changemaker_shared::rewards::{
    issuance::WebhookOutcome,
    webhook::{verify_signature, WebhookEvent, SIGNATURE_HEADER},
};

/// Checks the delivery signature against the configured secret
fn authenticate(secret: Option<&str>, headers: &HeaderMap, body: &[u8]) -> ApiResult<()> {
    let Some(secret) = secret.filter(|s| !s.is_empty()) else {
        tracing::warn!("Webhook received but REWARDSTACK_WEBHOOK_SECRET is not set");
        return Err(ApiError::Unauthorized(
            "Webhook signing is not configured".to_string(),
        ));
    };

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::Unauthorized("Missing webhook signature".to_string()))?;

    if !verify_signature(secret, body, signature) {
        return Err(ApiError::Unauthorized("Invalid webhook signature".to_string()));
    }
    Ok(())
}

pub async fn rewardstack_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<WebhookOutcome>> {
    authenticate(
        state.config.rewardstack.webhook_secret.as_deref(),
        &headers,
        &body,
    )?;

    let event: WebhookEvent = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("Malformed webhook payload: {}", e)))?;

    let outcome = state.rewards.apply_webhook(&event).await?;

    match &outcome {
        WebhookOutcome::Handled { issuance_id, status } => tracing::info!(
            event_type = %event.event_type,
            issuance_id = %issuance_id,
            status = status.as_str(),
            "Webhook applied"
        ),
        WebhookOutcome::Ignored { reason } => tracing::info!(
            event_type = %event.event_type,
            delivery_id = ?event.id,
            reason = %reason,
            "Webhook ignored"
        ),
    }

    Ok(Json(outcome))
}
