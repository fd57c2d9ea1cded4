/// AI email composer
///
/// - `POST /api/workspaces/:slug/emails/ai/generate` - admins; streams a draft as SSE
/// - `GET /api/workspaces/:slug/emails/ai/usage` - admins; today's spend
///
/// The generate route sits behind the per-user limiter in
/// `middleware::rate_limit`. The per-workspace daily budget is checked here
/// before the provider is called.
///
/// # Event stream
///
/// ```text
/// event: token
/// data: {"text":"Hi "}
///
/// event: done
/// data: {"usage":{"prompt_tokens":120,"completion_tokens":340},"cost_usd":0.00022}
/// ```
///
/// A provider failure mid-stream ends with a single `error` event.

use super::admin_workspace;
use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
};
use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
    Extension, Json,
};
use changemaker_shared::{
    ai::{
        cost::{CostTracker, UsageSnapshot},
        provider::{ChatMessage, CompletionChunk, CompletionRequest, CompletionStream, TokenUsage},
    },
    auth::middleware::AuthContext,
    models::{challenge::Challenge, email_template::EmailTemplateType, workspace::Workspace},
};
use chrono::{DateTime, Duration, Utc};
use futures::{
    stream::{self, Stream},
    StreamExt,
};
use serde::{Deserialize, Serialize};
use std::{convert::Infallible, sync::Arc};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct GenerateEmailRequest {
    /// What the email should say
    #[validate(length(min = 1, max = 2000, message = "Prompt must be 1-2000 characters"))]
    pub prompt: String,

    #[validate(length(max = 50, message = "Tone must be at most 50 characters"))]
    pub tone: Option<String>,

    /// Kind of email being drafted
    pub template_type: Option<EmailTemplateType>,

    /// Adds the challenge's title and dates to the context
    pub challenge_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct UsageResponse {
    pub enabled: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(flatten)]
    pub usage: UsageSnapshot,
}

const SYSTEM_PROMPT: &str = "You write short, friendly emails for community organizers. \
Reply with the email body only, as simple HTML using <p>, <strong>, <em> and <ul> tags. \
Do not include a subject line, greeting placeholders or a signature. \
You may use {{ recipient_name }} where the recipient's name belongs.";

/// Builds the chat messages for a draft
fn build_messages(
    workspace: &Workspace,
    challenge: Option<&Challenge>,
    req: &GenerateEmailRequest,
) -> Vec<ChatMessage> {
    let mut context = format!("Organization: {}", workspace.name);
    if let Some(description) = workspace.description.as_deref().filter(|d| !d.is_empty()) {
        context.push_str(&format!("\nAbout: {}", description));
    }
    if let Some(challenge) = challenge {
        context.push_str(&format!(
            "\nChallenge: {} (runs {} to {})",
            challenge.title,
            challenge.starts_at.format("%B %-d, %Y"),
            challenge.ends_at.format("%B %-d, %Y")
        ));
    }
    if let Some(template_type) = req.template_type {
        context.push_str(&format!("\nEmail kind: {}", template_type.as_str()));
    }
    if let Some(tone) = req.tone.as_deref().filter(|t| !t.trim().is_empty()) {
        context.push_str(&format!("\nTone: {}", tone.trim()));
    }

    vec![
        ChatMessage::system(SYSTEM_PROMPT),
        ChatMessage::user(format!("{}\n\nRequest: {}", context, req.prompt)),
    ]
}

/// Seconds until the daily budget resets
fn seconds_until_utc_midnight(now: DateTime<Utc>) -> u64 {
    let tomorrow = now.date_naive() + Duration::days(1);
    let midnight = tomorrow.and_hms_opt(0, 0, 0).map(|t| t.and_utc());
    midnight
        .map(|m| (m - now).num_seconds().max(1) as u64)
        .unwrap_or(1)
}

/// Rough token count for text the provider never reported usage for
fn estimate_tokens(text: &str) -> u32 {
    (text.chars().count() as u32).div_ceil(4)
}

/// Forwards provider chunks as SSE events and books the usage exactly once
///
/// Usage is booked when the stream ends, when the provider fails, or when
/// the client goes away and the relay is dropped. Without a usage chunk
/// from the provider the tokens are estimated from the text.
struct Relay {
    inner: CompletionStream,
    costs: Arc<CostTracker>,
    workspace_id: Uuid,
    prompt_estimate: u32,
    streamed: String,
    usage: Option<TokenUsage>,
    finished: bool,
    booked: bool,
}

impl Relay {
    fn new(
        inner: CompletionStream,
        costs: Arc<CostTracker>,
        workspace_id: Uuid,
        prompt_estimate: u32,
    ) -> Self {
        Self {
            inner,
            costs,
            workspace_id,
            prompt_estimate,
            streamed: String::new(),
            usage: None,
            finished: false,
            booked: false,
        }
    }

    fn book(&mut self) -> (TokenUsage, f64) {
        self.booked = true;
        let usage = self.usage.unwrap_or(TokenUsage {
            prompt_tokens: self.prompt_estimate,
            completion_tokens: estimate_tokens(&self.streamed),
        });
        let cost_usd = self.costs.record(self.workspace_id, &usage);
        (usage, cost_usd)
    }

    fn finish(&mut self) -> Event {
        self.finished = true;
        let (usage, cost_usd) = self.book();
        tracing::info!(
            workspace_id = %self.workspace_id,
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            cost_usd,
            "AI draft generated"
        );
        json_event(
            "done",
            serde_json::json!({ "usage": usage, "cost_usd": cost_usd }),
        )
    }

    fn fail(&mut self, error: &dyn std::fmt::Display) -> Event {
        self.finished = true;
        let (usage, cost_usd) = self.book();
        tracing::warn!(
            error = %error,
            workspace_id = %self.workspace_id,
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            cost_usd,
            "AI stream failed"
        );
        json_event(
            "error",
            serde_json::json!({ "message": "The AI provider stopped responding" }),
        )
    }
}

impl Drop for Relay {
    fn drop(&mut self) {
        if self.booked {
            return;
        }
        let (usage, cost_usd) = self.book();
        tracing::info!(
            workspace_id = %self.workspace_id,
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            cost_usd,
            "AI draft abandoned by client"
        );
    }
}

fn json_event(name: &str, payload: serde_json::Value) -> Event {
    // Serialized JSON never contains raw newlines
    Event::default().event(name).data(payload.to_string())
}

fn relay_events(relay: Relay) -> impl Stream<Item = Result<Event, Infallible>> {
    stream::unfold(relay, |mut relay| async move {
        if relay.finished {
            return None;
        }
        loop {
            let event = match relay.inner.next().await {
                Some(Ok(CompletionChunk::Token(text))) => {
                    relay.streamed.push_str(&text);
                    json_event("token", serde_json::json!({ "text": text }))
                }
                Some(Ok(CompletionChunk::Usage(usage))) => {
                    relay.usage = Some(usage);
                    continue;
                }
                Some(Err(e)) => relay.fail(&e),
                None => relay.finish(),
            };
            return Some((Ok(event), relay));
        }
    })
}

/// Streams an AI-written email body
///
/// # Errors
///
/// - `429 Too Many Requests`: per-user limit or the workspace's daily budget reached
/// - `503 Service Unavailable`: no AI provider configured
/// - `502 Bad Gateway`: the provider refused the request
pub async fn generate_email(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(slug): Path<String>,
    Json(req): Json<GenerateEmailRequest>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    req.validate()?;
    let (workspace, _) = admin_workspace(&state, &auth, &slug).await?;

    let provider = state
        .ai
        .clone()
        .ok_or_else(|| ApiError::ServiceUnavailable("AI composer is not configured".to_string()))?;

    if state.ai_costs.would_exceed(workspace.id) {
        return Err(ApiError::RateLimitExceeded {
            retry_after: seconds_until_utc_midnight(Utc::now()),
            message: "Daily AI budget for this workspace is used up".to_string(),
        });
    }

    let challenge = match req.challenge_id {
        Some(id) => Some(
            Challenge::find(&state.db, workspace.id, id)
                .await?
                .ok_or_else(|| ApiError::NotFound("Challenge not found".to_string()))?,
        ),
        None => None,
    };

    let messages = build_messages(&workspace, challenge.as_ref(), &req);
    let prompt_estimate = messages.iter().map(|m| estimate_tokens(&m.content)).sum();
    let request = CompletionRequest {
        messages,
        max_tokens: Some(state.config.ai.max_tokens),
        temperature: Some(0.7),
    };

    tracing::debug!(
        workspace_id = %workspace.id,
        user_id = %auth.user_id,
        model = provider.model(),
        "Starting AI draft"
    );
    let inner = provider.stream_completion(request).await?;

    let relay = Relay::new(inner, state.ai_costs.clone(), workspace.id, prompt_estimate);

    Ok(Sse::new(relay_events(relay)).keep_alive(KeepAlive::default()))
}

pub async fn usage(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(slug): Path<String>,
) -> ApiResult<Json<UsageResponse>> {
    let (workspace, _) = admin_workspace(&state, &auth, &slug).await?;

    Ok(Json(UsageResponse {
        enabled: state.ai.is_some(),
        model: state.ai.as_ref().map(|p| p.model().to_string()),
        usage: state.ai_costs.snapshot(workspace.id),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use changemaker_shared::ai::{cost::Pricing, provider::AiError};
    use chrono::TimeZone;

    fn workspace() -> Workspace {
        let now = Utc::now();
        Workspace {
            id: Uuid::new_v4(),
            slug: "green-team".to_string(),
            name: "Green Team".to_string(),
            description: Some("Neighbourhood climate action".to_string()),
            published: true,
            rewards_enabled: false,
            rewardstack_program_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn tracker() -> Arc<CostTracker> {
        Arc::new(CostTracker::new(
            Pricing {
                input_per_1k: 1.0,
                output_per_1k: 2.0,
            },
            10.0,
        ))
    }

    #[test]
    fn test_messages_include_context() {
        let req = GenerateEmailRequest {
            prompt: "Announce the cleanup day".to_string(),
            tone: Some("upbeat".to_string()),
            template_type: Some(EmailTemplateType::Reminder),
            challenge_id: None,
        };
        let messages = build_messages(&workspace(), None, &req);

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "system");
        let user = &messages[1].content;
        assert!(user.contains("Organization: Green Team"));
        assert!(user.contains("Tone: upbeat"));
        assert!(user.contains("Email kind: reminder"));
        assert!(user.ends_with("Request: Announce the cleanup day"));
    }

    #[test]
    fn test_seconds_until_midnight() {
        let now = Utc.with_ymd_and_hms(2026, 5, 1, 23, 59, 0).unwrap();
        assert_eq!(seconds_until_utc_midnight(now), 60);

        let now = Utc.with_ymd_and_hms(2026, 5, 1, 0, 0, 0).unwrap();
        assert_eq!(seconds_until_utc_midnight(now), 86_400);
    }

    #[tokio::test]
    async fn test_relay_streams_tokens_then_done_and_records_cost() {
        let chunks = vec![
            Ok(CompletionChunk::Token("Hello".to_string())),
            Ok(CompletionChunk::Token(" there".to_string())),
            Ok(CompletionChunk::Usage(TokenUsage {
                prompt_tokens: 1000,
                completion_tokens: 500,
            })),
        ];
        let costs = tracker();
        let workspace_id = Uuid::new_v4();
        let relay = Relay::new(Box::pin(stream::iter(chunks)), costs.clone(), workspace_id, 40);

        let events: Vec<_> = relay_events(relay).collect().await;
        assert_eq!(events.len(), 3);

        let snapshot = costs.snapshot(workspace_id);
        assert_eq!(snapshot.requests, 1);
        assert_eq!(snapshot.prompt_tokens, 1000);
        assert!((snapshot.cost_usd - 2.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_relay_stops_after_error() {
        let chunks = vec![
            Ok(CompletionChunk::Token("Hel".to_string())),
            Err(AiError::Protocol("bad chunk".to_string())),
            Ok(CompletionChunk::Token("never sent".to_string())),
        ];
        let costs = tracker();
        let workspace_id = Uuid::new_v4();
        let relay = Relay::new(Box::pin(stream::iter(chunks)), costs.clone(), workspace_id, 40);

        let events: Vec<_> = relay_events(relay).collect().await;
        assert_eq!(events.len(), 2);

        // No usage chunk arrived, so the partial draft is estimated
        let snapshot = costs.snapshot(workspace_id);
        assert_eq!(snapshot.requests, 1);
        assert_eq!(snapshot.prompt_tokens, 40);
        assert_eq!(snapshot.completion_tokens, 1);
    }

    #[tokio::test]
    async fn test_relay_books_reported_usage_when_provider_fails() {
        let chunks = vec![
            Ok(CompletionChunk::Token("Hello".to_string())),
            Ok(CompletionChunk::Usage(TokenUsage {
                prompt_tokens: 1000,
                completion_tokens: 1000,
            })),
            Err(AiError::Protocol("connection reset".to_string())),
        ];
        let costs = tracker();
        let workspace_id = Uuid::new_v4();
        let relay = Relay::new(Box::pin(stream::iter(chunks)), costs.clone(), workspace_id, 40);

        let events: Vec<_> = relay_events(relay).collect().await;
        assert_eq!(events.len(), 2);

        let snapshot = costs.snapshot(workspace_id);
        assert_eq!(snapshot.requests, 1);
        assert_eq!(snapshot.prompt_tokens, 1000);
        assert!((snapshot.cost_usd - 3.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_relay_books_usage_when_client_disconnects() {
        let chunks = vec![
            Ok(CompletionChunk::Token("Dear neighbours".to_string())),
            Ok(CompletionChunk::Token(", the cleanup is on".to_string())),
        ];
        let costs = tracker();
        let workspace_id = Uuid::new_v4();
        let relay = Relay::new(Box::pin(stream::iter(chunks)), costs.clone(), workspace_id, 40);

        let mut events = Box::pin(relay_events(relay));
        assert!(events.next().await.is_some());
        drop(events);

        let snapshot = costs.snapshot(workspace_id);
        assert_eq!(snapshot.requests, 1);
        assert_eq!(snapshot.prompt_tokens, 40);
        assert_eq!(snapshot.completion_tokens, 4);
        assert!(snapshot.cost_usd > 0.0);
    }

    #[tokio::test]
    async fn test_relay_books_once_on_clean_finish() {
        let chunks = vec![Ok(CompletionChunk::Token("Hi".to_string()))];
        let costs = tracker();
        let workspace_id = Uuid::new_v4();
        let relay = Relay::new(Box::pin(stream::iter(chunks)), costs.clone(), workspace_id, 8);

        let events: Vec<_> = relay_events(relay).collect().await;
        assert_eq!(events.len(), 2);
        assert_eq!(costs.snapshot(workspace_id).requests, 1);
    }

    #[test]
    fn test_estimate_tokens_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }
}
