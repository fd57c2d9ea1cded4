/// Bulk email sending and the template helpers other handlers use
///
/// `POST /api/workspaces/:slug/emails/send` renders the chosen template once
/// per recipient and sends through the configured mailer. A failure for one
/// recipient is counted and logged; it does not stop the batch.

use super::{admin_workspace, record_activity};
use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
};
use axum::{
    extract::{Path, State},
    Extension, Json,
};
use changemaker_shared::{
    auth::middleware::AuthContext,
    email::{
        mailer::OutgoingEmail,
        template::{default_template, Template, TemplateVars},
    },
    models::{
        activity_event::{kinds, NewActivityEvent},
        challenge::Challenge,
        email_template::{EmailTemplate, EmailTemplateType},
        user::User,
        workspace::Workspace,
    },
};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// Messages in flight at once during a batch
const SEND_CONCURRENCY: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Audience {
    /// Everyone actively enrolled in `challenge_id`
    Challenge,

    /// Every workspace member
    Workspace,
}

#[derive(Debug, Deserialize, Validate)]
pub struct SendEmailsRequest {
    pub audience: Audience,

    pub challenge_id: Option<Uuid>,

    #[serde(default = "default_template_type")]
    pub template_type: EmailTemplateType,

    /// Fills `{{ subject }}`
    #[validate(length(max = 200, message = "Subject must be at most 200 characters"))]
    pub subject: Option<String>,

    /// Fills `{{ message }}`
    #[validate(length(max = 20000, message = "Message must be at most 20000 characters"))]
    pub message: Option<String>,
}

fn default_template_type() -> EmailTemplateType {
    EmailTemplateType::Generic
}

#[derive(Debug, Serialize)]
pub struct SendEmailsResponse {
    pub sent: usize,
    pub failed: usize,
}

pub async fn send_emails(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(slug): Path<String>,
    Json(req): Json<SendEmailsRequest>,
) -> ApiResult<Json<SendEmailsResponse>> {
    req.validate()?;
    let (workspace, _) = admin_workspace(&state, &auth, &slug).await?;

    let mut vars = base_vars(&workspace);
    if let Some(subject) = &req.subject {
        vars.insert("subject".into(), subject.clone());
    }
    if let Some(message) = &req.message {
        vars.insert("message".into(), message.clone());
    }

    let recipients = match req.audience {
        Audience::Workspace => User::list_workspace_members(&state.db, workspace.id).await?,
        Audience::Challenge => {
            let challenge_id = req
                .challenge_id
                .ok_or_else(|| ApiError::invalid("challenge_id", "Required for challenge audience"))?;
            let challenge = Challenge::find(&state.db, workspace.id, challenge_id)
                .await?
                .ok_or_else(|| ApiError::NotFound("Challenge not found".to_string()))?;
            vars.extend(challenge_vars(&challenge));
            User::list_enrolled(&state.db, challenge.id).await?
        }
    };

    let Some(template) = resolve_template(&state, workspace.id, req.template_type).await? else {
        return Err(ApiError::BadRequest(format!(
            "The {} template is disabled for this workspace",
            req.template_type.as_str()
        )));
    };

    let results: Vec<bool> = stream::iter(recipients)
        .map(|user| {
            let mut vars = vars.clone();
            vars.insert("recipient_name".into(), user.greeting_name().to_string());
            let rendered = template.render(&vars);
            let state = &state;
            async move { deliver(state, user.email, rendered).await }
        })
        .buffer_unordered(SEND_CONCURRENCY)
        .collect()
        .await;

    let sent = results.iter().filter(|ok| **ok).count();
    let failed = results.len() - sent;

    tracing::info!(
        workspace_id = %workspace.id,
        template_type = req.template_type.as_str(),
        sent,
        failed,
        "Email batch finished"
    );
    record_activity(
        &state,
        NewActivityEvent::new(workspace.id, kinds::EMAIL_SENT)
            .actor(auth.user_id)
            .payload(serde_json::json!({
                "template_type": req.template_type.as_str(),
                "challenge_id": req.challenge_id,
                "sent": sent,
                "failed": failed,
            })),
    )
    .await;

    Ok(Json(SendEmailsResponse { sent, failed }))
}

/// The workspace's template of this type, or the built-in default
///
/// Returns `None` when the workspace stored an override and disabled it.
pub(crate) async fn resolve_template(
    state: &AppState,
    workspace_id: Uuid,
    template_type: EmailTemplateType,
) -> ApiResult<Option<Template>> {
    let template = match EmailTemplate::find(&state.db, workspace_id, template_type).await? {
        Some(custom) if !custom.enabled => None,
        Some(custom) => Some(Template {
            subject: custom.subject,
            html: custom.html,
        }),
        None => Some(default_template(template_type)),
    };
    Ok(template)
}

/// Variables every workspace email can use
pub(crate) fn base_vars(workspace: &Workspace) -> TemplateVars {
    TemplateVars::from([
        ("workspace_name".to_string(), workspace.name.clone()),
        ("workspace_slug".to_string(), workspace.slug.clone()),
    ])
}

pub(crate) fn challenge_vars(challenge: &Challenge) -> TemplateVars {
    TemplateVars::from([
        ("challenge_title".to_string(), challenge.title.clone()),
        (
            "challenge_starts_at".to_string(),
            challenge.starts_at.format("%B %-d, %Y").to_string(),
        ),
        (
            "challenge_ends_at".to_string(),
            challenge.ends_at.format("%B %-d, %Y").to_string(),
        ),
    ])
}

/// The part of an address before `@`
pub(crate) fn local_part(email: &str) -> &str {
    email.split('@').next().unwrap_or(email)
}

async fn deliver(state: &AppState, to: String, rendered: Template) -> bool {
    let email = OutgoingEmail {
        to,
        subject: rendered.subject,
        html: rendered.html,
    };
    match state.mailer.send(&email).await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(error = %e, to = %email.to, mailer = state.mailer.name(), "Email delivery failed");
            false
        }
    }
}

/// Sends one notification, best effort
///
/// Returns whether the message was handed to the mailer. A disabled
/// template counts as not sent.
pub(crate) async fn notify(
    state: &AppState,
    workspace: &Workspace,
    to: &str,
    template_type: EmailTemplateType,
    vars: TemplateVars,
) -> bool {
    let template = match resolve_template(state, workspace.id, template_type).await {
        Ok(Some(template)) => template,
        Ok(None) => {
            tracing::debug!(
                workspace_id = %workspace.id,
                template_type = template_type.as_str(),
                "Template disabled; notification skipped"
            );
            return false;
        }
        Err(e) => {
            tracing::warn!(error = ?e, "Failed to load email template");
            return false;
        }
    };

    deliver(state, to.to_string(), template.render(&vars)).await
}
