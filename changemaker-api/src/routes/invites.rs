/// Invite code endpoints
///
/// - `POST /api/workspaces/:slug/invites` - admins; optionally emails the code
/// - `GET /api/workspaces/:slug/invites` - admins
/// - `POST /api/invites/:code/accept` - join with the invite's role

use super::{admin_workspace, emails, record_activity};
use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use changemaker_shared::{
    auth::middleware::AuthContext,
    models::{
        activity_event::{kinds, NewActivityEvent},
        email_template::EmailTemplateType,
        invite_code::{CreateInviteCode, InviteAcceptance, InviteCode},
        membership::{Membership, WorkspaceRole},
    },
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateInviteRequest {
    #[serde(default = "default_role")]
    pub role: WorkspaceRole,

    #[validate(range(min = 1, message = "max_uses must be at least 1"))]
    pub max_uses: Option<i32>,

    pub expires_at: Option<DateTime<Utc>>,

    /// Send the code to this address
    #[validate(email(message = "Invalid email address"))]
    pub email: Option<String>,
}

fn default_role() -> WorkspaceRole {
    WorkspaceRole::Participant
}

#[derive(Debug, Serialize)]
pub struct CreateInviteResponse {
    #[serde(flatten)]
    pub invite: InviteCode,

    /// Whether the invite email went out (absent when no email was given)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_sent: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct ListInvitesResponse {
    pub invites: Vec<InviteCode>,
}

pub async fn create_invite(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(slug): Path<String>,
    Json(req): Json<CreateInviteRequest>,
) -> ApiResult<(StatusCode, Json<CreateInviteResponse>)> {
    req.validate()?;
    let (workspace, _) = admin_workspace(&state, &auth, &slug).await?;

    if let Some(expires_at) = req.expires_at {
        if expires_at <= Utc::now() {
            return Err(ApiError::invalid("expires_at", "Expiry must be in the future"));
        }
    }

    let invite = InviteCode::create(
        &state.db,
        CreateInviteCode {
            workspace_id: workspace.id,
            role: req.role,
            max_uses: req.max_uses,
            expires_at: req.expires_at,
            created_by: auth.user_id,
        },
    )
    .await?;

    tracing::info!(
        workspace_id = %workspace.id,
        invite_id = %invite.id,
        role = invite.role.as_str(),
        "Invite code created"
    );

    let email_sent = match req.email.as_deref() {
        Some(to) => {
            let mut vars = emails::base_vars(&workspace);
            vars.insert("recipient_name".into(), emails::local_part(to).to_string());
            vars.insert("invite_code".into(), invite.code.clone());
            vars.insert("invite_role".into(), invite.role.as_str().to_string());
            Some(emails::notify(&state, &workspace, to, EmailTemplateType::Invite, vars).await)
        }
        None => None,
    };

    Ok((
        StatusCode::CREATED,
        Json(CreateInviteResponse { invite, email_sent }),
    ))
}

pub async fn list_invites(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(slug): Path<String>,
) -> ApiResult<Json<ListInvitesResponse>> {
    let (workspace, _) = admin_workspace(&state, &auth, &slug).await?;
    let invites = InviteCode::list_by_workspace(&state.db, workspace.id).await?;
    Ok(Json(ListInvitesResponse { invites }))
}

/// Joins the workspace behind an invite code
///
/// # Errors
///
/// - `404 Not Found`: unknown code
/// - `400 Bad Request`: code expired or used up
/// - `409 Conflict`: already a member
pub async fn accept_invite(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(code): Path<String>,
) -> ApiResult<Json<Membership>> {
    match InviteCode::accept(&state.db, &code, auth.user_id).await? {
        InviteAcceptance::Joined(membership) => {
            tracing::info!(
                workspace_id = %membership.workspace_id,
                user_id = %auth.user_id,
                role = membership.role.as_str(),
                "Joined workspace via invite"
            );
            record_activity(
                &state,
                NewActivityEvent::new(membership.workspace_id, kinds::MEMBER_JOINED)
                    .user(auth.user_id)
                    .payload(serde_json::json!({ "role": membership.role.as_str() })),
            )
            .await;
            Ok(Json(membership))
        }
        InviteAcceptance::NotFound => Err(ApiError::NotFound("Invite code not found".to_string())),
        InviteAcceptance::Expired => Err(ApiError::BadRequest("Invite code has expired".to_string())),
        InviteAcceptance::Exhausted => Err(ApiError::BadRequest(
            "Invite code has reached its usage limit".to_string(),
        )),
        InviteAcceptance::AlreadyMember => Err(ApiError::Conflict(
            "Already a member of this workspace".to_string(),
        )),
    }
}
