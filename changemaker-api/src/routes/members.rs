/// Workspace membership endpoints
///
/// - `GET /api/workspaces/:slug/members` - admins
/// - `PUT /api/workspaces/:slug/members/:user_id` - admins; change role
/// - `DELETE /api/workspaces/:slug/members/:user_id` - admins, or the member themselves
///
/// Neither a role change nor a removal may leave a workspace without an admin.

use super::{admin_workspace, record_activity, workspace_by_slug};
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
    auth::{authorization::require_self_or_admin, middleware::AuthContext},
    models::{
        activity_event::{kinds, NewActivityEvent},
        membership::{MemberDetail, Membership, MembershipChange, WorkspaceRole},
    },
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct UpdateMemberRequest {
    pub role: WorkspaceRole,
}

#[derive(Debug, Serialize)]
pub struct ListMembersResponse {
    pub members: Vec<MemberDetail>,
}

const LAST_ADMIN: &str = "A workspace must keep at least one admin";

pub async fn list_members(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(slug): Path<String>,
) -> ApiResult<Json<ListMembersResponse>> {
    let (workspace, _) = admin_workspace(&state, &auth, &slug).await?;
    let members = Membership::list_by_workspace(&state.db, workspace.id).await?;
    Ok(Json(ListMembersResponse { members }))
}

pub async fn update_member(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path((slug, user_id)): Path<(String, Uuid)>,
    Json(req): Json<UpdateMemberRequest>,
) -> ApiResult<Json<Membership>> {
    let (workspace, _) = admin_workspace(&state, &auth, &slug).await?;

    match Membership::update_role(&state.db, workspace.id, user_id, req.role).await? {
        MembershipChange::Applied(Some(membership)) => {
            tracing::info!(
                workspace_id = %workspace.id,
                user_id = %user_id,
                role = req.role.as_str(),
                "Member role changed"
            );
            record_activity(
                &state,
                NewActivityEvent::new(workspace.id, kinds::MEMBER_ROLE_CHANGED)
                    .user(user_id)
                    .actor(auth.user_id)
                    .payload(serde_json::json!({ "role": req.role.as_str() })),
            )
            .await;
            Ok(Json(membership))
        }
        MembershipChange::Applied(None) | MembershipChange::NotFound => {
            Err(ApiError::NotFound("Member not found".to_string()))
        }
        MembershipChange::LastAdmin => Err(ApiError::Conflict(LAST_ADMIN.to_string())),
    }
}

pub async fn remove_member(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path((slug, user_id)): Path<(String, Uuid)>,
) -> ApiResult<StatusCode> {
    let workspace = workspace_by_slug(&state, &slug).await?;
    require_self_or_admin(&state.db, workspace.id, &auth, user_id).await?;

    match Membership::remove(&state.db, workspace.id, user_id).await? {
        MembershipChange::Applied(_) => {
            tracing::info!(workspace_id = %workspace.id, user_id = %user_id, "Member removed");
            record_activity(
                &state,
                NewActivityEvent::new(workspace.id, kinds::MEMBER_REMOVED)
                    .user(user_id)
                    .actor(auth.user_id),
            )
            .await;
            Ok(StatusCode::NO_CONTENT)
        }
        MembershipChange::NotFound => Err(ApiError::NotFound("Member not found".to_string())),
        MembershipChange::LastAdmin => Err(ApiError::Conflict(LAST_ADMIN.to_string())),
    }
}
