/// Workspace endpoints
///
/// - `POST /api/workspaces` - create; the caller becomes admin
/// - `GET /api/workspaces` - workspaces the caller belongs to
/// - `GET /api/workspaces/:slug` - members only
/// - `PATCH /api/workspaces/:slug` - admins only
/// - `POST /api/workspaces/:slug/primary` - make it the caller's primary workspace

use super::{admin_workspace, double_option, member_workspace, record_activity};
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
        membership::{Membership, WorkspaceRole},
        workspace::{is_valid_slug, CreateWorkspace, UpdateWorkspace, Workspace},
    },
};
use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateWorkspaceRequest {
    pub slug: String,

    #[validate(length(min = 1, max = 120, message = "Name must be 1-120 characters"))]
    pub name: String,

    #[validate(length(max = 2000, message = "Description must be at most 2000 characters"))]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateWorkspaceRequest {
    #[validate(length(min = 1, max = 120, message = "Name must be 1-120 characters"))]
    pub name: Option<String>,

    #[serde(default, deserialize_with = "double_option")]
    #[validate(length(max = 2000, message = "Description must be at most 2000 characters"))]
    pub description: Option<Option<String>>,

    pub published: Option<bool>,
    pub rewards_enabled: Option<bool>,

    #[serde(default, deserialize_with = "double_option")]
    #[validate(length(min = 1, max = 120, message = "Program ID must be 1-120 characters"))]
    pub rewardstack_program_id: Option<Option<String>>,
}

/// Workspace together with the caller's role in it
#[derive(Debug, Serialize)]
pub struct WorkspaceResponse {
    #[serde(flatten)]
    pub workspace: Workspace,
    pub role: WorkspaceRole,
    pub is_primary: bool,
}

impl WorkspaceResponse {
    fn new(workspace: Workspace, membership: &Membership) -> Self {
        Self {
            workspace,
            role: membership.role,
            is_primary: membership.is_primary,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ListWorkspacesResponse {
    pub workspaces: Vec<Workspace>,
}

/// Creates a workspace with the caller as its first admin
///
/// # Errors
///
/// - `422 Unprocessable Entity`: invalid slug or name
/// - `409 Conflict`: slug already taken
pub async fn create_workspace(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(req): Json<CreateWorkspaceRequest>,
) -> ApiResult<(StatusCode, Json<WorkspaceResponse>)> {
    req.validate()?;

    let slug = req.slug.trim().to_lowercase();
    if !is_valid_slug(&slug) {
        return Err(ApiError::invalid(
            "slug",
            "Slug must be 3-48 lowercase letters, digits or hyphens",
        ));
    }

    let (workspace, membership) = Workspace::create_with_admin(
        &state.db,
        CreateWorkspace {
            slug,
            name: req.name.trim().to_string(),
            description: req.description,
        },
        auth.user_id,
    )
    .await?;

    tracing::info!(
        workspace_id = %workspace.id,
        user_id = %auth.user_id,
        slug = %workspace.slug,
        "Workspace created"
    );

    record_activity(
        &state,
        NewActivityEvent::new(workspace.id, kinds::WORKSPACE_CREATED)
            .actor(auth.user_id)
            .payload(serde_json::json!({ "slug": workspace.slug })),
    )
    .await;

    Ok((
        StatusCode::CREATED,
        Json(WorkspaceResponse::new(workspace, &membership)),
    ))
}

pub async fn list_workspaces(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<Json<ListWorkspacesResponse>> {
    let workspaces = Workspace::list_for_user(&state.db, auth.user_id).await?;
    Ok(Json(ListWorkspacesResponse { workspaces }))
}

pub async fn get_workspace(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(slug): Path<String>,
) -> ApiResult<Json<WorkspaceResponse>> {
    let (workspace, membership) = member_workspace(&state, &auth, &slug).await?;
    Ok(Json(WorkspaceResponse::new(workspace, &membership)))
}

pub async fn update_workspace(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(slug): Path<String>,
    Json(req): Json<UpdateWorkspaceRequest>,
) -> ApiResult<Json<WorkspaceResponse>> {
    req.validate()?;
    let (workspace, membership) = admin_workspace(&state, &auth, &slug).await?;

    let updated = Workspace::update(
        &state.db,
        workspace.id,
        UpdateWorkspace {
            name: req.name.map(|n| n.trim().to_string()),
            description: req.description,
            published: req.published,
            rewards_enabled: req.rewards_enabled,
            rewardstack_program_id: req
                .rewardstack_program_id
                .map(|p| p.map(|id| id.trim().to_string())),
        },
    )
    .await?
    .ok_or_else(|| ApiError::NotFound("Workspace not found".to_string()))?;

    tracing::info!(workspace_id = %updated.id, user_id = %auth.user_id, "Workspace updated");

    Ok(Json(WorkspaceResponse::new(updated, &membership)))
}

/// Makes the workspace the caller's primary workspace
pub async fn set_primary(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(slug): Path<String>,
) -> ApiResult<Json<WorkspaceResponse>> {
    let (workspace, _) = member_workspace(&state, &auth, &slug).await?;

    // Platform admins may pass the member check without a membership row
    let membership = Membership::set_primary(&state.db, auth.user_id, workspace.id)
        .await?
        .ok_or_else(|| ApiError::Forbidden("Not a member of this workspace".to_string()))?;

    Ok(Json(WorkspaceResponse::new(workspace, &membership)))
}
