/// The caller's own profile
///
/// - `GET /api/me` - profile plus workspace memberships
/// - `PATCH /api/me` - change display name

use super::double_option;
use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
};
use axum::{extract::State, Extension, Json};
use changemaker_shared::{
    auth::middleware::AuthContext,
    models::{
        membership::{Membership, UserWorkspace},
        user::{UpdateProfile, User},
    },
};
use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub user: User,

    /// Memberships, primary first
    pub workspaces: Vec<UserWorkspace>,

    /// Slug of the primary workspace, if any
    pub primary_workspace: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateMeRequest {
    #[serde(default, deserialize_with = "double_option")]
    #[validate(length(min = 1, max = 100, message = "Display name must be 1-100 characters"))]
    pub display_name: Option<Option<String>>,
}

pub async fn get_me(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<Json<MeResponse>> {
    let user = User::find_by_id(&state.db, auth.user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;

    let workspaces = Membership::list_by_user(&state.db, auth.user_id).await?;
    let primary_workspace = workspaces
        .iter()
        .find(|w| w.is_primary)
        .map(|w| w.slug.clone());

    Ok(Json(MeResponse {
        user,
        workspaces,
        primary_workspace,
    }))
}

pub async fn update_me(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(req): Json<UpdateMeRequest>,
) -> ApiResult<Json<User>> {
    req.validate()?;

    let display_name = req
        .display_name
        .map(|name| name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty()));

    let user = User::update_profile(&state.db, auth.user_id, UpdateProfile { display_name })
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;

    Ok(Json(user))
}
