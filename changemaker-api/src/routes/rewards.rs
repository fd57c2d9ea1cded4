/// Points and reward endpoints
///
/// - `GET /api/workspaces/:slug/rewards?status=&limit=` - admins
/// - `POST /api/workspaces/:slug/rewards` - admins; manual grant
/// - `POST /api/workspaces/:slug/rewards/:id/retry` - admins
/// - `GET /api/workspaces/:slug/points` - the caller's balance and rewards
/// - `GET /api/workspaces/:slug/leaderboard?limit=` - members

use super::{admin_workspace, member_workspace, LimitQuery};
use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use changemaker_shared::{
    auth::middleware::AuthContext,
    models::{
        challenge::Challenge,
        membership::Membership,
        points::{PointsBalance, PointsStanding},
        reward_issuance::{IssuanceStatus, NewRewardIssuance, RewardIssuance, RewardType},
    },
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Default, Deserialize)]
pub struct ListRewardsQuery {
    pub status: Option<IssuanceStatus>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ListRewardsResponse {
    pub rewards: Vec<RewardIssuance>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct GrantRewardRequest {
    pub user_id: Uuid,
    pub reward_type: RewardType,

    #[validate(range(min = 1, message = "Amount must be positive"))]
    pub amount: Option<i64>,

    #[validate(length(min = 1, max = 120, message = "SKU must be 1-120 characters"))]
    pub sku_id: Option<String>,

    pub challenge_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct PointsResponse {
    #[serde(flatten)]
    pub balance: PointsBalance,
    pub rewards: Vec<RewardIssuance>,
}

#[derive(Debug, Serialize)]
pub struct LeaderboardResponse {
    pub standings: Vec<PointsStanding>,
}

pub async fn list_rewards(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(slug): Path<String>,
    Query(query): Query<ListRewardsQuery>,
) -> ApiResult<Json<ListRewardsResponse>> {
    let (workspace, _) = admin_workspace(&state, &auth, &slug).await?;
    let limit = LimitQuery { limit: query.limit }.clamped();

    let rewards =
        RewardIssuance::list_by_workspace(&state.db, workspace.id, query.status, limit).await?;
    Ok(Json(ListRewardsResponse { rewards }))
}

/// Issues a reward outside the submission flow
///
/// The issuance is returned whatever the provider said; a `failed` status
/// carries the reason in `error`. The member and the optional challenge must
/// both belong to the workspace (404 otherwise).
pub async fn grant_reward(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(slug): Path<String>,
    Json(req): Json<GrantRewardRequest>,
) -> ApiResult<(StatusCode, Json<RewardIssuance>)> {
    req.validate()?;
    let (workspace, _) = admin_workspace(&state, &auth, &slug).await?;

    if Membership::find(&state.db, workspace.id, req.user_id)
        .await?
        .is_none()
    {
        return Err(ApiError::NotFound("Member not found".to_string()));
    }

    if let Some(challenge_id) = req.challenge_id {
        if Challenge::find(&state.db, workspace.id, challenge_id)
            .await?
            .is_none()
        {
            return Err(ApiError::NotFound("Challenge not found".to_string()));
        }
    }

    let issuance = state
        .rewards
        .issue(NewRewardIssuance {
            workspace_id: workspace.id,
            user_id: req.user_id,
            challenge_id: req.challenge_id,
            submission_id: None,
            reward_type: req.reward_type,
            amount: req.amount,
            sku_id: req.sku_id,
            issued_by: Some(auth.user_id),
        })
        .await?;

    tracing::info!(
        issuance_id = %issuance.id,
        workspace_id = %workspace.id,
        granted_by = %auth.user_id,
        status = issuance.status.as_str(),
        "Manual reward granted"
    );

    Ok((StatusCode::CREATED, Json(issuance)))
}

/// Re-dispatches a failed issuance
///
/// # Errors
///
/// - `404 Not Found`: not an issuance of this workspace
/// - `409 Conflict`: the issuance is processing or completed
pub async fn retry_reward(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path((slug, id)): Path<(String, Uuid)>,
) -> ApiResult<Json<RewardIssuance>> {
    let (workspace, _) = admin_workspace(&state, &auth, &slug).await?;
    let issuance = state.rewards.retry(workspace.id, id).await?;
    Ok(Json(issuance))
}

pub async fn my_points(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(slug): Path<String>,
) -> ApiResult<Json<PointsResponse>> {
    let (workspace, _) = member_workspace(&state, &auth, &slug).await?;

    let balance = PointsBalance::find(&state.db, workspace.id, auth.user_id).await?;
    let rewards = RewardIssuance::list_for_user(&state.db, workspace.id, auth.user_id).await?;

    Ok(Json(PointsResponse { balance, rewards }))
}

pub async fn leaderboard(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(slug): Path<String>,
    Query(query): Query<LimitQuery>,
) -> ApiResult<Json<LeaderboardResponse>> {
    let (workspace, _) = member_workspace(&state, &auth, &slug).await?;
    let standings = PointsBalance::leaderboard(&state.db, workspace.id, query.clamped()).await?;
    Ok(Json(LeaderboardResponse { standings }))
}
