/// Challenge endpoints
///
/// - `GET /api/workspaces/:slug/challenges` - members; participants only see published ones
/// - `POST /api/workspaces/:slug/challenges` - admins
/// - `GET /api/workspaces/:slug/challenges/:id` - members
/// - `PATCH /api/workspaces/:slug/challenges/:id` - admins
/// - `DELETE /api/workspaces/:slug/challenges/:id` - admins; only without submissions

use super::{admin_workspace, double_option, member_workspace, record_activity};
use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::{DateTime, Utc};
use changemaker_shared::{
    auth::middleware::AuthContext,
    models::{
        activity_event::{kinds, NewActivityEvent},
        challenge::{
            validate_schedule, Challenge, ChallengeStatus, CreateChallenge, UpdateChallenge,
        },
        membership::{Membership, WorkspaceRole},
        workspace::Workspace,
    },
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateChallengeRequest {
    #[validate(length(min = 1, max = 200, message = "Title must be 1-200 characters"))]
    pub title: String,

    #[serde(default)]
    #[validate(length(max = 20000, message = "Description must be at most 20000 characters"))]
    pub description: String,

    #[serde(default = "default_status")]
    pub status: ChallengeStatus,

    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub enrollment_deadline: Option<DateTime<Utc>>,

    #[serde(default)]
    pub points_per_submission: i32,

    #[serde(default = "default_requires_approval")]
    pub requires_approval: bool,
}

fn default_status() -> ChallengeStatus {
    ChallengeStatus::Draft
}

fn default_requires_approval() -> bool {
    true
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateChallengeRequest {
    #[validate(length(min = 1, max = 200, message = "Title must be 1-200 characters"))]
    pub title: Option<String>,

    #[validate(length(max = 20000, message = "Description must be at most 20000 characters"))]
    pub description: Option<String>,

    pub status: Option<ChallengeStatus>,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,

    /// `null` clears the deadline
    #[serde(default, deserialize_with = "double_option")]
    pub enrollment_deadline: Option<Option<DateTime<Utc>>>,

    pub points_per_submission: Option<i32>,
    pub requires_approval: Option<bool>,
}

impl From<UpdateChallengeRequest> for UpdateChallenge {
    fn from(req: UpdateChallengeRequest) -> Self {
        UpdateChallenge {
            title: req.title,
            description: req.description,
            status: req.status,
            starts_at: req.starts_at,
            ends_at: req.ends_at,
            enrollment_deadline: req.enrollment_deadline,
            points_per_submission: req.points_per_submission,
            requires_approval: req.requires_approval,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ListChallengesQuery {
    pub status: Option<ChallengeStatus>,
}

#[derive(Debug, Serialize)]
pub struct ListChallengesResponse {
    pub challenges: Vec<Challenge>,
}

/// Status filter a caller may use; participants are pinned to published
fn effective_status_filter(
    role: WorkspaceRole,
    requested: Option<ChallengeStatus>,
) -> Result<Option<ChallengeStatus>, ()> {
    match (role, requested) {
        (WorkspaceRole::Admin, requested) => Ok(requested),
        (WorkspaceRole::Participant, None | Some(ChallengeStatus::Published)) => {
            Ok(Some(ChallengeStatus::Published))
        }
        (WorkspaceRole::Participant, Some(_)) => Err(()),
    }
}

fn schedule_error((field, message): (&str, &str)) -> ApiError {
    ApiError::invalid(field, message)
}

/// Loads a challenge the caller may see; drafts and archived ones are admin only
pub(crate) async fn visible_challenge(
    state: &AppState,
    workspace: &Workspace,
    membership: &Membership,
    id: Uuid,
) -> ApiResult<Challenge> {
    let challenge = Challenge::find(&state.db, workspace.id, id)
        .await?
        .filter(|c| membership.role == WorkspaceRole::Admin || c.status == ChallengeStatus::Published)
        .ok_or_else(|| ApiError::NotFound("Challenge not found".to_string()))?;
    Ok(challenge)
}

pub async fn list_challenges(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(slug): Path<String>,
    Query(query): Query<ListChallengesQuery>,
) -> ApiResult<Json<ListChallengesResponse>> {
    let (workspace, membership) = member_workspace(&state, &auth, &slug).await?;

    let challenges = match effective_status_filter(membership.role, query.status) {
        Ok(status) => Challenge::list_by_workspace(&state.db, workspace.id, status).await?,
        Err(()) => Vec::new(),
    };

    Ok(Json(ListChallengesResponse { challenges }))
}

pub async fn create_challenge(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(slug): Path<String>,
    Json(req): Json<CreateChallengeRequest>,
) -> ApiResult<(StatusCode, Json<Challenge>)> {
    req.validate()?;
    validate_schedule(
        req.starts_at,
        req.ends_at,
        req.enrollment_deadline,
        req.points_per_submission,
    )
    .map_err(schedule_error)?;

    let (workspace, _) = admin_workspace(&state, &auth, &slug).await?;

    let challenge = Challenge::create(
        &state.db,
        CreateChallenge {
            workspace_id: workspace.id,
            title: req.title,
            description: req.description,
            status: req.status,
            starts_at: req.starts_at,
            ends_at: req.ends_at,
            enrollment_deadline: req.enrollment_deadline,
            points_per_submission: req.points_per_submission,
            requires_approval: req.requires_approval,
            created_by: auth.user_id,
        },
    )
    .await?;

    tracing::info!(
        workspace_id = %workspace.id,
        challenge_id = %challenge.id,
        status = ?challenge.status,
        "Challenge created"
    );
    record_activity(
        &state,
        NewActivityEvent::new(workspace.id, kinds::CHALLENGE_CREATED)
            .actor(auth.user_id)
            .payload(serde_json::json!({
                "challenge_id": challenge.id,
                "title": challenge.title,
            })),
    )
    .await;

    Ok((StatusCode::CREATED, Json(challenge)))
}

pub async fn get_challenge(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path((slug, id)): Path<(String, Uuid)>,
) -> ApiResult<Json<Challenge>> {
    let (workspace, membership) = member_workspace(&state, &auth, &slug).await?;
    let challenge = visible_challenge(&state, &workspace, &membership, id).await?;
    Ok(Json(challenge))
}

/// Applies a partial update after validating the merged schedule
pub async fn update_challenge(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path((slug, id)): Path<(String, Uuid)>,
    Json(req): Json<UpdateChallengeRequest>,
) -> ApiResult<Json<Challenge>> {
    req.validate()?;
    let (workspace, _) = admin_workspace(&state, &auth, &slug).await?;

    let current = Challenge::find(&state.db, workspace.id, id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Challenge not found".to_string()))?;

    let update = UpdateChallenge::from(req);
    let merged = current.merged(&update);
    validate_schedule(
        merged.starts_at,
        merged.ends_at,
        merged.enrollment_deadline,
        merged.points_per_submission,
    )
    .map_err(schedule_error)?;

    let challenge = Challenge::update(&state.db, workspace.id, id, update)
        .await?
        .ok_or_else(|| ApiError::NotFound("Challenge not found".to_string()))?;

    tracing::info!(challenge_id = %id, status = ?challenge.status, "Challenge updated");
    Ok(Json(challenge))
}

pub async fn delete_challenge(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path((slug, id)): Path<(String, Uuid)>,
) -> ApiResult<StatusCode> {
    let (workspace, _) = admin_workspace(&state, &auth, &slug).await?;

    let challenge = Challenge::find(&state.db, workspace.id, id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Challenge not found".to_string()))?;

    if Challenge::has_submissions(&state.db, challenge.id).await? {
        return Err(ApiError::Conflict(
            "Challenge has submissions; archive it instead".to_string(),
        ));
    }

    if !Challenge::delete(&state.db, workspace.id, id).await? {
        return Err(ApiError::NotFound("Challenge not found".to_string()));
    }

    tracing::info!(workspace_id = %workspace.id, challenge_id = %id, "Challenge deleted");
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_participants_are_pinned_to_published() {
        assert_eq!(
            effective_status_filter(WorkspaceRole::Participant, None),
            Ok(Some(ChallengeStatus::Published))
        );
        assert_eq!(
            effective_status_filter(WorkspaceRole::Participant, Some(ChallengeStatus::Draft)),
            Err(())
        );
        assert_eq!(
            effective_status_filter(WorkspaceRole::Admin, Some(ChallengeStatus::Draft)),
            Ok(Some(ChallengeStatus::Draft))
        );
        assert_eq!(effective_status_filter(WorkspaceRole::Admin, None), Ok(None));
    }

    #[test]
    fn test_create_request_defaults() {
        let req: CreateChallengeRequest = serde_json::from_str(
            r#"{"title":"Walk more","starts_at":"2026-01-01T00:00:00Z","ends_at":"2026-02-01T00:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(req.status, ChallengeStatus::Draft);
        assert!(req.requires_approval);
        assert_eq!(req.points_per_submission, 0);
        assert!(req.description.is_empty());
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_title_length_is_validated() {
        let req: CreateChallengeRequest = serde_json::from_value(serde_json::json!({
            "title": "x".repeat(201),
            "starts_at": "2026-01-01T00:00:00Z",
            "ends_at": "2026-02-01T00:00:00Z",
        }))
        .unwrap();
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_update_request_clears_deadline() {
        let req: UpdateChallengeRequest =
            serde_json::from_str(r#"{"enrollment_deadline":null}"#).unwrap();
        let update = UpdateChallenge::from(req);
        assert_eq!(update.enrollment_deadline, Some(None));
        assert!(update.title.is_none());
    }

    #[test]
    fn test_schedule_error_is_a_validation_error() {
        assert!(matches!(
            schedule_error(("ends_at", "ends_at must be after starts_at")),
            ApiError::ValidationError(_)
        ));
    }
}
