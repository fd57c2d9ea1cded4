/// Enrollment endpoints
///
/// - `POST /api/workspaces/:slug/challenges/:id/enroll` - self-enroll
/// - `DELETE /api/workspaces/:slug/challenges/:id/enroll` - withdraw
/// - `GET /api/workspaces/:slug/challenges/:id/enrollments` - admins

use super::{
    admin_workspace, challenges::visible_challenge, emails, member_workspace, record_activity,
};
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
        challenge::Challenge,
        email_template::EmailTemplateType,
        enrollment::{EnrollOutcome, Enrollment, EnrollmentDetail},
        workspace::Workspace,
    },
};
use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Serialize)]
pub struct ListEnrollmentsResponse {
    pub enrollments: Vec<EnrollmentDetail>,
}

/// Enrolls the caller
///
/// Returns `201 Created` for a first enrollment and `200 OK` when a withdrawn
/// or invited enrollment is reactivated.
///
/// # Errors
///
/// - `400 Bad Request`: enrollment is closed
/// - `404 Not Found`: challenge missing or not visible
/// - `409 Conflict`: already enrolled
pub async fn enroll(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path((slug, id)): Path<(String, Uuid)>,
) -> ApiResult<(StatusCode, Json<Enrollment>)> {
    let (workspace, membership) = member_workspace(&state, &auth, &slug).await?;
    let challenge = visible_challenge(&state, &workspace, &membership, id).await?;

    if !challenge.is_enrollment_open(Utc::now()) {
        return Err(ApiError::BadRequest(
            "Enrollment for this challenge is closed".to_string(),
        ));
    }

    let (status, enrollment) = match Enrollment::enroll(&state.db, challenge.id, auth.user_id).await? {
        EnrollOutcome::Enrolled(e) => (StatusCode::CREATED, e),
        EnrollOutcome::Reactivated(e) => (StatusCode::OK, e),
        EnrollOutcome::AlreadyEnrolled => {
            return Err(ApiError::Conflict(
                "Already enrolled in this challenge".to_string(),
            ))
        }
    };

    tracing::info!(
        challenge_id = %challenge.id,
        user_id = %auth.user_id,
        reactivated = status == StatusCode::OK,
        "Enrolled in challenge"
    );
    record_activity(
        &state,
        NewActivityEvent::new(workspace.id, kinds::ENROLLMENT_CREATED)
            .user(auth.user_id)
            .payload(serde_json::json!({ "challenge_id": challenge.id })),
    )
    .await;
    spawn_enrollment_email(&state, workspace, &challenge, &auth, "confirmed");

    Ok((status, Json(enrollment)))
}

pub async fn withdraw(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path((slug, id)): Path<(String, Uuid)>,
) -> ApiResult<Json<Enrollment>> {
    let (workspace, membership) = member_workspace(&state, &auth, &slug).await?;
    let challenge = visible_challenge(&state, &workspace, &membership, id).await?;

    let enrollment = Enrollment::withdraw(&state.db, challenge.id, auth.user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Not enrolled in this challenge".to_string()))?;

    tracing::info!(challenge_id = %challenge.id, user_id = %auth.user_id, "Withdrew from challenge");
    record_activity(
        &state,
        NewActivityEvent::new(workspace.id, kinds::ENROLLMENT_WITHDRAWN)
            .user(auth.user_id)
            .payload(serde_json::json!({ "challenge_id": challenge.id })),
    )
    .await;
    spawn_enrollment_email(&state, workspace, &challenge, &auth, "withdrawn");

    Ok(Json(enrollment))
}

pub async fn list_enrollments(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path((slug, id)): Path<(String, Uuid)>,
) -> ApiResult<Json<ListEnrollmentsResponse>> {
    let (workspace, _) = admin_workspace(&state, &auth, &slug).await?;
    let challenge = Challenge::find(&state.db, workspace.id, id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Challenge not found".to_string()))?;

    let enrollments = Enrollment::list_by_challenge(&state.db, challenge.id).await?;
    Ok(Json(ListEnrollmentsResponse { enrollments }))
}

fn spawn_enrollment_email(
    state: &AppState,
    workspace: Workspace,
    challenge: &Challenge,
    auth: &AuthContext,
    enrollment_status: &str,
) {
    let mut vars = emails::base_vars(&workspace);
    vars.extend(emails::challenge_vars(challenge));
    vars.insert(
        "recipient_name".into(),
        emails::local_part(&auth.email).to_string(),
    );
    vars.insert("enrollment_status".into(), enrollment_status.to_string());

    let state = state.clone();
    let to = auth.email.clone();
    tokio::spawn(async move {
        emails::notify(&state, &workspace, &to, EmailTemplateType::EnrollmentUpdate, vars).await;
    });
}
