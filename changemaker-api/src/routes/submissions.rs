/// Submission endpoints
///
/// - `POST /api/workspaces/:slug/challenges/:id/submissions` - enrolled participants
/// - `GET /api/workspaces/:slug/challenges/:id/submissions` - admins see all, others their own
/// - `POST /api/workspaces/:slug/submissions/:id/review` - admins
///
/// Approved submissions credit points. When the workspace is connected to
/// RewardSTACK the points are also issued there.

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
        enrollment::Enrollment,
        membership::WorkspaceRole,
        reward_issuance::{NewRewardIssuance, RewardIssuance, RewardType},
        submission::{
            CreateSubmission, Review, ReviewDecision, ReviewOutcome, Submission, SubmissionStatus,
        },
        user::User,
        workspace::Workspace,
    },
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateSubmissionRequest {
    #[validate(length(min = 1, max = 10000, message = "Content must be 1-10000 characters"))]
    pub content: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ReviewRequest {
    pub decision: ReviewDecision,

    /// Overrides the challenge's points per submission
    #[validate(range(min = 0, message = "Points must not be negative"))]
    pub points: Option<i32>,

    #[validate(length(max = 2000, message = "Notes must be at most 2000 characters"))]
    pub notes: Option<String>,
}

/// A submission plus the reward issued for it, if any
#[derive(Debug, Serialize)]
pub struct SubmissionResponse {
    #[serde(flatten)]
    pub submission: Submission,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub reward: Option<RewardIssuance>,
}

#[derive(Debug, Serialize)]
pub struct ListSubmissionsResponse {
    pub submissions: Vec<Submission>,
}

/// Points to credit right away, or `None` when a reviewer must decide
fn auto_approve_points(challenge: &Challenge) -> Option<i32> {
    (!challenge.requires_approval).then_some(challenge.points_per_submission)
}

/// Issues the submission's points through RewardSTACK when the workspace allows it
///
/// Issuance failures are logged; the submission itself stays approved.
async fn issue_points(
    state: &AppState,
    workspace: &Workspace,
    submission: &Submission,
    issued_by: Option<Uuid>,
) -> Option<RewardIssuance> {
    let points = submission.points_awarded.filter(|p| *p > 0)?;
    if !workspace.can_issue_rewards() {
        return None;
    }

    let result = state
        .rewards
        .issue(NewRewardIssuance {
            workspace_id: workspace.id,
            user_id: submission.user_id,
            challenge_id: Some(submission.challenge_id),
            submission_id: Some(submission.id),
            reward_type: RewardType::Points,
            amount: Some(points as i64),
            sku_id: None,
            issued_by,
        })
        .await;

    match result {
        Ok(issuance) => Some(issuance),
        Err(e) => {
            tracing::error!(
                error = %e,
                submission_id = %submission.id,
                "Failed to issue reward for approved submission"
            );
            None
        }
    }
}

/// Records a submission for the caller
///
/// # Errors
///
/// - `400 Bad Request`: the challenge isn't running
/// - `403 Forbidden`: the caller isn't enrolled
/// - `422 Unprocessable Entity`: empty or oversized content
pub async fn create_submission(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path((slug, id)): Path<(String, Uuid)>,
    Json(req): Json<CreateSubmissionRequest>,
) -> ApiResult<(StatusCode, Json<SubmissionResponse>)> {
    req.validate()?;
    let (workspace, membership) = member_workspace(&state, &auth, &slug).await?;
    let challenge = visible_challenge(&state, &workspace, &membership, id).await?;

    if !challenge.is_running(Utc::now()) {
        return Err(ApiError::BadRequest(
            "This challenge is not accepting submissions".to_string(),
        ));
    }

    let enrollment = Enrollment::find(&state.db, challenge.id, auth.user_id)
        .await?
        .filter(Enrollment::is_active)
        .ok_or_else(|| ApiError::Forbidden("Enroll in the challenge before submitting".to_string()))?;

    let submission = Submission::create(
        &state.db,
        CreateSubmission {
            workspace_id: workspace.id,
            enrollment_id: enrollment.id,
            challenge_id: challenge.id,
            user_id: auth.user_id,
            content: req.content,
            auto_approve_points: auto_approve_points(&challenge),
        },
    )
    .await?;

    tracing::info!(
        submission_id = %submission.id,
        challenge_id = %challenge.id,
        user_id = %auth.user_id,
        status = ?submission.status,
        "Submission created"
    );
    record_activity(
        &state,
        NewActivityEvent::new(workspace.id, kinds::SUBMISSION_CREATED)
            .user(auth.user_id)
            .payload(serde_json::json!({
                "challenge_id": challenge.id,
                "submission_id": submission.id,
                "status": submission.status,
            })),
    )
    .await;

    let reward = if submission.status == SubmissionStatus::Approved {
        issue_points(&state, &workspace, &submission, None).await
    } else {
        None
    };

    Ok((
        StatusCode::CREATED,
        Json(SubmissionResponse { submission, reward }),
    ))
}

pub async fn list_submissions(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path((slug, id)): Path<(String, Uuid)>,
) -> ApiResult<Json<ListSubmissionsResponse>> {
    let (workspace, membership) = member_workspace(&state, &auth, &slug).await?;
    let challenge = visible_challenge(&state, &workspace, &membership, id).await?;

    let only_user = match membership.role {
        WorkspaceRole::Admin => None,
        WorkspaceRole::Participant => Some(auth.user_id),
    };
    let submissions = Submission::list_by_challenge(&state.db, challenge.id, only_user).await?;

    Ok(Json(ListSubmissionsResponse { submissions }))
}

/// Approves or rejects a pending submission
///
/// # Errors
///
/// - `404 Not Found`: no such submission in the workspace
/// - `409 Conflict`: already reviewed
pub async fn review_submission(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path((slug, id)): Path<(String, Uuid)>,
    Json(req): Json<ReviewRequest>,
) -> ApiResult<Json<SubmissionResponse>> {
    req.validate()?;
    let (workspace, _) = admin_workspace(&state, &auth, &slug).await?;

    let review = Review {
        decision: req.decision,
        points: req.points,
        notes: req.notes,
        reviewer_id: auth.user_id,
    };

    let submission = match Submission::review(&state.db, workspace.id, id, review).await? {
        ReviewOutcome::Reviewed(submission) => submission,
        ReviewOutcome::NotFound => {
            return Err(ApiError::NotFound("Submission not found".to_string()))
        }
        ReviewOutcome::AlreadyReviewed(status) => {
            return Err(ApiError::Conflict(format!(
                "Submission was already {}",
                review_decision_label(status)
            )))
        }
    };

    tracing::info!(
        submission_id = %submission.id,
        reviewer_id = %auth.user_id,
        status = ?submission.status,
        points = submission.points_awarded,
        "Submission reviewed"
    );
    record_activity(
        &state,
        NewActivityEvent::new(workspace.id, kinds::SUBMISSION_REVIEWED)
            .user(submission.user_id)
            .actor(auth.user_id)
            .payload(serde_json::json!({
                "submission_id": submission.id,
                "challenge_id": submission.challenge_id,
                "status": submission.status,
                "points_awarded": submission.points_awarded,
            })),
    )
    .await;

    let reward = if submission.status == SubmissionStatus::Approved {
        issue_points(&state, &workspace, &submission, Some(auth.user_id)).await
    } else {
        None
    };

    spawn_review_email(&state, workspace, &submission);

    Ok(Json(SubmissionResponse { submission, reward }))
}

fn spawn_review_email(state: &AppState, workspace: Workspace, submission: &Submission) {
    let state = state.clone();
    let submission = submission.clone();

    tokio::spawn(async move {
        let user = match User::find_by_id(&state.db, submission.user_id).await {
            Ok(Some(user)) => user,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load submitter for review email");
                return;
            }
        };
        let challenge = match Challenge::find(&state.db, workspace.id, submission.challenge_id).await
        {
            Ok(Some(challenge)) => challenge,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load challenge for review email");
                return;
            }
        };

        let mut vars = emails::base_vars(&workspace);
        vars.extend(emails::challenge_vars(&challenge));
        vars.insert("recipient_name".into(), user.greeting_name().to_string());
        vars.insert("review_decision".into(), review_decision_label(submission.status).to_string());
        vars.insert(
            "points_awarded".into(),
            submission.points_awarded.unwrap_or(0).to_string(),
        );
        vars.insert(
            "review_notes".into(),
            submission.review_notes.clone().unwrap_or_default(),
        );

        emails::notify(
            &state,
            &workspace,
            &user.email,
            EmailTemplateType::SubmissionReviewed,
            vars,
        )
        .await;
    });
}

fn review_decision_label(status: SubmissionStatus) -> &'static str {
    match status {
        SubmissionStatus::Approved => "approved",
        SubmissionStatus::Rejected => "rejected",
        SubmissionStatus::Pending => "pending",
    }
}
