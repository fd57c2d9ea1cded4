/// Submission model and review workflow
///
/// Participants submit work against a challenge they are enrolled in. Admins
/// review pending submissions; approval credits points to the participant's
/// balance in the same transaction as the status change. Challenges that do
/// not require approval have their submissions approved on arrival.
///
/// # Review rules
///
/// - Only `pending` submissions can be reviewed
/// - Approval awards the reviewer's points, or the challenge's
///   `points_per_submission` when none are given
/// - Rejection awards nothing

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use super::points::PointsBalance;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "submission_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SubmissionStatus {
    Pending,
    Approved,
    Rejected,
}

/// Reviewer's verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewDecision {
    Approve,
    Reject,
}

impl ReviewDecision {
    pub fn resulting_status(&self) -> SubmissionStatus {
        match self {
            ReviewDecision::Approve => SubmissionStatus::Approved,
            ReviewDecision::Reject => SubmissionStatus::Rejected,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Submission {
    pub id: Uuid,
    pub enrollment_id: Uuid,
    pub challenge_id: Uuid,
    pub user_id: Uuid,
    pub content: String,
    pub status: SubmissionStatus,
    pub points_awarded: Option<i32>,
    pub reviewer_id: Option<Uuid>,
    pub review_notes: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for a new submission
#[derive(Debug, Clone)]
pub struct CreateSubmission {
    pub workspace_id: Uuid,
    pub enrollment_id: Uuid,
    pub challenge_id: Uuid,
    pub user_id: Uuid,
    pub content: String,

    /// Set when the challenge skips review: the submission is approved with
    /// these points on insert
    pub auto_approve_points: Option<i32>,
}

/// Admin review input
#[derive(Debug, Clone)]
pub struct Review {
    pub decision: ReviewDecision,
    pub points: Option<i32>,
    pub notes: Option<String>,
    pub reviewer_id: Uuid,
}

/// Result of a review attempt
#[derive(Debug, Clone)]
pub enum ReviewOutcome {
    Reviewed(Submission),
    NotFound,

    /// The submission was already approved or rejected
    AlreadyReviewed(SubmissionStatus),
}

const SUBMISSION_COLUMNS: &str = "id, enrollment_id, challenge_id, user_id, content, status, \
                                  points_awarded, reviewer_id, review_notes, reviewed_at, \
                                  created_at, updated_at";

impl Submission {
    /// Stores a submission, approving it immediately when review is skipped
    pub async fn create(pool: &PgPool, data: CreateSubmission) -> Result<Self, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let (status, points, reviewed_at) = match data.auto_approve_points {
            Some(points) => (SubmissionStatus::Approved, Some(points), Some(Utc::now())),
            None => (SubmissionStatus::Pending, None, None),
        };

        let query = format!(
            r#"
            INSERT INTO submissions (enrollment_id, challenge_id, user_id, content, status,
                                     points_awarded, reviewed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {SUBMISSION_COLUMNS}
            "#
        );
        let submission = sqlx::query_as::<_, Submission>(&query)
            .bind(data.enrollment_id)
            .bind(data.challenge_id)
            .bind(data.user_id)
            .bind(data.content)
            .bind(status)
            .bind(points)
            .bind(reviewed_at)
            .fetch_one(&mut *tx)
            .await?;

        if let Some(points) = points.filter(|p| *p > 0) {
            PointsBalance::credit_in_tx(&mut tx, data.workspace_id, data.user_id, points as i64)
                .await?;
        }

        tx.commit().await?;
        Ok(submission)
    }

    /// Finds a submission belonging to a challenge in the given workspace
    pub async fn find_in_workspace(
        pool: &PgPool,
        workspace_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Submission>(
            r#"
            SELECT s.id, s.enrollment_id, s.challenge_id, s.user_id, s.content, s.status,
                   s.points_awarded, s.reviewer_id, s.review_notes, s.reviewed_at,
                   s.created_at, s.updated_at
            FROM submissions s
            JOIN challenges c ON c.id = s.challenge_id
            WHERE c.workspace_id = $1 AND s.id = $2
            "#,
        )
        .bind(workspace_id)
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    /// Lists submissions for a challenge, optionally only one user's
    pub async fn list_by_challenge(
        pool: &PgPool,
        challenge_id: Uuid,
        user_id: Option<Uuid>,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let query = format!(
            "SELECT {SUBMISSION_COLUMNS} FROM submissions \
             WHERE challenge_id = $1 AND ($2::uuid IS NULL OR user_id = $2) \
             ORDER BY created_at DESC"
        );

        sqlx::query_as::<_, Submission>(&query)
            .bind(challenge_id)
            .bind(user_id)
            .fetch_all(pool)
            .await
    }

    /// Reviews a pending submission and credits points on approval
    ///
    /// The submission row is locked for the duration so two reviewers cannot
    /// both approve it.
    pub async fn review(
        pool: &PgPool,
        workspace_id: Uuid,
        id: Uuid,
        review: Review,
    ) -> Result<ReviewOutcome, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let locked: Option<(SubmissionStatus, Uuid, i32)> = sqlx::query_as(
            r#"
            SELECT s.status, s.user_id, c.points_per_submission
            FROM submissions s
            JOIN challenges c ON c.id = s.challenge_id
            WHERE c.workspace_id = $1 AND s.id = $2
            FOR UPDATE OF s
            "#,
        )
        .bind(workspace_id)
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((status, user_id, default_points)) = locked else {
            return Ok(ReviewOutcome::NotFound);
        };
        if status != SubmissionStatus::Pending {
            return Ok(ReviewOutcome::AlreadyReviewed(status));
        }

        let points = match review.decision {
            ReviewDecision::Approve => Some(review.points.unwrap_or(default_points).max(0)),
            ReviewDecision::Reject => None,
        };

        let query = format!(
            r#"
            UPDATE submissions
            SET status = $2, points_awarded = $3, reviewer_id = $4, review_notes = $5,
                reviewed_at = NOW(), updated_at = NOW()
            WHERE id = $1
            RETURNING {SUBMISSION_COLUMNS}
            "#
        );
        let submission = sqlx::query_as::<_, Submission>(&query)
            .bind(id)
            .bind(review.decision.resulting_status())
            .bind(points)
            .bind(review.reviewer_id)
            .bind(review.notes)
            .fetch_one(&mut *tx)
            .await?;

        if let Some(points) = points.filter(|p| *p > 0) {
            PointsBalance::credit_in_tx(&mut tx, workspace_id, user_id, points as i64).await?;
        }

        tx.commit().await?;
        Ok(ReviewOutcome::Reviewed(submission))
    }
}
