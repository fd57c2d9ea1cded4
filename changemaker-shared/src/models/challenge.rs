/// Challenge model and database operations
///
/// A challenge is a time-boxed activity inside a workspace. Participants can
/// enroll while it is published and before the enrollment deadline, and can
/// submit while `starts_at <= now <= ends_at`.
///
/// # Schema
///
/// ```sql
/// CREATE TYPE challenge_status AS ENUM ('draft', 'published', 'archived');
///
/// CREATE TABLE challenges (
///     id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
///     workspace_id UUID NOT NULL REFERENCES workspaces(id) ON DELETE CASCADE,
///     title VARCHAR(200) NOT NULL,
///     description TEXT NOT NULL DEFAULT '',
///     status challenge_status NOT NULL DEFAULT 'draft',
///     starts_at TIMESTAMPTZ NOT NULL,
///     ends_at TIMESTAMPTZ NOT NULL,
///     enrollment_deadline TIMESTAMPTZ,
///     points_per_submission INTEGER NOT NULL DEFAULT 0,
///     requires_approval BOOLEAN NOT NULL DEFAULT TRUE,
///     ...
/// );
/// ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

/// Publication status of a challenge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "challenge_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ChallengeStatus {
    /// Visible to admins only
    Draft,

    /// Visible to participants, open for enrollment
    Published,

    /// Closed and hidden from participants
    Archived,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Challenge {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub title: String,
    pub description: String,
    pub status: ChallengeStatus,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,

    /// Last moment a participant may enroll; defaults to `ends_at`
    pub enrollment_deadline: Option<DateTime<Utc>>,

    /// Points credited for an approved submission
    pub points_per_submission: i32,

    /// Without approval, submissions are approved on arrival
    pub requires_approval: bool,

    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateChallenge {
    pub workspace_id: Uuid,
    pub title: String,
    pub description: String,
    pub status: ChallengeStatus,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub enrollment_deadline: Option<DateTime<Utc>>,
    pub points_per_submission: i32,
    pub requires_approval: bool,
    pub created_by: Uuid,
}

/// Partial update; `None` leaves a field unchanged
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateChallenge {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<ChallengeStatus>,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    pub enrollment_deadline: Option<Option<DateTime<Utc>>>,
    pub points_per_submission: Option<i32>,
    pub requires_approval: Option<bool>,
}

/// Checks the schedule and points rules shared by create and update
///
/// Returns the name of the offending field and a message.
pub fn validate_schedule(
    starts_at: DateTime<Utc>,
    ends_at: DateTime<Utc>,
    enrollment_deadline: Option<DateTime<Utc>>,
    points_per_submission: i32,
) -> Result<(), (&'static str, &'static str)> {
    if ends_at <= starts_at {
        return Err(("ends_at", "ends_at must be after starts_at"));
    }
    if enrollment_deadline.is_some_and(|deadline| deadline > ends_at) {
        return Err((
            "enrollment_deadline",
            "enrollment_deadline must not be after ends_at",
        ));
    }
    if points_per_submission < 0 {
        return Err((
            "points_per_submission",
            "points_per_submission must not be negative",
        ));
    }
    Ok(())
}

const CHALLENGE_COLUMNS: &str = "id, workspace_id, title, description, status, starts_at, ends_at, \
                                 enrollment_deadline, points_per_submission, requires_approval, \
                                 created_by, created_at, updated_at";

impl Challenge {
    /// Whether a participant may enroll at `now`
    pub fn is_enrollment_open(&self, now: DateTime<Utc>) -> bool {
        self.status == ChallengeStatus::Published
            && now <= self.enrollment_deadline.unwrap_or(self.ends_at)
    }

    /// Whether submissions are accepted at `now`
    pub fn is_running(&self, now: DateTime<Utc>) -> bool {
        self.status == ChallengeStatus::Published && self.starts_at <= now && now <= self.ends_at
    }

    /// Applies an update to a copy of this challenge without persisting it
    ///
    /// Used to validate the merged schedule before writing.
    pub fn merged(&self, update: &UpdateChallenge) -> Challenge {
        let mut merged = self.clone();
        if let Some(title) = &update.title {
            merged.title = title.clone();
        }
        if let Some(description) = &update.description {
            merged.description = description.clone();
        }
        if let Some(status) = update.status {
            merged.status = status;
        }
        if let Some(starts_at) = update.starts_at {
            merged.starts_at = starts_at;
        }
        if let Some(ends_at) = update.ends_at {
            merged.ends_at = ends_at;
        }
        if let Some(deadline) = update.enrollment_deadline {
            merged.enrollment_deadline = deadline;
        }
        if let Some(points) = update.points_per_submission {
            merged.points_per_submission = points;
        }
        if let Some(requires_approval) = update.requires_approval {
            merged.requires_approval = requires_approval;
        }
        merged
    }

    pub async fn create(pool: &PgPool, data: CreateChallenge) -> Result<Self, sqlx::Error> {
        let query = format!(
            r#"
            INSERT INTO challenges (workspace_id, title, description, status, starts_at, ends_at,
                                    enrollment_deadline, points_per_submission, requires_approval,
                                    created_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING {CHALLENGE_COLUMNS}
            "#
        );

        sqlx::query_as::<_, Challenge>(&query)
            .bind(data.workspace_id)
            .bind(data.title)
            .bind(data.description)
            .bind(data.status)
            .bind(data.starts_at)
            .bind(data.ends_at)
            .bind(data.enrollment_deadline)
            .bind(data.points_per_submission)
            .bind(data.requires_approval)
            .bind(data.created_by)
            .fetch_one(pool)
            .await
    }

    /// Finds a challenge, scoped to its workspace
    pub async fn find(
        pool: &PgPool,
        workspace_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        let query = format!(
            "SELECT {CHALLENGE_COLUMNS} FROM challenges WHERE workspace_id = $1 AND id = $2"
        );

        sqlx::query_as::<_, Challenge>(&query)
            .bind(workspace_id)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Lists challenges in a workspace, optionally filtered by status
    pub async fn list_by_workspace(
        pool: &PgPool,
        workspace_id: Uuid,
        status: Option<ChallengeStatus>,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let query = format!(
            "SELECT {CHALLENGE_COLUMNS} FROM challenges \
             WHERE workspace_id = $1 AND ($2::challenge_status IS NULL OR status = $2) \
             ORDER BY starts_at DESC"
        );

        sqlx::query_as::<_, Challenge>(&query)
            .bind(workspace_id)
            .bind(status)
            .fetch_all(pool)
            .await
    }

    /// Persists a validated update
    pub async fn update(
        pool: &PgPool,
        workspace_id: Uuid,
        id: Uuid,
        data: UpdateChallenge,
    ) -> Result<Option<Self>, sqlx::Error> {
        let query = format!(
            r#"
            UPDATE challenges SET
                title = COALESCE($3, title),
                description = COALESCE($4, description),
                status = COALESCE($5, status),
                starts_at = COALESCE($6, starts_at),
                ends_at = COALESCE($7, ends_at),
                enrollment_deadline = CASE WHEN $8 THEN $9 ELSE enrollment_deadline END,
                points_per_submission = COALESCE($10, points_per_submission),
                requires_approval = COALESCE($11, requires_approval),
                updated_at = NOW()
            WHERE workspace_id = $1 AND id = $2
            RETURNING {CHALLENGE_COLUMNS}
            "#
        );

        sqlx::query_as::<_, Challenge>(&query)
            .bind(workspace_id)
            .bind(id)
            .bind(data.title)
            .bind(data.description)
            .bind(data.status)
            .bind(data.starts_at)
            .bind(data.ends_at)
            .bind(data.enrollment_deadline.is_some())
            .bind(data.enrollment_deadline.flatten())
            .bind(data.points_per_submission)
            .bind(data.requires_approval)
            .fetch_optional(pool)
            .await
    }

    /// Returns true if any submission references the challenge
    pub async fn has_submissions(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM submissions WHERE challenge_id = $1)")
            .bind(id)
            .fetch_one(pool)
            .await
    }

    /// Deletes a challenge; enrollments cascade
    pub async fn delete(pool: &PgPool, workspace_id: Uuid, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM challenges WHERE workspace_id = $1 AND id = $2")
            .bind(workspace_id)
            .bind(id)
            .execute(pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
