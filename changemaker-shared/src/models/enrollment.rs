/// Enrollment of a participant in a challenge
///
/// There is one row per (challenge, user). Withdrawing keeps the row with
/// status `withdrawn` so re-enrolling reactivates it instead of inserting a
/// duplicate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "enrollment_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum EnrollmentStatus {
    Invited,
    Enrolled,
    Withdrawn,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Enrollment {
    pub id: Uuid,
    pub challenge_id: Uuid,
    pub user_id: Uuid,
    pub status: EnrollmentStatus,
    pub enrolled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Enrollment joined with the participant's profile
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct EnrollmentDetail {
    pub id: Uuid,
    pub user_id: Uuid,
    pub email: String,
    pub display_name: Option<String>,
    pub status: EnrollmentStatus,
    pub enrolled_at: Option<DateTime<Utc>>,
}

/// Result of a self-enrollment attempt
#[derive(Debug, Clone)]
pub enum EnrollOutcome {
    /// A new enrollment row was created
    Enrolled(Enrollment),

    /// An invited or withdrawn enrollment was (re)activated
    Reactivated(Enrollment),

    AlreadyEnrolled,
}

const ENROLLMENT_COLUMNS: &str =
    "id, challenge_id, user_id, status, enrolled_at, created_at, updated_at";

impl Enrollment {
    pub fn is_active(&self) -> bool {
        self.status == EnrollmentStatus::Enrolled
    }

    /// Enrolls the user, reactivating an earlier withdrawn or invited row
    pub async fn enroll(
        pool: &PgPool,
        challenge_id: Uuid,
        user_id: Uuid,
    ) -> Result<EnrollOutcome, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let select = format!(
            "SELECT {ENROLLMENT_COLUMNS} FROM enrollments \
             WHERE challenge_id = $1 AND user_id = $2 FOR UPDATE"
        );
        let existing = sqlx::query_as::<_, Enrollment>(&select)
            .bind(challenge_id)
            .bind(user_id)
            .fetch_optional(&mut *tx)
            .await?;

        let outcome = match existing {
            Some(enrollment) if enrollment.is_active() => EnrollOutcome::AlreadyEnrolled,
            Some(enrollment) => {
                let update = format!(
                    "UPDATE enrollments SET status = 'enrolled', enrolled_at = NOW(), updated_at = NOW() \
                     WHERE id = $1 RETURNING {ENROLLMENT_COLUMNS}"
                );
                let enrollment = sqlx::query_as::<_, Enrollment>(&update)
                    .bind(enrollment.id)
                    .fetch_one(&mut *tx)
                    .await?;
                EnrollOutcome::Reactivated(enrollment)
            }
            None => {
                let insert = format!(
                    "INSERT INTO enrollments (challenge_id, user_id, status, enrolled_at) \
                     VALUES ($1, $2, 'enrolled', NOW()) RETURNING {ENROLLMENT_COLUMNS}"
                );
                let enrollment = sqlx::query_as::<_, Enrollment>(&insert)
                    .bind(challenge_id)
                    .bind(user_id)
                    .fetch_one(&mut *tx)
                    .await?;
                EnrollOutcome::Enrolled(enrollment)
            }
        };

        tx.commit().await?;
        Ok(outcome)
    }

    /// Withdraws an active enrollment
    ///
    /// Returns `None` if the user is not currently enrolled.
    pub async fn withdraw(
        pool: &PgPool,
        challenge_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        let query = format!(
            "UPDATE enrollments SET status = 'withdrawn', updated_at = NOW() \
             WHERE challenge_id = $1 AND user_id = $2 AND status = 'enrolled' \
             RETURNING {ENROLLMENT_COLUMNS}"
        );

        sqlx::query_as::<_, Enrollment>(&query)
            .bind(challenge_id)
            .bind(user_id)
            .fetch_optional(pool)
            .await
    }

    pub async fn find(
        pool: &PgPool,
        challenge_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        let query = format!(
            "SELECT {ENROLLMENT_COLUMNS} FROM enrollments WHERE challenge_id = $1 AND user_id = $2"
        );

        sqlx::query_as::<_, Enrollment>(&query)
            .bind(challenge_id)
            .bind(user_id)
            .fetch_optional(pool)
            .await
    }

    pub async fn list_by_challenge(
        pool: &PgPool,
        challenge_id: Uuid,
    ) -> Result<Vec<EnrollmentDetail>, sqlx::Error> {
        sqlx::query_as::<_, EnrollmentDetail>(
            r#"
            SELECT e.id, e.user_id, u.email, u.display_name, e.status, e.enrolled_at
            FROM enrollments e
            JOIN users u ON u.id = e.user_id
            WHERE e.challenge_id = $1
            ORDER BY e.created_at ASC
            "#,
        )
        .bind(challenge_id)
        .fetch_all(pool)
        .await
    }
}
