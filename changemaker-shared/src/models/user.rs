/// User model and database operations
///
/// Users are provisioned from Supabase sessions: the first authenticated
/// request for a Supabase account creates the local row, later requests keep
/// the email and `last_seen_at` current. Users belong to workspaces through
/// the membership model.
///
/// # Schema
///
/// ```sql
/// CREATE TABLE users (
///     id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
///     supabase_user_id UUID NOT NULL UNIQUE,
///     email VARCHAR(320) NOT NULL UNIQUE,
///     display_name VARCHAR(120),
///     is_platform_admin BOOLEAN NOT NULL DEFAULT FALSE,
///     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
///     updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
///     last_seen_at TIMESTAMPTZ
/// );
/// ```
///
/// # Example
///
/// ```no_run
/// use changemaker_shared::models::user::User;
/// use sqlx::PgPool;
/// use uuid::Uuid;
///
/// # async fn example(pool: PgPool) -> Result<(), sqlx::Error> {
/// let user = User::upsert_from_session(&pool, Uuid::new_v4(), "ada@example.com").await?;
/// println!("Local user: {}", user.id);
/// # Ok(())
/// # }
/// ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

const USER_COLUMNS: &str = "id, supabase_user_id, email, display_name, is_platform_admin, \
                            created_at, updated_at, last_seen_at";

/// Local user account mirrored from Supabase
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    /// Local user ID
    pub id: Uuid,

    /// Supabase auth user ID (`sub` claim)
    pub supabase_user_id: Uuid,

    /// Email address, unique across users
    pub email: String,

    /// Optional display name
    pub display_name: Option<String>,

    /// Platform administrators pass every workspace check
    pub is_platform_admin: bool,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Last authenticated request
    pub last_seen_at: Option<DateTime<Utc>>,
}

/// Profile fields a user may change about themselves
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateProfile {
    /// New display name (use Some(None) to clear)
    pub display_name: Option<Option<String>>,
}

impl User {
    /// Creates or refreshes the local row for a Supabase account
    ///
    /// Inserts a new user the first time a Supabase account is seen. For known
    /// accounts the email is kept in sync and `last_seen_at` is bumped.
    ///
    /// # Errors
    ///
    /// Returns an error if the email is already used by a different Supabase
    /// account (unique constraint violation) or the database is unreachable.
    pub async fn upsert_from_session(
        pool: &PgPool,
        supabase_user_id: Uuid,
        email: &str,
    ) -> Result<Self, sqlx::Error> {
        let query = format!(
            r#"
            INSERT INTO users (supabase_user_id, email, last_seen_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (supabase_user_id) DO UPDATE
            SET email = EXCLUDED.email,
                last_seen_at = NOW(),
                updated_at = CASE WHEN users.email <> EXCLUDED.email
                                  THEN NOW() ELSE users.updated_at END
            RETURNING {USER_COLUMNS}
            "#
        );

        sqlx::query_as::<_, User>(&query)
            .bind(supabase_user_id)
            .bind(email.trim().to_lowercase())
            .fetch_one(pool)
            .await
    }

    /// Finds a user by local ID
    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");

        sqlx::query_as::<_, User>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Updates the user's own profile
    ///
    /// Returns `None` if the user doesn't exist.
    pub async fn update_profile(
        pool: &PgPool,
        id: Uuid,
        data: UpdateProfile,
    ) -> Result<Option<Self>, sqlx::Error> {
        let Some(display_name) = data.display_name else {
            return Self::find_by_id(pool, id).await;
        };

        let query = format!(
            "UPDATE users SET display_name = $2, updated_at = NOW() \
             WHERE id = $1 RETURNING {USER_COLUMNS}"
        );

        sqlx::query_as::<_, User>(&query)
            .bind(id)
            .bind(display_name)
            .fetch_optional(pool)
            .await
    }

    /// Users with a membership in the workspace
    pub async fn list_workspace_members(
        pool: &PgPool,
        workspace_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, User>(
            r#"
            SELECT u.id, u.supabase_user_id, u.email, u.display_name, u.is_platform_admin,
                   u.created_at, u.updated_at, u.last_seen_at
            FROM users u
            JOIN workspace_memberships m ON m.user_id = u.id
            WHERE m.workspace_id = $1
            ORDER BY u.email
            "#,
        )
        .bind(workspace_id)
        .fetch_all(pool)
        .await
    }

    /// Users actively enrolled in the challenge
    pub async fn list_enrolled(pool: &PgPool, challenge_id: Uuid) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, User>(
            r#"
            SELECT u.id, u.supabase_user_id, u.email, u.display_name, u.is_platform_admin,
                   u.created_at, u.updated_at, u.last_seen_at
            FROM users u
            JOIN enrollments e ON e.user_id = u.id
            WHERE e.challenge_id = $1 AND e.status = 'enrolled'
            ORDER BY u.email
            "#,
        )
        .bind(challenge_id)
        .fetch_all(pool)
        .await
    }

    /// Name to greet the user with in emails
    pub fn greeting_name(&self) -> &str {
        match self.display_name.as_deref() {
            Some(name) if !name.trim().is_empty() => name,
            _ => self.email.split('@').next().unwrap_or(&self.email),
        }
    }
}
