/// Membership model and database operations
///
/// Memberships link users to workspaces with a role. Each user may mark at
/// most one membership as primary: the workspace they land in by default.
///
/// # Schema
///
/// ```sql
/// CREATE TYPE workspace_role AS ENUM ('admin', 'participant');
///
/// CREATE TABLE workspace_memberships (
///     user_id UUID NOT NULL REFERENCES users(id) ON DELETE CASCADE,
///     workspace_id UUID NOT NULL REFERENCES workspaces(id) ON DELETE CASCADE,
///     role workspace_role NOT NULL DEFAULT 'participant',
///     is_primary BOOLEAN NOT NULL DEFAULT FALSE,
///     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
///     PRIMARY KEY (user_id, workspace_id)
/// );
///
/// CREATE UNIQUE INDEX workspace_memberships_one_primary
///     ON workspace_memberships (user_id) WHERE is_primary;
/// ```
///
/// # Roles
///
/// - **admin**: Manage the workspace, its members, challenges, rewards and email
/// - **participant**: Enroll in challenges and submit work
///
/// # Example
///
/// ```no_run
/// use changemaker_shared::models::membership::{Membership, WorkspaceRole};
/// use sqlx::PgPool;
/// use uuid::Uuid;
///
/// # async fn example(pool: PgPool, workspace_id: Uuid, user_id: Uuid) -> Result<(), sqlx::Error> {
/// if let Some(membership) = Membership::find(&pool, workspace_id, user_id).await? {
///     println!("admin: {}", membership.role.has_permission(&WorkspaceRole::Admin));
/// }
///
/// // Make this the user's default workspace
/// Membership::set_primary(&pool, user_id, workspace_id).await?;
/// # Ok(())
/// # }
/// ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::workspace::lock_workspace;

/// Roles within a workspace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "workspace_role", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum WorkspaceRole {
    /// Full control over the workspace
    Admin,

    /// Can enroll, submit and view their own rewards
    Participant,
}

impl WorkspaceRole {
    /// Converts role to string for display
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkspaceRole::Admin => "admin",
            WorkspaceRole::Participant => "participant",
        }
    }

    /// Checks if this role has the permission level of the required role
    ///
    /// Hierarchy: Admin > Participant
    pub fn has_permission(&self, required: &WorkspaceRole) -> bool {
        self.permission_level() >= required.permission_level()
    }

    fn permission_level(&self) -> u8 {
        match self {
            WorkspaceRole::Admin => 2,
            WorkspaceRole::Participant => 1,
        }
    }
}

impl std::str::FromStr for WorkspaceRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(WorkspaceRole::Admin),
            "participant" => Ok(WorkspaceRole::Participant),
            other => Err(format!("unknown workspace role '{}'", other)),
        }
    }
}

/// Membership linking a user to a workspace
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Membership {
    /// User ID
    pub user_id: Uuid,

    /// Workspace ID
    pub workspace_id: Uuid,

    /// Role within the workspace
    pub role: WorkspaceRole,

    /// Whether this is the user's default workspace
    pub is_primary: bool,

    /// When the user joined
    pub created_at: DateTime<Utc>,
}

/// Membership joined with the member's profile, for member listings
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct MemberDetail {
    pub user_id: Uuid,
    pub email: String,
    pub display_name: Option<String>,
    pub role: WorkspaceRole,
    pub is_primary: bool,
    pub created_at: DateTime<Utc>,
}

/// Membership joined with its workspace, for `GET /me`
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct UserWorkspace {
    pub workspace_id: Uuid,
    pub slug: String,
    pub name: String,
    pub role: WorkspaceRole,
    pub is_primary: bool,
}

/// Outcome of a role change or removal
#[derive(Debug, Clone)]
pub enum MembershipChange {
    /// The membership was updated (or removed, for deletions)
    Applied(Option<Membership>),

    /// No such membership
    NotFound,

    /// The change would leave the workspace without an admin
    LastAdmin,
}

const MEMBERSHIP_COLUMNS: &str = "user_id, workspace_id, role, is_primary, created_at";

impl Membership {
    /// Inserts a membership inside an existing transaction
    ///
    /// The membership becomes primary when the user has no primary workspace.
    ///
    /// # Errors
    ///
    /// Returns a unique constraint violation if the user is already a member.
    pub async fn insert_in_tx(
        tx: &mut Transaction<'_, Postgres>,
        user_id: Uuid,
        workspace_id: Uuid,
        role: WorkspaceRole,
    ) -> Result<Self, sqlx::Error> {
        let query = format!(
            r#"
            INSERT INTO workspace_memberships (user_id, workspace_id, role, is_primary)
            VALUES ($1, $2, $3, NOT EXISTS (
                SELECT 1 FROM workspace_memberships WHERE user_id = $1 AND is_primary
            ))
            RETURNING {MEMBERSHIP_COLUMNS}
            "#
        );

        sqlx::query_as::<_, Membership>(&query)
            .bind(user_id)
            .bind(workspace_id)
            .bind(role)
            .fetch_one(&mut **tx)
            .await
    }

    /// Finds a specific membership
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use changemaker_shared::models::membership::Membership;
    /// # use sqlx::PgPool;
    /// # use uuid::Uuid;
    /// # async fn example(pool: PgPool, workspace_id: Uuid, user_id: Uuid) -> Result<(), sqlx::Error> {
    /// if let Some(membership) = Membership::find(&pool, workspace_id, user_id).await? {
    ///     println!("User role: {}", membership.role.as_str());
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub async fn find(
        pool: &PgPool,
        workspace_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        let query = format!(
            "SELECT {MEMBERSHIP_COLUMNS} FROM workspace_memberships \
             WHERE workspace_id = $1 AND user_id = $2"
        );

        sqlx::query_as::<_, Membership>(&query)
            .bind(workspace_id)
            .bind(user_id)
            .fetch_optional(pool)
            .await
    }

    /// Lists the user's workspaces with role and primary flag
    pub async fn list_by_user(
        pool: &PgPool,
        user_id: Uuid,
    ) -> Result<Vec<UserWorkspace>, sqlx::Error> {
        sqlx::query_as::<_, UserWorkspace>(
            r#"
            SELECT w.id AS workspace_id, w.slug, w.name, m.role, m.is_primary
            FROM workspace_memberships m
            JOIN workspaces w ON w.id = m.workspace_id
            WHERE m.user_id = $1
            ORDER BY m.is_primary DESC, w.name ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(pool)
        .await
    }

    /// Lists the members of a workspace with their profiles
    pub async fn list_by_workspace(
        pool: &PgPool,
        workspace_id: Uuid,
    ) -> Result<Vec<MemberDetail>, sqlx::Error> {
        sqlx::query_as::<_, MemberDetail>(
            r#"
            SELECT m.user_id, u.email, u.display_name, m.role, m.is_primary, m.created_at
            FROM workspace_memberships m
            JOIN users u ON u.id = m.user_id
            WHERE m.workspace_id = $1
            ORDER BY m.created_at ASC
            "#,
        )
        .bind(workspace_id)
        .fetch_all(pool)
        .await
    }

    /// Counts admins in a workspace
    pub async fn count_admins(pool: &PgPool, workspace_id: Uuid) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT COUNT(*) FROM workspace_memberships WHERE workspace_id = $1 AND role = 'admin'",
        )
        .bind(workspace_id)
        .fetch_one(pool)
        .await
    }

    /// Makes `workspace_id` the user's primary workspace
    ///
    /// Clears any other primary flag first, in the same transaction, so the
    /// one-primary index never sees two rows.
    ///
    /// # Returns
    ///
    /// The updated membership, or `None` if the user is not a member.
    pub async fn set_primary(
        pool: &PgPool,
        user_id: Uuid,
        workspace_id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM workspace_memberships WHERE user_id = $1 AND workspace_id = $2)",
        )
        .bind(user_id)
        .bind(workspace_id)
        .fetch_one(&mut *tx)
        .await?;

        if !exists {
            return Ok(None);
        }

        sqlx::query(
            "UPDATE workspace_memberships SET is_primary = FALSE \
             WHERE user_id = $1 AND is_primary AND workspace_id <> $2",
        )
        .bind(user_id)
        .bind(workspace_id)
        .execute(&mut *tx)
        .await?;

        let query = format!(
            "UPDATE workspace_memberships SET is_primary = TRUE \
             WHERE user_id = $1 AND workspace_id = $2 RETURNING {MEMBERSHIP_COLUMNS}"
        );
        let membership = sqlx::query_as::<_, Membership>(&query)
            .bind(user_id)
            .bind(workspace_id)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Some(membership))
    }

    /// Changes a member's role
    ///
    /// Refuses to demote the last admin of the workspace.
    pub async fn update_role(
        pool: &PgPool,
        workspace_id: Uuid,
        user_id: Uuid,
        role: WorkspaceRole,
    ) -> Result<MembershipChange, sqlx::Error> {
        let mut tx = pool.begin().await?;
        lock_workspace(&mut tx, workspace_id).await?;

        let Some(current) = find_in_tx(&mut tx, workspace_id, user_id).await? else {
            return Ok(MembershipChange::NotFound);
        };

        if current.role == WorkspaceRole::Admin
            && role != WorkspaceRole::Admin
            && count_admins_in_tx(&mut tx, workspace_id).await? <= 1
        {
            return Ok(MembershipChange::LastAdmin);
        }

        let query = format!(
            "UPDATE workspace_memberships SET role = $3 \
             WHERE workspace_id = $1 AND user_id = $2 RETURNING {MEMBERSHIP_COLUMNS}"
        );
        let membership = sqlx::query_as::<_, Membership>(&query)
            .bind(workspace_id)
            .bind(user_id)
            .bind(role)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(MembershipChange::Applied(Some(membership)))
    }

    /// Removes a user from a workspace
    ///
    /// Refuses to remove the last admin. If the removed membership was the
    /// user's primary, their oldest remaining membership becomes primary.
    pub async fn remove(
        pool: &PgPool,
        workspace_id: Uuid,
        user_id: Uuid,
    ) -> Result<MembershipChange, sqlx::Error> {
        let mut tx = pool.begin().await?;
        lock_workspace(&mut tx, workspace_id).await?;

        let Some(current) = find_in_tx(&mut tx, workspace_id, user_id).await? else {
            return Ok(MembershipChange::NotFound);
        };

        if current.role == WorkspaceRole::Admin
            && count_admins_in_tx(&mut tx, workspace_id).await? <= 1
        {
            return Ok(MembershipChange::LastAdmin);
        }

        sqlx::query("DELETE FROM workspace_memberships WHERE workspace_id = $1 AND user_id = $2")
            .bind(workspace_id)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        if current.is_primary {
            sqlx::query(
                r#"
                UPDATE workspace_memberships SET is_primary = TRUE
                WHERE user_id = $1 AND workspace_id = (
                    SELECT workspace_id FROM workspace_memberships
                    WHERE user_id = $1
                    ORDER BY created_at ASC
                    LIMIT 1
                )
                "#,
            )
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(MembershipChange::Applied(None))
    }
}

async fn find_in_tx(
    tx: &mut Transaction<'_, Postgres>,
    workspace_id: Uuid,
    user_id: Uuid,
) -> Result<Option<Membership>, sqlx::Error> {
    let query = format!(
        "SELECT {MEMBERSHIP_COLUMNS} FROM workspace_memberships \
         WHERE workspace_id = $1 AND user_id = $2"
    );

    sqlx::query_as::<_, Membership>(&query)
        .bind(workspace_id)
        .bind(user_id)
        .fetch_optional(&mut **tx)
        .await
}

async fn count_admins_in_tx(
    tx: &mut Transaction<'_, Postgres>,
    workspace_id: Uuid,
) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar(
        "SELECT COUNT(*) FROM workspace_memberships WHERE workspace_id = $1 AND role = 'admin'",
    )
    .bind(workspace_id)
    .fetch_one(&mut **tx)
    .await
}
