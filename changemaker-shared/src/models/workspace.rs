/// Workspace model and database operations
///
/// A workspace is the tenant boundary: it owns challenges, members, email
/// templates and reward settings. Workspaces are addressed by slug in URLs.
///
/// # Schema
///
/// ```sql
/// CREATE TABLE workspaces (
///     id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
///     slug VARCHAR(48) NOT NULL UNIQUE,
///     name VARCHAR(120) NOT NULL,
///     description TEXT,
///     published BOOLEAN NOT NULL DEFAULT FALSE,
///     rewards_enabled BOOLEAN NOT NULL DEFAULT FALSE,
///     rewardstack_program_id VARCHAR(120),
///     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
///     updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
/// );
/// ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::membership::{Membership, WorkspaceRole};

const WORKSPACE_COLUMNS: &str = "id, slug, name, description, published, rewards_enabled, \
                                 rewardstack_program_id, created_at, updated_at";

/// Workspace (tenant)
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Workspace {
    pub id: Uuid,

    /// URL-safe identifier, `^[a-z0-9-]{3,48}$`
    pub slug: String,

    pub name: String,
    pub description: Option<String>,

    /// Whether the workspace is visible to participants
    pub published: bool,

    /// Whether approved submissions produce reward issuances
    pub rewards_enabled: bool,

    /// RewardSTACK program the workspace issues rewards from
    pub rewardstack_program_id: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a workspace
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateWorkspace {
    pub slug: String,
    pub name: String,
    pub description: Option<String>,
}

/// Admin-editable workspace settings; `None` leaves a field unchanged
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateWorkspace {
    pub name: Option<String>,
    pub description: Option<Option<String>>,
    pub published: Option<bool>,
    pub rewards_enabled: Option<bool>,
    pub rewardstack_program_id: Option<Option<String>>,
}

/// Returns true if the slug matches `^[a-z0-9-]{3,48}$`
pub fn is_valid_slug(slug: &str) -> bool {
    (3..=48).contains(&slug.len())
        && slug
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
}

impl Workspace {
    /// Creates a workspace and makes the creator its first admin
    ///
    /// The new membership becomes the creator's primary workspace when they
    /// don't already have one. Both rows are written in one transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the slug is taken (unique constraint violation) or
    /// violates the format check.
    pub async fn create_with_admin(
        pool: &PgPool,
        data: CreateWorkspace,
        creator_id: Uuid,
    ) -> Result<(Self, Membership), sqlx::Error> {
        let mut tx = pool.begin().await?;

        let query = format!(
            "INSERT INTO workspaces (slug, name, description) VALUES ($1, $2, $3) \
             RETURNING {WORKSPACE_COLUMNS}"
        );
        let workspace = sqlx::query_as::<_, Workspace>(&query)
            .bind(&data.slug)
            .bind(&data.name)
            .bind(&data.description)
            .fetch_one(&mut *tx)
            .await?;

        let membership =
            Membership::insert_in_tx(&mut tx, creator_id, workspace.id, WorkspaceRole::Admin)
                .await?;

        tx.commit().await?;
        Ok((workspace, membership))
    }

    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let query = format!("SELECT {WORKSPACE_COLUMNS} FROM workspaces WHERE id = $1");

        sqlx::query_as::<_, Workspace>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn find_by_slug(pool: &PgPool, slug: &str) -> Result<Option<Self>, sqlx::Error> {
        let query = format!("SELECT {WORKSPACE_COLUMNS} FROM workspaces WHERE slug = $1");

        sqlx::query_as::<_, Workspace>(&query)
            .bind(slug)
            .fetch_optional(pool)
            .await
    }

    /// Lists the workspaces a user belongs to, primary first
    pub async fn list_for_user(pool: &PgPool, user_id: Uuid) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Workspace>(
            r#"
            SELECT w.id, w.slug, w.name, w.description, w.published, w.rewards_enabled,
                   w.rewardstack_program_id, w.created_at, w.updated_at
            FROM workspaces w
            JOIN workspace_memberships m ON m.workspace_id = w.id
            WHERE m.user_id = $1
            ORDER BY m.is_primary DESC, w.name ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(pool)
        .await
    }

    /// Applies admin settings changes
    pub async fn update(
        pool: &PgPool,
        id: Uuid,
        data: UpdateWorkspace,
    ) -> Result<Option<Self>, sqlx::Error> {
        // Nullable columns carry an explicit "set" flag so they can be cleared
        let query = format!(
            r#"
            UPDATE workspaces SET
                name = COALESCE($2, name),
                description = CASE WHEN $3 THEN $4 ELSE description END,
                published = COALESCE($5, published),
                rewards_enabled = COALESCE($6, rewards_enabled),
                rewardstack_program_id = CASE WHEN $7 THEN $8 ELSE rewardstack_program_id END,
                updated_at = NOW()
            WHERE id = $1
            RETURNING {WORKSPACE_COLUMNS}
            "#
        );

        sqlx::query_as::<_, Workspace>(&query)
            .bind(id)
            .bind(data.name)
            .bind(data.description.is_some())
            .bind(data.description.flatten())
            .bind(data.published)
            .bind(data.rewards_enabled)
            .bind(data.rewardstack_program_id.is_some())
            .bind(data.rewardstack_program_id.flatten())
            .fetch_optional(pool)
            .await
    }

    /// True when approved work should be turned into RewardSTACK issuances
    pub fn can_issue_rewards(&self) -> bool {
        self.rewards_enabled
            && self
                .rewardstack_program_id
                .as_deref()
                .is_some_and(|p| !p.trim().is_empty())
    }
}

/// Locks the workspace row for the rest of the transaction
///
/// Serializes membership changes that must keep at least one admin.
pub async fn lock_workspace(
    tx: &mut Transaction<'_, Postgres>,
    workspace_id: Uuid,
) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT id FROM workspaces WHERE id = $1 FOR UPDATE")
        .bind(workspace_id)
        .execute(&mut **tx)
        .await?;
    Ok(())
}
