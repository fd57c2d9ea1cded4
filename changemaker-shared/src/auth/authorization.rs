/// Workspace authorization checks
///
/// Authorization is a lookup on `workspace_memberships`:
///
/// 1. **Membership**: the caller must belong to the workspace
/// 2. **Role**: admin-only operations require `WorkspaceRole::Admin`
/// 3. **Self-service**: some member operations are allowed on oneself
///
/// Platform administrators pass every check, acting as a workspace admin.
///
/// # Example
///
/// ```no_run
/// use changemaker_shared::auth::authorization::{require_admin, require_membership};
/// use changemaker_shared::auth::middleware::AuthContext;
/// use sqlx::PgPool;
/// use uuid::Uuid;
///
/// async fn check(pool: &PgPool, auth: &AuthContext, workspace_id: Uuid) -> Result<(), Box<dyn std::error::Error>> {
///     let membership = require_membership(pool, workspace_id, auth).await?;
///     println!("role: {}", membership.role.as_str());
///
///     require_admin(pool, workspace_id, auth).await?;
///     Ok(())
/// }
/// ```

use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use super::middleware::AuthContext;
use crate::models::membership::{Membership, WorkspaceRole};

/// Error type for authorization checks
#[derive(Debug, thiserror::Error)]
pub enum AuthzError {
    /// User is not a member of the workspace
    #[error("Not a member of workspace {0}")]
    NotMember(Uuid),

    /// User doesn't have the required role
    #[error("Insufficient permissions: requires {required:?}, has {actual:?}")]
    InsufficientRole {
        required: WorkspaceRole,
        actual: WorkspaceRole,
    },

    /// Database error
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),
}

/// Decides access from an already-loaded membership
///
/// Platform admins without a membership get a synthetic admin membership.
pub fn authorize(
    auth: &AuthContext,
    workspace_id: Uuid,
    membership: Option<Membership>,
    required: WorkspaceRole,
) -> Result<Membership, AuthzError> {
    let membership = match membership {
        Some(m) if auth.is_platform_admin => Membership {
            role: WorkspaceRole::Admin,
            ..m
        },
        Some(m) => m,
        None if auth.is_platform_admin => Membership {
            user_id: auth.user_id,
            workspace_id,
            role: WorkspaceRole::Admin,
            is_primary: false,
            created_at: Utc::now(),
        },
        None => return Err(AuthzError::NotMember(workspace_id)),
    };

    if !membership.role.has_permission(&required) {
        return Err(AuthzError::InsufficientRole {
            required,
            actual: membership.role,
        });
    }

    Ok(membership)
}

/// Requires the caller to be a member of the workspace (any role)
///
/// # Errors
///
/// Returns `AuthzError::NotMember` if the caller doesn't belong to it.
pub async fn require_membership(
    pool: &PgPool,
    workspace_id: Uuid,
    auth: &AuthContext,
) -> Result<Membership, AuthzError> {
    let membership = Membership::find(pool, workspace_id, auth.user_id).await?;
    authorize(auth, workspace_id, membership, WorkspaceRole::Participant)
}

/// Requires the caller to be a workspace admin
///
/// # Errors
///
/// Returns `AuthzError::NotMember` or `AuthzError::InsufficientRole`.
pub async fn require_admin(
    pool: &PgPool,
    workspace_id: Uuid,
    auth: &AuthContext,
) -> Result<Membership, AuthzError> {
    let membership = Membership::find(pool, workspace_id, auth.user_id).await?;
    authorize(auth, workspace_id, membership, WorkspaceRole::Admin)
}

/// Allows the operation on the caller's own record, otherwise requires admin
pub async fn require_self_or_admin(
    pool: &PgPool,
    workspace_id: Uuid,
    auth: &AuthContext,
    target_user_id: Uuid,
) -> Result<Membership, AuthzError> {
    if auth.user_id == target_user_id {
        require_membership(pool, workspace_id, auth).await
    } else {
        require_admin(pool, workspace_id, auth).await
    }
}
