/// API route handlers
///
/// This module contains all route handlers organized by resource:
///
/// - `health`: Health check endpoint
/// - `me`: The caller's profile and memberships
/// - `workspaces`, `members`, `invites`: tenancy
/// - `challenges`, `enrollments`, `submissions`: challenge lifecycle
/// - `rewards`, `webhooks`: points, reward issuance and RewardSTACK callbacks
/// - `email_templates`, `emails`, `ai`: communication tooling
/// - `activity`: workspace activity feed

pub mod activity;
pub mod ai;
pub mod challenges;
pub mod email_templates;
pub mod emails;
pub mod enrollments;
pub mod health;
pub mod invites;
pub mod me;
pub mod members;
pub mod rewards;
pub mod submissions;
pub mod webhooks;
pub mod workspaces;

use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
};
use changemaker_shared::{
    auth::{
        authorization::{require_admin, require_membership},
        middleware::AuthContext,
    },
    models::{
        activity_event::{ActivityEvent, NewActivityEvent},
        membership::Membership,
        workspace::Workspace,
    },
};
use serde::{Deserialize, Deserializer};

/// Default and maximum page sizes for list endpoints
pub(crate) const DEFAULT_LIMIT: i64 = 50;
pub(crate) const MAX_LIMIT: i64 = 200;

/// `?limit=` query parameter
#[derive(Debug, Default, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<i64>,
}

impl LimitQuery {
    pub fn clamped(&self) -> i64 {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
    }
}

/// Distinguishes an absent field (`None`) from an explicit `null` (`Some(None)`)
///
/// Use with `#[serde(default, deserialize_with = "double_option")]`.
pub(crate) fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Looks up a workspace by slug, 404 if missing
pub(crate) async fn workspace_by_slug(state: &AppState, slug: &str) -> ApiResult<Workspace> {
    Workspace::find_by_slug(&state.db, slug)
        .await?
        .ok_or_else(|| ApiError::NotFound("Workspace not found".to_string()))
}

/// Resolves the workspace and checks the caller belongs to it
pub(crate) async fn member_workspace(
    state: &AppState,
    auth: &AuthContext,
    slug: &str,
) -> ApiResult<(Workspace, Membership)> {
    let workspace = workspace_by_slug(state, slug).await?;
    let membership = require_membership(&state.db, workspace.id, auth).await?;
    Ok((workspace, membership))
}

/// Resolves the workspace and checks the caller administers it
pub(crate) async fn admin_workspace(
    state: &AppState,
    auth: &AuthContext,
    slug: &str,
) -> ApiResult<(Workspace, Membership)> {
    let workspace = workspace_by_slug(state, slug).await?;
    let membership = require_admin(&state.db, workspace.id, auth).await?;
    Ok((workspace, membership))
}

/// Records an activity event; failures are logged and otherwise ignored
pub(crate) async fn record_activity(state: &AppState, event: NewActivityEvent) {
    let event_type = event.event_type;
    if let Err(e) = ActivityEvent::record(&state.db, event).await {
        tracing::warn!(error = %e, event_type, "Failed to record activity event");
    }
}
