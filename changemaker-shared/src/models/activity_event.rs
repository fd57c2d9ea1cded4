/// Workspace activity log
///
/// Append-only record of notable actions (enrollments, reviews, reward
/// grants, member changes) shown to workspace admins.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

/// Event type names written by the API
pub mod kinds {
    pub const WORKSPACE_CREATED: &str = "workspace.created";
    pub const MEMBER_JOINED: &str = "member.joined";
    pub const MEMBER_ROLE_CHANGED: &str = "member.role_changed";
    pub const MEMBER_REMOVED: &str = "member.removed";
    pub const CHALLENGE_CREATED: &str = "challenge.created";
    pub const ENROLLMENT_CREATED: &str = "enrollment.created";
    pub const ENROLLMENT_WITHDRAWN: &str = "enrollment.withdrawn";
    pub const SUBMISSION_CREATED: &str = "submission.created";
    pub const SUBMISSION_REVIEWED: &str = "submission.reviewed";
    pub const REWARD_ISSUED: &str = "reward.issued";
    pub const REWARD_STATUS_CHANGED: &str = "reward.status_changed";
    pub const EMAIL_SENT: &str = "email.sent";
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ActivityEvent {
    pub id: Uuid,
    pub workspace_id: Uuid,

    /// User the event is about
    pub user_id: Option<Uuid>,

    /// User who caused it
    pub actor_id: Option<Uuid>,

    pub event_type: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewActivityEvent {
    pub workspace_id: Uuid,
    pub user_id: Option<Uuid>,
    pub actor_id: Option<Uuid>,
    pub event_type: &'static str,
    pub payload: serde_json::Value,
}

impl NewActivityEvent {
    pub fn new(workspace_id: Uuid, event_type: &'static str) -> Self {
        Self {
            workspace_id,
            user_id: None,
            actor_id: None,
            event_type,
            payload: serde_json::json!({}),
        }
    }

    pub fn user(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn actor(mut self, actor_id: Uuid) -> Self {
        self.actor_id = Some(actor_id);
        self
    }

    pub fn payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

const EVENT_COLUMNS: &str = "id, workspace_id, user_id, actor_id, event_type, payload, created_at";

impl ActivityEvent {
    pub async fn record(pool: &PgPool, event: NewActivityEvent) -> Result<Self, sqlx::Error> {
        let query = format!(
            "INSERT INTO activity_events (workspace_id, user_id, actor_id, event_type, payload) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {EVENT_COLUMNS}"
        );

        sqlx::query_as::<_, ActivityEvent>(&query)
            .bind(event.workspace_id)
            .bind(event.user_id)
            .bind(event.actor_id)
            .bind(event.event_type)
            .bind(event.payload)
            .fetch_one(pool)
            .await
    }

    /// Most recent events first
    pub async fn list_by_workspace(
        pool: &PgPool,
        workspace_id: Uuid,
        limit: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let query = format!(
            "SELECT {EVENT_COLUMNS} FROM activity_events WHERE workspace_id = $1 \
             ORDER BY created_at DESC LIMIT $2"
        );

        sqlx::query_as::<_, ActivityEvent>(&query)
            .bind(workspace_id)
            .bind(limit)
            .fetch_all(pool)
            .await
    }
}
