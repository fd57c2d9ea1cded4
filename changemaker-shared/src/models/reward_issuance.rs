/// Reward issuance model and status state machine
///
/// A reward issuance records one grant of points, a SKU or a monetary reward
/// to a participant, and tracks its fulfillment by RewardSTACK.
///
/// # Schema
///
/// ```sql
/// CREATE TYPE reward_type AS ENUM ('points', 'sku', 'monetary');
/// CREATE TYPE issuance_status AS ENUM ('pending', 'processing', 'completed', 'failed');
///
/// CREATE TABLE reward_issuances (
///     id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
///     workspace_id UUID NOT NULL REFERENCES workspaces(id) ON DELETE CASCADE,
///     user_id UUID NOT NULL REFERENCES users(id) ON DELETE CASCADE,
///     challenge_id UUID REFERENCES challenges(id) ON DELETE SET NULL,
///     submission_id UUID REFERENCES submissions(id) ON DELETE SET NULL,
///     reward_type reward_type NOT NULL,
///     amount BIGINT,
///     sku_id VARCHAR(120),
///     status issuance_status NOT NULL DEFAULT 'pending',
///     external_transaction_id VARCHAR(120) UNIQUE,
///     error TEXT,
///     attempts INTEGER NOT NULL DEFAULT 0,
///     issued_by UUID REFERENCES users(id) ON DELETE SET NULL,
///     issued_at TIMESTAMPTZ,
///     ...
/// );
/// ```
///
/// # State Machine
///
/// ```text
/// pending ──► processing ──► completed
///    │            │
///    ├────────────┴──────► failed
///    └──────────────────► completed
/// failed ──► pending      (admin retry)
/// ```
///
/// `completed` is terminal. Every status write goes through
/// [`RewardIssuance::transition`], a compare-and-set on the current status, so
/// a webhook and a retry racing on the same row cannot overwrite each other.
///
/// # Example
///
/// ```no_run
/// use changemaker_shared::models::reward_issuance::{
///     IssuanceStatus, RewardIssuance, TransitionUpdate,
/// };
/// use sqlx::PgPool;
/// use uuid::Uuid;
///
/// # async fn example(pool: PgPool, id: Uuid) -> Result<(), sqlx::Error> {
/// let moved = RewardIssuance::transition(
///     &pool,
///     id,
///     IssuanceStatus::Processing,
///     IssuanceStatus::Completed,
///     TransitionUpdate::default(),
/// )
/// .await?;
///
/// if moved.is_none() {
///     println!("someone else changed the status first");
/// }
/// # Ok(())
/// # }
/// ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::warn;
use uuid::Uuid;

/// Fulfillment status of an issuance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "issuance_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum IssuanceStatus {
    /// Recorded, not yet sent to the provider
    Pending,

    /// Accepted by the provider, awaiting confirmation
    Processing,

    /// Fulfilled
    Completed,

    /// Provider rejected or the call failed
    Failed,
}

impl IssuanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssuanceStatus::Pending => "pending",
            IssuanceStatus::Processing => "processing",
            IssuanceStatus::Completed => "completed",
            IssuanceStatus::Failed => "failed",
        }
    }

    /// Checks if status is terminal (never changes again)
    pub fn is_terminal(&self) -> bool {
        matches!(self, IssuanceStatus::Completed)
    }

    /// Checks if transition to target status is valid
    pub fn can_transition_to(&self, target: IssuanceStatus) -> bool {
        match (self, target) {
            // Pending is dispatched, fails before dispatch, or completes synchronously
            (IssuanceStatus::Pending, IssuanceStatus::Processing) => true,
            (IssuanceStatus::Pending, IssuanceStatus::Failed) => true,
            (IssuanceStatus::Pending, IssuanceStatus::Completed) => true,

            // Processing resolves either way
            (IssuanceStatus::Processing, IssuanceStatus::Completed) => true,
            (IssuanceStatus::Processing, IssuanceStatus::Failed) => true,

            // Admin retry
            (IssuanceStatus::Failed, IssuanceStatus::Pending) => true,

            _ => false,
        }
    }
}

impl std::str::FromStr for IssuanceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(IssuanceStatus::Pending),
            "processing" => Ok(IssuanceStatus::Processing),
            "completed" => Ok(IssuanceStatus::Completed),
            "failed" => Ok(IssuanceStatus::Failed),
            other => Err(format!("unknown issuance status '{}'", other)),
        }
    }
}

/// Kind of reward being granted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "reward_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum RewardType {
    /// Program points credited on RewardSTACK
    Points,

    /// A catalog item redeemed on the participant's behalf
    Sku,

    /// A cash-equivalent amount (minor units)
    Monetary,
}

/// Reward issuance record
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct RewardIssuance {
    pub id: Uuid,
    pub workspace_id: Uuid,

    /// Recipient
    pub user_id: Uuid,

    pub challenge_id: Option<Uuid>,
    pub submission_id: Option<Uuid>,
    pub reward_type: RewardType,

    /// Points or minor currency units; required unless `reward_type` is `sku`
    pub amount: Option<i64>,

    /// Catalog SKU; required when `reward_type` is `sku`
    pub sku_id: Option<String>,

    pub status: IssuanceStatus,

    /// Provider transaction ID, used to match inbound webhooks
    pub external_transaction_id: Option<String>,

    /// Last failure reason
    pub error: Option<String>,

    /// Number of dispatches to the provider
    pub attempts: i32,

    /// Admin who granted the reward, `None` for automatic grants
    pub issued_by: Option<Uuid>,

    /// When fulfillment was confirmed
    pub issued_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating an issuance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRewardIssuance {
    pub workspace_id: Uuid,
    pub user_id: Uuid,
    pub challenge_id: Option<Uuid>,
    pub submission_id: Option<Uuid>,
    pub reward_type: RewardType,
    pub amount: Option<i64>,
    pub sku_id: Option<String>,
    pub issued_by: Option<Uuid>,
}

impl NewRewardIssuance {
    /// Checks the payload rule enforced by the table's check constraint
    pub fn validate(&self) -> Result<(), &'static str> {
        match self.reward_type {
            RewardType::Sku => match self.sku_id.as_deref() {
                Some(sku) if !sku.trim().is_empty() => Ok(()),
                _ => Err("sku rewards require a sku_id"),
            },
            RewardType::Points | RewardType::Monetary => match self.amount {
                Some(amount) if amount > 0 => Ok(()),
                _ => Err("points and monetary rewards require a positive amount"),
            },
        }
    }
}

/// Column changes that accompany a status transition
#[derive(Debug, Clone, Default)]
pub struct TransitionUpdate {
    /// Store the provider transaction ID
    pub external_transaction_id: Option<String>,

    /// Failure reason, stored when moving to `failed`
    pub error: Option<String>,

    /// Count this transition as a dispatch attempt
    pub bump_attempts: bool,
}

const ISSUANCE_COLUMNS: &str = "id, workspace_id, user_id, challenge_id, submission_id, reward_type, \
                                amount, sku_id, status, external_transaction_id, error, attempts, \
                                issued_by, issued_at, created_at, updated_at";

impl RewardIssuance {
    /// Inserts a new issuance in `pending`
    ///
    /// # Errors
    ///
    /// Returns an error if the payload violates the check constraint or a
    /// referenced row doesn't exist.
    pub async fn create(pool: &PgPool, data: NewRewardIssuance) -> Result<Self, sqlx::Error> {
        let query = format!(
            r#"
            INSERT INTO reward_issuances (workspace_id, user_id, challenge_id, submission_id,
                                          reward_type, amount, sku_id, issued_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {ISSUANCE_COLUMNS}
            "#
        );

        sqlx::query_as::<_, RewardIssuance>(&query)
            .bind(data.workspace_id)
            .bind(data.user_id)
            .bind(data.challenge_id)
            .bind(data.submission_id)
            .bind(data.reward_type)
            .bind(data.amount)
            .bind(data.sku_id)
            .bind(data.issued_by)
            .fetch_one(pool)
            .await
    }

    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let query = format!("SELECT {ISSUANCE_COLUMNS} FROM reward_issuances WHERE id = $1");

        sqlx::query_as::<_, RewardIssuance>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Finds an issuance scoped to a workspace
    pub async fn find_in_workspace(
        pool: &PgPool,
        workspace_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        let query = format!(
            "SELECT {ISSUANCE_COLUMNS} FROM reward_issuances WHERE workspace_id = $1 AND id = $2"
        );

        sqlx::query_as::<_, RewardIssuance>(&query)
            .bind(workspace_id)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Finds the issuance a provider transaction belongs to
    pub async fn find_by_external_id(
        pool: &PgPool,
        external_transaction_id: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        let query = format!(
            "SELECT {ISSUANCE_COLUMNS} FROM reward_issuances WHERE external_transaction_id = $1"
        );

        sqlx::query_as::<_, RewardIssuance>(&query)
            .bind(external_transaction_id)
            .fetch_optional(pool)
            .await
    }

    /// Lists a workspace's issuances, newest first
    pub async fn list_by_workspace(
        pool: &PgPool,
        workspace_id: Uuid,
        status: Option<IssuanceStatus>,
        limit: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let query = format!(
            "SELECT {ISSUANCE_COLUMNS} FROM reward_issuances \
             WHERE workspace_id = $1 AND ($2::issuance_status IS NULL OR status = $2) \
             ORDER BY created_at DESC LIMIT $3"
        );

        sqlx::query_as::<_, RewardIssuance>(&query)
            .bind(workspace_id)
            .bind(status)
            .bind(limit)
            .fetch_all(pool)
            .await
    }

    /// Lists one participant's issuances in a workspace
    pub async fn list_for_user(
        pool: &PgPool,
        workspace_id: Uuid,
        user_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let query = format!(
            "SELECT {ISSUANCE_COLUMNS} FROM reward_issuances \
             WHERE workspace_id = $1 AND user_id = $2 ORDER BY created_at DESC"
        );

        sqlx::query_as::<_, RewardIssuance>(&query)
            .bind(workspace_id)
            .bind(user_id)
            .fetch_all(pool)
            .await
    }

    /// Stores the provider transaction ID without changing status
    ///
    /// Only applies while the issuance is still `processing`.
    pub async fn attach_external_id(
        pool: &PgPool,
        id: Uuid,
        external_transaction_id: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        let query = format!(
            "UPDATE reward_issuances SET external_transaction_id = $2, updated_at = NOW() \
             WHERE id = $1 AND status = 'processing' RETURNING {ISSUANCE_COLUMNS}"
        );

        sqlx::query_as::<_, RewardIssuance>(&query)
            .bind(id)
            .bind(external_transaction_id)
            .fetch_optional(pool)
            .await
    }

    /// Moves an issuance from `from` to `to` if it is still in `from`
    ///
    /// Moving to `completed` stamps `issued_at`; moving to `failed` stores the
    /// error; moving back to `pending` clears it.
    ///
    /// # Returns
    ///
    /// The updated row, or `None` if the transition is not allowed or the row
    /// is no longer in `from` (another writer got there first).
    pub async fn transition(
        pool: &PgPool,
        id: Uuid,
        from: IssuanceStatus,
        to: IssuanceStatus,
        update: TransitionUpdate,
    ) -> Result<Option<Self>, sqlx::Error> {
        if !from.can_transition_to(to) {
            warn!(
                issuance_id = %id,
                from = from.as_str(),
                to = to.as_str(),
                "Rejected invalid issuance transition"
            );
            return Ok(None);
        }

        let query = format!(
            r#"
            UPDATE reward_issuances SET
                status = $3,
                external_transaction_id = COALESCE($4, external_transaction_id),
                error = CASE
                    WHEN $3 = 'failed'::issuance_status THEN $5
                    WHEN $3 = 'pending'::issuance_status THEN NULL
                    ELSE error
                END,
                attempts = attempts + CASE WHEN $6 THEN 1 ELSE 0 END,
                issued_at = CASE
                    WHEN $3 = 'completed'::issuance_status THEN NOW()
                    ELSE issued_at
                END,
                updated_at = NOW()
            WHERE id = $1 AND status = $2
            RETURNING {ISSUANCE_COLUMNS}
            "#
        );

        sqlx::query_as::<_, RewardIssuance>(&query)
            .bind(id)
            .bind(from)
            .bind(to)
            .bind(update.external_transaction_id)
            .bind(update.error)
            .bind(update.bump_attempts)
            .fetch_optional(pool)
            .await
    }
}
