/// Per-workspace points balances
///
/// `total_points` only grows; `available_points` is what remains after
/// redemptions. Credits happen inside the transaction that approves the
/// submission, so a balance never drifts from its approvals.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PointsBalance {
    pub workspace_id: Uuid,
    pub user_id: Uuid,
    pub total_points: i64,
    pub available_points: i64,
    pub updated_at: DateTime<Utc>,
}

/// Leaderboard row
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PointsStanding {
    pub user_id: Uuid,
    pub email: String,
    pub display_name: Option<String>,
    pub total_points: i64,
}

impl PointsBalance {
    /// An all-zero balance for users with no credits yet
    pub fn empty(workspace_id: Uuid, user_id: Uuid) -> Self {
        Self {
            workspace_id,
            user_id,
            total_points: 0,
            available_points: 0,
            updated_at: Utc::now(),
        }
    }

    /// Adds points to a balance, creating it on first credit
    pub async fn credit_in_tx(
        tx: &mut Transaction<'_, Postgres>,
        workspace_id: Uuid,
        user_id: Uuid,
        points: i64,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, PointsBalance>(
            r#"
            INSERT INTO points_balances (workspace_id, user_id, total_points, available_points)
            VALUES ($1, $2, $3, $3)
            ON CONFLICT (workspace_id, user_id) DO UPDATE
            SET total_points = points_balances.total_points + EXCLUDED.total_points,
                available_points = points_balances.available_points + EXCLUDED.available_points,
                updated_at = NOW()
            RETURNING workspace_id, user_id, total_points, available_points, updated_at
            "#,
        )
        .bind(workspace_id)
        .bind(user_id)
        .bind(points)
        .fetch_one(&mut **tx)
        .await
    }

    /// Returns the user's balance, zero if nothing was ever credited
    pub async fn find(
        pool: &PgPool,
        workspace_id: Uuid,
        user_id: Uuid,
    ) -> Result<Self, sqlx::Error> {
        let balance = sqlx::query_as::<_, PointsBalance>(
            "SELECT workspace_id, user_id, total_points, available_points, updated_at \
             FROM points_balances WHERE workspace_id = $1 AND user_id = $2",
        )
        .bind(workspace_id)
        .bind(user_id)
        .fetch_optional(pool)
        .await?;

        Ok(balance.unwrap_or_else(|| Self::empty(workspace_id, user_id)))
    }

    /// Top earners in a workspace
    pub async fn leaderboard(
        pool: &PgPool,
        workspace_id: Uuid,
        limit: i64,
    ) -> Result<Vec<PointsStanding>, sqlx::Error> {
        sqlx::query_as::<_, PointsStanding>(
            r#"
            SELECT p.user_id, u.email, u.display_name, p.total_points
            FROM points_balances p
            JOIN users u ON u.id = p.user_id
            WHERE p.workspace_id = $1
            ORDER BY p.total_points DESC, u.email ASC
            LIMIT $2
            "#,
        )
        .bind(workspace_id)
        .bind(limit)
        .fetch_all(pool)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_balance() {
        let balance = PointsBalance::empty(Uuid::new_v4(), Uuid::new_v4());
        assert_eq!(balance.total_points, 0);
        assert_eq!(balance.available_points, 0);
    }
}
