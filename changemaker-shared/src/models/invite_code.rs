/// Invite codes for joining a workspace
///
/// Admins mint short random codes carrying a role, an optional use limit and
/// an optional expiry. Accepting a code creates the membership and bumps
/// `used_count` in one transaction, with the code row locked so concurrent
/// acceptances cannot exceed `max_uses`.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use super::is_unique_violation;
use super::membership::{Membership, WorkspaceRole};

/// Length of generated codes
pub const CODE_LENGTH: usize = 10;

// No 0/O or 1/I so codes survive being read aloud
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

const INVITE_COLUMNS: &str =
    "id, workspace_id, code, role, max_uses, used_count, expires_at, created_by, created_at";

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct InviteCode {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub code: String,
    pub role: WorkspaceRole,
    pub max_uses: Option<i32>,
    pub used_count: i32,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateInviteCode {
    pub workspace_id: Uuid,
    pub role: WorkspaceRole,
    pub max_uses: Option<i32>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_by: Uuid,
}

/// Result of accepting an invite
#[derive(Debug, Clone)]
pub enum InviteAcceptance {
    Joined(Membership),
    NotFound,
    Expired,
    Exhausted,
    AlreadyMember,
}

/// Generates a random invite code
pub fn generate_code() -> String {
    let mut rng = rand::thread_rng();
    (0..CODE_LENGTH)
        .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

impl InviteCode {
    /// Returns true if the code can no longer be used at `now`
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// Returns true if every allowed use has been consumed
    pub fn is_exhausted(&self) -> bool {
        self.max_uses.is_some_and(|max| self.used_count >= max)
    }

    /// Creates an invite with a fresh random code
    ///
    /// Retries a few times on the unlikely event of a code collision.
    pub async fn create(pool: &PgPool, data: CreateInviteCode) -> Result<Self, sqlx::Error> {
        let query = format!(
            "INSERT INTO invite_codes (workspace_id, code, role, max_uses, expires_at, created_by) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING {INVITE_COLUMNS}"
        );

        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = sqlx::query_as::<_, InviteCode>(&query)
                .bind(data.workspace_id)
                .bind(generate_code())
                .bind(data.role)
                .bind(data.max_uses)
                .bind(data.expires_at)
                .bind(data.created_by)
                .fetch_one(pool)
                .await;

            match result {
                Err(e) if attempt < 3 && is_unique_violation(&e) => continue,
                other => return other,
            }
        }
    }

    /// Looks up an invite, ignoring case and surrounding whitespace
    pub async fn find_by_code(pool: &PgPool, code: &str) -> Result<Option<Self>, sqlx::Error> {
        let query = format!("SELECT {INVITE_COLUMNS} FROM invite_codes WHERE code = $1");

        sqlx::query_as::<_, InviteCode>(&query)
            .bind(code.trim().to_uppercase())
            .fetch_optional(pool)
            .await
    }

    pub async fn list_by_workspace(
        pool: &PgPool,
        workspace_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let query = format!(
            "SELECT {INVITE_COLUMNS} FROM invite_codes WHERE workspace_id = $1 ORDER BY created_at DESC"
        );

        sqlx::query_as::<_, InviteCode>(&query)
            .bind(workspace_id)
            .fetch_all(pool)
            .await
    }

    /// Joins the invite's workspace with the invite's role
    pub async fn accept(
        pool: &PgPool,
        code: &str,
        user_id: Uuid,
    ) -> Result<InviteAcceptance, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let query = format!("SELECT {INVITE_COLUMNS} FROM invite_codes WHERE code = $1 FOR UPDATE");
        let Some(invite) = sqlx::query_as::<_, InviteCode>(&query)
            .bind(code.trim().to_uppercase())
            .fetch_optional(&mut *tx)
            .await?
        else {
            return Ok(InviteAcceptance::NotFound);
        };

        if invite.is_expired(Utc::now()) {
            return Ok(InviteAcceptance::Expired);
        }
        if invite.is_exhausted() {
            return Ok(InviteAcceptance::Exhausted);
        }

        let already_member: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM workspace_memberships WHERE workspace_id = $1 AND user_id = $2)",
        )
        .bind(invite.workspace_id)
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await?;

        if already_member {
            return Ok(InviteAcceptance::AlreadyMember);
        }

        let membership =
            Membership::insert_in_tx(&mut tx, user_id, invite.workspace_id, invite.role).await?;

        sqlx::query("UPDATE invite_codes SET used_count = used_count + 1 WHERE id = $1")
            .bind(invite.id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(InviteAcceptance::Joined(membership))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn invite(max_uses: Option<i32>, used_count: i32, expires_at: Option<DateTime<Utc>>) -> InviteCode {
        InviteCode {
            id: Uuid::new_v4(),
            workspace_id: Uuid::new_v4(),
            code: "ABCDEFGHJK".into(),
            role: WorkspaceRole::Participant,
            max_uses,
            used_count,
            expires_at,
            created_by: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_generate_code_shape() {
        let code = generate_code();
        assert_eq!(code.len(), CODE_LENGTH);
        assert!(code.bytes().all(|b| CODE_ALPHABET.contains(&b)));
    }

    #[test]
    fn test_generated_codes_differ() {
        assert_ne!(generate_code(), generate_code());
    }

    #[test]
    fn test_expiry() {
        let now = Utc::now();
        assert!(!invite(None, 0, None).is_expired(now));
        assert!(!invite(None, 0, Some(now + Duration::hours(1))).is_expired(now));
        assert!(invite(None, 0, Some(now - Duration::seconds(1))).is_expired(now));
    }

    #[test]
    fn test_exhaustion() {
        assert!(!invite(None, 500, None).is_exhausted());
        assert!(!invite(Some(3), 2, None).is_exhausted());
        assert!(invite(Some(3), 3, None).is_exhausted());
    }
}
