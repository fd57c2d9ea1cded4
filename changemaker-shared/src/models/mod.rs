/// Database models for Changemaker
///
/// Each model is a plain struct deriving `sqlx::FromRow` with associated async
/// functions that take a `&PgPool` (or a transaction) and return
/// `Result<_, sqlx::Error>`.
///
/// # Models
///
/// - `user`: Local user rows provisioned from Supabase sessions
/// - `workspace`: Tenants
/// - `membership`: User-workspace relationships with roles and the primary flag
/// - `invite_code`: Shareable join codes
/// - `challenge`: Time-boxed engagement activities
/// - `enrollment`: Participant enrollment in a challenge
/// - `submission`: Participant submissions and their review
/// - `points`: Per-workspace points balances
/// - `reward_issuance`: Reward grants and their fulfillment status
/// - `email_template`: Per-workspace email template overrides
/// - `activity_event`: Workspace activity log
///
/// # Example
///
/// ```no_run
/// use changemaker_shared::models::workspace::Workspace;
/// use changemaker_shared::db::pool::{create_pool, DatabaseConfig};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let pool = create_pool(DatabaseConfig::from_url("postgresql://localhost/changemaker")).await?;
/// let workspace = Workspace::find_by_slug(&pool, "acme").await?;
/// # Ok(())
/// # }
/// ```

pub mod activity_event;
pub mod challenge;
pub mod email_template;
pub mod enrollment;
pub mod invite_code;
pub mod membership;
pub mod points;
pub mod reward_issuance;
pub mod submission;
pub mod user;
pub mod workspace;

/// Returns true if the error is a unique constraint violation
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
}
