/// Reward fulfillment through RewardSTACK
///
/// # Flow
///
/// ```text
/// admin grant / approved submission
///   └─> IssuanceService::issue      insert `pending`
///         └─> dispatch             pending → processing, call RewardSTACK
///               ├─> receipt         store transaction id (maybe → completed)
///               └─> error           processing → failed (also when the receipt cannot be stored)
///
/// RewardSTACK webhook
///   └─> IssuanceService::apply_webhook   look up by transaction id, map event → status
///
/// admin retry
///   └─> IssuanceService::retry      failed → pending, dispatch again
/// ```
///
/// # Modules
///
/// - [`client`]: `RewardProvider` trait and the RewardSTACK HTTP client
/// - [`webhook`]: signature verification and event → status mapping
/// - [`issuance`]: the issuance workflow

pub mod client;
pub mod issuance;
pub mod webhook;

use uuid::Uuid;

use crate::models::reward_issuance::IssuanceStatus;

/// Error type for reward operations
#[derive(Debug, thiserror::Error)]
pub enum RewardError {
    /// RewardSTACK answered with a non-success status
    #[error("RewardSTACK returned {status}: {body}")]
    Provider { status: u16, body: String },

    /// The request never got a usable response
    #[error("RewardSTACK request failed: {0}")]
    Transport(String),

    /// Workspace or provider settings are missing
    #[error("Rewards not configured: {0}")]
    NotConfigured(String),

    /// Invalid reward request
    #[error("Invalid reward: {0}")]
    Invalid(String),

    /// Issuance doesn't exist
    #[error("Reward issuance {0} not found")]
    NotFound(Uuid),

    /// A workspace or user the issuance points at is gone
    #[error("{kind} {id} referenced by reward issuance not found")]
    MissingReference { kind: &'static str, id: Uuid },

    /// The issuance is not in a state that allows the operation
    #[error("Reward issuance is {0:?}")]
    Conflict(IssuanceStatus),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<reqwest::Error> for RewardError {
    fn from(err: reqwest::Error) -> Self {
        RewardError::Transport(err.to_string())
    }
}
