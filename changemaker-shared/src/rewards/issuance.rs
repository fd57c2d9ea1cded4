/// Reward issuance workflow
///
/// Drives a [`RewardIssuance`] through its state machine: record, dispatch
/// to the provider, reconcile from webhooks, and retry on admin request.
/// Retries are explicit re-invocations; there is no background queue.
///
/// All status writes are compare-and-set through
/// [`RewardIssuance::transition`]. When a write loses a race the service
/// reloads the row and reports whatever state won.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use changemaker_shared::models::reward_issuance::{NewRewardIssuance, RewardType};
/// use changemaker_shared::rewards::client::RewardProvider;
/// use changemaker_shared::rewards::issuance::IssuanceService;
/// use sqlx::PgPool;
/// use uuid::Uuid;
///
/// # async fn example(pool: PgPool, provider: Arc<dyn RewardProvider>, workspace_id: Uuid, user_id: Uuid) -> Result<(), Box<dyn std::error::Error>> {
/// let service = IssuanceService::new(pool, provider);
/// let issuance = service
///     .issue(NewRewardIssuance {
///         workspace_id,
///         user_id,
///         challenge_id: None,
///         submission_id: None,
///         reward_type: RewardType::Points,
///         amount: Some(100),
///         sku_id: None,
///         issued_by: None,
///     })
///     .await?;
/// println!("issuance {} is {}", issuance.id, issuance.status.as_str());
/// # Ok(())
/// # }
/// ```

use std::sync::Arc;

use serde::Serialize;
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use super::client::{Participant, ProviderReceipt, RewardProvider};
use super::webhook::{status_for_event, WebhookEvent};
use super::RewardError;
use crate::models::activity_event::{kinds, ActivityEvent, NewActivityEvent};
use crate::models::reward_issuance::{
    IssuanceStatus, NewRewardIssuance, RewardIssuance, RewardType, TransitionUpdate,
};
use crate::models::user::User;
use crate::models::workspace::Workspace;

/// Result of handling a webhook delivery
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "lowercase")]
pub enum WebhookOutcome {
    /// The issuance moved to a new status
    Handled {
        issuance_id: Uuid,
        status: IssuanceStatus,
    },

    /// Nothing changed
    Ignored { reason: String },
}

impl WebhookOutcome {
    fn ignored(reason: impl Into<String>) -> Self {
        WebhookOutcome::Ignored {
            reason: reason.into(),
        }
    }
}

/// Decides whether a webhook may move an issuance from `current` to `target`
///
/// Duplicates and out-of-order deliveries are rejected with a reason so the
/// receiver can acknowledge them without changing anything.
pub fn webhook_transition(current: IssuanceStatus, target: IssuanceStatus) -> Result<(), String> {
    if current == target {
        return Err(format!("already {}", current.as_str()));
    }
    if !current.can_transition_to(target) {
        return Err(format!(
            "cannot move from {} to {}",
            current.as_str(),
            target.as_str()
        ));
    }
    Ok(())
}

/// Checks that an issuance in `status` may be retried
///
/// Failed issuances are reset to pending first; stale pending ones are
/// dispatched as they are.
pub fn retry_allowed(status: IssuanceStatus) -> Result<bool, RewardError> {
    match status {
        IssuanceStatus::Failed => Ok(true),
        IssuanceStatus::Pending => Ok(false),
        other => Err(RewardError::Conflict(other)),
    }
}

/// Failure text for an issuance the provider accepted but we couldn't record
///
/// Keeps the provider's transaction ID so an admin can reconcile by hand
/// before retrying.
pub fn unrecorded_receipt_reason(transaction_id: &str, error: &RewardError) -> String {
    format!(
        "RewardSTACK accepted transaction {} but it could not be recorded: {}",
        transaction_id, error
    )
}

/// Issuance workflow over a reward provider
#[derive(Clone)]
pub struct IssuanceService {
    pool: PgPool,
    provider: Arc<dyn RewardProvider>,
}

impl IssuanceService {
    pub fn new(pool: PgPool, provider: Arc<dyn RewardProvider>) -> Self {
        Self { pool, provider }
    }

    /// Records a new issuance and dispatches it
    ///
    /// # Errors
    ///
    /// Returns `RewardError::Invalid` for a bad payload. Provider failures do
    /// not surface as errors: they leave the issuance `failed` with the
    /// reason stored.
    pub async fn issue(&self, new: NewRewardIssuance) -> Result<RewardIssuance, RewardError> {
        new.validate()
            .map_err(|e| RewardError::Invalid(e.to_string()))?;

        let issuance = RewardIssuance::create(&self.pool, new).await?;
        info!(
            issuance_id = %issuance.id,
            workspace_id = %issuance.workspace_id,
            user_id = %issuance.user_id,
            reward_type = ?issuance.reward_type,
            "Reward issuance created"
        );

        self.record_activity(&issuance, kinds::REWARD_ISSUED).await;
        self.dispatch(issuance).await
    }

    /// Sends a pending issuance to the provider
    pub async fn dispatch(&self, issuance: RewardIssuance) -> Result<RewardIssuance, RewardError> {
        if issuance.status != IssuanceStatus::Pending {
            return Err(RewardError::Conflict(issuance.status));
        }

        let workspace = Workspace::find_by_id(&self.pool, issuance.workspace_id)
            .await?
            .ok_or(RewardError::MissingReference {
                kind: "workspace",
                id: issuance.workspace_id,
            })?;

        let program_id = match workspace.rewardstack_program_id.as_deref() {
            Some(program) if workspace.can_issue_rewards() => program.to_string(),
            _ => {
                return self
                    .fail(
                        &issuance,
                        IssuanceStatus::Pending,
                        "Rewards are not enabled for this workspace or no RewardSTACK program is set",
                    )
                    .await
            }
        };

        let user = User::find_by_id(&self.pool, issuance.user_id)
            .await?
            .ok_or(RewardError::MissingReference {
                kind: "user",
                id: issuance.user_id,
            })?;

        let Some(processing) = RewardIssuance::transition(
            &self.pool,
            issuance.id,
            IssuanceStatus::Pending,
            IssuanceStatus::Processing,
            TransitionUpdate {
                bump_attempts: true,
                ..Default::default()
            },
        )
        .await?
        else {
            // Another dispatcher took it
            return self.reload(issuance.id).await;
        };

        match self.call_provider(&program_id, &user, &processing).await {
            Ok(receipt) => {
                let transaction_id = receipt.transaction_id.clone();
                match self.record_receipt(&processing, receipt).await {
                    Ok(issuance) => Ok(issuance),
                    Err(e) => {
                        warn!(
                            issuance_id = %processing.id,
                            transaction_id = %transaction_id,
                            error = %e,
                            "Provider accepted reward but the receipt could not be stored"
                        );
                        self.fail(
                            &processing,
                            IssuanceStatus::Processing,
                            &unrecorded_receipt_reason(&transaction_id, &e),
                        )
                        .await
                    }
                }
            }
            Err(e) => {
                warn!(issuance_id = %processing.id, error = %e, "Reward dispatch failed");
                self.fail(&processing, IssuanceStatus::Processing, &e.to_string())
                    .await
            }
        }
    }

    /// Re-dispatches a failed (or stuck pending) issuance
    ///
    /// # Errors
    ///
    /// Returns `RewardError::Conflict` for processing or completed issuances
    /// and `RewardError::NotFound` if the issuance isn't in the workspace.
    pub async fn retry(&self, workspace_id: Uuid, id: Uuid) -> Result<RewardIssuance, RewardError> {
        let issuance = RewardIssuance::find_in_workspace(&self.pool, workspace_id, id)
            .await?
            .ok_or(RewardError::NotFound(id))?;

        let pending = if retry_allowed(issuance.status)? {
            RewardIssuance::transition(
                &self.pool,
                id,
                IssuanceStatus::Failed,
                IssuanceStatus::Pending,
                TransitionUpdate::default(),
            )
            .await?
            .ok_or(RewardError::Conflict(issuance.status))?
        } else {
            issuance
        };

        info!(issuance_id = %id, attempts = pending.attempts, "Retrying reward issuance");
        self.dispatch(pending).await
    }

    /// Reconciles an issuance from a webhook delivery
    ///
    /// Unknown transactions, unmapped event types, duplicates and
    /// out-of-order events are ignored.
    pub async fn apply_webhook(&self, event: &WebhookEvent) -> Result<WebhookOutcome, RewardError> {
        let Some(target) = status_for_event(&event.event_type) else {
            return Ok(WebhookOutcome::ignored(format!(
                "unhandled event type {}",
                event.event_type
            )));
        };

        let Some(transaction_id) = event.transaction_id() else {
            return Ok(WebhookOutcome::ignored("missing transaction id"));
        };

        let Some(issuance) =
            RewardIssuance::find_by_external_id(&self.pool, &transaction_id).await?
        else {
            return Ok(WebhookOutcome::ignored(format!(
                "unknown transaction {}",
                transaction_id
            )));
        };

        if let Err(reason) = webhook_transition(issuance.status, target) {
            info!(
                issuance_id = %issuance.id,
                event_type = %event.event_type,
                reason = %reason,
                "Ignoring webhook"
            );
            return Ok(WebhookOutcome::ignored(reason));
        }

        let error = (target == IssuanceStatus::Failed).then(|| {
            event
                .data
                .reason
                .clone()
                .unwrap_or_else(|| format!("RewardSTACK reported {}", event.event_type))
        });

        let Some(updated) = RewardIssuance::transition(
            &self.pool,
            issuance.id,
            issuance.status,
            target,
            TransitionUpdate {
                error,
                ..Default::default()
            },
        )
        .await?
        else {
            return Ok(WebhookOutcome::ignored("issuance changed concurrently"));
        };

        info!(
            issuance_id = %updated.id,
            event_type = %event.event_type,
            status = updated.status.as_str(),
            "Applied webhook"
        );
        self.record_activity(&updated, kinds::REWARD_STATUS_CHANGED).await;

        Ok(WebhookOutcome::Handled {
            issuance_id: updated.id,
            status: updated.status,
        })
    }

    async fn call_provider(
        &self,
        program_id: &str,
        user: &User,
        issuance: &RewardIssuance,
    ) -> Result<ProviderReceipt, RewardError> {
        let participant = Participant {
            unique_id: user.id.to_string(),
            email: user.email.clone(),
            first_name: user.display_name.clone(),
        };
        self.provider
            .ensure_participant(program_id, &participant)
            .await?;

        match issuance.reward_type {
            RewardType::Sku => {
                let sku = issuance
                    .sku_id
                    .as_deref()
                    .ok_or_else(|| RewardError::Invalid("sku reward without sku_id".into()))?;
                self.provider
                    .redeem_sku(program_id, &participant.unique_id, sku)
                    .await
            }
            RewardType::Points | RewardType::Monetary => {
                let amount = issuance
                    .amount
                    .ok_or_else(|| RewardError::Invalid("reward without amount".into()))?;
                let description = format!("Changemaker reward {}", issuance.id);
                self.provider
                    .credit_points(program_id, &participant.unique_id, amount, &description)
                    .await
            }
        }
    }

    async fn record_receipt(
        &self,
        issuance: &RewardIssuance,
        receipt: ProviderReceipt,
    ) -> Result<RewardIssuance, RewardError> {
        info!(
            issuance_id = %issuance.id,
            transaction_id = %receipt.transaction_id,
            status = receipt.status.as_str(),
            "Reward accepted by provider"
        );

        let updated = if receipt.status == IssuanceStatus::Completed {
            RewardIssuance::transition(
                &self.pool,
                issuance.id,
                IssuanceStatus::Processing,
                IssuanceStatus::Completed,
                TransitionUpdate {
                    external_transaction_id: Some(receipt.transaction_id),
                    ..Default::default()
                },
            )
            .await?
        } else {
            RewardIssuance::attach_external_id(&self.pool, issuance.id, &receipt.transaction_id)
                .await?
        };

        match updated {
            Some(issuance) => Ok(issuance),
            None => self.reload(issuance.id).await,
        }
    }

    async fn fail(
        &self,
        issuance: &RewardIssuance,
        from: IssuanceStatus,
        reason: &str,
    ) -> Result<RewardIssuance, RewardError> {
        let failed = RewardIssuance::transition(
            &self.pool,
            issuance.id,
            from,
            IssuanceStatus::Failed,
            TransitionUpdate {
                error: Some(reason.to_string()),
                ..Default::default()
            },
        )
        .await?;

        match failed {
            Some(issuance) => {
                self.record_activity(&issuance, kinds::REWARD_STATUS_CHANGED)
                    .await;
                Ok(issuance)
            }
            None => self.reload(issuance.id).await,
        }
    }

    async fn reload(&self, id: Uuid) -> Result<RewardIssuance, RewardError> {
        RewardIssuance::find_by_id(&self.pool, id)
            .await?
            .ok_or(RewardError::NotFound(id))
    }

    async fn record_activity(&self, issuance: &RewardIssuance, kind: &'static str) {
        let event = NewActivityEvent::new(issuance.workspace_id, kind)
            .user(issuance.user_id)
            .payload(serde_json::json!({
                "issuance_id": issuance.id,
                "reward_type": issuance.reward_type,
                "amount": issuance.amount,
                "sku_id": issuance.sku_id,
                "status": issuance.status,
            }));
        let event = match issuance.issued_by {
            Some(actor) => event.actor(actor),
            None => event,
        };

        if let Err(e) = ActivityEvent::record(&self.pool, event).await {
            warn!(issuance_id = %issuance.id, error = %e, "Failed to record reward activity");
        }
    }
}
