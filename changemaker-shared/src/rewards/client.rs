/// RewardSTACK client
///
/// [`RewardProvider`] is the seam between the issuance workflow and the
/// fulfillment platform. [`RewardStackClient`] implements it over the
/// RewardSTACK REST API:
///
/// - `PUT  /api/program/{program}/participant/{participant}` upserts the participant
/// - `POST /api/program/{program}/participant/{participant}/adjustment` credits points
/// - `POST /api/program/{program}/participant/{participant}/transaction` redeems a SKU
///
/// Requests carry the API key as a bearer token. Non-2xx responses become
/// `RewardError::Provider` with the status and body.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::RewardError;
use crate::models::reward_issuance::IssuanceStatus;

/// Participant identity sent to the provider
#[derive(Debug, Clone, Serialize)]
pub struct Participant {
    /// Stable participant ID (our user ID)
    #[serde(rename = "uniqueId")]
    pub unique_id: String,

    #[serde(rename = "emailAddress")]
    pub email: String,

    #[serde(rename = "firstname", skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
}

/// What the provider reported for a fulfillment request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderReceipt {
    /// Provider transaction ID, echoed in webhooks
    pub transaction_id: String,

    /// `Completed` when fulfilled synchronously, otherwise `Processing`
    pub status: IssuanceStatus,
}

/// Reward fulfillment platform
#[async_trait]
pub trait RewardProvider: Send + Sync {
    /// Creates or updates the participant in the program
    async fn ensure_participant(
        &self,
        program_id: &str,
        participant: &Participant,
    ) -> Result<(), RewardError>;

    /// Credits points (or a monetary amount in minor units) to a participant
    async fn credit_points(
        &self,
        program_id: &str,
        participant_id: &str,
        amount: i64,
        description: &str,
    ) -> Result<ProviderReceipt, RewardError>;

    /// Redeems one unit of a catalog SKU for a participant
    async fn redeem_sku(
        &self,
        program_id: &str,
        participant_id: &str,
        sku_id: &str,
    ) -> Result<ProviderReceipt, RewardError>;
}

/// Connection settings for RewardSTACK
#[derive(Debug, Clone)]
pub struct RewardStackConfig {
    pub base_url: String,
    pub api_key: String,
    pub timeout: Duration,
}

/// RewardSTACK REST client
#[derive(Debug, Clone)]
pub struct RewardStackClient {
    http: Client,
    base_url: String,
    api_key: String,
}

/// Provider reply; the ID arrives under different names per endpoint
#[derive(Debug, Deserialize)]
struct ProviderResponse {
    #[serde(default)]
    id: Option<serde_json::Value>,

    #[serde(default, rename = "transactionId")]
    transaction_id: Option<serde_json::Value>,

    #[serde(default, rename = "adjustmentId")]
    adjustment_id: Option<serde_json::Value>,

    #[serde(default)]
    status: Option<String>,
}

impl ProviderResponse {
    /// First non-empty string or numeric ID
    fn transaction_id(&self) -> Option<String> {
        [&self.id, &self.transaction_id, &self.adjustment_id]
            .into_iter()
            .flatten()
            .find_map(|value| match value {
                serde_json::Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
                serde_json::Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
    }
}

#[derive(Serialize)]
struct AdjustmentRequest<'a> {
    amount: i64,
    #[serde(rename = "type")]
    kind: &'a str,
    description: &'a str,
}

#[derive(Serialize)]
struct TransactionItem<'a> {
    sku: &'a str,
    quantity: u32,
}

#[derive(Serialize)]
struct TransactionRequest<'a> {
    products: Vec<TransactionItem<'a>>,
}

impl RewardStackClient {
    /// Builds a client with the configured timeout
    ///
    /// # Errors
    ///
    /// Returns `RewardError::NotConfigured` if the base URL or API key is
    /// empty, or if the HTTP client cannot be built.
    pub fn new(config: RewardStackConfig) -> Result<Self, RewardError> {
        if config.base_url.trim().is_empty() {
            return Err(RewardError::NotConfigured("RewardSTACK base URL is empty".into()));
        }
        if config.api_key.trim().is_empty() {
            return Err(RewardError::NotConfigured("RewardSTACK API key is empty".into()));
        }

        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| RewardError::NotConfigured(e.to_string()))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key,
        })
    }

    fn participant_url(&self, program_id: &str, participant_id: &str) -> String {
        format!(
            "{}/api/program/{}/participant/{}",
            self.base_url, program_id, participant_id
        )
    }

    async fn check(response: Response) -> Result<Response, RewardError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(RewardError::Provider {
            status: status.as_u16(),
            body,
        })
    }

    async fn receipt(response: Response) -> Result<ProviderReceipt, RewardError> {
        let parsed: ProviderResponse = Self::check(response).await?.json().await?;
        receipt_from(parsed)
    }
}

fn receipt_from(response: ProviderResponse) -> Result<ProviderReceipt, RewardError> {
    let transaction_id = response.transaction_id().ok_or_else(|| {
        RewardError::Transport("RewardSTACK response carried no transaction id".into())
    })?;

    let status = match response.status.as_deref().map(str::to_ascii_lowercase).as_deref() {
        Some("completed" | "complete" | "approved" | "applied" | "delivered") => {
            IssuanceStatus::Completed
        }
        _ => IssuanceStatus::Processing,
    };

    Ok(ProviderReceipt {
        transaction_id,
        status,
    })
}

#[async_trait]
impl RewardProvider for RewardStackClient {
    async fn ensure_participant(
        &self,
        program_id: &str,
        participant: &Participant,
    ) -> Result<(), RewardError> {
        debug!(program_id, participant_id = %participant.unique_id, "Upserting participant");

        let response = self
            .http
            .put(self.participant_url(program_id, &participant.unique_id))
            .bearer_auth(&self.api_key)
            .json(participant)
            .send()
            .await?;

        Self::check(response).await?;
        Ok(())
    }

    async fn credit_points(
        &self,
        program_id: &str,
        participant_id: &str,
        amount: i64,
        description: &str,
    ) -> Result<ProviderReceipt, RewardError> {
        debug!(program_id, participant_id, amount, "Crediting points");

        let response = self
            .http
            .post(format!(
                "{}/adjustment",
                self.participant_url(program_id, participant_id)
            ))
            .bearer_auth(&self.api_key)
            .json(&AdjustmentRequest {
                amount,
                kind: "credit",
                description,
            })
            .send()
            .await?;

        Self::receipt(response).await
    }

    async fn redeem_sku(
        &self,
        program_id: &str,
        participant_id: &str,
        sku_id: &str,
    ) -> Result<ProviderReceipt, RewardError> {
        debug!(program_id, participant_id, sku_id, "Redeeming SKU");

        let response = self
            .http
            .post(format!(
                "{}/transaction",
                self.participant_url(program_id, participant_id)
            ))
            .bearer_auth(&self.api_key)
            .json(&TransactionRequest {
                products: vec![TransactionItem {
                    sku: sku_id,
                    quantity: 1,
                }],
            })
            .send()
            .await?;

        Self::receipt(response).await
    }
}

/// Provider used when no RewardSTACK credentials are configured
///
/// Every call fails, so issuances end up `failed` with a clear reason and can
/// be retried once the deployment is configured.
#[derive(Debug, Clone, Default)]
pub struct UnconfiguredProvider;

impl UnconfiguredProvider {
    fn error() -> RewardError {
        RewardError::NotConfigured("RewardSTACK API key is not set".into())
    }
}

#[async_trait]
impl RewardProvider for UnconfiguredProvider {
    async fn ensure_participant(&self, _: &str, _: &Participant) -> Result<(), RewardError> {
        Err(Self::error())
    }

    async fn credit_points(
        &self,
        _: &str,
        _: &str,
        _: i64,
        _: &str,
    ) -> Result<ProviderReceipt, RewardError> {
        Err(Self::error())
    }

    async fn redeem_sku(&self, _: &str, _: &str, _: &str) -> Result<ProviderReceipt, RewardError> {
        Err(Self::error())
    }
}
