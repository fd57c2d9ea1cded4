/// RewardSTACK webhook verification and event mapping
///
/// Every delivery is signed with HMAC-SHA256 over the raw request body using
/// the shared webhook secret; the hex digest arrives in the
/// `X-RewardStack-Signature` header, optionally prefixed with `sha256=`.
///
/// # Event Mapping
///
/// | Event type | Status |
/// |------------|--------|
/// | `*.created`, `*.pending`, `*.processing`, `transaction.submitted` | processing |
/// | `*.completed`, `transaction.shipped`, `transaction.delivered`, `adjustment.applied` | completed |
/// | `*.failed`, `*.cancelled`, `*.canceled`, `*.rejected`, `transaction.returned` | failed |
///
/// Anything else is acknowledged and ignored.
///
/// # Example
///
/// ```
/// use changemaker_shared::rewards::webhook::{sign, verify_signature, status_for_event};
/// use changemaker_shared::models::reward_issuance::IssuanceStatus;
///
/// let body = br#"{"type":"transaction.shipped","data":{"id":"txn_1"}}"#;
/// let signature = sign("whsec", body);
/// assert!(verify_signature("whsec", body, &signature));
/// assert_eq!(status_for_event("transaction.shipped"), Some(IssuanceStatus::Completed));
/// ```

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::models::reward_issuance::IssuanceStatus;

/// Header carrying the delivery signature
pub const SIGNATURE_HEADER: &str = "x-rewardstack-signature";

type HmacSha256 = Hmac<Sha256>;

/// Inbound webhook payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    /// Delivery ID, if the provider sends one
    #[serde(default)]
    pub id: Option<String>,

    /// Event type such as `transaction.shipped`
    #[serde(rename = "type", alias = "event", alias = "event_type")]
    pub event_type: String,

    #[serde(default)]
    pub data: WebhookData,
}

/// Event body; only the transaction ID matters for reconciliation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebhookData {
    #[serde(default, alias = "id", alias = "transactionId", alias = "adjustmentId")]
    pub transaction_id: Option<serde_json::Value>,

    /// Free-form reason attached to failures
    #[serde(default)]
    pub reason: Option<String>,
}

impl WebhookEvent {
    /// Transaction ID as a string, whether the provider sent a string or a number
    pub fn transaction_id(&self) -> Option<String> {
        match self.data.transaction_id.as_ref()? {
            serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

/// Hex HMAC-SHA256 of `body` under `secret`
pub fn sign(secret: &str, body: &[u8]) -> String {
    // HMAC accepts keys of any length
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Checks a delivery signature in constant time
///
/// Accepts the bare hex digest or `sha256=<hex>`.
pub fn verify_signature(secret: &str, body: &[u8], header: &str) -> bool {
    let header = header.trim();
    let digest = header.strip_prefix("sha256=").unwrap_or(header);

    let Ok(expected) = hex::decode(digest) else {
        return false;
    };

    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

/// Maps a webhook event type to the issuance status it implies
///
/// Returns `None` for events that don't affect issuance status.
pub fn status_for_event(event_type: &str) -> Option<IssuanceStatus> {
    match event_type {
        "transaction.submitted" => return Some(IssuanceStatus::Processing),
        "transaction.shipped" | "transaction.delivered" | "adjustment.applied" => {
            return Some(IssuanceStatus::Completed)
        }
        "transaction.returned" => return Some(IssuanceStatus::Failed),
        _ => {}
    }

    let (_, action) = event_type.rsplit_once('.')?;
    match action {
        "created" | "pending" | "processing" => Some(IssuanceStatus::Processing),
        "completed" => Some(IssuanceStatus::Completed),
        "failed" | "cancelled" | "canceled" | "rejected" => Some(IssuanceStatus::Failed),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_is_deterministic() {
        let a = sign("secret", b"payload");
        let b = sign("secret", b"payload");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, sign("secret", b"other payload"));
        assert_ne!(a, sign("other secret", b"payload"));
    }

    #[test]
    fn test_verify_accepts_valid_signatures() {
        let body = br#"{"type":"adjustment.applied"}"#;
        let sig = sign("whsec_test", body);

        assert!(verify_signature("whsec_test", body, &sig));
        assert!(verify_signature("whsec_test", body, &format!("sha256={}", sig)));
        assert!(verify_signature("whsec_test", body, &format!("  {}  ", sig)));
    }

    #[test]
    fn test_verify_rejects_tampering() {
        let body = br#"{"type":"adjustment.applied"}"#;
        let sig = sign("whsec_test", body);

        assert!(!verify_signature("whsec_test", br#"{"type":"adjustment.failed"}"#, &sig));
        assert!(!verify_signature("wrong_secret", body, &sig));
        assert!(!verify_signature("whsec_test", body, "not-hex"));
        assert!(!verify_signature("whsec_test", body, ""));
        assert!(!verify_signature("whsec_test", body, &sig[..32]));
    }

    #[test]
    fn test_processing_events() {
        for event in [
            "transaction.created",
            "adjustment.pending",
            "transaction.processing",
            "transaction.submitted",
        ] {
            assert_eq!(status_for_event(event), Some(IssuanceStatus::Processing), "{event}");
        }
    }

    #[test]
    fn test_completed_events() {
        for event in [
            "transaction.completed",
            "adjustment.completed",
            "transaction.shipped",
            "transaction.delivered",
            "adjustment.applied",
        ] {
            assert_eq!(status_for_event(event), Some(IssuanceStatus::Completed), "{event}");
        }
    }

    #[test]
    fn test_failed_events() {
        for event in [
            "transaction.failed",
            "adjustment.cancelled",
            "transaction.canceled",
            "adjustment.rejected",
            "transaction.returned",
        ] {
            assert_eq!(status_for_event(event), Some(IssuanceStatus::Failed), "{event}");
        }
    }

    #[test]
    fn test_unknown_events_are_ignored() {
        for event in ["participant.updated", "ping", "", "transaction.", "completed"] {
            assert_eq!(status_for_event(event), None, "{event}");
        }
    }

    #[test]
    fn test_event_parsing_accepts_id_variants() {
        let event: WebhookEvent =
            serde_json::from_str(r#"{"type":"transaction.shipped","data":{"id":"txn_9"}}"#).unwrap();
        assert_eq!(event.transaction_id().as_deref(), Some("txn_9"));

        let event: WebhookEvent =
            serde_json::from_str(r#"{"event":"adjustment.applied","data":{"adjustmentId":77}}"#)
                .unwrap();
        assert_eq!(event.event_type, "adjustment.applied");
        assert_eq!(event.transaction_id().as_deref(), Some("77"));

        let event: WebhookEvent = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert_eq!(event.transaction_id(), None);
    }
}
