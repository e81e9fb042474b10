//! Payment provider event types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::transaction::TransactionId;

/// Webhook event types from the payment provider.
///
/// Unknown types are kept verbatim: delivery is at-least-once and the
/// provider adds event kinds over time, so everything gets recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProviderEventType {
    ChargeSuccess,
    ChargeFailed,
    TransferSuccess,
    TransferFailed,
    Refund,
    Other(String),
}

impl ProviderEventType {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "charge.success" => Self::ChargeSuccess,
            "charge.failed" => Self::ChargeFailed,
            "transfer.success" => Self::TransferSuccess,
            "transfer.failed" => Self::TransferFailed,
            "refund" => Self::Refund,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::ChargeSuccess => "charge.success",
            Self::ChargeFailed => "charge.failed",
            Self::TransferSuccess => "transfer.success",
            Self::TransferFailed => "transfer.failed",
            Self::Refund => "refund",
            Self::Other(s) => s,
        }
    }
}

impl fmt::Display for ProviderEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One inbound webhook delivery, keyed by the provider's event id.
///
/// Never mutated after `processed` is set true, except to append an error
/// note on failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentEvent {
    /// Provider event id — the idempotency key.
    pub provider_event_id: String,
    pub event_type: ProviderEventType,
    pub reference: Option<String>,
    /// Raw webhook body, for audit.
    pub payload: String,
    pub signature_verified: bool,
    pub processed: bool,
    pub processed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub transaction_id: Option<TransactionId>,
    /// Outcome returned to the caller; replayed unchanged for duplicates.
    pub outcome: ProcessingResult,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    /// Event drove a state transition.
    Processed,
    /// Event was valid but its guard state did not match (stale or
    /// out-of-order delivery); stored for audit.
    Ignored,
    /// No transaction matched the event's reference.
    Unmatched,
    /// Recorded, no transition applicable for this event type.
    Recorded,
}

/// Result returned from webhook ingestion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingResult {
    pub status: ProcessingStatus,
    pub message: String,
    pub transaction_id: Option<TransactionId>,
}

impl ProcessingResult {
    pub fn new(
        status: ProcessingStatus,
        message: impl Into<String>,
        transaction_id: Option<TransactionId>,
    ) -> Self {
        Self {
            status,
            message: message.into(),
            transaction_id,
        }
    }
}

/// Parsed webhook body: `{event, id, data: {reference, amount, ...}}`.
#[derive(Debug, Deserialize)]
pub struct WebhookPayload {
    pub event: String,
    /// Provider event id; may arrive as number or string.
    pub id: Option<serde_json::Value>,
    #[serde(default)]
    pub data: WebhookData,
}

#[derive(Debug, Default, Deserialize)]
pub struct WebhookData {
    pub reference: Option<String>,
    pub amount: Option<u64>,
    #[serde(default)]
    pub authorization: Option<WebhookAuthorization>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookAuthorization {
    pub authorization_code: Option<String>,
}

impl WebhookPayload {
    /// Normalize the provider event id to a string key.
    pub fn event_id(&self) -> Option<String> {
        match &self.id {
            Some(serde_json::Value::String(s)) if !s.is_empty() => Some(s.clone()),
            Some(serde_json::Value::Number(n)) => Some(n.to_string()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_parse_roundtrip() {
        for raw in [
            "charge.success",
            "charge.failed",
            "transfer.success",
            "transfer.failed",
            "refund",
        ] {
            assert_eq!(ProviderEventType::parse(raw).as_str(), raw);
        }
        assert_eq!(
            ProviderEventType::parse("subscription.create"),
            ProviderEventType::Other("subscription.create".to_string())
        );
    }

    #[test]
    fn test_payload_event_id_normalization() {
        let payload: WebhookPayload =
            serde_json::from_str(r#"{"event":"charge.success","id":12345,"data":{}}"#).unwrap();
        assert_eq!(payload.event_id().as_deref(), Some("12345"));

        let payload: WebhookPayload =
            serde_json::from_str(r#"{"event":"charge.success","id":"evt_1","data":{}}"#).unwrap();
        assert_eq!(payload.event_id().as_deref(), Some("evt_1"));

        let payload: WebhookPayload =
            serde_json::from_str(r#"{"event":"charge.success","data":{}}"#).unwrap();
        assert!(payload.event_id().is_none());
    }

    #[test]
    fn test_payload_nested_authorization() {
        let body = r#"{
            "event": "charge.success",
            "id": "evt_2",
            "data": {
                "reference": "ref_9",
                "amount": 10000,
                "authorization": {"authorization_code": "AUTH_x"}
            }
        }"#;
        let payload: WebhookPayload = serde_json::from_str(body).unwrap();
        assert_eq!(payload.data.reference.as_deref(), Some("ref_9"));
        assert_eq!(
            payload
                .data
                .authorization
                .and_then(|a| a.authorization_code)
                .as_deref(),
            Some("AUTH_x")
        );
    }
}
