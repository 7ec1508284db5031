//! Webhook signature verification and notification parsing.
//!
//! The gateway signs each delivery with HMAC SHA256 over
//! `"{timestamp}.{payload}"` and sends the result in a
//! `t=<unix>,v1=<hex>` header. Verification recomputes the digest with the
//! shared secret and enforces a freshness window so a captured delivery
//! cannot be replayed later.
//!
//! Parsing is strict about correlation metadata: a notification the engine
//! would act on must carry well-formed `event_id`/`buyer_id`/`quantity`
//! fields, while unknown notification types pass through untouched so the
//! caller can acknowledge and drop them.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use std::time::Duration;
use thiserror::Error;

use crate::ports::SessionMetadata;

type HmacSha256 = Hmac<Sha256>;

// =============================================================================
// Constants
// =============================================================================

/// HTTP header carrying the delivery signature.
pub const SIGNATURE_HEADER: &str = "gateway-signature";

/// Default freshness window for signed deliveries.
pub const DEFAULT_TOLERANCE: Duration = Duration::from_secs(300);

// =============================================================================
// Errors
// =============================================================================

/// Errors from webhook verification and parsing.
#[derive(Debug, Clone, Error)]
pub enum WebhookError {
    /// Header is missing, or not `t=...,v1=...`
    #[error("Malformed signature header")]
    MalformedHeader,

    /// Recomputed digest matches none of the signatures offered
    #[error("Signature mismatch")]
    SignatureMismatch,

    /// Timestamp outside the freshness window
    #[error("Signature timestamp outside tolerance: sent at {sent_at}")]
    Stale {
        /// Unix timestamp the delivery claims
        sent_at: i64,
    },

    /// Failed to build a signature
    #[error("Failed to build signature: {0}")]
    Signature(String),

    /// Payload is not the JSON envelope we expect
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    /// An actionable notification arrived without usable correlation metadata
    #[error("Missing or malformed metadata field: {0}")]
    InvalidMetadata(&'static str),
}

// =============================================================================
// Signatures
// =============================================================================

/// Produce a `t=...,v1=...` signature header for a payload.
///
/// The gateway side of the scheme. Tests and local tooling use it to
/// fabricate authentic deliveries.
pub fn sign_payload(
    payload: &[u8],
    secret: &str,
    timestamp: i64,
) -> Result<String, WebhookError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| WebhookError::Signature(format!("HMAC error: {}", e)))?;

    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    let digest = hex::encode(mac.finalize().into_bytes());

    Ok(format!("t={},v1={}", timestamp, digest))
}

/// Verify a `t=...,v1=...` signature header against the raw request body.
///
/// Accepts if any offered `v1` signature matches; multiple signatures occur
/// while a shared secret is being rotated.
pub fn verify_signature(
    payload: &[u8],
    header: &str,
    secret: &str,
    tolerance: Duration,
    now: DateTime<Utc>,
) -> Result<(), WebhookError> {
    let (timestamp, candidates) = parse_signature_header(header)?;

    let age = now.timestamp() - timestamp;
    if age.unsigned_abs() > tolerance.as_secs() {
        return Err(WebhookError::Stale { sent_at: timestamp });
    }

    if candidates
        .iter()
        .any(|candidate| signature_matches(payload, secret, timestamp, candidate))
    {
        Ok(())
    } else {
        Err(WebhookError::SignatureMismatch)
    }
}

/// Split the header into its timestamp and `v1` signature candidates.
fn parse_signature_header(header: &str) -> Result<(i64, Vec<&str>), WebhookError> {
    let mut timestamp = None;
    let mut candidates = Vec::new();

    for part in header.split(',') {
        let Some((key, value)) = part.trim().split_once('=') else {
            return Err(WebhookError::MalformedHeader);
        };
        match key {
            "t" => {
                timestamp =
                    Some(value.parse::<i64>().map_err(|_| WebhookError::MalformedHeader)?);
            }
            "v1" => candidates.push(value),
            // Unknown schemes are skipped, not rejected
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(WebhookError::MalformedHeader)?;
    if candidates.is_empty() {
        return Err(WebhookError::MalformedHeader);
    }

    Ok((timestamp, candidates))
}

/// Constant-time comparison of one offered signature.
fn signature_matches(payload: &[u8], secret: &str, timestamp: i64, candidate: &str) -> bool {
    let Ok(offered) = hex::decode(candidate) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };

    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);

    mac.verify_slice(&offered).is_ok()
}

// =============================================================================
// Notification Parsing
// =============================================================================

/// Notification types the engine acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationKind {
    /// `checkout.session.completed`: the buyer paid
    Completed,
    /// `checkout.session.expired`: the session lapsed unpaid
    Expired,
    /// `checkout.session.async_payment_failed`: a delayed payment bounced
    PaymentFailed,
    /// Anything else; acknowledged and ignored
    Other(String),
}

impl NotificationKind {
    fn from_type(kind: &str) -> Self {
        match kind {
            "checkout.session.completed" => NotificationKind::Completed,
            "checkout.session.expired" => NotificationKind::Expired,
            "checkout.session.async_payment_failed" => NotificationKind::PaymentFailed,
            other => NotificationKind::Other(other.to_string()),
        }
    }

    /// Whether this type maps to a seat-affecting operation.
    pub fn is_actionable(&self) -> bool {
        !matches!(self, NotificationKind::Other(_))
    }
}

/// A parsed payment notification.
///
/// `metadata` is `Some` exactly when the kind is actionable; parsing fails
/// instead of producing an actionable notification without it.
#[derive(Debug, Clone)]
pub struct PaymentNotification {
    /// Gateway-assigned delivery id; the idempotency ledger key
    pub id: String,
    /// What happened to the session
    pub kind: NotificationKind,
    /// The checkout session the notification is about
    pub session_id: String,
    /// Buyer email as captured by the payment page
    pub customer_email: Option<String>,
    /// Correlation metadata attached at session creation
    pub metadata: Option<SessionMetadata>,
}

/// Parse a notification payload, validating metadata for actionable types.
///
/// Call [`verify_signature`] first; parsing performs no authenticity check.
pub fn parse_notification(payload: &[u8]) -> Result<PaymentNotification, WebhookError> {
    let envelope: NotificationEnvelope = serde_json::from_slice(payload)
        .map_err(|e| WebhookError::MalformedPayload(e.to_string()))?;

    let kind = NotificationKind::from_type(&envelope.kind);
    let object = envelope.data.object;

    let metadata = if kind.is_actionable() {
        Some(object.metadata.validate()?)
    } else {
        None
    };

    Ok(PaymentNotification {
        id: envelope.id,
        kind,
        session_id: object.id,
        customer_email: object.customer_email,
        metadata,
    })
}

/// Outer notification envelope.
#[derive(Debug, Deserialize)]
struct NotificationEnvelope {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    data: NotificationData,
}

#[derive(Debug, Deserialize)]
struct NotificationData {
    object: SessionObject,
}

/// The checkout session as notifications carry it.
#[derive(Debug, Deserialize)]
struct SessionObject {
    id: String,
    #[serde(default)]
    customer_email: Option<String>,
    #[serde(default)]
    metadata: RawMetadata,
}

/// Metadata as the gateway echoes it: all-string, any field may be absent.
#[derive(Debug, Default, Deserialize)]
struct RawMetadata {
    #[serde(default)]
    event_id: Option<String>,
    #[serde(default)]
    buyer_id: Option<String>,
    #[serde(default)]
    quantity: Option<String>,
    #[serde(default)]
    order_id: Option<String>,
}

impl RawMetadata {
    fn validate(self) -> Result<SessionMetadata, WebhookError> {
        let event_id = self
            .event_id
            .ok_or(WebhookError::InvalidMetadata("event_id"))?
            .parse()
            .map_err(|_| WebhookError::InvalidMetadata("event_id"))?;

        let buyer_id = self
            .buyer_id
            .ok_or(WebhookError::InvalidMetadata("buyer_id"))?
            .parse()
            .map_err(|_| WebhookError::InvalidMetadata("buyer_id"))?;

        let quantity = self
            .quantity
            .ok_or(WebhookError::InvalidMetadata("quantity"))?
            .parse()
            .map_err(|_| WebhookError::InvalidMetadata("quantity"))?;

        let order_id = match self.order_id {
            Some(raw) => Some(
                raw.parse()
                    .map_err(|_| WebhookError::InvalidMetadata("order_id"))?,
            ),
            None => None,
        };

        Ok(SessionMetadata {
            event_id,
            buyer_id,
            quantity,
            order_id,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    const SECRET: &str = "whsec_test_secret";

    fn completed_payload(event_id: Uuid, buyer_id: Uuid, order_id: Uuid) -> String {
        format!(
            r#"{{
                "id": "evt_001",
                "type": "checkout.session.completed",
                "data": {{
                    "object": {{
                        "id": "cs_test_1",
                        "customer_email": "buyer@example.com",
                        "metadata": {{
                            "event_id": "{}",
                            "buyer_id": "{}",
                            "quantity": "2",
                            "order_id": "{}"
                        }}
                    }}
                }}
            }}"#,
            event_id, buyer_id, order_id
        )
    }

    #[test]
    fn test_sign_then_verify_round_trip() {
        let payload = b"{\"id\": \"evt_1\"}";
        let now = Utc::now();

        let header = sign_payload(payload, SECRET, now.timestamp()).unwrap();

        verify_signature(payload, &header, SECRET, DEFAULT_TOLERANCE, now).unwrap();
    }

    #[test]
    fn test_verify_rejects_wrong_secret() {
        let payload = b"{\"id\": \"evt_1\"}";
        let now = Utc::now();
        let header = sign_payload(payload, "whsec_other", now.timestamp()).unwrap();

        let err = verify_signature(payload, &header, SECRET, DEFAULT_TOLERANCE, now).unwrap_err();

        assert!(matches!(err, WebhookError::SignatureMismatch));
    }

    #[test]
    fn test_verify_rejects_tampered_payload() {
        let now = Utc::now();
        let header = sign_payload(b"{\"amount\": 100}", SECRET, now.timestamp()).unwrap();

        let err = verify_signature(b"{\"amount\": 999}", &header, SECRET, DEFAULT_TOLERANCE, now)
            .unwrap_err();

        assert!(matches!(err, WebhookError::SignatureMismatch));
    }

    #[test]
    fn test_verify_rejects_stale_timestamp() {
        let payload = b"{}";
        let now = Utc::now();
        let sent_at = now.timestamp() - 600; // 10 minutes ago, tolerance is 5
        let header = sign_payload(payload, SECRET, sent_at).unwrap();

        let err = verify_signature(payload, &header, SECRET, DEFAULT_TOLERANCE, now).unwrap_err();

        assert!(matches!(err, WebhookError::Stale { .. }));
    }

    #[test]
    fn test_verify_rejects_future_timestamp() {
        let payload = b"{}";
        let now = Utc::now();
        let header = sign_payload(payload, SECRET, now.timestamp() + 600).unwrap();

        let err = verify_signature(payload, &header, SECRET, DEFAULT_TOLERANCE, now).unwrap_err();

        assert!(matches!(err, WebhookError::Stale { .. }));
    }

    #[test]
    fn test_verify_accepts_any_matching_candidate() {
        let payload = b"{}";
        let now = Utc::now();
        let signed = sign_payload(payload, SECRET, now.timestamp()).unwrap();
        let digest = signed.split("v1=").nth(1).unwrap();

        // Rotation: stale signature first, current one second
        let header = format!("t={},v1={},v1={}", now.timestamp(), "00ff00ff", digest);

        verify_signature(payload, &header, SECRET, DEFAULT_TOLERANCE, now).unwrap();
    }

    #[test]
    fn test_malformed_headers_rejected() {
        let payload = b"{}";
        let now = Utc::now();

        for header in [
            "",
            "garbage",
            "t=notanumber,v1=aabb",
            "v1=aabb",       // no timestamp
            "t=1700000000",  // no signature
        ] {
            let err = verify_signature(payload, header, SECRET, DEFAULT_TOLERANCE, now)
                .unwrap_err();
            assert!(
                matches!(err, WebhookError::MalformedHeader),
                "header {:?} should be malformed",
                header
            );
        }
    }

    #[test]
    fn test_parse_completed_notification() {
        let event_id = Uuid::now_v7();
        let buyer_id = Uuid::new_v4();
        let order_id = Uuid::now_v7();
        let payload = completed_payload(event_id, buyer_id, order_id);

        let notification = parse_notification(payload.as_bytes()).unwrap();

        assert_eq!(notification.id, "evt_001");
        assert_eq!(notification.kind, NotificationKind::Completed);
        assert_eq!(notification.session_id, "cs_test_1");
        assert_eq!(
            notification.customer_email.as_deref(),
            Some("buyer@example.com")
        );

        let metadata = notification.metadata.unwrap();
        assert_eq!(metadata.event_id, event_id);
        assert_eq!(metadata.buyer_id, buyer_id);
        assert_eq!(metadata.quantity, 2);
        assert_eq!(metadata.order_id, Some(order_id));
    }

    #[test]
    fn test_parse_expired_notification_without_order_id() {
        let payload = format!(
            r#"{{
                "id": "evt_002",
                "type": "checkout.session.expired",
                "data": {{
                    "object": {{
                        "id": "cs_test_2",
                        "metadata": {{
                            "event_id": "{}",
                            "buyer_id": "{}",
                            "quantity": "1"
                        }}
                    }}
                }}
            }}"#,
            Uuid::now_v7(),
            Uuid::new_v4()
        );

        let notification = parse_notification(payload.as_bytes()).unwrap();

        assert_eq!(notification.kind, NotificationKind::Expired);
        assert!(notification.customer_email.is_none());
        assert_eq!(notification.metadata.unwrap().order_id, None);
    }

    #[test]
    fn test_parse_unknown_type_skips_metadata() {
        let payload = r#"{
            "id": "evt_003",
            "type": "payment_intent.created",
            "data": {"object": {"id": "pi_123"}}
        }"#;

        let notification = parse_notification(payload.as_bytes()).unwrap();

        assert_eq!(
            notification.kind,
            NotificationKind::Other("payment_intent.created".to_string())
        );
        assert!(!notification.kind.is_actionable());
        assert!(notification.metadata.is_none());
    }

    #[test]
    fn test_parse_actionable_without_metadata_fails() {
        let payload = r#"{
            "id": "evt_004",
            "type": "checkout.session.completed",
            "data": {"object": {"id": "cs_test_4"}}
        }"#;

        let err = parse_notification(payload.as_bytes()).unwrap_err();

        assert!(matches!(err, WebhookError::InvalidMetadata("event_id")));
    }

    #[test]
    fn test_parse_rejects_malformed_uuid() {
        let payload = format!(
            r#"{{
                "id": "evt_005",
                "type": "checkout.session.expired",
                "data": {{
                    "object": {{
                        "id": "cs_test_5",
                        "metadata": {{
                            "event_id": "not-a-uuid",
                            "buyer_id": "{}",
                            "quantity": "1"
                        }}
                    }}
                }}
            }}"#,
            Uuid::new_v4()
        );

        let err = parse_notification(payload.as_bytes()).unwrap_err();

        assert!(matches!(err, WebhookError::InvalidMetadata("event_id")));
    }

    #[test]
    fn test_parse_rejects_non_json() {
        let err = parse_notification(b"not json at all").unwrap_err();

        assert!(matches!(err, WebhookError::MalformedPayload(_)));
    }
}
