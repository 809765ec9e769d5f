//! Signed provider notifications.
//!
//! The provider signs each delivery with `Payment-Signature: t=<unix>,v1=<hex>`,
//! where the MAC is HMAC-SHA256 over `"{t}.{raw body}"` keyed with the
//! webhook secret. Deliveries are at-least-once.

use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use thiserror::Error;

use super::ProviderConfirmation;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "payment-signature";
pub const DEFAULT_TOLERANCE_SECS: i64 = 300;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WebhookError {
    #[error("Missing signature header")]
    MissingSignature,

    #[error("Malformed signature header")]
    MalformedSignature,

    #[error("Signature timestamp outside tolerance")]
    Expired,

    #[error("Signature verification failed")]
    InvalidSignature,

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),
}

/// Checks the signature header against the raw body.
pub fn verify_signature(
    raw_body: &[u8],
    signature_header: &str,
    secret: &str,
    tolerance_secs: i64,
) -> Result<(), WebhookError> {
    let mut timestamp = None;
    let mut signature = None;
    for part in signature_header.split(',') {
        let part = part.trim();
        if let Some(t) = part.strip_prefix("t=") {
            timestamp = Some(t);
        } else if let Some(v1) = part.strip_prefix("v1=") {
            signature = Some(v1);
        }
    }

    let timestamp = timestamp.ok_or(WebhookError::MalformedSignature)?;
    let signature = signature.ok_or(WebhookError::MalformedSignature)?;

    let sent_at: i64 = timestamp
        .parse()
        .map_err(|_| WebhookError::MalformedSignature)?;
    if Utc::now().timestamp().abs_diff(sent_at) > tolerance_secs.max(0) as u64 {
        return Err(WebhookError::Expired);
    }

    let expected = hex::decode(signature).map_err(|_| WebhookError::MalformedSignature)?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| WebhookError::InvalidSignature)?;
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(raw_body);

    // constant-time
    mac.verify_slice(&expected)
        .map_err(|_| WebhookError::InvalidSignature)
}

/// Produces a header value for `raw_body`; used by tests and local tooling.
pub fn sign(raw_body: &[u8], secret: &str, timestamp: i64) -> Result<String, WebhookError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| WebhookError::InvalidSignature)?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(raw_body);
    Ok(format!(
        "t={},v1={}",
        timestamp,
        hex::encode(mac.finalize().into_bytes())
    ))
}

#[derive(Debug, Deserialize)]
pub struct WebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: WebhookIntentData,
}

#[derive(Debug, Deserialize)]
pub struct WebhookIntentData {
    pub intent_id: String,
    #[serde(default)]
    pub failure_message: Option<String>,
}

impl WebhookEvent {
    pub fn parse(raw_body: &[u8]) -> Result<Self, WebhookError> {
        serde_json::from_slice(raw_body).map_err(|e| WebhookError::InvalidPayload(e.to_string()))
    }

    /// `None` for event types that carry no confirmation.
    pub fn confirmation(&self) -> Option<ProviderConfirmation> {
        match self.event_type.as_str() {
            "payment_intent.succeeded" => Some(ProviderConfirmation::Succeeded),
            "payment_intent.payment_failed" | "payment_intent.canceled" => {
                Some(ProviderConfirmation::Failed {
                    reason: self
                        .data
                        .failure_message
                        .clone()
                        .unwrap_or_else(|| "payment failed".to_string()),
                })
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test_secret";
    const BODY: &[u8] =
        br#"{"id":"evt_1","type":"payment_intent.succeeded","data":{"intent_id":"pi_123"}}"#;

    #[test]
    fn test_valid_signature() {
        let header = sign(BODY, SECRET, Utc::now().timestamp()).unwrap();
        assert_eq!(
            verify_signature(BODY, &header, SECRET, DEFAULT_TOLERANCE_SECS),
            Ok(())
        );
    }

    #[test]
    fn test_tampered_body_or_wrong_secret() {
        let header = sign(BODY, SECRET, Utc::now().timestamp()).unwrap();
        assert_eq!(
            verify_signature(b"{}", &header, SECRET, DEFAULT_TOLERANCE_SECS),
            Err(WebhookError::InvalidSignature)
        );
        assert_eq!(
            verify_signature(BODY, &header, "whsec_other", DEFAULT_TOLERANCE_SECS),
            Err(WebhookError::InvalidSignature)
        );
    }

    #[test]
    fn test_expired_signature() {
        let header = sign(BODY, SECRET, 1_000_000).unwrap();
        assert_eq!(
            verify_signature(BODY, &header, SECRET, DEFAULT_TOLERANCE_SECS),
            Err(WebhookError::Expired)
        );
    }

    #[test]
    fn test_malformed_header() {
        for header in ["", "v1=abcd", "t=123", "t=abc,v1=00", "t=1,v1=zz"] {
            assert!(verify_signature(BODY, header, SECRET, i64::MAX).is_err());
        }
    }

    #[test]
    fn test_event_confirmation_mapping() {
        let event = WebhookEvent::parse(BODY).unwrap();
        assert_eq!(event.data.intent_id, "pi_123");
        assert_eq!(event.confirmation(), Some(ProviderConfirmation::Succeeded));

        let failed = WebhookEvent::parse(
            br#"{"id":"evt_2","type":"payment_intent.payment_failed","data":{"intent_id":"pi_9","failure_message":"insufficient funds"}}"#,
        )
        .unwrap();
        assert_eq!(
            failed.confirmation(),
            Some(ProviderConfirmation::Failed {
                reason: "insufficient funds".to_string()
            })
        );

        let other = WebhookEvent::parse(
            br#"{"id":"evt_3","type":"payment_intent.created","data":{"intent_id":"pi_9"}}"#,
        )
        .unwrap();
        assert_eq!(other.confirmation(), None);
    }
}
