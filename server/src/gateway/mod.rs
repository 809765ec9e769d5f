//! Port to the external card-payment provider.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub mod http;
pub mod mock;
pub mod webhook;

pub use http::{GatewayConfig, HttpGateway};
pub use mock::MockGateway;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Gateway timed out")]
    Timeout,

    #[error("API error (status {status_code}): {message}")]
    Api { status_code: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Intent not found: {0}")]
    NotFound(String),
}

impl GatewayError {
    pub fn is_client_error(&self) -> bool {
        matches!(self, GatewayError::Api { status_code, .. } if (400..500).contains(status_code))
    }

    pub fn is_server_error(&self) -> bool {
        matches!(self, GatewayError::Api { status_code, .. } if (500..600).contains(status_code))
    }
}

/// Provider-side lifecycle of an intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayIntentStatus {
    RequiresPaymentMethod,
    RequiresConfirmation,
    RequiresAction,
    Processing,
    Succeeded,
    Canceled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LastPaymentError {
    pub code: String,
    pub message: String,
}

/// An intent as reported by the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayIntent {
    pub id: String,
    pub amount: i64,
    pub currency: String,
    pub status: GatewayIntentStatus,
    /// Opaque material the client needs to authorize the charge.
    pub client_secret: Option<String>,
    pub last_payment_error: Option<LastPaymentError>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateIntentRequest {
    pub amount: i64,
    pub currency: String,
    pub event_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receipt_email: Option<String>,
    /// Sent as the provider's `Idempotency-Key` header, not in the body.
    #[serde(skip)]
    pub idempotency_key: Option<String>,
}

/// What the provider says happened to a charge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderConfirmation {
    Succeeded,
    Failed { reason: String },
}

impl GatewayIntent {
    /// Confirmation derived from the provider's own status, or `None` while
    /// the charge is still unsettled.
    pub fn confirmation(&self) -> Option<ProviderConfirmation> {
        match self.status {
            GatewayIntentStatus::Succeeded => Some(ProviderConfirmation::Succeeded),
            GatewayIntentStatus::Canceled => Some(ProviderConfirmation::Failed {
                reason: self.failure_reason("canceled"),
            }),
            GatewayIntentStatus::RequiresPaymentMethod if self.last_payment_error.is_some() => {
                Some(ProviderConfirmation::Failed {
                    reason: self.failure_reason("declined"),
                })
            }
            _ => None,
        }
    }

    fn failure_reason(&self, fallback: &str) -> String {
        self.last_payment_error
            .as_ref()
            .map(|e| e.message.clone())
            .unwrap_or_else(|| fallback.to_string())
    }
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_intent(&self, request: CreateIntentRequest)
        -> Result<GatewayIntent, GatewayError>;

    async fn retrieve_intent(&self, intent_id: &str) -> Result<GatewayIntent, GatewayError>;

    async fn cancel_intent(&self, intent_id: &str) -> Result<(), GatewayError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn intent(status: GatewayIntentStatus, error: Option<&str>) -> GatewayIntent {
        GatewayIntent {
            id: "pi_1".to_string(),
            amount: 250,
            currency: "usd".to_string(),
            status,
            client_secret: None,
            last_payment_error: error.map(|m| LastPaymentError {
                code: "card_declined".to_string(),
                message: m.to_string(),
            }),
        }
    }

    #[test]
    fn test_confirmation_from_status() {
        assert_eq!(
            intent(GatewayIntentStatus::Succeeded, None).confirmation(),
            Some(ProviderConfirmation::Succeeded)
        );
        assert_eq!(
            intent(GatewayIntentStatus::RequiresPaymentMethod, Some("Your card was declined"))
                .confirmation(),
            Some(ProviderConfirmation::Failed {
                reason: "Your card was declined".to_string()
            })
        );
        assert_eq!(
            intent(GatewayIntentStatus::Canceled, None).confirmation(),
            Some(ProviderConfirmation::Failed {
                reason: "canceled".to_string()
            })
        );
        assert_eq!(
            intent(GatewayIntentStatus::RequiresPaymentMethod, None).confirmation(),
            None
        );
        assert_eq!(intent(GatewayIntentStatus::Processing, None).confirmation(), None);
    }

    #[test]
    fn test_api_error_classes() {
        let client = GatewayError::Api {
            status_code: 402,
            message: "declined".to_string(),
        };
        let server = GatewayError::Api {
            status_code: 503,
            message: "down".to_string(),
        };
        assert!(client.is_client_error() && !client.is_server_error());
        assert!(server.is_server_error() && !server.is_client_error());
        assert!(!GatewayError::Timeout.is_server_error());
    }
}
