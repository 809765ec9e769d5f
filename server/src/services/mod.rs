//! Checkout core: intent creation with a price snapshot, and idempotent
//! ticket issuance from provider confirmations.

use thiserror::Error;
use uuid::Uuid;

use crate::gateway::GatewayError;
use crate::store::StoreError;

pub mod issuer;
pub mod ledger;
pub mod ticket_number;

pub use issuer::TicketIssuer;
pub use ledger::{CreatedIntent, IntentLedger, NewIntent};

/// Failures scoped to a single checkout attempt.
#[derive(Debug, Error)]
pub enum CheckoutError {
    #[error("Event {0} does not exist or is not purchasable")]
    EventNotFound(Uuid),

    #[error("Invalid checkout request: {0}")]
    InvalidRequest(String),

    #[error("Payment gateway unavailable")]
    GatewayUnavailable(#[source] GatewayError),

    #[error("Unknown payment intent {0}")]
    UnknownIntent(String),

    #[error("Payment for intent {intent_id} failed: {reason}")]
    PaymentFailed { intent_id: String, reason: String },

    /// The provider reports a capture on an intent already recorded as
    /// declined. No ticket is issued; the charge needs a manual refund.
    #[error("Payment intent {0} was declined but the provider reports a capture")]
    CaptureAfterDecline(String),

    #[error("Payment for intent {0} has not settled yet")]
    PaymentPending(String),

    #[error("Storage error")]
    Storage(#[from] StoreError),
}

impl CheckoutError {
    /// Whether the same call may be repeated unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CheckoutError::GatewayUnavailable(_)
                | CheckoutError::PaymentPending(_)
                | CheckoutError::Storage(_)
        )
    }
}
