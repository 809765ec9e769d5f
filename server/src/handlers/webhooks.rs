use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::Response;
use serde::Serialize;
use tracing::{debug, info};

use crate::gateway::webhook::{verify_signature, WebhookError, WebhookEvent, SIGNATURE_HEADER};
use crate::services::CheckoutError;
use crate::state::AppState;
use crate::utils::error::AppError;
use crate::utils::response::{empty_success, success};

#[derive(Serialize)]
struct WebhookAck {
    event_id: String,
    ticket_number: String,
}

/// Provider deliveries are at-least-once; issuance is idempotent so
/// redeliveries are answered with the already-issued ticket.
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let secret = state
        .webhooks
        .secret
        .as_deref()
        .ok_or_else(|| AppError::Unauthorized("Webhook receiver is not configured".to_string()))?;
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or(WebhookError::MissingSignature)?;
    verify_signature(&body, signature, secret, state.webhooks.tolerance_secs)?;

    let event = WebhookEvent::parse(&body)?;
    let Some(confirmation) = event.confirmation() else {
        debug!(event_id = %event.id, event_type = %event.event_type, "Webhook event ignored");
        return Ok(empty_success("Event ignored"));
    };

    info!(
        event_id = %event.id,
        event_type = %event.event_type,
        intent_id = %event.data.intent_id,
        "Payment webhook received"
    );

    // UnknownIntent answers 404 so the provider redelivers once the ledger row
    // exists. A capture on a declined intent answers 409 and stays unacknowledged.
    match state
        .issuer
        .confirm_and_issue(&event.data.intent_id, confirmation)
        .await
    {
        Ok(ticket) => Ok(success(
            WebhookAck {
                event_id: event.id,
                ticket_number: ticket.ticket_number,
            },
            "Ticket issued",
        )),
        Err(CheckoutError::PaymentFailed { .. }) => Ok(empty_success("Payment failure recorded")),
        Err(e) => Err(e.into()),
    }
}
