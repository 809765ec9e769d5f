use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::Response;
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::gateway::{GatewayError, PaymentGateway, ProviderConfirmation};
use crate::models::{PaymentIntentRecord, Ticket};
use crate::services::{CheckoutError, NewIntent};
use crate::state::AppState;
use crate::utils::error::AppError;
use crate::utils::response::{created, success};

pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

#[derive(Debug, Deserialize)]
pub struct CreateIntentBody {
    pub event_id: Uuid,
    pub user_id: Option<Uuid>,
    pub email: Option<String>,
}

#[derive(Serialize)]
struct IntentView {
    intent: PaymentIntentRecord,
    ticket: Option<Ticket>,
}

pub async fn create_intent(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<CreateIntentBody>,
) -> Result<Response, AppError> {
    let idempotency_key = headers
        .get(IDEMPOTENCY_KEY_HEADER)
        .map(|value| {
            value
                .to_str()
                .map(str::to_string)
                .map_err(|_| AppError::ValidationError("Invalid Idempotency-Key header".to_string()))
        })
        .transpose()?;

    let intent = state
        .ledger
        .create_intent(NewIntent {
            event_id: body.event_id,
            user_id: body.user_id,
            email: body.email,
            idempotency_key,
        })
        .await?;

    if intent.replayed {
        Ok(success(intent, "Payment intent already exists"))
    } else {
        Ok(created(intent, "Payment intent created"))
    }
}

/// Confirms a checkout using the provider's own view of the charge.
pub async fn confirm_intent(
    State(state): State<AppState>,
    Path(intent_id): Path<String>,
) -> Result<Response, AppError> {
    let confirmation = provider_confirmation(state.gateway.as_ref(), &intent_id).await?;
    let ticket = state.issuer.confirm_and_issue(&intent_id, confirmation).await?;

    Ok(success(ticket, "Ticket issued"))
}

pub async fn get_intent(
    State(state): State<AppState>,
    Path(intent_id): Path<String>,
) -> Result<Response, AppError> {
    let intent = state
        .store
        .find_intent(&intent_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Payment intent '{}' was not found", intent_id)))?;
    let ticket = state.store.find_ticket_by_intent(&intent_id).await?;

    Ok(success(IntentView { intent, ticket }, "Payment intent retrieved"))
}

async fn provider_confirmation(
    gateway: &dyn PaymentGateway,
    intent_id: &str,
) -> Result<ProviderConfirmation, CheckoutError> {
    let intent = gateway
        .retrieve_intent(intent_id)
        .await
        .map_err(|e| match e {
            GatewayError::NotFound(id) => CheckoutError::UnknownIntent(id),
            other => CheckoutError::GatewayUnavailable(other),
        })?;

    intent
        .confirmation()
        .ok_or_else(|| CheckoutError::PaymentPending(intent_id.to_string()))
}
