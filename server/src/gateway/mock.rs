use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    CreateIntentRequest, GatewayError, GatewayIntent, GatewayIntentStatus, LastPaymentError,
    PaymentGateway,
};

#[derive(Default)]
struct MockState {
    intents: HashMap<String, GatewayIntent>,
    by_idempotency_key: HashMap<String, String>,
    unavailable: bool,
    created: usize,
    cancelled: Vec<String>,
}

/// In-process provider for local runs and tests. Intents settle only when told to.
#[derive(Clone, Default)]
pub struct MockGateway {
    state: Arc<Mutex<MockState>>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// While set, every call fails as if the provider were unreachable.
    pub async fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().await.unavailable = unavailable;
    }

    /// Marks the charge as captured, as the provider would after client authorization.
    pub async fn succeed(&self, intent_id: &str) -> bool {
        self.set_status(intent_id, GatewayIntentStatus::Succeeded, None)
            .await
    }

    pub async fn decline(&self, intent_id: &str, message: &str) -> bool {
        let error = LastPaymentError {
            code: "card_declined".to_string(),
            message: message.to_string(),
        };
        self.set_status(
            intent_id,
            GatewayIntentStatus::RequiresPaymentMethod,
            Some(error),
        )
        .await
    }

    pub async fn mark_processing(&self, intent_id: &str) -> bool {
        self.set_status(intent_id, GatewayIntentStatus::Processing, None)
            .await
    }

    /// Number of distinct intents the provider has created.
    pub async fn created_count(&self) -> usize {
        self.state.lock().await.created
    }

    pub async fn cancelled(&self) -> Vec<String> {
        self.state.lock().await.cancelled.clone()
    }

    async fn set_status(
        &self,
        intent_id: &str,
        status: GatewayIntentStatus,
        error: Option<LastPaymentError>,
    ) -> bool {
        match self.state.lock().await.intents.get_mut(intent_id) {
            // Cancelled intents cannot be captured or retried.
            Some(intent) if intent.status == GatewayIntentStatus::Canceled => false,
            Some(intent) => {
                intent.status = status;
                intent.last_payment_error = error;
                true
            }
            None => false,
        }
    }
}

fn unreachable_error() -> GatewayError {
    GatewayError::Http("connection refused".to_string())
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn create_intent(
        &self,
        request: CreateIntentRequest,
    ) -> Result<GatewayIntent, GatewayError> {
        let mut state = self.state.lock().await;
        if state.unavailable {
            return Err(unreachable_error());
        }

        if let Some(key) = &request.idempotency_key {
            if let Some(existing) = state
                .by_idempotency_key
                .get(key)
                .and_then(|id| state.intents.get(id))
            {
                return Ok(existing.clone());
            }
        }

        let id = format!("pi_mock_{}", Uuid::new_v4().simple());
        let intent = GatewayIntent {
            client_secret: Some(format!("{}_secret_{}", id, Uuid::new_v4().simple())),
            id: id.clone(),
            amount: request.amount,
            currency: request.currency,
            status: GatewayIntentStatus::RequiresPaymentMethod,
            last_payment_error: None,
        };

        if let Some(key) = request.idempotency_key {
            state.by_idempotency_key.insert(key, id.clone());
        }
        state.intents.insert(id.clone(), intent.clone());
        state.created += 1;

        tracing::debug!(intent_id = %id, amount = intent.amount, "Mock gateway intent created");

        Ok(intent)
    }

    async fn retrieve_intent(&self, intent_id: &str) -> Result<GatewayIntent, GatewayError> {
        let state = self.state.lock().await;
        if state.unavailable {
            return Err(unreachable_error());
        }
        state
            .intents
            .get(intent_id)
            .cloned()
            .ok_or_else(|| GatewayError::NotFound(intent_id.to_string()))
    }

    async fn cancel_intent(&self, intent_id: &str) -> Result<(), GatewayError> {
        let mut state = self.state.lock().await;
        if state.unavailable {
            return Err(unreachable_error());
        }
        let intent = state
            .intents
            .get_mut(intent_id)
            .ok_or_else(|| GatewayError::NotFound(intent_id.to_string()))?;
        intent.status = GatewayIntentStatus::Canceled;
        state.cancelled.push(intent_id.to_string());
        Ok(())
    }
}
