use std::sync::Arc;

use crate::gateway::PaymentGateway;
use crate::services::{IntentLedger, TicketIssuer};
use crate::store::TicketingStore;

#[derive(Debug, Clone)]
pub struct WebhookSettings {
    /// Deliveries are rejected while no secret is configured.
    pub secret: Option<String>,
    pub tolerance_secs: i64,
}

/// Shared handler state. Everything mutable lives behind the store.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn TicketingStore>,
    pub gateway: Arc<dyn PaymentGateway>,
    pub ledger: IntentLedger,
    pub issuer: TicketIssuer,
    pub webhooks: Arc<WebhookSettings>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn TicketingStore>,
        gateway: Arc<dyn PaymentGateway>,
        webhooks: WebhookSettings,
    ) -> Self {
        Self {
            ledger: IntentLedger::new(store.clone(), gateway.clone()),
            issuer: TicketIssuer::new(store.clone(), gateway.clone()),
            store,
            gateway,
            webhooks: Arc::new(webhooks),
        }
    }
}
