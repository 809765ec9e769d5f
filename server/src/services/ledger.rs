use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use super::CheckoutError;
use crate::gateway::{CreateIntentRequest, PaymentGateway};
use crate::models::{IntentStatus, PaymentIntentRecord};
use crate::store::{Constraint, StoreError, TicketingStore};

const IDEMPOTENCY_KEY_MIN: usize = 8;
const IDEMPOTENCY_KEY_MAX: usize = 128;

#[derive(Debug, Clone)]
pub struct NewIntent {
    pub event_id: Uuid,
    pub user_id: Option<Uuid>,
    pub email: Option<String>,
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreatedIntent {
    pub intent_id: String,
    pub client_secret: Option<String>,
    pub amount: i64,
    pub currency: String,
    /// True when an earlier call with the same idempotency key produced this intent.
    pub replayed: bool,
}

impl CreatedIntent {
    fn from_record(record: &PaymentIntentRecord, client_secret: Option<String>, replayed: bool) -> Self {
        Self {
            intent_id: record.intent_id.clone(),
            client_secret,
            amount: record.price_snapshot,
            currency: record.currency.clone(),
            replayed,
        }
    }
}

/// Write path of the checkout ledger.
#[derive(Clone)]
pub struct IntentLedger {
    store: Arc<dyn TicketingStore>,
    gateway: Arc<dyn PaymentGateway>,
}

impl IntentLedger {
    pub fn new(store: Arc<dyn TicketingStore>, gateway: Arc<dyn PaymentGateway>) -> Self {
        Self { store, gateway }
    }

    /// Snapshots the event price, opens a provider intent, and records a
    /// `Created` ledger row. Either both the provider intent and the row exist
    /// afterwards, or neither does.
    pub async fn create_intent(&self, request: NewIntent) -> Result<CreatedIntent, CheckoutError> {
        let email = normalize_email(request.email)?;
        if request.user_id.is_none() && email.is_none() {
            return Err(CheckoutError::InvalidRequest(
                "either a user id or an email is required".to_string(),
            ));
        }
        if let Some(key) = &request.idempotency_key {
            validate_idempotency_key(key)?;
            if let Some(existing) = self.store.find_intent_by_idempotency_key(key).await? {
                return self.replay(existing, request.event_id).await;
            }
        }

        let event = self
            .store
            .find_event(request.event_id)
            .await?
            .ok_or(CheckoutError::EventNotFound(request.event_id))?;
        let issued = self.store.count_issued_tickets(event.id).await?;
        if let Err(reason) = event.is_purchasable(issued, Utc::now()) {
            info!(event_id = %event.id, reason, "Checkout rejected: event not purchasable");
            return Err(CheckoutError::EventNotFound(event.id));
        }

        let gateway_intent = self
            .gateway
            .create_intent(CreateIntentRequest {
                amount: event.price_minor,
                currency: event.currency.clone(),
                event_id: event.id,
                receipt_email: email.clone(),
                idempotency_key: request.idempotency_key.clone(),
            })
            .await
            .map_err(|e| {
                warn!(event_id = %event.id, error = %e, "Payment gateway rejected intent creation");
                CheckoutError::GatewayUnavailable(e)
            })?;

        let now = Utc::now();
        let record = PaymentIntentRecord {
            intent_id: gateway_intent.id.clone(),
            event_id: event.id,
            user_id: request.user_id,
            email,
            price_snapshot: event.price_minor,
            currency: event.currency,
            status: IntentStatus::Created,
            idempotency_key: request.idempotency_key.clone(),
            created_at: now,
            updated_at: now,
        };

        match self.store.insert_intent(&record).await {
            Ok(()) => {
                info!(
                    intent_id = %record.intent_id,
                    event_id = %record.event_id,
                    price_snapshot = record.price_snapshot,
                    "Payment intent created"
                );
                Ok(CreatedIntent::from_record(
                    &record,
                    gateway_intent.client_secret,
                    false,
                ))
            }
            Err(StoreError::Conflict(constraint)) => {
                // A concurrent call with the same key wrote its row first.
                let winner = match &request.idempotency_key {
                    Some(key) => self.store.find_intent_by_idempotency_key(key).await?,
                    None => None,
                };
                let Some(winner) = winner else {
                    // On an intent-id clash the provider intent already has a row; keep it.
                    if constraint != Constraint::IntentId {
                        self.compensate(&gateway_intent.id).await;
                    }
                    return Err(StoreError::Conflict(constraint).into());
                };
                if winner.intent_id != gateway_intent.id {
                    self.compensate(&gateway_intent.id).await;
                }
                self.replay(winner, request.event_id).await
            }
            Err(e) => {
                self.compensate(&gateway_intent.id).await;
                Err(e.into())
            }
        }
    }

    /// Returns an already-recorded intent for a repeated idempotency key.
    async fn replay(
        &self,
        existing: PaymentIntentRecord,
        requested_event: Uuid,
    ) -> Result<CreatedIntent, CheckoutError> {
        if existing.event_id != requested_event {
            return Err(CheckoutError::InvalidRequest(
                "idempotency key was already used for a different event".to_string(),
            ));
        }
        if existing.status == IntentStatus::Failed {
            return Err(CheckoutError::PaymentFailed {
                intent_id: existing.intent_id,
                reason: "this checkout was declined; retry with a new idempotency key".to_string(),
            });
        }

        let gateway_intent = self
            .gateway
            .retrieve_intent(&existing.intent_id)
            .await
            .map_err(CheckoutError::GatewayUnavailable)?;

        info!(intent_id = %existing.intent_id, "Payment intent replayed for idempotency key");
        Ok(CreatedIntent::from_record(
            &existing,
            gateway_intent.client_secret,
            true,
        ))
    }

    /// Best-effort cancel of a provider intent that has no ledger row.
    async fn compensate(&self, intent_id: &str) {
        match self.gateway.cancel_intent(intent_id).await {
            Ok(()) => info!(intent_id, "Cancelled orphaned gateway intent"),
            Err(e) => warn!(intent_id, error = %e, "Failed to cancel orphaned gateway intent"),
        }
    }
}

fn normalize_email(email: Option<String>) -> Result<Option<String>, CheckoutError> {
    let Some(email) = email else {
        return Ok(None);
    };
    let email = email.trim().to_lowercase();
    if email.is_empty() {
        return Ok(None);
    }
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(Some(email)),
        _ => Err(CheckoutError::InvalidRequest(format!(
            "'{}' is not a valid email address",
            email
        ))),
    }
}

fn validate_idempotency_key(key: &str) -> Result<(), CheckoutError> {
    if (IDEMPOTENCY_KEY_MIN..=IDEMPOTENCY_KEY_MAX).contains(&key.len()) {
        Ok(())
    } else {
        Err(CheckoutError::InvalidRequest(format!(
            "idempotency key must be between {} and {} characters",
            IDEMPOTENCY_KEY_MIN, IDEMPOTENCY_KEY_MAX
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::MockGateway;
    use crate::models::Event;
    use crate::store::InMemoryStore;
    use chrono::Duration;

    struct Fixture {
        store: InMemoryStore,
        gateway: MockGateway,
        ledger: IntentLedger,
    }

    fn fixture() -> Fixture {
        let store = InMemoryStore::new();
        let gateway = MockGateway::new();
        let ledger = IntentLedger::new(Arc::new(store.clone()), Arc::new(gateway.clone()));
        Fixture {
            store,
            gateway,
            ledger,
        }
    }

    async fn seed_event(store: &InMemoryStore, price_minor: i64) -> Uuid {
        let now = Utc::now();
        let event = Event {
            id: Uuid::new_v4(),
            title: "Basement Sessions".to_string(),
            venue_ref: None,
            price_minor,
            currency: "usd".to_string(),
            capacity: None,
            sales_open: true,
            starts_at: now + Duration::days(7),
            created_at: now,
            updated_at: now,
        };
        let id = event.id;
        store.put_event(event).await;
        id
    }

    fn request(event_id: Uuid, key: Option<&str>) -> NewIntent {
        NewIntent {
            event_id,
            user_id: Some(Uuid::new_v4()),
            email: Some("Fan@Example.com ".to_string()),
            idempotency_key: key.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_create_intent_snapshots_price() {
        let f = fixture();
        let event_id = seed_event(&f.store, 250).await;

        let created = f.ledger.create_intent(request(event_id, None)).await.unwrap();
        assert_eq!(created.amount, 250);
        assert!(created.client_secret.is_some());
        assert!(!created.replayed);

        let record = f.store.find_intent(&created.intent_id).await.unwrap().unwrap();
        assert_eq!(record.price_snapshot, 250);
        assert_eq!(record.status, IntentStatus::Created);
        assert_eq!(record.email.as_deref(), Some("fan@example.com"));
        assert_eq!(f.store.ticket_count().await, 0);
    }

    #[tokio::test]
    async fn test_unknown_or_closed_event() {
        let f = fixture();
        let missing = Uuid::new_v4();
        assert!(matches!(
            f.ledger.create_intent(request(missing, None)).await,
            Err(CheckoutError::EventNotFound(id)) if id == missing
        ));

        let event_id = seed_event(&f.store, 250).await;
        let mut event = f.store.remove_event(event_id).await.unwrap();
        event.sales_open = false;
        f.store.put_event(event).await;
        assert!(matches!(
            f.ledger.create_intent(request(event_id, None)).await,
            Err(CheckoutError::EventNotFound(_))
        ));
        assert_eq!(f.gateway.created_count().await, 0);
        assert_eq!(f.store.intent_count().await, 0);
    }

    #[tokio::test]
    async fn test_gateway_failure_persists_nothing() {
        let f = fixture();
        let event_id = seed_event(&f.store, 250).await;
        f.gateway.set_unavailable(true).await;

        let result = f.ledger.create_intent(request(event_id, None)).await;
        assert!(matches!(result, Err(CheckoutError::GatewayUnavailable(_))));
        assert!(result.unwrap_err().is_retryable());
        assert_eq!(f.store.intent_count().await, 0);
    }

    #[tokio::test]
    async fn test_purchaser_required() {
        let f = fixture();
        let event_id = seed_event(&f.store, 250).await;
        let anonymous = NewIntent {
            event_id,
            user_id: None,
            email: Some("   ".to_string()),
            idempotency_key: None,
        };
        assert!(matches!(
            f.ledger.create_intent(anonymous).await,
            Err(CheckoutError::InvalidRequest(_))
        ));

        let bad_email = NewIntent {
            event_id,
            user_id: None,
            email: Some("not-an-email".to_string()),
            idempotency_key: None,
        };
        assert!(matches!(
            f.ledger.create_intent(bad_email).await,
            Err(CheckoutError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_guest_checkout_with_email_only() {
        let f = fixture();
        let event_id = seed_event(&f.store, 250).await;
        let guest = NewIntent {
            event_id,
            user_id: None,
            email: Some("guest@example.com".to_string()),
            idempotency_key: None,
        };
        let created = f.ledger.create_intent(guest).await.unwrap();
        let record = f.store.find_intent(&created.intent_id).await.unwrap().unwrap();
        assert_eq!(record.user_id, None);
    }

    #[tokio::test]
    async fn test_idempotency_key_replays_first_intent() {
        let f = fixture();
        let event_id = seed_event(&f.store, 250).await;

        let first = f
            .ledger
            .create_intent(request(event_id, Some("checkout-0001")))
            .await
            .unwrap();
        let second = f
            .ledger
            .create_intent(request(event_id, Some("checkout-0001")))
            .await
            .unwrap();

        assert_eq!(first.intent_id, second.intent_id);
        assert_eq!(first.client_secret, second.client_secret);
        assert!(second.replayed);
        assert_eq!(f.gateway.created_count().await, 1);
        assert_eq!(f.store.intent_count().await, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_same_key_creates_one_row() {
        let f = fixture();
        let event_id = seed_event(&f.store, 250).await;

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ledger = f.ledger.clone();
                tokio::spawn(async move {
                    ledger
                        .create_intent(request(event_id, Some("checkout-race-1")))
                        .await
                })
            })
            .collect();

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap().unwrap().intent_id);
        }
        ids.dedup();
        assert_eq!(ids.len(), 1);
        assert_eq!(f.store.intent_count().await, 1);
    }

    #[tokio::test]
    async fn test_key_reuse_for_other_event_is_rejected() {
        let f = fixture();
        let first_event = seed_event(&f.store, 250).await;
        let second_event = seed_event(&f.store, 400).await;

        f.ledger
            .create_intent(request(first_event, Some("checkout-0002")))
            .await
            .unwrap();
        assert!(matches!(
            f.ledger
                .create_intent(request(second_event, Some("checkout-0002")))
                .await,
            Err(CheckoutError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_short_idempotency_key_is_rejected() {
        let f = fixture();
        let event_id = seed_event(&f.store, 250).await;
        assert!(matches!(
            f.ledger.create_intent(request(event_id, Some("abc"))).await,
            Err(CheckoutError::InvalidRequest(_))
        ));
    }

    /// Store whose ledger writes always fail after the gateway call succeeded.
    struct RejectingWrites {
        inner: InMemoryStore,
    }

    #[async_trait::async_trait]
    impl TicketingStore for RejectingWrites {
        async fn find_event(&self, event_id: Uuid) -> Result<Option<Event>, StoreError> {
            self.inner.find_event(event_id).await
        }

        async fn count_issued_tickets(&self, event_id: Uuid) -> Result<i64, StoreError> {
            self.inner.count_issued_tickets(event_id).await
        }

        async fn insert_intent(&self, _record: &PaymentIntentRecord) -> Result<(), StoreError> {
            Err(StoreError::CorruptRow("disk full".to_string()))
        }

        async fn find_intent(
            &self,
            intent_id: &str,
        ) -> Result<Option<PaymentIntentRecord>, StoreError> {
            self.inner.find_intent(intent_id).await
        }

        async fn find_intent_by_idempotency_key(
            &self,
            key: &str,
        ) -> Result<Option<PaymentIntentRecord>, StoreError> {
            self.inner.find_intent_by_idempotency_key(key).await
        }

        async fn advance_intent(
            &self,
            intent_id: &str,
            next: IntentStatus,
        ) -> Result<bool, StoreError> {
            self.inner.advance_intent(intent_id, next).await
        }

        async fn insert_ticket(&self, ticket: &crate::models::Ticket) -> Result<(), StoreError> {
            self.inner.insert_ticket(ticket).await
        }

        async fn find_ticket_by_intent(
            &self,
            intent_id: &str,
        ) -> Result<Option<crate::models::Ticket>, StoreError> {
            self.inner.find_ticket_by_intent(intent_id).await
        }

        async fn find_ticket(
            &self,
            ticket_id: Uuid,
        ) -> Result<Option<crate::models::Ticket>, StoreError> {
            self.inner.find_ticket(ticket_id).await
        }

        async fn tickets_for_user(
            &self,
            user_id: Uuid,
        ) -> Result<Vec<crate::models::Ticket>, StoreError> {
            self.inner.tickets_for_user(user_id).await
        }
    }

    #[tokio::test]
    async fn test_failed_ledger_write_cancels_gateway_intent() {
        let inner = InMemoryStore::new();
        let event_id = seed_event(&inner, 250).await;
        let gateway = MockGateway::new();
        let ledger = IntentLedger::new(
            Arc::new(RejectingWrites {
                inner: inner.clone(),
            }),
            Arc::new(gateway.clone()),
        );

        let result = ledger.create_intent(request(event_id, None)).await;

        assert!(matches!(result, Err(CheckoutError::Storage(_))));
        assert_eq!(gateway.created_count().await, 1);
        assert_eq!(gateway.cancelled().await.len(), 1);
        assert_eq!(inner.intent_count().await, 0);
    }

    #[tokio::test]
    async fn test_declined_intent_is_not_replayed() {
        let f = fixture();
        let event_id = seed_event(&f.store, 250).await;
        let first = f
            .ledger
            .create_intent(request(event_id, Some("checkout-declined-1")))
            .await
            .unwrap();
        assert!(f
            .store
            .advance_intent(&first.intent_id, IntentStatus::Failed)
            .await
            .unwrap());

        let replay = f
            .ledger
            .create_intent(request(event_id, Some("checkout-declined-1")))
            .await;
        assert!(matches!(
            replay,
            Err(CheckoutError::PaymentFailed { intent_id, .. }) if intent_id == first.intent_id
        ));

        let fresh = f
            .ledger
            .create_intent(request(event_id, Some("checkout-declined-2")))
            .await
            .unwrap();
        assert_ne!(fresh.intent_id, first.intent_id);
        assert_eq!(f.gateway.created_count().await, 2);
    }
}
