use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{Constraint, StoreError, TicketingStore};
use crate::models::{Event, IntentStatus, PaymentIntentRecord, Ticket};

#[derive(Default)]
struct Tables {
    events: HashMap<Uuid, Event>,
    intents: HashMap<String, PaymentIntentRecord>,
    intents_by_key: HashMap<String, String>,
    tickets: HashMap<Uuid, Ticket>,
    tickets_by_intent: HashMap<String, Uuid>,
    ticket_numbers: HashMap<String, Uuid>,
}

/// Process-local store with the same unique indexes as the Postgres schema.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog write; stands in for the admin side of the event catalog.
    pub async fn put_event(&self, event: Event) {
        self.tables.lock().await.events.insert(event.id, event);
    }

    pub async fn set_event_price(&self, event_id: Uuid, price_minor: i64) -> bool {
        match self.tables.lock().await.events.get_mut(&event_id) {
            Some(event) => {
                event.price_minor = price_minor;
                event.updated_at = Utc::now();
                true
            }
            None => false,
        }
    }

    pub async fn remove_event(&self, event_id: Uuid) -> Option<Event> {
        self.tables.lock().await.events.remove(&event_id)
    }

    pub async fn ticket_count(&self) -> usize {
        self.tables.lock().await.tickets.len()
    }

    pub async fn intent_count(&self) -> usize {
        self.tables.lock().await.intents.len()
    }
}

#[async_trait]
impl TicketingStore for InMemoryStore {
    async fn find_event(&self, event_id: Uuid) -> Result<Option<Event>, StoreError> {
        Ok(self.tables.lock().await.events.get(&event_id).cloned())
    }

    async fn count_issued_tickets(&self, event_id: Uuid) -> Result<i64, StoreError> {
        let tables = self.tables.lock().await;
        let count = tables
            .tickets
            .values()
            .filter(|t| t.event_id == event_id && t.is_valid)
            .count();
        Ok(count as i64)
    }

    async fn insert_intent(&self, record: &PaymentIntentRecord) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        if tables.intents.contains_key(&record.intent_id) {
            return Err(StoreError::Conflict(Constraint::IntentId));
        }
        if let Some(key) = &record.idempotency_key {
            if tables.intents_by_key.contains_key(key) {
                return Err(StoreError::Conflict(Constraint::IdempotencyKey));
            }
            tables
                .intents_by_key
                .insert(key.clone(), record.intent_id.clone());
        }
        tables
            .intents
            .insert(record.intent_id.clone(), record.clone());
        Ok(())
    }

    async fn find_intent(
        &self,
        intent_id: &str,
    ) -> Result<Option<PaymentIntentRecord>, StoreError> {
        Ok(self.tables.lock().await.intents.get(intent_id).cloned())
    }

    async fn find_intent_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<PaymentIntentRecord>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .intents_by_key
            .get(key)
            .and_then(|id| tables.intents.get(id))
            .cloned())
    }

    async fn advance_intent(
        &self,
        intent_id: &str,
        next: IntentStatus,
    ) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock().await;
        let issued = tables.tickets_by_intent.contains_key(intent_id);
        match tables.intents.get_mut(intent_id) {
            Some(_) if next == IntentStatus::Failed && issued => Ok(false),
            Some(record) if record.status.can_advance_to(next) => {
                record.status = next;
                record.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn insert_ticket(&self, ticket: &Ticket) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        match tables.intents.get(&ticket.intent_id) {
            None => return Err(StoreError::UnknownIntent(ticket.intent_id.clone())),
            Some(record) if record.status == IntentStatus::Failed => {
                return Err(StoreError::IntentFailed(ticket.intent_id.clone()))
            }
            Some(_) => {}
        }
        if tables.tickets_by_intent.contains_key(&ticket.intent_id) {
            return Err(StoreError::Conflict(Constraint::TicketIntent));
        }
        if tables.ticket_numbers.contains_key(&ticket.ticket_number) {
            return Err(StoreError::Conflict(Constraint::TicketNumber));
        }
        tables
            .tickets_by_intent
            .insert(ticket.intent_id.clone(), ticket.id);
        tables
            .ticket_numbers
            .insert(ticket.ticket_number.clone(), ticket.id);
        tables.tickets.insert(ticket.id, ticket.clone());
        Ok(())
    }

    async fn find_ticket_by_intent(&self, intent_id: &str) -> Result<Option<Ticket>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .tickets_by_intent
            .get(intent_id)
            .and_then(|id| tables.tickets.get(id))
            .cloned())
    }

    async fn find_ticket(&self, ticket_id: Uuid) -> Result<Option<Ticket>, StoreError> {
        Ok(self.tables.lock().await.tickets.get(&ticket_id).cloned())
    }

    async fn tickets_for_user(&self, user_id: Uuid) -> Result<Vec<Ticket>, StoreError> {
        let tables = self.tables.lock().await;
        let mut tickets: Vec<Ticket> = tables
            .tickets
            .values()
            .filter(|t| t.user_id == Some(user_id))
            .cloned()
            .collect();
        tickets.sort_by(|a, b| b.purchase_date.cmp(&a.purchase_date));
        Ok(tickets)
    }
}
