//! Persistence port for the checkout ledger and the ticket store.
//!
//! Uniqueness on `tickets.intent_id`, `tickets.ticket_number` and
//! `payment_intents.idempotency_key` is enforced by every implementation, not
//! by callers. Ticket issuance relies on that constraint as its only
//! synchronization point.

use async_trait::async_trait;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Event, IntentStatus, PaymentIntentRecord, Ticket};

pub mod memory;
pub mod postgres;

pub use memory::InMemoryStore;
pub use postgres::PgStore;

/// Unique constraints a write can collide with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Constraint {
    IntentId,
    IdempotencyKey,
    TicketIntent,
    TicketNumber,
}

impl Constraint {
    /// Index names as declared in the migrations.
    pub fn index_name(&self) -> &'static str {
        match self {
            Constraint::IntentId => "payment_intents_pkey",
            Constraint::IdempotencyKey => "payment_intents_idempotency_key_key",
            Constraint::TicketIntent => "tickets_intent_id_key",
            Constraint::TicketNumber => "tickets_ticket_number_key",
        }
    }

    pub fn from_index_name(name: &str) -> Option<Self> {
        [
            Constraint::IntentId,
            Constraint::IdempotencyKey,
            Constraint::TicketIntent,
            Constraint::TicketNumber,
        ]
        .into_iter()
        .find(|c| c.index_name() == name)
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.index_name())
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unique constraint violated: {0}")]
    Conflict(Constraint),

    #[error("no payment intent {0}")]
    UnknownIntent(String),

    /// The intent was declined; it can no longer receive a ticket.
    #[error("payment intent {0} is failed")]
    IntentFailed(String),

    #[error("corrupt row: {0}")]
    CorruptRow(String),

    #[error("database error")]
    Database(#[from] sqlx::Error),
}

#[async_trait]
pub trait TicketingStore: Send + Sync {
    async fn find_event(&self, event_id: Uuid) -> Result<Option<Event>, StoreError>;

    async fn count_issued_tickets(&self, event_id: Uuid) -> Result<i64, StoreError>;

    /// Fails with `Conflict(IntentId)` or `Conflict(IdempotencyKey)` on duplicates.
    async fn insert_intent(&self, record: &PaymentIntentRecord) -> Result<(), StoreError>;

    async fn find_intent(&self, intent_id: &str)
        -> Result<Option<PaymentIntentRecord>, StoreError>;

    async fn find_intent_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<PaymentIntentRecord>, StoreError>;

    /// Moves `Created` to `next`. Returns `false` when the row was not in
    /// `Created` (already terminal) or does not exist. A move to `Failed` is
    /// also refused once a ticket exists for the intent; that check and the
    /// update are atomic with respect to `insert_ticket`.
    async fn advance_intent(&self, intent_id: &str, next: IntentStatus)
        -> Result<bool, StoreError>;

    /// Fails with `Conflict(TicketIntent)` or `Conflict(TicketNumber)` on
    /// duplicates, `UnknownIntent` when the intent row is missing, and
    /// `IntentFailed` when the intent was already declined.
    async fn insert_ticket(&self, ticket: &Ticket) -> Result<(), StoreError>;

    async fn find_ticket_by_intent(&self, intent_id: &str) -> Result<Option<Ticket>, StoreError>;

    async fn find_ticket(&self, ticket_id: Uuid) -> Result<Option<Ticket>, StoreError>;

    async fn tickets_for_user(&self, user_id: Uuid) -> Result<Vec<Ticket>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constraint_index_names_resolve() {
        for c in [
            Constraint::IntentId,
            Constraint::IdempotencyKey,
            Constraint::TicketIntent,
            Constraint::TicketNumber,
        ] {
            assert_eq!(Constraint::from_index_name(c.index_name()), Some(c));
        }
        assert_eq!(Constraint::from_index_name("events_pkey"), None);
    }
}
