use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::models::intent::PaymentIntentRecord;

/// An issued ticket. At most one exists per `intent_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Ticket {
    pub id: Uuid,
    pub ticket_number: String,
    pub intent_id: String,
    pub event_id: Uuid,
    pub user_id: Option<Uuid>,
    pub email: Option<String>,
    pub price: i64,
    pub currency: String,
    pub purchase_date: DateTime<Utc>,
    pub is_valid: bool,
    pub is_checked_in: bool,
}

impl Ticket {
    /// Materializes a ticket from a ledger row. Price comes from the snapshot only.
    pub fn issue(record: &PaymentIntentRecord, ticket_number: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            ticket_number,
            intent_id: record.intent_id.clone(),
            event_id: record.event_id,
            user_id: record.user_id,
            email: record.email.clone(),
            price: record.price_snapshot,
            currency: record.currency.clone(),
            purchase_date: Utc::now(),
            is_valid: true,
            is_checked_in: false,
        }
    }
}
