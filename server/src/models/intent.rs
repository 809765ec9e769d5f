use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Ledger status of a checkout attempt. Only ever moves forward out of `Created`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    Created,
    Confirmed,
    Failed,
}

impl IntentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentStatus::Created => "created",
            IntentStatus::Confirmed => "confirmed",
            IntentStatus::Failed => "failed",
        }
    }

    /// `Confirmed` and `Failed` are both terminal; neither reverts.
    pub fn can_advance_to(&self, next: IntentStatus) -> bool {
        matches!(
            (self, next),
            (IntentStatus::Created, IntentStatus::Confirmed)
                | (IntentStatus::Created, IntentStatus::Failed)
        )
    }
}

impl fmt::Display for IntentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IntentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(IntentStatus::Created),
            "confirmed" => Ok(IntentStatus::Confirmed),
            "failed" => Ok(IntentStatus::Failed),
            other => Err(format!("unknown intent status '{}'", other)),
        }
    }
}

/// One checkout attempt, keyed by the gateway's intent id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentIntentRecord {
    pub intent_id: String,
    pub event_id: Uuid,
    pub user_id: Option<Uuid>,
    pub email: Option<String>,
    /// Event price at intent creation, smallest currency unit. Never rewritten.
    pub price_snapshot: i64,
    pub currency: String,
    pub status: IntentStatus,
    #[serde(skip_serializing)]
    pub idempotency_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Row shape of `payment_intents`; status is stored as text.
#[derive(Debug, FromRow)]
pub struct PaymentIntentRow {
    pub intent_id: String,
    pub event_id: Uuid,
    pub user_id: Option<Uuid>,
    pub email: Option<String>,
    pub price_snapshot: i64,
    pub currency: String,
    pub status: String,
    pub idempotency_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<PaymentIntentRow> for PaymentIntentRecord {
    type Error = String;

    fn try_from(row: PaymentIntentRow) -> Result<Self, Self::Error> {
        Ok(Self {
            status: row.status.parse()?,
            intent_id: row.intent_id,
            event_id: row.event_id,
            user_id: row.user_id,
            email: row.email,
            price_snapshot: row.price_snapshot,
            currency: row.currency,
            idempotency_key: row.idempotency_key,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}
