use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::{Constraint, StoreError, TicketingStore};
use crate::models::intent::PaymentIntentRow;
use crate::models::{Event, IntentStatus, PaymentIntentRecord, Ticket};

const INTENT_COLUMNS: &str = "intent_id, event_id, user_id, email, price_snapshot, currency, \
                              status, idempotency_key, created_at, updated_at";

const TICKET_COLUMNS: &str = "id, ticket_number, intent_id, event_id, user_id, email, price, \
                              currency, purchase_date, is_valid, is_checked_in";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Unique violations on known indexes become `Conflict`; everything else stays a database error.
fn map_write_error(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            if let Some(constraint) = db_err.constraint().and_then(Constraint::from_index_name) {
                return StoreError::Conflict(constraint);
            }
        }
    }
    StoreError::Database(err)
}

async fn lock_intent_status(
    tx: &mut Transaction<'_, Postgres>,
    intent_id: &str,
) -> Result<Option<String>, StoreError> {
    let status = sqlx::query_scalar(
        "SELECT status FROM payment_intents WHERE intent_id = $1 FOR UPDATE",
    )
    .bind(intent_id)
    .fetch_optional(&mut **tx)
    .await?;

    Ok(status)
}

fn into_record(row: PaymentIntentRow) -> Result<PaymentIntentRecord, StoreError> {
    PaymentIntentRecord::try_from(row).map_err(StoreError::CorruptRow)
}

#[async_trait]
impl TicketingStore for PgStore {
    async fn find_event(&self, event_id: Uuid) -> Result<Option<Event>, StoreError> {
        let event = sqlx::query_as::<_, Event>(
            r#"
            SELECT id, title, venue_ref, price_minor, currency, capacity, sales_open,
                   starts_at, created_at, updated_at
            FROM events
            WHERE id = $1
            "#,
        )
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(event)
    }

    async fn count_issued_tickets(&self, event_id: Uuid) -> Result<i64, StoreError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM tickets WHERE event_id = $1 AND is_valid")
                .bind(event_id)
                .fetch_one(&self.pool)
                .await?;

        Ok(count)
    }

    async fn insert_intent(&self, record: &PaymentIntentRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO payment_intents
                (intent_id, event_id, user_id, email, price_snapshot, currency,
                 status, idempotency_key, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(&record.intent_id)
        .bind(record.event_id)
        .bind(record.user_id)
        .bind(&record.email)
        .bind(record.price_snapshot)
        .bind(&record.currency)
        .bind(record.status.as_str())
        .bind(&record.idempotency_key)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await
        .map_err(map_write_error)?;

        Ok(())
    }

    async fn find_intent(
        &self,
        intent_id: &str,
    ) -> Result<Option<PaymentIntentRecord>, StoreError> {
        let query = format!(
            "SELECT {} FROM payment_intents WHERE intent_id = $1",
            INTENT_COLUMNS
        );
        sqlx::query_as::<_, PaymentIntentRow>(&query)
            .bind(intent_id)
            .fetch_optional(&self.pool)
            .await?
            .map(into_record)
            .transpose()
    }

    async fn find_intent_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<PaymentIntentRecord>, StoreError> {
        let query = format!(
            "SELECT {} FROM payment_intents WHERE idempotency_key = $1",
            INTENT_COLUMNS
        );
        sqlx::query_as::<_, PaymentIntentRow>(&query)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?
            .map(into_record)
            .transpose()
    }

    async fn advance_intent(
        &self,
        intent_id: &str,
        next: IntentStatus,
    ) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;

        // The row lock orders this against a concurrent ticket insert.
        let status = lock_intent_status(&mut tx, intent_id).await?;
        if status.as_deref() != Some(IntentStatus::Created.as_str()) {
            return Ok(false);
        }
        if next == IntentStatus::Failed {
            let issued: bool =
                sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM tickets WHERE intent_id = $1)")
                    .bind(intent_id)
                    .fetch_one(&mut *tx)
                    .await?;
            if issued {
                return Ok(false);
            }
        }

        sqlx::query(
            r#"
            UPDATE payment_intents
            SET status = $2, updated_at = NOW()
            WHERE intent_id = $1
            "#,
        )
        .bind(intent_id)
        .bind(next.as_str())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(true)
    }

    async fn insert_ticket(&self, ticket: &Ticket) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        match lock_intent_status(&mut tx, &ticket.intent_id).await?.as_deref() {
            None => return Err(StoreError::UnknownIntent(ticket.intent_id.clone())),
            Some(status) if status == IntentStatus::Failed.as_str() => {
                return Err(StoreError::IntentFailed(ticket.intent_id.clone()))
            }
            Some(_) => {}
        }

        sqlx::query(
            r#"
            INSERT INTO tickets
                (id, ticket_number, intent_id, event_id, user_id, email, price,
                 currency, purchase_date, is_valid, is_checked_in)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(ticket.id)
        .bind(&ticket.ticket_number)
        .bind(&ticket.intent_id)
        .bind(ticket.event_id)
        .bind(ticket.user_id)
        .bind(&ticket.email)
        .bind(ticket.price)
        .bind(&ticket.currency)
        .bind(ticket.purchase_date)
        .bind(ticket.is_valid)
        .bind(ticket.is_checked_in)
        .execute(&mut *tx)
        .await
        .map_err(map_write_error)?;
        tx.commit().await?;

        Ok(())
    }

    async fn find_ticket_by_intent(&self, intent_id: &str) -> Result<Option<Ticket>, StoreError> {
        let query = format!("SELECT {} FROM tickets WHERE intent_id = $1", TICKET_COLUMNS);
        let ticket = sqlx::query_as::<_, Ticket>(&query)
            .bind(intent_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(ticket)
    }

    async fn find_ticket(&self, ticket_id: Uuid) -> Result<Option<Ticket>, StoreError> {
        let query = format!("SELECT {} FROM tickets WHERE id = $1", TICKET_COLUMNS);
        let ticket = sqlx::query_as::<_, Ticket>(&query)
            .bind(ticket_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(ticket)
    }

    async fn tickets_for_user(&self, user_id: Uuid) -> Result<Vec<Ticket>, StoreError> {
        let query = format!(
            "SELECT {} FROM tickets WHERE user_id = $1 ORDER BY purchase_date DESC",
            TICKET_COLUMNS
        );
        let tickets = sqlx::query_as::<_, Ticket>(&query)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(tickets)
    }
}
