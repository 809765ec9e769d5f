//! Confirmation-to-ticket state machine.
//!
//! `Created -> Confirmed -> Issued` or `Created -> Failed`. "Issued" is not a
//! status: it is the existence of the ticket row for the intent. Concurrent
//! and repeated confirmations are serialized only by the store's unique index
//! on `tickets.intent_id`; a decline racing a success is ordered by the store
//! on the intent row, so an intent never ends `Failed` with a ticket.

use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::{ticket_number, CheckoutError};
use crate::gateway::{PaymentGateway, ProviderConfirmation};
use crate::models::{IntentStatus, PaymentIntentRecord, Ticket};
use crate::store::{Constraint, StoreError, TicketingStore};

const MAX_NUMBER_ATTEMPTS: usize = 5;

#[derive(Clone)]
pub struct TicketIssuer {
    store: Arc<dyn TicketingStore>,
    gateway: Arc<dyn PaymentGateway>,
}

impl TicketIssuer {
    pub fn new(store: Arc<dyn TicketingStore>, gateway: Arc<dyn PaymentGateway>) -> Self {
        Self { store, gateway }
    }

    /// Applies a provider confirmation to the intent. Repeated success
    /// confirmations all return the same ticket. The event catalog is never
    /// consulted: price and eligibility were fixed when the intent was created.
    pub async fn confirm_and_issue(
        &self,
        intent_id: &str,
        confirmation: ProviderConfirmation,
    ) -> Result<Ticket, CheckoutError> {
        let record = self
            .store
            .find_intent(intent_id)
            .await?
            .ok_or_else(|| CheckoutError::UnknownIntent(intent_id.to_string()))?;

        if let Some(ticket) = self.store.find_ticket_by_intent(intent_id).await? {
            if let ProviderConfirmation::Failed { reason } = &confirmation {
                warn!(intent_id, reason = %reason, "Decline received after issuance; ticket stands");
            } else {
                debug!(intent_id, ticket_number = %ticket.ticket_number, "Replaying issued ticket");
            }
            if record.status == IntentStatus::Created {
                self.mark(intent_id, IntentStatus::Confirmed).await;
            }
            return Ok(ticket);
        }

        match confirmation {
            ProviderConfirmation::Failed { reason } => self.decline(intent_id, reason).await,
            ProviderConfirmation::Succeeded => self.materialize(&record).await,
        }
    }

    /// Records the decline and cancels the provider intent so it can no
    /// longer be captured. A ticket issued concurrently wins over the decline.
    async fn decline(&self, intent_id: &str, reason: String) -> Result<Ticket, CheckoutError> {
        if self
            .store
            .advance_intent(intent_id, IntentStatus::Failed)
            .await?
        {
            info!(intent_id, reason = %reason, "Payment declined; intent failed");
            match self.gateway.cancel_intent(intent_id).await {
                Ok(()) => debug!(intent_id, "Declined gateway intent cancelled"),
                Err(e) => warn!(intent_id, error = %e, "Failed to cancel declined gateway intent"),
            }
        } else if let Some(ticket) = self.store.find_ticket_by_intent(intent_id).await? {
            warn!(intent_id, reason = %reason, "Decline lost to a concurrent issuance; ticket stands");
            return Ok(ticket);
        }

        Err(CheckoutError::PaymentFailed {
            intent_id: intent_id.to_string(),
            reason,
        })
    }

    async fn materialize(&self, record: &PaymentIntentRecord) -> Result<Ticket, CheckoutError> {
        let intent_id = record.intent_id.as_str();

        for attempt in 1..=MAX_NUMBER_ATTEMPTS {
            let ticket = Ticket::issue(record, ticket_number::generate(intent_id));

            match self.store.insert_ticket(&ticket).await {
                Ok(()) => {
                    info!(
                        intent_id,
                        ticket_number = %ticket.ticket_number,
                        price = ticket.price,
                        "Ticket issued"
                    );
                    self.mark(intent_id, IntentStatus::Confirmed).await;
                    return Ok(ticket);
                }
                Err(StoreError::Conflict(Constraint::TicketIntent)) => {
                    // Another confirmation for this intent inserted first.
                    let winner = self.store.find_ticket_by_intent(intent_id).await?;
                    return winner.ok_or_else(|| {
                        StoreError::CorruptRow(format!(
                            "ticket for intent {} conflicted but cannot be read",
                            intent_id
                        ))
                        .into()
                    });
                }
                Err(StoreError::Conflict(Constraint::TicketNumber)) => {
                    warn!(intent_id, attempt, "Ticket number collision; regenerating");
                }
                Err(StoreError::IntentFailed(_)) => {
                    error!(
                        intent_id,
                        price = record.price_snapshot,
                        "Provider reports a capture on a declined intent; refund required"
                    );
                    return Err(CheckoutError::CaptureAfterDecline(intent_id.to_string()));
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(StoreError::Conflict(Constraint::TicketNumber).into())
    }

    /// Best-effort status advance; the ticket row is authoritative either way.
    async fn mark(&self, intent_id: &str, next: IntentStatus) {
        match self.store.advance_intent(intent_id, next).await {
            Ok(true) => debug!(intent_id, status = %next, "Intent status advanced"),
            Ok(false) => debug!(intent_id, status = %next, "Intent status already terminal"),
            Err(e) => warn!(intent_id, error = %e, "Failed to advance intent status"),
        }
    }
}
