use axum::extract::{Path, State};
use axum::response::Response;
use uuid::Uuid;

use crate::state::AppState;
use crate::utils::error::AppError;
use crate::utils::response::success;

pub async fn get_ticket(
    State(state): State<AppState>,
    Path(ticket_id): Path<Uuid>,
) -> Result<Response, AppError> {
    let ticket = state
        .store
        .find_ticket(ticket_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Ticket '{}' was not found", ticket_id)))?;

    Ok(success(ticket, "Ticket retrieved"))
}

pub async fn user_tickets(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Response, AppError> {
    let tickets = state.store.tickets_for_user(user_id).await?;

    Ok(success(tickets, "Tickets retrieved"))
}
