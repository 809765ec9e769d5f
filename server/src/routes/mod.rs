use axum::http::{header, HeaderValue};
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use crate::config::{create_cors_layer, create_security_headers_layer};
use crate::handlers::checkout::{confirm_intent, create_intent, get_intent};
use crate::handlers::health_check;
use crate::handlers::tickets::{get_ticket, user_tickets};
use crate::handlers::webhooks::payment_webhook;
use crate::state::AppState;

pub fn create_routes(state: AppState) -> Router {
    let api = Router::new()
        .route("/checkout/intents", post(create_intent))
        .route("/checkout/intents/:intent_id", get(get_intent))
        .route("/checkout/intents/:intent_id/confirm", post(confirm_intent))
        .route("/tickets/:ticket_id", get(get_ticket))
        .route("/users/:user_id/tickets", get(user_tickets))
        .route("/webhooks/payments", post(payment_webhook))
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ));

    Router::new()
        .route("/health", get(health_check))
        .nest("/api/v1", api)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(create_security_headers_layer())
        .layer(create_cors_layer())
}
