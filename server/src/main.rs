use dotenvy::dotenv;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use boxoffice_server::config::{Config, GatewayMode};
use boxoffice_server::gateway::{HttpGateway, MockGateway, PaymentGateway};
use boxoffice_server::routes::create_routes;
use boxoffice_server::state::AppState;
use boxoffice_server::store::PgStore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("boxoffice_server=info,tower_http=info")),
        )
        .init();

    let config = Config::from_env()?;

    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .connect(&config.database_url)
        .await?;

    tracing::info!("Successfully connected to database");

    sqlx::migrate!().run(&pool).await?;

    tracing::info!("Migrations run successfully");

    let gateway: Arc<dyn PaymentGateway> = match config.gateway_mode {
        GatewayMode::Live => Arc::new(HttpGateway::new(config.gateway_config()?)?),
        GatewayMode::Mock => {
            tracing::warn!("Using the in-process mock payment gateway; no real charges are made");
            Arc::new(MockGateway::new())
        }
    };
    if config.webhook_secret.is_none() {
        tracing::warn!("PAYMENT_WEBHOOK_SECRET not set; webhook deliveries will be rejected");
    }

    let state = AppState::new(
        Arc::new(PgStore::new(pool)),
        gateway,
        config.webhook_settings(),
    );
    let app = create_routes(state);

    let addr = config.bind_addr()?;
    tracing::info!("🚀 Server running at http://{}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
