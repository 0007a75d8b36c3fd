use std::sync::Arc;

use axum::{routing::get, Router};
use sqlx::sqlite::SqlitePoolOptions;
use tanktalk::{config::Config, hub::{RoomHub, RoomPolicy}, presence::PresenceRegistry, rooms, store::MessageStore, AppState};
use tower_http::cors::CorsLayer;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tanktalk=debug,info")),
        )
        .init();

    let config = Config::from_env()?;

    let db_pool = SqlitePoolOptions::new()
        .max_connections(16)
        .connect(&config.database_url)
        .await?;
    let store = MessageStore::new(db_pool);
    store.init_schema().await?;

    let app_state = AppState {
        store,
        hub: Arc::new(RoomHub::new(RoomPolicy {
            public_subroom: config.public_subroom.clone(),
            owner_name: config.owner_name.clone(),
        })),
        presence: Arc::new(PresenceRegistry::new()),
        config: Arc::new(config.clone()),
    };

    let app = Router::new()
        .route("/healthz", get(healthz))
        .nest("/r", rooms::router())
        .layer(CorsLayer::permissive())
        .with_state(app_state);

    tracing::info!(addr = %config.bind_addr, "tanktalk listening");
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn healthz() -> &'static str {
    "ok"
}
