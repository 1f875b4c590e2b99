//! # pledge-api: Binary Entry Point
//!
//! Starts the Axum HTTP server for the pledge ledger.
//! Binds to configurable port (default 8080).

use std::sync::Arc;

use pledge_api::db::PgPledgeStore;
use pledge_api::state::{AppConfig, AppState, Collaborators};
use pledge_service::{InMemoryPledgeStore, PledgeStore};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured tracing.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::from_env().map_err(|e| {
        tracing::error!("Invalid configuration: {e}");
        e
    })?;
    tracing::info!(?config, "configuration loaded");

    // Initialize database pool (optional, absent means in-memory only).
    let db_pool = pledge_api::db::init_pool(config.database_url.as_deref())
        .await
        .map_err(|e| {
            tracing::error!("Database initialization failed: {e}");
            e
        })?;

    let store: Arc<dyn PledgeStore> = match &db_pool {
        Some(pool) => Arc::new(PgPledgeStore::new(pool.clone())),
        None => Arc::new(InMemoryPledgeStore::new()),
    };

    tracing::warn!(
        "payment processor, identity, and issue collaborators are in-memory; \
         intents and accounts will not survive restarts"
    );
    let collaborators = Collaborators::new();

    let port = config.port;
    let state = AppState::with_collaborators(config, &collaborators, store, db_pool);
    let app = pledge_api::app(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("pledge API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
