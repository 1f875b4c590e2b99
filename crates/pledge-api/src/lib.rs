//! # pledge-api: HTTP Surface for the Pledge Ledger
//!
//! A thin Axum layer over [`pledge_service::PaymentIntentService`]. Handlers
//! parse input, call one service operation, and map the domain error
//! taxonomy to HTTP statuses ([`error::AppError`]).
//!
//! ## API Surface
//!
//! | Method | Path                                                   | Operation               |
//! |--------|--------------------------------------------------------|-------------------------|
//! | POST   | `/v1/pledges/payment-intents`                          | Open a payment intent   |
//! | PATCH  | `/v1/pledges/payment-intents/{payment_reference}`      | Change an open intent   |
//! | POST   | `/v1/pledges/payment-intents/{payment_reference}/pledge` | Create the pledge     |
//! | POST   | `/v1/pledges/webhooks/payment-intent-succeeded`        | Processor success event |
//! | GET    | `/v1/pledges/{pledge_id}`                              | Read a pledge           |
//! | POST   | `/v1/pledges/{pledge_id}/transition`                   | Guarded transition      |
//!
//! The caller is identified by the `x-caller-user-id` header forwarded by
//! the upstream gateway; without it the request is anonymous.
//!
//! ## Persistence
//!
//! With `DATABASE_URL` set, pledges are stored in Postgres ([`db`]);
//! otherwise in memory.

pub mod db;
pub mod error;
pub mod extractors;
pub mod routes;
pub mod state;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Assemble the full application router with all routes and middleware.
pub fn app(state: AppState) -> Router {
    let health = Router::new()
        .route("/health/liveness", axum::routing::get(liveness))
        .route("/health/readiness", axum::routing::get(readiness));

    Router::new()
        .merge(health)
        .merge(routes::pledges::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Liveness probe: always returns 200 if the process is running.
async fn liveness() -> &'static str {
    "ok"
}

/// Readiness probe: returns 503 when the configured database is unreachable.
async fn readiness(State(state): State<AppState>) -> impl IntoResponse {
    if let Some(pool) = &state.db_pool {
        if let Err(e) = sqlx::query("SELECT 1").execute(pool).await {
            tracing::warn!("Database health check failed: {e}");
            return (StatusCode::SERVICE_UNAVAILABLE, "database unreachable").into_response();
        }
    }
    (StatusCode::OK, "ready").into_response()
}
