//! # Database Persistence Layer
//!
//! Postgres persistence for pledges via SQLx.
//!
//! The database layer is **optional**. When `DATABASE_URL` is set, pledges
//! live in the `pledges` table, whose unique payment-reference constraint
//! backs at-most-once creation across processes. When absent, the API keeps
//! pledges in memory (suitable for development and testing).

pub mod pledges;

use sqlx::postgres::{PgPool, PgPoolOptions};

pub use pledges::PgPledgeStore;

/// Initialize the database connection pool and run migrations.
///
/// Returns `None` if `database_url` is `None` (in-memory-only mode).
/// Returns `Err` if the URL is set but the connection or migration fails.
pub async fn init_pool(database_url: Option<&str>) -> Result<Option<PgPool>, sqlx::Error> {
    let Some(url) = database_url else {
        tracing::warn!(
            "DATABASE_URL not set, keeping pledges in memory. \
             Pledges will not survive restarts."
        );
        return Ok(None);
    };

    let pool = PgPoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .acquire_timeout(std::time::Duration::from_secs(5))
        .connect(url)
        .await?;

    tracing::info!("Connected to PostgreSQL");

    sqlx::migrate!("./migrations").run(&pool).await?;
    tracing::info!("Database migrations applied");

    Ok(Some(pool))
}
