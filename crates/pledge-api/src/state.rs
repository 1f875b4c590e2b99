//! # Application State
//!
//! Shared state for the Axum application, passed to all route handlers via
//! the `State` extractor.
//!
//! AppState holds:
//! - **Configuration**: port, database URL, default currency.
//! - **Pledge service**: the orchestration object every route calls.
//! - **Database pool**: present when `DATABASE_URL` is set; pledges are then
//!   stored in Postgres instead of process memory.
//!
//! The processor, identity, and issue collaborators are owned by other
//! systems. This binary wires their in-memory implementations
//! ([`Collaborators`]); deployments embedding the library supply real ones
//! through [`AppState::new`].

use std::sync::Arc;

use sqlx::PgPool;
use thiserror::Error;

use pledge_core::{Currency, ValidationError};
use pledge_processor::{InMemoryPaymentProcessor, PaymentProcessor};
use pledge_service::{
    AttributionJournal, IdentityResolver, InMemoryIdentityResolver, InMemoryIssueResolver,
    InMemoryPledgeStore, IssueResolver, PaymentIntentService, PledgeHook, PledgeStore,
};

/// Application configuration.
#[derive(Clone)]
pub struct AppConfig {
    /// Port to bind the HTTP server to.
    pub port: u16,
    /// Postgres connection URL. `None` keeps pledges in memory.
    pub database_url: Option<String>,
    /// Currency for intents that do not name one.
    pub default_currency: Currency,
}

/// Configuration could not be read from the environment.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("PORT must be a port number, got {0:?}")]
    InvalidPort(String),

    #[error("PLEDGE_DEFAULT_CURRENCY: {0}")]
    InvalidCurrency(#[from] ValidationError),
}

impl AppConfig {
    /// Build configuration from `PORT`, `DATABASE_URL`, and
    /// `PLEDGE_DEFAULT_CURRENCY`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let port = match lookup("PORT") {
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidPort(raw))?,
            None => defaults.port,
        };
        let database_url = lookup("DATABASE_URL").filter(|url| !url.trim().is_empty());
        let default_currency = match lookup("PLEDGE_DEFAULT_CURRENCY") {
            Some(code) => Currency::new(code.trim())?,
            None => defaults.default_currency,
        };
        Ok(Self {
            port,
            database_url,
            default_currency,
        })
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("port", &self.port)
            .field(
                "database_url",
                &self.database_url.as_ref().map(|_| "[REDACTED]"),
            )
            .field("default_currency", &self.default_currency)
            .finish()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            database_url: None,
            default_currency: Currency::usd(),
        }
    }
}

/// In-memory stand-ins for the collaborators this service does not own.
/// Clones share state, so tests keep a handle to drive them.
#[derive(Debug, Clone, Default)]
pub struct Collaborators {
    pub processor: InMemoryPaymentProcessor,
    pub identities: InMemoryIdentityResolver,
    pub issues: InMemoryIssueResolver,
    pub journal: AttributionJournal,
}

impl Collaborators {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Shared application state.
#[derive(Debug, Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub pledges: Arc<PaymentIntentService>,
    pub db_pool: Option<PgPool>,
}

impl AppState {
    /// Wire the service from explicit collaborators.
    pub fn new(
        config: AppConfig,
        processor: Arc<dyn PaymentProcessor>,
        store: Arc<dyn PledgeStore>,
        identities: Arc<dyn IdentityResolver>,
        issues: Arc<dyn IssueResolver>,
        hook: PledgeHook,
        db_pool: Option<PgPool>,
    ) -> Self {
        let pledges = PaymentIntentService::new(processor, store, identities, issues, hook)
            .with_default_currency(config.default_currency.clone());
        Self {
            config,
            pledges: Arc::new(pledges),
            db_pool,
        }
    }

    /// Wire the service from in-memory collaborators, with the attribution
    /// journal as the pledge-created subscriber.
    pub fn with_collaborators(
        config: AppConfig,
        collaborators: &Collaborators,
        store: Arc<dyn PledgeStore>,
        db_pool: Option<PgPool>,
    ) -> Self {
        let hook = PledgeHook::new().with(Arc::new(collaborators.journal.clone()));
        Self::new(
            config,
            Arc::new(collaborators.processor.clone()),
            store,
            Arc::new(collaborators.identities.clone()),
            Arc::new(collaborators.issues.clone()),
            hook,
            db_pool,
        )
    }

    /// Fully in-memory state for development and tests.
    pub fn in_memory(config: AppConfig, collaborators: &Collaborators) -> Self {
        Self::with_collaborators(
            config,
            collaborators,
            Arc::new(InMemoryPledgeStore::new()),
            None,
        )
    }
}
