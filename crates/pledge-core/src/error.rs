//! # Error Types
//!
//! The domain error taxonomy shared by every layer of the pledge ledger.
//! Layer-local errors (transition guard, payment processor, record store)
//! convert into [`PledgeError`] so callers see one vocabulary:
//!
//! - `InvalidStateTransition`: the destination does not admit the current
//!   state. Never retried automatically.
//! - `NotPermitted`: a business precondition does not hold.
//! - `ResourceNotFound`: a referenced external entity is absent.
//! - `UpstreamService`: the payment processor rejected or failed a call.
//!   The processor's own error type never crosses this boundary.

use thiserror::Error;

/// Top-level error type for pledge operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PledgeError {
    /// Requested transition is not in the allowed-source table.
    #[error("invalid pledge state transition: {from} -> {to}")]
    InvalidStateTransition {
        /// Current state name.
        from: String,
        /// Requested destination state name.
        to: String,
    },

    /// A business precondition was violated.
    #[error("not permitted: {0}")]
    NotPermitted(String),

    /// A referenced entity (payment intent, issue, user, pledge) is absent.
    #[error("resource not found: {0}")]
    ResourceNotFound(String),

    /// The payment processor rejected the request or could not be reached.
    #[error("upstream service error: {0}")]
    UpstreamService(String),

    /// The durable record store failed.
    #[error("storage error: {0}")]
    Storage(String),
}

impl PledgeError {
    /// Shorthand for a `ResourceNotFound` naming the missing resource.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::ResourceNotFound(what.into())
    }

    /// Shorthand for a `NotPermitted` with a reason.
    pub fn not_permitted(reason: impl Into<String>) -> Self {
        Self::NotPermitted(reason.into())
    }
}

/// Validation failure for a boundary value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Currency code is not a three-letter ISO 4217 code.
    #[error("invalid currency code: {0:?}")]
    InvalidCurrency(String),

    /// Payment reference is empty or malformed.
    #[error("invalid payment reference: {0:?}")]
    InvalidPaymentReference(String),

    /// Timestamp could not be parsed as RFC 3339.
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),
}
