//! # pledge-processor: Payment Processor Contract
//!
//! The ledger treats the payment processor as an independent system of
//! record. It needs three operations, each idempotent by the processor's own
//! intent id:
//!
//! - **create** an intent for an amount, currency, and attribution metadata;
//! - **retrieve** an intent's authoritative status, amount, receipt email,
//!   and metadata;
//! - **modify** an intent's amount, receipt email, or sponsor organization.
//!
//! ## Architecture
//!
//! [`PaymentProcessor`] abstracts over the processor backend. The ledger
//! composes it without coupling to a transport or API version. This crate
//! ships [`InMemoryPaymentProcessor`] for development and tests; a
//! production deployment provides its own implementation of the trait.
//!
//! Processor failures are reported as [`ProcessorError`] and converted into
//! the domain taxonomy at the crate boundary, so the processor's own error
//! type never reaches callers of the ledger.

pub mod error;
pub mod memory;
pub mod types;

pub use error::ProcessorError;
pub use memory::InMemoryPaymentProcessor;
pub use types::{
    CreateIntent, IntentHandle, IntentStatus, ModifyIntent, PaymentIntent, PledgeIntentMetadata,
    SetupFutureUsage,
};

use async_trait::async_trait;
use pledge_core::PaymentReference;

/// A payment processor that holds payment intents.
///
/// Implementations must be `Send + Sync` so they can be shared across
/// request tasks behind an `Arc`.
#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    /// Create a payment intent.
    async fn create_intent(&self, params: CreateIntent) -> Result<IntentHandle, ProcessorError>;

    /// Fetch the authoritative state of an intent. `Ok(None)` when the
    /// processor has no record of `id`.
    async fn retrieve_intent(
        &self,
        id: &PaymentReference,
    ) -> Result<Option<PaymentIntent>, ProcessorError>;

    /// Change an existing intent's amount, receipt email, or sponsor.
    async fn modify_intent(
        &self,
        id: &PaymentReference,
        params: ModifyIntent,
    ) -> Result<IntentHandle, ProcessorError>;

    /// Human-readable name of this processor implementation.
    fn processor_name(&self) -> &str;
}
