//! # In-Memory Payment Processor
//!
//! A processor that keeps intents in process memory. It backs development
//! servers and tests.
//!
//! - New intents start in `requires_payment_method`.
//! - [`InMemoryPaymentProcessor::set_status`] plays the role of the payer
//!   and the processor moving an intent forward (e.g. to `succeeded`).
//! - Non-positive amounts are rejected as invalid requests.
//! - Succeeded or canceled intents can no longer be modified.
//! - An optional artificial latency is applied to every call, which lets
//!   tests widen race windows between concurrent callers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use uuid::Uuid;

use pledge_core::PaymentReference;

use crate::error::ProcessorError;
use crate::types::{CreateIntent, IntentHandle, IntentStatus, ModifyIntent, PaymentIntent};
use crate::PaymentProcessor;

/// Thread-safe, cloneable in-memory processor. Clones share intents.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentProcessor {
    intents: Arc<RwLock<HashMap<PaymentReference, PaymentIntent>>>,
    retrievals: Arc<AtomicU64>,
    latency: Option<Duration>,
}

impl InMemoryPaymentProcessor {
    /// Create an empty processor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every call by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Move an intent to `status`.
    pub fn set_status(
        &self,
        id: &PaymentReference,
        status: IntentStatus,
    ) -> Result<(), ProcessorError> {
        let mut intents = self.intents.write();
        let intent = intents
            .get_mut(id)
            .ok_or_else(|| ProcessorError::IntentNotFound {
                reference: id.to_string(),
            })?;
        intent.status = status;
        Ok(())
    }

    /// Seed an intent directly, bypassing creation.
    pub fn insert(&self, intent: PaymentIntent) {
        self.intents.write().insert(intent.id.clone(), intent);
    }

    /// Current view of an intent, without counting as a retrieval.
    pub fn peek(&self, id: &PaymentReference) -> Option<PaymentIntent> {
        self.intents.read().get(id).cloned()
    }

    /// How many times `retrieve_intent` has been called.
    pub fn retrieval_count(&self) -> u64 {
        self.retrievals.load(Ordering::SeqCst)
    }

    async fn delay(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn new_reference() -> Result<PaymentReference, ProcessorError> {
        PaymentReference::new(format!("pi_{}", Uuid::new_v4().simple())).map_err(|e| {
            ProcessorError::Unavailable {
                reason: e.to_string(),
            }
        })
    }
}

fn require_positive(amount: i64) -> Result<(), ProcessorError> {
    if amount <= 0 {
        return Err(ProcessorError::InvalidRequest {
            reason: format!("amount must be positive, got {amount}"),
        });
    }
    Ok(())
}

#[async_trait]
impl PaymentProcessor for InMemoryPaymentProcessor {
    async fn create_intent(&self, params: CreateIntent) -> Result<IntentHandle, ProcessorError> {
        self.delay().await;
        require_positive(params.amount)?;

        let id = Self::new_reference()?;
        let intent = PaymentIntent {
            client_secret: Some(format!("{id}_secret_{}", Uuid::new_v4().simple())),
            id,
            status: IntentStatus::RequiresPaymentMethod,
            amount: params.amount,
            currency: params.currency,
            receipt_email: params.receipt_email,
            setup_future_usage: params.setup_future_usage,
            metadata: params.metadata,
        };
        let handle = intent.handle();
        tracing::debug!(payment_reference = %handle.id, amount = intent.amount, "payment intent created");
        self.intents.write().insert(handle.id.clone(), intent);
        Ok(handle)
    }

    async fn retrieve_intent(
        &self,
        id: &PaymentReference,
    ) -> Result<Option<PaymentIntent>, ProcessorError> {
        self.delay().await;
        self.retrievals.fetch_add(1, Ordering::SeqCst);
        Ok(self.intents.read().get(id).cloned())
    }

    async fn modify_intent(
        &self,
        id: &PaymentReference,
        params: ModifyIntent,
    ) -> Result<IntentHandle, ProcessorError> {
        self.delay().await;
        require_positive(params.amount)?;

        let mut intents = self.intents.write();
        let intent = intents
            .get_mut(id)
            .ok_or_else(|| ProcessorError::IntentNotFound {
                reference: id.to_string(),
            })?;
        if matches!(
            intent.status,
            IntentStatus::Succeeded | IntentStatus::Canceled
        ) {
            return Err(ProcessorError::InvalidRequest {
                reason: format!(
                    "intent {id} can no longer be modified in status {:?}",
                    intent.status
                ),
            });
        }

        intent.amount = params.amount;
        if params.receipt_email.is_some() {
            intent.receipt_email = params.receipt_email;
        }
        if params.setup_future_usage.is_some() {
            intent.setup_future_usage = params.setup_future_usage;
        }
        if params.on_behalf_of_organization_id.is_some() {
            intent.metadata.on_behalf_of_organization_id = params.on_behalf_of_organization_id;
        }
        Ok(intent.handle())
    }

    fn processor_name(&self) -> &str {
        "InMemoryPaymentProcessor"
    }
}
