//! # Pledge Record Store
//!
//! [`PledgeStore`] is the durable home of pledges and the only shared
//! mutable resource in the ledger. Implementations must provide two
//! guarantees:
//!
//! - **Unique payment reference.** `insert` fails with
//!   [`InsertError::DuplicatePaymentReference`] when a pledge for the same
//!   reference already exists. The check and the write are one atomic step
//!   (a unique constraint, or a single critical section).
//! - **Serialized transitions.** `transition` reads the record, runs the
//!   [`TransitionGuard`], and writes the result while holding the record's
//!   lock. Two concurrent transitions can never both start from the same
//!   state.
//!
//! [`InMemoryPledgeStore`] keeps records behind one `parking_lot::RwLock`.
//! The lock is never held across an `.await`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use thiserror::Error;

use pledge_core::{PaymentReference, PledgeError, PledgeId};
use pledge_state::{Pledge, PledgeState, TransitionContext, TransitionGuard};

/// Failure to persist a new pledge.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InsertError {
    /// Another pledge already owns this payment reference.
    #[error("a pledge for payment reference {0} already exists")]
    DuplicatePaymentReference(PaymentReference),

    /// The store itself failed.
    #[error("pledge store failure: {0}")]
    Storage(String),
}

impl From<InsertError> for PledgeError {
    fn from(err: InsertError) -> Self {
        PledgeError::Storage(err.to_string())
    }
}

/// Durable storage for pledges.
#[async_trait]
pub trait PledgeStore: Send + Sync {
    async fn get(&self, id: PledgeId) -> Result<Option<Pledge>, PledgeError>;

    async fn get_by_payment_reference(
        &self,
        reference: &PaymentReference,
    ) -> Result<Option<Pledge>, PledgeError>;

    /// Persist a new pledge. Durable once this returns `Ok`.
    async fn insert(&self, pledge: &Pledge) -> Result<(), InsertError>;

    /// Move pledge `id` into `to` under the record's lock.
    ///
    /// Returns `ResourceNotFound` for an unknown id and the guard's error
    /// when the transition is rejected. A rejection leaves the stored record
    /// unchanged.
    async fn transition(
        &self,
        id: PledgeId,
        to: PledgeState,
        ctx: TransitionContext,
    ) -> Result<Pledge, PledgeError>;
}

#[derive(Debug, Default)]
struct Records {
    pledges: HashMap<PledgeId, Pledge>,
    by_reference: HashMap<PaymentReference, PledgeId>,
}

/// Process-local pledge store.
///
/// The record map and the payment-reference index live under one lock, so
/// the uniqueness check and the insert are a single critical section.
/// Clones share the same records.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPledgeStore {
    records: Arc<RwLock<Records>>,
}

impl InMemoryPledgeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All stored pledges, in no particular order.
    pub fn list(&self) -> Vec<Pledge> {
        self.records.read().pledges.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.read().pledges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Atomically read-validate-update a record.
    ///
    /// The closure runs under the write lock. Returns `None` if the record
    /// doesn't exist.
    fn try_update<R, E>(
        &self,
        id: &PledgeId,
        f: impl FnOnce(&mut Pledge) -> Result<R, E>,
    ) -> Option<Result<R, E>> {
        self.records.write().pledges.get_mut(id).map(f)
    }
}

#[async_trait]
impl PledgeStore for InMemoryPledgeStore {
    async fn get(&self, id: PledgeId) -> Result<Option<Pledge>, PledgeError> {
        Ok(self.records.read().pledges.get(&id).cloned())
    }

    async fn get_by_payment_reference(
        &self,
        reference: &PaymentReference,
    ) -> Result<Option<Pledge>, PledgeError> {
        let records = self.records.read();
        Ok(records
            .by_reference
            .get(reference)
            .and_then(|id| records.pledges.get(id))
            .cloned())
    }

    async fn insert(&self, pledge: &Pledge) -> Result<(), InsertError> {
        let mut records = self.records.write();
        if records.by_reference.contains_key(pledge.payment_reference()) {
            return Err(InsertError::DuplicatePaymentReference(
                pledge.payment_reference().clone(),
            ));
        }
        if records.pledges.contains_key(&pledge.id()) {
            return Err(InsertError::Storage(format!(
                "pledge id {} already in use",
                pledge.id()
            )));
        }
        records
            .by_reference
            .insert(pledge.payment_reference().clone(), pledge.id());
        records.pledges.insert(pledge.id(), pledge.clone());
        Ok(())
    }

    async fn transition(
        &self,
        id: PledgeId,
        to: PledgeState,
        ctx: TransitionContext,
    ) -> Result<Pledge, PledgeError> {
        self.try_update(&id, |pledge| {
            TransitionGuard::attempt_transition(pledge, to, &ctx).map(Pledge::clone)
        })
        .ok_or_else(|| PledgeError::not_found(format!("pledge {id}")))?
        .map_err(PledgeError::from)
    }
}
