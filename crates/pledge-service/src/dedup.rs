//! # Creation Deduplicator
//!
//! Turns one external payment into at most one pledge, however many times
//! the confirmation arrives (client retries, processor webhook redelivery,
//! concurrent requests).
//!
//! [`CreationDeduplicator::ensure_created`] runs:
//!
//! 1. Look up the pledge by payment reference. Found: return it unchanged
//!    and run no side effects.
//! 2. Absent: call the build function, which fetches the processor's view
//!    and resolves the payer.
//! 3. Insert. The store's uniqueness check on the payment reference is the
//!    commit point. A caller that loses the race gets
//!    `DuplicatePaymentReference`, re-reads the winner's record and returns
//!    it as if it had short-circuited.
//! 4. Only the winner fires the pledge-created hook, and only when the new
//!    pledge starts in `created`. The hook's [`FanOutReport`] comes back in
//!    [`Ensured::Created`].
//!
//! Nothing is written before step 3, so a failure in step 2 leaves nothing
//! behind for a retry to trip over. Payer resolution in step 2 is
//! idempotent per email, so a retry reuses the account it created.

use std::future::Future;
use std::sync::Arc;

use pledge_core::{PaymentReference, PledgeError};
use pledge_state::{Pledge, PledgeState};

use crate::hooks::{FanOutReport, PledgeHook};
use crate::store::{InsertError, PledgeStore};

/// Result of [`CreationDeduplicator::ensure_created`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ensured {
    /// This call persisted the pledge, or moved it into `created`. The
    /// report is present when the call fired the pledge-created hook.
    Created(Pledge, Option<FanOutReport>),
    /// A pledge for the reference already existed and was left as is.
    Existing(Pledge),
}

impl Ensured {
    pub fn pledge(&self) -> &Pledge {
        match self {
            Self::Created(p, _) | Self::Existing(p) => p,
        }
    }

    pub fn into_pledge(self) -> Pledge {
        match self {
            Self::Created(p, _) | Self::Existing(p) => p,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, Self::Created(..))
    }

    /// Outcome of the pledge-created fan-out this call ran, if any.
    pub fn fan_out(&self) -> Option<&FanOutReport> {
        match self {
            Self::Created(_, report) => report.as_ref(),
            Self::Existing(_) => None,
        }
    }
}

/// Guarantees one pledge per payment reference.
#[derive(Clone)]
pub struct CreationDeduplicator {
    store: Arc<dyn PledgeStore>,
    hook: Arc<PledgeHook>,
}

impl std::fmt::Debug for CreationDeduplicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CreationDeduplicator")
            .field("hook", &self.hook)
            .finish_non_exhaustive()
    }
}

impl CreationDeduplicator {
    pub fn new(store: Arc<dyn PledgeStore>, hook: Arc<PledgeHook>) -> Self {
        Self { store, hook }
    }

    /// Return the pledge for `reference`, creating it with `build` if none
    /// exists yet.
    ///
    /// `build` must produce a pledge carrying `reference`. It is not called
    /// when the pledge already exists.
    pub async fn ensure_created<F, Fut>(
        &self,
        reference: &PaymentReference,
        build: F,
    ) -> Result<Ensured, PledgeError>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<Pledge, PledgeError>> + Send,
    {
        if let Some(existing) = self.store.get_by_payment_reference(reference).await? {
            tracing::debug!(
                payment_reference = %reference,
                pledge_id = %existing.id(),
                "pledge already exists for payment reference"
            );
            return Ok(Ensured::Existing(existing));
        }

        let pledge = build().await?;
        if pledge.payment_reference() != reference {
            return Err(PledgeError::Storage(format!(
                "built pledge carries payment reference {}, expected {reference}",
                pledge.payment_reference()
            )));
        }

        match self.store.insert(&pledge).await {
            Ok(()) => {}
            Err(InsertError::DuplicatePaymentReference(_)) => {
                let winner = self
                    .store
                    .get_by_payment_reference(reference)
                    .await?
                    .ok_or_else(|| {
                        PledgeError::Storage(format!(
                            "payment reference {reference} reported duplicate but no pledge found"
                        ))
                    })?;
                tracing::info!(
                    payment_reference = %reference,
                    pledge_id = %winner.id(),
                    "lost pledge creation race, returning existing pledge"
                );
                return Ok(Ensured::Existing(winner));
            }
            Err(e) => return Err(e.into()),
        }

        tracing::info!(
            payment_reference = %reference,
            pledge_id = %pledge.id(),
            state = %pledge.state(),
            amount = pledge.amount(),
            "pledge created"
        );

        let report = if pledge.state() == PledgeState::Created {
            Some(self.hook.fire(&pledge).await)
        } else {
            None
        };

        Ok(Ensured::Created(pledge, report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::tests::Counting;
    use crate::store::InMemoryPledgeStore;
    use pledge_core::{Currency, IssueId, OrganizationId, PledgeId, RepositoryId, UserId};
    use pledge_state::{NewPledge, PledgeType, Pledger};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn build(reference: &str, settled: bool) -> Pledge {
        Pledge::new(NewPledge {
            id: PledgeId::new(),
            payment_reference: PaymentReference::new(reference).unwrap(),
            pledge_type: PledgeType::PayUpfront,
            issue_id: IssueId::new(),
            repository_id: RepositoryId::new(),
            organization_id: OrganizationId::new(),
            pledger: Pledger::User(UserId::new()),
            on_behalf_of_organization_id: None,
            email: None,
            amount: 1000,
            fee: 0,
            currency: Currency::usd(),
            payment_settled: settled,
        })
    }

    fn setup() -> (InMemoryPledgeStore, Arc<Counting>, CreationDeduplicator) {
        let store = InMemoryPledgeStore::new();
        let counter = Arc::new(Counting {
            label: "counter",
            ..Default::default()
        });
        let hook = PledgeHook::new().with(counter.clone());
        let dedup = CreationDeduplicator::new(Arc::new(store.clone()), Arc::new(hook));
        (store, counter, dedup)
    }

    #[tokio::test]
    async fn second_call_short_circuits() {
        let (store, counter, dedup) = setup();
        let reference = PaymentReference::new("pi_once").unwrap();
        let builds = AtomicUsize::new(0);

        let first = dedup
            .ensure_created(&reference, || async {
                builds.fetch_add(1, Ordering::SeqCst);
                Ok(build("pi_once", true))
            })
            .await
            .unwrap();
        let second = dedup
            .ensure_created(&reference, || async {
                builds.fetch_add(1, Ordering::SeqCst);
                Ok(build("pi_once", true))
            })
            .await
            .unwrap();

        assert!(first.is_new());
        assert!(!second.is_new());
        assert_eq!(
            first.fan_out().map(|r| r.delivered.clone()),
            Some(vec!["counter".to_string()])
        );
        assert!(second.fan_out().is_none());
        assert_eq!(first.pledge().id(), second.pledge().id());
        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert_eq!(counter.calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn initiated_creation_does_not_fire_hook() {
        let (_, counter, dedup) = setup();
        let reference = PaymentReference::new("pi_pending").unwrap();
        let ensured = dedup
            .ensure_created(&reference, || async { Ok(build("pi_pending", false)) })
            .await
            .unwrap();
        assert_eq!(ensured.pledge().state(), PledgeState::Initiated);
        assert!(ensured.is_new());
        assert!(ensured.fan_out().is_none());
        assert_eq!(counter.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn subscriber_failure_is_reported_not_raised() {
        let store = InMemoryPledgeStore::new();
        let failing = Arc::new(Counting {
            label: "failing",
            fail: true,
            ..Default::default()
        });
        let after = Arc::new(Counting {
            label: "after",
            ..Default::default()
        });
        let hook = PledgeHook::new().with(failing).with(after.clone());
        let dedup = CreationDeduplicator::new(Arc::new(store.clone()), Arc::new(hook));
        let reference = PaymentReference::new("pi_report").unwrap();

        let ensured = dedup
            .ensure_created(&reference, || async { Ok(build("pi_report", true)) })
            .await
            .unwrap();

        let report = ensured.fan_out().unwrap();
        assert!(!report.is_clean());
        assert_eq!(report.failed, vec![("failing".to_string(), "boom".to_string())]);
        assert_eq!(report.delivered, vec!["after".to_string()]);
        assert_eq!(after.calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn build_failure_persists_nothing() {
        let (store, counter, dedup) = setup();
        let reference = PaymentReference::new("pi_fail").unwrap();
        let err = dedup
            .ensure_created(&reference, || async {
                Err(PledgeError::not_found("payment intent pi_fail"))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, PledgeError::ResourceNotFound(_)));
        assert!(store.is_empty());
        assert_eq!(counter.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn mismatched_reference_is_refused() {
        let (store, _, dedup) = setup();
        let reference = PaymentReference::new("pi_a").unwrap();
        let err = dedup
            .ensure_created(&reference, || async { Ok(build("pi_b", true)) })
            .await
            .unwrap_err();
        assert!(matches!(err, PledgeError::Storage(_)));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn losing_insert_returns_winner() {
        let (store, counter, dedup) = setup();
        let reference = PaymentReference::new("pi_race").unwrap();
        let winner = build("pi_race", true);
        let winner_id = winner.id();

        // The winner commits while this caller is still building.
        let ensured = dedup
            .ensure_created(&reference, || {
                let store = store.clone();
                async move {
                    store.insert(&winner).await.map_err(PledgeError::from)?;
                    Ok(build("pi_race", true))
                }
            })
            .await
            .unwrap();

        assert!(!ensured.is_new());
        assert_eq!(ensured.pledge().id(), winner_id);
        assert_eq!(store.len(), 1);
        assert_eq!(counter.calls.load(Ordering::SeqCst), 0);
    }
}
