//! End-to-end pledge lifecycle against in-memory collaborators: intent
//! creation, confirmation, processor success events, guarded transitions,
//! and the exactly-once creation guarantees under concurrency.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use pledge_core::{
    Currency, IssueId, OrganizationId, PaymentReference, PledgeError, PledgeId, RepositoryId,
    UserId,
};
use pledge_processor::{InMemoryPaymentProcessor, IntentStatus};
use pledge_service::{
    AttributionJournal, CallerIdentity, CreationDeduplicator, Ensured, InMemoryIdentityResolver,
    InMemoryIssueResolver, InMemoryPledgeStore, Issue, PaymentIntentCreate, PaymentIntentService,
    PaymentIntentUpdate, PledgeCreatedSubscriber, PledgeHook, SignupAttribution, SubscriberError,
};
use pledge_state::{NewPledge, Pledge, PledgeState, PledgeType, Pledger};

#[derive(Default)]
struct CountingSubscriber {
    calls: AtomicUsize,
}

#[async_trait]
impl PledgeCreatedSubscriber for CountingSubscriber {
    fn name(&self) -> &str {
        "counting"
    }

    async fn on_pledge_created(&self, _pledge: &Pledge) -> Result<(), SubscriberError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct FailingSubscriber;

#[async_trait]
impl PledgeCreatedSubscriber for FailingSubscriber {
    fn name(&self) -> &str {
        "failing"
    }

    async fn on_pledge_created(&self, _pledge: &Pledge) -> Result<(), SubscriberError> {
        Err(SubscriberError("downstream unavailable".into()))
    }
}

struct Harness {
    service: PaymentIntentService,
    processor: InMemoryPaymentProcessor,
    store: InMemoryPledgeStore,
    identities: InMemoryIdentityResolver,
    issues: InMemoryIssueResolver,
    notifications: Arc<CountingSubscriber>,
    journal: AttributionJournal,
}

fn harness_with(processor: InMemoryPaymentProcessor) -> Harness {
    let store = InMemoryPledgeStore::new();
    let identities = InMemoryIdentityResolver::new();
    let issues = InMemoryIssueResolver::new();
    let notifications = Arc::new(CountingSubscriber::default());
    let journal = AttributionJournal::new();
    let hook = PledgeHook::new()
        .with(Arc::new(FailingSubscriber))
        .with(notifications.clone())
        .with(Arc::new(journal.clone()));

    let service = PaymentIntentService::new(
        Arc::new(processor.clone()),
        Arc::new(store.clone()),
        Arc::new(identities.clone()),
        Arc::new(issues.clone()),
        hook,
    );
    Harness {
        service,
        processor,
        store,
        identities,
        issues,
        notifications,
        journal,
    }
}

fn harness() -> Harness {
    harness_with(InMemoryPaymentProcessor::new())
}

fn anonymous_intent(issue: &Issue, amount: i64) -> PaymentIntentCreate {
    PaymentIntentCreate {
        issue_id: issue.id,
        amount,
        currency: None,
        email: Some("backer@example.com".into()),
        on_behalf_of_organization_id: None,
        setup_future_usage: None,
    }
}

impl Harness {
    fn notified(&self) -> usize {
        self.notifications.calls.load(Ordering::SeqCst)
    }

    /// Open an intent for `amount` on a fresh open issue.
    async fn open_intent(&self, amount: i64) -> (Issue, PaymentReference) {
        let issue = self.issues.add_open_issue();
        let resp = self
            .service
            .create_payment_intent(None, anonymous_intent(&issue, amount))
            .await
            .unwrap();
        (issue, resp.payment_reference)
    }

    /// Drive a fresh pledge to `pending` on a closed issue.
    async fn pending_pledge(&self) -> (Issue, Pledge) {
        let (issue, reference) = self.open_intent(1000).await;
        self.processor
            .set_status(&reference, IntentStatus::Succeeded)
            .unwrap();
        let pledge = self.service.create_pledge(&reference).await.unwrap().into_pledge();
        self.issues.set_closed(issue.id, true);
        let pledge = self
            .service
            .transition(pledge.id(), PledgeState::Pending)
            .await
            .unwrap()
            .pledge;
        (issue, pledge)
    }
}

// ── Intent creation ─────────────────────────────────────────────────

#[tokio::test]
async fn zero_fee_intent_charges_the_pledged_amount() {
    let h = harness();
    let issue = h.issues.add_open_issue();
    let resp = h
        .service
        .create_payment_intent(None, anonymous_intent(&issue, 1000))
        .await
        .unwrap();

    assert_eq!(resp.amount, 1000);
    assert_eq!(resp.fee, 0);
    assert_eq!(resp.amount_including_fee, 1000);
    assert_eq!(resp.amount_including_fee, resp.amount + resp.fee);
    assert!(resp.client_secret.is_some());

    let intent = h.processor.peek(&resp.payment_reference).unwrap();
    assert_eq!(intent.amount, 1000);
    assert_eq!(intent.metadata.issue_id, Some(issue.id));
    assert_eq!(intent.metadata.repository_id, Some(issue.repository_id));
    assert_eq!(intent.metadata.organization_id, Some(issue.organization_id));
    assert_eq!(
        intent.metadata.anonymous_email.as_deref(),
        Some("backer@example.com")
    );
    assert!(intent.metadata.user_id.is_none());
}

#[tokio::test]
async fn anonymous_intent_requires_email() {
    let h = harness();
    let issue = h.issues.add_open_issue();
    let mut req = anonymous_intent(&issue, 1000);
    req.email = None;

    let err = h.service.create_payment_intent(None, req).await.unwrap_err();
    assert!(matches!(err, PledgeError::NotPermitted(_)));
}

#[tokio::test]
async fn authenticated_intent_uses_account_email() {
    let h = harness();
    let user = h.identities.add_user("member@example.com");
    let issue = h.issues.add_open_issue();
    let mut req = anonymous_intent(&issue, 2000);
    req.email = None;

    let resp = h
        .service
        .create_payment_intent(Some(CallerIdentity { user_id: user.id }), req)
        .await
        .unwrap();
    let intent = h.processor.peek(&resp.payment_reference).unwrap();
    assert_eq!(intent.metadata.user_id, Some(user.id));
    assert!(intent.metadata.anonymous_email.is_none());
    assert_eq!(intent.receipt_email.as_deref(), Some("member@example.com"));
}

#[tokio::test]
async fn unknown_caller_or_issue_is_not_found() {
    let h = harness();
    let issue = h.issues.add_open_issue();
    let err = h
        .service
        .create_payment_intent(
            Some(CallerIdentity {
                user_id: UserId::new(),
            }),
            anonymous_intent(&issue, 1000),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, PledgeError::ResourceNotFound(_)));

    let mut missing = anonymous_intent(&issue, 1000);
    missing.issue_id = pledge_core::IssueId::new();
    let err = h
        .service
        .create_payment_intent(None, missing)
        .await
        .unwrap_err();
    assert!(matches!(err, PledgeError::ResourceNotFound(_)));
}

#[tokio::test]
async fn update_returns_requested_amount() {
    let h = harness();
    let (_, reference) = h.open_intent(1000).await;
    let resp = h
        .service
        .update_payment_intent(
            &reference,
            PaymentIntentUpdate {
                amount: 3000,
                email: Some("new@example.com".into()),
                setup_future_usage: None,
                on_behalf_of_organization_id: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(resp.payment_reference, reference);
    assert_eq!(resp.amount, 3000);
    assert_eq!(resp.amount_including_fee, 3000);

    let intent = h.processor.peek(&reference).unwrap();
    assert_eq!(intent.amount, 3000);
    assert_eq!(intent.receipt_email.as_deref(), Some("new@example.com"));
}

#[tokio::test]
async fn processor_rejection_is_upstream_error() {
    let h = harness();
    let (_, reference) = h.open_intent(1000).await;
    h.processor
        .set_status(&reference, IntentStatus::Succeeded)
        .unwrap();
    let err = h
        .service
        .update_payment_intent(
            &reference,
            PaymentIntentUpdate {
                amount: 500,
                email: None,
                setup_future_usage: None,
                on_behalf_of_organization_id: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, PledgeError::UpstreamService(_)));
}

// ── Record creation ─────────────────────────────────────────────────

#[tokio::test]
async fn succeeded_payment_creates_pledge_in_created() {
    let h = harness();
    let (issue, reference) = h.open_intent(1000).await;
    h.processor
        .set_status(&reference, IntentStatus::Succeeded)
        .unwrap();

    let pledge = h.service.create_pledge(&reference).await.unwrap().into_pledge();
    assert_eq!(pledge.state(), PledgeState::Created);
    assert_eq!(pledge.issue_id(), issue.id);
    assert_eq!(pledge.organization_id(), issue.organization_id);
    assert_eq!(pledge.amount(), 1000);
    assert_eq!(pledge.fee(), 0);
    assert_eq!(h.notified(), 1);
    assert!(h.journal.get(pledge.id()).is_some());
}

#[tokio::test]
async fn requires_action_creates_initiated_without_notification() {
    let h = harness();
    let (_, reference) = h.open_intent(1000).await;
    h.processor
        .set_status(&reference, IntentStatus::RequiresAction)
        .unwrap();

    let pledge = h.service.create_pledge(&reference).await.unwrap().into_pledge();
    assert_eq!(pledge.state(), PledgeState::Initiated);
    assert_eq!(h.notified(), 0);
    assert!(h.journal.is_empty());
}

#[tokio::test]
async fn repeated_confirmation_is_idempotent() {
    let h = harness();
    let (_, reference) = h.open_intent(1000).await;
    h.processor
        .set_status(&reference, IntentStatus::Succeeded)
        .unwrap();

    let first = h.service.create_pledge(&reference).await.unwrap().into_pledge();
    let second = h.service.create_pledge(&reference).await.unwrap().into_pledge();
    assert_eq!(first.id(), second.id());
    assert_eq!(h.store.len(), 1);
    assert_eq!(h.notified(), 1);
}

#[tokio::test]
async fn anonymous_payer_gets_an_attributed_account() {
    let h = harness();
    let (_, reference) = h.open_intent(1000).await;
    let pledge = h.service.create_pledge(&reference).await.unwrap().into_pledge();

    let Pledger::User(user_id) = pledge.pledger() else {
        panic!("anonymous pledge must be attributed to a user");
    };
    assert_eq!(
        h.identities.signup_attribution(user_id),
        Some(SignupAttribution::pledge(pledge.id()))
    );
    assert_eq!(pledge.email(), Some("backer@example.com"));
}

#[tokio::test]
async fn unknown_intent_is_not_found() {
    let h = harness();
    let reference = PaymentReference::new("pi_missing").unwrap();
    let err = h.service.create_pledge(&reference).await.unwrap_err();
    assert!(matches!(err, PledgeError::ResourceNotFound(_)));
    assert!(h.store.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_confirmations_create_one_pledge() {
    // Processor latency keeps every caller between lookup and insert at once.
    let h = Arc::new(harness_with(
        InMemoryPaymentProcessor::new().with_latency(Duration::from_millis(20)),
    ));
    let (_, reference) = h.open_intent(1000).await;
    h.processor
        .set_status(&reference, IntentStatus::Succeeded)
        .unwrap();

    let mut handles = Vec::new();
    for _ in 0..16 {
        let h = h.clone();
        let reference = reference.clone();
        handles.push(tokio::spawn(async move {
            h.service.create_pledge(&reference).await
        }));
    }

    let mut ids = Vec::new();
    for handle in handles {
        ids.push(handle.await.unwrap().unwrap().pledge().id());
    }
    ids.dedup();
    assert_eq!(ids.len(), 1);
    assert_eq!(h.store.len(), 1);
    assert_eq!(h.notified(), 1);
    // Every racing caller resolved the same anonymous account.
    assert_eq!(h.identities.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_ensure_created_has_one_winner() {
    const CALLERS: usize = 16;
    let store = InMemoryPledgeStore::new();
    let notifications = Arc::new(CountingSubscriber::default());
    let dedup = CreationDeduplicator::new(
        Arc::new(store.clone()),
        Arc::new(PledgeHook::new().with(notifications.clone())),
    );
    let reference = PaymentReference::new("pi_contended").unwrap();
    let (issue_id, repository_id, organization_id) =
        (IssueId::new(), RepositoryId::new(), OrganizationId::new());

    let mut handles = Vec::new();
    for _ in 0..CALLERS {
        let dedup = dedup.clone();
        let reference = reference.clone();
        handles.push(tokio::spawn(async move {
            dedup
                .ensure_created(&reference, || async {
                    // Every caller passes the lookup before anyone inserts.
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Ok(Pledge::new(NewPledge {
                        id: PledgeId::new(),
                        payment_reference: reference.clone(),
                        pledge_type: PledgeType::PayUpfront,
                        issue_id,
                        repository_id,
                        organization_id,
                        pledger: Pledger::User(UserId::new()),
                        on_behalf_of_organization_id: None,
                        email: None,
                        amount: 1000,
                        fee: 0,
                        currency: Currency::usd(),
                        payment_settled: true,
                    }))
                })
                .await
        }));
    }

    let mut created = Vec::new();
    let mut existing = Vec::new();
    for handle in handles {
        match handle.await.unwrap().unwrap() {
            Ensured::Created(pledge, report) => {
                assert!(report.unwrap().is_clean());
                created.push(pledge.id());
            }
            Ensured::Existing(pledge) => existing.push(pledge.id()),
        }
    }
    assert_eq!(created.len(), 1);
    assert_eq!(existing.len(), CALLERS - 1);
    assert!(existing.iter().all(|id| *id == created[0]));
    assert_eq!(store.len(), 1);
    assert_eq!(notifications.calls.load(Ordering::SeqCst), 1);
}

// ── Processor success events ────────────────────────────────────────

#[tokio::test]
async fn success_event_promotes_initiated_pledge_once() {
    let h = harness();
    let (_, reference) = h.open_intent(1000).await;
    let initiated = h.service.create_pledge(&reference).await.unwrap().into_pledge();
    assert_eq!(initiated.state(), PledgeState::Initiated);

    h.processor
        .set_status(&reference, IntentStatus::Succeeded)
        .unwrap();
    let promoted = h.service.handle_payment_succeeded(&reference).await.unwrap();
    assert!(promoted.is_new());
    let report = promoted.fan_out().unwrap();
    assert_eq!(report.delivered, vec!["counting", "attribution_journal"]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "failing");
    let created = promoted.into_pledge();
    assert_eq!(created.id(), initiated.id());
    assert_eq!(created.state(), PledgeState::Created);
    assert_eq!(h.notified(), 1);

    let again = h.service.handle_payment_succeeded(&reference).await.unwrap();
    assert!(!again.is_new());
    assert!(again.fan_out().is_none());
    let again = again.into_pledge();
    assert_eq!(again.state(), PledgeState::Created);
    assert_eq!(again.transitions().len(), 1);
    assert_eq!(h.notified(), 1);
}

#[tokio::test]
async fn success_event_without_settlement_is_refused() {
    let h = harness();
    let (_, reference) = h.open_intent(1000).await;
    let err = h
        .service
        .handle_payment_succeeded(&reference)
        .await
        .unwrap_err();
    assert!(matches!(err, PledgeError::NotPermitted(_)));
    let stored = h.service.get_by_payment_reference(&reference).await.unwrap();
    assert_eq!(stored.state(), PledgeState::Initiated);
    assert_eq!(h.notified(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_success_events_notify_once() {
    let h = Arc::new(harness());
    let (_, reference) = h.open_intent(1000).await;
    h.service.create_pledge(&reference).await.unwrap();
    h.processor
        .set_status(&reference, IntentStatus::Succeeded)
        .unwrap();

    let mut handles = Vec::new();
    for _ in 0..12 {
        let h = h.clone();
        let reference = reference.clone();
        handles.push(tokio::spawn(async move {
            h.service.handle_payment_succeeded(&reference).await
        }));
    }
    for handle in handles {
        let pledge = handle.await.unwrap().unwrap().into_pledge();
        assert_eq!(pledge.state(), PledgeState::Created);
    }
    assert_eq!(h.notified(), 1);
}

// ── Guarded transitions ─────────────────────────────────────────────

#[tokio::test]
async fn payout_on_open_issue_is_not_permitted() {
    let h = harness();
    let (issue, pending) = h.pending_pledge().await;
    h.issues.set_closed(issue.id, false);

    let err = h
        .service
        .transition(pending.id(), PledgeState::Paid)
        .await
        .unwrap_err();
    assert!(matches!(err, PledgeError::NotPermitted(_)));
    let stored = h.service.get(pending.id()).await.unwrap();
    assert_eq!(stored.state(), PledgeState::Pending);
}

#[tokio::test]
async fn paid_pledge_cannot_be_refunded() {
    let h = harness();
    let (_, pending) = h.pending_pledge().await;
    let paid = h
        .service
        .transition(pending.id(), PledgeState::Paid)
        .await
        .unwrap()
            .pledge;
    assert_eq!(paid.state(), PledgeState::Paid);

    let err = h
        .service
        .transition(paid.id(), PledgeState::Refunded)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        PledgeError::InvalidStateTransition { ref from, ref to } if from == "paid" && to == "refunded"
    ));
}

#[tokio::test]
async fn dispute_then_refund() {
    let h = harness();
    let (_, pending) = h.pending_pledge().await;
    let disputed = h
        .service
        .transition(pending.id(), PledgeState::Disputed)
        .await
        .unwrap()
            .pledge;
    assert!(disputed.is_active());
    let refunded = h
        .service
        .transition(pending.id(), PledgeState::Refunded)
        .await
        .unwrap()
            .pledge;
    assert_eq!(refunded.state(), PledgeState::Refunded);
    assert!(!refunded.is_active());
    assert_eq!(refunded.transitions().len(), 3);
}

#[tokio::test]
async fn transition_by_id_into_created_fires_hook_once_settled() {
    let h = harness();
    let (_, reference) = h.open_intent(1000).await;
    let pledge = h.service.create_pledge(&reference).await.unwrap().into_pledge();
    assert_eq!(h.notified(), 0);
    h.processor
        .set_status(&reference, IntentStatus::Succeeded)
        .unwrap();

    let transitioned = h
        .service
        .transition(pledge.id(), PledgeState::Created)
        .await
        .unwrap();
    assert_eq!(transitioned.pledge.state(), PledgeState::Created);
    let report = transitioned.fan_out.unwrap();
    assert!(report.delivered.contains(&"attribution_journal".to_string()));
    assert_eq!(h.notified(), 1);
    assert!(h.journal.get(pledge.id()).unwrap().payout_eligible);

    let err = h
        .service
        .transition(pledge.id(), PledgeState::Created)
        .await
        .unwrap_err();
    assert!(matches!(err, PledgeError::InvalidStateTransition { .. }));
    assert_eq!(h.notified(), 1);
}

#[tokio::test]
async fn transition_by_id_into_created_requires_settlement() {
    let h = harness();
    let (_, reference) = h.open_intent(1000).await;
    let pledge = h.service.create_pledge(&reference).await.unwrap().into_pledge();
    assert_eq!(
        h.processor.peek(&reference).unwrap().status,
        IntentStatus::RequiresPaymentMethod
    );

    let err = h
        .service
        .transition(pledge.id(), PledgeState::Created)
        .await
        .unwrap_err();
    assert!(matches!(err, PledgeError::NotPermitted(_)));
    let stored = h.service.get(pledge.id()).await.unwrap();
    assert_eq!(stored.state(), PledgeState::Initiated);
    assert!(stored.transitions().is_empty());
    assert_eq!(h.notified(), 0);
    assert!(h.journal.is_empty());
}

#[tokio::test]
async fn transition_into_created_from_later_state_never_asks_processor() {
    let h = harness();
    let (_, pending) = h.pending_pledge().await;
    let before = h.processor.retrieval_count();

    let err = h
        .service
        .transition(pending.id(), PledgeState::Created)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        PledgeError::InvalidStateTransition { ref from, ref to } if from == "pending" && to == "created"
    ));
    assert_eq!(h.processor.retrieval_count(), before);
}

#[tokio::test]
async fn transition_of_unknown_pledge_is_not_found() {
    let h = harness();
    let err = h
        .service
        .transition(pledge_core::PledgeId::new(), PledgeState::Created)
        .await
        .unwrap_err();
    assert!(matches!(err, PledgeError::ResourceNotFound(_)));
}
