//! # Pledge-Created Hook
//!
//! Fan-out point for the first entry of a pledge into `created`. Subscribers
//! are invoked one after another in registration order. A failing
//! subscriber is logged at `warn` and recorded in the [`FanOutReport`]; it
//! never aborts the creation and never stops later subscribers.
//!
//! The hook has no memory of what it delivered. Exactly-once delivery comes
//! from the callers: the creation deduplicator fires only for the insert
//! that won, and only the single successful `initiated -> created`
//! transition fires afterwards.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Serialize;
use thiserror::Error;

use pledge_core::{IssueId, OrganizationId, PledgeId, Timestamp};
use pledge_state::{Pledge, Pledger};

/// A subscriber could not process the event.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct SubscriberError(pub String);

/// Receives pledge-created events.
#[async_trait]
pub trait PledgeCreatedSubscriber: Send + Sync {
    /// Name used in logs and reports.
    fn name(&self) -> &str;

    async fn on_pledge_created(&self, pledge: &Pledge) -> Result<(), SubscriberError>;
}

/// Outcome of one fan-out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FanOutReport {
    /// Subscribers that accepted the event, in call order.
    pub delivered: Vec<String>,
    /// Subscribers that failed, with the failure message.
    pub failed: Vec<(String, String)>,
}

impl FanOutReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Ordered registry of pledge-created subscribers.
#[derive(Default, Clone)]
pub struct PledgeHook {
    subscribers: Vec<Arc<dyn PledgeCreatedSubscriber>>,
}

impl std::fmt::Debug for PledgeHook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PledgeHook")
            .field(
                "subscribers",
                &self.subscribers.iter().map(|s| s.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl PledgeHook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a subscriber. It runs after every subscriber registered before it.
    pub fn register(&mut self, subscriber: Arc<dyn PledgeCreatedSubscriber>) {
        self.subscribers.push(subscriber);
    }

    /// Builder form of [`register`](Self::register).
    pub fn with(mut self, subscriber: Arc<dyn PledgeCreatedSubscriber>) -> Self {
        self.register(subscriber);
        self
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    /// Notify every subscriber that `pledge` entered `created`.
    pub async fn fire(&self, pledge: &Pledge) -> FanOutReport {
        let mut report = FanOutReport::default();
        for subscriber in &self.subscribers {
            let name = subscriber.name().to_string();
            match subscriber.on_pledge_created(pledge).await {
                Ok(()) => report.delivered.push(name),
                Err(e) => {
                    tracing::warn!(
                        pledge_id = %pledge.id(),
                        subscriber = %name,
                        error = %e,
                        "pledge-created subscriber failed"
                    );
                    report.failed.push((name, e.0));
                }
            }
        }
        tracing::debug!(
            pledge_id = %pledge.id(),
            delivered = report.delivered.len(),
            failed = report.failed.len(),
            "pledge-created fan-out complete"
        );
        report
    }
}

/// One journaled attribution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttributionEntry {
    pub pledge_id: PledgeId,
    pub issue_id: IssueId,
    pub organization_id: OrganizationId,
    pub pledger: Pledger,
    pub on_behalf_of_organization_id: Option<OrganizationId>,
    pub amount: i64,
    /// The pledge is eligible for payout scheduling once its issue closes.
    pub payout_eligible: bool,
    pub recorded_at: Timestamp,
}

/// Built-in subscriber doing post-creation bookkeeping: it records who
/// funded which issue and marks the pledge eligible for payout scheduling.
///
/// Refuses to journal the same pledge twice.
#[derive(Debug, Clone, Default)]
pub struct AttributionJournal {
    entries: Arc<RwLock<HashMap<PledgeId, AttributionEntry>>>,
}

impl AttributionJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: PledgeId) -> Option<AttributionEntry> {
        self.entries.read().get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total journaled amount for an issue.
    pub fn funded_amount(&self, issue: IssueId) -> i64 {
        self.entries
            .read()
            .values()
            .filter(|e| e.issue_id == issue)
            .map(|e| e.amount)
            .sum()
    }
}

#[async_trait]
impl PledgeCreatedSubscriber for AttributionJournal {
    fn name(&self) -> &str {
        "attribution_journal"
    }

    async fn on_pledge_created(&self, pledge: &Pledge) -> Result<(), SubscriberError> {
        let mut entries = self.entries.write();
        if entries.contains_key(&pledge.id()) {
            return Err(SubscriberError(format!(
                "pledge {} already journaled",
                pledge.id()
            )));
        }
        entries.insert(
            pledge.id(),
            AttributionEntry {
                pledge_id: pledge.id(),
                issue_id: pledge.issue_id(),
                organization_id: pledge.organization_id(),
                pledger: pledge.pledger(),
                on_behalf_of_organization_id: pledge.on_behalf_of_organization_id(),
                amount: pledge.amount(),
                payout_eligible: pledge.is_active(),
                recorded_at: Timestamp::now(),
            },
        );
        Ok(())
    }
}
