//! # Ledger Record
//!
//! The `Pledge` entity: amounts, attribution, external references, and the
//! lifecycle state with its transition log.
//!
//! ## Invariants
//!
//! - `amount_including_fee() == amount + fee`. The total is derived, never
//!   stored separately.
//! - The state is private. It is set once at construction (`initiated`, or
//!   `created` when the processor already reports the payment as settled)
//!   and afterwards changes only through [`TransitionGuard`](crate::TransitionGuard).
//! - The pledge type is fixed at construction.
//! - `scheduled_payout_at` is owned by downstream payout scheduling; the
//!   ledger only carries it.
//! - Records are never deleted. Terminal records are retained for audit.

use serde::{Deserialize, Serialize};

use pledge_core::{
    Currency, IssueId, OrganizationId, PaymentReference, PledgeId, RepositoryId, Timestamp,
    UserId,
};

use crate::state::PledgeState;

/// Classification of how the pledge is funded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PledgeType {
    /// Paid up front when the pledge is made.
    PayUpfront,
    /// Invoiced once the target issue is completed.
    PayOnCompletion,
    /// Originates from a direct transfer to the maintainer.
    PayDirectly,
}

impl PledgeType {
    /// Return the wire / database name of this type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PayUpfront => "pay_upfront",
            Self::PayOnCompletion => "pay_on_completion",
            Self::PayDirectly => "pay_directly",
        }
    }

    /// Parse a type from its wire / database name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "pay_upfront" => Some(Self::PayUpfront),
            "pay_on_completion" => Some(Self::PayOnCompletion),
            "pay_directly" => Some(Self::PayDirectly),
            _ => None,
        }
    }
}

/// Who the pledge is "by". A pledge is attributed to exactly one user or
/// exactly one organization, never both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Pledger {
    /// Pledged by an individual user.
    User(UserId),
    /// Pledged by an organization.
    Organization(OrganizationId),
}

impl Pledger {
    /// The user id, if the pledge is by a user.
    pub fn user_id(&self) -> Option<UserId> {
        match self {
            Self::User(id) => Some(*id),
            Self::Organization(_) => None,
        }
    }

    /// The organization id, if the pledge is by an organization.
    pub fn organization_id(&self) -> Option<OrganizationId> {
        match self {
            Self::Organization(id) => Some(*id),
            Self::User(_) => None,
        }
    }
}

/// Record of a pledge state transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PledgeTransitionRecord {
    /// State before the transition.
    pub from_state: PledgeState,
    /// State after the transition.
    pub to_state: PledgeState,
    /// When the transition occurred.
    pub timestamp: Timestamp,
}

/// Everything needed to construct a fresh pledge.
#[derive(Debug, Clone)]
pub struct NewPledge {
    /// Pre-generated id, so attribution written before persistence can refer to it.
    pub id: PledgeId,
    pub payment_reference: PaymentReference,
    pub pledge_type: PledgeType,
    pub issue_id: IssueId,
    pub repository_id: RepositoryId,
    pub organization_id: OrganizationId,
    pub pledger: Pledger,
    pub on_behalf_of_organization_id: Option<OrganizationId>,
    pub email: Option<String>,
    pub amount: i64,
    pub fee: i64,
    pub currency: Currency,
    /// Whether the processor already reports the payment as settled.
    pub payment_settled: bool,
}

/// The full persisted shape of a pledge, used by record stores to rehydrate
/// rows. Not a way to change state: stores only ever write back what a
/// guarded transition produced.
#[derive(Debug, Clone)]
pub struct PledgeParts {
    pub id: PledgeId,
    pub payment_reference: PaymentReference,
    pub pledge_type: PledgeType,
    pub state: PledgeState,
    pub issue_id: IssueId,
    pub repository_id: RepositoryId,
    pub organization_id: OrganizationId,
    pub pledger: Pledger,
    pub on_behalf_of_organization_id: Option<OrganizationId>,
    pub email: Option<String>,
    pub amount: i64,
    pub fee: i64,
    pub currency: Currency,
    pub scheduled_payout_at: Option<Timestamp>,
    pub transitions: Vec<PledgeTransitionRecord>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// A funding commitment tracked from initiation to payout or refund.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pledge {
    id: PledgeId,
    payment_reference: PaymentReference,
    pledge_type: PledgeType,
    state: PledgeState,
    issue_id: IssueId,
    repository_id: RepositoryId,
    organization_id: OrganizationId,
    pledger: Pledger,
    on_behalf_of_organization_id: Option<OrganizationId>,
    email: Option<String>,
    amount: i64,
    fee: i64,
    currency: Currency,
    scheduled_payout_at: Option<Timestamp>,
    transitions: Vec<PledgeTransitionRecord>,
    created_at: Timestamp,
    updated_at: Timestamp,
}

impl Pledge {
    /// Construct a new pledge in its initial state.
    ///
    /// The initial state is `created` when the payment is already settled
    /// and `initiated` otherwise.
    pub fn new(new: NewPledge) -> Self {
        let now = Timestamp::now();
        let state = if new.payment_settled {
            PledgeState::Created
        } else {
            PledgeState::Initiated
        };
        Self {
            id: new.id,
            payment_reference: new.payment_reference,
            pledge_type: new.pledge_type,
            state,
            issue_id: new.issue_id,
            repository_id: new.repository_id,
            organization_id: new.organization_id,
            pledger: new.pledger,
            on_behalf_of_organization_id: new.on_behalf_of_organization_id,
            email: new.email,
            amount: new.amount,
            fee: new.fee,
            currency: new.currency,
            scheduled_payout_at: None,
            transitions: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Rehydrate a pledge from its persisted parts.
    pub fn from_parts(parts: PledgeParts) -> Self {
        Self {
            id: parts.id,
            payment_reference: parts.payment_reference,
            pledge_type: parts.pledge_type,
            state: parts.state,
            issue_id: parts.issue_id,
            repository_id: parts.repository_id,
            organization_id: parts.organization_id,
            pledger: parts.pledger,
            on_behalf_of_organization_id: parts.on_behalf_of_organization_id,
            email: parts.email,
            amount: parts.amount,
            fee: parts.fee,
            currency: parts.currency,
            scheduled_payout_at: parts.scheduled_payout_at,
            transitions: parts.transitions,
            created_at: parts.created_at,
            updated_at: parts.updated_at,
        }
    }

    pub fn id(&self) -> PledgeId {
        self.id
    }

    pub fn payment_reference(&self) -> &PaymentReference {
        &self.payment_reference
    }

    pub fn pledge_type(&self) -> PledgeType {
        self.pledge_type
    }

    /// Current lifecycle state.
    pub fn state(&self) -> PledgeState {
        self.state
    }

    pub fn issue_id(&self) -> IssueId {
        self.issue_id
    }

    pub fn repository_id(&self) -> RepositoryId {
        self.repository_id
    }

    /// The organization that owns the target issue.
    pub fn organization_id(&self) -> OrganizationId {
        self.organization_id
    }

    pub fn pledger(&self) -> Pledger {
        self.pledger
    }

    pub fn on_behalf_of_organization_id(&self) -> Option<OrganizationId> {
        self.on_behalf_of_organization_id
    }

    /// Receipt email reported by the processor.
    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    /// Pledged amount in minor units, excluding fee.
    pub fn amount(&self) -> i64 {
        self.amount
    }

    pub fn fee(&self) -> i64 {
        self.fee
    }

    /// Total charged: `amount + fee`.
    pub fn amount_including_fee(&self) -> i64 {
        self.amount + self.fee
    }

    pub fn currency(&self) -> &Currency {
        &self.currency
    }

    /// Payout date assigned by downstream scheduling, if any.
    pub fn scheduled_payout_at(&self) -> Option<Timestamp> {
        self.scheduled_payout_at
    }

    /// Ordered log of every guarded transition applied to this pledge.
    pub fn transitions(&self) -> &[PledgeTransitionRecord] {
        &self.transitions
    }

    pub fn created_at(&self) -> Timestamp {
        self.created_at
    }

    pub fn updated_at(&self) -> Timestamp {
        self.updated_at
    }

    /// Whether the pledge counts toward its issue's funding total.
    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    /// Apply a transition the guard has already validated.
    pub(crate) fn apply_transition(&mut self, to: PledgeState) {
        let now = Timestamp::now();
        self.transitions.push(PledgeTransitionRecord {
            from_state: self.state,
            to_state: to,
            timestamp: now,
        });
        self.state = to;
        self.updated_at = now;
    }
}
