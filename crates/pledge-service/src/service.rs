//! # Payment Intent Service
//!
//! Orchestrates upfront pledges: creating and updating the processor's
//! payment intent, creating the pledge once the payer confirms, reacting to
//! the processor's "payment succeeded" event, and guarded transitions.
//!
//! A pledge enters `created` only once the processor reports its intent as
//! settled, whether the move comes from a success event or a transition by
//! id. Operations that can fire the pledge-created hook return its
//! [`FanOutReport`].
//!
//! The service is an explicit object built from its collaborators. It holds
//! no global state; every shared resource is injected behind an `Arc`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use pledge_core::{
    Currency, IssueId, OrganizationId, PaymentReference, PledgeError, PledgeId, RepositoryId,
    Timestamp, UserId,
};
use pledge_processor::{
    CreateIntent, IntentHandle, ModifyIntent, PaymentProcessor, PledgeIntentMetadata,
    SetupFutureUsage,
};
use pledge_state::{NewPledge, Pledge, PledgeState, PledgeType, Pledger, TransitionContext};

use crate::dedup::{CreationDeduplicator, Ensured};
use crate::fee::{FeePolicy, NoFee};
use crate::hooks::{FanOutReport, PledgeHook};
use crate::resolvers::{IdentityResolver, IssueResolver, SignupAttribution};
use crate::store::PledgeStore;

/// The authenticated caller, as established by the web layer. `None` at a
/// call site means an anonymous caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallerIdentity {
    pub user_id: UserId,
}

/// Request to open a payment intent for a new pledge.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PaymentIntentCreate {
    pub issue_id: IssueId,
    /// Pledged amount in minor units, excluding fee.
    pub amount: i64,
    #[serde(default)]
    pub currency: Option<Currency>,
    /// Receipt email. Required for anonymous callers.
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub on_behalf_of_organization_id: Option<OrganizationId>,
    #[serde(default)]
    pub setup_future_usage: Option<SetupFutureUsage>,
}

/// Request to change an open payment intent.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PaymentIntentUpdate {
    pub amount: i64,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub setup_future_usage: Option<SetupFutureUsage>,
    #[serde(default)]
    pub on_behalf_of_organization_id: Option<OrganizationId>,
}

/// What the caller gets back after creating or updating an intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentIntentMutationResponse {
    pub payment_reference: PaymentReference,
    pub amount: i64,
    pub currency: Currency,
    pub fee: i64,
    pub amount_including_fee: i64,
    pub client_secret: Option<String>,
}

/// A pledge after a guarded transition by id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transitioned {
    pub pledge: Pledge,
    /// Present when the transition entered `created` and fired the hook.
    pub fan_out: Option<FanOutReport>,
}

/// Public read view of a pledge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PledgeRead {
    pub id: PledgeId,
    pub created_at: Timestamp,
    pub issue_id: IssueId,
    pub repository_id: RepositoryId,
    pub organization_id: OrganizationId,
    pub amount: i64,
    pub currency: Currency,
    pub state: PledgeState,
    pub pledge_type: PledgeType,
    pub scheduled_payout_at: Option<Timestamp>,
}

impl From<&Pledge> for PledgeRead {
    fn from(p: &Pledge) -> Self {
        Self {
            id: p.id(),
            created_at: p.created_at(),
            issue_id: p.issue_id(),
            repository_id: p.repository_id(),
            organization_id: p.organization_id(),
            amount: p.amount(),
            currency: p.currency().clone(),
            state: p.state(),
            pledge_type: p.pledge_type(),
            scheduled_payout_at: p.scheduled_payout_at(),
        }
    }
}

/// Upfront pledge orchestration.
#[derive(Clone)]
pub struct PaymentIntentService {
    processor: Arc<dyn PaymentProcessor>,
    store: Arc<dyn PledgeStore>,
    identities: Arc<dyn IdentityResolver>,
    issues: Arc<dyn IssueResolver>,
    fees: Arc<dyn FeePolicy>,
    hook: Arc<PledgeHook>,
    dedup: CreationDeduplicator,
    default_currency: Currency,
}

impl std::fmt::Debug for PaymentIntentService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaymentIntentService")
            .field("processor", &self.processor.processor_name())
            .field("fees", &self.fees)
            .field("hook", &self.hook)
            .field("default_currency", &self.default_currency)
            .finish_non_exhaustive()
    }
}

impl PaymentIntentService {
    /// Build a service with no platform fee and `usd` as default currency.
    pub fn new(
        processor: Arc<dyn PaymentProcessor>,
        store: Arc<dyn PledgeStore>,
        identities: Arc<dyn IdentityResolver>,
        issues: Arc<dyn IssueResolver>,
        hook: PledgeHook,
    ) -> Self {
        let hook = Arc::new(hook);
        Self {
            dedup: CreationDeduplicator::new(store.clone(), hook.clone()),
            processor,
            store,
            identities,
            issues,
            fees: Arc::new(NoFee),
            hook,
            default_currency: Currency::usd(),
        }
    }

    pub fn with_fee_policy(mut self, fees: Arc<dyn FeePolicy>) -> Self {
        self.fees = fees;
        self
    }

    pub fn with_default_currency(mut self, currency: Currency) -> Self {
        self.default_currency = currency;
        self
    }

    /// Open a payment intent for a pledge on `intent.issue_id`.
    ///
    /// The processor is asked to charge `amount + fee`. An authenticated
    /// caller's account email becomes the receipt email; an anonymous caller
    /// must supply one.
    pub async fn create_payment_intent(
        &self,
        caller: Option<CallerIdentity>,
        intent: PaymentIntentCreate,
    ) -> Result<PaymentIntentMutationResponse, PledgeError> {
        require_positive_amount(intent.amount)?;
        let issue = self
            .issues
            .get(intent.issue_id)
            .await?
            .ok_or_else(|| PledgeError::not_found(format!("issue {}", intent.issue_id)))?;

        let mut metadata = PledgeIntentMetadata {
            issue_id: Some(issue.id),
            repository_id: Some(issue.repository_id),
            organization_id: Some(issue.organization_id),
            on_behalf_of_organization_id: intent.on_behalf_of_organization_id,
            ..Default::default()
        };

        let receipt_email = match caller {
            Some(caller) => {
                let user = self.identities.get(caller.user_id).await?.ok_or_else(|| {
                    PledgeError::not_found(format!("user {}", caller.user_id))
                })?;
                metadata.user_id = Some(user.id);
                user.email
            }
            None => {
                let email = non_blank(intent.email).ok_or_else(|| {
                    PledgeError::not_permitted("email is required for anonymous pledges")
                })?;
                metadata.anonymous_email = Some(email.clone());
                email
            }
        };

        let (fee, amount_including_fee) = self.charge(intent.amount)?;
        let handle = self
            .processor
            .create_intent(CreateIntent {
                amount: amount_including_fee,
                currency: intent
                    .currency
                    .unwrap_or_else(|| self.default_currency.clone()),
                receipt_email: Some(receipt_email),
                setup_future_usage: intent.setup_future_usage,
                metadata,
            })
            .await?;

        tracing::info!(
            payment_reference = %handle.id,
            issue_id = %issue.id,
            anonymous = caller.is_none(),
            amount = intent.amount,
            fee,
            "payment intent created"
        );

        Ok(mutation_response(handle, intent.amount, fee, amount_including_fee))
    }

    /// Change the amount (and optionally email, card reuse, or sponsor) of
    /// an open intent. The response carries the requested amount, not the
    /// charged total.
    pub async fn update_payment_intent(
        &self,
        reference: &PaymentReference,
        updates: PaymentIntentUpdate,
    ) -> Result<PaymentIntentMutationResponse, PledgeError> {
        require_positive_amount(updates.amount)?;
        let (fee, amount_including_fee) = self.charge(updates.amount)?;

        let handle = self
            .processor
            .modify_intent(
                reference,
                ModifyIntent {
                    amount: amount_including_fee,
                    receipt_email: non_blank(updates.email),
                    setup_future_usage: updates.setup_future_usage,
                    on_behalf_of_organization_id: updates.on_behalf_of_organization_id,
                },
            )
            .await?;

        tracing::info!(
            payment_reference = %reference,
            amount = updates.amount,
            fee,
            "payment intent updated"
        );

        Ok(mutation_response(
            handle,
            updates.amount,
            fee,
            amount_including_fee,
        ))
    }

    /// Create the pledge for a confirmed intent, or return the existing one.
    pub async fn create_pledge(&self, reference: &PaymentReference) -> Result<Ensured, PledgeError> {
        self.dedup
            .ensure_created(reference, || self.build_pledge(reference))
            .await
    }

    /// React to the processor reporting the intent as paid.
    ///
    /// Creates the pledge if needed. A pledge still in `initiated` moves to
    /// `created`, which fires the pledge-created hook, and comes back as
    /// [`Ensured::Created`]. Redelivered events return
    /// [`Ensured::Existing`] with the pledge unchanged.
    pub async fn handle_payment_succeeded(
        &self,
        reference: &PaymentReference,
    ) -> Result<Ensured, PledgeError> {
        let ensured = self.create_pledge(reference).await?;
        if ensured.pledge().state() != PledgeState::Initiated {
            return Ok(ensured);
        }
        let pledge = ensured.into_pledge();

        match self.promote(&pledge, TransitionContext::default()).await {
            Ok((created, report)) => {
                tracing::info!(
                    pledge_id = %created.id(),
                    payment_reference = %reference,
                    "pledge payment succeeded"
                );
                Ok(Ensured::Created(created, Some(report)))
            }
            // A concurrent delivery of the same event got there first.
            Err(PledgeError::InvalidStateTransition { .. }) => {
                tracing::debug!(
                    pledge_id = %pledge.id(),
                    payment_reference = %reference,
                    "duplicate payment succeeded event"
                );
                Ok(Ensured::Existing(self.get(pledge.id()).await?))
            }
            Err(e) => Err(e),
        }
    }

    /// Move pledge `id` into `to`, checking the target issue for payout
    /// transitions and the processor's settlement for `created`.
    pub async fn transition(
        &self,
        id: PledgeId,
        to: PledgeState,
    ) -> Result<Transitioned, PledgeError> {
        let pledge = self.get(id).await?;
        let issue = self
            .issues
            .get(pledge.issue_id())
            .await?
            .ok_or_else(|| PledgeError::not_found(format!("issue {}", pledge.issue_id())))?;
        let ctx = TransitionContext {
            issue_closed: issue.closed,
        };

        let from = pledge.state();
        let result = if to == PledgeState::Created {
            self.promote(&pledge, ctx)
                .await
                .map(|(pledge, report)| Transitioned {
                    pledge,
                    fan_out: Some(report),
                })
        } else {
            self.store
                .transition(id, to, ctx)
                .await
                .map(|pledge| Transitioned {
                    pledge,
                    fan_out: None,
                })
        };
        let transitioned = result.map_err(|e| {
            tracing::info!(pledge_id = %id, from = %from, to = %to, error = %e, "pledge transition rejected");
            e
        })?;
        tracing::info!(pledge_id = %id, from = %from, to = %to, "pledge transitioned");
        Ok(transitioned)
    }

    /// Move `pledge` from `initiated` into `created` and fire the hook.
    ///
    /// A source the table refuses fails before the processor is asked; an
    /// intent the processor does not report as settled is `NotPermitted`.
    async fn promote(
        &self,
        pledge: &Pledge,
        ctx: TransitionContext,
    ) -> Result<(Pledge, FanOutReport), PledgeError> {
        let from = pledge.state();
        if !from.can_transition_to(PledgeState::Created) {
            return Err(PledgeError::InvalidStateTransition {
                from: from.as_str().to_string(),
                to: PledgeState::Created.as_str().to_string(),
            });
        }

        let reference = pledge.payment_reference();
        let intent = self
            .processor
            .retrieve_intent(reference)
            .await?
            .ok_or_else(|| PledgeError::not_found(format!("payment intent {reference}")))?;
        if !intent.status.is_settled() {
            return Err(PledgeError::not_permitted(format!(
                "payment intent {reference} has not succeeded"
            )));
        }

        let created = self
            .store
            .transition(pledge.id(), PledgeState::Created, ctx)
            .await?;
        let report = self.hook.fire(&created).await;
        Ok((created, report))
    }

    /// Platform fee and charged total for `amount`.
    fn charge(&self, amount: i64) -> Result<(i64, i64), PledgeError> {
        let fee = self
            .fees
            .calculate_fee(amount)
            .map_err(|e| PledgeError::not_permitted(e.to_string()))?;
        let total = amount.checked_add(fee).ok_or_else(|| {
            PledgeError::not_permitted(format!(
                "pledge amount {amount} plus fee {fee} exceeds the largest chargeable total"
            ))
        })?;
        Ok((fee, total))
    }

    pub async fn get(&self, id: PledgeId) -> Result<Pledge, PledgeError> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| PledgeError::not_found(format!("pledge {id}")))
    }

    pub async fn get_by_payment_reference(
        &self,
        reference: &PaymentReference,
    ) -> Result<Pledge, PledgeError> {
        self.store
            .get_by_payment_reference(reference)
            .await?
            .ok_or_else(|| {
                PledgeError::not_found(format!("pledge for payment reference {reference}"))
            })
    }

    /// Build, but do not persist, the pledge for a processor intent.
    async fn build_pledge(&self, reference: &PaymentReference) -> Result<Pledge, PledgeError> {
        let intent = self
            .processor
            .retrieve_intent(reference)
            .await?
            .ok_or_else(|| PledgeError::not_found(format!("payment intent {reference}")))?;

        let issue_id = intent
            .metadata
            .issue_id
            .ok_or_else(|| PledgeError::not_found("issue_id is not set"))?;
        let issue = self
            .issues
            .get(issue_id)
            .await?
            .ok_or_else(|| PledgeError::not_found(format!("issue {issue_id}")))?;

        // Generated up front so signup attribution can point at it.
        let id = PledgeId::new();
        let user_id = match intent.metadata.user_id {
            Some(user_id) => {
                self.identities
                    .get(user_id)
                    .await?
                    .ok_or_else(|| PledgeError::not_found(format!("user {user_id}")))?
                    .id
            }
            None => {
                let email = intent.receipt_email.as_deref().ok_or_else(|| {
                    PledgeError::not_permitted("anonymous pledge has no receipt email")
                })?;
                let (user, _) = self
                    .identities
                    .get_by_email_or_create(email, SignupAttribution::pledge(id))
                    .await?;
                user.id
            }
        };

        Ok(Pledge::new(NewPledge {
            id,
            payment_reference: reference.clone(),
            pledge_type: PledgeType::PayUpfront,
            issue_id: issue.id,
            repository_id: issue.repository_id,
            organization_id: issue.organization_id,
            pledger: Pledger::User(user_id),
            on_behalf_of_organization_id: intent.metadata.on_behalf_of_organization_id,
            email: intent.receipt_email,
            amount: intent.amount,
            fee: 0,
            currency: intent.currency,
            payment_settled: intent.status.is_settled(),
        }))
    }
}

fn require_positive_amount(amount: i64) -> Result<(), PledgeError> {
    if amount <= 0 {
        return Err(PledgeError::not_permitted(format!(
            "pledge amount must be positive, got {amount}"
        )));
    }
    Ok(())
}

fn non_blank(email: Option<String>) -> Option<String> {
    email.filter(|e| !e.trim().is_empty())
}

fn mutation_response(
    handle: IntentHandle,
    amount: i64,
    fee: i64,
    amount_including_fee: i64,
) -> PaymentIntentMutationResponse {
    PaymentIntentMutationResponse {
        payment_reference: handle.id,
        amount,
        currency: handle.currency,
        fee,
        amount_including_fee,
        client_secret: handle.client_secret,
    }
}
