//! Pledge persistence operations.
//!
//! [`PgPledgeStore`] implements [`PledgeStore`] on the `pledges` table.
//!
//! - Inserts rely on the `pledges_payment_reference_key` unique constraint.
//!   A violation surfaces as [`InsertError::DuplicatePaymentReference`] so
//!   the creation deduplicator can fall back to the winner's row.
//! - Transitions lock the row with `SELECT ... FOR UPDATE`, run the
//!   transition guard, write, and commit in one transaction. A rejected
//!   transition drops the transaction, which rolls back.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use pledge_core::{
    Currency, IssueId, OrganizationId, PaymentReference, PledgeError, PledgeId, RepositoryId,
    Timestamp, UserId,
};
use pledge_service::{InsertError, PledgeStore};
use pledge_state::{
    Pledge, PledgeParts, PledgeState, PledgeTransitionRecord, PledgeType, Pledger,
    TransitionContext, TransitionGuard,
};

const PAYMENT_REFERENCE_CONSTRAINT: &str = "pledges_payment_reference_key";
const UNIQUE_VIOLATION: &str = "23505";

const SELECT_COLUMNS: &str = "SELECT id, payment_reference, pledge_type, state, issue_id, \
     repository_id, organization_id, by_user_id, by_organization_id, \
     on_behalf_of_organization_id, email, amount, fee, currency, scheduled_payout_at, \
     transition_log, created_at, updated_at FROM pledges";

/// Postgres-backed pledge store.
#[derive(Debug, Clone)]
pub struct PgPledgeStore {
    pool: PgPool,
}

impl PgPledgeStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn storage(e: sqlx::Error) -> PledgeError {
    tracing::error!(error = %e, "pledge store query failed");
    PledgeError::Storage(e.to_string())
}

/// Serialize a transition log for the `transition_log` column.
fn serialize_transition_log(
    log: &[PledgeTransitionRecord],
) -> Result<serde_json::Value, PledgeError> {
    serde_json::to_value(log).map_err(|e| {
        tracing::error!(error = %e, "failed to serialize pledge transition_log");
        PledgeError::Storage(format!("transition log encoding: {e}"))
    })
}

fn is_duplicate_reference(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db) => {
            db.code().as_deref() == Some(UNIQUE_VIOLATION)
                && db.constraint() == Some(PAYMENT_REFERENCE_CONSTRAINT)
        }
        _ => false,
    }
}

#[async_trait]
impl PledgeStore for PgPledgeStore {
    async fn get(&self, id: PledgeId) -> Result<Option<Pledge>, PledgeError> {
        let row = sqlx::query_as::<_, PledgeRow>(&format!("{SELECT_COLUMNS} WHERE id = $1"))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;
        row.map(PledgeRow::into_pledge).transpose()
    }

    async fn get_by_payment_reference(
        &self,
        reference: &PaymentReference,
    ) -> Result<Option<Pledge>, PledgeError> {
        let row = sqlx::query_as::<_, PledgeRow>(&format!(
            "{SELECT_COLUMNS} WHERE payment_reference = $1"
        ))
        .bind(reference.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)?;
        row.map(PledgeRow::into_pledge).transpose()
    }

    async fn insert(&self, pledge: &Pledge) -> Result<(), InsertError> {
        let transition_log = serialize_transition_log(pledge.transitions())
            .map_err(|e| InsertError::Storage(e.to_string()))?;
        let pledger = pledge.pledger();

        let result = sqlx::query(
            "INSERT INTO pledges (id, payment_reference, pledge_type, state, issue_id, \
             repository_id, organization_id, by_user_id, by_organization_id, \
             on_behalf_of_organization_id, email, amount, fee, currency, scheduled_payout_at, \
             transition_log, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)",
        )
        .bind(pledge.id().0)
        .bind(pledge.payment_reference().as_str())
        .bind(pledge.pledge_type().as_str())
        .bind(pledge.state().as_str())
        .bind(pledge.issue_id().0)
        .bind(pledge.repository_id().0)
        .bind(pledge.organization_id().0)
        .bind(pledger.user_id().map(|u| u.0))
        .bind(pledger.organization_id().map(|o| o.0))
        .bind(pledge.on_behalf_of_organization_id().map(|o| o.0))
        .bind(pledge.email())
        .bind(pledge.amount())
        .bind(pledge.fee())
        .bind(pledge.currency().as_str())
        .bind(pledge.scheduled_payout_at().map(DateTime::<Utc>::from))
        .bind(&transition_log)
        .bind(DateTime::<Utc>::from(pledge.created_at()))
        .bind(DateTime::<Utc>::from(pledge.updated_at()))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_duplicate_reference(&e) => Err(InsertError::DuplicatePaymentReference(
                pledge.payment_reference().clone(),
            )),
            Err(e) => {
                tracing::error!(pledge_id = %pledge.id(), error = %e, "pledge insert failed");
                Err(InsertError::Storage(e.to_string()))
            }
        }
    }

    async fn transition(
        &self,
        id: PledgeId,
        to: PledgeState,
        ctx: TransitionContext,
    ) -> Result<Pledge, PledgeError> {
        let mut tx = self.pool.begin().await.map_err(storage)?;

        let row = sqlx::query_as::<_, PledgeRow>(&format!(
            "{SELECT_COLUMNS} WHERE id = $1 FOR UPDATE"
        ))
        .bind(id.0)
        .fetch_optional(&mut *tx)
        .await
        .map_err(storage)?;
        let mut pledge = row
            .ok_or_else(|| PledgeError::not_found(format!("pledge {id}")))?
            .into_pledge()?;

        TransitionGuard::attempt_transition(&mut pledge, to, &ctx).map_err(PledgeError::from)?;

        let transition_log = serialize_transition_log(pledge.transitions())?;
        sqlx::query(
            "UPDATE pledges SET state = $1, transition_log = $2, updated_at = $3 WHERE id = $4",
        )
        .bind(pledge.state().as_str())
        .bind(&transition_log)
        .bind(DateTime::<Utc>::from(pledge.updated_at()))
        .bind(id.0)
        .execute(&mut *tx)
        .await
        .map_err(storage)?;

        tx.commit().await.map_err(storage)?;
        Ok(pledge)
    }
}

/// Internal row type for SQLx mapping.
#[derive(sqlx::FromRow)]
struct PledgeRow {
    id: Uuid,
    payment_reference: String,
    pledge_type: String,
    state: String,
    issue_id: Uuid,
    repository_id: Uuid,
    organization_id: Uuid,
    by_user_id: Option<Uuid>,
    by_organization_id: Option<Uuid>,
    on_behalf_of_organization_id: Option<Uuid>,
    email: Option<String>,
    amount: i64,
    fee: i64,
    currency: String,
    scheduled_payout_at: Option<DateTime<Utc>>,
    transition_log: serde_json::Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl PledgeRow {
    /// Rehydrate a pledge. Unlike lenient read paths, a row that does not
    /// decode is an error: silently defaulting a monetary record's state
    /// could re-enable transitions out of a terminal state.
    fn into_pledge(self) -> Result<Pledge, PledgeError> {
        let corrupt = |what: &str| {
            tracing::error!(pledge_id = %self.id, field = what, "undecodable pledge row");
            PledgeError::Storage(format!("pledge {} has an invalid {what}", self.id))
        };

        let state = PledgeState::from_name(&self.state).ok_or_else(|| corrupt("state"))?;
        let pledge_type =
            PledgeType::from_name(&self.pledge_type).ok_or_else(|| corrupt("pledge_type"))?;
        let pledger = match (self.by_user_id, self.by_organization_id) {
            (Some(user), None) => Pledger::User(UserId(user)),
            (None, Some(org)) => Pledger::Organization(OrganizationId(org)),
            _ => return Err(corrupt("pledger")),
        };
        let payment_reference = PaymentReference::new(self.payment_reference.as_str())
            .map_err(|_| corrupt("payment_reference"))?;
        let currency = Currency::new(&self.currency).map_err(|_| corrupt("currency"))?;
        let transitions: Vec<PledgeTransitionRecord> =
            serde_json::from_value(self.transition_log.clone())
                .map_err(|_| corrupt("transition_log"))?;

        Ok(Pledge::from_parts(PledgeParts {
            id: PledgeId(self.id),
            payment_reference,
            pledge_type,
            state,
            issue_id: IssueId(self.issue_id),
            repository_id: RepositoryId(self.repository_id),
            organization_id: OrganizationId(self.organization_id),
            pledger,
            on_behalf_of_organization_id: self.on_behalf_of_organization_id.map(OrganizationId),
            email: self.email,
            amount: self.amount,
            fee: self.fee,
            currency,
            scheduled_payout_at: self.scheduled_payout_at.map(Timestamp::from_utc),
            transitions,
            created_at: Timestamp::from_utc(self.created_at),
            updated_at: Timestamp::from_utc(self.updated_at),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row() -> PledgeRow {
        let now = Utc::now();
        PledgeRow {
            id: Uuid::new_v4(),
            payment_reference: "pi_row".into(),
            pledge_type: "pay_upfront".into(),
            state: "created".into(),
            issue_id: Uuid::new_v4(),
            repository_id: Uuid::new_v4(),
            organization_id: Uuid::new_v4(),
            by_user_id: Some(Uuid::new_v4()),
            by_organization_id: None,
            on_behalf_of_organization_id: None,
            email: Some("payer@example.com".into()),
            amount: 1000,
            fee: 0,
            currency: "usd".into(),
            scheduled_payout_at: None,
            transition_log: serde_json::json!([]),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn row_decodes_into_pledge() {
        let pledge = row().into_pledge().unwrap();
        assert_eq!(pledge.state(), PledgeState::Created);
        assert_eq!(pledge.pledge_type(), PledgeType::PayUpfront);
        assert!(pledge.pledger().user_id().is_some());
        assert_eq!(pledge.amount_including_fee(), 1000);
    }

    #[test]
    fn unknown_state_is_an_error_not_a_default() {
        let mut r = row();
        r.state = "settled".into();
        assert!(matches!(r.into_pledge(), Err(PledgeError::Storage(_))));
    }

    #[test]
    fn ambiguous_pledger_is_rejected() {
        let mut r = row();
        r.by_organization_id = Some(Uuid::new_v4());
        assert!(matches!(r.into_pledge(), Err(PledgeError::Storage(_))));
    }
}
