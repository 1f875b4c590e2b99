//! # Pledge API
//!
//! Thin handlers over [`PaymentIntentService`](pledge_service::PaymentIntentService).
//! Each handler parses and validates its input, calls one service
//! operation, and maps the domain error through [`AppError`].

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use serde::Deserialize;
use uuid::Uuid;

use pledge_core::{PaymentReference, PledgeId};
use pledge_service::{
    PaymentIntentCreate, PaymentIntentMutationResponse, PaymentIntentUpdate, PledgeRead,
};
use pledge_state::PledgeState;

use crate::error::AppError;
use crate::extractors::{extract_json, extract_validated_json, Caller, Validate};
use crate::state::AppState;

/// Upper bound on receipt email length.
const MAX_EMAIL_LEN: usize = 320;

fn validate_amount(amount: i64) -> Result<(), String> {
    if amount <= 0 {
        return Err(format!("amount must be a positive number of minor units, got {amount}"));
    }
    Ok(())
}

fn validate_email(email: Option<&str>) -> Result<(), String> {
    match email {
        Some(e) if e.len() > MAX_EMAIL_LEN => {
            Err(format!("email must not exceed {MAX_EMAIL_LEN} characters"))
        }
        Some(e) if !e.trim().is_empty() && !e.contains('@') => {
            Err("email must be an email address".to_string())
        }
        _ => Ok(()),
    }
}

impl Validate for PaymentIntentCreate {
    fn validate(&self) -> Result<(), String> {
        validate_amount(self.amount)?;
        validate_email(self.email.as_deref())
    }
}

impl Validate for PaymentIntentUpdate {
    fn validate(&self) -> Result<(), String> {
        validate_amount(self.amount)?;
        validate_email(self.email.as_deref())
    }
}

/// Processor "payment succeeded" event body.
#[derive(Debug, Deserialize)]
pub struct PaymentSucceededEvent {
    pub payment_reference: PaymentReference,
}

/// Request to move a pledge to another state.
#[derive(Debug, Deserialize)]
pub struct TransitionPledgeRequest {
    /// Target state name, e.g. `pending`, `paid`, `disputed`, `refunded`.
    pub state: String,
}

/// Build the pledges router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/pledges/payment-intents", post(create_payment_intent))
        .route(
            "/v1/pledges/payment-intents/{payment_reference}",
            patch(update_payment_intent),
        )
        .route(
            "/v1/pledges/payment-intents/{payment_reference}/pledge",
            post(create_pledge),
        )
        .route(
            "/v1/pledges/webhooks/payment-intent-succeeded",
            post(payment_intent_succeeded),
        )
        .route("/v1/pledges/{pledge_id}", get(get_pledge))
        .route("/v1/pledges/{pledge_id}/transition", post(transition_pledge))
}

/// POST /v1/pledges/payment-intents: Open a payment intent for a pledge.
async fn create_payment_intent(
    State(state): State<AppState>,
    Caller(caller): Caller,
    body: Result<Json<PaymentIntentCreate>, JsonRejection>,
) -> Result<(StatusCode, Json<PaymentIntentMutationResponse>), AppError> {
    let req = extract_validated_json(body)?;
    let resp = state.pledges.create_payment_intent(caller, req).await?;
    Ok((StatusCode::CREATED, Json(resp)))
}

/// PATCH /v1/pledges/payment-intents/{payment_reference}: Change an open intent.
async fn update_payment_intent(
    State(state): State<AppState>,
    Path(payment_reference): Path<String>,
    body: Result<Json<PaymentIntentUpdate>, JsonRejection>,
) -> Result<Json<PaymentIntentMutationResponse>, AppError> {
    let reference = PaymentReference::new(payment_reference)?;
    let req = extract_validated_json(body)?;
    let resp = state.pledges.update_payment_intent(&reference, req).await?;
    Ok(Json(resp))
}

/// POST /v1/pledges/payment-intents/{payment_reference}/pledge: Create the
/// pledge for a confirmed intent. Idempotent.
async fn create_pledge(
    State(state): State<AppState>,
    Path(payment_reference): Path<String>,
) -> Result<Json<PledgeRead>, AppError> {
    let reference = PaymentReference::new(payment_reference)?;
    let ensured = state.pledges.create_pledge(&reference).await?;
    Ok(Json(PledgeRead::from(ensured.pledge())))
}

/// POST /v1/pledges/webhooks/payment-intent-succeeded: Processor reports a
/// settled payment. Safe to redeliver.
async fn payment_intent_succeeded(
    State(state): State<AppState>,
    body: Result<Json<PaymentSucceededEvent>, JsonRejection>,
) -> Result<Json<PledgeRead>, AppError> {
    let event = extract_json(body)?;
    let ensured = state
        .pledges
        .handle_payment_succeeded(&event.payment_reference)
        .await?;
    Ok(Json(PledgeRead::from(ensured.pledge())))
}

/// GET /v1/pledges/{pledge_id}: Read a pledge.
async fn get_pledge(
    State(state): State<AppState>,
    Path(pledge_id): Path<Uuid>,
) -> Result<Json<PledgeRead>, AppError> {
    let pledge = state.pledges.get(PledgeId(pledge_id)).await?;
    Ok(Json(PledgeRead::from(&pledge)))
}

/// POST /v1/pledges/{pledge_id}/transition: Guarded state transition.
///
/// Illegal transitions return 409 with the current and requested states;
/// payout transitions on an open issue, and `created` on an unsettled
/// intent, return 403.
async fn transition_pledge(
    State(state): State<AppState>,
    Path(pledge_id): Path<Uuid>,
    body: Result<Json<TransitionPledgeRequest>, JsonRejection>,
) -> Result<Json<PledgeRead>, AppError> {
    let req = extract_json(body)?;
    let target = PledgeState::from_name(&req.state).ok_or_else(|| {
        AppError::Validation(format!(
            "unknown state: '{}' (valid states: {})",
            req.state,
            PledgeState::ALL
                .iter()
                .map(|s| s.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    })?;
    let transitioned = state
        .pledges
        .transition(PledgeId(pledge_id), target)
        .await?;
    Ok(Json(PledgeRead::from(&transitioned.pledge)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intent_validation() {
        let mut req = PaymentIntentCreate {
            issue_id: pledge_core::IssueId::new(),
            amount: 1000,
            currency: None,
            email: Some("a@example.com".into()),
            on_behalf_of_organization_id: None,
            setup_future_usage: None,
        };
        assert!(req.validate().is_ok());
        req.amount = -5;
        assert!(req.validate().is_err());
        req.amount = 5;
        req.email = Some("nobody".into());
        assert!(req.validate().is_err());
        req.email = None;
        assert!(req.validate().is_ok());
    }

    #[test]
    fn update_validation() {
        let req = PaymentIntentUpdate {
            amount: 0,
            email: None,
            setup_future_usage: None,
            on_behalf_of_organization_id: None,
        };
        assert!(req.validate().is_err());
    }
}
