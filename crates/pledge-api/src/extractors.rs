//! # Custom Extractors & Validation
//!
//! The [`Validate`] trait for request bodies, JSON extraction helpers that
//! map rejections to [`AppError`], and the [`Caller`] extractor.

use axum::extract::rejection::JsonRejection;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::Json;
use uuid::Uuid;

use pledge_core::UserId;
use pledge_service::CallerIdentity;

use crate::error::AppError;

/// Header carrying the authenticated user id, set by the upstream gateway.
pub const CALLER_HEADER: &str = "x-caller-user-id";

/// Trait for request types that can validate their business rules
/// beyond what serde deserialization checks.
pub trait Validate {
    /// Validate business rules. Returns an error message on failure.
    fn validate(&self) -> Result<(), String>;
}

/// Extract a JSON body, mapping deserialization errors to [`AppError::BadRequest`].
pub fn extract_json<T>(result: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    result
        .map(|Json(v)| v)
        .map_err(|err| AppError::BadRequest(err.body_text()))
}

/// Extract a JSON body and validate it using the [`Validate`] trait.
pub fn extract_validated_json<T: Validate>(
    result: Result<Json<T>, JsonRejection>,
) -> Result<T, AppError> {
    let value = extract_json(result)?;
    value.validate().map_err(AppError::Validation)?;
    Ok(value)
}

/// The request's caller. `None` for anonymous requests.
///
/// Authentication happens upstream; this only reads the user id the gateway
/// forwarded in [`CALLER_HEADER`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller(pub Option<CallerIdentity>);

impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Some(value) = parts.headers.get(CALLER_HEADER) else {
            return Ok(Self(None));
        };
        let user_id = value
            .to_str()
            .ok()
            .and_then(|v| Uuid::parse_str(v.trim()).ok())
            .ok_or_else(|| AppError::BadRequest(format!("{CALLER_HEADER} must be a UUID")))?;
        Ok(Self(Some(CallerIdentity {
            user_id: UserId(user_id),
        })))
    }
}
