//! # Transition Guard
//!
//! The only path by which a pledge changes state. A transition succeeds iff
//! the pledge's current state is in the destination's allowed-source set
//! ([`allowed_sources`]) and, for `pending` and `paid`, the target issue is
//! closed.
//!
//! The table is consulted first: a transition the table forbids is always
//! `InvalidStateTransition`, whatever the issue's state. A table-legal move
//! into `pending` or `paid` against an open issue is `NotPermitted`.
//!
//! Rejections leave the pledge untouched.

use thiserror::Error;

use pledge_core::PledgeError;

use crate::pledge::Pledge;
use crate::state::{allowed_sources, PledgeState};

/// Caller-supplied facts the guard needs but does not derive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransitionContext {
    /// Whether the pledge's target issue is closed.
    pub issue_closed: bool,
}

impl TransitionContext {
    /// Context for a pledge whose issue is closed.
    pub fn issue_closed() -> Self {
        Self { issue_closed: true }
    }

    /// Context for a pledge whose issue is still open.
    pub fn issue_open() -> Self {
        Self {
            issue_closed: false,
        }
    }
}

/// Errors raised by the transition guard.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    /// The destination does not admit the current state.
    #[error("invalid pledge state transition: {from} -> {to}")]
    InvalidStateTransition {
        /// Current state.
        from: PledgeState,
        /// Requested destination.
        to: PledgeState,
    },

    /// The table admits the transition but a precondition does not hold.
    #[error("pledge transition {from} -> {to} not permitted: {reason}")]
    NotPermitted {
        /// Current state.
        from: PledgeState,
        /// Requested destination.
        to: PledgeState,
        /// Which precondition failed.
        reason: String,
    },
}

impl From<TransitionError> for PledgeError {
    fn from(err: TransitionError) -> Self {
        match err {
            TransitionError::InvalidStateTransition { from, to } => {
                PledgeError::InvalidStateTransition {
                    from: from.to_string(),
                    to: to.to_string(),
                }
            }
            TransitionError::NotPermitted { .. } => PledgeError::NotPermitted(err.to_string()),
        }
    }
}

/// Validates and applies pledge state transitions.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransitionGuard;

impl TransitionGuard {
    /// Check whether `from -> to` is allowed under `ctx`, without mutating anything.
    pub fn check(
        from: PledgeState,
        to: PledgeState,
        ctx: &TransitionContext,
    ) -> Result<(), TransitionError> {
        if !allowed_sources(to).contains(&from) {
            return Err(TransitionError::InvalidStateTransition { from, to });
        }
        if Self::requires_closed_issue(to) && !ctx.issue_closed {
            return Err(TransitionError::NotPermitted {
                from,
                to,
                reason: "target issue is not closed".to_string(),
            });
        }
        Ok(())
    }

    /// Move `pledge` into `to`, or reject without touching it.
    ///
    /// Returns the updated pledge on success. Callers that share the record
    /// across tasks must hold the record's lock across this call.
    pub fn attempt_transition<'a>(
        pledge: &'a mut Pledge,
        to: PledgeState,
        ctx: &TransitionContext,
    ) -> Result<&'a Pledge, TransitionError> {
        Self::check(pledge.state(), to, ctx)?;
        pledge.apply_transition(to);
        Ok(pledge)
    }

    /// Destinations that require the target issue to be closed.
    pub fn requires_closed_issue(to: PledgeState) -> bool {
        matches!(to, PledgeState::Pending | PledgeState::Paid)
    }
}
