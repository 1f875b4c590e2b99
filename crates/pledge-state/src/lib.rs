//! # pledge-state: Pledge Lifecycle State Machine
//!
//! A pledge is a single funding commitment against an issue. It moves
//! through a small lifecycle from initiation to payout or refund:
//!
//! ```text
//! happy path:   initiated ──▶ created ──▶ pending ──▶ paid
//! disputes:     created | pending ──▶ disputed ──▶ pending
//! refunds:      created | pending | disputed ──▶ refunded
//! ```
//!
//! - **State table** (`state.rs`): the seven lifecycle states and the static
//!   map from each destination to the states allowed to enter it.
//! - **Ledger record** (`pledge.rs`): the `Pledge` entity. Its state is
//!   private; the only way to change it is the transition guard.
//! - **Transition guard** (`guard.rs`): validates a requested transition
//!   against the table and the target-issue precondition, then applies it
//!   and appends to the record's transition log.
//!
//! The guard itself is a pure check-then-set on `&mut Pledge`. Atomicity
//! against concurrent requests is the record store's job: it runs the guard
//! while holding the record's lock (row lock or write lock).

pub mod guard;
pub mod pledge;
pub mod state;

pub use guard::{TransitionContext, TransitionError, TransitionGuard};
pub use pledge::{NewPledge, Pledge, PledgeParts, PledgeTransitionRecord, PledgeType, Pledger};
pub use state::{allowed_sources, PledgeState};
