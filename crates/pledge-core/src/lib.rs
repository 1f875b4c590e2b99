//! # pledge-core: Foundational Types for the Pledge Ledger
//!
//! Every other crate in the workspace depends on `pledge-core`; it depends on
//! nothing internal.
//!
//! ## Key Design Principles
//!
//! 1. **Newtype wrappers for identifiers.** `PledgeId`, `UserId`, `IssueId`,
//!    `OrganizationId`, `RepositoryId` are distinct types. A user id cannot be
//!    passed where an issue id is expected.
//!
//! 2. **`PaymentReference` is the deduplication key.** The processor's intent
//!    id is validated once at the boundary and carried as its own type.
//!
//! 3. **Minor-unit integer amounts.** Amounts are `i64` minor units. There are
//!    no floating point amounts anywhere in the workspace.
//!
//! 4. **UTC-only timestamps** with seconds precision, so values survive a
//!    round trip through Postgres and JSON unchanged.
//!
//! ## Crate Policy
//!
//! - No dependencies on other `pledge-*` crates.
//! - No `unsafe` code.
//! - No `panic!()` or `.unwrap()` outside tests.

pub mod error;
pub mod identity;
pub mod payment;
pub mod temporal;

pub use error::{PledgeError, ValidationError};
pub use identity::{IssueId, OrganizationId, PledgeId, RepositoryId, UserId};
pub use payment::{Currency, PaymentReference};
pub use temporal::Timestamp;
