//! # pledge-service: Pledge Orchestration
//!
//! Wires the state machine to its collaborators:
//!
//! - **Fee policy** (`fee.rs`): pluggable platform fee, zero by default.
//! - **Record store** (`store.rs`): the [`PledgeStore`] contract, with a
//!   unique payment reference and per-record serialized transitions.
//! - **Resolvers** (`resolvers.rs`): user accounts and issues, owned by the
//!   wider platform.
//! - **Pledge-created hook** (`hooks.rs`): ordered, failure-isolated
//!   fan-out on first entry into `created`.
//! - **Creation deduplicator** (`dedup.rs`): one pledge per payment
//!   reference, under retries and concurrent confirmation.
//! - **Payment intent service** (`service.rs`): the operations the web layer
//!   calls.
//!
//! Every collaborator is injected as `Arc<dyn Trait>`; in-memory
//! implementations of each ship with this crate.

pub mod dedup;
pub mod fee;
pub mod hooks;
pub mod resolvers;
pub mod service;
pub mod store;

pub use dedup::{CreationDeduplicator, Ensured};
pub use fee::{FeePolicy, FeePolicyError, NoFee, ProcessingFee};
pub use hooks::{
    AttributionEntry, AttributionJournal, FanOutReport, PledgeCreatedSubscriber, PledgeHook,
    SubscriberError,
};
pub use resolvers::{
    IdentityResolver, InMemoryIdentityResolver, InMemoryIssueResolver, Issue, IssueResolver,
    SignupAttribution, User,
};
pub use service::{
    CallerIdentity, PaymentIntentCreate, PaymentIntentMutationResponse, PaymentIntentService,
    PaymentIntentUpdate, PledgeRead, Transitioned,
};
pub use store::{InMemoryPledgeStore, InsertError, PledgeStore};
