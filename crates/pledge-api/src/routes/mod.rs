//! # API Route Modules
//!
//! - [`pledges`]: payment intents, pledge confirmation, processor success
//!   events, reads, and guarded transitions under `/v1/pledges`.

pub mod pledges;
