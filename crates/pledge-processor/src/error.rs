//! Payment processor error types.

use pledge_core::PledgeError;

/// Errors from payment processor calls.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProcessorError {
    /// The processor rejected the request parameters.
    #[error("invalid payment processor request: {reason}")]
    InvalidRequest {
        /// Why the request was rejected.
        reason: String,
    },

    /// The referenced intent does not exist at the processor.
    #[error("payment intent not found: {reference}")]
    IntentNotFound {
        /// The intent id that was looked up.
        reference: String,
    },

    /// The processor could not be reached or failed internally.
    #[error("payment processor unavailable: {reason}")]
    Unavailable {
        /// Description of the failure.
        reason: String,
    },
}

/// Processor failures surface as `UpstreamService`, except a missing intent
/// which is a plain `ResourceNotFound`.
impl From<ProcessorError> for PledgeError {
    fn from(err: ProcessorError) -> Self {
        match err {
            ProcessorError::IntentNotFound { reference } => {
                PledgeError::ResourceNotFound(format!("payment intent {reference}"))
            }
            other => PledgeError::UpstreamService(other.to_string()),
        }
    }
}
