//! # Payment Primitives
//!
//! [`PaymentReference`] is the payment processor's identifier for a payment
//! intent. It is the idempotency key of record creation: at most one pledge
//! exists per reference.
//!
//! [`Currency`] is a lower-case ISO 4217 code, the form the processor
//! reports and accepts.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Maximum accepted length for a processor intent id.
const MAX_REFERENCE_LEN: usize = 255;

/// External payment-intent identifier, unique per pledge.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PaymentReference(String);

impl PaymentReference {
    /// Validate and wrap a processor intent id.
    ///
    /// Rejects empty values, surrounding whitespace, and values longer than
    /// 255 bytes.
    pub fn new(s: impl Into<String>) -> Result<Self, ValidationError> {
        let s = s.into();
        if s.is_empty() || s.len() > MAX_REFERENCE_LEN || s.trim() != s {
            return Err(ValidationError::InvalidPaymentReference(s));
        }
        Ok(Self(s))
    }

    /// Return the reference as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for PaymentReference {
    type Error = ValidationError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<PaymentReference> for String {
    fn from(r: PaymentReference) -> Self {
        r.0
    }
}

impl std::fmt::Display for PaymentReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lower-case three-letter ISO 4217 currency code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency(String);

impl Currency {
    /// Validate a currency code, normalising it to lower case.
    pub fn new(code: impl AsRef<str>) -> Result<Self, ValidationError> {
        let code = code.as_ref();
        if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(ValidationError::InvalidCurrency(code.to_string()));
        }
        Ok(Self(code.to_ascii_lowercase()))
    }

    /// US dollars, the platform default.
    pub fn usd() -> Self {
        Self("usd".to_string())
    }

    /// Return the code as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Currency {
    fn default() -> Self {
        Self::usd()
    }
}

impl TryFrom<String> for Currency {
    type Error = ValidationError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<Currency> for String {
    fn from(c: Currency) -> Self {
        c.0
    }
}

impl std::fmt::Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_accepts_processor_ids() {
        let r = PaymentReference::new("pi_3MtwBwLkdIwHu7ix28a3tqPa").unwrap();
        assert_eq!(r.as_str(), "pi_3MtwBwLkdIwHu7ix28a3tqPa");
    }

    #[test]
    fn reference_rejects_empty_and_padded() {
        assert!(PaymentReference::new("").is_err());
        assert!(PaymentReference::new(" pi_1").is_err());
        assert!(PaymentReference::new("pi_1\n").is_err());
        assert!(PaymentReference::new("x".repeat(256)).is_err());
    }

    #[test]
    fn reference_deserialization_validates() {
        assert!(serde_json::from_str::<PaymentReference>("\"\"").is_err());
        let r: PaymentReference = serde_json::from_str("\"pi_1\"").unwrap();
        assert_eq!(r.as_str(), "pi_1");
    }

    #[test]
    fn currency_normalises_to_lower_case() {
        assert_eq!(Currency::new("USD").unwrap().as_str(), "usd");
        assert_eq!(Currency::new("eur").unwrap().as_str(), "eur");
    }

    #[test]
    fn currency_rejects_malformed_codes() {
        assert!(Currency::new("us").is_err());
        assert!(Currency::new("usdt").is_err());
        assert!(Currency::new("u$d").is_err());
        assert!(serde_json::from_str::<Currency>("\"dollars\"").is_err());
    }

    #[test]
    fn default_currency_is_usd() {
        assert_eq!(Currency::default(), Currency::usd());
    }
}
