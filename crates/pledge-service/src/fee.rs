//! # Fee Policy
//!
//! A [`FeePolicy`] computes the platform fee for a pledge amount. It is pure
//! and deterministic. Every caller goes through the trait, so swapping the
//! schedule never touches orchestration code.
//!
//! The service runs [`NoFee`] by default. [`ProcessingFee`] passes the card
//! processor's percentage and fixed fee on to the payer, grossing the amount
//! up so that the net received after processing equals the pledged amount.
//!
//! A policy never returns a fee whose sum with the amount leaves `i64`; it
//! fails with [`FeePolicyError::TotalOutOfRange`] instead.

use thiserror::Error;

/// Basis points in one whole (100%).
const BPS_SCALE: i128 = 10_000;

/// Computes the platform fee for an amount in minor units.
pub trait FeePolicy: Send + Sync + std::fmt::Debug {
    /// Fee in minor units to charge on top of `amount`.
    fn calculate_fee(&self, amount: i64) -> Result<i64, FeePolicyError>;
}

/// Charges nothing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NoFee;

impl FeePolicy for NoFee {
    fn calculate_fee(&self, _amount: i64) -> Result<i64, FeePolicyError> {
        Ok(0)
    }
}

/// Rejected fee schedule parameters.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FeePolicyError {
    #[error("fee percentage must be below 100%, got {0} bps")]
    PercentageOutOfRange(u32),

    #[error("fixed fee must not be negative, got {0}")]
    NegativeFixedFee(i64),

    #[error("amount {0} plus fee exceeds the largest chargeable total")]
    TotalOutOfRange(i64),
}

/// Gross-up of a percentage plus fixed processing fee:
/// `ceil((amount + fixed) / (1 - pct)) - amount`, in integer arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessingFee {
    percentage_bps: u32,
    fixed: i64,
}

impl ProcessingFee {
    /// Build a schedule from a percentage in basis points and a fixed fee in
    /// minor units.
    pub fn new(percentage_bps: u32, fixed: i64) -> Result<Self, FeePolicyError> {
        if i128::from(percentage_bps) >= BPS_SCALE {
            return Err(FeePolicyError::PercentageOutOfRange(percentage_bps));
        }
        if fixed < 0 {
            return Err(FeePolicyError::NegativeFixedFee(fixed));
        }
        Ok(Self {
            percentage_bps,
            fixed,
        })
    }

    /// Card processing: 2.9% domestic plus 1.5% international, and 30 minor
    /// units fixed.
    pub fn card_processing() -> Self {
        Self {
            percentage_bps: 440,
            fixed: 30,
        }
    }

    pub fn percentage_bps(&self) -> u32 {
        self.percentage_bps
    }

    pub fn fixed(&self) -> i64 {
        self.fixed
    }
}

impl FeePolicy for ProcessingFee {
    fn calculate_fee(&self, amount: i64) -> Result<i64, FeePolicyError> {
        let numerator = (i128::from(amount) + i128::from(self.fixed)) * BPS_SCALE;
        let denominator = BPS_SCALE - i128::from(self.percentage_bps);
        // Ceiling division; numerator and denominator are both positive for
        // any non-negative amount.
        let gross = (numerator + denominator - 1) / denominator;
        // The gross is the charged total, so bounding it bounds amount + fee.
        if gross > i128::from(i64::MAX) {
            return Err(FeePolicyError::TotalOutOfRange(amount));
        }
        i64::try_from(gross - i128::from(amount))
            .map_err(|_| FeePolicyError::TotalOutOfRange(amount))
    }
}
