//! Money Module
//!
//! Fixed-point wallet amounts. All balances and withdrawal amounts carry
//! exactly 8 fractional digits; conversions to the provider's integer base
//! units MUST go through this module.
//!
//! ## Design Principles
//! 1. Explicit Error Handling: No silent truncation of user input
//! 2. Type Safety: `Amount` can never be negative
//! 3. One Canonical Form: every `Amount` is rescaled to 8 digits, so
//!    `"2.5"` and `"2.50000000"` compare, hash and display identically
//!
//! ## Usage
//! ```rust
//! use wallet_bot::money::Amount;
//!
//! let amount = Amount::parse("2.5").unwrap();
//! assert_eq!(amount.to_string(), "2.50000000");
//! assert_eq!(amount.to_base_units().unwrap(), 250_000_000);
//! ```

use rust_decimal::prelude::*;
use serde::Deserialize;
use std::fmt;
use thiserror::Error;

/// Fractional digits carried by every wallet amount
pub const AMOUNT_SCALE: u32 = 8;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MoneyError {
    #[error("Precision overflow: provided {provided} decimals, max allowed {max}")]
    PrecisionOverflow { provided: u32, max: u32 },

    #[error("Amount must not be negative")]
    Negative,

    #[error("Amount too large, would overflow")]
    Overflow,

    #[error("Invalid format: {0}")]
    InvalidFormat(String),
}

// ============================================================================
// Amount
// ============================================================================

/// Non-negative fixed-point amount with 8 fractional digits
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(try_from = "Decimal")]
pub struct Amount(Decimal);

impl Amount {
    pub const ZERO: Amount = Amount(Decimal::ZERO);

    /// Build from a decimal value, rejecting negatives and >8 fractional digits
    pub fn from_decimal(value: Decimal) -> Result<Self, MoneyError> {
        if value.is_sign_negative() && !value.is_zero() {
            return Err(MoneyError::Negative);
        }

        let normalized = value.normalize();
        if normalized.scale() > AMOUNT_SCALE {
            return Err(MoneyError::PrecisionOverflow {
                provided: normalized.scale(),
                max: AMOUNT_SCALE,
            });
        }

        let mut canonical = normalized.abs();
        canonical.rescale(AMOUNT_SCALE);
        Ok(Self(canonical))
    }

    /// Parse a free-form user reply such as `" 2.5 "`
    ///
    /// # Errors
    /// * `InvalidFormat` - empty input, signs, commas, exponents, stray dots
    /// * `Negative` - a leading minus sign
    /// * `PrecisionOverflow` - more than 8 fractional digits
    pub fn parse(text: &str) -> Result<Self, MoneyError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(MoneyError::InvalidFormat("empty string".into()));
        }

        if text.starts_with('-') {
            return Err(MoneyError::Negative);
        }

        let (whole, frac) = match text.split_once('.') {
            Some((whole, frac)) => (whole, Some(frac)),
            None => (text, None),
        };

        // Strict: both sides of the dot must be plain digits
        if whole.is_empty() || !whole.bytes().all(|b| b.is_ascii_digit()) {
            return Err(MoneyError::InvalidFormat(format!(
                "invalid whole part: {}",
                whole
            )));
        }
        if let Some(frac) = frac
            && (frac.is_empty() || !frac.bytes().all(|b| b.is_ascii_digit()))
        {
            return Err(MoneyError::InvalidFormat(format!(
                "invalid fractional part: {}",
                frac
            )));
        }

        let provided = frac.map(|f| f.len() as u32).unwrap_or(0);
        let significant = frac.map(|f| f.trim_end_matches('0').len() as u32).unwrap_or(0);
        if significant > AMOUNT_SCALE {
            return Err(MoneyError::PrecisionOverflow {
                provided,
                max: AMOUNT_SCALE,
            });
        }

        let value = Decimal::from_str(text).map_err(|e| {
            if matches!(e, rust_decimal::Error::ExceedsMaximumPossibleValue) {
                MoneyError::Overflow
            } else {
                MoneyError::InvalidFormat(e.to_string())
            }
        })?;

        Self::from_decimal(value)
    }

    #[inline]
    pub fn as_decimal(&self) -> Decimal {
        self.0
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Integer base units (10^-8) as expected by the payout provider
    ///
    /// Every `Amount` has at most 8 digits, so the conversion is exact.
    pub fn to_base_units(&self) -> Result<u64, MoneyError> {
        let scaled = self.0 * Decimal::from(10u64.pow(AMOUNT_SCALE));
        scaled.trunc().to_u64().ok_or(MoneyError::Overflow)
    }

    /// Subtract, returning `None` if the result would be negative
    pub fn checked_sub(&self, other: Amount) -> Option<Amount> {
        if other.0 > self.0 {
            return None;
        }
        let mut diff = self.0 - other.0;
        diff.rescale(AMOUNT_SCALE);
        Some(Self(diff))
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = MoneyError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Amount::from_decimal(value)
    }
}

impl FromStr for Amount {
    type Err = MoneyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Amount::parse(s)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.8}", self.0)
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
