//! Ledger amounts and fixed-point ratios.
//!
//! Monetary math never touches floating point. Ratios are stored as integers
//! scaled by 10^[`RATIO_PRECISION`] and applied with truncating division.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of decimal digits carried by a [`Ratio`].
pub const RATIO_PRECISION: u32 = 8;

const RATIO_SCALE: u64 = 10u64.pow(RATIO_PRECISION);

/// A non-negative ledger amount.
///
/// All arithmetic is checked; callers decide what overflow means.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Amount(pub u128);

impl Amount {
    pub const ZERO: Self = Self(0);

    pub const fn new(value: u128) -> Self {
        Self(value)
    }

    pub const fn value(&self) -> u128 {
        self.0
    }

    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, other: Amount) -> Option<Amount> {
        self.0.checked_add(other.0).map(Amount)
    }

    pub fn checked_sub(self, other: Amount) -> Option<Amount> {
        self.0.checked_sub(other.0).map(Amount)
    }

    pub fn saturating_sub(self, other: Amount) -> Amount {
        Amount(self.0.saturating_sub(other.0))
    }

    /// Divide by two, truncating.
    pub const fn half(self) -> Amount {
        Amount(self.0 / 2)
    }

    /// Multiply by a fixed-point ratio: `amount * scaled / 10^8`, truncating.
    ///
    /// Returns `None` only if the true result does not fit in a `u128`.
    pub fn checked_mul_ratio(self, ratio: Ratio) -> Option<Amount> {
        let scale = RATIO_SCALE as u128;
        let scaled = ratio.scaled() as u128;
        let quotient = self.0 / scale;
        let remainder = self.0 % scale;
        // remainder * scaled < 10^8 * 2^64, no overflow possible
        let low = remainder * scaled / scale;
        quotient.checked_mul(scaled)?.checked_add(low).map(Amount)
    }
}

impl fmt::Debug for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Amount({})", self.0)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Amount {
    fn from(value: u64) -> Self {
        Self(value as u128)
    }
}

impl From<u128> for Amount {
    fn from(value: u128) -> Self {
        Self(value)
    }
}

/// A non-negative ratio with 8 decimal digits of precision.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Ratio(u64);

impl Ratio {
    pub const ZERO: Self = Self(0);
    pub const ONE: Self = Self(RATIO_SCALE);

    /// Create from a value already scaled by 10^8.
    pub const fn from_scaled(scaled: u64) -> Self {
        Self(scaled)
    }

    /// Convert a decimal ratio, rounding to the nearest representable value.
    ///
    /// Returns `None` for negative, non-finite, or out-of-range input.
    pub fn from_f64(ratio: f64) -> Option<Self> {
        if !ratio.is_finite() || ratio < 0.0 {
            return None;
        }
        let scaled = (ratio * RATIO_SCALE as f64).round();
        if scaled > u64::MAX as f64 {
            return None;
        }
        Some(Self(scaled as u64))
    }

    pub const fn scaled(&self) -> u64 {
        self.0
    }

    /// Half of this ratio, truncating at the last digit.
    pub const fn half(self) -> Ratio {
        Ratio(self.0 / 2)
    }

    pub fn checked_add(self, other: Ratio) -> Option<Ratio> {
        self.0.checked_add(other.0).map(Ratio)
    }
}

impl fmt::Debug for Ratio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ratio({})", self)
    }
}

impl fmt::Display for Ratio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{:0width$}",
            self.0 / RATIO_SCALE,
            self.0 % RATIO_SCALE,
            width = RATIO_PRECISION as usize
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_multiply_is_exact_integer() {
        let ratio = Ratio::from_f64(0.2).unwrap();
        assert_eq!(ratio.scaled(), 20_000_000);
        assert_eq!(
            Amount::new(1_000_000).checked_mul_ratio(ratio),
            Some(Amount::new(200_000))
        );
    }

    #[test]
    fn test_multiply_truncates() {
        let ratio = Ratio::from_f64(1.1).unwrap();
        assert_eq!(Amount::new(5).checked_mul_ratio(ratio), Some(Amount::new(5)));
        assert_eq!(Amount::new(10).checked_mul_ratio(ratio), Some(Amount::new(11)));
        assert_eq!(Amount::new(19).checked_mul_ratio(ratio), Some(Amount::new(20)));
    }

    #[test]
    fn test_threshold_factor_from_ratio() {
        let ratio = Ratio::from_f64(0.2).unwrap();
        let factor = Ratio::ONE.checked_add(ratio.half()).unwrap();
        assert_eq!(factor, Ratio::from_f64(1.1).unwrap());
        assert_eq!(factor.to_string(), "1.10000000");
    }

    #[test]
    fn test_from_f64_rejects_bad_input() {
        assert!(Ratio::from_f64(-0.1).is_none());
        assert!(Ratio::from_f64(f64::NAN).is_none());
        assert!(Ratio::from_f64(f64::INFINITY).is_none());
    }

    #[test]
    fn test_multiply_overflow_detected() {
        let big = Amount::new(u128::MAX);
        assert!(big.checked_mul_ratio(Ratio::from_scaled(2 * RATIO_SCALE)).is_none());
        assert_eq!(big.checked_mul_ratio(Ratio::ONE), Some(big));
    }

    proptest! {
        #[test]
        fn prop_multiply_matches_wide_formula(amount in 0u128..(1u128 << 64), scaled in 0u64..(4 * RATIO_SCALE)) {
            let expected = amount * scaled as u128 / RATIO_SCALE as u128;
            let got = Amount::new(amount).checked_mul_ratio(Ratio::from_scaled(scaled));
            prop_assert_eq!(got, Some(Amount::new(expected)));
        }
    }
}
