//! A money newtype holding Kenyan shillings in minor units (cents).
//!
//! All arithmetic happens on the inner signed 64-bit integer; floating point
//! never enters calculations. [`rust_decimal`] is used only at the boundary,
//! for parsing user-supplied shilling strings and for display formatting.
//!
//! Note that we don't impl `From<i64>` etc because we want calling code to be
//! explicit about what the input unit is.

use std::fmt::{self, Display};
use std::iter::Sum;
use std::ops::{Add, Sub};

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Errors that can occur when attempting to construct an [`Amount`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("amount is negative")]
    Negative,

    #[error("amount is too large")]
    TooLarge,

    #[error("amount has sub-cent precision")]
    SubCentPrecision,
}

/// An amount of money in minor units (1 KES = 100 minor units).
///
/// The value is signed so that ledger deltas and reversals can be expressed,
/// but most constructors require non-negative inputs; entity balances
/// maintain their own non-negativity invariants.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[derive(Serialize, Deserialize)]
#[cfg_attr(
    any(test, feature = "test-utils"),
    derive(proptest_derive::Arbitrary)
)]
pub struct Amount(i64);

impl Amount {
    pub const ZERO: Self = Self(0);

    // --- Constructors --- //

    /// Construct an [`Amount`] from a minor-unit value.
    #[inline]
    pub const fn from_minor(minor: i64) -> Self {
        Self(minor)
    }

    /// Construct an [`Amount`] from a whole-shilling value.
    pub const fn from_kes(kes: i64) -> Self {
        Self(kes * 100)
    }

    /// Parse an [`Amount`] from a decimal shilling value, e.g. `"1048.00"`.
    /// Rejects negative values and sub-cent precision.
    pub fn try_from_kes_decimal(kes: Decimal) -> Result<Self, Error> {
        if kes.is_sign_negative() {
            return Err(Error::Negative);
        }
        let minor = kes * dec!(100);
        if minor.normalize().scale() != 0 {
            return Err(Error::SubCentPrecision);
        }
        minor.to_i64().map(Self).ok_or(Error::TooLarge)
    }

    // --- Getters --- //

    /// Returns the contained minor-unit value.
    #[inline]
    pub const fn minor(self) -> i64 {
        self.0
    }

    /// Returns the value as a [`Decimal`] shilling value. Boundary use only.
    pub fn kes(self) -> Decimal {
        Decimal::from(self.0) / dec!(100)
    }

    #[inline]
    pub const fn is_negative(self) -> bool {
        self.0 < 0
    }

    #[inline]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    // --- Checked arithmetic --- //

    pub fn checked_add(self, rhs: Self) -> Option<Self> {
        self.0.checked_add(rhs.0).map(Self)
    }

    pub fn checked_sub(self, rhs: Self) -> Option<Self> {
        self.0.checked_sub(rhs.0).map(Self)
    }

    pub fn checked_mul(self, rhs: i64) -> Option<Self> {
        self.0.checked_mul(rhs).map(Self)
    }

    /// Returns `bps` basis points of this amount, rounding towards zero.
    pub fn bps(self, bps: u32) -> Self {
        let value = i128::from(self.0) * i128::from(bps) / 10_000;
        Self(i64::try_from(value).expect("bps of an i64 fits in an i64"))
    }

    /// Splits this amount into `(bps part, remainder)` such that the two
    /// parts always sum to the original amount.
    pub fn split_bps(self, bps: u32) -> (Self, Self) {
        let part = self.bps(bps);
        (part, Self(self.0 - part.0))
    }
}

/// Panics on overflow like the integer operators; use the `checked_*` methods
/// where untrusted inputs are involved.
impl Add for Amount {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self(self.0 + rhs.0)
    }
}

impl Sub for Amount {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self(self.0 - rhs.0)
    }
}

impl Sum for Amount {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        Self(iter.map(|a| a.0).sum())
    }
}

/// Displays the decimal shilling value with cents, e.g. `1048.00`.
impl Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kes = self.kes();
        kes.rescale(2);
        Display::fmt(&kes, f)
    }
}

#[cfg(test)]
mod test {
    use std::str::FromStr;

    use proptest::arbitrary::any;
    use proptest::{prop_assert_eq, proptest};

    use super::*;
    use crate::test_utils::roundtrip;

    #[test]
    fn amount_json_roundtrip() {
        roundtrip::json_value_canonical_proptest::<Amount>();
    }

    #[test]
    fn serializes_as_minor_units() {
        let amount = Amount::from_kes(1_048);
        assert_eq!(serde_json::to_string(&amount).unwrap(), "104800");
    }

    #[test]
    fn display_has_cents() {
        assert_eq!(Amount::from_minor(104_800).to_string(), "1048.00");
        assert_eq!(Amount::from_minor(8_700).to_string(), "87.00");
        assert_eq!(Amount::from_minor(50).to_string(), "0.50");
    }

    #[test]
    fn kes_decimal_boundary() {
        let dec = Decimal::from_str("1048.00").unwrap();
        let amount = Amount::try_from_kes_decimal(dec).unwrap();
        assert_eq!(amount, Amount::from_minor(104_800));

        let sub_cent = Decimal::from_str("1.005").unwrap();
        assert!(Amount::try_from_kes_decimal(sub_cent).is_err());
        let negative = Decimal::from_str("-1").unwrap();
        assert!(Amount::try_from_kes_decimal(negative).is_err());
    }

    #[test]
    fn split_bps_always_sums() {
        proptest!(|(minor in 0i64..=i64::MAX / 2, bps in 0u32..=10_000)| {
            let amount = Amount::from_minor(minor);
            let (part, rest) = amount.split_bps(bps);
            prop_assert_eq!(part + rest, amount);
            prop_assert_eq!(part.is_negative(), false);
        });
    }

    #[test]
    fn bps_examples() {
        let premium = Amount::from_minor(104_800);
        assert_eq!(premium.bps(1_000), Amount::from_minor(10_480));
        let (fee, refund) = premium.split_bps(1_000);
        assert_eq!(fee, Amount::from_minor(10_480));
        assert_eq!(refund, Amount::from_minor(94_320));
    }

    #[test]
    fn checked_arithmetic() {
        proptest!(|(a in any::<Amount>(), b in any::<Amount>())| {
            if let Some(sum) = a.checked_add(b) {
                prop_assert_eq!(sum.checked_sub(b), Some(a));
            }
        });
    }
}
