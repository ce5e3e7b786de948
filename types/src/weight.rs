//! Signed fixed-point voting weight.
//!
//! Weights are derived from activation proofs and divided by per-epoch
//! eligibility counts, so they are fractional. To keep tallies exact the
//! weight is a signed 128-bit integer with a fixed binary scale of 32
//! fractional bits; no floating point is used anywhere in the tally.
//!
//! Arithmetic that can overflow in adversarial inputs is `checked_*`;
//! running tallies use the saturating forms.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::ops::Neg;

/// Number of fractional bits in the fixed-point representation.
const FRAC_BITS: u32 = 32;
const ONE: i128 = 1i128 << FRAC_BITS;

/// Three-valued outcome of comparing a tally against a threshold, and the
/// validity assigned to blocks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sign {
    Against,
    #[default]
    Neutral,
    Support,
}

impl fmt::Display for Sign {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sign::Against => write!(f, "against"),
            Sign::Neutral => write!(f, "neutral"),
            Sign::Support => write!(f, "support"),
        }
    }
}

/// A signed fixed-point voting weight with 32 fractional bits.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Weight(i128);

impl Weight {
    pub const ZERO: Self = Self(0);

    /// Whole-unit weight (e.g. the raw weight units of an activation proof).
    pub fn from_units(units: u64) -> Self {
        Self((units as i128) << FRAC_BITS)
    }

    /// The raw fixed-point representation.
    pub fn raw(&self) -> i128 {
        self.0
    }

    /// Rebuild from a raw fixed-point representation (snapshot restore).
    pub fn from_raw(raw: i128) -> Self {
        Self(raw)
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, other: Self) -> Option<Self> {
        self.0.checked_add(other.0).map(Self)
    }

    pub fn checked_sub(self, other: Self) -> Option<Self> {
        self.0.checked_sub(other.0).map(Self)
    }

    pub fn saturating_add(self, other: Self) -> Self {
        Self(self.0.saturating_add(other.0))
    }

    pub fn saturating_sub(self, other: Self) -> Self {
        Self(self.0.saturating_sub(other.0))
    }

    /// Exact division by a positive integer, rounding toward zero.
    /// Returns `None` for a zero divisor.
    pub fn div_units(self, divisor: u64) -> Option<Self> {
        if divisor == 0 {
            return None;
        }
        Some(Self(self.0 / divisor as i128))
    }

    /// Multiplication by a small integer; `None` on overflow.
    pub fn checked_mul_units(self, factor: u64) -> Option<Self> {
        self.0.checked_mul(factor as i128).map(Self)
    }

    /// Scale by the rational `num / denom`; `None` on overflow or a zero
    /// denominator. Used for threshold fractions of expected weight.
    pub fn fraction(self, num: u64, denom: u64) -> Option<Self> {
        if denom == 0 {
            return None;
        }
        self.0
            .checked_mul(num as i128)
            .map(|scaled| Self(scaled / denom as i128))
    }

    /// The sign of this weight on its own.
    pub fn sign(&self) -> Sign {
        match self.0.cmp(&0) {
            Ordering::Less => Sign::Against,
            Ordering::Equal => Sign::Neutral,
            Ordering::Greater => Sign::Support,
        }
    }

    /// Decide against a threshold: strictly above is `Support`, strictly
    /// below is `Against`, equality is `Neutral`.
    pub fn decide(&self, threshold: &Weight) -> Sign {
        match self.0.cmp(&threshold.0) {
            Ordering::Less => Sign::Against,
            Ordering::Equal => Sign::Neutral,
            Ordering::Greater => Sign::Support,
        }
    }

    /// Magnitude of this weight.
    pub fn abs(self) -> Self {
        Self(self.0.saturating_abs())
    }
}

impl Neg for Weight {
    type Output = Self;

    fn neg(self) -> Self {
        // i128::MIN is unreachable for weights built from u64 units.
        Self(self.0.saturating_neg())
    }
}

impl fmt::Display for Weight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let negative = self.0 < 0;
        let magnitude = self.0.unsigned_abs();
        let whole = magnitude >> FRAC_BITS;
        let frac = magnitude & ((ONE as u128) - 1);
        // three decimal places are plenty for logs
        let millis = (frac * 1000) >> FRAC_BITS;
        if negative {
            write!(f, "-")?;
        }
        if millis == 0 {
            write!(f, "{}", whole)
        } else {
            write!(f, "{}.{:03}", whole, millis)
        }
    }
}
