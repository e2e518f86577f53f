//! Arbitrary precision decimals.

use std::fmt;

use num_bigint::BigUint;
use num_traits::Zero;

/// `(-1)^negative * coefficient * 10^exponent`.
///
/// Equality is structural: `0d0`, `-0d0` and `0d-3` are three different
/// values, as Ion requires.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Decimal {
    pub negative: bool,
    pub coefficient: BigUint,
    pub exponent: i32,
}

impl Decimal {
    pub fn new(negative: bool, coefficient: BigUint, exponent: i32) -> Self {
        Self {
            negative,
            coefficient,
            exponent,
        }
    }

    /// The positive zero with exponent 0, encoded as a bare `0x50`.
    pub fn zero() -> Self {
        Self::default()
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.coefficient.is_zero()
    }

    pub fn is_negative_zero(&self) -> bool {
        self.negative && self.is_zero()
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.negative {
            f.write_str("-")?;
        }
        write!(f, "{}d{}", self.coefficient, self.exponent)
    }
}
