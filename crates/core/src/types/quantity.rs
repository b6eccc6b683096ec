//! Fixed-point decimal quantity type.
//!
//! [`Quantity`] uses the same fixed-point representation as [`super::Price`]:
//! `mantissa * 10^(-scale)`. The mantissa is signed (`i64`) so a net short
//! position can be expressed as a negative quantity.
//!
//! [`Quantity::floor_to_step`] snaps a derived size down to the venue's
//! quantity step, which is the only rounding direction that cannot oversize
//! an order.

use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, Neg, Sub};

use serde::{Deserialize, Serialize};

/// Fixed-point decimal representing a quantity (base-asset units).
///
/// `value = mantissa * 10^(-scale)`
#[derive(Clone, Copy, Serialize, Deserialize)]
pub struct Quantity {
    mantissa: i64,
    scale: u8,
}

impl Quantity {
    /// Default scale used when converting from `f64` (8 decimal places).
    pub const DEFAULT_SCALE: u8 = 8;

    /// Create a new quantity from mantissa and scale.
    #[inline]
    pub const fn new(mantissa: i64, scale: u8) -> Self {
        Self { mantissa, scale }
    }

    /// Create a zero quantity with the given scale.
    #[inline]
    pub const fn zero(scale: u8) -> Self {
        Self { mantissa: 0, scale }
    }

    /// Returns `true` if this quantity is zero.
    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.mantissa == 0
    }

    /// Returns `true` if this quantity is negative (net short).
    #[inline]
    pub const fn is_negative(&self) -> bool {
        self.mantissa < 0
    }

    /// Returns `true` if this quantity is strictly positive.
    #[inline]
    pub const fn is_positive(&self) -> bool {
        self.mantissa > 0
    }

    /// Returns the absolute value of this quantity.
    #[inline]
    pub const fn abs(&self) -> Self {
        Self {
            mantissa: self.mantissa.abs(),
            scale: self.scale,
        }
    }

    /// Returns the raw mantissa.
    #[inline]
    pub const fn mantissa(&self) -> i64 {
        self.mantissa
    }

    /// Returns the scale (number of decimal places).
    #[inline]
    pub const fn scale(&self) -> u8 {
        self.scale
    }

    /// Convert to `f64` for P&L math, logging, and display.
    #[inline]
    pub fn to_f64(&self) -> f64 {
        self.mantissa as f64 / 10f64.powi(self.scale as i32)
    }

    /// Round toward zero to the nearest multiple of `step`.
    ///
    /// `step` must be positive.
    pub fn floor_to_step(&self, step: Quantity) -> Quantity {
        assert!(step.is_positive(), "step must be positive");
        let (m, s, scale) =
            Self::normalize(*self, step).expect("Quantity::floor_to_step overflow");
        Quantity {
            mantissa: (m / s) * s,
            scale,
        }
    }

    /// Normalize two quantities to the same (higher) scale.
    #[inline]
    fn normalize(a: Self, b: Self) -> Option<(i64, i64, u8)> {
        if a.scale == b.scale {
            return Some((a.mantissa, b.mantissa, a.scale));
        }

        let (lo, hi, lo_mantissa, hi_mantissa) = if a.scale < b.scale {
            (a.scale, b.scale, a.mantissa, b.mantissa)
        } else {
            (b.scale, a.scale, b.mantissa, a.mantissa)
        };

        let diff = (hi - lo) as u32;
        let factor = 10i64.checked_pow(diff)?;
        let scaled = lo_mantissa.checked_mul(factor)?;

        if a.scale < b.scale {
            Some((scaled, hi_mantissa, hi))
        } else {
            Some((hi_mantissa, scaled, hi))
        }
    }
}

impl fmt::Debug for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Quantity({}, scale={})", self.to_f64(), self.scale)
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.scale == 0 {
            write!(f, "{}", self.mantissa)
        } else {
            let divisor = 10i64.pow(self.scale as u32);
            let whole = self.mantissa / divisor;
            let frac = (self.mantissa % divisor).abs();
            write!(
                f,
                "{}.{:0>width$}",
                whole,
                frac,
                width = self.scale as usize
            )
        }
    }
}

impl PartialEq for Quantity {
    fn eq(&self, other: &Self) -> bool {
        match Self::normalize(*self, *other) {
            Some((a, b, _)) => a == b,
            None => false,
        }
    }
}

impl Eq for Quantity {}

impl PartialOrd for Quantity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Quantity {
    fn cmp(&self, other: &Self) -> Ordering {
        match Self::normalize(*self, *other) {
            Some((a, b, _)) => a.cmp(&b),
            None => self
                .to_f64()
                .partial_cmp(&other.to_f64())
                .unwrap_or(Ordering::Equal),
        }
    }
}

impl Add for Quantity {
    type Output = Self;

    #[inline]
    fn add(self, rhs: Self) -> Self::Output {
        let (a, b, scale) = Self::normalize(self, rhs)
            .expect("Quantity::add overflow during scale normalization");
        Self {
            mantissa: a.checked_add(b).expect("Quantity::add overflow"),
            scale,
        }
    }
}

impl Sub for Quantity {
    type Output = Self;

    #[inline]
    fn sub(self, rhs: Self) -> Self::Output {
        let (a, b, scale) = Self::normalize(self, rhs)
            .expect("Quantity::sub overflow during scale normalization");
        Self {
            mantissa: a.checked_sub(b).expect("Quantity::sub overflow"),
            scale,
        }
    }
}

impl Neg for Quantity {
    type Output = Self;

    #[inline]
    fn neg(self) -> Self::Output {
        Self {
            mantissa: -self.mantissa,
            scale: self.scale,
        }
    }
}

impl From<f64> for Quantity {
    /// Convert an `f64` to a `Quantity` at [`Quantity::DEFAULT_SCALE`].
    fn from(value: f64) -> Self {
        let factor = 10f64.powi(Self::DEFAULT_SCALE as i32);
        Self {
            mantissa: (value * factor).round() as i64,
            scale: Self::DEFAULT_SCALE,
        }
    }
}
