//! Fixed-point frame positions.
//!
//! Every stream-relative offset in the mixer is a [`FixedFrame`]: a signed frame count scaled by
//! `2^FRAC_BITS`. Whole frames are `raw >> FRAC_BITS`; the low bits are the sub-frame fraction.

use std::fmt;
use std::ops::{Add, AddAssign, Mul, Neg, Sub, SubAssign};

/// Number of fractional bits carried by [`FixedFrame`]. Shared by every component.
pub const FRAC_BITS: u32 = 13;

/// One whole frame in raw sub-frame units.
pub const FRAC_ONE: i64 = 1 << FRAC_BITS;

/// Half a frame in raw sub-frame units.
pub const FRAC_HALF: i64 = FRAC_ONE >> 1;

const FRAC_MASK: i64 = FRAC_ONE - 1;

/// Signed frame position or delta with [`FRAC_BITS`] bits of sub-frame precision.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FixedFrame(i64);

impl FixedFrame {
    /// Zero frames.
    pub const ZERO: Self = Self(0);
    /// Exactly one frame.
    pub const ONE: Self = Self(FRAC_ONE);
    /// Exactly half a frame.
    pub const HALF: Self = Self(FRAC_HALF);
    /// Smallest representable step (one sub-frame).
    pub const EPSILON: Self = Self(1);

    /// Wrap a raw sub-frame count.
    pub const fn from_raw(raw: i64) -> Self {
        Self(raw)
    }

    /// Position of a whole frame.
    pub const fn from_frames(frames: i64) -> Self {
        Self(frames << FRAC_BITS)
    }

    /// Raw sub-frame count.
    pub const fn raw(self) -> i64 {
        self.0
    }

    /// Whole frames, rounding toward negative infinity.
    pub const fn floor(self) -> i64 {
        self.0 >> FRAC_BITS
    }

    /// Whole frames, rounding toward positive infinity.
    pub const fn ceil(self) -> i64 {
        (self.0 + FRAC_MASK) >> FRAC_BITS
    }

    /// Whole frames, rounding to nearest with ties up.
    pub const fn round(self) -> i64 {
        (self.0 + FRAC_HALF) >> FRAC_BITS
    }

    /// Sub-frame remainder, always in `[0, ONE)`.
    pub const fn fraction(self) -> Self {
        Self(self.0 & FRAC_MASK)
    }

    /// Absolute value.
    pub const fn abs(self) -> Self {
        Self(self.0.abs())
    }

    /// Approximate value in frames, for diagnostics only.
    pub fn as_f64(self) -> f64 {
        self.0 as f64 / FRAC_ONE as f64
    }

    /// Saturating addition.
    pub const fn saturating_add(self, rhs: Self) -> Self {
        Self(self.0.saturating_add(rhs.0))
    }

    /// Saturating subtraction.
    pub const fn saturating_sub(self, rhs: Self) -> Self {
        Self(self.0.saturating_sub(rhs.0))
    }
}

impl Add for FixedFrame {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self(self.0 + rhs.0)
    }
}

impl AddAssign for FixedFrame {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl Sub for FixedFrame {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self(self.0 - rhs.0)
    }
}

impl SubAssign for FixedFrame {
    fn sub_assign(&mut self, rhs: Self) {
        self.0 -= rhs.0;
    }
}

impl Neg for FixedFrame {
    type Output = Self;

    fn neg(self) -> Self {
        Self(-self.0)
    }
}

impl Mul<i64> for FixedFrame {
    type Output = Self;

    fn mul(self, rhs: i64) -> Self {
        Self(self.0 * rhs)
    }
}

impl fmt::Debug for FixedFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FixedFrame({self})")
    }
}

impl fmt::Display for FixedFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}+{}/{}",
            self.floor(),
            self.fraction().raw(),
            FRAC_ONE
        )
    }
}
