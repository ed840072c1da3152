//! Exact-rational timeline arithmetic.
//!
//! A [`ClockMapping`] is an affine function between two time or frame domains. Rates are kept as
//! reduced `u64` fractions and all scaling goes through 128-bit intermediates so that composing
//! nanosecond clocks with sub-frame positions never silently truncates.

use std::time::Instant;

use once_cell::sync::Lazy;

use crate::fixed::FRAC_BITS;

/// Nanoseconds per second.
pub const NANOS_PER_SECOND: u64 = 1_000_000_000;

fn gcd(mut a: u128, mut b: u128) -> u128 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

/// Reduced ratio `subject_delta / reference_delta`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TimelineRate {
    subject_delta: u64,
    reference_delta: u64,
}

impl TimelineRate {
    /// Identity rate.
    pub const ONE: Self = Self {
        subject_delta: 1,
        reference_delta: 1,
    };

    /// Zero rate (a paused timeline).
    pub const ZERO: Self = Self {
        subject_delta: 0,
        reference_delta: 1,
    };

    /// Build a reduced rate. `reference_delta` must be non-zero.
    pub fn new(subject_delta: u64, reference_delta: u64) -> Self {
        assert!(reference_delta != 0, "timeline rate with zero reference delta");
        if subject_delta == 0 {
            return Self::ZERO;
        }
        let divisor = gcd(subject_delta as u128, reference_delta as u128) as u64;
        Self {
            subject_delta: subject_delta / divisor,
            reference_delta: reference_delta / divisor,
        }
    }

    /// Whole frames per nanosecond for a stream running at `frames_per_second`.
    pub fn frames_per_ns(frames_per_second: u32) -> Self {
        Self::new(frames_per_second as u64, NANOS_PER_SECOND)
    }

    /// Fractional (sub-frame) positions per nanosecond for a stream at `frames_per_second`.
    pub fn frac_frames_per_ns(frames_per_second: u32) -> Self {
        Self::new((frames_per_second as u64) << FRAC_BITS, NANOS_PER_SECOND)
    }

    /// Numerator.
    pub fn subject_delta(&self) -> u64 {
        self.subject_delta
    }

    /// Denominator.
    pub fn reference_delta(&self) -> u64 {
        self.reference_delta
    }

    /// True for a paused timeline.
    pub fn is_zero(&self) -> bool {
        self.subject_delta == 0
    }

    /// Swap numerator and denominator. Panics on a zero rate.
    pub fn inverse(&self) -> Self {
        assert!(!self.is_zero(), "inverse of a zero timeline rate");
        Self {
            subject_delta: self.reference_delta,
            reference_delta: self.subject_delta,
        }
    }

    /// `value * rate`, rounded toward negative infinity.
    pub fn scale(&self, value: i64) -> i64 {
        self.scale_with_remainder(value).0
    }

    /// `value * rate` as a floored quotient plus the exact remainder over `reference_delta`.
    pub fn scale_with_remainder(&self, value: i64) -> (i64, u64) {
        let product = value as i128 * self.subject_delta as i128;
        let denom = self.reference_delta as i128;
        let quotient = product.div_euclid(denom);
        let remainder = product.rem_euclid(denom);
        let quotient = quotient.clamp(i64::MIN as i128, i64::MAX as i128) as i64;
        (quotient, remainder as u64)
    }

    /// Product of two rates. The flag is false when the exact product did not fit in `u64` terms
    /// and had to be approximated.
    pub fn product(a: Self, b: Self) -> (Self, bool) {
        let mut num = a.subject_delta as u128 * b.subject_delta as u128;
        let mut den = a.reference_delta as u128 * b.reference_delta as u128;
        if num == 0 {
            return (Self::ZERO, true);
        }
        let divisor = gcd(num, den);
        num /= divisor;
        den /= divisor;

        let mut exact = true;
        while num > u64::MAX as u128 || den > u64::MAX as u128 {
            num >>= 1;
            den >>= 1;
            exact = false;
        }
        let num = num.max(1) as u64;
        let den = den.max(1) as u64;
        (Self::new(num, den), exact)
    }
}

/// Affine function `subject = subject_time + (reference - reference_time) * rate`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClockMapping {
    /// Subject-domain value at the anchor point.
    pub subject_time: i64,
    /// Reference-domain value at the anchor point.
    pub reference_time: i64,
    /// Subject units per reference unit.
    pub rate: TimelineRate,
}

impl ClockMapping {
    /// Build a mapping anchored at `(reference_time, subject_time)`.
    pub fn new(reference_time: i64, subject_time: i64, rate: TimelineRate) -> Self {
        Self {
            subject_time,
            reference_time,
            rate,
        }
    }

    /// Map a reference value into the subject domain.
    pub fn apply(&self, reference: i64) -> i64 {
        self.apply_with_remainder(reference).0
    }

    /// Map a reference value, returning the sub-unit remainder over `rate.reference_delta()`.
    pub fn apply_with_remainder(&self, reference: i64) -> (i64, u64) {
        let (scaled, remainder) = self.rate.scale_with_remainder(reference - self.reference_time);
        (self.subject_time.saturating_add(scaled), remainder)
    }

    /// Map a subject value back into the reference domain. Panics on a zero rate.
    pub fn apply_inverse(&self, subject: i64) -> i64 {
        self.reference_time + self.rate.inverse().scale(subject - self.subject_time)
    }

    /// The inverse mapping. Panics on a zero rate.
    pub fn inverse(&self) -> Self {
        Self {
            subject_time: self.reference_time,
            reference_time: self.subject_time,
            rate: self.rate.inverse(),
        }
    }

    /// `outer ∘ inner`: first apply `inner`, then `outer`.
    ///
    /// The second element is false when the composed rate had to be approximated.
    pub fn compose(outer: &Self, inner: &Self) -> (Self, bool) {
        let (rate, exact) = TimelineRate::product(outer.rate, inner.rate);
        let mapping = Self {
            subject_time: outer.apply(inner.subject_time),
            reference_time: inner.reference_time,
            rate,
        };
        (mapping, exact)
    }
}

/// A mapping tagged with a monotonically increasing generation.
///
/// Producers replace the mapping wholesale and bump the generation; consumers compare generations to
/// detect staleness without comparing mappings.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VersionedMapping {
    /// Current mapping.
    pub mapping: ClockMapping,
    /// Generation the mapping was published at.
    pub generation: u64,
}

static CLOCK_ANCHOR: Lazy<Instant> = Lazy::new(Instant::now);

/// Monotonic timestamp in nanoseconds, anchored at first use.
pub fn monotonic_time_ns() -> i64 {
    let elapsed = CLOCK_ANCHOR.elapsed();
    (elapsed.as_secs() as i64) * NANOS_PER_SECOND as i64 + elapsed.subsec_nanos() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixed::FRAC_ONE;

    #[test]
    fn rates_are_reduced() {
        let rate = TimelineRate::new(48_000, 1_000_000_000);
        assert_eq!(rate.subject_delta(), 6);
        assert_eq!(rate.reference_delta(), 125_000);
    }

    #[test]
    fn scale_floors_negative_values() {
        let rate = TimelineRate::new(1, 3);
        assert_eq!(rate.scale(4), 1);
        assert_eq!(rate.scale(-4), -2);
        assert_eq!(rate.scale_with_remainder(-4), (-2, 2));
    }

    #[test]
    fn composing_stream_and_stage_yields_exact_step() {
        let stage = ClockMapping::new(0, 0, TimelineRate::frames_per_ns(48_000));
        let stream = ClockMapping::new(0, 0, TimelineRate::frac_frames_per_ns(48_000));
        let (dest_to_source, exact) = ClockMapping::compose(&stream, &stage.inverse());
        assert!(exact);
        assert_eq!(dest_to_source.rate, TimelineRate::new(FRAC_ONE as u64, 1));
        assert_eq!(dest_to_source.apply(10), 10 * FRAC_ONE);
    }

    #[test]
    fn composing_mismatched_rates_keeps_the_remainder() {
        let stage = ClockMapping::new(0, 0, TimelineRate::frames_per_ns(48_000));
        let stream = ClockMapping::new(0, 0, TimelineRate::frac_frames_per_ns(44_100));
        let (dest_to_source, _) = ClockMapping::compose(&stream, &stage.inverse());
        // 44100 * 8192 / 48000 == 7526.4
        assert_eq!(dest_to_source.rate.scale(1), 7526);
        assert_eq!(dest_to_source.rate.scale(5), 37632);
        let (_, remainder) = dest_to_source.apply_with_remainder(1);
        assert_eq!(remainder * 5, dest_to_source.rate.reference_delta() * 2);
    }

    #[test]
    fn inverse_round_trips_anchor() {
        let mapping = ClockMapping::new(1_000, 50, TimelineRate::new(3, 2));
        assert_eq!(mapping.apply(1_000), 50);
        assert_eq!(mapping.apply(1_004), 56);
        assert_eq!(mapping.apply_inverse(56), 1_004);
    }
}
