//! Per-mixer rate and position remainder state.

use crate::clock::TimelineRate;
use crate::fixed::FixedFrame;
use crate::gain::Gain;

/// Rate parameters and accumulated sub-step remainder owned by one [`Mixer`](crate::mixer::Mixer).
///
/// `step_size` is the fixed-point number of source sub-frames consumed per destination frame. The
/// true ratio of two sample rates is rational but generally not representable in
/// [`FRAC_BITS`](crate::fixed::FRAC_BITS) bits, so the leftover `rate_modulo / denominator` is
/// accumulated in `source_pos_modulo` and carried into the source position whenever it overflows.
#[derive(Clone, Debug)]
pub struct Bookkeeping {
    step_size: FixedFrame,
    rate_modulo: u64,
    denominator: u64,
    source_pos_modulo: u64,
    /// Gain applied to every produced frame.
    pub gain: Gain,
}

impl Default for Bookkeeping {
    fn default() -> Self {
        Self {
            step_size: FixedFrame::ONE,
            rate_modulo: 0,
            denominator: 1,
            source_pos_modulo: 0,
            gain: Gain::new(),
        }
    }
}

impl Bookkeeping {
    /// Unity step, no remainder, unity gain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Source sub-frames per destination frame.
    pub fn step_size(&self) -> FixedFrame {
        self.step_size
    }

    /// Numerator of the rate remainder.
    pub fn rate_modulo(&self) -> u64 {
        self.rate_modulo
    }

    /// Denominator of the rate remainder.
    pub fn denominator(&self) -> u64 {
        self.denominator
    }

    /// Accumulated remainder numerator, always below `denominator`.
    pub fn source_pos_modulo(&self) -> u64 {
        self.source_pos_modulo
    }

    /// Overwrite the accumulated remainder.
    pub fn set_source_pos_modulo(&mut self, source_pos_modulo: u64) {
        assert!(
            source_pos_modulo < self.denominator,
            "source_pos_modulo {source_pos_modulo} must be below denominator {}",
            self.denominator
        );
        self.source_pos_modulo = source_pos_modulo;
    }

    /// Install new rate parameters.
    ///
    /// When the denominator changes, the accumulated remainder is rescaled by `new / old` with a
    /// 128-bit intermediate so the fraction of a sub-frame already accumulated is kept.
    pub fn set_rate(&mut self, step_size: FixedFrame, rate_modulo: u64, denominator: u64) {
        assert!(step_size > FixedFrame::ZERO, "step_size must be positive, got {step_size}");
        assert!(denominator > 0, "denominator must be positive");
        assert!(
            rate_modulo < denominator,
            "rate_modulo {rate_modulo} must be below denominator {denominator}"
        );

        if denominator != self.denominator {
            let rescaled = self.source_pos_modulo as u128 * denominator as u128
                / self.denominator as u128;
            self.source_pos_modulo = rescaled as u64;
            self.denominator = denominator;
        }
        self.step_size = step_size;
        self.rate_modulo = rate_modulo;
    }

    /// Install rate parameters from a destination-frame to source-sub-frame rate.
    pub fn set_rate_from(&mut self, dest_to_frac_source: TimelineRate) {
        let numerator = dest_to_frac_source.subject_delta();
        let denominator = dest_to_frac_source.reference_delta();
        let step_size = FixedFrame::from_raw((numerator / denominator) as i64);
        let rate_modulo = numerator % denominator;
        self.set_rate(step_size, rate_modulo, denominator);
    }

    /// Forget accumulated remainder after a discontinuity.
    pub fn reset(&mut self) {
        self.source_pos_modulo = 0;
    }
}
