//! Joint advancement of destination and source positions.
//!
//! A mix call walks a destination window `[dest_offset, dest_frames)` and a source buffer of
//! `source_frames` frames at the same time. Each destination frame moves the source position by
//! `step_size` sub-frames plus an exact-rational correction: `rate_modulo` is added to
//! `source_pos_modulo` and every time that reaches `denominator` the source moves one extra sub-frame.
//!
//! The correction is integer-only so two runs over identical input produce identical timing.
//! [`PositionManager::advance_to_end`] reaches the same state as repeated
//! [`PositionManager::advance_one`] calls in closed form.

use crate::bookkeeping::Bookkeeping;
use crate::fixed::{FRAC_BITS, FixedFrame};

/// Rate parameters copied out of a [`Bookkeeping`] for the duration of one call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StepRate {
    /// Sub-frames per destination frame.
    pub step_size: i64,
    /// Remainder numerator.
    pub rate_modulo: u64,
    /// Remainder denominator.
    pub denominator: u64,
}

impl StepRate {
    /// Rate parameters of `bookkeeping`.
    pub fn of(bookkeeping: &Bookkeeping) -> Self {
        Self {
            step_size: bookkeeping.step_size().raw(),
            rate_modulo: bookkeeping.rate_modulo(),
            denominator: bookkeeping.denominator(),
        }
    }

    /// Source position and remainder after `steps` destination frames, starting from
    /// `(source_offset, source_pos_modulo)`.
    pub fn advance(&self, source_offset: i64, source_pos_modulo: u64, steps: u64) -> (i64, u64) {
        let mut offset = source_offset as i128 + steps as i128 * self.step_size as i128;
        let mut modulo = source_pos_modulo;
        if self.rate_modulo != 0 {
            let total = source_pos_modulo as u128 + steps as u128 * self.rate_modulo as u128;
            let denominator = self.denominator as u128;
            offset += (total / denominator) as i128;
            modulo = (total % denominator) as u64;
        }
        (offset as i64, modulo)
    }

    /// Smallest step count in `[0, max_steps]` at which the source position reaches `target`, or
    /// `max_steps` if it never does within that range.
    pub fn steps_until(
        &self,
        source_offset: i64,
        source_pos_modulo: u64,
        target: i64,
        max_steps: u64,
    ) -> u64 {
        if source_offset >= target || max_steps == 0 {
            return 0;
        }
        let distance = (target - source_offset) as u128;
        let estimate = distance.div_ceil(self.step_size as u128);
        let mut steps = estimate.min(max_steps as u128) as u64;

        // The estimate ignores remainder carries, which only ever move the source further, so it can
        // overshoot by a few steps but never undershoot.
        while steps > 0 && self.advance(source_offset, source_pos_modulo, steps - 1).0 >= target {
            steps -= 1;
        }
        steps
    }
}

/// Destination/source cursor pair for one mix call.
#[derive(Clone, Debug)]
pub struct PositionManager {
    pos_filter_width: i64,
    neg_filter_width: i64,

    dest_frames: usize,
    dest_offset: usize,

    source_frames: usize,
    source_offset: i64,
    source_end: i64,

    rate: StepRate,
    source_pos_modulo: u64,
}

impl PositionManager {
    /// Cursor for a sampler with the given filter widths.
    pub fn new(pos_filter_width: FixedFrame, neg_filter_width: FixedFrame) -> Self {
        assert!(pos_filter_width >= FixedFrame::ZERO, "negative positive filter width");
        assert!(neg_filter_width >= FixedFrame::ZERO, "negative negative filter width");
        Self {
            pos_filter_width: pos_filter_width.raw(),
            neg_filter_width: neg_filter_width.raw(),
            dest_frames: 0,
            dest_offset: 0,
            source_frames: 0,
            source_offset: 0,
            source_end: 0,
            rate: StepRate {
                step_size: FixedFrame::ONE.raw(),
                rate_modulo: 0,
                denominator: 1,
            },
            source_pos_modulo: 0,
        }
    }

    /// Set the destination window. Panics unless `dest_offset < dest_frames`.
    pub fn set_dest_values(&mut self, dest_frames: usize, dest_offset: usize) {
        assert!(
            dest_offset < dest_frames,
            "dest_offset {dest_offset} must be below dest_frames {dest_frames}"
        );
        self.dest_frames = dest_frames;
        self.dest_offset = dest_offset;
    }

    /// Set the source window. Panics if the filter window around `source_offset` lies entirely
    /// before the buffer.
    pub fn set_source_values(&mut self, source_frames: usize, source_offset: FixedFrame) {
        assert!(
            source_offset.raw() + self.neg_filter_width > 0,
            "source_offset {source_offset} is beyond the negative filter width {}",
            self.neg_filter_width
        );
        self.source_frames = source_frames;
        self.source_offset = source_offset.raw();
        self.source_end = ((source_frames as i64) << FRAC_BITS) - self.pos_filter_width;
    }

    /// Copy the rate parameters and accumulated remainder from `bookkeeping`.
    pub fn set_rate_values(&mut self, bookkeeping: &Bookkeeping) {
        let rate = StepRate::of(bookkeeping);
        let source_pos_modulo = bookkeeping.source_pos_modulo();
        assert!(rate.step_size > 0, "step_size must be positive");
        assert!(
            rate.rate_modulo < rate.denominator,
            "rate_modulo {} must be below denominator {}",
            rate.rate_modulo,
            rate.denominator
        );
        assert!(
            source_pos_modulo < rate.denominator,
            "source_pos_modulo {source_pos_modulo} must be below denominator {}",
            rate.denominator
        );
        self.rate = rate;
        self.source_pos_modulo = source_pos_modulo;
    }

    /// Current destination frame.
    pub fn dest_offset(&self) -> usize {
        self.dest_offset
    }

    /// Current source position relative to the start of the source buffer.
    pub fn source_offset(&self) -> FixedFrame {
        FixedFrame::from_raw(self.source_offset)
    }

    /// Current remainder numerator.
    pub fn source_pos_modulo(&self) -> u64 {
        self.source_pos_modulo
    }

    /// Frames in the source buffer.
    pub fn source_frames(&self) -> usize {
        self.source_frames
    }

    /// True once the filter window around the current position extends past the buffer end.
    pub fn source_is_consumed(&self) -> bool {
        self.source_offset >= self.source_end
    }

    /// True while destination space remains and the source is not consumed.
    pub fn frame_can_be_mixed(&self) -> bool {
        self.dest_offset < self.dest_frames && !self.source_is_consumed()
    }

    /// Advance by exactly one destination frame.
    pub fn advance_one(&mut self) {
        self.dest_offset += 1;
        self.source_offset += self.rate.step_size;
        self.source_pos_modulo += self.rate.rate_modulo;
        if self.source_pos_modulo >= self.rate.denominator {
            self.source_pos_modulo -= self.rate.denominator;
            self.source_offset += 1;
        }
    }

    /// Advance as far as both windows allow. Returns the destination frames advanced.
    pub fn advance_to_end(&mut self) -> usize {
        if !self.frame_can_be_mixed() {
            return 0;
        }
        let remaining = (self.dest_frames - self.dest_offset) as u64;
        let steps = self.rate.steps_until(
            self.source_offset,
            self.source_pos_modulo,
            self.source_end,
            remaining,
        );
        let (source_offset, source_pos_modulo) =
            self.rate
                .advance(self.source_offset, self.source_pos_modulo, steps);
        self.source_offset = source_offset;
        self.source_pos_modulo = source_pos_modulo;
        self.dest_offset += steps as usize;
        steps as usize
    }

    /// Write the cursor back into the caller's offsets and `bookkeeping`.
    pub fn update_offsets(
        &self,
        dest_offset: &mut usize,
        source_offset: &mut FixedFrame,
        bookkeeping: &mut Bookkeeping,
    ) {
        *dest_offset = self.dest_offset;
        *source_offset = FixedFrame::from_raw(self.source_offset);
        bookkeeping.set_source_pos_modulo(self.source_pos_modulo);
    }
}
