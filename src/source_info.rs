//! Long-running position ledger for one source.

use crate::bookkeeping::Bookkeeping;
use crate::clock::{ClockMapping, VersionedMapping};
use crate::fixed::FixedFrame;
use crate::position::StepRate;

/// Position state of a source that survives across mix calls.
///
/// `next_dest_frame` is the destination frame the orchestrator is expected to produce next and
/// `next_source_frame` the source position that lines up with it. When the orchestrator asks for a
/// different destination frame the running positions are stale and must be reset from the
/// destination-to-source mapping instead of being advanced.
#[derive(Clone, Debug, Default)]
pub struct SourceInfo {
    next_dest_frame: Option<i64>,
    next_source_frame: FixedFrame,
    source_pos_error_ns: i64,

    ref_time_to_frac_source: Option<VersionedMapping>,
    frac_source_to_ref_time: Option<ClockMapping>,
    dest_frames_to_frac_source: Option<ClockMapping>,
}

impl SourceInfo {
    /// Ledger with no positions and no mappings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Destination frame the running positions line up with, if any.
    pub fn next_dest_frame(&self) -> Option<i64> {
        self.next_dest_frame
    }

    /// Source position aligned with [`next_dest_frame`](Self::next_dest_frame).
    pub fn next_source_frame(&self) -> FixedFrame {
        self.next_source_frame
    }

    /// Last measured difference between the running source position and the mapping, in
    /// nanoseconds of the source's reference clock. Positive means the running position is ahead.
    pub fn source_pos_error_ns(&self) -> i64 {
        self.source_pos_error_ns
    }

    /// Reference time to source sub-frame mapping last received from the stream.
    pub fn ref_time_to_frac_source(&self) -> Option<&VersionedMapping> {
        self.ref_time_to_frac_source.as_ref()
    }

    /// Source sub-frame to reference time mapping (inverse of the stream mapping).
    pub fn frac_source_to_ref_time(&self) -> Option<&ClockMapping> {
        self.frac_source_to_ref_time.as_ref()
    }

    /// Destination frame to source sub-frame mapping for the current pass.
    pub fn dest_frames_to_frac_source(&self) -> Option<&ClockMapping> {
        self.dest_frames_to_frac_source.as_ref()
    }

    /// Record the stream's mapping. Returns true, and drops the derived destination mapping, when
    /// the generation differs from the one already held.
    pub fn update_source_mapping(&mut self, versioned: VersionedMapping) -> bool {
        if self
            .ref_time_to_frac_source
            .is_some_and(|current| current.generation == versioned.generation)
        {
            return false;
        }
        self.frac_source_to_ref_time = if versioned.mapping.rate.is_zero() {
            None
        } else {
            Some(versioned.mapping.inverse())
        };
        self.ref_time_to_frac_source = Some(versioned);
        self.dest_frames_to_frac_source = None;
        true
    }

    /// Install a freshly composed destination mapping.
    pub fn set_dest_mapping(&mut self, mapping: ClockMapping) {
        self.dest_frames_to_frac_source = Some(mapping);
    }

    /// Force the destination mapping to be recomposed on the next pass.
    pub fn invalidate_dest_mapping(&mut self) {
        self.dest_frames_to_frac_source = None;
    }

    /// Record positions reached by a mix call.
    pub fn set_next_positions(&mut self, dest_frame: i64, source_frame: FixedFrame) {
        self.next_dest_frame = Some(dest_frame);
        self.next_source_frame = source_frame;
    }

    /// Re-derive running positions for `dest_frame` from the destination mapping, seeding the
    /// remainder in `bookkeeping` with the mapping's exact sub-frame residue.
    ///
    /// Panics if no destination mapping is installed.
    pub fn reset_positions(&mut self, dest_frame: i64, bookkeeping: &mut Bookkeeping) {
        let mapping = self
            .dest_frames_to_frac_source
            .expect("reset_positions requires a destination mapping");
        let (source_raw, remainder) = mapping.apply_with_remainder(dest_frame);
        let mapping_denominator = mapping.rate.reference_delta();
        let modulo = if mapping_denominator == bookkeeping.denominator() {
            remainder
        } else {
            (remainder as u128 * bookkeeping.denominator() as u128 / mapping_denominator as u128)
                as u64
        };

        self.next_dest_frame = Some(dest_frame);
        self.next_source_frame = FixedFrame::from_raw(source_raw);
        self.source_pos_error_ns = 0;
        bookkeeping.set_source_pos_modulo(modulo);
    }

    /// Advance running positions by `dest_frames` without producing output.
    ///
    /// Used for frames that stay silent (underflow, gaps, muted mixes) so the next pass still
    /// lines up. The gain ramp advances along with the positions.
    pub fn advance_running_positions_by(&mut self, dest_frames: u64, bookkeeping: &mut Bookkeeping) {
        let Some(next_dest_frame) = self.next_dest_frame else {
            return;
        };
        if dest_frames == 0 {
            return;
        }
        let (source_raw, modulo) = StepRate::of(bookkeeping).advance(
            self.next_source_frame.raw(),
            bookkeeping.source_pos_modulo(),
            dest_frames,
        );
        self.next_dest_frame = Some(next_dest_frame + dest_frames as i64);
        self.next_source_frame = FixedFrame::from_raw(source_raw);
        bookkeeping.set_source_pos_modulo(modulo);
        bookkeeping.gain.advance(dest_frames);
    }

    /// Advance running positions forward to `dest_frame`.
    ///
    /// Panics if `dest_frame` is behind the running position.
    pub fn advance_all_positions_to(&mut self, dest_frame: i64, bookkeeping: &mut Bookkeeping) {
        let Some(next_dest_frame) = self.next_dest_frame else {
            return;
        };
        assert!(
            dest_frame >= next_dest_frame,
            "cannot move positions backwards from {next_dest_frame} to {dest_frame}"
        );
        self.advance_running_positions_by((dest_frame - next_dest_frame) as u64, bookkeeping);
    }

    /// Compare the running source position for `dest_frame` against the mapping and record the
    /// difference in nanoseconds. Returns `None` when positions or mappings are missing.
    pub fn measure_position_error(&mut self, dest_frame: i64) -> Option<i64> {
        if self.next_dest_frame != Some(dest_frame) {
            return None;
        }
        let expected = self.dest_frames_to_frac_source?.apply(dest_frame);
        let to_ref = self.frac_source_to_ref_time?;
        let delta = self.next_source_frame.raw() - expected;
        let error_ns = to_ref.rate.scale(delta);
        self.source_pos_error_ns = error_ns;
        Some(error_ns)
    }

    /// Forget running positions and accumulated error.
    pub fn reset(&mut self) {
        self.next_dest_frame = None;
        self.source_pos_error_ns = 0;
    }
}
