use dasp_frame::Frame;

use crate::fixed::{FRAC_BITS, FRAC_HALF, FixedFrame};

use super::read_frame;

/// Nearest-neighbour sampler.
///
/// A position exactly halfway between two frames picks the earlier one.
#[derive(Clone, Copy, Debug, Default)]
pub struct PointSampler;

impl PointSampler {
    /// Positive filter width: just under half a frame.
    pub const POS_FILTER_WIDTH: FixedFrame = FixedFrame::from_raw(FRAC_HALF - 1);
    /// Negative filter width: half a frame.
    pub const NEG_FILTER_WIDTH: FixedFrame = FixedFrame::HALF;

    /// Frame nearest to `offset`. `offset` must lie inside the mixable window of `source`.
    pub fn sample<S: Frame<Sample = f32>>(&self, source: &[f32], offset: FixedFrame) -> S {
        let index = (offset.raw() + FRAC_HALF - 1) >> FRAC_BITS;
        debug_assert!(index >= 0, "point sample before buffer start at {offset}");
        read_frame(source, index as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_nearest_frame_and_rounds_ties_down() {
        let source = [10.0f32, 20.0, 30.0];
        let sampler = PointSampler;
        let at = |raw: i64| sampler.sample::<[f32; 1]>(&source, FixedFrame::from_raw(raw))[0];

        assert_eq!(at(0), 10.0);
        assert_eq!(at(-FRAC_HALF + 1), 10.0);
        assert_eq!(at(FRAC_HALF - 1), 10.0);
        assert_eq!(at(FRAC_HALF), 10.0);
        assert_eq!(at(FRAC_HALF + 1), 20.0);
        assert_eq!(at(2 << FRAC_BITS), 30.0);
    }
}
