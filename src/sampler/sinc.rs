use std::sync::Arc;

use dasp_frame::Frame;

use crate::fixed::{FRAC_BITS, FixedFrame};

use super::filter::FilterTable;
use super::read_frame;

/// Band-limited sampler convolving a windowed-sinc kernel around each position.
///
/// Positions near the start of a buffer reach back into the previous buffer, so the tail of every
/// consumed buffer is kept in `history`.
#[derive(Clone, Debug)]
pub struct SincSampler {
    table: Arc<FilterTable>,
    channels: usize,
    history_frames: usize,
    history: Vec<f32>,
}

impl SincSampler {
    /// Sampler over `channels`-channel interleaved frames using `table`.
    pub fn new(table: Arc<FilterTable>, channels: usize) -> Self {
        // Reaches back to `-(pos + neg)` sub-frames before the buffer start.
        let history_frames = 2 * table.side_frames();
        Self {
            table,
            channels,
            history_frames,
            history: vec![0.0; history_frames * channels],
        }
    }

    /// Positive filter width: the kernel reach minus one sub-frame.
    pub fn pos_filter_width(&self) -> FixedFrame {
        FixedFrame::from_frames(self.table.side_frames() as i64) - FixedFrame::EPSILON
    }

    /// Negative filter width: the kernel reach.
    pub fn neg_filter_width(&self) -> FixedFrame {
        FixedFrame::from_frames(self.table.side_frames() as i64)
    }

    /// Shared coefficient table.
    pub fn table(&self) -> &Arc<FilterTable> {
        &self.table
    }

    /// Frames kept from previous buffers.
    pub fn history_frames(&self) -> usize {
        self.history_frames
    }

    /// Filtered frame at `offset`.
    pub fn sample<S: Frame<Sample = f32>>(&self, source: &[f32], offset: FixedFrame) -> S {
        let position = offset.raw();
        let first = -(self.neg_filter_width().raw() - position).div_euclid(1 << FRAC_BITS);
        let last = (position + self.pos_filter_width().raw()) >> FRAC_BITS;

        let mut acc = S::EQUILIBRIUM;
        for index in first..=last {
            let coefficient = self.table.coefficient((index << FRAC_BITS) - position);
            if coefficient == 0.0 {
                continue;
            }
            acc = acc.add_amp(self.frame_at::<S>(source, index).scale_amp(coefficient));
        }
        acc
    }

    fn frame_at<S: Frame<Sample = f32>>(&self, source: &[f32], index: i64) -> S {
        if index >= 0 {
            return read_frame(source, index as usize);
        }
        let slot = self.history_frames as i64 + index;
        debug_assert!(slot >= 0, "frame {index} is older than the kept history");
        read_frame(&self.history, slot.max(0) as usize)
    }

    /// Remember the tail of a consumed buffer.
    pub fn cache_history(&mut self, source: &[f32]) {
        debug_assert_eq!(source.len() % self.channels, 0, "partial frame in source");
        let kept = self.history.len();
        if source.len() >= kept {
            self.history.copy_from_slice(&source[source.len() - kept..]);
        } else {
            self.history.copy_within(source.len().., 0);
            self.history[kept - source.len()..].copy_from_slice(source);
        }
    }

    /// Forget previous buffers.
    pub fn reset(&mut self) {
        self.history.fill(0.0);
    }
}
