//! Source samplers.
//!
//! A sampler turns a fractional source position into one output frame. Each sampler reaches
//! `pos_filter_width` sub-frames forward and `neg_filter_width` sub-frames back from the position;
//! the mixer only samples positions whose whole window lies inside the available data.

use std::sync::Arc;

use dasp_frame::Frame;

use crate::fixed::FixedFrame;

pub mod filter;
/// Nearest-neighbour sampler.
pub mod point;
/// Windowed-sinc sampler.
pub mod sinc;

pub use filter::FilterTable;
pub use point::PointSampler;
pub use sinc::SincSampler;

/// Default kernel reach of the windowed-sinc sampler, in frames per side.
pub const DEFAULT_SINC_SIDE_FRAMES: usize = 12;

/// Highest source/destination rate ratio the windowed-sinc sampler accepts.
pub const MAX_SINC_DOWNSAMPLE_RATIO: u32 = 4;

/// Sampling strategy owned by a [`Mixer`](crate::mixer::Mixer).
#[derive(Clone, Debug)]
pub enum Sampler {
    /// Nearest neighbour.
    Point(PointSampler),
    /// Windowed sinc.
    WindowedSinc(SincSampler),
}

impl Sampler {
    /// Nearest-neighbour sampler.
    pub fn point() -> Self {
        Sampler::Point(PointSampler)
    }

    /// Windowed-sinc sampler with `side_frames` of reach, low-passed for `source_rate` to
    /// `dest_rate` conversion.
    pub fn windowed_sinc(side_frames: usize, source_rate: u32, dest_rate: u32, channels: usize) -> Self {
        let cutoff = (dest_rate as f64 / source_rate as f64).min(1.0);
        let table = Arc::new(FilterTable::windowed_sinc(side_frames, cutoff));
        Self::windowed_sinc_with_table(table, channels)
    }

    /// Windowed-sinc sampler convolving with a caller-supplied kernel.
    pub fn windowed_sinc_with_table(table: Arc<FilterTable>, channels: usize) -> Self {
        Sampler::WindowedSinc(SincSampler::new(table, channels))
    }

    /// How far past the sampling position the filter reads.
    pub fn pos_filter_width(&self) -> FixedFrame {
        match self {
            Sampler::Point(_) => PointSampler::POS_FILTER_WIDTH,
            Sampler::WindowedSinc(sinc) => sinc.pos_filter_width(),
        }
    }

    /// How far before the sampling position the filter reads.
    pub fn neg_filter_width(&self) -> FixedFrame {
        match self {
            Sampler::Point(_) => PointSampler::NEG_FILTER_WIDTH,
            Sampler::WindowedSinc(sinc) => sinc.neg_filter_width(),
        }
    }

    /// Keep whatever a sampler needs from a buffer that has been fully consumed.
    pub fn cache_history(&mut self, source: &[f32]) {
        if let Sampler::WindowedSinc(sinc) = self {
            sinc.cache_history(source);
        }
    }

    /// Drop state carried over from earlier buffers.
    pub fn reset(&mut self) {
        if let Sampler::WindowedSinc(sinc) = self {
            sinc.reset();
        }
    }
}

/// Frame `index` of interleaved `data`.
pub(crate) fn read_frame<S: Frame<Sample = f32>>(data: &[f32], index: usize) -> S {
    let base = index * S::CHANNELS;
    S::from_fn(|channel| data[base + channel])
}
