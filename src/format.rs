//! Stream formats: interleaved `f32` frames at a fixed rate.

use crate::MixerError;
use crate::clock::TimelineRate;

/// Lowest supported frame rate.
pub const MIN_FRAMES_PER_SECOND: u32 = 1_000;
/// Highest supported frame rate.
pub const MAX_FRAMES_PER_SECOND: u32 = 192_000;
/// Highest supported channel count.
pub const MAX_CHANNELS: usize = 8;

/// Channel count and frame rate of an interleaved `f32` stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Format {
    channels: usize,
    frames_per_second: u32,
}

impl Format {
    /// Validate and build a format.
    pub fn new(channels: usize, frames_per_second: u32) -> Result<Self, MixerError> {
        if channels == 0 || channels > MAX_CHANNELS {
            return Err(MixerError::UnsupportedChannels {
                source_channels: channels,
                dest_channels: channels,
            });
        }
        if !(MIN_FRAMES_PER_SECOND..=MAX_FRAMES_PER_SECOND).contains(&frames_per_second) {
            return Err(MixerError::UnsupportedRate(frames_per_second));
        }
        Ok(Self {
            channels,
            frames_per_second,
        })
    }

    /// Channels per frame.
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Frames per second.
    pub fn frames_per_second(&self) -> u32 {
        self.frames_per_second
    }

    /// Samples needed to hold `frames` frames.
    pub fn samples_for(&self, frames: usize) -> usize {
        frames * self.channels
    }

    /// Whole frames per nanosecond.
    pub fn frames_per_ns(&self) -> TimelineRate {
        TimelineRate::frames_per_ns(self.frames_per_second)
    }

    /// Fractional frames per nanosecond.
    pub fn frac_frames_per_ns(&self) -> TimelineRate {
        TimelineRate::frac_frames_per_ns(self.frames_per_second)
    }
}
