#![deny(missing_docs)]
#![allow(clippy::too_many_arguments)]

//! Real-time audio mixing with exact-rate sample rate conversion.
//!
//! Each attached source stream gets its own [`Mixer`], which resamples and channel-maps the stream
//! into the destination format. Source positions advance in fixed-point sub-frames
//! ([`FixedFrame`]) with an exact rational remainder, so long-running conversions between rates
//! like 44.1 kHz and 48 kHz never drift. A [`MixStage`] mixes every attached stream into one
//! destination buffer per request, following each stream's clock mapping and substituting silence
//! when a stream cannot supply data in time.

use std::sync::Once;

pub mod arena;
pub mod bookkeeping;
pub mod channel;
pub mod clock;
pub mod driver;
pub mod fixed;
pub mod format;
pub mod gain;
pub mod mixer;
pub mod observer;
pub mod position;
pub mod sampler;
pub mod source_info;
pub mod stage;
pub mod stream;

#[cfg(test)]
mod tests;

pub use arena::MixerHandle;
pub use bookkeeping::Bookkeeping;
pub use clock::{ClockMapping, TimelineRate, VersionedMapping};
pub use driver::MixDriver;
pub use fixed::{FRAC_BITS, FixedFrame};
pub use format::Format;
pub use gain::Gain;
pub use mixer::{Mixer, ResamplerKind};
pub use observer::{MixObserver, NoopObserver, PositionReset, UnderflowKind};
pub use position::PositionManager;
pub use sampler::{FilterTable, Sampler};
pub use source_info::SourceInfo;
pub use stage::{MixStage, MixStageController, MixStageOptions, OutputBuffer};
pub use stream::{PacketQueue, ReadableStream, StreamBuffer};

static TRACING_INIT: Once = Once::new();

/// Install a `tracing_subscriber::fmt` subscriber, once per process.
///
/// Does nothing if a global subscriber is already set.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        let _ = tracing_subscriber::fmt::try_init();
    });
}

/// Error enumeration surfaced across the public API.
#[derive(thiserror::Error, Debug)]
pub enum MixerError {
    /// No channel mapping exists between the two layouts.
    #[error("unsupported channel mapping {source_channels} -> {dest_channels}")]
    UnsupportedChannels {
        /// Channels per source frame.
        source_channels: usize,
        /// Channels per destination frame.
        dest_channels: usize,
    },
    /// Frame rate outside the supported range.
    #[error(
        "unsupported frame rate {0} Hz, expected {min}..={max}",
        min = format::MIN_FRAMES_PER_SECOND,
        max = format::MAX_FRAMES_PER_SECOND
    )]
    UnsupportedRate(u32),
    /// A forced resampler cannot serve the requested formats.
    #[error("resampler {kind} unavailable: {reason}")]
    UnsupportedResampler {
        /// Requested resampler.
        kind: ResamplerKind,
        /// Why it cannot be used.
        reason: String,
    },
    /// Handle does not refer to an attached input.
    #[error("unknown input {0}")]
    UnknownInput(MixerHandle),
    /// The stage already holds its maximum number of inputs.
    #[error("input limit of {0} reached")]
    InputLimit(usize),
    /// The mixing thread could not be started.
    #[error("failed to spawn mixing thread: {0}")]
    Spawn(#[from] std::io::Error),
}
