//! Hooks for supply-shortfall and position events raised during a mix pass.
//!
//! Observers run on the mixing thread and must not block.

use crate::arena::MixerHandle;
use crate::fixed::FixedFrame;

/// How much of the requested data was missing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnderflowKind {
    /// The stream had nothing for the pass.
    Full,
    /// The stream ran dry part way through the pass.
    Partial,
    /// A packet arrived after the frames it held were needed and was dropped.
    LatePacket,
}

/// Why running positions were re-derived from the clock mapping.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PositionReset {
    /// First pass for this input, or the destination timeline jumped.
    DestDiscontinuity,
    /// The stream reported a gap in its data.
    SourceDiscontinuity,
    /// Running position drifted too far from the clock mapping.
    PositionError {
        /// Measured error in nanoseconds.
        error_ns: i64,
    },
}

/// Receives events from [`MixStage`](crate::stage::MixStage). Every method defaults to doing nothing.
pub trait MixObserver: Send {
    /// `handle` could not supply data in time.
    ///
    /// For [`UnderflowKind::Full`] and [`UnderflowKind::Partial`], `frames` destination frames were
    /// substituted with silence. For [`UnderflowKind::LatePacket`], `frames` source frames were
    /// dropped; [`on_packet_discarded`](Self::on_packet_discarded) reports the same packet.
    fn on_underflow(&mut self, handle: MixerHandle, kind: UnderflowKind, frames: usize) {
        let _ = (handle, kind, frames);
    }

    /// A packet starting at `start` ended before the filter window and was dropped unmixed.
    fn on_packet_discarded(&mut self, handle: MixerHandle, start: FixedFrame, frames: usize) {
        let _ = (handle, start, frames);
    }

    /// Running positions of `handle` were reset.
    fn on_position_reset(&mut self, handle: MixerHandle, reason: PositionReset) {
        let _ = (handle, reason);
    }
}

/// Observer that ignores every event.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopObserver;

impl MixObserver for NoopObserver {}
