//! Source streams read by the mix stage.
//!
//! A [`ReadableStream`] hands out buffers of interleaved frames positioned on a fractional source
//! timeline, together with the mapping from reference time onto that timeline. [`PacketQueue`] is
//! the in-memory implementation used by producers that push packets.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::clock::{ClockMapping, TimelineRate, VersionedMapping};
use crate::fixed::FixedFrame;
use crate::format::Format;

/// Buffer handed out by [`ReadableStream::lock_buffer`].
#[derive(Clone, Debug)]
pub struct StreamBuffer {
    /// Source position of the first frame.
    pub start: FixedFrame,
    /// Frames in `payload`.
    pub length: usize,
    /// Interleaved samples.
    pub payload: Arc<[f32]>,
    /// False when this buffer does not continue the previously delivered one.
    pub is_continuous: bool,
}

impl StreamBuffer {
    /// Source position one frame past the last frame.
    pub fn end(&self) -> FixedFrame {
        self.start + FixedFrame::from_frames(self.length as i64)
    }
}

/// Source of audio consumed by the mixing thread.
///
/// Every method is called from the mixing thread and must return without waiting.
pub trait ReadableStream: Send + Sync {
    /// Channel layout and rate of the payloads.
    fn format(&self) -> Format;

    /// Lock the earliest buffer not yet released, for a read of `frame_count` frames from `start`.
    ///
    /// The buffer may start past the requested window; the caller checks its position and unlocks
    /// it unreleased when it is not due yet. Returns `None` only when no data is available right
    /// now. At most one buffer is locked at a time; the caller always follows a `Some` with
    /// [`unlock_buffer`](Self::unlock_buffer).
    fn lock_buffer(
        &self,
        reference_time_ns: i64,
        start: FixedFrame,
        frame_count: usize,
    ) -> Option<StreamBuffer>;

    /// Unlock the buffer returned by the last `lock_buffer`, dropping it when `release` is set.
    fn unlock_buffer(&self, release: bool);

    /// Drop data the consumer no longer needs at `reference_time_ns`.
    fn trim(&self, reference_time_ns: i64);

    /// Current reference time to source sub-frame mapping.
    fn clock_mapping(&self) -> VersionedMapping;
}

#[derive(Debug)]
struct Packet {
    id: u64,
    start: FixedFrame,
    length: usize,
    payload: Arc<[f32]>,
    is_continuous: bool,
    delivered: bool,
}

impl Packet {
    fn end(&self) -> FixedFrame {
        self.start + FixedFrame::from_frames(self.length as i64)
    }
}

#[derive(Debug, Default)]
struct QueueState {
    packets: VecDeque<Packet>,
    next_start: Option<FixedFrame>,
    next_id: u64,
}

/// Slot value meaning "no packet" in the packet-id atomics, which store `id + 1`.
const NO_PACKET: u64 = 0;
/// `pending_trim` value meaning "nothing to trim".
const NO_TRIM: i64 = i64::MIN;

/// In-memory packet queue implementing [`ReadableStream`].
///
/// Packets are pushed with an explicit source position or placed right after the previous packet.
/// A packet that does not start where the previous one ended, or the first packet after a flush,
/// is reported as a discontinuity the first time it is delivered.
///
/// The consumer side never waits on the producer. Releases and trims that find the queue busy are
/// parked in atomics and applied by whichever side takes the lock next.
pub struct PacketQueue {
    format: Format,
    state: Mutex<QueueState>,
    timeline: RwLock<VersionedMapping>,
    generation: AtomicU64,
    locked: AtomicU64,
    pending_release: AtomicU64,
    pending_trim: AtomicI64,
}

impl PacketQueue {
    /// Queue whose source position `0` plays at `reference_time_ns`.
    pub fn starting_at(format: Format, reference_time_ns: i64) -> Self {
        Self::new(
            format,
            ClockMapping::new(reference_time_ns, 0, format.frac_frames_per_ns()),
        )
    }

    /// Queue with an explicit reference time to source sub-frame mapping.
    pub fn new(format: Format, timeline: ClockMapping) -> Self {
        Self {
            format,
            state: Mutex::new(QueueState::default()),
            timeline: RwLock::new(VersionedMapping {
                mapping: timeline,
                generation: 1,
            }),
            generation: AtomicU64::new(1),
            locked: AtomicU64::new(NO_PACKET),
            pending_release: AtomicU64::new(NO_PACKET),
            pending_trim: AtomicI64::new(NO_TRIM),
        }
    }

    /// Append a packet of interleaved samples. Returns the source position it was placed at.
    ///
    /// Panics if `payload` holds a partial frame.
    pub fn push(&self, start: Option<FixedFrame>, payload: impl Into<Arc<[f32]>>) -> FixedFrame {
        let payload = payload.into();
        let channels = self.format.channels();
        assert!(
            payload.len() % channels == 0,
            "packet of {} samples is not a whole number of {channels}-channel frames",
            payload.len()
        );
        let length = payload.len() / channels;

        let mut state = self.state.lock();
        self.apply_pending(&mut state);
        let expected = state.next_start;
        let start = start.or(expected).unwrap_or(FixedFrame::ZERO);
        let is_continuous = expected == Some(start);
        let id = state.next_id;
        state.next_id += 1;

        let packet = Packet {
            id,
            start,
            length,
            payload,
            is_continuous,
            delivered: false,
        };
        state.next_start = Some(packet.end());
        state.packets.push_back(packet);
        start
    }

    /// Drop every queued packet. The next packet starts a new run.
    pub fn flush(&self) {
        let mut state = self.state.lock();
        let dropped = state.packets.len();
        state.packets.clear();
        state.next_start = None;
        self.pending_release.store(NO_PACKET, Ordering::Release);
        self.pending_trim.store(NO_TRIM, Ordering::Release);
        debug!(dropped = dropped, "packet_queue_flush");
    }

    /// Replace the reference time to source mapping.
    pub fn set_timeline(&self, timeline: ClockMapping) {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        *self.timeline.write() = VersionedMapping {
            mapping: timeline,
            generation,
        };
    }

    /// Stop the source timeline at its position for `reference_time_ns`.
    pub fn pause(&self, reference_time_ns: i64) {
        let position = self.timeline.read().mapping.apply(reference_time_ns);
        self.set_timeline(ClockMapping::new(
            reference_time_ns,
            position,
            TimelineRate::ZERO,
        ));
    }

    /// Restart the timeline at nominal rate from where it was paused.
    pub fn resume(&self, reference_time_ns: i64) {
        let position = self.timeline.read().mapping.apply(reference_time_ns);
        self.set_timeline(ClockMapping::new(
            reference_time_ns,
            position,
            self.format.frac_frames_per_ns(),
        ));
    }

    /// Packets waiting to be mixed.
    pub fn len(&self) -> usize {
        let mut state = self.state.lock();
        self.apply_pending(&mut state);
        state.packets.len()
    }

    /// True when no packet is queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Apply a release or trim the consumer parked while the queue was busy.
    fn apply_pending(&self, state: &mut QueueState) {
        let released = self.pending_release.swap(NO_PACKET, Ordering::AcqRel);
        if released != NO_PACKET
            && state
                .packets
                .front()
                .is_some_and(|packet| packet.id + 1 == released)
        {
            state.packets.pop_front();
        }

        let trim_to = self.pending_trim.swap(NO_TRIM, Ordering::AcqRel);
        if trim_to == NO_TRIM {
            return;
        }
        let position = FixedFrame::from_raw(trim_to);
        let locked = self.locked.load(Ordering::Acquire);
        while let Some(packet) = state.packets.front() {
            if packet.id + 1 == locked || packet.end() > position {
                break;
            }
            state.packets.pop_front();
        }
    }
}

impl ReadableStream for PacketQueue {
    fn format(&self) -> Format {
        self.format
    }

    fn lock_buffer(
        &self,
        _reference_time_ns: i64,
        _start: FixedFrame,
        _frame_count: usize,
    ) -> Option<StreamBuffer> {
        let mut state = self.state.try_lock()?;
        self.apply_pending(&mut state);
        let packet = state.packets.front_mut()?;
        let buffer = StreamBuffer {
            start: packet.start,
            length: packet.length,
            payload: Arc::clone(&packet.payload),
            is_continuous: packet.is_continuous || packet.delivered,
        };
        packet.delivered = true;
        self.locked.store(packet.id + 1, Ordering::Release);
        Some(buffer)
    }

    fn unlock_buffer(&self, release: bool) {
        let locked = self.locked.swap(NO_PACKET, Ordering::AcqRel);
        if locked == NO_PACKET || !release {
            return;
        }
        self.pending_release.store(locked, Ordering::Release);
        if let Some(mut state) = self.state.try_lock() {
            self.apply_pending(&mut state);
        }
    }

    fn trim(&self, reference_time_ns: i64) {
        let Some(timeline) = self.timeline.try_read().map(|timeline| *timeline) else {
            return;
        };
        if timeline.mapping.rate.is_zero() {
            return;
        }
        self.pending_trim
            .store(timeline.mapping.apply(reference_time_ns), Ordering::Release);
        if let Some(mut state) = self.state.try_lock() {
            self.apply_pending(&mut state);
        }
    }

    fn clock_mapping(&self) -> VersionedMapping {
        *self.timeline.read()
    }
}
