//! Mix stage: mixes every attached stream into one destination buffer per request.
//!
//! The stage is split in two. [`MixStage`] lives on the mixing thread and produces output;
//! [`MixStageController`] is cloned to control threads to attach and detach streams and change
//! their gain. The set of attached inputs is shared behind a read-write lock that the mixing thread
//! only holds long enough to copy a snapshot at the start of each pass. Mixers are handed to the
//! mixing thread over a channel when an input is attached and are owned by it from then on, so the
//! mix loop itself takes no locks. Gain changes reach a mixer through a per-input command channel.

use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::RwLock;
use tracing::{debug, info, trace, warn};

use crate::MixerError;
use crate::arena::{Arena, MixerHandle};
use crate::clock::ClockMapping;
use crate::fixed::{FRAC_BITS, FixedFrame};
use crate::format::Format;
use crate::mixer::{Mixer, ResamplerKind};
use crate::observer::{MixObserver, NoopObserver, PositionReset, UnderflowKind};
use crate::position::StepRate;
use crate::sampler::{DEFAULT_SINC_SIDE_FRAMES, FilterTable};
use crate::stream::ReadableStream;

/// Default cap on attached inputs.
pub const DEFAULT_MAX_INPUTS: usize = 64;
/// Default source position error tolerated before positions are resynced, in nanoseconds.
pub const DEFAULT_POSITION_ERROR_THRESHOLD_NS: i64 = 1_000_000;

/// Tunables for a [`MixStage`].
#[derive(Clone, Debug)]
pub struct MixStageOptions {
    /// Largest `frame_count` accepted by [`MixStage::lock_output`].
    pub max_frames: usize,
    /// Cap on attached inputs.
    pub max_inputs: usize,
    /// Resampler used by [`MixStageController::add_input`].
    pub resampler: ResamplerKind,
    /// Windowed-sinc reach in frames per side.
    pub sinc_side_frames: usize,
    /// Kernel used by every windowed-sinc input instead of one designed per conversion.
    /// Overrides `sinc_side_frames`.
    pub filter_table: Option<Arc<FilterTable>>,
    /// Position error beyond which running positions are re-derived from the clock mapping.
    pub position_error_threshold_ns: i64,
}

impl Default for MixStageOptions {
    fn default() -> Self {
        Self {
            max_frames: 1024,
            max_inputs: DEFAULT_MAX_INPUTS,
            resampler: ResamplerKind::Default,
            sinc_side_frames: DEFAULT_SINC_SIDE_FRAMES,
            filter_table: None,
            position_error_threshold_ns: DEFAULT_POSITION_ERROR_THRESHOLD_NS,
        }
    }
}

impl MixStageOptions {
    /// Set the largest block size.
    pub fn with_max_frames(mut self, max_frames: usize) -> Self {
        self.max_frames = max_frames;
        self
    }

    /// Set the input cap.
    pub fn with_max_inputs(mut self, max_inputs: usize) -> Self {
        self.max_inputs = max_inputs;
        self
    }

    /// Set the resampler used for new inputs.
    pub fn with_resampler(mut self, resampler: ResamplerKind) -> Self {
        self.resampler = resampler;
        self
    }

    /// Set the windowed-sinc reach.
    pub fn with_sinc_side_frames(mut self, sinc_side_frames: usize) -> Self {
        self.sinc_side_frames = sinc_side_frames;
        self
    }

    /// Filter every windowed-sinc input through `table`.
    pub fn with_filter_table(mut self, table: Arc<FilterTable>) -> Self {
        self.filter_table = Some(table);
        self
    }

    /// Set the position error threshold.
    pub fn with_position_error_threshold_ns(mut self, threshold_ns: i64) -> Self {
        self.position_error_threshold_ns = threshold_ns;
        self
    }
}

#[derive(Clone, Copy, Debug)]
enum GainCommand {
    SourceGain(f32),
    SourceGainRamp { gain_db: f32, ramp_frames: u64 },
    DestGain(f32),
    Mute(bool),
}

struct Input {
    stream: Arc<dyn ReadableStream>,
    commands_tx: Sender<GainCommand>,
    commands_rx: Receiver<GainCommand>,
}

enum InputEvent {
    Attached(MixerHandle, Box<Mixer>),
    Detached(MixerHandle),
}

struct MixerSlot {
    handle: MixerHandle,
    mixer: Box<Mixer>,
}

#[derive(Default)]
struct InputSet {
    arena: Arena<Input>,
    order: Vec<MixerHandle>,
}

struct Shared {
    format: Format,
    options: MixStageOptions,
    inputs: RwLock<InputSet>,
    // Sent under the `inputs` write lock, so events arrive in arena order.
    events: Sender<InputEvent>,
}

/// Attaches, detaches and controls inputs of a [`MixStage`] from any thread.
#[derive(Clone)]
pub struct MixStageController {
    shared: Arc<Shared>,
}

impl MixStageController {
    /// Attach `stream` with the stage's default resampler.
    pub fn add_input(&self, stream: Arc<dyn ReadableStream>) -> Result<MixerHandle, MixerError> {
        self.add_input_with(stream, self.shared.options.resampler)
    }

    /// Attach `stream` with a specific resampler.
    ///
    /// Fails without attaching anything when no mixer can serve the stream's format.
    pub fn add_input_with(
        &self,
        stream: Arc<dyn ReadableStream>,
        resampler: ResamplerKind,
    ) -> Result<MixerHandle, MixerError> {
        let source = stream.format();
        let options = &self.shared.options;
        let mixer = match &options.filter_table {
            Some(table) => {
                Mixer::select_with_table(source, self.shared.format, resampler, Arc::clone(table))?
            }
            None => Mixer::select_with(
                source,
                self.shared.format,
                resampler,
                options.sinc_side_frames,
            )?,
        };

        let mut inputs = self.shared.inputs.write();
        if inputs.arena.len() >= self.shared.options.max_inputs {
            return Err(MixerError::InputLimit(self.shared.options.max_inputs));
        }
        let kind = mixer.kind();
        let (commands_tx, commands_rx) = unbounded();
        let handle = inputs.arena.insert_with(|_| Input {
            stream,
            commands_tx,
            commands_rx,
        });
        inputs.order.push(handle);
        let _ = self
            .shared
            .events
            .send(InputEvent::Attached(handle, Box::new(mixer)));
        info!(
            handle = %handle,
            source_rate = source.frames_per_second(),
            source_channels = source.channels(),
            resampler = %kind,
            "input_attached"
        );
        Ok(handle)
    }

    /// Detach an input. Its mixer is dropped by the mixing thread at the start of the next pass.
    pub fn remove_input(&self, handle: MixerHandle) -> Result<(), MixerError> {
        let mut inputs = self.shared.inputs.write();
        inputs
            .arena
            .remove(handle)
            .ok_or(MixerError::UnknownInput(handle))?;
        inputs.order.retain(|attached| *attached != handle);
        let _ = self.shared.events.send(InputEvent::Detached(handle));
        info!(handle = %handle, "input_detached");
        Ok(())
    }

    /// Handles of attached inputs, in mixing order.
    pub fn inputs(&self) -> Vec<MixerHandle> {
        self.shared.inputs.read().order.clone()
    }

    /// Number of attached inputs.
    pub fn input_count(&self) -> usize {
        self.shared.inputs.read().order.len()
    }

    /// Set an input's gain immediately.
    pub fn set_gain_db(&self, handle: MixerHandle, gain_db: f32) -> Result<(), MixerError> {
        self.send(handle, GainCommand::SourceGain(gain_db))
    }

    /// Ramp an input's gain over `ramp_frames` destination frames.
    pub fn ramp_gain_db(
        &self,
        handle: MixerHandle,
        gain_db: f32,
        ramp_frames: u64,
    ) -> Result<(), MixerError> {
        self.send(
            handle,
            GainCommand::SourceGainRamp {
                gain_db,
                ramp_frames,
            },
        )
    }

    /// Set the gain applied on the destination side of an input.
    pub fn set_dest_gain_db(&self, handle: MixerHandle, gain_db: f32) -> Result<(), MixerError> {
        self.send(handle, GainCommand::DestGain(gain_db))
    }

    /// Mute or unmute an input.
    pub fn set_mute(&self, handle: MixerHandle, muted: bool) -> Result<(), MixerError> {
        self.send(handle, GainCommand::Mute(muted))
    }

    fn send(&self, handle: MixerHandle, command: GainCommand) -> Result<(), MixerError> {
        let inputs = self.shared.inputs.read();
        let input = inputs
            .arena
            .get(handle)
            .ok_or(MixerError::UnknownInput(handle))?;
        input
            .commands_tx
            .send(command)
            .map_err(|_| MixerError::UnknownInput(handle))
    }
}

struct ActiveInput {
    handle: MixerHandle,
    stream: Arc<dyn ReadableStream>,
    commands: Receiver<GainCommand>,
}

/// Output of one [`MixStage::lock_output`] call.
#[derive(Debug)]
pub struct OutputBuffer<'a> {
    start_frame: i64,
    frame_count: usize,
    reference_time_ns: i64,
    channels: usize,
    samples: &'a [f32],
}

impl OutputBuffer<'_> {
    /// Destination frame of the first frame.
    pub fn start_frame(&self) -> i64 {
        self.start_frame
    }

    /// Frames in the buffer.
    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    /// Reference time the buffer was requested for.
    pub fn reference_time_ns(&self) -> i64 {
        self.reference_time_ns
    }

    /// Channels per frame.
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Interleaved samples.
    pub fn samples(&self) -> &[f32] {
        self.samples
    }

    /// Samples of frame `index`.
    pub fn frame(&self, index: usize) -> &[f32] {
        &self.samples[index * self.channels..(index + 1) * self.channels]
    }

    /// True when every sample is zero.
    pub fn is_silent(&self) -> bool {
        self.samples.iter().all(|sample| *sample == 0.0)
    }
}

/// Mixing-thread side of the stage.
pub struct MixStage<O: MixObserver = NoopObserver> {
    shared: Arc<Shared>,
    events: Receiver<InputEvent>,
    // Indexed by `MixerHandle::index`.
    mixers: Vec<Option<MixerSlot>>,
    output: Vec<f32>,
    snapshot: Vec<ActiveInput>,
    ref_time_to_dest: Option<ClockMapping>,
    observer: O,
}

impl MixStage<NoopObserver> {
    /// Stage producing `format` output.
    pub fn new(format: Format, options: MixStageOptions) -> Self {
        Self::with_observer(format, options, NoopObserver)
    }
}

impl<O: MixObserver> MixStage<O> {
    /// Stage reporting supply shortfalls and position resets to `observer`.
    pub fn with_observer(format: Format, options: MixStageOptions, observer: O) -> Self {
        let output = vec![0.0; format.samples_for(options.max_frames)];
        let snapshot = Vec::with_capacity(options.max_inputs);
        let (events_tx, events) = unbounded();
        Self {
            shared: Arc::new(Shared {
                format,
                options,
                inputs: RwLock::new(InputSet::default()),
                events: events_tx,
            }),
            events,
            mixers: Vec::new(),
            output,
            snapshot,
            ref_time_to_dest: None,
            observer,
        }
    }

    /// Output format.
    pub fn format(&self) -> Format {
        self.shared.format
    }

    /// Options the stage was built with.
    pub fn options(&self) -> &MixStageOptions {
        &self.shared.options
    }

    /// Controller sharing this stage's inputs.
    pub fn controller(&self) -> MixStageController {
        MixStageController {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Attach `stream`; see [`MixStageController::add_input`].
    pub fn add_input(&self, stream: Arc<dyn ReadableStream>) -> Result<MixerHandle, MixerError> {
        self.controller().add_input(stream)
    }

    /// Detach an input; see [`MixStageController::remove_input`].
    pub fn remove_input(&self, handle: MixerHandle) -> Result<(), MixerError> {
        self.controller().remove_input(handle)
    }

    /// The observer.
    pub fn observer(&self) -> &O {
        &self.observer
    }

    /// Mutable observer.
    pub fn observer_mut(&mut self) -> &mut O {
        &mut self.observer
    }

    /// Mix `frame_count` destination frames starting at `start_frame`, which plays at
    /// `reference_time_ns`.
    ///
    /// Panics if `frame_count` exceeds the configured `max_frames`.
    pub fn lock_output(
        &mut self,
        reference_time_ns: i64,
        start_frame: i64,
        frame_count: usize,
    ) -> OutputBuffer<'_> {
        assert!(
            frame_count <= self.shared.options.max_frames,
            "requested {frame_count} frames, stage holds {}",
            self.shared.options.max_frames
        );
        let channels = self.shared.format.channels();
        let samples = frame_count * channels;
        self.output[..samples].fill(0.0);

        let dest_changed = self.update_dest_timeline(reference_time_ns, start_frame);
        self.take_snapshot();
        self.apply_input_events();

        let mut accumulate = false;
        let snapshot = std::mem::take(&mut self.snapshot);
        let input_count = snapshot.len();
        for input in &snapshot {
            let Some(mut slot) = self.take_mixer(input.handle) else {
                continue;
            };
            let contributed = self.mix_stream(
                input,
                &mut slot.mixer,
                reference_time_ns,
                start_frame,
                frame_count,
                accumulate,
                dest_changed,
            );
            self.mixers[input.handle.index() as usize] = Some(slot);
            accumulate |= contributed;
        }
        self.snapshot = snapshot;
        self.snapshot.clear();

        trace!(
            start_frame = start_frame,
            frames = frame_count,
            inputs = input_count,
            "lock_output"
        );
        OutputBuffer {
            start_frame,
            frame_count,
            reference_time_ns,
            channels,
            samples: &self.output[..samples],
        }
    }

    fn update_dest_timeline(&mut self, reference_time_ns: i64, start_frame: i64) -> bool {
        let threshold = self.shared.options.position_error_threshold_ns;
        if let Some(current) = self.ref_time_to_dest {
            let expected_ns = current.apply_inverse(start_frame);
            if (expected_ns - reference_time_ns).abs() <= threshold {
                return false;
            }
        }
        self.ref_time_to_dest = Some(ClockMapping::new(
            reference_time_ns,
            start_frame,
            self.shared.format.frames_per_ns(),
        ));
        debug!(
            reference_time_ns = reference_time_ns,
            start_frame = start_frame,
            "dest_timeline_anchored"
        );
        true
    }

    fn apply_input_events(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            match event {
                InputEvent::Attached(handle, mixer) => {
                    let index = handle.index() as usize;
                    if self.mixers.len() <= index {
                        self.mixers.resize_with(index + 1, || None);
                    }
                    self.mixers[index] = Some(MixerSlot { handle, mixer });
                }
                InputEvent::Detached(handle) => {
                    if let Some(slot) = self.mixers.get_mut(handle.index() as usize) {
                        if slot.as_ref().is_some_and(|slot| slot.handle == handle) {
                            *slot = None;
                        }
                    }
                }
            }
        }
    }

    fn take_mixer(&mut self, handle: MixerHandle) -> Option<MixerSlot> {
        let slot = self.mixers.get_mut(handle.index() as usize)?;
        if slot.as_ref()?.handle != handle {
            return None;
        }
        slot.take()
    }

    fn take_snapshot(&mut self) {
        let inputs = self.shared.inputs.read();
        self.snapshot.extend(inputs.order.iter().filter_map(|handle| {
            inputs.arena.get(*handle).map(|input| ActiveInput {
                handle: *handle,
                stream: Arc::clone(&input.stream),
                commands: input.commands_rx.clone(),
            })
        }));
    }

    fn mix_stream(
        &mut self,
        input: &ActiveInput,
        mixer: &mut Mixer,
        reference_time_ns: i64,
        dest_start: i64,
        frame_count: usize,
        accumulate: bool,
        dest_changed: bool,
    ) -> bool {
        let Some(ref_time_to_dest) = self.ref_time_to_dest else {
            return false;
        };
        let handle = input.handle;
        let stream = input.stream.as_ref();

        while let Ok(command) = input.commands.try_recv() {
            let gain = mixer.gain_mut();
            match command {
                GainCommand::SourceGain(gain_db) => gain.set_source_gain_db(gain_db),
                GainCommand::SourceGainRamp {
                    gain_db,
                    ramp_frames,
                } => gain.set_source_gain_with_ramp(gain_db, ramp_frames),
                GainCommand::DestGain(gain_db) => gain.set_dest_gain_db(gain_db),
                GainCommand::Mute(muted) => gain.set_mute(muted),
            }
        }

        let versioned = stream.clock_mapping();
        {
            let (source_info, bookkeeping) = mixer.positions_mut();
            if source_info.update_source_mapping(versioned) {
                debug!(handle = %handle, generation = versioned.generation, "source_timeline_changed");
            }
            if dest_changed {
                source_info.invalidate_dest_mapping();
            }
            if versioned.mapping.rate.is_zero() {
                trace!(handle = %handle, "input_paused");
                return false;
            }
            if source_info.dest_frames_to_frac_source().is_none() {
                let (dest_to_source, exact) =
                    ClockMapping::compose(&versioned.mapping, &ref_time_to_dest.inverse());
                if !exact {
                    debug!(handle = %handle, "dest_to_source_rate_approximated");
                }
                source_info.set_dest_mapping(dest_to_source);
                bookkeeping.set_rate_from(dest_to_source.rate);
            }
        }

        self.sync_positions(handle, mixer, dest_start);

        let channels = self.shared.format.channels();
        let dest = &mut self.output[..frame_count * channels];
        let neg = mixer.neg_filter_width();
        let pos = mixer.pos_filter_width();
        let mut dest_offset = 0usize;
        let mut contributed = false;

        while dest_offset < frame_count {
            let remaining = frame_count - dest_offset;
            let rate = StepRate::of(mixer.bookkeeping());
            let window_start = mixer.source_info().next_source_frame() - neg;
            let span = remaining as i64 * (rate.step_size + 1) + pos.raw() + neg.raw();
            let window_frames = ((span >> FRAC_BITS) + 1) as usize;
            let Some(buffer) = stream.lock_buffer(reference_time_ns, window_start, window_frames)
            else {
                let kind = if dest_offset == 0 {
                    UnderflowKind::Full
                } else {
                    UnderflowKind::Partial
                };
                debug!(handle = %handle, kind = ?kind, frames = remaining, "underflow");
                self.observer.on_underflow(handle, kind, remaining);
                let (source_info, bookkeeping) = mixer.positions_mut();
                source_info.advance_running_positions_by(remaining as u64, bookkeeping);
                break;
            };

            if !buffer.is_continuous {
                mixer.reset();
                let (source_info, bookkeeping) = mixer.positions_mut();
                source_info.reset_positions(dest_start + dest_offset as i64, bookkeeping);
                self.observer
                    .on_position_reset(handle, PositionReset::SourceDiscontinuity);
                debug!(handle = %handle, start = %buffer.start, "source_discontinuity");
            }
            let mut position = mixer.source_info().next_source_frame();
            let modulo = mixer.bookkeeping().source_pos_modulo();

            // Last sample ends before the negative filter edge: nothing left to mix from it.
            let last_frame = buffer.end() - FixedFrame::ONE;
            if last_frame < position - neg {
                warn!(
                    handle = %handle,
                    start = %buffer.start,
                    frames = buffer.length,
                    "late_packet_discarded"
                );
                self.observer
                    .on_packet_discarded(handle, buffer.start, buffer.length);
                self.observer
                    .on_underflow(handle, UnderflowKind::LatePacket, buffer.length);
                mixer.skip_source(&buffer.payload);
                stream.unlock_buffer(true);
                continue;
            }

            let (last_dest_source, _) = rate.advance(position.raw(), modulo, remaining as u64 - 1);
            if buffer.start.raw() > last_dest_source + pos.raw() {
                // Not due within this pass: leave it queued.
                stream.unlock_buffer(false);
                let (source_info, bookkeeping) = mixer.positions_mut();
                source_info
                    .advance_all_positions_to(dest_start + frame_count as i64, bookkeeping);
                break;
            }

            if buffer.start > position + pos {
                let skip = rate.steps_until(
                    position.raw(),
                    modulo,
                    (buffer.start - pos).raw(),
                    remaining as u64,
                );
                let (source_info, bookkeeping) = mixer.positions_mut();
                source_info.advance_running_positions_by(skip, bookkeeping);
                dest_offset += skip as usize;
                position = mixer.source_info().next_source_frame();
                trace!(handle = %handle, frames = skip, "gap_skipped");
            }

            let mut source_offset = position - buffer.start;
            let mut new_dest_offset = dest_offset;
            let consumed = mixer.mix(
                dest,
                frame_count,
                &mut new_dest_offset,
                &buffer.payload,
                &mut source_offset,
                accumulate,
            );
            contributed |= new_dest_offset > dest_offset;
            dest_offset = new_dest_offset;
            mixer
                .source_info_mut()
                .set_next_positions(dest_start + dest_offset as i64, buffer.start + source_offset);
            stream.unlock_buffer(consumed);
            if !consumed {
                break;
            }
        }

        let trim_at = mixer.source_info().next_source_frame() - neg;
        if let Some(to_ref) = mixer.source_info().frac_source_to_ref_time() {
            stream.trim(to_ref.apply(trim_at.raw()));
        }
        contributed
    }

    fn sync_positions(&mut self, handle: MixerHandle, mixer: &mut Mixer, dest_start: i64) {
        let threshold = self.shared.options.position_error_threshold_ns;
        let (source_info, bookkeeping) = mixer.positions_mut();
        let reason = if source_info.next_dest_frame() != Some(dest_start) {
            PositionReset::DestDiscontinuity
        } else {
            match source_info.measure_position_error(dest_start) {
                Some(error_ns) if error_ns.abs() > threshold => {
                    warn!(handle = %handle, error_ns = error_ns, "position_error_resync");
                    PositionReset::PositionError { error_ns }
                }
                _ => return,
            }
        };
        source_info.reset_positions(dest_start, bookkeeping);
        debug!(handle = %handle, dest_frame = dest_start, reason = ?reason, "positions_reset");
        self.observer.on_position_reset(handle, reason);
    }
}
