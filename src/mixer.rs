//! Resampling mixer: one source stream into one destination buffer.

use std::fmt;
use std::sync::Arc;

use dasp_frame::Frame;
use tracing::{debug, trace};

use crate::MixerError;
use crate::bookkeeping::Bookkeeping;
use crate::channel;
use crate::fixed::FixedFrame;
use crate::format::Format;
use crate::gain::Gain;
use crate::position::PositionManager;
use crate::sampler::{DEFAULT_SINC_SIDE_FRAMES, FilterTable, MAX_SINC_DOWNSAMPLE_RATIO, Sampler};
use crate::source_info::SourceInfo;

/// Which sampler a [`Mixer`] should use.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ResamplerKind {
    /// Nearest neighbour when the rates match, windowed sinc otherwise.
    #[default]
    Default,
    /// Nearest neighbour.
    Point,
    /// Windowed sinc.
    WindowedSinc,
}

impl fmt::Display for ResamplerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResamplerKind::Default => "default",
            ResamplerKind::Point => "point",
            ResamplerKind::WindowedSinc => "windowed-sinc",
        };
        f.write_str(name)
    }
}

/// Mixes one source into a destination buffer at the destination's rate and channel layout.
///
/// The mixer owns the per-source state that must persist between calls: rate and remainder in
/// [`Bookkeeping`], running positions and clock mappings in [`SourceInfo`], and any history the
/// sampler keeps from earlier buffers.
#[derive(Clone, Debug)]
pub struct Mixer {
    kind: ResamplerKind,
    sampler: Sampler,
    source_channels: usize,
    dest_channels: usize,
    pos_filter_width: FixedFrame,
    neg_filter_width: FixedFrame,
    bookkeeping: Bookkeeping,
    source_info: SourceInfo,
}

/// Where a windowed-sinc kernel comes from.
enum SincKernel {
    /// Designed for the conversion, reaching this many frames per side.
    Reach(usize),
    /// Supplied by the caller.
    Table(Arc<FilterTable>),
}

macro_rules! dispatch_channels {
    ($source:expr, $dest:expr, $func:ident($($arg:expr),* $(,)?)) => {
        match ($source, $dest) {
            (1, 1) => $func::<[f32; 1], [f32; 1]>($($arg),*),
            (2, 2) => $func::<[f32; 2], [f32; 2]>($($arg),*),
            (3, 3) => $func::<[f32; 3], [f32; 3]>($($arg),*),
            (4, 4) => $func::<[f32; 4], [f32; 4]>($($arg),*),
            (5, 5) => $func::<[f32; 5], [f32; 5]>($($arg),*),
            (6, 6) => $func::<[f32; 6], [f32; 6]>($($arg),*),
            (7, 7) => $func::<[f32; 7], [f32; 7]>($($arg),*),
            (8, 8) => $func::<[f32; 8], [f32; 8]>($($arg),*),
            (1, 2) => $func::<[f32; 1], [f32; 2]>($($arg),*),
            (1, 4) => $func::<[f32; 1], [f32; 4]>($($arg),*),
            (2, 1) => $func::<[f32; 2], [f32; 1]>($($arg),*),
            (2, 4) => $func::<[f32; 2], [f32; 4]>($($arg),*),
            (4, 1) => $func::<[f32; 4], [f32; 1]>($($arg),*),
            (4, 2) => $func::<[f32; 4], [f32; 2]>($($arg),*),
            (source, dest) => unreachable!("channel pairing {source}->{dest} passed selection"),
        }
    };
}

impl Mixer {
    /// Pick a mixer for `source` to `dest` conversion.
    pub fn select(source: Format, dest: Format, kind: ResamplerKind) -> Result<Self, MixerError> {
        Self::select_with(source, dest, kind, DEFAULT_SINC_SIDE_FRAMES)
    }

    /// Like [`select`](Self::select) with an explicit windowed-sinc reach.
    pub fn select_with(
        source: Format,
        dest: Format,
        kind: ResamplerKind,
        sinc_side_frames: usize,
    ) -> Result<Self, MixerError> {
        Self::select_kernel(source, dest, kind, SincKernel::Reach(sinc_side_frames))
    }

    /// Like [`select`](Self::select), but a windowed-sinc mixer filters through `table` instead
    /// of a kernel designed for the two rates.
    pub fn select_with_table(
        source: Format,
        dest: Format,
        kind: ResamplerKind,
        table: Arc<FilterTable>,
    ) -> Result<Self, MixerError> {
        Self::select_kernel(source, dest, kind, SincKernel::Table(table))
    }

    fn select_kernel(
        source: Format,
        dest: Format,
        kind: ResamplerKind,
        kernel: SincKernel,
    ) -> Result<Self, MixerError> {
        if !channel::is_supported(source.channels(), dest.channels()) {
            return Err(MixerError::UnsupportedChannels {
                source_channels: source.channels(),
                dest_channels: dest.channels(),
            });
        }

        let resolved = match kind {
            ResamplerKind::Default if source.frames_per_second() == dest.frames_per_second() => {
                ResamplerKind::Point
            }
            ResamplerKind::Default => ResamplerKind::WindowedSinc,
            other => other,
        };

        let sampler = match resolved {
            ResamplerKind::WindowedSinc => {
                if matches!(kernel, SincKernel::Reach(0)) {
                    return Err(MixerError::UnsupportedResampler {
                        kind,
                        reason: "windowed sinc needs a non-zero filter reach".into(),
                    });
                }
                let limit = dest.frames_per_second() as u64 * MAX_SINC_DOWNSAMPLE_RATIO as u64;
                if source.frames_per_second() as u64 > limit {
                    return Err(MixerError::UnsupportedResampler {
                        kind,
                        reason: format!(
                            "{} -> {} exceeds {}:1 downsampling",
                            source.frames_per_second(),
                            dest.frames_per_second(),
                            MAX_SINC_DOWNSAMPLE_RATIO
                        ),
                    });
                }
                match kernel {
                    SincKernel::Reach(side_frames) => Sampler::windowed_sinc(
                        side_frames,
                        source.frames_per_second(),
                        dest.frames_per_second(),
                        source.channels(),
                    ),
                    SincKernel::Table(table) => {
                        Sampler::windowed_sinc_with_table(table, source.channels())
                    }
                }
            }
            _ => Sampler::point(),
        };

        debug!(
            source_rate = source.frames_per_second(),
            dest_rate = dest.frames_per_second(),
            source_channels = source.channels(),
            dest_channels = dest.channels(),
            resampler = %resolved,
            "mixer_select"
        );
        Ok(Self::with_sampler(
            resolved,
            sampler,
            source.channels(),
            dest.channels(),
        ))
    }

    fn with_sampler(
        kind: ResamplerKind,
        sampler: Sampler,
        source_channels: usize,
        dest_channels: usize,
    ) -> Self {
        Self {
            kind,
            pos_filter_width: sampler.pos_filter_width(),
            neg_filter_width: sampler.neg_filter_width(),
            sampler,
            source_channels,
            dest_channels,
            bookkeeping: Bookkeeping::new(),
            source_info: SourceInfo::new(),
        }
    }

    /// Resampler actually in use; never [`ResamplerKind::Default`].
    pub fn kind(&self) -> ResamplerKind {
        self.kind
    }

    /// Channels per source frame.
    pub fn source_channels(&self) -> usize {
        self.source_channels
    }

    /// Channels per destination frame.
    pub fn dest_channels(&self) -> usize {
        self.dest_channels
    }

    /// How far past a sampling position the sampler reads.
    pub fn pos_filter_width(&self) -> FixedFrame {
        self.pos_filter_width
    }

    /// How far before a sampling position the sampler reads.
    pub fn neg_filter_width(&self) -> FixedFrame {
        self.neg_filter_width
    }

    /// Rate, remainder and gain state.
    pub fn bookkeeping(&self) -> &Bookkeeping {
        &self.bookkeeping
    }

    /// Mutable rate, remainder and gain state.
    pub fn bookkeeping_mut(&mut self) -> &mut Bookkeeping {
        &mut self.bookkeeping
    }

    /// Running positions and clock mappings.
    pub fn source_info(&self) -> &SourceInfo {
        &self.source_info
    }

    /// Mutable running positions and clock mappings.
    pub fn source_info_mut(&mut self) -> &mut SourceInfo {
        &mut self.source_info
    }

    /// Position ledger and bookkeeping borrowed together, for position updates that touch both.
    pub fn positions_mut(&mut self) -> (&mut SourceInfo, &mut Bookkeeping) {
        (&mut self.source_info, &mut self.bookkeeping)
    }

    /// Gain applied to every produced frame.
    pub fn gain(&self) -> &Gain {
        &self.bookkeeping.gain
    }

    /// Mutable gain.
    pub fn gain_mut(&mut self) -> &mut Gain {
        &mut self.bookkeeping.gain
    }

    /// Feed a buffer the caller skipped into the sampler history, so a following contiguous buffer
    /// filters against the right neighbours.
    pub fn skip_source(&mut self, source: &[f32]) {
        self.sampler.cache_history(source);
    }

    /// Forget everything carried between calls except gain and clock mappings.
    pub fn reset(&mut self) {
        self.bookkeeping.reset();
        self.source_info.reset();
        self.sampler.reset();
    }

    /// Mix `source` into `dest`.
    ///
    /// Produces destination frames from `*dest_offset` up to `dest_frames`, sampling `source` at
    /// `*source_offset` and stepping by the rate in [`Bookkeeping`]. Both offsets are advanced to
    /// where mixing stopped. With `accumulate` the output is added to `dest`, otherwise it
    /// overwrites it. Returns true once the source buffer is consumed, meaning the filter window
    /// around the next position would read past its end.
    ///
    /// `dest` holds interleaved destination frames, `source` interleaved source frames.
    ///
    /// # Panics
    ///
    /// Panics if `*dest_offset >= dest_frames`, if `*source_offset` lies a full negative filter
    /// width or more before the buffer, or if the bookkeeping rate is inconsistent.
    pub fn mix(
        &mut self,
        dest: &mut [f32],
        dest_frames: usize,
        dest_offset: &mut usize,
        source: &[f32],
        source_offset: &mut FixedFrame,
        accumulate: bool,
    ) -> bool {
        let source_frames = source.len() / self.source_channels;
        assert!(
            dest.len() >= dest_frames * self.dest_channels,
            "dest holds {} samples, {dest_frames} frames of {} channels requested",
            dest.len(),
            self.dest_channels
        );

        let mut position = PositionManager::new(self.pos_filter_width, self.neg_filter_width);
        position.set_dest_values(dest_frames, *dest_offset);
        position.set_source_values(source_frames, *source_offset);
        position.set_rate_values(&self.bookkeeping);

        let first_dest = position.dest_offset();
        if self.bookkeeping.gain.is_silent() {
            let skipped = position.advance_to_end();
            if !accumulate {
                let channels = self.dest_channels;
                dest[first_dest * channels..(first_dest + skipped) * channels].fill(0.0);
            }
        } else {
            let sampler = &self.sampler;
            let gain = &self.bookkeeping.gain;
            dispatch_channels!(
                self.source_channels,
                self.dest_channels,
                mix_frames(sampler, gain, &mut position, dest, source, accumulate)
            );
        }
        let produced = position.dest_offset() - first_dest;

        position.update_offsets(dest_offset, source_offset, &mut self.bookkeeping);
        self.bookkeeping.gain.advance(produced as u64);

        let consumed = position.source_is_consumed();
        if consumed {
            self.sampler.cache_history(source);
        }
        trace!(
            produced = produced,
            source_frames = source_frames,
            consumed = consumed,
            "mix"
        );
        consumed
    }
}

fn mix_frames<S, D>(
    sampler: &Sampler,
    gain: &Gain,
    position: &mut PositionManager,
    dest: &mut [f32],
    source: &[f32],
    accumulate: bool,
) where
    S: Frame<Sample = f32>,
    D: Frame<Sample = f32>,
{
    match sampler {
        Sampler::Point(point) => run::<S, D, _>(position, dest, gain, accumulate, |offset| {
            point.sample::<S>(source, offset)
        }),
        Sampler::WindowedSinc(sinc) => run::<S, D, _>(position, dest, gain, accumulate, |offset| {
            sinc.sample::<S>(source, offset)
        }),
    }
}

fn run<S, D, F>(
    position: &mut PositionManager,
    dest: &mut [f32],
    gain: &Gain,
    accumulate: bool,
    mut sample: F,
) where
    S: Frame<Sample = f32>,
    D: Frame<Sample = f32>,
    F: FnMut(FixedFrame) -> S,
{
    let unity = gain.is_unity();
    let mut produced = 0u64;
    while position.frame_can_be_mixed() {
        let mut frame: D = channel::map_frame(sample(position.source_offset()));
        if !unity {
            frame = frame.scale_amp(gain.scale_at(produced));
        }
        write_frame(dest, position.dest_offset(), frame, accumulate);
        position.advance_one();
        produced += 1;
    }
}

fn write_frame<D: Frame<Sample = f32>>(dest: &mut [f32], index: usize, frame: D, accumulate: bool) {
    let base = index * D::CHANNELS;
    let slot = &mut dest[base..base + D::CHANNELS];
    for (out, value) in slot.iter_mut().zip(frame.channels()) {
        if accumulate {
            *out += value;
        } else {
            *out = value;
        }
    }
}
