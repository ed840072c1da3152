//! Channel count conversion between source and destination frames.

use dasp_frame::Frame;

use crate::format::MAX_CHANNELS;

/// Whether frames with `source` channels can be mapped to frames with `dest` channels.
pub fn is_supported(source: usize, dest: usize) -> bool {
    match (source, dest) {
        (s, d) if s == d => (1..=MAX_CHANNELS).contains(&s),
        (1, 2) | (1, 4) | (2, 1) | (2, 4) | (4, 1) | (4, 2) => true,
        _ => false,
    }
}

/// Convert one frame between channel layouts.
///
/// Mono is duplicated into every output channel, downmixes to mono average all channels, stereo
/// widens to quad as `L R L R`, and quad folds to stereo by averaging front and rear pairs.
pub fn map_frame<S, D>(source: S) -> D
where
    S: Frame<Sample = f32>,
    D: Frame<Sample = f32>,
{
    let read = |channel: usize| source.channel(channel).copied().unwrap_or(0.0);
    if S::CHANNELS == D::CHANNELS {
        D::from_fn(read)
    } else if S::CHANNELS == 1 {
        D::from_fn(|_| read(0))
    } else if D::CHANNELS == 1 {
        let sum: f32 = source.channels().sum();
        D::from_fn(|_| sum / S::CHANNELS as f32)
    } else if D::CHANNELS > S::CHANNELS {
        D::from_fn(|channel| read(channel % S::CHANNELS))
    } else {
        let folds = S::CHANNELS / D::CHANNELS;
        D::from_fn(|channel| {
            (0..folds).map(|fold| read(channel + fold * D::CHANNELS)).sum::<f32>() / folds as f32
        })
    }
}
