use std::sync::Arc;

use mix_kit::fixed::FRAC_ONE;
use mix_kit::gain::MIN_GAIN_DB;
use mix_kit::{FilterTable, FixedFrame, Format, Mixer, MixerError, ResamplerKind, TimelineRate};

fn format(channels: usize, rate: u32) -> Format {
    Format::new(channels, rate).unwrap()
}

fn point_mixer(channels: usize) -> Mixer {
    Mixer::select(
        format(channels, 48_000),
        format(channels, 48_000),
        ResamplerKind::Default,
    )
    .unwrap()
}

fn converting_mixer(kind: ResamplerKind) -> Mixer {
    let mut mixer = Mixer::select(format(1, 44_100), format(1, 48_000), kind).unwrap();
    mixer
        .bookkeeping_mut()
        .set_rate_from(TimelineRate::new(44_100 * FRAC_ONE as u64, 48_000));
    mixer
}

#[test]
fn point_mixer_copies_remaining_source_frames() {
    let mut mixer = point_mixer(1);
    let source = [1.0f32, 12.0, 123.0, 1234.0, 12345.0];
    let mut dest = [0.0f32; 5];
    let mut dest_offset = 1;
    let mut source_offset = FixedFrame::from_frames(2);

    let consumed = mixer.mix(
        &mut dest,
        4,
        &mut dest_offset,
        &source,
        &mut source_offset,
        true,
    );

    assert!(consumed);
    assert_eq!(dest, [0.0, 123.0, 1234.0, 12345.0, 0.0]);
    assert_eq!(dest_offset, 4);
    assert_eq!(source_offset, FixedFrame::from_frames(5));
}

#[test]
fn accumulate_adds_and_overwrite_replaces() {
    let mut mixer = point_mixer(2);
    let source = [1.0f32, 2.0, 3.0, 4.0];

    let mut dest = [10.0f32; 4];
    let (mut dest_offset, mut source_offset) = (0, FixedFrame::ZERO);
    mixer.mix(&mut dest, 2, &mut dest_offset, &source, &mut source_offset, true);
    assert_eq!(dest, [11.0, 12.0, 13.0, 14.0]);

    let mut dest = [10.0f32; 4];
    let (mut dest_offset, mut source_offset) = (0, FixedFrame::ZERO);
    mixer.mix(&mut dest, 2, &mut dest_offset, &source, &mut source_offset, false);
    assert_eq!(dest, [1.0, 2.0, 3.0, 4.0]);
}

#[test]
fn stops_when_destination_is_full() {
    let mut mixer = point_mixer(1);
    let source: Vec<f32> = (0..10).map(|i| i as f32).collect();
    let mut dest = [0.0f32; 4];
    let (mut dest_offset, mut source_offset) = (0, FixedFrame::from_frames(3));

    let consumed = mixer.mix(&mut dest, 4, &mut dest_offset, &source, &mut source_offset, false);
    assert!(!consumed);
    assert_eq!(dest, [3.0, 4.0, 5.0, 6.0]);
    assert_eq!(dest_offset, 4);
    assert_eq!(source_offset, FixedFrame::from_frames(7));
}

#[test]
fn split_calls_land_on_the_same_position_as_one_call() {
    let source: Vec<f32> = (0..2_000).map(|i| (i % 97) as f32).collect();
    let total = 1_000;

    for kind in [ResamplerKind::Point, ResamplerKind::WindowedSinc] {
        let mut whole = converting_mixer(kind);
        let mut whole_dest = vec![0.0f32; total];
        let (mut dest_offset, mut source_offset) = (0, FixedFrame::ZERO);
        whole.mix(&mut whole_dest, total, &mut dest_offset, &source, &mut source_offset, false);
        let whole_end = source_offset;

        for cuts in [vec![1, 2, 999], vec![333, 334, 1_000], vec![7, 480, 481, 960]] {
            let mut split = converting_mixer(kind);
            let mut split_dest = vec![0.0f32; total];
            let (mut dest_offset, mut source_offset) = (0, FixedFrame::ZERO);
            for &end in cuts.iter().chain(std::iter::once(&total)) {
                if end <= dest_offset {
                    continue;
                }
                split.mix(&mut split_dest, end, &mut dest_offset, &source, &mut source_offset, false);
                assert_eq!(dest_offset, end);
            }
            assert_eq!(source_offset, whole_end, "{kind} cuts {cuts:?}");
            assert_eq!(
                split.bookkeeping().source_pos_modulo(),
                whole.bookkeeping().source_pos_modulo()
            );
            assert_eq!(split_dest, whole_dest, "{kind} cuts {cuts:?}");
        }
    }
}

#[test]
fn offsets_never_leave_their_windows() {
    let mut mixer = converting_mixer(ResamplerKind::WindowedSinc);
    let source = vec![0.25f32; 300];
    let mut dest = vec![0.0f32; 256];
    let mut source_offset = FixedFrame::from_raw(-FRAC_ONE);

    for dest_frames in [1usize, 17, 64, 200, 256] {
        let mut dest_offset = dest_frames - 1;
        let before = source_offset;
        mixer.mix(&mut dest, dest_frames, &mut dest_offset, &source, &mut source_offset, true);
        assert!(dest_offset <= dest_frames);
        assert!(source_offset >= before);
    }
}

#[test]
fn muted_mixer_skips_output_but_advances() {
    let mut mixer = point_mixer(1);
    mixer.gain_mut().set_mute(true);
    let source = [1.0f32; 8];

    let mut dest = [5.0f32; 4];
    let (mut dest_offset, mut source_offset) = (0, FixedFrame::ZERO);
    mixer.mix(&mut dest, 4, &mut dest_offset, &source, &mut source_offset, true);
    assert_eq!(dest, [5.0; 4]);
    assert_eq!(source_offset, FixedFrame::from_frames(4));

    let mut dest = [5.0f32; 4];
    let (mut dest_offset, mut source_offset) = (1, FixedFrame::ZERO);
    mixer.mix(&mut dest, 4, &mut dest_offset, &source, &mut source_offset, false);
    assert_eq!(dest, [5.0, 0.0, 0.0, 0.0]);
    assert_eq!(dest_offset, 4);
}

#[test]
fn gain_scales_and_ramps_across_calls() {
    let mut mixer = point_mixer(1);
    mixer.gain_mut().set_source_gain_db(MIN_GAIN_DB);
    mixer.gain_mut().set_source_gain_with_ramp(0.0, 8);
    let source = [1.0f32; 16];
    let mut dest = [0.0f32; 8];

    let (mut dest_offset, mut source_offset) = (0, FixedFrame::ZERO);
    mixer.mix(&mut dest, 4, &mut dest_offset, &source, &mut source_offset, false);
    mixer.mix(&mut dest, 8, &mut dest_offset, &source, &mut source_offset, false);

    for (frame, value) in dest.iter().enumerate() {
        let expected = frame as f32 / 8.0;
        assert!((value - expected).abs() < 1e-6, "frame {frame}: {value}");
    }
    assert!(!mixer.gain().is_ramping());
}

#[test]
fn channel_layouts_are_mapped() {
    let mut up = Mixer::select(format(1, 48_000), format(2, 48_000), ResamplerKind::Point).unwrap();
    let mut dest = [0.0f32; 4];
    let (mut dest_offset, mut source_offset) = (0, FixedFrame::ZERO);
    up.mix(&mut dest, 2, &mut dest_offset, &[0.5, -0.5], &mut source_offset, false);
    assert_eq!(dest, [0.5, 0.5, -0.5, -0.5]);

    let mut down =
        Mixer::select(format(4, 48_000), format(2, 48_000), ResamplerKind::Point).unwrap();
    let mut dest = [0.0f32; 2];
    let (mut dest_offset, mut source_offset) = (0, FixedFrame::ZERO);
    down.mix(&mut dest, 1, &mut dest_offset, &[1.0, 2.0, 3.0, 4.0], &mut source_offset, false);
    assert_eq!(dest, [2.0, 3.0]);
}

#[test]
fn selection_prefers_point_only_for_matching_rates() {
    assert_eq!(point_mixer(2).kind(), ResamplerKind::Point);
    let converting =
        Mixer::select(format(2, 44_100), format(2, 48_000), ResamplerKind::Default).unwrap();
    assert_eq!(converting.kind(), ResamplerKind::WindowedSinc);
    assert!(converting.pos_filter_width() > FixedFrame::ONE);
    assert_eq!(
        converting.neg_filter_width() - converting.pos_filter_width(),
        FixedFrame::EPSILON
    );

    let forced =
        Mixer::select(format(2, 44_100), format(2, 48_000), ResamplerKind::Point).unwrap();
    assert_eq!(forced.kind(), ResamplerKind::Point);
}

#[test]
fn selection_failures_are_reported() {
    let err = Mixer::select(format(3, 48_000), format(2, 48_000), ResamplerKind::Default)
        .unwrap_err();
    assert!(matches!(
        err,
        MixerError::UnsupportedChannels {
            source_channels: 3,
            dest_channels: 2
        }
    ));

    let err = Mixer::select(format(1, 192_000), format(1, 44_100), ResamplerKind::WindowedSinc)
        .unwrap_err();
    assert!(matches!(err, MixerError::UnsupportedResampler { .. }));
    assert!(err.to_string().contains("windowed-sinc"));

    let err = Mixer::select_with(format(1, 48_000), format(1, 44_100), ResamplerKind::Default, 0)
        .unwrap_err();
    assert!(matches!(err, MixerError::UnsupportedResampler { .. }));

    assert!(Mixer::select(format(1, 176_400), format(1, 44_100), ResamplerKind::Default).is_ok());
}

#[test]
fn windowed_sinc_is_transparent_at_unity_rate() {
    let mut mixer =
        Mixer::select(format(1, 48_000), format(1, 48_000), ResamplerKind::WindowedSinc).unwrap();
    let source: Vec<f32> = (0..64).map(|i| ((i * 13) % 17) as f32 - 8.0).collect();
    let mut dest = vec![0.0f32; 64];
    let (mut dest_offset, mut source_offset) = (0, FixedFrame::from_frames(16));

    let consumed = mixer.mix(&mut dest, 64, &mut dest_offset, &source, &mut source_offset, false);
    assert!(consumed);
    // Consumed once the positive filter edge would leave the buffer.
    assert_eq!(dest_offset, 64 - 12 - 16 + 1);
    for frame in 0..dest_offset {
        assert!((dest[frame] - source[frame + 16]).abs() < 1e-4, "frame {frame}");
    }
}

#[test]
fn reset_forgets_carried_state() {
    let mut mixer = converting_mixer(ResamplerKind::WindowedSinc);
    mixer.bookkeeping_mut().set_source_pos_modulo(3);
    mixer
        .source_info_mut()
        .set_next_positions(10, FixedFrame::from_frames(9));

    mixer.reset();
    assert_eq!(mixer.bookkeeping().source_pos_modulo(), 0);
    assert_eq!(mixer.source_info().next_dest_frame(), None);
    assert_eq!(mixer.bookkeeping().step_size().raw(), 7_526);
}

fn triangle_table() -> Arc<FilterTable> {
    // One frame of reach, 512 entries per frame: linear interpolation.
    let coefficients = (0..=512).map(|i| 1.0 - i as f32 / 512.0).collect();
    Arc::new(FilterTable::from_coefficients(1, coefficients).unwrap())
}

#[test]
fn supplied_filter_table_is_used_for_windowed_sinc() {
    assert!(FilterTable::from_coefficients(1, vec![0.0; 512]).is_none());
    assert!(FilterTable::from_coefficients(0, vec![1.0]).is_none());

    let mut mixer = Mixer::select_with_table(
        format(1, 24_000),
        format(1, 48_000),
        ResamplerKind::Default,
        triangle_table(),
    )
    .unwrap();
    assert_eq!(mixer.kind(), ResamplerKind::WindowedSinc);
    assert_eq!(mixer.neg_filter_width(), FixedFrame::ONE);
    mixer
        .bookkeeping_mut()
        .set_rate_from(TimelineRate::new(24_000 * FRAC_ONE as u64, 48_000));

    let source: Vec<f32> = (0..8).map(|i| i as f32).collect();
    let mut dest = [0.0f32; 15];
    let (mut dest_offset, mut source_offset) = (0, FixedFrame::ZERO);
    let consumed = mixer.mix(&mut dest, 15, &mut dest_offset, &source, &mut source_offset, false);

    assert!(consumed);
    assert_eq!(dest_offset, 15);
    let expected: Vec<f32> = (0..15).map(|i| i as f32 / 2.0).collect();
    assert_eq!(dest.to_vec(), expected);
}

#[test]
fn supplied_filter_table_still_honours_selection_limits() {
    let err = Mixer::select_with_table(
        format(1, 192_000),
        format(1, 44_100),
        ResamplerKind::WindowedSinc,
        triangle_table(),
    )
    .unwrap_err();
    assert!(matches!(err, MixerError::UnsupportedResampler { .. }));

    let point = Mixer::select_with_table(
        format(1, 48_000),
        format(1, 48_000),
        ResamplerKind::Default,
        triangle_table(),
    )
    .unwrap();
    assert_eq!(point.kind(), ResamplerKind::Point);
}
