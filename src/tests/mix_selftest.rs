use std::sync::Arc;

use dasp_signal::Signal;

use crate::{Format, MixStage, MixStageOptions, PacketQueue, ResamplerKind};

const DEST_RATE: u32 = 48_000;
const BLOCK_FRAMES: usize = 480;
const BLOCK_NS: i64 = 10_000_000;

fn sine(rate: u32, hz: f64, frames: usize) -> Vec<f32> {
    let mut signal = dasp_signal::rate(rate as f64).const_hz(hz).sine();
    (0..frames).map(|_| (signal.next() * 0.5) as f32).collect()
}

fn render(stage: &mut MixStage, blocks: usize) -> Vec<f32> {
    let mut recorded = Vec::new();
    for block in 0..blocks {
        let output = stage.lock_output(
            block as i64 * BLOCK_NS,
            (block * BLOCK_FRAMES) as i64,
            BLOCK_FRAMES,
        );
        recorded.extend_from_slice(output.samples());
    }
    recorded
}

#[test]
fn mix_selftest_sine_passes_through_unchanged_at_matching_rate() {
    let source_format = Format::new(1, DEST_RATE).expect("source format");
    let input = sine(DEST_RATE, 1_000.0, BLOCK_FRAMES * 10);
    let queue = Arc::new(PacketQueue::starting_at(source_format, 0));
    for chunk in input.chunks(BLOCK_FRAMES) {
        queue.push(None, chunk.to_vec());
    }

    let dest_format = Format::new(2, DEST_RATE).expect("dest format");
    let mut stage = MixStage::new(dest_format, MixStageOptions::default().with_max_frames(BLOCK_FRAMES));
    stage.add_input(queue.clone()).expect("attach");

    let recorded = render(&mut stage, 10);
    assert_eq!(recorded.len(), input.len() * 2);
    for (frame, expected) in input.iter().enumerate() {
        assert_eq!(recorded[frame * 2], *expected, "left channel at frame {frame}");
        assert_eq!(recorded[frame * 2 + 1], *expected, "right channel at frame {frame}");
    }
    assert!(queue.is_empty());
}

#[test]
fn mix_selftest_sine_converts_from_44100() {
    let source_rate = 44_100u32;
    let source_format = Format::new(1, source_rate).expect("source format");
    let input = sine(source_rate, 1_000.0, 4_410);
    let queue = Arc::new(PacketQueue::starting_at(source_format, 0));
    for chunk in input.chunks(441) {
        queue.push(None, chunk.to_vec());
    }

    let dest_format = Format::new(1, DEST_RATE).expect("dest format");
    let options = MixStageOptions::default()
        .with_max_frames(BLOCK_FRAMES)
        .with_resampler(ResamplerKind::WindowedSinc);
    let mut stage = MixStage::new(dest_format, options);
    stage.add_input(queue).expect("attach");

    let recorded = render(&mut stage, 10);
    let expected = sine(DEST_RATE, 1_000.0, recorded.len());

    // Skip the filter warm-up at the start and the underflow at the end of the data.
    let window = 64..4_700;
    let max_error = window
        .clone()
        .map(|frame| (recorded[frame] - expected[frame]).abs())
        .fold(0.0f32, f32::max);
    assert!(max_error < 0.02, "max error {max_error}");

    let corr = correlation(&expected[window.clone()], &recorded[window]);
    assert!(corr > 0.999, "correlation too low: {corr}");
    assert!((rms(&recorded[64..4_700]) - rms(&expected[64..4_700])).abs() < 0.01);
}

fn rms(signal: &[f32]) -> f32 {
    let energy: f32 = signal.iter().map(|s| s * s).sum();
    (energy / signal.len() as f32).sqrt()
}

fn correlation(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f64;
    let mut energy_a = 0.0f64;
    let mut energy_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += *x as f64 * *y as f64;
        energy_a += (*x as f64).powi(2);
        energy_b += (*y as f64).powi(2);
    }
    if energy_a == 0.0 || energy_b == 0.0 {
        0.0
    } else {
        (dot / (energy_a.sqrt() * energy_b.sqrt())) as f32
    }
}
