//! Windowed-sinc coefficient tables.

use std::f64::consts::PI;

use crate::fixed::FRAC_BITS;

/// Table resolution: entries per frame of distance, as a power of two.
const TABLE_FRAC_BITS: u32 = 9;
const TABLE_SHIFT: u32 = FRAC_BITS - TABLE_FRAC_BITS;
const TABLE_MASK: u64 = (1 << TABLE_SHIFT) - 1;

/// Symmetric filter kernel sampled at `2^TABLE_FRAC_BITS` points per frame of distance.
///
/// Lookups take a distance in source sub-frames and interpolate linearly between table entries.
#[derive(Clone, Debug)]
pub struct FilterTable {
    side_frames: usize,
    coefficients: Vec<f32>,
}

impl FilterTable {
    /// Hann-windowed sinc reaching `side_frames` frames on each side of the sampling point.
    ///
    /// `cutoff` is relative to the source Nyquist frequency and is clamped to `(0, 1]`.
    pub fn windowed_sinc(side_frames: usize, cutoff: f64) -> Self {
        assert!(side_frames > 0, "filter needs at least one frame per side");
        let cutoff = cutoff.clamp(f64::EPSILON, 1.0);
        let per_frame = 1usize << TABLE_FRAC_BITS;
        let len = side_frames * per_frame + 1;

        let coefficients = (0..len)
            .map(|index| {
                let x = index as f64 / per_frame as f64;
                let window = 0.5 * (1.0 + (PI * x / side_frames as f64).cos());
                let value = cutoff * sinc(cutoff * x) * window;
                if value.abs() < 1e-9 { 0.0 } else { value as f32 }
            })
            .collect();

        Self {
            side_frames,
            coefficients,
        }
    }

    /// Wrap an externally computed kernel.
    ///
    /// `coefficients[i]` is the weight at a distance of `i / 512` frames. The table must hold
    /// `side_frames * 512 + 1` entries.
    pub fn from_coefficients(side_frames: usize, coefficients: Vec<f32>) -> Option<Self> {
        let expected = side_frames * (1usize << TABLE_FRAC_BITS) + 1;
        if side_frames == 0 || coefficients.len() != expected {
            return None;
        }
        Some(Self {
            side_frames,
            coefficients,
        })
    }

    /// Reach of the kernel on each side, in whole frames.
    pub fn side_frames(&self) -> usize {
        self.side_frames
    }

    /// Weight at `distance` source sub-frames from the sampling point.
    pub fn coefficient(&self, distance: i64) -> f32 {
        let distance = distance.unsigned_abs();
        let index = (distance >> TABLE_SHIFT) as usize;
        let last = self.coefficients.len() - 1;
        if index >= last {
            return if index == last && distance & TABLE_MASK == 0 {
                self.coefficients[last]
            } else {
                0.0
            };
        }
        let frac = (distance & TABLE_MASK) as f32 / (1u64 << TABLE_SHIFT) as f32;
        let a = self.coefficients[index];
        let b = self.coefficients[index + 1];
        a + (b - a) * frac
    }
}

fn sinc(x: f64) -> f64 {
    if x == 0.0 {
        1.0
    } else {
        let arg = PI * x;
        arg.sin() / arg
    }
}
