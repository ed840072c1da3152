//! Per-mixer gain state.
//!
//! The mixing arithmetic treats gain as an opaque producer of one scale value per destination frame.
//! Gain combines a source gain (which may ramp linearly in the scale domain), a destination gain and a
//! mute flag.

/// Gain at or below this level is treated as silence.
pub const MIN_GAIN_DB: f32 = -160.0;
/// Highest accepted gain.
pub const MAX_GAIN_DB: f32 = 24.0;
/// Unity gain.
pub const UNITY_GAIN_DB: f32 = 0.0;

const MIN_GAIN_SCALE: f32 = 1.0e-8;
const UNITY_SCALE: f32 = 1.0;

/// Convert decibels to a linear amplitude scale, clamping to the supported range.
pub fn db_to_scale(gain_db: f32) -> f32 {
    if gain_db <= MIN_GAIN_DB {
        0.0
    } else {
        10f32.powf(gain_db.min(MAX_GAIN_DB) / 20.0)
    }
}

/// Convert a linear amplitude scale to decibels.
pub fn scale_to_db(scale: f32) -> f32 {
    if scale <= MIN_GAIN_SCALE {
        MIN_GAIN_DB
    } else {
        (20.0 * scale.log10()).clamp(MIN_GAIN_DB, MAX_GAIN_DB)
    }
}

#[derive(Clone, Copy, Debug)]
struct Ramp {
    start_scale: f32,
    end_scale: f32,
    total_frames: u64,
    elapsed_frames: u64,
}

impl Ramp {
    fn scale_at(&self, frame_offset: u64) -> f32 {
        let position = (self.elapsed_frames + frame_offset).min(self.total_frames);
        let progress = position as f64 / self.total_frames as f64;
        (self.start_scale as f64 + (self.end_scale - self.start_scale) as f64 * progress) as f32
    }
}

/// Source/destination gain with optional linear ramping.
#[derive(Clone, Debug)]
pub struct Gain {
    source_scale: f32,
    dest_scale: f32,
    muted: bool,
    ramp: Option<Ramp>,
}

impl Default for Gain {
    fn default() -> Self {
        Self {
            source_scale: UNITY_SCALE,
            dest_scale: UNITY_SCALE,
            muted: false,
            ramp: None,
        }
    }
}

impl Gain {
    /// Unity gain, not muted, not ramping.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the source gain immediately, cancelling any ramp in progress.
    pub fn set_source_gain_db(&mut self, gain_db: f32) {
        self.ramp = None;
        self.source_scale = db_to_scale(gain_db);
    }

    /// Set the destination gain.
    pub fn set_dest_gain_db(&mut self, gain_db: f32) {
        self.dest_scale = db_to_scale(gain_db);
    }

    /// Ramp the source gain from its current value to `gain_db` over `ramp_frames` destination frames.
    pub fn set_source_gain_with_ramp(&mut self, gain_db: f32, ramp_frames: u64) {
        let end_scale = db_to_scale(gain_db);
        let start_scale = self.source_scale_at(0);
        if ramp_frames == 0 || start_scale == end_scale {
            self.set_source_gain_db(gain_db);
            return;
        }
        self.source_scale = end_scale;
        self.ramp = Some(Ramp {
            start_scale,
            end_scale,
            total_frames: ramp_frames,
            elapsed_frames: 0,
        });
    }

    /// Mute or unmute without touching the configured gain.
    pub fn set_mute(&mut self, muted: bool) {
        self.muted = muted;
    }

    /// Whether the gain is muted.
    pub fn is_muted(&self) -> bool {
        self.muted
    }

    /// Source gain in decibels (the ramp target while ramping).
    pub fn source_gain_db(&self) -> f32 {
        scale_to_db(self.source_scale)
    }

    /// Destination gain in decibels.
    pub fn dest_gain_db(&self) -> f32 {
        scale_to_db(self.dest_scale)
    }

    fn source_scale_at(&self, frame_offset: u64) -> f32 {
        match &self.ramp {
            Some(ramp) => ramp.scale_at(frame_offset),
            None => self.source_scale,
        }
    }

    /// Combined scale for the destination frame `frame_offset` frames past the current position.
    pub fn scale_at(&self, frame_offset: u64) -> f32 {
        if self.muted {
            return 0.0;
        }
        let scale = self.source_scale_at(frame_offset) * self.dest_scale;
        if scale <= MIN_GAIN_SCALE { 0.0 } else { scale }
    }

    /// Move the ramp forward by `frames` destination frames.
    pub fn advance(&mut self, frames: u64) {
        if let Some(ramp) = self.ramp.as_mut() {
            ramp.elapsed_frames = ramp.elapsed_frames.saturating_add(frames);
            if ramp.elapsed_frames >= ramp.total_frames {
                self.source_scale = ramp.end_scale;
                self.ramp = None;
            }
        }
    }

    /// Whether a ramp is in progress.
    pub fn is_ramping(&self) -> bool {
        self.ramp.is_some()
    }

    /// True when every frame produced right now would be scaled to zero.
    pub fn is_silent(&self) -> bool {
        self.muted || (!self.is_ramping() && self.scale_at(0) == 0.0)
    }

    /// True when the combined scale is exactly one and not ramping.
    pub fn is_unity(&self) -> bool {
        !self.muted && !self.is_ramping() && self.source_scale * self.dest_scale == UNITY_SCALE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn db_conversions_clamp_to_range() {
        assert_eq!(db_to_scale(UNITY_GAIN_DB), 1.0);
        assert_eq!(db_to_scale(MIN_GAIN_DB), 0.0);
        assert_eq!(db_to_scale(200.0), db_to_scale(MAX_GAIN_DB));
        assert!((db_to_scale(-6.0) - 0.501_187).abs() < 1e-5);
        assert_eq!(scale_to_db(0.0), MIN_GAIN_DB);
        assert!((scale_to_db(0.5) + 6.0206).abs() < 1e-3);
    }

    #[test]
    fn default_gain_is_unity() {
        let gain = Gain::new();
        assert!(gain.is_unity());
        assert!(!gain.is_silent());
        assert_eq!(gain.scale_at(100), 1.0);
    }

    #[test]
    fn ramp_interpolates_linearly_and_completes() {
        let mut gain = Gain::new();
        gain.set_source_gain_db(MIN_GAIN_DB);
        assert!(gain.is_silent());

        gain.set_source_gain_with_ramp(UNITY_GAIN_DB, 10);
        assert!(gain.is_ramping());
        assert!(!gain.is_silent());
        assert_eq!(gain.scale_at(0), 0.0);
        assert!((gain.scale_at(5) - 0.5).abs() < 1e-6);
        assert_eq!(gain.scale_at(25), 1.0);

        gain.advance(4);
        assert!((gain.scale_at(1) - 0.5).abs() < 1e-6);
        gain.advance(6);
        assert!(!gain.is_ramping());
        assert!(gain.is_unity());
    }

    #[test]
    fn mute_overrides_gain() {
        let mut gain = Gain::new();
        gain.set_mute(true);
        assert!(gain.is_silent());
        assert!(!gain.is_unity());
        assert_eq!(gain.scale_at(0), 0.0);
        gain.set_mute(false);
        assert!(gain.is_unity());
    }

    #[test]
    fn dest_gain_combines_with_source_gain() {
        let mut gain = Gain::new();
        gain.set_source_gain_db(-6.0);
        gain.set_dest_gain_db(6.0);
        assert!((gain.scale_at(0) - 1.0).abs() < 1e-4);
    }
}
