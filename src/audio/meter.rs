//! RMS volume metering
//!
//! Feeds the caller's volume hook and the barge-in heuristics. The raw RMS
//! per frame is jittery, so the exposed value is exponentially smoothed.
//! The meter only observes frames; it never gates or drops audio.

use crate::audio::buffer::AudioFrame;

/// Per-frame RMS energy meter with exponential smoothing.
pub struct VolumeMeter {
    /// Smoothing factor: displayed = displayed*alpha + rms*(1-alpha)
    alpha: f32,
    /// Current smoothed value
    smoothed: f32,
}

impl VolumeMeter {
    pub fn new(alpha: f32) -> Self {
        Self {
            alpha,
            smoothed: 0.0,
        }
    }

    /// Measure a frame and fold it into the smoothed value.
    /// Returns the raw RMS energy of the frame.
    pub fn measure(&mut self, frame: &AudioFrame) -> f32 {
        let rms = Self::rms(&frame.samples);
        self.smoothed = self.smoothed * self.alpha + rms * (1.0 - self.alpha);
        rms
    }

    /// Smoothed energy, clamped to [0, 1].
    pub fn smoothed(&self) -> f32 {
        self.smoothed.clamp(0.0, 1.0)
    }

    /// Reset the smoothed value, e.g. on session start.
    pub fn reset(&mut self) {
        self.smoothed = 0.0;
    }

    fn rms(samples: &[f32]) -> f32 {
        if samples.is_empty() {
            return 0.0;
        }
        let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
        (sum_sq / samples.len() as f32).sqrt()
    }
}
