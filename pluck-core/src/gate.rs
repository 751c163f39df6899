//! # Volume Gate
//!
//! Measures the loudness of a PCM frame and keeps near-silent frames away
//! from the pitch estimator, which produces garbage on noise floors.

/// RMS level below which a frame counts as silence.
pub const DEFAULT_SILENCE_THRESHOLD: f32 = 0.001;

/// Root-mean-square level of a frame of samples in [-1, 1].
///
/// An empty frame has a level of zero.
pub fn rms(frame: &[f32]) -> f32 {
    if frame.is_empty() {
        return 0.0;
    }
    (frame.iter().map(|&s| s * s).sum::<f32>() / frame.len() as f32).sqrt()
}

/// Suppresses frames whose RMS level is under a fixed threshold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolumeGate {
    threshold: f32,
}

impl Default for VolumeGate {
    fn default() -> Self {
        Self::new(DEFAULT_SILENCE_THRESHOLD)
    }
}

impl VolumeGate {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Returns the frame's level if it is loud enough to analyse.
    ///
    /// # Returns
    /// * `Ok(level)` - Level at or above the threshold
    /// * `Err(level)` - Silence or noise; the tick should be skipped
    pub fn admit(&self, frame: &[f32]) -> Result<f32, f32> {
        let level = rms(frame);
        if level < self.threshold {
            Err(level)
        } else {
            Ok(level)
        }
    }
}
