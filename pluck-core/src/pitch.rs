//! # Pitch Detection Module
//!
//! The pipeline only needs "frame in, frequency or nothing out", so pitch
//! estimation sits behind the [`PitchEstimator`] trait. [`YinEstimator`] is
//! the stock implementation used by the command line tool.
//!
//! ## Features
//! - YIN pitch detection with octave error prevention
//! - Clarity check to reject noise
//! - Parabolic interpolation for sub-sample accuracy
//! - Optional refinement against the magnitude spectrum

use crate::fft::SpectrumAnalyzer;

/// Lowest frequency accepted as a real pitch.
pub const DEFAULT_MIN_FREQUENCY: f32 = 20.0;

/// Highest normalised YIN dip that still counts as a clear tone.
pub const DEFAULT_CLARITY_THRESHOLD: f32 = 0.1;

/// How far from the YIN estimate, in bins, refinement looks for the peak.
const REFINE_RADIUS_BINS: f32 = 2.0;

/// Turns a frame of samples into a fundamental frequency.
///
/// Returning `None` means no pitch was found; the pipeline skips the tick.
pub trait PitchEstimator {
    fn estimate(&mut self, frame: &[f32]) -> Option<f32>;
}

impl<F> PitchEstimator for F
where
    F: FnMut(&[f32]) -> Option<f32>,
{
    fn estimate(&mut self, frame: &[f32]) -> Option<f32> {
        self(frame)
    }
}

/// YIN estimator with optional spectral refinement.
#[derive(Debug)]
pub struct YinEstimator {
    sample_rate: u32,
    clarity_threshold: f32,
    min_frequency: f32,
    refine: Option<SpectrumAnalyzer>,
}

impl YinEstimator {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            clarity_threshold: DEFAULT_CLARITY_THRESHOLD,
            min_frequency: DEFAULT_MIN_FREQUENCY,
            refine: Some(SpectrumAnalyzer::new()),
        }
    }

    pub fn with_clarity_threshold(mut self, threshold: f32) -> Self {
        self.clarity_threshold = threshold;
        self
    }

    pub fn with_min_frequency(mut self, min_frequency: f32) -> Self {
        self.min_frequency = min_frequency;
        self
    }

    /// Enables or disables refinement against the FFT spectrum.
    pub fn with_refinement(mut self, enabled: bool) -> Self {
        self.refine = enabled.then(SpectrumAnalyzer::new);
        self
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl PitchEstimator for YinEstimator {
    fn estimate(&mut self, frame: &[f32]) -> Option<f32> {
        let rough = detect_pitch_yin(
            frame,
            self.sample_rate,
            self.clarity_threshold,
            self.min_frequency,
        )?;

        match self.refine.as_mut() {
            Some(analyzer) => Some(
                analyzer
                    .spectrum(frame)
                    .peak_near(rough, self.sample_rate, REFINE_RADIUS_BINS)
                    .unwrap_or(rough),
            ),
            None => Some(rough),
        }
    }
}

/// The YIN pitch detection algorithm.
///
/// No amplitude gate is applied here; callers are expected to drop silent
/// frames beforehand.
///
/// # Arguments
/// * `signal` - Input audio signal
/// * `sample_rate` - Sample rate in Hz
/// * `clarity_threshold` - Largest normalised dip accepted as a tone
/// * `min_frequency` - Estimates at or below this are discarded
///
/// # Returns
/// * `Some(frequency)` - Detected frequency in Hz
/// * `None` - No pitch detected (noise, or a frame too short for the period)
pub fn detect_pitch_yin(
    signal: &[f32],
    sample_rate: u32,
    clarity_threshold: f32,
    min_frequency: f32,
) -> Option<f32> {
    let half = signal.len() / 2;
    if half < 3 {
        return None;
    }
    let mut yin_buffer = vec![0.0; half];

    // --- Step 1 & 2: Difference function ---
    for tau in 1..half {
        let mut diff = 0.0;
        for i in 0..half {
            let delta = signal[i] - signal[i + tau];
            diff += delta * delta;
        }
        yin_buffer[tau] = diff;
    }

    // --- Step 3: Cumulative mean normalized difference ---
    let mut running_sum = 0.0;
    yin_buffer[0] = 1.0;
    for tau in 1..half {
        running_sum += yin_buffer[tau];
        if running_sum != 0.0 {
            yin_buffer[tau] *= tau as f32 / running_sum;
        } else {
            yin_buffer[tau] = 1.0;
        }
    }

    // --- Step 4: First significant dip, to avoid octave errors ---
    let min_val = yin_buffer
        .iter()
        .skip(1)
        .cloned()
        .fold(f32::INFINITY, f32::min);
    let threshold = min_val + 0.05;

    let mut period = (2..half).find(|&tau| {
        yin_buffer[tau] < threshold && yin_buffer[tau] < yin_buffer[tau - 1]
    })?;
    // Walk down to the bottom of the dip.
    while period + 1 < half && yin_buffer[period + 1] < yin_buffer[period] {
        period += 1;
    }

    // --- Step 5: Clarity check ---
    if yin_buffer[period] > clarity_threshold {
        return None;
    }

    // --- Step 6: Parabolic interpolation ---
    if period + 1 >= half {
        return None;
    }

    let y1 = yin_buffer[period - 1];
    let y2 = yin_buffer[period];
    let y3 = yin_buffer[period + 1];

    let period_float = if (y1 - 2.0 * y2 + y3) != 0.0 {
        let peak_shift = (y1 - y3) / (2.0 * (y1 - 2.0 * y2 + y3));
        period as f32 + peak_shift
    } else {
        period as f32
    };

    let frequency = sample_rate as f32 / period_float;
    if frequency.is_finite() && frequency > min_frequency {
        Some(frequency)
    } else {
        None
    }
}
