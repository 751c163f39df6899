//! # Fast Fourier Transform (FFT) Module
//!
//! Magnitude spectra for refining pitch estimates. Frames are DC-centred
//! and Hann windowed before the transform to keep leakage out of the
//! neighbouring bins.

use std::sync::Arc;

use rustfft::{num_complex::Complex, FftPlanner};

/// Complex input for the transform: the frame minus its mean, under a
/// Hann window.
fn windowed_input(signal: &[f32]) -> impl Iterator<Item = Complex<f32>> + '_ {
    let mean = signal.iter().sum::<f32>() / signal.len().max(1) as f32;
    let span = signal.len().saturating_sub(1).max(1) as f32;
    signal.iter().enumerate().map(move |(i, &sample)| {
        let weight = if signal.len() < 2 {
            1.0
        } else {
            0.5 - 0.5 * (std::f32::consts::TAU * i as f32 / span).cos()
        };
        Complex::new((sample - mean) * weight, 0.0)
    })
}

/// Magnitudes of one frame up to the Nyquist bin.
///
/// Keeps the length of the frame it came from, since the bin width is
/// `sample_rate / frame_len` and odd frames have `frame_len / 2` bins.
#[derive(Debug, Clone, PartialEq)]
pub struct Spectrum {
    pub magnitudes: Vec<f32>,
    pub frame_len: usize,
}

impl Spectrum {
    pub fn bin_width(&self, sample_rate: u32) -> f32 {
        sample_rate as f32 / self.frame_len.max(1) as f32
    }

    /// Locates the strongest bin within `radius` bins of `freq` and returns
    /// the peak position from a parabola through the log magnitudes around it.
    ///
    /// `None` when the peak sits on the edge of the spectrum or the
    /// neighbourhood is too flat to fit.
    pub fn peak_near(&self, freq: f32, sample_rate: u32, radius: f32) -> Option<f32> {
        let mags = &self.magnitudes;
        if mags.len() < 3 || !freq.is_finite() || freq <= 0.0 {
            return None;
        }
        let width = self.bin_width(sample_rate);
        let centre = freq / width;
        let first = (centre - radius).max(1.0) as usize;
        let last = ((centre + radius) as usize).min(mags.len() - 2);
        if first > last {
            return None;
        }

        let peak = (first..=last).max_by(|&a, &b| mags[a].total_cmp(&mags[b]))?;
        let [left, mid, right] = [mags[peak - 1], mags[peak], mags[peak + 1]].map(f32::ln);
        if ![left, mid, right].iter().all(|v| v.is_finite()) {
            return None;
        }
        let curvature = left - 2.0 * mid + right;
        if curvature.abs() < 1e-6 {
            return None;
        }
        let offset = 0.5 * (left - right) / curvature;
        Some((peak as f32 + offset) * width).filter(|hz| hz.is_finite() && *hz > 0.0)
    }
}

/// Reusable forward FFT that turns frames into magnitude spectra.
///
/// The plan is cached for the last frame length seen, so feeding frames of
/// a fixed size only plans once.
pub struct SpectrumAnalyzer {
    fft: Option<(usize, Arc<dyn rustfft::Fft<f32>>)>,
    buffer: Vec<Complex<f32>>,
}

impl std::fmt::Debug for SpectrumAnalyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpectrumAnalyzer")
            .field("size", &self.buffer.len())
            .finish()
    }
}

impl Default for SpectrumAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl SpectrumAnalyzer {
    pub fn new() -> Self {
        Self {
            fft: None,
            buffer: Vec::new(),
        }
    }

    /// Computes the magnitude spectrum of `signal`.
    ///
    /// Bin `k` of the result sits at `k * sample_rate / signal.len()` Hz.
    pub fn spectrum(&mut self, signal: &[f32]) -> Spectrum {
        let size = signal.len();
        if size == 0 {
            return Spectrum { magnitudes: Vec::new(), frame_len: 0 };
        }

        let cached = self
            .fft
            .as_ref()
            .filter(|(planned, _)| *planned == size)
            .map(|(_, fft)| Arc::clone(fft));
        let fft = match cached {
            Some(fft) => fft,
            None => {
                let fft = FftPlanner::<f32>::new().plan_fft_forward(size);
                self.fft = Some((size, Arc::clone(&fft)));
                fft
            }
        };

        self.buffer.clear();
        self.buffer.extend(windowed_input(signal));
        fft.process(&mut self.buffer);

        Spectrum {
            magnitudes: self.buffer.iter().take(size / 2).map(|c| c.norm()).collect(),
            frame_len: size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sine_peaks_in_its_bin() {
        let size = 1024;
        let sample_rate = 1024.0;
        // Exactly bin 64.
        let signal: Vec<f32> = (0..size)
            .map(|i| (2.0 * std::f32::consts::PI * 64.0 * i as f32 / sample_rate).sin())
            .collect();

        let mut analyzer = SpectrumAnalyzer::new();
        let spectrum = analyzer.spectrum(&signal);
        assert_eq!(spectrum.magnitudes.len(), size / 2);

        let peak = spectrum
            .magnitudes
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(bin, _)| bin);
        assert_eq!(peak, Some(64));
    }

    #[test]
    fn replans_when_frame_size_changes() {
        let mut analyzer = SpectrumAnalyzer::new();
        assert_eq!(analyzer.spectrum(&[0.1; 256]).magnitudes.len(), 128);
        assert_eq!(analyzer.spectrum(&[0.1; 512]).magnitudes.len(), 256);
        assert!(analyzer.spectrum(&[]).magnitudes.is_empty());
    }

    #[test]
    fn constant_frame_has_no_energy() {
        let spectrum = SpectrumAnalyzer::new().spectrum(&[0.5; 16]);
        assert!(spectrum.magnitudes.iter().all(|m| m.abs() < 1e-5));
    }

    #[test]
    fn odd_frames_use_their_own_bin_width() {
        let sample_rate = 44100;
        let len = 2049;
        // 100 whole cycles, so the tone sits exactly on bin 100 of a 2049-point transform.
        let freq = 100.0 * sample_rate as f32 / len as f32;
        let signal: Vec<f32> = (0..len)
            .map(|i| (std::f32::consts::TAU * 100.0 * i as f32 / len as f32).sin())
            .collect();

        let spectrum = SpectrumAnalyzer::new().spectrum(&signal);
        assert_eq!(spectrum.frame_len, len);
        assert_eq!(spectrum.magnitudes.len(), 1024);

        let peak = spectrum.peak_near(freq + 5.0, sample_rate, 2.0).unwrap();
        assert!((peak - freq).abs() < 0.1, "expected {freq}, got {peak}");
    }

    #[test]
    fn peak_near_gives_up_on_tiny_or_flat_spectra() {
        let tiny = Spectrum { magnitudes: vec![1.0, 2.0], frame_len: 4 };
        assert_eq!(tiny.peak_near(100.0, 44100, 2.0), None);

        let flat = Spectrum { magnitudes: vec![1.0; 64], frame_len: 128 };
        assert_eq!(flat.peak_near(3000.0, 44100, 2.0), None);
        assert_eq!(flat.peak_near(-5.0, 44100, 2.0), None);
    }
}
