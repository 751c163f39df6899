//! Replays a WAV file as if it were a live input.
//!
//! Each tick takes the most recent `frame_size` samples, then advances by
//! the number of samples one tick interval would cover in real time.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use hound::SampleFormat;
use pluck_core::FrameSource;

pub struct WavFrameSource {
    samples: Vec<f32>,
    sample_rate: u32,
    frame_size: usize,
    hop: usize,
    cursor: usize,
    frame_end: usize,
}

impl WavFrameSource {
    /// Reads a WAV file, mixing all channels down to mono.
    pub fn open(path: &Path, frame_size: usize, tick_interval: Duration) -> Result<Self> {
        let mut reader = hound::WavReader::open(path)
            .with_context(|| format!("opening {}", path.display()))?;
        let spec = reader.spec();
        let channels = spec.channels.max(1) as usize;

        let interleaved: Vec<f32> = match spec.sample_format {
            SampleFormat::Float => reader
                .samples::<f32>()
                .collect::<Result<_, _>>()
                .context("reading float samples")?,
            SampleFormat::Int => {
                let scale = (1_i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect::<Result<_, _>>()
                    .context("reading integer samples")?
            }
        };

        let mono = interleaved
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect();

        let hop = (spec.sample_rate as f64 * tick_interval.as_secs_f64()).round() as usize;
        log::info!(
            "[FILE] {}: {} Hz, {} channel(s), hop {} samples",
            path.display(),
            spec.sample_rate,
            channels,
            hop
        );
        Ok(Self::from_samples(mono, spec.sample_rate, frame_size, hop))
    }

    pub fn from_samples(samples: Vec<f32>, sample_rate: u32, frame_size: usize, hop: usize) -> Self {
        Self {
            samples,
            sample_rate,
            frame_size,
            hop: hop.max(1),
            cursor: frame_size,
            frame_end: 0,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl FrameSource for WavFrameSource {
    fn next_frame(&mut self) -> Option<Vec<f32>> {
        if self.is_finished() {
            return None;
        }
        let frame = self.samples[self.cursor - self.frame_size..self.cursor].to_vec();
        self.frame_end = self.cursor;
        self.cursor += self.hop;
        Some(frame)
    }

    /// Position of the end of the current frame, in seconds.
    fn now(&self) -> f64 {
        self.frame_end as f64 / self.sample_rate as f64
    }

    fn is_finished(&self) -> bool {
        self.cursor > self.samples.len()
    }
}
