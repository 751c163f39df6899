//! Configuration for a practice session.
//!
//! Stored as pretty-printed JSON. Missing fields fall back to their
//! defaults, so a config file only needs the values it changes.

use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::audio::BUFFER_SIZE;
use crate::error::{PluckError, Result};
use crate::gate::DEFAULT_SILENCE_THRESHOLD;
use crate::onset::DEFAULT_REBOUND_OFFSET;
use crate::pitch::{DEFAULT_CLARITY_THRESHOLD, DEFAULT_MIN_FREQUENCY, YinEstimator};
use crate::tuning::{DEFAULT_REFERENCE_PITCH, NoteTable};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PracticeConfig {
    /// Frequency of A4 in Hz; also selects the table in a notes file.
    pub reference_pitch: f32,
    /// Samples per analysis frame.
    pub frame_size: usize,
    /// Time between ticks of the sampling loop.
    pub tick_interval_ms: u64,
    /// RMS level below which frames are ignored.
    pub silence_threshold: f32,
    /// Volume rebound after a decay that counts as a new attack.
    pub rebound_offset: f32,
    pub min_frequency: f32,
    pub clarity_threshold: f32,
    pub refine_with_spectrum: bool,
    /// Optional `notes.json` file; equal temperament is used when absent.
    pub note_table: Option<PathBuf>,
}

impl Default for PracticeConfig {
    fn default() -> Self {
        Self {
            reference_pitch: DEFAULT_REFERENCE_PITCH,
            frame_size: BUFFER_SIZE,
            tick_interval_ms: 16,
            silence_threshold: DEFAULT_SILENCE_THRESHOLD,
            rebound_offset: DEFAULT_REBOUND_OFFSET,
            min_frequency: DEFAULT_MIN_FREQUENCY,
            clarity_threshold: DEFAULT_CLARITY_THRESHOLD,
            refine_with_spectrum: true,
            note_table: None,
        }
    }
}

impl PracticeConfig {
    /// Loads a configuration from a JSON file and validates it.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let mut file = File::open(path)?;
        let mut data = String::new();
        file.read_to_string(&mut data)?;
        let config: PracticeConfig = serde_json::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }

    /// Saves the configuration as pretty-printed JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json_string = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path)?;
        file.write_all(json_string.as_bytes())?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !self.reference_pitch.is_finite() || self.reference_pitch <= 0.0 {
            return Err(PluckError::InvalidConfig(format!(
                "reference_pitch must be positive, got {}",
                self.reference_pitch
            )));
        }
        if self.frame_size == 0 {
            return Err(PluckError::InvalidConfig("frame_size must be non-zero".into()));
        }
        if self.tick_interval_ms == 0 {
            return Err(PluckError::InvalidConfig("tick_interval_ms must be non-zero".into()));
        }
        for (name, value) in [
            ("silence_threshold", self.silence_threshold),
            ("rebound_offset", self.rebound_offset),
            ("min_frequency", self.min_frequency),
            ("clarity_threshold", self.clarity_threshold),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(PluckError::InvalidConfig(format!(
                    "{name} must be a non-negative number, got {value}"
                )));
            }
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Builds the note table this configuration points at.
    pub fn note_table(&self) -> Result<NoteTable> {
        match &self.note_table {
            Some(path) => NoteTable::load(path, self.reference_pitch),
            None => NoteTable::equal_temperament(self.reference_pitch),
        }
    }

    /// Builds a YIN estimator for the given device sample rate.
    pub fn estimator(&self, sample_rate: u32) -> YinEstimator {
        YinEstimator::new(sample_rate)
            .with_clarity_threshold(self.clarity_threshold)
            .with_min_frequency(self.min_frequency)
            .with_refinement(self.refine_with_spectrum)
    }
}
