//! # Musical Tuning Module
//!
//! Holds the reference note table and the quantizer that snaps a detected
//! frequency onto it.
//!
//! ## Features
//! - Validated, immutable note tables sorted by frequency
//! - Nearest-note lookup by binary search, clamped at both ends
//! - 88-key equal temperament tables for any reference pitch
//! - Loading of `notes.json` style tables keyed by reference pitch
//! - Cent deviation calculations

use std::collections::HashMap;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::error::{PluckError, Result};

/// Reference pitch used when nothing else is configured.
pub const DEFAULT_REFERENCE_PITCH: f32 = 440.0;

/// A single entry of the note table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteEntry {
    /// Frequency in Hz
    pub frequency: f32,
    /// Note label (e.g., "A4", "C#3")
    pub note: String,
}

impl NoteEntry {
    pub fn new(frequency: f32, note: impl Into<String>) -> Self {
        Self {
            frequency,
            note: note.into(),
        }
    }
}

/// An immutable, non-empty note table sorted ascending by frequency.
///
/// All validation happens in [`NoteTable::new`], so a table that exists can
/// always answer [`NoteTable::nearest`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NoteTable {
    entries: Vec<NoteEntry>,
}

/// Shared A440 table, built on first use.
static STANDARD: Lazy<NoteTable> = Lazy::new(|| equal_temperament_table(DEFAULT_REFERENCE_PITCH));

/// Returns the 88-key equal temperament table for A4 = 440 Hz.
pub fn standard() -> &'static NoteTable {
    &STANDARD
}

impl NoteTable {
    /// Builds a table from entries that are already sorted.
    ///
    /// # Errors
    /// * `EmptyNoteTable` - no entries were given
    /// * `InvalidFrequency` - an entry is not a finite, positive frequency
    /// * `UnsortedNoteTable` - an entry is lower than the one before it
    pub fn new(entries: Vec<NoteEntry>) -> Result<Self> {
        if entries.is_empty() {
            return Err(PluckError::EmptyNoteTable);
        }

        for (index, entry) in entries.iter().enumerate() {
            if !entry.frequency.is_finite() || entry.frequency <= 0.0 {
                return Err(PluckError::InvalidFrequency {
                    index,
                    frequency: entry.frequency,
                });
            }
        }

        if let Some(index) = entries
            .windows(2)
            .position(|pair| pair[1].frequency < pair[0].frequency)
        {
            return Err(PluckError::UnsortedNoteTable { index: index + 1 });
        }

        Ok(Self { entries })
    }

    /// Builds the 88 piano keys (A0 to C8) in equal temperament.
    ///
    /// # Arguments
    /// * `reference_hz` - Frequency of A4, e.g. 440.0
    ///
    /// # Errors
    /// * `InvalidFrequency` - the reference is not a finite, positive number
    pub fn equal_temperament(reference_hz: f32) -> Result<Self> {
        if !reference_hz.is_finite() || reference_hz <= 0.0 {
            return Err(PluckError::InvalidFrequency {
                index: 0,
                frequency: reference_hz,
            });
        }
        Ok(equal_temperament_table(reference_hz))
    }

    /// Loads a table from a `notes.json` document.
    ///
    /// The document is an object keyed by reference pitch, each value an
    /// array of `{ "frequency": .., "note": .. }` entries:
    ///
    /// ```json
    /// { "440": [{ "frequency": 27.5, "note": "A0" }, ...] }
    /// ```
    ///
    /// # Arguments
    /// * `json` - The document text
    /// * `reference_hz` - Which reference pitch to pick, e.g. 440.0 selects `"440"`
    pub fn from_json(json: &str, reference_hz: f32) -> Result<Self> {
        let mut tables: HashMap<String, Vec<NoteEntry>> = serde_json::from_str(json)?;
        let key = reference_hz.to_string();
        let entries = tables
            .remove(&key)
            .ok_or(PluckError::MissingReference(key))?;
        Self::new(entries)
    }

    /// Reads and parses a `notes.json` file. See [`NoteTable::from_json`].
    pub fn load(path: impl AsRef<std::path::Path>, reference_hz: f32) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        Self::from_json(&data, reference_hz)
    }

    /// Finds the entry whose frequency is closest to `freq`.
    ///
    /// Equidistant candidates resolve to the higher-frequency entry.
    /// Queries at or below the lowest entry return the lowest entry, and
    /// queries at or above the highest return the highest.
    pub fn nearest(&self, freq: f32) -> &NoteEntry {
        // Number of entries at or below `freq`; ties go into the low side.
        let split = self.entries.partition_point(|entry| entry.frequency <= freq);

        // Duplicates of the lowest frequency would otherwise pick the last copy.
        if split == 0 || freq <= self.entries[0].frequency {
            return &self.entries[0];
        }
        if split == self.entries.len() {
            return &self.entries[split - 1];
        }

        let low = &self.entries[split - 1];
        let high = &self.entries[split];
        if (high.frequency - freq).abs() <= (low.frequency - freq).abs() {
            high
        } else {
            low
        }
    }

    pub fn entries(&self) -> &[NoteEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Always false; kept for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn lowest(&self) -> &NoteEntry {
        &self.entries[0]
    }

    pub fn highest(&self) -> &NoteEntry {
        &self.entries[self.entries.len() - 1]
    }
}

fn equal_temperament_table(reference_hz: f32) -> NoteTable {
    const NOTE_NAMES: [&str; 12] = [
        "A", "A#", "B", "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#",
    ];

    let entries = (0..88)
        .map(|i: usize| {
            // A4 is the 49th key, index 48. f = f0 * 2^(n/12) with n semitones from A4.
            let frequency = reference_hz * 2.0_f32.powf((i as f32 - 48.0) / 12.0);
            // Octave numbers change at C, three keys above each A.
            let octave = (i + 9) / 12;
            NoteEntry::new(frequency, format!("{}{}", NOTE_NAMES[i % 12], octave))
        })
        .collect();

    NoteTable { entries }
}

/// Calculates the deviation from a target frequency in cents.
///
/// 100 cents make a semitone. Positive values are sharp, negative flat.
pub fn calculate_cents_deviation(freq: f32, target_freq: f32) -> f32 {
    1200.0 * (freq / target_freq).log2()
}
