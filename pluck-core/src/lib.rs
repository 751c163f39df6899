// pluck-core/src/lib.rs

//! The core logic for the practice aid.
//! This crate turns a stream of audio frames into discrete note onsets:
//! volume gating, pitch estimation, quantization onto a note table and
//! deduplication of sustained notes. It is completely headless
//! and contains no UI code.

pub mod audio;
pub mod config;
pub mod error;
pub mod fft;
pub mod gate;
pub mod onset;
pub mod pitch;
pub mod sampler;
pub mod tuning;

use serde::{Deserialize, Serialize};

pub use audio::{ChannelFrameSource, FrameSource};
pub use config::PracticeConfig;
pub use error::{PluckError, Result};
pub use gate::VolumeGate;
pub use onset::{DeduplicatorState, OnsetDeduplicator};
pub use pitch::{PitchEstimator, YinEstimator};
pub use sampler::{EventSink, FnSink, LoopHandle, LoopStats, Pipeline, SamplingLoop};
pub use tuning::{NoteEntry, NoteTable};

/// One tick's worth of quantized pitch, as seen by the onset deduplicator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteSample {
    /// Label of the nearest table entry (e.g. "A1").
    pub note: String,
    /// RMS level of the frame.
    pub volume: f32,
    /// Seconds on the frame source's clock.
    pub timestamp: f64,
    /// The raw estimate in Hz, before quantization.
    pub frequency: f32,
    /// Deviation of `frequency` from the table entry, in cents.
    pub cents: f32,
}

/// A sample the deduplicator judged to be a new attack.
pub type NoteEvent = NoteSample;

/// What happened to a single frame.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// The volume gate rejected the frame.
    Silent { level: f32 },
    /// Loud enough, but the estimator found no pitch.
    Unpitched { level: f32 },
    /// Same note still ringing; nothing emitted.
    Held(NoteSample),
    /// A new onset, forwarded to the sink.
    Onset(NoteEvent),
}

impl TickOutcome {
    /// RMS level of the frame that produced this outcome.
    pub fn level(&self) -> f32 {
        match self {
            TickOutcome::Silent { level } | TickOutcome::Unpitched { level } => *level,
            TickOutcome::Held(sample) | TickOutcome::Onset(sample) => sample.volume,
        }
    }

    pub fn event(&self) -> Option<&NoteEvent> {
        match self {
            TickOutcome::Onset(event) => Some(event),
            _ => None,
        }
    }
}
