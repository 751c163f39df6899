//! Error types for the practice pipeline.
//!
//! Only configuration problems are errors. Silence, unpitched frames and
//! out-of-range frequencies are part of the normal steady state and never
//! surface here.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PluckError {
    /// A note table needs at least one entry to quantize against.
    #[error("note table is empty")]
    EmptyNoteTable,

    /// Entries must be in non-decreasing frequency order.
    #[error("note table is not sorted by frequency (entry {index} is lower than its predecessor)")]
    UnsortedNoteTable { index: usize },

    #[error("note table entry {index} has an invalid frequency {frequency}")]
    InvalidFrequency { index: usize, frequency: f32 },

    /// The notes file has no table for the requested reference pitch.
    #[error("no note table for reference pitch {0}")]
    MissingReference(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for pipeline setup operations.
pub type Result<T> = std::result::Result<T, PluckError>;
