//! # Onset Deduplication
//!
//! The pitch pipeline reports the same note on every tick for as long as a
//! string rings. This module collapses that stream into one event per
//! attack, using only the note label and volume of each sample:
//!
//! ```text
//! A1 0.01  -> onset (new note)
//! A1 0.05  -> attack, held
//! A1 0.10  -> attack, held
//! A1 0.05  -> decay, held
//! A1 0.15  -> jump in volume while decaying, onset (re-picked)
//! ```

use serde::{Deserialize, Serialize};

use crate::{NoteEvent, NoteSample};

/// Minimum volume rebound after a decay that counts as a new attack.
pub const DEFAULT_REBOUND_OFFSET: f32 = 0.005;

/// What the deduplicator remembers between samples.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeduplicatorState {
    pub last_note: Option<String>,
    pub last_volume: f32,
    pub in_decay: bool,
}

/// Turns a per-tick stream of note samples into a sparse stream of onsets.
///
/// One instance covers one continuous detection session. Samples are
/// handled strictly in arrival order with no lookahead and no buffering.
#[derive(Debug, Clone)]
pub struct OnsetDeduplicator {
    state: DeduplicatorState,
    offset: f32,
}

impl Default for OnsetDeduplicator {
    fn default() -> Self {
        Self::new(DEFAULT_REBOUND_OFFSET)
    }
}

impl OnsetDeduplicator {
    pub fn new(offset: f32) -> Self {
        Self {
            state: DeduplicatorState::default(),
            offset,
        }
    }

    pub fn state(&self) -> &DeduplicatorState {
        &self.state
    }

    pub fn offset(&self) -> f32 {
        self.offset
    }

    /// Starts a new session from a blank state.
    pub fn reset(&mut self) {
        self.state = DeduplicatorState::default();
    }

    /// Feeds one sample and reports whether it is a new onset.
    pub fn observe(&mut self, sample: &NoteSample) -> bool {
        let state = &mut self.state;
        let same_note = state.last_note.as_deref() == Some(sample.note.as_str());

        let onset = if !same_note {
            state.in_decay = false;
            true
        } else if sample.volume < state.last_volume {
            state.in_decay = true;
            false
        } else if sample.volume > state.last_volume + self.offset && state.in_decay {
            state.in_decay = false;
            true
        } else {
            false
        };

        if !same_note {
            state.last_note = Some(sample.note.clone());
        }
        state.last_volume = sample.volume;

        onset
    }

    /// Feeds one sample and hands it back if it is a new onset.
    pub fn process(&mut self, sample: NoteSample) -> Option<NoteEvent> {
        if self.observe(&sample) {
            log::debug!(
                "onset {} at {:.3}s (volume {:.4})",
                sample.note,
                sample.timestamp,
                sample.volume
            );
            Some(sample)
        } else {
            None
        }
    }
}

/// Deduplicates a whole sequence in one go, starting from a fresh state.
pub fn deduplicate<I>(samples: I, offset: f32) -> Vec<NoteEvent>
where
    I: IntoIterator<Item = NoteSample>,
{
    let mut dedup = OnsetDeduplicator::new(offset);
    samples
        .into_iter()
        .filter_map(|sample| dedup.process(sample))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn samples(input: &[(&str, f32)]) -> Vec<NoteSample> {
        input
            .iter()
            .enumerate()
            .map(|(i, &(note, volume))| NoteSample {
                note: note.to_string(),
                volume,
                timestamp: i as f64 * 0.016,
                frequency: 55.0,
                cents: 0.0,
            })
            .collect()
    }

    fn run(input: &[(&str, f32)]) -> Vec<(String, f32)> {
        deduplicate(samples(input), DEFAULT_REBOUND_OFFSET)
            .into_iter()
            .map(|e| (e.note, e.volume))
            .collect()
    }

    fn expected(output: &[(&str, f32)]) -> Vec<(String, f32)> {
        output.iter().map(|&(n, v)| (n.to_string(), v)).collect()
    }

    #[test]
    fn attack_and_sustain_emit_once() {
        let out = run(&[("A1", 0.01), ("A1", 0.05), ("A1", 0.10)]);
        assert_eq!(out, expected(&[("A1", 0.01)]));
    }

    #[test]
    fn re_attack_after_decay_emits_again() {
        let out = run(&[
            ("A1", 0.01),
            ("A1", 0.05),
            ("A1", 0.10),
            ("A1", 0.05),
            ("A1", 0.15),
        ]);
        assert_eq!(out, expected(&[("A1", 0.01), ("A1", 0.15)]));
    }

    #[test]
    fn note_change_always_emits() {
        let out = run(&[("A1", 0.02), ("C1", 0.02)]);
        assert_eq!(out, expected(&[("A1", 0.02), ("C1", 0.02)]));
    }

    #[test]
    fn small_rebound_is_not_an_attack() {
        let out = run(&[("A1", 0.10), ("A1", 0.05), ("A1", 0.053)]);
        assert_eq!(out, expected(&[("A1", 0.10)]));
    }

    #[test]
    fn rise_without_decay_is_not_an_attack() {
        let out = run(&[("A1", 0.01), ("A1", 0.50)]);
        assert_eq!(out, expected(&[("A1", 0.01)]));
    }

    #[test]
    fn first_sample_always_emits() {
        for (note, volume) in [("E2", 0.0), ("A1", 0.3), ("G#5", 1.0)] {
            let mut dedup = OnsetDeduplicator::default();
            let first = samples(&[(note, volume)]).remove(0);
            assert!(dedup.process(first).is_some());
        }
    }

    #[test]
    fn decay_flag_clears_on_note_change() {
        let mut dedup = OnsetDeduplicator::default();
        for sample in samples(&[("A1", 0.10), ("A1", 0.05)]) {
            dedup.observe(&sample);
        }
        assert!(dedup.state().in_decay);

        dedup.observe(&samples(&[("C2", 0.04)])[0]);
        assert!(!dedup.state().in_decay);
        assert_eq!(dedup.state().last_note.as_deref(), Some("C2"));
        assert_eq!(dedup.state().last_volume, 0.04);

        // C2 rising straight away is sustain, not a second onset.
        assert!(!dedup.observe(&samples(&[("C2", 0.20)])[0]));
    }

    #[test]
    fn repeated_re_attacks_each_emit() {
        let out = run(&[
            ("D3", 0.20),
            ("D3", 0.10),
            ("D3", 0.30),
            ("D3", 0.30),
            ("D3", 0.10),
            ("D3", 0.25),
        ]);
        assert_eq!(out, expected(&[("D3", 0.20), ("D3", 0.30), ("D3", 0.25)]));
    }

    #[test]
    fn identical_input_gives_identical_output() {
        let input = [
            ("A1", 0.01),
            ("A1", 0.09),
            ("A1", 0.04),
            ("B1", 0.04),
            ("B1", 0.02),
            ("B1", 0.08),
        ];
        assert_eq!(run(&input), run(&input));
    }

    #[test]
    fn reset_starts_a_fresh_session() {
        let mut dedup = OnsetDeduplicator::default();
        let sample = samples(&[("A1", 0.1)]).remove(0);
        assert!(dedup.observe(&sample));
        assert!(!dedup.observe(&sample));

        dedup.reset();
        assert_eq!(dedup.state(), &DeduplicatorState::default());
        assert!(dedup.observe(&sample));
    }

    #[test]
    fn offset_is_configurable() {
        let input = samples(&[("A1", 0.10), ("A1", 0.05), ("A1", 0.053)]);
        assert_eq!(deduplicate(input, 0.001).len(), 2);
    }
}
