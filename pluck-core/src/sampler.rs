//! # Sampling Loop
//!
//! [`Pipeline`] is the per-frame chain: volume gate, pitch estimator,
//! note quantizer, onset deduplicator. [`SamplingLoop`] wraps it with a
//! frame source and an event sink and runs one chain per tick.
//!
//! Ticks come from outside. Call [`SamplingLoop::tick`] from whatever paces
//! the application, or hand the loop to [`SamplingLoop::spawn`], which runs
//! it on its own thread driven by a fixed-interval ticker until the
//! returned [`LoopHandle`] is stopped.

use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::Sender;

use crate::audio::FrameSource;
use crate::config::PracticeConfig;
use crate::error::Result;
use crate::gate::VolumeGate;
use crate::onset::{DeduplicatorState, OnsetDeduplicator};
use crate::pitch::PitchEstimator;
use crate::tuning::{calculate_cents_deviation, NoteTable};
use crate::{NoteEvent, NoteSample, TickOutcome};

/// Receives onset events, in order, synchronously within the tick.
pub trait EventSink {
    fn accept(&mut self, event: &NoteEvent);
}

impl EventSink for Vec<NoteEvent> {
    fn accept(&mut self, event: &NoteEvent) {
        self.push(event.clone());
    }
}

/// Forwards events to another thread. Events are dropped once the
/// receiving side is gone.
impl EventSink for Sender<NoteEvent> {
    fn accept(&mut self, event: &NoteEvent) {
        if self.send(event.clone()).is_err() {
            log::debug!("[SAMPLER] Event receiver gone, dropping {}", event.note);
        }
    }
}

/// Adapts a closure into an [`EventSink`].
pub struct FnSink<F>(pub F);

impl<F> EventSink for FnSink<F>
where
    F: FnMut(&NoteEvent),
{
    fn accept(&mut self, event: &NoteEvent) {
        (self.0)(event)
    }
}

/// The gate, estimate, quantize, deduplicate chain for one session.
#[derive(Debug)]
pub struct Pipeline<E> {
    table: NoteTable,
    gate: VolumeGate,
    estimator: E,
    dedup: OnsetDeduplicator,
}

impl<E: PitchEstimator> Pipeline<E> {
    /// Creates a pipeline with the default gate threshold and rebound offset.
    pub fn new(table: NoteTable, estimator: E) -> Self {
        Self {
            table,
            gate: VolumeGate::default(),
            estimator,
            dedup: OnsetDeduplicator::default(),
        }
    }

    /// Creates a pipeline with thresholds taken from `config`.
    pub fn with_config(config: &PracticeConfig, table: NoteTable, estimator: E) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            table,
            gate: VolumeGate::new(config.silence_threshold),
            estimator,
            dedup: OnsetDeduplicator::new(config.rebound_offset),
        })
    }

    /// Runs one frame through the chain.
    ///
    /// Frames rejected by the gate never reach the estimator, and frames
    /// without a pitch never reach the deduplicator.
    pub fn process(&mut self, frame: &[f32], timestamp: f64) -> TickOutcome {
        let level = match self.gate.admit(frame) {
            Ok(level) => level,
            Err(level) => return TickOutcome::Silent { level },
        };

        let Some(frequency) = self
            .estimator
            .estimate(frame)
            .filter(|f| f.is_finite() && *f > 0.0)
        else {
            return TickOutcome::Unpitched { level };
        };

        let entry = self.table.nearest(frequency);
        let sample = NoteSample {
            note: entry.note.clone(),
            volume: level,
            timestamp,
            frequency,
            cents: calculate_cents_deviation(frequency, entry.frequency),
        };

        match self.dedup.process(sample.clone()) {
            Some(event) => TickOutcome::Onset(event),
            None => TickOutcome::Held(sample),
        }
    }

    /// Forgets everything about the previous session.
    pub fn restart(&mut self) {
        self.dedup.reset();
    }

    pub fn state(&self) -> &DeduplicatorState {
        self.dedup.state()
    }

    pub fn table(&self) -> &NoteTable {
        &self.table
    }

    pub fn gate(&self) -> &VolumeGate {
        &self.gate
    }
}

/// Counters kept by a sampling loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub ticks: u64,
    pub frames: u64,
    pub silent: u64,
    pub unpitched: u64,
    pub onsets: u64,
}

/// A pipeline bound to a frame source and an event sink.
pub struct SamplingLoop<S, E, K> {
    source: S,
    pipeline: Pipeline<E>,
    sink: K,
    stats: LoopStats,
}

impl<S, E, K> SamplingLoop<S, E, K>
where
    S: FrameSource,
    E: PitchEstimator,
    K: EventSink,
{
    pub fn new(source: S, pipeline: Pipeline<E>, sink: K) -> Self {
        Self {
            source,
            pipeline,
            sink,
            stats: LoopStats::default(),
        }
    }

    /// Handles one pacing signal.
    ///
    /// # Returns
    /// * `Some(outcome)` - A frame was processed
    /// * `None` - The source had no new frame, the tick was skipped
    pub fn tick(&mut self) -> Option<TickOutcome> {
        self.stats.ticks += 1;
        let frame = self.source.next_frame()?;
        self.stats.frames += 1;

        let outcome = self.pipeline.process(&frame, self.source.now());
        match &outcome {
            TickOutcome::Silent { .. } => self.stats.silent += 1,
            TickOutcome::Unpitched { .. } => self.stats.unpitched += 1,
            TickOutcome::Held(_) => {}
            TickOutcome::Onset(event) => {
                self.stats.onsets += 1;
                self.sink.accept(event);
            }
        }
        Some(outcome)
    }

    /// Ticks back to back until the source is finished.
    ///
    /// Meant for offline sources such as files; a live source that never
    /// finishes keeps this running forever.
    pub fn run_to_end(&mut self) -> LoopStats {
        while !self.source.is_finished() {
            self.tick();
        }
        self.stats
    }

    /// Starts a new session on the same source and sink.
    pub fn restart(&mut self) {
        self.pipeline.restart();
    }

    pub fn stats(&self) -> LoopStats {
        self.stats
    }

    pub fn pipeline(&self) -> &Pipeline<E> {
        &self.pipeline
    }

    pub fn sink(&self) -> &K {
        &self.sink
    }

    pub fn into_parts(self) -> (S, Pipeline<E>, K) {
        (self.source, self.pipeline, self.sink)
    }
}

impl<S, E, K> SamplingLoop<S, E, K>
where
    S: FrameSource + Send + 'static,
    E: PitchEstimator + Send + 'static,
    K: EventSink + Send + 'static,
{
    /// Runs the loop on a dedicated thread, one tick every `interval`.
    ///
    /// Ticks never overlap; if processing runs late, missed ticks are
    /// coalesced rather than queued. The thread exits on its own when the
    /// source finishes.
    pub fn spawn(self, interval: Duration) -> Result<LoopHandle<S, E, K>> {
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(1);

        let thread_handle = thread::Builder::new()
            .name("pluck-sampler".into())
            .spawn(move || {
                let mut sampling = self;
                let ticker = crossbeam_channel::tick(interval);
                log::info!("[SAMPLER] Sampling loop started, tick every {:?}", interval);

                loop {
                    crossbeam_channel::select! {
                        recv(ticker) -> _ => {
                            sampling.tick();
                            if sampling.source.is_finished() {
                                log::info!("[SAMPLER] Frame source finished");
                                break;
                            }
                        },
                        recv(shutdown_rx) -> _ => {
                            log::info!("[SAMPLER] Received shutdown signal");
                            break;
                        },
                    }
                }

                log::info!("[SAMPLER] Sampling loop stopped: {:?}", sampling.stats);
                sampling
            })?;

        Ok(LoopHandle {
            shutdown_tx,
            thread_handle: Some(thread_handle),
        })
    }
}

/// Registration of a spawned sampling loop with its ticker.
///
/// Dropping the handle stops the loop as well.
pub struct LoopHandle<S, E, K> {
    shutdown_tx: Sender<()>,
    thread_handle: Option<JoinHandle<SamplingLoop<S, E, K>>>,
}

impl<S, E, K> LoopHandle<S, E, K> {
    /// Unregisters the loop from its ticker and waits for the thread.
    ///
    /// No tick runs after this returns. The loop comes back with its state
    /// intact; pending frames are not drained.
    pub fn stop(mut self) -> Option<SamplingLoop<S, E, K>> {
        let _ = self.shutdown_tx.try_send(());
        self.join_thread()
    }

    /// Waits for the loop to end on its own, i.e. for the source to finish.
    pub fn wait(mut self) -> Option<SamplingLoop<S, E, K>> {
        self.join_thread()
    }

    pub fn is_finished(&self) -> bool {
        self.thread_handle
            .as_ref()
            .is_none_or(|handle| handle.is_finished())
    }

    fn join_thread(&mut self) -> Option<SamplingLoop<S, E, K>> {
        let handle = self.thread_handle.take()?;
        match handle.join() {
            Ok(sampling) => Some(sampling),
            Err(_) => {
                log::error!("[SAMPLER] Sampling thread panicked");
                None
            }
        }
    }
}

impl<S, E, K> Drop for LoopHandle<S, E, K> {
    fn drop(&mut self) {
        if self.thread_handle.is_some() {
            let _ = self.shutdown_tx.try_send(());
            self.join_thread();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tuning::NoteEntry;

    fn table() -> NoteTable {
        NoteTable::new(vec![
            NoteEntry::new(55.0, "A1"),
            NoteEntry::new(65.41, "C2"),
            NoteEntry::new(110.0, "A2"),
        ])
        .unwrap()
    }

    /// A constant frame whose length doubles as its pitch, so tests can steer the estimator.
    fn frame(freq: usize, level: f32) -> Vec<f32> {
        vec![level; freq]
    }

    fn length_estimator() -> impl FnMut(&[f32]) -> Option<f32> {
        |frame: &[f32]| Some(frame.len() as f32)
    }

    struct ScriptedSource {
        frames: std::vec::IntoIter<Option<Vec<f32>>>,
        clock: f64,
        done: bool,
    }

    impl ScriptedSource {
        fn new(frames: Vec<Option<Vec<f32>>>) -> Self {
            Self {
                frames: frames.into_iter(),
                clock: 0.0,
                done: false,
            }
        }
    }

    impl FrameSource for ScriptedSource {
        fn next_frame(&mut self) -> Option<Vec<f32>> {
            self.clock += 0.016;
            match self.frames.next() {
                Some(frame) => frame,
                None => {
                    self.done = true;
                    None
                }
            }
        }

        fn now(&self) -> f64 {
            self.clock
        }

        fn is_finished(&self) -> bool {
            self.done
        }
    }

    #[test]
    fn quiet_frame_is_silent() {
        let mut pipeline = Pipeline::new(table(), length_estimator());
        let outcome = pipeline.process(&[0.0; 64], 0.0);
        assert!(matches!(outcome, TickOutcome::Silent { level } if level == 0.0));
        assert_eq!(pipeline.state(), &DeduplicatorState::default());
    }

    #[test]
    fn unpitched_frame_skips_dedup() {
        let mut pipeline = Pipeline::new(table(), |_: &[f32]| None::<f32>);
        let outcome = pipeline.process(&[0.3; 64], 0.0);
        assert!(matches!(outcome, TickOutcome::Unpitched { .. }));
        assert_eq!(pipeline.state().last_note, None);
    }

    #[test]
    fn bogus_estimates_count_as_unpitched() {
        let mut pipeline = Pipeline::new(table(), |_: &[f32]| Some(f32::NAN));
        assert!(matches!(pipeline.process(&[0.3; 64], 0.0), TickOutcome::Unpitched { .. }));
    }

    #[test]
    fn quantizes_and_reports_cents() {
        let mut pipeline = Pipeline::new(table(), |_: &[f32]| Some(112.0_f32));
        match pipeline.process(&[0.2; 64], 1.5) {
            TickOutcome::Onset(event) => {
                assert_eq!(event.note, "A2");
                assert_eq!(event.timestamp, 1.5);
                assert_eq!(event.frequency, 112.0);
                assert!(event.cents > 0.0 && event.cents < 50.0);
                assert!((event.volume - 0.2).abs() < 1e-4);
            }
            other => panic!("expected onset, got {other:?}"),
        }
        assert!(matches!(pipeline.process(&[0.2; 64], 1.6), TickOutcome::Held(_)));
    }

    #[test]
    fn loop_forwards_onsets_to_sink() {
        let source = ScriptedSource::new(vec![
            Some(frame(55, 0.01)),
            None,
            Some(frame(55, 0.05)),
            Some(frame(55, 0.02)),
            Some(frame(55, 0.30)),
            Some(vec![0.0; 64]),
            Some(frame(66, 0.10)),
        ]);
        let pipeline = Pipeline::new(table(), length_estimator());
        let mut sampling = SamplingLoop::new(source, pipeline, Vec::new());

        let stats = sampling.run_to_end();
        let notes: Vec<&str> = sampling.sink().iter().map(|e| e.note.as_str()).collect();
        assert_eq!(notes, ["A1", "A1", "C2"]);
        assert_eq!(stats.onsets, 3);
        assert_eq!(stats.silent, 1);
        assert_eq!(stats.frames, 6);
        assert_eq!(stats.ticks, 8);

        let timestamps: Vec<f64> = sampling.sink().iter().map(|e| e.timestamp).collect();
        assert!(timestamps.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn channel_sink_survives_a_dropped_receiver() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let source = ScriptedSource::new(vec![Some(frame(55, 0.1)), Some(frame(110, 0.1))]);
        let pipeline = Pipeline::new(table(), length_estimator());
        let mut sampling = SamplingLoop::new(source, pipeline, tx);

        sampling.tick();
        assert_eq!(rx.try_recv().unwrap().note, "A1");
        drop(rx);

        let stats = sampling.run_to_end();
        assert_eq!(stats.onsets, 2);
    }

    #[test]
    fn closure_sink_sees_every_event() {
        let source = ScriptedSource::new(vec![Some(frame(55, 0.1)), Some(frame(110, 0.1))]);
        let mut seen = Vec::new();
        {
            let pipeline = Pipeline::new(table(), length_estimator());
            let mut sampling = SamplingLoop::new(
                source,
                pipeline,
                FnSink(|event: &NoteEvent| seen.push(event.note.clone())),
            );
            sampling.run_to_end();
        }
        assert_eq!(seen, ["A1", "A2"]);
    }

    #[test]
    fn restart_re_emits_held_note() {
        let source = ScriptedSource::new(vec![Some(frame(55, 0.1)), Some(frame(55, 0.1))]);
        let pipeline = Pipeline::new(table(), length_estimator());
        let mut sampling = SamplingLoop::new(source, pipeline, Vec::new());

        assert!(matches!(sampling.tick(), Some(TickOutcome::Onset(_))));
        sampling.restart();
        assert!(matches!(sampling.tick(), Some(TickOutcome::Onset(_))));
    }

    #[test]
    fn config_thresholds_are_applied() {
        let config = PracticeConfig {
            silence_threshold: 0.5,
            ..Default::default()
        };
        let mut pipeline = Pipeline::with_config(&config, table(), length_estimator()).unwrap();
        assert_eq!(pipeline.gate().threshold(), 0.5);
        assert!(matches!(pipeline.process(&frame(55, 0.2), 0.0), TickOutcome::Silent { .. }));

        let invalid = PracticeConfig {
            frame_size: 0,
            ..Default::default()
        };
        assert!(Pipeline::with_config(&invalid, table(), length_estimator()).is_err());
    }
}
