//! # Audio Input Module
//!
//! Frames reach the pipeline through the [`FrameSource`] trait. The live
//! implementation is a [`ChannelFrameSource`] fed by an [`AudioContext`],
//! an explicit handle around the cpal input stream that is opened and
//! closed by whoever owns the session.
//!
//! ## Features
//! - Snapshot semantics: each tick sees only the newest complete frame
//! - Monotonic session clock
//! - Default input device selection and f32 mono configuration (`capture` feature)

use std::time::Instant;

use crossbeam_channel::{Receiver, Sender, TryRecvError, TrySendError};

/// Audio buffer size for processing frames.
///
/// Larger buffers give more frequency resolution but increase latency.
pub const BUFFER_SIZE: usize = 2048;

/// Where the sampling loop gets its frames from.
pub trait FrameSource {
    /// Returns the frame for this tick, or `None` if nothing new is available.
    fn next_frame(&mut self) -> Option<Vec<f32>>;

    /// Seconds on the source's monotonic clock.
    fn now(&self) -> f64;

    /// True once the source can never produce another frame.
    fn is_finished(&self) -> bool {
        false
    }
}

/// Frame source fed by a channel of fixed-size frames.
///
/// Every call to [`FrameSource::next_frame`] drains the channel and keeps
/// only the most recent frame, so a slow consumer never falls behind real
/// time. Once the sending side is dropped the source reports finished.
#[derive(Debug)]
pub struct ChannelFrameSource {
    frames: Receiver<Vec<f32>>,
    started: Instant,
    disconnected: bool,
}

impl ChannelFrameSource {
    pub fn new(frames: Receiver<Vec<f32>>) -> Self {
        Self {
            frames,
            started: Instant::now(),
            disconnected: false,
        }
    }
}

impl FrameSource for ChannelFrameSource {
    fn next_frame(&mut self) -> Option<Vec<f32>> {
        let mut latest = None;
        loop {
            match self.frames.try_recv() {
                Ok(frame) => latest = Some(frame),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if !self.disconnected {
                        log::info!("[AUDIO] Frame channel closed");
                    }
                    self.disconnected = true;
                    break;
                }
            }
        }
        latest
    }

    fn now(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    fn is_finished(&self) -> bool {
        self.disconnected
    }
}

/// Queues `frame` on a bounded frame channel, evicting the oldest queued
/// frames while the channel is full.
///
/// `queue` must be a receiver of the same channel. Returns false once every
/// receiver is gone.
pub fn push_newest(sender: &Sender<Vec<f32>>, queue: &Receiver<Vec<f32>>, frame: Vec<f32>) -> bool {
    let mut frame = frame;
    loop {
        match sender.try_send(frame) {
            Ok(()) => return true,
            Err(TrySendError::Full(rejected)) => {
                let _ = queue.try_recv();
                frame = rejected;
            }
            Err(TrySendError::Disconnected(_)) => return false,
        }
    }
}

#[cfg(feature = "capture")]
pub use capture::AudioContext;

#[cfg(feature = "capture")]
mod capture {
    use anyhow::{anyhow, Result};
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use cpal::SupportedStreamConfigRange;

    use super::{push_newest, ChannelFrameSource};

    const TARGET_SAMPLE_RATE: u32 = 44100;

    /// Handle to an open audio input session.
    ///
    /// Owns the cpal stream. Dropping the handle also stops capture, but
    /// [`AudioContext::close`] pauses the stream first and reports errors.
    /// cpal streams are not `Send` on every platform, so keep the context on
    /// the thread that opened it and move only the frame source around.
    pub struct AudioContext {
        stream: Option<cpal::Stream>,
        sample_rate: u32,
        device_name: String,
    }

    impl AudioContext {
        /// Starts capture from the default input device.
        ///
        /// # Arguments
        /// * `frame_size` - Samples per frame handed to the frame source
        ///
        /// # Returns
        /// * `Ok((context, source))` - The running session and its frames
        /// * `Err(e)` - No device, no usable f32 format, or the stream failed to start
        pub fn open(frame_size: usize) -> Result<(Self, ChannelFrameSource)> {
            let host = cpal::default_host();
            let device = host
                .default_input_device()
                .ok_or_else(|| anyhow!("No input device available"))?;
            let device_name = device.name()?;
            log::info!("[AUDIO] Using audio input device: {}", device_name);

            let configs = device.supported_input_configs()?.collect::<Vec<_>>();
            let supported_config = find_supported_config(configs, TARGET_SAMPLE_RATE)
                .ok_or_else(|| anyhow!("No suitable f32 input format found"))?;

            let rate = TARGET_SAMPLE_RATE
                .clamp(supported_config.min_sample_rate().0, supported_config.max_sample_rate().0);
            let config = supported_config.with_sample_rate(cpal::SampleRate(rate));
            let sample_rate = config.sample_rate().0;
            let channels = config.channels() as usize;
            let config: cpal::StreamConfig = config.into();
            log::info!("[AUDIO] Selected sample rate: {} Hz, {} channel(s)", sample_rate, channels);

            let (sender, receiver) = crossbeam_channel::bounded::<Vec<f32>>(8);
            let backlog = receiver.clone();
            let mut audio_buffer = Vec::with_capacity(frame_size * 2);
            let err_fn = |err| log::warn!("[AUDIO] An error occurred on the audio stream: {}", err);

            let stream = device.build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    // Only the first channel is analysed.
                    audio_buffer.extend(data.iter().step_by(channels.max(1)));

                    while audio_buffer.len() >= frame_size {
                        let frame = audio_buffer[..frame_size].to_vec();
                        // A full channel means the loop is behind; drop the oldest frame.
                        push_newest(&sender, &backlog, frame);
                        audio_buffer.drain(..frame_size);
                    }
                },
                err_fn,
                None,
            )?;

            stream.play()?;

            Ok((
                Self {
                    stream: Some(stream),
                    sample_rate,
                    device_name,
                },
                ChannelFrameSource::new(receiver),
            ))
        }

        pub fn sample_rate(&self) -> u32 {
            self.sample_rate
        }

        pub fn device_name(&self) -> &str {
            &self.device_name
        }

        /// Stops the stream and releases the device.
        ///
        /// The frame source sees a closed channel afterwards and finishes.
        pub fn close(mut self) -> Result<()> {
            if let Some(stream) = self.stream.take() {
                stream.pause()?;
                drop(stream);
                log::info!("[AUDIO] Capture stopped");
            }
            Ok(())
        }
    }

    /// Picks the f32 configuration whose rate range is closest to `target_rate`,
    /// preferring mono.
    fn find_supported_config(
        configs: Vec<SupportedStreamConfigRange>,
        target_rate: u32,
    ) -> Option<SupportedStreamConfigRange> {
        configs
            .into_iter()
            .filter(|c| c.sample_format() == cpal::SampleFormat::F32)
            .min_by_key(|c| {
                let covers = c.min_sample_rate().0 <= target_rate && target_rate <= c.max_sample_rate().0;
                let distance = if covers {
                    0
                } else {
                    let min_diff = (c.min_sample_rate().0 as i64 - target_rate as i64).abs();
                    let max_diff = (c.max_sample_rate().0 as i64 - target_rate as i64).abs();
                    min_diff.min(max_diff)
                };
                (c.channels() != 1, distance)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_only_the_newest_frame() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut source = ChannelFrameSource::new(rx);

        assert_eq!(source.next_frame(), None);

        tx.send(vec![0.1; 4]).unwrap();
        tx.send(vec![0.2; 4]).unwrap();
        tx.send(vec![0.3; 4]).unwrap();
        assert_eq!(source.next_frame(), Some(vec![0.3; 4]));
        assert_eq!(source.next_frame(), None);
        assert!(!source.is_finished());
    }

    #[test]
    fn finishes_when_sender_drops() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut source = ChannelFrameSource::new(rx);

        tx.send(vec![0.5; 4]).unwrap();
        drop(tx);

        // Frames already queued are still delivered.
        assert_eq!(source.next_frame(), Some(vec![0.5; 4]));
        assert!(source.is_finished());
        assert_eq!(source.next_frame(), None);
    }

    #[test]
    fn full_channel_evicts_the_oldest_frame() {
        let (tx, rx) = crossbeam_channel::bounded(2);
        let backlog = rx.clone();
        let mut source = ChannelFrameSource::new(rx);

        for level in [0.1, 0.2, 0.3, 0.4] {
            assert!(push_newest(&tx, &backlog, vec![level; 4]));
        }
        assert_eq!(tx.len(), 2);
        assert_eq!(source.next_frame(), Some(vec![0.4; 4]));
    }

    #[test]
    fn push_newest_reports_missing_receivers() {
        let (tx, rx) = crossbeam_channel::bounded::<Vec<f32>>(1);
        drop(rx);
        let (_, unrelated) = crossbeam_channel::bounded::<Vec<f32>>(1);
        assert!(!push_newest(&tx, &unrelated, vec![0.5; 4]));
    }

    #[test]
    fn clock_is_monotonic() {
        let (_tx, rx) = crossbeam_channel::unbounded::<Vec<f32>>();
        let source = ChannelFrameSource::new(rx);
        let a = source.now();
        let b = source.now();
        assert!(a >= 0.0);
        assert!(b >= a);
    }
}
