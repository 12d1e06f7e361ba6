//! Audio output stage
//!
//! [`AudioSink`] adapts decoded frames to the device's fixed format,
//! writes them (blocking while the device buffer is full, which paces the
//! whole audio pipeline) and publishes the audio clock: the end PTS of
//! written audio minus what the device still holds.

pub mod device;
pub mod resample;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::media::AudioFrame;
use crate::sync::PresentationClock;

pub use device::{AudioDevice, RingBufferDevice};
pub use resample::{remix, Resampler};

/// Longest single blocking write; also how often a full device re-checks
/// the stop flag and refreshes the clock
const WRITE_SLICE: Duration = Duration::from_millis(20);

/// Feeds decoded audio to a device
pub struct AudioSink {
    device: Arc<dyn AudioDevice>,
    clock: Arc<PresentationClock>,
    stop: Arc<AtomicBool>,
    resampler: Option<Resampler>,
    /// PTS just past the last sample written
    written_end: Option<i64>,
    samples_written: u64,
}

impl AudioSink {
    pub fn new(device: Arc<dyn AudioDevice>, clock: Arc<PresentationClock>, stop: Arc<AtomicBool>) -> Self {
        Self {
            device,
            clock,
            stop,
            resampler: None,
            written_end: None,
            samples_written: 0,
        }
    }

    pub fn device(&self) -> &Arc<dyn AudioDevice> {
        &self.device
    }

    /// Samples handed to the device, after conversion
    pub fn samples_written(&self) -> u64 {
        self.samples_written
    }

    /// Convert and write one frame. Returns once every sample is in the
    /// device, or early when stop is requested.
    pub fn enqueue(&mut self, frame: &AudioFrame) -> Result<()> {
        if frame.discontinuity {
            tracing::debug!(pts = frame.pts_ms, "Audio discontinuity, clearing device");
            self.device.clear();
            self.written_end = None;
            if let Some(resampler) = self.resampler.as_mut() {
                resampler.reset();
            }
        }

        let out_rate = self.device.sample_rate();
        let out_channels = self.device.channels();
        let mixed = remix(&frame.samples, frame.channels, out_channels);
        if self.resampler.as_ref().map(|r| r.in_rate()) != Some(frame.sample_rate.max(1)) {
            self.resampler = Some(Resampler::new(frame.sample_rate, out_rate, out_channels));
        }
        let samples = match self.resampler.as_mut() {
            Some(resampler) => resampler.process(&mixed),
            None => mixed,
        };

        // Untimed audio continues from where the last frame ended
        let start = if frame.pts_ms >= 0 {
            frame.pts_ms
        } else {
            self.written_end.unwrap_or(0)
        };
        let end = start + frame.duration_ms().round() as i64;

        let mut offset = 0;
        while offset < samples.len() {
            if self.stop.load(Ordering::Acquire) {
                return Ok(());
            }
            let n = self.device.write(&samples[offset..], WRITE_SLICE)?;
            offset += n;
            self.samples_written += n as u64;
            if n == 0 && samples.len() - offset < out_channels.max(1) as usize {
                break;
            }
            if let Some(written_end) = self.written_end {
                self.publish_clock(written_end);
            }
        }
        self.written_end = Some(end);
        self.publish_clock(end);
        Ok(())
    }

    fn publish_clock(&self, written_end: i64) {
        let played = written_end - self.device.buffered_ms();
        self.clock.update_audio(played, written_end);
    }

    /// End of stream: let the device play out, then hand the clock back to
    /// the wall clock
    pub fn drain(&mut self) {
        while self.device.buffered_ms() > 0 && !self.stop.load(Ordering::Acquire) {
            if self.clock.is_paused() {
                std::thread::sleep(WRITE_SLICE);
                continue;
            }
            if let Some(end) = self.written_end {
                self.publish_clock(end);
            }
            std::thread::sleep(WRITE_SLICE.min(Duration::from_millis(
                self.device.buffered_ms().max(1) as u64,
            )));
        }
        self.clock.end_audio();
    }
}
