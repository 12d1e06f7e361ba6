//! Audio output devices
//!
//! [`RingBufferDevice`] is a software device: a bounded sample buffer
//! drained in real time by its own playback thread. It stands in for a
//! platform output (AAudio, OpenSL, ALSA) when running headless.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::{Error, Result};

/// Audio output with a fixed sample rate and channel layout.
///
/// All methods take `&self`: the feeder thread writes while the session
/// pauses, resumes and reads statistics from other threads.
pub trait AudioDevice: Send + Sync {
    fn sample_rate(&self) -> u32;

    fn channels(&self) -> u16;

    /// Write interleaved samples, blocking while the buffer is full for at
    /// most `timeout`. Returns how many samples were accepted.
    fn write(&self, samples: &[i16], timeout: Duration) -> Result<usize>;

    /// Audio written but not yet played, in milliseconds
    fn buffered_ms(&self) -> i64;

    /// Times playback ran dry while not paused
    fn underruns(&self) -> u64;

    fn pause(&self);

    fn resume(&self);

    /// Discard buffered audio
    fn clear(&self);

    /// Stop playback for good; blocked writers return
    fn close(&self);
}

#[derive(Debug)]
struct RingState {
    samples: VecDeque<i16>,
    paused: bool,
    closed: bool,
    /// Set once anything was written; silence before that is no underrun
    primed: bool,
    starved: bool,
}

#[derive(Debug)]
struct RingShared {
    sample_rate: u32,
    channels: u16,
    capacity: usize,
    state: Mutex<RingState>,
    space: Condvar,
    underruns: AtomicU64,
    frames_played: AtomicU64,
    closed: AtomicBool,
}

/// Software output device with a real-time playback thread
pub struct RingBufferDevice {
    shared: Arc<RingShared>,
    player: Mutex<Option<JoinHandle<()>>>,
}

/// Playback thread wakes this often
const TICK: Duration = Duration::from_millis(5);

impl RingBufferDevice {
    /// Device playing `sample_rate` Hz with `channels` channels and a
    /// buffer holding `buffer` worth of audio
    pub fn new(sample_rate: u32, channels: u16, buffer: Duration) -> Result<Self> {
        let sample_rate = sample_rate.max(1);
        let channels = channels.max(1);
        let frames = (sample_rate as u128 * buffer.as_millis() / 1000).max(1) as usize;
        let shared = Arc::new(RingShared {
            sample_rate,
            channels,
            capacity: frames * channels as usize,
            state: Mutex::new(RingState {
                samples: VecDeque::with_capacity(frames * channels as usize),
                paused: false,
                closed: false,
                primed: false,
                starved: false,
            }),
            space: Condvar::new(),
            underruns: AtomicU64::new(0),
            frames_played: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        });

        let player = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name("audio-device".into())
                .spawn(move || play_loop(shared))?
        };

        tracing::debug!(sample_rate, channels, ?buffer, "Audio device opened");
        Ok(Self {
            shared,
            player: Mutex::new(Some(player)),
        })
    }

    /// Frames consumed by the playback thread
    pub fn frames_played(&self) -> u64 {
        self.shared.frames_played.load(Ordering::Acquire)
    }

    /// Samples the buffer holds when full
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }
}

fn play_loop(shared: Arc<RingShared>) {
    let channels = shared.channels as usize;
    let mut last = Instant::now();
    // Fractional frames owed from previous ticks
    let mut carry = 0.0f64;

    loop {
        thread::sleep(TICK);
        let now = Instant::now();
        let elapsed = now - last;
        last = now;

        let mut state = shared.state.lock();
        if state.closed {
            break;
        }
        if state.paused {
            carry = 0.0;
            continue;
        }

        let due = elapsed.as_secs_f64() * shared.sample_rate as f64 + carry;
        let frames = due.floor() as usize;
        carry = due - frames as f64;

        let available = state.samples.len() / channels;
        let played = frames.min(available);
        state.samples.drain(..played * channels);
        shared
            .frames_played
            .fetch_add(played as u64, Ordering::AcqRel);

        if played < frames && state.primed {
            if !state.starved {
                state.starved = true;
                shared.underruns.fetch_add(1, Ordering::AcqRel);
                tracing::trace!(missing = frames - played, "Audio underrun");
            }
        } else if played > 0 {
            state.starved = false;
        }
        if played > 0 {
            shared.space.notify_all();
        }
    }
}

impl AudioDevice for RingBufferDevice {
    fn sample_rate(&self) -> u32 {
        self.shared.sample_rate
    }

    fn channels(&self) -> u16 {
        self.shared.channels
    }

    fn write(&self, samples: &[i16], timeout: Duration) -> Result<usize> {
        let deadline = Instant::now() + timeout;
        let channels = self.shared.channels as usize;
        let mut written = 0;
        let mut state = self.shared.state.lock();

        while written < samples.len() {
            if state.closed {
                return Err(Error::InvalidState("audio device closed".into()));
            }
            let room = self.shared.capacity - state.samples.len();
            // Whole frames only
            let take = (room.min(samples.len() - written) / channels) * channels;
            if take > 0 {
                state.samples.extend(&samples[written..written + take]);
                state.primed = true;
                written += take;
                continue;
            }
            if samples.len() - written < channels {
                // Trailing partial frame cannot be played
                break;
            }
            if self.shared.space.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        Ok(written)
    }

    fn buffered_ms(&self) -> i64 {
        let samples = self.shared.state.lock().samples.len();
        let frames = samples / self.shared.channels as usize;
        (frames as u64 * 1000 / self.shared.sample_rate as u64) as i64
    }

    fn underruns(&self) -> u64 {
        self.shared.underruns.load(Ordering::Acquire)
    }

    fn pause(&self) {
        self.shared.state.lock().paused = true;
    }

    fn resume(&self) {
        let mut state = self.shared.state.lock();
        state.paused = false;
        state.starved = false;
    }

    fn clear(&self) {
        let mut state = self.shared.state.lock();
        state.samples.clear();
        state.primed = false;
        state.starved = false;
        self.shared.space.notify_all();
    }

    fn close(&self) {
        {
            let mut state = self.shared.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            state.samples.clear();
        }
        self.shared.closed.store(true, Ordering::Release);
        self.shared.space.notify_all();
        if let Some(player) = self.player.lock().take() {
            let _ = player.join();
        }
        tracing::debug!("Audio device closed");
    }
}

impl Drop for RingBufferDevice {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for RingBufferDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingBufferDevice")
            .field("sample_rate", &self.shared.sample_rate)
            .field("channels", &self.shared.channels)
            .field("capacity", &self.shared.capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_and_drain() {
        let device = RingBufferDevice::new(8000, 1, Duration::from_millis(500)).unwrap();
        let written = device.write(&[0i16; 800], Duration::from_millis(10)).unwrap();
        assert_eq!(written, 800);
        assert!(device.buffered_ms() <= 100);

        thread::sleep(Duration::from_millis(200));
        assert_eq!(device.buffered_ms(), 0);
        assert_eq!(device.frames_played(), 800);
        assert!(device.underruns() >= 1);
    }

    #[test]
    fn test_write_blocks_when_full() {
        let device = RingBufferDevice::new(8000, 2, Duration::from_millis(20)).unwrap();
        assert_eq!(device.capacity(), 320);
        device.pause();
        let written = device.write(&[1i16; 1000], Duration::from_millis(30)).unwrap();
        assert_eq!(written, 320);
    }

    #[test]
    fn test_pause_holds_buffer() {
        let device = RingBufferDevice::new(8000, 1, Duration::from_millis(500)).unwrap();
        device.pause();
        device.write(&[0i16; 400], Duration::from_millis(10)).unwrap();
        thread::sleep(Duration::from_millis(60));
        assert_eq!(device.buffered_ms(), 50);
        assert_eq!(device.underruns(), 0);
        device.resume();
        thread::sleep(Duration::from_millis(150));
        assert_eq!(device.buffered_ms(), 0);
    }

    #[test]
    fn test_close_unblocks_writer() {
        let device = Arc::new(RingBufferDevice::new(8000, 1, Duration::from_millis(10)).unwrap());
        device.pause();
        let writer = {
            let device = Arc::clone(&device);
            thread::spawn(move || device.write(&[0i16; 10_000], Duration::from_secs(10)))
        };
        thread::sleep(Duration::from_millis(30));
        device.close();
        assert!(writer.join().unwrap().is_err());
        assert!(device.is_closed());
    }

    #[test]
    fn test_clear() {
        let device = RingBufferDevice::new(8000, 1, Duration::from_millis(500)).unwrap();
        device.pause();
        device.write(&[0i16; 400], Duration::from_millis(10)).unwrap();
        device.clear();
        assert_eq!(device.buffered_ms(), 0);
    }
}
