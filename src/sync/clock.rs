//! Presentation clock
//!
//! Master time comes from the audio output while audio is playing and from
//! the wall clock otherwise. Both timelines are an anchor (`pts` valid at
//! instant `at`) extrapolated with elapsed time; the anchor sits behind a
//! sequence counter, so readers on any thread see a consistent pair
//! without taking a lock.
//!
//! Writers: the wall timeline is moved by the video synchronizer (by the
//! audio feeder when there is no video), the audio timeline by the audio
//! sink, and pause/resume/reset by the session. Those writers never race on
//! the same field.

use std::sync::atomic::{fence, AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::Mutex;

const NOT_PAUSED: i64 = -1;
const UNLIMITED: i64 = i64::MAX;

/// `pts` valid at `at` ms after the clock origin. Readers retry while the
/// sequence is odd or moved under them; writers are serialized.
#[derive(Debug, Default)]
struct Anchor {
    seq: AtomicU64,
    pts: AtomicI64,
    at: AtomicI64,
    write: Mutex<()>,
}

impl Anchor {
    fn store(&self, pts: i64, at: i64) {
        let _writer = self.write.lock();
        self.seq.fetch_add(1, Ordering::Relaxed);
        fence(Ordering::Release);
        self.pts.store(pts, Ordering::Relaxed);
        self.at.store(at, Ordering::Relaxed);
        self.seq.fetch_add(1, Ordering::Release);
    }

    fn load(&self) -> (i64, i64) {
        loop {
            let before = self.seq.load(Ordering::Acquire);
            if before % 2 == 1 {
                std::hint::spin_loop();
                continue;
            }
            let pts = self.pts.load(Ordering::Relaxed);
            let at = self.at.load(Ordering::Relaxed);
            fence(Ordering::Acquire);
            if self.seq.load(Ordering::Relaxed) == before {
                return (pts, at);
            }
        }
    }
}

/// One extrapolating timeline
#[derive(Debug)]
pub struct MediaClock {
    origin: Instant,
    anchor: Anchor,
    started: AtomicBool,
    /// Elapsed ms at which the clock was paused
    paused_at: AtomicI64,
    /// Time never runs past this (end of written audio)
    limit: AtomicI64,
}

impl Default for MediaClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            anchor: Anchor::default(),
            started: AtomicBool::new(false),
            paused_at: AtomicI64::new(NOT_PAUSED),
            limit: AtomicI64::new(UNLIMITED),
        }
    }

    fn elapsed_ms(&self) -> i64 {
        self.origin.elapsed().as_millis() as i64
    }

    /// Make the current time `pts`
    pub fn set(&self, pts: i64) {
        let now = match self.paused_at.load(Ordering::Acquire) {
            NOT_PAUSED => self.elapsed_ms(),
            paused => paused,
        };
        self.anchor.store(pts, now);
        self.started.store(true, Ordering::Release);
    }

    /// Current time, `None` until first set
    pub fn time(&self) -> Option<i64> {
        if !self.started.load(Ordering::Acquire) {
            return None;
        }
        let now = match self.paused_at.load(Ordering::Acquire) {
            NOT_PAUSED => self.elapsed_ms(),
            paused => paused,
        };
        let (pts, at) = self.anchor.load();
        let time = pts + (now - at).max(0);
        Some(time.min(self.limit.load(Ordering::Acquire)))
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    pub fn set_limit(&self, limit: Option<i64>) {
        self.limit.store(limit.unwrap_or(UNLIMITED), Ordering::Release);
    }

    /// Freeze. Idempotent.
    pub fn pause(&self) {
        let _ = self.paused_at.compare_exchange(
            NOT_PAUSED,
            self.elapsed_ms(),
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// Continue from where `pause` froze the clock
    pub fn resume(&self) {
        let paused = self.paused_at.load(Ordering::Acquire);
        if paused == NOT_PAUSED {
            return;
        }
        let (pts, at) = self.anchor.load();
        let frozen = pts + (paused - at).max(0);
        self.anchor.store(frozen, self.elapsed_ms());
        self.paused_at.store(NOT_PAUSED, Ordering::Release);
    }

    pub fn is_paused(&self) -> bool {
        self.paused_at.load(Ordering::Acquire) != NOT_PAUSED
    }

    /// Back to unstarted
    pub fn reset(&self) {
        self.started.store(false, Ordering::Release);
        self.limit.store(UNLIMITED, Ordering::Release);
    }
}

/// Which timeline master time currently follows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockSource {
    Wall,
    Audio,
}

/// Session master clock
#[derive(Debug, Default)]
pub struct PresentationClock {
    wall: MediaClock,
    audio: MediaClock,
    audio_active: AtomicBool,
}

impl PresentationClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn source(&self) -> ClockSource {
        if self.audio_active.load(Ordering::Acquire) && self.audio.is_started() {
            ClockSource::Audio
        } else {
            ClockSource::Wall
        }
    }

    /// Master time in ms; `None` before playback has started
    pub fn master_time(&self) -> Option<i64> {
        match self.source() {
            ClockSource::Audio => self.audio.time(),
            ClockSource::Wall => self.wall.time(),
        }
    }

    /// Master time, zero before playback has started
    pub fn position_ms(&self) -> i64 {
        self.master_time().unwrap_or(0)
    }

    /// Move the wall timeline to `pts`
    pub(crate) fn rebase(&self, pts: i64) {
        tracing::trace!(pts, "Wall clock rebased");
        self.wall.set(pts);
    }

    /// Audio output position: `played` is heard now, `written_end` is the
    /// last sample handed to the device
    pub(crate) fn update_audio(&self, played: i64, written_end: i64) {
        self.audio.set(played);
        self.audio.set_limit(Some(written_end));
        self.audio_active.store(true, Ordering::Release);
    }

    /// Audio stopped driving the clock; the wall clock carries on from the
    /// last audio position
    pub(crate) fn end_audio(&self) {
        if let Some(time) = self.audio.time() {
            if self.audio_active.load(Ordering::Acquire) {
                self.wall.set(time);
            }
        }
        self.audio_active.store(false, Ordering::Release);
    }

    pub fn pause(&self) {
        self.wall.pause();
        self.audio.pause();
    }

    pub fn resume(&self) {
        self.wall.resume();
        self.audio.resume();
    }

    pub fn is_paused(&self) -> bool {
        self.wall.is_paused()
    }

    /// Forget both timelines, as before restarting after a seek
    pub(crate) fn reset(&self) {
        self.audio_active.store(false, Ordering::Release);
        self.wall.reset();
        self.audio.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_anchor_keeps_negative_pts() {
        let anchor = Anchor::default();
        anchor.store(-40, 123_456);
        assert_eq!(anchor.load(), (-40, 123_456));
    }

    #[test]
    fn test_timestamps_past_31_bits() {
        // Top of the 32-bit RTMP timestamp range, ~49 days in
        let late = u32::MAX as i64 - 1000;
        let clock = MediaClock::new();
        clock.set(late);
        let t = clock.time().unwrap();
        assert!((late..late + 500).contains(&t), "time {}", t);
    }

    #[test]
    fn test_anchor_pairs_stay_consistent() {
        let anchor = Arc::new(Anchor::default());
        let writer = {
            let anchor = Arc::clone(&anchor);
            thread::spawn(move || {
                for i in 0..20_000i64 {
                    anchor.store(i, i * 2);
                }
            })
        };
        for _ in 0..20_000 {
            let (pts, at) = anchor.load();
            assert_eq!(at, pts * 2);
        }
        writer.join().unwrap();
    }

    #[test]
    fn test_unstarted_clock() {
        let clock = PresentationClock::new();
        assert_eq!(clock.master_time(), None);
        assert_eq!(clock.position_ms(), 0);
        assert_eq!(clock.source(), ClockSource::Wall);
    }

    #[test]
    fn test_wall_clock_advances() {
        let clock = MediaClock::new();
        clock.set(1000);
        thread::sleep(Duration::from_millis(30));
        let t = clock.time().unwrap();
        assert!((1025..1500).contains(&t), "time {}", t);
    }

    #[test]
    fn test_pause_freezes() {
        let clock = MediaClock::new();
        clock.set(500);
        clock.pause();
        let frozen = clock.time().unwrap();
        thread::sleep(Duration::from_millis(30));
        assert_eq!(clock.time().unwrap(), frozen);
        assert!(clock.is_paused());

        clock.resume();
        assert!(!clock.is_paused());
        let resumed = clock.time().unwrap();
        assert!(resumed >= frozen && resumed < frozen + 20);
    }

    #[test]
    fn test_audio_limit() {
        let clock = MediaClock::new();
        clock.set(100);
        clock.set_limit(Some(105));
        thread::sleep(Duration::from_millis(20));
        assert_eq!(clock.time(), Some(105));
    }

    #[test]
    fn test_audio_takes_over_and_hands_back() {
        let clock = PresentationClock::new();
        clock.rebase(0);
        clock.update_audio(2000, 2100);
        assert_eq!(clock.source(), ClockSource::Audio);
        let t = clock.master_time().unwrap();
        assert!((2000..=2100).contains(&t));

        clock.end_audio();
        assert_eq!(clock.source(), ClockSource::Wall);
        assert!(clock.master_time().unwrap() >= 2000);
    }

    #[test]
    fn test_reset() {
        let clock = PresentationClock::new();
        clock.update_audio(10, 20);
        clock.reset();
        assert_eq!(clock.master_time(), None);
        assert_eq!(clock.source(), ClockSource::Wall);
    }
}
