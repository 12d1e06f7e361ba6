//! Frame scheduling against the master clock
//!
//! For a frame with presentation time `pts` and master time `m`, with
//! `delta = pts - m`:
//!
//! ```text
//!   delta < -drop            drop
//!   -drop <= delta <= hold   present now
//!   delta > hold             sleep (at most one slice) and look again
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::config::PlayerConfig;
use crate::sync::clock::{ClockSource, PresentationClock};

/// What to do with a frame right now
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncDecision {
    Present,
    Drop,
    /// Early by this much
    Hold(Duration),
}

/// Present/drop/hold thresholds in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    pub hold_ms: i64,
    pub drop_ms: i64,
}

impl Thresholds {
    pub fn new(hold: Duration, drop: Duration) -> Self {
        Self {
            hold_ms: hold.as_millis() as i64,
            drop_ms: drop.as_millis() as i64,
        }
    }

    /// The boundary `delta == -drop` is still presented
    pub fn decide(&self, delta_ms: i64) -> SyncDecision {
        if delta_ms < -self.drop_ms {
            SyncDecision::Drop
        } else if delta_ms <= self.hold_ms {
            SyncDecision::Present
        } else {
            SyncDecision::Hold(Duration::from_millis(delta_ms as u64))
        }
    }
}

/// Final outcome for one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Present,
    Drop,
    /// Stop was requested while holding
    Stopped,
}

/// Paces frames of one stream against the shared clock
pub struct Synchronizer {
    clock: Arc<PresentationClock>,
    thresholds: Thresholds,
    slice: Duration,
    fallback_interval: Duration,
    /// Owns the wall timeline: may start and rebase it
    drives_wall: bool,
    last_untimed: Option<Instant>,
}

impl Synchronizer {
    pub fn new(clock: Arc<PresentationClock>, config: &PlayerConfig, drives_wall: bool) -> Self {
        Self {
            clock,
            thresholds: Thresholds::new(config.hold_threshold, config.drop_threshold),
            slice: config.hold_slice,
            fallback_interval: config.fallback_frame_interval,
            drives_wall,
            last_untimed: None,
        }
    }

    pub fn thresholds(&self) -> Thresholds {
        self.thresholds
    }

    /// Decide without waiting
    pub fn evaluate(&self, pts_ms: i64) -> SyncDecision {
        match self.clock.master_time() {
            Some(master) => self.thresholds.decide(pts_ms - master),
            None => SyncDecision::Present,
        }
    }

    /// Wait until the frame is due, or decide it is too late.
    ///
    /// Holding sleeps in slices and re-checks `stop` after each one.
    pub fn wait_for(&mut self, pts_ms: i64, discontinuity: bool, stop: &AtomicBool) -> Verdict {
        if pts_ms < 0 {
            return self.pace_untimed(stop);
        }
        if discontinuity || self.clock.master_time().is_none() {
            if self.drives_wall && self.clock.source() == ClockSource::Wall {
                self.clock.rebase(pts_ms);
            }
            if discontinuity || self.drives_wall {
                return Verdict::Present;
            }
        }

        loop {
            if stop.load(Ordering::Acquire) {
                return Verdict::Stopped;
            }
            match self.evaluate(pts_ms) {
                SyncDecision::Present => return Verdict::Present,
                SyncDecision::Drop => {
                    tracing::trace!(pts = pts_ms, master = ?self.clock.master_time(), "Dropping late frame");
                    return Verdict::Drop;
                }
                SyncDecision::Hold(early) => thread::sleep(early.min(self.slice)),
            }
        }
    }

    /// Frames without timestamps go out at a fixed interval
    fn pace_untimed(&mut self, stop: &AtomicBool) -> Verdict {
        if let Some(last) = self.last_untimed {
            let due = last + self.fallback_interval;
            loop {
                if stop.load(Ordering::Acquire) {
                    return Verdict::Stopped;
                }
                let now = Instant::now();
                if now >= due {
                    break;
                }
                thread::sleep((due - now).min(self.slice));
            }
        }
        self.last_untimed = Some(Instant::now());
        Verdict::Present
    }
}

/// Publisher pacing: how long to wait before sending a message so output
/// follows media time. Never drops; timestamps come out non-decreasing.
#[derive(Debug)]
pub struct Pacer {
    start: Option<(Instant, i64)>,
    fallback_interval: Duration,
    last_ts: i64,
    untimed_count: u32,
}

impl Pacer {
    pub fn new(fallback_interval: Duration) -> Self {
        Self {
            start: None,
            fallback_interval,
            last_ts: 0,
            untimed_count: 0,
        }
    }

    /// Timestamp to send for `ts_ms` (clamped to the previous one) and the
    /// instant it is due. `None` is paced at the fallback interval.
    pub fn schedule(&mut self, ts_ms: Option<i64>, now: Instant) -> (u32, Instant) {
        let ts = match ts_ms {
            Some(ts) if ts >= 0 => ts.max(self.last_ts),
            _ => {
                self.untimed_count += 1;
                self.last_ts + self.fallback_interval.as_millis() as i64
            }
        };
        self.last_ts = ts;
        let (start, base) = *self.start.get_or_insert((now, ts));
        let offset = (ts - base).max(0) as u64;
        (ts as u32, start + Duration::from_millis(offset))
    }

    /// Messages that had no usable timestamp
    pub fn untimed(&self) -> u32 {
        self.untimed_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thresholds() -> Thresholds {
        Thresholds::new(Duration::from_millis(10), Duration::from_millis(80))
    }

    #[test]
    fn test_decide_boundaries() {
        let t = thresholds();
        assert_eq!(t.decide(-81), SyncDecision::Drop);
        assert_eq!(t.decide(-80), SyncDecision::Present);
        assert_eq!(t.decide(0), SyncDecision::Present);
        assert_eq!(t.decide(10), SyncDecision::Present);
        assert_eq!(t.decide(11), SyncDecision::Hold(Duration::from_millis(11)));
    }

    #[test]
    fn test_decide_exhaustive_band() {
        let t = thresholds();
        for delta in -500..=500 {
            let decision = t.decide(delta);
            if delta < -80 {
                assert_eq!(decision, SyncDecision::Drop, "delta {}", delta);
            } else if delta <= 10 {
                assert_eq!(decision, SyncDecision::Present, "delta {}", delta);
            } else {
                assert!(matches!(decision, SyncDecision::Hold(_)), "delta {}", delta);
            }
        }
    }

    fn synchronizer(clock: &Arc<PresentationClock>) -> Synchronizer {
        let config = PlayerConfig::default()
            .hold_threshold(Duration::from_millis(10))
            .drop_threshold(Duration::from_millis(80))
            .hold_slice(Duration::from_millis(5));
        Synchronizer::new(Arc::clone(clock), &config, true)
    }

    #[test]
    fn test_first_frame_starts_clock() {
        let clock = Arc::new(PresentationClock::new());
        let mut sync = synchronizer(&clock);
        let stop = AtomicBool::new(false);
        assert_eq!(sync.wait_for(3000, false, &stop), Verdict::Present);
        assert!(clock.master_time().unwrap() >= 3000);
    }

    #[test]
    fn test_late_frame_dropped_and_early_frame_held() {
        let clock = Arc::new(PresentationClock::new());
        clock.rebase(1000);
        let mut sync = synchronizer(&clock);
        let stop = AtomicBool::new(false);

        assert_eq!(sync.wait_for(500, false, &stop), Verdict::Drop);

        let start = Instant::now();
        assert_eq!(sync.wait_for(1040, false, &stop), Verdict::Present);
        assert!(start.elapsed() >= Duration::from_millis(25));
    }

    #[test]
    fn test_discontinuity_rebases() {
        let clock = Arc::new(PresentationClock::new());
        clock.rebase(60_000);
        let mut sync = synchronizer(&clock);
        let stop = AtomicBool::new(false);
        assert_eq!(sync.wait_for(0, true, &stop), Verdict::Present);
        assert!(clock.master_time().unwrap() < 1000);
        assert_eq!(sync.wait_for(5, false, &stop), Verdict::Present);
    }

    #[test]
    fn test_stop_interrupts_hold() {
        let clock = Arc::new(PresentationClock::new());
        clock.rebase(0);
        let mut sync = synchronizer(&clock);
        let stop = Arc::new(AtomicBool::new(false));
        let stopper = {
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                stop.store(true, Ordering::Release);
            })
        };
        let start = Instant::now();
        assert_eq!(sync.wait_for(60_000, false, &stop), Verdict::Stopped);
        assert!(start.elapsed() < Duration::from_secs(5));
        stopper.join().unwrap();
    }

    #[test]
    fn test_untimed_frames_paced() {
        let clock = Arc::new(PresentationClock::new());
        let config = PlayerConfig::default().fallback_frame_interval(Duration::from_millis(32));
        let mut sync = Synchronizer::new(clock, &config, true);
        let stop = AtomicBool::new(false);
        let start = Instant::now();
        for _ in 0..3 {
            assert_eq!(sync.wait_for(-1, false, &stop), Verdict::Present);
        }
        assert!(start.elapsed() >= Duration::from_millis(64));
    }

    #[test]
    fn test_follower_waits_for_clock() {
        // A non-driving stream does not start the wall clock
        let clock = Arc::new(PresentationClock::new());
        let config = PlayerConfig::default().hold_slice(Duration::from_millis(5));
        let mut sync = Synchronizer::new(Arc::clone(&clock), &config, false);
        clock.rebase(100);
        let stop = AtomicBool::new(false);
        assert_eq!(sync.wait_for(100, false, &stop), Verdict::Present);
    }

    #[test]
    fn test_pacer_schedule() {
        let mut pacer = Pacer::new(Duration::from_millis(32));
        let t0 = Instant::now();

        let (ts, due) = pacer.schedule(Some(1000), t0);
        assert_eq!((ts, due), (1000, t0));

        let (ts, due) = pacer.schedule(Some(1040), t0);
        assert_eq!(ts, 1040);
        assert_eq!(due, t0 + Duration::from_millis(40));

        // regression is clamped, never sent backwards
        let (ts, due) = pacer.schedule(Some(1020), t0);
        assert_eq!(ts, 1040);
        assert_eq!(due, t0 + Duration::from_millis(40));

        let (ts, _) = pacer.schedule(None, t0);
        assert_eq!(ts, 1072);
        assert_eq!(pacer.untimed(), 1);
    }
}
