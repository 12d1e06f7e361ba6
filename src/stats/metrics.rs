//! Statistics for RTMP connections, playback sessions and publishes

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Connection-level statistics of one RTMP session
#[derive(Debug, Clone, Default)]
pub struct ConnectionStats {
    /// Total bytes received, handshake included
    pub bytes_received: u64,
    /// Total bytes sent, handshake included
    pub bytes_sent: u64,
    pub messages_received: u64,
    pub messages_sent: u64,
    pub acks_sent: u64,
    pub acks_received: u64,
    /// Time since the session was created
    pub duration: Duration,
}

impl ConnectionStats {
    /// Outbound bits per second over the session lifetime
    pub fn send_bitrate(&self) -> u64 {
        let secs = self.duration.as_secs();
        if secs > 0 {
            self.bytes_sent * 8 / secs
        } else {
            0
        }
    }
}

/// Live counters of a playback session, updated by the stage threads
#[derive(Debug, Default)]
pub struct PlaybackCounters {
    pub packets_read: AtomicU64,
    /// Packets of streams that were not enabled
    pub packets_discarded: AtomicU64,
    pub video_frames_decoded: AtomicU64,
    pub audio_frames_decoded: AtomicU64,
    pub frames_presented: AtomicU64,
    /// Video frames too late to present
    pub frames_dropped: AtomicU64,
    pub audio_frames_played: AtomicU64,
    pub decode_errors: AtomicU64,
    pub surface_errors: AtomicU64,
}

impl PlaybackCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy; `audio_underruns` comes from the output device
    pub fn snapshot(&self, audio_underruns: u64) -> PlaybackStats {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        PlaybackStats {
            packets_read: load(&self.packets_read),
            packets_discarded: load(&self.packets_discarded),
            video_frames_decoded: load(&self.video_frames_decoded),
            audio_frames_decoded: load(&self.audio_frames_decoded),
            frames_presented: load(&self.frames_presented),
            frames_dropped: load(&self.frames_dropped),
            audio_frames_played: load(&self.audio_frames_played),
            decode_errors: load(&self.decode_errors),
            surface_errors: load(&self.surface_errors),
            audio_underruns,
        }
    }
}

/// Snapshot of [`PlaybackCounters`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlaybackStats {
    pub packets_read: u64,
    pub packets_discarded: u64,
    pub video_frames_decoded: u64,
    pub audio_frames_decoded: u64,
    pub frames_presented: u64,
    pub frames_dropped: u64,
    pub audio_frames_played: u64,
    pub decode_errors: u64,
    pub surface_errors: u64,
    pub audio_underruns: u64,
}

impl PlaybackStats {
    /// Share of decoded video frames that were dropped as late
    pub fn drop_ratio(&self) -> f64 {
        let total = self.frames_presented + self.frames_dropped;
        if total == 0 {
            0.0
        } else {
            self.frames_dropped as f64 / total as f64
        }
    }
}

/// Outcome counters of one publish run
#[derive(Debug, Clone, Default)]
pub struct PublishStats {
    pub audio_messages: u64,
    pub video_messages: u64,
    pub data_messages: u64,
    /// Media payload bytes (FLV tag bodies)
    pub payload_bytes: u64,
    /// Timestamp of the last message sent, in milliseconds
    pub last_timestamp: u32,
    /// Wall time spent publishing
    pub elapsed: Duration,
}

impl PublishStats {
    pub fn messages(&self) -> u64 {
        self.audio_messages + self.video_messages + self.data_messages
    }

    /// Media duration published, in milliseconds
    pub fn media_duration_ms(&self) -> u32 {
        self.last_timestamp
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_bitrate() {
        let stats = ConnectionStats {
            bytes_sent: 1_000_000,
            duration: Duration::from_secs(10),
            ..Default::default()
        };
        assert_eq!(stats.send_bitrate(), 800_000);
        assert_eq!(ConnectionStats::default().send_bitrate(), 0);
    }

    #[test]
    fn test_playback_snapshot() {
        let counters = PlaybackCounters::new();
        PlaybackCounters::inc(&counters.frames_presented);
        PlaybackCounters::inc(&counters.frames_presented);
        PlaybackCounters::inc(&counters.frames_presented);
        PlaybackCounters::inc(&counters.frames_dropped);

        let stats = counters.snapshot(2);
        assert_eq!(stats.frames_presented, 3);
        assert_eq!(stats.frames_dropped, 1);
        assert_eq!(stats.audio_underruns, 2);
        assert!((stats.drop_ratio() - 0.25).abs() < f64::EPSILON);
        assert_eq!(PlaybackStats::default().drop_ratio(), 0.0);
    }

    #[test]
    fn test_publish_totals() {
        let stats = PublishStats {
            audio_messages: 10,
            video_messages: 5,
            data_messages: 1,
            last_timestamp: 960,
            ..Default::default()
        };
        assert_eq!(stats.messages(), 16);
        assert_eq!(stats.media_duration_ms(), 960);
    }
}
