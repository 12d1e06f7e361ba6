//! Message stream state
//!
//! The one message stream a session opens with `createStream`, and what
//! has flowed over it.

use std::time::Instant;

/// What the session does on its message stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamMode {
    Idle,
    /// Sending media (`publish`)
    Publishing,
    /// Receiving media (`play`)
    Playing,
}

/// Per-stream state
#[derive(Debug)]
pub struct StreamState {
    /// Message stream id assigned by the server
    pub id: u32,
    pub mode: StreamMode,
    pub stream_key: String,
    pub started_at: Option<Instant>,

    pub has_metadata: bool,
    pub video_messages: u64,
    pub audio_messages: u64,
    pub keyframes: u64,
    pub media_bytes: u64,

    /// Highest media timestamp seen so far, for monotonic checks
    pub last_timestamp: Option<u32>,
    /// Media messages whose timestamp went backwards
    pub timestamp_regressions: u64,
}

impl StreamState {
    pub fn new(id: u32, stream_key: impl Into<String>) -> Self {
        Self {
            id,
            mode: StreamMode::Idle,
            stream_key: stream_key.into(),
            started_at: None,
            has_metadata: false,
            video_messages: 0,
            audio_messages: 0,
            keyframes: 0,
            media_bytes: 0,
            last_timestamp: None,
            timestamp_regressions: 0,
        }
    }

    pub fn start_publish(&mut self) {
        self.mode = StreamMode::Publishing;
        self.started_at = Some(Instant::now());
    }

    pub fn start_play(&mut self) {
        self.mode = StreamMode::Playing;
        self.started_at = Some(Instant::now());
    }

    pub fn stop(&mut self) {
        self.mode = StreamMode::Idle;
    }

    pub fn is_publishing(&self) -> bool {
        self.mode == StreamMode::Publishing
    }

    pub fn is_playing(&self) -> bool {
        self.mode == StreamMode::Playing
    }

    pub fn on_video(&mut self, timestamp: u32, is_keyframe: bool, size: usize) {
        self.video_messages += 1;
        if is_keyframe {
            self.keyframes += 1;
        }
        self.on_media(timestamp, size);
    }

    pub fn on_audio(&mut self, timestamp: u32, size: usize) {
        self.audio_messages += 1;
        self.on_media(timestamp, size);
    }

    pub fn on_metadata(&mut self) {
        self.has_metadata = true;
    }

    fn on_media(&mut self, timestamp: u32, size: usize) {
        self.media_bytes += size as u64;
        match self.last_timestamp {
            Some(last) if timestamp < last => self.timestamp_regressions += 1,
            _ => self.last_timestamp = Some(timestamp),
        }
    }

    /// Bits per second since the stream started
    pub fn bitrate(&self) -> Option<u64> {
        let secs = self.started_at?.elapsed().as_secs();
        (secs > 0).then(|| self.media_bytes * 8 / secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_mode() {
        let mut stream = StreamState::new(1, "key");
        assert_eq!(stream.mode, StreamMode::Idle);
        stream.start_publish();
        assert!(stream.is_publishing());
        assert!(!stream.is_playing());
        assert!(stream.started_at.is_some());
        stream.stop();
        assert_eq!(stream.mode, StreamMode::Idle);
    }

    #[test]
    fn test_media_counters_and_regressions() {
        let mut stream = StreamState::new(1, "key");
        stream.start_play();
        stream.on_video(0, true, 100);
        stream.on_audio(10, 20);
        stream.on_video(40, false, 50);
        stream.on_audio(30, 20);

        assert_eq!(stream.video_messages, 2);
        assert_eq!(stream.audio_messages, 2);
        assert_eq!(stream.keyframes, 1);
        assert_eq!(stream.media_bytes, 190);
        assert_eq!(stream.last_timestamp, Some(40));
        assert_eq!(stream.timestamp_regressions, 1);
    }
}
