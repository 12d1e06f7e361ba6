//! Playback configuration

use std::time::Duration;

use crate::client::config::ClientConfig;

/// Playback session configuration
#[derive(Debug, Clone)]
pub struct PlayerConfig {
    /// Packets buffered between the demuxer and each decoder
    pub packet_queue_capacity: usize,

    /// Decoded pictures buffered ahead of the video feeder
    pub video_frame_queue_capacity: usize,

    /// Decoded audio frames buffered ahead of the audio feeder
    pub audio_frame_queue_capacity: usize,

    /// A frame this far ahead of the master clock is held back
    pub hold_threshold: Duration,

    /// A frame this far behind the master clock is dropped
    pub drop_threshold: Duration,

    /// Longest single sleep while holding a frame; also how often a held
    /// frame re-checks the stop flag
    pub hold_slice: Duration,

    /// Pacing interval for frames without timestamps
    pub fallback_frame_interval: Duration,

    /// Tags read ahead to discover streams
    pub scan_tags: usize,

    /// Settings for RTMP sources; the URL is filled per source
    pub rtmp: ClientConfig,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            packet_queue_capacity: 64,
            video_frame_queue_capacity: 4,
            audio_frame_queue_capacity: 16,
            hold_threshold: Duration::from_millis(10),
            drop_threshold: Duration::from_millis(80),
            hold_slice: Duration::from_millis(20),
            fallback_frame_interval: Duration::from_millis(32),
            scan_tags: 64,
            rtmp: ClientConfig::default(),
        }
    }
}

impl PlayerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn packet_queue_capacity(mut self, capacity: usize) -> Self {
        self.packet_queue_capacity = capacity.max(1);
        self
    }

    pub fn video_frame_queue_capacity(mut self, capacity: usize) -> Self {
        self.video_frame_queue_capacity = capacity.max(1);
        self
    }

    pub fn audio_frame_queue_capacity(mut self, capacity: usize) -> Self {
        self.audio_frame_queue_capacity = capacity.max(1);
        self
    }

    pub fn hold_threshold(mut self, threshold: Duration) -> Self {
        self.hold_threshold = threshold;
        self
    }

    pub fn drop_threshold(mut self, threshold: Duration) -> Self {
        self.drop_threshold = threshold;
        self
    }

    pub fn hold_slice(mut self, slice: Duration) -> Self {
        self.hold_slice = slice.max(Duration::from_millis(1));
        self
    }

    pub fn fallback_frame_interval(mut self, interval: Duration) -> Self {
        self.fallback_frame_interval = interval;
        self
    }

    pub fn scan_tags(mut self, tags: usize) -> Self {
        self.scan_tags = tags.max(1);
        self
    }

    pub fn rtmp(mut self, rtmp: ClientConfig) -> Self {
        self.rtmp = rtmp;
        self
    }

    /// Client settings for connecting to `url`
    pub(crate) fn rtmp_client(&self, url: &str) -> ClientConfig {
        ClientConfig {
            url: url.to_string(),
            ..self.rtmp.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PlayerConfig::default();
        assert!(config.hold_threshold < config.drop_threshold);
        assert_eq!(config.fallback_frame_interval, Duration::from_millis(32));
    }

    #[test]
    fn test_builder_clamps() {
        let config = PlayerConfig::new()
            .packet_queue_capacity(0)
            .hold_slice(Duration::ZERO)
            .scan_tags(0);
        assert_eq!(config.packet_queue_capacity, 1);
        assert_eq!(config.hold_slice, Duration::from_millis(1));
        assert_eq!(config.scan_tags, 1);
    }

    #[test]
    fn test_rtmp_client_inherits_settings() {
        let config = PlayerConfig::new()
            .rtmp(ClientConfig::default().read_timeout(Duration::from_secs(3)));
        let client = config.rtmp_client("rtmp://localhost/live/a");
        assert_eq!(client.url, "rtmp://localhost/live/a");
        assert_eq!(client.read_timeout, Duration::from_secs(3));
    }
}
