//! RTMP play source
//!
//! Connects as a player and turns audio, video and data messages into
//! packets. The session runs on a current-thread tokio runtime owned by
//! the demuxer, so the blocking [`Demuxer`] interface can drive it from the
//! demux stage thread.

use std::collections::VecDeque;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use tokio::runtime::{Builder, Runtime};

use crate::config::PlayerConfig;
use crate::demux::{Demuxer, StreamTable};
use crate::error::{Error, Result};
use crate::media::{FlvTag, MediaInfo, MediaKind, Packet};
use crate::protocol::message::RtmpMessage;
use crate::session::{RtmpSession, SessionRole};
use crate::stats::ConnectionStats;

/// Live RTMP stream as a packet source
pub struct RtmpDemuxer {
    runtime: Runtime,
    session: Option<RtmpSession>,
    info: MediaInfo,
    streams: StreamTable,
    replay: VecDeque<Packet>,
    cancel: Arc<AtomicBool>,
    url: String,
}

impl RtmpDemuxer {
    /// Connect, play and scan for streams.
    ///
    /// Probing stops once the streams `onMetaData` announces have been seen
    /// (audio and video when there is no metadata), or after
    /// `config.scan_tags` messages.
    pub fn open(url: &str, config: &PlayerConfig, cancel: Arc<AtomicBool>) -> Result<Self> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        let client = config.rtmp_client(url);
        let session = runtime.block_on(RtmpSession::connect(client, SessionRole::Player))?;
        tracing::info!(url = %url, "RTMP play started");

        let mut demuxer = Self {
            runtime,
            session: Some(session),
            info: MediaInfo::default(),
            streams: StreamTable::default(),
            replay: VecDeque::new(),
            cancel,
            url: url.to_string(),
        };
        demuxer.scan(config.scan_tags.max(1))?;
        Ok(demuxer)
    }

    fn scan(&mut self, limit: usize) -> Result<()> {
        let mut messages = 0;
        while messages < limit && !self.scan_complete() {
            let Some(packet) = self.next_media()? else {
                break;
            };
            self.replay.push_back(packet);
            messages += 1;
        }
        if self.info.streams.is_empty() {
            self.close();
            return Err(Error::unsupported(format!("no audio or video received from {}", self.url)));
        }
        tracing::debug!(scanned = messages, streams = self.info.streams.len(), "RTMP scan finished");
        Ok(())
    }

    fn scan_complete(&self) -> bool {
        if self.info.streams.is_empty() {
            return false;
        }
        let (audio, video) = match self.info.metadata.as_ref() {
            Some(meta) => (
                meta.get("audiocodecid").is_some(),
                meta.get("videocodecid").is_some(),
            ),
            None => (true, true),
        };
        (!audio || self.streams.has(MediaKind::Audio)) && (!video || self.streams.has(MediaKind::Video))
    }

    fn next_media(&mut self) -> Result<Option<Packet>> {
        loop {
            let Some(session) = self.session.as_mut() else {
                return Ok(None);
            };
            let msg = self.runtime.block_on(session.next_media(&self.cancel))?;
            let tag = match msg {
                None => return Ok(None),
                Some(RtmpMessage::Audio { timestamp, data }) => FlvTag::audio(timestamp, data),
                Some(RtmpMessage::Video { timestamp, data }) => FlvTag::video(timestamp, data),
                Some(ref data @ RtmpMessage::Data { .. }) => {
                    if let Some(meta) = data.metadata() {
                        tracing::debug!("Stream metadata received");
                        self.info.apply_metadata(meta);
                    }
                    continue;
                }
                Some(_) => continue,
            };
            let Some(index) = self.streams.index_for(&tag, &mut self.info) else {
                continue;
            };
            if let Some(packet) = Packet::from_tag(index, &tag) {
                return Ok(Some(packet));
            }
        }
    }

    pub fn stats(&self) -> Option<ConnectionStats> {
        self.session.as_ref().map(|s| s.stats())
    }
}

impl Demuxer for RtmpDemuxer {
    fn info(&self) -> &MediaInfo {
        &self.info
    }

    fn read_packet(&mut self) -> Result<Option<Packet>> {
        match self.replay.pop_front() {
            Some(packet) => Ok(Some(packet)),
            None => self.next_media(),
        }
    }

    fn seek(&mut self, _position_ms: u64) -> Result<u64> {
        Err(Error::SeekUnsupported)
    }

    fn close(&mut self) {
        if let Some(mut session) = self.session.take() {
            if let Err(e) = self.runtime.block_on(session.close()) {
                tracing::debug!(error = %e, "RTMP close failed");
            }
            tracing::info!(url = %self.url, "RTMP play closed");
        }
    }
}

impl Drop for RtmpDemuxer {
    fn drop(&mut self) {
        self.close();
    }
}
