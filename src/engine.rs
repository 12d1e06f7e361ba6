//! Handle-based control surface
//!
//! Embedders that cannot hold Rust values (a JNI bridge, a C ABI) address
//! sessions by integer handle. Every call validates the handle; a released
//! or unknown handle fails with `InvalidState` instead of touching freed
//! state.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::Receiver;
use parking_lot::Mutex;

use crate::audio::AudioDevice;
use crate::client::{ClientConfig, RtmpPublisher};
use crate::codec::{DecoderFactory, FactoryChain};
use crate::config::PlayerConfig;
use crate::error::{Error, Result};
use crate::media::MediaInfo;
use crate::player::{PlaybackEvent, PlaybackSession, ResourceCounter, SessionOutcome};
use crate::render::Surface;
use crate::stats::{PlaybackStats, PublishStats};

/// Session handle. Never reused within one engine.
pub type Handle = u64;

/// Owns every open session
pub struct Engine {
    config: PlayerConfig,
    decoders: Arc<dyn DecoderFactory>,
    sessions: Mutex<HashMap<Handle, Arc<PlaybackSession>>>,
    next_handle: AtomicU64,
    resources: Arc<ResourceCounter>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(PlayerConfig::default())
    }
}

impl Engine {
    /// Engine with the built-in decoders
    pub fn new(config: PlayerConfig) -> Self {
        Self::with_decoders(config, FactoryChain::default())
    }

    pub fn with_decoders(config: PlayerConfig, decoders: impl DecoderFactory + 'static) -> Self {
        Self {
            config,
            decoders: Arc::new(decoders),
            sessions: Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
            resources: Arc::new(ResourceCounter::new()),
        }
    }

    pub fn config(&self) -> &PlayerConfig {
        &self.config
    }

    /// Open a file path or `rtmp://` URL
    pub fn open(&self, source: &str) -> Result<Handle> {
        let session = PlaybackSession::open(
            source,
            self.config.clone(),
            Arc::clone(&self.decoders),
            Arc::clone(&self.resources),
        )?;
        let handle = self.next_handle.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(handle, session_id = session.id(), "Handle assigned");
        self.sessions.lock().insert(handle, Arc::new(session));
        Ok(handle)
    }

    /// Stop and tear down the session. Releasing twice fails the second
    /// time.
    pub fn release(&self, handle: Handle) -> Result<()> {
        let session = self
            .sessions
            .lock()
            .remove(&handle)
            .ok_or_else(|| unknown(handle))?;
        session.release();
        Ok(())
    }

    pub fn start_video(&self, handle: Handle, surface: Box<dyn Surface>, width: u32, height: u32) -> Result<()> {
        self.session(handle)?.start_video(surface, width, height)
    }

    pub fn start_audio(&self, handle: Handle, device: Arc<dyn AudioDevice>) -> Result<()> {
        self.session(handle)?.start_audio(device)
    }

    /// Open an RTMP stream and present its video. Returns the handle for
    /// further control; audio can be started on it separately.
    pub fn play_remote(&self, url: &str, surface: Box<dyn Surface>, width: u32, height: u32) -> Result<Handle> {
        if !url.to_ascii_lowercase().starts_with("rtmp://") {
            return Err(Error::InvalidUrl(url.to_string()));
        }
        let handle = self.open(url)?;
        if let Err(e) = self.start_video(handle, surface, width, height) {
            let _ = self.release(handle);
            return Err(e);
        }
        Ok(handle)
    }

    /// Publish a local FLV file to `url`. Blocks until the whole file has
    /// been sent; the RTMP I/O runs on a dedicated thread.
    pub fn publish(&self, file: impl Into<PathBuf>, url: &str) -> Result<PublishStats> {
        let config = ClientConfig {
            url: url.to_string(),
            ..self.config.rtmp.clone()
        };
        let (publisher, _events) = RtmpPublisher::new(config);
        publisher
            .fallback_interval(self.config.fallback_frame_interval)
            .scan_tags(self.config.scan_tags)
            .publish_blocking(file)
    }

    pub fn pause(&self, handle: Handle) -> Result<()> {
        self.session(handle)?.pause()
    }

    pub fn resume(&self, handle: Handle) -> Result<()> {
        self.session(handle)?.resume()
    }

    /// Stop playback; the handle stays valid until released
    pub fn stop(&self, handle: Handle) -> Result<()> {
        self.session(handle)?.stop();
        Ok(())
    }

    pub fn seek(&self, handle: Handle, position_ms: u64) -> Result<u64> {
        self.session(handle)?.seek(position_ms)
    }

    pub fn position(&self, handle: Handle) -> Result<u64> {
        Ok(self.session(handle)?.position())
    }

    pub fn info(&self, handle: Handle) -> Result<MediaInfo> {
        Ok(self.session(handle)?.info().clone())
    }

    pub fn stats(&self, handle: Handle) -> Result<PlaybackStats> {
        Ok(self.session(handle)?.stats())
    }

    pub fn outcome(&self, handle: Handle) -> Result<Option<SessionOutcome>> {
        Ok(self.session(handle)?.outcome())
    }

    /// Block until the session ends or `timeout` passes. The engine lock is
    /// not held while waiting.
    pub fn wait(&self, handle: Handle, timeout: Option<Duration>) -> Result<Option<SessionOutcome>> {
        let session = self.session(handle)?;
        Ok(session.wait(timeout))
    }

    pub fn events(&self, handle: Handle) -> Result<Receiver<PlaybackEvent>> {
        Ok(self.session(handle)?.events())
    }

    /// Open handles
    pub fn sessions(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Stage threads still running across all sessions
    pub fn live_threads(&self) -> usize {
        self.resources.threads()
    }

    /// Demuxers and decoders not yet freed across all sessions
    pub fn live_resources(&self) -> usize {
        self.resources.resources()
    }

    fn session(&self, handle: Handle) -> Result<Arc<PlaybackSession>> {
        self.sessions.lock().get(&handle).cloned().ok_or_else(|| unknown(handle))
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        let sessions: Vec<_> = self.sessions.lock().drain().collect();
        for (handle, session) in sessions {
            tracing::debug!(handle, "Releasing session on engine drop");
            session.release();
        }
    }
}

fn unknown(handle: Handle) -> Error {
    Error::InvalidState(format!("unknown session handle {}", handle))
}
