//! FLV file publisher
//!
//! Reads a local FLV file and republishes its tags to an RTMP server,
//! paced to the tag timestamps so the server receives a live-like stream.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{timeout, Instant};

use crate::demux::{Demuxer, FlvFileDemuxer};
use crate::error::{Error, ProtocolError, Result};
use crate::media::MediaKind;
use crate::session::{RtmpSession, SessionRole};
use crate::stats::PublishStats;
use crate::sync::Pacer;

use super::config::ClientConfig;

/// Events from the RTMP publisher
#[derive(Debug, Clone)]
pub enum PublishEvent {
    /// TCP connection established
    Connected,

    /// Server accepted `publish`; media is flowing
    Publishing,

    /// Whole file sent and the stream closed
    Finished(PublishStats),

    /// Publishing failed
    Error(String),
}

/// Publishes FLV files to an RTMP server
///
/// # Example
/// ```no_run
/// use streamcast::client::{ClientConfig, RtmpPublisher};
///
/// # async fn example() -> streamcast::error::Result<()> {
/// let config = ClientConfig::new("rtmp://localhost/live/stream_key");
/// let (publisher, mut events) = RtmpPublisher::new(config);
///
/// tokio::spawn(async move {
///     while let Some(event) = events.recv().await {
///         println!("Event: {:?}", event);
///     }
/// });
///
/// let report = publisher.publish_file("movie.flv").await?;
/// println!("sent {} messages", report.messages());
/// # Ok(())
/// # }
/// ```
pub struct RtmpPublisher {
    config: ClientConfig,
    fallback_interval: Duration,
    scan_tags: usize,
    event_tx: mpsc::Sender<PublishEvent>,
    cancel: Arc<AtomicBool>,
}

impl RtmpPublisher {
    /// Create a new publisher.
    ///
    /// Returns the publisher and a receiver for events.
    pub fn new(config: ClientConfig) -> (Self, mpsc::Receiver<PublishEvent>) {
        let (tx, rx) = mpsc::channel(256);

        let publisher = Self {
            config,
            fallback_interval: Duration::from_millis(32),
            scan_tags: 64,
            event_tx: tx,
            cancel: Arc::new(AtomicBool::new(false)),
        };

        (publisher, rx)
    }

    /// Spacing for tags without a usable timestamp
    pub fn fallback_interval(mut self, interval: Duration) -> Self {
        self.fallback_interval = interval;
        self
    }

    pub fn scan_tags(mut self, tags: usize) -> Self {
        self.scan_tags = tags;
        self
    }

    /// Setting the flag stops publishing after the current message
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Connect, publish every tag of `path`, then close the stream.
    ///
    /// The file is read with blocking I/O between sends; run this on a
    /// runtime dedicated to the publish, as [`publish_blocking`] does.
    ///
    /// [`publish_blocking`]: RtmpPublisher::publish_blocking
    pub async fn publish_file(&self, path: impl AsRef<Path>) -> Result<PublishStats> {
        let result = self.publish_inner(path.as_ref()).await;
        match &result {
            Ok(stats) => {
                tracing::info!(
                    url = %self.config.url,
                    messages = stats.messages(),
                    bytes = stats.payload_bytes,
                    last_timestamp = stats.last_timestamp,
                    "Publish finished"
                );
                self.emit(PublishEvent::Finished(stats.clone()));
            }
            Err(e) => {
                tracing::error!(url = %self.config.url, error = %e, "Publish failed");
                self.emit(PublishEvent::Error(e.to_string()));
            }
        }
        result
    }

    async fn publish_inner(&self, path: &Path) -> Result<PublishStats> {
        let mut demuxer = FlvFileDemuxer::open(path, self.scan_tags)?;

        let url = self.config.parse_url()?;
        let tcp = timeout(self.config.connect_timeout, TcpStream::connect(url.address()))
            .await
            .map_err(|_| ProtocolError::Timeout("TCP connect"))??;
        tcp.set_nodelay(self.config.tcp_nodelay)?;
        self.emit(PublishEvent::Connected);

        let mut session = RtmpSession::new(tcp, self.config.clone(), SessionRole::Publisher)?;
        self.publish_on(&mut session, &mut demuxer).await
    }

    /// Publish everything `demuxer` yields over an unopened session
    pub async fn publish_on<S>(&self, session: &mut RtmpSession<S>, demuxer: &mut dyn Demuxer) -> Result<PublishStats>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        session.open().await?;
        self.emit(PublishEvent::Publishing);

        let result = self.send_all(session, demuxer).await;
        if let Err(e) = session.close().await {
            tracing::debug!(error = %e, "Closing publish session failed");
        }
        result
    }

    async fn send_all<S>(&self, session: &mut RtmpSession<S>, demuxer: &mut dyn Demuxer) -> Result<PublishStats>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let started = Instant::now();
        let mut stats = PublishStats::default();
        let mut pacer = Pacer::new(self.fallback_interval);

        if let Some(metadata) = demuxer.info().metadata.clone() {
            session.send_metadata(metadata).await?;
            stats.data_messages += 1;
        }

        while let Some(packet) = demuxer.read_packet()? {
            if self.cancel.load(Ordering::Acquire) {
                tracing::info!(url = %self.config.url, "Publish cancelled");
                break;
            }
            let ts = (packet.dts_ms >= 0).then_some(packet.dts_ms);
            let (timestamp, due) = pacer.schedule(ts, std::time::Instant::now());
            tokio::time::sleep_until(Instant::from_std(due)).await;

            let len = packet.data.len() as u64;
            match packet.kind {
                MediaKind::Audio => {
                    session.send_audio(timestamp, packet.data).await?;
                    stats.audio_messages += 1;
                }
                MediaKind::Video => {
                    session.send_video(timestamp, packet.data).await?;
                    stats.video_messages += 1;
                }
            }
            tracing::trace!(timestamp, kind = ?packet.kind, len, "Sent media");
            stats.payload_bytes += len;
            stats.last_timestamp = timestamp;
        }

        if pacer.untimed() > 0 {
            tracing::debug!(untimed = pacer.untimed(), "Paced tags without timestamps");
        }
        stats.elapsed = started.elapsed();
        Ok(stats)
    }

    /// Run [`publish_file`](Self::publish_file) on its own thread with a
    /// current-thread runtime and wait for it
    pub fn publish_blocking(self, path: impl Into<PathBuf>) -> Result<PublishStats> {
        let path = path.into();
        let handle = thread::Builder::new().name("rtmp-publish".into()).spawn(move || -> Result<PublishStats> {
            let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
            runtime.block_on(self.publish_file(&path))
        })?;
        handle
            .join()
            .map_err(|_| Error::InvalidState("publish thread panicked".into()))?
    }

    fn emit(&self, event: PublishEvent) {
        // A full or dropped receiver only loses notifications
        if let Err(e) = self.event_tx.try_send(event) {
            tracing::debug!(error = %e, "Publish event not delivered");
        }
    }
}
