//! RTMP client session
//!
//! One implementation of the client side of RTMP, parameterized by
//! [`SessionRole`]. Publishers and players share the handshake, chunking,
//! command exchange and protocol-control handling; they differ only in the
//! final stream command and in which direction media flows.
//!
//! ```text
//! TCP connect ─> handshake ─> WindowAckSize + SetChunkSize
//!   ─> connect(app, tcUrl) ─> _result
//!   ─> [releaseStream, FCPublish] ─> createStream ─> _result(stream id)
//!   ─> publish(key, "live") | play(key) ─> onStatus(...Start)
//! ```
//!
//! Reads never perform writes: acknowledgements and ping responses that a
//! read makes due are sent by the caller-facing operation afterwards, so a
//! read can be abandoned at a timeout without leaving a half-written
//! message on the socket.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{timeout, Instant};

use crate::amf::AmfValue;
use crate::client::config::{ClientConfig, RtmpUrl};
use crate::error::{Error, HandshakeError, ProtocolError, Result};
use crate::protocol::chunk::{ChunkDecoder, ChunkEncoder, RawMessage};
use crate::protocol::constants::*;
use crate::protocol::handshake::{Handshake, HandshakeRole};
use crate::protocol::message::{Command, ConnectParams, RtmpMessage, UserControlEvent};
use crate::session::state::{SessionPhase, SessionState};
use crate::session::stream::StreamState;
use crate::stats::ConnectionStats;

/// Interval at which blocking waits re-check their cancel flag
const POLL_SLICE: Duration = Duration::from_millis(50);

/// Which way media flows on the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRole {
    /// Sends media (`publish`)
    Publisher,
    /// Receives media (`play`)
    Player,
}

/// What a read produced once protocol control was handled
enum Inbound {
    Handled,
    Command(Command),
    Media(RtmpMessage),
    EndOfStream,
}

/// RTMP client session over any byte stream
pub struct RtmpSession<S = TcpStream> {
    io: S,
    role: SessionRole,
    config: ClientConfig,
    url: RtmpUrl,
    state: SessionState,
    stream: Option<StreamState>,
    encoder: ChunkEncoder,
    decoder: ChunkDecoder,
    read_buf: BytesMut,
    write_buf: BytesMut,
    next_transaction: f64,
    /// Media or data that arrived while waiting for a command reply
    pending: VecDeque<RtmpMessage>,
    /// Control replies made due by reads, sent before the next operation
    outbox: Vec<RtmpMessage>,
    end_of_stream: bool,
    stats: ConnectionStats,
}

impl RtmpSession<TcpStream> {
    /// Connect over TCP and run the session up to `Streaming`
    pub async fn connect(config: ClientConfig, role: SessionRole) -> Result<Self> {
        let url = config.parse_url()?;
        let addr = url.address();
        tracing::info!(addr = %addr, role = ?role, "Connecting to RTMP server");

        let tcp = timeout(config.connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| ProtocolError::Timeout("TCP connect"))??;
        tcp.set_nodelay(config.tcp_nodelay)?;

        let mut session = Self::new(tcp, config, role)?;
        session.open().await?;
        Ok(session)
    }
}

impl<S> RtmpSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap an already connected transport. Nothing is sent until [`open`].
    ///
    /// [`open`]: RtmpSession::open
    pub fn new(io: S, config: ClientConfig, role: SessionRole) -> Result<Self> {
        let url = config.parse_url()?;
        let mut state = SessionState::new();
        state.window_ack_size = config.window_ack_size;

        Ok(Self {
            io,
            role,
            config,
            url,
            state,
            stream: None,
            encoder: ChunkEncoder::new(),
            decoder: ChunkDecoder::new(),
            read_buf: BytesMut::with_capacity(64 * 1024),
            write_buf: BytesMut::with_capacity(64 * 1024),
            next_transaction: 1.0,
            pending: VecDeque::new(),
            outbox: Vec::new(),
            end_of_stream: false,
            stats: ConnectionStats::default(),
        })
    }

    pub fn role(&self) -> SessionRole {
        self.role
    }

    pub fn phase(&self) -> SessionPhase {
        self.state.phase
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn stream(&self) -> Option<&StreamState> {
        self.stream.as_ref()
    }

    pub fn url(&self) -> &RtmpUrl {
        &self.url
    }

    pub fn stats(&self) -> ConnectionStats {
        let mut stats = self.stats.clone();
        stats.bytes_sent = self.state.bytes_sent;
        stats.bytes_received = self.state.bytes_received;
        stats.duration = self.state.created_at.elapsed();
        stats
    }

    /// Handshake, connect, create the stream and start publishing or playing.
    ///
    /// Any failure leaves the session in `Failed`.
    pub async fn open(&mut self) -> Result<()> {
        let result = self.open_inner().await;
        self.record(result)
    }

    async fn open_inner(&mut self) -> Result<()> {
        self.handshake().await?;
        self.connect_app().await?;
        let stream_id = self.create_stream().await?;
        self.start_stream(stream_id).await?;
        tracing::info!(
            url = %self.config.url,
            stream_id,
            role = ?self.role,
            "RTMP session streaming"
        );
        Ok(())
    }

    async fn handshake(&mut self) -> Result<()> {
        self.state.start_handshake();
        let deadline = self.config.connect_timeout;

        let exchange = async {
            let mut handshake = Handshake::new(HandshakeRole::Client);
            if let Some(c0c1) = handshake.start() {
                self.write_raw(&c0c1).await?;
            }
            while !handshake.is_done() {
                let n = self.io.read_buf(&mut self.read_buf).await?;
                if n == 0 {
                    return Err(HandshakeError::Aborted.into());
                }
                self.state.add_bytes_received(n as u64);
                if let Some(reply) = handshake.feed(&mut self.read_buf)? {
                    self.write_raw(&reply).await?;
                }
            }
            Ok::<_, Error>(())
        };

        match timeout(deadline, exchange).await {
            Ok(Ok(())) => {}
            Ok(Err(Error::Io(e))) if is_disconnect(&e) => return Err(HandshakeError::Aborted.into()),
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(HandshakeError::Timeout.into()),
        }
        self.state.complete_handshake();
        tracing::debug!("RTMP handshake complete");

        let chunk_size = self.config.chunk_size;
        self.send(&RtmpMessage::WindowAckSize(self.config.window_ack_size))
            .await?;
        self.send(&RtmpMessage::SetChunkSize(chunk_size)).await?;
        self.encoder.set_chunk_size(chunk_size);
        self.state.out_chunk_size = chunk_size;
        Ok(())
    }

    async fn connect_app(&mut self) -> Result<()> {
        let params = ConnectParams {
            app: self.url.app.clone(),
            tc_url: self.url.tc_url.clone(),
            flash_ver: self.config.flash_ver.clone(),
            audio_codecs: (self.role == SessionRole::Player).then_some(3575.0),
            video_codecs: (self.role == SessionRole::Player).then_some(252.0),
        };
        let txn = self.transaction();
        self.send(&RtmpMessage::Command(Command::connect(txn, &params)))
            .await?;

        let reply = self.await_reply(CMD_CONNECT, txn).await?;
        tracing::debug!(code = ?reply.status_code(), app = %params.app, "connect accepted");
        self.state.on_connected(params);
        Ok(())
    }

    async fn create_stream(&mut self) -> Result<u32> {
        if self.role == SessionRole::Publisher {
            let key = self.url.stream_key.clone();
            let txn = self.transaction();
            self.send(&RtmpMessage::Command(Command::release_stream(txn, &key)))
                .await?;
            let txn = self.transaction();
            self.send(&RtmpMessage::Command(Command::fc_publish(txn, &key)))
                .await?;
        }

        let txn = self.transaction();
        self.send(&RtmpMessage::Command(Command::create_stream(txn)))
            .await?;
        let reply = self.await_reply(CMD_CREATE_STREAM, txn).await?;
        let stream_id = reply
            .arguments
            .first()
            .and_then(AmfValue::as_number)
            .ok_or_else(|| {
                ProtocolError::UnexpectedMessage("createStream result without stream id".into())
            })? as u32;

        self.stream = Some(StreamState::new(stream_id, self.url.stream_key.clone()));
        self.state.on_stream_open();
        Ok(stream_id)
    }

    async fn start_stream(&mut self, stream_id: u32) -> Result<()> {
        let key = self.url.stream_key.clone();
        let (command, name, expected) = match self.role {
            SessionRole::Publisher => (
                Command::publish(stream_id, &key, "live"),
                CMD_PUBLISH,
                NS_PUBLISH_START,
            ),
            SessionRole::Player => {
                let buffer_ms = self.config.buffer_length.as_millis() as u32;
                self.send(&RtmpMessage::UserControl(UserControlEvent::SetBufferLength {
                    stream_id,
                    buffer_ms,
                }))
                .await?;
                (Command::play(stream_id, &key), CMD_PLAY, NS_PLAY_START)
            }
        };
        self.send(&RtmpMessage::Command(command)).await?;
        self.await_status(name, expected).await?;

        if let Some(stream) = self.stream.as_mut() {
            match self.role {
                SessionRole::Publisher => stream.start_publish(),
                SessionRole::Player => stream.start_play(),
            }
        }
        self.state.on_streaming();
        Ok(())
    }

    /// Wait for `_result`/`_error` carrying `txn`
    async fn await_reply(&mut self, command: &'static str, txn: f64) -> Result<Command> {
        let deadline = Instant::now() + self.config.command_timeout;
        loop {
            let cmd = self.next_command(deadline, command).await?;
            if cmd.transaction_id != txn || (cmd.name != CMD_RESULT && cmd.name != CMD_ERROR) {
                tracing::debug!(name = %cmd.name, txn = cmd.transaction_id, "Ignoring command");
                continue;
            }
            if cmd.is_failure() {
                return Err(ProtocolError::CommandRejected {
                    command: command.to_string(),
                    description: cmd.description(),
                }
                .into());
            }
            return Ok(cmd);
        }
    }

    /// Wait for `onStatus` with `code`; an error-level status fails
    async fn await_status(&mut self, command: &'static str, code: &str) -> Result<()> {
        let deadline = Instant::now() + self.config.command_timeout;
        loop {
            let cmd = self.next_command(deadline, command).await?;
            if cmd.name != CMD_ON_STATUS && cmd.name != CMD_ERROR {
                continue;
            }
            if cmd.is_failure() {
                return Err(ProtocolError::CommandRejected {
                    command: command.to_string(),
                    description: cmd.description(),
                }
                .into());
            }
            if cmd.status_code() == Some(code) {
                return Ok(());
            }
            tracing::debug!(code = ?cmd.status_code(), "onStatus while waiting for {}", code);
        }
    }

    async fn next_command(&mut self, deadline: Instant, waiting_for: &'static str) -> Result<Command> {
        loop {
            self.flush_outbox().await?;
            let remaining = deadline.saturating_duration_since(Instant::now());
            let raw = timeout(remaining, self.read_message())
                .await
                .map_err(|_| ProtocolError::Timeout(timeout_label(waiting_for)))??;
            match self.dispatch(raw)? {
                Inbound::Command(cmd) => return Ok(cmd),
                Inbound::Media(msg) => self.pending.push_back(msg),
                Inbound::EndOfStream => self.end_of_stream = true,
                Inbound::Handled => {}
            }
        }
    }

    /// Send an audio, video or data message on the open stream.
    ///
    /// Blocks while the peer's acknowledgement window is exhausted and fails
    /// with `WindowStalled` if no acknowledgement frees it in time.
    pub async fn send_media(&mut self, msg: RtmpMessage) -> Result<()> {
        let result = self.send_media_inner(msg).await;
        self.record(result)
    }

    async fn send_media_inner(&mut self, msg: RtmpMessage) -> Result<()> {
        if self.state.phase != SessionPhase::Streaming || self.role != SessionRole::Publisher {
            return Err(Error::InvalidState(format!(
                "cannot send media in phase {:?} as {:?}",
                self.state.phase, self.role
            )));
        }

        self.poll_control().await?;
        self.await_window().await?;

        if let Some(stream) = self.stream.as_mut() {
            match &msg {
                RtmpMessage::Audio { timestamp, data } => stream.on_audio(*timestamp, data.len()),
                RtmpMessage::Video { timestamp, data } => {
                    let keyframe = data.first().map(|b| b >> 4 == 1).unwrap_or(false);
                    stream.on_video(*timestamp, keyframe, data.len())
                }
                RtmpMessage::Data { .. } => stream.on_metadata(),
                _ => {}
            }
        }
        self.send(&msg).await
    }

    /// `@setDataFrame("onMetaData", metadata)`
    pub async fn send_metadata(&mut self, metadata: AmfValue) -> Result<()> {
        self.send_media(RtmpMessage::set_data_frame(metadata)).await
    }

    pub async fn send_audio(&mut self, timestamp: u32, data: Bytes) -> Result<()> {
        self.send_media(RtmpMessage::Audio { timestamp, data }).await
    }

    pub async fn send_video(&mut self, timestamp: u32, data: Bytes) -> Result<()> {
        self.send_media(RtmpMessage::Video { timestamp, data }).await
    }

    /// Process whatever control traffic is already buffered, without waiting
    pub async fn poll_control(&mut self) -> Result<()> {
        loop {
            while let Some(raw) = self.decoder.decode(&mut self.read_buf)? {
                self.stats.messages_received += 1;
                match self.dispatch(raw)? {
                    Inbound::Media(msg) => self.pending.push_back(msg),
                    Inbound::EndOfStream => self.end_of_stream = true,
                    Inbound::Command(cmd) => {
                        tracing::debug!(name = %cmd.name, code = ?cmd.status_code(), "Command while streaming");
                        // Late `_error` replies to releaseStream/FCPublish are harmless
                        if cmd.name == CMD_ON_STATUS && cmd.is_failure() {
                            return Err(ProtocolError::CommandRejected {
                                command: cmd.name.clone(),
                                description: cmd.description(),
                            }
                            .into());
                        }
                    }
                    Inbound::Handled => {}
                }
            }
            // Zero-duration timeout polls the read exactly once
            match timeout(Duration::ZERO, self.io.read_buf(&mut self.read_buf)).await {
                Ok(Ok(0)) => return Err(ProtocolError::ConnectionClosed.into()),
                Ok(Ok(n)) => self.on_bytes_received(n),
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => break,
            }
        }
        self.flush_outbox().await
    }

    /// Block until the unacknowledged byte count is back within the peer's
    /// window, or fail with `WindowStalled` after `ack_timeout`
    async fn await_window(&mut self) -> Result<()> {
        let limit = self.send_window_limit();
        if limit == 0 || self.state.unacked() < limit {
            return Ok(());
        }

        tracing::debug!(
            unacked = self.state.unacked(),
            limit,
            "Send window exhausted, waiting for acknowledgement"
        );
        let deadline = Instant::now() + self.config.ack_timeout;
        while self.state.unacked() >= limit {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Error::WindowStalled {
                    unacked: self.state.unacked(),
                });
            }
            let raw = match timeout(remaining, self.read_message()).await {
                Ok(raw) => raw?,
                Err(_) => {
                    return Err(Error::WindowStalled {
                        unacked: self.state.unacked(),
                    })
                }
            };
            match self.dispatch(raw)? {
                Inbound::Media(msg) => self.pending.push_back(msg),
                Inbound::EndOfStream => self.end_of_stream = true,
                _ => {}
            }
            self.flush_outbox().await?;
        }
        Ok(())
    }

    /// Bytes that may be in flight before we wait for the peer
    fn send_window_limit(&self) -> u64 {
        self.state.peer_window_ack_size as u64 * self.config.send_windows.max(1) as u64
    }

    /// Next audio, video or data message while playing.
    ///
    /// Returns `Ok(None)` at end of stream or once `cancel` is set; the flag
    /// is checked at least every 50 ms.
    pub async fn next_media(&mut self, cancel: &AtomicBool) -> Result<Option<RtmpMessage>> {
        let result = self.next_media_inner(cancel).await;
        self.record(result)
    }

    async fn next_media_inner(&mut self, cancel: &AtomicBool) -> Result<Option<RtmpMessage>> {
        if self.role != SessionRole::Player {
            return Err(Error::InvalidState("next_media on a publishing session".into()));
        }
        let mut last_data = Instant::now();
        loop {
            if let Some(msg) = self.pending.pop_front() {
                self.on_inbound_media(&msg);
                return Ok(Some(msg));
            }
            if self.end_of_stream || cancel.load(Ordering::Acquire) {
                return Ok(None);
            }
            self.flush_outbox().await?;

            match timeout(POLL_SLICE, self.read_message()).await {
                Ok(raw) => {
                    last_data = Instant::now();
                    match self.dispatch(raw?)? {
                        Inbound::Media(msg) => self.pending.push_back(msg),
                        Inbound::EndOfStream => self.end_of_stream = true,
                        Inbound::Command(cmd) if cmd.is_failure() => {
                            return Err(ProtocolError::CommandRejected {
                                command: CMD_PLAY.to_string(),
                                description: cmd.description(),
                            }
                            .into())
                        }
                        Inbound::Command(cmd) => {
                            tracing::debug!(name = %cmd.name, code = ?cmd.status_code(), "Command while playing")
                        }
                        Inbound::Handled => {}
                    }
                }
                Err(_) if last_data.elapsed() >= self.config.read_timeout => {
                    return Err(ProtocolError::Timeout("media").into());
                }
                Err(_) => {}
            }
        }
    }

    fn on_inbound_media(&mut self, msg: &RtmpMessage) {
        if let Some(stream) = self.stream.as_mut() {
            match msg {
                RtmpMessage::Audio { timestamp, data } => stream.on_audio(*timestamp, data.len()),
                RtmpMessage::Video { timestamp, data } => {
                    let keyframe = data.first().map(|b| b >> 4 == 1).unwrap_or(false);
                    stream.on_video(*timestamp, keyframe, data.len())
                }
                RtmpMessage::Data { .. } => stream.on_metadata(),
                _ => {}
            }
        }
    }

    /// Tear the stream down and close the transport. Idempotent.
    pub async fn close(&mut self) -> Result<()> {
        if self.state.phase.is_terminal() {
            return Ok(());
        }
        if self.state.phase == SessionPhase::Streaming {
            if let Some(stream_id) = self.stream.as_ref().map(|s| s.id) {
                let key = self.url.stream_key.clone();
                let limit = self.config.command_timeout;
                let goodbye = async {
                    if self.role == SessionRole::Publisher {
                        let txn = self.transaction();
                        self.send(&RtmpMessage::Command(Command::fc_unpublish(txn, &key)))
                            .await?;
                    }
                    let txn = self.transaction();
                    self.send(&RtmpMessage::Command(Command::delete_stream(txn, stream_id)))
                        .await
                };
                // Best effort: the peer may already be gone
                if let Err(e) = timeout(limit, goodbye)
                    .await
                    .unwrap_or_else(|_| Err(ProtocolError::Timeout("close").into()))
                {
                    tracing::debug!(error = %e, "Stream teardown failed");
                }
            }
        }
        if let Some(stream) = self.stream.as_mut() {
            stream.stop();
        }
        let _ = timeout(self.config.command_timeout, self.io.shutdown()).await;
        self.state.close();
        tracing::info!(
            bytes_sent = self.state.bytes_sent,
            bytes_received = self.state.bytes_received,
            "RTMP session closed"
        );
        Ok(())
    }

    /// Read until one complete message is reassembled. Never writes.
    async fn read_message(&mut self) -> Result<RawMessage> {
        loop {
            if let Some(raw) = self.decoder.decode(&mut self.read_buf)? {
                self.stats.messages_received += 1;
                return Ok(raw);
            }
            let n = self.io.read_buf(&mut self.read_buf).await?;
            if n == 0 {
                return Err(ProtocolError::ConnectionClosed.into());
            }
            self.on_bytes_received(n);
        }
    }

    fn on_bytes_received(&mut self, n: usize) {
        if self.state.add_bytes_received(n as u64) {
            let sequence = self.state.mark_ack_sent();
            self.outbox
                .push(RtmpMessage::Acknowledgement { sequence });
            self.stats.acks_sent += 1;
        }
    }

    /// Apply protocol control; hand everything else back
    fn dispatch(&mut self, raw: RawMessage) -> Result<Inbound> {
        let msg = RtmpMessage::decode(raw)?;
        match msg {
            RtmpMessage::SetChunkSize(size) => {
                tracing::debug!(size, "Peer chunk size");
                self.decoder.set_chunk_size(size);
                self.state.in_chunk_size = size;
            }
            RtmpMessage::Abort { csid } => self.decoder.abort(csid),
            RtmpMessage::Acknowledgement { sequence } => {
                self.state.on_ack(sequence);
                self.stats.acks_received += 1;
            }
            RtmpMessage::WindowAckSize(size) => {
                tracing::debug!(size, "Peer window acknowledgement size");
                self.state.peer_window_ack_size = size;
            }
            RtmpMessage::SetPeerBandwidth { size, limit_type } => {
                tracing::debug!(size, limit_type, "Peer bandwidth");
                if self.state.peer_window_ack_size == 0 {
                    self.state.peer_window_ack_size = size;
                }
            }
            RtmpMessage::UserControl(UserControlEvent::PingRequest(ts)) => {
                self.outbox
                    .push(RtmpMessage::UserControl(UserControlEvent::PingResponse(ts)));
            }
            RtmpMessage::UserControl(UserControlEvent::StreamEof(id))
                if self.role == SessionRole::Player
                    && self.state.phase == SessionPhase::Streaming =>
            {
                tracing::debug!(stream_id = id, "Stream EOF");
                return Ok(Inbound::EndOfStream);
            }
            RtmpMessage::UserControl(event) => {
                tracing::trace!(event = ?event, "User control event");
            }
            RtmpMessage::Command(cmd) => {
                if self.role == SessionRole::Player
                    && cmd.name == CMD_ON_STATUS
                    && matches!(cmd.status_code(), Some(NS_PLAY_STOP) | Some(NS_PLAY_UNPUBLISH))
                {
                    tracing::debug!(code = ?cmd.status_code(), "Remote stream ended");
                    return Ok(Inbound::EndOfStream);
                }
                return Ok(Inbound::Command(cmd));
            }
            msg @ (RtmpMessage::Audio { .. } | RtmpMessage::Video { .. } | RtmpMessage::Data { .. }) => {
                return Ok(Inbound::Media(msg));
            }
            RtmpMessage::Other { type_id, payload } => {
                tracing::trace!(type_id, len = payload.len(), "Ignoring message");
            }
        }
        Ok(Inbound::Handled)
    }

    async fn flush_outbox(&mut self) -> Result<()> {
        if self.outbox.is_empty() {
            return Ok(());
        }
        let outbox = std::mem::take(&mut self.outbox);
        for msg in &outbox {
            self.send(msg).await?;
        }
        Ok(())
    }

    async fn send(&mut self, msg: &RtmpMessage) -> Result<()> {
        let stream_id = self.stream.as_ref().map(|s| s.id).unwrap_or(0);
        let raw = msg.encode(stream_id);
        self.encoder.encode(&raw, &mut self.write_buf);
        let bytes = self.write_buf.split().freeze();
        self.write_raw(&bytes).await?;
        self.stats.messages_sent += 1;
        Ok(())
    }

    async fn write_raw(&mut self, bytes: &[u8]) -> Result<()> {
        timeout(self.config.command_timeout, async {
            self.io.write_all(bytes).await?;
            self.io.flush().await
        })
        .await
        .map_err(|_| ProtocolError::Timeout("socket write"))??;
        self.state.add_bytes_sent(bytes.len() as u64);
        Ok(())
    }

    fn transaction(&mut self) -> f64 {
        let txn = self.next_transaction;
        self.next_transaction += 1.0;
        txn
    }

    fn record<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            tracing::debug!(error = %e, phase = ?self.state.phase, "RTMP session failed");
            self.state.fail();
        }
        result
    }
}

fn is_disconnect(e: &std::io::Error) -> bool {
    use std::io::ErrorKind::*;
    matches!(
        e.kind(),
        UnexpectedEof | ConnectionReset | ConnectionAborted | BrokenPipe
    )
}

fn timeout_label(command: &'static str) -> &'static str {
    match command {
        CMD_CONNECT => "connect reply",
        CMD_CREATE_STREAM => "createStream reply",
        CMD_PUBLISH => "publish status",
        CMD_PLAY => "play status",
        _ => "command reply",
    }
}
