//! Shared fixtures: FLV files and an in-process RTMP peer

#![allow(dead_code)]

use std::fs::File;
use std::io::BufWriter;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use streamcast::codec::screen;
use streamcast::media::{FlvTag, FlvWriter};
use streamcast::protocol::constants::*;
use streamcast::protocol::{ChunkDecoder, ChunkEncoder, Command, Handshake, HandshakeRole, RtmpMessage};
use streamcast::protocol::message::UserControlEvent;
use streamcast::AmfValue;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// LE PCM, 22 kHz, 16-bit, mono
pub const PCM_22K_MONO: u8 = 0x3A;
pub const PCM_RATE: u32 = 22050;

pub const VIDEO_WIDTH: u32 = 32;
pub const VIDEO_HEIGHT: u32 = 32;

/// What goes into a generated FLV file
#[derive(Debug, Clone)]
pub struct Fixture {
    pub video_frames: u32,
    pub frame_interval_ms: u32,
    /// Audio tags, one every `frame_interval_ms`
    pub audio_tags: u32,
    pub with_metadata: bool,
}

impl Default for Fixture {
    fn default() -> Self {
        Self {
            video_frames: 10,
            frame_interval_ms: 40,
            audio_tags: 10,
            with_metadata: true,
        }
    }
}

impl Fixture {
    pub fn video_only(frames: u32) -> Self {
        Self {
            video_frames: frames,
            audio_tags: 0,
            ..Self::default()
        }
    }

    pub fn audio_only(tags: u32) -> Self {
        Self {
            video_frames: 0,
            audio_tags: tags,
            ..Self::default()
        }
    }

    pub fn duration_ms(&self) -> u32 {
        self.video_frames.max(self.audio_tags) * self.frame_interval_ms
    }

    pub fn metadata(&self) -> AmfValue {
        let mut props = vec![("duration", AmfValue::Number(self.duration_ms() as f64 / 1000.0))];
        if self.video_frames > 0 {
            props.push(("width", AmfValue::Number(VIDEO_WIDTH as f64)));
            props.push(("height", AmfValue::Number(VIDEO_HEIGHT as f64)));
            props.push(("framerate", AmfValue::Number(1000.0 / self.frame_interval_ms as f64)));
            props.push(("videocodecid", AmfValue::Number(3.0)));
        }
        if self.audio_tags > 0 {
            props.push(("audiosamplerate", AmfValue::Number(PCM_RATE as f64)));
            props.push(("audiocodecid", AmfValue::Number(3.0)));
        }
        AmfValue::ecma_array(props)
    }

    /// Media tags in file order
    pub fn tags(&self) -> Vec<FlvTag> {
        let mut tags = Vec::new();
        let count = self.video_frames.max(self.audio_tags);
        for i in 0..count {
            let ts = i * self.frame_interval_ms;
            if i < self.video_frames {
                tags.push(FlvTag::video(ts, video_frame(i)));
            }
            if i < self.audio_tags {
                tags.push(FlvTag::audio(ts, audio_chunk(self.frame_interval_ms, i)));
            }
        }
        tags
    }

    pub fn write(&self, path: &Path) -> PathBuf {
        let file = BufWriter::new(File::create(path).unwrap());
        let mut writer = FlvWriter::new(file, self.audio_tags > 0, self.video_frames > 0).unwrap();
        if self.with_metadata {
            writer.write_metadata(&self.metadata()).unwrap();
        }
        for tag in self.tags() {
            writer.write_tag(&tag).unwrap();
        }
        writer.finish().unwrap();
        path.to_path_buf()
    }
}

/// Screen Video key frame filled with a shade that changes per frame
pub fn video_frame(index: u32) -> Bytes {
    let shade = (index * 20 % 256) as u8;
    let bgr = vec![shade; (VIDEO_WIDTH * VIDEO_HEIGHT * 3) as usize];
    screen::encode_frame(VIDEO_WIDTH, VIDEO_HEIGHT, 16, &bgr, None).unwrap()
}

/// `duration_ms` of a quiet square wave
pub fn audio_chunk(duration_ms: u32, index: u32) -> Bytes {
    let samples = (PCM_RATE * duration_ms / 1000) as usize;
    let mut data = Vec::with_capacity(1 + samples * 2);
    data.push(PCM_22K_MONO);
    for s in 0..samples {
        let value: i16 = if (s / 50 + index as usize) % 2 == 0 { 1000 } else { -1000 };
        data.extend_from_slice(&value.to_le_bytes());
    }
    Bytes::from(data)
}

/// How the fake server behaves after accepting a connection
#[derive(Debug, Clone)]
pub enum PeerMode {
    /// Accept `publish` and record what arrives
    AcceptPublish,
    /// Accept `publish`, announce a tiny window and never acknowledge
    WithholdAcks { window: u32 },
    /// Answer `publish` with an error status
    RejectPublish,
    /// Close the socket after reading part of C0+C1
    AbortHandshake,
    /// Accept `play`, send `metadata` and `tags`, then Stream EOF
    Serve { metadata: Option<AmfValue>, tags: Vec<FlvTag> },
}

/// What the peer saw
#[derive(Debug, Default, Clone)]
pub struct PeerLog {
    pub handshake_done: bool,
    pub commands: Vec<String>,
    /// (type id, timestamp, payload length)
    pub media: Vec<(u8, u32, usize)>,
    pub metadata: Option<AmfValue>,
}

impl PeerLog {
    pub fn media_timestamps(&self) -> Vec<u32> {
        self.media.iter().map(|(_, ts, _)| *ts).collect()
    }
}

/// Fake RTMP server built from the crate's own handshake and chunk layers
pub struct FakePeer {
    io: TcpStream,
    buf: BytesMut,
    decoder: ChunkDecoder,
    encoder: ChunkEncoder,
    out: BytesMut,
}

impl FakePeer {
    pub async fn bind() -> (TcpListener, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        (listener, addr)
    }

    /// Accept one connection and run `mode` to completion
    pub async fn serve(listener: TcpListener, mode: PeerMode) -> PeerLog {
        let (io, _) = listener.accept().await.unwrap();
        let mut peer = FakePeer {
            io,
            buf: BytesMut::with_capacity(16 * 1024),
            decoder: ChunkDecoder::new(),
            encoder: ChunkEncoder::new(),
            out: BytesMut::new(),
        };
        let mut log = PeerLog::default();

        if let PeerMode::AbortHandshake = mode {
            let mut partial = [0u8; 100];
            let _ = peer.io.read_exact(&mut partial).await;
            return log;
        }
        if !peer.handshake().await {
            return log;
        }
        log.handshake_done = true;
        peer.session(mode, &mut log).await;
        log
    }

    /// Run a peer on its own thread, for blocking callers
    pub fn spawn(mode: PeerMode) -> (SocketAddr, std::thread::JoinHandle<PeerLog>) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let (listener, addr) = runtime.block_on(Self::bind());
        let handle = std::thread::spawn(move || runtime.block_on(Self::serve(listener, mode)));
        (addr, handle)
    }

    async fn handshake(&mut self) -> bool {
        let mut handshake = Handshake::new(HandshakeRole::Server);
        handshake.start();
        while !handshake.is_done() {
            match self.io.read_buf(&mut self.buf).await {
                Ok(0) | Err(_) => return false,
                Ok(_) => {}
            }
            match handshake.feed(&mut self.buf) {
                Ok(Some(reply)) => {
                    if self.io.write_all(&reply).await.is_err() {
                        return false;
                    }
                }
                Ok(None) => {}
                Err(_) => return false,
            }
        }
        true
    }

    async fn session(&mut self, mode: PeerMode, log: &mut PeerLog) {
        while let Some(msg) = self.read().await {
            match msg {
                RtmpMessage::SetChunkSize(size) => self.decoder.set_chunk_size(size),
                RtmpMessage::Command(cmd) => {
                    log.commands.push(cmd.name.clone());
                    if !self.on_command(&mode, cmd).await {
                        return;
                    }
                }
                RtmpMessage::Audio { timestamp, data } => log.media.push((MSG_AUDIO, timestamp, data.len())),
                RtmpMessage::Video { timestamp, data } => log.media.push((MSG_VIDEO, timestamp, data.len())),
                ref data @ RtmpMessage::Data { .. } => {
                    if let Some(meta) = data.metadata() {
                        log.metadata = Some(meta.clone());
                    }
                }
                _ => {}
            }
        }
    }

    /// `false` ends the session
    async fn on_command(&mut self, mode: &PeerMode, cmd: Command) -> bool {
        let txn = cmd.transaction_id;
        match cmd.name.as_str() {
            CMD_CONNECT => {
                let window = match mode {
                    PeerMode::WithholdAcks { window } => *window,
                    _ => DEFAULT_WINDOW_ACK_SIZE,
                };
                self.send(&RtmpMessage::WindowAckSize(window)).await;
                self.send(&RtmpMessage::SetPeerBandwidth {
                    size: window,
                    limit_type: 2,
                })
                .await;
                self.send(&RtmpMessage::SetChunkSize(4096)).await;
                self.encoder.set_chunk_size(4096);
                let info = AmfValue::object([
                    ("level", AmfValue::from("status")),
                    ("code", AmfValue::from(NC_CONNECT_SUCCESS)),
                    ("description", AmfValue::from("Connection succeeded.")),
                ]);
                let props = AmfValue::object([("fmsVer", AmfValue::from("FMS/3,0,1,123"))]);
                self.send(&RtmpMessage::Command(Command::result(txn, props, info))).await;
            }
            CMD_CREATE_STREAM => {
                self.send(&RtmpMessage::Command(Command::result(txn, AmfValue::Null, AmfValue::Number(1.0))))
                    .await;
            }
            CMD_PUBLISH => {
                if let PeerMode::RejectPublish = mode {
                    let status = Command::on_status(1, "error", "NetStream.Publish.BadName", "Stream already publishing");
                    self.send(&RtmpMessage::Command(status)).await;
                } else {
                    let status = Command::on_status(1, "status", NS_PUBLISH_START, "Publishing");
                    self.send(&RtmpMessage::Command(status)).await;
                }
            }
            CMD_PLAY => {
                self.send(&RtmpMessage::UserControl(UserControlEvent::StreamBegin(1))).await;
                let status = Command::on_status(1, "status", NS_PLAY_START, "Started playing");
                self.send(&RtmpMessage::Command(status)).await;
                if let PeerMode::Serve { metadata, tags } = mode {
                    if let Some(meta) = metadata {
                        let data = RtmpMessage::Data {
                            stream_id: 1,
                            values: vec![AmfValue::from(CMD_ON_METADATA), meta.clone()],
                        };
                        self.send_on(&data, 1).await;
                    }
                    for tag in tags {
                        let msg = if tag.is_audio() {
                            RtmpMessage::Audio {
                                timestamp: tag.timestamp,
                                data: tag.data.clone(),
                            }
                        } else {
                            RtmpMessage::Video {
                                timestamp: tag.timestamp,
                                data: tag.data.clone(),
                            }
                        };
                        self.send_on(&msg, 1).await;
                    }
                    self.send(&RtmpMessage::UserControl(UserControlEvent::StreamEof(1))).await;
                }
            }
            CMD_DELETE_STREAM => return false,
            _ => {}
        }
        true
    }

    async fn read(&mut self) -> Option<RtmpMessage> {
        loop {
            match self.decoder.decode(&mut self.buf) {
                Ok(Some(raw)) => return RtmpMessage::decode(raw).ok(),
                Ok(None) => {}
                Err(_) => return None,
            }
            match self.io.read_buf(&mut self.buf).await {
                Ok(0) | Err(_) => return None,
                Ok(_) => {}
            }
        }
    }

    async fn send(&mut self, msg: &RtmpMessage) {
        self.send_on(msg, 0).await
    }

    async fn send_on(&mut self, msg: &RtmpMessage, stream_id: u32) {
        let raw = msg.encode(stream_id);
        self.encoder.encode(&raw, &mut self.out);
        let bytes = self.out.split().freeze();
        let _ = self.io.write_all(&bytes).await;
    }
}

/// Wait until `cond` holds or `limit` passes
pub fn eventually(limit: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = std::time::Instant::now() + limit;
    while std::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    cond()
}
