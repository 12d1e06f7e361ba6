//! RTMP client configuration

use std::time::Duration;

use url::Url;

use crate::error::{Error, Result};
use crate::protocol::constants::*;

/// Client configuration options
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// `rtmp://host[:port]/app[/...]/stream_key`
    pub url: String,

    /// TCP connect plus handshake must finish within this
    pub connect_timeout: Duration,

    /// Each command (`connect`, `createStream`, `publish`, `play`) must be
    /// answered within this
    pub command_timeout: Duration,

    /// Longest silence tolerated while playing
    pub read_timeout: Duration,

    /// How long a publisher waits for an acknowledgement once
    /// `send_windows` peer windows are unacknowledged
    pub ack_timeout: Duration,

    /// Peer windows that may be in flight before sending waits for an
    /// acknowledgement. The peer acks once per window, so at 1 a sender
    /// can stall right at the window edge; at least 1.
    pub send_windows: u32,

    /// Outbound chunk size announced after the handshake
    pub chunk_size: u32,

    /// Window acknowledgement size we announce
    pub window_ack_size: u32,

    /// `flashVer` sent in `connect`
    pub flash_ver: String,

    /// Buffer length requested from the server when playing
    pub buffer_length: Duration,

    /// Enable TCP_NODELAY
    pub tcp_nodelay: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            connect_timeout: Duration::from_secs(10),
            command_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(30),
            ack_timeout: Duration::from_secs(10),
            send_windows: 2,
            chunk_size: RECOMMENDED_CHUNK_SIZE,
            window_ack_size: DEFAULT_WINDOW_ACK_SIZE,
            flash_ver: "FMLE/3.0 (compatible; streamcast)".to_string(),
            buffer_length: Duration::from_millis(1000),
            tcp_nodelay: true,
        }
    }
}

impl ClientConfig {
    /// Config for `url` with default settings
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    pub fn send_windows(mut self, windows: u32) -> Self {
        self.send_windows = windows.max(1);
        self
    }

    pub fn chunk_size(mut self, size: u32) -> Self {
        self.chunk_size = size.clamp(1, MAX_CHUNK_SIZE);
        self
    }

    pub fn window_ack_size(mut self, size: u32) -> Self {
        self.window_ack_size = size;
        self
    }

    pub fn flash_ver(mut self, flash_ver: impl Into<String>) -> Self {
        self.flash_ver = flash_ver.into();
        self
    }

    pub fn buffer_length(mut self, length: Duration) -> Self {
        self.buffer_length = length;
        self
    }

    /// Parse the configured URL
    pub fn parse_url(&self) -> Result<RtmpUrl> {
        RtmpUrl::parse(&self.url)
    }
}

/// Components of an RTMP URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtmpUrl {
    pub host: String,
    pub port: u16,
    /// Application, possibly with instance (`live/room1`)
    pub app: String,
    /// Last path segment, with any query string kept (tokens live there)
    pub stream_key: String,
    /// `rtmp://host:port/app`, sent in `connect`
    pub tc_url: String,
}

impl RtmpUrl {
    pub fn parse(input: &str) -> Result<Self> {
        let url = Url::parse(input).map_err(|e| Error::InvalidUrl(format!("{}: {}", input, e)))?;
        if url.scheme() != "rtmp" {
            return Err(Error::InvalidUrl(format!(
                "unsupported scheme '{}' in {}",
                url.scheme(),
                input
            )));
        }

        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| Error::InvalidUrl(format!("missing host in {}", input)))?
            .to_string();
        let port = url.port().unwrap_or(DEFAULT_PORT);

        let segments: Vec<&str> = url
            .path_segments()
            .map(|s| s.filter(|seg| !seg.is_empty()).collect())
            .unwrap_or_default();
        if segments.len() < 2 {
            return Err(Error::InvalidUrl(format!(
                "expected /app/stream_key in {}",
                input
            )));
        }

        let (key, app) = segments.split_last().map(|(k, a)| (*k, a.join("/"))).ok_or_else(
            || Error::InvalidUrl(format!("expected /app/stream_key in {}", input)),
        )?;
        let stream_key = match url.query() {
            Some(q) => format!("{}?{}", key, q),
            None => key.to_string(),
        };
        let tc_url = format!("rtmp://{}:{}/{}", host, port, app);

        Ok(Self {
            host,
            port,
            app,
            stream_key,
            tc_url,
        })
    }

    /// `host:port` for the TCP connect
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
