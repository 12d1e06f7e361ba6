//! Error types for the engine
//!
//! One crate-wide [`Error`] with nested enums for the protocol layers.
//! Stage-local failures (a single stream's decoder, the video surface) are
//! carried in the same type; the session decides whether they are fatal.

use std::io;

use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type
#[derive(Debug, Error)]
pub enum Error {
    /// Filesystem or socket I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Container or codec not recognized
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Irrecoverable bitstream corruption on one stream
    #[error("decode error on stream {stream}: {reason}")]
    Decode { stream: usize, reason: String },

    /// RTMP command or transport failure
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// RTMP handshake failure
    #[error("handshake error: {0}")]
    Handshake(#[from] HandshakeError),

    /// Peer stopped acknowledging our data
    #[error("send window stalled: {unacked} bytes unacknowledged")]
    WindowStalled { unacked: u64 },

    /// Render target was invalidated
    #[error("video surface lost")]
    SurfaceLost,

    /// Queue full in non-blocking mode
    #[error("queue full")]
    Backpressure,

    /// Seek on a live or network source
    #[error("seek not supported on this source")]
    SeekUnsupported,

    /// AMF decoding failure
    #[error("AMF error: {0}")]
    Amf(#[from] AmfError),

    /// Media payload parsing failure
    #[error("media error: {0}")]
    Media(#[from] MediaError),

    /// Malformed RTMP URL
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// Operation not valid in the current session state
    #[error("invalid state: {0}")]
    InvalidState(String),
}

impl Error {
    /// Whether this error belongs to the network/protocol class
    pub fn is_protocol(&self) -> bool {
        matches!(
            self,
            Error::Protocol(_) | Error::Handshake(_) | Error::WindowStalled { .. } | Error::Amf(_)
        )
    }

    pub(crate) fn decode(stream: usize, reason: impl Into<String>) -> Self {
        Error::Decode {
            stream,
            reason: reason.into(),
        }
    }

    pub(crate) fn unsupported(what: impl Into<String>) -> Self {
        Error::UnsupportedFormat(what.into())
    }
}

/// RTMP protocol errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Message did not fit the current exchange
    #[error("unexpected message: {0}")]
    UnexpectedMessage(String),

    /// Peer answered a command with `_error` or a failure status
    #[error("command {command} rejected: {description}")]
    CommandRejected { command: String, description: String },

    /// Chunk header or control message malformed
    #[error("invalid chunk: {0}")]
    InvalidChunk(String),

    /// Message length over the accepted maximum
    #[error("message too large: {0} bytes")]
    MessageTooLarge(u32),

    /// No answer within the configured timeout
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    /// Peer closed the connection
    #[error("connection closed by peer")]
    ConnectionClosed,
}

/// Handshake errors
#[derive(Debug, Error)]
pub enum HandshakeError {
    /// Version byte below 3
    #[error("invalid RTMP version {0}")]
    InvalidVersion(u8),

    /// Handshake did not complete in time
    #[error("handshake timed out")]
    Timeout,

    /// Peer closed the socket mid-handshake
    #[error("peer aborted handshake")]
    Aborted,
}

/// AMF decoding errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AmfError {
    #[error("unexpected end of AMF data")]
    UnexpectedEof,
    #[error("AMF nesting too deep")]
    NestingTooDeep,
    #[error("unknown AMF marker 0x{0:02x}")]
    UnknownMarker(u8),
    #[error("invalid AMF object end")]
    InvalidObjectEnd,
    #[error("invalid AMF reference {0}")]
    InvalidReference(u16),
    #[error("invalid UTF-8 in AMF string")]
    InvalidUtf8,
}

/// Media payload errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MediaError {
    #[error("invalid AAC packet")]
    InvalidAacPacket,
    #[error("invalid FLV header")]
    InvalidFlvHeader,
    #[error("invalid FLV tag: {0}")]
    InvalidFlvTag(String),
    #[error("empty media payload")]
    EmptyPayload,
}
