//! RTMP handshake
//!
//! Simple (digest-free) handshake, driven byte-by-byte from whatever the
//! transport delivered. The state machine never performs I/O itself: the
//! session feeds it a receive buffer and writes back the bytes it returns.
//!
//! ```text
//! Client                                   Server
//!   |------- C0 (1 byte: version) --------->|
//!   |------- C1 (1536 bytes: time+random) ->|
//!   |<------ S0 (1 byte: version) ----------|
//!   |<------ S1 (1536 bytes: time+random) --|
//!   |<------ S2 (1536 bytes: echo C1) ------|
//!   |------- C2 (1536 bytes: echo S1) ----->|
//! ```
//!
//! Both roles live here: the client role is used by publishers and players,
//! the server role by loopback peers in tests and tools.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{HandshakeError, Result};
use crate::protocol::constants::{HANDSHAKE_SIZE, RTMP_VERSION};

/// Which side of the exchange we are
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeRole {
    Client,
    Server,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    /// Nothing sent yet
    Idle,
    /// Client: waiting for S0+S1+S2. Server: waiting for C0+C1.
    AwaitingPeerHello,
    /// Server: waiting for C2
    AwaitingPeerEcho,
    Done,
}

/// Handshake state machine
#[derive(Debug)]
pub struct Handshake {
    role: HandshakeRole,
    stage: Stage,
    /// Our C1/S1, kept to check the peer's echo
    local_packet: Option<[u8; HANDSHAKE_SIZE]>,
    /// Peer epoch from its C1/S1
    peer_epoch: u32,
    /// Whether the peer echoed our random bytes faithfully
    echo_verified: bool,
}

impl Handshake {
    pub fn new(role: HandshakeRole) -> Self {
        Self {
            role,
            stage: Stage::Idle,
            local_packet: None,
            peer_epoch: 0,
            echo_verified: false,
        }
    }

    pub fn role(&self) -> HandshakeRole {
        self.role
    }

    pub fn is_done(&self) -> bool {
        self.stage == Stage::Done
    }

    /// True once the peer's echo matched our random block.
    ///
    /// Mismatches are tolerated (many servers echo loosely) but recorded.
    pub fn echo_verified(&self) -> bool {
        self.echo_verified
    }

    /// Peer timestamp carried in its C1/S1
    pub fn peer_epoch(&self) -> u32 {
        self.peer_epoch
    }

    /// Bytes the state machine needs before it can advance
    pub fn bytes_needed(&self) -> usize {
        match (self.stage, self.role) {
            (Stage::AwaitingPeerHello, HandshakeRole::Client) => 1 + 2 * HANDSHAKE_SIZE,
            (Stage::AwaitingPeerHello, HandshakeRole::Server) => 1 + HANDSHAKE_SIZE,
            (Stage::AwaitingPeerEcho, _) => HANDSHAKE_SIZE,
            _ => 0,
        }
    }

    /// Opening bytes: C0+C1 for a client, nothing for a server
    pub fn start(&mut self) -> Option<Bytes> {
        if self.stage != Stage::Idle {
            return None;
        }
        self.stage = Stage::AwaitingPeerHello;

        match self.role {
            HandshakeRole::Client => {
                let c1 = generate_packet();
                self.local_packet = Some(c1);

                let mut buf = BytesMut::with_capacity(1 + HANDSHAKE_SIZE);
                buf.put_u8(RTMP_VERSION);
                buf.put_slice(&c1);
                Some(buf.freeze())
            }
            HandshakeRole::Server => None,
        }
    }

    /// Consume handshake bytes from `buf` and return what must be sent back.
    ///
    /// Only whole handshake units are consumed; a partial unit is left in the
    /// buffer. Bytes following the final unit (early chunk data) stay in the
    /// buffer for the chunk layer.
    pub fn feed(&mut self, buf: &mut BytesMut) -> Result<Option<Bytes>> {
        if buf.len() < self.bytes_needed() || self.bytes_needed() == 0 {
            return Ok(None);
        }

        match (self.stage, self.role) {
            (Stage::AwaitingPeerHello, HandshakeRole::Client) => {
                check_version(buf.get_u8())?;
                let s1 = take_packet(buf);
                let s2 = take_packet(buf);
                self.peer_epoch = packet_epoch(&s1);
                self.echo_verified = self.matches_local(&s2);

                self.stage = Stage::Done;
                Ok(Some(Bytes::copy_from_slice(&generate_echo(&s1))))
            }
            (Stage::AwaitingPeerHello, HandshakeRole::Server) => {
                check_version(buf.get_u8())?;
                let c1 = take_packet(buf);
                self.peer_epoch = packet_epoch(&c1);

                let s1 = generate_packet();
                self.local_packet = Some(s1);

                let mut out = BytesMut::with_capacity(1 + 2 * HANDSHAKE_SIZE);
                out.put_u8(RTMP_VERSION);
                out.put_slice(&s1);
                out.put_slice(&generate_echo(&c1));

                self.stage = Stage::AwaitingPeerEcho;
                Ok(Some(out.freeze()))
            }
            (Stage::AwaitingPeerEcho, _) => {
                let c2 = take_packet(buf);
                self.echo_verified = self.matches_local(&c2);
                self.stage = Stage::Done;
                Ok(None)
            }
            _ => Ok(None),
        }
    }

    fn matches_local(&self, echo: &[u8; HANDSHAKE_SIZE]) -> bool {
        self.local_packet
            .as_ref()
            .map(|local| local[8..] == echo[8..])
            .unwrap_or(false)
    }
}

fn check_version(version: u8) -> Result<()> {
    // Versions above 3 show up from some encoders and are accepted
    if version < RTMP_VERSION {
        return Err(HandshakeError::InvalidVersion(version).into());
    }
    Ok(())
}

fn take_packet(buf: &mut BytesMut) -> [u8; HANDSHAKE_SIZE] {
    let mut packet = [0u8; HANDSHAKE_SIZE];
    buf.copy_to_slice(&mut packet);
    packet
}

fn packet_epoch(packet: &[u8; HANDSHAKE_SIZE]) -> u32 {
    u32::from_be_bytes([packet[0], packet[1], packet[2], packet[3]])
}

fn now_millis() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u32)
        .unwrap_or(0)
}

/// C1/S1: epoch(4) | zero(4) | random(1528)
fn generate_packet() -> [u8; HANDSHAKE_SIZE] {
    let mut packet = [0u8; HANDSHAKE_SIZE];
    let epoch = now_millis();
    packet[0..4].copy_from_slice(&epoch.to_be_bytes());

    // The random block only has to differ between peers, not be unpredictable
    let mut seed = (epoch as u64) ^ 0x9E37_79B9_7F4A_7C15;
    for chunk in packet[8..].chunks_mut(8) {
        seed = seed
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        let bytes = seed.to_le_bytes();
        chunk.copy_from_slice(&bytes[..chunk.len()]);
    }
    packet
}

/// C2/S2: peer epoch(4) | our read time(4) | peer random(1528)
fn generate_echo(peer: &[u8; HANDSHAKE_SIZE]) -> [u8; HANDSHAKE_SIZE] {
    let mut echo = *peer;
    echo[4..8].copy_from_slice(&now_millis().to_be_bytes());
    echo
}
