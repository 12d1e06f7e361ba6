//! Connection state machine
//!
//! Tracks where an RTMP connection is in its lifecycle together with the
//! negotiated chunk sizes and the acknowledgement window in both directions.
//!
//! ```text
//! Disconnected -> Handshaking -> Connected -> StreamOpen -> Streaming
//!       \______________\______________\____________\___________\
//!                                                               -> Closed | Failed
//! ```

use std::time::Instant;

use crate::protocol::constants::{DEFAULT_CHUNK_SIZE, DEFAULT_WINDOW_ACK_SIZE};
use crate::protocol::message::ConnectParams;

/// Connection lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// No transport yet
    Disconnected,
    /// TCP up, handshake in progress
    Handshaking,
    /// `connect` accepted
    Connected,
    /// `createStream` answered with a stream id
    StreamOpen,
    /// `publish` or `play` accepted
    Streaming,
    /// Closed by us
    Closed,
    /// Ended by an error
    Failed,
}

impl SessionPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionPhase::Closed | SessionPhase::Failed)
    }
}

/// Complete connection state
#[derive(Debug)]
pub struct SessionState {
    pub phase: SessionPhase,
    pub created_at: Instant,
    pub handshake_completed_at: Option<Instant>,
    pub connect_params: Option<ConnectParams>,

    /// Negotiated chunk size (incoming)
    pub in_chunk_size: u32,
    /// Negotiated chunk size (outgoing)
    pub out_chunk_size: u32,

    /// Window we announced; we acknowledge the peer every this many bytes
    pub window_ack_size: u32,
    /// Window the peer announced: it acks our data at this interval
    pub peer_window_ack_size: u32,

    pub bytes_received: u64,
    pub bytes_sent: u64,
    /// Sequence number of our last acknowledgement to the peer
    pub last_ack_sent: u64,
    /// Last sequence number the peer acknowledged (bytes of ours it has read)
    pub last_ack_received: u64,
    /// When the peer last acknowledged anything
    pub last_ack_at: Instant,
}

impl SessionState {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            phase: SessionPhase::Disconnected,
            created_at: now,
            handshake_completed_at: None,
            connect_params: None,
            in_chunk_size: DEFAULT_CHUNK_SIZE,
            out_chunk_size: DEFAULT_CHUNK_SIZE,
            window_ack_size: DEFAULT_WINDOW_ACK_SIZE,
            peer_window_ack_size: 0,
            bytes_received: 0,
            bytes_sent: 0,
            last_ack_sent: 0,
            last_ack_received: 0,
            last_ack_at: now,
        }
    }

    pub fn start_handshake(&mut self) {
        if self.phase == SessionPhase::Disconnected {
            self.phase = SessionPhase::Handshaking;
        }
    }

    pub fn complete_handshake(&mut self) {
        if self.phase == SessionPhase::Handshaking {
            self.handshake_completed_at = Some(Instant::now());
        }
    }

    pub fn on_connected(&mut self, params: ConnectParams) {
        self.connect_params = Some(params);
        self.phase = SessionPhase::Connected;
    }

    pub fn on_stream_open(&mut self) {
        if self.phase == SessionPhase::Connected {
            self.phase = SessionPhase::StreamOpen;
        }
    }

    pub fn on_streaming(&mut self) {
        if self.phase == SessionPhase::StreamOpen {
            self.phase = SessionPhase::Streaming;
        }
    }

    /// Enter `Failed` unless already terminal
    pub fn fail(&mut self) {
        if !self.phase.is_terminal() {
            self.phase = SessionPhase::Failed;
        }
    }

    /// Enter `Closed` unless already terminal
    pub fn close(&mut self) {
        if !self.phase.is_terminal() {
            self.phase = SessionPhase::Closed;
        }
    }

    /// Count received bytes; true when an acknowledgement is due
    pub fn add_bytes_received(&mut self, bytes: u64) -> bool {
        self.bytes_received += bytes;
        self.window_ack_size > 0
            && self.bytes_received - self.last_ack_sent >= self.window_ack_size as u64
    }

    /// Sequence number for the acknowledgement about to be sent
    pub fn mark_ack_sent(&mut self) -> u32 {
        self.last_ack_sent = self.bytes_received;
        self.bytes_received as u32
    }

    pub fn add_bytes_sent(&mut self, bytes: u64) {
        self.bytes_sent += bytes;
    }

    /// Record a peer acknowledgement. The sequence number is 32 bits and
    /// wraps; it is widened against our own 64-bit counter. Peers disagree
    /// on whether handshake bytes count, so an ack slightly ahead of our
    /// counter is clamped to it.
    pub fn on_ack(&mut self, sequence: u32) {
        let base = self.bytes_sent & !0xFFFF_FFFF;
        let mut acked = base | sequence as u64;
        if acked > self.bytes_sent + (1 << 31) {
            acked = acked.saturating_sub(1 << 32);
        }
        let acked = acked.min(self.bytes_sent);
        if acked >= self.last_ack_received {
            self.last_ack_received = acked;
        }
        self.last_ack_at = Instant::now();
    }

    /// Bytes sent that the peer has not acknowledged yet
    pub fn unacked(&self) -> u64 {
        self.bytes_sent.saturating_sub(self.last_ack_received)
    }

    pub fn app(&self) -> Option<&str> {
        self.connect_params.as_ref().map(|p| p.app.as_str())
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle() {
        let mut state = SessionState::new();
        assert_eq!(state.phase, SessionPhase::Disconnected);

        state.start_handshake();
        assert_eq!(state.phase, SessionPhase::Handshaking);
        state.complete_handshake();
        assert!(state.handshake_completed_at.is_some());

        state.on_connected(ConnectParams {
            app: "live".into(),
            ..Default::default()
        });
        assert_eq!(state.phase, SessionPhase::Connected);
        assert_eq!(state.app(), Some("live"));

        state.on_stream_open();
        state.on_streaming();
        assert_eq!(state.phase, SessionPhase::Streaming);

        state.close();
        assert_eq!(state.phase, SessionPhase::Closed);
        state.fail();
        assert_eq!(state.phase, SessionPhase::Closed);
    }

    #[test]
    fn test_streaming_requires_open_stream() {
        let mut state = SessionState::new();
        state.on_streaming();
        assert_eq!(state.phase, SessionPhase::Disconnected);
    }

    #[test]
    fn test_ack_due_after_window() {
        let mut state = SessionState::new();
        state.window_ack_size = 1000;
        assert!(!state.add_bytes_received(600));
        assert!(state.add_bytes_received(600));
        assert_eq!(state.mark_ack_sent(), 1200);
        assert!(!state.add_bytes_received(999));
        assert!(state.add_bytes_received(1));
    }

    #[test]
    fn test_unacked_tracking() {
        let mut state = SessionState::new();
        state.add_bytes_sent(5000);
        assert_eq!(state.unacked(), 5000);
        state.on_ack(4000);
        assert_eq!(state.unacked(), 1000);
        // Stale ack does not move backwards
        state.on_ack(3000);
        assert_eq!(state.unacked(), 1000);
    }

    #[test]
    fn test_ack_sequence_wraps() {
        let mut state = SessionState::new();
        state.add_bytes_sent((1u64 << 32) + 500);
        state.on_ack(200);
        assert_eq!(state.last_ack_received, (1u64 << 32) + 200);
        assert_eq!(state.unacked(), 300);
    }

    #[test]
    fn test_ack_ahead_of_counter_is_clamped() {
        let mut state = SessionState::new();
        state.add_bytes_sent(5000);
        state.on_ack(8073);
        assert_eq!(state.unacked(), 0);
    }
}
