//! RTMP session layer shared by publishers and players

pub mod connection;
pub mod state;
pub mod stream;

pub use connection::{RtmpSession, SessionRole};
pub use state::{SessionPhase, SessionState};
pub use stream::{StreamMode, StreamState};
