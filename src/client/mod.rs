//! RTMP client side
//!
//! Connection settings and the file publisher. Playing a remote stream goes
//! through [`RtmpDemuxer`](crate::demux::RtmpDemuxer), which drives the
//! same [`RtmpSession`](crate::session::RtmpSession) in the player role.

pub mod config;
pub mod publisher;

pub use config::{ClientConfig, RtmpUrl};
pub use publisher::{PublishEvent, RtmpPublisher};
