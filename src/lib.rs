//! # streamcast
//!
//! FLV/RTMP media engine: plays local FLV files and RTMP streams to a video
//! surface and an audio device, and publishes FLV files to RTMP servers.
//!
//! ```text
//! source ─> demux ─> decode ─> sync ─> render (Surface)
//!                          └─> sync ─> audio sink (AudioDevice)
//!
//! FLV file ─> demux ─> pacer ─> RTMP session (publish)
//! ```
//!
//! Each playback stage runs on its own thread and hands off through
//! [`BoundedQueue`]s; RTMP I/O runs on a current-thread tokio runtime.
//!
//! ## Playing a file
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use streamcast::{Engine, MemorySurface, PixelFormat, PlayerConfig, RingBufferDevice};
//!
//! # fn main() -> streamcast::Result<()> {
//! let engine = Engine::new(PlayerConfig::default());
//! let handle = engine.open("movie.flv")?;
//!
//! let surface = MemorySurface::new(640, 360, PixelFormat::Rgba);
//! engine.start_video(handle, Box::new(surface.clone()), 0, 0)?;
//! let device = RingBufferDevice::new(44100, 2, Duration::from_millis(200))?;
//! engine.start_audio(handle, Arc::new(device))?;
//!
//! let outcome = engine.wait(handle, None)?;
//! println!("{:?}, {} frames shown", outcome, surface.frames_submitted());
//! engine.release(handle)?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Publishing
//!
//! ```no_run
//! use streamcast::{Engine, PlayerConfig};
//!
//! # fn main() -> streamcast::Result<()> {
//! let engine = Engine::new(PlayerConfig::default());
//! let report = engine.publish("movie.flv", "rtmp://localhost/live/key")?;
//! println!("published {} ms", report.media_duration_ms());
//! # Ok(())
//! # }
//! ```

pub mod amf;
pub mod audio;
pub mod client;
pub mod codec;
pub mod config;
pub mod demux;
pub mod engine;
pub mod error;
pub mod media;
pub mod player;
pub mod protocol;
pub mod queue;
pub mod render;
pub mod session;
pub mod stats;
pub mod sync;

pub use amf::AmfValue;
pub use audio::{AudioDevice, AudioSink, RingBufferDevice};
pub use client::{ClientConfig, PublishEvent, RtmpPublisher};
pub use codec::{BuiltinDecoders, Decoder, DecoderFactory, FactoryChain};
pub use config::PlayerConfig;
pub use demux::{Demuxer, FlvFileDemuxer, RtmpDemuxer};
pub use engine::{Engine, Handle};
pub use error::{Error, Result};
pub use media::{AudioFrame, Frame, MediaInfo, MediaKind, Packet, PixelFormat, StreamInfo, VideoFrame};
pub use player::{PlaybackEvent, PlaybackSession, SessionOutcome};
pub use queue::BoundedQueue;
pub use render::{MemorySurface, Surface, VideoRenderer};
pub use session::{RtmpSession, SessionPhase, SessionRole};
pub use stats::{PlaybackStats, PublishStats};
