//! Media containers, packets and frames
//!
//! FLV tags are the unit of exchange: a file demuxer reads them, RTMP
//! carries their bodies, and a publisher forwards them unchanged.

pub mod aac;
pub mod flv;
pub mod frame;
pub mod packet;

pub use aac::AudioSpecificConfig;
pub use flv::{FlvHeader, FlvReader, FlvTag, FlvTagType, FlvWriter};
pub use frame::{AudioFrame, Frame, PixelFormat, VideoFrame};
pub use packet::{Codec, MediaInfo, MediaKind, Packet, StreamInfo};
