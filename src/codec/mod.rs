//! Per-stream decoders
//!
//! A [`Decoder`] turns packets of one elementary stream into frames. It is
//! stateful: a packet may yield nothing until later packets arrive, and
//! [`Decoder::flush`] releases whatever is still buffered at end of stream.
//!
//! ```rust,ignore
//! let mut decoder = BuiltinDecoders.create(&stream_info)?;
//! for packet in packets {
//!     decoder.submit(&packet)?;
//!     while let Some(frame) = decoder.retrieve() {
//!         // PTS order
//!     }
//! }
//! decoder.flush()?;
//! ```
//!
//! The built-in set covers the FLV codecs that need no native library.
//! AVC, AAC and MP3 go through FFmpeg when the `ffmpeg` feature is on;
//! anything else is decoded by a caller-supplied [`DecoderFactory`].

#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;
pub mod g711;
pub mod pcm;
pub mod screen;

use std::collections::VecDeque;

use crate::error::{Error, Result};
use crate::media::flv::{AudioFormat, VideoCodec};
use crate::media::{Codec, Frame, Packet, StreamInfo};

#[cfg(feature = "ffmpeg")]
pub use self::ffmpeg::{FfmpegDecoder, FfmpegDecoders};
pub use g711::G711Decoder;
pub use pcm::PcmDecoder;
pub use screen::ScreenVideoDecoder;

/// Packet to frame transformer for one stream
pub trait Decoder: Send {
    /// Codec name, for logs
    fn name(&self) -> &'static str;

    /// Feed one packet. Corruption the decoder cannot recover from fails
    /// with [`Error::Decode`].
    fn submit(&mut self, packet: &Packet) -> Result<()>;

    /// Next decoded frame, in PTS order
    fn retrieve(&mut self) -> Option<Frame>;

    /// End of stream: make buffered frames available to `retrieve`
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    /// Forget reference state, as after a seek
    fn reset(&mut self);
}

/// Creates decoders for streams
pub trait DecoderFactory: Send + Sync {
    fn create(&self, stream: &StreamInfo) -> Result<Box<dyn Decoder>>;
}

/// Factory for the built-in codecs
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinDecoders;

impl BuiltinDecoders {
    pub fn supports(codec: &Codec) -> bool {
        matches!(
            codec,
            Codec::Audio(AudioFormat::LinearPcmPlatform)
                | Codec::Audio(AudioFormat::LinearPcmLe)
                | Codec::Audio(AudioFormat::G711ALaw)
                | Codec::Audio(AudioFormat::G711MuLaw)
                | Codec::Video(VideoCodec::ScreenVideo)
        )
    }
}

impl DecoderFactory for BuiltinDecoders {
    fn create(&self, stream: &StreamInfo) -> Result<Box<dyn Decoder>> {
        match stream.codec {
            Codec::Audio(AudioFormat::LinearPcmPlatform) | Codec::Audio(AudioFormat::LinearPcmLe) => {
                Ok(Box::new(PcmDecoder::new(stream)))
            }
            Codec::Audio(AudioFormat::G711ALaw) | Codec::Audio(AudioFormat::G711MuLaw) => {
                Ok(Box::new(G711Decoder::new(stream)))
            }
            Codec::Video(VideoCodec::ScreenVideo) => Ok(Box::new(ScreenVideoDecoder::new(stream))),
            other => Err(Error::decode(
                stream.index,
                format!("no decoder available for {}", other.name()),
            )),
        }
    }
}

/// Tries each factory in turn, so a caller can add codecs on top of the
/// built-in set
pub struct FactoryChain {
    factories: Vec<Box<dyn DecoderFactory>>,
}

impl FactoryChain {
    pub fn new() -> Self {
        Self {
            factories: Vec::new(),
        }
    }

    pub fn with(mut self, factory: impl DecoderFactory + 'static) -> Self {
        self.factories.push(Box::new(factory));
        self
    }
}

impl Default for FactoryChain {
    fn default() -> Self {
        let chain = Self::new().with(BuiltinDecoders);
        #[cfg(feature = "ffmpeg")]
        let chain = chain.with(FfmpegDecoders);
        chain
    }
}

impl DecoderFactory for FactoryChain {
    fn create(&self, stream: &StreamInfo) -> Result<Box<dyn Decoder>> {
        let mut last = None;
        for factory in &self.factories {
            match factory.create(stream) {
                Ok(decoder) => return Ok(decoder),
                Err(e) => last = Some(e),
            }
        }
        Err(last.unwrap_or_else(|| {
            Error::decode(stream.index, format!("no decoder available for {}", stream.codec.name()))
        }))
    }
}

/// Decoded frames waiting for `retrieve`.
///
/// Keeps output PTS non-decreasing: a frame stamped earlier than its
/// predecessor is clamped, unless it starts a discontinuity.
#[derive(Debug, Default)]
pub(crate) struct FrameOutput {
    frames: VecDeque<Frame>,
    last_pts: Option<i64>,
    mark_discontinuity: bool,
}

impl FrameOutput {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// The next emitted frame carries the discontinuity flag
    pub(crate) fn discontinuity(&mut self) {
        self.mark_discontinuity = true;
        self.last_pts = None;
    }

    pub(crate) fn emit(&mut self, mut frame: Frame) {
        if std::mem::take(&mut self.mark_discontinuity) {
            frame.set_discontinuity();
        } else if let Some(last) = self.last_pts {
            if frame.pts_ms() >= 0 && frame.pts_ms() < last {
                tracing::trace!(pts = frame.pts_ms(), last, "Clamping regressing PTS");
                set_pts(&mut frame, last);
            }
        }
        if frame.pts_ms() >= 0 {
            self.last_pts = Some(frame.pts_ms());
        }
        self.frames.push_back(frame);
    }

    pub(crate) fn next(&mut self) -> Option<Frame> {
        self.frames.pop_front()
    }

    pub(crate) fn clear(&mut self) {
        self.frames.clear();
    }
}

fn set_pts(frame: &mut Frame, pts: i64) {
    match frame {
        Frame::Video(f) => f.pts_ms = pts,
        Frame::Audio(f) => f.pts_ms = pts,
    }
}
