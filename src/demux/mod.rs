//! Sources of packets
//!
//! A [`Demuxer`] turns a container into timestamped packets per elementary
//! stream. FLV files and RTMP streams share the FLV tag model, so both
//! produce the same [`Packet`]s and the rest of the pipeline does not care
//! where they came from.

pub mod flv_file;
pub mod rtmp_source;
pub(crate) mod stage;

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use crate::config::PlayerConfig;
use crate::error::Result;
use crate::media::{FlvTag, MediaInfo, MediaKind, Packet, StreamInfo};

pub use flv_file::FlvFileDemuxer;
pub use rtmp_source::RtmpDemuxer;

/// Container reader for one source
pub trait Demuxer: Send {
    /// Streams and metadata found while opening
    fn info(&self) -> &MediaInfo;

    /// Next packet in container order, `None` at end of stream
    fn read_packet(&mut self) -> Result<Option<Packet>>;

    /// Continue from the key frame at or before `position_ms`. Returns the
    /// timestamp actually reached. Live sources fail with
    /// [`Error::SeekUnsupported`](crate::Error::SeekUnsupported).
    fn seek(&mut self, position_ms: u64) -> Result<u64>;

    /// Release network or file resources. Idempotent.
    fn close(&mut self) {}
}

/// Where a session reads from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    File(PathBuf),
    Rtmp(String),
}

impl Source {
    pub fn parse(source: &str) -> Self {
        if source.len() >= 7 && source[..7].eq_ignore_ascii_case("rtmp://") {
            Source::Rtmp(source.to_string())
        } else {
            Source::File(PathBuf::from(source))
        }
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Source::File(path) => write!(f, "{}", path.display()),
            Source::Rtmp(url) => f.write_str(url),
        }
    }
}

/// Open `source`. RTMP sources connect and start playing before this
/// returns; `cancel` interrupts their blocking reads.
pub fn open(source: &str, config: &PlayerConfig, cancel: Arc<AtomicBool>) -> Result<Box<dyn Demuxer>> {
    match Source::parse(source) {
        Source::File(path) => Ok(Box::new(FlvFileDemuxer::open(&path, config.scan_tags)?)),
        Source::Rtmp(url) => Ok(Box::new(RtmpDemuxer::open(&url, config, cancel)?)),
    }
}

/// Assigns stream indices to FLV audio/video tags in order of appearance
#[derive(Debug, Default)]
pub(crate) struct StreamTable {
    audio: Option<usize>,
    video: Option<usize>,
}

impl StreamTable {
    /// Index of the tag's stream. A stream seen for the first time is added
    /// to `info`; a known one picks up configuration the tag carries.
    pub(crate) fn index_for(&mut self, tag: &FlvTag, info: &mut MediaInfo) -> Option<usize> {
        let kind = if tag.is_audio() {
            MediaKind::Audio
        } else if tag.is_video() {
            MediaKind::Video
        } else {
            return None;
        };
        let slot = match kind {
            MediaKind::Audio => &mut self.audio,
            MediaKind::Video => &mut self.video,
        };
        match *slot {
            Some(index) => {
                if let Some(stream) = info.streams.iter_mut().find(|s| s.index == index) {
                    stream.update_from_tag(tag);
                }
                Some(index)
            }
            None => {
                let index = info.streams.len();
                let mut stream = StreamInfo::from_tag(index, tag)?;
                if let Some(meta) = info.metadata.as_ref() {
                    stream.apply_metadata(meta);
                }
                tracing::debug!(index, kind = ?kind, codec = stream.codec.name(), "Stream discovered");
                info.streams.push(stream);
                *slot = Some(index);
                Some(index)
            }
        }
    }

    pub(crate) fn has(&self, kind: MediaKind) -> bool {
        match kind {
            MediaKind::Audio => self.audio.is_some(),
            MediaKind::Video => self.video.is_some(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn test_source_detection() {
        assert_eq!(
            Source::parse("rtmp://host/live/key"),
            Source::Rtmp("rtmp://host/live/key".into())
        );
        assert_eq!(
            Source::parse("RTMP://host/live/key"),
            Source::Rtmp("RTMP://host/live/key".into())
        );
        assert_eq!(
            Source::parse("/sdcard/movie.flv"),
            Source::File(PathBuf::from("/sdcard/movie.flv"))
        );
        assert_eq!(Source::parse("a.flv").to_string(), "a.flv");
    }

    #[test]
    fn test_stream_table_assigns_in_order() {
        let mut table = StreamTable::default();
        let mut info = MediaInfo::default();

        let video = FlvTag::video(0, Bytes::from_static(&[0x13, 0x00, 0x10, 0x00, 0x10]));
        let audio = FlvTag::audio(0, Bytes::from_static(&[0x3E, 0x00, 0x00]));

        assert_eq!(table.index_for(&video, &mut info), Some(0));
        assert_eq!(table.index_for(&audio, &mut info), Some(1));
        assert_eq!(table.index_for(&video, &mut info), Some(0));
        assert_eq!(info.streams.len(), 2);
        assert!(table.has(MediaKind::Audio));
        assert_eq!(info.streams[0].width, 16);

        let script = FlvTag::script(0, Bytes::new());
        assert_eq!(table.index_for(&script, &mut info), None);
    }
}
