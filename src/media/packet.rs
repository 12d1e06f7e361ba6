//! Demuxed packets and stream descriptions

use bytes::Bytes;

use crate::amf::AmfValue;
use crate::media::aac::AudioSpecificConfig;
use crate::media::flv::{AudioFormat, FlvTag, FlvTagType, SoundInfo, VideoCodec};

/// Elementary stream kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Audio,
    Video,
}

/// Codec of an elementary stream, named by its FLV codec id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    Audio(AudioFormat),
    Video(VideoCodec),
    /// Codec id without a known name
    Unknown { kind: MediaKind, id: u8 },
}

impl Codec {
    pub fn from_tag(tag: &FlvTag) -> Option<Self> {
        let first = *tag.data.first()?;
        match tag.tag_type {
            FlvTagType::Audio => Some(match AudioFormat::from_byte(first) {
                Some(format) => Codec::Audio(format),
                None => Codec::Unknown {
                    kind: MediaKind::Audio,
                    id: first >> 4,
                },
            }),
            FlvTagType::Video => Some(match VideoCodec::from_byte(first) {
                Some(codec) => Codec::Video(codec),
                None => Codec::Unknown {
                    kind: MediaKind::Video,
                    id: first & 0x0F,
                },
            }),
            FlvTagType::Script => None,
        }
    }

    pub fn kind(&self) -> MediaKind {
        match self {
            Codec::Audio(_) => MediaKind::Audio,
            Codec::Video(_) => MediaKind::Video,
            Codec::Unknown { kind, .. } => *kind,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Codec::Audio(AudioFormat::LinearPcmPlatform) => "pcm",
            Codec::Audio(AudioFormat::LinearPcmLe) => "pcm_le",
            Codec::Audio(AudioFormat::Adpcm) => "adpcm_swf",
            Codec::Audio(AudioFormat::Mp3) | Codec::Audio(AudioFormat::Mp38k) => "mp3",
            Codec::Audio(AudioFormat::G711ALaw) => "pcm_alaw",
            Codec::Audio(AudioFormat::G711MuLaw) => "pcm_mulaw",
            Codec::Audio(AudioFormat::Aac) => "aac",
            Codec::Audio(AudioFormat::Speex) => "speex",
            Codec::Audio(_) => "nellymoser",
            Codec::Video(VideoCodec::SorensonH263) => "flv1",
            Codec::Video(VideoCodec::ScreenVideo) => "flashsv",
            Codec::Video(VideoCodec::ScreenVideoV2) => "flashsv2",
            Codec::Video(VideoCodec::Vp6) => "vp6f",
            Codec::Video(VideoCodec::Vp6Alpha) => "vp6a",
            Codec::Video(VideoCodec::Avc) => "h264",
            Codec::Unknown { .. } => "unknown",
        }
    }
}

/// Description of one elementary stream
#[derive(Debug, Clone, PartialEq)]
pub struct StreamInfo {
    pub index: usize,
    pub codec: Codec,
    /// Audio: Hz
    pub sample_rate: u32,
    pub channels: u8,
    /// Audio: 8 or 16
    pub sample_bits: u8,
    /// Video: pixels, 0 until known
    pub width: u32,
    pub height: u32,
    pub frame_rate: f64,
    /// Sequence header body (AVC decoder record, AAC AudioSpecificConfig)
    pub extradata: Option<Bytes>,
}

impl StreamInfo {
    /// Describe the stream a tag belongs to
    pub fn from_tag(index: usize, tag: &FlvTag) -> Option<Self> {
        let codec = Codec::from_tag(tag)?;
        let mut info = Self {
            index,
            codec,
            sample_rate: 0,
            channels: 0,
            sample_bits: 0,
            width: 0,
            height: 0,
            frame_rate: 0.0,
            extradata: None,
        };
        if let Some(sound) = tag.sound_info() {
            info.apply_sound(&sound);
        }
        info.update_from_tag(tag);
        Some(info)
    }

    pub fn kind(&self) -> MediaKind {
        self.codec.kind()
    }

    /// Pick up configuration a later tag reveals
    pub fn update_from_tag(&mut self, tag: &FlvTag) {
        if let Some(config) = AudioSpecificConfig::from_tag(tag) {
            self.sample_rate = config.sampling_frequency;
            if config.channels() > 0 {
                self.channels = config.channels();
            }
            self.sample_bits = 16;
            self.extradata = Some(config.raw);
        } else if tag.is_avc_sequence_header() {
            self.extradata = Some(tag.data.slice(5.min(tag.data.len())..));
        } else if self.codec == Codec::Video(VideoCodec::ScreenVideo) && self.width == 0 {
            // Screen video frames start with 12-bit width and height fields
            if tag.data.len() >= 5 {
                self.width = (u16::from_be_bytes([tag.data[1], tag.data[2]]) & 0x0FFF) as u32;
                self.height = (u16::from_be_bytes([tag.data[3], tag.data[4]]) & 0x0FFF) as u32;
            }
        }
    }

    fn apply_sound(&mut self, sound: &SoundInfo) {
        self.sample_rate = sound.sample_rate;
        self.channels = sound.channels;
        self.sample_bits = sound.sample_bits;
    }

    /// Fill gaps from `onMetaData`
    pub fn apply_metadata(&mut self, meta: &AmfValue) {
        match self.kind() {
            MediaKind::Video => {
                if self.width == 0 {
                    self.width = meta.get_number("width").unwrap_or(0.0) as u32;
                }
                if self.height == 0 {
                    self.height = meta.get_number("height").unwrap_or(0.0) as u32;
                }
                if let Some(fps) = meta.get_number("framerate") {
                    self.frame_rate = fps;
                }
            }
            MediaKind::Audio => {
                if self.extradata.is_none() {
                    if let Some(rate) = meta.get_number("audiosamplerate").filter(|r| *r > 0.0) {
                        self.sample_rate = rate as u32;
                    }
                }
            }
        }
    }
}

/// What a source holds, as discovered by probing
#[derive(Debug, Clone, Default)]
pub struct MediaInfo {
    pub streams: Vec<StreamInfo>,
    /// From `onMetaData`
    pub duration_ms: Option<u64>,
    pub metadata: Option<AmfValue>,
    pub seekable: bool,
}

impl MediaInfo {
    pub fn stream(&self, kind: MediaKind) -> Option<&StreamInfo> {
        self.streams.iter().find(|s| s.kind() == kind)
    }

    pub fn has(&self, kind: MediaKind) -> bool {
        self.stream(kind).is_some()
    }

    pub fn apply_metadata(&mut self, meta: &AmfValue) {
        if let Some(duration) = meta.get_number("duration").filter(|d| *d > 0.0) {
            self.duration_ms = Some((duration * 1000.0) as u64);
        }
        for stream in &mut self.streams {
            stream.apply_metadata(meta);
        }
        self.metadata = Some(meta.clone());
    }
}

/// One demuxed access unit; the payload is the complete FLV tag body
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub stream_index: usize,
    pub kind: MediaKind,
    /// Milliseconds
    pub dts_ms: i64,
    pub pts_ms: i64,
    pub keyframe: bool,
    /// First packet after a seek or reconnect
    pub discontinuity: bool,
    pub data: Bytes,
}

impl Packet {
    /// `None` for script tags
    pub fn from_tag(stream_index: usize, tag: &FlvTag) -> Option<Self> {
        let kind = match tag.tag_type {
            FlvTagType::Audio => MediaKind::Audio,
            FlvTagType::Video => MediaKind::Video,
            FlvTagType::Script => return None,
        };
        let dts = tag.timestamp as i64;
        Some(Self {
            stream_index,
            kind,
            dts_ms: dts,
            pts_ms: dts + tag.composition_time() as i64,
            keyframe: tag.is_keyframe(),
            discontinuity: false,
            data: tag.data.clone(),
        })
    }

    /// Back to an FLV tag, timestamped by DTS
    pub fn to_tag(&self) -> FlvTag {
        let tag_type = match self.kind {
            MediaKind::Audio => FlvTagType::Audio,
            MediaKind::Video => FlvTagType::Video,
        };
        FlvTag::new(tag_type, self.dts_ms.max(0) as u32, self.data.clone())
    }

    pub fn is_sequence_header(&self) -> bool {
        self.data.len() >= 2
            && self.data[1] == 0
            && match self.kind {
                MediaKind::Audio => self.data[0] >> 4 == AudioFormat::Aac as u8,
                MediaKind::Video => self.data[0] & 0x0F == VideoCodec::Avc as u8,
            }
    }

    pub fn with_discontinuity(mut self) -> Self {
        self.discontinuity = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_from_avc_tag() {
        let tag = FlvTag::video(1000, Bytes::from_static(&[0x17, 0x01, 0x00, 0x00, 0x28, 0xAA]));
        let packet = Packet::from_tag(0, &tag).unwrap();
        assert_eq!(packet.kind, MediaKind::Video);
        assert_eq!(packet.dts_ms, 1000);
        assert_eq!(packet.pts_ms, 1040);
        assert!(packet.keyframe);
        assert!(!packet.is_sequence_header());
        assert_eq!(packet.to_tag().timestamp, 1000);
        assert_eq!(packet.to_tag().data, tag.data);

        let script = FlvTag::script(0, Bytes::from_static(&[0x05]));
        assert!(Packet::from_tag(0, &script).is_none());
    }

    #[test]
    fn test_sequence_header_packets() {
        let avc = FlvTag::video(0, Bytes::from_static(&[0x17, 0x00, 0, 0, 0, 1, 2]));
        assert!(Packet::from_tag(0, &avc).unwrap().is_sequence_header());
        let aac = FlvTag::audio(0, Bytes::from_static(&[0xAF, 0x00, 0x12, 0x10]));
        assert!(Packet::from_tag(1, &aac).unwrap().is_sequence_header());
        let pcm = FlvTag::audio(0, Bytes::from_static(&[0x3E, 0x00, 0x00]));
        assert!(!Packet::from_tag(1, &pcm).unwrap().is_sequence_header());
    }

    #[test]
    fn test_stream_info_audio() {
        let pcm = FlvTag::audio(0, Bytes::from_static(&[0x3E, 0, 0]));
        let info = StreamInfo::from_tag(1, &pcm).unwrap();
        assert_eq!(info.codec, Codec::Audio(AudioFormat::LinearPcmLe));
        assert_eq!(info.kind(), MediaKind::Audio);
        assert_eq!(info.sample_rate, 44100);
        assert_eq!(info.channels, 1);
        assert_eq!(info.sample_bits, 16);

        let mut aac = StreamInfo::from_tag(1, &FlvTag::audio(0, Bytes::from_static(&[0xAF, 0x01]))).unwrap();
        aac.update_from_tag(&FlvTag::audio(0, Bytes::from_static(&[0xAF, 0x00, 0x11, 0x88])));
        assert_eq!(aac.sample_rate, 48000);
        assert_eq!(aac.channels, 1);
        assert_eq!(aac.codec.name(), "aac");
    }

    #[test]
    fn test_stream_info_screen_video_dimensions() {
        // 320x240, block size nibbles zero
        let tag = FlvTag::video(0, Bytes::from_static(&[0x13, 0x01, 0x40, 0x00, 0xF0]));
        let info = StreamInfo::from_tag(0, &tag).unwrap();
        assert_eq!((info.width, info.height), (320, 240));
        assert_eq!(info.codec.name(), "flashsv");
    }

    #[test]
    fn test_media_info_metadata() {
        let avc = FlvTag::video(0, Bytes::from_static(&[0x17, 0x00, 0, 0, 0]));
        let mut info = MediaInfo {
            streams: vec![StreamInfo::from_tag(0, &avc).unwrap()],
            ..Default::default()
        };
        let meta = AmfValue::ecma_array([
            ("duration", AmfValue::Number(12.5)),
            ("width", AmfValue::Number(1280.0)),
            ("height", AmfValue::Number(720.0)),
            ("framerate", AmfValue::Number(30.0)),
        ]);
        info.apply_metadata(&meta);
        assert_eq!(info.duration_ms, Some(12_500));
        let video = info.stream(MediaKind::Video).unwrap();
        assert_eq!((video.width, video.height), (1280, 720));
        assert_eq!(video.frame_rate, 30.0);
        assert!(!info.has(MediaKind::Audio));
    }

    #[test]
    fn test_unknown_codec() {
        let tag = FlvTag::video(0, Bytes::from_static(&[0x1C, 0x00]));
        assert_eq!(
            Codec::from_tag(&tag),
            Some(Codec::Unknown {
                kind: MediaKind::Video,
                id: 12
            })
        );
    }
}
