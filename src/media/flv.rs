//! FLV container: file header, tag framing and tag body inspection
//!
//! An RTMP audio/video message carries exactly one FLV tag body, so the
//! same [`FlvTag`] type flows from a local file, from the network and back
//! out to a publisher.
//!
//! File layout:
//! ```text
//! +-----------+------------+-------------------------+---------+-----
//! | Header(9) | PrevSize0  | TagHeader(11) | Body(N) | PrevSize| ...
//! +-----------+------------+-------------------------+---------+-----
//!
//! TagHeader: Type(1) DataSize(3) Timestamp(3) TimestampExt(1) StreamId(3)
//! ```
//!
//! Video body:
//! ```text
//! +----------+----------+
//! | FrameType| CodecID  | CodecData...
//! | (4 bits) | (4 bits) |
//! +----------+----------+
//! ```
//!
//! Audio body:
//! ```text
//! +-----------+---------+----------+----------+
//! |SoundFormat|SoundRate|SoundSize |SoundType | AudioData...
//! | (4 bits)  | (2 bits)| (1 bit)  | (1 bit)  |
//! +-----------+---------+----------+----------+
//! ```

use std::io::{self, ErrorKind, Read, Seek, SeekFrom, Write};

use byteorder::{BigEndian, ByteOrder, ReadBytesExt, WriteBytesExt};
use bytes::Bytes;

use crate::amf::{amf0, AmfValue};
use crate::error::{AmfError, Error, MediaError, Result};
use crate::protocol::constants::{CMD_ON_METADATA, CMD_SET_DATA_FRAME};

/// `FLV`
pub const FLV_SIGNATURE: [u8; 3] = *b"FLV";
pub const FLV_HEADER_SIZE: usize = 9;
pub const TAG_HEADER_SIZE: usize = 11;
/// PreviousTagSize trailer after every tag
pub const PREV_TAG_SIZE_LEN: usize = 4;

/// FLV tag type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlvTagType {
    Audio = 8,
    Video = 9,
    Script = 18,
}

impl FlvTagType {
    /// Ignores the filter/encryption bit
    pub fn from_u8(b: u8) -> Option<Self> {
        match b & 0x1F {
            8 => Some(FlvTagType::Audio),
            9 => Some(FlvTagType::Video),
            18 => Some(FlvTagType::Script),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// 9-byte file header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlvHeader {
    pub version: u8,
    pub has_audio: bool,
    pub has_video: bool,
    /// Offset of the first PreviousTagSize field
    pub data_offset: u32,
}

impl FlvHeader {
    pub fn new(has_audio: bool, has_video: bool) -> Self {
        Self {
            version: 1,
            has_audio,
            has_video,
            data_offset: FLV_HEADER_SIZE as u32,
        }
    }

    /// Parse from the first bytes of a file
    pub fn parse(buf: &[u8]) -> std::result::Result<Self, MediaError> {
        if buf.len() < FLV_HEADER_SIZE || buf[..3] != FLV_SIGNATURE {
            return Err(MediaError::InvalidFlvHeader);
        }
        let flags = buf[4];
        let data_offset = BigEndian::read_u32(&buf[5..9]);
        if (data_offset as usize) < FLV_HEADER_SIZE {
            return Err(MediaError::InvalidFlvHeader);
        }
        Ok(Self {
            version: buf[3],
            has_audio: flags & 0x04 != 0,
            has_video: flags & 0x01 != 0,
            data_offset,
        })
    }

    pub fn write<W: Write>(&self, out: &mut W) -> io::Result<()> {
        out.write_all(&FLV_SIGNATURE)?;
        out.write_u8(self.version)?;
        let mut flags = 0;
        if self.has_audio {
            flags |= 0x04;
        }
        if self.has_video {
            flags |= 0x01;
        }
        out.write_u8(flags)?;
        out.write_u32::<BigEndian>(FLV_HEADER_SIZE as u32)
    }
}

/// 11-byte tag header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagHeader {
    /// Raw type byte; unknown types are skipped by readers
    pub tag_type: u8,
    pub data_size: u32,
    /// Full 32-bit timestamp (lower 24 bits plus extension byte)
    pub timestamp: u32,
    pub stream_id: u32,
}

impl TagHeader {
    pub fn parse(buf: &[u8; TAG_HEADER_SIZE]) -> Self {
        let lower = BigEndian::read_u24(&buf[4..7]);
        Self {
            tag_type: buf[0],
            data_size: BigEndian::read_u24(&buf[1..4]),
            timestamp: ((buf[7] as u32) << 24) | lower,
            stream_id: BigEndian::read_u24(&buf[8..11]),
        }
    }

    pub fn write<W: Write>(&self, out: &mut W) -> io::Result<()> {
        out.write_u8(self.tag_type)?;
        out.write_u24::<BigEndian>(self.data_size)?;
        out.write_u24::<BigEndian>(self.timestamp & 0x00FF_FFFF)?;
        out.write_u8((self.timestamp >> 24) as u8)?;
        out.write_u24::<BigEndian>(self.stream_id)
    }

    pub fn kind(&self) -> Option<FlvTagType> {
        FlvTagType::from_u8(self.tag_type)
    }
}

/// One FLV tag: type, timestamp and body
#[derive(Debug, Clone, PartialEq)]
pub struct FlvTag {
    pub tag_type: FlvTagType,
    /// Decode timestamp in milliseconds
    pub timestamp: u32,
    /// Tag body including the codec header byte
    pub data: Bytes,
}

/// Video frame type (upper 4 bits of first byte)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoFrameType {
    Keyframe = 1,
    InterFrame = 2,
    /// H.263 only
    DisposableInterFrame = 3,
    /// Reserved for server use
    GeneratedKeyframe = 4,
    /// Video info/command frame, carries no picture
    VideoInfoFrame = 5,
}

impl VideoFrameType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match (b >> 4) & 0x0F {
            1 => Some(VideoFrameType::Keyframe),
            2 => Some(VideoFrameType::InterFrame),
            3 => Some(VideoFrameType::DisposableInterFrame),
            4 => Some(VideoFrameType::GeneratedKeyframe),
            5 => Some(VideoFrameType::VideoInfoFrame),
            _ => None,
        }
    }

    pub fn is_keyframe(&self) -> bool {
        matches!(
            self,
            VideoFrameType::Keyframe | VideoFrameType::GeneratedKeyframe
        )
    }
}

/// Video codec ID (lower 4 bits of first byte)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoCodec {
    SorensonH263 = 2,
    ScreenVideo = 3,
    Vp6 = 4,
    Vp6Alpha = 5,
    ScreenVideoV2 = 6,
    Avc = 7,
}

impl VideoCodec {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b & 0x0F {
            2 => Some(VideoCodec::SorensonH263),
            3 => Some(VideoCodec::ScreenVideo),
            4 => Some(VideoCodec::Vp6),
            5 => Some(VideoCodec::Vp6Alpha),
            6 => Some(VideoCodec::ScreenVideoV2),
            7 => Some(VideoCodec::Avc),
            _ => None,
        }
    }
}

/// Audio format (upper 4 bits of first byte)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    /// Linear PCM, platform endian
    LinearPcmPlatform = 0,
    Adpcm = 1,
    Mp3 = 2,
    LinearPcmLe = 3,
    Nellymoser16kMono = 4,
    Nellymoser8kMono = 5,
    Nellymoser = 6,
    G711ALaw = 7,
    G711MuLaw = 8,
    Aac = 10,
    Speex = 11,
    Mp38k = 14,
    DeviceSpecific = 15,
}

impl AudioFormat {
    pub fn from_byte(b: u8) -> Option<Self> {
        match (b >> 4) & 0x0F {
            0 => Some(AudioFormat::LinearPcmPlatform),
            1 => Some(AudioFormat::Adpcm),
            2 => Some(AudioFormat::Mp3),
            3 => Some(AudioFormat::LinearPcmLe),
            4 => Some(AudioFormat::Nellymoser16kMono),
            5 => Some(AudioFormat::Nellymoser8kMono),
            6 => Some(AudioFormat::Nellymoser),
            7 => Some(AudioFormat::G711ALaw),
            8 => Some(AudioFormat::G711MuLaw),
            10 => Some(AudioFormat::Aac),
            11 => Some(AudioFormat::Speex),
            14 => Some(AudioFormat::Mp38k),
            15 => Some(AudioFormat::DeviceSpecific),
            _ => None,
        }
    }
}

/// Audio sample rate field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioSampleRate {
    Rate5512 = 0,
    Rate11025 = 1,
    Rate22050 = 2,
    Rate44100 = 3,
}

impl AudioSampleRate {
    pub fn from_byte(b: u8) -> Self {
        match (b >> 2) & 0x03 {
            0 => AudioSampleRate::Rate5512,
            1 => AudioSampleRate::Rate11025,
            2 => AudioSampleRate::Rate22050,
            _ => AudioSampleRate::Rate44100,
        }
    }

    pub fn to_hz(&self) -> u32 {
        match self {
            AudioSampleRate::Rate5512 => 5512,
            AudioSampleRate::Rate11025 => 11025,
            AudioSampleRate::Rate22050 => 22050,
            AudioSampleRate::Rate44100 => 44100,
        }
    }
}

/// Everything the audio header byte says about the samples
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SoundInfo {
    pub format: Option<AudioFormat>,
    /// Raw 4-bit format id, kept for codecs without an enum variant
    pub format_id: u8,
    pub sample_rate: u32,
    /// 8 or 16
    pub sample_bits: u8,
    pub channels: u8,
}

impl SoundInfo {
    pub fn from_byte(b: u8) -> Self {
        let format = AudioFormat::from_byte(b);
        // Nellymoser and G.711 ignore the rate field
        let sample_rate = match format {
            Some(AudioFormat::Nellymoser16kMono) => 16000,
            Some(AudioFormat::Nellymoser8kMono)
            | Some(AudioFormat::G711ALaw)
            | Some(AudioFormat::G711MuLaw)
            | Some(AudioFormat::Mp38k) => 8000,
            _ => AudioSampleRate::from_byte(b).to_hz(),
        };
        Self {
            format,
            format_id: b >> 4,
            sample_rate,
            sample_bits: if b & 0x02 != 0 { 16 } else { 8 },
            channels: if b & 0x01 != 0 { 2 } else { 1 },
        }
    }
}

impl FlvTag {
    pub fn new(tag_type: FlvTagType, timestamp: u32, data: Bytes) -> Self {
        Self {
            tag_type,
            timestamp,
            data,
        }
    }

    pub fn video(timestamp: u32, data: Bytes) -> Self {
        Self::new(FlvTagType::Video, timestamp, data)
    }

    pub fn audio(timestamp: u32, data: Bytes) -> Self {
        Self::new(FlvTagType::Audio, timestamp, data)
    }

    pub fn script(timestamp: u32, data: Bytes) -> Self {
        Self::new(FlvTagType::Script, timestamp, data)
    }

    /// `onMetaData` script tag
    pub fn metadata(metadata: &AmfValue) -> Self {
        let body = amf0::encode_all(&[AmfValue::from(CMD_ON_METADATA), metadata.clone()]);
        Self::script(0, body)
    }

    pub fn is_video(&self) -> bool {
        self.tag_type == FlvTagType::Video
    }

    pub fn is_audio(&self) -> bool {
        self.tag_type == FlvTagType::Audio
    }

    pub fn is_script(&self) -> bool {
        self.tag_type == FlvTagType::Script
    }

    pub fn video_frame_type(&self) -> Option<VideoFrameType> {
        if self.is_video() && !self.data.is_empty() {
            VideoFrameType::from_byte(self.data[0])
        } else {
            None
        }
    }

    pub fn video_codec(&self) -> Option<VideoCodec> {
        if self.is_video() && !self.data.is_empty() {
            VideoCodec::from_byte(self.data[0])
        } else {
            None
        }
    }

    pub fn audio_format(&self) -> Option<AudioFormat> {
        if self.is_audio() && !self.data.is_empty() {
            AudioFormat::from_byte(self.data[0])
        } else {
            None
        }
    }

    pub fn sound_info(&self) -> Option<SoundInfo> {
        if self.is_audio() && !self.data.is_empty() {
            Some(SoundInfo::from_byte(self.data[0]))
        } else {
            None
        }
    }

    /// Audio tags count as keyframes; video tags by their frame type
    pub fn is_keyframe(&self) -> bool {
        match self.tag_type {
            FlvTagType::Video => self
                .video_frame_type()
                .map(|ft| ft.is_keyframe())
                .unwrap_or(false),
            _ => true,
        }
    }

    pub fn is_avc_sequence_header(&self) -> bool {
        if self.is_video() && self.data.len() >= 2 {
            let codec = VideoCodec::from_byte(self.data[0]);
            codec == Some(VideoCodec::Avc) && self.data[1] == 0
        } else {
            false
        }
    }

    pub fn is_aac_sequence_header(&self) -> bool {
        if self.is_audio() && self.data.len() >= 2 {
            let format = AudioFormat::from_byte(self.data[0]);
            format == Some(AudioFormat::Aac) && self.data[1] == 0
        } else {
            false
        }
    }

    /// Decoder configuration rather than media
    pub fn is_sequence_header(&self) -> bool {
        self.is_avc_sequence_header() || self.is_aac_sequence_header()
    }

    /// AVC composition time offset (PTS - DTS) in milliseconds; zero for
    /// every other kind of tag
    pub fn composition_time(&self) -> i32 {
        if self.video_codec() != Some(VideoCodec::Avc) || self.data.len() < 5 || self.data[1] != 1 {
            return 0;
        }
        let raw = BigEndian::read_u24(&self.data[2..5]);
        // sign-extend 24 bits
        ((raw << 8) as i32) >> 8
    }

    /// Decode the AMF0 values of a script tag
    pub fn script_values(&self) -> std::result::Result<Vec<AmfValue>, AmfError> {
        amf0::decode_all(self.data.clone())
    }

    /// The `onMetaData` object of a script tag, if that is what it carries
    pub fn parse_metadata(&self) -> Option<AmfValue> {
        if !self.is_script() {
            return None;
        }
        let values = match self.script_values() {
            Ok(values) => values,
            Err(e) => {
                tracing::debug!(error = %e, "Undecodable script tag");
                return None;
            }
        };
        let mut iter = values.into_iter();
        let mut name = iter.next()?;
        if name.as_str() == Some(CMD_SET_DATA_FRAME) {
            name = iter.next()?;
        }
        if name.as_str() != Some(CMD_ON_METADATA) {
            return None;
        }
        iter.next()
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }
}

/// Sequential FLV tag reader over a seekable byte source
pub struct FlvReader<R> {
    inner: R,
    header: FlvHeader,
    /// Offset of the next tag header
    position: u64,
    /// Offset of the first tag header
    first_tag: u64,
}

impl<R: Read + Seek> FlvReader<R> {
    /// Read and validate the file header.
    ///
    /// A source that is not FLV fails with `UnsupportedFormat`.
    pub fn new(mut inner: R) -> Result<Self> {
        let mut buf = [0u8; FLV_HEADER_SIZE];
        if !read_full(&mut inner, &mut buf)? {
            return Err(Error::unsupported("file too short for an FLV header"));
        }
        let header = FlvHeader::parse(&buf)
            .map_err(|_| Error::unsupported("missing FLV signature"))?;
        let first_tag = header.data_offset as u64 + PREV_TAG_SIZE_LEN as u64;
        inner.seek(SeekFrom::Start(first_tag))?;
        Ok(Self {
            inner,
            header,
            position: first_tag,
            first_tag,
        })
    }

    pub fn header(&self) -> &FlvHeader {
        &self.header
    }

    /// Offset of the next tag header
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn first_tag_offset(&self) -> u64 {
        self.first_tag
    }

    /// Next audio, video or script tag with its file offset.
    ///
    /// Tags of unknown type are skipped. A truncated trailing tag ends the
    /// stream like a clean end of file.
    pub fn next_tag(&mut self) -> Result<Option<(u64, FlvTag)>> {
        loop {
            let offset = self.position;
            let Some(header) = self.read_tag_header()? else {
                return Ok(None);
            };
            let mut body = vec![0u8; header.data_size as usize];
            if !read_full(&mut self.inner, &mut body)? {
                tracing::warn!(offset, size = header.data_size, "Truncated FLV tag, treating as end of file");
                return Ok(None);
            }
            self.skip_prev_tag_size()?;
            self.position = offset + (TAG_HEADER_SIZE + PREV_TAG_SIZE_LEN) as u64 + header.data_size as u64;

            match header.kind() {
                Some(kind) => return Ok(Some((offset, FlvTag::new(kind, header.timestamp, Bytes::from(body))))),
                None => tracing::trace!(tag_type = header.tag_type, offset, "Skipping unknown FLV tag"),
            }
        }
    }

    /// Next tag header without reading its body, for index building
    pub fn skip_tag(&mut self) -> Result<Option<(u64, TagHeader, u8)>> {
        let offset = self.position;
        let Some(header) = self.read_tag_header()? else {
            return Ok(None);
        };
        // First body byte carries the frame type
        let first = if header.data_size > 0 {
            match self.inner.read_u8() {
                Ok(b) => b,
                Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
                Err(e) => return Err(e.into()),
            }
        } else {
            0
        };
        let next = offset + (TAG_HEADER_SIZE + PREV_TAG_SIZE_LEN) as u64 + header.data_size as u64;
        self.inner.seek(SeekFrom::Start(next))?;
        self.position = next;
        Ok(Some((offset, header, first)))
    }

    /// Continue reading at a tag boundary previously reported by this reader
    pub fn seek_to(&mut self, offset: u64) -> Result<()> {
        let offset = offset.max(self.first_tag);
        self.inner.seek(SeekFrom::Start(offset))?;
        self.position = offset;
        Ok(())
    }

    pub fn rewind(&mut self) -> Result<()> {
        self.seek_to(self.first_tag)
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    fn read_tag_header(&mut self) -> Result<Option<TagHeader>> {
        let mut buf = [0u8; TAG_HEADER_SIZE];
        if !read_full(&mut self.inner, &mut buf)? {
            return Ok(None);
        }
        Ok(Some(TagHeader::parse(&buf)))
    }

    fn skip_prev_tag_size(&mut self) -> Result<()> {
        match self.inner.read_u32::<BigEndian>() {
            Ok(_) => Ok(()),
            // Last tag of a file cut right before its trailer
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// `read_exact` that reports a short read as `false` instead of an error
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// FLV file writer
pub struct FlvWriter<W: Write> {
    inner: W,
    tags: u64,
}

impl<W: Write> FlvWriter<W> {
    /// Write the file header and the leading PreviousTagSize0
    pub fn new(mut inner: W, has_audio: bool, has_video: bool) -> io::Result<Self> {
        FlvHeader::new(has_audio, has_video).write(&mut inner)?;
        inner.write_u32::<BigEndian>(0)?;
        Ok(Self { inner, tags: 0 })
    }

    pub fn write_tag(&mut self, tag: &FlvTag) -> io::Result<()> {
        let header = TagHeader {
            tag_type: tag.tag_type.as_u8(),
            data_size: tag.data.len() as u32,
            timestamp: tag.timestamp,
            stream_id: 0,
        };
        header.write(&mut self.inner)?;
        self.inner.write_all(&tag.data)?;
        self.inner
            .write_u32::<BigEndian>((TAG_HEADER_SIZE + tag.data.len()) as u32)?;
        self.tags += 1;
        Ok(())
    }

    pub fn write_metadata(&mut self, metadata: &AmfValue) -> io::Result<()> {
        self.write_tag(&FlvTag::metadata(metadata))
    }

    pub fn write_audio(&mut self, timestamp: u32, data: Bytes) -> io::Result<()> {
        self.write_tag(&FlvTag::audio(timestamp, data))
    }

    pub fn write_video(&mut self, timestamp: u32, data: Bytes) -> io::Result<()> {
        self.write_tag(&FlvTag::video(timestamp, data))
    }

    pub fn tags_written(&self) -> u64 {
        self.tags
    }

    /// Flush and hand back the sink
    pub fn finish(mut self) -> io::Result<W> {
        self.inner.flush()?;
        Ok(self.inner)
    }
}
