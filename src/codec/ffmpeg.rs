//! FFmpeg-backed decoders (feature `ffmpeg`)
//!
//! Covers the FLV codecs the built-in set cannot decode: AVC, AAC and MP3.
//! FLV framing is stripped here; FFmpeg sees raw AVCC access units, raw AAC
//! frames and MP3 frames, with the sequence header as codec extradata.
//! Video comes out as BGR24, audio as interleaved S16.

use bytes::Bytes;
use ffmpeg_next as av;

use av::codec::{self as avcodec, Id};
use av::format::{sample::Type as SampleType, Pixel, Sample};
use av::software::scaling;
use av::util::frame;

use crate::codec::{Decoder, DecoderFactory, FrameOutput};
use crate::error::{Error, Result};
use crate::media::flv::{AudioFormat, VideoCodec};
use crate::media::{AudioFrame, Codec, Frame, Packet, PixelFormat, StreamInfo, VideoFrame};

/// Factory for AVC, AAC and MP3 streams
#[derive(Debug, Clone, Copy, Default)]
pub struct FfmpegDecoders;

impl FfmpegDecoders {
    pub fn supports(codec: &Codec) -> bool {
        Framing::for_codec(codec).is_some()
    }
}

impl DecoderFactory for FfmpegDecoders {
    fn create(&self, stream: &StreamInfo) -> Result<Box<dyn Decoder>> {
        let framing = Framing::for_codec(&stream.codec).ok_or_else(|| {
            Error::decode(stream.index, format!("no FFmpeg decoder for {}", stream.codec.name()))
        })?;
        av::init().map_err(|e| Error::decode(stream.index, format!("FFmpeg init failed: {}", e)))?;
        Ok(Box::new(FfmpegDecoder::new(stream, framing)))
    }
}

/// How a codec sits inside an FLV tag body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Framing {
    /// Header byte, AVCPacketType, 24-bit composition time
    Avc,
    /// Header byte, AACPacketType
    Aac,
    /// Header byte
    Mp3,
}

#[derive(Debug, PartialEq)]
enum Payload {
    Config(Bytes),
    Media(Bytes),
    Skip,
}

impl Framing {
    fn for_codec(codec: &Codec) -> Option<Self> {
        match codec {
            Codec::Video(VideoCodec::Avc) => Some(Framing::Avc),
            Codec::Audio(AudioFormat::Aac) => Some(Framing::Aac),
            Codec::Audio(AudioFormat::Mp3) | Codec::Audio(AudioFormat::Mp38k) => Some(Framing::Mp3),
            _ => None,
        }
    }

    fn id(self) -> Id {
        match self {
            Framing::Avc => Id::H264,
            Framing::Aac => Id::AAC,
            Framing::Mp3 => Id::MP3,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Framing::Avc => "ffmpeg-h264",
            Framing::Aac => "ffmpeg-aac",
            Framing::Mp3 => "ffmpeg-mp3",
        }
    }

    fn split(self, data: &Bytes) -> Payload {
        let (header_len, packet_type) = match self {
            Framing::Avc => (5, data.get(1).copied()),
            Framing::Aac => (2, data.get(1).copied()),
            Framing::Mp3 => (1, Some(1)),
        };
        if data.len() <= header_len {
            return Payload::Skip;
        }
        match packet_type {
            Some(0) => Payload::Config(data.slice(header_len..)),
            Some(1) => Payload::Media(data.slice(header_len..)),
            // AVC end of sequence
            _ => Payload::Skip,
        }
    }
}

enum Opened {
    Video(avcodec::decoder::Video),
    Audio(avcodec::decoder::Audio),
}

impl Opened {
    fn send_packet(&mut self, packet: &av::Packet) -> std::result::Result<(), av::Error> {
        match self {
            Opened::Video(d) => d.send_packet(packet),
            Opened::Audio(d) => d.send_packet(packet),
        }
    }

    fn send_eof(&mut self) -> std::result::Result<(), av::Error> {
        match self {
            Opened::Video(d) => d.send_eof(),
            Opened::Audio(d) => d.send_eof(),
        }
    }

    fn flush(&mut self) {
        match self {
            Opened::Video(d) => d.flush(),
            Opened::Audio(d) => d.flush(),
        }
    }
}

struct Scaler {
    context: scaling::Context,
    input: (Pixel, u32, u32),
}

/// FFmpeg state of one decoder
struct Native {
    opened: Option<Opened>,
    scaler: Option<Scaler>,
}

// SAFETY: the codec and scaler contexts are owned by one decoder, which is
// driven by a single decode thread at a time and never shares them.
unsafe impl Send for Native {}

/// One FFmpeg decoder context fed with FLV packets
pub struct FfmpegDecoder {
    stream: usize,
    framing: Framing,
    extradata: Option<Bytes>,
    native: Native,
    output: FrameOutput,
}

impl FfmpegDecoder {
    fn new(stream: &StreamInfo, framing: Framing) -> Self {
        Self {
            stream: stream.index,
            framing,
            extradata: stream.extradata.clone(),
            native: Native {
                opened: None,
                scaler: None,
            },
            output: FrameOutput::new(),
        }
    }

    fn fail(&self, what: &str, e: av::Error) -> Error {
        failure(self.stream, self.framing, what, e)
    }

    fn open(&mut self) -> Result<()> {
        if self.native.opened.is_some() {
            return Ok(());
        }
        let codec = avcodec::decoder::find(self.framing.id())
            .ok_or_else(|| Error::decode(self.stream, format!("{} not built into FFmpeg", self.framing.name())))?;
        let mut context = avcodec::context::Context::new_with_codec(codec);
        if let Some(extradata) = &self.extradata {
            set_extradata(&mut context, extradata);
        }
        let decoder = context.decoder();
        let opened = match self.framing {
            Framing::Avc => Opened::Video(decoder.video().map_err(|e| self.fail("open", e))?),
            Framing::Aac | Framing::Mp3 => Opened::Audio(decoder.audio().map_err(|e| self.fail("open", e))?),
        };
        tracing::debug!(
            stream = self.stream,
            codec = self.framing.name(),
            extradata = self.extradata.as_ref().map_or(0, |b| b.len()),
            "FFmpeg decoder opened"
        );
        self.native.opened = Some(opened);
        Ok(())
    }

    /// Move every frame FFmpeg has ready into the output
    fn drain(&mut self) -> Result<()> {
        let (stream, framing) = (self.stream, self.framing);
        let Native { opened, scaler } = &mut self.native;
        let Some(opened) = opened.as_mut() else {
            return Ok(());
        };
        loop {
            let received = match opened {
                Opened::Video(d) => {
                    let mut decoded = frame::Video::empty();
                    match d.receive_frame(&mut decoded) {
                        Ok(()) => {
                            let picture = to_bgr(scaler, &decoded).map_err(|e| failure(stream, framing, "scale", e))?;
                            Some(Frame::Video(picture))
                        }
                        Err(e) => drained(e).map_err(|e| failure(stream, framing, "receive", e))?,
                    }
                }
                Opened::Audio(d) => {
                    let mut decoded = frame::Audio::empty();
                    match d.receive_frame(&mut decoded) {
                        Ok(()) => to_s16(&decoded).map(Frame::Audio),
                        Err(e) => drained(e).map_err(|e| failure(stream, framing, "receive", e))?,
                    }
                }
            };
            match received {
                Some(frame) => self.output.emit(frame),
                None => return Ok(()),
            }
        }
    }
}

impl Decoder for FfmpegDecoder {
    fn name(&self) -> &'static str {
        self.framing.name()
    }

    fn submit(&mut self, packet: &Packet) -> Result<()> {
        if packet.discontinuity {
            self.output.discontinuity();
            if let Some(opened) = self.native.opened.as_mut() {
                opened.flush();
            }
        }
        let payload = match self.framing.split(&packet.data) {
            Payload::Skip => return Ok(()),
            Payload::Config(config) => {
                if self.extradata.as_ref() != Some(&config) {
                    // New parameters: reopen on the next media packet
                    self.extradata = Some(config);
                    self.native.opened = None;
                }
                return Ok(());
            }
            Payload::Media(payload) => payload,
        };

        self.open()?;
        let mut av_packet = av::Packet::copy(&payload);
        av_packet.set_pts(Some(packet.pts_ms));
        av_packet.set_dts(Some(packet.dts_ms));

        let Some(opened) = self.native.opened.as_mut() else {
            return Ok(());
        };
        match opened.send_packet(&av_packet) {
            Ok(()) => {}
            Err(av::Error::InvalidData) => {
                tracing::debug!(stream = self.stream, pts = packet.pts_ms, "FFmpeg skipped corrupt packet");
                return Ok(());
            }
            Err(e) => return Err(self.fail("send", e)),
        }
        self.drain()
    }

    fn retrieve(&mut self) -> Option<Frame> {
        self.output.next()
    }

    fn flush(&mut self) -> Result<()> {
        let Some(opened) = self.native.opened.as_mut() else {
            return Ok(());
        };
        match opened.send_eof() {
            Ok(()) | Err(av::Error::Eof) => {}
            Err(e) => return Err(self.fail("flush", e)),
        }
        self.drain()
    }

    fn reset(&mut self) {
        if let Some(opened) = self.native.opened.as_mut() {
            opened.flush();
        }
        self.output.clear();
        self.output.discontinuity();
    }
}

fn failure(stream: usize, framing: Framing, what: &str, e: av::Error) -> Error {
    Error::decode(stream, format!("{} {}: {}", framing.name(), what, e))
}

/// `Ok(None)` when FFmpeg simply has nothing more for now
fn drained<T>(e: av::Error) -> std::result::Result<Option<T>, av::Error> {
    match e {
        av::Error::Eof => Ok(None),
        av::Error::Other { errno } if errno == av::util::error::EAGAIN => Ok(None),
        other => Err(other),
    }
}

fn set_extradata(context: &mut avcodec::context::Context, extradata: &[u8]) {
    let padding = av::ffi::AV_INPUT_BUFFER_PADDING_SIZE as usize;
    // SAFETY: the buffer is allocated with av_mallocz as FFmpeg requires and
    // is owned (and freed) by the codec context from here on.
    unsafe {
        let buffer = av::ffi::av_mallocz(extradata.len() + padding) as *mut u8;
        if buffer.is_null() {
            return;
        }
        std::ptr::copy_nonoverlapping(extradata.as_ptr(), buffer, extradata.len());
        let raw = context.as_mut_ptr();
        (*raw).extradata = buffer;
        (*raw).extradata_size = extradata.len() as i32;
    }
}

fn frame_pts(timestamp: Option<i64>, pts: Option<i64>) -> i64 {
    timestamp.or(pts).unwrap_or(-1)
}

fn to_bgr(slot: &mut Option<Scaler>, decoded: &frame::Video) -> std::result::Result<VideoFrame, av::Error> {
    let input = (decoded.format(), decoded.width(), decoded.height());
    let (_, width, height) = input;
    if slot.as_ref().map_or(true, |s| s.input != input) {
        let context = scaling::Context::get(
            input.0,
            width,
            height,
            Pixel::BGR24,
            width,
            height,
            scaling::Flags::BILINEAR,
        )?;
        *slot = Some(Scaler { context, input });
    }
    let Some(scaler) = slot.as_mut() else {
        return Err(av::Error::Bug);
    };

    let mut bgr = frame::Video::empty();
    scaler.context.run(decoded, &mut bgr)?;
    let row = width as usize * 3;
    let stride = bgr.stride(0);
    let plane = bgr.data(0);
    let mut data = Vec::with_capacity(row * height as usize);
    for y in 0..height as usize {
        let start = y * stride;
        data.extend_from_slice(&plane[start..start + row]);
    }
    Ok(VideoFrame {
        width,
        height,
        format: PixelFormat::Bgr24,
        pts_ms: frame_pts(decoded.timestamp(), decoded.pts()),
        discontinuity: false,
        data,
    })
}

fn to_s16(decoded: &frame::Audio) -> Option<AudioFrame> {
    let channels = decoded.channels() as usize;
    let frames = decoded.samples();
    if channels == 0 || frames == 0 {
        return None;
    }
    let samples = match decoded.format() {
        Sample::U8(layout) => interleave(decoded, layout, channels, frames, 1, |b| ((b[0] as i16) - 128) << 8),
        Sample::I16(layout) => interleave(decoded, layout, channels, frames, 2, |b| i16::from_ne_bytes([b[0], b[1]])),
        Sample::I32(layout) => interleave(decoded, layout, channels, frames, 4, |b| {
            (i32::from_ne_bytes([b[0], b[1], b[2], b[3]]) >> 16) as i16
        }),
        Sample::F32(layout) => interleave(decoded, layout, channels, frames, 4, |b| {
            float_to_s16(f32::from_ne_bytes([b[0], b[1], b[2], b[3]]) as f64)
        }),
        Sample::F64(layout) => interleave(decoded, layout, channels, frames, 8, |b| {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(b);
            float_to_s16(f64::from_ne_bytes(raw))
        }),
        other => {
            tracing::warn!(format = ?other, "Unsupported FFmpeg sample format");
            return None;
        }
    };
    Some(AudioFrame {
        sample_rate: decoded.rate(),
        channels: channels as u16,
        pts_ms: frame_pts(decoded.timestamp(), decoded.pts()),
        discontinuity: false,
        samples,
    })
}

fn float_to_s16(v: f64) -> i16 {
    (v.clamp(-1.0, 1.0) * i16::MAX as f64) as i16
}

fn interleave(
    decoded: &frame::Audio,
    layout: SampleType,
    channels: usize,
    frames: usize,
    width: usize,
    read: impl Fn(&[u8]) -> i16,
) -> Vec<i16> {
    let mut out = Vec::with_capacity(frames * channels);
    for i in 0..frames {
        for c in 0..channels {
            let (plane, offset) = match layout {
                SampleType::Packed => (0, (i * channels + c) * width),
                SampleType::Planar => (c, i * width),
            };
            let value = decoded
                .data(plane)
                .get(offset..offset + width)
                .map_or(0, &read);
            out.push(value);
        }
    }
    out
}
