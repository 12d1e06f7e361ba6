//! Screen Video v1 (FLV video codec 3)
//!
//! ```text
//! +--------+----------+-----------+----------+-----------+----------------
//! | FT|CID | BlockW(4)| Width(12) | BlockH(4)| Height(12)| Blocks...
//! +--------+----------+-----------+----------+-----------+----------------
//! Block: Size(u16 BE) then Size bytes of zlib-compressed BGR
//! ```
//!
//! Blocks run left to right, bottom row first; pixels inside a block are
//! stored the same way. A block of size zero is unchanged from the previous
//! frame, so inter frames need the picture the last frame left behind.

use std::io::{Read, Write};

use bytes::{BufMut, Bytes, BytesMut};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::codec::{Decoder, FrameOutput};
use crate::error::{Error, Result};
use crate::media::flv::{VideoCodec, VideoFrameType};
use crate::media::{Frame, Packet, PixelFormat, StreamInfo, VideoFrame};

const FRAME_HEADER_LEN: usize = 5;

pub struct ScreenVideoDecoder {
    stream: usize,
    width: u32,
    height: u32,
    /// BGR24, top row first
    picture: Vec<u8>,
    have_keyframe: bool,
    scratch: Vec<u8>,
    output: FrameOutput,
}

impl ScreenVideoDecoder {
    pub fn new(stream: &StreamInfo) -> Self {
        Self {
            stream: stream.index,
            width: 0,
            height: 0,
            picture: Vec::new(),
            have_keyframe: false,
            scratch: Vec::new(),
            output: FrameOutput::new(),
        }
    }

    fn corrupt(&self, reason: impl Into<String>) -> Error {
        Error::decode(self.stream, reason)
    }

    fn decode_frame(&mut self, data: &[u8], keyframe: bool) -> Result<()> {
        if data.len() < FRAME_HEADER_LEN {
            return Err(self.corrupt("truncated screen video header"));
        }
        let block_w = (((data[1] >> 4) as u32) + 1) * 16;
        let width = (u16::from_be_bytes([data[1], data[2]]) & 0x0FFF) as u32;
        let block_h = (((data[3] >> 4) as u32) + 1) * 16;
        let height = (u16::from_be_bytes([data[3], data[4]]) & 0x0FFF) as u32;
        if width == 0 || height == 0 {
            return Err(self.corrupt("zero picture dimensions"));
        }

        if keyframe {
            if width != self.width || height != self.height {
                tracing::debug!(stream = self.stream, width, height, "Screen video picture size");
                self.width = width;
                self.height = height;
                self.picture = vec![0; PixelFormat::Bgr24.frame_size(width, height)];
            }
        } else if width != self.width || height != self.height {
            return Err(self.corrupt(format!(
                "inter frame is {}x{} but the picture is {}x{}",
                width, height, self.width, self.height
            )));
        }

        let cols = width.div_ceil(block_w);
        let rows = height.div_ceil(block_h);
        let mut pos = FRAME_HEADER_LEN;
        for row in 0..rows {
            for col in 0..cols {
                let Some(size_bytes) = data.get(pos..pos + 2) else {
                    return Err(self.corrupt("truncated block size"));
                };
                let size = u16::from_be_bytes([size_bytes[0], size_bytes[1]]) as usize;
                pos += 2;
                if size == 0 {
                    continue;
                }
                let Some(compressed) = data.get(pos..pos + size) else {
                    return Err(self.corrupt("block runs past the end of the frame"));
                };
                pos += size;

                let bw = block_w.min(width - col * block_w) as usize;
                let bh = block_h.min(height - row * block_h) as usize;
                self.scratch.clear();
                if let Err(e) = ZlibDecoder::new(compressed).read_to_end(&mut self.scratch) {
                    return Err(self.corrupt(format!("block ({}, {}): {}", col, row, e)));
                }
                if self.scratch.len() != bw * bh * 3 {
                    return Err(self.corrupt(format!(
                        "block ({}, {}) holds {} bytes, expected {}",
                        col,
                        row,
                        self.scratch.len(),
                        bw * bh * 3
                    )));
                }

                let stride = width as usize * 3;
                let x0 = (col * block_w) as usize * 3;
                for r in 0..bh {
                    let from_bottom = (row * block_h) as usize + r;
                    let y = height as usize - 1 - from_bottom;
                    let dst = y * stride + x0;
                    let src = r * bw * 3;
                    self.picture[dst..dst + bw * 3].copy_from_slice(&self.scratch[src..src + bw * 3]);
                }
            }
        }
        Ok(())
    }
}

impl Decoder for ScreenVideoDecoder {
    fn name(&self) -> &'static str {
        "flashsv"
    }

    fn submit(&mut self, packet: &Packet) -> Result<()> {
        let Some(&header) = packet.data.first() else {
            return Err(self.corrupt("empty video packet"));
        };
        if VideoCodec::from_byte(header) != Some(VideoCodec::ScreenVideo) {
            return Err(self.corrupt(format!("codec id {} in a screen video stream", header & 0x0F)));
        }
        let frame_type = VideoFrameType::from_byte(header);
        if frame_type == Some(VideoFrameType::VideoInfoFrame) {
            return Ok(());
        }
        if packet.discontinuity {
            self.reset();
        }
        let keyframe = frame_type.map(|t| t.is_keyframe()).unwrap_or(false);
        if !keyframe && !self.have_keyframe {
            tracing::trace!(stream = self.stream, pts = packet.pts_ms, "Skipping inter frame before keyframe");
            return Ok(());
        }

        self.decode_frame(&packet.data, keyframe)?;
        self.have_keyframe = true;
        self.output.emit(Frame::Video(VideoFrame {
            width: self.width,
            height: self.height,
            format: PixelFormat::Bgr24,
            pts_ms: packet.pts_ms,
            discontinuity: false,
            data: self.picture.clone(),
        }));
        Ok(())
    }

    fn retrieve(&mut self) -> Option<Frame> {
        self.output.next()
    }

    fn reset(&mut self) {
        self.have_keyframe = false;
        self.output.clear();
        self.output.discontinuity();
    }
}

/// Encode a BGR24 picture (top row first) as a Screen Video tag body.
///
/// Without `previous` the result is a keyframe; with it, blocks identical
/// to `previous` are sent empty. `block_size` is rounded to a multiple of
/// 16 in 16..=256.
pub fn encode_frame(
    width: u32,
    height: u32,
    block_size: u32,
    bgr: &[u8],
    previous: Option<&[u8]>,
) -> Result<Bytes> {
    let expected = PixelFormat::Bgr24.frame_size(width, height);
    if width == 0 || height == 0 || width > 0x0FFF || height > 0x0FFF || bgr.len() < expected {
        return Err(Error::InvalidState(format!(
            "cannot encode {}x{} from {} bytes",
            width,
            height,
            bgr.len()
        )));
    }
    let block = (block_size / 16).clamp(1, 16) * 16;
    let nibble = (block / 16 - 1) as u16;
    let keyframe = previous.is_none();

    let mut out = BytesMut::new();
    out.put_u8(if keyframe { 0x13 } else { 0x23 });
    out.put_u16((nibble << 12) | width as u16);
    out.put_u16((nibble << 12) | height as u16);

    let stride = width as usize * 3;
    let mut raw = Vec::new();
    for row in 0..height.div_ceil(block) {
        for col in 0..width.div_ceil(block) {
            let bw = block.min(width - col * block) as usize;
            let bh = block.min(height - row * block) as usize;
            raw.clear();
            let mut unchanged = previous.is_some();
            for r in 0..bh {
                let y = height as usize - 1 - ((row * block) as usize + r);
                let start = y * stride + (col * block) as usize * 3;
                let line = &bgr[start..start + bw * 3];
                if let Some(prev) = previous {
                    unchanged &= prev.get(start..start + bw * 3) == Some(line);
                }
                raw.extend_from_slice(line);
            }
            if unchanged {
                out.put_u16(0);
                continue;
            }
            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::fast());
            encoder.write_all(&raw)?;
            let compressed = encoder.finish()?;
            if compressed.len() > u16::MAX as usize {
                return Err(Error::InvalidState("screen video block too large".into()));
            }
            out.put_u16(compressed.len() as u16);
            out.extend_from_slice(&compressed);
        }
    }
    Ok(out.freeze())
}
