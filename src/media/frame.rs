//! Decoded frames

/// Pixel layout of a video frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Bgr24,
    Rgb24,
    Rgba,
    /// Planar Y, U, V with 2x2 chroma subsampling
    Yuv420p,
}

impl PixelFormat {
    /// Bytes needed for a `width` x `height` picture
    pub fn frame_size(&self, width: u32, height: u32) -> usize {
        let (w, h) = (width as usize, height as usize);
        match self {
            PixelFormat::Bgr24 | PixelFormat::Rgb24 => w * h * 3,
            PixelFormat::Rgba => w * h * 4,
            PixelFormat::Yuv420p => {
                let (cw, ch) = (w.div_ceil(2), h.div_ceil(2));
                w * h + 2 * cw * ch
            }
        }
    }

    /// Bytes per pixel for packed formats
    pub fn bytes_per_pixel(&self) -> Option<usize> {
        match self {
            PixelFormat::Bgr24 | PixelFormat::Rgb24 => Some(3),
            PixelFormat::Rgba => Some(4),
            PixelFormat::Yuv420p => None,
        }
    }
}

/// Decoded picture
#[derive(Debug, Clone, PartialEq)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// Milliseconds; negative when the source had no usable timing
    pub pts_ms: i64,
    pub discontinuity: bool,
    /// Rows top to bottom, tightly packed
    pub data: Vec<u8>,
}

impl VideoFrame {
    /// Black frame (studio-range black for YUV)
    pub fn blank(width: u32, height: u32, format: PixelFormat) -> Self {
        let mut data = vec![0u8; format.frame_size(width, height)];
        if format == PixelFormat::Yuv420p {
            let luma = (width * height) as usize;
            data[..luma].fill(16);
            data[luma..].fill(128);
        } else if format == PixelFormat::Rgba {
            data.chunks_exact_mut(4).for_each(|px| px[3] = 255);
        }
        Self {
            width,
            height,
            format,
            pts_ms: 0,
            discontinuity: false,
            data,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.width > 0 && self.height > 0 && self.data.len() >= self.format.frame_size(self.width, self.height)
    }
}

/// Decoded audio: signed 16-bit interleaved samples
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    pub sample_rate: u32,
    pub channels: u16,
    pub pts_ms: i64,
    pub discontinuity: bool,
    pub samples: Vec<i16>,
}

impl AudioFrame {
    /// Samples per channel
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels as usize
        }
    }

    pub fn duration_ms(&self) -> f64 {
        if self.sample_rate == 0 {
            0.0
        } else {
            self.frames() as f64 * 1000.0 / self.sample_rate as f64
        }
    }

    /// PTS just past the last sample
    pub fn end_pts_ms(&self) -> i64 {
        self.pts_ms + self.duration_ms().round() as i64
    }
}

/// Output of a decoder
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Video(VideoFrame),
    Audio(AudioFrame),
}

impl Frame {
    pub fn pts_ms(&self) -> i64 {
        match self {
            Frame::Video(f) => f.pts_ms,
            Frame::Audio(f) => f.pts_ms,
        }
    }

    pub fn discontinuity(&self) -> bool {
        match self {
            Frame::Video(f) => f.discontinuity,
            Frame::Audio(f) => f.discontinuity,
        }
    }

    pub fn set_discontinuity(&mut self) {
        match self {
            Frame::Video(f) => f.discontinuity = true,
            Frame::Audio(f) => f.discontinuity = true,
        }
    }
}
