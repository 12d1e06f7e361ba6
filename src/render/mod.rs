//! Video output
//!
//! A [`Surface`] is whatever the picture ends up on: a platform window, a
//! texture, or the in-memory [`MemorySurface`]. [`VideoRenderer`] converts
//! and scales each decoded frame to the surface and submits it.

pub mod convert;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::media::{PixelFormat, VideoFrame};

pub use convert::{fit, scale_into, Rect};

/// Destination for decoded pictures
pub trait Surface: Send {
    /// Native size in pixels
    fn size(&self) -> (u32, u32);

    /// Pixel format the surface accepts
    fn format(&self) -> PixelFormat;

    /// `false` once the platform has taken the surface away
    fn is_valid(&self) -> bool;

    /// Show `picture`, already in the surface's format and output size
    fn submit(&mut self, picture: &VideoFrame) -> Result<()>;
}

#[derive(Debug)]
struct MemorySurfaceInner {
    width: u32,
    height: u32,
    format: PixelFormat,
    valid: AtomicBool,
    submitted: AtomicU64,
    last: Mutex<Option<VideoFrame>>,
    presented: Mutex<Vec<i64>>,
}

/// Surface backed by memory. Clones share the same picture, so a test can
/// keep one handle and give the other to the engine.
#[derive(Debug, Clone)]
pub struct MemorySurface {
    inner: Arc<MemorySurfaceInner>,
}

impl MemorySurface {
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            inner: Arc::new(MemorySurfaceInner {
                width,
                height,
                format,
                valid: AtomicBool::new(true),
                submitted: AtomicU64::new(0),
                last: Mutex::new(None),
                presented: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Simulate the platform destroying the surface
    pub fn invalidate(&self) {
        self.inner.valid.store(false, Ordering::Release);
    }

    pub fn frames_submitted(&self) -> u64 {
        self.inner.submitted.load(Ordering::Acquire)
    }

    /// Copy of the most recent picture
    pub fn last_frame(&self) -> Option<VideoFrame> {
        self.inner.last.lock().clone()
    }

    /// PTS of every picture submitted, in order
    pub fn presented_pts(&self) -> Vec<i64> {
        self.inner.presented.lock().clone()
    }
}

impl Surface for MemorySurface {
    fn size(&self) -> (u32, u32) {
        (self.inner.width, self.inner.height)
    }

    fn format(&self) -> PixelFormat {
        self.inner.format
    }

    fn is_valid(&self) -> bool {
        self.inner.valid.load(Ordering::Acquire)
    }

    fn submit(&mut self, picture: &VideoFrame) -> Result<()> {
        if !self.is_valid() {
            return Err(Error::SurfaceLost);
        }
        self.inner.presented.lock().push(picture.pts_ms);
        *self.inner.last.lock() = Some(picture.clone());
        self.inner.submitted.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}

/// Converts frames to a surface's format and size
#[derive(Debug, Default)]
pub struct VideoRenderer {
    /// Output size overriding the surface's own
    viewport: Option<(u32, u32)>,
    scratch: Vec<u8>,
}

impl VideoRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Render at `width` x `height` instead of the surface size. Zero in
    /// either dimension means "use the surface size".
    pub fn with_viewport(width: u32, height: u32) -> Self {
        let viewport = (width > 0 && height > 0).then_some((width, height));
        Self {
            viewport,
            scratch: Vec::new(),
        }
    }

    pub fn output_size(&self, surface: &dyn Surface) -> (u32, u32) {
        self.viewport.unwrap_or_else(|| surface.size())
    }

    /// Convert, scale and submit one frame. An invalid surface fails with
    /// [`Error::SurfaceLost`].
    pub fn present(&mut self, frame: &VideoFrame, surface: &mut dyn Surface) -> Result<()> {
        if !surface.is_valid() {
            return Err(Error::SurfaceLost);
        }
        let (width, height) = self.output_size(surface);
        let format = surface.format();
        scale_into(frame, width, height, format, &mut self.scratch)?;

        let picture = VideoFrame {
            width,
            height,
            format,
            pts_ms: frame.pts_ms,
            discontinuity: frame.discontinuity,
            data: std::mem::take(&mut self.scratch),
        };
        let result = surface.submit(&picture);
        self.scratch = picture.data;
        result
    }
}
