//! Pixel format conversion and aspect-preserving scaling
//!
//! Nearest-neighbour sampling; BT.601 studio-range YUV.

use crate::error::{Error, Result};
use crate::media::{PixelFormat, VideoFrame};

/// Destination rectangle inside the output picture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Largest rectangle with the source aspect ratio that fits the output,
/// centred. The remainder is letterbox (top/bottom) or pillarbox bars.
pub fn fit(src_w: u32, src_h: u32, dst_w: u32, dst_h: u32) -> Rect {
    if src_w == 0 || src_h == 0 || dst_w == 0 || dst_h == 0 {
        return Rect {
            x: 0,
            y: 0,
            width: 0,
            height: 0,
        };
    }
    let (sw, sh, dw, dh) = (src_w as u64, src_h as u64, dst_w as u64, dst_h as u64);
    // Compare dst_w/dst_h against src_w/src_h without floats
    let (width, height) = if dw * sh <= dh * sw {
        (dw, (dw * sh / sw).max(1))
    } else {
        ((dh * sw / sh).max(1), dh)
    };
    Rect {
        x: ((dw - width) / 2) as u32,
        y: ((dh - height) / 2) as u32,
        width: width as u32,
        height: height as u32,
    }
}

/// BT.601 RGB to studio-range YUV
pub fn rgb_to_yuv(r: u8, g: u8, b: u8) -> (u8, u8, u8) {
    let (r, g, b) = (r as i32, g as i32, b as i32);
    let y = ((66 * r + 129 * g + 25 * b + 128) >> 8) + 16;
    let u = ((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128;
    let v = ((112 * r - 94 * g - 18 * b + 128) >> 8) + 128;
    (clamp(y), clamp(u), clamp(v))
}

/// Studio-range YUV to BT.601 RGB
pub fn yuv_to_rgb(y: u8, u: u8, v: u8) -> (u8, u8, u8) {
    let c = y as i32 - 16;
    let d = u as i32 - 128;
    let e = v as i32 - 128;
    let r = (298 * c + 409 * e + 128) >> 8;
    let g = (298 * c - 100 * d - 208 * e + 128) >> 8;
    let b = (298 * c + 516 * d + 128) >> 8;
    (clamp(r), clamp(g), clamp(b))
}

fn clamp(v: i32) -> u8 {
    v.clamp(0, 255) as u8
}

/// RGB of pixel (x, y)
fn read_rgb(frame: &VideoFrame, x: usize, y: usize) -> (u8, u8, u8) {
    let w = frame.width as usize;
    let d = &frame.data;
    match frame.format {
        PixelFormat::Bgr24 => {
            let i = (y * w + x) * 3;
            (d[i + 2], d[i + 1], d[i])
        }
        PixelFormat::Rgb24 => {
            let i = (y * w + x) * 3;
            (d[i], d[i + 1], d[i + 2])
        }
        PixelFormat::Rgba => {
            let i = (y * w + x) * 4;
            (d[i], d[i + 1], d[i + 2])
        }
        PixelFormat::Yuv420p => {
            let h = frame.height as usize;
            let cw = w.div_ceil(2);
            let ch = h.div_ceil(2);
            let ci = (y / 2) * cw + x / 2;
            let luma = d[y * w + x];
            let u = d[w * h + ci];
            let v = d[w * h + cw * ch + ci];
            yuv_to_rgb(luma, u, v)
        }
    }
}

/// Writes pixels of one output picture
struct Writer<'a> {
    format: PixelFormat,
    width: usize,
    height: usize,
    out: &'a mut [u8],
}

impl Writer<'_> {
    fn put(&mut self, x: usize, y: usize, (r, g, b): (u8, u8, u8)) {
        let w = self.width;
        match self.format {
            PixelFormat::Bgr24 => {
                let i = (y * w + x) * 3;
                self.out[i..i + 3].copy_from_slice(&[b, g, r]);
            }
            PixelFormat::Rgb24 => {
                let i = (y * w + x) * 3;
                self.out[i..i + 3].copy_from_slice(&[r, g, b]);
            }
            PixelFormat::Rgba => {
                let i = (y * w + x) * 4;
                self.out[i..i + 4].copy_from_slice(&[r, g, b, 255]);
            }
            PixelFormat::Yuv420p => {
                let (luma, u, v) = rgb_to_yuv(r, g, b);
                self.out[y * w + x] = luma;
                // Chroma from the top-left pixel of each 2x2 block
                if x % 2 == 0 && y % 2 == 0 {
                    let cw = w.div_ceil(2);
                    let ch = self.height.div_ceil(2);
                    let ci = (y / 2) * cw + x / 2;
                    let plane = w * self.height;
                    self.out[plane + ci] = u;
                    self.out[plane + cw * ch + ci] = v;
                }
            }
        }
    }
}

/// Fill `out` with black in `format`
pub fn fill_black(format: PixelFormat, width: u32, height: u32, out: &mut Vec<u8>) {
    let blank = VideoFrame::blank(width, height, format);
    out.clear();
    out.extend_from_slice(&blank.data);
}

/// Scale `frame` into a `dst_w` x `dst_h` picture of `dst_format`,
/// preserving aspect ratio with black bars. `out` is reused across calls.
pub fn scale_into(
    frame: &VideoFrame,
    dst_w: u32,
    dst_h: u32,
    dst_format: PixelFormat,
    out: &mut Vec<u8>,
) -> Result<Rect> {
    if !frame.is_valid() {
        return Err(Error::InvalidState(format!(
            "{}x{} {:?} frame with {} bytes",
            frame.width,
            frame.height,
            frame.format,
            frame.data.len()
        )));
    }
    fill_black(dst_format, dst_w, dst_h, out);
    let rect = fit(frame.width, frame.height, dst_w, dst_h);
    if rect.width == 0 {
        return Ok(rect);
    }

    // Same size, same format: a straight copy
    if rect.width == frame.width && rect.height == frame.height && dst_format == frame.format
        && dst_w == frame.width && dst_h == frame.height
    {
        let n = out.len();
        out.copy_from_slice(&frame.data[..n]);
        return Ok(rect);
    }

    let (sw, sh) = (frame.width as usize, frame.height as usize);
    let mut writer = Writer {
        format: dst_format,
        width: dst_w as usize,
        height: dst_h as usize,
        out: out.as_mut_slice(),
    };
    for dy in 0..rect.height as usize {
        let sy = dy * sh / rect.height as usize;
        for dx in 0..rect.width as usize {
            let sx = dx * sw / rect.width as usize;
            let rgb = read_rgb(frame, sx, sy);
            writer.put(rect.x as usize + dx, rect.y as usize + dy, rgb);
        }
    }
    Ok(rect)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(width: u32, height: u32, format: PixelFormat, data: Vec<u8>) -> VideoFrame {
        VideoFrame {
            width,
            height,
            format,
            pts_ms: 0,
            discontinuity: false,
            data,
        }
    }

    #[test]
    fn test_fit_letterbox_and_pillarbox() {
        // 16:9 into 4:3 gets bars top and bottom
        assert_eq!(
            fit(1920, 1080, 640, 480),
            Rect {
                x: 0,
                y: 60,
                width: 640,
                height: 360
            }
        );
        // 4:3 into 16:9 gets bars left and right
        assert_eq!(
            fit(640, 480, 1280, 720),
            Rect {
                x: 160,
                y: 0,
                width: 960,
                height: 720
            }
        );
        assert_eq!(fit(100, 100, 100, 100).width, 100);
        assert_eq!(fit(0, 10, 10, 10).width, 0);
    }

    #[test]
    fn test_yuv_round_trip_is_close() {
        for &(r, g, b) in &[(0, 0, 0), (255, 255, 255), (255, 0, 0), (12, 200, 90)] {
            let (y, u, v) = rgb_to_yuv(r, g, b);
            let (r2, g2, b2) = yuv_to_rgb(y, u, v);
            assert!((r as i32 - r2 as i32).abs() <= 3, "{:?}", (r, r2));
            assert!((g as i32 - g2 as i32).abs() <= 3, "{:?}", (g, g2));
            assert!((b as i32 - b2 as i32).abs() <= 3, "{:?}", (b, b2));
        }
        assert_eq!(rgb_to_yuv(0, 0, 0), (16, 128, 128));
    }

    #[test]
    fn test_bgr_to_rgba_same_size() {
        let src = frame(2, 1, PixelFormat::Bgr24, vec![1, 2, 3, 4, 5, 6]);
        let mut out = Vec::new();
        scale_into(&src, 2, 1, PixelFormat::Rgba, &mut out).unwrap();
        assert_eq!(out, vec![3, 2, 1, 255, 6, 5, 4, 255]);
    }

    #[test]
    fn test_identity_copy() {
        let src = frame(2, 2, PixelFormat::Rgb24, (0..12).collect());
        let mut out = Vec::new();
        scale_into(&src, 2, 2, PixelFormat::Rgb24, &mut out).unwrap();
        assert_eq!(out, src.data);
    }

    #[test]
    fn test_upscale_with_pillarbox() {
        // 1x1 red into 3x1: centre pixel red, bars black
        let src = frame(1, 1, PixelFormat::Rgb24, vec![255, 0, 0]);
        let mut out = vec![0xAA; 3];
        let rect = scale_into(&src, 3, 1, PixelFormat::Rgb24, &mut out).unwrap();
        assert_eq!(rect, Rect { x: 1, y: 0, width: 1, height: 1 });
        assert_eq!(out, vec![0, 0, 0, 255, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_downscale_nearest() {
        // 4x2 to 2x1 picks columns 0 and 2 of row 0
        let src = frame(
            4,
            2,
            PixelFormat::Rgb24,
            vec![
                10, 0, 0, 20, 0, 0, 30, 0, 0, 40, 0, 0, //
                50, 0, 0, 60, 0, 0, 70, 0, 0, 80, 0, 0,
            ],
        );
        let mut out = Vec::new();
        scale_into(&src, 2, 1, PixelFormat::Rgb24, &mut out).unwrap();
        assert_eq!(out, vec![10, 0, 0, 30, 0, 0]);
    }

    #[test]
    fn test_to_yuv420p() {
        let src = frame(2, 2, PixelFormat::Rgb24, vec![255; 12]);
        let mut out = Vec::new();
        scale_into(&src, 2, 2, PixelFormat::Yuv420p, &mut out).unwrap();
        assert_eq!(out.len(), 6);
        assert_eq!(&out[..4], &[235, 235, 235, 235]);
        assert_eq!(&out[4..], &[128, 128]);
    }

    #[test]
    fn test_short_buffer_rejected() {
        let src = frame(4, 4, PixelFormat::Bgr24, vec![0; 10]);
        let mut out = Vec::new();
        assert!(scale_into(&src, 4, 4, PixelFormat::Bgr24, &mut out).is_err());
    }
}
