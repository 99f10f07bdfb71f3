//! Frame decoding into packed `0xRRGGBB` pixels

use jpeg_decoder::{Decoder, PixelFormat as JpegPixelFormat};
use thiserror::Error;

use super::frame::{Frame, PixelFormat};

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("jpeg decode failed: {0}")]
    Jpeg(#[from] jpeg_decoder::Error),
    #[error("unsupported jpeg pixel format {0:?}")]
    UnsupportedJpeg(JpegPixelFormat),
    #[error("frame buffer too short: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },
    #[error("jpeg stream has no frame header")]
    MissingHeader,
    #[error("stride {stride} is smaller than a {width}-pixel row")]
    BadStride { stride: u32, width: u32 },
}

/// A decoded image, one packed RGB value per pixel in row-major order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u32>,
}

impl DecodedImage {
    pub fn from_pixels(width: u32, height: u32, pixels: Vec<u32>) -> Self {
        debug_assert_eq!(pixels.len() as u64, u64::from(width) * u64::from(height));
        Self {
            width,
            height,
            pixels,
        }
    }

    pub fn pixel_count(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

#[inline]
pub fn pack_rgb(r: u8, g: u8, b: u8) -> u32 {
    (u32::from(r) << 16) | (u32::from(g) << 8) | u32::from(b)
}

pub fn decode_frame(frame: &Frame) -> Result<DecodedImage, DecodeError> {
    let meta = &frame.meta;
    let data = &frame.data[..];
    match meta.format {
        PixelFormat::Mjpeg => decode_jpeg(data),
        PixelFormat::Rgb24 => decode_packed(data, meta.width, meta.height, meta.stride, 3, |px| {
            pack_rgb(px[0], px[1], px[2])
        }),
        PixelFormat::Bgr24 => decode_packed(data, meta.width, meta.height, meta.stride, 3, |px| {
            pack_rgb(px[2], px[1], px[0])
        }),
        PixelFormat::Rgba32 => decode_packed(data, meta.width, meta.height, meta.stride, 4, |px| {
            pack_rgb(px[0], px[1], px[2])
        }),
        PixelFormat::Yuyv4 => decode_yuyv(data, meta.width, meta.height, meta.stride),
    }
}

fn row_stride(width: u32, stride: u32, bpp: u32) -> Result<usize, DecodeError> {
    let min = width as usize * bpp as usize;
    match stride as usize {
        0 => Ok(min),
        s if s < min => Err(DecodeError::BadStride { stride, width }),
        s => Ok(s),
    }
}

fn check_len(data: &[u8], stride: usize, width: u32, height: u32, bpp: u32) -> Result<(), DecodeError> {
    if height == 0 {
        return Ok(());
    }
    // The last row only needs its pixel bytes, not the padding.
    let expected = stride * (height as usize - 1) + width as usize * bpp as usize;
    if data.len() < expected {
        return Err(DecodeError::Truncated {
            expected,
            actual: data.len(),
        });
    }
    Ok(())
}

fn decode_packed(
    data: &[u8],
    width: u32,
    height: u32,
    stride: u32,
    bpp: u32,
    pack: impl Fn(&[u8]) -> u32,
) -> Result<DecodedImage, DecodeError> {
    let stride = row_stride(width, stride, bpp)?;
    check_len(data, stride, width, height, bpp)?;

    let row_bytes = width as usize * bpp as usize;
    let mut pixels = Vec::with_capacity(width as usize * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        pixels.extend(data[start..start + row_bytes].chunks_exact(bpp as usize).map(&pack));
    }
    Ok(DecodedImage::from_pixels(width, height, pixels))
}

fn decode_yuyv(data: &[u8], width: u32, height: u32, stride: u32) -> Result<DecodedImage, DecodeError> {
    let stride = row_stride(width, stride, 2)?;
    check_len(data, stride, width, height, 2)?;

    let mut pixels = Vec::with_capacity(width as usize * height as usize);
    for row in 0..height as usize {
        let line = &data[row * stride..row * stride + width as usize * 2];
        for (i, pair) in line.chunks(4).enumerate() {
            // An odd trailing pixel has no V sample; treat it as neutral.
            let (y0, u, y1, v) = match pair {
                &[y0, u, y1, v] => (y0, u, Some(y1), v),
                &[y0, u] => (y0, u, None, 128),
                _ => break,
            };
            pixels.push(yuv_to_rgb(y0, u, v));
            if let Some(y1) = y1 {
                if i * 2 + 1 < width as usize {
                    pixels.push(yuv_to_rgb(y1, u, v));
                }
            }
        }
    }
    Ok(DecodedImage::from_pixels(width, height, pixels))
}

/// BT.601 studio-swing YUV to RGB, integer arithmetic.
fn yuv_to_rgb(y: u8, u: u8, v: u8) -> u32 {
    let c = i32::from(y) - 16;
    let d = i32::from(u) - 128;
    let e = i32::from(v) - 128;
    let clamp = |x: i32| x.clamp(0, 255) as u8;
    let r = clamp((298 * c + 409 * e + 128) >> 8);
    let g = clamp((298 * c - 100 * d - 208 * e + 128) >> 8);
    let b = clamp((298 * c + 516 * d + 128) >> 8);
    pack_rgb(r, g, b)
}

fn decode_jpeg(data: &[u8]) -> Result<DecodedImage, DecodeError> {
    let mut decoder = Decoder::new(data);
    let raw = decoder.decode()?;
    let info = decoder.info().ok_or(DecodeError::MissingHeader)?;
    let (width, height) = (u32::from(info.width), u32::from(info.height));

    let pixels = match info.pixel_format {
        JpegPixelFormat::RGB24 => raw
            .chunks_exact(3)
            .map(|px| pack_rgb(px[0], px[1], px[2]))
            .collect(),
        JpegPixelFormat::L8 => raw.iter().map(|&l| pack_rgb(l, l, l)).collect(),
        other => return Err(DecodeError::UnsupportedJpeg(other)),
    };
    Ok(DecodedImage::from_pixels(width, height, pixels))
}
