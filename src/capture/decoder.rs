//! Conversion from raw camera buffers into analysis-ready images.

use image::imageops::{self, FilterType};
use image::RgbImage;
use jpeg_decoder::Decoder;

use super::frame::{PixelFormat, RawFrame};
use crate::error::ConvertError;
use crate::geometry::{analysis_scale, Rotation, Size};

/// Turns a raw camera buffer into whatever the analysis loop consumes.
///
/// Runs on the producer thread after admission, so it may be expensive but
/// must not block on anything other than its own work.
pub trait FrameConverter: Send + Sync {
    type Output: Send + 'static;

    fn convert(&self, frame: &RawFrame, rotation: Rotation) -> Result<Self::Output, ConvertError>;
}

/// Decodes to packed RGB, scales to cover the analysis resolution and
/// optionally rotates the result upright.
#[derive(Debug, Clone, Default)]
pub struct RgbConverter {
    analysis_resolution: Option<Size>,
    rotate: bool,
}

impl RgbConverter {
    pub fn new(analysis_resolution: Option<Size>, rotate: bool) -> Self {
        Self {
            analysis_resolution,
            rotate,
        }
    }
}

impl FrameConverter for RgbConverter {
    type Output = RgbImage;

    fn convert(&self, frame: &RawFrame, rotation: Rotation) -> Result<RgbImage, ConvertError> {
        let (size, pixels) = decode_frame(&frame.data, frame.meta.format, frame.size())?;
        let mut image =
            RgbImage::from_raw(size.width, size.height, pixels).ok_or(ConvertError::Dimensions)?;

        if let Some(analysis) = self.analysis_resolution {
            let scale = analysis_scale(analysis, size);
            let width = ((size.width as f32 * scale).round() as u32).max(1);
            let height = ((size.height as f32 * scale).round() as u32).max(1);
            if (width, height) != (size.width, size.height) {
                image = imageops::resize(&image, width, height, FilterType::Triangle);
            }
        }

        if self.rotate {
            image = match rotation.degrees() {
                90 => imageops::rotate90(&image),
                180 => imageops::rotate180(&image),
                270 => imageops::rotate270(&image),
                _ => image,
            };
        }

        Ok(image)
    }
}

/// Decode a buffer into packed RGB24. Returns the decoded dimensions, which
/// for compressed formats come from the bitstream rather than the metadata.
pub fn decode_frame(
    data: &[u8],
    format: PixelFormat,
    size: Size,
) -> Result<(Size, Vec<u8>), ConvertError> {
    if let Some(expected) = format.buffer_len(size) {
        if data.len() < expected {
            return Err(ConvertError::Truncated {
                expected,
                actual: data.len(),
            });
        }
    }

    match format {
        PixelFormat::Mjpeg => {
            let mut decoder = Decoder::new(data);
            let pixels = decoder.decode()?;
            let info = decoder.info().ok_or(ConvertError::Dimensions)?;
            let size = Size::new(info.width as u32, info.height as u32);
            match info.pixel_format {
                jpeg_decoder::PixelFormat::RGB24 => Ok((size, pixels)),
                jpeg_decoder::PixelFormat::L8 => {
                    Ok((size, pixels.iter().flat_map(|&l| [l, l, l]).collect()))
                }
                _ => Err(ConvertError::UnsupportedFormat(format)),
            }
        }
        PixelFormat::Rgb24 => {
            // Already in RGB format
            Ok((size, data[..size.pixel_count() as usize * 3].to_vec()))
        }
        PixelFormat::Bgr24 => {
            let pixels = data[..size.pixel_count() as usize * 3]
                .chunks_exact(3)
                .flat_map(|bgr| [bgr[2], bgr[1], bgr[0]])
                .collect();
            Ok((size, pixels))
        }
        PixelFormat::Yuyv4 => Ok((size, yuyv_to_rgb(data, size))),
        PixelFormat::Nv21 => Ok((size, nv21_to_rgb(data, size))),
        PixelFormat::Yuv420 => Ok((size, i420_to_rgb(data, size))),
    }
}

/// BT.601 limited-range conversion of one pixel.
fn yuv_pixel(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = y as i32 - 16;
    let d = u as i32 - 128;
    let e = v as i32 - 128;
    let clamp = |x: i32| (x >> 8).clamp(0, 255) as u8;
    [
        clamp(298 * c + 409 * e + 128),
        clamp(298 * c - 100 * d - 208 * e + 128),
        clamp(298 * c + 516 * d + 128),
    ]
}

fn yuyv_to_rgb(data: &[u8], size: Size) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(size.pixel_count() as usize * 3);
    for chunk in data[..size.pixel_count() as usize * 2].chunks_exact(4) {
        let (y0, u, y1, v) = (chunk[0], chunk[1], chunk[2], chunk[3]);
        rgb.extend_from_slice(&yuv_pixel(y0, u, v));
        rgb.extend_from_slice(&yuv_pixel(y1, u, v));
    }
    rgb
}

/// Planar luma followed by chroma, where `chroma(x, y)` yields (u, v) for a
/// half-resolution chroma coordinate
fn planar_to_rgb(data: &[u8], size: Size, chroma: impl Fn(usize) -> (u8, u8)) -> Vec<u8> {
    let (width, height) = (size.width as usize, size.height as usize);
    let chroma_width = size.width.div_ceil(2) as usize;
    let mut rgb = Vec::with_capacity(width * height * 3);
    for row in 0..height {
        for col in 0..width {
            let y = data[row * width + col];
            let (u, v) = chroma((row / 2) * chroma_width + col / 2);
            rgb.extend_from_slice(&yuv_pixel(y, u, v));
        }
    }
    rgb
}

fn nv21_to_rgb(data: &[u8], size: Size) -> Vec<u8> {
    let luma = size.pixel_count() as usize;
    planar_to_rgb(data, size, |i| (data[luma + 2 * i + 1], data[luma + 2 * i]))
}

fn i420_to_rgb(data: &[u8], size: Size) -> Vec<u8> {
    let luma = size.pixel_count() as usize;
    let plane = size.width.div_ceil(2) as usize * size.height.div_ceil(2) as usize;
    planar_to_rgb(data, size, |i| (data[luma + i], data[luma + plane + i]))
}
