use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::geometry::{Rotation, Size};

/// Raw camera buffer as handed over by a capture backend
#[derive(Clone)]
pub struct RawFrame {
    /// Immutable frame data - can be shared across threads without copying
    pub data: Bytes,

    /// Frame metadata
    pub meta: Arc<FrameMetadata>,

    /// Capture timestamp for latency tracking
    pub timestamp: Instant,
}

impl RawFrame {
    pub fn new(data: Bytes, meta: FrameMetadata) -> Self {
        Self {
            data,
            meta: Arc::new(meta),
            timestamp: Instant::now(),
        }
    }

    /// Native sensor-oriented dimensions of the buffer
    pub fn size(&self) -> Size {
        Size::new(self.meta.width, self.meta.height)
    }

    pub fn sequence(&self) -> u64 {
        self.meta.sequence
    }
}

impl std::fmt::Debug for RawFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawFrame")
            .field("len", &self.data.len())
            .field("meta", &self.meta)
            .finish()
    }
}

/// Frame metadata
#[derive(Debug, Clone)]
pub struct FrameMetadata {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub format: PixelFormat,
    pub device_timestamp: Option<Duration>, // Hardware timestamp if available
}

/// Output of the conversion step, tagged with the rotation the consumer
/// must apply (or has had applied) to see the image upright
#[derive(Debug, Clone)]
pub struct ProcessedFrame<T> {
    pub image: T,
    pub rotation: Rotation,
    pub sequence: u64,
    pub captured_at: Instant,
}

/// Pixel formats we support
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    Nv21,
    Yuv420,
    Mjpeg,
    Yuyv4,
    Rgb24,
    Bgr24,
}

impl PixelFormat {
    /// Lower is preferred. Formats that are cheap to convert come first.
    pub fn preference(&self) -> u8 {
        match self {
            PixelFormat::Nv21 => 0,
            PixelFormat::Yuv420 => 1,
            PixelFormat::Mjpeg => 2,
            PixelFormat::Yuyv4 => 3,
            PixelFormat::Rgb24 => 4,
            PixelFormat::Bgr24 => 5,
        }
    }

    /// Bytes a tightly packed buffer of the given size occupies, if the
    /// format has a fixed layout
    pub fn buffer_len(&self, size: Size) -> Option<usize> {
        let pixels = size.pixel_count() as usize;
        let chroma = size.width.div_ceil(2) as usize * size.height.div_ceil(2) as usize;
        match self {
            PixelFormat::Nv21 | PixelFormat::Yuv420 => Some(pixels + 2 * chroma),
            PixelFormat::Yuyv4 => Some(pixels * 2),
            PixelFormat::Rgb24 | PixelFormat::Bgr24 => Some(pixels * 3),
            PixelFormat::Mjpeg => None,
        }
    }
}

/// Stable sort of a `(format, resolution)` catalog by format preference.
/// Resolutions keep their advertised order within one format.
pub fn order_by_preference(catalog: &mut [(PixelFormat, Size)]) {
    catalog.sort_by_key(|(format, _)| format.preference());
}
