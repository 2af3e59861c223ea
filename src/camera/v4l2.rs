//! V4L2 camera backend with memory-mapped streaming

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, info, instrument};
use v4l::buffer::Type;
use v4l::capability::Flags as CapFlags;
use v4l::framesize::FrameSizeEnum;
use v4l::io::traits::CaptureStream;
use v4l::prelude::MmapStream;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use super::{CameraBackend, CameraControl, CameraDetails, FocusPoint};
use crate::capture::{FrameMetadata, PixelFormat, RawFrame};
use crate::error::SessionError;
use crate::geometry::{Facing, Size};
use crate::CaptureConfig;

fn fourcc_to_format(fourcc: FourCC) -> Option<PixelFormat> {
    match &fourcc.repr {
        b"MJPG" => Some(PixelFormat::Mjpeg),
        b"YUYV" => Some(PixelFormat::Yuyv4),
        b"NV21" => Some(PixelFormat::Nv21),
        b"YU12" => Some(PixelFormat::Yuv420),
        b"RGB3" => Some(PixelFormat::Rgb24),
        b"BGR3" => Some(PixelFormat::Bgr24),
        _ => None,
    }
}

fn format_to_fourcc(format: PixelFormat) -> FourCC {
    FourCC::new(match format {
        PixelFormat::Mjpeg => b"MJPG",
        PixelFormat::Yuyv4 => b"YUYV",
        PixelFormat::Nv21 => b"NV21",
        PixelFormat::Yuv420 => b"YU12",
        PixelFormat::Rgb24 => b"RGB3",
        PixelFormat::Bgr24 => b"BGR3",
    })
}

/// First `/dev/videoN` node that can capture in a format we decode
pub fn detect_device() -> Option<String> {
    info!("Auto-detecting capture devices...");

    for i in 0..10 {
        let path = format!("/dev/video{}", i);
        if !Path::new(&path).exists() {
            continue;
        }
        let Ok(dev) = Device::with_path(&path) else {
            continue;
        };
        let Ok(caps) = dev.query_caps() else {
            continue;
        };
        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            continue;
        }
        let supported = dev
            .enum_formats()
            .map(|formats| formats.iter().any(|f| fourcc_to_format(f.fourcc).is_some()))
            .unwrap_or(false);
        if supported {
            info!("Found capture device: {} - {}", path, caps.card);
            return Some(path);
        }
    }
    None
}

/// V4L2 devices expose no torch or focus controls we drive
struct V4l2Control;

impl CameraControl for V4l2Control {
    fn with_flash_support(&self, task: Box<dyn FnOnce(bool) + Send>) {
        task(false);
    }

    fn set_torch_state(&self, on: bool) {
        debug!(on, "torch not supported on v4l2 devices");
    }

    fn is_torch_on(&self) -> bool {
        false
    }

    fn set_focus(&self, point: FocusPoint) {
        debug!(x = point.x, y = point.y, "focus not supported on v4l2 devices");
    }
}

/// V4L2 capture backend
pub struct V4l2Camera {
    path: String,
    sensor_rotation: i32,
    buffer_count: u32,
    device: Option<Box<Device>>,
    stream: Option<MmapStream<'static>>,
    format: Option<(PixelFormat, Size)>,
    sequence: u64,
}

impl V4l2Camera {
    pub fn new(config: &CaptureConfig) -> Result<Self, SessionError> {
        let path = if config.device.is_empty() {
            detect_device().ok_or(SessionError::CameraUnavailable)?
        } else {
            config.device.clone()
        };

        Ok(Self {
            path,
            sensor_rotation: config.sensor_rotation,
            buffer_count: 4,
            device: None,
            stream: None,
            format: None,
            sequence: 0,
        })
    }

    fn device(&self) -> Result<&Device, SessionError> {
        self.device
            .as_deref()
            .ok_or_else(|| SessionError::Backend("device not open".into()))
    }
}

impl CameraBackend for V4l2Camera {
    fn name(&self) -> &'static str {
        "v4l2"
    }

    #[instrument(skip(self), fields(path = %self.path))]
    fn open(&mut self) -> Result<CameraDetails, SessionError> {
        let device = Device::with_path(&self.path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => SessionError::CameraUnavailable,
            _ => SessionError::CameraOpen {
                camera_id: self.path.clone(),
                code: e.raw_os_error().unwrap_or(-1),
            },
        })?;

        let caps = device.query_caps()?;
        info!("Device: {} ({})", caps.card, caps.driver);
        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            return Err(SessionError::CameraUnavailable);
        }

        let mut catalog = Vec::new();
        for description in device.enum_formats()? {
            let Some(format) = fourcc_to_format(description.fourcc) else {
                continue;
            };
            for framesize in device.enum_framesizes(description.fourcc)? {
                match framesize.size {
                    FrameSizeEnum::Discrete(d) => {
                        catalog.push((format, Size::new(d.width, d.height)))
                    }
                    FrameSizeEnum::Stepwise(s) => {
                        catalog.push((format, Size::new(s.max_width, s.max_height)));
                        catalog.push((format, Size::new(s.min_width, s.min_height)));
                    }
                }
            }
        }
        debug!(sizes = catalog.len(), "device catalog enumerated");

        self.device = Some(Box::new(device));
        Ok(CameraDetails {
            camera_id: self.path.clone(),
            facing: Facing::Back,
            sensor_rotation: self.sensor_rotation,
            flash_available: false,
            catalog,
        })
    }

    fn configure(&mut self, format: PixelFormat, resolution: Size) -> Result<(), SessionError> {
        let device = self.device()?;

        let mut fmt = device.format()?;
        fmt.width = resolution.width;
        fmt.height = resolution.height;
        fmt.fourcc = format_to_fourcc(format);
        let applied = device.set_format(&fmt)?;
        if applied.fourcc != fmt.fourcc
            || applied.width != resolution.width
            || applied.height != resolution.height
        {
            return Err(SessionError::ConfigurationFailed {
                camera_id: self.path.clone(),
            });
        }

        let stream = MmapStream::with_buffers(device, Type::VideoCapture, self.buffer_count)?;
        self.stream = Some(stream);
        self.format = Some((format, resolution));
        info!(
            "Capture stream started with {} buffers at {} {:?}",
            self.buffer_count, resolution, format
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<RawFrame, SessionError> {
        let (format, size) = self
            .format
            .ok_or_else(|| SessionError::Backend("stream not started".into()))?;
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| SessionError::Backend("stream not started".into()))?;

        let (buf, meta) = stream.next()?;
        let used = (meta.bytesused as usize).min(buf.len());
        let data = Bytes::copy_from_slice(&buf[..used]);

        self.sequence += 1;
        Ok(RawFrame::new(
            data,
            FrameMetadata {
                sequence: self.sequence,
                width: size.width,
                height: size.height,
                stride: size.width,
                format,
                device_timestamp: Some(
                    Duration::from_secs(meta.timestamp.sec as u64)
                        + Duration::from_micros(meta.timestamp.usec as u64),
                ),
            },
        ))
    }

    fn control(&self) -> Arc<dyn CameraControl> {
        Arc::new(V4l2Control)
    }

    fn close(&mut self) {
        // Stream must go before the device it maps
        self.stream = None;
        self.device = None;
        self.format = None;
        info!(frames = self.sequence, "v4l2 camera closed");
    }
}
