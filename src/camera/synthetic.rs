//! Synthetic camera that renders a moving test pattern.
//!
//! Stands in for real hardware in tests and demos. Frames are paced to the
//! configured frame rate and encoded in whatever format the session selects.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;
use tracing::{debug, info};

use super::{CameraBackend, CameraControl, CameraDetails, FocusPoint, PendingCapability};
use crate::capture::{FrameMetadata, PixelFormat, RawFrame};
use crate::error::SessionError;
use crate::geometry::{Facing, Size};
use crate::CaptureConfig;

#[derive(Debug, Clone)]
pub struct SyntheticConfig {
    pub camera_id: String,
    pub facing: Facing,
    pub sensor_rotation: i32,
    pub flash_available: bool,
    /// Frames per second; 0 produces frames as fast as they are requested
    pub fps: u32,
    pub catalog: Vec<(PixelFormat, Size)>,
    /// When false, `open` fails as if no camera were present
    pub available: bool,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            camera_id: "synthetic0".into(),
            facing: Facing::Back,
            sensor_rotation: 90,
            flash_available: true,
            fps: 30,
            catalog: vec![
                (PixelFormat::Mjpeg, Size::new(1280, 720)),
                (PixelFormat::Nv21, Size::new(1920, 1080)),
                (PixelFormat::Nv21, Size::new(1280, 720)),
                (PixelFormat::Nv21, Size::new(640, 480)),
                (PixelFormat::Rgb24, Size::new(640, 480)),
            ],
            available: true,
        }
    }
}

impl SyntheticConfig {
    pub fn from_capture(config: &CaptureConfig) -> Self {
        Self {
            sensor_rotation: config.sensor_rotation,
            fps: config.fps,
            ..Self::default()
        }
    }
}

/// Torch/focus state of the synthetic camera
#[derive(Default)]
pub struct SyntheticControl {
    flash: PendingCapability<bool>,
    torch: AtomicBool,
    focus: Mutex<Option<FocusPoint>>,
}

impl SyntheticControl {
    pub fn last_focus(&self) -> Option<FocusPoint> {
        *self.focus.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl CameraControl for SyntheticControl {
    fn with_flash_support(&self, task: Box<dyn FnOnce(bool) + Send>) {
        self.flash.with(task);
    }

    fn set_torch_state(&self, on: bool) {
        if self.flash.get() == Some(true) {
            self.torch.store(on, Ordering::Release);
        }
    }

    fn is_torch_on(&self) -> bool {
        self.torch.load(Ordering::Acquire)
    }

    fn set_focus(&self, point: FocusPoint) {
        debug!(x = point.x, y = point.y, "focus requested");
        *self.focus.lock().unwrap_or_else(PoisonError::into_inner) = Some(point);
    }
}

pub struct SyntheticCamera {
    config: SyntheticConfig,
    control: Arc<SyntheticControl>,
    stream: Option<(PixelFormat, Size)>,
    sequence: u64,
    last_frame_at: Option<Instant>,
    recycled: u64,
}

impl SyntheticCamera {
    pub fn new(config: SyntheticConfig) -> Self {
        Self {
            config,
            control: Arc::new(SyntheticControl::default()),
            stream: None,
            sequence: 0,
            last_frame_at: None,
            recycled: 0,
        }
    }

    /// Frames handed back by the pipeline so far
    pub fn recycled(&self) -> u64 {
        self.recycled
    }

    fn pace(&mut self) {
        if self.config.fps == 0 {
            return;
        }
        let interval = Duration::from_secs(1) / self.config.fps;
        if let Some(last) = self.last_frame_at {
            let elapsed = last.elapsed();
            if elapsed < interval {
                std::thread::sleep(interval - elapsed);
            }
        }
        self.last_frame_at = Some(Instant::now());
    }

    /// Diagonal gradient that shifts with every frame
    fn render_rgb(&self, size: Size) -> Vec<u8> {
        let shift = self.sequence as u32;
        let mut pixels = Vec::with_capacity(size.pixel_count() as usize * 3);
        for y in 0..size.height {
            for x in 0..size.width {
                let v = ((x + y + shift) % 256) as u8;
                pixels.extend_from_slice(&[v, v.wrapping_add(85), v.wrapping_add(170)]);
            }
        }
        pixels
    }

    fn render(&self, format: PixelFormat, size: Size) -> Result<Vec<u8>, SessionError> {
        match format {
            PixelFormat::Rgb24 => Ok(self.render_rgb(size)),
            PixelFormat::Bgr24 => Ok(self
                .render_rgb(size)
                .chunks_exact(3)
                .flat_map(|rgb| [rgb[2], rgb[1], rgb[0]])
                .collect()),
            PixelFormat::Mjpeg => {
                let mut jpeg = Vec::new();
                JpegEncoder::new_with_quality(&mut jpeg, 75)
                    .encode(
                        &self.render_rgb(size),
                        size.width,
                        size.height,
                        ExtendedColorType::Rgb8,
                    )
                    .map_err(|e| SessionError::Backend(e.to_string()))?;
                Ok(jpeg)
            }
            PixelFormat::Nv21 | PixelFormat::Yuv420 | PixelFormat::Yuyv4 => {
                // Luma ramp with neutral chroma
                let len = format.buffer_len(size).unwrap_or_default();
                let luma = size.pixel_count() as usize;
                let shift = self.sequence as usize;
                Ok((0..len)
                    .map(|i| match format {
                        PixelFormat::Yuyv4 if i % 2 == 1 => 128,
                        PixelFormat::Yuyv4 => ((i / 2 + shift) % 220 + 16) as u8,
                        _ if i >= luma => 128,
                        _ => ((i + shift) % 220 + 16) as u8,
                    })
                    .collect())
            }
        }
    }
}

impl CameraBackend for SyntheticCamera {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    fn open(&mut self) -> Result<CameraDetails, SessionError> {
        if !self.config.available {
            return Err(SessionError::CameraUnavailable);
        }
        info!(camera_id = %self.config.camera_id, "synthetic camera opened");
        self.control.flash.resolve(self.config.flash_available);

        Ok(CameraDetails {
            camera_id: self.config.camera_id.clone(),
            facing: self.config.facing,
            sensor_rotation: self.config.sensor_rotation,
            flash_available: self.config.flash_available,
            catalog: self.config.catalog.clone(),
        })
    }

    fn configure(&mut self, format: PixelFormat, resolution: Size) -> Result<(), SessionError> {
        if !self.config.catalog.contains(&(format, resolution)) {
            return Err(SessionError::ConfigurationFailed {
                camera_id: self.config.camera_id.clone(),
            });
        }
        info!(?format, %resolution, "synthetic stream configured");
        self.stream = Some((format, resolution));
        Ok(())
    }

    fn next_frame(&mut self) -> Result<RawFrame, SessionError> {
        let (format, size) = self
            .stream
            .ok_or_else(|| SessionError::Backend("stream not started".into()))?;

        self.pace();
        self.sequence += 1;
        let data = self.render(format, size)?;

        Ok(RawFrame::new(
            Bytes::from(data),
            FrameMetadata {
                sequence: self.sequence,
                width: size.width,
                height: size.height,
                stride: size.width,
                format,
                device_timestamp: None,
            },
        ))
    }

    fn recycle(&mut self, _frame: RawFrame) {
        self.recycled += 1;
    }

    fn control(&self) -> Arc<dyn CameraControl> {
        self.control.clone()
    }

    fn close(&mut self) {
        if self.stream.take().is_some() {
            info!(frames = self.sequence, recycled = self.recycled, "synthetic camera closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::decoder::decode_frame;

    fn unpaced() -> SyntheticConfig {
        SyntheticConfig {
            fps: 0,
            ..SyntheticConfig::default()
        }
    }

    #[test]
    fn frames_decode_in_every_catalog_format() {
        for (format, size) in [
            (PixelFormat::Mjpeg, Size::new(64, 48)),
            (PixelFormat::Nv21, Size::new(64, 48)),
            (PixelFormat::Yuyv4, Size::new(64, 48)),
            (PixelFormat::Rgb24, Size::new(64, 48)),
        ] {
            let mut camera = SyntheticCamera::new(SyntheticConfig {
                catalog: vec![(format, size)],
                ..unpaced()
            });
            camera.open().unwrap();
            camera.configure(format, size).unwrap();

            let frame = camera.next_frame().unwrap();
            assert_eq!(frame.sequence(), 1);
            let (decoded, pixels) = decode_frame(&frame.data, format, frame.size()).unwrap();
            assert_eq!(decoded, size, "{format:?}");
            assert_eq!(pixels.len(), size.pixel_count() as usize * 3);
        }
    }

    #[test]
    fn unconfigured_or_unsupported_stream_fails() {
        let mut camera = SyntheticCamera::new(unpaced());
        assert!(camera.next_frame().is_err());
        let err = camera.configure(PixelFormat::Bgr24, Size::new(10, 10)).unwrap_err();
        assert!(matches!(err, SessionError::ConfigurationFailed { .. }));
    }

    #[test]
    fn unavailable_camera_fails_to_open() {
        let mut camera = SyntheticCamera::new(SyntheticConfig {
            available: false,
            ..unpaced()
        });
        assert!(matches!(camera.open(), Err(SessionError::CameraUnavailable)));
    }

    #[test]
    fn flash_support_resolves_on_open() {
        let mut camera = SyntheticCamera::new(unpaced());
        let control = camera.control();

        let (tx, rx) = std::sync::mpsc::channel();
        control.with_flash_support(Box::new(move |supported| tx.send(supported).unwrap()));
        assert!(rx.try_recv().is_err());

        camera.open().unwrap();
        assert_eq!(rx.try_recv(), Ok(true));

        control.set_torch_state(true);
        assert!(control.is_torch_on());
    }

    #[test]
    fn focus_requests_are_recorded() {
        let camera = SyntheticCamera::new(unpaced());
        assert_eq!(camera.control.last_focus(), None);

        let control = camera.control();
        control.set_focus(FocusPoint { x: 12.5, y: 40.0 });
        control.set_focus(FocusPoint { x: 3.0, y: 7.0 });
        assert_eq!(camera.control.last_focus(), Some(FocusPoint { x: 3.0, y: 7.0 }));
    }

    #[test]
    fn torch_ignored_without_flash() {
        let mut camera = SyntheticCamera::new(SyntheticConfig {
            flash_available: false,
            ..unpaced()
        });
        camera.open().unwrap();
        let control = camera.control();
        control.set_torch_state(true);
        assert!(!control.is_torch_on());
    }
}
