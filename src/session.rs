//! Camera session: one backend, one pipeline, one producer and at most one
//! consumer thread, from start to close.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{error, info, warn};

use crate::camera::{CameraBackend, CameraControl, CameraDetails};
use crate::capture::selector::select_capture;
use crate::capture::{FrameConverter, PixelFormat};
use crate::error::SessionError;
use crate::geometry::{
    display_orientation, scale_to_fit, to_display_size, AspectRatio, Orientation, Rotation, Size,
};
use crate::pipeline::{Admission, FrameDeliveryPipeline, FrameSink, PipelineStats};
use crate::Config;

/// Back-off after a failed capture before asking the backend again
const CAPTURE_RETRY_DELAY: Duration = Duration::from_millis(10);

/// An active camera session. Dropping it closes it.
pub struct CameraSession<C: FrameConverter + 'static> {
    pipeline: Arc<FrameDeliveryPipeline<C>>,
    control: Arc<dyn CameraControl>,
    details: CameraDetails,
    format: PixelFormat,
    resolution: Size,
    preview_size: Size,
    preview_rotation: Rotation,
    running: Arc<AtomicBool>,
    producer: Option<JoinHandle<()>>,
    consumer: Option<JoinHandle<()>>,
}

impl<C: FrameConverter + 'static> CameraSession<C> {
    /// Open the backend, pick a capture format, and start streaming frames
    /// into a fresh pipeline.
    ///
    /// Display rotation is read from `config` once, here; later rotation
    /// changes need a new session.
    pub fn start(
        mut backend: Box<dyn CameraBackend>,
        converter: C,
        sink: Arc<dyn FrameSink<C::Output>>,
        config: &Config,
    ) -> Result<Self, SessionError> {
        let details = backend.open()?;
        info!(
            backend = backend.name(),
            camera_id = %details.camera_id,
            sensor_rotation = details.sensor_rotation,
            formats = details.catalog.len(),
            "camera opened"
        );

        let display = &config.display;
        let selected = select_capture(
            &details.catalog,
            config.capture.strategy,
            config.capture.minimum_resolution,
            display.size(),
        )
        .and_then(|(format, resolution)| {
            backend.configure(format, resolution)?;
            Ok((format, resolution))
        });
        let (format, resolution) = match selected {
            Ok(selected) => selected,
            Err(e) => {
                backend.close();
                return Err(e);
            }
        };

        let orientation = Orientation::new(display.rotation, details.sensor_rotation);
        let preview_size = to_display_size(resolution, display.rotation, details.sensor_rotation);
        let preview_rotation =
            display_orientation(details.facing, details.sensor_rotation, display.rotation);
        info!(
            ?format,
            %resolution,
            %preview_size,
            rotation = %orientation.effective_rotation(),
            mode = ?config.pipeline.mode,
            "capture configured"
        );

        let control = backend.control();
        let pipeline = Arc::new(FrameDeliveryPipeline::new(
            orientation,
            converter,
            sink,
            config.pipeline.mode,
        ));

        let consumer = match pipeline.spawn_consumer() {
            Ok(consumer) => consumer,
            Err(e) => {
                backend.close();
                return Err(e.into());
            }
        };

        let running = Arc::new(AtomicBool::new(true));
        let producer = {
            let pipeline = Arc::clone(&pipeline);
            let running = Arc::clone(&running);
            thread::Builder::new()
                .name("framegate-producer".into())
                .spawn(move || produce(backend, &pipeline, &running))
        };
        let producer = match producer {
            Ok(producer) => producer,
            Err(e) => {
                // The backend went down with the failed spawn closure
                pipeline.close();
                if let Some(consumer) = consumer {
                    let _ = consumer.join();
                }
                return Err(e.into());
            }
        };

        Ok(Self {
            pipeline,
            control,
            details,
            format,
            resolution,
            preview_size,
            preview_rotation,
            running,
            producer: Some(producer),
            consumer,
        })
    }

    /// End the session: stop the producer, close the pipeline and wait for
    /// both threads. Returns `false` if the session was already closed.
    pub fn close(&mut self) -> bool {
        if !self.running.swap(false, Ordering::AcqRel) {
            return false;
        }
        self.pipeline.close();

        for handle in [self.producer.take(), self.consumer.take()].into_iter().flatten() {
            let name = handle.thread().name().unwrap_or("unnamed").to_owned();
            if handle.join().is_err() {
                error!(thread = %name, "session thread panicked");
            }
        }
        info!(camera_id = %self.details.camera_id, "camera session closed");
        true
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn control(&self) -> Arc<dyn CameraControl> {
        Arc::clone(&self.control)
    }

    pub fn details(&self) -> &CameraDetails {
        &self.details
    }

    pub fn capture_format(&self) -> PixelFormat {
        self.format
    }

    /// Sensor-oriented capture resolution
    pub fn resolution(&self) -> Size {
        self.resolution
    }

    /// Capture resolution as it appears on the display
    pub fn preview_size(&self) -> Size {
        self.preview_size
    }

    /// Rotation a preview surface applies to show frames upright
    pub fn preview_rotation(&self) -> Rotation {
        self.preview_rotation
    }

    /// Rotation tagged onto every processed frame
    pub fn frame_rotation(&self) -> Rotation {
        self.pipeline.orientation().effective_rotation()
    }

    /// Aspect bucket of the capture, for fixed-ratio preview layouts
    pub fn aspect_ratio(&self) -> AspectRatio {
        AspectRatio::closest(self.resolution.width, self.resolution.height)
    }

    /// Size the preview must be drawn at to fill `view` without distortion
    pub fn preview_fit(&self, view: Size) -> Size {
        scale_to_fit(self.preview_size, view)
    }

    pub fn stats(&self) -> PipelineStats {
        self.pipeline.stats()
    }
}

impl<C: FrameConverter + 'static> Drop for CameraSession<C> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Producer loop: pull frames from the backend and offer them to the
/// pipeline until the session stops.
fn produce<C: FrameConverter>(
    mut backend: Box<dyn CameraBackend>,
    pipeline: &FrameDeliveryPipeline<C>,
    running: &AtomicBool,
) {
    while running.load(Ordering::Acquire) {
        if let Err(e) = pump(backend.as_mut(), pipeline) {
            warn!("Capture error: {}", e);
            thread::sleep(CAPTURE_RETRY_DELAY);
        }
    }
    backend.close();
}

/// Capture one frame and offer it. A refused frame goes straight back to
/// the backend; returns whether the pipeline took it.
fn pump<C: FrameConverter>(
    backend: &mut dyn CameraBackend,
    pipeline: &FrameDeliveryPipeline<C>,
) -> Result<bool, SessionError> {
    let frame = backend.next_frame()?;
    match pipeline.admit(frame) {
        Admission::Accepted => Ok(true),
        Admission::Rejected(frame) => {
            backend.recycle(frame);
            Ok(false)
        }
    }
}
