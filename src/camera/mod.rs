//! Camera backends and the capability interface the UI layer talks to.
//!
//! A backend owns the hardware: it reports what the camera can do, accepts
//! the chosen format, and produces raw frames. Everything downstream of
//! `next_frame` is backend-agnostic.

pub mod synthetic;
#[cfg(feature = "v4l2")]
pub mod v4l2;

use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use crate::capture::{PixelFormat, RawFrame};
use crate::error::SessionError;
use crate::geometry::{Facing, Size};
use crate::CaptureConfig;

pub use synthetic::{SyntheticCamera, SyntheticConfig};
#[cfg(feature = "v4l2")]
pub use v4l2::V4l2Camera;

/// Which backend a session should open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Synthetic,
    V4l2,
}

/// A point on the preview surface, in view pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FocusPoint {
    pub x: f32,
    pub y: f32,
}

/// Static facts about an opened camera.
#[derive(Debug, Clone)]
pub struct CameraDetails {
    pub camera_id: String,
    pub facing: Facing,
    /// Degrees the sensor is mounted relative to the device's natural orientation
    pub sensor_rotation: i32,
    pub flash_available: bool,
    /// Every supported (format, resolution) pair, in device order
    pub catalog: Vec<(PixelFormat, Size)>,
}

/// User-facing camera controls. Shared with the UI while the backend itself
/// runs on the producer thread.
pub trait CameraControl: Send + Sync {
    /// Run `task` with whether the camera has a torch. If that is not known
    /// yet, the task is parked until it is.
    fn with_flash_support(&self, task: Box<dyn FnOnce(bool) + Send>);

    fn set_torch_state(&self, on: bool);

    fn is_torch_on(&self) -> bool;

    fn set_focus(&self, point: FocusPoint);
}

/// A source of raw frames for one session.
pub trait CameraBackend: Send {
    fn name(&self) -> &'static str;

    /// Open the device and describe it.
    fn open(&mut self) -> Result<CameraDetails, SessionError>;

    /// Start streaming with the selected format and resolution.
    fn configure(&mut self, format: PixelFormat, resolution: Size) -> Result<(), SessionError>;

    /// Block until the next frame is captured.
    fn next_frame(&mut self) -> Result<RawFrame, SessionError>;

    /// Take back a frame the pipeline refused so its buffer can be reused.
    fn recycle(&mut self, _frame: RawFrame) {}

    fn control(&self) -> Arc<dyn CameraControl>;

    /// Stop streaming and release the device.
    fn close(&mut self) {}
}

/// Build the backend named in the capture configuration.
pub fn backend_from_config(config: &CaptureConfig) -> Result<Box<dyn CameraBackend>, SessionError> {
    match config.backend {
        BackendKind::Synthetic => Ok(Box::new(SyntheticCamera::new(SyntheticConfig::from_capture(
            config,
        )))),
        #[cfg(feature = "v4l2")]
        BackendKind::V4l2 => Ok(Box::new(V4l2Camera::new(config)?)),
        #[cfg(not(feature = "v4l2"))]
        BackendKind::V4l2 => Err(SessionError::Backend(
            "built without the `v4l2` feature".into(),
        )),
    }
}

type Callback<T> = Box<dyn FnOnce(T) + Send>;

enum CapabilityState<T> {
    Unknown(Option<Callback<T>>),
    Known(T),
}

/// A value that becomes known once, some time after construction, with at
/// most one callback parked until then.
///
/// Asking before the value is known parks the callback (replacing any
/// earlier one); resolving runs it exactly once and clears the slot.
pub struct PendingCapability<T> {
    state: Mutex<CapabilityState<T>>,
}

impl<T: Clone + Send> Default for PendingCapability<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send> PendingCapability<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(CapabilityState::Unknown(None)),
        }
    }

    /// Run `task` now if the value is known, otherwise when it becomes known.
    pub fn with(&self, task: Callback<T>) {
        let known = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            match &mut *state {
                CapabilityState::Known(value) => value.clone(),
                CapabilityState::Unknown(pending) => {
                    *pending = Some(task);
                    return;
                }
            }
        };
        task(known);
    }

    /// Record the value and fire the parked callback, if any. Later calls
    /// are ignored and return `false`.
    pub fn resolve(&self, value: T) -> bool {
        let pending = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            match &mut *state {
                CapabilityState::Known(_) => return false,
                CapabilityState::Unknown(pending) => {
                    let pending = pending.take();
                    *state = CapabilityState::Known(value.clone());
                    pending
                }
            }
        };
        if let Some(task) = pending {
            task(value);
        }
        true
    }

    pub fn get(&self) -> Option<T> {
        match &*self.state.lock().unwrap_or_else(PoisonError::into_inner) {
            CapabilityState::Known(value) => Some(value.clone()),
            CapabilityState::Unknown(_) => None,
        }
    }
}
