//! Error types shared across the crate.
//!
//! Frame contention is deliberately absent: a dropped frame is a normal
//! outcome reported through `Admission`, not an error.

use thiserror::Error;

use crate::capture::PixelFormat;

/// Conditions that prevent a camera session from starting or running.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no compatible capture resolution for the requested minimum")]
    NoCompatibleResolution,

    #[error("no usable camera found")]
    CameraUnavailable,

    #[error("failed to open camera {camera_id} (code {code})")]
    CameraOpen { camera_id: String, code: i32 },

    #[error("failed to configure camera {camera_id}")]
    ConfigurationFailed { camera_id: String },

    #[error("camera backend error: {0}")]
    Backend(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Failures of the frame conversion step.
#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("unsupported pixel format: {0:?}")]
    UnsupportedFormat(PixelFormat),

    #[error("buffer too short: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("jpeg decode failed: {0}")]
    Jpeg(#[from] jpeg_decoder::Error),

    #[error("decoded image does not match its reported dimensions")]
    Dimensions,
}

/// Returned by a receive on a channel that has been closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("frame channel closed")]
pub struct ChannelClosed;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
}
