pub mod camera;
pub mod capture;
pub mod error;
pub mod geometry;
pub mod pipeline;
pub mod session;

use std::path::Path;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

use camera::BackendKind;
use capture::SelectionStrategy;
use error::ConfigError;
use geometry::Size;
use pipeline::DeliveryMode;

pub use session::CameraSession;

/// Global configuration that can be atomically swapped at runtime
pub static CONFIG: once_cell::sync::Lazy<ArcSwap<Config>> =
    once_cell::sync::Lazy::new(|| ArcSwap::from_pointee(Config::default()));

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub capture: CaptureConfig,
    pub display: DisplayConfig,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    pub backend: BackendKind,
    /// Device node for the v4l2 backend; empty means auto-detect
    pub device: String,
    pub minimum_resolution: Size,
    /// Frames are scaled to cover this size before analysis
    pub analysis_resolution: Size,
    pub strategy: SelectionStrategy,
    pub fps: u32,
    /// Sensor mounting reported by backends that cannot query it
    pub sensor_rotation: i32,
    /// Rotate frames upright during conversion
    pub rotate_frames: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayConfig {
    pub width: u32,
    pub height: u32,
    /// Current UI rotation in degrees: 0, 90, 180 or 270
    pub rotation: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub mode: DeliveryMode,
    pub stats_interval_secs: u64,
    /// Simulated per-frame analysis cost of the demo analyzer
    pub analysis_time_ms: u64,
    /// Frames the demo analyzer accepts before reporting busy; 0 is unbounded
    pub frame_budget: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Synthetic,
            device: String::new(),
            minimum_resolution: Size::new(1280, 720),
            analysis_resolution: Size::new(480, 480),
            strategy: SelectionStrategy::Preview,
            fps: 30,
            sensor_rotation: 90,
            rotate_frames: true,
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            width: 1080,
            height: 1920,
            rotation: 0,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            mode: DeliveryMode::Decoupled,
            stats_interval_secs: 5,
            analysis_time_ms: 50, // slower than the 30fps camera on purpose
            frame_budget: 0,
        }
    }
}

impl DisplayConfig {
    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }
}

impl Config {
    /// Defaults, then the optional TOML file, then `FRAMEGATE__SECTION__KEY`
    /// environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&Config::default())?);
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        let loaded = builder
            .add_source(
                config::Environment::with_prefix("FRAMEGATE")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        Ok(loaded.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[capture]
strategy = "format"
minimum_resolution = {{ width = 640, height = 480 }}

[pipeline]
mode = "inline"
"#
        )
        .unwrap();

        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.capture.strategy, SelectionStrategy::Format);
        assert_eq!(config.capture.minimum_resolution, Size::new(640, 480));
        assert_eq!(config.pipeline.mode, DeliveryMode::Inline);
        // untouched keys keep their defaults
        assert_eq!(config.capture.fps, 30);
        assert_eq!(config.display.size(), Size::new(1080, 1920));
    }

    #[test]
    fn defaults_load_without_file() {
        let config = Config::load(None).unwrap();
        assert_eq!(config.capture.backend, BackendKind::Synthetic);
        assert_eq!(config.pipeline.mode, DeliveryMode::Decoupled);
    }
}
