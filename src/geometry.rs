//! Sensor/display orientation math and resolution geometry.
//!
//! Every function here is pure. Display rotations are expressed in degrees
//! (0, 90, 180, 270); anything else is treated as "unrecognized" and falls
//! back to the neutral answer instead of erroring.

use serde::{Deserialize, Serialize};

/// Width/height pair. Used both for sensor-native resolutions and for
/// display-oriented sizes; the helpers below convert between the two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Width over height. Zero-height sizes yield infinity.
    pub fn aspect_ratio(&self) -> f64 {
        self.width as f64 / self.height as f64
    }

    pub fn pixel_count(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn swapped(&self) -> Self {
        Self::new(self.height, self.width)
    }
}

impl std::fmt::Display for Size {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Rotation in degrees, always normalized into [0, 360).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rotation(u16);

impl Rotation {
    pub const ZERO: Rotation = Rotation(0);

    /// Normalize any signed degree value into [0, 360).
    pub fn from_degrees(degrees: i32) -> Self {
        Self(degrees.rem_euclid(360) as u16)
    }

    pub fn degrees(&self) -> u16 {
        self.0
    }
}

impl std::fmt::Display for Rotation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}°", self.0)
    }
}

/// Which way the camera lens faces relative to the screen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Facing {
    #[default]
    Back,
    Front,
}

/// Display rotation and sensor mounting, fixed for the lifetime of a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Orientation {
    pub display_rotation: i32,
    pub sensor_rotation_degrees: i32,
}

impl Orientation {
    pub fn new(display_rotation: i32, sensor_rotation_degrees: i32) -> Self {
        Self {
            display_rotation,
            sensor_rotation_degrees,
        }
    }

    pub fn effective_rotation(&self) -> Rotation {
        effective_rotation(self.display_rotation, self.sensor_rotation_degrees)
    }

    pub fn is_perpendicular(&self) -> bool {
        is_perpendicular(self.display_rotation, self.sensor_rotation_degrees)
    }
}

fn display_offset(display_rotation: i32) -> i32 {
    match display_rotation {
        0 | 90 | 180 | 270 => display_rotation,
        _ => 0,
    }
}

/// How far a captured image must be rotated to appear upright on the display.
pub fn effective_rotation(display_rotation: i32, sensor_rotation_degrees: i32) -> Rotation {
    let offset = display_offset(display_rotation);
    Rotation::from_degrees((sensor_rotation_degrees.rem_euclid(360) - offset).rem_euclid(360))
}

/// True when sensor and screen are at right angles, i.e. width and height
/// must be swapped to go between a resolution and a display size.
pub fn is_perpendicular(display_rotation: i32, sensor_rotation_degrees: i32) -> bool {
    match display_rotation {
        0 | 180 => sensor_rotation_degrees == 90 || sensor_rotation_degrees == 270,
        90 | 270 => sensor_rotation_degrees == 0 || sensor_rotation_degrees == 180,
        _ => false,
    }
}

/// Convert a sensor-native resolution into the size it occupies on screen.
pub fn to_display_size(
    resolution: Size,
    display_rotation: i32,
    sensor_rotation_degrees: i32,
) -> Size {
    if is_perpendicular(display_rotation, sensor_rotation_degrees) {
        resolution.swapped()
    } else {
        resolution
    }
}

/// Normalize a display-oriented size into landscape (long side as width).
pub fn to_landscape_resolution(size: Size) -> Size {
    Size::new(size.width.max(size.height), size.width.min(size.height))
}

/// Rotation a preview surface must apply for the given camera mounting.
///
/// Front-facing cameras are mirrored, so their result is compensated by
/// reflecting it back around 360.
pub fn display_orientation(
    facing: Facing,
    sensor_orientation: i32,
    display_rotation: i32,
) -> Rotation {
    let degrees = display_offset(display_rotation);
    match facing {
        Facing::Front => {
            let result = (sensor_orientation.rem_euclid(360) + degrees) % 360;
            Rotation::from_degrees((360 - result) % 360)
        }
        Facing::Back => Rotation::from_degrees(sensor_orientation.rem_euclid(360) - degrees),
    }
}

/// Scale factor that makes `image` cover `analysis` on both axes.
pub fn analysis_scale(analysis: Size, image: Size) -> f32 {
    f32::max(
        analysis.width as f32 / image.width as f32,
        analysis.height as f32 / image.height as f32,
    )
}

/// Smallest size with `preview`'s aspect ratio that fully encloses `area`.
///
/// A 9:16 preview fitted to a 2x2 area yields 2x4.
pub fn scale_to_fit(preview: Size, area: Size) -> Size {
    let ratio = preview.width as f32 / preview.height as f32;
    let height = area.height;
    let width = (height as f32 * ratio).round() as u32;
    if width >= area.width {
        return Size::new(width, height);
    }

    let width = area.width;
    let height = (width as f32 / ratio).round() as u32;
    Size::new(width, height.max(area.height))
}

/// Coarse aspect ratio buckets offered by fixed-ratio capture pipelines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AspectRatio {
    Ratio4x3,
    Ratio16x9,
}

impl AspectRatio {
    const RATIO_4_3: f64 = 4.0 / 3.0;
    const RATIO_16_9: f64 = 16.0 / 9.0;

    /// Closest bucket for the given dimensions; ties go to 4:3.
    pub fn closest(width: u32, height: u32) -> Self {
        let ratio = width.max(height) as f64 / width.min(height) as f64;
        if (ratio - Self::RATIO_4_3).abs() <= (ratio - Self::RATIO_16_9).abs() {
            AspectRatio::Ratio4x3
        } else {
            AspectRatio::Ratio16x9
        }
    }
}
