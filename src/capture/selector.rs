//! Capture resolution selection.
//!
//! Two independent strategies are offered. The preview strategy runs a
//! three-tier search over the sizes of the preferred format against a target
//! derived from the display aspect ratio. The format strategy searches the
//! full format x resolution catalog for the smallest pair inside a window.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::capture::frame::{order_by_preference, PixelFormat};
use crate::error::SessionError;
use crate::geometry::Size;

/// Largest aspect ratio deviation accepted by the first tier.
pub const ASPECT_TOLERANCE: f64 = 0.2;

/// Capture ceiling used by both strategies.
pub const MAXIMUM_RESOLUTION: Size = Size::new(1920, 1080);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectionStrategy {
    /// Three-tier aspect ratio search over the preferred format
    #[default]
    Preview,
    /// Smallest format/resolution pair inside [minimum, maximum]
    Format,
}

/// Target capture size for the preview strategy: the minimum height,
/// stretched to the display's landscape aspect ratio.
pub fn preview_target(minimum: Size, display: Size) -> Size {
    let long = display.width.max(display.height) as u64;
    let short = display.width.min(display.height) as u64;
    if short == 0 {
        return minimum;
    }

    let height = minimum.height;
    let width = (long * height as u64 / short) as u32;
    Size::new(width, height)
}

/// Pick a preview size from the advertised list.
///
/// Tiers are consulted in order and each only if the previous found nothing:
/// 1. ratio within [`ASPECT_TOLERANCE`] and tall enough, last match wins;
/// 2. tall enough and within [`MAXIMUM_RESOLUTION`], closest ratio wins,
///    first one on ties;
/// 3. tall enough, last match wins.
pub fn select_preview_size(sizes: &[Size], target: Size) -> Option<Size> {
    let target_ratio = target.aspect_ratio();
    let tall_enough = |size: &&Size| size.height >= target.height;

    let tolerated = sizes
        .iter()
        .filter(tall_enough)
        .filter(|size| (size.aspect_ratio() - target_ratio).abs() <= ASPECT_TOLERANCE)
        .last();
    if let Some(size) = tolerated {
        debug!(%size, "preview size within aspect tolerance");
        return Some(*size);
    }

    let mut closest = None;
    let mut min_diff = f64::MAX;
    for size in sizes.iter().filter(tall_enough) {
        if size.width > MAXIMUM_RESOLUTION.width || size.height > MAXIMUM_RESOLUTION.height {
            continue;
        }
        let diff = (size.aspect_ratio() - target_ratio).abs();
        if diff < min_diff {
            closest = Some(*size);
            min_diff = diff;
        }
    }
    if let Some(size) = closest {
        debug!(%size, diff = min_diff, "preview size by closest aspect ratio");
        return Some(size);
    }

    let fallback = sizes.iter().filter(tall_enough).last().copied();
    debug!(size = ?fallback, "preview size by height only");
    fallback
}

/// Pick the smallest `(format, resolution)` pair whose resolution lies in
/// `[minimum, MAXIMUM_RESOLUTION]` on both axes.
///
/// Falls back to the first advertised format at [`MAXIMUM_RESOLUTION`] when
/// nothing qualifies. Returns `None` only for an empty catalog.
pub fn select_format_and_resolution(
    candidates: &[(PixelFormat, Size)],
    minimum: Size,
) -> Option<(PixelFormat, Size)> {
    let (default_format, _) = candidates.first()?;

    let best = candidates
        .iter()
        .filter(|(_, size)| {
            size.width <= MAXIMUM_RESOLUTION.width
                && size.height <= MAXIMUM_RESOLUTION.height
                && size.width >= minimum.width
                && size.height >= minimum.height
        })
        .min_by_key(|(_, size)| size.pixel_count())
        .copied();

    Some(best.unwrap_or((*default_format, MAXIMUM_RESOLUTION)))
}

/// Resolve the capture format and resolution for a session.
///
/// The catalog is reordered by format preference first, so "first format"
/// in either strategy means the most preferred one the device offers.
pub fn select_capture(
    catalog: &[(PixelFormat, Size)],
    strategy: SelectionStrategy,
    minimum: Size,
    display: Size,
) -> Result<(PixelFormat, Size), SessionError> {
    let mut ordered = catalog.to_vec();
    order_by_preference(&mut ordered);

    let selected = match strategy {
        SelectionStrategy::Preview => {
            let format = ordered.first().map(|(format, _)| *format);
            format.and_then(|format| {
                let sizes: Vec<Size> = ordered
                    .iter()
                    .filter(|(f, _)| *f == format)
                    .map(|(_, size)| *size)
                    .collect();
                let target = preview_target(minimum, display);
                select_preview_size(&sizes, target).map(|size| (format, size))
            })
        }
        SelectionStrategy::Format => select_format_and_resolution(&ordered, minimum),
    };

    selected.ok_or(SessionError::NoCompatibleResolution)
}
