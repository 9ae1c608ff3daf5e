//! Pixel comparison of captured snapshots against reference images.
//!
//! The decision procedure is:
//! 1. A missing reference image is substituted with a built-in placeholder
//!    so a first run reports a baseline mismatch instead of crashing.
//! 2. Differing dimensions short-circuit to [`ComparisonResult::LayoutMismatch`]
//!    without any per-pixel work.
//! 3. Otherwise pixels are counted as different when they exceed the color
//!    tolerance and no pixel in the 3x3 neighborhood of the reference image
//!    matches (tolerates anti-aliased edges).
//!
//! Note: this is a simplification of the full pixelmatch algorithm. There is
//! no YIQ-space color distance and no dedicated anti-aliasing detector, so
//! diff counts on heavily anti-aliased content differ from pixelmatch.

use image::{Rgba, RgbaImage};
use std::path::Path;

/// Per-channel color tolerance (0.1 on a 0-1 scale, ~25/255).
pub const COLOR_TOLERANCE: u8 = 25;

/// Side length of the generated placeholder reference image.
pub const PLACEHOLDER_SIZE: u32 = 64;

/// Highlight color used for differing pixels in the diff image.
const DIFF_HIGHLIGHT: Rgba<u8> = Rgba([255, 0, 0, 255]);

/// Outcome of comparing a captured snapshot against its reference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonResult {
    /// No pixel differs beyond tolerance
    Match,

    /// Images have equal dimensions but differ in this many pixels
    Mismatch(u64),

    /// Images have different dimensions; no pixel count was computed
    LayoutMismatch,
}

impl std::fmt::Display for ComparisonResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ComparisonResult::Match => write!(f, "images match"),
            ComparisonResult::Mismatch(count) => {
                write!(f, "images mismatch with {} pixels", count)
            }
            ComparisonResult::LayoutMismatch => write!(f, "images have different dimensions"),
        }
    }
}

/// Result type for comparison operations
pub type CompareResult<T> = Result<T, CompareError>;

/// Error types for comparison operations
#[derive(Debug)]
pub enum CompareError {
    /// I/O error while reading or writing an image file
    Io(std::io::Error),

    /// Image file exists but could not be decoded
    Decode(String),
}

impl std::fmt::Display for CompareError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompareError::Io(err) => write!(f, "I/O error: {}", err),
            CompareError::Decode(msg) => write!(f, "Decode error: {}", msg),
        }
    }
}

impl std::error::Error for CompareError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CompareError::Io(err) => Some(err),
            CompareError::Decode(_) => None,
        }
    }
}

impl From<std::io::Error> for CompareError {
    fn from(err: std::io::Error) -> Self {
        CompareError::Io(err)
    }
}

impl From<image::ImageError> for CompareError {
    fn from(err: image::ImageError) -> Self {
        match err {
            image::ImageError::IoError(io) => CompareError::Io(io),
            other => CompareError::Decode(other.to_string()),
        }
    }
}

/// Compare a captured snapshot against a reference image.
///
/// Fails with [`CompareError::Io`] when `actual` is missing or unreadable.
/// A missing `expected` file is substituted with [`placeholder_reference`].
/// When `diff` is given and pixels differ, a diff image is written
/// best-effort: a write failure is logged and never changes the result.
pub fn compare(
    actual: &Path,
    expected: &Path,
    diff: Option<&Path>,
) -> CompareResult<ComparisonResult> {
    if !actual.exists() {
        return Err(CompareError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("actual file is required, cannot get [{}]", actual.display()),
        )));
    }

    let actual_img = image::open(actual)?.to_rgba8();

    let expected_img = if expected.exists() {
        image::open(expected)?.to_rgba8()
    } else {
        tracing::warn!(
            expected = %expected.display(),
            "reference image does not exist, using placeholder"
        );
        placeholder_reference()
    };

    if actual_img.dimensions() != expected_img.dimensions() {
        tracing::debug!(
            actual = ?actual_img.dimensions(),
            expected = ?expected_img.dimensions(),
            "layout mismatch"
        );
        return Ok(ComparisonResult::LayoutMismatch);
    }

    let (count, diff_img) = count_different_pixels(&actual_img, &expected_img, diff.is_some());

    if count == 0 {
        return Ok(ComparisonResult::Match);
    }

    if let (Some(path), Some(img)) = (diff, diff_img) {
        // Best-effort: the numeric result stands even if the diff cannot be written.
        if let Err(err) = img.save(path) {
            tracing::warn!(path = %path.display(), error = %err, "failed to write diff image");
        }
    }

    Ok(ComparisonResult::Mismatch(count))
}

/// Count pixels of `actual` that differ from `expected` beyond tolerance,
/// optionally building a diff image with differing pixels highlighted.
///
/// Both images must have equal dimensions.
fn count_different_pixels(
    actual: &RgbaImage,
    expected: &RgbaImage,
    build_diff: bool,
) -> (u64, Option<RgbaImage>) {
    let (width, height) = actual.dimensions();
    let mut diff_img = if build_diff { Some(actual.clone()) } else { None };
    let mut count = 0u64;

    for y in 0..height {
        for x in 0..width {
            let a = actual.get_pixel(x, y);
            if pixels_match(a, expected.get_pixel(x, y)) {
                continue;
            }
            if matches_neighborhood(a, expected, x, y) {
                continue;
            }
            count += 1;
            if let Some(img) = diff_img.as_mut() {
                img.put_pixel(x, y, DIFF_HIGHLIGHT);
            }
        }
    }

    (count, diff_img)
}

/// Whether two pixels are within the per-channel color tolerance
fn pixels_match(a: &Rgba<u8>, b: &Rgba<u8>) -> bool {
    a.0.iter()
        .zip(b.0.iter())
        .all(|(&ca, &cb)| ca.abs_diff(cb) <= COLOR_TOLERANCE)
}

/// Whether `pixel` matches any pixel in the 3x3 neighborhood of (x, y)
/// in the reference image. The center was already rejected by the caller.
fn matches_neighborhood(pixel: &Rgba<u8>, expected: &RgbaImage, x: u32, y: u32) -> bool {
    let (width, height) = expected.dimensions();
    for dy in -1i64..=1 {
        for dx in -1i64..=1 {
            if dx == 0 && dy == 0 {
                continue;
            }
            let nx = x as i64 + dx;
            let ny = y as i64 + dy;
            if nx < 0 || ny < 0 || nx >= width as i64 || ny >= height as i64 {
                continue;
            }
            if pixels_match(pixel, expected.get_pixel(nx as u32, ny as u32)) {
                return true;
            }
        }
    }
    false
}

/// Built-in reference used when no baseline exists yet: a fixed-size
/// magenta/black checkerboard that no real snapshot should ever match.
pub fn placeholder_reference() -> RgbaImage {
    RgbaImage::from_fn(PLACEHOLDER_SIZE, PLACEHOLDER_SIZE, |x, y| {
        if (x / 8 + y / 8) % 2 == 0 {
            Rgba([255, 0, 255, 255])
        } else {
            Rgba([0, 0, 0, 255])
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;

    fn solid_image(width: u32, height: u32, color: [u8; 4]) -> RgbaImage {
        RgbaImage::from_pixel(width, height, Rgba(color))
    }

    fn save(dir: &Path, name: &str, img: &RgbaImage) -> PathBuf {
        let path = dir.join(name);
        img.save(&path).expect("failed to save test image");
        path
    }

    #[test]
    fn identical_images_match_and_write_no_diff() {
        let dir = tempfile::tempdir().unwrap();
        let img = solid_image(16, 16, [40, 40, 40, 255]);
        let actual = save(dir.path(), "actual.png", &img);
        let expected = save(dir.path(), "expected.png", &img);
        let diff = dir.path().join("diff.png");

        let result = compare(&actual, &expected, Some(&diff)).unwrap();

        assert_eq!(result, ComparisonResult::Match);
        assert!(!diff.exists());
    }

    #[test]
    fn dimension_mismatch_short_circuits() {
        let dir = tempfile::tempdir().unwrap();
        let actual = save(dir.path(), "actual.png", &solid_image(16, 16, [0, 0, 0, 255]));
        let expected = save(dir.path(), "expected.png", &solid_image(16, 8, [0, 0, 0, 255]));

        let result = compare(&actual, &expected, None).unwrap();

        assert_eq!(result, ComparisonResult::LayoutMismatch);
    }

    #[test]
    fn counts_isolated_differing_pixels() {
        let dir = tempfile::tempdir().unwrap();
        let expected_img = solid_image(16, 16, [0, 0, 0, 255]);
        let mut actual_img = expected_img.clone();
        // Isolated pixels with no matching neighbor in the reference.
        for &(x, y) in &[(2, 2), (8, 8), (13, 13)] {
            actual_img.put_pixel(x, y, Rgba([255, 255, 255, 255]));
        }
        let actual = save(dir.path(), "actual.png", &actual_img);
        let expected = save(dir.path(), "expected.png", &expected_img);

        let result = compare(&actual, &expected, None).unwrap();

        assert_eq!(result, ComparisonResult::Mismatch(3));
    }

    #[test]
    fn tolerates_pixels_matching_a_neighbor() {
        let dir = tempfile::tempdir().unwrap();
        // Reference has a white block; actual shifts its edge by one pixel.
        let mut expected_img = solid_image(16, 16, [0, 0, 0, 255]);
        for y in 0..16 {
            for x in 0..8 {
                expected_img.put_pixel(x, y, Rgba([255, 255, 255, 255]));
            }
        }
        let mut actual_img = expected_img.clone();
        for y in 0..16 {
            actual_img.put_pixel(8, y, Rgba([255, 255, 255, 255]));
        }
        let actual = save(dir.path(), "actual.png", &actual_img);
        let expected = save(dir.path(), "expected.png", &expected_img);

        let result = compare(&actual, &expected, None).unwrap();

        assert_eq!(result, ComparisonResult::Match);
    }

    #[test]
    fn within_tolerance_changes_match() {
        let dir = tempfile::tempdir().unwrap();
        let actual = save(dir.path(), "actual.png", &solid_image(8, 8, [100, 100, 100, 255]));
        let expected = save(
            dir.path(),
            "expected.png",
            &solid_image(8, 8, [100 + COLOR_TOLERANCE, 100, 100, 255]),
        );

        let result = compare(&actual, &expected, None).unwrap();

        assert_eq!(result, ComparisonResult::Match);
    }

    #[test]
    fn writes_diff_image_on_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let expected_img = solid_image(16, 16, [0, 0, 0, 255]);
        let mut actual_img = expected_img.clone();
        actual_img.put_pixel(5, 5, Rgba([255, 255, 255, 255]));
        let actual = save(dir.path(), "actual.png", &actual_img);
        let expected = save(dir.path(), "expected.png", &expected_img);
        let diff = dir.path().join("diff.png");

        let result = compare(&actual, &expected, Some(&diff)).unwrap();

        assert_eq!(result, ComparisonResult::Mismatch(1));
        assert!(diff.exists());
        let diff_img = image::open(&diff).unwrap().to_rgba8();
        assert_eq!(*diff_img.get_pixel(5, 5), Rgba([255, 0, 0, 255]));
        // Untouched pixels are copied from the actual image.
        assert_eq!(*diff_img.get_pixel(0, 0), Rgba([0, 0, 0, 255]));
    }

    #[test]
    fn missing_actual_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let expected = save(dir.path(), "expected.png", &solid_image(8, 8, [0, 0, 0, 255]));

        let result = compare(&dir.path().join("missing.png"), &expected, None);

        assert!(matches!(result, Err(CompareError::Io(_))));
    }

    #[test]
    fn missing_reference_falls_back_to_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        // Same dimensions as the placeholder but a different fill, so the
        // comparison proceeds past the layout check and reports a mismatch.
        let actual_img = solid_image(PLACEHOLDER_SIZE, PLACEHOLDER_SIZE, [10, 200, 10, 255]);
        let actual = save(dir.path(), "actual.png", &actual_img);

        let result = compare(&actual, &dir.path().join("no_ref.png"), None).unwrap();

        assert!(matches!(result, ComparisonResult::Mismatch(_)));
    }
}
