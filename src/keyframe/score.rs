use image::imageops::{self, FilterType};

use super::normalize::IntensityBuffer;

/// Mean absolute intensity difference, normalized to `[0.0, 1.0]`.
///
/// When dimensions differ, `b` is resized (nearest neighbor) to match `a`, so the
/// score is only symmetric when both buffers already share dimensions.
pub fn score(a: &IntensityBuffer, b: &IntensityBuffer) -> f64 {
    if a.is_empty() {
        return if b.is_empty() { 0.0 } else { 1.0 };
    }
    if b.is_empty() {
        return 1.0;
    }

    let reconciled;
    let b_image = if (a.width(), a.height()) != (b.width(), b.height()) {
        reconciled = imageops::resize(b.as_image(), a.width(), a.height(), FilterType::Nearest);
        &reconciled
    } else {
        b.as_image()
    };

    let a_pixels = a.as_image().as_raw();
    let total: u64 = a_pixels
        .iter()
        .zip(b_image.as_raw())
        .map(|(&x, &y)| u64::from(x.abs_diff(y)))
        .sum();

    total as f64 / a_pixels.len() as f64 / 255.0
}
