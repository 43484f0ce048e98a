//! Downscaling of task images before upload.

use std::io::Cursor;

use image::{DynamicImage, ImageFormat, imageops::FilterType};

use crate::blob::BlobError;

pub const JPEG_CONTENT_TYPE: &str = "image/jpeg";

/// Dimensions of a `width` × `height` image scaled so that its longer side is
/// at most `max`. Aspect ratio is kept and images are never upscaled.
pub fn fit_within(width: u32, height: u32, max: u32) -> (u32, u32) {
    if max == 0 || (width <= max && height <= max) {
        return (width, height);
    }
    let scale = |short: u32, long: u32| {
        let scaled = (u64::from(short) * u64::from(max) + u64::from(long) / 2) / u64::from(long);
        (scaled as u32).max(1)
    };
    if width >= height {
        (max, scale(height, width))
    } else {
        (scale(width, height), max)
    }
}

/// Decode `bytes`, shrink to fit `max` and re-encode as JPEG.
pub fn downscale_to_jpeg(bytes: &[u8], max: u32) -> Result<Vec<u8>, BlobError> {
    let decoded = image::load_from_memory(bytes).map_err(|e| BlobError::Image(e.to_string()))?;
    let (width, height) = fit_within(decoded.width(), decoded.height(), max);
    let resized = if (width, height) == (decoded.width(), decoded.height()) {
        decoded
    } else {
        decoded.resize_exact(width, height, FilterType::Triangle)
    };

    // JPEG has no alpha channel.
    let rgb = DynamicImage::ImageRgb8(resized.to_rgb8());
    let mut out = Cursor::new(Vec::new());
    rgb.write_to(&mut out, ImageFormat::Jpeg)
        .map_err(|e| BlobError::Image(e.to_string()))?;
    Ok(out.into_inner())
}
