//! Input validation and grayscale conversion.
//!
//! Accepts raw encoded bytes (PNG, JPEG, BMP, WebP), a decoded
//! [`DynamicImage`], or a raw interleaved pixel buffer, and produces the
//! single-channel luminance image the rest of the pipeline works on.
//!
//! This is the first step in the pipeline: color in, `GrayImage` out.

use image::{DynamicImage, GrayImage, RgbImage, RgbaImage};

use crate::types::PipelineError;

/// Fixed-point luminance weights (14-bit): 0.299, 0.587, 0.114.
const R_WEIGHT: u32 = 4899;
const G_WEIGHT: u32 = 9617;
const B_WEIGHT: u32 = 1868;
const WEIGHT_SHIFT: u32 = 14;
const _: () = assert!(R_WEIGHT + G_WEIGHT + B_WEIGHT == 1 << WEIGHT_SHIFT);

/// Decode raw image bytes.
///
/// Supports whatever formats the `image` crate was built with.
///
/// # Errors
///
/// Returns [`PipelineError::EmptyInput`] if `bytes` is empty.
/// Returns [`PipelineError::ImageDecode`] if the image format is
/// unrecognized or the data is corrupt.
pub fn decode(bytes: &[u8]) -> Result<DynamicImage, PipelineError> {
    if bytes.is_empty() {
        return Err(PipelineError::EmptyInput);
    }

    Ok(image::load_from_memory(bytes)?)
}

/// Build a color image from a raw interleaved 8-bit buffer.
///
/// `channels` must be 3 (RGB) or 4 (RGBA).
///
/// # Errors
///
/// Returns [`PipelineError::EmptyInput`] for a zero-sized image and
/// [`PipelineError::InvalidInput`] for an unsupported channel count or a
/// buffer whose length does not match `width * height * channels`.
pub fn from_raw(
    width: u32,
    height: u32,
    channels: u8,
    bytes: Vec<u8>,
) -> Result<DynamicImage, PipelineError> {
    if width == 0 || height == 0 || bytes.is_empty() {
        return Err(PipelineError::EmptyInput);
    }
    let len = bytes.len();
    let mismatch = || {
        PipelineError::InvalidInput(format!(
            "buffer of {len} bytes does not hold {width}x{height} pixels with {channels} channels"
        ))
    };
    match channels {
        3 => RgbImage::from_raw(width, height, bytes)
            .map(DynamicImage::ImageRgb8)
            .ok_or_else(mismatch),
        4 => RgbaImage::from_raw(width, height, bytes)
            .map(DynamicImage::ImageRgba8)
            .ok_or_else(mismatch),
        n => Err(PipelineError::InvalidInput(format!(
            "expected a 3- or 4-channel color image, got {n} channel(s)"
        ))),
    }
}

/// Check that `image` is a non-empty color image and return its RGB
/// pixels. Alpha, if present, is dropped.
///
/// # Errors
///
/// Returns [`PipelineError::EmptyInput`] for a zero-sized image and
/// [`PipelineError::InvalidInput`] for grayscale (1- or 2-channel) input.
pub fn validate_color(image: &DynamicImage) -> Result<RgbImage, PipelineError> {
    if image.width() == 0 || image.height() == 0 {
        return Err(PipelineError::EmptyInput);
    }
    let channels = image.color().channel_count();
    if channels < 3 {
        return Err(PipelineError::InvalidInput(format!(
            "expected a color image with at least 3 channels, got {channels}"
        )));
    }
    Ok(image.to_rgb8())
}

/// Collapse RGB to luminance: `0.299*R + 0.587*G + 0.114*B`, rounded.
///
/// Output has one channel and the input's dimensions.
#[must_use = "returns the grayscale image"]
pub fn to_grayscale(image: &RgbImage) -> GrayImage {
    GrayImage::from_fn(image.width(), image.height(), |x, y| {
        let [r, g, b] = image.get_pixel(x, y).0;
        let luma = u32::from(r) * R_WEIGHT
            + u32::from(g) * G_WEIGHT
            + u32::from(b) * B_WEIGHT
            + (1 << (WEIGHT_SHIFT - 1));
        // Weights sum to 1 << WEIGHT_SHIFT, so the shifted value is <= 255.
        #[allow(clippy::cast_possible_truncation)]
        image::Luma([(luma >> WEIGHT_SHIFT) as u8])
    })
}
