//! Fixed global binarization.
//!
//! Separates the dark pupil (0) from the surrounding tissue (255) with a
//! single hard-coded cutoff. No adaptive thresholding.

use image::GrayImage;

/// Map every pixel strictly above `threshold` to 255 and the rest to 0.
#[must_use = "returns the binary image"]
pub fn binarize(image: &GrayImage, threshold: u8) -> GrayImage {
    GrayImage::from_fn(image.width(), image.height(), |x, y| {
        if image.get_pixel(x, y).0[0] > threshold {
            image::Luma([u8::MAX])
        } else {
            image::Luma([0])
        }
    })
}

/// Number of foreground (255) pixels in a binary image.
#[must_use]
pub fn foreground_count(binary: &GrayImage) -> u64 {
    binary.pixels().map(|p| u64::from(p.0[0] == u8::MAX)).sum()
}
