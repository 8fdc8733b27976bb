//! Fixed-kernel Gaussian smoothing before morphology and thresholding.
//!
//! The kernel is specified by its side length only; the standard
//! deviation is derived from the size. Small odd sizes use the exact
//! binomial tables (5 -> `[1, 4, 6, 4, 1] / 16`), larger sizes sample a
//! Gaussian with `sigma = 0.3 * ((size - 1) / 2 - 1) + 0.8`.
//!
//! The 2-D convolution is applied separably via
//! [`imageproc::filter::separable_filter_equal`].

use image::GrayImage;

/// Binomial kernels used for the small sizes.
const SMALL_KERNELS: [&[f32]; 4] = [
    &[1.0],
    &[0.25, 0.5, 0.25],
    &[0.0625, 0.25, 0.375, 0.25, 0.0625],
    &[
        0.031_25, 0.109_375, 0.218_75, 0.281_25, 0.218_75, 0.109_375, 0.031_25,
    ],
];

/// Standard deviation implied by a kernel size.
#[must_use]
pub fn sigma_for_size(size: u32) -> f64 {
    0.3f64.mul_add((f64::from(size) - 1.0).mul_add(0.5, -1.0), 0.8)
}

/// Normalized 1-D Gaussian weights for an odd `size`.
///
/// An even size is rounded up to the next odd one.
#[must_use]
pub fn gaussian_kernel(size: u32) -> Vec<f32> {
    let size = size | 1;
    let index = (size / 2) as usize;
    if let Some(table) = SMALL_KERNELS.get(index) {
        return table.to_vec();
    }

    let sigma = sigma_for_size(size);
    let scale = -0.5 / (sigma * sigma);
    let half = f64::from(size / 2);
    let raw: Vec<f64> = (0..size)
        .map(|i| {
            let d = f64::from(i) - half;
            (scale * d * d).exp()
        })
        .collect();
    let sum: f64 = raw.iter().sum();
    #[allow(clippy::cast_possible_truncation)]
    raw.into_iter().map(|w| (w / sum) as f32).collect()
}

/// Smooth a grayscale image with a `kernel_size` x `kernel_size`
/// Gaussian.
///
/// A kernel size of 0 or 1 returns the image unchanged. Border pixels are
/// replicated outward.
#[must_use = "returns the blurred image"]
pub fn gaussian_blur(image: &GrayImage, kernel_size: u32) -> GrayImage {
    if kernel_size <= 1 {
        return image.clone();
    }

    let kernel = gaussian_kernel(kernel_size);
    imageproc::filter::separable_filter_equal(image, &kernel)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Create a test image with a sharp black-to-white boundary at x=5.
    fn sharp_edge_image() -> GrayImage {
        GrayImage::from_fn(10, 10, |x, _y| {
            if x < 5 {
                image::Luma([0])
            } else {
                image::Luma([255])
            }
        })
    }

    #[test]
    fn size_one_returns_identical_image() {
        let img = sharp_edge_image();
        assert_eq!(gaussian_blur(&img, 1), img);
    }

    #[test]
    fn five_tap_kernel_is_binomial() {
        let k = gaussian_kernel(5);
        assert_eq!(k, vec![0.0625, 0.25, 0.375, 0.25, 0.0625]);
    }

    #[test]
    fn sigma_for_five_is_one_point_one() {
        assert!((sigma_for_size(5) - 1.1).abs() < 1e-12);
    }

    #[test]
    fn large_kernels_are_normalized_and_symmetric() {
        let k = gaussian_kernel(11);
        assert_eq!(k.len(), 11);
        let sum: f32 = k.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5, "kernel sum {sum}");
        for i in 0..k.len() / 2 {
            assert!((k[i] - k[k.len() - 1 - i]).abs() < 1e-7);
        }
        assert!(k[5] > k[4] && k[4] > k[0]);
    }

    #[test]
    fn output_dimensions_preserved() {
        let img = GrayImage::new(17, 31);
        let blurred = gaussian_blur(&img, 5);
        assert_eq!(blurred.width(), 17);
        assert_eq!(blurred.height(), 31);
    }

    #[test]
    fn blur_smooths_sharp_edge() {
        let img = sharp_edge_image();
        let blurred = gaussian_blur(&img, 5);

        let left_of_edge = blurred.get_pixel(4, 5).0[0];
        let right_of_edge = blurred.get_pixel(5, 5).0[0];

        assert!(
            left_of_edge > 0,
            "expected blur to raise left-of-edge above 0, got {left_of_edge}",
        );
        assert!(
            right_of_edge < 255,
            "expected blur to lower right-of-edge below 255, got {right_of_edge}",
        );
    }

    #[test]
    fn blur_reach_is_limited_to_kernel_radius() {
        // A 5-tap kernel only reaches two pixels from the edge.
        let img = sharp_edge_image();
        let blurred = gaussian_blur(&img, 5);
        assert_eq!(blurred.get_pixel(2, 5).0[0], 0);
        assert_eq!(blurred.get_pixel(7, 5).0[0], 255);
    }

    #[test]
    fn uniform_image_unchanged_by_blur() {
        let img = GrayImage::from_fn(10, 10, |_, _| image::Luma([128]));
        let blurred = gaussian_blur(&img, 5);
        for pixel in blurred.pixels() {
            let diff = i16::from(pixel.0[0]) - 128;
            assert!(
                diff.abs() <= 1,
                "expected uniform image to stay near 128 after blur, got {}",
                pixel.0[0],
            );
        }
    }
}
