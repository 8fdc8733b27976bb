//! Grayscale morphological opening with a flat square structuring element.
//!
//! Erosion (local minimum) shrinks bright regions and removes bright
//! speckle; the following dilation (local maximum) regrows what survived.
//! The pupil is dark, so opening cleans glints and eyelash highlights out
//! of it while keeping its outline.
//!
//! Wraps [`imageproc::morphology::grayscale_erode`] and
//! [`imageproc::morphology::grayscale_dilate`]. Pixels outside the image
//! are ignored by both.

use image::GrayImage;
use imageproc::morphology::{Mask, grayscale_dilate, grayscale_erode};

/// Flat square mask with side length `kernel_size` (odd), anchored at
/// its center.
fn square_mask(kernel_size: u32) -> Mask {
    let radius = u8::try_from(kernel_size / 2).unwrap_or(u8::MAX);
    Mask::square(radius)
}

/// Erode `iterations` times with a `kernel_size` square.
#[must_use = "returns the eroded image"]
pub fn erode(image: &GrayImage, kernel_size: u32, iterations: u32) -> GrayImage {
    let mask = square_mask(kernel_size);
    (0..iterations).fold(image.clone(), |acc, _| grayscale_erode(&acc, &mask))
}

/// Dilate `iterations` times with a `kernel_size` square.
#[must_use = "returns the dilated image"]
pub fn dilate(image: &GrayImage, kernel_size: u32, iterations: u32) -> GrayImage {
    let mask = square_mask(kernel_size);
    (0..iterations).fold(image.clone(), |acc, _| grayscale_dilate(&acc, &mask))
}

/// Opening: [`erode`] `erode_iterations` times, then [`dilate`]
/// `dilate_iterations` times, with the same element.
#[must_use = "returns the opened image"]
pub fn open(
    image: &GrayImage,
    kernel_size: u32,
    erode_iterations: u32,
    dilate_iterations: u32,
) -> GrayImage {
    let eroded = erode(image, kernel_size, erode_iterations);
    dilate(&eroded, kernel_size, dilate_iterations)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn disk(size: u32, cx: f64, cy: f64, r: f64, inside: u8, outside: u8) -> GrayImage {
        GrayImage::from_fn(size, size, |x, y| {
            let dx = f64::from(x) - cx;
            let dy = f64::from(y) - cy;
            if dx.hypot(dy) <= r {
                image::Luma([inside])
            } else {
                image::Luma([outside])
            }
        })
    }

    #[test]
    fn zero_iterations_is_identity() {
        let img = disk(30, 15.0, 15.0, 8.0, 255, 0);
        assert_eq!(open(&img, 5, 0, 0), img);
    }

    #[test]
    fn erode_takes_neighborhood_minimum() {
        let mut img = GrayImage::from_pixel(9, 9, image::Luma([200]));
        img.put_pixel(4, 4, image::Luma([10]));
        let eroded = erode(&img, 5, 1);
        assert_eq!(eroded.get_pixel(2, 2).0[0], 10);
        assert_eq!(eroded.get_pixel(6, 6).0[0], 10);
        assert_eq!(eroded.get_pixel(1, 4).0[0], 200);
    }

    #[test]
    fn dilate_takes_neighborhood_maximum() {
        let mut img = GrayImage::new(9, 9);
        img.put_pixel(4, 4, image::Luma([90]));
        let dilated = dilate(&img, 5, 1);
        assert_eq!(dilated.get_pixel(2, 6).0[0], 90);
        assert_eq!(dilated.get_pixel(7, 4).0[0], 0);
    }

    #[test]
    fn iterations_compound() {
        let mut img = GrayImage::new(21, 21);
        img.put_pixel(10, 10, image::Luma([255]));
        let dilated = dilate(&img, 5, 3);
        // Three 5x5 passes reach six pixels out.
        assert_eq!(dilated.get_pixel(4, 10).0[0], 255);
        assert_eq!(dilated.get_pixel(3, 10).0[0], 0);
    }

    #[test]
    fn opening_removes_bright_speckle() {
        let mut img = GrayImage::from_pixel(40, 40, image::Luma([20]));
        img.put_pixel(20, 20, image::Luma([255]));
        img.put_pixel(21, 20, image::Luma([255]));
        let opened = open(&img, 5, 3, 3);
        assert!(opened.pixels().all(|p| p.0[0] == 20));
    }

    #[test]
    fn opening_clears_glint_inside_dark_pupil() {
        let mut img = disk(80, 40.0, 40.0, 25.0, 10, 220);
        for y in 38..41 {
            for x in 44..47 {
                img.put_pixel(x, y, image::Luma([250]));
            }
        }
        let opened = open(&img, 5, 3, 3);
        assert_eq!(opened.get_pixel(45, 39).0[0], 10);
        // Surrounding tissue stays bright.
        assert_eq!(opened.get_pixel(2, 2).0[0], 220);
    }

    #[test]
    fn opening_preserves_large_dark_region_extent() {
        let img = disk(100, 50.0, 50.0, 30.0, 0, 255);
        let opened = open(&img, 5, 3, 3);
        // The dark disk can only grow under opening, and by no more than
        // a corner rounding; its horizontal extent is unchanged.
        let dark_on_row = |im: &GrayImage| {
            (0..100)
                .filter(|&x| im.get_pixel(x, 50).0[0] == 0)
                .count()
        };
        assert_eq!(dark_on_row(&opened), dark_on_row(&img));
    }

    #[test]
    fn opening_is_idempotent() {
        let img = disk(100, 50.0, 48.0, 30.0, 255, 0);
        let once = open(&img, 5, 3, 3);
        let twice = open(&once, 5, 3, 3);
        assert_eq!(once, twice);
    }

    #[test]
    fn output_dimensions_preserved() {
        let img = GrayImage::new(17, 31);
        let opened = open(&img, 5, 3, 3);
        assert_eq!(opened.dimensions(), (17, 31));
    }
}
