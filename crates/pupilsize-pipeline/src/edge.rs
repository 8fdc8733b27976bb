//! Canny edge detection on the binarized image.
//!
//! Returns a binary image where white pixels (255) are edges and black
//! pixels (0) are background.
//!
//! Unlike [`imageproc::edges::canny`], this detector does not blur its
//! input first: smoothing already happened upstream in [`crate::blur`],
//! and on a binary input an extra blur only moves the boundary. Gradient
//! magnitude is the L1 norm `|gx| + |gy|` of the 3x3 Sobel responses.

use image::{GrayImage, Luma};
use imageproc::definitions::{HasBlack, HasWhite, Image};
use imageproc::filter::filter_clamped;
use imageproc::kernel;

/// Minimum allowed Canny threshold.
///
/// A low threshold of zero would admit every pixel with any gradient as a
/// potential edge.
pub const MIN_THRESHOLD: f32 = 1.0;
const _: () = assert!(MIN_THRESHOLD > 0.0);

/// Detect edges using the Canny algorithm.
///
/// Pixels with gradient magnitude at or above `high_threshold` seed
/// edges; pixels at or above `low_threshold` are edges only when
/// 8-connected to a seed.
///
/// Both thresholds are clamped to a minimum of [`MIN_THRESHOLD`] and
/// `low_threshold` is clamped to be at most `high_threshold`. Images
/// narrower or shorter than three pixels have no interior and produce an
/// empty edge map.
#[must_use = "returns the binary edge map"]
pub fn canny(image: &GrayImage, low_threshold: f32, high_threshold: f32) -> GrayImage {
    let (low, high) = clamp_thresholds(low_threshold, high_threshold);

    let (width, height) = image.dimensions();
    if width < 3 || height < 3 {
        return GrayImage::new(width, height);
    }

    let gx: Image<Luma<i16>> = filter_clamped(image, kernel::SOBEL_HORIZONTAL_3X3);
    let gy: Image<Luma<i16>> = filter_clamped(image, kernel::SOBEL_VERTICAL_3X3);
    let magnitude = Image::from_fn(width, height, |x, y| {
        let h = f32::from(gx.get_pixel(x, y).0[0]);
        let v = f32::from(gy.get_pixel(x, y).0[0]);
        Luma([h.abs() + v.abs()])
    });

    let thinned = non_maximum_suppression(&magnitude, &gx, &gy);
    hysteresis(&thinned, low, high)
}

/// The `(low, high)` pair [`canny`] actually uses: both at least
/// [`MIN_THRESHOLD`], and `low <= high`.
#[must_use]
pub fn clamp_thresholds(low: f32, high: f32) -> (f32, f32) {
    let high = high.max(MIN_THRESHOLD);
    (low.max(MIN_THRESHOLD).min(high), high)
}

/// Number of edge pixels (value 255) in an edge map.
#[must_use]
pub fn count_edge_pixels(edges: &GrayImage) -> u64 {
    edges.pixels().map(|p| u64::from(p.0[0] == u8::MAX)).sum()
}

/// Gradient direction quantized to the four neighbor axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Horizontal,
    Diagonal,
    Vertical,
    AntiDiagonal,
}

impl Direction {
    fn of(gx: f32, gy: f32) -> Self {
        let mut angle = gy.atan2(gx).to_degrees();
        if angle < 0.0 {
            angle += 180.0;
        }
        if (22.5..67.5).contains(&angle) {
            Self::Diagonal
        } else if (67.5..112.5).contains(&angle) {
            Self::Vertical
        } else if (112.5..157.5).contains(&angle) {
            Self::AntiDiagonal
        } else {
            Self::Horizontal
        }
    }

    /// The two neighbors across the edge, the one with the smaller row
    /// (or, on the same row, the smaller column) first.
    const fn neighbors(self, x: u32, y: u32) -> [(u32, u32); 2] {
        match self {
            Self::Horizontal => [(x - 1, y), (x + 1, y)],
            Self::Diagonal => [(x - 1, y - 1), (x + 1, y + 1)],
            Self::Vertical => [(x, y - 1), (x, y + 1)],
            Self::AntiDiagonal => [(x + 1, y - 1), (x - 1, y + 1)],
        }
    }
}

/// Keep pixels that are local maxima across the edge direction.
///
/// A pixel survives when it is strictly greater than its first neighbor
/// and at least as large as its second. On a two-pixel plateau (a step
/// edge between two flat regions) this keeps exactly one pixel instead of
/// both. The one-pixel border is always zero.
fn non_maximum_suppression(
    g: &Image<Luma<f32>>,
    gx: &Image<Luma<i16>>,
    gy: &Image<Luma<i16>>,
) -> Image<Luma<f32>> {
    let (width, height) = g.dimensions();
    let mut out = Image::from_pixel(width, height, Luma([0.0]));
    for y in 1..height - 1 {
        for x in 1..width - 1 {
            let m = g.get_pixel(x, y).0[0];
            if m <= 0.0 {
                continue;
            }
            let direction = Direction::of(
                f32::from(gx.get_pixel(x, y).0[0]),
                f32::from(gy.get_pixel(x, y).0[0]),
            );
            let [(ax, ay), (bx, by)] = direction.neighbors(x, y);
            let a = g.get_pixel(ax, ay).0[0];
            let b = g.get_pixel(bx, by).0[0];
            if m > a && m >= b {
                out.put_pixel(x, y, Luma([m]));
            }
        }
    }
    out
}

/// Filter out edges with the thresholds.
/// Non-recursive search over all 8 neighbors.
fn hysteresis(input: &Image<Luma<f32>>, low_thresh: f32, high_thresh: f32) -> GrayImage {
    let (w, h) = input.dimensions();
    let mut out = Image::from_pixel(w, h, Luma::black());
    let mut stack = Vec::new();
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            if input.get_pixel(x, y).0[0] < high_thresh || out.get_pixel(x, y).0[0] != 0 {
                continue;
            }
            out.put_pixel(x, y, Luma::white());
            stack.push((x, y));
            while let Some((nx, ny)) = stack.pop() {
                let neighbors = [
                    (nx.wrapping_sub(1), ny.wrapping_sub(1)),
                    (nx, ny.wrapping_sub(1)),
                    (nx + 1, ny.wrapping_sub(1)),
                    (nx.wrapping_sub(1), ny),
                    (nx + 1, ny),
                    (nx.wrapping_sub(1), ny + 1),
                    (nx, ny + 1),
                    (nx + 1, ny + 1),
                ];
                for (px, py) in neighbors {
                    // wrapping_sub past zero lands far outside the image.
                    if px >= w || py >= h {
                        continue;
                    }
                    if input.get_pixel(px, py).0[0] >= low_thresh && out.get_pixel(px, py).0[0] == 0
                    {
                        out.put_pixel(px, py, Luma::white());
                        stack.push((px, py));
                    }
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 20x20 image with `left` in columns 0..10 and `right` in 10..20.
    fn step_between(left: u8, right: u8) -> GrayImage {
        GrayImage::from_fn(20, 20, |x, _y| {
            if x < 10 { Luma([left]) } else { Luma([right]) }
        })
    }

    fn step_image() -> GrayImage {
        step_between(0, 255)
    }

    fn edge_columns(edges: &GrayImage, y: u32) -> Vec<u32> {
        (0..edges.width())
            .filter(|&x| edges.get_pixel(x, y).0[0] == 255)
            .collect()
    }

    #[test]
    fn output_dimensions_match_input() {
        let img = GrayImage::new(17, 31);
        let edges = canny(&img, 100.0, 200.0);
        assert_eq!(edges.dimensions(), (17, 31));
    }

    #[test]
    fn uniform_image_has_no_edges() {
        let img = GrayImage::from_pixel(20, 20, Luma([128]));
        assert_eq!(count_edge_pixels(&canny(&img, 100.0, 200.0)), 0);
    }

    #[test]
    fn step_edge_is_one_pixel_thick() {
        let edges = canny(&step_image(), 100.0, 200.0);
        for y in 1..19 {
            assert_eq!(edge_columns(&edges, y), vec![9], "row {y}");
        }
    }

    #[test]
    fn step_edge_position_does_not_depend_on_polarity() {
        let edges = canny(&step_between(255, 0), 100.0, 200.0);
        assert_eq!(edge_columns(&edges, 10), vec![9]);
    }

    #[test]
    fn output_is_strictly_binary() {
        let img = GrayImage::from_fn(30, 30, |x, y| {
            if (x as i32 - 15).pow(2) + (y as i32 - 15).pow(2) < 64 {
                Luma([0])
            } else {
                Luma([255])
            }
        });
        let edges = canny(&img, 100.0, 200.0);
        assert!(edges.pixels().all(|p| p.0[0] == 0 || p.0[0] == 255));
        assert!(count_edge_pixels(&edges) > 0);
    }

    #[test]
    fn weak_gradient_below_high_threshold_is_dropped() {
        // A 0 -> 20 step has Sobel L1 magnitude 80, below both thresholds.
        let img = step_between(0, 20);
        assert_eq!(count_edge_pixels(&canny(&img, 100.0, 200.0)), 0);
    }

    #[test]
    fn weak_pixels_connected_to_strong_pixels_are_kept() {
        // Top half: strong step (0 -> 255). Bottom half: weaker step
        // (0 -> 40, magnitude 160) that only survives through hysteresis.
        let img = GrayImage::from_fn(20, 20, |x, y| match (x < 10, y < 10) {
            (true, _) => Luma([0]),
            (false, true) => Luma([255]),
            (false, false) => Luma([40]),
        });
        let edges = canny(&img, 100.0, 200.0);
        assert_eq!(edge_columns(&edges, 15), vec![9]);

        let isolated = step_between(0, 40);
        assert_eq!(count_edge_pixels(&canny(&isolated, 100.0, 200.0)), 0);
    }

    #[test]
    fn tiny_images_produce_empty_maps() {
        for (w, h) in [(0, 0), (1, 5), (2, 2), (5, 2)] {
            let img = GrayImage::from_pixel(w, h, Luma([255]));
            let edges = canny(&img, 100.0, 200.0);
            assert_eq!(edges.dimensions(), (w, h));
            assert_eq!(count_edge_pixels(&edges), 0);
        }
    }

    #[test]
    fn border_edge_does_not_panic() {
        let mut img = GrayImage::from_pixel(10, 10, Luma([0]));
        for y in 0..10 {
            img.put_pixel(1, y, Luma([255]));
        }
        let _edges = canny(&img, 1.0, 2.0);
    }

    #[test]
    fn inverted_thresholds_are_clamped() {
        let edges = canny(&step_image(), 300.0, 200.0);
        assert_eq!(edge_columns(&edges, 5), vec![9]);
    }

    #[test]
    fn clamp_thresholds_orders_and_floors() {
        assert_eq!(clamp_thresholds(100.0, 200.0), (100.0, 200.0));
        assert_eq!(clamp_thresholds(0.0, 0.5), (1.0, 1.0));
        assert_eq!(clamp_thresholds(250.0, 200.0), (200.0, 200.0));
    }

    #[test]
    fn zero_thresholds_are_clamped_to_minimum() {
        let img = GrayImage::from_pixel(20, 20, Luma([77]));
        assert_eq!(count_edge_pixels(&canny(&img, 0.0, 0.0)), 0);
    }
}
