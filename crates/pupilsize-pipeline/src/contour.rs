//! Contour tracing and pupil candidate selection.
//!
//! Traces the outer borders of the white regions in a binary edge map and
//! picks the one enclosing the largest area. Nested borders (holes, and
//! anything inside them) are discarded: the pupil boundary is expected to
//! be the outermost closed curve around the dark region.

use image::GrayImage;
use imageproc::contours::BorderType;

use crate::types::{Contour, GridPoint};

/// Outer, top-level borders of the white regions in `edges`, in discovery
/// order (raster scan).
///
/// Uses Suzuki-Abe border following via
/// [`imageproc::contours::find_contours`]. Each border is compressed so
/// that straight horizontal, vertical and diagonal runs keep only their
/// endpoints.
#[must_use]
pub fn external_contours(edges: &GrayImage) -> Vec<Contour> {
    let contours: Vec<imageproc::contours::Contour<u32>> =
        imageproc::contours::find_contours(edges);

    contours
        .into_iter()
        .filter(|c| c.border_type == BorderType::Outer && c.parent.is_none())
        .map(|c| {
            let points: Vec<GridPoint> = c
                .points
                .into_iter()
                .map(|p| GridPoint::new(p.x, p.y))
                .collect();
            Contour::new(compress(&points))
        })
        .collect()
}

/// Drop every vertex that continues the previous step in the same
/// direction. The sequence is treated as closed.
fn compress(points: &[GridPoint]) -> Vec<GridPoint> {
    let n = points.len();
    if n < 3 {
        return points.to_vec();
    }

    let step = |from: GridPoint, to: GridPoint| {
        (
            i64::from(to.x) - i64::from(from.x),
            i64::from(to.y) - i64::from(from.y),
        )
    };

    points
        .iter()
        .enumerate()
        .filter(|&(i, &p)| {
            let prev = points[(i + n - 1) % n];
            let next = points[(i + 1) % n];
            step(prev, p) != step(p, next)
        })
        .map(|(_, &p)| p)
        .collect()
}

/// The contour with the largest enclosed area.
///
/// A later candidate replaces the current best only when its area is
/// strictly greater, so the first one found wins ties. Returns `None` for
/// an empty slice.
#[must_use]
pub fn largest_contour(contours: &[Contour]) -> Option<&Contour> {
    contours
        .iter()
        .fold(None, |best: Option<(&Contour, f64)>, candidate| {
            let area = candidate.area();
            match best {
                Some((_, best_area)) if area <= best_area => best,
                _ => Some((candidate, area)),
            }
        })
        .map(|(contour, _)| contour)
}

/// Index of [`largest_contour`] within `contours`.
#[must_use]
pub fn largest_contour_index(contours: &[Contour]) -> Option<usize> {
    let largest = largest_contour(contours)?;
    contours.iter().position(|c| std::ptr::eq(c, largest))
}

/// Trace `edges` and return its largest external contour, if any.
#[must_use]
pub fn largest_external_contour(edges: &GrayImage) -> Option<Contour> {
    let mut contours = external_contours(edges);
    let index = largest_contour_index(&contours)?;
    Some(contours.swap_remove(index))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn gp(x: u32, y: u32) -> GridPoint {
        GridPoint::new(x, y)
    }

    fn square_outline(img: &mut GrayImage, x0: u32, y0: u32, side: u32) {
        for i in 0..side {
            img.put_pixel(x0 + i, y0, image::Luma([255]));
            img.put_pixel(x0 + i, y0 + side - 1, image::Luma([255]));
            img.put_pixel(x0, y0 + i, image::Luma([255]));
            img.put_pixel(x0 + side - 1, y0 + i, image::Luma([255]));
        }
    }

    #[test]
    fn empty_image_produces_no_contours() {
        let img = GrayImage::new(10, 10);
        assert!(external_contours(&img).is_empty());
        assert!(largest_external_contour(&img).is_none());
    }

    #[test]
    fn square_outline_compresses_to_corners() {
        let mut img = GrayImage::new(20, 20);
        square_outline(&mut img, 5, 5, 8);
        let contours = external_contours(&img);
        assert_eq!(contours.len(), 1);
        let mut corners = contours[0].points().to_vec();
        corners.sort_by_key(|p| (p.y, p.x));
        assert_eq!(corners, vec![gp(5, 5), gp(12, 5), gp(5, 12), gp(12, 12)]);
        assert!((contours[0].area() - 49.0).abs() < 1e-9);
    }

    #[test]
    fn nested_contours_are_discarded() {
        let mut img = GrayImage::new(40, 40);
        square_outline(&mut img, 2, 2, 30);
        square_outline(&mut img, 10, 10, 8);
        let contours = external_contours(&img);
        assert_eq!(contours.len(), 1, "inner square must not be reported");
        assert!((contours[0].area() - 29.0 * 29.0).abs() < 1e-9);
    }

    #[test]
    fn separate_shapes_are_all_reported() {
        let mut img = GrayImage::new(40, 20);
        square_outline(&mut img, 2, 2, 6);
        square_outline(&mut img, 20, 2, 10);
        assert_eq!(external_contours(&img).len(), 2);
        let largest = largest_external_contour(&img).unwrap();
        assert!((largest.area() - 81.0).abs() < 1e-9);
    }

    #[test]
    fn compress_keeps_direction_changes_only() {
        let ring = vec![gp(0, 0), gp(1, 0), gp(2, 0), gp(2, 1), gp(2, 2), gp(1, 1)];
        assert_eq!(compress(&ring), vec![gp(0, 0), gp(2, 0), gp(2, 2)]);
    }

    #[test]
    fn compress_leaves_short_sequences_alone() {
        assert_eq!(compress(&[gp(3, 3)]), vec![gp(3, 3)]);
        assert_eq!(compress(&[gp(3, 3), gp(4, 3)]), vec![gp(3, 3), gp(4, 3)]);
    }

    #[test]
    fn largest_contour_of_nothing_is_none() {
        assert!(largest_contour(&[]).is_none());
        assert!(largest_contour_index(&[]).is_none());
    }

    #[test]
    fn largest_contour_picks_max_area() {
        let small = Contour::new(vec![gp(0, 0), gp(2, 0), gp(2, 2), gp(0, 2)]);
        let big = Contour::new(vec![gp(0, 0), gp(5, 0), gp(5, 5), gp(0, 5)]);
        let contours = vec![small, big.clone()];
        assert_eq!(largest_contour(&contours), Some(&big));
        assert_eq!(largest_contour_index(&contours), Some(1));
    }

    #[test]
    fn ties_go_to_the_first_found() {
        let first = Contour::new(vec![gp(0, 0), gp(3, 0), gp(3, 3), gp(0, 3)]);
        let second = Contour::new(vec![gp(10, 10), gp(13, 10), gp(13, 13), gp(10, 13)]);
        let contours = vec![first, second];
        assert_eq!(largest_contour_index(&contours), Some(0));
    }

    #[test]
    fn zero_area_contours_are_still_candidates() {
        let line = Contour::new(vec![gp(0, 0), gp(4, 0)]);
        let contours = vec![line];
        assert_eq!(largest_contour_index(&contours), Some(0));
    }
}
