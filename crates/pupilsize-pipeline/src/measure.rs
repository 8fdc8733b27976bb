//! Ellipse fitting on the selected contour and pixel-to-millimeter
//! conversion.

use image::GrayImage;

use crate::contour;
use crate::ellipse;
use crate::types::{
    Calibration, Contour, FittedEllipse, Measurement, PupilMeasurement, UnmeasuredReason,
};

/// Fewest contour vertices an ellipse fit is attempted on.
pub const MIN_ELLIPSE_POINTS: usize = ellipse::MIN_FIT_POINTS;

/// Fit an ellipse to `contour` and convert its axes to millimeters.
///
/// A missing contour, one with fewer than [`MIN_ELLIPSE_POINTS`]
/// vertices, or one whose best-fit conic is not an ellipse yields
/// [`Measurement::Unmeasured`]; this function never fails.
#[must_use]
pub fn measure_contour(contour: Option<&Contour>, calibration: &Calibration) -> Measurement {
    let Some(contour) = contour else {
        tracing::info!("no contours found, pupil not measured");
        return Measurement::Unmeasured(UnmeasuredReason::NoContours);
    };

    if contour.len() < MIN_ELLIPSE_POINTS {
        tracing::info!(
            vertices = contour.len(),
            "largest contour too small for an ellipse fit"
        );
        return Measurement::Unmeasured(UnmeasuredReason::TooFewPoints {
            found: contour.len(),
        });
    }

    match ellipse::fit_ellipse(&contour.to_points()) {
        Ok(fit) => {
            let measurement = to_measurement(&fit, calibration);
            tracing::info!(
                major_px = measurement.major_axis_px,
                minor_px = measurement.minor_axis_px,
                major_mm = measurement.major_mm,
                minor_mm = measurement.minor_mm,
                "pupil measured"
            );
            Measurement::Measured(measurement)
        }
        Err(e) => {
            tracing::info!(vertices = contour.len(), "ellipse fit failed: {e}");
            Measurement::Unmeasured(UnmeasuredReason::DegenerateFit)
        }
    }
}

/// Trace `edges`, select the largest external contour and measure it.
#[must_use]
pub fn fit_pupil_contour(edges: &GrayImage, calibration: &Calibration) -> Measurement {
    let largest = contour::largest_external_contour(edges);
    measure_contour(largest.as_ref(), calibration)
}

/// Round the fitted axes to whole pixels and scale them to millimeters.
///
/// Millimeters are computed from the rounded pixel counts.
#[must_use]
pub fn to_measurement(fit: &FittedEllipse, calibration: &Calibration) -> PupilMeasurement {
    let major_axis_px = round_px(fit.major_axis_px);
    let minor_axis_px = round_px(fit.minor_axis_px);
    PupilMeasurement {
        major_axis_px,
        minor_axis_px,
        major_mm: calibration.to_mm(f64::from(major_axis_px)),
        minor_mm: calibration.to_mm(f64::from(minor_axis_px)),
        ellipse: *fit,
    }
}

/// Nearest whole pixel, saturating at the `u32` range.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn round_px(px: f64) -> u32 {
    // `as` saturates and maps NaN to 0.
    px.round() as u32
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::{GridPoint, Point};

    fn fitted(major: f64, minor: f64) -> FittedEllipse {
        FittedEllipse {
            center: Point::new(100.0, 100.0),
            major_axis_px: major,
            minor_axis_px: minor,
            angle_deg: 0.0,
        }
    }

    /// Boundary of a digital ellipse, one vertex per degree, duplicates
    /// removed.
    fn digital_ellipse(cx: f64, cy: f64, semi_x: f64, semi_y: f64) -> Contour {
        let mut points: Vec<GridPoint> = Vec::new();
        for deg in 0..360 {
            let t = f64::from(deg).to_radians();
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let p = GridPoint::new(
                semi_x.mul_add(t.cos(), cx).round() as u32,
                semi_y.mul_add(t.sin(), cy).round() as u32,
            );
            if points.last() != Some(&p) && points.first() != Some(&p) {
                points.push(p);
            }
        }
        Contour::new(points)
    }

    #[test]
    fn seventy_two_pixels_is_twelve_millimeters() {
        let m = to_measurement(&fitted(72.0, 72.0), &Calibration::default());
        assert_eq!(m.major_axis_px, 72);
        assert!((m.major_mm - 12.0).abs() < 1e-12, "got {}", m.major_mm);
        assert_eq!(format!("{:.2}", m.minor_mm), "12.00");
    }

    #[test]
    fn pixel_axes_round_to_nearest() {
        let m = to_measurement(&fitted(72.4, 71.6), &Calibration::default());
        assert_eq!((m.major_axis_px, m.minor_axis_px), (72, 72));
        let m = to_measurement(&fitted(99.5, 79.49), &Calibration::default());
        assert_eq!((m.major_axis_px, m.minor_axis_px), (100, 79));
    }

    #[test]
    fn millimeters_use_the_rounded_pixels() {
        let m = to_measurement(&fitted(72.4, 60.0), &Calibration::default());
        assert!((m.major_mm - 12.0).abs() < 1e-12);
        assert!((m.ellipse.major_axis_px - 72.4).abs() < 1e-12);
    }

    #[test]
    fn custom_calibration_scales_linearly() {
        let calibration = Calibration {
            reference_mm: 10.0,
            reference_px: 100.0,
        };
        let m = to_measurement(&fitted(50.0, 20.0), &calibration);
        assert!((m.major_mm - 5.0).abs() < 1e-12);
        assert!((m.minor_mm - 2.0).abs() < 1e-12);
    }

    #[test]
    fn missing_contour_is_unmeasured() {
        assert_eq!(
            measure_contour(None, &Calibration::default()),
            Measurement::Unmeasured(UnmeasuredReason::NoContours)
        );
    }

    #[test]
    fn four_vertices_are_too_few() {
        let square = Contour::new(vec![
            GridPoint::new(0, 0),
            GridPoint::new(9, 0),
            GridPoint::new(9, 9),
            GridPoint::new(0, 9),
        ]);
        assert_eq!(
            measure_contour(Some(&square), &Calibration::default()),
            Measurement::Unmeasured(UnmeasuredReason::TooFewPoints { found: 4 })
        );
    }

    #[test]
    fn collinear_contour_is_a_degenerate_fit() {
        let line = Contour::new((0..8).map(|x| GridPoint::new(x * 3, 5)).collect());
        assert_eq!(
            measure_contour(Some(&line), &Calibration::default()),
            Measurement::Unmeasured(UnmeasuredReason::DegenerateFit)
        );
    }

    #[test]
    fn digital_circle_is_measured() {
        let circle = digital_ellipse(100.0, 100.0, 36.0, 36.0);
        let m = measure_contour(Some(&circle), &Calibration::default());
        let m = m.measurement().unwrap();
        assert!(m.major_axis_px.abs_diff(72) <= 1, "major {}", m.major_axis_px);
        assert!(m.minor_axis_px.abs_diff(72) <= 1, "minor {}", m.minor_axis_px);
        assert!(m.major_axis_px >= m.minor_axis_px);
    }

    #[test]
    fn digital_ellipse_axes_are_ordered() {
        let contour = digital_ellipse(80.0, 60.0, 40.0, 50.0);
        let m = measure_contour(Some(&contour), &Calibration::default());
        let m = m.measurement().unwrap();
        assert!(m.major_axis_px.abs_diff(100) <= 1, "major {}", m.major_axis_px);
        assert!(m.minor_axis_px.abs_diff(80) <= 1, "minor {}", m.minor_axis_px);
        assert!((m.ellipse.angle_deg.abs() - 90.0).abs() < 1.0);
    }

    #[test]
    fn blank_edge_map_is_unmeasured() {
        let edges = GrayImage::new(64, 64);
        assert_eq!(
            fit_pupil_contour(&edges, &Calibration::default()),
            Measurement::Unmeasured(UnmeasuredReason::NoContours)
        );
    }

    #[test]
    fn ring_edge_map_is_measured() {
        let mut edges = GrayImage::new(120, 120);
        for p in digital_ellipse(60.0, 60.0, 30.0, 30.0).points() {
            edges.put_pixel(p.x, p.y, image::Luma([255]));
        }
        let m = fit_pupil_contour(&edges, &Calibration::default());
        let m = m.measurement().unwrap();
        assert!(m.major_axis_px.abs_diff(60) <= 2, "major {}", m.major_axis_px);
        assert!(m.minor_axis_px.abs_diff(60) <= 2, "minor {}", m.minor_axis_px);
    }
}
