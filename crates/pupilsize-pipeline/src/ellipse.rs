//! Direct least-squares ellipse fitting (Fitzgibbon, Pilu & Fisher, 1999).
//!
//! Finds the conic `A x² + B xy + C y² + D x + E y + F = 0` minimizing the
//! algebraic error over the input points subject to `4AC − B² = 1`, which
//! guarantees an ellipse whenever the data admits one. Points are shifted
//! to their centroid and scaled to a mean radius of √2 before fitting.
//!
//! The constrained problem reduces to a 3x3 generalized eigenproblem on
//! the quadratic coefficients. Its eigenvalues are taken from the
//! characteristic cubic and the eigenvectors from the adjugate of the
//! shifted matrix, so no iterative eigensolver is involved.

use nalgebra::{DMatrix, Matrix3, Vector3};

use crate::types::{FittedEllipse, Point};

/// Fewest points that determine a conic.
pub const MIN_FIT_POINTS: usize = 5;

/// Why a point set could not be fitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FitError {
    /// Fewer than [`MIN_FIT_POINTS`] points.
    #[error("ellipse fit needs at least {min} points, got {found}", min = MIN_FIT_POINTS)]
    TooFewPoints {
        /// Number of points supplied.
        found: usize,
    },

    /// The best conic is a hyperbola, parabola or imaginary ellipse.
    #[error("best-fit conic is not an ellipse")]
    NotAnEllipse,

    /// The scatter matrix is singular (collinear or coincident points) or
    /// the solution is not finite.
    #[error("point set is degenerate")]
    Degenerate,
}

/// Fit an ellipse to `points`.
///
/// The returned axes are full lengths with `major_axis_px >=
/// minor_axis_px`, and the angle of the major axis is normalized to
/// (−90°, 90°].
///
/// # Errors
///
/// See [`FitError`].
pub fn fit_ellipse(points: &[Point]) -> Result<FittedEllipse, FitError> {
    if points.len() < MIN_FIT_POINTS {
        return Err(FitError::TooFewPoints {
            found: points.len(),
        });
    }

    let norm = Normalization::of(points);
    let conic = fit_conic_normalized(points, &norm)?;
    norm.denormalize(&conic).to_ellipse()
}

/// General conic coefficients `[A, B, C, D, E, F]`.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Conic([f64; 6]);

impl Conic {
    /// Convert to center, full axes and angle.
    fn to_ellipse(self) -> Result<FittedEllipse, FitError> {
        let [a, b, c, d, e, f] = self.0;
        if !self.0.iter().all(|v| v.is_finite()) {
            return Err(FitError::Degenerate);
        }

        let denom = 4.0 * a * c - b * b;
        if denom <= 0.0 {
            return Err(FitError::NotAnEllipse);
        }

        // Center: gradient of the conic vanishes.
        let cx = (b * e - 2.0 * c * d) / denom;
        let cy = (b * d - 2.0 * a * e) / denom;

        // Eigenvalues of the quadratic part [[A, B/2], [B/2, C]].
        let sum = a + c;
        let diff = (a - c).hypot(b);
        let lambda_small = (sum - diff) / 2.0;
        let lambda_large = (sum + diff) / 2.0;

        // Conic value at the center; the ellipse is x'ᵀ Q x' = −f_center.
        let f_center = a * cx * cx + b * cx * cy + c * cy * cy + d * cx + e * cy + f;
        if f_center.abs() < f64::EPSILON * sum.abs().max(1.0) {
            return Err(FitError::Degenerate);
        }

        let semi_major_sq = -f_center / lambda_small;
        let semi_minor_sq = -f_center / lambda_large;
        if !(semi_major_sq > 0.0 && semi_minor_sq > 0.0) {
            return Err(FitError::NotAnEllipse);
        }

        // The axis belonging to the larger eigenvalue is the minor one; the
        // major axis is perpendicular to it.
        let minor_direction = 0.5 * b.atan2(a - c);
        let major_direction = minor_direction + std::f64::consts::FRAC_PI_2;

        let major = 2.0 * semi_major_sq.sqrt();
        let minor = 2.0 * semi_minor_sq.sqrt();
        if !(major.is_finite() && minor.is_finite() && cx.is_finite() && cy.is_finite()) {
            return Err(FitError::Degenerate);
        }

        Ok(FittedEllipse {
            center: Point::new(cx, cy),
            major_axis_px: major,
            minor_axis_px: minor,
            angle_deg: normalize_degrees(major_direction.to_degrees()),
        })
    }
}

/// Wrap an angle in degrees to (−90, 90].
fn normalize_degrees(mut angle: f64) -> f64 {
    while angle > 90.0 {
        angle -= 180.0;
    }
    while angle <= -90.0 {
        angle += 180.0;
    }
    angle
}

/// Centroid shift and isotropic scale applied before fitting.
#[derive(Debug, Clone, Copy)]
struct Normalization {
    mean_x: f64,
    mean_y: f64,
    scale: f64,
}

impl Normalization {
    #[allow(clippy::cast_precision_loss)]
    fn of(points: &[Point]) -> Self {
        let n = points.len() as f64;
        let mean_x = points.iter().map(|p| p.x).sum::<f64>() / n;
        let mean_y = points.iter().map(|p| p.y).sum::<f64>() / n;
        let mean_dist = points
            .iter()
            .map(|p| (p.x - mean_x).hypot(p.y - mean_y))
            .sum::<f64>()
            / n;
        let scale = if mean_dist > 1e-12 {
            std::f64::consts::SQRT_2 / mean_dist
        } else {
            1.0
        };
        Self {
            mean_x,
            mean_y,
            scale,
        }
    }

    fn apply(&self, p: Point) -> (f64, f64) {
        (
            (p.x - self.mean_x) * self.scale,
            (p.y - self.mean_y) * self.scale,
        )
    }

    /// Map a conic in normalized coordinates back to pixel coordinates by
    /// substituting `x' = s (x − mx)`, `y' = s (y − my)`.
    fn denormalize(&self, conic: &Conic) -> Conic {
        let [a, b, c, d, e, f] = conic.0;
        let (mx, my, s) = (self.mean_x, self.mean_y, self.scale);
        let s2 = s * s;
        Conic([
            a * s2,
            b * s2,
            c * s2,
            -2.0 * a * s2 * mx - b * s2 * my + d * s,
            -b * s2 * mx - 2.0 * c * s2 * my + e * s,
            a * s2 * mx * mx + b * s2 * mx * my + c * s2 * my * my - d * s * mx - e * s * my + f,
        ])
    }
}

/// Solve the constrained least-squares problem on normalized points.
fn fit_conic_normalized(points: &[Point], norm: &Normalization) -> Result<Conic, FitError> {
    let mut design = DMatrix::<f64>::zeros(points.len(), 6);
    for (i, &p) in points.iter().enumerate() {
        let (x, y) = norm.apply(p);
        design[(i, 0)] = x * x;
        design[(i, 1)] = x * y;
        design[(i, 2)] = y * y;
        design[(i, 3)] = x;
        design[(i, 4)] = y;
        design[(i, 5)] = 1.0;
    }

    // Scatter matrix split into quadratic (1) and linear (2) blocks.
    let scatter = design.transpose() * &design;
    let s11: Matrix3<f64> = scatter.fixed_view::<3, 3>(0, 0).into_owned();
    let s12: Matrix3<f64> = scatter.fixed_view::<3, 3>(0, 3).into_owned();
    let s22: Matrix3<f64> = scatter.fixed_view::<3, 3>(3, 3).into_owned();

    let s22_inv = s22.try_inverse().ok_or(FitError::Degenerate)?;
    let reduced = s11 - s12 * s22_inv * s12.transpose();

    // Inverse of the constraint matrix [[0, 0, 2], [0, -1, 0], [2, 0, 0]].
    let c1_inv = Matrix3::new(0.0, 0.0, 0.5, 0.0, -1.0, 0.0, 0.5, 0.0, 0.0);
    let system = c1_inv * reduced;

    let quadratic = constrained_eigenvector(&system).ok_or(FitError::NotAnEllipse)?;
    let linear = -(s22_inv * s12.transpose() * quadratic);

    let mut coeffs = [
        quadratic[0],
        quadratic[1],
        quadratic[2],
        linear[0],
        linear[1],
        linear[2],
    ];
    // Eigenvectors have arbitrary sign; pick A + C > 0.
    if coeffs[0] + coeffs[2] < 0.0 {
        for v in &mut coeffs {
            *v = -*v;
        }
    }
    Ok(Conic(coeffs))
}

/// Eigenvector of `system` satisfying the ellipse constraint
/// `4 v0 v2 − v1² > 0`, choosing the smallest eigenvalue magnitude when
/// more than one qualifies (exact fits produce a near-zero eigenvalue).
fn constrained_eigenvector(system: &Matrix3<f64>) -> Option<Vector3<f64>> {
    let m = system;
    let trace = m.trace();
    let minor_sum = m[(0, 0)] * m[(1, 1)] - m[(0, 1)] * m[(1, 0)] + m[(0, 0)] * m[(2, 2)]
        - m[(0, 2)] * m[(2, 0)]
        + m[(1, 1)] * m[(2, 2)]
        - m[(1, 2)] * m[(2, 1)];
    let det = m.determinant();

    solve_cubic_real(-trace, minor_sum, -det)
        .into_iter()
        .filter_map(|ev| {
            let v = null_vector(&(m - Matrix3::identity() * ev))?;
            let constraint = 4.0 * v[0] * v[2] - v[1] * v[1];
            (constraint > 0.0).then_some((ev.abs(), v))
        })
        .min_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(_, v)| v)
}

/// Unit null vector of a rank-2 3x3 matrix: the adjugate column with the
/// largest norm.
fn null_vector(m: &Matrix3<f64>) -> Option<Vector3<f64>> {
    let columns = [
        Vector3::new(
            m[(1, 1)] * m[(2, 2)] - m[(1, 2)] * m[(2, 1)],
            -(m[(1, 0)] * m[(2, 2)] - m[(1, 2)] * m[(2, 0)]),
            m[(1, 0)] * m[(2, 1)] - m[(1, 1)] * m[(2, 0)],
        ),
        Vector3::new(
            -(m[(0, 1)] * m[(2, 2)] - m[(0, 2)] * m[(2, 1)]),
            m[(0, 0)] * m[(2, 2)] - m[(0, 2)] * m[(2, 0)],
            -(m[(0, 0)] * m[(2, 1)] - m[(0, 1)] * m[(2, 0)]),
        ),
        Vector3::new(
            m[(0, 1)] * m[(1, 2)] - m[(0, 2)] * m[(1, 1)],
            -(m[(0, 0)] * m[(1, 2)] - m[(0, 2)] * m[(1, 0)]),
            m[(0, 0)] * m[(1, 1)] - m[(0, 1)] * m[(1, 0)],
        ),
    ];

    let best = columns
        .iter()
        .max_by(|a, b| a.norm_squared().total_cmp(&b.norm_squared()))?;
    let norm = best.norm();
    (norm > 1e-15 && norm.is_finite()).then(|| best / norm)
}

/// Real roots of the monic cubic `x³ + b x² + c x + d`.
fn solve_cubic_real(b: f64, c: f64, d: f64) -> Vec<f64> {
    // Depressed cubic t³ + p t + q with x = t − b/3.
    let p = c - b * b / 3.0;
    let q = 2.0 * b * b * b / 27.0 - b * c / 3.0 + d;
    let shift = -b / 3.0;
    let disc = -4.0 * p * p * p - 27.0 * q * q;

    if disc >= 0.0 {
        let r = (-p / 3.0).sqrt();
        let cos_arg = if r < 1e-15 {
            0.0
        } else {
            (-q / (2.0 * r * r * r)).clamp(-1.0, 1.0)
        };
        let theta = cos_arg.acos();
        let tau = std::f64::consts::TAU;
        (0..3)
            .map(|k| 2.0 * r * ((theta + tau * f64::from(k)) / 3.0).cos() + shift)
            .collect()
    } else {
        let root = (q * q / 4.0 + p * p * p / 27.0).sqrt();
        vec![(-q / 2.0 + root).cbrt() + (-q / 2.0 - root).cbrt() + shift]
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::cast_precision_loss)]
mod tests {
    use super::*;

    /// Points on an ellipse with full axes `major`/`minor`, major axis
    /// rotated `angle_deg` from +x.
    fn sample(
        cx: f64,
        cy: f64,
        major: f64,
        minor: f64,
        angle_deg: f64,
        n: usize,
    ) -> Vec<Point> {
        let (sin, cos) = angle_deg.to_radians().sin_cos();
        (0..n)
            .map(|i| {
                let t = std::f64::consts::TAU * i as f64 / n as f64;
                let u = major / 2.0 * t.cos();
                let v = minor / 2.0 * t.sin();
                Point::new(cx + cos * u - sin * v, cy + sin * u + cos * v)
            })
            .collect()
    }

    fn assert_close(actual: f64, expected: f64, tol: f64, what: &str) {
        assert!(
            (actual - expected).abs() <= tol,
            "{what}: expected {expected}, got {actual}",
        );
    }

    /// Axis orientations are only defined modulo 180 degrees.
    fn assert_same_axis(actual: f64, expected: f64) {
        let diff = (actual - expected).rem_euclid(180.0);
        assert!(
            diff < 1e-6 || 180.0 - diff < 1e-6,
            "angle: expected {expected}, got {actual}",
        );
        assert!(actual > -90.0 && actual <= 90.0, "angle {actual} out of range");
    }

    #[test]
    fn too_few_points_is_rejected() {
        let pts = sample(0.0, 0.0, 10.0, 5.0, 0.0, 4);
        assert_eq!(fit_ellipse(&pts), Err(FitError::TooFewPoints { found: 4 }));
        assert_eq!(fit_ellipse(&[]), Err(FitError::TooFewPoints { found: 0 }));
    }

    #[test]
    fn recovers_axis_aligned_ellipse() {
        let pts = sample(120.0, 90.0, 100.0, 80.0, 0.0, 60);
        let fit = fit_ellipse(&pts).unwrap();
        assert_close(fit.center.x, 120.0, 1e-6, "cx");
        assert_close(fit.center.y, 90.0, 1e-6, "cy");
        assert_close(fit.major_axis_px, 100.0, 1e-6, "major");
        assert_close(fit.minor_axis_px, 80.0, 1e-6, "minor");
        assert_close(fit.angle_deg, 0.0, 1e-6, "angle");
    }

    #[test]
    fn recovers_rotated_ellipse() {
        let pts = sample(50.0, 40.0, 60.0, 30.0, 30.0, 50);
        let fit = fit_ellipse(&pts).unwrap();
        assert_close(fit.major_axis_px, 60.0, 1e-6, "major");
        assert_close(fit.minor_axis_px, 30.0, 1e-6, "minor");
        assert_close(fit.angle_deg, 30.0, 1e-6, "angle");
    }

    #[test]
    fn vertical_major_axis_reports_ninety_degrees() {
        let pts = sample(0.0, 0.0, 40.0, 20.0, 90.0, 36);
        let fit = fit_ellipse(&pts).unwrap();
        assert_close(fit.major_axis_px, 40.0, 1e-6, "major");
        assert_close(fit.minor_axis_px, 20.0, 1e-6, "minor");
        assert_same_axis(fit.angle_deg, 90.0);
    }

    #[test]
    fn circle_has_equal_axes() {
        let pts = sample(30.0, 30.0, 72.0, 72.0, 0.0, 24);
        let fit = fit_ellipse(&pts).unwrap();
        assert_close(fit.major_axis_px, 72.0, 1e-6, "major");
        assert_close(fit.minor_axis_px, 72.0, 1e-6, "minor");
        assert!(fit.angle_deg > -90.0 && fit.angle_deg <= 90.0);
    }

    #[test]
    fn five_points_determine_the_ellipse() {
        let pts = sample(10.0, -5.0, 24.0, 12.0, -20.0, 5);
        let fit = fit_ellipse(&pts).unwrap();
        assert_close(fit.major_axis_px, 24.0, 1e-6, "major");
        assert_close(fit.minor_axis_px, 12.0, 1e-6, "minor");
        assert_close(fit.angle_deg, -20.0, 1e-6, "angle");
    }

    #[test]
    fn major_is_never_smaller_than_minor() {
        for angle in [-80.0, -45.0, 0.0, 15.0, 45.0, 89.0] {
            let pts = sample(0.0, 0.0, 30.0, 18.0, angle, 40);
            let fit = fit_ellipse(&pts).unwrap();
            assert!(fit.major_axis_px >= fit.minor_axis_px);
            assert_same_axis(fit.angle_deg, angle);
        }
    }

    #[test]
    fn collinear_points_are_degenerate() {
        let pts: Vec<Point> = (0..10).map(|i| Point::new(f64::from(i), 3.0)).collect();
        assert!(fit_ellipse(&pts).is_err());
    }

    #[test]
    fn coincident_points_are_degenerate() {
        let pts = vec![Point::new(4.0, 4.0); 8];
        assert!(fit_ellipse(&pts).is_err());
    }

    #[test]
    fn pixel_grid_circle_fits_close_to_radius() {
        // Integer boundary of a digital disk of radius 36.
        let pts: Vec<Point> = (0..360)
            .map(|deg| {
                let t = f64::from(deg).to_radians();
                Point::new((100.0 + 36.0 * t.cos()).round(), (100.0 + 36.0 * t.sin()).round())
            })
            .collect();
        let fit = fit_ellipse(&pts).unwrap();
        assert_close(fit.major_axis_px, 72.0, 1.0, "major");
        assert_close(fit.minor_axis_px, 72.0, 1.0, "minor");
        assert_close(fit.center.x, 100.0, 0.5, "cx");
    }

    #[test]
    fn cubic_roots_are_found() {
        // (x - 1)(x - 2)(x - 3) = x³ - 6x² + 11x - 6
        let mut roots = solve_cubic_real(-6.0, 11.0, -6.0);
        roots.sort_by(f64::total_cmp);
        for (r, e) in roots.iter().zip([1.0, 2.0, 3.0]) {
            assert_close(*r, e, 1e-9, "root");
        }
        // x³ + x + 2 = (x + 1)(x² - x + 2), one real root.
        let single = solve_cubic_real(0.0, 1.0, 2.0);
        assert_eq!(single.len(), 1);
        assert_close(single[0], -1.0, 1e-9, "root");
    }

    #[test]
    fn normalize_degrees_wraps_into_half_open_range() {
        assert_close(normalize_degrees(90.0), 90.0, 0.0, "90");
        assert_close(normalize_degrees(-90.0), 90.0, 0.0, "-90");
        assert_close(normalize_degrees(135.0), -45.0, 1e-12, "135");
        assert_close(normalize_degrees(-100.0), 80.0, 1e-12, "-100");
    }
}
