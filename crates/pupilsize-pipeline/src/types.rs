//! Shared types for the pupilsize measurement pipeline.

use geo::{Area, LineString, Polygon};
use serde::{Deserialize, Serialize};

/// Re-export `GrayImage` so downstream crates can reference
/// intermediate raster data without depending on `image` directly.
pub use image::GrayImage;

/// Re-export `RgbImage` for the validated color input.
pub use image::RgbImage;

/// Re-export `RgbaImage` for the annotated output image.
pub use image::RgbaImage;

/// A 2D point in sub-pixel image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Horizontal position (pixels from left edge).
    pub x: f64,
    /// Vertical position (pixels from top edge).
    pub y: f64,
}

impl Point {
    /// Create a new point.
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// An integer pixel coordinate on a traced boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GridPoint {
    /// Column index.
    pub x: u32,
    /// Row index.
    pub y: u32,
}

impl GridPoint {
    /// Create a new grid point.
    #[must_use]
    pub const fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }
}

impl From<GridPoint> for Point {
    fn from(p: GridPoint) -> Self {
        Self::new(f64::from(p.x), f64::from(p.y))
    }
}

/// An ordered, implicitly closed sequence of boundary vertices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contour(Vec<GridPoint>);

impl Contour {
    /// Create a new contour from a vector of vertices.
    #[must_use]
    pub const fn new(points: Vec<GridPoint>) -> Self {
        Self(points)
    }

    /// Returns `true` if the contour has no vertices.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the number of vertices.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns a slice of all vertices.
    #[must_use]
    pub fn points(&self) -> &[GridPoint] {
        &self.0
    }

    /// Enclosed polygon area in square pixels.
    ///
    /// The vertex sequence is treated as a closed ring. Fewer than three
    /// vertices enclose nothing.
    #[must_use]
    pub fn area(&self) -> f64 {
        if self.0.len() < 3 {
            return 0.0;
        }
        let ring: LineString<f64> = self
            .0
            .iter()
            .map(|p| (f64::from(p.x), f64::from(p.y)))
            .collect();
        Polygon::new(ring, vec![]).unsigned_area()
    }

    /// Vertices as sub-pixel points, for fitting.
    #[must_use]
    pub fn to_points(&self) -> Vec<Point> {
        self.0.iter().copied().map(Point::from).collect()
    }
}

/// Image dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

/// Fixed pixel-to-millimeter anchor.
///
/// A known real-world diameter (`reference_mm`, the whole eye) is assumed
/// to span `reference_px` pixels in every input image. The ratio is a
/// global constant, never measured per image.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    /// Real-world diameter of the calibration anchor in millimeters.
    pub reference_mm: f64,
    /// Expected pixel span of the calibration anchor.
    pub reference_px: f64,
}

impl Calibration {
    /// Default anchor diameter: 24 mm.
    pub const DEFAULT_REFERENCE_MM: f64 = 24.0;
    /// Default anchor span: 144 px.
    pub const DEFAULT_REFERENCE_PX: f64 = 144.0;

    /// Millimeters per pixel.
    #[must_use]
    pub fn mm_per_px(&self) -> f64 {
        self.reference_mm / self.reference_px
    }

    /// Convert a pixel length to millimeters.
    #[must_use]
    pub fn to_mm(&self, px: f64) -> f64 {
        px * self.mm_per_px()
    }
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            reference_mm: Self::DEFAULT_REFERENCE_MM,
            reference_px: Self::DEFAULT_REFERENCE_PX,
        }
    }
}

/// Largest accepted morphology kernel (structuring element radius must
/// fit in a `u8`).
pub const MAX_MORPH_KERNEL_SIZE: u32 = 511;

/// Largest accepted blur kernel.
pub const MAX_BLUR_KERNEL_SIZE: u32 = 255;

/// Configuration for the measurement pipeline.
///
/// Defaults reproduce the reference tuning: 5×5 blur, 5×5 opening with
/// three erosions and three dilations, binarization at 50, Canny 100/200,
/// and a 24 mm / 144 px calibration anchor.
///
/// Fields are public; [`validate`](Self::validate) is called by every
/// pipeline entry point before any stage runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Side length of the square Gaussian smoothing kernel (odd).
    pub blur_kernel_size: u32,

    /// Side length of the flat square structuring element (odd).
    pub morph_kernel_size: u32,

    /// Number of erosion passes in the opening.
    pub erode_iterations: u32,

    /// Number of dilation passes in the opening.
    pub dilate_iterations: u32,

    /// Global binarization cutoff. Pixels strictly above it become 255.
    pub threshold: u8,

    /// Canny low (hysteresis) threshold.
    pub canny_low: f32,

    /// Canny high (seed) threshold.
    pub canny_high: f32,

    /// Pixel-to-millimeter anchor.
    pub calibration: Calibration,
}

impl PipelineConfig {
    /// Default blur kernel size.
    pub const DEFAULT_BLUR_KERNEL_SIZE: u32 = 5;
    /// Default morphology kernel size.
    pub const DEFAULT_MORPH_KERNEL_SIZE: u32 = 5;
    /// Default erosion pass count.
    pub const DEFAULT_ERODE_ITERATIONS: u32 = 3;
    /// Default dilation pass count.
    pub const DEFAULT_DILATE_ITERATIONS: u32 = 3;
    /// Default binarization threshold.
    pub const DEFAULT_THRESHOLD: u8 = 50;
    /// Default Canny low threshold.
    pub const DEFAULT_CANNY_LOW: f32 = 100.0;
    /// Default Canny high threshold.
    pub const DEFAULT_CANNY_HIGH: f32 = 200.0;

    /// Check every parameter, returning the first violation.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] describing the offending
    /// field.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.blur_kernel_size.is_multiple_of(2) || self.blur_kernel_size > MAX_BLUR_KERNEL_SIZE
        {
            return Err(PipelineError::InvalidConfig(format!(
                "blur_kernel_size must be odd and at most {MAX_BLUR_KERNEL_SIZE}, got {}",
                self.blur_kernel_size
            )));
        }
        if self.morph_kernel_size.is_multiple_of(2)
            || self.morph_kernel_size > MAX_MORPH_KERNEL_SIZE
        {
            return Err(PipelineError::InvalidConfig(format!(
                "morph_kernel_size must be odd and at most {MAX_MORPH_KERNEL_SIZE}, got {}",
                self.morph_kernel_size
            )));
        }
        if !self.canny_low.is_finite() || !self.canny_high.is_finite() {
            return Err(PipelineError::InvalidConfig(
                "canny thresholds must be finite".to_string(),
            ));
        }
        if self.canny_low < 0.0 || self.canny_low > self.canny_high {
            return Err(PipelineError::InvalidConfig(format!(
                "canny thresholds must satisfy 0 <= low <= high, got low={} high={}",
                self.canny_low, self.canny_high
            )));
        }
        let Calibration {
            reference_mm,
            reference_px,
        } = self.calibration;
        if !(reference_mm.is_finite() && reference_mm > 0.0) {
            return Err(PipelineError::InvalidConfig(format!(
                "calibration.reference_mm must be positive, got {reference_mm}"
            )));
        }
        if !(reference_px.is_finite() && reference_px > 0.0) {
            return Err(PipelineError::InvalidConfig(format!(
                "calibration.reference_px must be positive, got {reference_px}"
            )));
        }
        Ok(())
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            blur_kernel_size: Self::DEFAULT_BLUR_KERNEL_SIZE,
            morph_kernel_size: Self::DEFAULT_MORPH_KERNEL_SIZE,
            erode_iterations: Self::DEFAULT_ERODE_ITERATIONS,
            dilate_iterations: Self::DEFAULT_DILATE_ITERATIONS,
            threshold: Self::DEFAULT_THRESHOLD,
            canny_low: Self::DEFAULT_CANNY_LOW,
            canny_high: Self::DEFAULT_CANNY_HIGH,
            calibration: Calibration::default(),
        }
    }
}

/// A least-squares ellipse in pixel space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FittedEllipse {
    /// Ellipse center.
    pub center: Point,
    /// Full length of the major axis (a diameter, not a semi-axis).
    pub major_axis_px: f64,
    /// Full length of the minor axis.
    pub minor_axis_px: f64,
    /// Rotation of the major axis from +x in degrees, in (−90, 90].
    pub angle_deg: f64,
}

/// Final pupil size estimate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PupilMeasurement {
    /// Major axis rounded to the nearest whole pixel.
    pub major_axis_px: u32,
    /// Minor axis rounded to the nearest whole pixel.
    pub minor_axis_px: u32,
    /// Major axis in millimeters.
    pub major_mm: f64,
    /// Minor axis in millimeters.
    pub minor_mm: f64,
    /// The unrounded fit the axes were taken from.
    pub ellipse: FittedEllipse,
}

/// Why no measurement could be produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnmeasuredReason {
    /// Boundary extraction found no external contour at all.
    NoContours,
    /// The largest contour has fewer vertices than an ellipse fit needs.
    TooFewPoints {
        /// Vertex count of the largest contour.
        found: usize,
    },
    /// The least-squares conic through the contour is not a proper ellipse.
    DegenerateFit,
}

impl std::fmt::Display for UnmeasuredReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoContours => f.write_str("no contours found"),
            Self::TooFewPoints { found } => write!(
                f,
                "not enough contour points to fit an ellipse (found {found})"
            ),
            Self::DegenerateFit => f.write_str("contour does not fit a proper ellipse"),
        }
    }
}

/// Outcome of the shape fitting stage.
///
/// Poor-quality photographs are expected input, so "no measurement" is a
/// value here rather than an error.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Measurement {
    /// An ellipse was fitted and converted to millimeters.
    Measured(PupilMeasurement),
    /// Insufficient contour data.
    Unmeasured(UnmeasuredReason),
}

impl Measurement {
    /// The measurement, if one was produced.
    #[must_use]
    pub const fn measurement(&self) -> Option<&PupilMeasurement> {
        match self {
            Self::Measured(m) => Some(m),
            Self::Unmeasured(_) => None,
        }
    }

    /// Returns `true` for the measured outcome.
    #[must_use]
    pub const fn is_measured(&self) -> bool {
        matches!(self, Self::Measured(_))
    }
}

/// Result of one full pipeline run.
#[derive(Debug, Clone)]
pub struct PupilReport {
    /// Measured pupil size, or why there is none.
    pub measurement: Measurement,
    /// Color copy of the input with the fitted ellipse drawn on it
    /// (unmodified when unmeasured).
    pub annotated: RgbaImage,
    /// Source image dimensions in pixels.
    pub dimensions: Dimensions,
}

/// Result of running the pipeline with all intermediate stage outputs preserved.
///
/// Uses custom `Serialize`/`Deserialize` implementations because the
/// `image` buffers do not implement serde traits. Raster images are
/// serialized as `(width, height, raw_pixels)` tuples.
#[derive(Debug, Clone)]
pub struct StagedResult {
    /// Stage 0: validated color input.
    pub original: RgbImage,
    /// Stage 1: luminance image.
    pub grayscale: GrayImage,
    /// Stage 2: Gaussian-smoothed image.
    pub blurred: GrayImage,
    /// Stage 3: morphologically opened image.
    pub opened: GrayImage,
    /// Stage 4: binary image (values 0 and 255 only).
    pub binary: GrayImage,
    /// Stage 5a: binary edge map.
    pub edges: GrayImage,
    /// Stage 5b: every external contour, in discovery order.
    pub contours: Vec<Contour>,
    /// Index into `contours` of the largest-area contour.
    pub selected: Option<usize>,
    /// Stage 6: measurement outcome.
    pub measurement: Measurement,
    /// Annotated color image.
    pub annotated: RgbaImage,
    /// Source image dimensions in pixels.
    pub dimensions: Dimensions,
}

impl StagedResult {
    /// The contour the ellipse was fitted to, if any.
    #[must_use]
    pub fn selected_contour(&self) -> Option<&Contour> {
        self.selected.and_then(|i| self.contours.get(i))
    }

    /// Drop the intermediates, keeping only the report.
    #[must_use]
    pub fn into_report(self) -> PupilReport {
        PupilReport {
            measurement: self.measurement,
            annotated: self.annotated,
            dimensions: self.dimensions,
        }
    }
}

/// Serde-compatible proxy for `StagedResult`.
#[derive(Serialize, Deserialize)]
struct StagedResultProxy {
    original: (u32, u32, Vec<u8>),
    grayscale: (u32, u32, Vec<u8>),
    blurred: (u32, u32, Vec<u8>),
    opened: (u32, u32, Vec<u8>),
    binary: (u32, u32, Vec<u8>),
    edges: (u32, u32, Vec<u8>),
    contours: Vec<Contour>,
    selected: Option<usize>,
    measurement: Measurement,
    annotated: (u32, u32, Vec<u8>),
    dimensions: Dimensions,
}

fn gray_parts(image: &GrayImage) -> (u32, u32, Vec<u8>) {
    (image.width(), image.height(), image.as_raw().clone())
}

fn gray_from_parts<E: serde::de::Error>(
    (w, h, raw): (u32, u32, Vec<u8>),
    stage: &str,
) -> Result<GrayImage, E> {
    GrayImage::from_raw(w, h, raw)
        .ok_or_else(|| E::custom(format!("invalid {stage} image dimensions")))
}

impl Serialize for StagedResult {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let proxy = StagedResultProxy {
            original: (
                self.original.width(),
                self.original.height(),
                self.original.as_raw().clone(),
            ),
            grayscale: gray_parts(&self.grayscale),
            blurred: gray_parts(&self.blurred),
            opened: gray_parts(&self.opened),
            binary: gray_parts(&self.binary),
            edges: gray_parts(&self.edges),
            contours: self.contours.clone(),
            selected: self.selected,
            measurement: self.measurement,
            annotated: (
                self.annotated.width(),
                self.annotated.height(),
                self.annotated.as_raw().clone(),
            ),
            dimensions: self.dimensions,
        };
        proxy.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for StagedResult {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let proxy = StagedResultProxy::deserialize(deserializer)?;

        let original = RgbImage::from_raw(proxy.original.0, proxy.original.1, proxy.original.2)
            .ok_or_else(|| serde::de::Error::custom("invalid original image dimensions"))?;
        let annotated =
            RgbaImage::from_raw(proxy.annotated.0, proxy.annotated.1, proxy.annotated.2)
                .ok_or_else(|| serde::de::Error::custom("invalid annotated image dimensions"))?;

        Ok(Self {
            original,
            grayscale: gray_from_parts::<D::Error>(proxy.grayscale, "grayscale")?,
            blurred: gray_from_parts::<D::Error>(proxy.blurred, "blurred")?,
            opened: gray_from_parts::<D::Error>(proxy.opened, "opened")?,
            binary: gray_from_parts::<D::Error>(proxy.binary, "binary")?,
            edges: gray_from_parts::<D::Error>(proxy.edges, "edges")?,
            contours: proxy.contours,
            selected: proxy.selected,
            measurement: proxy.measurement,
            annotated,
            dimensions: proxy.dimensions,
        })
    }
}

/// Errors that can occur before the pipeline produces a measurement.
///
/// Insufficient contour data is not an error; see [`Measurement`].
///
/// Uses custom `Serialize`/`Deserialize` because `image::ImageError`
/// does not implement serde traits.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Failed to decode the input image.
    #[error("failed to decode image: {0}")]
    ImageDecode(#[from] image::ImageError),

    /// The input image bytes or pixel buffer were empty.
    #[error("input image data is empty")]
    EmptyInput,

    /// The input image is not a usable color image.
    #[error("invalid input image: {0}")]
    InvalidInput(String),

    /// Pipeline configuration is invalid.
    #[error("invalid pipeline configuration: {0}")]
    InvalidConfig(String),
}

/// Serde-compatible proxy for `PipelineError`.
///
/// A deserialized `ImageDecode` becomes `InvalidInput` carrying the
/// original message, since `image::ImageError` cannot be rebuilt.
#[derive(Serialize, Deserialize)]
enum PipelineErrorProxy {
    ImageDecode(String),
    EmptyInput,
    InvalidInput(String),
    InvalidConfig(String),
}

impl Serialize for PipelineError {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let proxy = match self {
            Self::ImageDecode(e) => PipelineErrorProxy::ImageDecode(e.to_string()),
            Self::EmptyInput => PipelineErrorProxy::EmptyInput,
            Self::InvalidInput(s) => PipelineErrorProxy::InvalidInput(s.clone()),
            Self::InvalidConfig(s) => PipelineErrorProxy::InvalidConfig(s.clone()),
        };
        proxy.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for PipelineError {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let proxy = PipelineErrorProxy::deserialize(deserializer)?;
        Ok(match proxy {
            PipelineErrorProxy::ImageDecode(msg) => {
                Self::InvalidInput(format!("image decode error: {msg}"))
            }
            PipelineErrorProxy::EmptyInput => Self::EmptyInput,
            PipelineErrorProxy::InvalidInput(s) => Self::InvalidInput(s),
            PipelineErrorProxy::InvalidConfig(s) => Self::InvalidConfig(s),
        })
    }
}
