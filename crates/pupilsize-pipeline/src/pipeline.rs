//! Incremental pipeline: advance stage-by-stage, inspecting each
//! intermediate result before continuing.
//!
//! Unlike [`crate::measure_staged`] which runs the entire pipeline in one
//! call, [`Pipeline`] lets the caller drive execution one step at a time:
//!
//! ```rust
//! # use pupilsize_pipeline::{Pipeline, PipelineConfig, PipelineError};
//! # use pupilsize_pipeline::annotate::AnnotationStyle;
//! # fn run(image: image::DynamicImage) -> Result<(), PipelineError> {
//! let staged = Pipeline::new(image, PipelineConfig::default())
//!     .validate()?
//!     .grayscale()
//!     .blur()
//!     .open()
//!     .binarize()
//!     .detect_edges()
//!     .trace_contours()
//!     .fit()
//!     .annotate(&AnnotationStyle::default())
//!     .into_result();
//! # Ok(())
//! # }
//! ```
//!
//! Each stage method consumes `self` and returns the next pipeline state,
//! carrying all previously computed intermediates, so stages cannot be
//! skipped, reordered or re-entered. Only [`Pending::validate`] can fail.
//!
//! # Memory
//!
//! Every stage retains the full raster stack. For a 1000×1000 source
//! image this is roughly 9 MB pinned until [`Annotated::into_result`].
//! Callers that only need the measurement should prefer
//! [`crate::measure`], which drops the intermediates.

use image::DynamicImage;

use crate::annotate::AnnotationStyle;
use crate::diagnostics::StageMetrics;
use crate::types::{
    Contour, Dimensions, GrayImage, Measurement, PipelineConfig, PipelineError, RgbImage,
    RgbaImage, StagedResult,
};

// ───────────────────────── Stage 0: Pending ──────────────────────────

/// Pipeline state before any processing has occurred.
///
/// Call [`validate`](Self::validate) to check the config and input.
#[must_use = "pipeline stages are consumed by advancing; call .validate() to continue"]
pub struct Pending {
    config: PipelineConfig,
    image: DynamicImage,
}

impl Pending {
    /// The unvalidated input image.
    #[must_use]
    pub const fn image(&self) -> &DynamicImage {
        &self.image
    }

    /// Validate the config and the input image and advance to the
    /// [`Validated`] stage.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] for a bad config,
    /// [`PipelineError::EmptyInput`] for a zero-sized image and
    /// [`PipelineError::InvalidInput`] for an image with fewer than three
    /// color channels.
    pub fn validate(self) -> Result<Validated, PipelineError> {
        self.config.validate()?;
        let original = crate::grayscale::validate_color(&self.image)?;
        let dimensions = Dimensions {
            width: original.width(),
            height: original.height(),
        };
        tracing::debug!(
            width = dimensions.width,
            height = dimensions.height,
            "input validated"
        );
        Ok(Validated {
            config: self.config,
            original,
            dimensions,
        })
    }
}

// ───────────────────────── Stage 1: Validated ────────────────────────

/// Pipeline state after input validation.
#[must_use = "pipeline stages are consumed by advancing; call .grayscale() to continue"]
pub struct Validated {
    config: PipelineConfig,
    original: RgbImage,
    dimensions: Dimensions,
}

impl Validated {
    /// The validated RGB input.
    #[must_use]
    pub const fn original(&self) -> &RgbImage {
        &self.original
    }

    /// Image dimensions, fixed for the rest of the run.
    #[must_use]
    pub const fn dimensions(&self) -> Dimensions {
        self.dimensions
    }

    /// Advance to the grayscale stage.
    pub fn grayscale(self) -> Grayscaled {
        let grayscale = crate::grayscale::to_grayscale(&self.original);
        tracing::debug!("converted to grayscale");
        Grayscaled {
            config: self.config,
            original: self.original,
            dimensions: self.dimensions,
            grayscale,
        }
    }
}

// ───────────────────────── Stage 2: Grayscaled ───────────────────────

/// Pipeline state after luminance conversion.
#[must_use = "pipeline stages are consumed by advancing; call .blur() to continue"]
pub struct Grayscaled {
    config: PipelineConfig,
    original: RgbImage,
    dimensions: Dimensions,
    grayscale: GrayImage,
}

impl Grayscaled {
    /// The single-channel luminance image.
    #[must_use]
    pub const fn grayscale(&self) -> &GrayImage {
        &self.grayscale
    }

    /// Advance to the blur stage.
    pub fn blur(self) -> Blurred {
        let blurred = crate::blur::gaussian_blur(&self.grayscale, self.config.blur_kernel_size);
        tracing::debug!(kernel = self.config.blur_kernel_size, "blurred");
        Blurred {
            config: self.config,
            original: self.original,
            dimensions: self.dimensions,
            grayscale: self.grayscale,
            blurred,
        }
    }
}

// ───────────────────────── Stage 3: Blurred ──────────────────────────

/// Pipeline state after Gaussian smoothing.
#[must_use = "pipeline stages are consumed by advancing; call .open() to continue"]
pub struct Blurred {
    config: PipelineConfig,
    original: RgbImage,
    dimensions: Dimensions,
    grayscale: GrayImage,
    blurred: GrayImage,
}

impl Blurred {
    /// The smoothed image.
    #[must_use]
    pub const fn blurred(&self) -> &GrayImage {
        &self.blurred
    }

    /// Advance to the morphological opening stage.
    pub fn open(self) -> Opened {
        let opened = crate::morphology::open(
            &self.blurred,
            self.config.morph_kernel_size,
            self.config.erode_iterations,
            self.config.dilate_iterations,
        );
        tracing::debug!(
            kernel = self.config.morph_kernel_size,
            erode = self.config.erode_iterations,
            dilate = self.config.dilate_iterations,
            "opened"
        );
        Opened {
            config: self.config,
            original: self.original,
            dimensions: self.dimensions,
            grayscale: self.grayscale,
            blurred: self.blurred,
            opened,
        }
    }
}

// ───────────────────────── Stage 4: Opened ───────────────────────────

/// Pipeline state after erosion and dilation.
#[must_use = "pipeline stages are consumed by advancing; call .binarize() to continue"]
pub struct Opened {
    config: PipelineConfig,
    original: RgbImage,
    dimensions: Dimensions,
    grayscale: GrayImage,
    blurred: GrayImage,
    opened: GrayImage,
}

impl Opened {
    /// The opened image.
    #[must_use]
    pub const fn opened(&self) -> &GrayImage {
        &self.opened
    }

    /// Advance to the binarization stage.
    pub fn binarize(self) -> Binarized {
        let binary = crate::threshold::binarize(&self.opened, self.config.threshold);
        tracing::debug!(
            threshold = self.config.threshold,
            foreground = crate::threshold::foreground_count(&binary),
            "binarized"
        );
        Binarized {
            config: self.config,
            original: self.original,
            dimensions: self.dimensions,
            grayscale: self.grayscale,
            blurred: self.blurred,
            opened: self.opened,
            binary,
        }
    }
}

// ───────────────────────── Stage 5: Binarized ────────────────────────

/// Pipeline state after fixed thresholding.
#[must_use = "pipeline stages are consumed by advancing; call .detect_edges() to continue"]
pub struct Binarized {
    config: PipelineConfig,
    original: RgbImage,
    dimensions: Dimensions,
    grayscale: GrayImage,
    blurred: GrayImage,
    opened: GrayImage,
    binary: GrayImage,
}

impl Binarized {
    /// The binary image (0 and 255 only).
    #[must_use]
    pub const fn binary(&self) -> &GrayImage {
        &self.binary
    }

    /// Advance to the edge detection stage.
    pub fn detect_edges(self) -> EdgesDetected {
        let edges =
            crate::edge::canny(&self.binary, self.config.canny_low, self.config.canny_high);
        tracing::debug!(
            edge_pixels = crate::edge::count_edge_pixels(&edges),
            "edges detected"
        );
        EdgesDetected {
            config: self.config,
            original: self.original,
            dimensions: self.dimensions,
            grayscale: self.grayscale,
            blurred: self.blurred,
            opened: self.opened,
            binary: self.binary,
            edges,
        }
    }
}

// ───────────────────────── Stage 6: EdgesDetected ────────────────────

/// Pipeline state after Canny edge detection.
#[must_use = "pipeline stages are consumed by advancing; call .trace_contours() to continue"]
pub struct EdgesDetected {
    config: PipelineConfig,
    original: RgbImage,
    dimensions: Dimensions,
    grayscale: GrayImage,
    blurred: GrayImage,
    opened: GrayImage,
    binary: GrayImage,
    edges: GrayImage,
}

impl EdgesDetected {
    /// The binary edge map.
    #[must_use]
    pub const fn edges(&self) -> &GrayImage {
        &self.edges
    }

    /// Advance to the contour tracing stage.
    ///
    /// Finding no contours is not an error; the fit stage reports it.
    pub fn trace_contours(self) -> ContoursTraced {
        let contours = crate::contour::external_contours(&self.edges);
        let selected = crate::contour::largest_contour_index(&contours);
        tracing::debug!(
            contours = contours.len(),
            selected_vertices = selected.and_then(|i| contours.get(i)).map(Contour::len),
            selected_area = selected.and_then(|i| contours.get(i)).map(Contour::area),
            "contours traced"
        );
        ContoursTraced {
            config: self.config,
            original: self.original,
            dimensions: self.dimensions,
            grayscale: self.grayscale,
            blurred: self.blurred,
            opened: self.opened,
            binary: self.binary,
            edges: self.edges,
            contours,
            selected,
        }
    }
}

// ───────────────────────── Stage 7: ContoursTraced ───────────────────

/// Pipeline state after contour tracing and selection.
#[must_use = "pipeline stages are consumed by advancing; call .fit() to continue"]
pub struct ContoursTraced {
    config: PipelineConfig,
    original: RgbImage,
    dimensions: Dimensions,
    grayscale: GrayImage,
    blurred: GrayImage,
    opened: GrayImage,
    binary: GrayImage,
    edges: GrayImage,
    contours: Vec<Contour>,
    selected: Option<usize>,
}

impl ContoursTraced {
    /// Every external contour, in discovery order.
    #[must_use]
    pub fn contours(&self) -> &[Contour] {
        &self.contours
    }

    /// The largest-area contour, if any.
    #[must_use]
    pub fn selected(&self) -> Option<&Contour> {
        self.selected.and_then(|i| self.contours.get(i))
    }

    /// Advance to the ellipse fitting stage.
    pub fn fit(self) -> Fitted {
        let measurement =
            crate::measure::measure_contour(self.selected(), &self.config.calibration);
        Fitted {
            original: self.original,
            dimensions: self.dimensions,
            grayscale: self.grayscale,
            blurred: self.blurred,
            opened: self.opened,
            binary: self.binary,
            edges: self.edges,
            contours: self.contours,
            selected: self.selected,
            measurement,
        }
    }
}

// ───────────────────────── Stage 8: Fitted ───────────────────────────

/// Pipeline state after the ellipse fit and unit conversion.
///
/// The numeric result is final here; annotation only renders it.
#[must_use = "pipeline stages are consumed by advancing; call .annotate() to continue"]
pub struct Fitted {
    original: RgbImage,
    dimensions: Dimensions,
    grayscale: GrayImage,
    blurred: GrayImage,
    opened: GrayImage,
    binary: GrayImage,
    edges: GrayImage,
    contours: Vec<Contour>,
    selected: Option<usize>,
    measurement: Measurement,
}

impl Fitted {
    /// The measurement outcome.
    #[must_use]
    pub const fn measurement(&self) -> &Measurement {
        &self.measurement
    }

    /// Render the measurement onto a copy of the input.
    pub fn annotate(self, style: &AnnotationStyle) -> Annotated {
        let annotated = crate::annotate::annotate(&self.original, &self.measurement, style);
        Annotated {
            original: self.original,
            dimensions: self.dimensions,
            grayscale: self.grayscale,
            blurred: self.blurred,
            opened: self.opened,
            binary: self.binary,
            edges: self.edges,
            contours: self.contours,
            selected: self.selected,
            measurement: self.measurement,
            annotated,
        }
    }
}

// ───────────────────────── Stage 9: Annotated ────────────────────────

/// Final pipeline state.
///
/// Call [`into_result`](Self::into_result) to extract the
/// [`StagedResult`] containing all intermediates.
#[must_use = "call .into_result() to extract the StagedResult"]
pub struct Annotated {
    original: RgbImage,
    dimensions: Dimensions,
    grayscale: GrayImage,
    blurred: GrayImage,
    opened: GrayImage,
    binary: GrayImage,
    edges: GrayImage,
    contours: Vec<Contour>,
    selected: Option<usize>,
    measurement: Measurement,
    annotated: RgbaImage,
}

impl Annotated {
    /// The annotated color image.
    #[must_use]
    pub const fn annotated(&self) -> &RgbaImage {
        &self.annotated
    }

    /// The measurement outcome.
    #[must_use]
    pub const fn measurement(&self) -> &Measurement {
        &self.measurement
    }

    /// Consume the pipeline and return the full [`StagedResult`].
    #[must_use]
    pub fn into_result(self) -> StagedResult {
        StagedResult {
            original: self.original,
            grayscale: self.grayscale,
            blurred: self.blurred,
            opened: self.opened,
            binary: self.binary,
            edges: self.edges,
            contours: self.contours,
            selected: self.selected,
            measurement: self.measurement,
            annotated: self.annotated,
            dimensions: self.dimensions,
        }
    }
}

// ──────────────────────── PipelineStage trait ────────────────────────

/// Number of processing stages after [`Pending`].
pub const STAGE_COUNT: usize = 9;

/// Uniform view over the processed stage structs, used for diagnostics.
///
/// [`Pending`] has done no work yet and does not implement it.
pub trait PipelineStage {
    /// Human-readable name of this stage (e.g. `"validate"`, `"blur"`).
    const NAME: &str;

    /// Zero-based index of this stage (`0` for [`Validated`] through `8`
    /// for [`Annotated`]).
    const INDEX: usize;

    /// Metrics describing the work done to reach this state.
    fn metrics(&self) -> StageMetrics;
}

impl PipelineStage for Validated {
    const NAME: &str = "validate";
    const INDEX: usize = 0;

    fn metrics(&self) -> StageMetrics {
        StageMetrics::Validate {
            width: self.dimensions.width,
            height: self.dimensions.height,
            pixel_count: u64::from(self.dimensions.width) * u64::from(self.dimensions.height),
        }
    }
}

impl PipelineStage for Grayscaled {
    const NAME: &str = "grayscale";
    const INDEX: usize = 1;

    fn metrics(&self) -> StageMetrics {
        StageMetrics::Grayscale {
            width: self.grayscale.width(),
            height: self.grayscale.height(),
        }
    }
}

impl PipelineStage for Blurred {
    const NAME: &str = "blur";
    const INDEX: usize = 2;

    fn metrics(&self) -> StageMetrics {
        StageMetrics::Blur {
            kernel_size: self.config.blur_kernel_size,
            sigma: crate::blur::sigma_for_size(self.config.blur_kernel_size),
        }
    }
}

impl PipelineStage for Opened {
    const NAME: &str = "open";
    const INDEX: usize = 3;

    fn metrics(&self) -> StageMetrics {
        StageMetrics::Morphology {
            kernel_size: self.config.morph_kernel_size,
            erode_iterations: self.config.erode_iterations,
            dilate_iterations: self.config.dilate_iterations,
        }
    }
}

impl PipelineStage for Binarized {
    const NAME: &str = "threshold";
    const INDEX: usize = 4;

    fn metrics(&self) -> StageMetrics {
        StageMetrics::Threshold {
            threshold: self.config.threshold,
            foreground_pixel_count: crate::threshold::foreground_count(&self.binary),
            total_pixel_count: u64::from(self.dimensions.width)
                * u64::from(self.dimensions.height),
        }
    }
}

impl PipelineStage for EdgesDetected {
    const NAME: &str = "edges";
    const INDEX: usize = 5;

    fn metrics(&self) -> StageMetrics {
        let (low_threshold, high_threshold) =
            crate::edge::clamp_thresholds(self.config.canny_low, self.config.canny_high);
        StageMetrics::EdgeDetection {
            low_threshold,
            high_threshold,
            edge_pixel_count: crate::edge::count_edge_pixels(&self.edges),
            total_pixel_count: u64::from(self.dimensions.width)
                * u64::from(self.dimensions.height),
        }
    }
}

impl PipelineStage for ContoursTraced {
    const NAME: &str = "contours";
    const INDEX: usize = 6;

    fn metrics(&self) -> StageMetrics {
        let stats = crate::diagnostics::contour_stats(&self.contours);
        let selected = self.selected();
        StageMetrics::ContourTracing {
            contour_count: self.contours.len(),
            total_point_count: stats.total,
            min_contour_points: stats.min,
            max_contour_points: stats.max,
            mean_contour_points: stats.mean,
            selected_points: selected.map(Contour::len),
            selected_area: selected.map(Contour::area),
        }
    }
}

impl PipelineStage for Fitted {
    const NAME: &str = "fit";
    const INDEX: usize = 7;

    fn metrics(&self) -> StageMetrics {
        StageMetrics::from_measurement(&self.measurement)
    }
}

impl PipelineStage for Annotated {
    const NAME: &str = "annotate";
    const INDEX: usize = 8;

    fn metrics(&self) -> StageMetrics {
        StageMetrics::Annotate {
            drawn: self.measurement.is_measured(),
        }
    }
}

// ───────────────────── Pipeline entry point ──────────────────────────

/// Incremental pupil measurement pipeline.
///
/// Created via [`Pipeline::new`], which stores the input image and config
/// without doing any processing. Each stage method consumes the current
/// state and returns the next, making it a compile-time error to skip
/// stages or call them out of order.
pub struct Pipeline;

impl Pipeline {
    /// Create a new pipeline from a decoded image and config.
    ///
    /// No processing is performed. Call
    /// [`.validate()`](Pending::validate) to begin.
    #[allow(clippy::new_ret_no_self)]
    pub const fn new(image: DynamicImage, config: PipelineConfig) -> Pending {
        Pending { config, image }
    }
}
