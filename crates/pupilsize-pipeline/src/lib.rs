//! pupilsize-pipeline: Pure pupil measurement pipeline (sans-IO).
//!
//! Estimates the major and minor pupil diameters in millimeters from a
//! single eye photograph through:
//! grayscale -> blur -> morphological opening -> threshold ->
//! edge detection -> contour selection -> ellipse fit -> unit conversion.
//!
//! This crate has **no I/O dependencies** -- it operates on in-memory
//! byte slices and decoded images and returns structured data. All
//! filesystem and terminal interaction lives in the `pupilsize` binary.

pub mod annotate;
pub mod blur;
pub mod contour;
pub mod diagnostics;
pub mod edge;
pub mod ellipse;
pub mod grayscale;
pub mod measure;
pub mod morphology;
pub mod pipeline;
pub mod threshold;
pub mod types;

use image::DynamicImage;

pub use annotate::AnnotationStyle;
pub use pipeline::Pipeline;
pub use types::{
    Calibration, Contour, Dimensions, FittedEllipse, GridPoint, Measurement, PipelineConfig,
    PipelineError, Point, PupilMeasurement, PupilReport, StagedResult, UnmeasuredReason,
};

/// Run the full measurement pipeline on a decoded image.
///
/// # Pipeline steps
///
/// 1. Validate the config and the input (non-empty, color)
/// 2. Grayscale conversion
/// 3. Gaussian blur
/// 4. Morphological opening (erode, then dilate)
/// 5. Fixed threshold binarization
/// 6. Canny edge detection
/// 7. Largest external contour selection
/// 8. Ellipse fit and pixel-to-millimeter conversion
/// 9. Annotation of a color copy of the input
///
/// Intermediates are dropped as soon as the next stage no longer needs
/// them. A photograph with no usable pupil boundary is not an error: the
/// report carries [`Measurement::Unmeasured`].
///
/// # Errors
///
/// Returns [`PipelineError::InvalidConfig`] for a bad config,
/// [`PipelineError::EmptyInput`] for a zero-sized image and
/// [`PipelineError::InvalidInput`] for a grayscale image.
pub fn measure(
    image: &DynamicImage,
    config: &PipelineConfig,
) -> Result<PupilReport, PipelineError> {
    // 1. Validate.
    config.validate()?;
    let original = grayscale::validate_color(image)?;
    let dimensions = Dimensions {
        width: original.width(),
        height: original.height(),
    };

    // 2-6. Raster stages.
    let gray = grayscale::to_grayscale(&original);
    let blurred = blur::gaussian_blur(&gray, config.blur_kernel_size);
    let opened = morphology::open(
        &blurred,
        config.morph_kernel_size,
        config.erode_iterations,
        config.dilate_iterations,
    );
    let binary = threshold::binarize(&opened, config.threshold);
    let edges = edge::canny(&binary, config.canny_low, config.canny_high);

    // 7-8. Contour selection, fit and conversion.
    let measurement = measure::fit_pupil_contour(&edges, &config.calibration);

    // 9. Annotation.
    let annotated = annotate::annotate(&original, &measurement, &AnnotationStyle::default());

    Ok(PupilReport {
        measurement,
        annotated,
        dimensions,
    })
}

/// Decode raw image bytes (PNG, JPEG, BMP, WebP) and [`measure`] them.
///
/// # Errors
///
/// Returns [`PipelineError::EmptyInput`] if `image_bytes` is empty,
/// [`PipelineError::ImageDecode`] if the format is unrecognized, and
/// every error [`measure`] returns.
pub fn process(image_bytes: &[u8], config: &PipelineConfig) -> Result<PupilReport, PipelineError> {
    let image = grayscale::decode(image_bytes)?;
    measure(&image, config)
}

/// Run the full pipeline on a decoded image, keeping every intermediate.
///
/// # Errors
///
/// Same as [`measure`].
pub fn measure_staged(
    image: &DynamicImage,
    config: &PipelineConfig,
) -> Result<StagedResult, PipelineError> {
    Ok(Pipeline::new(image.clone(), config.clone())
        .validate()?
        .grayscale()
        .blur()
        .open()
        .binarize()
        .detect_edges()
        .trace_contours()
        .fit()
        .annotate(&AnnotationStyle::default())
        .into_result())
}

/// Decode raw image bytes and run the pipeline, keeping every
/// intermediate.
///
/// # Errors
///
/// Same as [`process`].
pub fn process_staged(
    image_bytes: &[u8],
    config: &PipelineConfig,
) -> Result<StagedResult, PipelineError> {
    let image = grayscale::decode(image_bytes)?;
    measure_staged(&image, config)
}
