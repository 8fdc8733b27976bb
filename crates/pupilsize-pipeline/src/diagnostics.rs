//! Pipeline diagnostics: timing, counts, and other metrics for each stage.
//!
//! These diagnostics are permanent instrumentation intended for parameter
//! tuning. [`process_staged_with_diagnostics`] drives the incremental
//! [`Pipeline`] one stage at a time and records how long each stage took
//! and what it produced.
//!
//! Timestamps come from a caller-supplied [`Clock`]. [`WebClock`] uses
//! the `web-time` crate, which uses `performance.now()` on WASM and
//! `std::time::Instant` on native.
//!
//! Durations are serialized as fractional seconds (`f64`) for JSON
//! compatibility, since `std::time::Duration` does not implement serde
//! traits.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::annotate::AnnotationStyle;
use crate::pipeline::{Pipeline, PipelineStage};
use crate::types::{Contour, Measurement, PipelineConfig, PipelineError, StagedResult};

/// Serde support for `std::time::Duration` as fractional seconds.
mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Serialize a `Duration` as fractional seconds (`f64`).
    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs_f64().serialize(serializer)
    }

    /// Deserialize a `Duration` from fractional seconds (`f64`).
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(|_| {
            serde::de::Error::custom(
                "duration seconds must be finite, non-negative, and representable as a Duration",
            )
        })
    }
}

/// Source of monotonic timestamps for stage timing.
pub trait Clock {
    /// Opaque timestamp type.
    type Instant;

    /// Current timestamp.
    fn now(&self) -> Self::Instant;

    /// Time elapsed since `since`.
    fn elapsed(&self, since: &Self::Instant) -> Duration;
}

/// [`Clock`] backed by [`web_time::Instant`].
#[derive(Debug, Clone, Copy, Default)]
pub struct WebClock;

impl Clock for WebClock {
    type Instant = web_time::Instant;

    fn now(&self) -> Self::Instant {
        web_time::Instant::now()
    }

    fn elapsed(&self, since: &Self::Instant) -> Duration {
        since.elapsed()
    }
}

/// Diagnostics collected from a single pipeline run.
///
/// Each field captures metrics for one logical stage of the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineDiagnostics {
    /// Image decoding.
    pub decode: StageDiagnostics,
    /// Config and input validation.
    pub validate: StageDiagnostics,
    /// Grayscale conversion.
    pub grayscale: StageDiagnostics,
    /// Gaussian blur.
    pub blur: StageDiagnostics,
    /// Erosion followed by dilation.
    pub morphology: StageDiagnostics,
    /// Fixed thresholding.
    pub threshold: StageDiagnostics,
    /// Canny edge detection.
    pub edge_detection: StageDiagnostics,
    /// External contour tracing and selection.
    pub contour_tracing: StageDiagnostics,
    /// Ellipse fit and unit conversion.
    pub fit: StageDiagnostics,
    /// Annotation rendering.
    pub annotate: StageDiagnostics,
    /// Total wall-clock duration of the entire pipeline (seconds).
    #[serde(with = "duration_serde")]
    pub total_duration: Duration,
    /// Summary counts across all stages.
    pub summary: PipelineSummary,
}

/// Diagnostics for a single pipeline stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageDiagnostics {
    /// Wall-clock duration of this stage (seconds).
    #[serde(with = "duration_serde")]
    pub duration: Duration,
    /// Stage-specific metrics (counts, sizes, etc.).
    pub metrics: StageMetrics,
}

/// Stage-specific metrics that vary by pipeline stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StageMetrics {
    /// Image decoding metrics.
    Decode {
        /// Size of the input image bytes.
        input_bytes: usize,
        /// Decoded image width in pixels.
        width: u32,
        /// Decoded image height in pixels.
        height: u32,
    },
    /// Validation metrics.
    Validate {
        /// Image width in pixels.
        width: u32,
        /// Image height in pixels.
        height: u32,
        /// Total pixel count (`width * height`).
        pixel_count: u64,
    },
    /// Grayscale conversion metrics.
    Grayscale {
        /// Image width in pixels.
        width: u32,
        /// Image height in pixels.
        height: u32,
    },
    /// Gaussian blur metrics.
    Blur {
        /// Kernel side length.
        kernel_size: u32,
        /// Sigma derived from the kernel size.
        sigma: f64,
    },
    /// Morphological opening metrics.
    Morphology {
        /// Structuring element side length.
        kernel_size: u32,
        /// Erosion passes.
        erode_iterations: u32,
        /// Dilation passes.
        dilate_iterations: u32,
    },
    /// Thresholding metrics.
    Threshold {
        /// Cutoff; pixels strictly above become foreground.
        threshold: u8,
        /// Number of foreground (255) pixels.
        foreground_pixel_count: u64,
        /// Total pixel count.
        total_pixel_count: u64,
    },
    /// Canny edge detection metrics.
    EdgeDetection {
        /// Low threshold (after clamping).
        low_threshold: f32,
        /// High threshold (after clamping).
        high_threshold: f32,
        /// Number of edge pixels (value == 255) in the output.
        edge_pixel_count: u64,
        /// Total pixel count for computing edge density.
        total_pixel_count: u64,
    },
    /// Contour tracing metrics.
    ContourTracing {
        /// Number of external contours found.
        contour_count: usize,
        /// Total number of vertices across all contours.
        total_point_count: usize,
        /// Minimum vertices in any single contour.
        min_contour_points: usize,
        /// Maximum vertices in any single contour.
        max_contour_points: usize,
        /// Mean vertices per contour.
        mean_contour_points: f64,
        /// Vertices in the selected (largest-area) contour.
        selected_points: Option<usize>,
        /// Enclosed area of the selected contour in square pixels.
        selected_area: Option<f64>,
    },
    /// Ellipse fit metrics.
    Fit {
        /// `"measured"` or the reason no measurement was produced.
        outcome: String,
        /// Rounded major axis, when measured.
        major_axis_px: Option<u32>,
        /// Rounded minor axis, when measured.
        minor_axis_px: Option<u32>,
    },
    /// Annotation metrics.
    Annotate {
        /// Whether an ellipse was drawn.
        drawn: bool,
    },
}

impl StageMetrics {
    /// Fit metrics for a measurement outcome.
    #[must_use]
    pub fn from_measurement(measurement: &Measurement) -> Self {
        match measurement {
            Measurement::Measured(m) => Self::Fit {
                outcome: "measured".to_string(),
                major_axis_px: Some(m.major_axis_px),
                minor_axis_px: Some(m.minor_axis_px),
            },
            Measurement::Unmeasured(reason) => Self::Fit {
                outcome: reason.to_string(),
                major_axis_px: None,
                minor_axis_px: None,
            },
        }
    }
}

/// High-level summary counts for the entire pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSummary {
    /// Source image width in pixels.
    pub image_width: u32,
    /// Source image height in pixels.
    pub image_height: u32,
    /// Total pixel count.
    pub pixel_count: u64,
    /// Number of external contours found.
    pub contour_count: usize,
    /// Whether a measurement was produced.
    pub measured: bool,
}

impl PipelineDiagnostics {
    /// Stage names paired with their diagnostics, in execution order.
    #[must_use]
    pub fn stages(&self) -> [(&'static str, &StageDiagnostics); 10] {
        [
            ("Decode", &self.decode),
            ("Validate", &self.validate),
            ("Grayscale", &self.grayscale),
            ("Blur", &self.blur),
            ("Morphology", &self.morphology),
            ("Threshold", &self.threshold),
            ("Edge Detection", &self.edge_detection),
            ("Contour Tracing", &self.contour_tracing),
            ("Ellipse Fit", &self.fit),
            ("Annotate", &self.annotate),
        ]
    }

    /// Format diagnostics as a human-readable report.
    #[must_use]
    pub fn report(&self) -> String {
        let mut lines = Vec::new();

        lines.push(format!("Pipeline Diagnostics Report\n{}", "=".repeat(60)));
        lines.push(format!(
            "Image: {}x{} ({} pixels)",
            self.summary.image_width, self.summary.image_height, self.summary.pixel_count,
        ));
        lines.push(format!(
            "Total duration: {:.3}ms",
            duration_ms(self.total_duration),
        ));
        lines.push(String::new());

        lines.push(format!(
            "{:<24} {:>10} {:>10}  {}",
            "Stage", "Duration", "% Total", "Details"
        ));
        lines.push("-".repeat(80));

        let total_ms = duration_ms(self.total_duration);
        for (name, diag) in self.stages() {
            let ms = duration_ms(diag.duration);
            let pct = if total_ms > 0.0 {
                ms / total_ms * 100.0
            } else {
                0.0
            };
            let details = format_metrics(&diag.metrics);
            lines.push(format!("{name:<24} {ms:>8.3}ms {pct:>9.1}%  {details}"));
        }

        lines.push(String::new());
        lines.push(format!(
            "Contours: {}  |  Measured: {}",
            self.summary.contour_count,
            if self.summary.measured { "yes" } else { "no" },
        ));

        lines.join("\n")
    }
}

/// Convert a `Duration` to milliseconds as `f64`.
fn duration_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

#[allow(clippy::cast_precision_loss)]
fn percent(part: u64, total: u64) -> f64 {
    if total > 0 {
        part as f64 / total as f64 * 100.0
    } else {
        0.0
    }
}

/// Format stage metrics into a compact detail string.
fn format_metrics(metrics: &StageMetrics) -> String {
    match metrics {
        StageMetrics::Decode {
            input_bytes,
            width,
            height,
        } => format!("{input_bytes} bytes -> {width}x{height}"),
        StageMetrics::Validate { width, height, .. }
        | StageMetrics::Grayscale { width, height } => format!("{width}x{height}"),
        StageMetrics::Blur { kernel_size, sigma } => {
            format!("{kernel_size}x{kernel_size} sigma={sigma:.2}")
        }
        StageMetrics::Morphology {
            kernel_size,
            erode_iterations,
            dilate_iterations,
        } => format!(
            "{kernel_size}x{kernel_size} erode x{erode_iterations} dilate x{dilate_iterations}"
        ),
        StageMetrics::Threshold {
            threshold,
            foreground_pixel_count,
            total_pixel_count,
        } => format!(
            "t={threshold} foreground={foreground_pixel_count} ({:.1}%)",
            percent(*foreground_pixel_count, *total_pixel_count),
        ),
        StageMetrics::EdgeDetection {
            low_threshold,
            high_threshold,
            edge_pixel_count,
            total_pixel_count,
        } => format!(
            "low={low_threshold:.1} high={high_threshold:.1} edges={edge_pixel_count} ({:.1}%)",
            percent(*edge_pixel_count, *total_pixel_count),
        ),
        StageMetrics::ContourTracing {
            contour_count,
            total_point_count,
            min_contour_points,
            max_contour_points,
            mean_contour_points,
            selected_points,
            selected_area,
        } => {
            let selected = match (selected_points, selected_area) {
                (Some(points), Some(area)) => format!(", selected {points} pts area={area:.1}"),
                _ => String::new(),
            };
            format!(
                "{contour_count} contours, {total_point_count} pts (min={min_contour_points} max={max_contour_points} mean={mean_contour_points:.1}){selected}",
            )
        }
        StageMetrics::Fit {
            outcome,
            major_axis_px,
            minor_axis_px,
        } => match (major_axis_px, minor_axis_px) {
            (Some(major), Some(minor)) => format!("{outcome} {major}x{minor}px"),
            _ => outcome.clone(),
        },
        StageMetrics::Annotate { drawn } => {
            if *drawn {
                "ellipse drawn".to_string()
            } else {
                "copy only".to_string()
            }
        }
    }
}

/// Statistics for a set of contours.
pub(crate) struct ContourStats {
    /// Total number of vertices across all contours.
    pub total: usize,
    /// Minimum number of vertices in any single contour.
    pub min: usize,
    /// Maximum number of vertices in any single contour.
    pub max: usize,
    /// Mean number of vertices per contour.
    pub mean: f64,
}

/// Compute vertex statistics from a set of contours.
pub(crate) fn contour_stats(contours: &[Contour]) -> ContourStats {
    let total: usize = contours.iter().map(Contour::len).sum();
    let min = contours.iter().map(Contour::len).min().unwrap_or(0);
    let max = contours.iter().map(Contour::len).max().unwrap_or(0);
    #[allow(clippy::cast_precision_loss)]
    let mean = if contours.is_empty() {
        0.0
    } else {
        total as f64 / contours.len() as f64
    };
    ContourStats {
        total,
        min,
        max,
        mean,
    }
}

/// Run `f`, returning its output and how long it took on `clock`.
fn timed<C: Clock, T>(clock: &C, f: impl FnOnce() -> T) -> (T, Duration) {
    let start = clock.now();
    let out = f();
    (out, clock.elapsed(&start))
}

fn stage<S: PipelineStage>(state: &S, duration: Duration) -> StageDiagnostics {
    StageDiagnostics {
        duration,
        metrics: state.metrics(),
    }
}

/// Run the full pipeline on encoded image bytes, timing every stage.
///
/// Produces the same [`StagedResult`] as [`crate::process_staged`] plus a
/// [`PipelineDiagnostics`] breakdown.
///
/// # Errors
///
/// Returns [`PipelineError::EmptyInput`] if `bytes` is empty,
/// [`PipelineError::ImageDecode`] if the format is unrecognized, and the
/// validation errors of [`crate::pipeline::Pending::validate`].
pub fn process_staged_with_diagnostics<C: Clock>(
    bytes: &[u8],
    config: &PipelineConfig,
    clock: &C,
) -> Result<(StagedResult, PipelineDiagnostics), PipelineError> {
    let run_start = clock.now();

    let (decoded, decode_time) = timed(clock, || crate::grayscale::decode(bytes));
    let image = decoded?;
    let decode = StageDiagnostics {
        duration: decode_time,
        metrics: StageMetrics::Decode {
            input_bytes: bytes.len(),
            width: image.width(),
            height: image.height(),
        },
    };

    let pending = Pipeline::new(image, config.clone());
    let (validated, t) = timed(clock, || pending.validate());
    let validated = validated?;
    let validate = stage(&validated, t);

    let (grayscaled, t) = timed(clock, || validated.grayscale());
    let grayscale = stage(&grayscaled, t);

    let (blurred, t) = timed(clock, || grayscaled.blur());
    let blur = stage(&blurred, t);

    let (opened, t) = timed(clock, || blurred.open());
    let morphology = stage(&opened, t);

    let (binarized, t) = timed(clock, || opened.binarize());
    let threshold = stage(&binarized, t);

    let (edges, t) = timed(clock, || binarized.detect_edges());
    let edge_detection = stage(&edges, t);

    let (traced, t) = timed(clock, || edges.trace_contours());
    let contour_tracing = stage(&traced, t);

    let (fitted, t) = timed(clock, || traced.fit());
    let fit = stage(&fitted, t);

    let style = AnnotationStyle::default();
    let (annotated, t) = timed(clock, || fitted.annotate(&style));
    let annotate = stage(&annotated, t);

    let result = annotated.into_result();
    let total_duration = clock.elapsed(&run_start);

    let summary = PipelineSummary {
        image_width: result.dimensions.width,
        image_height: result.dimensions.height,
        pixel_count: u64::from(result.dimensions.width) * u64::from(result.dimensions.height),
        contour_count: result.contours.len(),
        measured: result.measurement.is_measured(),
    };

    tracing::debug!(
        total_ms = duration_ms(total_duration),
        contours = summary.contour_count,
        measured = summary.measured,
        "pipeline diagnostics collected"
    );

    Ok((
        result,
        PipelineDiagnostics {
            decode,
            validate,
            grayscale,
            blur,
            morphology,
            threshold,
            edge_detection,
            contour_tracing,
            fit,
            annotate,
            total_duration,
            summary,
        },
    ))
}
