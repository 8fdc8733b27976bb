//! pupilsize: estimate pupil diameter from a single eye photograph.
//!
//! Reads an image file, runs the measurement pipeline, and prints the
//! major and minor pupil axes in pixels and millimeters. Optionally
//! writes the annotated image, a JSON report, and per-stage diagnostics.
//!
//! # Usage
//!
//! ```text
//! pupilsize [OPTIONS] <IMAGE_PATH>
//! ```

#![allow(clippy::print_stdout)]

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::{Duration, Instant};

use ab_glyph::FontArc;
use clap::Parser;
use pupilsize_pipeline::diagnostics::{Clock, PipelineDiagnostics};
use pupilsize_pipeline::{
    AnnotationStyle, Calibration, Dimensions, Measurement, PipelineConfig, StagedResult,
};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

/// Estimate pupil diameter in millimeters from an eye photograph.
///
/// The pupil is found as the largest dark region after smoothing,
/// morphological opening and thresholding, and measured by fitting an
/// ellipse to its boundary. Pixels are converted to millimeters with a
/// fixed reference ratio.
#[derive(Parser)]
#[command(name = "pupilsize", version)]
struct Cli {
    /// Path to the input image (PNG, JPEG, BMP, WebP).
    image_path: PathBuf,

    /// Write the annotated image (PNG) to this path.
    #[arg(long, short)]
    output: Option<PathBuf>,

    /// TrueType/OpenType font for the axis labels, replacing the built-in one.
    #[arg(long)]
    font: Option<PathBuf>,

    /// Print the report as JSON instead of human-readable text.
    #[arg(long)]
    json: bool,

    /// Include per-stage timing and counts.
    #[arg(long)]
    diagnostics: bool,

    /// Gaussian blur kernel size (odd).
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_BLUR_KERNEL_SIZE)]
    blur_kernel: u32,

    /// Morphology structuring element size (odd).
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_MORPH_KERNEL_SIZE)]
    morph_kernel: u32,

    /// Number of erosion passes.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_ERODE_ITERATIONS)]
    erode_iterations: u32,

    /// Number of dilation passes.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_DILATE_ITERATIONS)]
    dilate_iterations: u32,

    /// Binarization cutoff; pixels strictly above become foreground.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_THRESHOLD)]
    threshold: u8,

    /// Canny low threshold.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_CANNY_LOW)]
    canny_low: f32,

    /// Canny high threshold.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_CANNY_HIGH)]
    canny_high: f32,

    /// Real-world size of the calibration reference in millimeters.
    #[arg(long, default_value_t = Calibration::DEFAULT_REFERENCE_MM)]
    reference_mm: f64,

    /// Pixel span of the calibration reference.
    #[arg(long, default_value_t = Calibration::DEFAULT_REFERENCE_PX)]
    reference_px: f64,

    /// Full pipeline config as a JSON string.
    ///
    /// When provided, all other pipeline parameter flags are ignored.
    /// The JSON must be a valid `PipelineConfig` serialization.
    #[arg(long)]
    config_json: Option<String>,
}

/// JSON shape printed by `--json`.
#[derive(Serialize)]
struct JsonReport<'a> {
    measurement: &'a Measurement,
    dimensions: Dimensions,
    #[serde(skip_serializing_if = "Option::is_none")]
    diagnostics: Option<&'a PipelineDiagnostics>,
}

/// Build a [`PipelineConfig`] from CLI arguments.
///
/// If `--config-json` is provided, the JSON is parsed directly and all
/// individual parameter flags are ignored.
fn config_from_cli(cli: &Cli) -> Result<PipelineConfig, String> {
    if let Some(ref json) = cli.config_json {
        return serde_json::from_str(json).map_err(|e| format!("error parsing --config-json: {e}"));
    }

    Ok(PipelineConfig {
        blur_kernel_size: cli.blur_kernel,
        morph_kernel_size: cli.morph_kernel,
        erode_iterations: cli.erode_iterations,
        dilate_iterations: cli.dilate_iterations,
        threshold: cli.threshold,
        canny_low: cli.canny_low,
        canny_high: cli.canny_high,
        calibration: Calibration {
            reference_mm: cli.reference_mm,
            reference_px: cli.reference_px,
        },
    })
}

fn load_font(path: &Path) -> Result<FontArc, String> {
    let bytes =
        std::fs::read(path).map_err(|e| format!("error reading font {}: {e}", path.display()))?;
    FontArc::try_from_vec(bytes).map_err(|e| format!("error loading font {}: {e}", path.display()))
}

/// Write the annotated image, re-rendering it when a font is given.
fn write_annotated(
    staged: &StagedResult,
    path: &Path,
    font: Option<FontArc>,
) -> Result<(), String> {
    let rendered;
    let image = match font {
        Some(font) => {
            rendered = pupilsize_pipeline::annotate::annotate(
                &staged.original,
                &staged.measurement,
                &AnnotationStyle::with_font(font),
            );
            &rendered
        }
        None => &staged.annotated,
    };
    image
        .save_with_format(path, image::ImageFormat::Png)
        .map_err(|e| format!("error writing {}: {e}", path.display()))
}

fn print_human(staged: &StagedResult) {
    match &staged.measurement {
        Measurement::Measured(m) => {
            println!("Major Axis: {}px", m.major_axis_px);
            println!("Minor Axis: {}px", m.minor_axis_px);
            println!("Major Axis: {:.2} mm", m.major_mm);
            println!("Minor Axis: {:.2} mm", m.minor_mm);
        }
        Measurement::Unmeasured(reason) => {
            println!("Pupil not measured: {reason}");
        }
    }
}

fn run(cli: &Cli) -> Result<(), String> {
    let config = config_from_cli(cli)?;
    let font = cli.font.as_deref().map(load_font).transpose()?;

    let image_bytes = std::fs::read(&cli.image_path)
        .map_err(|e| format!("error reading {}: {e}", cli.image_path.display()))?;
    tracing::info!(
        image = %cli.image_path.display(),
        bytes = image_bytes.len(),
        "measuring"
    );
    tracing::debug!(?config, "pipeline config");

    let (staged, diagnostics) = pupilsize_pipeline::diagnostics::process_staged_with_diagnostics(
        &image_bytes,
        &config,
        &StdClock,
    )
    .map_err(|e| format!("pipeline error: {e}"))?;

    if cli.json {
        let report = JsonReport {
            measurement: &staged.measurement,
            dimensions: staged.dimensions,
            diagnostics: cli.diagnostics.then_some(&diagnostics),
        };
        let json = serde_json::to_string_pretty(&report)
            .map_err(|e| format!("error serializing report: {e}"))?;
        println!("{json}");
    } else {
        print_human(&staged);
        if cli.diagnostics {
            println!();
            println!("{}", diagnostics.report());
        }
    }

    if let Some(ref output) = cli.output {
        write_annotated(&staged, output, font)?;
        tracing::info!(path = %output.display(), "annotated image written");
    }

    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(msg) => {
            tracing::error!("{msg}");
            ExitCode::FAILURE
        }
    }
}

/// [`Clock`] implementation backed by [`std::time::Instant`].
struct StdClock;

impl Clock for StdClock {
    type Instant = Instant;

    fn now(&self) -> Instant {
        Instant::now()
    }

    fn elapsed(&self, since: &Instant) -> Duration {
        since.elapsed()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn defaults_match_pipeline_defaults() {
        let cli = Cli::parse_from(["pupilsize", "eye.png"]);
        assert_eq!(config_from_cli(&cli).unwrap(), PipelineConfig::default());
    }

    #[test]
    fn flags_override_defaults() {
        let cli = Cli::parse_from([
            "pupilsize",
            "eye.png",
            "--threshold",
            "70",
            "--reference-px",
            "120",
        ]);
        let config = config_from_cli(&cli).unwrap();
        assert_eq!(config.threshold, 70);
        assert!((config.calibration.reference_px - 120.0).abs() < f64::EPSILON);
        assert_eq!(config.blur_kernel_size, PipelineConfig::DEFAULT_BLUR_KERNEL_SIZE);
    }

    #[test]
    fn config_json_replaces_flags() {
        let cli = Cli::parse_from([
            "pupilsize",
            "eye.png",
            "--threshold",
            "70",
            "--config-json",
            r#"{"threshold": 90}"#,
        ]);
        let config = config_from_cli(&cli).unwrap();
        assert_eq!(config.threshold, 90);
        assert_eq!(config.canny_high, PipelineConfig::DEFAULT_CANNY_HIGH);
    }

    #[test]
    fn bad_config_json_is_reported() {
        let cli = Cli::parse_from(["pupilsize", "eye.png", "--config-json", "{"]);
        assert!(config_from_cli(&cli).unwrap_err().contains("--config-json"));
    }

    #[test]
    fn missing_image_is_an_error() {
        let cli = Cli::parse_from(["pupilsize", "/nonexistent/eye.png"]);
        assert!(run(&cli).unwrap_err().contains("error reading"));
    }

    #[test]
    fn std_clock_measures_forward() {
        let start = StdClock.now();
        assert!(StdClock.elapsed(&start) < Duration::from_secs(60));
    }
}
