//! Render the fitted ellipse onto a copy of the input image.
//!
//! Rendering is a separate output from the numeric measurement: the
//! annotated image never feeds back into the pipeline, and everything in
//! [`crate::measure`] is testable without it.
//!
//! Geometry (the rotated ellipse outline and the center marker) is drawn
//! with `tiny-skia`. Axis labels are drawn with the embedded DejaVu Sans
//! unless [`AnnotationStyle::font`] is replaced or set to `None`.

use ab_glyph::{FontArc, PxScale};
use image::{Rgba, RgbaImage};
use tiny_skia::{FillRule, IntSize, Paint, PathBuilder, Pixmap, Rect, Stroke, Transform};

use crate::types::{Measurement, PupilMeasurement, RgbImage};

/// DejaVu Sans, used for the axis labels by default.
static DEFAULT_FONT: &[u8] = include_bytes!("../fonts/DejaVuSans.ttf");

/// The embedded label font.
///
/// Returns `None` only if the embedded data fails to parse.
#[must_use]
pub fn default_font() -> Option<FontArc> {
    FontArc::try_from_slice(DEFAULT_FONT).ok()
}

/// Colors, sizes and optional font used by [`annotate`].
#[derive(Clone)]
pub struct AnnotationStyle {
    /// Ellipse outline color.
    pub ellipse_color: [u8; 3],
    /// Ellipse outline width in pixels.
    pub line_width: f32,
    /// Center marker color.
    pub center_color: [u8; 3],
    /// Center marker radius in pixels.
    pub center_radius: f32,
    /// Label text color.
    pub label_color: [u8; 3],
    /// Label glyph height in pixels.
    pub label_scale: f32,
    /// Font for the axis labels. Labels are skipped without one.
    pub font: Option<FontArc>,
}

impl std::fmt::Debug for AnnotationStyle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnnotationStyle")
            .field("ellipse_color", &self.ellipse_color)
            .field("line_width", &self.line_width)
            .field("center_color", &self.center_color)
            .field("center_radius", &self.center_radius)
            .field("label_color", &self.label_color)
            .field("label_scale", &self.label_scale)
            .field("font", &self.font.as_ref().map(|_| "<font>"))
            .finish()
    }
}

impl Default for AnnotationStyle {
    fn default() -> Self {
        Self {
            ellipse_color: [0, 255, 0],
            line_width: 2.0,
            center_color: [255, 0, 0],
            center_radius: 3.0,
            label_color: [255, 255, 255],
            label_scale: 18.0,
            font: default_font(),
        }
    }
}

impl AnnotationStyle {
    /// Default style with axis labels rendered in `font`.
    #[must_use]
    pub fn with_font(font: FontArc) -> Self {
        Self {
            font: Some(font),
            ..Self::default()
        }
    }

    /// Default colors and sizes, ellipse and center marker only.
    #[must_use]
    pub fn without_labels() -> Self {
        Self {
            font: None,
            ..Self::default()
        }
    }
}

/// One axis label and its anchor (left end of the text baseline).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Label {
    /// Label text, e.g. `Major Axis: 72px`.
    pub text: String,
    /// Anchor column.
    pub x: i32,
    /// Anchor row (baseline).
    pub y: i32,
}

/// The two axis labels for `measurement`.
///
/// Both sit 50 px left of the center. The major label is raised by the
/// major axis length plus 10 px; the minor label is raised by the minor
/// axis length minus 10 px.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn labels(measurement: &PupilMeasurement) -> [Label; 2] {
    let center = measurement.ellipse.center;
    let cx = center.x.round() as i32;
    let cy = center.y.round() as i32;
    let major = i32::try_from(measurement.major_axis_px).unwrap_or(i32::MAX);
    let minor = i32::try_from(measurement.minor_axis_px).unwrap_or(i32::MAX);
    [
        Label {
            text: format!("Major Axis: {}px", measurement.major_axis_px),
            x: cx.saturating_sub(50),
            y: cy.saturating_sub(major).saturating_sub(10),
        },
        Label {
            text: format!("Minor Axis: {}px", measurement.minor_axis_px),
            x: cx.saturating_sub(50),
            y: cy.saturating_sub(minor).saturating_add(10),
        },
    ]
}

/// Draw `measurement` onto an opaque RGBA copy of `original`.
///
/// An unmeasured result returns the copy unmodified.
#[must_use = "returns the annotated image"]
pub fn annotate(
    original: &RgbImage,
    measurement: &Measurement,
    style: &AnnotationStyle,
) -> RgbaImage {
    let base = RgbaImage::from_fn(original.width(), original.height(), |x, y| {
        let [r, g, b] = original.get_pixel(x, y).0;
        Rgba([r, g, b, u8::MAX])
    });

    let Measurement::Measured(m) = measurement else {
        return base;
    };

    let mut annotated = draw_geometry(base, m, style);
    if let Some(font) = &style.font {
        draw_labels(&mut annotated, m, style, font);
    }
    annotated
}

fn paint(color: [u8; 3]) -> Paint<'static> {
    let mut paint = Paint::default();
    paint.set_color_rgba8(color[0], color[1], color[2], u8::MAX);
    // Hard edges keep the marker colors exact.
    paint.anti_alias = false;
    paint
}

/// Stroke the rotated ellipse and fill the center marker.
#[allow(clippy::cast_possible_truncation)]
fn draw_geometry(base: RgbaImage, m: &PupilMeasurement, style: &AnnotationStyle) -> RgbaImage {
    let (width, height) = base.dimensions();
    let Some(size) = IntSize::from_wh(width, height) else {
        return base;
    };
    let Some(mut pixmap) = Pixmap::from_vec(base.clone().into_raw(), size) else {
        return base;
    };

    let e = &m.ellipse;
    let (cx, cy) = (e.center.x as f32, e.center.y as f32);
    let semi_major = (e.major_axis_px / 2.0) as f32;
    let semi_minor = (e.minor_axis_px / 2.0) as f32;

    if let Some(oval) = Rect::from_xywh(
        cx - semi_major,
        cy - semi_minor,
        2.0 * semi_major,
        2.0 * semi_minor,
    )
    .and_then(PathBuilder::from_oval)
    {
        let stroke = Stroke {
            width: style.line_width,
            ..Stroke::default()
        };
        let rotation = Transform::from_rotate_at(e.angle_deg as f32, cx, cy);
        pixmap.stroke_path(&oval, &paint(style.ellipse_color), &stroke, rotation, None);
    }

    if let Some(marker) = PathBuilder::from_circle(cx, cy, style.center_radius) {
        pixmap.fill_path(
            &marker,
            &paint(style.center_color),
            FillRule::Winding,
            Transform::identity(),
            None,
        );
    }

    // The base is opaque and every paint is opaque, so the premultiplied
    // pixmap data is already straight RGBA.
    RgbaImage::from_raw(width, height, pixmap.take()).unwrap_or(base)
}

fn draw_labels(
    image: &mut RgbaImage,
    m: &PupilMeasurement,
    style: &AnnotationStyle,
    font: &FontArc,
) {
    let [r, g, b] = style.label_color;
    let color = Rgba([r, g, b, u8::MAX]);
    let scale = PxScale::from(style.label_scale);
    #[allow(clippy::cast_possible_truncation)]
    let ascent = style.label_scale.round() as i32;
    for label in labels(m) {
        imageproc::drawing::draw_text_mut(
            image,
            color,
            label.x,
            label.y.saturating_sub(ascent),
            scale,
            font,
            &label.text,
        );
    }
}
