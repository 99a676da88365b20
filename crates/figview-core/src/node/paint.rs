//! Fill and stroke paint descriptors.

use peniko::Color;
use serde::{Deserialize, Serialize};

use super::{default_opacity, default_visible};

/// Colour as exported by the design tool: channels in `0.0..=1.0`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RgbaColor {
    pub r: f64,
    pub g: f64,
    pub b: f64,
    #[serde(default = "default_opacity")]
    pub a: f64,
}

impl RgbaColor {
    pub fn new(r: f64, g: f64, b: f64, a: f64) -> Self {
        Self { r, g, b, a }
    }

    /// Quantize to 8-bit channels, multiplying alpha by `opacity`.
    pub fn to_rgba8(self, opacity: f64) -> Rgba8 {
        let channel = |v: f64| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
        Rgba8::new(
            channel(self.r),
            channel(self.g),
            channel(self.b),
            channel(self.a * opacity),
        )
    }
}

/// Paint-tree colour representation (RGBA8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rgba8 {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba8 {
    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    pub const fn black() -> Self {
        Self::new(0, 0, 0, 255)
    }

    pub const fn transparent() -> Self {
        Self::new(0, 0, 0, 0)
    }

    /// Get this colour with its alpha multiplied by `opacity`.
    pub fn with_opacity(self, opacity: f64) -> Self {
        let alpha = (self.a as f64 * opacity.clamp(0.0, 1.0)).round() as u8;
        Self { a: alpha, ..self }
    }
}

impl From<Color> for Rgba8 {
    fn from(color: Color) -> Self {
        let rgba = color.to_rgba8();
        Self {
            r: rgba.r,
            g: rgba.g,
            b: rgba.b,
            a: rgba.a,
        }
    }
}

impl From<Rgba8> for Color {
    fn from(color: Rgba8) -> Self {
        Color::from_rgba8(color.r, color.g, color.b, color.a)
    }
}

/// A 2D vector as exported (gradient handles, shadow offsets).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vector2 {
    pub x: f64,
    pub y: f64,
}

/// One stop of a gradient paint.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ColorStop {
    pub position: f64,
    pub color: RgbaColor,
}

/// How an image paint maps onto its node box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScaleMode {
    #[default]
    Fill,
    Fit,
    Tile,
    Stretch,
    Crop,
    #[serde(other)]
    Unknown,
}

/// A fill or stroke descriptor attached to a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Paint {
    Solid {
        color: RgbaColor,
        #[serde(default = "default_opacity")]
        opacity: f64,
        #[serde(default = "default_visible")]
        visible: bool,
    },
    Image {
        #[serde(rename = "imageRef", default)]
        image_ref: Option<String>,
        #[serde(rename = "scaleMode", default)]
        scale_mode: ScaleMode,
        #[serde(default = "default_opacity")]
        opacity: f64,
        #[serde(default = "default_visible")]
        visible: bool,
    },
    /// Approximated as a two-point linear gradient.
    GradientLinear {
        #[serde(rename = "gradientHandlePositions", default)]
        handles: Vec<Vector2>,
        #[serde(rename = "gradientStops", default)]
        stops: Vec<ColorStop>,
        #[serde(default = "default_opacity")]
        opacity: f64,
        #[serde(default = "default_visible")]
        visible: bool,
    },
    /// Any paint type outside the supported set; never painted.
    #[serde(other)]
    Unsupported,
}

impl Paint {
    /// Create a visible, opaque solid paint.
    pub fn solid(color: RgbaColor) -> Self {
        Paint::Solid {
            color,
            opacity: 1.0,
            visible: true,
        }
    }

    /// Create a visible image paint for a reference key.
    pub fn image(image_ref: impl Into<String>) -> Self {
        Paint::Image {
            image_ref: Some(image_ref.into()),
            scale_mode: ScaleMode::Fill,
            opacity: 1.0,
            visible: true,
        }
    }

    pub fn is_visible(&self) -> bool {
        match self {
            Paint::Solid { visible, .. }
            | Paint::Image { visible, .. }
            | Paint::GradientLinear { visible, .. } => *visible,
            Paint::Unsupported => false,
        }
    }

    pub fn opacity(&self) -> f64 {
        match self {
            Paint::Solid { opacity, .. }
            | Paint::Image { opacity, .. }
            | Paint::GradientLinear { opacity, .. } => *opacity,
            Paint::Unsupported => 0.0,
        }
    }

    /// The solid colour of this paint with its paint opacity applied.
    pub fn solid_rgba8(&self) -> Option<Rgba8> {
        match self {
            Paint::Solid { color, opacity, .. } => Some(color.to_rgba8(*opacity)),
            _ => None,
        }
    }

    /// A single colour approximating this paint (first stop for gradients).
    pub fn approximate_rgba8(&self) -> Option<Rgba8> {
        match self {
            Paint::Solid { .. } => self.solid_rgba8(),
            Paint::GradientLinear { stops, opacity, .. } => {
                stops.first().map(|stop| stop.color.to_rgba8(*opacity))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_solid_paint_parses_without_alpha() {
        let paint: Paint = serde_json::from_str(
            r#"{"type":"SOLID","color":{"r":0.2,"g":0.6,"b":1}}"#,
        )
        .unwrap();
        assert_eq!(paint.solid_rgba8(), Some(Rgba8::new(51, 153, 255, 255)));
        assert!(paint.is_visible());
    }

    #[test]
    fn test_image_paint_fields() {
        let paint: Paint = serde_json::from_str(
            r#"{"type":"IMAGE","imageRef":"abc123","scaleMode":"FIT","visible":false}"#,
        )
        .unwrap();
        match paint {
            Paint::Image {
                image_ref,
                scale_mode,
                visible,
                ..
            } => {
                assert_eq!(image_ref.as_deref(), Some("abc123"));
                assert_eq!(scale_mode, ScaleMode::Fit);
                assert!(!visible);
            }
            other => panic!("unexpected paint {other:?}"),
        }
    }

    #[test]
    fn test_unknown_paint_type_degrades() {
        let paint: Paint =
            serde_json::from_str(r#"{"type":"GRADIENT_DIAMOND","gradientStops":[]}"#).unwrap();
        assert_eq!(paint, Paint::Unsupported);
        assert!(!paint.is_visible());
    }

    #[test]
    fn test_paint_opacity_multiplies_alpha() {
        let paint: Paint = serde_json::from_str(
            r#"{"type":"SOLID","color":{"r":1,"g":0,"b":0,"a":1},"opacity":0.5}"#,
        )
        .unwrap();
        assert_eq!(paint.solid_rgba8(), Some(Rgba8::new(255, 0, 0, 128)));
    }

    #[test]
    fn test_gradient_approximation_uses_first_stop() {
        let paint: Paint = serde_json::from_str(
            r#"{"type":"GRADIENT_LINEAR",
                "gradientHandlePositions":[{"x":0,"y":0},{"x":1,"y":1}],
                "gradientStops":[{"position":0,"color":{"r":0,"g":0,"b":1,"a":1}},
                                 {"position":1,"color":{"r":1,"g":1,"b":1,"a":1}}]}"#,
        )
        .unwrap();
        assert_eq!(paint.approximate_rgba8(), Some(Rgba8::new(0, 0, 255, 255)));
    }

    #[test]
    fn test_rgba8_peniko_roundtrip() {
        let color = Rgba8::new(10, 20, 30, 40);
        let peniko: Color = color.into();
        assert_eq!(Rgba8::from(peniko), color);
    }
}
