//! Effect descriptors (shadows and blurs).

use serde::{Deserialize, Serialize};

use super::default_visible;
use super::paint::{RgbaColor, Vector2};

/// Drop or inner shadow parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Shadow {
    pub color: RgbaColor,
    #[serde(default)]
    pub offset: Vector2,
    #[serde(default)]
    pub radius: f64,
    #[serde(default)]
    pub spread: f64,
    #[serde(default = "default_visible")]
    pub visible: bool,
}

/// Layer or background blur parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Blur {
    #[serde(default)]
    pub radius: f64,
    #[serde(default = "default_visible")]
    pub visible: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Effect {
    DropShadow(Shadow),
    InnerShadow(Shadow),
    LayerBlur(Blur),
    BackgroundBlur(Blur),
    #[serde(other)]
    Unsupported,
}

impl Effect {
    pub fn is_visible(&self) -> bool {
        match self {
            Effect::DropShadow(s) | Effect::InnerShadow(s) => s.visible,
            Effect::LayerBlur(b) | Effect::BackgroundBlur(b) => b.visible,
            Effect::Unsupported => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drop_shadow_parses() {
        let effect: Effect = serde_json::from_str(
            r#"{"type":"DROP_SHADOW","color":{"r":0,"g":0,"b":0,"a":0.25},
                "offset":{"x":0,"y":4},"radius":8,"visible":true}"#,
        )
        .unwrap();
        match effect {
            Effect::DropShadow(shadow) => {
                assert!((shadow.offset.y - 4.0).abs() < f64::EPSILON);
                assert!((shadow.radius - 8.0).abs() < f64::EPSILON);
                assert!(shadow.spread.abs() < f64::EPSILON);
            }
            other => panic!("unexpected effect {other:?}"),
        }
    }

    #[test]
    fn test_hidden_blur_is_not_visible() {
        let effect: Effect =
            serde_json::from_str(r#"{"type":"LAYER_BLUR","radius":4,"visible":false}"#).unwrap();
        assert!(!effect.is_visible());
    }

    #[test]
    fn test_unknown_effect_degrades() {
        let effect: Effect = serde_json::from_str(r#"{"type":"NOISE","radius":4}"#).unwrap();
        assert_eq!(effect, Effect::Unsupported);
    }
}
