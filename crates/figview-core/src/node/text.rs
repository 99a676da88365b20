//! Typographic style of text nodes.

use serde::{Deserialize, Serialize};

/// Default font size when the export omits one.
pub const DEFAULT_FONT_SIZE: f64 = 12.0;

/// Default font weight (regular).
pub const DEFAULT_FONT_WEIGHT: u16 = 400;

/// Line height multiplier used when the export gives none.
pub const DEFAULT_LINE_HEIGHT_FACTOR: f64 = 1.2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TextAlignHorizontal {
    #[default]
    Left,
    Center,
    Right,
    Justified,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TextAlignVertical {
    #[default]
    Top,
    Center,
    Bottom,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LineHeightUnit {
    #[serde(rename = "PIXELS")]
    Pixels,
    #[serde(rename = "FONT_SIZE_%")]
    FontSizePercent,
    #[serde(rename = "INTRINSIC_%")]
    IntrinsicPercent,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TextCase {
    #[default]
    Original,
    Upper,
    Lower,
    Title,
    #[serde(other)]
    Unknown,
}

impl TextCase {
    /// Apply this case transform to `text`.
    pub fn apply(self, text: &str) -> String {
        match self {
            TextCase::Upper => text.to_uppercase(),
            TextCase::Lower => text.to_lowercase(),
            TextCase::Title => {
                let mut out = String::with_capacity(text.len());
                let mut at_word_start = true;
                for ch in text.chars() {
                    if at_word_start && ch.is_alphabetic() {
                        out.extend(ch.to_uppercase());
                    } else {
                        out.push(ch);
                    }
                    at_word_start = ch.is_whitespace();
                }
                out
            }
            TextCase::Original | TextCase::Unknown => text.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TextDecoration {
    #[default]
    None,
    Underline,
    Strikethrough,
    #[serde(other)]
    Unknown,
}

/// Text style attributes of a TEXT node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextStyle {
    #[serde(default)]
    pub font_family: Option<String>,
    #[serde(default = "default_font_size")]
    pub font_size: f64,
    #[serde(default = "default_font_weight")]
    pub font_weight: f64,
    #[serde(default)]
    pub italic: bool,
    #[serde(default)]
    pub text_align_horizontal: TextAlignHorizontal,
    #[serde(default)]
    pub text_align_vertical: TextAlignVertical,
    #[serde(default)]
    pub line_height_px: Option<f64>,
    #[serde(default)]
    pub line_height_percent_font_size: Option<f64>,
    #[serde(default)]
    pub line_height_unit: Option<LineHeightUnit>,
    #[serde(default)]
    pub letter_spacing: f64,
    #[serde(default)]
    pub text_case: TextCase,
    #[serde(default)]
    pub text_decoration: TextDecoration,
}

fn default_font_size() -> f64 {
    DEFAULT_FONT_SIZE
}

fn default_font_weight() -> f64 {
    DEFAULT_FONT_WEIGHT as f64
}

impl Default for TextStyle {
    fn default() -> Self {
        Self {
            font_family: None,
            font_size: DEFAULT_FONT_SIZE,
            font_weight: DEFAULT_FONT_WEIGHT as f64,
            italic: false,
            text_align_horizontal: TextAlignHorizontal::default(),
            text_align_vertical: TextAlignVertical::default(),
            line_height_px: None,
            line_height_percent_font_size: None,
            line_height_unit: None,
            letter_spacing: 0.0,
            text_case: TextCase::default(),
            text_decoration: TextDecoration::default(),
        }
    }
}

impl TextStyle {
    /// Font weight as a CSS weight class (100..=900).
    pub fn weight_class(&self) -> u16 {
        (self.font_weight.round() as i64).clamp(1, 1000) as u16
    }

    /// Resolved line height in pixels.
    pub fn line_height(&self) -> f64 {
        let from_percent = self
            .line_height_percent_font_size
            .map(|percent| self.font_size * percent / 100.0);
        match self.line_height_unit {
            Some(LineHeightUnit::FontSizePercent) if from_percent.is_some() => {
                from_percent.unwrap_or_default()
            }
            _ => self
                .line_height_px
                .or(from_percent)
                .unwrap_or(self.font_size * DEFAULT_LINE_HEIGHT_FACTOR),
        }
    }
}
