//! Renderer trait abstraction.

use kurbo::Size;
use peniko::Color;
use thiserror::Error;

use figview_core::resources::{FontStates, ImageKey, ImageMap};
use figview_core::viewport::Viewport;

use crate::paint::PaintNode;

/// Renderer errors.
#[derive(Debug, Error)]
pub enum RendererError {
    #[error("Image '{key}' could not be decoded: {reason}")]
    ImageDecode { key: ImageKey, reason: String },
    #[error("Image '{key}' is not in the image map")]
    ImageMissing { key: ImageKey },
}

/// Result type for backend operations.
pub type RendererResult<T> = Result<T, RendererError>;

/// Context for a single frame.
pub struct SceneContext<'a> {
    /// Paint tree to encode. Its root sits at the world origin.
    pub tree: &'a PaintNode,
    pub viewport: &'a Viewport,
    /// Image bytes, decoded and cached by the backend.
    pub images: &'a ImageMap,
    /// Faces loaded so far, registered with the backend's font collection.
    pub fonts: &'a FontStates,
    /// Viewport size in physical pixels.
    pub viewport_size: Size,
    /// Device pixel ratio (for HiDPI).
    pub scale_factor: f64,
    pub background_color: Color,
    /// Draw the red markers that stand in for failed subtrees.
    pub show_error_markers: bool,
}

impl<'a> SceneContext<'a> {
    pub fn new(
        tree: &'a PaintNode,
        viewport: &'a Viewport,
        images: &'a ImageMap,
        fonts: &'a FontStates,
        viewport_size: Size,
    ) -> Self {
        Self {
            tree,
            viewport,
            images,
            fonts,
            viewport_size,
            scale_factor: 1.0,
            background_color: Color::from_rgba8(245, 245, 245, 255),
            show_error_markers: true,
        }
    }

    /// Set the scale factor for HiDPI.
    pub fn with_scale_factor(mut self, scale_factor: f64) -> Self {
        self.scale_factor = scale_factor;
        self
    }

    pub fn with_background(mut self, color: Color) -> Self {
        self.background_color = color;
        self
    }

    pub fn with_error_markers(mut self, show: bool) -> Self {
        self.show_error_markers = show;
        self
    }
}

/// Trait for rendering backends.
pub trait Renderer: Send + Sync {
    /// Build the command buffer for a frame.
    fn build_scene(&mut self, ctx: &SceneContext);

    /// Get the background color (for clearing).
    fn background_color(&self, ctx: &SceneContext) -> Color {
        ctx.background_color
    }
}
