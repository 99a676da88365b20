//! figview render library
//!
//! Turns a design document tree into a paint tree, keeps it current as
//! images and fonts resolve, and encodes it for drawing. The default backend
//! uses Vello for GPU-accelerated rendering.

pub mod paint;
mod renderer;
pub mod scene_graph;
pub mod session;
pub mod viewer;

#[cfg(feature = "vello-renderer")]
mod vello_impl;

pub use paint::{ClipRegion, EffectLayer, FillLayer, PaintKind, PaintNode, StrokeLayer, TextRun};
pub use renderer::{Renderer, RendererError, RendererResult, SceneContext};
pub use scene_graph::{
    MaskScope, RenderContext, RenderDiagnostic, RenderError, RenderOptions, RenderResult,
    ResourceRequest, render,
};
pub use session::RenderSession;
pub use viewer::{Viewer, ViewerConfig};

#[cfg(feature = "vello-renderer")]
pub use vello_impl::VelloRenderer;
