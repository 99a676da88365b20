//! Scene-graph renderer: turns a node tree into a paint tree.
//!
//! Rendering is synchronous and pure with respect to its inputs. The only
//! side effect is recording resource requests (and diagnostics) on the
//! [`RenderContext`] for references that are not resolved yet.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use kurbo::{Point, Rect, Size, Vec2};
use thiserror::Error;

use figview_core::node::{Effect, Node, NodeId, NodeKind, Paint, Rgba8};
use figview_core::resources::{
    FontKey, FontLoadState, FontSnapshot, FontStates, ImageAsset, ImageKey, ImageMap,
};

use crate::paint::{ClipRegion, EffectLayer, FillLayer, PaintKind, PaintNode, StrokeLayer, TextRun};

/// Family used while a requested font is unavailable.
pub const DEFAULT_FALLBACK_FAMILY: &str = "sans-serif";

/// Side length of the marker drawn in place of a failed subtree.
pub const ERROR_MARKER_SIZE: f64 = 24.0;

/// Neutral colour for unresolved images on nodes without a solid fill.
pub const DEFAULT_PLACEHOLDER_COLOR: Rgba8 = Rgba8::new(229, 229, 229, 255);

/// Which siblings a mask node clips.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MaskScope {
    /// Only the sibling immediately after the mask.
    #[default]
    NextSibling,
    /// Every following sibling until the next mask.
    FollowingSiblings,
}

#[derive(Debug, Clone)]
pub struct RenderOptions {
    pub fallback_family: String,
    pub placeholder_color: Rgba8,
    pub mask_scope: MaskScope,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            fallback_family: DEFAULT_FALLBACK_FAMILY.to_string(),
            placeholder_color: DEFAULT_PLACEHOLDER_COLOR,
            mask_scope: MaskScope::default(),
        }
    }
}

impl RenderOptions {
    pub fn with_fallback_family(mut self, family: impl Into<String>) -> Self {
        self.fallback_family = family.into();
        self
    }

    pub fn with_placeholder_color(mut self, color: Rgba8) -> Self {
        self.placeholder_color = color;
        self
    }

    pub fn with_mask_scope(mut self, scope: MaskScope) -> Self {
        self.mask_scope = scope;
        self
    }
}

/// A resource the renderer needed but did not have.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceRequest {
    Image(ImageKey),
    Font(FontKey),
}

/// Structural failure of one subtree.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    #[error("Node '{id}' of type {type_name} has no bounding box")]
    MissingBoundingBox { id: NodeId, type_name: String },
}

pub type RenderResult<T> = Result<T, RenderError>;

/// Non-fatal findings of a render pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderDiagnostic {
    UnsupportedNodeType { id: NodeId, type_name: String },
    /// A visible paint the renderer cannot draw in that slot, e.g. an image stroke.
    UnsupportedPaint { id: NodeId, paint: String },
    /// An effect the backend can only approximate by leaving it out.
    UnsupportedEffect { id: NodeId, effect: String },
    SubtreeReplaced { id: NodeId, error: RenderError },
}

#[derive(Debug, Default)]
struct RequestLog {
    seen_images: HashSet<ImageKey>,
    images: Vec<ImageKey>,
    fonts: BTreeMap<String, BTreeSet<u16>>,
}

/// Inputs of one render pass.
pub struct RenderContext<'a> {
    images: HashMap<ImageKey, ImageAsset>,
    fonts: FontSnapshot,
    pub options: &'a RenderOptions,
    requests: RefCell<RequestLog>,
    diagnostics: RefCell<Vec<RenderDiagnostic>>,
}

impl<'a> RenderContext<'a> {
    /// Snapshot the shared resource state for a pass.
    pub fn new(images: &ImageMap, fonts: &FontStates, options: &'a RenderOptions) -> Self {
        Self {
            images: images.snapshot(),
            fonts: fonts.snapshot(),
            options,
            requests: RefCell::new(RequestLog::default()),
            diagnostics: RefCell::new(Vec::new()),
        }
    }

    pub fn has_image(&self, key: &ImageKey) -> bool {
        self.images.contains_key(key)
    }

    pub fn font_state(&self, family: &str, weight: u16) -> FontLoadState {
        self.fonts.state(family, weight)
    }

    fn request_image(&self, key: &ImageKey) {
        let mut log = self.requests.borrow_mut();
        if log.seen_images.insert(key.clone()) {
            log.images.push(key.clone());
        }
    }

    fn request_font(&self, family: &str, weight: u16) {
        self.requests
            .borrow_mut()
            .fonts
            .entry(family.to_string())
            .or_default()
            .insert(weight);
    }

    fn diagnose(&self, diagnostic: RenderDiagnostic) {
        self.diagnostics.borrow_mut().push(diagnostic);
    }

    /// Requests recorded so far: images in encounter order, then one per family.
    pub fn take_requests(&self) -> Vec<ResourceRequest> {
        let log = std::mem::take(&mut *self.requests.borrow_mut());
        log.images
            .into_iter()
            .map(ResourceRequest::Image)
            .chain(
                log.fonts
                    .into_iter()
                    .map(|(family, weights)| ResourceRequest::Font(FontKey::new(family, weights))),
            )
            .collect()
    }

    pub fn take_diagnostics(&self) -> Vec<RenderDiagnostic> {
        std::mem::take(&mut *self.diagnostics.borrow_mut())
    }
}

/// Render `node`, positioned relative to `ancestor_origin`.
///
/// Returns `None` for invisible nodes. Structural failures come back as an
/// error marker in place of the failing subtree.
pub fn render(node: &Node, ancestor_origin: Point, ctx: &RenderContext) -> Option<PaintNode> {
    render_subtree(node, ancestor_origin, 1.0, ctx)
}

fn render_subtree(
    node: &Node,
    ancestor_origin: Point,
    inherited_opacity: f64,
    ctx: &RenderContext,
) -> Option<PaintNode> {
    if !node.visible {
        return None;
    }
    match paint_node(node, ancestor_origin, inherited_opacity, ctx) {
        Ok(painted) => Some(painted),
        Err(error) => {
            log::warn!("Replacing subtree with error marker: {}", error);
            ctx.diagnose(RenderDiagnostic::SubtreeReplaced {
                id: node.id.clone(),
                error: error.clone(),
            });
            Some(error_marker(node, inherited_opacity, &error))
        }
    }
}

fn paint_node(
    node: &Node,
    ancestor_origin: Point,
    inherited_opacity: f64,
    ctx: &RenderContext,
) -> RenderResult<PaintNode> {
    let bounds = node.bounds();
    if bounds.is_none() && node.kind.requires_bounds() {
        return Err(RenderError::MissingBoundingBox {
            id: node.id.clone(),
            type_name: node.kind.as_str().to_string(),
        });
    }

    let (offset, size, origin) = match bounds {
        Some(bounds) => (bounds.origin() - ancestor_origin, bounds.size(), bounds.origin()),
        None => (Vec2::ZERO, Size::ZERO, ancestor_origin),
    };

    let mut painted = PaintNode::new(node.id.clone(), paint_kind(node, ctx));
    painted.name = node.name.clone();
    painted.offset = offset;
    painted.size = size;
    painted.opacity = node.opacity.clamp(0.0, 1.0) * inherited_opacity;
    painted.corner_radii = node.corner_radii();
    painted.fills = paint_fills(node, ctx);
    painted.strokes = paint_strokes(node, ctx);
    painted.effects = paint_effects(node, ctx);
    painted.clips_content = node.clips_content && node.kind.behaves_as_frame();
    painted.children = paint_children(node, origin, painted.opacity, ctx);
    painted.text = paint_text(node, ctx);
    Ok(painted)
}

fn paint_kind(node: &Node, ctx: &RenderContext) -> PaintKind {
    match &node.kind {
        kind if kind.behaves_as_frame() => PaintKind::Frame,
        kind if kind.behaves_as_vector() => PaintKind::Vector,
        NodeKind::Document | NodeKind::Canvas | NodeKind::Page | NodeKind::Group => {
            PaintKind::Group
        }
        NodeKind::Rectangle => PaintKind::Rectangle,
        NodeKind::Ellipse => PaintKind::Ellipse,
        NodeKind::Text => PaintKind::Text,
        other => {
            log::debug!("Unsupported node type {} on '{}'", other.as_str(), node.id);
            ctx.diagnose(RenderDiagnostic::UnsupportedNodeType {
                id: node.id.clone(),
                type_name: other.as_str().to_string(),
            });
            PaintKind::Container
        }
    }
}

fn error_marker(node: &Node, inherited_opacity: f64, error: &RenderError) -> PaintNode {
    let mut marker = PaintNode::new(
        node.id.clone(),
        PaintKind::ErrorMarker {
            message: error.to_string(),
        },
    );
    marker.name = node.name.clone();
    marker.size = Size::new(ERROR_MARKER_SIZE, ERROR_MARKER_SIZE);
    marker.opacity = inherited_opacity;
    marker
}

/// Fill layers of `node`. Text nodes use their fills as the text colour.
pub(crate) fn paint_fills(node: &Node, ctx: &RenderContext) -> Vec<FillLayer> {
    if node.kind == NodeKind::Text {
        return Vec::new();
    }

    let fallback = node
        .fills
        .iter()
        .filter(|paint| paint.is_visible())
        .find_map(Paint::solid_rgba8)
        .unwrap_or(ctx.options.placeholder_color);
    let size = node.bounds().map(|b| b.size()).unwrap_or(Size::ZERO);

    let mut layers = Vec::new();
    for paint in node.fills.iter().filter(|paint| paint.is_visible()) {
        match paint {
            Paint::Solid { .. } => layers.extend(paint.solid_rgba8().map(FillLayer::Solid)),
            Paint::GradientLinear {
                handles,
                stops,
                opacity,
                ..
            } => {
                if stops.is_empty() {
                    continue;
                }
                match (handles.first(), handles.get(1)) {
                    (Some(start), Some(end)) => layers.push(FillLayer::LinearGradient {
                        start: Point::new(start.x * size.width, start.y * size.height),
                        end: Point::new(end.x * size.width, end.y * size.height),
                        stops: stops
                            .iter()
                            .map(|stop| (stop.position as f32, stop.color.to_rgba8(*opacity)))
                            .collect(),
                    }),
                    _ => layers.extend(paint.approximate_rgba8().map(FillLayer::Solid)),
                }
            }
            Paint::Image {
                scale_mode,
                opacity,
                ..
            } => {
                let Some(key) = node.image_key(paint) else {
                    continue;
                };
                if ctx.has_image(&key) {
                    layers.push(FillLayer::Image {
                        key,
                        scale_mode: *scale_mode,
                        opacity: *opacity,
                        fallback,
                    });
                } else {
                    ctx.request_image(&key);
                    layers.push(FillLayer::Placeholder {
                        key,
                        color: fallback,
                    });
                }
            }
            Paint::Unsupported => {}
        }
    }
    layers
}

fn paint_strokes(node: &Node, ctx: &RenderContext) -> Vec<StrokeLayer> {
    let weight = node.effective_stroke_weight();
    if node.kind == NodeKind::Text || weight <= 0.0 {
        return Vec::new();
    }
    let mut layers = Vec::new();
    for paint in node.strokes.iter().filter(|paint| paint.is_visible()) {
        if matches!(paint, Paint::Image { .. }) {
            log::debug!("Image stroke on '{}' is not drawn", node.id);
            ctx.diagnose(RenderDiagnostic::UnsupportedPaint {
                id: node.id.clone(),
                paint: "IMAGE stroke".to_string(),
            });
            continue;
        }
        layers.extend(paint.approximate_rgba8().map(|color| StrokeLayer {
            color,
            weight,
            align: node.stroke_align,
        }));
    }
    layers
}

fn paint_effects(node: &Node, ctx: &RenderContext) -> Vec<EffectLayer> {
    let effects: Vec<EffectLayer> = node
        .effects
        .iter()
        .filter(|effect| effect.is_visible())
        .filter_map(|effect| match effect {
            Effect::DropShadow(shadow) => Some(EffectLayer::DropShadow {
                color: shadow.color.to_rgba8(1.0),
                offset: Vec2::new(shadow.offset.x, shadow.offset.y),
                radius: shadow.radius,
                spread: shadow.spread,
            }),
            Effect::InnerShadow(shadow) => Some(EffectLayer::InnerShadow {
                color: shadow.color.to_rgba8(1.0),
                offset: Vec2::new(shadow.offset.x, shadow.offset.y),
                radius: shadow.radius,
                spread: shadow.spread,
            }),
            Effect::LayerBlur(blur) => Some(EffectLayer::LayerBlur {
                radius: blur.radius,
            }),
            Effect::BackgroundBlur(blur) => Some(EffectLayer::BackgroundBlur {
                radius: blur.radius,
            }),
            Effect::Unsupported => None,
        })
        .collect();
    // The backdrop is not available to a single-pass scene.
    if effects
        .iter()
        .any(|effect| matches!(effect, EffectLayer::BackgroundBlur { .. }))
    {
        ctx.diagnose(RenderDiagnostic::UnsupportedEffect {
            id: node.id.clone(),
            effect: "BACKGROUND_BLUR".to_string(),
        });
    }
    effects
}

fn paint_children(
    node: &Node,
    origin: Point,
    opacity: f64,
    ctx: &RenderContext,
) -> Vec<PaintNode> {
    let mut children = Vec::with_capacity(node.children.len());
    let mut mask: Option<ClipRegion> = None;

    for child in &node.children {
        if child.is_mask {
            if child.visible {
                mask = clip_region(child, origin);
            }
            continue;
        }

        if let Some(mut painted) = render_subtree(child, origin, opacity, ctx) {
            painted.clip = mask.clone();
            children.push(painted);
        }

        if ctx.options.mask_scope == MaskScope::NextSibling {
            mask = None;
        }
    }
    children
}

fn clip_region(mask: &Node, origin: Point) -> Option<ClipRegion> {
    let Some(bounds) = mask.bounds() else {
        log::warn!("Mask '{}' has no bounding box and is ignored", mask.id);
        return None;
    };
    Some(ClipRegion {
        mask_id: mask.id.clone(),
        rect: Rect::from_origin_size((bounds.origin() - origin).to_point(), bounds.size()),
        radii: mask.corner_radii(),
        mask_type: mask.mask_type,
        ellipse: mask.kind == NodeKind::Ellipse,
    })
}

/// Text run of a TEXT node, in the requested family once it is loaded.
pub(crate) fn paint_text(node: &Node, ctx: &RenderContext) -> Option<TextRun> {
    if node.kind != NodeKind::Text {
        return None;
    }

    let style = node.text_style();
    let weight = style.weight_class();
    let requested = style
        .font_family
        .clone()
        .filter(|family| !family.trim().is_empty());

    let family = match &requested {
        Some(requested) => match ctx.font_state(requested, weight) {
            FontLoadState::Loaded => Some(requested.clone()),
            FontLoadState::NotRequested => {
                ctx.request_font(requested, weight);
                None
            }
            FontLoadState::Loading | FontLoadState::Error(_) => None,
        },
        None => None,
    };
    let uses_fallback = family.is_none();

    let color = node
        .fills
        .iter()
        .filter(|paint| paint.is_visible())
        .find_map(Paint::approximate_rgba8)
        .unwrap_or(Rgba8::black());

    Some(TextRun {
        characters: style
            .text_case
            .apply(node.characters.as_deref().unwrap_or_default()),
        family: family.unwrap_or_else(|| ctx.options.fallback_family.clone()),
        requested_family: requested,
        uses_fallback,
        font_size: style.font_size,
        font_weight: weight,
        italic: style.italic,
        line_height: style.line_height(),
        letter_spacing: style.letter_spacing,
        align_horizontal: style.text_align_horizontal,
        align_vertical: style.text_align_vertical,
        decoration: style.text_decoration,
        color,
    })
}
