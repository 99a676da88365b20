//! Paint tree: positioned, styled output of the scene-graph renderer.
//!
//! A `PaintNode` paints, in order: fills, strokes, effects, children, then
//! its text run. Geometry is relative to the parent paint node.

use kurbo::{Point, Rect, RoundedRect, RoundedRectRadii, Size, Vec2};

use figview_core::node::{
    MaskType, NodeId, Rgba8, ScaleMode, StrokeAlign, TextAlignHorizontal, TextAlignVertical,
    TextDecoration,
};
use figview_core::resources::ImageKey;

/// What kind of element a paint node draws.
#[derive(Debug, Clone, PartialEq)]
pub enum PaintKind {
    Frame,
    Group,
    Rectangle,
    Ellipse,
    /// Vector-like shapes, painted as their bounding geometry.
    Vector,
    Text,
    /// Empty positioned container for node types the renderer does not know.
    Container,
    /// Stands in for a subtree that could not be rendered.
    ErrorMarker { message: String },
}

/// One fill layer.
#[derive(Debug, Clone, PartialEq)]
pub enum FillLayer {
    Solid(Rgba8),
    /// Endpoints are in node-local coordinates.
    LinearGradient {
        start: Point,
        end: Point,
        stops: Vec<(f32, Rgba8)>,
    },
    /// A resolved image. `fallback` is painted if the bytes do not decode.
    Image {
        key: ImageKey,
        scale_mode: ScaleMode,
        opacity: f64,
        fallback: Rgba8,
    },
    /// An image that is not resolved (yet); painted as a flat colour.
    Placeholder { key: ImageKey, color: Rgba8 },
}

impl FillLayer {
    pub fn image_key(&self) -> Option<&ImageKey> {
        match self {
            FillLayer::Image { key, .. } | FillLayer::Placeholder { key, .. } => Some(key),
            _ => None,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self, FillLayer::Placeholder { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StrokeLayer {
    pub color: Rgba8,
    pub weight: f64,
    pub align: StrokeAlign,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EffectLayer {
    DropShadow {
        color: Rgba8,
        offset: Vec2,
        radius: f64,
        spread: f64,
    },
    InnerShadow {
        color: Rgba8,
        offset: Vec2,
        radius: f64,
        spread: f64,
    },
    LayerBlur { radius: f64 },
    BackgroundBlur { radius: f64 },
}

/// Clip applied to a node by a preceding mask sibling.
///
/// `rect` is in the same space as the clipped node's `offset`.
#[derive(Debug, Clone, PartialEq)]
pub struct ClipRegion {
    pub mask_id: NodeId,
    pub rect: Rect,
    pub radii: [f64; 4],
    pub mask_type: MaskType,
    pub ellipse: bool,
}

impl ClipRegion {
    pub fn rounded_rect(&self) -> RoundedRect {
        rounded(self.rect, self.radii)
    }
}

/// Laid-out text content of a TEXT node.
#[derive(Debug, Clone, PartialEq)]
pub struct TextRun {
    /// Characters after the text case transform.
    pub characters: String,
    /// Family the document asks for.
    pub requested_family: Option<String>,
    /// Family actually used for layout.
    pub family: String,
    pub uses_fallback: bool,
    pub font_size: f64,
    pub font_weight: u16,
    pub italic: bool,
    pub line_height: f64,
    pub letter_spacing: f64,
    pub align_horizontal: TextAlignHorizontal,
    pub align_vertical: TextAlignVertical,
    pub decoration: TextDecoration,
    pub color: Rgba8,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PaintNode {
    pub id: NodeId,
    pub name: String,
    pub kind: PaintKind,
    /// Offset from the parent paint node's origin.
    pub offset: Vec2,
    pub size: Size,
    /// Own opacity multiplied by every ancestor's.
    pub opacity: f64,
    /// Top-left clockwise.
    pub corner_radii: [f64; 4],
    pub fills: Vec<FillLayer>,
    pub strokes: Vec<StrokeLayer>,
    pub effects: Vec<EffectLayer>,
    pub clip: Option<ClipRegion>,
    /// Children are clipped to this node's box.
    pub clips_content: bool,
    pub children: Vec<PaintNode>,
    pub text: Option<TextRun>,
}

impl PaintNode {
    pub fn new(id: impl Into<NodeId>, kind: PaintKind) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            kind,
            offset: Vec2::ZERO,
            size: Size::ZERO,
            opacity: 1.0,
            corner_radii: [0.0; 4],
            fills: Vec::new(),
            strokes: Vec::new(),
            effects: Vec::new(),
            clip: None,
            clips_content: false,
            children: Vec::new(),
            text: None,
        }
    }

    /// Box in the parent's coordinate space.
    pub fn local_rect(&self) -> Rect {
        Rect::from_origin_size(self.offset.to_point(), self.size)
    }

    /// Box in this node's own coordinate space.
    pub fn own_rect(&self) -> Rect {
        Rect::from_origin_size(Point::ZERO, self.size)
    }

    pub fn rounded_rect(&self) -> RoundedRect {
        rounded(self.own_rect(), self.corner_radii)
    }

    pub fn is_error_marker(&self) -> bool {
        matches!(self.kind, PaintKind::ErrorMarker { .. })
    }

    /// Pre-order traversal.
    pub fn walk<F: FnMut(&PaintNode)>(&self, visitor: &mut F) {
        visitor(self);
        for child in &self.children {
            child.walk(visitor);
        }
    }

    pub fn find(&self, id: &str) -> Option<&PaintNode> {
        if self.id == id {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(id))
    }

    /// Follow a path of child indices.
    pub fn at_path_mut(&mut self, path: &[usize]) -> Option<&mut PaintNode> {
        match path.split_first() {
            None => Some(self),
            Some((index, rest)) => self.children.get_mut(*index)?.at_path_mut(rest),
        }
    }

    /// Absolute origin of node `id`, given this node's own absolute origin.
    pub fn absolute_origin_of(&self, id: &str, origin: Point) -> Option<Point> {
        let here = origin + self.offset;
        if self.id == id {
            return Some(here);
        }
        self.children
            .iter()
            .find_map(|child| child.absolute_origin_of(id, here))
    }

    pub fn count(&self) -> usize {
        1 + self.children.iter().map(PaintNode::count).sum::<usize>()
    }
}

fn rounded(rect: Rect, radii: [f64; 4]) -> RoundedRect {
    let [top_left, top_right, bottom_right, bottom_left] = radii;
    RoundedRect::from_rect(
        rect,
        RoundedRectRadii::new(top_left, top_right, bottom_right, bottom_left),
    )
}
