//! Typed model of an exported design document.
//!
//! Foreign payloads enter through serde (`Node::from_json`) and come out as a
//! closed set of variants. Anything the model does not know about degrades to
//! an explicit `Unknown`/`Unsupported` variant instead of failing the parse.

pub mod effect;
pub mod paint;
pub mod text;

pub use effect::{Blur, Effect, Shadow};
pub use paint::{ColorStop, Paint, Rgba8, RgbaColor, ScaleMode, Vector2};
pub use text::{
    LineHeightUnit, TextAlignHorizontal, TextAlignVertical, TextCase, TextDecoration, TextStyle,
};

use std::collections::{BTreeMap, BTreeSet, HashSet};

use kurbo::{Point, Rect, Size};
use serde::{Deserialize, Serialize};

use crate::resources::{FontKey, ImageKey};

/// Stable node identifier as exported (e.g. `"0:1"`).
pub type NodeId = String;

pub(crate) fn default_opacity() -> f64 {
    1.0
}

pub(crate) fn default_visible() -> bool {
    true
}

/// Node type. Unrecognised type strings are kept verbatim in `Unknown`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NodeKind {
    Document,
    Canvas,
    Page,
    Frame,
    Group,
    Section,
    Component,
    ComponentSet,
    Instance,
    Rectangle,
    Ellipse,
    Vector,
    Line,
    Star,
    RegularPolygon,
    BooleanOperation,
    Text,
    Unknown(String),
}

impl NodeKind {
    pub fn as_str(&self) -> &str {
        match self {
            NodeKind::Document => "DOCUMENT",
            NodeKind::Canvas => "CANVAS",
            NodeKind::Page => "PAGE",
            NodeKind::Frame => "FRAME",
            NodeKind::Group => "GROUP",
            NodeKind::Section => "SECTION",
            NodeKind::Component => "COMPONENT",
            NodeKind::ComponentSet => "COMPONENT_SET",
            NodeKind::Instance => "INSTANCE",
            NodeKind::Rectangle => "RECTANGLE",
            NodeKind::Ellipse => "ELLIPSE",
            NodeKind::Vector => "VECTOR",
            NodeKind::Line => "LINE",
            NodeKind::Star => "STAR",
            NodeKind::RegularPolygon => "REGULAR_POLYGON",
            NodeKind::BooleanOperation => "BOOLEAN_OPERATION",
            NodeKind::Text => "TEXT",
            NodeKind::Unknown(raw) => raw,
        }
    }

    /// Types the locator accepts as a render root.
    pub fn is_root_candidate(&self) -> bool {
        matches!(self, NodeKind::Page | NodeKind::Canvas | NodeKind::Frame)
    }

    /// Frame-like containers (may clip their content).
    pub fn behaves_as_frame(&self) -> bool {
        matches!(
            self,
            NodeKind::Frame
                | NodeKind::Section
                | NodeKind::Component
                | NodeKind::ComponentSet
                | NodeKind::Instance
        )
    }

    /// Vector-like shapes, painted as their bounding geometry.
    pub fn behaves_as_vector(&self) -> bool {
        matches!(
            self,
            NodeKind::Vector
                | NodeKind::Line
                | NodeKind::Star
                | NodeKind::RegularPolygon
                | NodeKind::BooleanOperation
        )
    }

    /// Whether a node of this type cannot be positioned without a bounding box.
    pub fn requires_bounds(&self) -> bool {
        !matches!(
            self,
            NodeKind::Document
                | NodeKind::Canvas
                | NodeKind::Page
                | NodeKind::Group
                | NodeKind::Unknown(_)
        )
    }
}

impl From<String> for NodeKind {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "DOCUMENT" => NodeKind::Document,
            "CANVAS" => NodeKind::Canvas,
            "PAGE" => NodeKind::Page,
            "FRAME" => NodeKind::Frame,
            "GROUP" => NodeKind::Group,
            "SECTION" => NodeKind::Section,
            "COMPONENT" => NodeKind::Component,
            "COMPONENT_SET" => NodeKind::ComponentSet,
            "INSTANCE" => NodeKind::Instance,
            "RECTANGLE" => NodeKind::Rectangle,
            "ELLIPSE" => NodeKind::Ellipse,
            "VECTOR" => NodeKind::Vector,
            "LINE" => NodeKind::Line,
            "STAR" => NodeKind::Star,
            "REGULAR_POLYGON" => NodeKind::RegularPolygon,
            "BOOLEAN_OPERATION" => NodeKind::BooleanOperation,
            "TEXT" => NodeKind::Text,
            _ => NodeKind::Unknown(raw),
        }
    }
}

impl From<NodeKind> for String {
    fn from(kind: NodeKind) -> Self {
        match kind {
            NodeKind::Unknown(raw) => raw,
            other => other.as_str().to_string(),
        }
    }
}

/// Absolute box in document space.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(alias = "w", default)]
    pub width: f64,
    #[serde(alias = "h", default)]
    pub height: f64,
}

impl BoundingBox {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn origin(&self) -> Point {
        Point::new(self.x, self.y)
    }

    pub fn size(&self) -> Size {
        Size::new(self.width.max(0.0), self.height.max(0.0))
    }

    pub fn rect(&self) -> Rect {
        Rect::from_origin_size(self.origin(), self.size())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StrokeAlign {
    Inside,
    Outside,
    #[default]
    Center,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MaskType {
    #[default]
    Alpha,
    Vector,
    Luminance,
    #[serde(other)]
    Unknown,
}

/// One element of the design document tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: NodeId,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub absolute_bounding_box: Option<BoundingBox>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounding_box: Option<BoundingBox>,
    #[serde(default)]
    pub children: Vec<Node>,
    #[serde(default)]
    pub fills: Vec<Paint>,
    #[serde(default)]
    pub strokes: Vec<Paint>,
    #[serde(default)]
    pub stroke_weight: Option<f64>,
    #[serde(default)]
    pub stroke_align: StrokeAlign,
    #[serde(default)]
    pub corner_radius: f64,
    #[serde(default)]
    pub rectangle_corner_radii: Option<[f64; 4]>,
    #[serde(default = "default_opacity")]
    pub opacity: f64,
    #[serde(default = "default_visible")]
    pub visible: bool,
    #[serde(default)]
    pub is_mask: bool,
    #[serde(default)]
    pub mask_type: MaskType,
    #[serde(default)]
    pub clips_content: bool,
    #[serde(default)]
    pub effects: Vec<Effect>,
    #[serde(default)]
    pub characters: Option<String>,
    #[serde(default)]
    pub style: Option<TextStyle>,
}

impl Node {
    /// Create a bare node with default styling.
    pub fn new(id: impl Into<NodeId>, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            kind,
            absolute_bounding_box: None,
            bounding_box: None,
            children: Vec::new(),
            fills: Vec::new(),
            strokes: Vec::new(),
            stroke_weight: None,
            stroke_align: StrokeAlign::default(),
            corner_radius: 0.0,
            rectangle_corner_radii: None,
            opacity: 1.0,
            visible: true,
            is_mask: false,
            mask_type: MaskType::default(),
            clips_content: false,
            effects: Vec::new(),
            characters: None,
            style: None,
        }
    }

    /// Parse a node tree from an already-decoded JSON value.
    pub fn from_json(value: &serde_json::Value) -> Result<Self, serde_json::Error> {
        Node::deserialize(value)
    }

    pub fn with_bounds(mut self, bounds: BoundingBox) -> Self {
        self.absolute_bounding_box = Some(bounds);
        self
    }

    pub fn with_child(mut self, child: Node) -> Self {
        self.children.push(child);
        self
    }

    pub fn with_fill(mut self, paint: Paint) -> Self {
        self.fills.push(paint);
        self
    }

    /// Absolute box, preferring `absoluteBoundingBox` over `boundingBox`.
    pub fn bounds(&self) -> Option<BoundingBox> {
        self.absolute_bounding_box.or(self.bounding_box)
    }

    /// Per-corner radii, top-left clockwise.
    pub fn corner_radii(&self) -> [f64; 4] {
        self.rectangle_corner_radii
            .unwrap_or([self.corner_radius; 4])
    }

    pub fn effective_stroke_weight(&self) -> f64 {
        self.stroke_weight.unwrap_or(1.0)
    }

    /// Pre-order traversal of this subtree.
    pub fn walk<F: FnMut(&Node)>(&self, visitor: &mut F) {
        visitor(self);
        for child in &self.children {
            child.walk(visitor);
        }
    }

    /// Pre-order traversal that skips invisible subtrees.
    pub fn walk_visible<F: FnMut(&Node)>(&self, visitor: &mut F) {
        if !self.visible {
            return;
        }
        visitor(self);
        for child in &self.children {
            child.walk_visible(visitor);
        }
    }

    /// Image key of an IMAGE paint on this node.
    ///
    /// Paints without an `imageRef` get a synthesized per-node key.
    pub fn image_key(&self, paint: &Paint) -> Option<ImageKey> {
        match paint {
            Paint::Image { image_ref, .. } => Some(match image_ref {
                Some(reference) if !reference.is_empty() => ImageKey::new(reference.clone()),
                _ => ImageKey::for_node(&self.id),
            }),
            _ => None,
        }
    }

    /// Distinct image keys of visible image fills, in first-encounter order.
    pub fn image_refs(&self) -> Vec<ImageKey> {
        let mut seen = HashSet::new();
        let mut keys = Vec::new();
        self.walk_visible(&mut |node| {
            for paint in node.fills.iter().filter(|p| p.is_visible()) {
                if let Some(key) = node.image_key(paint) {
                    if seen.insert(key.clone()) {
                        keys.push(key);
                    }
                }
            }
        });
        keys
    }

    /// Distinct font families of visible TEXT nodes with the weights they use.
    pub fn font_requests(&self) -> Vec<FontKey> {
        let mut families: BTreeMap<String, BTreeSet<u16>> = BTreeMap::new();
        self.walk_visible(&mut |node| {
            if node.kind != NodeKind::Text {
                return;
            }
            let Some(style) = &node.style else {
                return;
            };
            match style.font_family.as_deref() {
                Some(family) if !family.trim().is_empty() => {
                    families
                        .entry(family.to_string())
                        .or_default()
                        .insert(style.weight_class());
                }
                _ => {}
            }
        });
        families
            .into_iter()
            .map(|(family, weights)| FontKey::new(family, weights))
            .collect()
    }

    pub fn find_by_id(&self, id: &str) -> Option<&Node> {
        if self.id == id {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find_by_id(id))
    }

    /// Text style, or defaults for text nodes exported without one.
    pub fn text_style(&self) -> TextStyle {
        self.style.clone().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Node {
        Node::from_json(&json!({
            "id": "0:1",
            "type": "FRAME",
            "name": "Root",
            "boundingBox": {"x": 0, "y": 0, "w": 400, "h": 300},
            "children": [
                {"id": "0:2", "type": "RECTANGLE",
                 "absoluteBoundingBox": {"x": 20, "y": 20, "width": 100, "height": 60},
                 "fills": [{"type": "IMAGE", "imageRef": "hero"}]},
                {"id": "0:3", "type": "RECTANGLE",
                 "absoluteBoundingBox": {"x": 20, "y": 100, "width": 100, "height": 60},
                 "fills": [{"type": "IMAGE", "imageRef": "hero"}, {"type": "IMAGE"}]},
                {"id": "0:4", "type": "TEXT", "characters": "Hi",
                 "absoluteBoundingBox": {"x": 0, "y": 0, "width": 10, "height": 10},
                 "style": {"fontFamily": "Inter", "fontWeight": 700}},
                {"id": "0:5", "type": "TEXT", "characters": "Hi",
                 "absoluteBoundingBox": {"x": 0, "y": 0, "width": 10, "height": 10},
                 "style": {"fontFamily": "Inter", "fontWeight": 400}},
                {"id": "0:6", "type": "GROUP", "visible": false, "children": [
                    {"id": "0:7", "type": "RECTANGLE",
                     "absoluteBoundingBox": {"x": 0, "y": 0, "width": 1, "height": 1},
                     "fills": [{"type": "IMAGE", "imageRef": "hidden"}]}
                ]}
            ]
        }))
        .unwrap()
    }

    #[test]
    fn test_parse_bounding_box_aliases() {
        let root = sample();
        let bounds = root.bounds().unwrap();
        assert!((bounds.width - 400.0).abs() < f64::EPSILON);
        assert!((bounds.height - 300.0).abs() < f64::EPSILON);
        assert_eq!(root.children.len(), 5);
    }

    #[test]
    fn test_absolute_box_preferred() {
        let node = Node::from_json(&json!({
            "id": "1", "type": "RECTANGLE",
            "absoluteBoundingBox": {"x": 5, "y": 5, "width": 1, "height": 1},
            "boundingBox": {"x": 9, "y": 9, "width": 1, "height": 1}
        }))
        .unwrap();
        assert!((node.bounds().unwrap().x - 5.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_unknown_type_is_preserved() {
        let node = Node::from_json(&json!({"id": "1", "type": "WASHI_TAPE"})).unwrap();
        assert_eq!(node.kind, NodeKind::Unknown("WASHI_TAPE".to_string()));
        assert_eq!(node.kind.as_str(), "WASHI_TAPE");
        assert!(!node.kind.requires_bounds());
    }

    #[test]
    fn test_defaults() {
        let node = Node::from_json(&json!({"id": "1", "type": "RECTANGLE"})).unwrap();
        assert!(node.visible);
        assert!((node.opacity - 1.0).abs() < f64::EPSILON);
        assert_eq!(node.stroke_align, StrokeAlign::Center);
        assert_eq!(node.mask_type, MaskType::Alpha);
        assert!((node.effective_stroke_weight() - 1.0).abs() < f64::EPSILON);
        assert_eq!(node.corner_radii(), [0.0; 4]);
    }

    #[test]
    fn test_image_refs_distinct_and_ordered() {
        let keys = sample().image_refs();
        assert_eq!(
            keys,
            vec![ImageKey::new("hero"), ImageKey::for_node("0:3")]
        );
    }

    #[test]
    fn test_font_requests_merge_weights() {
        let fonts = sample().font_requests();
        assert_eq!(fonts.len(), 1);
        assert_eq!(fonts[0].family, "Inter");
        assert_eq!(fonts[0].weights, vec![400, 700]);
    }

    #[test]
    fn test_walk_is_preorder() {
        let mut ids = Vec::new();
        sample().walk(&mut |node| ids.push(node.id.clone()));
        assert_eq!(ids, vec!["0:1", "0:2", "0:3", "0:4", "0:5", "0:6", "0:7"]);
    }

    #[test]
    fn test_find_by_id() {
        let root = sample();
        assert_eq!(root.find_by_id("0:7").map(|n| n.kind.clone()), Some(NodeKind::Rectangle));
        assert!(root.find_by_id("9:9").is_none());
    }

    #[test]
    fn test_kind_roundtrips_through_string() {
        let kind = NodeKind::from("COMPONENT_SET".to_string());
        assert!(kind.behaves_as_frame());
        assert_eq!(String::from(kind), "COMPONENT_SET");
        assert!(NodeKind::Star.behaves_as_vector());
    }
}
