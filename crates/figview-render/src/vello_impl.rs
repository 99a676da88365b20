//! Vello-based renderer implementation.

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;

use figview_core::node::{
    Rgba8, ScaleMode, StrokeAlign, TextAlignHorizontal, TextAlignVertical, TextDecoration,
};
use figview_core::resolve::FontFormat;
use figview_core::resources::{FontStates, ImageKey, ImageMap};
use kurbo::{
    Affine, BezPath, Ellipse, Line, Point, Rect, RoundedRect, Shape as KurboShape, Stroke, Vec2,
};
use parley::layout::PositionedLayoutItem;
use parley::{FontContext, LayoutContext, StyleProperty};
use peniko::color::DynamicColor;
use peniko::{BlendMode, Brush, Color, Fill};
use vello::Scene;

use crate::paint::{EffectLayer, FillLayer, PaintKind, PaintNode, StrokeLayer, TextRun};
use crate::renderer::{Renderer, RendererError, RendererResult, SceneContext};

const PATH_TOLERANCE: f64 = 0.1;

/// Upper bound on tiles drawn for one TILE image fill.
const MAX_TILES: u32 = 4096;

/// Rings stacked to soften a blurred inner shadow.
const INNER_SHADOW_STEPS: u32 = 4;

/// Vello-based renderer for GPU-accelerated 2D graphics.
pub struct VelloRenderer {
    scene: Scene,
    font_cx: FontContext,
    layout_cx: LayoutContext<Brush>,
    /// Faces of the shared font table already registered with `font_cx`.
    registered_faces: usize,
    /// Decoded images, keyed by image key.
    image_cache: HashMap<ImageKey, peniko::ImageData>,
    show_error_markers: bool,
}

impl Default for VelloRenderer {
    fn default() -> Self {
        Self::new()
    }
}

/// Outline of a node box.
fn box_path(rect: Rect, radii: [f64; 4], ellipse: bool) -> BezPath {
    if ellipse {
        Ellipse::from_rect(rect).to_path(PATH_TOLERANCE)
    } else {
        let [top_left, top_right, bottom_right, bottom_left] = radii;
        RoundedRect::new(
            rect.x0,
            rect.y0,
            rect.x1,
            rect.y1,
            (top_left, top_right, bottom_right, bottom_left),
        )
        .to_path(PATH_TOLERANCE)
    }
}

/// Grow (positive) or shrink (negative) a box and its radii by `amount`.
fn outset(rect: Rect, radii: [f64; 4], amount: f64) -> (Rect, [f64; 4]) {
    let rect = rect.inset(amount);
    let rect = Rect::new(
        rect.x0.min(rect.x1),
        rect.y0.min(rect.y1),
        rect.x0.max(rect.x1),
        rect.y0.max(rect.y1),
    );
    (rect, radii.map(|r| (r + amount).max(0.0)))
}

fn color(rgba: Rgba8, opacity: f64) -> Color {
    rgba.with_opacity(opacity).into()
}

/// Corner radius handed to the blurred-rect primitive for a box.
fn blur_corner(rect: Rect, radii: [f64; 4], ellipse: bool) -> f64 {
    if ellipse {
        rect.width().min(rect.height()) / 2.0
    } else {
        radii[0]
    }
}

/// Radius of the first visible layer blur, if any.
fn layer_blur(effects: &[EffectLayer]) -> Option<f64> {
    effects.iter().find_map(|effect| match effect {
        EffectLayer::LayerBlur { radius } if *radius > 0.0 => Some(*radius),
        _ => None,
    })
}

/// Frames of an inner shadow: everything around the box minus a hole that
/// shrinks by `spread` plus a slice of the blur radius per step.
fn inner_shadow_rings(
    rect: Rect,
    radii: [f64; 4],
    ellipse: bool,
    offset: Vec2,
    radius: f64,
    spread: f64,
) -> Vec<BezPath> {
    let steps = if radius > 0.0 { INNER_SHADOW_STEPS } else { 1 };
    let reach = radius + spread.abs() + offset.hypot() + 1.0;
    let outer = rect.inflate(reach, reach);
    (0..steps)
        .map(|step| {
            let depth = spread + radius * f64::from(step) / f64::from(steps);
            let (hole, hole_radii) = outset(rect, radii, -depth);
            let mut ring = outer.to_path(PATH_TOLERANCE);
            ring.extend(box_path(hole + offset, hole_radii, ellipse).iter());
            ring
        })
        .collect()
}

impl VelloRenderer {
    /// Create a new Vello renderer.
    pub fn new() -> Self {
        Self {
            scene: Scene::new(),
            font_cx: FontContext::new(),
            layout_cx: LayoutContext::new(),
            registered_faces: 0,
            image_cache: HashMap::new(),
            show_error_markers: true,
        }
    }

    /// Get the built scene for rendering.
    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    /// Take ownership of the scene (resets internal scene).
    pub fn take_scene(&mut self) -> Scene {
        std::mem::take(&mut self.scene)
    }

    /// Register an extra font, e.g. a bundled fallback family.
    pub fn register_font(&mut self, data: Vec<u8>) {
        self.font_cx
            .collection
            .register_fonts(vello::peniko::Blob::new(Arc::new(data)), None);
    }

    /// Register faces the font resolver added since the last frame.
    ///
    /// Only sfnt containers are handed to the font collection; WOFF faces
    /// stay in the table but are skipped here.
    pub fn register_loaded_fonts(&mut self, fonts: &FontStates) -> usize {
        let faces = fonts.faces();
        let mut registered = 0;
        for face in faces.iter().skip(self.registered_faces) {
            match FontFormat::from_magic_bytes(&face.data) {
                Some(format) if format.is_sfnt() => {
                    self.font_cx
                        .collection
                        .register_fonts(vello::peniko::Blob::new(Arc::new(face.data.clone())), None);
                    registered += 1;
                }
                other => {
                    log::debug!("Skipping {:?} face for '{}'", other, face.family);
                }
            }
        }
        self.registered_faces = faces.len();
        registered
    }

    /// Decode (once) the image stored under `key`.
    pub fn decoded_image(
        &mut self,
        key: &ImageKey,
        images: &ImageMap,
    ) -> RendererResult<peniko::ImageData> {
        if let Some(cached) = self.image_cache.get(key) {
            return Ok(cached.clone());
        }

        let asset = images
            .get(key)
            .ok_or_else(|| RendererError::ImageMissing { key: key.clone() })?;
        let decoded = ::image::load_from_memory(&asset.bytes).map_err(|err| {
            RendererError::ImageDecode {
                key: key.clone(),
                reason: err.to_string(),
            }
        })?;
        let rgba = decoded.to_rgba8();
        let (width, height) = rgba.dimensions();
        let image_data = peniko::ImageData {
            data: peniko::Blob::new(Arc::new(rgba.into_vec())),
            format: peniko::ImageFormat::Rgba8,
            width,
            height,
            alpha_type: peniko::ImageAlphaType::Alpha,
        };
        self.image_cache.insert(key.clone(), image_data.clone());
        Ok(image_data)
    }

    /// Encode `node` and its subtree; `parent` maps the parent's space to the surface.
    fn render_node(&mut self, node: &PaintNode, parent: Affine, images: &ImageMap) {
        let clipped = match &node.clip {
            Some(clip) => {
                let shape = box_path(clip.rect, clip.radii, clip.ellipse);
                self.scene
                    .push_layer(BlendMode::default(), 1.0, parent, &shape);
                true
            }
            None => false,
        };

        let transform = parent * Affine::translate(node.offset);
        if let PaintKind::ErrorMarker { message } = &node.kind {
            if self.show_error_markers {
                log::trace!("Error marker for '{}': {}", node.id, message);
                self.render_error_marker(node, transform);
            }
        } else {
            self.render_box(node, transform, images);
        }

        if clipped {
            self.scene.pop_layer();
        }
    }

    fn render_box(&mut self, node: &PaintNode, transform: Affine, images: &ImageMap) {
        let ellipse = node.kind == PaintKind::Ellipse;
        let rect = node.own_rect();
        let shape = box_path(rect, node.corner_radii, ellipse);

        for effect in &node.effects {
            if let EffectLayer::DropShadow {
                color: shadow,
                offset,
                radius,
                spread,
            } = effect
            {
                let (shadow_rect, radii) = outset(rect, node.corner_radii, *spread);
                self.scene.draw_blurred_rounded_rect(
                    transform * Affine::translate(*offset),
                    shadow_rect,
                    color(*shadow, node.opacity),
                    blur_corner(shadow_rect, radii, ellipse),
                    radius / 2.0,
                );
            }
        }

        let blur = layer_blur(&node.effects);
        for fill in &node.fills {
            self.render_fill(fill, node, &shape, transform, images, blur);
        }

        for effect in &node.effects {
            match effect {
                EffectLayer::InnerShadow {
                    color: shadow,
                    offset,
                    radius,
                    spread,
                } => {
                    let rings =
                        inner_shadow_rings(rect, node.corner_radii, ellipse, *offset, *radius, *spread);
                    let alpha = node.opacity / rings.len() as f64;
                    self.scene
                        .push_layer(BlendMode::default(), 1.0, transform, &shape);
                    for ring in &rings {
                        self.scene
                            .fill(Fill::EvenOdd, transform, color(*shadow, alpha), None, ring);
                    }
                    self.scene.pop_layer();
                }
                EffectLayer::BackgroundBlur { radius } => {
                    log::trace!("Background blur {} on '{}' left out", radius, node.id);
                }
                EffectLayer::DropShadow { .. } | EffectLayer::LayerBlur { .. } => {}
            }
        }

        for stroke in &node.strokes {
            self.render_stroke(stroke, node, ellipse, transform);
        }

        if node.clips_content {
            self.scene
                .push_layer(BlendMode::default(), 1.0, transform, &shape);
        }
        for child in &node.children {
            self.render_node(child, transform, images);
        }
        if node.clips_content {
            self.scene.pop_layer();
        }

        if let Some(text) = &node.text {
            self.render_text(text, node, transform);
        }
    }

    fn render_fill(
        &mut self,
        fill: &FillLayer,
        node: &PaintNode,
        shape: &BezPath,
        transform: Affine,
        images: &ImageMap,
        blur: Option<f64>,
    ) {
        match fill {
            FillLayer::Solid(rgba) | FillLayer::Placeholder { color: rgba, .. } => {
                self.render_solid(*rgba, node, shape, transform, blur);
            }
            FillLayer::LinearGradient { start, end, stops } => {
                let mut gradient = peniko::Gradient::new_linear(*start, *end);
                for (offset, rgba) in stops {
                    gradient.stops.push(peniko::ColorStop {
                        color: DynamicColor::from_alpha_color(color(*rgba, node.opacity)),
                        offset: *offset,
                    });
                }
                self.scene
                    .fill(Fill::NonZero, transform, &gradient, None, shape);
            }
            FillLayer::Image {
                key,
                scale_mode,
                opacity,
                fallback,
            } => match self.decoded_image(key, images) {
                Ok(image_data) => {
                    let alpha = (opacity * node.opacity) as f32;
                    self.scene
                        .push_layer(BlendMode::default(), alpha, transform, shape);
                    self.render_image(image_data, *scale_mode, node.own_rect(), transform);
                    self.scene.pop_layer();
                }
                Err(err) => {
                    log::warn!("{}", err);
                    self.render_solid(*fallback, node, shape, transform, blur);
                }
            },
        }
    }

    /// Flat fill of the node box; a layer blur softens it into a blurred rect.
    fn render_solid(
        &mut self,
        rgba: Rgba8,
        node: &PaintNode,
        shape: &BezPath,
        transform: Affine,
        blur: Option<f64>,
    ) {
        let fill_color = color(rgba, node.opacity);
        match blur {
            Some(radius) => {
                let rect = node.own_rect();
                let ellipse = node.kind == PaintKind::Ellipse;
                self.scene.draw_blurred_rounded_rect(
                    transform,
                    rect,
                    fill_color,
                    blur_corner(rect, node.corner_radii, ellipse),
                    radius / 2.0,
                );
            }
            None => self
                .scene
                .fill(Fill::NonZero, transform, fill_color, None, shape),
        }
    }

    /// Draw an image into `bounds` according to its scale mode. Clipping is
    /// the caller's job.
    fn render_image(
        &mut self,
        image_data: peniko::ImageData,
        scale_mode: ScaleMode,
        bounds: Rect,
        transform: Affine,
    ) {
        let (width, height) = (image_data.width as f64, image_data.height as f64);
        if width <= 0.0 || height <= 0.0 {
            return;
        }
        let scale_x = bounds.width() / width;
        let scale_y = bounds.height() / height;

        match scale_mode {
            ScaleMode::Stretch => {
                let image_transform = transform
                    * Affine::translate((bounds.x0, bounds.y0))
                    * Affine::scale_non_uniform(scale_x, scale_y);
                self.scene.draw_image(&image_data.clone().into(), image_transform);
            }
            ScaleMode::Tile => {
                let columns = (bounds.width() / width).ceil().max(1.0) as u32;
                let rows = (bounds.height() / height).ceil().max(1.0) as u32;
                if columns.saturating_mul(rows) > MAX_TILES {
                    log::debug!("Tiling {}x{} capped", columns, rows);
                }
                let mut drawn = 0;
                'rows: for row in 0..rows {
                    for column in 0..columns {
                        if drawn >= MAX_TILES {
                            break 'rows;
                        }
                        let origin = (
                            bounds.x0 + column as f64 * width,
                            bounds.y0 + row as f64 * height,
                        );
                        self.scene.draw_image(
                            &image_data.clone().into(),
                            transform * Affine::translate(origin),
                        );
                        drawn += 1;
                    }
                }
            }
            ScaleMode::Fit | ScaleMode::Fill | ScaleMode::Crop | ScaleMode::Unknown => {
                let scale = if scale_mode == ScaleMode::Fit {
                    scale_x.min(scale_y)
                } else {
                    scale_x.max(scale_y)
                };
                let dx = bounds.x0 + (bounds.width() - width * scale) / 2.0;
                let dy = bounds.y0 + (bounds.height() - height * scale) / 2.0;
                let image_transform =
                    transform * Affine::translate((dx, dy)) * Affine::scale(scale);
                self.scene.draw_image(&image_data.clone().into(), image_transform);
            }
        }
    }

    fn render_stroke(
        &mut self,
        stroke: &StrokeLayer,
        node: &PaintNode,
        ellipse: bool,
        transform: Affine,
    ) {
        let half = stroke.weight / 2.0;
        let amount = match stroke.align {
            StrokeAlign::Inside => -half,
            StrokeAlign::Outside => half,
            StrokeAlign::Center | StrokeAlign::Unknown => 0.0,
        };
        let (rect, radii) = outset(node.own_rect(), node.corner_radii, amount);
        let path = box_path(rect, radii, ellipse);
        self.scene.stroke(
            &Stroke::new(stroke.weight),
            transform,
            color(stroke.color, node.opacity),
            None,
            &path,
        );
    }

    /// Lay out a text run inside the node box with parley.
    fn render_text(&mut self, text: &TextRun, node: &PaintNode, transform: Affine) {
        if text.characters.is_empty() {
            return;
        }

        let brush = Brush::Solid(color(text.color, node.opacity));
        let stack = if text.uses_fallback {
            text.family.clone()
        } else {
            format!("\"{}\", sans-serif", text.family)
        };

        let mut builder =
            self.layout_cx
                .ranged_builder(&mut self.font_cx, &text.characters, 1.0, false);
        builder.push_default(StyleProperty::FontSize(text.font_size as f32));
        builder.push_default(StyleProperty::Brush(brush.clone()));
        builder.push_default(StyleProperty::FontWeight(parley::FontWeight::new(
            text.font_weight as f32,
        )));
        builder.push_default(StyleProperty::FontStack(parley::FontStack::Source(
            Cow::Owned(stack),
        )));
        builder.push_default(StyleProperty::LineHeight(parley::LineHeight::Absolute(
            text.line_height as f32,
        )));
        builder.push_default(StyleProperty::LetterSpacing(text.letter_spacing as f32));
        if text.italic {
            builder.push_default(StyleProperty::FontStyle(parley::FontStyle::Italic));
        }
        let mut layout = builder.build(&text.characters);

        let max_width = (node.size.width > 0.0).then_some(node.size.width as f32);
        let alignment = match text.align_horizontal {
            TextAlignHorizontal::Center => parley::Alignment::Center,
            TextAlignHorizontal::Right => parley::Alignment::End,
            TextAlignHorizontal::Justified => parley::Alignment::Justify,
            TextAlignHorizontal::Left | TextAlignHorizontal::Unknown => parley::Alignment::Start,
        };
        layout.break_all_lines(max_width);
        layout.align(max_width, alignment, parley::AlignmentOptions::default());

        // Geometry is the node box: only the glyphs move inside it.
        let slack = node.size.height - layout.height() as f64;
        let dy = match text.align_vertical {
            TextAlignVertical::Center => slack / 2.0,
            TextAlignVertical::Bottom => slack,
            TextAlignVertical::Top | TextAlignVertical::Unknown => 0.0,
        };
        let text_transform = transform * Affine::translate((0.0, dy));

        for line in layout.lines() {
            for item in line.items() {
                let PositionedLayoutItem::GlyphRun(glyph_run) = item else {
                    continue;
                };
                let mut x = glyph_run.offset();
                let y = glyph_run.baseline();
                let run = glyph_run.run();
                let font = run.font();
                let font_size = run.font_size();
                let synthesis = run.synthesis();
                let glyph_xform = synthesis
                    .skew()
                    .map(|angle| Affine::skew(angle.to_radians().tan() as f64, 0.0));

                let glyphs: Vec<vello::Glyph> = glyph_run
                    .glyphs()
                    .map(|glyph| {
                        let gx = x + glyph.x;
                        let gy = y - glyph.y;
                        x += glyph.advance;
                        vello::Glyph {
                            id: glyph.id,
                            x: gx,
                            y: gy,
                        }
                    })
                    .collect();

                if !glyphs.is_empty() {
                    self.scene
                        .draw_glyphs(font)
                        .brush(&brush)
                        .hint(true)
                        .transform(text_transform)
                        .glyph_transform(glyph_xform)
                        .font_size(font_size)
                        .normalized_coords(run.normalized_coords())
                        .draw(Fill::NonZero, glyphs.into_iter());
                }

                let decoration_y = match text.decoration {
                    TextDecoration::Underline => Some(y + font_size * 0.1),
                    TextDecoration::Strikethrough => Some(y - font_size * 0.3),
                    TextDecoration::None | TextDecoration::Unknown => None,
                };
                if let Some(line_y) = decoration_y {
                    let start = glyph_run.offset() as f64;
                    let line = Line::new(
                        Point::new(start, line_y as f64),
                        Point::new(start + glyph_run.advance() as f64, line_y as f64),
                    );
                    self.scene.stroke(
                        &Stroke::new((text.font_size / 14.0).max(1.0)),
                        text_transform,
                        &brush,
                        None,
                        &line,
                    );
                }
            }
        }
    }

    /// Red crossed box standing in for a subtree that failed to render.
    fn render_error_marker(&mut self, node: &PaintNode, transform: Affine) {
        let rect = node.own_rect();
        let marker = Color::from_rgba8(220, 38, 38, 255);
        self.scene.fill(
            Fill::NonZero,
            transform,
            marker.with_alpha(0.15 * node.opacity as f32),
            None,
            &rect,
        );
        let stroke = Stroke::new(1.5);
        let mut cross = BezPath::new();
        cross.move_to(Point::new(rect.x0, rect.y0));
        cross.line_to(Point::new(rect.x1, rect.y1));
        cross.move_to(Point::new(rect.x1, rect.y0));
        cross.line_to(Point::new(rect.x0, rect.y1));
        let stroke_color = marker.with_alpha(node.opacity as f32);
        self.scene
            .stroke(&stroke, transform, stroke_color, None, &cross);
        self.scene
            .stroke(&stroke, transform, stroke_color, None, &rect);
    }
}

impl Renderer for VelloRenderer {
    fn build_scene(&mut self, ctx: &SceneContext) {
        self.scene.reset();
        self.show_error_markers = ctx.show_error_markers;
        self.register_loaded_fonts(ctx.fonts);

        let transform = Affine::scale(ctx.scale_factor) * ctx.viewport.transform();
        self.render_node(ctx.tree, transform, ctx.images);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paint::PaintKind;
    use figview_core::node::Rgba8;
    use figview_core::resources::{FontFace, ImageAsset};
    use figview_core::viewport::Viewport;
    use kurbo::Size;

    const TTF_HEADER: &[u8] = &[0x00, 0x01, 0x00, 0x00, 0, 0, 0, 0];
    const WOFF2_HEADER: &[u8] = b"wOF2\0\0\0\0";

    fn png_bytes() -> Vec<u8> {
        let image = ::image::RgbaImage::from_pixel(2, 2, ::image::Rgba([255, 0, 0, 255]));
        let mut bytes = std::io::Cursor::new(Vec::new());
        image
            .write_to(&mut bytes, ::image::ImageFormat::Png)
            .unwrap();
        bytes.into_inner()
    }

    fn tree() -> PaintNode {
        let mut root = PaintNode::new("0:1", PaintKind::Frame);
        root.size = Size::new(400.0, 300.0);
        root.fills.push(FillLayer::Solid(Rgba8::new(255, 255, 255, 255)));
        root.clips_content = true;
        let mut rect = PaintNode::new("0:2", PaintKind::Rectangle);
        rect.offset = Vec2::new(20.0, 20.0);
        rect.size = Size::new(100.0, 60.0);
        rect.fills.push(FillLayer::Solid(Rgba8::new(51, 153, 255, 255)));
        rect.strokes.push(StrokeLayer {
            color: Rgba8::black(),
            weight: 2.0,
            align: StrokeAlign::Inside,
        });
        root.children.push(rect);
        root
    }

    #[test]
    fn test_renderer_creation() {
        let renderer = VelloRenderer::new();
        assert!(renderer.scene().encoding().is_empty());
    }

    #[test]
    fn test_build_scene_with_nodes() {
        let mut renderer = VelloRenderer::new();
        let tree = tree();
        let viewport = Viewport::new();
        let images = ImageMap::new();
        let fonts = FontStates::new();
        let ctx = SceneContext::new(&tree, &viewport, &images, &fonts, Size::new(800.0, 600.0));
        renderer.build_scene(&ctx);
        assert!(!renderer.scene().encoding().is_empty());
    }

    #[test]
    fn test_image_decoded_once() {
        let mut renderer = VelloRenderer::new();
        let images = ImageMap::new();
        let key = ImageKey::new("hero");
        images.insert(key.clone(), ImageAsset::new(png_bytes(), Some("image/png".into())));

        let first = renderer.decoded_image(&key, &images).unwrap();
        assert_eq!((first.width, first.height), (2, 2));
        assert_eq!(renderer.image_cache.len(), 1);
        renderer.decoded_image(&key, &images).unwrap();
        assert_eq!(renderer.image_cache.len(), 1);
    }

    #[test]
    fn test_undecodable_image_is_error() {
        let mut renderer = VelloRenderer::new();
        let images = ImageMap::new();
        let key = ImageKey::new("broken");
        images.insert(key.clone(), ImageAsset::new(vec![1, 2, 3], None));
        assert!(matches!(
            renderer.decoded_image(&key, &images),
            Err(RendererError::ImageDecode { .. })
        ));
        assert!(matches!(
            renderer.decoded_image(&ImageKey::new("absent"), &images),
            Err(RendererError::ImageMissing { .. })
        ));
    }

    #[test]
    fn test_only_new_sfnt_faces_registered() {
        let mut renderer = VelloRenderer::new();
        let fonts = FontStates::new();
        fonts.add_face(FontFace {
            family: "Brand Sans".into(),
            data: TTF_HEADER.into(),
        });
        fonts.add_face(FontFace {
            family: "Brand Sans".into(),
            data: WOFF2_HEADER.into(),
        });
        assert_eq!(renderer.register_loaded_fonts(&fonts), 1);
        assert_eq!(renderer.register_loaded_fonts(&fonts), 0);
    }

    #[test]
    fn test_outset_clamps_radii() {
        let (rect, radii) = outset(Rect::new(0.0, 0.0, 10.0, 10.0), [2.0; 4], -3.0);
        assert!((rect.x0 - 3.0).abs() < f64::EPSILON);
        assert!((rect.x1 - 7.0).abs() < f64::EPSILON);
        assert_eq!(radii, [0.0; 4]);
    }

    #[test]
    fn test_error_marker_hidden_when_disabled() {
        let mut marker = PaintNode::new(
            "x",
            PaintKind::ErrorMarker {
                message: "missing box".into(),
            },
        );
        marker.size = Size::new(24.0, 24.0);
        let viewport = Viewport::new();
        let images = ImageMap::new();
        let fonts = FontStates::new();

        let mut renderer = VelloRenderer::new();
        let ctx = SceneContext::new(&marker, &viewport, &images, &fonts, Size::new(100.0, 100.0))
            .with_error_markers(false);
        renderer.build_scene(&ctx);
        assert!(renderer.scene().encoding().is_empty());
    }

    fn scene_for(node: &PaintNode, images: &ImageMap) -> VelloRenderer {
        let viewport = Viewport::new();
        let fonts = FontStates::new();
        let mut renderer = VelloRenderer::new();
        let ctx = SceneContext::new(node, &viewport, images, &fonts, Size::new(100.0, 100.0));
        renderer.build_scene(&ctx);
        renderer
    }

    #[test]
    fn test_inner_shadow_is_drawn() {
        let mut node = PaintNode::new("s", PaintKind::Rectangle);
        node.size = Size::new(40.0, 20.0);
        assert!(scene_for(&node, &ImageMap::new()).scene().encoding().is_empty());

        node.effects.push(EffectLayer::InnerShadow {
            color: Rgba8::new(0, 0, 0, 64),
            offset: Vec2::new(0.0, 2.0),
            radius: 4.0,
            spread: 0.0,
        });
        assert!(!scene_for(&node, &ImageMap::new()).scene().encoding().is_empty());
    }

    #[test]
    fn test_inner_shadow_rings_shrink_with_blur() {
        let rect = Rect::new(0.0, 0.0, 40.0, 20.0);
        let sharp = inner_shadow_rings(rect, [0.0; 4], false, Vec2::ZERO, 0.0, 1.0);
        assert_eq!(sharp.len(), 1);
        let soft = inner_shadow_rings(rect, [0.0; 4], false, Vec2::new(0.0, 2.0), 4.0, 0.0);
        assert_eq!(soft.len(), INNER_SHADOW_STEPS as usize);
        let first = soft[0].bounding_box();
        assert!(first.contains(Point::new(-1.0, -1.0)));
        assert!(first.contains(Point::new(41.0, 21.0)));
    }

    #[test]
    fn test_layer_blur_softens_solid_fills() {
        let mut node = PaintNode::new("b", PaintKind::Rectangle);
        node.size = Size::new(10.0, 10.0);
        node.fills.push(FillLayer::Solid(Rgba8::new(0, 0, 255, 255)));
        node.effects.push(EffectLayer::LayerBlur { radius: 6.0 });
        assert_eq!(layer_blur(&node.effects), Some(6.0));
        assert_eq!(layer_blur(&[EffectLayer::LayerBlur { radius: 0.0 }]), None);
        assert!(!scene_for(&node, &ImageMap::new()).scene().encoding().is_empty());
    }

    #[test]
    fn test_undecodable_image_paints_node_fallback() {
        let images = ImageMap::new();
        images.insert(ImageKey::new("broken"), ImageAsset::new(vec![1, 2, 3], None));
        let mut node = PaintNode::new("i", PaintKind::Rectangle);
        node.size = Size::new(10.0, 10.0);
        node.fills.push(FillLayer::Image {
            key: ImageKey::new("broken"),
            scale_mode: ScaleMode::Fill,
            opacity: 1.0,
            fallback: Rgba8::new(255, 0, 0, 255),
        });
        let renderer = scene_for(&node, &images);
        assert!(!renderer.scene().encoding().is_empty());
        assert!(renderer.image_cache.is_empty());
    }
}
