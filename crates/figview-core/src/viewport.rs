//! Pan/zoom transform applied around the rendered paint tree.
//!
//! The viewport never touches scene data; backends pre-multiply its
//! transform when encoding.

use kurbo::{Affine, Point, Rect, Size, Vec2};
use serde::{Deserialize, Serialize};

pub const DEFAULT_MIN_ZOOM: f64 = 0.02;
pub const DEFAULT_MAX_ZOOM: f64 = 64.0;

/// Padding around the document when fitting it into view.
pub const DEFAULT_FIT_PADDING: f64 = 24.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    /// Screen-space translation.
    pub offset: Vec2,
    /// Scale factor; 1.0 is one document unit per screen pixel.
    pub zoom: f64,
    pub min_zoom: f64,
    pub max_zoom: f64,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            offset: Vec2::ZERO,
            zoom: 1.0,
            min_zoom: DEFAULT_MIN_ZOOM,
            max_zoom: DEFAULT_MAX_ZOOM,
        }
    }
}

impl Viewport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_zoom_limits(mut self, min_zoom: f64, max_zoom: f64) -> Self {
        self.min_zoom = min_zoom.min(max_zoom);
        self.max_zoom = max_zoom.max(min_zoom);
        self.zoom = self.zoom.clamp(self.min_zoom, self.max_zoom);
        self
    }

    /// Document → screen.
    pub fn transform(&self) -> Affine {
        Affine::translate(self.offset) * Affine::scale(self.zoom)
    }

    /// Screen → document.
    pub fn inverse_transform(&self) -> Affine {
        Affine::scale(1.0 / self.zoom) * Affine::translate(-self.offset)
    }

    pub fn screen_to_world(&self, screen_point: Point) -> Point {
        self.inverse_transform() * screen_point
    }

    pub fn world_to_screen(&self, world_point: Point) -> Point {
        self.transform() * world_point
    }

    /// The document-space rectangle visible in a screen of `screen` size.
    pub fn visible_world_rect(&self, screen: Size) -> Rect {
        let top_left = self.screen_to_world(Point::ZERO);
        let bottom_right = self.screen_to_world(Point::new(screen.width, screen.height));
        Rect::from_points(top_left, bottom_right)
    }

    /// Pan by a screen-space delta.
    pub fn pan(&mut self, delta: Vec2) {
        self.offset += delta;
    }

    /// Scale by `factor` around `screen_point`, which stays put on screen.
    pub fn zoom_at(&mut self, screen_point: Point, factor: f64) {
        let zoom = (self.zoom * factor).clamp(self.min_zoom, self.max_zoom);
        if (zoom - self.zoom).abs() < f64::EPSILON {
            return;
        }
        let anchor = self.screen_to_world(screen_point);
        self.zoom = zoom;
        self.offset += screen_point - self.world_to_screen(anchor);
    }

    pub fn reset(&mut self) {
        self.offset = Vec2::ZERO;
        self.zoom = 1.0_f64.clamp(self.min_zoom, self.max_zoom);
    }

    /// Centre `bounds` in a screen of `screen` size, scaled to fit inside `padding`.
    pub fn fit_to_bounds(&mut self, bounds: Rect, screen: Size, padding: f64) {
        if bounds.is_zero_area() {
            self.reset();
            return;
        }

        let available = Size::new(
            (screen.width - padding * 2.0).max(1.0),
            (screen.height - padding * 2.0).max(1.0),
        );
        let zoom = (available.width / bounds.width()).min(available.height / bounds.height());
        self.zoom = zoom.clamp(self.min_zoom, self.max_zoom);

        let screen_center = Point::new(screen.width / 2.0, screen.height / 2.0);
        self.offset = screen_center.to_vec2() - bounds.center().to_vec2() * self.zoom;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_identity() {
        let viewport = Viewport::new();
        let p = Point::new(100.0, 200.0);
        let world = viewport.screen_to_world(p);
        assert!((world.x - p.x).abs() < f64::EPSILON);
        assert!((world.y - p.y).abs() < f64::EPSILON);
    }

    #[test]
    fn test_offset_and_zoom() {
        let mut viewport = Viewport::new();
        viewport.offset = Vec2::new(50.0, 100.0);
        viewport.zoom = 2.0;
        let world = viewport.screen_to_world(Point::new(150.0, 300.0));
        assert!((world.x - 50.0).abs() < 1e-10);
        assert!((world.y - 100.0).abs() < 1e-10);
    }

    #[test]
    fn test_roundtrip() {
        let mut viewport = Viewport::new();
        viewport.offset = Vec2::new(30.0, -20.0);
        viewport.zoom = 1.5;
        let original = Point::new(123.0, 456.0);
        let back = viewport.world_to_screen(viewport.screen_to_world(original));
        assert!((back.x - original.x).abs() < 1e-10);
        assert!((back.y - original.y).abs() < 1e-10);
    }

    #[test]
    fn test_zoom_at_keeps_anchor_fixed() {
        let mut viewport = Viewport::new();
        let anchor = Point::new(200.0, 150.0);
        let before = viewport.screen_to_world(anchor);
        viewport.zoom_at(anchor, 2.5);
        let after = viewport.world_to_screen(before);
        assert!((viewport.zoom - 2.5).abs() < f64::EPSILON);
        assert!((after.x - anchor.x).abs() < 1e-9);
        assert!((after.y - anchor.y).abs() < 1e-9);
    }

    #[test]
    fn test_zoom_clamped() {
        let mut viewport = Viewport::new().with_zoom_limits(0.5, 4.0);
        viewport.zoom_at(Point::ZERO, 0.001);
        assert!((viewport.zoom - 0.5).abs() < f64::EPSILON);
        viewport.zoom_at(Point::ZERO, 1000.0);
        assert!((viewport.zoom - 4.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_fit_to_bounds_centres_document() {
        let mut viewport = Viewport::new();
        let bounds = Rect::new(0.0, 0.0, 400.0, 300.0);
        viewport.fit_to_bounds(bounds, Size::new(820.0, 620.0), 10.0);
        assert!((viewport.zoom - 2.0).abs() < 1e-10);
        let centre = viewport.world_to_screen(bounds.center());
        assert!((centre.x - 410.0).abs() < 1e-9);
        assert!((centre.y - 310.0).abs() < 1e-9);
    }

    #[test]
    fn test_fit_empty_bounds_resets() {
        let mut viewport = Viewport::new();
        viewport.pan(Vec2::new(10.0, 10.0));
        viewport.fit_to_bounds(Rect::ZERO, Size::new(100.0, 100.0), 0.0);
        assert_eq!(viewport.offset, Vec2::ZERO);
    }

    #[test]
    fn test_visible_world_rect() {
        let mut viewport = Viewport::new();
        viewport.zoom = 2.0;
        let rect = viewport.visible_world_rect(Size::new(200.0, 100.0));
        assert!((rect.width() - 100.0).abs() < 1e-10);
        assert!((rect.height() - 50.0).abs() < 1e-10);
    }
}
