//! Host-side painting capabilities and the per-frame geometry handed to overlays.

use crate::engine::RenderImage;
use crate::geometry::{bounds_to_device, device_to_document, Point, Rect, Rotation, Size};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba {
    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    pub const SELECTION: Rgba = Rgba::new(0x33, 0x66, 0xcc, 0x60);
    pub const LINK_OUTLINE: Rgba = Rgba::new(0x00, 0x80, 0xff, 0xc0);
    pub const FRAME_BORDER: Rgba = Rgba::new(0x40, 0x40, 0x40, 0xff);
    pub const HIGHLIGHT: Rgba = Rgba::new(0xff, 0xe0, 0x40, 0x80);
}

/// Union of rectangles, coalesced per line as they are added.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Region {
    rects: Vec<Rect>,
}

const LINE_EPSILON: f64 = 0.5;
const JOIN_GAP: f64 = 1.0;

impl Region {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, rect: Rect) {
        if rect.is_empty() {
            return;
        }
        if let Some(last) = self.rects.last_mut() {
            let same_line = (last.top - rect.top).abs() < LINE_EPSILON
                && (last.bottom - rect.bottom).abs() < LINE_EPSILON;
            let touching = rect.left <= last.right + JOIN_GAP && rect.right + JOIN_GAP >= last.left;
            if same_line && touching {
                *last = last.union(&rect);
                return;
            }
        }
        self.rects.push(rect);
    }

    pub fn clipped(&self, clip: &Rect) -> Region {
        Region {
            rects: self
                .rects
                .iter()
                .filter_map(|rect| rect.intersection(clip))
                .collect(),
        }
    }

    pub fn rects(&self) -> &[Rect] {
        &self.rects
    }

    pub fn is_empty(&self) -> bool {
        self.rects.is_empty()
    }
}

impl FromIterator<Rect> for Region {
    fn from_iter<T: IntoIterator<Item = Rect>>(iter: T) -> Self {
        let mut region = Region::new();
        for rect in iter {
            region.add(rect);
        }
        region
    }
}

/// Where a frame sits on screen for the current paint.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameGeometry {
    pub page: usize,
    /// Top-left corner in viewport coordinates.
    pub origin: Point,
    /// Device size with rotation applied.
    pub size: Size,
    /// Unrotated page size in points.
    pub page_size: Size,
    pub rotation: Rotation,
}

impl FrameGeometry {
    pub fn frame_rect(&self) -> Rect {
        Rect::from_origin_size(self.origin, self.size)
    }

    /// Page-local document rectangle to viewport coordinates.
    pub fn to_viewport(&self, bounds: Rect) -> Rect {
        bounds_to_device(self.rotation, self.size, self.page_size, bounds)
            .translate(self.origin.x, self.origin.y)
    }

    /// Frame-local device rectangle to viewport coordinates.
    pub fn device_to_viewport(&self, bounds: Rect) -> Rect {
        bounds.translate(self.origin.x, self.origin.y)
    }

    /// Viewport point to a page-local document point.
    pub fn to_document(&self, point: Point) -> Point {
        device_to_document(
            self.rotation,
            self.size,
            self.page_size,
            point.offset(-self.origin.x, -self.origin.y),
        )
    }
}

/// Drawing surface provided by the host. Coordinates are viewport pixels.
pub trait OverlayCanvas {
    fn draw_page(&mut self, bounds: Rect, image: &RenderImage);

    fn fill_region(&mut self, region: &Region, color: Rgba);

    fn stroke_rect(&mut self, rect: Rect, color: Rgba, width: f64);
}

/// Host-registered decoration painted on top of every rendered frame.
pub trait OverlayProvider: Send {
    fn paint(&self, frame: &FrameGeometry, canvas: &mut dyn OverlayCanvas);
}
