//! Coordinate transforms between device space (frame pixels, origin top-left) and document
//! space (page points, origin top-left).
//!
//! Everything here is pure; the viewer feeds in the current rotation, the frame size on the
//! device and the unrotated page size in points.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const ORIGIN: Point = Point { x: 0.0, y: 0.0 };

    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn offset(self, dx: f64, dy: f64) -> Self {
        Self::new(self.x + dx, self.y + dy)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

impl Size {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    pub fn transposed(self) -> Self {
        Self::new(self.height, self.width)
    }

    pub fn is_empty(self) -> bool {
        !(self.width > 0.0 && self.height > 0.0)
    }

    pub fn scaled(self, factor: f64) -> Self {
        Self::new(self.width * factor, self.height * factor)
    }

    /// Rounds both axes down to whole device pixels.
    pub fn floor(self) -> Self {
        Self::new(self.width.floor(), self.height.floor())
    }
}

/// Axis-aligned rectangle stored as edges. Constructors keep `left <= right` and
/// `top <= bottom`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub left: f64,
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
}

impl Rect {
    pub fn new(left: f64, top: f64, right: f64, bottom: f64) -> Self {
        Self {
            left: left.min(right),
            top: top.min(bottom),
            right: left.max(right),
            bottom: top.max(bottom),
        }
    }

    pub fn from_origin_size(origin: Point, size: Size) -> Self {
        Self::new(
            origin.x,
            origin.y,
            origin.x + size.width,
            origin.y + size.height,
        )
    }

    pub fn from_corners(a: Point, b: Point) -> Self {
        Self::new(a.x, a.y, b.x, b.y)
    }

    pub fn width(&self) -> f64 {
        self.right - self.left
    }

    pub fn height(&self) -> f64 {
        self.bottom - self.top
    }

    pub fn origin(&self) -> Point {
        Point::new(self.left, self.top)
    }

    pub fn is_empty(&self) -> bool {
        self.width() <= 0.0 || self.height() <= 0.0
    }

    pub fn contains(&self, point: Point) -> bool {
        point.x >= self.left && point.x < self.right && point.y >= self.top && point.y < self.bottom
    }

    pub fn intersection(&self, other: &Rect) -> Option<Rect> {
        let left = self.left.max(other.left);
        let top = self.top.max(other.top);
        let right = self.right.min(other.right);
        let bottom = self.bottom.min(other.bottom);
        if left < right && top < bottom {
            Some(Rect {
                left,
                top,
                right,
                bottom,
            })
        } else {
            None
        }
    }

    pub fn union(&self, other: &Rect) -> Rect {
        Rect {
            left: self.left.min(other.left),
            top: self.top.min(other.top),
            right: self.right.max(other.right),
            bottom: self.bottom.max(other.bottom),
        }
    }

    pub fn translate(&self, dx: f64, dy: f64) -> Rect {
        Rect {
            left: self.left + dx,
            top: self.top + dy,
            right: self.right + dx,
            bottom: self.bottom + dy,
        }
    }
}

/// Clockwise page rotation applied at display time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Rotation {
    #[default]
    Rotate0,
    Rotate90,
    Rotate180,
    Rotate270,
}

impl Rotation {
    pub fn clockwise(self) -> Self {
        match self {
            Rotation::Rotate0 => Rotation::Rotate90,
            Rotation::Rotate90 => Rotation::Rotate180,
            Rotation::Rotate180 => Rotation::Rotate270,
            Rotation::Rotate270 => Rotation::Rotate0,
        }
    }

    pub fn counterclockwise(self) -> Self {
        match self {
            Rotation::Rotate0 => Rotation::Rotate270,
            Rotation::Rotate90 => Rotation::Rotate0,
            Rotation::Rotate180 => Rotation::Rotate90,
            Rotation::Rotate270 => Rotation::Rotate180,
        }
    }

    /// True for 90° and 270°, where width and height trade places on the device.
    pub fn is_quarter_turn(self) -> bool {
        matches!(self, Rotation::Rotate90 | Rotation::Rotate270)
    }

    pub fn degrees(self) -> u16 {
        match self {
            Rotation::Rotate0 => 0,
            Rotation::Rotate90 => 90,
            Rotation::Rotate180 => 180,
            Rotation::Rotate270 => 270,
        }
    }

    /// Page size as it appears on the device for this rotation.
    pub fn apply_to(self, size: Size) -> Size {
        if self.is_quarter_turn() {
            size.transposed()
        } else {
            size
        }
    }
}

/// Maps a frame-local device point to a page-local document point.
pub fn device_to_document(rotation: Rotation, frame: Size, page: Size, point: Point) -> Point {
    if frame.is_empty() || page.is_empty() {
        return Point::ORIGIN;
    }

    let (unrotated, unrotated_frame) = match rotation {
        Rotation::Rotate0 => (point, frame),
        Rotation::Rotate90 => (Point::new(point.y, frame.width - point.x), frame.transposed()),
        Rotation::Rotate180 => (
            Point::new(frame.width - point.x, frame.height - point.y),
            frame,
        ),
        Rotation::Rotate270 => (
            Point::new(frame.height - point.y, point.x),
            frame.transposed(),
        ),
    };

    Point::new(
        unrotated.x / unrotated_frame.width * page.width,
        unrotated.y / unrotated_frame.height * page.height,
    )
}

/// Maps a page-local document point to a frame-local device point.
pub fn document_to_device(rotation: Rotation, frame: Size, page: Size, point: Point) -> Point {
    if frame.is_empty() || page.is_empty() {
        return Point::ORIGIN;
    }

    let unrotated_frame = rotation.apply_to(frame);
    let scaled = Point::new(
        point.x / page.width * unrotated_frame.width,
        point.y / page.height * unrotated_frame.height,
    );

    match rotation {
        Rotation::Rotate0 => scaled,
        Rotation::Rotate90 => Point::new(unrotated_frame.height - scaled.y, scaled.x),
        Rotation::Rotate180 => Point::new(
            unrotated_frame.width - scaled.x,
            unrotated_frame.height - scaled.y,
        ),
        Rotation::Rotate270 => Point::new(scaled.y, unrotated_frame.width - scaled.x),
    }
}

pub fn bounds_to_device(rotation: Rotation, frame: Size, page: Size, bounds: Rect) -> Rect {
    let a = document_to_device(rotation, frame, page, Point::new(bounds.left, bounds.top));
    let b = document_to_device(rotation, frame, page, Point::new(bounds.right, bounds.bottom));
    Rect::from_corners(a, b)
}

pub fn bounds_to_document(rotation: Rotation, frame: Size, page: Size, bounds: Rect) -> Rect {
    let a = device_to_document(rotation, frame, page, Point::new(bounds.left, bounds.top));
    let b = device_to_document(rotation, frame, page, Point::new(bounds.right, bounds.bottom));
    Rect::from_corners(a, b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const ROTATIONS: [Rotation; 4] = [
        Rotation::Rotate0,
        Rotation::Rotate90,
        Rotation::Rotate180,
        Rotation::Rotate270,
    ];

    fn assert_close(a: Point, b: Point) {
        assert!(
            (a.x - b.x).abs() < 1e-6 && (a.y - b.y).abs() < 1e-6,
            "{a:?} != {b:?}"
        );
    }

    #[test]
    fn quarter_turn_maps_origin_to_top_right() {
        let page = Size::new(200.0, 300.0);
        let frame = Rotation::Rotate90.apply_to(page);
        assert_eq!(frame, Size::new(300.0, 200.0));

        let corner = document_to_device(Rotation::Rotate90, frame, page, Point::ORIGIN);
        assert_close(corner, Point::new(300.0, 0.0));
    }

    #[test]
    fn corners_follow_clockwise_convention() {
        let page = Size::new(100.0, 50.0);
        let cases = [
            (Rotation::Rotate0, Point::new(0.0, 0.0)),
            (Rotation::Rotate90, Point::new(50.0, 0.0)),
            (Rotation::Rotate180, Point::new(100.0, 50.0)),
            (Rotation::Rotate270, Point::new(0.0, 100.0)),
        ];
        for (rotation, expected) in cases {
            let frame = rotation.apply_to(page);
            let mapped = document_to_device(rotation, frame, page, Point::ORIGIN);
            assert_close(mapped, expected);
        }
    }

    #[test]
    fn scaling_follows_frame_size() {
        let page = Size::new(100.0, 200.0);
        let frame = Size::new(50.0, 100.0);
        let device = document_to_device(Rotation::Rotate0, frame, page, Point::new(40.0, 80.0));
        assert_close(device, Point::new(20.0, 40.0));
    }

    #[test]
    fn bounds_are_normalized_after_rotation() {
        let page = Size::new(100.0, 200.0);
        let frame = Rotation::Rotate180.apply_to(page);
        let bounds = bounds_to_device(
            Rotation::Rotate180,
            frame,
            page,
            Rect::new(10.0, 20.0, 30.0, 40.0),
        );
        assert_eq!(bounds, Rect::new(70.0, 160.0, 90.0, 180.0));
        assert!(bounds.left <= bounds.right && bounds.top <= bounds.bottom);
    }

    #[test]
    fn degenerate_sizes_map_to_origin() {
        let point = Point::new(5.0, 5.0);
        for rotation in ROTATIONS {
            assert_eq!(
                device_to_document(rotation, Size::default(), Size::new(1.0, 1.0), point),
                Point::ORIGIN
            );
            assert_eq!(
                document_to_device(rotation, Size::new(1.0, 1.0), Size::default(), point),
                Point::ORIGIN
            );
        }
    }

    #[test]
    fn rotation_steps_cycle() {
        for rotation in ROTATIONS {
            assert_eq!(rotation.clockwise().counterclockwise(), rotation);
            let full = rotation.clockwise().clockwise().clockwise().clockwise();
            assert_eq!(full, rotation);
        }
    }

    fn rotation_strategy() -> impl Strategy<Value = Rotation> {
        prop::sample::select(ROTATIONS.to_vec())
    }

    proptest! {
        #[test]
        fn device_round_trip_is_identity(
            rotation in rotation_strategy(),
            page_w in 1.0f64..2000.0,
            page_h in 1.0f64..2000.0,
            zoom in 0.1f64..4.0,
            fx in 0.0f64..1.0,
            fy in 0.0f64..1.0,
        ) {
            let page = Size::new(page_w, page_h);
            let frame = rotation.apply_to(page).scaled(zoom);
            let point = Point::new(fx * page_w, fy * page_h);

            let device = document_to_device(rotation, frame, page, point);
            let back = device_to_document(rotation, frame, page, device);
            prop_assert!((back.x - point.x).abs() < 1e-6 * page_w.max(1.0));
            prop_assert!((back.y - point.y).abs() < 1e-6 * page_h.max(1.0));
        }

        #[test]
        fn document_round_trip_is_identity(
            rotation in rotation_strategy(),
            frame_w in 1.0f64..4000.0,
            frame_h in 1.0f64..4000.0,
            page_w in 1.0f64..2000.0,
            page_h in 1.0f64..2000.0,
            x in -100.0f64..4000.0,
            y in -100.0f64..4000.0,
        ) {
            let frame = Size::new(frame_w, frame_h);
            let page = Size::new(page_w, page_h);
            let point = Point::new(x, y);

            let document = device_to_document(rotation, frame, page, point);
            let back = document_to_device(rotation, frame, page, document);
            prop_assert!((back.x - point.x).abs() < 1e-6 * frame_w.max(frame_h).max(x.abs()).max(1.0));
            prop_assert!((back.y - point.y).abs() < 1e-6 * frame_w.max(frame_h).max(y.abs()).max(1.0));
        }
    }
}
