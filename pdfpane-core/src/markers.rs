//! Page-anchored overlay objects and the per-page index consulted at paint time.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::geometry::Rect;
use crate::overlay::{FrameGeometry, OverlayCanvas, Region, Rgba};

pub trait Marker: Send + Sync {
    fn page(&self) -> usize;

    fn draw(&self, frame: &FrameGeometry, canvas: &mut dyn OverlayCanvas);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MarkerId(u64);

/// Filled rectangle in page-local document space.
#[derive(Debug, Clone, PartialEq)]
pub struct HighlightMarker {
    pub page: usize,
    pub bounds: Rect,
    pub fill: Rgba,
    pub border: Option<Rgba>,
}

impl HighlightMarker {
    pub fn new(page: usize, bounds: Rect) -> Self {
        Self {
            page,
            bounds,
            fill: Rgba::HIGHLIGHT,
            border: None,
        }
    }

    pub fn with_border(mut self, color: Rgba) -> Self {
        self.border = Some(color);
        self
    }
}

impl Marker for HighlightMarker {
    fn page(&self) -> usize {
        self.page
    }

    fn draw(&self, frame: &FrameGeometry, canvas: &mut dyn OverlayCanvas) {
        let Some(bounds) = frame
            .to_viewport(self.bounds)
            .intersection(&frame.frame_rect())
        else {
            return;
        };
        let region: Region = std::iter::once(bounds).collect();
        canvas.fill_region(&region, self.fill);
        if let Some(border) = self.border {
            canvas.stroke_rect(bounds, border, 1.0);
        }
    }
}

#[derive(Default)]
pub struct MarkerCollection {
    next_id: u64,
    markers: Vec<(MarkerId, Arc<dyn Marker>)>,
    index: Option<HashMap<usize, Vec<Arc<dyn Marker>>>>,
}

impl MarkerCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, marker: Arc<dyn Marker>) -> MarkerId {
        self.next_id += 1;
        let id = MarkerId(self.next_id);
        self.markers.push((id, marker));
        self.invalidate();
        id
    }

    pub fn remove(&mut self, id: MarkerId) -> bool {
        let before = self.markers.len();
        self.markers.retain(|(existing, _)| *existing != id);
        let removed = self.markers.len() != before;
        if removed {
            self.invalidate();
        }
        removed
    }

    pub fn clear(&mut self) {
        self.markers.clear();
        self.invalidate();
    }

    pub fn len(&self) -> usize {
        self.markers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (MarkerId, &Arc<dyn Marker>)> {
        self.markers.iter().map(|(id, marker)| (*id, marker))
    }

    fn invalidate(&mut self) {
        self.index = None;
    }

    /// Rebuilds the page index now, dropping markers whose page is out of range.
    pub fn rebuild_index(&mut self, page_count: usize) {
        let mut index: HashMap<usize, Vec<Arc<dyn Marker>>> = HashMap::new();
        let mut skipped = 0usize;
        for (_, marker) in &self.markers {
            let page = marker.page();
            if page >= page_count {
                skipped += 1;
                continue;
            }
            index.entry(page).or_default().push(Arc::clone(marker));
        }
        if skipped > 0 {
            debug!(skipped, page_count, "markers outside the document ignored");
        }
        self.index = Some(index);
    }

    /// Markers for `page`, building the index first if a mutation invalidated it.
    pub fn on_page(&mut self, page: usize, page_count: usize) -> &[Arc<dyn Marker>] {
        if self.index.is_none() {
            self.rebuild_index(page_count);
        }
        self.index
            .as_ref()
            .and_then(|index| index.get(&page))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn is_indexed(&self) -> bool {
        self.index.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Point, Rotation, Size};
    use crate::test_support::{PaintOp, RecordingCanvas};

    fn marker(page: usize) -> Arc<dyn Marker> {
        Arc::new(HighlightMarker::new(page, Rect::new(0.0, 0.0, 10.0, 10.0)))
    }

    #[test]
    fn index_groups_by_page_and_skips_out_of_range() {
        let mut markers = MarkerCollection::new();
        markers.add(marker(0));
        markers.add(marker(2));
        markers.add(marker(2));
        markers.add(marker(9));

        assert_eq!(markers.on_page(2, 5).len(), 2);
        assert_eq!(markers.on_page(0, 5).len(), 1);
        assert!(markers.on_page(1, 5).is_empty());
        assert!(markers.on_page(9, 5).is_empty());
        assert_eq!(markers.len(), 4);
    }

    #[test]
    fn mutations_invalidate_index() {
        let mut markers = MarkerCollection::new();
        let first = markers.add(marker(1));
        markers.on_page(1, 3);
        assert!(markers.is_indexed());

        let second = markers.add(marker(1));
        assert!(!markers.is_indexed());
        assert_eq!(markers.on_page(1, 3).len(), 2);

        assert!(markers.remove(first));
        assert!(!markers.remove(first));
        assert_eq!(markers.on_page(1, 3).len(), 1);
        assert_ne!(first, second);

        markers.clear();
        assert!(markers.on_page(1, 3).is_empty());
    }

    #[test]
    fn highlight_is_clipped_to_frame() {
        let frame = FrameGeometry {
            page: 0,
            origin: Point::new(10.0, 10.0),
            size: Size::new(100.0, 100.0),
            page_size: Size::new(100.0, 100.0),
            rotation: Rotation::Rotate0,
        };
        let marker = HighlightMarker::new(0, Rect::new(50.0, 50.0, 150.0, 70.0))
            .with_border(Rgba::FRAME_BORDER);
        let mut canvas = RecordingCanvas::default();
        marker.draw(&frame, &mut canvas);

        assert_eq!(
            canvas.ops,
            vec![
                PaintOp::Fill {
                    rects: vec![Rect::new(60.0, 60.0, 110.0, 80.0)],
                    color: Rgba::HIGHLIGHT
                },
                PaintOp::Stroke {
                    rect: Rect::new(60.0, 60.0, 110.0, 80.0),
                    color: Rgba::FRAME_BORDER
                },
            ]
        );
    }
}
