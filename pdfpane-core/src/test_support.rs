//! Deterministic in-memory engine used by the unit tests.
//!
//! Characters sit on a fixed grid: `CHARS_PER_LINE` per line starting at
//! (`MARGIN_X`, `MARGIN_Y`), each `CHAR_WIDTH` x `CHAR_HEIGHT` points with lines `LINE_PITCH`
//! apart. Engine-native coordinates use a bottom-left origin so the page-local conversion is
//! exercised.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use parking_lot::Mutex;

use crate::engine::{
    document_id_for_path, Bookmark, DocumentEngine, DocumentInfo, DocumentMetadata,
    DocumentProvider, DocumentSource, LinkRegion, RenderImage, RenderRequest, TextSpan,
};
use crate::geometry::{Point, Rect, Size};
use crate::overlay::{OverlayCanvas, Region, Rgba};

pub const CHARS_PER_LINE: usize = 50;
pub const MARGIN_X: f64 = 10.0;
pub const MARGIN_Y: f64 = 20.0;
pub const CHAR_WIDTH: f64 = 6.0;
pub const CHAR_HEIGHT: f64 = 10.0;
pub const LINE_PITCH: f64 = 12.0;

pub struct FakePage {
    pub size: Size,
    pub text: Vec<char>,
}

pub struct FakeEngine {
    info: DocumentInfo,
    pages: Vec<FakePage>,
    links: HashMap<usize, Vec<LinkRegion>>,
    failing: Mutex<HashSet<usize>>,
    render_log: Mutex<Vec<RenderRequest>>,
    renders: AtomicUsize,
}

impl FakeEngine {
    pub fn uniform(page_count: usize, size: Size) -> Self {
        let pages = (0..page_count)
            .map(|index| FakePage {
                size,
                text: format!("page {index} lorem ipsum dolor").chars().collect(),
            })
            .collect();
        Self::from_pages(pages)
    }

    pub fn with_texts(size: Size, texts: &[&str]) -> Self {
        let pages = texts
            .iter()
            .map(|text| FakePage {
                size,
                text: text.chars().collect(),
            })
            .collect();
        Self::from_pages(pages)
    }

    pub fn from_pages(pages: Vec<FakePage>) -> Self {
        let path = PathBuf::from("/tmp/fake.pdf");
        Self {
            info: DocumentInfo {
                id: document_id_for_path(&path),
                path: Some(path),
                page_count: pages.len(),
                metadata: DocumentMetadata::default(),
            },
            pages,
            links: HashMap::new(),
            failing: Mutex::new(HashSet::new()),
            render_log: Mutex::new(Vec::new()),
            renders: AtomicUsize::new(0),
        }
    }

    pub fn with_link(mut self, page: usize, link: LinkRegion) -> Self {
        self.links.entry(page).or_default().push(link);
        self
    }

    pub fn fail_page(&self, page: usize) {
        self.failing.lock().insert(page);
    }

    pub fn heal_page(&self, page: usize) {
        self.failing.lock().remove(&page);
    }

    pub fn render_count(&self) -> usize {
        self.renders.load(Ordering::SeqCst)
    }

    pub fn rendered_pages(&self) -> Vec<usize> {
        self.render_log
            .lock()
            .iter()
            .map(|request| request.page_index)
            .collect()
    }

    pub fn last_request(&self) -> Option<RenderRequest> {
        self.render_log.lock().last().copied()
    }

    /// Page-local (top-left origin) box of a character.
    pub fn char_box(index: usize) -> Rect {
        let column = (index % CHARS_PER_LINE) as f64;
        let row = (index / CHARS_PER_LINE) as f64;
        let left = MARGIN_X + column * CHAR_WIDTH;
        let top = MARGIN_Y + row * LINE_PITCH;
        Rect::new(left, top, left + CHAR_WIDTH, top + CHAR_HEIGHT)
    }

    /// Page-local point at the centre of a character.
    pub fn char_center(index: usize) -> Point {
        let bounds = Self::char_box(index);
        Point::new(
            (bounds.left + bounds.right) / 2.0,
            (bounds.top + bounds.bottom) / 2.0,
        )
    }

    fn page(&self, page_index: usize) -> Result<&FakePage> {
        self.pages
            .get(page_index)
            .ok_or_else(|| anyhow!("page {} out of range", page_index))
    }

    fn to_native(&self, page: &FakePage, rect: Rect) -> Rect {
        Rect::new(
            rect.left,
            page.size.height - rect.top,
            rect.right,
            page.size.height - rect.bottom,
        )
    }

    fn hit(&self, page_index: usize, point: Point, tx: f64, ty: f64) -> Option<usize> {
        let page = self.pages.get(page_index)?;
        let local = Point::new(point.x, page.size.height - point.y);
        let within = |index: usize, tx: f64, ty: f64| {
            let bounds = Self::char_box(index);
            local.x >= bounds.left - tx
                && local.x < bounds.right + tx
                && local.y >= bounds.top - ty
                && local.y < bounds.bottom + ty
        };
        (0..page.text.len())
            .find(|&index| within(index, 0.0, 0.0))
            .or_else(|| (0..page.text.len()).find(|&index| within(index, tx, ty)))
    }
}

impl DocumentEngine for FakeEngine {
    fn info(&self) -> &DocumentInfo {
        &self.info
    }

    fn page_size(&self, page_index: usize) -> Result<Size> {
        Ok(self.page(page_index)?.size)
    }

    fn render(&self, request: &RenderRequest) -> Result<RenderImage> {
        self.renders.fetch_add(1, Ordering::SeqCst);
        self.render_log.lock().push(*request);
        if self.failing.lock().contains(&request.page_index) {
            bail!("page {} is corrupt", request.page_index);
        }
        Ok(RenderImage {
            width: request.width_px,
            height: request.height_px,
            pixels: vec![request.page_index as u8; 4],
        })
    }

    fn point_to_document(&self, page_index: usize, point: Point) -> Option<Point> {
        let page = self.pages.get(page_index)?;
        if point.x < 0.0
            || point.y < 0.0
            || point.x > page.size.width
            || point.y > page.size.height
        {
            return None;
        }
        Some(Point::new(point.x, page.size.height - point.y))
    }

    fn rect_from_document(&self, page_index: usize, rect: Rect) -> Rect {
        match self.pages.get(page_index) {
            Some(page) => self.to_native(page, rect),
            None => rect,
        }
    }

    fn char_index_at(&self, page_index: usize, point: Point, tx: f64, ty: f64) -> Option<usize> {
        self.hit(page_index, point, tx, ty)
    }

    fn word_at(&self, page_index: usize, point: Point, tx: f64, ty: f64) -> Option<TextSpan> {
        let index = self.hit(page_index, point, tx, ty)?;
        let text = &self.pages[page_index].text;
        if text[index].is_whitespace() {
            return None;
        }
        let mut start = index;
        while start > 0 && !text[start - 1].is_whitespace() {
            start -= 1;
        }
        let mut end = index + 1;
        while end < text.len() && !text[end].is_whitespace() {
            end += 1;
        }
        Some(TextSpan {
            offset: start,
            length: end - start,
        })
    }

    fn text_rectangles(&self, page_index: usize, start: usize, length: usize) -> Result<Vec<Rect>> {
        let page = self.page(page_index)?;
        let end = (start + length).min(page.text.len());
        Ok((start.min(end)..end)
            .map(|index| self.to_native(page, Self::char_box(index)))
            .collect())
    }

    fn char_count(&self, page_index: usize) -> Result<usize> {
        Ok(self.page(page_index)?.text.len())
    }

    fn extract_text(&self, page_index: usize, start: usize, length: usize) -> Result<String> {
        let page = self.page(page_index)?;
        Ok(page.text.iter().skip(start).take(length).collect())
    }

    fn links(&self, page_index: usize) -> Result<Vec<LinkRegion>> {
        Ok(self.links.get(&page_index).cloned().unwrap_or_default())
    }

    fn bookmarks(&self) -> Result<Vec<Bookmark>> {
        Ok(vec![Bookmark {
            title: "Start".to_owned(),
            page_index: Some(0),
            children: Vec::new(),
        }])
    }
}

pub struct FakeProvider {
    pub page_count: usize,
    pub size: Size,
}

#[async_trait::async_trait]
impl DocumentProvider for FakeProvider {
    async fn open(
        &self,
        source: DocumentSource,
        password: Option<&str>,
    ) -> Result<Arc<dyn DocumentEngine>> {
        if password == Some("wrong") {
            bail!("incorrect password for {}", source.describe());
        }
        Ok(Arc::new(FakeEngine::uniform(self.page_count, self.size)))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PaintOp {
    Page { bounds: Rect, tag: u8 },
    Fill { rects: Vec<Rect>, color: Rgba },
    Stroke { rect: Rect, color: Rgba },
}

/// Canvas that records every call in order.
#[derive(Debug, Default)]
pub struct RecordingCanvas {
    pub ops: Vec<PaintOp>,
}

impl RecordingCanvas {
    pub fn pages(&self) -> Vec<u8> {
        self.ops
            .iter()
            .filter_map(|op| match op {
                PaintOp::Page { tag, .. } => Some(*tag),
                _ => None,
            })
            .collect()
    }

    pub fn fills_with(&self, color: Rgba) -> Vec<&[Rect]> {
        self.ops
            .iter()
            .filter_map(|op| match op {
                PaintOp::Fill { rects, color: c } if *c == color => Some(rects.as_slice()),
                _ => None,
            })
            .collect()
    }
}

impl OverlayCanvas for RecordingCanvas {
    fn draw_page(&mut self, bounds: Rect, image: &crate::engine::RenderImage) {
        self.ops.push(PaintOp::Page {
            bounds,
            tag: image.pixels.first().copied().unwrap_or_default(),
        });
    }

    fn fill_region(&mut self, region: &Region, color: Rgba) {
        self.ops.push(PaintOp::Fill {
            rects: region.rects().to_vec(),
            color,
        });
    }

    fn stroke_rect(&mut self, rect: Rect, color: Rgba, _width: f64) {
        self.ops.push(PaintOp::Stroke { rect, color });
    }
}
