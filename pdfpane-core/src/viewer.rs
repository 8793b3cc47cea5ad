//! The viewer: owns the open document, the viewport, the frame pool and the selection, and is
//! the single place where host input turns into state changes.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use parking_lot::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::config::{CursorMode, ViewerConfig};
use crate::engine::{
    Bookmark, DocumentEngine, DocumentId, DocumentInfo, DocumentProvider, DocumentSource,
    LinkTarget, RenderFlags, RenderImage, RenderRequest,
};
use crate::executor::{RenderExecutor, RenderJob, RenderOutcome, WorkerExecutor};
use crate::frames::{Completion, FrameLink, FramePool, FrameSpec, PageFrame, ReconcilePass};
use crate::geometry::{bounds_to_device, Point, Rect, Size};
use crate::layout::{
    arrange, device_page_size, effective_zoom, max_scroll, DisplayMode, Orientation,
    ScrollAction, ViewportState, ZoomMode,
};
use crate::markers::{Marker, MarkerCollection, MarkerId};
use crate::overlay::{FrameGeometry, OverlayCanvas, OverlayProvider, Region, Rgba};
use crate::selection::{
    self, PointerCache, PointerResolution, SelectionRange, TextPosition, TextSelection,
};
use crate::state::PersistedViewState;

/// Text sink provided by the host.
pub trait Clipboard {
    fn set_text(&mut self, text: &str) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum ViewerEvent {
    DocumentOpened(DocumentId),
    DocumentClosed(DocumentId),
    /// First and last visible page changed.
    PageChanged { first: usize, last: usize },
    /// Press and release without a drag. `point` is page-local.
    Click { page: usize, point: Point },
    LinkClicked { page: usize, target: LinkTarget },
    RedrawNeeded,
    SelectionChanged,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    NextPage,
    PreviousPage,
    GotoPage { page: usize },
    ZoomIn,
    ZoomOut,
    SetZoom { zoom: f64 },
    SetZoomMode { mode: ZoomMode },
    RotateClockwise,
    RotateCounterclockwise,
    SetDisplayMode { mode: DisplayMode },
    CycleDisplayMode,
    SetRightToLeft { enabled: bool },
    Scroll { action: ScrollAction, orientation: Orientation },
    ScrollTo { x: f64, y: f64 },
    Resize { width: f64, height: f64 },
    SelectAll,
    SelectCurrentPage,
    ResetSelection,
}

struct OpenDocument {
    engine: Arc<dyn DocumentEngine>,
    info: DocumentInfo,
    page_sizes: Vec<Size>,
}

impl OpenDocument {
    fn page_count(&self) -> usize {
        self.page_sizes.len()
    }

    fn last_page(&self) -> usize {
        self.page_sizes.len().saturating_sub(1)
    }
}

#[derive(Debug, Clone, Copy)]
struct Press {
    origin: Point,
    last: Point,
    /// Page and page-local point under the press, when it landed on a page.
    target: Option<(usize, Point)>,
    panning: bool,
    moved: bool,
}

pub struct Viewer {
    config: ViewerConfig,
    viewport: ViewportState,
    render_flags: RenderFlags,
    dpi: (f64, f64),
    document: Option<OpenDocument>,
    pool: FramePool,
    executor: Box<dyn RenderExecutor>,
    selection: TextSelection,
    pointer: PointerCache,
    press: Option<Press>,
    markers: MarkerCollection,
    providers: Vec<Box<dyn OverlayProvider>>,
    events: Mutex<Vec<ViewerEvent>>,
    layout_dirty: bool,
    /// Bitmaps no longer match the render settings; the next layout may not reuse them.
    rasters_dirty: bool,
    laid_out_mode: Option<DisplayMode>,
    zoom: f64,
    extent: Size,
    current_page: usize,
    last_page: usize,
}

impl Viewer {
    pub fn new(config: ViewerConfig, executor: Box<dyn RenderExecutor>) -> Self {
        if let Err(err) = config.validate() {
            warn!("viewer config is inconsistent: {err}");
        }
        Self {
            viewport: ViewportState::from_config(&config),
            render_flags: RenderFlags::default(),
            dpi: (config.dpi, config.dpi),
            document: None,
            pool: FramePool::new(),
            executor,
            selection: TextSelection::new(),
            pointer: PointerCache::default(),
            press: None,
            markers: MarkerCollection::new(),
            providers: Vec::new(),
            events: Mutex::new(Vec::new()),
            layout_dirty: true,
            rasters_dirty: false,
            laid_out_mode: None,
            zoom: 1.0,
            extent: Size::default(),
            current_page: 0,
            last_page: 0,
            config,
        }
    }

    /// Viewer backed by a pool of `config.render_workers` render threads.
    pub fn with_workers(config: ViewerConfig) -> Result<Self> {
        let executor = WorkerExecutor::new(config.render_workers)?;
        Ok(Self::new(config, Box::new(executor)))
    }

    pub fn drain_events(&self) -> Vec<ViewerEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    fn emit(&self, event: ViewerEvent) {
        self.events.lock().push(event);
    }

    pub fn config(&self) -> &ViewerConfig {
        &self.config
    }

    pub fn viewport(&self) -> &ViewportState {
        &self.viewport
    }

    pub fn document_info(&self) -> Option<&DocumentInfo> {
        self.document.as_ref().map(|doc| &doc.info)
    }

    pub fn page_count(&self) -> usize {
        self.document.as_ref().map_or(0, OpenDocument::page_count)
    }

    /// First visible page as of the last layout pass.
    pub fn current_page(&self) -> usize {
        self.current_page
    }

    pub fn last_visible_page(&self) -> usize {
        self.last_page
    }

    /// Zoom in effect after the last layout pass.
    pub fn zoom(&self) -> f64 {
        self.zoom
    }

    pub fn extent(&self) -> Size {
        self.extent
    }

    pub fn frames(&self) -> &[PageFrame] {
        self.pool.frames()
    }

    pub fn selection(&self) -> &TextSelection {
        &self.selection
    }

    pub fn render_flags(&self) -> RenderFlags {
        self.render_flags
    }

    pub fn bookmarks(&self) -> Result<Vec<Bookmark>> {
        match &self.document {
            Some(doc) => doc.engine.bookmarks(),
            None => Ok(Vec::new()),
        }
    }

    #[instrument(skip(self, provider, source, password), fields(source = %source.describe()))]
    pub async fn open<P>(
        &mut self,
        provider: &P,
        source: DocumentSource,
        password: Option<&str>,
    ) -> Result<()>
    where
        P: DocumentProvider + ?Sized,
    {
        let description = source.describe();
        let engine = provider
            .open(source, password)
            .await
            .with_context(|| format!("failed to open {description}"))?;
        self.attach(engine)
    }

    /// Takes over an already opened document.
    #[instrument(skip(self, engine))]
    pub fn attach(&mut self, engine: Arc<dyn DocumentEngine>) -> Result<()> {
        let info = engine.info().clone();
        let page_sizes = (0..engine.page_count())
            .map(|page| {
                engine
                    .page_size(page)
                    .with_context(|| format!("failed to read size of page {page}"))
            })
            .collect::<Result<Vec<_>>>()?;

        self.close();
        info!(id = %info.id, pages = page_sizes.len(), "document opened");
        self.emit(ViewerEvent::DocumentOpened(info.id));
        self.document = Some(OpenDocument {
            engine,
            info,
            page_sizes,
        });
        self.viewport.scroll_x = 0.0;
        self.viewport.scroll_y = 0.0;
        self.current_page = 0;
        self.last_page = 0;
        self.invalidate_layout();
        self.flush_layout();
        Ok(())
    }

    pub fn close(&mut self) {
        let Some(doc) = self.document.take() else {
            return;
        };
        self.clear_frames();
        self.selection.reset();
        self.press = None;
        self.markers.clear();
        info!(id = %doc.info.id, "document closed");
        self.emit(ViewerEvent::DocumentClosed(doc.info.id));
        self.emit(ViewerEvent::RedrawNeeded);
    }

    pub fn invalidate_layout(&mut self) {
        self.layout_dirty = true;
    }

    fn invalidate_rasters(&mut self) {
        self.rasters_dirty = true;
        self.layout_dirty = true;
    }

    fn clear_frames(&mut self) {
        for stale in self.pool.clear() {
            self.executor.cancel(stale.slot, stale.generation);
        }
        self.laid_out_mode = None;
        self.extent = Size::default();
        self.pointer.invalidate();
    }

    /// Recomputes zoom and frame geometry, rebuilds the pool and reconciles it. Does nothing
    /// unless something invalidated the layout.
    pub fn flush_layout(&mut self) {
        if !self.layout_dirty {
            return;
        }
        let Some(doc) = self.document.as_ref() else {
            self.layout_dirty = false;
            return;
        };
        if self.viewport.is_degenerate() {
            debug!("viewport has no area, layout suppressed");
            return;
        }
        self.layout_dirty = false;

        let Some(&reference) = doc.page_sizes.get(self.current_page.min(doc.last_page())) else {
            debug!("document has no pages, nothing to lay out");
            self.clear_frames();
            self.viewport.scroll_x = 0.0;
            self.viewport.scroll_y = 0.0;
            self.emit(ViewerEvent::RedrawNeeded);
            return;
        };
        let mode = self.viewport.display_mode;
        let zoom = effective_zoom(&self.viewport, &self.config, reference);
        let pages: Vec<usize> = match mode {
            DisplayMode::Continuous => (0..doc.page_count()).collect(),
            paged => paged.visible_pages(self.current_page, doc.page_count()),
        };
        let sizes: Vec<Size> = pages
            .iter()
            .map(|&page| device_page_size(doc.page_sizes[page], zoom, self.viewport.rotation))
            .collect();
        let arrangement = arrange(
            mode,
            &sizes,
            self.viewport.size(),
            self.config.frame_spacing,
            self.viewport.right_to_left,
        );
        let specs: Vec<FrameSpec> = pages
            .iter()
            .zip(sizes.iter().zip(&arrangement.frames))
            .map(|(&page, (&size, &bounds))| FrameSpec {
                page,
                page_size: doc.page_sizes[page],
                size,
                bounds,
            })
            .collect();

        let anchor = match (self.laid_out_mode, mode) {
            (Some(DisplayMode::Continuous), DisplayMode::Continuous) => self
                .pool
                .frame(self.current_page)
                .map(|frame| (self.viewport.scroll_y - frame.bounds.top) / frame.bounds.height().max(1.0)),
            _ => None,
        };

        let keep_rasters = !self.rasters_dirty
            && self.laid_out_mode == Some(mode)
            && self.pool.holds(&specs, self.viewport.rotation);
        if keep_rasters {
            self.pool.reposition(&arrangement.frames);
        } else {
            for stale in self.pool.rebuild(&specs, self.viewport.rotation) {
                self.executor.cancel(stale.slot, stale.generation);
            }
        }
        self.rasters_dirty = false;
        self.laid_out_mode = Some(mode);
        self.zoom = zoom;
        self.extent = arrangement.extent;
        self.pointer.invalidate();

        if mode == DisplayMode::Continuous {
            if let Some(frame) = arrangement.frames.get(self.current_page) {
                self.viewport.scroll_y = match anchor {
                    Some(ratio) => frame.top + ratio * frame.height(),
                    None => frame.top - self.config.frame_spacing,
                };
            }
        }
        self.clamp_scroll();
        debug!(zoom, frames = specs.len(), ?mode, keep_rasters, "layout pass");

        self.reconcile();
        self.emit(ViewerEvent::RedrawNeeded);
    }

    fn clamp_scroll(&mut self) {
        let limit = max_scroll(self.extent, self.viewport.size());
        self.viewport.scroll_x = self.viewport.scroll_x.clamp(0.0, limit.x);
        self.viewport.scroll_y = self.viewport.scroll_y.clamp(0.0, limit.y);
    }

    fn reconcile(&mut self) {
        let pass = match self.viewport.display_mode {
            DisplayMode::Continuous => self
                .pool
                .reconcile(self.viewport.scroll_y, self.viewport.height),
            _ => self.pool.activate_all(),
        };
        self.dispatch(&pass);
        if let Some(first) = pass.first_visible {
            self.set_page_numbers(first, pass.last_visible.unwrap_or(first));
        }
    }

    fn dispatch(&mut self, pass: &ReconcilePass) {
        for stale in &pass.cancelled {
            self.executor.cancel(stale.slot, stale.generation);
        }
        let Some(doc) = self.document.as_ref() else {
            return;
        };
        for &slot in &pass.to_render {
            let Some(frame) = self.pool.frame(slot) else {
                continue;
            };
            let request = RenderRequest {
                page_index: frame.page,
                width_px: (frame.size.width * self.config.oversample).round() as u32,
                height_px: (frame.size.height * self.config.oversample).round() as u32,
                dpi_x: self.dpi.0,
                dpi_y: self.dpi.1,
                rotation: frame.rotation,
                flags: self.render_flags,
            };
            debug!(page = frame.page, slot, "render requested");
            self.executor.submit(RenderJob {
                engine: Arc::clone(&doc.engine),
                slot,
                generation: frame.generation(),
                request,
                frame_size: frame.size,
                page_size: frame.page_size,
            });
        }
    }

    fn set_page_numbers(&mut self, first: usize, last: usize) {
        if (first, last) != (self.current_page, self.last_page) {
            self.current_page = first;
            self.last_page = last;
            self.emit(ViewerEvent::PageChanged { first, last });
        }
    }

    /// Applies every finished render. Returns how many frames received a bitmap.
    pub fn pump_renders(&mut self) -> usize {
        let mut applied = 0;
        for outcome in self.executor.poll() {
            if self.apply_outcome(outcome) {
                applied += 1;
            }
        }
        if applied > 0 {
            self.emit(ViewerEvent::RedrawNeeded);
        }
        applied
    }

    /// Blocks until no frame is waiting for a render or `timeout` runs out.
    pub fn wait_for_renders(&mut self, timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        let mut applied = self.pump_renders();
        while self.pool.rendering_count() > 0 {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match self.executor.wait(remaining) {
                Some(outcome) => {
                    if self.apply_outcome(outcome) {
                        applied += 1;
                    }
                }
                None => break,
            }
        }
        if applied > 0 {
            self.emit(ViewerEvent::RedrawNeeded);
        }
        applied
    }

    fn apply_outcome(&mut self, outcome: RenderOutcome) -> bool {
        let RenderOutcome {
            slot,
            page,
            generation,
            result,
        } = outcome;
        match self.pool.complete(slot, generation, result) {
            Completion::Applied => true,
            Completion::Stale => {
                debug!(page, slot, "stale render dropped");
                false
            }
            Completion::Failed(fault) => {
                warn!(page, "page render failed: {fault}");
                false
            }
        }
    }

    pub fn goto_page(&mut self, page: usize) {
        self.flush_layout();
        let Some(doc) = self.document.as_ref() else {
            return;
        };
        let page = page.min(doc.last_page());
        match self.viewport.display_mode {
            DisplayMode::Continuous => {
                let Some(top) = self.pool.frame(page).map(|frame| frame.bounds.top) else {
                    self.current_page = page;
                    return;
                };
                self.viewport.scroll_y = top - self.config.frame_spacing;
                self.clamp_scroll();
                self.pointer.invalidate();
                self.reconcile();
                self.emit(ViewerEvent::RedrawNeeded);
            }
            mode => {
                let pages = mode.visible_pages(page, doc.page_count());
                let first = pages.first().copied().unwrap_or(0);
                let last = pages.last().copied().unwrap_or(first);
                if first == self.current_page && self.laid_out_mode == Some(mode) {
                    return;
                }
                self.set_page_numbers(first, last);
                self.invalidate_layout();
                self.flush_layout();
            }
        }
    }

    pub fn next_page(&mut self) {
        let step = self.viewport.display_mode.page_step();
        self.goto_page(self.current_page + step);
    }

    pub fn previous_page(&mut self) {
        let step = self.viewport.display_mode.page_step();
        self.goto_page(self.current_page.saturating_sub(step));
    }

    pub fn zoom_in(&mut self) {
        self.flush_layout();
        self.set_zoom(self.zoom * self.config.zoom_factor);
    }

    pub fn zoom_out(&mut self) {
        self.flush_layout();
        self.set_zoom(self.zoom / self.config.zoom_factor);
    }

    /// Explicit zoom; leaves any fit mode.
    pub fn set_zoom(&mut self, zoom: f64) {
        self.viewport.zoom = self.config.clamp_zoom(zoom);
        self.viewport.zoom_mode = ZoomMode::None;
        self.invalidate_layout();
    }

    pub fn set_zoom_mode(&mut self, mode: ZoomMode) {
        if mode == ZoomMode::None {
            self.viewport.zoom = self.config.clamp_zoom(self.zoom);
        }
        self.viewport.zoom_mode = mode;
        self.invalidate_layout();
    }

    pub fn rotate_clockwise(&mut self) {
        self.viewport.rotation = self.viewport.rotation.clockwise();
        self.invalidate_layout();
    }

    pub fn rotate_counterclockwise(&mut self) {
        self.viewport.rotation = self.viewport.rotation.counterclockwise();
        self.invalidate_layout();
    }

    pub fn set_display_mode(&mut self, mode: DisplayMode) {
        if self.viewport.display_mode != mode {
            self.viewport.display_mode = mode;
            self.invalidate_layout();
        }
    }

    pub fn set_render_flags(&mut self, flags: RenderFlags) {
        if self.render_flags != flags {
            self.render_flags = flags;
            self.invalidate_rasters();
        }
    }

    pub fn set_dpi(&mut self, dpi_x: f64, dpi_y: f64) {
        self.dpi = (dpi_x, dpi_y);
        self.invalidate_rasters();
    }

    pub fn set_right_to_left(&mut self, enabled: bool) {
        if self.viewport.right_to_left != enabled {
            self.viewport.right_to_left = enabled;
            self.invalidate_layout();
        }
    }

    pub fn resize(&mut self, width: f64, height: f64) {
        self.viewport.width = width;
        self.viewport.height = height;
        self.invalidate_layout();
    }

    pub fn scroll_to(&mut self, x: f64, y: f64) {
        self.flush_layout();
        self.viewport.scroll_x = x;
        self.viewport.scroll_y = y;
        self.clamp_scroll();
        self.pointer.invalidate();
        if self.document.is_some() && !self.viewport.is_degenerate() {
            self.reconcile();
            self.emit(ViewerEvent::RedrawNeeded);
        }
    }

    fn scroll_by(&mut self, orientation: Orientation, delta: f64) {
        match orientation {
            Orientation::Vertical => {
                self.scroll_to(self.viewport.scroll_x, self.viewport.scroll_y + delta)
            }
            Orientation::Horizontal => {
                self.scroll_to(self.viewport.scroll_x + delta, self.viewport.scroll_y)
            }
        }
    }

    pub fn perform_scroll(&mut self, action: ScrollAction, orientation: Orientation) {
        self.flush_layout();
        let flips_pages = orientation == Orientation::Vertical
            && (self.viewport.display_mode.is_paged()
                || self.viewport.zoom_mode == ZoomMode::FitHeight);
        let page_extent = match orientation {
            Orientation::Vertical => self.viewport.height,
            Orientation::Horizontal => self.viewport.width,
        } - self.config.frame_spacing;
        let line = self.config.scroll_line;

        match action {
            ScrollAction::LineUp => self.scroll_by(orientation, -line),
            ScrollAction::LineDown => self.scroll_by(orientation, line),
            ScrollAction::PageUp if flips_pages => self.previous_page(),
            ScrollAction::PageDown if flips_pages => self.next_page(),
            ScrollAction::PageUp => self.scroll_by(orientation, -page_extent),
            ScrollAction::PageDown => self.scroll_by(orientation, page_extent),
            ScrollAction::Home if orientation == Orientation::Vertical && self.viewport.display_mode.is_paged() => {
                self.goto_page(0)
            }
            ScrollAction::End if orientation == Orientation::Vertical && self.viewport.display_mode.is_paged() => {
                self.goto_page(usize::MAX)
            }
            ScrollAction::Home => match orientation {
                Orientation::Vertical => self.scroll_to(self.viewport.scroll_x, 0.0),
                Orientation::Horizontal => self.scroll_to(0.0, self.viewport.scroll_y),
            },
            ScrollAction::End => {
                let limit = max_scroll(self.extent, self.viewport.size());
                match orientation {
                    Orientation::Vertical => self.scroll_to(self.viewport.scroll_x, limit.y),
                    Orientation::Horizontal => self.scroll_to(limit.x, self.viewport.scroll_y),
                }
            }
        }
    }

    /// Centres a page-local document rectangle in the viewport.
    pub fn scroll_into_view(&mut self, page: usize, bounds: Rect) {
        self.flush_layout();
        if self.document.is_none() {
            return;
        }
        if self.pool.slot_for_page(page).is_none() {
            self.goto_page(page);
        }
        let Some(frame) = self
            .pool
            .slot_for_page(page)
            .and_then(|slot| self.pool.frame(slot))
        else {
            return;
        };
        let target = bounds_to_device(frame.rotation, frame.size, frame.page_size, bounds)
            .translate(frame.bounds.left, frame.bounds.top);
        let center = Point::new(
            (target.left + target.right) / 2.0,
            (target.top + target.bottom) / 2.0,
        );
        self.scroll_to(
            center.x - self.viewport.width / 2.0,
            center.y - self.viewport.height / 2.0,
        );
    }

    /// Page under a viewport point. Continuous mode only.
    pub fn page_at_point(&mut self, point: Point) -> Option<usize> {
        self.flush_layout();
        if self.viewport.display_mode != DisplayMode::Continuous {
            return None;
        }
        self.frame_at(point).map(|(_, geometry)| geometry.page)
    }

    fn frame_at(&self, point: Point) -> Option<(usize, FrameGeometry)> {
        let content = point.offset(self.viewport.scroll_x, self.viewport.scroll_y);
        self.pool
            .frames()
            .iter()
            .find(|frame| frame.bounds.contains(content))
            .map(|frame| (frame.slot, self.geometry_of(frame)))
    }

    fn geometry_of(&self, frame: &PageFrame) -> FrameGeometry {
        FrameGeometry {
            page: frame.page,
            origin: Point::new(
                frame.bounds.left - self.viewport.scroll_x,
                frame.bounds.top - self.viewport.scroll_y,
            ),
            size: frame.size,
            page_size: frame.page_size,
            rotation: frame.rotation,
        }
    }

    fn resolve(&mut self, point: Point) -> Option<(usize, FrameGeometry, PointerResolution)> {
        let (slot, geometry) = self.frame_at(point)?;
        let doc = self.document.as_ref()?;
        let tolerance = self.config.hit_tolerance / self.zoom.max(f64::EPSILON);
        let resolution = self.pointer.resolve(geometry.page, point, || {
            let local = geometry.to_document(point);
            let native = doc.engine.point_to_document(geometry.page, local);
            PointerResolution {
                device: point,
                page: geometry.page,
                document: Some(local),
                char_index: native.and_then(|native| {
                    doc.engine
                        .char_index_at(geometry.page, native, tolerance, tolerance)
                }),
            }
        });
        Some((slot, geometry, resolution))
    }

    fn link_at(&self, slot: usize, geometry: &FrameGeometry, point: Point) -> Option<LinkTarget> {
        let local = point.offset(-geometry.origin.x, -geometry.origin.y);
        self.pool
            .frame(slot)?
            .links()
            .iter()
            .find(|link| link.bounds.contains(local))
            .map(|link| link.target.clone())
    }

    pub fn pointer_down(&mut self, point: Point) {
        self.flush_layout();
        let resolved = self.resolve(point);

        if let Some((slot, geometry, _)) = &resolved {
            if let Some(target) = self.link_at(*slot, geometry, point) {
                debug!(page = geometry.page, ?target, "link activated");
                self.emit(ViewerEvent::LinkClicked {
                    page: geometry.page,
                    target,
                });
                self.press = None;
                return;
            }
        }

        let hit = resolved
            .as_ref()
            .and_then(|(_, geometry, resolution)| text_position(geometry, resolution));
        if self.config.cursor_mode == CursorMode::TextSelection {
            let had_selection = self.selection.range().is_some();
            self.selection.pointer_down(hit);
            if had_selection || hit.is_some() {
                self.emit(ViewerEvent::SelectionChanged);
                self.emit(ViewerEvent::RedrawNeeded);
            }
        }

        self.press = Some(Press {
            origin: point,
            last: point,
            target: resolved.and_then(|(_, geometry, resolution)| {
                resolution.document.map(|document| (geometry.page, document))
            }),
            panning: !self.selection.is_captured(),
            moved: false,
        });
    }

    pub fn pointer_move(&mut self, point: Point) {
        let mut pan = None;
        if let Some(press) = self.press.as_mut() {
            let dx = point.x - press.origin.x;
            let dy = point.y - press.origin.y;
            if dx.hypot(dy) > self.config.hit_tolerance {
                press.moved = true;
            }
            if press.panning {
                pan = Some(Point::new(point.x - press.last.x, point.y - press.last.y));
                press.last = point;
            }
        }
        if let Some(delta) = pan {
            self.pan_by(delta);
            return;
        }
        if !self.selection.is_captured() {
            return;
        }
        self.flush_layout();
        let hit = self
            .resolve(point)
            .and_then(|(_, geometry, resolution)| text_position(&geometry, &resolution));
        if self.selection.pointer_move(hit) {
            self.emit(ViewerEvent::SelectionChanged);
            self.emit(ViewerEvent::RedrawNeeded);
        }
    }

    /// Content follows the pointer.
    fn pan_by(&mut self, delta: Point) {
        if delta.x == 0.0 && delta.y == 0.0 {
            return;
        }
        self.scroll_to(
            self.viewport.scroll_x - delta.x,
            self.viewport.scroll_y - delta.y,
        );
    }

    pub fn pointer_up(&mut self, point: Point) {
        self.pointer_move(point);
        self.selection.pointer_up();
        if let Some(Press {
            target: Some((page, document)),
            moved: false,
            ..
        }) = self.press.take()
        {
            self.emit(ViewerEvent::Click {
                page,
                point: document,
            });
        }
    }

    /// Grows the committed selection to the character under `point`. Returns whether the
    /// selection changed.
    pub fn extend_selection(&mut self, point: Point) -> bool {
        self.flush_layout();
        let Some(position) = self
            .resolve(point)
            .and_then(|(_, geometry, resolution)| text_position(&geometry, &resolution))
        else {
            return false;
        };
        let extended = self.selection.extend(position);
        if extended {
            self.emit(ViewerEvent::SelectionChanged);
            self.emit(ViewerEvent::RedrawNeeded);
        }
        extended
    }

    /// Selects the word under `point`. Returns whether a word was selected.
    pub fn double_click(&mut self, point: Point) -> bool {
        self.flush_layout();
        let Some((_, geometry, resolution)) = self.resolve(point) else {
            return false;
        };
        let Some(doc) = self.document.as_ref() else {
            return false;
        };
        let Some(native) = resolution
            .document
            .and_then(|local| doc.engine.point_to_document(geometry.page, local))
        else {
            return false;
        };
        let tolerance = self.config.hit_tolerance / self.zoom.max(f64::EPSILON);
        let Some(word) = doc
            .engine
            .word_at(geometry.page, native, tolerance, tolerance)
        else {
            return false;
        };
        let selected = self
            .selection
            .select_word(geometry.page, word.offset, word.length);
        if selected {
            self.emit(ViewerEvent::SelectionChanged);
            self.emit(ViewerEvent::RedrawNeeded);
        }
        selected
    }

    pub fn select_all(&mut self) -> Result<bool> {
        let Some(doc) = self.document.as_ref().filter(|doc| doc.page_count() > 0) else {
            return Ok(false);
        };
        let last = doc.last_page();
        let end = TextPosition::new(last, doc.engine.char_count(last)?);
        self.settle_selection(SelectionRange::spanning(TextPosition::new(0, 0), end))
    }

    pub fn select_current_page(&mut self) -> Result<bool> {
        let Some(doc) = self.document.as_ref().filter(|doc| doc.page_count() > 0) else {
            return Ok(false);
        };
        let page = self.current_page.min(doc.last_page());
        let count = doc.engine.char_count(page)?;
        self.settle_selection(SelectionRange::spanning(
            TextPosition::new(page, 0),
            TextPosition::new(page, count),
        ))
    }

    fn settle_selection(&mut self, range: SelectionRange) -> Result<bool> {
        let settled = self.selection.settle(range);
        if settled {
            self.emit(ViewerEvent::SelectionChanged);
            self.emit(ViewerEvent::RedrawNeeded);
        }
        Ok(settled)
    }

    pub fn reset_selection(&mut self) {
        let had_selection = self.selection.range().is_some();
        self.selection.reset();
        if had_selection {
            self.emit(ViewerEvent::SelectionChanged);
            self.emit(ViewerEvent::RedrawNeeded);
        }
    }

    /// `None` unless a range with an end is selected.
    pub fn selected_text(&self) -> Result<Option<String>> {
        let Some(doc) = self.document.as_ref() else {
            return Ok(None);
        };
        match self.selection.normalized() {
            Some(range) if !range.is_anchor_only() => {
                selection::selected_text(&range, doc.engine.as_ref()).map(Some)
            }
            _ => Ok(None),
        }
    }

    /// Puts the selected text on the clipboard. Returns whether anything was copied.
    pub fn copy_selection(&self, clipboard: &mut dyn Clipboard) -> Result<bool> {
        match self.selected_text()? {
            Some(text) if !text.is_empty() => {
                clipboard
                    .set_text(&text)
                    .context("failed to write selection to clipboard")?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    pub fn add_marker(&mut self, marker: Arc<dyn Marker>) -> MarkerId {
        let id = self.markers.add(marker);
        self.emit(ViewerEvent::RedrawNeeded);
        id
    }

    pub fn remove_marker(&mut self, id: MarkerId) -> bool {
        let removed = self.markers.remove(id);
        if removed {
            self.emit(ViewerEvent::RedrawNeeded);
        }
        removed
    }

    pub fn clear_markers(&mut self) {
        self.markers.clear();
        self.emit(ViewerEvent::RedrawNeeded);
    }

    /// Rebuilds the marker index immediately.
    pub fn redraw_markers(&mut self) {
        self.markers.rebuild_index(self.page_count());
        self.emit(ViewerEvent::RedrawNeeded);
    }

    pub fn markers(&self) -> &MarkerCollection {
        &self.markers
    }

    pub fn add_overlay_provider(&mut self, provider: Box<dyn OverlayProvider>) {
        self.providers.push(provider);
        self.emit(ViewerEvent::RedrawNeeded);
    }

    /// Paints every rendered frame: page bitmap, markers, selection, link outlines, border,
    /// then host providers.
    pub fn paint(&mut self, canvas: &mut dyn OverlayCanvas) {
        self.flush_layout();
        self.pump_renders();
        let page_count = self.page_count();

        let visible: Vec<(FrameGeometry, Arc<RenderImage>, Vec<FrameLink>)> = self
            .pool
            .frames()
            .iter()
            .filter_map(|frame| {
                frame
                    .bitmap()
                    .map(|bitmap| (self.geometry_of(frame), Arc::clone(bitmap), frame.links().to_vec()))
            })
            .collect();

        for (geometry, bitmap, links) in visible {
            let frame_rect = geometry.frame_rect();
            canvas.draw_page(frame_rect, &bitmap);

            for marker in self.markers.on_page(geometry.page, page_count) {
                marker.draw(&geometry, canvas);
            }

            match self.selection_region(&geometry) {
                Ok(Some(region)) if !region.is_empty() => {
                    canvas.fill_region(&region, Rgba::SELECTION)
                }
                Ok(_) => {}
                Err(err) => warn!(page = geometry.page, "selection highlight failed: {err:#}"),
            }

            if self.config.show_link_outlines {
                for link in &links {
                    canvas.stroke_rect(geometry.device_to_viewport(link.bounds), Rgba::LINK_OUTLINE, 1.0);
                }
            }
            if self.config.draw_frame_border {
                canvas.stroke_rect(frame_rect, Rgba::FRAME_BORDER, 1.0);
            }
            for provider in &self.providers {
                provider.paint(&geometry, canvas);
            }
        }
    }

    fn selection_region(&self, geometry: &FrameGeometry) -> Result<Option<Region>> {
        let Some(doc) = self.document.as_ref() else {
            return Ok(None);
        };
        let Some(range) = self.selection.normalized().filter(|range| !range.is_anchor_only())
        else {
            return Ok(None);
        };
        let page = geometry.page;
        let Some(span) = range.span_on_page(page, |page| doc.engine.char_count(page))? else {
            return Ok(None);
        };
        if span.is_empty() {
            return Ok(None);
        }
        let region: Region = doc
            .engine
            .text_rectangles(page, span.start, span.len())?
            .into_iter()
            .map(|rect| geometry.to_viewport(doc.engine.rect_from_document(page, rect)))
            .collect();
        Ok(Some(region.clipped(&geometry.frame_rect())))
    }

    pub fn view_state(&self) -> PersistedViewState {
        PersistedViewState {
            page: self.current_page,
            zoom: match self.viewport.zoom_mode {
                ZoomMode::None => self.viewport.zoom,
                _ => self.zoom,
            },
            zoom_mode: self.viewport.zoom_mode,
            display_mode: self.viewport.display_mode,
            rotation: self.viewport.rotation,
        }
    }

    pub fn restore_view_state(&mut self, state: &PersistedViewState) {
        self.viewport.zoom = self.config.clamp_zoom(state.zoom);
        self.viewport.zoom_mode = state.zoom_mode;
        self.viewport.display_mode = state.display_mode;
        self.viewport.rotation = state.rotation;
        self.invalidate_layout();
        self.flush_layout();
        self.goto_page(state.page);
    }

    pub fn apply(&mut self, command: Command) -> Result<()> {
        match command {
            Command::NextPage => self.next_page(),
            Command::PreviousPage => self.previous_page(),
            Command::GotoPage { page } => self.goto_page(page),
            Command::ZoomIn => self.zoom_in(),
            Command::ZoomOut => self.zoom_out(),
            Command::SetZoom { zoom } => self.set_zoom(zoom),
            Command::SetZoomMode { mode } => self.set_zoom_mode(mode),
            Command::RotateClockwise => self.rotate_clockwise(),
            Command::RotateCounterclockwise => self.rotate_counterclockwise(),
            Command::SetDisplayMode { mode } => self.set_display_mode(mode),
            Command::CycleDisplayMode => {
                self.set_display_mode(self.viewport.display_mode.next())
            }
            Command::SetRightToLeft { enabled } => self.set_right_to_left(enabled),
            Command::Scroll {
                action,
                orientation,
            } => self.perform_scroll(action, orientation),
            Command::ScrollTo { x, y } => self.scroll_to(x, y),
            Command::Resize { width, height } => self.resize(width, height),
            Command::SelectAll => {
                self.select_all()?;
            }
            Command::SelectCurrentPage => {
                self.select_current_page()?;
            }
            Command::ResetSelection => self.reset_selection(),
        }
        self.flush_layout();
        Ok(())
    }
}

fn text_position(geometry: &FrameGeometry, resolution: &PointerResolution) -> Option<TextPosition> {
    resolution
        .char_index
        .map(|index| TextPosition::new(geometry.page, index))
}

impl Drop for Viewer {
    fn drop(&mut self) {
        for stale in self.pool.clear() {
            self.executor.cancel(stale.slot, stale.generation);
        }
    }
}
