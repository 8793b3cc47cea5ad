//! Page frames and the pool that virtualizes them.
//!
//! A frame is one laid-out slot. Only frames that intersect the viewport (or that are active in
//! a paged mode) hold a bitmap; everything else sits `Empty`. Every release or rebuild moves a
//! frame to a fresh generation so late render outcomes can be recognised and dropped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::engine::{LinkTarget, RenderImage};
use crate::error::RenderFault;
use crate::geometry::{Rect, Rotation, Size};

static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

fn next_generation() -> u64 {
    NEXT_GENERATION.fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RasterState {
    #[default]
    Empty,
    Rendering,
    Rendered,
}

/// Link hot-spot in frame-local device pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameLink {
    pub bounds: Rect,
    pub target: LinkTarget,
}

/// Raster plus the link regions gathered alongside it.
#[derive(Debug, Clone)]
pub struct RenderedPage {
    pub image: RenderImage,
    pub links: Vec<FrameLink>,
}

#[derive(Debug, Clone)]
pub struct PageFrame {
    pub slot: usize,
    pub page: usize,
    /// Unrotated page size in points.
    pub page_size: Size,
    /// Frame size in device pixels, rotation applied.
    pub size: Size,
    /// Placement in content coordinates.
    pub bounds: Rect,
    pub rotation: Rotation,
    state: RasterState,
    bitmap: Option<Arc<RenderImage>>,
    links: Vec<FrameLink>,
    generation: u64,
}

impl PageFrame {
    pub fn state(&self) -> RasterState {
        self.state
    }

    pub fn bitmap(&self) -> Option<&Arc<RenderImage>> {
        self.bitmap.as_ref()
    }

    pub fn links(&self) -> &[FrameLink] {
        &self.links
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_loaded(&self) -> bool {
        !matches!(self.state, RasterState::Empty)
    }

    /// Half-open overlap test along the vertical scroll axis.
    pub fn intersects_window(&self, start: f64, extent: f64) -> bool {
        self.bounds.top < start + extent && self.bounds.bottom > start
    }

    fn drop_raster(&mut self) {
        self.bitmap = None;
        self.links.clear();
        self.state = RasterState::Empty;
        self.generation = next_generation();
    }
}

/// Everything a rebuild needs to know about one slot.
#[derive(Debug, Clone, Copy)]
pub struct FrameSpec {
    pub page: usize,
    pub page_size: Size,
    pub size: Size,
    pub bounds: Rect,
}

/// A render that was in flight when its frame went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaleJob {
    pub slot: usize,
    pub generation: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcilePass {
    /// Slots that moved to `Rendering` and need a job submitted.
    pub to_render: Vec<usize>,
    pub released: Vec<usize>,
    pub cancelled: Vec<StaleJob>,
    /// Page of the first visible frame.
    pub first_visible: Option<usize>,
    /// Page of the last frame requested in this pass, or of the last visible frame when
    /// nothing new was requested.
    pub last_visible: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    Applied,
    /// The frame moved on since the job was submitted.
    Stale,
    Failed(RenderFault),
}

#[derive(Debug, Default)]
pub struct FramePool {
    frames: Vec<PageFrame>,
}

impl FramePool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames(&self) -> &[PageFrame] {
        &self.frames
    }

    pub fn frame(&self, slot: usize) -> Option<&PageFrame> {
        self.frames.get(slot)
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn slot_for_page(&self, page: usize) -> Option<usize> {
        self.frames.iter().position(|frame| frame.page == page)
    }

    /// Replaces the frame set. Bitmaps are dropped; in-flight jobs come back for cancellation.
    pub fn rebuild(&mut self, specs: &[FrameSpec], rotation: Rotation) -> Vec<StaleJob> {
        let cancelled = self.in_flight();
        self.frames = specs
            .iter()
            .enumerate()
            .map(|(slot, spec)| PageFrame {
                slot,
                page: spec.page,
                page_size: spec.page_size,
                size: spec.size,
                bounds: spec.bounds,
                rotation,
                state: RasterState::Empty,
                bitmap: None,
                links: Vec::new(),
                generation: next_generation(),
            })
            .collect();
        debug!(frames = self.frames.len(), "frame pool rebuilt");
        cancelled
    }

    /// Whether the pool already holds these pages at these device sizes.
    pub fn holds(&self, specs: &[FrameSpec], rotation: Rotation) -> bool {
        self.frames.len() == specs.len()
            && self.frames.iter().zip(specs).all(|(frame, spec)| {
                frame.page == spec.page && frame.size == spec.size && frame.rotation == rotation
            })
    }

    /// Moves frames to new positions without touching their rasters. Used when only the
    /// placement changed (resize without a zoom change).
    pub fn reposition(&mut self, bounds: &[Rect]) {
        for (frame, rect) in self.frames.iter_mut().zip(bounds) {
            frame.bounds = *rect;
        }
    }

    pub fn clear(&mut self) -> Vec<StaleJob> {
        let cancelled = self.in_flight();
        self.frames.clear();
        cancelled
    }

    /// Continuous-mode visibility pass over the vertical window `[start, start + extent)`.
    pub fn reconcile(&mut self, start: f64, extent: f64) -> ReconcilePass {
        let mut pass = ReconcilePass::default();
        let mut last_seen = None;

        for frame in &mut self.frames {
            let visible = frame.intersects_window(start, extent);
            if visible {
                pass.first_visible.get_or_insert(frame.page);
                last_seen = Some(frame.page);
                if frame.state == RasterState::Empty {
                    frame.state = RasterState::Rendering;
                    pass.to_render.push(frame.slot);
                    pass.last_visible = Some(frame.page);
                }
            } else if frame.is_loaded() {
                if frame.state == RasterState::Rendering {
                    pass.cancelled.push(StaleJob {
                        slot: frame.slot,
                        generation: frame.generation,
                    });
                }
                frame.drop_raster();
                pass.released.push(frame.slot);
            }
        }

        if pass.last_visible.is_none() {
            pass.last_visible = last_seen;
        }
        pass
    }

    /// Paged-mode pass: every frame is active and must hold a raster.
    pub fn activate_all(&mut self) -> ReconcilePass {
        let mut pass = ReconcilePass::default();
        for frame in &mut self.frames {
            pass.first_visible.get_or_insert(frame.page);
            pass.last_visible = Some(frame.page);
            if frame.state == RasterState::Empty {
                frame.state = RasterState::Rendering;
                pass.to_render.push(frame.slot);
            }
        }
        pass
    }

    /// Applies a render outcome if the frame is still waiting for exactly this job.
    pub fn complete(
        &mut self,
        slot: usize,
        generation: u64,
        outcome: Result<RenderedPage, RenderFault>,
    ) -> Completion {
        let Some(frame) = self.frames.get_mut(slot) else {
            return Completion::Stale;
        };
        if frame.generation != generation || frame.state != RasterState::Rendering {
            return Completion::Stale;
        }
        match outcome {
            Ok(rendered) => {
                frame.bitmap = Some(Arc::new(rendered.image));
                frame.links = rendered.links;
                frame.state = RasterState::Rendered;
                Completion::Applied
            }
            Err(fault) => {
                frame.drop_raster();
                Completion::Failed(fault)
            }
        }
    }

    /// Drops the raster of one frame. Returns the in-flight job if there was one.
    pub fn release(&mut self, slot: usize) -> Option<StaleJob> {
        let frame = self.frames.get_mut(slot)?;
        let stale = (frame.state == RasterState::Rendering).then_some(StaleJob {
            slot,
            generation: frame.generation,
        });
        if frame.is_loaded() {
            frame.drop_raster();
        }
        stale
    }

    pub fn rendering_count(&self) -> usize {
        self.frames
            .iter()
            .filter(|frame| frame.state == RasterState::Rendering)
            .count()
    }

    fn in_flight(&self) -> Vec<StaleJob> {
        self.frames
            .iter()
            .filter(|frame| frame.state == RasterState::Rendering)
            .map(|frame| StaleJob {
                slot: frame.slot,
                generation: frame.generation,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Point;
    use proptest::prelude::*;

    const FRAME_HEIGHT: f64 = 100.0;
    const PITCH: f64 = 110.0;

    fn stacked(count: usize) -> Vec<FrameSpec> {
        (0..count)
            .map(|page| FrameSpec {
                page,
                page_size: Size::new(80.0, 100.0),
                size: Size::new(80.0, FRAME_HEIGHT),
                bounds: Rect::from_origin_size(
                    Point::new(5.0, 5.0 + page as f64 * PITCH),
                    Size::new(80.0, FRAME_HEIGHT),
                ),
            })
            .collect()
    }

    fn rendered(page: usize) -> Result<RenderedPage, RenderFault> {
        Ok(RenderedPage {
            image: RenderImage {
                width: 1,
                height: 1,
                pixels: vec![page as u8; 4],
            },
            links: Vec::new(),
        })
    }

    fn finish_all(pool: &mut FramePool, slots: &[usize]) {
        for &slot in slots {
            let generation = pool.frame(slot).unwrap().generation();
            let page = pool.frame(slot).unwrap().page;
            assert_eq!(pool.complete(slot, generation, rendered(page)), Completion::Applied);
        }
    }

    fn loaded_pages(pool: &FramePool) -> Vec<usize> {
        pool.frames()
            .iter()
            .filter(|frame| frame.is_loaded())
            .map(|frame| frame.page)
            .collect()
    }

    #[test]
    fn scrolling_one_page_swaps_one_frame() {
        let mut pool = FramePool::new();
        pool.rebuild(&stacked(10), Rotation::Rotate0);

        let pass = pool.reconcile(3.0 * PITCH + 10.0, 2.0 * PITCH);
        assert_eq!(pass.to_render, vec![3, 4, 5]);
        assert_eq!(pass.first_visible, Some(3));
        assert_eq!(pass.last_visible, Some(5));
        finish_all(&mut pool, &pass.to_render);

        let pass = pool.reconcile(4.0 * PITCH + 10.0, 2.0 * PITCH);
        assert_eq!(pass.released, vec![3]);
        assert_eq!(pass.to_render, vec![6]);
        assert!(pass.cancelled.is_empty());
        assert_eq!(loaded_pages(&pool), vec![4, 5, 6]);
    }

    #[test]
    fn last_visible_falls_back_when_nothing_new_renders() {
        let mut pool = FramePool::new();
        pool.rebuild(&stacked(10), Rotation::Rotate0);
        let pass = pool.reconcile(0.0, 250.0);
        finish_all(&mut pool, &pass.to_render);

        let pass = pool.reconcile(0.0, 250.0);
        assert!(pass.to_render.is_empty());
        assert_eq!(pass.first_visible, Some(0));
        assert_eq!(pass.last_visible, Some(2));
    }

    #[test]
    fn reposition_keeps_rasters_of_held_pages() {
        let mut pool = FramePool::new();
        let specs = stacked(3);
        pool.rebuild(&specs, Rotation::Rotate0);
        let pass = pool.reconcile(0.0, 3.0 * PITCH);
        finish_all(&mut pool, &pass.to_render);

        assert!(pool.holds(&specs, Rotation::Rotate0));
        assert!(!pool.holds(&specs, Rotation::Rotate90));
        assert!(!pool.holds(&stacked(2), Rotation::Rotate0));

        let moved: Vec<Rect> = specs.iter().map(|spec| spec.bounds.translate(40.0, 0.0)).collect();
        pool.reposition(&moved);
        assert_eq!(pool.frame(1).unwrap().bounds, moved[1]);
        assert_eq!(loaded_pages(&pool), vec![0, 1, 2]);
        assert!(pool.reconcile(0.0, 3.0 * PITCH).to_render.is_empty());
    }

    #[test]
    fn rendering_frame_is_not_submitted_twice() {
        let mut pool = FramePool::new();
        pool.rebuild(&stacked(4), Rotation::Rotate0);
        let first = pool.reconcile(0.0, 150.0);
        assert_eq!(first.to_render, vec![0, 1]);

        let second = pool.reconcile(0.0, 150.0);
        assert!(second.to_render.is_empty());
        assert_eq!(pool.rendering_count(), 2);
    }

    #[test]
    fn stale_outcome_is_discarded() {
        let mut pool = FramePool::new();
        pool.rebuild(&stacked(4), Rotation::Rotate0);
        pool.reconcile(0.0, 50.0);
        let old_generation = pool.frame(0).unwrap().generation();

        let released = pool.reconcile(400.0, 50.0);
        assert_eq!(
            released.cancelled,
            vec![StaleJob {
                slot: 0,
                generation: old_generation
            }]
        );
        assert_eq!(
            pool.complete(0, old_generation, rendered(0)),
            Completion::Stale
        );
        assert!(pool.frame(0).unwrap().bitmap().is_none());

        pool.reconcile(0.0, 50.0);
        assert_eq!(
            pool.complete(0, old_generation, rendered(0)),
            Completion::Stale
        );
        assert_eq!(pool.frame(0).unwrap().state(), RasterState::Rendering);
    }

    #[test]
    fn failure_returns_frame_to_empty_for_retry() {
        let mut pool = FramePool::new();
        pool.rebuild(&stacked(2), Rotation::Rotate0);
        pool.reconcile(0.0, 50.0);
        let generation = pool.frame(0).unwrap().generation();

        let completion = pool.complete(
            0,
            generation,
            Err(RenderFault::Engine {
                page: 0,
                detail: "broken".to_owned(),
            }),
        );
        assert!(matches!(completion, Completion::Failed(_)));
        assert_eq!(pool.frame(0).unwrap().state(), RasterState::Empty);

        let retry = pool.reconcile(0.0, 50.0);
        assert_eq!(retry.to_render, vec![0]);
    }

    #[test]
    fn rebuild_cancels_in_flight_jobs() {
        let mut pool = FramePool::new();
        pool.rebuild(&stacked(3), Rotation::Rotate0);
        pool.reconcile(0.0, 500.0);
        let cancelled = pool.rebuild(&stacked(3), Rotation::Rotate90);
        assert_eq!(cancelled.len(), 3);
        assert!(pool.frames().iter().all(|frame| !frame.is_loaded()));
        assert!(pool
            .frames()
            .iter()
            .all(|frame| frame.rotation == Rotation::Rotate90));
    }

    #[test]
    fn release_reports_in_flight_job_only() {
        let mut pool = FramePool::new();
        pool.rebuild(&stacked(2), Rotation::Rotate0);
        pool.activate_all();
        let generation = pool.frame(1).unwrap().generation();
        assert_eq!(
            pool.release(1),
            Some(StaleJob {
                slot: 1,
                generation
            })
        );
        assert_eq!(pool.release(1), None);
        assert_ne!(pool.frame(1).unwrap().generation(), generation);
    }

    proptest! {
        #[test]
        fn loaded_frames_match_visible_frames(
            windows in prop::collection::vec((0.0f64..1200.0, 1.0f64..400.0), 1..12),
            complete_mask in prop::collection::vec(any::<bool>(), 12),
        ) {
            let mut pool = FramePool::new();
            pool.rebuild(&stacked(10), Rotation::Rotate0);
            for (step, (start, extent)) in windows.iter().enumerate() {
                let pass = pool.reconcile(*start, *extent);
                if complete_mask[step] {
                    finish_all(&mut pool, &pass.to_render);
                }
                let visible: Vec<usize> = pool
                    .frames()
                    .iter()
                    .filter(|frame| frame.intersects_window(*start, *extent))
                    .map(|frame| frame.page)
                    .collect();
                prop_assert_eq!(loaded_pages(&pool), visible);
            }
        }
    }
}
