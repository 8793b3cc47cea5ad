//! Render execution. Jobs are built on the viewer thread, run wherever the executor decides,
//! and their outcomes are handed back through [`RenderExecutor::poll`].

use std::collections::{HashSet, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result};
use flume::{Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::engine::{DocumentEngine, RenderRequest};
use crate::error::RenderFault;
use crate::frames::{FrameLink, RenderedPage};
use crate::geometry::{bounds_to_device, Size};

pub struct RenderJob {
    pub engine: Arc<dyn DocumentEngine>,
    pub slot: usize,
    pub generation: u64,
    pub request: RenderRequest,
    /// Frame size in device pixels (not oversampled), used to place link regions.
    pub frame_size: Size,
    pub page_size: Size,
}

impl std::fmt::Debug for RenderJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderJob")
            .field("slot", &self.slot)
            .field("generation", &self.generation)
            .field("request", &self.request)
            .finish()
    }
}

impl RenderJob {
    pub fn key(&self) -> (usize, u64) {
        (self.slot, self.generation)
    }

    pub fn run(&self) -> Result<RenderedPage, RenderFault> {
        let page = self.request.page_index;
        let image = self
            .engine
            .render(&self.request)
            .map_err(|err| RenderFault::engine(page, &err))?;

        let links = match self.engine.links(page) {
            Ok(regions) => regions
                .into_iter()
                .map(|region| {
                    let local = self.engine.rect_from_document(page, region.bounds);
                    FrameLink {
                        bounds: bounds_to_device(
                            self.request.rotation,
                            self.frame_size,
                            self.page_size,
                            local,
                        ),
                        target: region.target,
                    }
                })
                .collect(),
            Err(err) => {
                warn!(page, "failed to read page links: {err:#}");
                Vec::new()
            }
        };

        Ok(RenderedPage { image, links })
    }
}

#[derive(Debug)]
pub struct RenderOutcome {
    pub slot: usize,
    pub page: usize,
    pub generation: u64,
    pub result: Result<RenderedPage, RenderFault>,
}

impl RenderOutcome {
    fn from_job(job: &RenderJob, result: Result<RenderedPage, RenderFault>) -> Self {
        Self {
            slot: job.slot,
            page: job.request.page_index,
            generation: job.generation,
            result,
        }
    }
}

pub trait RenderExecutor: Send {
    fn submit(&self, job: RenderJob);

    /// Best effort; the pool drops stale outcomes regardless.
    fn cancel(&self, slot: usize, generation: u64);

    /// Outcomes that are ready, without blocking.
    fn poll(&self) -> Vec<RenderOutcome>;

    /// Blocks up to `timeout` for the next outcome.
    fn wait(&self, timeout: Duration) -> Option<RenderOutcome>;
}

/// Renders on the submitting thread.
#[derive(Default)]
pub struct InlineExecutor {
    ready: Mutex<VecDeque<RenderOutcome>>,
}

impl InlineExecutor {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RenderExecutor for InlineExecutor {
    fn submit(&self, job: RenderJob) {
        let result = job.run();
        self.ready
            .lock()
            .push_back(RenderOutcome::from_job(&job, result));
    }

    fn cancel(&self, slot: usize, generation: u64) {
        self.ready
            .lock()
            .retain(|outcome| (outcome.slot, outcome.generation) != (slot, generation));
    }

    fn poll(&self) -> Vec<RenderOutcome> {
        self.ready.lock().drain(..).collect()
    }

    fn wait(&self, _timeout: Duration) -> Option<RenderOutcome> {
        self.ready.lock().pop_front()
    }
}

enum WorkerMessage {
    Render(RenderJob),
    Shutdown,
}

/// Fixed pool of render threads pulling from one shared queue.
pub struct WorkerExecutor {
    jobs: Sender<WorkerMessage>,
    outcomes: Receiver<RenderOutcome>,
    cancelled: Arc<Mutex<HashSet<(usize, u64)>>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerExecutor {
    pub fn new(worker_count: usize) -> Result<Self> {
        let (jobs, job_rx) = flume::unbounded();
        let (outcome_tx, outcomes) = flume::unbounded();
        let cancelled = Arc::new(Mutex::new(HashSet::new()));

        let mut workers = Vec::with_capacity(worker_count.max(1));
        for index in 0..worker_count.max(1) {
            let rx = job_rx.clone();
            let tx = outcome_tx.clone();
            let cancelled = Arc::clone(&cancelled);
            let handle = thread::Builder::new()
                .name(format!("pdfpane-render-{index}"))
                .spawn(move || render_worker(rx, tx, cancelled))
                .with_context(|| format!("failed to spawn render worker {index}"))?;
            workers.push(handle);
        }
        debug!(workers = workers.len(), "render workers started");

        Ok(Self {
            jobs,
            outcomes,
            cancelled,
            workers,
        })
    }

    fn settle(&self, outcome: &RenderOutcome) {
        self.cancelled
            .lock()
            .remove(&(outcome.slot, outcome.generation));
    }
}

impl RenderExecutor for WorkerExecutor {
    fn submit(&self, job: RenderJob) {
        debug!(slot = job.slot, page = job.request.page_index, "render dispatched");
        if self.jobs.send(WorkerMessage::Render(job)).is_err() {
            warn!("render workers are gone, job dropped");
        }
    }

    fn cancel(&self, slot: usize, generation: u64) {
        self.cancelled.lock().insert((slot, generation));
    }

    fn poll(&self) -> Vec<RenderOutcome> {
        let ready: Vec<RenderOutcome> = self.outcomes.try_iter().collect();
        for outcome in &ready {
            self.settle(outcome);
        }
        ready
    }

    fn wait(&self, timeout: Duration) -> Option<RenderOutcome> {
        let outcome = self.outcomes.recv_timeout(timeout).ok()?;
        self.settle(&outcome);
        Some(outcome)
    }
}

impl Drop for WorkerExecutor {
    fn drop(&mut self) {
        for _ in 0..self.workers.len() {
            let _ = self.jobs.send(WorkerMessage::Shutdown);
        }
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                warn!("render worker panicked during shutdown");
            }
        }
    }
}

fn render_worker(
    jobs: Receiver<WorkerMessage>,
    outcomes: Sender<RenderOutcome>,
    cancelled: Arc<Mutex<HashSet<(usize, u64)>>>,
) {
    for message in jobs {
        let job = match message {
            WorkerMessage::Render(job) => job,
            WorkerMessage::Shutdown => break,
        };
        if cancelled.lock().remove(&job.key()) {
            debug!(slot = job.slot, "skipping cancelled render");
            continue;
        }

        let result = panic::catch_unwind(AssertUnwindSafe(|| job.run())).unwrap_or_else(|payload| {
            let detail = payload
                .downcast_ref::<&str>()
                .map(|text| (*text).to_owned())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "render panicked".to_owned());
            Err(RenderFault::Worker { detail })
        });

        if outcomes.send(RenderOutcome::from_job(&job, result)).is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{LinkRegion, LinkTarget, RenderFlags};
    use crate::geometry::{Rect, Rotation};
    use crate::test_support::FakeEngine;

    fn job(engine: &Arc<FakeEngine>, slot: usize, generation: u64) -> RenderJob {
        let page_size = Size::new(200.0, 400.0);
        RenderJob {
            engine: Arc::clone(engine) as Arc<dyn DocumentEngine>,
            slot,
            generation,
            request: RenderRequest {
                page_index: slot,
                width_px: 240,
                height_px: 480,
                dpi_x: 96.0,
                dpi_y: 96.0,
                rotation: Rotation::Rotate0,
                flags: RenderFlags::default(),
            },
            frame_size: page_size,
            page_size,
        }
    }

    #[test]
    fn inline_executor_runs_on_submit() {
        let engine = Arc::new(FakeEngine::uniform(3, Size::new(200.0, 400.0)));
        let executor = InlineExecutor::new();
        executor.submit(job(&engine, 1, 7));
        assert_eq!(engine.render_count(), 1);

        let outcomes = executor.poll();
        assert_eq!(outcomes.len(), 1);
        assert_eq!((outcomes[0].slot, outcomes[0].generation), (1, 7));
        let rendered = outcomes[0].result.as_ref().unwrap();
        assert_eq!((rendered.image.width, rendered.image.height), (240, 480));
        assert!(executor.poll().is_empty());
    }

    #[test]
    fn engine_failure_becomes_fault() {
        let engine = Arc::new(FakeEngine::uniform(3, Size::new(200.0, 400.0)));
        engine.fail_page(2);
        let executor = InlineExecutor::new();
        executor.submit(job(&engine, 2, 1));
        let outcome = executor.wait(Duration::ZERO).unwrap();
        assert!(matches!(
            outcome.result,
            Err(RenderFault::Engine { page: 2, .. })
        ));
    }

    #[test]
    fn links_are_mapped_into_frame_space() {
        let engine = Arc::new(
            FakeEngine::uniform(1, Size::new(200.0, 400.0)).with_link(
                0,
                LinkRegion {
                    bounds: Rect::new(10.0, 390.0, 60.0, 370.0),
                    target: LinkTarget::Page { page: 0 },
                },
            ),
        );
        let rendered = job(&engine, 0, 1).run().unwrap();
        assert_eq!(rendered.links.len(), 1);
        assert_eq!(rendered.links[0].bounds, Rect::new(10.0, 10.0, 60.0, 30.0));
    }

    #[test]
    fn worker_executor_skips_cancelled_jobs() {
        let engine = Arc::new(FakeEngine::uniform(3, Size::new(200.0, 400.0)));
        let executor = WorkerExecutor::new(1).unwrap();
        executor.cancel(0, 1);
        executor.submit(job(&engine, 0, 1));
        executor.submit(job(&engine, 1, 2));

        let outcome = executor.wait(Duration::from_secs(5)).unwrap();
        assert_eq!((outcome.slot, outcome.generation), (1, 2));
        assert!(outcome.result.is_ok());
        assert_eq!(engine.rendered_pages(), vec![1]);
    }

    #[test]
    fn worker_executor_fans_out_jobs() {
        let engine = Arc::new(FakeEngine::uniform(3, Size::new(200.0, 400.0)));
        let executor = WorkerExecutor::new(2).unwrap();
        for slot in 0..3 {
            executor.submit(job(&engine, slot, slot as u64 + 10));
        }
        let mut slots: Vec<usize> = (0..3)
            .filter_map(|_| executor.wait(Duration::from_secs(5)))
            .map(|outcome| outcome.slot)
            .collect();
        slots.sort_unstable();
        assert_eq!(slots, vec![0, 1, 2]);
    }
}
