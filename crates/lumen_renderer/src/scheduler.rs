//! Tile scheduler: a fixed pool of workers draining a shared tile list.
//!
//! Workers lock the pending list only long enough to pop one tile, render
//! it into a private image and push the result onto the output queue. The
//! consumer polls that queue and [`RenderJob::is_finished`]; nothing blocks
//! until [`RenderJob::wait`].

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::camera::Camera;
use crate::config::RenderConfig;
use crate::error::{RenderError, RenderResult};
use crate::frame::FrameBuffer;
use crate::integrator::Integrator;
use crate::tile::{generate_tiles, render_tile, Tile, TileResult};

/// Mutex-guarded FIFO shared between threads.
pub struct SyncQueue<T> {
    items: Mutex<VecDeque<T>>,
}

impl<T> SyncQueue<T> {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
        }
    }

    pub fn push(&self, item: T) {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(item);
    }

    /// Take the oldest item, if any.
    pub fn pop(&self) -> Option<T> {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for SyncQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// State shared by the workers and the job handle.
struct Shared {
    /// Tiles not yet taken; popped from the back
    pending: Mutex<Vec<Tile>>,
    output: SyncQueue<TileResult>,
    live_workers: AtomicUsize,
    finished: AtomicBool,
}

impl Shared {
    fn next_tile(&self) -> Option<Tile> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner).pop()
    }
}

/// Marks a worker as gone when dropped, including during a panic.
/// The last worker out raises the finished flag.
struct WorkerExit<'a>(&'a Shared);

impl Drop for WorkerExit<'_> {
    fn drop(&mut self) {
        if self.0.live_workers.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.0.finished.store(true, Ordering::Release);
        }
    }
}

/// Summary returned by [`RenderJob::wait`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderStats {
    /// Tiles completed across all workers
    pub tiles_rendered: usize,
    pub workers: usize,
    pub elapsed: Duration,
}

/// Handle to a running render.
pub struct RenderJob {
    shared: Arc<Shared>,
    workers: Vec<Worker>,
    tile_count: usize,
    started: Instant,
}

impl RenderJob {
    /// True once every worker has exited. Results may still be queued.
    pub fn is_finished(&self) -> bool {
        self.shared.finished.load(Ordering::Acquire)
    }

    /// Pop one completed tile, if any is waiting.
    pub fn try_next_tile(&self) -> Option<TileResult> {
        self.shared.output.pop()
    }

    /// Queue of completed tiles.
    pub fn output(&self) -> &SyncQueue<TileResult> {
        &self.shared.output
    }

    /// Number of tiles in the frame.
    pub fn tile_count(&self) -> usize {
        self.tile_count
    }

    /// Join all workers.
    ///
    /// Returns the first worker failure, if any. Completed tiles stay in
    /// the output queue either way.
    pub fn wait(self) -> RenderResult<RenderStats> {
        let workers = self.workers.len();
        let mut tiles_rendered = 0;
        let mut first_error = None;

        for (worker, handle) in self.workers.into_iter().enumerate() {
            let outcome = match handle.join() {
                Ok(result) => result,
                Err(payload) => Err(RenderError::WorkerPanicked {
                    worker,
                    message: panic_message(payload.as_ref()),
                }),
            };

            match outcome {
                Ok(count) => tiles_rendered += count,
                Err(e) => {
                    log::error!("Render worker {worker} failed: {e}");
                    first_error.get_or_insert(e);
                }
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }

        Ok(RenderStats {
            tiles_rendered,
            workers,
            elapsed: self.started.elapsed(),
        })
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

type Worker = JoinHandle<RenderResult<usize>>;

/// Spawn `threads` workers with `spawn`.
///
/// If a spawn fails, the slots that never started are released, the
/// pending list is dropped and the workers already running are joined
/// before the error is returned.
fn spawn_workers<F>(shared: &Shared, threads: usize, mut spawn: F) -> RenderResult<Vec<Worker>>
where
    F: FnMut(usize) -> std::io::Result<Worker>,
{
    let mut workers = Vec::with_capacity(threads);
    for id in 0..threads {
        match spawn(id) {
            Ok(handle) => workers.push(handle),
            Err(e) => {
                log::error!("Failed to start render worker {id}: {e}");
                let unstarted = threads - id;
                if shared.live_workers.fetch_sub(unstarted, Ordering::AcqRel) == unstarted {
                    shared.finished.store(true, Ordering::Release);
                }
                shared.pending.lock().unwrap_or_else(PoisonError::into_inner).clear();
                for handle in workers {
                    let _ = handle.join();
                }
                return Err(e.into());
            }
        }
    }
    Ok(workers)
}

/// Start rendering the frame on `config.threads` workers and return
/// immediately.
pub fn render_parallel(
    integrator: Arc<Integrator>,
    config: &RenderConfig,
) -> RenderResult<RenderJob> {
    config.validate()?;
    let started = Instant::now();

    let camera = Arc::new(Camera::new(integrator.scene(), config.width, config.height));
    let tiles = generate_tiles(config.width, config.height, config.tile_width, config.tile_height);
    let tile_count = tiles.len();

    // Workers pop from the back, so reverse to hand out the center first
    let pending: Vec<Tile> = tiles.into_iter().rev().collect();

    let shared = Arc::new(Shared {
        pending: Mutex::new(pending),
        output: SyncQueue::new(),
        live_workers: AtomicUsize::new(config.threads),
        finished: AtomicBool::new(false),
    });

    log::info!(
        "Rendering {}x{} in {} tiles on {} workers ({} backend)",
        config.width,
        config.height,
        tile_count,
        config.threads,
        integrator.backend_name()
    );

    let (seed, gamma) = (config.seed, config.gamma);
    let workers = spawn_workers(&shared, config.threads, |id| {
        let shared = Arc::clone(&shared);
        let integrator = Arc::clone(&integrator);
        let camera = Arc::clone(&camera);

        thread::Builder::new()
            .name(format!("lumen-worker-{id}"))
            .spawn(move || -> RenderResult<usize> {
                let _exit = WorkerExit(&shared);
                let mut rendered = 0;
                while let Some(tile) = shared.next_tile() {
                    let result = render_tile(&tile, &integrator, &camera, seed, gamma)?;
                    shared.output.push(result);
                    rendered += 1;
                }
                log::debug!("Worker {id} done after {rendered} tiles");
                Ok(rendered)
            })
    })?;

    Ok(RenderJob {
        shared,
        workers,
        tile_count,
        started,
    })
}

/// Render a whole frame, compositing tiles as they arrive.
pub fn render_frame(
    integrator: Arc<Integrator>,
    config: &RenderConfig,
) -> RenderResult<FrameBuffer> {
    let job = render_parallel(integrator, config)?;
    let mut frame = FrameBuffer::new(config.width, config.height);

    loop {
        // Read the flag before draining so no late tile is missed
        let finished = job.is_finished();
        let mut drained = false;
        while let Some(result) = job.try_next_tile() {
            frame.blit(result.tile.x, result.tile.y, &result.image);
            drained = true;
        }
        if finished {
            break;
        }
        if !drained {
            thread::sleep(Duration::from_millis(2));
        }
    }

    let stats = job.wait()?;
    log::info!(
        "Rendered {} tiles in {:.2?} on {} workers",
        stats.tiles_rendered,
        stats.elapsed,
        stats.workers
    );

    Ok(frame)
}
