//! Render worker threads and the pool that owns them.
//!
//! Each worker opens its own view over the shared document bytes, pulls jobs
//! from an MPMC queue, and consults the shared cache before rendering. The
//! pool coalesces concurrent requests for the same (page, scale): callers
//! that arrive while a job is in flight join it and share the result.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;

use flume::{Receiver, Sender};
use log::{debug, error, warn};

use crate::error::SessionError;

use super::DEFAULT_QUEUE_CAPACITY;
use super::cache::{CacheKey, PageCache};
use super::rasterizer::{RasterDoc, Rasterizer, RenderFault, encode_png};
use super::request::{RenderRequest, RenderResponse};
use super::types::PageArtifact;

pub type JobResult = Result<Arc<PageArtifact>, SessionError>;

/// Receipt for a submitted job; blocks the holder until the job resolves.
pub struct JobTicket {
    rx: Receiver<JobResult>,
}

impl JobTicket {
    /// Wait for the job to complete, fail, or be cancelled.
    pub fn wait(self) -> JobResult {
        self.rx.recv().unwrap_or(Err(SessionError::Cancelled))
    }
}

struct Inflight {
    waiters: Vec<Sender<JobResult>>,
}

type InflightMap = HashMap<CacheKey, Inflight>;

/// Everything a worker thread needs; cloned per spawn so dead workers can be
/// replaced with an identical one.
#[derive(Clone)]
struct WorkerSeed {
    rasterizer: Arc<dyn Rasterizer>,
    bytes: Arc<[u8]>,
    request_rx: Receiver<RenderRequest>,
    response_tx: Sender<RenderResponse>,
    cache: Arc<Mutex<PageCache>>,
}

/// Owns the render worker threads for one open document.
///
/// The pool is built per document and terminated when the document is closed
/// or replaced; pending callers are resolved with `Cancelled` immediately at
/// termination rather than waiting out in-flight renders.
pub struct WorkerPool {
    request_tx: Mutex<Option<Sender<RenderRequest>>>,
    inflight: Arc<Mutex<Option<InflightMap>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    seed: WorkerSeed,
    num_workers: usize,
}

impl WorkerPool {
    /// Spawn `num_workers` workers (at least one) over the given document
    /// bytes. The request queue is bounded by [`DEFAULT_QUEUE_CAPACITY`].
    #[must_use]
    pub fn new(
        rasterizer: Arc<dyn Rasterizer>,
        bytes: Arc<[u8]>,
        cache: Arc<Mutex<PageCache>>,
        num_workers: usize,
    ) -> Self {
        let num_workers = num_workers.max(1);

        // Workers clone request_rx to pull from a shared queue (fan-out),
        // which is why these are flume MPMC channels rather than std mpsc.
        let (request_tx, request_rx) = flume::bounded(DEFAULT_QUEUE_CAPACITY);
        let (response_tx, response_rx) = flume::unbounded();

        let seed = WorkerSeed {
            rasterizer,
            bytes,
            request_rx,
            response_tx,
            cache,
        };

        let workers = (0..num_workers)
            .map(|_| {
                let seed = seed.clone();
                std::thread::spawn(move || render_worker(seed))
            })
            .collect();

        let inflight: Arc<Mutex<Option<InflightMap>>> =
            Arc::new(Mutex::new(Some(HashMap::new())));

        let router_inflight = Arc::clone(&inflight);
        std::thread::spawn(move || route_responses(&response_rx, &router_inflight));

        Self {
            request_tx: Mutex::new(Some(request_tx)),
            inflight,
            workers: Mutex::new(workers),
            seed,
            num_workers,
        }
    }

    /// Submit a render job for (page, scale).
    ///
    /// If a job for the same key is already in flight, the caller joins it
    /// instead of starting a duplicate render.
    pub fn submit(&self, page: u32, scale: f32) -> JobTicket {
        let key = CacheKey::new(page, scale);
        let (tx, rx) = flume::bounded(1);

        let dispatch = {
            let mut guard = self
                .inflight
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            match guard.as_mut() {
                None => {
                    let _ = tx.send(Err(SessionError::Cancelled));
                    false
                }
                Some(map) => match map.entry(key) {
                    Entry::Occupied(mut entry) => {
                        debug!("joining in-flight render for page {page} at scale {scale}");
                        entry.get_mut().waiters.push(tx);
                        false
                    }
                    Entry::Vacant(slot) => {
                        slot.insert(Inflight { waiters: vec![tx] });
                        true
                    }
                },
            }
        };

        if dispatch {
            self.ensure_workers();
            let sender = self
                .request_tx
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone();
            let sent = match sender {
                Some(sender) => sender.send(RenderRequest::Render { key }).is_ok(),
                None => false,
            };
            if !sent {
                self.resolve(key, || Err(SessionError::Cancelled));
            }
        }

        JobTicket { rx }
    }

    /// Cancel all pending jobs and shut the workers down.
    ///
    /// Pending callers receive `Cancelled` immediately; a worker that is mid
    /// render finishes that render (its result is dropped) and exits once the
    /// queue drains. Termination never blocks on a wedged render.
    pub fn terminate(&self) {
        let taken = self
            .inflight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(map) = taken {
            let pending = map.len();
            if pending > 0 {
                debug!("cancelling {pending} in-flight render jobs");
            }
            for (_, inflight) in map {
                for tx in inflight.waiters {
                    let _ = tx.send(Err(SessionError::Cancelled));
                }
            }
        }

        let sender = self
            .request_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(sender) = sender {
            for _ in 0..self.num_workers {
                // Best effort: a full queue is fine, dropping the sender
                // below disconnects the channel and ends the workers anyway.
                let _ = sender.try_send(RenderRequest::Shutdown);
            }
        }
    }

    /// Replace any worker thread that exited outside of shutdown, so the
    /// next dispatched job never lands on a dead worker.
    fn ensure_workers(&self) {
        let mut workers = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
        for slot in workers.iter_mut() {
            if slot.is_finished() {
                warn!("render worker exited unexpectedly; respawning");
                let seed = self.seed.clone();
                let fresh = std::thread::spawn(move || render_worker(seed));
                let dead = std::mem::replace(slot, fresh);
                let _ = dead.join();
            }
        }
    }

    fn resolve(&self, key: CacheKey, result: impl Fn() -> JobResult) {
        let waiters = {
            let mut guard = self
                .inflight
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            guard
                .as_mut()
                .and_then(|map| map.remove(&key))
                .map(|inflight| inflight.waiters)
        };
        if let Some(waiters) = waiters {
            for tx in waiters {
                let _ = tx.send(result());
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.terminate();
    }
}

/// Fan completed jobs out to every caller that joined them. Results arriving
/// after termination find no in-flight entry and are dropped.
fn route_responses(response_rx: &Receiver<RenderResponse>, inflight: &Mutex<Option<InflightMap>>) {
    for response in response_rx.iter() {
        let (key, outcome) = match response {
            RenderResponse::Page { key, artifact } => (key, Ok(artifact)),
            RenderResponse::Failed { key, fault } => (key, Err(fault.to_string())),
        };

        let waiters = {
            let mut guard = inflight.lock().unwrap_or_else(PoisonError::into_inner);
            guard
                .as_mut()
                .and_then(|map| map.remove(&key))
                .map(|entry| entry.waiters)
        };

        let Some(waiters) = waiters else { continue };
        for tx in waiters {
            let result = match &outcome {
                Ok(artifact) => Ok(Arc::clone(artifact)),
                Err(detail) => Err(SessionError::Render {
                    page: key.page,
                    detail: detail.clone(),
                }),
            };
            let _ = tx.send(result);
        }
    }
}

/// Main worker function - runs in a dedicated thread.
fn render_worker(seed: WorkerSeed) {
    // The session validated the document at open time, so a failing (or
    // panicking) open here is rare. Either way the worker must keep
    // draining the queue so callers fail fast instead of hanging on a job
    // nobody will ever service.
    let opened =
        std::panic::catch_unwind(AssertUnwindSafe(|| seed.rasterizer.open(&seed.bytes)));
    let doc = match opened {
        Ok(Ok(doc)) => doc,
        Ok(Err(e)) => {
            error!("worker could not open document: {e}");
            fail_pending(&seed, &format!("document unavailable in worker: {e}"));
            return;
        }
        Err(_) => {
            error!("rasterizer panicked while opening document in worker");
            fail_pending(&seed, "rasterizer panicked while opening document");
            return;
        }
    };

    for request in seed.request_rx.iter() {
        match request {
            RenderRequest::Render { key } => {
                handle_render(doc.as_ref(), key, &seed.cache, &seed.response_tx);
            }
            RenderRequest::Shutdown => break,
        }
    }
}

/// Drain the request queue on behalf of a worker that has no document,
/// answering every job with a failure until shutdown.
fn fail_pending(seed: &WorkerSeed, detail: &str) {
    for request in seed.request_rx.iter() {
        match request {
            RenderRequest::Render { key } => {
                let _ = seed.response_tx.send(RenderResponse::Failed {
                    key,
                    fault: RenderFault::decode(detail),
                });
            }
            RenderRequest::Shutdown => break,
        }
    }
}

fn handle_render(
    doc: &dyn RasterDoc,
    key: CacheKey,
    cache: &Mutex<PageCache>,
    responses: &Sender<RenderResponse>,
) {
    let cached = cache
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .get(&key);
    if let Some(artifact) = cached {
        let _ = responses.send(RenderResponse::Page { key, artifact });
        return;
    }

    match render_page(doc, key) {
        Ok(artifact) => {
            let artifact = cache
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(key, artifact);
            let _ = responses.send(RenderResponse::Page { key, artifact });
        }
        Err(fault) => {
            let _ = responses.send(RenderResponse::Failed { key, fault });
        }
    }
}

/// Render a single page and encode it as PNG.
///
/// A panicking rasterizer is contained here so it poisons nothing outside
/// the job that triggered it.
pub fn render_page(doc: &dyn RasterDoc, key: CacheKey) -> Result<PageArtifact, RenderFault> {
    let page_index = (key.page.saturating_sub(1)) as usize;
    let scale = key.scale();

    let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| doc.rasterize(page_index, scale)));
    let buffer = match outcome {
        Ok(result) => result?,
        Err(_) => {
            return Err(RenderFault::generic(format!(
                "rasterizer panicked on page {}",
                key.page
            )));
        }
    };

    let png = encode_png(&buffer)?;
    Ok(PageArtifact {
        page_number: key.page,
        width: buffer.width,
        height: buffer.height,
        scale,
        png,
    })
}
