//! The document session: owner of the single currently open document.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use log::{debug, info, warn};

use crate::config::{BatchErrorPolicy, MaterializePolicy, SessionConfig};
use crate::error::SessionError;
use crate::render::{CacheKey, PageArtifact, PageCache, Rasterizer, WorkerPool};

use super::materialize::{MaterializeReport, Materializer};
use super::state::{Command, Effect, Phase, SessionState};

/// Scales below this render illegibly small pages; requests are clamped the
/// same way regardless of entry point so cache keys stay consistent.
pub const MIN_SCALE: f32 = 0.1;

/// Metadata returned by a successful open.
#[derive(Clone, Debug)]
pub struct DocumentInfo {
    pub page_count: u32,
    /// Basename of the source path.
    pub file_name: String,
    pub generation: u64,
}

/// Identity of a loaded document.
///
/// Handles are snapshots: once the document is closed or replaced, operations
/// through an old handle fail with `StaleSession`.
#[derive(Clone, Debug)]
pub struct DocumentHandle {
    pub path: PathBuf,
    pub page_count: u32,
    /// Basename of the source path.
    pub display_name: String,
    /// Monotonic tag distinguishing successive open documents.
    pub generation: u64,
}

/// Everything owned on behalf of the currently open document. Dropped as a
/// unit on close/replace, which is what makes stale artifacts unreachable.
struct OpenDocument {
    handle: DocumentHandle,
    pool: Arc<WorkerPool>,
    cache: Arc<Mutex<PageCache>>,
    materializer: Materializer,
    /// Scale (in millionths) the on-disk artifacts were rendered at, if any.
    materialized_scale: Option<u32>,
    background: Option<JoinHandle<()>>,
}

impl OpenDocument {
    /// Cancel everything tied to this document and delete its artifacts.
    fn release(mut self) {
        self.materializer.cancel();
        self.pool.terminate();
        if let Some(task) = self.background.take() {
            // Bounded: terminating the pool resolves the task's pending
            // waits with Cancelled, so it exits promptly.
            if task.join().is_err() {
                warn!("background materialization task panicked");
            }
        }
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .invalidate_all();
        if let Err(e) = self.materializer.cleanup() {
            warn!("failed to clean up materialized pages: {e}");
        }
        debug!("released document generation {}", self.handle.generation);
    }
}

struct Inner {
    state: SessionState,
    current: Option<OpenDocument>,
}

/// Top-level state machine owning the currently loaded document, its cache,
/// worker pool, and materialized artifacts.
///
/// Exactly one document is open at a time. `get_page` calls for different
/// pages of a Ready document may run concurrently; open/close/replace are
/// serialized through the phase machine, and an `open_document` overlapping
/// another fails with `Busy`.
pub struct DocumentSession {
    rasterizer: Arc<dyn Rasterizer>,
    config: SessionConfig,
    inner: Mutex<Inner>,
    generation: AtomicU64,
}

impl DocumentSession {
    #[must_use]
    pub fn new(rasterizer: Arc<dyn Rasterizer>, config: SessionConfig) -> Self {
        Self {
            rasterizer,
            config,
            inner: Mutex::new(Inner {
                state: SessionState::new(),
                current: None,
            }),
            generation: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn with_defaults(rasterizer: Arc<dyn Rasterizer>) -> Self {
        Self::new(rasterizer, SessionConfig::default())
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        self.lock_inner().state.phase()
    }

    /// Handle for the currently open document.
    pub fn handle(&self) -> Result<DocumentHandle, SessionError> {
        self.lock_inner()
            .current
            .as_ref()
            .map(|doc| doc.handle.clone())
            .ok_or(SessionError::NoDocument)
    }

    /// Open the document at `path`, replacing any previously open one.
    ///
    /// The previous document's jobs are cancelled and its artifacts deleted
    /// before the new file is read. On any failure the session ends with no
    /// document loaded. Returns `Busy` if another open or close is already
    /// in flight.
    pub fn open_document(&self, path: impl AsRef<Path>) -> Result<DocumentInfo, SessionError> {
        let path = path.as_ref();

        {
            let mut inner = self.lock_inner();
            let effects = inner.state.apply(Command::BeginOpen)?;
            for effect in effects {
                match effect {
                    Effect::ReleaseDocument => {
                        if let Some(old) = inner.current.take() {
                            old.release();
                        }
                    }
                }
            }
        }

        match self.load_document(path) {
            Ok(doc) => {
                let mut inner = self.lock_inner();
                if inner.state.phase() != Phase::Loading {
                    // Closed while we were loading; do not resurrect.
                    drop(inner);
                    doc.release();
                    return Err(SessionError::Cancelled);
                }
                let info = DocumentInfo {
                    page_count: doc.handle.page_count,
                    file_name: doc.handle.display_name.clone(),
                    generation: doc.handle.generation,
                };
                inner.current = Some(doc);
                let _ = inner.state.apply(Command::OpenSucceeded);
                info!(
                    "opened {:?}: {} pages (generation {})",
                    path, info.page_count, info.generation
                );
                Ok(info)
            }
            Err(e) => {
                let mut inner = self.lock_inner();
                let _ = inner.state.apply(Command::OpenFailed);
                Err(e)
            }
        }
    }

    /// Fetch one rendered page at the given scale (clamped to [`MIN_SCALE`]).
    ///
    /// Resolution order: cache hit, pre-materialized artifact at the exact
    /// scale, render through the worker pool. Fails with `NoDocument` if
    /// nothing is loaded and `InvalidPage` outside `[1, page_count]`.
    pub fn get_page(&self, page: u32, scale: f32) -> Result<Arc<PageArtifact>, SessionError> {
        let scale = scale.max(MIN_SCALE);

        let (pool, cache, materializer, materialized_scale) = {
            let inner = self.lock_inner();
            if inner.state.phase() != Phase::Ready {
                return Err(SessionError::NoDocument);
            }
            let current = inner.current.as_ref().ok_or(SessionError::NoDocument)?;
            let page_count = current.handle.page_count;
            if page == 0 || page > page_count {
                return Err(SessionError::InvalidPage { page, page_count });
            }
            (
                Arc::clone(&current.pool),
                Arc::clone(&current.cache),
                current.materializer.clone(),
                current.materialized_scale,
            )
        };

        let key = CacheKey::new(page, scale);
        let hit = cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key);
        if let Some(artifact) = hit {
            return Ok(artifact);
        }

        if materialized_scale == Some(key.scale_millionths) {
            match materializer.load(page, scale) {
                Ok(Some(artifact)) => {
                    let artifact = cache
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .insert(key, artifact);
                    return Ok(artifact);
                }
                Ok(None) => {}
                Err(e) => warn!("failed to read materialized page {page}: {e}"),
            }
        }

        pool.submit(page, scale).wait()
    }

    /// Like [`get_page`](Self::get_page), but validated against a handle:
    /// fails with `StaleSession` if the handle's generation was superseded.
    pub fn get_page_for(
        &self,
        handle: &DocumentHandle,
        page: u32,
        scale: f32,
    ) -> Result<Arc<PageArtifact>, SessionError> {
        let current = self
            .lock_inner()
            .current
            .as_ref()
            .map(|doc| doc.handle.generation)
            .ok_or(SessionError::NoDocument)?;
        if current != handle.generation {
            return Err(SessionError::StaleSession {
                handle: handle.generation,
                current,
            });
        }
        self.get_page(page, scale)
    }

    /// Render every page of the open document to disk at `scale`.
    ///
    /// Best-effort by default (per-page failures recorded, batch continues);
    /// `BatchErrorPolicy::AbortOnFirst` stops at the first failure. Progress
    /// is reported after every page.
    pub fn materialize_all(
        &self,
        scale: f32,
        progress: impl FnMut(u32, u32),
    ) -> Result<MaterializeReport, SessionError> {
        let scale = scale.max(MIN_SCALE);

        let (pool, materializer, page_count, generation) = {
            let inner = self.lock_inner();
            if inner.state.phase() != Phase::Ready {
                return Err(SessionError::NoDocument);
            }
            let current = inner.current.as_ref().ok_or(SessionError::NoDocument)?;
            (
                Arc::clone(&current.pool),
                current.materializer.clone(),
                current.handle.page_count,
                current.handle.generation,
            )
        };

        let report = materializer.materialize_all(
            &pool,
            page_count,
            scale,
            self.config.batch_errors,
            progress,
        )?;

        let mut inner = self.lock_inner();
        if let Some(current) = inner.current.as_mut() {
            if current.handle.generation == generation {
                current.materialized_scale = Some(CacheKey::new(1, scale).scale_millionths);
            }
        }

        Ok(report)
    }

    /// Close the current document. Idempotent: closing an empty session does
    /// nothing. Outstanding jobs are cancelled and artifacts deleted.
    pub fn close(&self) {
        let mut inner = self.lock_inner();
        let effects = inner.state.apply(Command::BeginClose).unwrap_or_default();
        for effect in effects {
            match effect {
                Effect::ReleaseDocument => {
                    if let Some(doc) = inner.current.take() {
                        doc.release();
                    }
                }
            }
        }
        let _ = inner.state.apply(Command::CloseFinished);
    }

    /// Read, parse, and wire up a document. Runs outside the session lock;
    /// only the commit back into the session touches shared state.
    fn load_document(&self, path: &Path) -> Result<OpenDocument, SessionError> {
        if !path.exists() {
            return Err(SessionError::NotFound {
                path: path.to_path_buf(),
            });
        }

        let bytes: Arc<[u8]> = fs::read(path)?.into();
        let doc = self
            .rasterizer
            .open(&bytes)
            .map_err(|e| SessionError::Parse {
                detail: e.to_string(),
            })?;
        let page_count = doc.page_count() as u32;
        drop(doc);
        if page_count == 0 {
            return Err(SessionError::Parse {
                detail: "document has no pages".into(),
            });
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let display_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document".into());
        let stem = path
            .file_stem()
            .map(|s| sanitize_filename(&s.to_string_lossy()))
            .unwrap_or_else(|| "document".into());
        let artifact_dir = self
            .config
            .artifact_root
            .join(format!("{stem}-{generation}"));

        let cache = Arc::new(Mutex::new(PageCache::new(self.config.cache_capacity)));
        let pool = Arc::new(WorkerPool::new(
            Arc::clone(&self.rasterizer),
            Arc::clone(&bytes),
            Arc::clone(&cache),
            self.config.workers,
        ));

        let mut open_doc = OpenDocument {
            handle: DocumentHandle {
                path: path.to_path_buf(),
                page_count,
                display_name,
                generation,
            },
            pool,
            cache,
            materializer: Materializer::new(artifact_dir),
            materialized_scale: None,
            background: None,
        };

        if let Err(e) = self.start_materialization(&mut open_doc, page_count) {
            open_doc.release();
            return Err(e);
        }

        Ok(open_doc)
    }

    fn start_materialization(
        &self,
        doc: &mut OpenDocument,
        page_count: u32,
    ) -> Result<(), SessionError> {
        match self.config.materialize {
            MaterializePolicy::Lazy => Ok(()),
            MaterializePolicy::EagerBlocking { scale } => {
                let scale = scale.max(MIN_SCALE);
                let report = doc.materializer.materialize_all(
                    &doc.pool,
                    page_count,
                    scale,
                    self.config.batch_errors,
                    |done, total| debug!("materialized page {done}/{total}"),
                )?;
                info!(
                    "eager materialization: {}/{} pages succeeded",
                    report.succeeded, report.attempted
                );
                doc.materialized_scale = Some(CacheKey::new(1, scale).scale_millionths);
                Ok(())
            }
            MaterializePolicy::EagerBackground { scale } => {
                let scale = scale.max(MIN_SCALE);
                let pool = Arc::clone(&doc.pool);
                let materializer = doc.materializer.clone();
                let batch = self.config.batch_errors;
                doc.background = Some(std::thread::spawn(move || {
                    run_background_materialization(&materializer, &pool, page_count, scale, batch);
                }));
                doc.materialized_scale = Some(CacheKey::new(1, scale).scale_millionths);
                Ok(())
            }
        }
    }

    fn lock_inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for DocumentSession {
    fn drop(&mut self) {
        self.close();
    }
}

fn run_background_materialization(
    materializer: &Materializer,
    pool: &WorkerPool,
    page_count: u32,
    scale: f32,
    batch: BatchErrorPolicy,
) {
    let outcome = materializer.materialize_all(pool, page_count, scale, batch, |done, total| {
        debug!("materialized page {done}/{total}");
    });
    match outcome {
        Ok(report) => info!(
            "background materialization: {}/{} pages succeeded",
            report.succeeded, report.attempted
        ),
        Err(SessionError::Cancelled) => debug!("background materialization cancelled"),
        Err(e) => warn!("background materialization failed: {e}"),
    }
}

fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            _ => c,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filename_sanitization() {
        assert_eq!(sanitize_filename("normal_name"), "normal_name");
        assert_eq!(sanitize_filename("name/with\\slashes"), "name_with_slashes");
        assert_eq!(
            sanitize_filename("name:with*special?chars"),
            "name_with_special_chars"
        );
    }
}
