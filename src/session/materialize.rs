//! On-disk materialization of rendered pages.
//!
//! Pages are written as `page-<N>.png` under one directory per opened
//! document, so a directory listing reconstructs the page -> artifact
//! mapping. Cleanup removes exactly the files matching that convention and
//! leaves anything else in the directory alone.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use log::{debug, warn};

use crate::config::BatchErrorPolicy;
use crate::error::SessionError;
use crate::render::{PageArtifact, WorkerPool};

/// One page that failed during bulk materialization.
#[derive(Clone, Debug)]
pub struct PageFailure {
    pub page: u32,
    pub detail: String,
}

/// Outcome of a `materialize_all` run.
#[derive(Clone, Debug, Default)]
pub struct MaterializeReport {
    /// Pages attempted (equals the page count unless aborted early).
    pub attempted: u32,
    pub succeeded: u32,
    pub failures: Vec<PageFailure>,
}

impl MaterializeReport {
    #[must_use]
    pub fn failed(&self) -> u32 {
        self.failures.len() as u32
    }

    /// First error encountered, if any page failed.
    #[must_use]
    pub fn first_error(&self) -> Option<&PageFailure> {
        self.failures.first()
    }
}

/// Writes and reloads page artifacts for one document generation.
#[derive(Clone)]
pub struct Materializer {
    dir: PathBuf,
    cancel: Arc<AtomicBool>,
    /// Held for the duration of a bulk run; `cleanup` takes it too, so a
    /// sweep never races a write that slipped past the cancel check.
    batch: Arc<Mutex<()>>,
}

impl Materializer {
    #[must_use]
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            cancel: Arc::new(AtomicBool::new(false)),
            batch: Arc::new(Mutex::new(())),
        }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Ask any in-progress materialization to stop after the current page.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn artifact_path(&self, page: u32) -> PathBuf {
        self.dir.join(format!("page-{page}.png"))
    }

    /// Render every page through the pool and write each to disk.
    ///
    /// Per-page failures are recorded and do not abort the batch unless
    /// `policy` is `AbortOnFirst`. `progress` is invoked after every page
    /// with (pages done, total). Returns `Cancelled` if the session is torn
    /// down mid-run.
    pub fn materialize_all(
        &self,
        pool: &WorkerPool,
        page_count: u32,
        scale: f32,
        policy: BatchErrorPolicy,
        mut progress: impl FnMut(u32, u32),
    ) -> Result<MaterializeReport, SessionError> {
        let _batch = self.batch.lock().unwrap_or_else(PoisonError::into_inner);
        fs::create_dir_all(&self.dir)?;
        debug!("materializing {page_count} pages at scale {scale} into {:?}", self.dir);

        let mut report = MaterializeReport::default();
        for page in 1..=page_count {
            if self.cancel.load(Ordering::SeqCst) {
                return Err(SessionError::Cancelled);
            }

            report.attempted += 1;
            match pool.submit(page, scale).wait() {
                Ok(artifact) => {
                    if self.cancel.load(Ordering::SeqCst) {
                        return Err(SessionError::Cancelled);
                    }
                    match fs::write(self.artifact_path(page), &artifact.png) {
                        Ok(()) => report.succeeded += 1,
                        Err(e) => {
                            warn!("failed to write page {page}: {e}");
                            report.failures.push(PageFailure {
                                page,
                                detail: format!("write: {e}"),
                            });
                        }
                    }
                }
                Err(SessionError::Cancelled) => return Err(SessionError::Cancelled),
                Err(e) => {
                    warn!("failed to materialize page {page}: {e}");
                    report.failures.push(PageFailure {
                        page,
                        detail: e.to_string(),
                    });
                }
            }

            progress(page, page_count);

            if policy == BatchErrorPolicy::AbortOnFirst && !report.failures.is_empty() {
                break;
            }
        }

        debug!(
            "materialization finished: {} of {} pages succeeded",
            report.succeeded, report.attempted
        );
        Ok(report)
    }

    /// Load a previously materialized page, or `None` if it was never
    /// written. A file that no longer decodes is treated as a miss so the
    /// page gets re-rendered instead of surfacing garbage.
    pub fn load(&self, page: u32, scale: f32) -> Result<Option<PageArtifact>, SessionError> {
        let path = self.artifact_path(page);
        if !path.exists() {
            return Ok(None);
        }

        let png = fs::read(&path)?;
        match png_dimensions(&png) {
            Some((width, height)) => Ok(Some(PageArtifact {
                page_number: page,
                width,
                height,
                scale,
                png,
            })),
            None => {
                warn!("materialized artifact {path:?} is not a valid PNG; ignoring");
                Ok(None)
            }
        }
    }

    /// Delete every `page-<N>.png` under the directory, then remove the
    /// directory itself if nothing else remains. Blocks until any bulk run
    /// already in progress has stopped (cancellation makes that prompt).
    pub fn cleanup(&self) -> Result<(), SessionError> {
        let _batch = self.batch.lock().unwrap_or_else(PoisonError::into_inner);
        if !self.dir.exists() {
            return Ok(());
        }

        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            let is_artifact = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(artifact_page_number)
                .is_some();
            if is_artifact {
                fs::remove_file(&path)?;
            }
        }

        if fs::read_dir(&self.dir)?.next().is_none() {
            fs::remove_dir(&self.dir)?;
        }
        debug!("cleaned up materialized pages in {:?}", self.dir);

        Ok(())
    }
}

/// Parse the page number out of a `page-<N>.png` file name.
fn artifact_page_number(name: &str) -> Option<u32> {
    name.strip_prefix("page-")?
        .strip_suffix(".png")?
        .parse()
        .ok()
}

fn png_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    let decoder = png::Decoder::new(std::io::Cursor::new(bytes));
    let reader = decoder.read_info().ok()?;
    let info = reader.info();
    Some((info.width, info.height))
}
