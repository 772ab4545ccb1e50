//! Session configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::render::{DEFAULT_CACHE_SIZE, DEFAULT_WORKERS};

/// When (if ever) pages are rendered ahead of the first `get_page` call.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum MaterializePolicy {
    /// Render on demand only.
    Lazy,
    /// `open_document` returns once metadata is available; all pages are
    /// rendered to disk by a background task owned by the session.
    EagerBackground { scale: f32 },
    /// `open_document` blocks until every page has been materialized.
    EagerBlocking { scale: f32 },
}

/// How bulk materialization reacts to a page that fails to render.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchErrorPolicy {
    /// Record the failure and keep going (default).
    ContinueBestEffort,
    /// Stop at the first failing page.
    AbortOnFirst,
}

/// Knobs for a document session.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Number of render worker threads (clamped to at least 1).
    pub workers: usize,
    /// Capacity of the rendered-page LRU cache, in artifacts.
    pub cache_capacity: usize,
    /// Root directory for materialized page images. Each document gets its
    /// own subdirectory under this root.
    pub artifact_root: PathBuf,
    pub materialize: MaterializePolicy,
    pub batch_errors: BatchErrorPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            cache_capacity: DEFAULT_CACHE_SIZE,
            artifact_root: std::env::temp_dir().join("folio-pages"),
            materialize: MaterializePolicy::Lazy,
            batch_errors: BatchErrorPolicy::ContinueBestEffort,
        }
    }
}
