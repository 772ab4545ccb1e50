//! Render request and response messages.
//!
//! Jobs are correlated by their [`CacheKey`]: the pool coalesces concurrent
//! requests for the same key, so the key is the job's identity.

use std::sync::Arc;

use super::cache::CacheKey;
use super::rasterizer::RenderFault;
use super::types::PageArtifact;

/// Request sent to render workers.
#[derive(Debug)]
pub enum RenderRequest {
    /// Render one page at the key's scale.
    Render { key: CacheKey },

    /// Shutdown the worker.
    Shutdown,
}

/// Response from render workers.
#[derive(Debug)]
pub enum RenderResponse {
    /// Rendered page data.
    Page {
        key: CacheKey,
        artifact: Arc<PageArtifact>,
    },

    /// Rendering failed for this job.
    Failed { key: CacheKey, fault: RenderFault },
}
