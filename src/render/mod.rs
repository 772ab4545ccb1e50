//! Page rendering infrastructure: rasterizer contract, worker pool, cache.

mod cache;
mod rasterizer;
mod request;
mod types;
mod worker;

#[cfg(feature = "pdf")]
mod mupdf_rasterizer;
#[cfg(any(test, feature = "test-utils"))]
pub mod testdoc;

pub use cache::{CacheKey, PageCache};
pub use rasterizer::{PixelBuffer, RasterDoc, Rasterizer, RenderFault, encode_png};
pub use request::{RenderRequest, RenderResponse};
pub use types::PageArtifact;
pub use worker::{JobTicket, WorkerPool};

#[cfg(feature = "pdf")]
pub use mupdf_rasterizer::MupdfRasterizer;

/// Default number of render worker threads.
pub const DEFAULT_WORKERS: usize = 2;

/// Default LRU capacity, in rendered artifacts.
pub const DEFAULT_CACHE_SIZE: usize = 64;

/// Upper bound on queued render jobs. Keeps memory flat even when a caller
/// floods the pool with requests for a pathological page count; senders
/// block once the queue is full.
pub const DEFAULT_QUEUE_CAPACITY: usize = 128;
