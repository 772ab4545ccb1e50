//! Error taxonomy for the document session.

use std::path::PathBuf;

/// Errors returned across the session's public surface.
///
/// Every failure the external caller can observe is one of these variants;
/// nothing in the library panics across the API boundary.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The input path does not exist.
    #[error("document not found: {path}")]
    NotFound { path: PathBuf },

    /// The file exists but is not a valid document.
    #[error("failed to parse document: {detail}")]
    Parse { detail: String },

    /// Read or write failure outside of parsing.
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),

    /// Page number outside `[1, page_count]`.
    #[error("page {page} out of range 1..={page_count}")]
    InvalidPage { page: u32, page_count: u32 },

    /// Operation requires a loaded document but none is present.
    #[error("no document loaded")]
    NoDocument,

    /// Rasterization failed for a specific page.
    #[error("failed to render page {page}: {detail}")]
    Render { page: u32, detail: String },

    /// Job aborted because the document was closed or replaced.
    #[error("render cancelled by session teardown")]
    Cancelled,

    /// A conflicting document operation is already in progress.
    #[error("another document operation is in progress")]
    Busy,

    /// Operation referenced a superseded document generation.
    #[error("stale document handle: generation {handle} superseded by {current}")]
    StaleSession { handle: u64, current: u64 },
}

impl SessionError {
    /// Stable machine-readable kind, independent of the display message.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "NotFound",
            Self::Parse { .. } => "ParseError",
            Self::Io(_) => "IOError",
            Self::InvalidPage { .. } => "InvalidPage",
            Self::NoDocument => "NoDocument",
            Self::Render { .. } => "RenderError",
            Self::Cancelled => "Cancelled",
            Self::Busy => "Busy",
            Self::StaleSession { .. } => "StaleSession",
        }
    }
}
