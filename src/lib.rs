//! `folio` — document session and page-rendering pipeline.
//!
//! Loads one document at a time and serves its pages as PNG artifacts,
//! rendered by a pool of isolated worker threads, cached per (page, scale),
//! and optionally materialized to disk ahead of time. The rasterization
//! itself is delegated to an external engine behind the [`render::Rasterizer`]
//! trait (MuPDF with the `pdf` feature).

pub mod api;
pub mod config;
pub mod error;
pub mod render;
pub mod session;

pub use config::{BatchErrorPolicy, MaterializePolicy, SessionConfig};
pub use error::SessionError;
pub use render::PageArtifact;
pub use session::{DocumentHandle, DocumentInfo, DocumentSession, MaterializeReport};
