//! Document session: one open document, its state machine, and its
//! materialized artifacts.

mod document;
mod materialize;
mod state;

pub use document::{DocumentHandle, DocumentInfo, DocumentSession, MIN_SCALE};
pub use materialize::{MaterializeReport, Materializer, PageFailure};
pub use state::{Command, Effect, Phase, SessionState};
