//! Session phase state machine.
//!
//! Pure transitions: the session applies a command and executes whatever
//! effects come back. Conflicting transitions are rejected here, which keeps
//! the "one document operation at a time" policy in a single place.

use crate::error::SessionError;

/// Lifecycle phase of the session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// No document loaded.
    Empty,
    /// An `open_document` call is in progress.
    Loading,
    /// A document is loaded and serving pages.
    Ready,
    /// Teardown in progress.
    Closing,
}

/// Commands that drive phase transitions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    BeginOpen,
    OpenSucceeded,
    OpenFailed,
    BeginClose,
    CloseFinished,
}

/// Effects produced by transitions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Effect {
    /// Release the current document: cancel jobs, drop the cache, delete
    /// materialized artifacts.
    ReleaseDocument,
}

/// Phase holder with transition rules.
#[derive(Clone, Debug, Default)]
pub struct SessionState {
    phase: Phase,
}

impl Default for Phase {
    fn default() -> Self {
        Self::Empty
    }
}

impl SessionState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Apply a command and return the resulting effects.
    ///
    /// A `BeginOpen` while another open or close is in flight fails with
    /// `Busy`; overlapping opens are rejected, never queued. Redundant
    /// commands (closing an empty session, a completion arriving after the
    /// phase moved on) are no-ops.
    pub fn apply(&mut self, cmd: Command) -> Result<Vec<Effect>, SessionError> {
        match (self.phase, cmd) {
            (Phase::Loading | Phase::Closing, Command::BeginOpen) => Err(SessionError::Busy),
            (Phase::Empty, Command::BeginOpen) => {
                self.phase = Phase::Loading;
                Ok(vec![])
            }
            (Phase::Ready, Command::BeginOpen) => {
                self.phase = Phase::Loading;
                Ok(vec![Effect::ReleaseDocument])
            }

            (Phase::Loading, Command::OpenSucceeded) => {
                self.phase = Phase::Ready;
                Ok(vec![])
            }
            (Phase::Loading, Command::OpenFailed) => {
                self.phase = Phase::Empty;
                Ok(vec![])
            }

            (Phase::Ready | Phase::Loading, Command::BeginClose) => {
                self.phase = Phase::Closing;
                Ok(vec![Effect::ReleaseDocument])
            }
            (Phase::Closing, Command::CloseFinished) => {
                self.phase = Phase::Empty;
                Ok(vec![])
            }

            // Idempotent / out-of-order completions.
            (_, Command::BeginClose | Command::CloseFinished) => Ok(vec![]),
            (_, Command::OpenSucceeded | Command::OpenFailed) => Ok(vec![]),
        }
    }
}
