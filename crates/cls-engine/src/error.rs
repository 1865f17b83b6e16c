//! Engine-level fatal conditions (spec §7 "Engine-level fatal").
//!
//! These never cross into per-destination territory — a client that fails
//! individually reports through its own worker events, not through this
//! enum. `EngineError` is reserved for conditions that make the reactor
//! itself unable to continue.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine reactor could not start: {0}")]
    StartupFailed(String),

    #[error("client {0} is already registered")]
    AlreadyRegistered(u64),

    #[error("client {0} is not registered")]
    NotRegistered(u64),

    #[error("run() timed out after {0:?} with {1} client(s) still outstanding")]
    Timeout(std::time::Duration, usize),

    #[error("a registered client's handler panicked: {0}")]
    HandlerPanicked(String),
}
