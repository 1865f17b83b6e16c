//! Task-level failure taxonomy (spec §7 "Engine-level fatal",
//! "User handler exceptions").

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TaskError {
    #[error(transparent)]
    Engine(#[from] cls_engine::EngineError),

    /// One or more event handlers panicked during `run()`. The Engine
    /// still unwound cleanly and every destination got its `close` event;
    /// this is re-raised afterward so no panic is silently swallowed
    /// (spec §7 "no event is silently swallowed").
    #[error("{0} handler(s) panicked during run(): {1}")]
    HandlerPanicked(usize, String),
}
