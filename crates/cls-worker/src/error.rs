//! Per-destination failure taxonomy (spec §7 "Per-destination failures").
//!
//! These never abort the owning Task; a `WorkerError` is always reported
//! through the event stream (a non-zero `hup` or a `close` with
//! `timed_out` set), never propagated as a Rust `Err` across the Engine
//! boundary. The type exists so internal plumbing has something typed to
//! log and to attach to a synthetic return code.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("failed to spawn child process for {node}: {source}")]
    Spawn {
        node: String,
        #[source]
        source: std::io::Error,
    },

    #[error("connect timeout exceeded for {node}")]
    ConnectTimeout { node: String },

    #[error("command timeout exceeded for {node}")]
    CommandTimeout { node: String },

    #[error("write to {node} failed: {source}")]
    Write {
        node: String,
        #[source]
        source: std::io::Error,
    },

    #[error("no child stdin available to write to for {node}")]
    NoStdin { node: String },
}
