//! The reactor that every `clustershell-rs` Task owns exactly one of
//! (spec §4.4 "Engine (the scheduler)"). This crate has no opinion about
//! what a client *does* — that's `cls-worker`'s job — only about when it
//! gets to run.

mod engine;
mod error;
mod port;
mod timer;

pub use engine::{Client, ClientId, Engine, LocalBoxFuture};
pub use error::EngineError;
pub use port::{Port, PortSender};
pub use timer::TimerId;
