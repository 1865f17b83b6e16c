//! The Worker hierarchy (spec §4.5): one work unit per command/copy
//! invocation, built from [`cls_engine::Client`]s underneath. `TreeWorker`,
//! the gateway-relaying variant, lives in `cls-tree` since it needs the
//! framed channel protocol that crate owns.

pub mod copy;
pub mod error;
pub mod event;
pub mod exec;
pub mod popen;
pub mod sink;
pub mod ssh;

pub use copy::{CopyPullWorker, CopyPushWorker};
pub use error::WorkerError;
pub use event::{DestinationState, Stream, WorkerEvent, NO_REAL_EXIT_CODE};
pub use exec::{ExecSpec, ExecWorker, WorkerHandle};
pub use popen::PopenWorker;
pub use sink::{ChannelSink, EventSink};
pub use ssh::{RshWorker, SshOptions, SshWorker};
