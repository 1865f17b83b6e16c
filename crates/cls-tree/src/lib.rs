//! The tree propagation protocol (spec §4.7 "Tree propagator"): routing
//! table + one-hop spanning-tree computation, the framed gateway wire
//! format, and gateway-side output grooming. `cls-task`'s façade stays
//! unaware of any of this; only `TreeWorker` (the root-side client) and
//! the `cls-gateway` binary (the recursive remote end) depend on this
//! crate.

pub mod ctl;
pub mod error;
pub mod frame;
pub mod groom;
pub mod routing;
pub mod worker;

pub use ctl::{ControlBody, DistantWorkerKind};
pub use error::RelayError;
pub use frame::{read_frame, read_frame_sync, write_frame, write_frame_sync, Frame, FrameType, MAGIC, VERSION};
pub use groom::OutputGroomer;
pub use routing::{RoutePlan, RouteTable};
pub use worker::{TreeSpec, TreeWorker, TreeWorkerHandle};
