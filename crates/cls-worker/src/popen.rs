//! `PopenWorker`: a single local command with no target set (spec §4.5
//! "PopenWorker").

use std::rc::Rc;
use std::time::Duration;

use crate::exec::{ExecSpec, ExecWorker};
use crate::sink::EventSink;

/// The node key a `PopenWorker`'s one destination is filed under. There is
/// no real remote target, but every other part of the event contract
/// (pickup/read/hup/close) still needs a key to report against.
pub const POPEN_KEY: &str = "local";

pub struct PopenWorker;

impl PopenWorker {
    pub fn new(
        command: &str,
        command_timeout: Option<Duration>,
        sink: Rc<dyn EventSink>,
    ) -> ExecWorker {
        ExecWorker::new(
            ExecSpec {
                command: command.to_string(),
                targets: vec![POPEN_KEY.to_string()],
                connect_timeout: None,
                command_timeout,
            },
            sink,
        )
    }
}
