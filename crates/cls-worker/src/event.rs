//! The event contract every Worker variant emits, in the order the Task
//! thread receives them (spec §4.4 "Ordering guarantees", §4.5 "Emitted
//! events").

/// Synthetic return code a `Hup` carries for a destination that never
/// produced a real exit status — timed out, or the child's wait() call
/// itself failed (spec §4.4 "Timeouts": "a timeout does not raise; it
/// closes the affected destinations with a `timed_out` marker").
pub const NO_REAL_EXIT_CODE: i32 = -1;

/// Which standard stream a `Read` event carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Stream {
    Stdout,
    Stderr,
}

/// Per-destination lifecycle (spec §3 "Worker state machine"). Tracked
/// internally to assert the emitted event sequence is always a prefix of
/// `Connecting -> Open -> Eof -> Hup` (spec §8).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DestinationState {
    Connecting,
    Open,
    Eof,
    Hup,
}

impl DestinationState {
    /// Whether `self -> next` is a legal transition.
    pub fn can_advance_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Connecting, Self::Open)
                | (Self::Connecting, Self::Eof) // process exits before any byte
                | (Self::Open, Self::Eof)
                | (Self::Eof, Self::Hup)
                | (Self::Connecting, Self::Hup) // exits before EOF observed separately
                | (Self::Open, Self::Hup)
        )
    }
}

/// One event in a Worker's stream, always delivered on the owning Task's
/// thread (spec §4.5).
#[derive(Clone, Debug)]
pub enum WorkerEvent {
    /// Worker scheduled and the Engine is starting it.
    Start,
    /// The child process for `node` has been launched.
    Pickup { node: String },
    /// A line (or chunk, for unbuffered streams) arrived on `stream`.
    Read {
        node: String,
        stream: Stream,
        bytes: Vec<u8>,
    },
    /// `bytes_written` bytes were accepted after a `write()` call.
    Written { node: String, bytes_written: usize },
    /// The child for `node` exited with return code `rc`.
    Hup { node: String, rc: i32 },
    /// Every destination has terminated.
    Close { timed_out: bool },
}
