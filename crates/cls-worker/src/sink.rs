//! Where a Worker's events go. Kept as a trait so `cls-task` can dispatch
//! to user handlers and fold into its MsgTrees without this crate needing
//! to know either exists.

use std::rc::Rc;

use tokio::sync::mpsc;

use crate::event::WorkerEvent;

/// Receives events for exactly one Worker, in emission order.
pub trait EventSink {
    fn emit(&self, event: WorkerEvent);
}

/// An `EventSink` that forwards onto an unbounded channel — what a Worker
/// is handed by default; the consumer (typically `cls-task::Task`) reads
/// the other end on the same thread.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<WorkerEvent>,
}

impl ChannelSink {
    pub fn new() -> (Rc<Self>, mpsc::UnboundedReceiver<WorkerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Rc::new(Self { tx }), rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: WorkerEvent) {
        // The receiver only ever goes away once the owning Task drops the
        // Worker, at which point there is nothing left to notify.
        let _ = self.tx.send(event);
    }
}
