//! `Port`: the only channel through which a foreign thread may reach into
//! a running Engine (spec §5 "Locking: none within an Engine... Inter-
//! thread communication goes through an explicit Port").
//!
//! A `Port` is a multi-producer single-consumer queue. The consumer half
//! lives on the Engine's own thread and is drained inside `run()`'s select
//! loop; the sender half is `Clone + Send + Sync` and is what `Task::wait`/
//! `join` and `TreeWorker`'s gateway-reader thread hand out to callers that
//! are not the Task's owning thread.

use tokio::sync::mpsc;

/// The sending half of a `Port`. Cheap to clone; safe to hold from any
/// thread.
#[derive(Clone)]
pub struct PortSender<T> {
    tx: mpsc::UnboundedSender<T>,
}

impl<T> PortSender<T> {
    /// Enqueue `msg` for delivery on the Engine's thread. Fails only if the
    /// Engine (and therefore the receiving half) has already been dropped.
    pub fn send(&self, msg: T) -> Result<(), T> {
        self.tx.send(msg).map_err(|e| e.0)
    }
}

/// The receiving half, owned by the Engine (or whatever drives its loop).
pub struct Port<T> {
    rx: mpsc::UnboundedReceiver<T>,
}

impl<T> Port<T> {
    pub fn new() -> (PortSender<T>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (PortSender { tx }, Self { rx })
    }

    /// Await the next message. Resolves to `None` once every `PortSender`
    /// has been dropped.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Drain every message currently queued without waiting.
    pub fn drain(&mut self) -> Vec<T> {
        let mut out = Vec::new();
        while let Ok(msg) = self.rx.try_recv() {
            out.push(msg);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn messages_arrive_in_send_order() {
        let (tx, mut port) = Port::new();
        tx.send(1).unwrap();
        tx.send(2).unwrap();
        drop(tx);
        assert_eq!(port.recv().await, Some(1));
        assert_eq!(port.recv().await, Some(2));
        assert_eq!(port.recv().await, None);
    }
}
