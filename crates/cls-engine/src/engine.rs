//! The single-threaded cooperative reactor (spec §4.4 "Engine").
//!
//! An `Engine` is the only place concurrency lives in this framework. It
//! owns a registry of clients, a fanout-bounded running set with a pending
//! FIFO, and a timer heap; everything is driven from one OS thread via a
//! `tokio` current-thread runtime, which supplies the readiness primitive
//! the spec leaves unspecified (`epoll`/`poll`/`select`) without forcing
//! every client onto a multi-threaded executor it was never designed for.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::task::LocalSet;
use tracing::{trace, warn};

use crate::error::EngineError;
use crate::timer::{TimerHeap, TimerId};

pub type ClientId = u64;
pub type LocalBoxFuture = Pin<Box<dyn Future<Output = ()>>>;

/// What the Engine needs from a registered client (spec §4.4 "register").
///
/// A client is consumed by `launch`: once started it drives itself to
/// completion (or abortion) and the Engine never touches it again except
/// through the `ClientId` bookkeeping it already returned.
pub trait Client: 'static {
    fn id(&self) -> ClientId;

    /// Drive this client's I/O to completion. Implementors are expected to
    /// internally emit worker events (`start`/`pickup`/`read`/`hup`/
    /// `close`) as side effects through whatever channel the caller wired
    /// up before registering.
    fn launch(self: Box<Self>) -> LocalBoxFuture;
}

enum Slot {
    Pending(Box<dyn Client>),
    Running,
}

/// The reactor itself. Not `Send`/`Sync`: an Engine belongs to exactly one
/// Task, and a Task belongs to exactly one OS thread (spec §5).
pub struct Engine {
    fanout: usize,
    runtime: tokio::runtime::Runtime,
    state: Rc<RefCell<EngineState>>,
}

struct EngineState {
    slots: HashMap<ClientId, Slot>,
    pending_order: VecDeque<ClientId>,
    running_count: usize,
    timers: TimerHeap,
    aborted: bool,
}

impl Engine {
    /// `fanout` is the sliding-window size of simultaneously running
    /// clients (spec §4.4 "start").
    pub fn new(fanout: usize) -> Result<Self, EngineError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .map_err(|e| EngineError::StartupFailed(e.to_string()))?;
        Ok(Self {
            fanout: fanout.max(1),
            runtime,
            state: Rc::new(RefCell::new(EngineState {
                slots: HashMap::new(),
                pending_order: VecDeque::new(),
                running_count: 0,
                timers: TimerHeap::default(),
                aborted: false,
            })),
        })
    }

    pub fn fanout(&self) -> usize {
        self.fanout
    }

    /// Attach `client`. Registration alone does not start I/O (spec §4.4).
    pub fn register(&self, client: Box<dyn Client>) -> Result<(), EngineError> {
        let id = client.id();
        let mut state = self.state.borrow_mut();
        if state.slots.contains_key(&id) {
            return Err(EngineError::AlreadyRegistered(id));
        }
        state.slots.insert(id, Slot::Pending(client));
        Ok(())
    }

    /// Request that `id` become active: started immediately if the running
    /// count is under `fanout`, otherwise queued on the pending FIFO (spec
    /// §4.4 "start").
    pub fn start(&self, id: ClientId) -> Result<(), EngineError> {
        let mut state = self.state.borrow_mut();
        if !state.slots.contains_key(&id) {
            return Err(EngineError::NotRegistered(id));
        }
        state.pending_order.push_back(id);
        Ok(())
    }

    /// Schedule a one-shot (`interval = None`) or periodic callback on the
    /// reactor thread (spec §4.4 "add_timer").
    pub fn add_timer(
        &self,
        delay: Duration,
        interval: Option<Duration>,
        handler: impl FnMut() + 'static,
    ) -> TimerId {
        let mut state = self.state.borrow_mut();
        state.timers.insert(delay, interval, Box::new(handler), Instant::now())
    }

    pub fn cancel_timer(&self, id: TimerId) -> bool {
        self.state.borrow_mut().timers.cancel(id)
    }

    /// Terminate every registered client (best-effort) and mark the Engine
    /// aborted so `run()` unwinds on its next poll (spec §4.4
    /// "Cancellation").
    pub fn abort(&self) {
        let mut state = self.state.borrow_mut();
        state.aborted = true;
        state.pending_order.clear();
        state.slots.retain(|_, slot| !matches!(slot, Slot::Pending(_)));
    }

    /// Enter the loop until every registered client has finished or
    /// `timeout` expires (spec §4.4 "run").
    pub fn run(&self, timeout: Option<Duration>) -> Result<(), EngineError> {
        let state = self.state.clone();
        let fanout = self.fanout;
        let local = LocalSet::new();
        let deadline = timeout.map(|d| Instant::now() + d);

        let fut = async move {
            let (done_tx, mut done_rx) = mpsc::unbounded_channel::<ClientId>();
            loop {
                // Promote pending clients until fanout is saturated.
                loop {
                    let next = {
                        let mut s = state.borrow_mut();
                        if s.aborted || s.running_count >= fanout {
                            None
                        } else {
                            s.pending_order.pop_front()
                        }
                    };
                    let Some(id) = next else { break };
                    let client = {
                        let mut s = state.borrow_mut();
                        match s.slots.insert(id, Slot::Running) {
                            Some(Slot::Pending(c)) => {
                                s.running_count += 1;
                                Some(c)
                            }
                            _ => None,
                        }
                    };
                    let Some(client) = client else { continue };
                    let done_tx = done_tx.clone();
                    tokio::task::spawn_local(async move {
                        client.launch().await;
                        let _ = done_tx.send(id);
                    });
                }

                let outstanding = {
                    let s = state.borrow();
                    s.running_count + s.pending_order.len()
                };
                let timers_pending = !state.borrow().timers.is_empty();
                if outstanding == 0 && !timers_pending {
                    break;
                }

                let next_timer = state.borrow().timers.next_deadline();
                let wake_at = match (next_timer, deadline) {
                    (Some(t), Some(d)) => Some(t.min(d)),
                    (Some(t), None) => Some(t),
                    (None, Some(d)) => Some(d),
                    (None, None) => None,
                };

                tokio::select! {
                    biased;
                    finished = done_rx.recv() => {
                        if let Some(id) = finished {
                            let mut s = state.borrow_mut();
                            s.slots.remove(&id);
                            s.running_count = s.running_count.saturating_sub(1);
                            trace!(client = id, "client finished, slot released");
                        }
                    }
                    _ = async {
                        match wake_at {
                            Some(at) => tokio::time::sleep_until(at.into()).await,
                            None => std::future::pending().await,
                        }
                    } => {
                        let now = Instant::now();
                        let fired = state.borrow_mut().timers.fire_expired(now);
                        if fired > 0 {
                            trace!(fired, "timers fired");
                        }
                        if let Some(d) = deadline {
                            if now >= d {
                                let remaining = state.borrow().running_count + state.borrow().pending_order.len();
                                return Err(EngineError::Timeout(timeout.unwrap(), remaining));
                            }
                        }
                    }
                }
            }
            Ok(())
        };

        local.block_on(&self.runtime, fut)
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if self.state.borrow().running_count > 0 {
            warn!(
                running = self.state.borrow().running_count,
                "Engine dropped with clients still running"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingClient {
        id: ClientId,
        concurrent: Rc<std::cell::Cell<usize>>,
        max_seen: Rc<std::cell::Cell<usize>>,
    }

    impl Client for CountingClient {
        fn id(&self) -> ClientId {
            self.id
        }

        fn launch(self: Box<Self>) -> LocalBoxFuture {
            Box::pin(async move {
                let now = self.concurrent.get() + 1;
                self.concurrent.set(now);
                self.max_seen.set(self.max_seen.get().max(now));
                tokio::time::sleep(Duration::from_millis(5)).await;
                self.concurrent.set(self.concurrent.get() - 1);
            })
        }
    }

    #[test]
    fn never_exceeds_fanout() {
        let engine = Engine::new(2).unwrap();
        let concurrent = Rc::new(std::cell::Cell::new(0));
        let max_seen = Rc::new(std::cell::Cell::new(0));
        for id in 0..6 {
            engine
                .register(Box::new(CountingClient {
                    id,
                    concurrent: concurrent.clone(),
                    max_seen: max_seen.clone(),
                }))
                .unwrap();
            engine.start(id).unwrap();
        }
        engine.run(Some(Duration::from_secs(5))).unwrap();
        assert!(max_seen.get() <= 2);
    }

    #[test]
    fn timer_fires_before_run_returns() {
        let engine = Engine::new(1).unwrap();
        let fired = Rc::new(std::cell::Cell::new(false));
        let flag = fired.clone();
        engine.add_timer(Duration::from_millis(1), None, move || {
            flag.set(true);
        });
        engine.run(Some(Duration::from_secs(1))).unwrap();
        assert!(fired.get());
    }

    #[test]
    fn run_times_out_with_outstanding_client() {
        struct NeverEndingClient(ClientId);
        impl Client for NeverEndingClient {
            fn id(&self) -> ClientId {
                self.0
            }
            fn launch(self: Box<Self>) -> LocalBoxFuture {
                Box::pin(std::future::pending())
            }
        }
        let engine = Engine::new(1).unwrap();
        engine.register(Box::new(NeverEndingClient(1))).unwrap();
        engine.start(1).unwrap();
        let err = engine.run(Some(Duration::from_millis(20))).unwrap_err();
        assert!(matches!(err, EngineError::Timeout(_, 1)));
    }
}
