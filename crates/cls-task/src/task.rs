//! `Task`: the user-facing facade (spec §4.6). One Task owns exactly one
//! Engine and lives on exactly one OS thread (spec §5); `task_self()`
//! gives every thread its own lazily-instantiated Task, the way the
//! original tooling's thread-local default task works.

use std::cell::RefCell;
use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::{Rc, Weak};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use cls_core::MsgTree;
use cls_engine::{Client, Engine};
use cls_worker::{
    CopyPullWorker, CopyPushWorker, EventSink, ExecSpec, ExecWorker, RshWorker, SshOptions,
    SshWorker, Stream, WorkerEvent, WorkerHandle, NO_REAL_EXIT_CODE,
};
use tracing::{instrument, warn};

use crate::config::{DistantWorkerKind, TaskConfig};
use crate::error::TaskError;

pub type Handler = Rc<dyn Fn(&WorkerEvent)>;

/// `max_retcode()` contribution for a run where every destination took the
/// timeout path and none produced a real exit status — mirrors the
/// coreutils `timeout` command's own exit code so a pure-timeout run is
/// never indistinguishable from a clean `0` (spec §8 scenario 7:
/// "`max_retcode()` reflects the timeout path").
const TIMEOUT_MAX_RETCODE: i32 = 124;

struct TaskState {
    stdout: MsgTree<String>,
    stderr: MsgTree<String>,
    max_retcode: i32,
    timed_out_keys: HashSet<String>,
    pending: Vec<Box<dyn Client>>,
    handler_panics: Vec<String>,
}

impl TaskState {
    fn new() -> Self {
        Self {
            stdout: MsgTree::new(),
            stderr: MsgTree::new(),
            max_retcode: 0,
            timed_out_keys: HashSet::new(),
            pending: Vec::new(),
            handler_panics: Vec::new(),
        }
    }
}

/// The process-wide, per-thread Task collection key is the thread itself
/// (spec §4.6 "a process-wide collection keyed by owning thread"); we
/// model that directly with a `thread_local!`.
pub struct Task {
    engine: Engine,
    state: RefCell<TaskState>,
    config: RefCell<TaskConfig>,
    done: Arc<(Mutex<bool>, Condvar)>,
}

impl Task {
    fn new(config: TaskConfig) -> Rc<Self> {
        let engine = Engine::new(config.fanout).expect("engine startup primitives unavailable");
        Rc::new(Self {
            engine,
            state: RefCell::new(TaskState::new()),
            config: RefCell::new(config),
            done: Arc::new((Mutex::new(false), Condvar::new())),
        })
    }

    pub fn config(&self) -> TaskConfig {
        self.config.borrow().clone()
    }

    pub fn set_config(&self, config: TaskConfig) {
        *self.config.borrow_mut() = config;
    }

    /// A `Send + Sync` handle a foreign thread can block on (spec §4.6
    /// "Thread-safe surface").
    pub fn wait_handle(&self) -> TaskWaitHandle {
        TaskWaitHandle {
            done: self.done.clone(),
        }
    }

    /// An `EventSink` wired into this Task's own MsgTrees/result
    /// aggregation, the same one `shell`/`copy` build internally. Exposed
    /// so a caller composing a worker this crate doesn't know about
    /// (e.g. `cls_tree::TreeWorker`) can still fold its events into this
    /// Task via `schedule` (spec §4.6 "schedule"; `cls-tree`'s `TreeWorker`
    /// docs: "the caller is expected to run [direct targets] through an
    /// ordinary SshWorker against the same sink").
    pub fn event_sink(self: &Rc<Self>, handler: Option<Handler>) -> Rc<dyn EventSink> {
        Rc::new(TaskSink {
            task: Rc::downgrade(self),
            handler,
        })
    }

    /// Run `cmd` against `nodes`, synthesising an Exec or Ssh worker
    /// depending on `distant_worker` (spec §4.6 "shell").
    pub fn shell(
        self: &Rc<Self>,
        cmd: &str,
        nodes: &[String],
        handler: Option<Handler>,
        timeout: Option<Duration>,
        stdin: bool,
    ) -> WorkerHandle {
        let config = self.config();
        let _ = stdin; // stdin plumbing is driven by the returned WorkerHandle::write
        let command_timeout = timeout.or(config.command_timeout);
        let sink = self.event_sink(handler);
        let worker = match config.distant_worker {
            DistantWorkerKind::Ssh => SshWorker::new(
                cmd,
                nodes.to_vec(),
                SshOptions::default(),
                config.connect_timeout,
                command_timeout,
                sink,
            ),
            DistantWorkerKind::Rsh => RshWorker::new(
                cmd,
                nodes.to_vec(),
                SshOptions::default(),
                config.connect_timeout,
                command_timeout,
                sink,
            ),
        };
        let handle = worker.handle();
        self.schedule(worker.into_clients());
        handle
    }

    /// Local exec, bypassing the ssh/rsh wrapping (e.g. for `PopenWorker`
    /// style single-command use through the same facade).
    pub fn exec_local(self: &Rc<Self>, cmd: &str, timeout: Option<Duration>) -> WorkerHandle {
        let sink = self.event_sink(None);
        let worker = ExecWorker::new(
            ExecSpec {
                command: cmd.to_string(),
                targets: vec!["local".to_string()],
                connect_timeout: None,
                command_timeout: timeout,
            },
            sink,
        );
        let handle = worker.handle();
        self.schedule(worker.into_clients());
        handle
    }

    pub fn copy(self: &Rc<Self>, src: &str, dst: &str, nodes: &[String]) -> WorkerHandle {
        let config = self.config();
        let sink = self.event_sink(None);
        let worker = CopyPushWorker::new(
            src,
            dst,
            nodes.to_vec(),
            SshOptions::default(),
            config.connect_timeout,
            config.command_timeout,
            sink,
        );
        let handle = worker.handle();
        self.schedule(worker.into_clients());
        handle
    }

    pub fn rcopy(self: &Rc<Self>, src: &str, dst: &str, nodes: &[String]) -> WorkerHandle {
        let config = self.config();
        let sink = self.event_sink(None);
        let worker = CopyPullWorker::new(
            src,
            dst,
            nodes.to_vec(),
            SshOptions::default(),
            config.connect_timeout,
            config.command_timeout,
            sink,
        );
        let handle = worker.handle();
        self.schedule(worker.into_clients());
        handle
    }

    /// Queue already-built Engine clients for the next `resume()` (spec
    /// §4.6 "schedule").
    pub fn schedule(&self, clients: Vec<Box<dyn Client>>) {
        self.state.borrow_mut().pending.extend(clients);
    }

    pub fn timer(
        &self,
        delay: Duration,
        mut handler: impl FnMut() + 'static,
        interval: Duration,
    ) -> cls_engine::TimerId {
        let interval = if interval.is_zero() { None } else { Some(interval) };
        self.engine.add_timer(delay, interval, move || handler())
    }

    /// Register and start every pending client (spec §4.6 "resume").
    pub fn resume(&self) {
        let pending: Vec<_> = self.state.borrow_mut().pending.drain(..).collect();
        for client in pending {
            let id = client.id();
            if self.engine.register(client).is_ok() {
                let _ = self.engine.start(id);
            }
        }
    }

    /// `shell(cmd, nodes) + resume()` in one call, then drive the Engine
    /// to completion (spec §4.6 "run").
    #[instrument(skip(self, handler))]
    pub fn run(
        self: &Rc<Self>,
        cmd: &str,
        nodes: &[String],
        handler: Option<Handler>,
        timeout: Option<Duration>,
    ) -> Result<(), TaskError> {
        self.shell(cmd, nodes, handler, None, true);
        self.resume();
        self.run_scheduled(timeout)
    }

    /// Drive the Engine without scheduling anything new — for callers who
    /// already used `schedule`/`resume` directly.
    pub fn run_scheduled(&self, timeout: Option<Duration>) -> Result<(), TaskError> {
        let result = self.engine.run(timeout).map_err(TaskError::from);
        {
            let (lock, cvar) = &*self.done;
            *lock.lock().unwrap() = true;
            cvar.notify_all();
        }
        let panics = std::mem::take(&mut self.state.borrow_mut().handler_panics);
        if !panics.is_empty() {
            return Err(TaskError::HandlerPanicked(panics.len(), panics.join("; ")));
        }
        result
    }

    /// Signal the Engine to terminate every registered client (spec §4.4
    /// "Cancellation"). Callable only from the owning thread.
    pub fn abort(&self) {
        self.engine.abort();
    }

    pub fn node_buffer(&self, key: &str) -> Option<Vec<u8>> {
        self.state.borrow().stdout.get(&key.to_string())
    }

    pub fn node_error(&self, key: &str) -> Option<Vec<u8>> {
        self.state.borrow().stderr.get(&key.to_string())
    }

    pub fn iter_buffers(&self) -> Vec<(Vec<u8>, Vec<String>)> {
        self.state.borrow().stdout.walk()
    }

    pub fn iter_errors(&self) -> Vec<(Vec<u8>, Vec<String>)> {
        self.state.borrow().stderr.walk()
    }

    pub fn max_retcode(&self) -> i32 {
        self.state.borrow().max_retcode
    }

    pub fn num_timeout(&self) -> usize {
        self.state.borrow().timed_out_keys.len()
    }

    pub fn iter_keys_timeout(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.state.borrow().timed_out_keys.iter().cloned().collect();
        keys.sort();
        keys
    }
}

struct TaskSink {
    task: Weak<Task>,
    handler: Option<Handler>,
}

impl EventSink for TaskSink {
    fn emit(&self, event: WorkerEvent) {
        if let Some(handler) = &self.handler {
            let outcome = catch_unwind(AssertUnwindSafe(|| handler(&event)));
            if let (Err(payload), Some(task)) = (outcome, self.task.upgrade()) {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "non-string panic payload".to_string());
                warn!(error = %message, "event handler panicked");
                task.state.borrow_mut().handler_panics.push(message);
            }
        }

        let Some(task) = self.task.upgrade() else {
            return;
        };
        let mut state = task.state.borrow_mut();
        match &event {
            WorkerEvent::Read { node, stream, bytes } => {
                let tree = match stream {
                    Stream::Stdout => &mut state.stdout,
                    Stream::Stderr => &mut state.stderr,
                };
                tree.add(node.clone(), bytes.clone());
            }
            WorkerEvent::Hup { node, rc } => {
                if *rc == NO_REAL_EXIT_CODE {
                    // `ExecWorker` reports a timed-out (or wait()-failed)
                    // destination with the synthetic `NO_REAL_EXIT_CODE`
                    // rc (cls-worker::exec::run_destination); fold it into
                    // `max_retcode` as `TIMEOUT_MAX_RETCODE` instead of the
                    // real-rc comparison below, since `-1` would never
                    // overtake the `0` default and a pure-timeout run
                    // would otherwise be reported as a clean success.
                    state.timed_out_keys.insert(node.clone());
                    if TIMEOUT_MAX_RETCODE > state.max_retcode {
                        state.max_retcode = TIMEOUT_MAX_RETCODE;
                    }
                } else if *rc > state.max_retcode {
                    state.max_retcode = *rc;
                }
            }
            _ => {}
        }
    }
}

/// A `Send + Sync` handle usable from a thread that does not own the Task
/// (spec §4.6 "Thread-safe surface").
#[derive(Clone)]
pub struct TaskWaitHandle {
    done: Arc<(Mutex<bool>, Condvar)>,
}

impl TaskWaitHandle {
    pub fn wait(&self) {
        let (lock, cvar) = &*self.done;
        let mut done = lock.lock().unwrap();
        while !*done {
            done = cvar.wait(done).unwrap();
        }
    }

    pub fn join(&self) {
        self.wait();
    }
}

/// Block the calling thread until every listed Task has finished (spec
/// §4.6 "module-level task_wait").
pub fn task_wait(handles: &[TaskWaitHandle]) {
    for handle in handles {
        handle.wait();
    }
}

thread_local! {
    static CURRENT: RefCell<Option<Rc<Task>>> = const { RefCell::new(None) };
}

/// The current thread's Task, instantiated lazily on first access (spec
/// §4.6 "task_self").
pub fn task_self() -> Rc<Task> {
    CURRENT.with(|cell| {
        let mut slot = cell.borrow_mut();
        if slot.is_none() {
            *slot = Some(Task::new(TaskConfig::default()));
        }
        slot.as_ref().unwrap().clone()
    })
}

/// Replace the current thread's Task with a fresh one using `config`
/// (mainly useful in tests that need non-default fanout/timeouts).
pub fn reset_task_self(config: TaskConfig) -> Rc<Task> {
    CURRENT.with(|cell| {
        let task = Task::new(config);
        *cell.borrow_mut() = Some(task.clone());
        task
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_collects_output_and_retcode() {
        let task = reset_task_self(TaskConfig {
            fanout: 4,
            command_timeout: Some(Duration::from_secs(5)),
            ..Default::default()
        });
        task.run("echo hello", &["n1".into(), "n2".into()], None, None)
            .unwrap();
        assert_eq!(task.node_buffer("n1").as_deref(), Some(b"hello".as_slice()));
        assert_eq!(task.node_buffer("n2").as_deref(), Some(b"hello".as_slice()));
        assert_eq!(task.max_retcode(), 0);
        assert_eq!(task.num_timeout(), 0);
    }

    #[test]
    fn pure_timeout_run_reflects_timeout_in_max_retcode() {
        // spec §8 scenario 7: command_timeout=1s against a node that
        // sleeps forever closes with timed_out=true, max_retcode()
        // reflects the timeout path, and the key is in iter_keys_timeout().
        let task = reset_task_self(TaskConfig {
            fanout: 4,
            command_timeout: Some(Duration::from_millis(200)),
            ..Default::default()
        });
        task.run("sleep 30", &["n1".into()], None, Some(Duration::from_secs(5)))
            .unwrap();
        assert_eq!(task.max_retcode(), TIMEOUT_MAX_RETCODE);
        assert_eq!(task.num_timeout(), 1);
        assert_eq!(task.iter_keys_timeout(), vec!["n1".to_string()]);
    }

    #[test]
    fn handler_panic_is_reraised_after_run_completes() {
        let task = reset_task_self(TaskConfig::default());
        let handler: Handler = Rc::new(|event: &WorkerEvent| {
            if matches!(event, WorkerEvent::Read { .. }) {
                panic!("boom");
            }
        });
        let err = task
            .run("echo trigger", &["n1".into()], Some(handler), None)
            .unwrap_err();
        assert!(matches!(err, TaskError::HandlerPanicked(_, _)));
    }

    #[test]
    fn task_self_is_stable_within_a_thread() {
        let a = task_self();
        let b = task_self();
        assert!(Rc::ptr_eq(&a, &b));
    }

    #[test]
    fn exec_local_runs_a_single_local_command() {
        let task = reset_task_self(TaskConfig::default());
        task.exec_local("exit 3", Some(Duration::from_secs(5)));
        task.resume();
        task.run_scheduled(Some(Duration::from_secs(5))).unwrap();
        assert_eq!(task.max_retcode(), 3);
    }
}
