//! `ExecWorker`: local fork/exec, the building block every other worker
//! variant wraps (spec §4.5 "ExecWorker").
//!
//! Each target node becomes its own [`cls_engine::Client`] so the Engine's
//! fanout window bounds the number of concurrently *running child
//! processes*, not the number of workers — matching §2's data-flow note
//! that "the Worker instantiates one or more EngineClient objects (one per
//! child process) and registers them with the Engine".

use std::cell::Cell;
use std::process::Stdio;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use cls_engine::{Client, ClientId, LocalBoxFuture};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::broadcast;
use tracing::{instrument, warn};

use crate::event::{DestinationState, Stream, WorkerEvent, NO_REAL_EXIT_CODE};
use crate::sink::EventSink;

#[derive(Clone)]
pub(crate) enum WriteMsg {
    Data(Arc<[u8]>),
    Eof,
}

/// Replace `%h`/`%host`, `%n`/`%rank`, `%hosts` in `template` (spec §4.5).
/// Longer placeholders are substituted first so `%h` doesn't eat the `%h`
/// in `%hosts`.
pub fn render_command(template: &str, node: &str, rank: usize, all_targets: &[String]) -> String {
    template
        .replace("%hosts", &all_targets.join(","))
        .replace("%host", node)
        .replace("%h", node)
        .replace("%rank", &rank.to_string())
        .replace("%n", &rank.to_string())
}

/// A caller-facing write/abort handle, cloneable and cheap, kept alive
/// independently of the per-destination clients handed to the Engine.
#[derive(Clone)]
pub struct WorkerHandle {
    write_tx: broadcast::Sender<WriteMsg>,
    aborted: Rc<Cell<bool>>,
}

impl WorkerHandle {
    /// Enqueue `bytes` for every destination still accepting stdin (spec
    /// §4.5 "Write path").
    pub fn write(&self, bytes: impl Into<Vec<u8>>) {
        let _ = self.write_tx.send(WriteMsg::Data(Arc::from(bytes.into())));
    }

    /// Close stdin for every destination.
    pub fn set_write_eof(&self) {
        let _ = self.write_tx.send(WriteMsg::Eof);
    }

    /// Cancel one outstanding worker without tearing down the whole Task
    /// (`SPEC_FULL.md` §C.5).
    pub fn abort(&self) {
        self.aborted.set(true);
    }
}

/// Configuration for one `ExecWorker` instance.
pub struct ExecSpec {
    pub command: String,
    pub targets: Vec<String>,
    pub connect_timeout: Option<Duration>,
    pub command_timeout: Option<Duration>,
}

/// Local fork/exec across a set of target nodes.
pub struct ExecWorker {
    sink: Rc<dyn EventSink>,
    handle: WorkerHandle,
    clients: Vec<DestinationClient>,
}

impl ExecWorker {
    pub fn new(spec: ExecSpec, sink: Rc<dyn EventSink>) -> Self {
        let (write_tx, _) = broadcast::channel(64);
        let aborted = Rc::new(Cell::new(false));
        let handle = WorkerHandle {
            write_tx: write_tx.clone(),
            aborted: aborted.clone(),
        };
        let remaining = Rc::new(Cell::new(spec.targets.len()));
        let any_timed_out = Rc::new(Cell::new(false));
        let clients = spec
            .targets
            .iter()
            .enumerate()
            .map(|(rank, node)| {
                let id = next_client_id();
                DestinationClient {
                    id,
                    node: node.clone(),
                    command_line: render_command(&spec.command, node, rank, &spec.targets),
                    sink: sink.clone(),
                    write_rx: write_tx.subscribe(),
                    connect_timeout: spec.connect_timeout,
                    command_timeout: spec.command_timeout,
                    aborted: aborted.clone(),
                    remaining: remaining.clone(),
                    any_timed_out: any_timed_out.clone(),
                }
            })
            .collect();
        Self { sink, handle, clients }
    }

    pub fn handle(&self) -> WorkerHandle {
        self.handle.clone()
    }

    /// Emit `Start` and hand back one Engine client per target destination
    /// for the caller to `register`/`start` (spec §4.4, §4.5).
    pub fn into_clients(self) -> Vec<Box<dyn Client>> {
        self.sink.emit(WorkerEvent::Start);
        self.clients
            .into_iter()
            .map(|c| Box::new(c) as Box<dyn Client>)
            .collect()
    }
}

fn next_client_id() -> ClientId {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    COUNTER.fetch_add(1, Ordering::Relaxed)
}

struct DestinationClient {
    id: ClientId,
    node: String,
    command_line: String,
    sink: Rc<dyn EventSink>,
    write_rx: broadcast::Receiver<WriteMsg>,
    connect_timeout: Option<Duration>,
    command_timeout: Option<Duration>,
    aborted: Rc<Cell<bool>>,
    remaining: Rc<Cell<usize>>,
    any_timed_out: Rc<Cell<bool>>,
}

impl Client for DestinationClient {
    fn id(&self) -> ClientId {
        self.id
    }

    fn launch(self: Box<Self>) -> LocalBoxFuture {
        Box::pin(run_destination(*self))
    }
}

#[instrument(skip(dest), fields(node = %dest.node))]
async fn run_destination(mut dest: DestinationClient) {
    dest.sink.emit(WorkerEvent::Pickup {
        node: dest.node.clone(),
    });

    let mut state = DestinationState::Connecting;
    let child = tokio::process::Command::new("sh")
        .arg("-c")
        .arg(&dest.command_line)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn();

    let mut child = match child {
        Ok(c) => c,
        Err(e) => {
            warn!(node = %dest.node, error = %e, "failed to spawn child");
            finish_destination(&dest, 127, false);
            return;
        }
    };

    let stdin = child.stdin.take();
    let stdout = child.stdout.take().expect("piped stdout");
    let stderr = child.stderr.take().expect("piped stderr");

    if let Some(stdin) = stdin {
        tokio::task::spawn_local(run_writer(stdin, dest.write_rx.resubscribe()));
    }

    let connect_deadline = dest.connect_timeout.map(|d| tokio::time::Instant::now() + d);
    let command_deadline = dest.command_timeout.map(|d| tokio::time::Instant::now() + d);
    let mut first_byte_seen = false;
    let mut stdout_done = false;
    let mut stderr_done = false;
    let mut stdout_lines = BufReader::new(stdout).lines();
    let mut stderr_lines = BufReader::new(stderr).lines();
    let mut timed_out = false;

    while !(stdout_done && stderr_done) {
        if dest.aborted.get() {
            timed_out = false;
            break;
        }
        let connect_sleep = sleep_until_opt(if first_byte_seen { None } else { connect_deadline });
        let command_sleep = sleep_until_opt(command_deadline);

        tokio::select! {
            line = stdout_lines.next_line(), if !stdout_done => {
                match line {
                    Ok(Some(l)) => {
                        first_byte_seen = true;
                        state = advance(state, DestinationState::Open);
                        dest.sink.emit(WorkerEvent::Read {
                            node: dest.node.clone(),
                            stream: Stream::Stdout,
                            bytes: l.into_bytes(),
                        });
                    }
                    _ => stdout_done = true,
                }
            }
            line = stderr_lines.next_line(), if !stderr_done => {
                match line {
                    Ok(Some(l)) => {
                        first_byte_seen = true;
                        state = advance(state, DestinationState::Open);
                        dest.sink.emit(WorkerEvent::Read {
                            node: dest.node.clone(),
                            stream: Stream::Stderr,
                            bytes: l.into_bytes(),
                        });
                    }
                    _ => stderr_done = true,
                }
            }
            _ = connect_sleep => {
                timed_out = true;
                break;
            }
            _ = command_sleep => {
                timed_out = true;
                break;
            }
        }
    }
    state = advance(state, DestinationState::Eof);
    let _ = state;

    let rc = if timed_out {
        let _ = child.start_kill();
        let _ = child.wait().await;
        NO_REAL_EXIT_CODE
    } else {
        match child.wait().await {
            Ok(status) => status.code().unwrap_or(NO_REAL_EXIT_CODE),
            Err(_) => NO_REAL_EXIT_CODE,
        }
    };

    finish_destination(&dest, rc, timed_out);
}

fn advance(current: DestinationState, next: DestinationState) -> DestinationState {
    if current == next {
        return current;
    }
    debug_assert!(
        current.can_advance_to(next),
        "illegal destination transition {current:?} -> {next:?}"
    );
    next
}

fn finish_destination(dest: &DestinationClient, rc: i32, timed_out: bool) {
    dest.sink.emit(WorkerEvent::Hup {
        node: dest.node.clone(),
        rc,
    });
    if timed_out {
        dest.any_timed_out.set(true);
    }
    let remaining = dest.remaining.get().saturating_sub(1);
    dest.remaining.set(remaining);
    if remaining == 0 {
        dest.sink.emit(WorkerEvent::Close {
            timed_out: dest.any_timed_out.get(),
        });
    }
}

async fn run_writer(
    mut stdin: tokio::process::ChildStdin,
    mut rx: broadcast::Receiver<WriteMsg>,
) {
    loop {
        match rx.recv().await {
            Ok(WriteMsg::Data(bytes)) => {
                if stdin.write_all(&bytes).await.is_err() {
                    break;
                }
            }
            Ok(WriteMsg::Eof) => {
                let _ = stdin.shutdown().await;
                break;
            }
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn sleep_until_opt(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(d) => tokio::time::sleep_until(d).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_substitution_does_not_cross_contaminate() {
        let targets = vec!["node1".to_string(), "node2".to_string()];
        let rendered = render_command("echo %h on %n of %hosts", "node1", 0, &targets);
        assert_eq!(rendered, "echo node1 on 0 of node1,node2");
    }
}
