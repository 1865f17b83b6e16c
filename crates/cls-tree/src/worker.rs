//! `TreeWorker`: the root-side half of the tree propagation protocol
//! (spec §4.5 "TreeWorker", §4.7). Scheduled on the root `Task` exactly
//! like any other worker (spec §9 "all variants are driven identically");
//! it opens one framed channel per gateway selected by a [`RouteTable`]
//! and relays `Ctl`/`In`/`Eof` frames down, translating `Out`/`Err`/`Hup`
//! frames back into the same [`WorkerEvent`] stream every other worker
//! variant emits.
//!
//! Targets the route table doesn't cover ("nodes not in the graph") are
//! *not* this worker's concern — the caller is expected to run those
//! through an ordinary [`cls_worker::SshWorker`] against the same sink, so
//! both halves fold into one `Task::stdout`/`stderr` `MsgTree` (see
//! `DESIGN.md`, "direct vs. routed targets").

use std::cell::Cell;
use std::process::Stdio;
use std::rc::Rc;
use std::time::Duration;

use cls_core::NodeSet;
use cls_engine::{Client, ClientId, LocalBoxFuture};
use cls_worker::{EventSink, Stream, WorkerEvent, NO_REAL_EXIT_CODE};
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::sync::broadcast;
use tracing::{instrument, warn};

use crate::ctl::{ControlBody, DistantWorkerKind};
use crate::frame::{read_frame, write_frame, Frame, FrameType};
use crate::routing::RouteTable;

#[derive(Clone)]
enum WriteMsg {
    Data(std::sync::Arc<[u8]>),
    Eof,
}

/// Write/abort handle for a scheduled `TreeWorker`, the tree-mode
/// counterpart to [`cls_worker::WorkerHandle`].
#[derive(Clone)]
pub struct TreeWorkerHandle {
    write_tx: broadcast::Sender<WriteMsg>,
    aborted: Rc<Cell<bool>>,
}

impl TreeWorkerHandle {
    pub fn write(&self, bytes: impl Into<Vec<u8>>) {
        let _ = self.write_tx.send(WriteMsg::Data(std::sync::Arc::from(bytes.into())));
    }

    pub fn set_write_eof(&self) {
        let _ = self.write_tx.send(WriteMsg::Eof);
    }

    pub fn abort(&self) {
        self.aborted.set(true);
    }
}

/// Per-gateway-hop configuration, forwarded into each `Ctl` frame (spec
/// §4.7 item 1, "the forwarded configuration subset").
#[derive(Clone)]
pub struct TreeSpec {
    pub command: String,
    /// Name or argv of the ssh-like binary used to reach each gateway.
    pub ssh_path: Option<String>,
    pub ssh_user: Option<String>,
    /// The command line run on the gateway host to start the recursive
    /// gateway process, e.g. `"cls-gateway"`.
    pub gateway_bin: String,
    pub fanout: usize,
    pub connect_timeout: Option<Duration>,
    pub command_timeout: Option<Duration>,
    pub grooming_delay: Duration,
    pub distant_worker: DistantWorkerKind,
}

/// The root-side worker. Owns one [`GatewayChannelClient`] per gateway the
/// [`RouteTable`] selected for `targets`.
pub struct TreeWorker {
    sink: Rc<dyn EventSink>,
    handle: TreeWorkerHandle,
    clients: Vec<GatewayChannelClient>,
    /// Targets the route table didn't cover; the caller runs these
    /// through a plain worker instead (see module docs).
    direct: NodeSet,
}

impl TreeWorker {
    pub fn new(spec: TreeSpec, targets: &NodeSet, routes: &RouteTable, sink: Rc<dyn EventSink>) -> Self {
        let plan = routes.plan(targets);
        let (write_tx, _) = broadcast::channel(64);
        let aborted = Rc::new(Cell::new(false));
        let handle = TreeWorkerHandle {
            write_tx: write_tx.clone(),
            aborted: aborted.clone(),
        };
        let total_targets: usize = plan.via_gateway.iter().map(|(_, ns)| ns.length()).sum();
        let remaining = Rc::new(Cell::new(total_targets));
        let any_timed_out = Rc::new(Cell::new(false));

        let clients = plan
            .via_gateway
            .into_iter()
            .map(|(gateway, subset)| {
                let target_names: Vec<String> = subset.iter().collect();
                GatewayChannelClient {
                    id: next_client_id(),
                    gateway,
                    targets: target_names.clone(),
                    control: ControlBody {
                        targets: subset.format(Default::default()),
                        command: spec.command.clone(),
                        fanout: spec.fanout,
                        connect_timeout_secs: spec.connect_timeout.map(|d| d.as_secs()),
                        command_timeout_secs: spec.command_timeout.map(|d| d.as_secs()),
                        grooming_delay_ms: spec.grooming_delay.as_millis() as u64,
                        distant_worker: spec.distant_worker,
                    },
                    ssh_path: spec.ssh_path.clone(),
                    ssh_user: spec.ssh_user.clone(),
                    gateway_bin: spec.gateway_bin.clone(),
                    connect_timeout: spec.connect_timeout,
                    command_timeout: spec.command_timeout,
                    sink: sink.clone(),
                    write_rx: write_tx.subscribe(),
                    aborted: aborted.clone(),
                    remaining: remaining.clone(),
                    any_timed_out: any_timed_out.clone(),
                }
            })
            .collect();

        Self {
            sink,
            handle,
            clients,
            direct: plan.direct,
        }
    }

    pub fn handle(&self) -> TreeWorkerHandle {
        self.handle.clone()
    }

    /// Targets not covered by the route table; run these through an
    /// ordinary worker against the same sink (module docs).
    pub fn direct_targets(&self) -> &NodeSet {
        &self.direct
    }

    /// Emit `Start` and hand back one Engine client per selected gateway
    /// (spec §4.4, §4.5). If no gateway covers any of `targets`, this
    /// emits `Start` then immediately `Close { timed_out: false }` since
    /// there is nothing left for this worker to drive.
    pub fn into_clients(self) -> Vec<Box<dyn Client>> {
        self.sink.emit(WorkerEvent::Start);
        if self.clients.is_empty() {
            self.sink.emit(WorkerEvent::Close { timed_out: false });
            return Vec::new();
        }
        self.clients
            .into_iter()
            .map(|c| Box::new(c) as Box<dyn Client>)
            .collect()
    }
}

fn next_client_id() -> ClientId {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(1 << 32);
    COUNTER.fetch_add(1, Ordering::Relaxed)
}

struct GatewayChannelClient {
    id: ClientId,
    gateway: String,
    targets: Vec<String>,
    control: ControlBody,
    ssh_path: Option<String>,
    ssh_user: Option<String>,
    gateway_bin: String,
    connect_timeout: Option<Duration>,
    command_timeout: Option<Duration>,
    sink: Rc<dyn EventSink>,
    write_rx: broadcast::Receiver<WriteMsg>,
    aborted: Rc<Cell<bool>>,
    remaining: Rc<Cell<usize>>,
    any_timed_out: Rc<Cell<bool>>,
}

impl GatewayChannelClient {
    fn ssh_argv(&self) -> String {
        let bin = self.ssh_path.as_deref().unwrap_or("ssh");
        let target = match &self.ssh_user {
            Some(user) => format!("{user}@{}", self.gateway),
            None => self.gateway.clone(),
        };
        format!("{bin} {target} {}", self.gateway_bin)
    }

    /// Report every target still outstanding on this channel as a
    /// synthetic failure (spec §4.7 "Gateway unreachable"/"Mid-stream
    /// framing error": "the targets behind that gateway are reported as
    /// failed with a synthetic non-zero return code; siblings are
    /// unaffected").
    fn fail_all_outstanding(&self, reported: &std::collections::HashSet<String>) {
        for node in &self.targets {
            if reported.contains(node) {
                continue;
            }
            self.sink.emit(WorkerEvent::Hup {
                node: node.clone(),
                rc: NO_REAL_EXIT_CODE,
            });
            self.any_timed_out.set(true);
            let remaining = self.remaining.get().saturating_sub(1);
            self.remaining.set(remaining);
        }
    }
}

impl Client for GatewayChannelClient {
    fn id(&self) -> ClientId {
        self.id
    }

    fn launch(self: Box<Self>) -> LocalBoxFuture {
        Box::pin(run_channel(*self))
    }
}

#[instrument(skip(client), fields(gateway = %client.gateway))]
async fn run_channel(mut client: GatewayChannelClient) {
    for node in &client.targets {
        client.sink.emit(WorkerEvent::Pickup { node: node.clone() });
    }

    let mut child = match tokio::process::Command::new("sh")
        .arg("-c")
        .arg(client.ssh_argv())
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
    {
        Ok(c) => c,
        Err(e) => {
            warn!(gateway = %client.gateway, error = %e, "failed to spawn gateway channel");
            client.fail_all_outstanding(&Default::default());
            maybe_close(&client);
            return;
        }
    };

    let mut stdin = child.stdin.take().expect("piped stdin");
    let stdout = child.stdout.take().expect("piped stdout");
    let mut reader = BufReader::new(stdout);

    let ctl = Frame::new(FrameType::Ctl, "", client.control.to_payload());
    if write_frame(&mut stdin, &ctl).await.is_err() {
        client.fail_all_outstanding(&Default::default());
        maybe_close(&client);
        return;
    }

    tokio::task::spawn_local(forward_stdin(stdin, client.write_rx.resubscribe()));

    let mut reported: std::collections::HashSet<String> = std::collections::HashSet::new();
    let connect_deadline = client.connect_timeout.map(|d| tokio::time::Instant::now() + d);
    let command_deadline = client.command_timeout.map(|d| tokio::time::Instant::now() + d);
    let mut first_byte_seen = false;

    loop {
        if client.aborted.get() {
            break;
        }
        if reported.len() >= client.targets.len() {
            break;
        }
        let timeout_sleep = sleep_until_opt(if first_byte_seen { command_deadline } else { connect_deadline.min_with(command_deadline) });
        tokio::select! {
            frame = read_frame(&mut reader) => {
                match frame {
                    Ok(Some(frame)) => {
                        first_byte_seen = true;
                        handle_frame(&client, frame, &mut reported);
                    }
                    Ok(None) => {
                        client.fail_all_outstanding(&reported);
                        break;
                    }
                    Err(e) => {
                        warn!(gateway = %client.gateway, error = %e, "tree channel framing error");
                        client.fail_all_outstanding(&reported);
                        break;
                    }
                }
            }
            _ = timeout_sleep => {
                client.fail_all_outstanding(&reported);
                break;
            }
        }
    }

    let _ = child.start_kill();
    let _ = child.wait().await;
    maybe_close(&client);
}

fn handle_frame(
    client: &GatewayChannelClient,
    frame: Frame,
    reported: &mut std::collections::HashSet<String>,
) {
    match frame.frame_type {
        FrameType::Out | FrameType::Err => {
            client.sink.emit(WorkerEvent::Read {
                node: frame.key.clone(),
                stream: if frame.frame_type == FrameType::Out { Stream::Stdout } else { Stream::Stderr },
                bytes: frame.payload,
            });
        }
        FrameType::Hup => {
            let rc = frame.hup_rc();
            client.sink.emit(WorkerEvent::Hup {
                node: frame.key.clone(),
                rc,
            });
            if rc < 0 {
                client.any_timed_out.set(true);
            }
            reported.insert(frame.key.clone());
            let remaining = client.remaining.get().saturating_sub(1);
            client.remaining.set(remaining);
        }
        FrameType::Ack | FrameType::Timer | FrameType::Ctl | FrameType::In | FrameType::Eof => {
            // Acks/timers are liveness-only; Ctl/In/Eof never flow upstream.
        }
    }
}

fn maybe_close(client: &GatewayChannelClient) {
    if client.remaining.get() == 0 {
        client.sink.emit(WorkerEvent::Close {
            timed_out: client.any_timed_out.get(),
        });
    }
}

async fn forward_stdin(mut stdin: tokio::process::ChildStdin, mut rx: broadcast::Receiver<WriteMsg>) {
    loop {
        match rx.recv().await {
            Ok(WriteMsg::Data(bytes)) => {
                let frame = Frame::new(FrameType::In, "", bytes.to_vec());
                if write_frame(&mut stdin, &frame).await.is_err() {
                    break;
                }
            }
            Ok(WriteMsg::Eof) => {
                let frame = Frame::eof("");
                let _ = write_frame(&mut stdin, &frame).await;
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

trait InstantMinExt {
    fn min_with(self, other: Option<tokio::time::Instant>) -> Option<tokio::time::Instant>;
}

impl InstantMinExt for Option<tokio::time::Instant> {
    fn min_with(self, other: Option<tokio::time::Instant>) -> Option<tokio::time::Instant> {
        match (self, other) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (None, None) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::RouteTable;
    use cls_worker::ChannelSink;

    fn ns(text: &str) -> NodeSet {
        NodeSet::parse(text, None).unwrap()
    }

    #[test]
    fn empty_route_table_leaves_everything_direct() {
        let (sink, _rx) = ChannelSink::new();
        let routes = RouteTable::new();
        let targets = ns("node[1-4]");
        let worker = TreeWorker::new(
            TreeSpec {
                command: "uptime".into(),
                ssh_path: None,
                ssh_user: None,
                gateway_bin: "cls-gateway".into(),
                fanout: 4,
                connect_timeout: None,
                command_timeout: None,
                grooming_delay: Duration::from_millis(100),
                distant_worker: DistantWorkerKind::Ssh,
            },
            &targets,
            &routes,
            sink,
        );
        assert_eq!(worker.direct_targets().length(), 4);
        assert!(worker.into_clients().is_empty());
    }

    #[test]
    fn covered_targets_spawn_one_client_per_gateway() {
        let (sink, _rx) = ChannelSink::new();
        let mut routes = RouteTable::new();
        routes.add_route("gw1", ns("node[1-2]"));
        let targets = ns("node[1-4]");
        let worker = TreeWorker::new(
            TreeSpec {
                command: "uptime".into(),
                ssh_path: None,
                ssh_user: None,
                gateway_bin: "cls-gateway".into(),
                fanout: 4,
                connect_timeout: None,
                command_timeout: None,
                grooming_delay: Duration::from_millis(100),
                distant_worker: DistantWorkerKind::Ssh,
            },
            &targets,
            &routes,
            sink,
        );
        assert_eq!(worker.direct_targets().length(), 2);
        assert_eq!(worker.into_clients().len(), 1);
    }
}
