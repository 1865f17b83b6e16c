//! The gateway's frame loop (spec §4.7): read one `Ctl` frame, run its
//! command against this hop's share of the targets — recursing into
//! further gateways through its own `RouteTable` exactly like the root
//! does — and stream results back upstream as framed `Out`/`Err`/`Hup`.
//!
//! Deliberately synchronous at this layer. `cls_task::Task` builds its own
//! `tokio::runtime::Runtime` internally (`cls-engine`'s `Engine::run`), and
//! nesting a second runtime on a thread that already has one panics. So
//! stdin/stdout here talk the frame protocol through the sync codec
//! (`cls_tree::{read_frame_sync, write_frame_sync}`), and the only
//! tokio runtime anywhere in this process is the one `Task::run_scheduled`
//! creates and tears down for us.

use std::rc::Rc;
use std::sync::mpsc as stdmpsc;
use std::time::Duration;

use cls_core::NodeSet;
use cls_task::{reset_task_self, DistantWorkerKind as TaskDistantWorkerKind, Handler, TaskConfig};
use cls_tree::{
    read_frame_sync, write_frame_sync, ControlBody, Frame, FrameType, OutputGroomer, RelayError,
    RouteTable, TreeSpec, TreeWorker,
};
use cls_worker::{Stream as WStream, WorkerEvent};
use tracing::{info, warn};

pub struct GatewaySession {
    pub routes: RouteTable,
    pub max_groomed_bytes: usize,
}

impl GatewaySession {
    /// Drives one full session: one `Ctl` frame in, a stream of result
    /// frames out, a final `Eof` once every destination has reported.
    /// Returns once `stdout` has been closed, whatever `stdin` does next.
    pub fn run<R: std::io::Read, W: std::io::Write + Send + 'static>(
        &self,
        mut stdin: R,
        stdout: W,
    ) -> Result<(), RelayError> {
        let Some(ctl) = read_frame_sync(&mut stdin)? else {
            return Ok(());
        };
        if ctl.frame_type != FrameType::Ctl {
            return Err(RelayError::Framing {
                gateway: String::new(),
                reason: "first frame on a gateway channel must be Ctl".to_string(),
            });
        }
        let body = ControlBody::from_payload(&ctl.payload)?;
        let targets = NodeSet::parse(&body.targets, None).map_err(|e| RelayError::Framing {
            gateway: String::new(),
            reason: format!("control frame targets: {e}"),
        })?;
        info!(targets = %body.targets, command = %body.command, "gateway session starting");

        let (frame_tx, frame_rx) = stdmpsc::channel::<Frame>();
        let grooming_delay = Duration::from_millis(body.grooming_delay_ms).max(Duration::from_millis(1));
        let max_groomed_bytes = self.max_groomed_bytes;
        let writer = std::thread::spawn(move || groom_and_write(frame_rx, grooming_delay, max_groomed_bytes, stdout));

        let task_config = TaskConfig {
            fanout: body.fanout.max(1),
            connect_timeout: body.connect_timeout_secs.map(Duration::from_secs),
            command_timeout: body.command_timeout_secs.map(Duration::from_secs),
            distant_worker: match body.distant_worker {
                cls_tree::DistantWorkerKind::Ssh => TaskDistantWorkerKind::Ssh,
                cls_tree::DistantWorkerKind::Rsh => TaskDistantWorkerKind::Rsh,
            },
            ..Default::default()
        };
        let task = reset_task_self(task_config.clone());

        let tx_for_handler = frame_tx.clone();
        let handler: Handler = Rc::new(move |event: &WorkerEvent| forward_event(event, &tx_for_handler));

        let plan = self.routes.plan(&targets);
        let direct_nodes: Vec<String> = plan.direct.iter().collect();
        if !direct_nodes.is_empty() {
            task.shell(
                &body.command,
                &direct_nodes,
                Some(handler.clone()),
                task_config.command_timeout,
                false,
            );
        }

        if !plan.via_gateway.is_empty() {
            let sink = task.event_sink(Some(handler));
            let tree_spec = TreeSpec {
                command: body.command.clone(),
                ssh_path: None,
                ssh_user: None,
                gateway_bin: "cls-gateway".to_string(),
                fanout: body.fanout.max(1),
                connect_timeout: task_config.connect_timeout,
                command_timeout: task_config.command_timeout,
                grooming_delay: Duration::from_millis(body.grooming_delay_ms),
                distant_worker: body.distant_worker,
            };
            let tree_worker = TreeWorker::new(tree_spec, &targets, &self.routes, sink);
            task.schedule(tree_worker.into_clients());
        }

        task.resume();
        let overall_timeout = combine_timeouts(task_config.connect_timeout, task_config.command_timeout);
        if let Err(e) = task.run_scheduled(overall_timeout) {
            warn!(error = %e, "gateway's local task run ended with an error");
        }

        drop(frame_tx);
        let _ = writer.join();
        Ok(())
    }
}

fn combine_timeouts(connect: Option<Duration>, command: Option<Duration>) -> Option<Duration> {
    match (connect, command) {
        (Some(a), Some(b)) => Some(a + b),
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    }
}

fn forward_event(event: &WorkerEvent, tx: &stdmpsc::Sender<Frame>) {
    let frame = match event {
        WorkerEvent::Read { node, stream, bytes } => {
            let frame_type = match stream {
                WStream::Stdout => FrameType::Out,
                WStream::Stderr => FrameType::Err,
            };
            Frame::new(frame_type, node.clone(), bytes.clone())
        }
        WorkerEvent::Hup { node, rc } => Frame::hup(node.clone(), *rc),
        _ => return,
    };
    let _ = tx.send(frame);
}

/// Owns the groomer and the only stdout writer in the process, so the
/// Task thread's event handler never performs blocking I/O itself (spec
/// §4.7 "grooming_delay" batches writes; `OutputGroomer` module docs).
fn groom_and_write<W: std::io::Write>(
    rx: stdmpsc::Receiver<Frame>,
    grooming_delay: Duration,
    max_groomed_bytes: usize,
    mut stdout: W,
) {
    let mut groomer = OutputGroomer::new(max_groomed_bytes);
    loop {
        match rx.recv_timeout(grooming_delay) {
            Ok(frame) => {
                for flushed in groomer.push(frame) {
                    if write_frame_sync(&mut stdout, &flushed).is_err() {
                        return;
                    }
                }
            }
            Err(stdmpsc::RecvTimeoutError::Timeout) => {
                for flushed in groomer.flush() {
                    if write_frame_sync(&mut stdout, &flushed).is_err() {
                        return;
                    }
                }
            }
            Err(stdmpsc::RecvTimeoutError::Disconnected) => {
                for flushed in groomer.flush() {
                    let _ = write_frame_sync(&mut stdout, &flushed);
                }
                let _ = write_frame_sync(&mut stdout, &Frame::eof(""));
                return;
            }
        }
    }
}
