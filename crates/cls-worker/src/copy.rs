//! File-copy workers: push (`scp` local → remote) and pull (`scp` remote →
//! local) variants, same event contract as every other worker (spec §4.5
//! "File copy workers").

use std::rc::Rc;
use std::time::Duration;

use crate::exec::{ExecSpec, ExecWorker};
use crate::sink::EventSink;
use crate::ssh::SshOptions;

fn scp_bin(opts: &SshOptions) -> &str {
    opts.ssh_path
        .as_deref()
        .filter(|p| !p.ends_with("ssh") && !p.ends_with("rsh"))
        .unwrap_or("scp")
}

fn target_host(opts: &SshOptions) -> String {
    match &opts.ssh_user {
        Some(user) => format!("{user}@%h"),
        None => "%h".to_string(),
    }
}

pub struct CopyPushWorker;

impl CopyPushWorker {
    /// Copy the same local `src` to `dst` on every target node.
    pub fn new(
        src: &str,
        dst: &str,
        targets: Vec<String>,
        opts: SshOptions,
        connect_timeout: Option<Duration>,
        command_timeout: Option<Duration>,
        sink: Rc<dyn EventSink>,
    ) -> ExecWorker {
        let command = format!("{} {} {}:{}", scp_bin(&opts), src, target_host(&opts), dst);
        ExecWorker::new(
            ExecSpec {
                command,
                targets,
                connect_timeout,
                command_timeout,
            },
            sink,
        )
    }
}

pub struct CopyPullWorker;

impl CopyPullWorker {
    /// Copy `src` from every target node to `dst-%h` locally, so that
    /// pulling the same remote path from N nodes doesn't clobber a single
    /// local file.
    pub fn new(
        src: &str,
        dst: &str,
        targets: Vec<String>,
        opts: SshOptions,
        connect_timeout: Option<Duration>,
        command_timeout: Option<Duration>,
        sink: Rc<dyn EventSink>,
    ) -> ExecWorker {
        let command = format!(
            "{} {}:{} {}-%h",
            scp_bin(&opts),
            target_host(&opts),
            src,
            dst
        );
        ExecWorker::new(
            ExecSpec {
                command,
                targets,
                connect_timeout,
                command_timeout,
            },
            sink,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_command_keeps_host_placeholder_for_per_destination_rendering() {
        let opts = SshOptions {
            ssh_user: Some("root".into()),
            ..Default::default()
        };
        let command = format!("{} {} {}:{}", scp_bin(&opts), "/tmp/a", target_host(&opts), "/tmp/b");
        assert_eq!(command, "scp /tmp/a root@%h:/tmp/b");
    }
}
