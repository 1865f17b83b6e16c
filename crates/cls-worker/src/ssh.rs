//! `Ssh`/`Rsh` workers: thin argv-synthesis wrappers around [`ExecWorker`]
//! (spec §4.5 "Ssh/Rsh workers").
//!
//! Neither variant speaks the SSH or RSH wire protocol itself — `ssh`/
//! `rsh` stay opaque child processes per spec.md §1's non-goals. All this
//! module does is build the right command line and hand it to
//! `ExecWorker`, which is what actually forks/execs and wires up the
//! event contract.

use crate::exec::{ExecSpec, ExecWorker};
use crate::sink::EventSink;
use std::rc::Rc;
use std::time::Duration;

/// Per-node connection options, normally sourced from the Task info
/// dictionary's `ssh_user`/`ssh_path`/`ssh_options` (spec §4.5).
#[derive(Clone, Debug, Default)]
pub struct SshOptions {
    pub ssh_user: Option<String>,
    pub ssh_path: Option<String>,
    pub ssh_options: Vec<String>,
}

fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Build the `ssh` argv template, `%h` left intact for `ExecWorker`'s own
/// per-destination substitution pass.
fn ssh_command_line(remote_cmd: &str, opts: &SshOptions) -> String {
    let bin = opts.ssh_path.as_deref().unwrap_or("ssh");
    let mut argv = vec![bin.to_string()];
    argv.extend(opts.ssh_options.iter().cloned());
    let target = match &opts.ssh_user {
        Some(user) => format!("{user}@%h"),
        None => "%h".to_string(),
    };
    argv.push(target);
    argv.push(shell_quote(remote_cmd));
    argv.join(" ")
}

fn rsh_command_line(remote_cmd: &str, opts: &SshOptions) -> String {
    let bin = opts.ssh_path.as_deref().unwrap_or("rsh");
    let mut argv = vec![bin.to_string()];
    if let Some(user) = &opts.ssh_user {
        argv.push("-l".to_string());
        argv.push(user.clone());
    }
    argv.push("%h".to_string());
    argv.push(shell_quote(remote_cmd));
    argv.join(" ")
}

pub struct SshWorker;

impl SshWorker {
    pub fn new(
        remote_cmd: &str,
        targets: Vec<String>,
        opts: SshOptions,
        connect_timeout: Option<Duration>,
        command_timeout: Option<Duration>,
        sink: Rc<dyn EventSink>,
    ) -> ExecWorker {
        ExecWorker::new(
            ExecSpec {
                command: ssh_command_line(remote_cmd, &opts),
                targets,
                connect_timeout,
                command_timeout,
            },
            sink,
        )
    }
}

pub struct RshWorker;

impl RshWorker {
    pub fn new(
        remote_cmd: &str,
        targets: Vec<String>,
        opts: SshOptions,
        connect_timeout: Option<Duration>,
        command_timeout: Option<Duration>,
        sink: Rc<dyn EventSink>,
    ) -> ExecWorker {
        ExecWorker::new(
            ExecSpec {
                command: rsh_command_line(remote_cmd, &opts),
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
    fn ssh_command_line_quotes_remote_command_and_keeps_host_placeholder() {
        let opts = SshOptions {
            ssh_user: Some("root".into()),
            ssh_path: None,
            ssh_options: vec!["-o".into(), "BatchMode=yes".into()],
        };
        let line = ssh_command_line("uptime; echo done", &opts);
        assert_eq!(line, "ssh -o BatchMode=yes root@%h 'uptime; echo done'");
    }

    #[test]
    fn rsh_command_line_omits_quoting_flags() {
        let opts = SshOptions::default();
        let line = rsh_command_line("uptime", &opts);
        assert_eq!(line, "rsh %h 'uptime'");
    }
}
