//! `TaskConfig`: the Task's info dictionary (spec §4.6).
//!
//! On-disk `clush.conf`/`groups.conf`/YAML loaders stay out of scope
//! (spec.md §1); this is only the in-memory typed shape an external
//! collaborator (a `clush`-like CLI) would populate from one.

use std::time::Duration;

#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[derive(Clone, Debug)]
pub struct TaskConfig {
    /// Engine sliding-window size (spec §4.4 "start").
    pub fanout: usize,
    /// Per-destination connect deadline.
    #[cfg_attr(feature = "serde", serde(default, with = "duration_secs_opt"))]
    pub connect_timeout: Option<Duration>,
    /// Per-destination command deadline.
    #[cfg_attr(feature = "serde", serde(default, with = "duration_secs_opt"))]
    pub command_timeout: Option<Duration>,
    /// Enable `tracing` debug/trace-level instrumentation; the actual sink
    /// is whatever `tracing_subscriber` layer the caller installs
    /// (`SPEC_FULL.md` §B), not a field on this struct.
    pub debug: bool,
    /// Default for `Task::shell`'s stdin plumbing when not overridden per
    /// call.
    pub stdin: bool,
    /// Worker class used for remote commands.
    pub distant_worker: DistantWorkerKind,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            fanout: 64,
            connect_timeout: Some(Duration::from_secs(10)),
            command_timeout: None,
            debug: false,
            stdin: true,
            distant_worker: DistantWorkerKind::default(),
        }
    }
}

#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DistantWorkerKind {
    #[default]
    Ssh,
    Rsh,
}

#[cfg(feature = "serde")]
mod duration_secs_opt {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&d.as_secs()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        let secs: Option<u64> = Option::deserialize(d)?;
        Ok(secs.map(Duration::from_secs))
    }
}
