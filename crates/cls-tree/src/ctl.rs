//! The typed body carried by a `Ctl` frame (spec §4.7, item 1): "the child
//! sub-target set, the command, and the forwarded configuration subset
//! (fanout, timeouts, worker flags)".
//!
//! `NodeSet` itself has no `serde` impl (its `Skeleton` keys aren't a
//! natural wire shape); everything here round-trips through its `format`/
//! `parse` text representation instead, same as a human would type it on
//! a command line.

use serde::{Deserialize, Serialize};

use crate::error::RelayError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DistantWorkerKind {
    Ssh,
    Rsh,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ControlBody {
    /// `NodeSet::format`ed text of the targets this gateway is
    /// responsible for.
    pub targets: String,
    pub command: String,
    pub fanout: usize,
    pub connect_timeout_secs: Option<u64>,
    pub command_timeout_secs: Option<u64>,
    /// How long the remote gateway should batch output before forwarding
    /// (spec §4.7 "grooming_delay").
    pub grooming_delay_ms: u64,
    pub distant_worker: DistantWorkerKind,
}

impl ControlBody {
    pub fn to_payload(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("ControlBody fields are all plain serializable data")
    }

    pub fn from_payload(bytes: &[u8]) -> Result<Self, RelayError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_body_round_trips_through_json() {
        let body = ControlBody {
            targets: "node[1-4]".to_string(),
            command: "uptime".to_string(),
            fanout: 32,
            connect_timeout_secs: Some(10),
            command_timeout_secs: None,
            grooming_delay_ms: 250,
            distant_worker: DistantWorkerKind::Ssh,
        };
        let bytes = body.to_payload();
        let back = ControlBody::from_payload(&bytes).unwrap();
        assert_eq!(back.targets, "node[1-4]");
        assert_eq!(back.fanout, 32);
        assert_eq!(back.distant_worker, DistantWorkerKind::Ssh);
    }
}
