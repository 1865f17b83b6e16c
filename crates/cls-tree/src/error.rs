//! Tree-relay failure taxonomy (spec §4.7 "Failure model").
//!
//! Like [`cls_worker::WorkerError`], none of these abort the owning Task on
//! their own; `GatewayChannel` turns each one into a synthetic non-zero
//! `Hup` for the targets it was responsible for and keeps going.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("gateway {gateway} unreachable: {source}")]
    GatewayUnreachable {
        gateway: String,
        #[source]
        source: std::io::Error,
    },

    #[error("framing error on channel to {gateway}: {reason}")]
    Framing { gateway: String, reason: String },

    #[error("frame payload length {0} exceeds the maximum of {1} bytes")]
    FrameTooLarge(u32, u32),

    #[error("frame key length {0} exceeds the maximum of {1} bytes")]
    KeyTooLarge(u16, u16),

    #[error("unrecognized frame type tag {0}")]
    UnknownFrameType(u8),

    #[error("unsupported frame protocol version {0}")]
    UnsupportedVersion(u8),

    #[error("bad magic bytes in frame header")]
    BadMagic,

    #[error("malformed control payload: {0}")]
    MalformedControl(#[from] serde_json::Error),
}
