//! The gateway wire format (spec §4.7 "Frame format"):
//! `<magic><version><type><length><key><payload>`. Bit-stable within a
//! major release so an old root can still talk to a freshly-deployed
//! gateway binary and vice versa.
//!
//! Layout, all integers big-endian:
//!
//! | field   | size     |
//! |---------|----------|
//! | magic   | 4 bytes  | `b"CLST"`
//! | version | 1 byte   |
//! | type    | 1 byte   | `FrameType` discriminant
//! | key_len | 2 bytes  |
//! | key     | key_len  | destination node identifier, UTF-8
//! | length  | 4 bytes  | payload length
//! | payload | length   |

use cls_worker::NO_REAL_EXIT_CODE;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::RelayError;

pub const MAGIC: [u8; 4] = *b"CLST";
pub const VERSION: u8 = 1;

/// Guards against a corrupt or malicious length prefix turning a framing
/// error into an unbounded allocation (spec §4.7 "Mid-stream framing
/// error").
pub const MAX_PAYLOAD: u32 = 32 * 1024 * 1024;
pub const MAX_KEY_LEN: u16 = 4096;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameType {
    /// Control: the initial sub-target set, command, and forwarded config.
    Ctl,
    /// Stdin bytes fed down from the root.
    In,
    /// A stdout chunk for `key`.
    Out,
    /// A stderr chunk for `key`.
    Err,
    /// `key` has terminated; payload is its 4-byte big-endian return code.
    Hup,
    /// Keep-alive / grooming tick; carries no target-specific data.
    Timer,
    /// Gateway acknowledges it has accepted work for `key`.
    Ack,
    /// No more frames will follow for `key` (or, with an empty key, for
    /// the whole channel).
    Eof,
}

impl FrameType {
    fn tag(self) -> u8 {
        match self {
            Self::Ctl => 0,
            Self::In => 1,
            Self::Out => 2,
            Self::Err => 3,
            Self::Hup => 4,
            Self::Timer => 5,
            Self::Ack => 6,
            Self::Eof => 7,
        }
    }

    fn from_tag(tag: u8) -> Result<Self, RelayError> {
        Ok(match tag {
            0 => Self::Ctl,
            1 => Self::In,
            2 => Self::Out,
            3 => Self::Err,
            4 => Self::Hup,
            5 => Self::Timer,
            6 => Self::Ack,
            7 => Self::Eof,
            other => return Err(RelayError::UnknownFrameType(other)),
        })
    }
}

/// One message on the wire. `key` is the destination node identifier this
/// frame concerns; `Ctl`/`Timer` frames addressed to the whole channel use
/// an empty key.
#[derive(Clone, Debug)]
pub struct Frame {
    pub frame_type: FrameType,
    pub key: String,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(frame_type: FrameType, key: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            frame_type,
            key: key.into(),
            payload,
        }
    }

    pub fn hup(key: impl Into<String>, rc: i32) -> Self {
        Self::new(FrameType::Hup, key, rc.to_be_bytes().to_vec())
    }

    /// Decodes the 4-byte big-endian return code carried by a `Hup` frame.
    /// Returns [`NO_REAL_EXIT_CODE`] if the payload isn't exactly 4 bytes.
    pub fn hup_rc(&self) -> i32 {
        match <[u8; 4]>::try_from(self.payload.as_slice()) {
            Ok(bytes) => i32::from_be_bytes(bytes),
            Err(_) => NO_REAL_EXIT_CODE,
        }
    }

    pub fn eof(key: impl Into<String>) -> Self {
        Self::new(FrameType::Eof, key, Vec::new())
    }

    fn encode(&self) -> Result<Vec<u8>, RelayError> {
        let key_bytes = self.key.as_bytes();
        let key_len: u16 = key_bytes
            .len()
            .try_into()
            .map_err(|_| RelayError::KeyTooLarge(u16::MAX, MAX_KEY_LEN))?;
        if key_len > MAX_KEY_LEN {
            return Err(RelayError::KeyTooLarge(key_len, MAX_KEY_LEN));
        }
        let payload_len: u32 = self
            .payload
            .len()
            .try_into()
            .map_err(|_| RelayError::FrameTooLarge(u32::MAX, MAX_PAYLOAD))?;
        if payload_len > MAX_PAYLOAD {
            return Err(RelayError::FrameTooLarge(payload_len, MAX_PAYLOAD));
        }

        let mut out = Vec::with_capacity(4 + 1 + 1 + 2 + key_bytes.len() + 4 + self.payload.len());
        out.extend_from_slice(&MAGIC);
        out.push(VERSION);
        out.push(self.frame_type.tag());
        out.extend_from_slice(&key_len.to_be_bytes());
        out.extend_from_slice(key_bytes);
        out.extend_from_slice(&payload_len.to_be_bytes());
        out.extend_from_slice(&self.payload);
        Ok(out)
    }
}

/// Writes one frame, preserving its boundary (spec §4.7 "Message
/// boundaries are preserved end-to-end").
pub async fn write_frame<W: AsyncWrite + Unpin>(w: &mut W, frame: &Frame) -> Result<(), RelayError> {
    let bytes = frame.encode()?;
    w.write_all(&bytes)
        .await
        .map_err(|source| RelayError::GatewayUnreachable {
            gateway: frame.key.clone(),
            source,
        })
}

/// Reads one frame. Returns `Ok(None)` only on a clean EOF at a frame
/// boundary (nothing read yet); any other truncation is a framing error.
pub async fn read_frame<R: AsyncRead + Unpin>(r: &mut R) -> Result<Option<Frame>, RelayError> {
    let mut header = [0u8; 4 + 1 + 1 + 2];
    match read_exact_or_eof(r, &mut header).await? {
        false => return Ok(None),
        true => {}
    }

    if header[0..4] != MAGIC {
        return Err(RelayError::BadMagic);
    }
    let version = header[4];
    if version != VERSION {
        return Err(RelayError::UnsupportedVersion(version));
    }
    let frame_type = FrameType::from_tag(header[5])?;
    let key_len = u16::from_be_bytes([header[6], header[7]]);
    if key_len > MAX_KEY_LEN {
        return Err(RelayError::KeyTooLarge(key_len, MAX_KEY_LEN));
    }

    let mut key_buf = vec![0u8; key_len as usize];
    r.read_exact(&mut key_buf)
        .await
        .map_err(|e| RelayError::Framing {
            gateway: String::new(),
            reason: format!("truncated key: {e}"),
        })?;
    let key = String::from_utf8(key_buf).map_err(|e| RelayError::Framing {
        gateway: String::new(),
        reason: format!("key is not valid UTF-8: {e}"),
    })?;

    let mut len_buf = [0u8; 4];
    r.read_exact(&mut len_buf)
        .await
        .map_err(|e| RelayError::Framing {
            gateway: key.clone(),
            reason: format!("truncated length prefix: {e}"),
        })?;
    let payload_len = u32::from_be_bytes(len_buf);
    if payload_len > MAX_PAYLOAD {
        return Err(RelayError::FrameTooLarge(payload_len, MAX_PAYLOAD));
    }

    let mut payload = vec![0u8; payload_len as usize];
    r.read_exact(&mut payload)
        .await
        .map_err(|e| RelayError::Framing {
            gateway: key.clone(),
            reason: format!("truncated payload: {e}"),
        })?;

    Ok(Some(Frame {
        frame_type,
        key,
        payload,
    }))
}

/// Like `read_exact`, but distinguishes "zero bytes read, clean EOF" from
/// any other short read.
async fn read_exact_or_eof<R: AsyncRead + Unpin>(r: &mut R, buf: &mut [u8]) -> Result<bool, RelayError> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = r
            .read(&mut buf[filled..])
            .await
            .map_err(|e| RelayError::Framing {
                gateway: String::new(),
                reason: format!("read error: {e}"),
            })?;
        if n == 0 {
            if filled == 0 {
                return Ok(false);
            }
            return Err(RelayError::Framing {
                gateway: String::new(),
                reason: "connection closed mid-header".to_string(),
            });
        }
        filled += n;
    }
    Ok(true)
}

/// Synchronous counterpart to [`write_frame`]/[`read_frame`], for callers
/// that talk the frame protocol over plain `std::io` (e.g. `cls-gateway`'s
/// process-level stdin/stdout, which must stay off any `tokio` runtime
/// since `cls_task::Task` spins up its own internally and nesting
/// runtimes on one thread panics).
pub fn write_frame_sync<W: std::io::Write>(w: &mut W, frame: &Frame) -> Result<(), RelayError> {
    let bytes = frame.encode()?;
    w.write_all(&bytes).map_err(|source| RelayError::GatewayUnreachable {
        gateway: frame.key.clone(),
        source,
    })
}

/// Sync counterpart to [`read_frame`]. See [`write_frame_sync`].
pub fn read_frame_sync<R: std::io::Read>(r: &mut R) -> Result<Option<Frame>, RelayError> {
    let mut header = [0u8; 4 + 1 + 1 + 2];
    if !read_exact_or_eof_sync(r, &mut header)? {
        return Ok(None);
    }

    if header[0..4] != MAGIC {
        return Err(RelayError::BadMagic);
    }
    let version = header[4];
    if version != VERSION {
        return Err(RelayError::UnsupportedVersion(version));
    }
    let frame_type = FrameType::from_tag(header[5])?;
    let key_len = u16::from_be_bytes([header[6], header[7]]);
    if key_len > MAX_KEY_LEN {
        return Err(RelayError::KeyTooLarge(key_len, MAX_KEY_LEN));
    }

    let mut key_buf = vec![0u8; key_len as usize];
    r.read_exact(&mut key_buf).map_err(|e| RelayError::Framing {
        gateway: String::new(),
        reason: format!("truncated key: {e}"),
    })?;
    let key = String::from_utf8(key_buf).map_err(|e| RelayError::Framing {
        gateway: String::new(),
        reason: format!("key is not valid UTF-8: {e}"),
    })?;

    let mut len_buf = [0u8; 4];
    r.read_exact(&mut len_buf).map_err(|e| RelayError::Framing {
        gateway: key.clone(),
        reason: format!("truncated length prefix: {e}"),
    })?;
    let payload_len = u32::from_be_bytes(len_buf);
    if payload_len > MAX_PAYLOAD {
        return Err(RelayError::FrameTooLarge(payload_len, MAX_PAYLOAD));
    }

    let mut payload = vec![0u8; payload_len as usize];
    r.read_exact(&mut payload).map_err(|e| RelayError::Framing {
        gateway: key.clone(),
        reason: format!("truncated payload: {e}"),
    })?;

    Ok(Some(Frame {
        frame_type,
        key,
        payload,
    }))
}

fn read_exact_or_eof_sync<R: std::io::Read>(r: &mut R, buf: &mut [u8]) -> Result<bool, RelayError> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = r.read(&mut buf[filled..]).map_err(|e| RelayError::Framing {
            gateway: String::new(),
            reason: format!("read error: {e}"),
        })?;
        if n == 0 {
            if filled == 0 {
                return Ok(false);
            }
            return Err(RelayError::Framing {
                gateway: String::new(),
                reason: "connection closed mid-header".to_string(),
            });
        }
        filled += n;
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_a_frame_through_a_pipe() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        let frame = Frame::new(FrameType::Out, "node3", b"hello from node3".to_vec());
        write_frame(&mut client, &frame).await.unwrap();
        let decoded = read_frame(&mut server).await.unwrap().unwrap();
        assert_eq!(decoded.frame_type, FrameType::Out);
        assert_eq!(decoded.key, "node3");
        assert_eq!(decoded.payload, b"hello from node3");
    }

    #[tokio::test]
    async fn preserves_boundaries_across_several_frames() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        let frames = vec![
            Frame::new(FrameType::Out, "a", b"one".to_vec()),
            Frame::new(FrameType::Err, "a", b"two".to_vec()),
            Frame::hup("a", 0),
        ];
        for f in &frames {
            write_frame(&mut client, f).await.unwrap();
        }
        drop(client);
        let mut seen = Vec::new();
        while let Some(f) = read_frame(&mut server).await.unwrap() {
            seen.push(f);
        }
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[2].hup_rc(), 0);
    }

    #[tokio::test]
    async fn clean_eof_before_any_bytes_is_not_an_error() {
        let (client, mut server) = tokio::io::duplex(4096);
        drop(client);
        assert!(read_frame(&mut server).await.unwrap().is_none());
    }

    #[test]
    fn sync_round_trip_matches_async() {
        let frame = Frame::new(FrameType::Ctl, "", b"{}".to_vec());
        let mut buf = Vec::new();
        write_frame_sync(&mut buf, &frame).unwrap();
        let mut cursor = std::io::Cursor::new(buf);
        let decoded = read_frame_sync(&mut cursor).unwrap().unwrap();
        assert_eq!(decoded.frame_type, FrameType::Ctl);
        assert_eq!(decoded.payload, b"{}");
    }

    #[tokio::test]
    async fn oversized_length_prefix_is_rejected_before_allocating() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        let mut header = Vec::new();
        header.extend_from_slice(&MAGIC);
        header.push(VERSION);
        header.push(FrameType::Out.tag());
        header.extend_from_slice(&0u16.to_be_bytes());
        header.extend_from_slice(&(MAX_PAYLOAD + 1).to_be_bytes());
        client.write_all(&header).await.unwrap();
        let err = read_frame(&mut server).await.unwrap_err();
        assert!(matches!(err, RelayError::FrameTooLarge(_, _)));
    }
}
