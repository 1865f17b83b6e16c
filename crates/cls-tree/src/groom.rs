//! Gateway-side output grooming (spec §4.7 "Each gateway delays forwarding
//! output by a configurable `grooming_delay` so that it can batch and fold
//! results through its own MsgTree before sending them upstream").
//!
//! `OutputGroomer` buffers `Out`/`Err` frames through a [`cls_core::MsgTree`]
//! keyed by producer (the frame's `key`), so N destinations emitting
//! byte-for-byte the same output fold into a single upstream frame keyed by
//! their producer set — the same aggregation `cls-task` performs on the
//! root, just one hop earlier. Frames the tree can't fold by content
//! (`Ctl`/`In`/`Hup`/`Timer`/`Ack`/`Eof`) pass through untouched, in arrival
//! order relative to each other.
//!
//! `OutputGroomer` has no clock of its own: the gateway session loop
//! (`cls-gateway`) decides *when* to call [`flush`] (on a grooming-delay
//! timer tick) and feeds it frames as they arrive from the local `Task`'s
//! event stream via [`push`]. Keeping the clock out of this type is what
//! makes it unit-testable without `tokio::time`.
//!
//! [`flush`]: OutputGroomer::flush
//! [`push`]: OutputGroomer::push

use cls_core::{MsgTree, NodeSet};

use crate::frame::{Frame, FrameType};

/// Buffers outgoing frames and flushes early on overrun (spec §4.7
/// "Grooming buffer overrun (bounded): the gateway flushes early and
/// continues").
pub struct OutputGroomer {
    max_buffered_bytes: usize,
    stdout: MsgTree<String>,
    stderr: MsgTree<String>,
    passthrough: Vec<Frame>,
    buffered_bytes: usize,
}

impl OutputGroomer {
    pub fn new(max_buffered_bytes: usize) -> Self {
        Self {
            max_buffered_bytes,
            stdout: MsgTree::new(),
            stderr: MsgTree::new(),
            passthrough: Vec::new(),
            buffered_bytes: 0,
        }
    }

    /// Buffer `frame`. `Out`/`Err` frames are folded into the matching
    /// per-stream `MsgTree` keyed by producer; everything else is held
    /// verbatim. If the buffer's byte budget is now exceeded, immediately
    /// returns every buffered frame (folded plus verbatim, folded frames
    /// first) for the caller to send; otherwise returns an empty vec and
    /// `frame` stays buffered until the next [`flush`](Self::flush) or
    /// overrun.
    pub fn push(&mut self, frame: Frame) -> Vec<Frame> {
        self.buffered_bytes += frame.payload.len();
        match frame.frame_type {
            FrameType::Out => self.stdout.add(frame.key, frame.payload),
            FrameType::Err => self.stderr.add(frame.key, frame.payload),
            _ => self.passthrough.push(frame),
        }
        if self.buffered_bytes > self.max_buffered_bytes {
            self.flush()
        } else {
            Vec::new()
        }
    }

    /// Drain and return every buffered frame: one folded `Out` frame per
    /// distinct stdout equivalence class, then one folded `Err` frame per
    /// distinct stderr equivalence class, then every passed-through frame
    /// in arrival order. Called by the session loop on each
    /// `grooming_delay` tick.
    pub fn flush(&mut self) -> Vec<Frame> {
        let mut out = Vec::new();
        for (bytes, keys) in self.stdout.walk() {
            out.push(Frame::new(FrameType::Out, fold_key(&keys), bytes));
        }
        for (bytes, keys) in self.stderr.walk() {
            out.push(Frame::new(FrameType::Err, fold_key(&keys), bytes));
        }
        out.extend(std::mem::take(&mut self.passthrough));
        self.stdout = MsgTree::new();
        self.stderr = MsgTree::new();
        self.buffered_bytes = 0;
        out
    }

    pub fn is_empty(&self) -> bool {
        self.stdout.is_empty() && self.stderr.is_empty() && self.passthrough.is_empty()
    }

    pub fn buffered_bytes(&self) -> usize {
        self.buffered_bytes
    }
}

/// Folds a producer-set into the upstream frame's `key`: the canonical
/// `NodeSet::format()` of the keys when they round-trip cleanly as a plain
/// comma-union of node-set literals (the common case — destinations are
/// host names), falling back to a plain comma-join otherwise (e.g. test
/// fixtures, or a key containing characters the pattern grammar reserves).
/// Either form round-trips through `NodeSet::parse` on the receiving end
/// for the common case, matching the open-question decision in
/// `DESIGN.md` to carry the producer set as text rather than a binary
/// layout.
fn fold_key(keys: &[String]) -> String {
    let joined = keys.join(",");
    match NodeSet::parse(&joined, None) {
        Ok(set) if set.length() == keys.len() => set.format(Default::default()),
        _ => joined,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn out_frame(key: &str, n: usize) -> Frame {
        Frame::new(FrameType::Out, key, vec![b'x'; n])
    }

    #[test]
    fn buffers_below_the_threshold() {
        let mut groomer = OutputGroomer::new(1024);
        assert!(groomer.push(out_frame("n1", 10)).is_empty());
        assert!(groomer.push(out_frame("n1", 10)).is_empty());
        assert!(!groomer.is_empty());
        assert_eq!(groomer.buffered_bytes(), 20);
    }

    #[test]
    fn flushes_early_on_overrun() {
        let mut groomer = OutputGroomer::new(16);
        assert!(groomer.push(out_frame("n1", 10)).is_empty());
        let flushed = groomer.push(out_frame("n2", 10));
        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[0].key, "n[1-2]");
        assert!(groomer.is_empty());
    }

    #[test]
    fn flush_folds_identical_output_across_producers() {
        // mirrors spec §8 scenario 6, one hop earlier: node1/node2 produce
        // the same line, node3 produces a different one.
        let mut groomer = OutputGroomer::new(1024);
        groomer.push(out_frame_text("node1", "2.6.32"));
        groomer.push(out_frame_text("node2", "2.6.32"));
        groomer.push(out_frame_text("node3", "3.10.0"));
        let mut flushed = groomer.flush();
        flushed.sort_by(|a, b| a.key.cmp(&b.key));
        assert_eq!(flushed.len(), 2);
        assert_eq!(flushed[0].key, "node3");
        assert_eq!(flushed[0].payload, b"3.10.0");
        assert_eq!(flushed[1].key, "node[1-2]");
        assert_eq!(flushed[1].payload, b"2.6.32");
    }

    #[test]
    fn flush_keeps_distinct_keys_separate_across_streams() {
        let mut groomer = OutputGroomer::new(1024);
        groomer.push(out_frame_text("node1", "same"));
        groomer.push(Frame::new(FrameType::Err, "node1", b"same".to_vec()));
        let flushed = groomer.flush();
        assert_eq!(flushed.len(), 2);
        assert!(flushed.iter().any(|f| f.frame_type == FrameType::Out));
        assert!(flushed.iter().any(|f| f.frame_type == FrameType::Err));
    }

    #[test]
    fn hup_and_other_frames_pass_through_unfolded() {
        let mut groomer = OutputGroomer::new(1024);
        groomer.push(out_frame_text("node1", "line"));
        groomer.push(Frame::hup("node1", 0));
        groomer.push(Frame::hup("node2", 3));
        let flushed = groomer.flush();
        let hups: Vec<&Frame> = flushed
            .iter()
            .filter(|f| f.frame_type == FrameType::Hup)
            .collect();
        assert_eq!(hups.len(), 2);
    }

    fn out_frame_text(key: &str, text: &str) -> Frame {
        Frame::new(FrameType::Out, key, text.as_bytes().to_vec())
    }
}
