//! The reactor's sorted timer heap (spec §3 "Engine state", §4.4 step 1/3).

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::{Duration, Instant};

pub type TimerId = u64;

pub(crate) struct TimerEntry {
    pub(crate) id: TimerId,
    pub(crate) deadline: Instant,
    pub(crate) interval: Option<Duration>,
    pub(crate) handler: Box<dyn FnMut() + 'static>,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.id == other.id
    }
}
impl Eq for TimerEntry {}

impl Ord for TimerEntry {
    // Reversed so the heap (a max-heap) pops the *earliest* deadline first.
    fn cmp(&self, other: &Self) -> Ordering {
        other.deadline.cmp(&self.deadline).then_with(|| other.id.cmp(&self.id))
    }
}
impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Default)]
pub(crate) struct TimerHeap {
    heap: BinaryHeap<TimerEntry>,
    next_id: TimerId,
}

impl TimerHeap {
    pub(crate) fn insert(
        &mut self,
        delay: Duration,
        interval: Option<Duration>,
        handler: Box<dyn FnMut() + 'static>,
        now: Instant,
    ) -> TimerId {
        let id = self.next_id;
        self.next_id += 1;
        self.heap.push(TimerEntry {
            id,
            deadline: now + delay,
            interval,
            handler,
        });
        id
    }

    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.heap.peek().map(|e| e.deadline)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Fire every timer whose deadline is `<= now`, in non-decreasing
    /// deadline order, reinserting periodic ones. Returns the number fired.
    pub(crate) fn fire_expired(&mut self, now: Instant) -> usize {
        let mut fired = 0;
        while let Some(top) = self.heap.peek() {
            if top.deadline > now {
                break;
            }
            let mut entry = self.heap.pop().unwrap();
            (entry.handler)();
            fired += 1;
            if let Some(interval) = entry.interval {
                entry.deadline = now + interval;
                self.heap.push(entry);
            }
        }
        fired
    }

    pub(crate) fn cancel(&mut self, id: TimerId) -> bool {
        let before = self.heap.len();
        self.heap = std::mem::take(&mut self.heap)
            .into_iter()
            .filter(|e| e.id != id)
            .collect();
        self.heap.len() != before
    }
}
