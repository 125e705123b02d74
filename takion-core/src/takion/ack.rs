//! Acknowledgment bookkeeping for control chunks.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

use tokio::sync::oneshot;

// ── PendingAck ───────────────────────────────────────────────────

#[derive(Debug)]
struct PendingAck {
    /// Last (re)transmission, so the measured RTT is not inflated by
    /// earlier lost copies.
    sent_at: Instant,
    waiter: oneshot::Sender<Duration>,
}

// ── AckTracker ───────────────────────────────────────────────────

/// Outstanding `Data` chunks keyed by sequence number.
///
/// Each tracked chunk has a waiter that receives the round-trip time
/// when the matching `DataAck` arrives. Dropping the tracker (or
/// calling [`clear`](Self::clear)) wakes all waiters with an error.
#[derive(Debug, Default)]
pub struct AckTracker {
    pending: HashMap<u32, PendingAck>,
}

impl AckTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&mut self, seq: u32) -> oneshot::Receiver<Duration> {
        let (waiter, rx) = oneshot::channel();
        self.pending.insert(
            seq,
            PendingAck {
                sent_at: Instant::now(),
                waiter,
            },
        );
        rx
    }

    /// Record a retransmission of `seq`.
    pub fn touch(&mut self, seq: u32) {
        if let Some(p) = self.pending.get_mut(&seq) {
            p.sent_at = Instant::now();
        }
    }

    /// Complete `seq`. Returns `false` for unknown or duplicate acks.
    pub fn resolve(&mut self, seq: u32) -> bool {
        match self.pending.remove(&seq) {
            Some(p) => {
                let _ = p.waiter.send(p.sent_at.elapsed());
                true
            }
            None => false,
        }
    }

    /// Stop tracking `seq` without completing it.
    pub fn forget(&mut self, seq: u32) {
        self.pending.remove(&seq);
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

// ── ReceivedWindow ───────────────────────────────────────────────

/// Recently delivered inbound `Data` sequence numbers.
///
/// A retransmitted chunk whose ack was lost is re-acked but not
/// delivered twice.
#[derive(Debug)]
pub struct ReceivedWindow {
    order: VecDeque<u32>,
    seen: HashSet<u32>,
    capacity: usize,
}

impl ReceivedWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::with_capacity(capacity),
            seen: HashSet::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// Returns `true` the first time `seq` is seen.
    pub fn insert(&mut self, seq: u32) -> bool {
        if !self.seen.insert(seq) {
            return false;
        }
        self.order.push_back(seq);
        if self.order.len() > self.capacity {
            if let Some(old) = self.order.pop_front() {
                self.seen.remove(&old);
            }
        }
        true
    }
}
