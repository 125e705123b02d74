//! Loss counting and the periodic congestion report (packet type 5).
//!
//! The receivers record every inbound AV packet index. Gaps in the 16-bit
//! sequence count as lost; late or duplicate packets only count as
//! received. The reporter drains the counters on a fixed interval and tells
//! the console, which uses the ratio to steer its encoder bitrate.

use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::MediaLink;
use crate::error::TakionError;
use crate::header::CongestionHeader;
use crate::message::ContentType;
use crate::packet::PacketHeader;

/// Forward jumps larger than this are treated as reordering, not loss.
const MAX_GAP: u16 = 0x8000;

#[derive(Debug, Default, Clone, Copy)]
struct StreamLoss {
    last_index: Option<u16>,
    received: u32,
    lost: u32,
}

impl StreamLoss {
    fn record(&mut self, packet_index: u16) {
        self.received = self.received.saturating_add(1);
        let Some(last) = self.last_index else {
            self.last_index = Some(packet_index);
            return;
        };
        let gap = packet_index.wrapping_sub(last);
        if gap == 0 || gap >= MAX_GAP {
            return;
        }
        self.lost = self.lost.saturating_add(u32::from(gap - 1));
        self.last_index = Some(packet_index);
    }
}

/// Received/lost tallies per media stream.
#[derive(Debug, Default)]
pub struct LossCounter {
    streams: Mutex<[StreamLoss; 2]>,
}

impl LossCounter {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(content: ContentType) -> Option<usize> {
        match content {
            ContentType::Video => Some(0),
            ContentType::Audio => Some(1),
            _ => None,
        }
    }

    pub fn record(&self, content: ContentType, packet_index: u16) {
        let Some(slot) = Self::slot(content) else { return };
        if let Ok(mut streams) = self.streams.lock() {
            streams[slot].record(packet_index);
        }
    }

    /// Return `(received, lost)` since the last call and reset the tallies.
    /// Sequence tracking carries over.
    pub fn take(&self) -> (u32, u32) {
        let Ok(mut streams) = self.streams.lock() else {
            return (0, 0);
        };
        streams.iter_mut().fold((0, 0), |(r, l), s| {
            let out = (r + s.received, l + s.lost);
            s.received = 0;
            s.lost = 0;
            out
        })
    }
}

// ── CongestionReporter ───────────────────────────────────────────

pub struct CongestionReporter {
    link: MediaLink,
    counter: Arc<LossCounter>,
    interval: Duration,
    sequence: u16,
}

impl CongestionReporter {
    pub fn new(link: MediaLink, counter: Arc<LossCounter>, interval: Duration) -> Self {
        Self {
            link,
            counter,
            interval,
            sequence: 0,
        }
    }

    pub fn send_once(&mut self) -> Result<CongestionHeader, TakionError> {
        let (received, lost) = self.counter.take();
        let header = CongestionHeader {
            sequence: self.sequence,
            received: u16::try_from(received).unwrap_or(u16::MAX),
            lost: u16::try_from(lost).unwrap_or(u16::MAX),
            key_pos: 0,
            tag: [0; 4],
        };
        let mut packet = self
            .link
            .framer
            .build(&PacketHeader::Congestion(header), &[])?;
        self.sequence = self.sequence.wrapping_add(1);
        self.link.seal_and_send(ContentType::Congestion, &mut packet)?;
        Ok(header)
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        let mut tick = tokio::time::interval(self.interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick fires immediately and would report nothing.
        tick.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tick.tick() => {}
            }
            match self.send_once() {
                Ok(h) => trace!(seq = h.sequence, received = h.received, lost = h.lost, "congestion report"),
                Err(e) => debug!(error = %e, "congestion report not sent"),
            }
        }
        debug!("congestion reporter stopped");
    }
}
