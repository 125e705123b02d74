//! Inbound audio and video.
//!
//! ```text
//!  transport ──Bytes──► open (tag check) ──► parse ──► FrameAssembler
//!                          │                              │
//!                   AuthFailureTracker          Complete / Dropped
//!                                                         │
//!                                              SinkQueue ──► DecodeSink
//! ```
//!
//! Every inbound AV datagram carries one unit. Units are grouped by frame
//! index; a frame completes once all source units are present or enough
//! units arrived for FEC recovery. Frames that fall out of the reassembly
//! window before completing are dropped and reported, never fatal.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::congestion::LossCounter;
use super::sink::{EncodedFrame, SinkQueue};
use super::{PipelineEvent, PipelineEvents, QualityEvent};
use crate::error::{FecFailure, TakionError};
use crate::fec::FecCodec;
use crate::header::AvHeader;
use crate::keys::KeySession;
use crate::message::ContentType;
use crate::packet::{PacketFramer, PacketHeader};

// ── AuthFailureTracker ───────────────────────────────────────────

/// Counts consecutive tag failures. Trips once `threshold` failures land
/// within `window`; any authenticated packet resets the count.
#[derive(Debug, Clone)]
pub struct AuthFailureTracker {
    threshold: u32,
    window: Duration,
    failures: u32,
    first_at: Option<Instant>,
}

impl AuthFailureTracker {
    pub const DEFAULT_THRESHOLD: u32 = 5;
    pub const DEFAULT_WINDOW: Duration = Duration::from_secs(1);

    pub fn new(threshold: u32, window: Duration) -> Self {
        Self {
            threshold: threshold.max(1),
            window,
            failures: 0,
            first_at: None,
        }
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Returns `true` when this failure completes a burst. The count
    /// restarts afterwards.
    pub fn record_failure(&mut self, now: Instant) -> bool {
        match self.first_at {
            Some(first) if now.duration_since(first) <= self.window => self.failures += 1,
            _ => {
                self.first_at = Some(now);
                self.failures = 1;
            }
        }
        if self.failures >= self.threshold {
            self.reset();
            return true;
        }
        false
    }

    pub fn record_success(&mut self) {
        self.reset();
    }

    fn reset(&mut self) {
        self.failures = 0;
        self.first_at = None;
    }
}

impl Default for AuthFailureTracker {
    fn default() -> Self {
        Self::new(Self::DEFAULT_THRESHOLD, Self::DEFAULT_WINDOW)
    }
}

// ── FrameAssembler ───────────────────────────────────────────────

/// What one unit did to its frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Assembled {
    Complete(EncodedFrame),
    Dropped { frame_index: u16, reason: FecFailure },
}

struct PartialFrame {
    units: Vec<Option<Vec<u8>>>,
    source: usize,
    parity: usize,
    unit_size: usize,
    codec: u8,
    received: usize,
}

impl PartialFrame {
    fn missing(&self) -> usize {
        self.units.len() - self.received
    }

    fn sources_present(&self) -> bool {
        self.units[..self.source].iter().all(Option::is_some)
    }
}

pub struct FrameAssembler {
    content: ContentType,
    window: u16,
    partial: HashMap<u16, PartialFrame>,
    /// Recently finished frames, so late units are not mistaken for a new frame.
    finished: VecDeque<u16>,
    newest: Option<u16>,
}

impl FrameAssembler {
    pub const DEFAULT_WINDOW: u16 = 4;
    const FINISHED_MEMORY: usize = 32;

    pub fn new(content: ContentType, window: u16) -> Self {
        Self {
            content,
            window: window.clamp(1, 0x4000),
            partial: HashMap::new(),
            finished: VecDeque::with_capacity(Self::FINISHED_MEMORY),
            newest: None,
        }
    }

    pub fn pending(&self) -> usize {
        self.partial.len()
    }

    /// Frames behind `newest` by at least the window.
    fn is_stale(&self, frame_index: u16) -> bool {
        match self.newest {
            Some(newest) => {
                let behind = newest.wrapping_sub(frame_index);
                behind < 0x8000 && behind >= self.window
            }
            None => false,
        }
    }

    fn finish(&mut self, frame_index: u16) {
        self.partial.remove(&frame_index);
        if self.finished.len() == Self::FINISHED_MEMORY {
            self.finished.pop_front();
        }
        self.finished.push_back(frame_index);
    }

    /// Feed one unit. Returns every frame that completed or was given up.
    pub fn accept(&mut self, header: &AvHeader, payload: &[u8], now: Instant) -> Vec<Assembled> {
        let frame_index = header.frame_index;
        if self.finished.contains(&frame_index) || self.is_stale(frame_index) {
            trace!(content = %self.content, frame_index, "late unit ignored");
            return Vec::new();
        }

        let mut out = Vec::new();
        if self.newest.is_none_or(|n| frame_index.wrapping_sub(n) < 0x8000) {
            self.newest = Some(frame_index);
            out.extend(self.evict_stale());
        }

        let total = usize::from(header.units.units_total);
        let frame = self.partial.entry(frame_index).or_insert_with(|| PartialFrame {
            units: vec![None; total],
            source: header.units.source_units(),
            parity: header.units.parity_units(),
            unit_size: payload.len(),
            codec: header.codec,
            received: 0,
        });
        if frame.units.len() != total || frame.unit_size != payload.len() {
            debug!(content = %self.content, frame_index, "unit disagrees with its frame, ignored");
            return out;
        }
        let slot = &mut frame.units[usize::from(header.units.unit_index)];
        if slot.is_some() {
            return out;
        }
        *slot = Some(payload.to_vec());
        frame.received += 1;

        if frame.received < frame.source {
            return out;
        }

        let recovered = !frame.sources_present();
        let result = if recovered {
            FecCodec::new(frame.unit_size).decode(&mut frame.units, frame.source, frame.parity)
        } else {
            Ok(frame.units[..frame.source].iter().flatten().cloned().collect())
        };
        let codec = frame.codec;
        self.finish(frame_index);

        match result {
            Ok(sources) => {
                let mut data = BytesMut::with_capacity(sources.iter().map(Vec::len).sum());
                for unit in &sources {
                    data.extend_from_slice(unit);
                }
                if recovered {
                    trace!(content = %self.content, frame_index, "frame recovered from parity");
                }
                out.push(Assembled::Complete(EncodedFrame {
                    content: self.content,
                    frame_index,
                    codec,
                    data: data.freeze(),
                    recovered,
                    received_at: now,
                }));
            }
            Err(reason) => out.push(Assembled::Dropped { frame_index, reason }),
        }
        out
    }

    fn evict_stale(&mut self) -> Vec<Assembled> {
        let mut stale: Vec<u16> = self
            .partial
            .keys()
            .copied()
            .filter(|idx| self.is_stale(*idx))
            .collect();
        stale.sort_by_key(|idx| self.newest.unwrap_or(0).wrapping_sub(*idx));
        stale.reverse();

        stale
            .into_iter()
            .filter_map(|frame_index| {
                let frame = self.partial.remove(&frame_index)?;
                Some(Assembled::Dropped {
                    frame_index,
                    reason: FecFailure::TooManyMissing {
                        missing: frame.missing(),
                        parity: frame.parity,
                    },
                })
            })
            .collect()
    }
}

// ── MediaReceiver ────────────────────────────────────────────────

pub struct MediaReceiver {
    content: ContentType,
    framer: PacketFramer,
    keys: Arc<KeySession>,
    assembler: FrameAssembler,
    queue: Arc<SinkQueue>,
    auth: Arc<Mutex<AuthFailureTracker>>,
    loss: Arc<LossCounter>,
    events: PipelineEvents,
}

impl MediaReceiver {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        content: ContentType,
        framer: PacketFramer,
        keys: Arc<KeySession>,
        queue: Arc<SinkQueue>,
        auth: Arc<Mutex<AuthFailureTracker>>,
        loss: Arc<LossCounter>,
        events: PipelineEvents,
        window: u16,
    ) -> Self {
        Self {
            content,
            framer,
            keys,
            assembler: FrameAssembler::new(content, window),
            queue,
            auth,
            loss,
            events,
        }
    }

    /// Process one sealed datagram. Returns the number of frames queued.
    pub fn handle_packet(&mut self, packet: &[u8]) -> Result<usize, TakionError> {
        let layout = self
            .framer
            .layout(self.content)
            .ok_or(TakionError::InvalidState("content type is not sealed"))?;

        let plain = match self.keys.open(packet, &layout) {
            Ok(plain) => {
                if let Ok(mut auth) = self.auth.lock() {
                    auth.record_success();
                }
                plain
            }
            Err(e @ TakionError::AuthFailure { .. }) => {
                let tripped = self
                    .auth
                    .lock()
                    .map(|mut auth| auth.record_failure(Instant::now()))
                    .unwrap_or(false);
                if tripped {
                    warn!(content = %self.content, "authentication failure burst");
                    let _ = self.events.send(PipelineEvent::AuthFailureBurst {
                        failures: AuthFailureTracker::DEFAULT_THRESHOLD,
                    });
                }
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        let parsed = self.framer.parse(&plain)?;
        let header = match (self.content, parsed.header) {
            (ContentType::Video, PacketHeader::Video(h)) | (ContentType::Audio, PacketHeader::Audio(h)) => h,
            _ => return Err(TakionError::MalformedPacket("packet routed to the wrong receiver")),
        };
        self.loss.record(self.content, header.packet_index);

        let mut queued = 0;
        for out in self.assembler.accept(&header, parsed.payload, Instant::now()) {
            match out {
                Assembled::Complete(frame) => {
                    queued += 1;
                    if self.queue.push(frame).is_some() {
                        let _ = self.events.send(PipelineEvent::Quality(QualityEvent::SinkOverflow {
                            content: self.content,
                            dropped: self.queue.dropped(),
                        }));
                    }
                }
                Assembled::Dropped { frame_index, reason } => {
                    debug!(content = %self.content, frame_index, %reason, "frame dropped");
                    let _ = self.events.send(PipelineEvent::Quality(QualityEvent::FrameDropped {
                        content: self.content,
                        frame_index,
                        reason,
                    }));
                }
            }
        }
        Ok(queued)
    }

    pub async fn run(mut self, mut rx: mpsc::Receiver<Bytes>, cancel: CancellationToken) {
        loop {
            let packet = tokio::select! {
                _ = cancel.cancelled() => break,
                packet = rx.recv() => packet,
            };
            let Some(packet) = packet else { break };
            match self.handle_packet(&packet) {
                Ok(_) => {}
                Err(TakionError::AuthFailure { key_pos }) => {
                    trace!(content = %self.content, key_pos, "packet failed authentication")
                }
                Err(e) => debug!(content = %self.content, error = %e, "inbound packet discarded"),
            }
        }
        self.queue.close();
        debug!(content = %self.content, "receiver stopped");
    }
}
