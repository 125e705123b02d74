//! Hand-off to the external decoders.
//!
//! Decoders are slow and not under our control, so the receive path never
//! awaits them directly. Reassembled frames go into a bounded
//! [`SinkQueue`]; a separate pump task drains it into the [`DecodeSink`].
//! When the queue is full the oldest frame is evicted: for a live stream the
//! newest picture is the one worth decoding.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::TakionError;
use crate::message::ContentType;

/// One reassembled frame plus presentation metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedFrame {
    pub content: ContentType,
    pub frame_index: u16,
    pub codec: u8,
    pub data: Bytes,
    /// At least one source unit was rebuilt from parity.
    pub recovered: bool,
    pub received_at: Instant,
}

/// Capability interface of a decoder backend. Chosen once at session
/// start; `push` may buffer internally and return before decoding.
#[async_trait]
pub trait DecodeSink: Send + Sync {
    async fn push(&self, frame: EncodedFrame) -> Result<(), TakionError>;
}

// ── SinkQueue ────────────────────────────────────────────────────

pub struct SinkQueue {
    frames: Mutex<VecDeque<EncodedFrame>>,
    notify: Notify,
    capacity: usize,
    dropped: AtomicU64,
    closed: AtomicBool,
}

impl SinkQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            frames: Mutex::new(VecDeque::with_capacity(capacity)),
            notify: Notify::new(),
            capacity,
            dropped: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Frames evicted so far.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.frames.lock().map(|f| f.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Enqueue without blocking. Returns the evicted frame on overflow.
    pub fn push(&self, frame: EncodedFrame) -> Option<EncodedFrame> {
        if self.closed.load(Ordering::Acquire) {
            return None;
        }
        let evicted = {
            let Ok(mut frames) = self.frames.lock() else {
                return None;
            };
            let evicted = if frames.len() >= self.capacity {
                frames.pop_front()
            } else {
                None
            };
            frames.push_back(frame);
            evicted
        };
        if evicted.is_some() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        self.notify.notify_one();
        evicted
    }

    /// Wait for the next frame. `None` once closed and drained.
    pub async fn pop(&self) -> Option<EncodedFrame> {
        loop {
            let notified = self.notify.notified();
            {
                let frames = self.frames.lock();
                if let Ok(mut frames) = frames {
                    if let Some(frame) = frames.pop_front() {
                        return Some(frame);
                    }
                }
            }
            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            notified.await;
        }
    }

    /// Stop accepting frames and wake the pump.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
        self.notify.notify_one();
    }
}

impl std::fmt::Debug for SinkQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SinkQueue")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .field("dropped", &self.dropped())
            .finish()
    }
}

/// Drain `queue` into `sink` until cancelled or the queue closes.
pub async fn pump(queue: Arc<SinkQueue>, sink: Arc<dyn DecodeSink>, cancel: CancellationToken) {
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            frame = queue.pop() => frame,
        };
        let Some(frame) = frame else { break };
        let (content, frame_index) = (frame.content, frame.frame_index);
        if let Err(e) = sink.push(frame).await {
            warn!(%content, frame_index, error = %e, "decode sink rejected frame");
        }
    }
    debug!("sink pump stopped");
}
