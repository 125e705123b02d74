//! Stand-in media endpoints for the headless client: decode sinks that
//! count frames, and a microphone encoder for hosts without capture.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tracing::trace;

use takion_core::{AudioEncoder, DecodeSink, EncodedFrame, TakionError};

/// Counts delivered frames instead of decoding them.
#[derive(Debug)]
pub struct CountingSink {
    name: &'static str,
    frames: AtomicU64,
    recovered: AtomicU64,
    bytes: AtomicU64,
}

/// Snapshot of a [`CountingSink`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SinkStats {
    pub frames: u64,
    pub recovered: u64,
    pub bytes: u64,
}

impl CountingSink {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            frames: AtomicU64::new(0),
            recovered: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn stats(&self) -> SinkStats {
        SinkStats {
            frames: self.frames.load(Ordering::Relaxed),
            recovered: self.recovered.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
        }
    }
}

#[async_trait]
impl DecodeSink for CountingSink {
    async fn push(&self, frame: EncodedFrame) -> Result<(), TakionError> {
        trace!(
            sink = self.name,
            frame_index = frame.frame_index,
            len = frame.data.len(),
            recovered = frame.recovered,
            "frame delivered"
        );
        self.frames.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(frame.data.len() as u64, Ordering::Relaxed);
        if frame.recovered {
            self.recovered.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }
}

/// Encoder for hosts without a microphone: every frame becomes one
/// silent unit of the size the audio sender expects.
#[derive(Debug, Default)]
pub struct SilentEncoder {
    channels: u16,
}

impl SilentEncoder {
    /// Samples per channel in one 10 ms frame at 48 kHz.
    pub const FRAME_SAMPLES: usize = 480;
    pub const UNIT_SIZE: usize = 40;
}

impl AudioEncoder for SilentEncoder {
    fn frame_samples(&self) -> usize {
        Self::FRAME_SAMPLES
    }

    fn configure(&mut self, channels: u16, rate: u32) -> Result<(), TakionError> {
        if channels == 0 || rate == 0 {
            return Err(TakionError::InvalidState("audio format without channels or rate"));
        }
        self.channels = channels;
        Ok(())
    }

    fn encode(&mut self, _pcm: &[i16]) -> Result<Vec<u8>, TakionError> {
        Ok(vec![0; Self::UNIT_SIZE])
    }
}
