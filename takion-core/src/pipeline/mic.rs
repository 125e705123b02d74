//! Microphone capture buffering.
//!
//! The capture callback delivers PCM in whatever chunk size the audio
//! device uses. Samples accumulate until a full codec frame is available,
//! then the external encoder compresses it and the unit goes to the
//! [`AudioSender`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{info, warn};

use super::audio_sender::{AudioSender, SendOutcome};
use crate::error::TakionError;

/// Compresses one PCM frame (interleaved `i16`) into one encoded unit.
pub trait AudioEncoder: Send {
    /// Samples per channel in one frame.
    fn frame_samples(&self) -> usize;

    /// Called once when the stream negotiates its format.
    fn configure(&mut self, channels: u16, rate: u32) -> Result<(), TakionError>;

    fn encode(&mut self, pcm: &[i16]) -> Result<Vec<u8>, TakionError>;
}

struct MicState {
    encoder: Box<dyn AudioEncoder>,
    buffer: Vec<i16>,
    channels: u16,
}

pub struct MicCapture {
    state: Mutex<MicState>,
    muted: AtomicBool,
    sender: Arc<AudioSender>,
}

impl MicCapture {
    pub fn new(encoder: Box<dyn AudioEncoder>, sender: Arc<AudioSender>) -> Self {
        Self {
            state: Mutex::new(MicState {
                encoder,
                buffer: Vec::new(),
                channels: 1,
            }),
            muted: AtomicBool::new(false),
            sender,
        }
    }

    /// One-time format negotiation at stream start.
    pub fn configure(&self, channels: u16, rate: u32) -> Result<(), TakionError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| TakionError::InvalidState("mic lock poisoned"))?;
        state.encoder.configure(channels, rate)?;
        state.channels = channels.max(1);
        state.buffer.clear();
        info!(channels, rate, "microphone configured");
        Ok(())
    }

    /// Capture callback entry point. Returns the number of units sent.
    pub fn push_pcm(&self, pcm: &[i16]) -> Result<usize, TakionError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| TakionError::InvalidState("mic lock poisoned"))?;
        if self.is_muted() {
            state.buffer.clear();
            return Ok(0);
        }

        state.buffer.extend_from_slice(pcm);
        let frame_len = state.encoder.frame_samples() * usize::from(state.channels);
        if frame_len == 0 {
            return Ok(0);
        }

        let mut sent = 0;
        while state.buffer.len() >= frame_len {
            let frame: Vec<i16> = state.buffer.drain(..frame_len).collect();
            let unit = match state.encoder.encode(&frame) {
                Ok(unit) => unit,
                Err(e) => {
                    warn!(error = %e, "audio encode failed, frame skipped");
                    continue;
                }
            };
            if let SendOutcome::Sent { .. } = self.sender.push_encoded(&unit)? {
                sent += 1;
            }
        }
        Ok(sent)
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::SeqCst)
    }

    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::SeqCst);
    }

    /// Flip the mute flag and return the new state.
    pub fn toggle_mute(&self) -> bool {
        !self.muted.fetch_xor(true, Ordering::SeqCst)
    }
}
