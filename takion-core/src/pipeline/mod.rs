//! Media pipelines riding on the Takion transport.
//!
//! | Module         | Direction | Purpose |
//! |----------------|-----------|---------|
//! | `mic`          | out       | PCM buffering, mute, external encoder |
//! | `audio_sender` | out       | 40-byte units, FEC 1:2, seal, send |
//! | `feedback`     | out       | Periodic controller + haptics state |
//! | `congestion`   | out       | Loss counting and periodic loss reports |
//! | `receiver`     | in        | Open, parse, FEC-recover, hand to sinks |
//! | `sink`         | in        | Decode sink seam and drop-oldest queue |

pub mod audio_sender;
pub mod congestion;
pub mod feedback;
pub mod mic;
pub mod receiver;
pub mod sink;

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::trace;

use crate::error::{FecFailure, TakionError};
use crate::keys::KeySession;
use crate::message::ContentType;
use crate::packet::PacketFramer;
use crate::takion::MediaSender;

pub use audio_sender::{AudioSender, SendOutcome};
pub use congestion::{CongestionReporter, LossCounter};
pub use feedback::{ControllerState, FeedbackSender, HapticsState};
pub use mic::{AudioEncoder, MicCapture};
pub use receiver::{AuthFailureTracker, FrameAssembler, MediaReceiver};
pub use sink::{DecodeSink, EncodedFrame, SinkQueue};

// ── Events ───────────────────────────────────────────────────────

/// Recoverable stream-quality observations for the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QualityEvent {
    /// A frame could not be recovered and was skipped.
    FrameDropped {
        content: ContentType,
        frame_index: u16,
        reason: FecFailure,
    },
    /// A decode sink fell behind; its oldest frames were discarded.
    SinkOverflow { content: ContentType, dropped: u64 },
}

/// What the pipelines report to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    /// Sealing failed for lack of key positions in `epoch`.
    KeysExhausted { epoch: u32 },
    /// Inbound packets kept failing authentication.
    AuthFailureBurst { failures: u32 },
    Quality(QualityEvent),
}

pub type PipelineEvents = mpsc::UnboundedSender<PipelineEvent>;

// ── MediaLink ────────────────────────────────────────────────────

/// Framer, key session and transport: everything a sender needs to put
/// a sealed packet on the wire.
#[derive(Clone)]
pub struct MediaLink {
    pub framer: PacketFramer,
    pub keys: Arc<KeySession>,
    pub sender: Arc<dyn MediaSender>,
    pub events: PipelineEvents,
}

impl MediaLink {
    /// Seal `packet` in place and hand it to the transport.
    pub fn seal_and_send(&self, content: ContentType, packet: &mut [u8]) -> Result<u32, TakionError> {
        let layout = self
            .framer
            .layout(content)
            .ok_or(TakionError::InvalidState("content type is not sealed"))?;
        let key_pos = match self.keys.seal(packet, &layout) {
            Ok(pos) => pos,
            Err(TakionError::KeyPositionExhausted) => {
                let _ = self.events.send(PipelineEvent::KeysExhausted {
                    epoch: self.keys.epoch(),
                });
                return Err(TakionError::KeyPositionExhausted);
            }
            Err(e) => return Err(e),
        };
        self.sender.send_media(content, packet)?;
        trace!(%content, key_pos, len = packet.len(), "media sent");
        Ok(key_pos)
    }
}

impl std::fmt::Debug for MediaLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaLink")
            .field("framer", &self.framer)
            .field("keys", &self.keys)
            .finish_non_exhaustive()
    }
}

// ── Test doubles ─────────────────────────────────────────────────
