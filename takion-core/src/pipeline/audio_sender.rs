//! Outbound microphone audio.
//!
//! Each encoded unit becomes one datagram carrying the whole FEC frame:
//!
//! ```text
//!  header (19/20) │ source unit (40) │ parity 0 (40) │ parity 1 (40)
//! ```
//!
//! Frame layout constants match what the console expects and must not
//! be tuned. Units of any other size (short silence frames) are skipped.

use std::sync::Mutex;

use tracing::{debug, trace};

use super::MediaLink;
use crate::error::TakionError;
use crate::fec::FecCodec;
use crate::header::{AvHeader, FecParam, UnitsWord};
use crate::message::ContentType;
use crate::packet::PacketHeader;

pub const AUDIO_UNIT_SIZE: usize = 40;
pub const AUDIO_SOURCE_UNITS: usize = 1;
pub const AUDIO_PARITY_UNITS: usize = 2;
pub const AUDIO_TOTAL_UNITS: usize = 3;
pub const AUDIO_CODEC: u8 = 5;

/// What happened to one encoded unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent { packet_index: u16 },
    /// The unit was not [`AUDIO_UNIT_SIZE`] bytes.
    WrongSize(usize),
    /// No stream is attached.
    NotStreaming,
}

struct SenderState {
    frame_index: u16,
    frame_buf: [u8; AUDIO_UNIT_SIZE * AUDIO_TOTAL_UNITS],
    link: Option<MediaLink>,
}

/// Single-writer audio send path, safe to call from a capture thread.
pub struct AudioSender {
    state: Mutex<SenderState>,
    codec: FecCodec,
}

impl AudioSender {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SenderState {
                frame_index: 0,
                frame_buf: [0; AUDIO_UNIT_SIZE * AUDIO_TOTAL_UNITS],
                link: None,
            }),
            codec: FecCodec::new(AUDIO_UNIT_SIZE),
        }
    }

    /// Start sending through `link`. The packet index restarts at zero.
    pub fn attach(&self, link: MediaLink) {
        if let Ok(mut state) = self.state.lock() {
            state.frame_index = 0;
            state.link = Some(link);
        }
    }

    pub fn detach(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.link = None;
        }
    }

    /// Index the next frame will carry.
    pub fn next_packet_index(&self) -> u16 {
        self.state.lock().map(|s| s.frame_index).unwrap_or(0)
    }

    /// FEC-expand, frame, seal and send one encoded unit.
    pub fn push_encoded(&self, unit: &[u8]) -> Result<SendOutcome, TakionError> {
        if unit.len() != AUDIO_UNIT_SIZE {
            trace!(len = unit.len(), "audio unit of unexpected size skipped");
            return Ok(SendOutcome::WrongSize(unit.len()));
        }

        let mut state = self
            .state
            .lock()
            .map_err(|_| TakionError::InvalidState("audio sender lock poisoned"))?;
        let state = &mut *state;
        let Some(link) = state.link.as_ref() else {
            return Ok(SendOutcome::NotStreaming);
        };

        state.frame_buf[..AUDIO_UNIT_SIZE].copy_from_slice(unit);
        self.codec
            .encode_frame(&mut state.frame_buf, AUDIO_SOURCE_UNITS, AUDIO_PARITY_UNITS)?;

        let packet_index = state.frame_index;
        let header = AvHeader {
            packet_index,
            frame_index: packet_index.wrapping_add(1),
            units: UnitsWord::new(FecParam::AUDIO, AUDIO_TOTAL_UNITS as u16, 0)?,
            codec: AUDIO_CODEC,
            tag: [0; 4],
            key_pos: 0,
        };
        let mut packet = link
            .framer
            .build(&PacketHeader::Audio(header), &state.frame_buf)?;

        match link.seal_and_send(ContentType::Audio, &mut packet) {
            Ok(_) => {}
            Err(TakionError::KeyPositionExhausted) => return Err(TakionError::KeyPositionExhausted),
            Err(e) => {
                // Counted as emitted: the console sees a gap, like any loss.
                debug!(error = %e, packet_index, "audio packet not sent");
            }
        }
        state.frame_index = packet_index.wrapping_add(1);
        Ok(SendOutcome::Sent { packet_index })
    }
}

impl Default for AudioSender {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::ConsoleGeneration;
    use crate::packet::PacketFramer;
    use crate::pipeline::testing::{console_keys, link};

    fn unit(seed: u8) -> Vec<u8> {
        (0..AUDIO_UNIT_SIZE as u8).map(|b| b.wrapping_mul(seed)).collect()
    }

    #[test]
    fn legacy_packet_layout() {
        let (link, sent, _events) = link(ConsoleGeneration::Legacy);
        let sender = AudioSender::new();
        sender.attach(link);

        assert_eq!(
            sender.push_encoded(&unit(3)).unwrap(),
            SendOutcome::Sent { packet_index: 0 }
        );
        let sent = sent.sent.lock().unwrap();
        let (content, pkt) = &sent[0];
        assert_eq!(*content, ContentType::Audio);
        assert_eq!(pkt.len(), 19 + 120);
        assert_eq!(pkt[0], 3);
        assert_eq!(&pkt[1..5], &[0, 0, 0, 1]);
        assert_eq!(&pkt[5..9], &[0x00, 0x02, 0x28, 0x21]);
        assert_eq!(pkt[9], AUDIO_CODEC);
        assert_eq!(pkt[18], 0);

        let opened = console_keys()
            .open(pkt, &PacketFramer::new(ConsoleGeneration::Legacy).layout(ContentType::Audio).unwrap())
            .unwrap();
        assert_eq!(&opened[19..59], &unit(3)[..]);
    }

    #[test]
    fn newer_packet_has_extra_zero_byte() {
        let (link, sent, _events) = link(ConsoleGeneration::Newer);
        let sender = AudioSender::new();
        sender.attach(link);
        sender.push_encoded(&unit(5)).unwrap();

        let sent = sent.sent.lock().unwrap();
        let pkt = &sent[0].1;
        assert_eq!(pkt.len(), 20 + 120);
        assert_eq!(pkt[19], 0);

        let layout = PacketFramer::new(ConsoleGeneration::Newer)
            .layout(ContentType::Audio)
            .unwrap();
        let opened = console_keys().open(pkt, &layout).unwrap();
        assert_eq!(&opened[20..60], &unit(5)[..]);
    }

    #[test]
    fn wrong_size_units_are_never_sent() {
        let (link, sent, _events) = link(ConsoleGeneration::Legacy);
        let sender = AudioSender::new();
        sender.attach(link);
        assert_eq!(sender.push_encoded(&[0u8; 3]).unwrap(), SendOutcome::WrongSize(3));
        assert_eq!(sender.push_encoded(&[0u8; 41]).unwrap(), SendOutcome::WrongSize(41));
        assert!(sent.sent.lock().unwrap().is_empty());
        assert_eq!(sender.next_packet_index(), 0);
    }

    #[test]
    fn not_streaming_until_attached() {
        let sender = AudioSender::new();
        assert_eq!(sender.push_encoded(&unit(1)).unwrap(), SendOutcome::NotStreaming);
    }

    #[test]
    fn counter_wraps_without_error() {
        let (link, sent, _events) = link(ConsoleGeneration::Legacy);
        let sender = AudioSender::new();
        sender.attach(link);
        sender.state.lock().unwrap().frame_index = u16::MAX;

        assert_eq!(
            sender.push_encoded(&unit(1)).unwrap(),
            SendOutcome::Sent { packet_index: u16::MAX }
        );
        assert_eq!(
            sender.push_encoded(&unit(1)).unwrap(),
            SendOutcome::Sent { packet_index: 0 }
        );

        let sent = sent.sent.lock().unwrap();
        assert_eq!(&sent[0].1[1..5], &[0xFF, 0xFF, 0x00, 0x00]);
        assert_eq!(&sent[1].1[1..5], &[0x00, 0x00, 0x00, 0x01]);
        // units word unaffected by the wrap
        assert_eq!(&sent[0].1[5..9], &sent[1].1[5..9]);
    }
}
