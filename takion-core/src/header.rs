//! Fixed binary headers of the Takion packet family.
//!
//! Every multi-byte field is big-endian. Layouts are append-only: the
//! console firmware reads fields at fixed offsets.
//!
//! ## AV header (video = 2, audio = 3)
//! ```text
//!  0      content type           u8
//!  1..3   packet index           u16
//!  3..5   frame index            u16
//!  5..9   units word             u32  (see UnitsWord)
//!  9      codec                  u8
//! 10..14  tag                    [u8; 4]
//! 14..18  key position           u32
//! 18      zero                   u8
//! 19      zero (newer consoles)  u8
//! ```
//!
//! ## Units word
//! ```text
//!  31       24 23       16 15                    0
//! ┌───────────┬───────────┬───────────────────────┐
//! │ unit_index│ total - 1 │     fec raw param     │
//! └───────────┴───────────┴───────────────────────┘
//! ```

use std::fmt;

use crate::error::TakionError;
use crate::message::ChunkType;

// ── Byte helpers ─────────────────────────────────────────────────

/// Read a big-endian `u16` at `off`. Callers check the length first.
#[inline]
pub(crate) fn be_u16(data: &[u8], off: usize) -> u16 {
    u16::from_be_bytes([data[off], data[off + 1]])
}

/// Read a big-endian `u32` at `off`. Callers check the length first.
#[inline]
pub(crate) fn be_u32(data: &[u8], off: usize) -> u32 {
    u32::from_be_bytes([data[off], data[off + 1], data[off + 2], data[off + 3]])
}

#[inline]
fn tag_at(data: &[u8], off: usize) -> [u8; 4] {
    [data[off], data[off + 1], data[off + 2], data[off + 3]]
}

// ── ConsoleGeneration ────────────────────────────────────────────

/// Console hardware generation. Newer consoles expect one extra zero
/// byte at the end of the AV header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConsoleGeneration {
    #[default]
    Legacy,
    Newer,
}

impl ConsoleGeneration {
    /// Zero bytes following the key position field.
    pub fn padding_len(self) -> usize {
        match self {
            ConsoleGeneration::Legacy => 1,
            ConsoleGeneration::Newer => 2,
        }
    }
}

impl fmt::Display for ConsoleGeneration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsoleGeneration::Legacy => write!(f, "legacy"),
            ConsoleGeneration::Newer => write!(f, "newer"),
        }
    }
}

// ── FecParam ─────────────────────────────────────────────────────

/// The 16-bit FEC parameter carried in the low half of the units word.
///
/// The raw value is preserved bit-for-bit. Low nibble is the source
/// count, next nibble the parity count, high byte a unit-size hint
/// (audio sends `0x2821`: 40-byte units, 2 parity, 1 source).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FecParam(u16);

impl FecParam {
    /// Parameter the console expects on microphone audio.
    pub const AUDIO: FecParam = FecParam(10273);

    pub const fn from_raw(raw: u16) -> Self {
        Self(raw)
    }

    /// Pack a source/parity split. Counts above 15 do not fit.
    pub fn from_split(unit_hint: u8, source: u8, parity: u8) -> Option<Self> {
        if source > 0xF || parity > 0xF {
            return None;
        }
        Some(Self(
            (u16::from(unit_hint) << 8) | (u16::from(parity) << 4) | u16::from(source),
        ))
    }

    pub const fn raw(self) -> u16 {
        self.0
    }

    pub fn parity_units(self) -> usize {
        usize::from((self.0 >> 4) & 0xF)
    }

    pub fn source_units(self) -> usize {
        usize::from(self.0 & 0xF)
    }
}

// ── UnitsWord ────────────────────────────────────────────────────

/// Position of one unit inside its FEC frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UnitsWord {
    pub fec: FecParam,
    /// `units_in_frame_source + units_in_frame_fec`, 1..=256.
    pub units_total: u16,
    pub unit_index: u8,
}

impl UnitsWord {
    pub fn new(fec: FecParam, units_total: u16, unit_index: u8) -> Result<Self, TakionError> {
        if units_total == 0 || units_total > 256 {
            return Err(TakionError::MalformedPacket("units total out of range"));
        }
        if u16::from(unit_index) >= units_total {
            return Err(TakionError::MalformedPacket("unit index beyond frame"));
        }
        Ok(Self {
            fec,
            units_total,
            unit_index,
        })
    }

    pub fn encode(&self) -> u32 {
        u32::from(self.fec.raw())
            | (u32::from(self.units_total.wrapping_sub(1) & 0xFF) << 16)
            | (u32::from(self.unit_index) << 24)
    }

    pub fn decode(word: u32) -> Result<Self, TakionError> {
        let fec = FecParam::from_raw((word & 0xFFFF) as u16);
        let units_total = ((word >> 16) & 0xFF) as u16 + 1;
        let unit_index = (word >> 24) as u8;
        Self::new(fec, units_total, unit_index)
    }

    /// Parity units in this frame, capped so at least one source remains.
    pub fn parity_units(&self) -> usize {
        self.fec
            .parity_units()
            .min(usize::from(self.units_total).saturating_sub(1))
    }

    pub fn source_units(&self) -> usize {
        usize::from(self.units_total) - self.parity_units()
    }
}

// ── AvHeader ─────────────────────────────────────────────────────

/// Header of a video or audio packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AvHeader {
    pub packet_index: u16,
    pub frame_index: u16,
    pub units: UnitsWord,
    pub codec: u8,
    pub tag: [u8; 4],
    pub key_pos: u32,
}

impl AvHeader {
    /// Bytes before the generation-dependent padding.
    pub const FIXED_SIZE: usize = 18;
    pub const TAG_OFFSET: usize = 10;
    pub const KEY_POS_OFFSET: usize = 14;

    pub fn size(generation: ConsoleGeneration) -> usize {
        Self::FIXED_SIZE + generation.padding_len()
    }

    pub fn encode_into(&self, content_type: u8, generation: ConsoleGeneration, buf: &mut Vec<u8>) {
        buf.push(content_type);
        buf.extend_from_slice(&self.packet_index.to_be_bytes());
        buf.extend_from_slice(&self.frame_index.to_be_bytes());
        buf.extend_from_slice(&self.units.encode().to_be_bytes());
        buf.push(self.codec);
        buf.extend_from_slice(&self.tag);
        buf.extend_from_slice(&self.key_pos.to_be_bytes());
        buf.resize(buf.len() + generation.padding_len(), 0);
    }

    /// Decode from the start of `data` (including the type byte).
    pub fn decode(data: &[u8], generation: ConsoleGeneration) -> Result<Self, TakionError> {
        if data.len() < Self::size(generation) {
            return Err(TakionError::MalformedPacket("av header truncated"));
        }
        Ok(Self {
            packet_index: be_u16(data, 1),
            frame_index: be_u16(data, 3),
            units: UnitsWord::decode(be_u32(data, 5))?,
            codec: data[9],
            tag: tag_at(data, Self::TAG_OFFSET),
            key_pos: be_u32(data, Self::KEY_POS_OFFSET),
        })
    }
}

// ── FeedbackHeader ───────────────────────────────────────────────

/// Header of a controller feedback-state packet (type 6).
///
/// ```text
///  0     type 6   1..3 sequence   3 zero   4..8 key position   8..12 tag
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedbackHeader {
    pub sequence: u16,
    pub key_pos: u32,
    pub tag: [u8; 4],
}

impl FeedbackHeader {
    pub const SIZE: usize = 12;
    pub const KEY_POS_OFFSET: usize = 4;
    pub const TAG_OFFSET: usize = 8;

    pub fn encode_into(&self, content_type: u8, buf: &mut Vec<u8>) {
        buf.push(content_type);
        buf.extend_from_slice(&self.sequence.to_be_bytes());
        buf.push(0);
        buf.extend_from_slice(&self.key_pos.to_be_bytes());
        buf.extend_from_slice(&self.tag);
    }

    pub fn decode(data: &[u8]) -> Result<Self, TakionError> {
        if data.len() < Self::SIZE {
            return Err(TakionError::MalformedPacket("feedback header truncated"));
        }
        Ok(Self {
            sequence: be_u16(data, 1),
            key_pos: be_u32(data, Self::KEY_POS_OFFSET),
            tag: tag_at(data, Self::TAG_OFFSET),
        })
    }
}

// ── CongestionHeader ─────────────────────────────────────────────

/// Loss report (type 5). Fixed size, no payload.
///
/// ```text
///  0 type 5  1..3 seq  3..5 received  5..7 lost  7..11 key position  11..15 tag
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CongestionHeader {
    pub sequence: u16,
    pub received: u16,
    pub lost: u16,
    pub key_pos: u32,
    pub tag: [u8; 4],
}

impl CongestionHeader {
    pub const SIZE: usize = 15;
    pub const KEY_POS_OFFSET: usize = 7;
    pub const TAG_OFFSET: usize = 11;

    pub fn encode_into(&self, content_type: u8, buf: &mut Vec<u8>) {
        buf.push(content_type);
        buf.extend_from_slice(&self.sequence.to_be_bytes());
        buf.extend_from_slice(&self.received.to_be_bytes());
        buf.extend_from_slice(&self.lost.to_be_bytes());
        buf.extend_from_slice(&self.key_pos.to_be_bytes());
        buf.extend_from_slice(&self.tag);
    }

    pub fn decode(data: &[u8]) -> Result<Self, TakionError> {
        if data.len() < Self::SIZE {
            return Err(TakionError::MalformedPacket("congestion packet truncated"));
        }
        Ok(Self {
            sequence: be_u16(data, 1),
            received: be_u16(data, 3),
            lost: be_u16(data, 5),
            key_pos: be_u32(data, Self::KEY_POS_OFFSET),
            tag: tag_at(data, Self::TAG_OFFSET),
        })
    }
}

// ── ControlHeader ────────────────────────────────────────────────

/// Takion control chunk header (type 0).
///
/// ```text
///  0 type 0  1 chunk type  2..6 sequence  6..10 receiver tag  10..12 payload length
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlHeader {
    pub chunk: ChunkType,
    pub seq: u32,
    pub conn_tag: u32,
    pub payload_len: u16,
}

impl ControlHeader {
    pub const SIZE: usize = 12;

    pub fn encode_into(&self, content_type: u8, buf: &mut Vec<u8>) {
        buf.push(content_type);
        buf.push(self.chunk as u8);
        buf.extend_from_slice(&self.seq.to_be_bytes());
        buf.extend_from_slice(&self.conn_tag.to_be_bytes());
        buf.extend_from_slice(&self.payload_len.to_be_bytes());
    }

    pub fn decode(data: &[u8]) -> Result<Self, TakionError> {
        if data.len() < Self::SIZE {
            return Err(TakionError::MalformedPacket("control header truncated"));
        }
        Ok(Self {
            chunk: ChunkType::try_from(data[1])?,
            seq: be_u32(data, 2),
            conn_tag: be_u32(data, 6),
            payload_len: be_u16(data, 10),
        })
    }
}

// ── Tests ────────────────────────────────────────────────────────
