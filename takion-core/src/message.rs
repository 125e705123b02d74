//! Packet type tags and control-channel messages.
//!
//! Uses proper enums with `TryFrom`: unknown values are typed errors,
//! never panics.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TakionError;
use crate::profile::VideoProfile;

// ── ContentType ──────────────────────────────────────────────────

/// First byte of every datagram.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentType {
    /// Takion control chunk (handshake, acks, heartbeats).
    Control = 0,
    /// Encoded video unit.
    Video = 2,
    /// Encoded audio unit (or a whole mic frame outbound).
    Audio = 3,
    /// Loss report.
    Congestion = 5,
    /// Controller state plus haptics targets.
    FeedbackState = 6,
}

impl ContentType {
    pub fn is_av(self) -> bool {
        matches!(self, ContentType::Video | ContentType::Audio)
    }
}

impl TryFrom<u8> for ContentType {
    type Error = TakionError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ContentType::Control),
            2 => Ok(ContentType::Video),
            3 => Ok(ContentType::Audio),
            5 => Ok(ContentType::Congestion),
            6 => Ok(ContentType::FeedbackState),
            _ => Err(TakionError::UnknownVariant {
                type_name: "ContentType",
                value: value as u64,
            }),
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContentType::Control => write!(f, "Control"),
            ContentType::Video => write!(f, "Video"),
            ContentType::Audio => write!(f, "Audio"),
            ContentType::Congestion => write!(f, "Congestion"),
            ContentType::FeedbackState => write!(f, "FeedbackState"),
        }
    }
}

// ── ChunkType ────────────────────────────────────────────────────

/// Second byte of a control datagram.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChunkType {
    /// Carries one `ControlMessage`; must be acknowledged.
    Data = 0,
    /// Opens a connection, carries the initiator's tag.
    Init = 1,
    /// Answers `Init`, carries the responder's tag.
    InitAck = 2,
    /// Acknowledges a `Data` chunk by sequence number.
    DataAck = 3,
    /// Keep-alive.
    Heartbeat = 4,
    /// Orderly close; payload is a UTF-8 reason.
    Disconnect = 5,
}

impl TryFrom<u8> for ChunkType {
    type Error = TakionError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ChunkType::Data),
            1 => Ok(ChunkType::Init),
            2 => Ok(ChunkType::InitAck),
            3 => Ok(ChunkType::DataAck),
            4 => Ok(ChunkType::Heartbeat),
            5 => Ok(ChunkType::Disconnect),
            _ => Err(TakionError::UnknownVariant {
                type_name: "ChunkType",
                value: value as u64,
            }),
        }
    }
}

impl fmt::Display for ChunkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChunkType::Data => write!(f, "Data"),
            ChunkType::Init => write!(f, "Init"),
            ChunkType::InitAck => write!(f, "InitAck"),
            ChunkType::DataAck => write!(f, "DataAck"),
            ChunkType::Heartbeat => write!(f, "Heartbeat"),
            ChunkType::Disconnect => write!(f, "Disconnect"),
        }
    }
}

// ── RejectReason ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectReason {
    Credentials,
    Version,
    Busy,
}

// ── ControlMessage ───────────────────────────────────────────────

/// Payload of a `Data` control chunk, `bincode`-encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlMessage {
    // ── Handshake ────────────────────────────────────────────────
    /// Client → console: opens key agreement.
    Hello {
        version: u32,
        regist_key: Vec<u8>,
        client_public: [u8; 32],
        client_nonce: [u8; 16],
        features: u32,
    },
    /// Console → client: the console wants a login PIN.
    LoginPinRequired { incorrect: bool },
    /// Client → console.
    LoginPin { pin: String },
    /// Console → client: key agreement accepted.
    HelloAck {
        console_public: [u8; 32],
        console_nonce: [u8; 16],
        confirm: [u8; 32],
    },
    /// Console → client: key agreement refused.
    HelloReject { reason: RejectReason, version: u32 },

    // ── Probing ──────────────────────────────────────────────────
    /// Client → console: latency/MTU probe, padded to the candidate size.
    Probe { index: u16, padding: Vec<u8> },

    // ── Stream setup ─────────────────────────────────────────────
    /// Client → console: open the media sub-streams.
    StreamRequest {
        profile: VideoProfile,
        mtu: u16,
        features: u32,
        audio_buffer_size: u32,
        rtt_us: u32,
    },
    /// Console → client: media sub-streams are live.
    StreamReady { audio_channels: u8, audio_rate: u32 },

    // ── Steady state ─────────────────────────────────────────────
    /// Either direction: switch keys to `epoch`.
    Rekey { epoch: u32 },
    /// Client → console: enter standby.
    Standby,
}

impl ControlMessage {
    pub fn to_bytes(&self) -> Result<Vec<u8>, TakionError> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, TakionError> {
        Ok(bincode::deserialize(data)?)
    }

    /// Short name for log lines; never includes secrets.
    pub fn name(&self) -> &'static str {
        match self {
            ControlMessage::Hello { .. } => "Hello",
            ControlMessage::LoginPinRequired { .. } => "LoginPinRequired",
            ControlMessage::LoginPin { .. } => "LoginPin",
            ControlMessage::HelloAck { .. } => "HelloAck",
            ControlMessage::HelloReject { .. } => "HelloReject",
            ControlMessage::Probe { .. } => "Probe",
            ControlMessage::StreamRequest { .. } => "StreamRequest",
            ControlMessage::StreamReady { .. } => "StreamReady",
            ControlMessage::Rekey { .. } => "Rekey",
            ControlMessage::Standby => "Standby",
        }
    }
}

impl fmt::Display for ControlMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
