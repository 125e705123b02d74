//! # takion-core
//!
//! Client-side engine for Takion remote-play streaming sessions.
//!
//! This crate contains:
//! - **FEC**: `FecCodec`, a systematic GF(2^8) erasure code for media units
//! - **Wire format**: `UnitsWord`, per-type headers and the `PacketFramer`
//! - **Codec**: `TakionCodec` for `UdpFramed` datagram I/O via `tokio_util`
//! - **Transport**: `TakionTransport` with acknowledged control chunks,
//!   best-effort media, keep-alive and demultiplexing
//! - **Keys**: `KeySession` key-position bookkeeping, sealing and rotation,
//!   plus the X25519 handshake that seeds it
//! - **Session**: `Session` / `SessionHandle`, the lifecycle state machine
//!   and the only place internal failures become a `QuitReason`
//! - **Pipelines**: microphone audio out, controller feedback out,
//!   congestion reports out, audio/video in with FEC recovery
//! - **Task**: `TaskSet` for named background loops with cancellation
//! - **Error**: `TakionError`, a typed `thiserror`-based hierarchy

pub mod codec;
pub mod error;
pub mod fec;
pub mod flags;
pub mod handshake;
pub mod header;
pub mod keys;
pub mod message;
pub mod packet;
pub mod pipeline;
pub mod profile;
pub mod session;
pub mod takion;
pub mod task;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use codec::{Datagram, TakionCodec};
pub use error::{FecFailure, HandshakeFailure, TakionError};
pub use fec::FecCodec;
pub use flags::InputFeatures;
pub use handshake::{ClientHandshake, ConsoleHandshake, ConsoleReply, Credentials, PROTOCOL_VERSION};
pub use header::{
    AvHeader, CongestionHeader, ConsoleGeneration, ControlHeader, FeedbackHeader, FecParam,
    UnitsWord,
};
pub use keys::{KeyRole, KeySession};
pub use message::{ChunkType, ContentType, ControlMessage, RejectReason};
pub use packet::{PacketFramer, PacketHeader, PacketLayout, ParsedPacket};
pub use pipeline::{
    AudioEncoder, ControllerState, DecodeSink, EncodedFrame, HapticsState, MicCapture,
    QualityEvent,
};
pub use profile::{Resolution, VideoCodec, VideoProfile};
pub use session::{
    ConnectInfo, QuitReason, Session, SessionEvent, SessionHandle, SessionPhase, SessionTimings,
};
pub use takion::{ConnectionState, TakionConfig, TakionTransport, TransportEvent};
pub use task::TaskSet;
