//! Domain-specific error types for the Takion streaming engine.
//!
//! All fallible operations return `Result<T, TakionError>`.
//! Peer input never panics: every malformed byte sequence is a typed,
//! recoverable error that the caller can log and drop.

use std::time::Duration;
use thiserror::Error;

/// The canonical error type for the streaming engine.
#[derive(Debug, Error)]
pub enum TakionError {
    // ── Framing Errors ───────────────────────────────────────────
    /// A datagram was too short for its declared type, or its declared
    /// payload length disagrees with the buffer length.
    #[error("malformed packet: {0}")]
    MalformedPacket(&'static str),

    /// A numeric value did not map to any known enum variant.
    #[error("unknown {type_name} discriminant: {value:#x}")]
    UnknownVariant { type_name: &'static str, value: u64 },

    // ── Media Errors ─────────────────────────────────────────────
    /// Forward error correction could not encode or recover a frame.
    #[error("fec failure: {0}")]
    Fec(#[from] FecFailure),

    // ── Crypto Errors ────────────────────────────────────────────
    /// The authentication tag of a received packet did not verify.
    #[error("authentication failed at key position {key_pos:#x}")]
    AuthFailure { key_pos: u32 },

    /// The local key position would overflow; the session must rekey.
    #[error("key position exhausted, rekey required")]
    KeyPositionExhausted,

    /// The handshake with the console failed.
    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeFailure),

    // ── Transport Errors ─────────────────────────────────────────
    /// A control message was never acknowledged.
    #[error("retransmit exhausted after {attempts} attempts")]
    RetransmitExhausted { attempts: u32 },

    /// The peer went silent or the transport was torn down.
    #[error("connection lost: {0}")]
    ConnectionLost(&'static str),

    /// The peer sent DISCONNECT; carries its reason text.
    #[error("peer disconnected: {0}")]
    PeerDisconnect(String),

    /// The Takion connection could not be established.
    #[error("connect failed: {0}")]
    ConnectFailed(String),

    /// An operation was attempted in a state that does not allow it.
    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    /// The UDP/IO layer reported an error.
    #[error("connection error: {0}")]
    Io(#[from] std::io::Error),

    /// An internal channel was closed unexpectedly.
    #[error("channel closed")]
    ChannelClosed,

    /// An operation exceeded its deadline.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    // ── Serialization Errors ─────────────────────────────────────
    /// Encoding or decoding of a control payload failed.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// Catch-all for errors that do not fit another variant.
    #[error("{0}")]
    Other(String),
}

// ── FecFailure ────────────────────────────────────────────────────

/// Why an FEC encode or decode was rejected.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FecFailure {
    /// More units are missing than there are parity units.
    #[error("{missing} units missing, only {parity} parity units")]
    TooManyMissing { missing: usize, parity: usize },

    /// A unit does not match the codec's block size.
    #[error("unit {index} is {actual} bytes, expected {expected}")]
    UnitSizeMismatch {
        index: usize,
        expected: usize,
        actual: usize,
    },

    /// The source/parity split cannot be represented.
    #[error("invalid layout: {0}")]
    InvalidLayout(&'static str),
}

// ── HandshakeFailure ──────────────────────────────────────────────

/// Typed handshake outcome.
///
/// Credential problems can be fixed by the user (re-enter registration or
/// PIN); version mismatches cannot be fixed by retrying.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HandshakeFailure {
    /// The console rejected our registration credentials, or its key
    /// confirmation did not match ours.
    #[error("console rejected the credentials")]
    Credentials,

    /// The console speaks a different protocol version.
    #[error("protocol version mismatch: local {local}, console {remote}")]
    VersionMismatch { local: u32, remote: u32 },

    /// The console did not answer in time.
    #[error("handshake timed out")]
    Timeout,

    /// The console is already streaming to another client.
    #[error("console busy")]
    Busy,

    /// The console sent something the handshake does not expect.
    #[error("protocol error: {0}")]
    Protocol(&'static str),
}

impl HandshakeFailure {
    /// Whether the user should be prompted to re-enter credentials.
    pub fn is_credential_problem(&self) -> bool {
        matches!(self, HandshakeFailure::Credentials)
    }
}

// ── Convenient From implementations ──────────────────────────────

impl From<String> for TakionError {
    fn from(s: String) -> Self {
        TakionError::Other(s)
    }
}

impl From<&str> for TakionError {
    fn from(s: &str) -> Self {
        TakionError::Other(s.to_string())
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for TakionError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        TakionError::ChannelClosed
    }
}

impl From<Box<bincode::ErrorKind>> for TakionError {
    fn from(e: Box<bincode::ErrorKind>) -> Self {
        TakionError::Encoding(e.to_string())
    }
}
