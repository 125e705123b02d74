//! What the session tells the host application.

use crate::error::{HandshakeFailure, TakionError};
use crate::pipeline::QualityEvent;

/// Why a session ended. Delivered exactly once per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QuitReason {
    /// The application called stop.
    Stopped,
    /// Registration key or PIN rejected; re-entering credentials may help.
    AuthFailed,
    /// Protocol versions differ; retrying will not help.
    VersionMismatch,
    /// The console never answered the connect or the handshake.
    HandshakeTimeout,
    /// Connect refused, console busy or the handshake went off-script.
    ConnectFailed,
    /// The console sent a disconnect.
    PeerDisconnect,
    /// Heartbeat timeout, unacknowledged control messages or an
    /// authentication failure burst.
    ConnectionLost,
    /// The session ended because the console went to standby.
    Standby,
}

impl QuitReason {
    /// Translate a handshake failure.
    pub fn from_handshake(failure: &HandshakeFailure) -> Self {
        match failure {
            HandshakeFailure::Credentials => Self::AuthFailed,
            HandshakeFailure::VersionMismatch { .. } => Self::VersionMismatch,
            HandshakeFailure::Timeout => Self::HandshakeTimeout,
            HandshakeFailure::Busy | HandshakeFailure::Protocol(_) => Self::ConnectFailed,
        }
    }

    /// Translate a transport error raised while the handshake is running.
    pub fn from_setup_error(err: &TakionError) -> Self {
        match err {
            TakionError::Timeout(_) | TakionError::RetransmitExhausted { .. } => {
                Self::HandshakeTimeout
            }
            TakionError::Handshake(f) => Self::from_handshake(f),
            TakionError::PeerDisconnect(_) => Self::PeerDisconnect,
            TakionError::ConnectionLost(_) => Self::ConnectionLost,
            _ => Self::ConnectFailed,
        }
    }

    /// Translate a transport error raised once streaming.
    pub fn from_stream_error(err: &TakionError) -> Self {
        match err {
            TakionError::Handshake(f) => Self::from_handshake(f),
            TakionError::PeerDisconnect(_) => Self::PeerDisconnect,
            _ => Self::ConnectionLost,
        }
    }

    pub fn is_error(&self) -> bool {
        !matches!(self, Self::Stopped | Self::Standby)
    }
}

impl std::fmt::Display for QuitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Stopped => "stopped",
            Self::AuthFailed => "authentication failed",
            Self::VersionMismatch => "version mismatch",
            Self::HandshakeTimeout => "handshake timeout",
            Self::ConnectFailed => "connect failed",
            Self::PeerDisconnect => "disconnected by console",
            Self::ConnectionLost => "connection lost",
            Self::Standby => "console in standby",
        };
        f.write_str(s)
    }
}

/// Lifecycle and status events, in order of occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Media streams are up.
    Connected,
    /// Terminal; the last event of every session.
    Disconnected { reason: QuitReason, detail: String },
    /// The console wants a PIN. `incorrect` is set on retries.
    LoginPinRequested { incorrect: bool },
    /// Negotiated audio format; configure playback and capture.
    AudioFormat { channels: u16, rate: u32 },
    Quality(QualityEvent),
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn setup_errors_map_to_reasons() {
        assert_eq!(
            QuitReason::from_setup_error(&TakionError::Timeout(Duration::from_secs(1))),
            QuitReason::HandshakeTimeout
        );
        assert_eq!(
            QuitReason::from_setup_error(&TakionError::RetransmitExhausted { attempts: 3 }),
            QuitReason::HandshakeTimeout
        );
        assert_eq!(
            QuitReason::from_setup_error(&TakionError::Handshake(HandshakeFailure::Credentials)),
            QuitReason::AuthFailed
        );
        assert_eq!(
            QuitReason::from_setup_error(&TakionError::ConnectFailed("refused".into())),
            QuitReason::ConnectFailed
        );
    }

    #[test]
    fn console_disconnect_keeps_its_reason_in_every_phase() {
        let err = TakionError::PeerDisconnect("console busy".into());
        assert_eq!(QuitReason::from_setup_error(&err), QuitReason::PeerDisconnect);
        assert_eq!(QuitReason::from_stream_error(&err), QuitReason::PeerDisconnect);
        assert_eq!(
            QuitReason::from_stream_error(&TakionError::ConnectionLost("transport closed")),
            QuitReason::ConnectionLost
        );
    }

    #[test]
    fn version_mismatch_is_not_a_credential_problem() {
        let f = HandshakeFailure::VersionMismatch { local: 12, remote: 9 };
        assert_eq!(QuitReason::from_handshake(&f), QuitReason::VersionMismatch);
        assert!(!f.is_credential_problem());
        assert!(QuitReason::VersionMismatch.is_error());
        assert!(!QuitReason::Stopped.is_error());
    }
}
