//! Takion connection lifecycle.
//!
//! Validated transitions return `Result` instead of panicking.

use std::time::Instant;

use crate::error::TakionError;

/// ```text
///  Connecting ──► Established ──► Closing ──► Closed
///       │              │                        ▲
///       └──────────────┴──── fatal error ───────┘
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// INIT sent, waiting for INIT_ACK.
    #[default]
    Connecting,

    /// Tags exchanged; control and media traffic allowed.
    Established {
        since: Instant,
    },

    /// Local close in progress (DISCONNECT being sent).
    Closing,

    /// Terminal.
    Closed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connecting => write!(f, "Connecting"),
            Self::Established { .. } => write!(f, "Established"),
            Self::Closing => write!(f, "Closing"),
            Self::Closed => write!(f, "Closed"),
        }
    }
}

impl ConnectionState {
    pub fn is_established(&self) -> bool {
        matches!(self, Self::Established { .. })
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }

    // ── Transitions ──────────────────────────────────────────────

    /// Valid from: `Connecting`.
    pub fn establish(&mut self) -> Result<(), TakionError> {
        match self {
            Self::Connecting => {
                *self = Self::Established {
                    since: Instant::now(),
                };
                Ok(())
            }
            _ => Err(TakionError::InvalidState(
                "cannot establish: not in Connecting state",
            )),
        }
    }

    /// Valid from: `Connecting`, `Established`.
    pub fn begin_close(&mut self) -> Result<(), TakionError> {
        match self {
            Self::Connecting | Self::Established { .. } => {
                *self = Self::Closing;
                Ok(())
            }
            _ => Err(TakionError::InvalidState(
                "cannot close: already closing or closed",
            )),
        }
    }

    /// Valid from: `Closing`.
    pub fn finish_close(&mut self) -> Result<(), TakionError> {
        match self {
            Self::Closing => {
                *self = Self::Closed;
                Ok(())
            }
            _ => Err(TakionError::InvalidState(
                "cannot finish close: not in Closing state",
            )),
        }
    }

    /// Fatal transport error or peer disconnect: straight to `Closed`.
    pub fn fail(&mut self) {
        *self = Self::Closed;
    }
}
