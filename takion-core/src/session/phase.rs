//! Session lifecycle.
//!
//! Validated transitions return `Result` instead of panicking.

use crate::error::TakionError;

/// ```text
///  Idle ─► Handshaking ─► ProbeLatency ─► StreamEstablishing ─► Streaming ─► GoingToBed
///   │           │              │                  │                 │             │
///   └───────────┴──────────────┴──── stop / fatal ┴─────────────────┴─────────────┘
///                                         ▼
///                                      Closing ─► Closed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionPhase {
    #[default]
    Idle,

    /// Transport connect and key agreement (including any PIN prompt).
    Handshaking,

    /// Senkusha: RTT and MTU measurement.
    ProbeLatency,

    /// Stream request sent, waiting for the console to open the media streams.
    StreamEstablishing,

    /// All pipelines running.
    Streaming,

    /// Console asked to enter standby.
    GoingToBed,

    Closing,

    /// Terminal.
    Closed,
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "Idle",
            Self::Handshaking => "Handshaking",
            Self::ProbeLatency => "ProbeLatency",
            Self::StreamEstablishing => "StreamEstablishing",
            Self::Streaming => "Streaming",
            Self::GoingToBed => "GoingToBed",
            Self::Closing => "Closing",
            Self::Closed => "Closed",
        };
        f.write_str(name)
    }
}

impl SessionPhase {
    pub fn is_streaming(&self) -> bool {
        matches!(self, Self::Streaming)
    }

    /// `Closing` or `Closed`.
    pub fn is_ending(&self) -> bool {
        matches!(self, Self::Closing | Self::Closed)
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }

    fn step(&mut self, from: Self, to: Self, err: &'static str) -> Result<(), TakionError> {
        if *self != from {
            return Err(TakionError::InvalidState(err));
        }
        *self = to;
        Ok(())
    }

    // ── Transitions ──────────────────────────────────────────────

    pub fn begin_handshake(&mut self) -> Result<(), TakionError> {
        self.step(Self::Idle, Self::Handshaking, "cannot handshake: not Idle")
    }

    pub fn begin_probe(&mut self) -> Result<(), TakionError> {
        self.step(Self::Handshaking, Self::ProbeLatency, "cannot probe: not Handshaking")
    }

    pub fn begin_stream_setup(&mut self) -> Result<(), TakionError> {
        self.step(
            Self::ProbeLatency,
            Self::StreamEstablishing,
            "cannot set up streams: not probing",
        )
    }

    pub fn start_streaming(&mut self) -> Result<(), TakionError> {
        self.step(
            Self::StreamEstablishing,
            Self::Streaming,
            "cannot stream: streams not being established",
        )
    }

    pub fn go_to_bed(&mut self) -> Result<(), TakionError> {
        self.step(Self::Streaming, Self::GoingToBed, "cannot go to bed: not Streaming")
    }

    /// Valid from every phase except `Closing` and `Closed`.
    pub fn begin_close(&mut self) -> Result<(), TakionError> {
        if self.is_ending() {
            return Err(TakionError::InvalidState("cannot close: already closing or closed"));
        }
        *self = Self::Closing;
        Ok(())
    }

    pub fn finish_close(&mut self) -> Result<(), TakionError> {
        self.step(Self::Closing, Self::Closed, "cannot finish close: not Closing")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_lifecycle() {
        let mut p = SessionPhase::default();
        p.begin_handshake().unwrap();
        p.begin_probe().unwrap();
        p.begin_stream_setup().unwrap();
        p.start_streaming().unwrap();
        assert!(p.is_streaming());
        p.go_to_bed().unwrap();
        p.begin_close().unwrap();
        p.finish_close().unwrap();
        assert!(p.is_closed());
        assert_eq!(p.to_string(), "Closed");
    }

    #[test]
    fn any_live_phase_can_close() {
        for mut p in [
            SessionPhase::Idle,
            SessionPhase::Handshaking,
            SessionPhase::ProbeLatency,
            SessionPhase::StreamEstablishing,
            SessionPhase::Streaming,
            SessionPhase::GoingToBed,
        ] {
            p.begin_close().unwrap();
            assert_eq!(p, SessionPhase::Closing);
        }
    }

    #[test]
    fn invalid_transitions_are_errors() {
        let mut p = SessionPhase::Idle;
        assert!(p.start_streaming().is_err());
        assert!(p.finish_close().is_err());
        p.begin_close().unwrap();
        assert!(p.begin_close().is_err());
        assert!(p.begin_handshake().is_err());
        assert_eq!(p, SessionPhase::Closing);
    }
}
