//! Outbound controller state and haptics targets.
//!
//! Sent on a fixed interval with last-value semantics; no FEC. A lost
//! packet is covered by the next one a few milliseconds later.
//!
//! ## Payload (16 bytes)
//! ```text
//!  0..4   buttons   u32
//!  4      l2        u8
//!  5      r2        u8
//!  6..8   left x    i16
//!  8..10  left y    i16
//! 10..12  right x   i16
//! 12..14  right y   i16
//! 14      rumble left   u8
//! 15      rumble right  u8
//! ```

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::MediaLink;
use crate::error::TakionError;
use crate::header::FeedbackHeader;
use crate::message::ContentType;
use crate::packet::PacketHeader;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControllerState {
    pub buttons: u32,
    pub l2: u8,
    pub r2: u8,
    pub left_x: i16,
    pub left_y: i16,
    pub right_x: i16,
    pub right_y: i16,
}

impl ControllerState {
    pub const SIZE: usize = 14;

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.buttons.to_be_bytes());
        buf[4] = self.l2;
        buf[5] = self.r2;
        buf[6..8].copy_from_slice(&self.left_x.to_be_bytes());
        buf[8..10].copy_from_slice(&self.left_y.to_be_bytes());
        buf[10..12].copy_from_slice(&self.right_x.to_be_bytes());
        buf[12..14].copy_from_slice(&self.right_y.to_be_bytes());
        buf
    }
}

/// Rumble motor targets, 0 = off.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HapticsState {
    pub left: u8,
    pub right: u8,
}

impl HapticsState {
    pub const SIZE: usize = 2;

    pub fn encode(&self) -> [u8; Self::SIZE] {
        [self.left, self.right]
    }
}

// ── FeedbackSender ───────────────────────────────────────────────

pub struct FeedbackSender {
    link: MediaLink,
    controller: watch::Receiver<ControllerState>,
    haptics: watch::Receiver<HapticsState>,
    interval: Duration,
    sequence: u16,
}

impl FeedbackSender {
    pub fn new(
        link: MediaLink,
        controller: watch::Receiver<ControllerState>,
        haptics: watch::Receiver<HapticsState>,
        interval: Duration,
    ) -> Self {
        Self {
            link,
            controller,
            haptics,
            interval,
            sequence: 0,
        }
    }

    /// Sample the latest state and send one packet.
    pub fn send_once(&mut self) -> Result<u16, TakionError> {
        let mut payload = [0u8; ControllerState::SIZE + HapticsState::SIZE];
        payload[..ControllerState::SIZE].copy_from_slice(&self.controller.borrow().encode());
        payload[ControllerState::SIZE..].copy_from_slice(&self.haptics.borrow().encode());

        let sequence = self.sequence;
        let header = PacketHeader::Feedback(FeedbackHeader {
            sequence,
            key_pos: 0,
            tag: [0; 4],
        });
        let mut packet = self.link.framer.build(&header, &payload)?;
        self.sequence = sequence.wrapping_add(1);
        self.link
            .seal_and_send(ContentType::FeedbackState, &mut packet)?;
        Ok(sequence)
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        let mut tick = tokio::time::interval(self.interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tick.tick() => {}
            }
            match self.send_once() {
                Ok(seq) => trace!(seq, "feedback sent"),
                Err(e) => debug!(error = %e, "feedback not sent"),
            }
        }
        debug!("feedback sender stopped");
    }
}
