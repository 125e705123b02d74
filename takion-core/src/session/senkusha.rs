//! Senkusha: latency and MTU measurement before the stream starts.
//!
//! Padded probes walk down a list of candidate datagram sizes until one is
//! acknowledged, which fixes the path MTU. A few small probes then settle
//! the smoothed RTT. The session picks its video profile from the result;
//! a failed probe is not fatal, the session falls back to a conservative
//! profile instead.

use std::time::Duration;

use tracing::{debug, info};

use crate::error::TakionError;
use crate::header::ControlHeader;
use crate::message::ControlMessage;
use crate::takion::TakionTransport;

/// Encoded size of `Probe` minus its padding: variant tag, index, length prefix.
const PROBE_OVERHEAD: usize = 4 + 2 + 8;

/// Smoothed round-trip time (EWMA, α = 1/8).
#[derive(Debug, Clone, Copy, Default)]
pub struct RttEstimator {
    smoothed_us: u64,
    samples: u32,
}

impl RttEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, rtt: Duration) {
        let rtt_us = u64::try_from(rtt.as_micros()).unwrap_or(u64::MAX);
        if self.samples == 0 {
            self.smoothed_us = rtt_us;
        } else {
            // srtt = 7/8 * srtt + 1/8 * sample
            self.smoothed_us = self.smoothed_us * 7 / 8 + rtt_us / 8;
        }
        self.samples = self.samples.saturating_add(1);
    }

    pub fn samples(&self) -> u32 {
        self.samples
    }

    pub fn smoothed(&self) -> Option<Duration> {
        (self.samples > 0).then(|| Duration::from_micros(self.smoothed_us))
    }
}

#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Datagram sizes to try, largest first.
    pub mtu_candidates: Vec<usize>,
    /// Small probes after the MTU is known.
    pub rtt_rounds: u32,
    /// Transmissions per probe before it counts as lost.
    pub attempts: u32,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            mtu_candidates: vec![1454, 1400, 1280],
            rtt_rounds: 3,
            attempts: 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeResult {
    pub rtt: Duration,
    pub mtu: usize,
}

fn probe_message(index: u16, datagram_size: usize) -> ControlMessage {
    let padding = datagram_size.saturating_sub(ControlHeader::SIZE + PROBE_OVERHEAD);
    ControlMessage::Probe {
        index,
        padding: vec![0; padding],
    }
}

/// Run the probe sequence over `transport`. Only a lost transport is an
/// error worth more than a fallback; the caller decides either way.
pub async fn probe(transport: &TakionTransport, config: &ProbeConfig) -> Result<ProbeResult, TakionError> {
    let mut rtt = RttEstimator::new();
    let mut index: u16 = 0;
    let mut mtu = None;

    for &candidate in &config.mtu_candidates {
        let msg = probe_message(index, candidate);
        index = index.wrapping_add(1);
        match transport.probe(&msg, config.attempts).await {
            Ok(sample) => {
                debug!(candidate, rtt_us = sample.as_micros() as u64, "mtu probe acknowledged");
                rtt.record(sample);
                mtu = Some(candidate);
                break;
            }
            Err(TakionError::RetransmitExhausted { .. }) => {
                debug!(candidate, "mtu probe lost");
            }
            Err(e) => return Err(e),
        }
    }
    let mtu = mtu.ok_or(TakionError::RetransmitExhausted {
        attempts: config.attempts,
    })?;

    for _ in 0..config.rtt_rounds {
        let msg = probe_message(index, 0);
        index = index.wrapping_add(1);
        match transport.probe(&msg, config.attempts).await {
            Ok(sample) => rtt.record(sample),
            Err(TakionError::RetransmitExhausted { .. }) => {}
            Err(e) => return Err(e),
        }
    }

    let rtt = rtt.smoothed().unwrap_or_default();
    info!(mtu, rtt_ms = rtt.as_millis() as u64, "senkusha complete");
    Ok(ProbeResult { rtt, mtu })
}
