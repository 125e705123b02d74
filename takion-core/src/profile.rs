//! Negotiated video stream parameters.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::TakionError;

// ── VideoCodec ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum VideoCodec {
    #[default]
    H264,
    H265,
}

impl FromStr for VideoCodec {
    type Err = TakionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "h264" | "avc" => Ok(VideoCodec::H264),
            "h265" | "hevc" => Ok(VideoCodec::H265),
            _ => Err(TakionError::Other(format!("unknown video codec '{s}'"))),
        }
    }
}

impl fmt::Display for VideoCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VideoCodec::H264 => write!(f, "h264"),
            VideoCodec::H265 => write!(f, "h265"),
        }
    }
}

// ── Resolution ───────────────────────────────────────────────────

/// Resolution presets the console accepts, lowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Resolution {
    P360,
    P540,
    P720,
    P1080,
}

impl Resolution {
    pub fn dimensions(self) -> (u32, u32) {
        match self {
            Resolution::P360 => (640, 360),
            Resolution::P540 => (960, 540),
            Resolution::P720 => (1280, 720),
            Resolution::P1080 => (1920, 1080),
        }
    }

    /// Bitrate the console uses for this preset.
    pub fn default_bitrate_kbps(self) -> u32 {
        match self {
            Resolution::P360 => 2000,
            Resolution::P540 => 6000,
            Resolution::P720 => 10000,
            Resolution::P1080 => 15000,
        }
    }

    /// The next lower preset, if any.
    pub fn step_down(self) -> Option<Self> {
        match self {
            Resolution::P360 => None,
            Resolution::P540 => Some(Resolution::P360),
            Resolution::P720 => Some(Resolution::P540),
            Resolution::P1080 => Some(Resolution::P720),
        }
    }
}

impl FromStr for Resolution {
    type Err = TakionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim_end_matches(['p', 'P']) {
            "360" => Ok(Resolution::P360),
            "540" => Ok(Resolution::P540),
            "720" => Ok(Resolution::P720),
            "1080" => Ok(Resolution::P1080),
            _ => Err(TakionError::Other(format!("unknown resolution '{s}'"))),
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (_, h) = self.dimensions();
        write!(f, "{h}p")
    }
}

// ── VideoProfile ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoProfile {
    pub codec: VideoCodec,
    pub resolution: Resolution,
    pub max_fps: u16,
    pub bitrate_kbps: u32,
}

impl VideoProfile {
    /// Round-trip time above which the profile drops one preset.
    pub const DEGRADE_RTT: Duration = Duration::from_millis(80);
    /// Round-trip time above which only the conservative profile is used.
    pub const CONSERVATIVE_RTT: Duration = Duration::from_millis(150);

    pub fn preset(resolution: Resolution, max_fps: u16) -> Self {
        Self {
            codec: VideoCodec::H264,
            resolution,
            max_fps,
            bitrate_kbps: resolution.default_bitrate_kbps(),
        }
    }

    /// Used when latency probing fails.
    pub fn conservative() -> Self {
        Self::preset(Resolution::P360, 30)
    }

    /// Pick the profile to request given a measured round-trip time.
    /// Never raises the requested profile.
    pub fn adapt_to_rtt(self, rtt: Duration) -> Self {
        if rtt >= Self::CONSERVATIVE_RTT {
            let conservative = Self::conservative();
            return Self {
                codec: self.codec,
                resolution: conservative.resolution.min(self.resolution),
                max_fps: conservative.max_fps.min(self.max_fps),
                bitrate_kbps: conservative.bitrate_kbps.min(self.bitrate_kbps),
            };
        }
        if rtt >= Self::DEGRADE_RTT {
            if let Some(lower) = self.resolution.step_down() {
                return Self {
                    resolution: lower,
                    bitrate_kbps: self.bitrate_kbps.min(lower.default_bitrate_kbps()),
                    ..self
                };
            }
        }
        self
    }
}

impl Default for VideoProfile {
    fn default() -> Self {
        Self::preset(Resolution::P720, 60)
    }
}

impl fmt::Display for VideoProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}@{} {} kbps",
            self.codec, self.resolution, self.max_fps, self.bitrate_kbps
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets() {
        let p = VideoProfile::preset(Resolution::P1080, 60);
        assert_eq!(p.bitrate_kbps, 15000);
        assert_eq!(p.to_string(), "h264 1080p@60 15000 kbps");
        assert_eq!(VideoProfile::conservative().resolution, Resolution::P360);
    }

    #[test]
    fn adapt_to_rtt() {
        let p = VideoProfile::preset(Resolution::P720, 60);
        assert_eq!(p.adapt_to_rtt(Duration::from_millis(10)), p);

        let slower = p.adapt_to_rtt(Duration::from_millis(100));
        assert_eq!(slower.resolution, Resolution::P540);
        assert_eq!(slower.bitrate_kbps, 6000);

        let worst = p.adapt_to_rtt(Duration::from_millis(400));
        assert_eq!(worst.resolution, Resolution::P360);
        assert_eq!(worst.max_fps, 30);
    }

    #[test]
    fn parse_from_config_strings() {
        assert_eq!("720p".parse::<Resolution>().unwrap(), Resolution::P720);
        assert_eq!("1080".parse::<Resolution>().unwrap(), Resolution::P1080);
        assert!("4k".parse::<Resolution>().is_err());
        assert_eq!("HEVC".parse::<VideoCodec>().unwrap(), VideoCodec::H265);
    }
}
