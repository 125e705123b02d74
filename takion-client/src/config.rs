//! Headless client configuration.

use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use takion_core::{
    ConnectInfo, ConsoleGeneration, Credentials, InputFeatures, Resolution, SessionTimings,
    TakionConfig, VideoCodec, VideoProfile,
};

/// Why a loaded configuration cannot start a session.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot resolve console address {0}")]
    Resolve(String),

    #[error("{field} is not valid hex: {source}")]
    Hex {
        field: &'static str,
        #[source]
        source: hex::FromHexError,
    },

    #[error("{field} must be {expected} bytes, got {actual}")]
    Length {
        field: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("invalid {field}: {value}")]
    Value { field: &'static str, value: String },
}

/// Top-level configuration for the headless client.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub console: ConsoleConfig,
    pub credentials: CredentialsConfig,
    pub stream: StreamConfig,
    pub audio: AudioConfig,
    pub input: InputConfig,
    pub takion: TakionTimings,
    pub logging: LoggingConfig,
}

/// Where the console is.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    /// Hostname or IP address.
    pub host: String,
    pub port: u16,
    /// "legacy" or "newer".
    pub generation: String,
}

/// Registration material, hex encoded.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialsConfig {
    pub regist_key: String,
    /// 16-byte secret shared at registration.
    pub morning: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// "360p", "540p", "720p" or "1080p".
    pub resolution: String,
    pub fps: u16,
    /// 0 keeps the preset's bitrate.
    pub bitrate_kbps: u32,
    /// "h264" or "h265".
    pub codec: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub buffer_size: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    pub keyboard: bool,
    pub dualsense: bool,
    pub motion: bool,
}

/// Transport and session timers, in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TakionTimings {
    pub connect_timeout_ms: u64,
    pub connect_attempts: u32,
    pub retransmit_interval_ms: u64,
    pub retransmit_attempts: u32,
    pub heartbeat_interval_ms: u64,
    pub peer_timeout_ms: u64,
    pub handshake_timeout_ms: u64,
    pub stream_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            host: "192.168.1.50".into(),
            port: 9296,
            generation: "legacy".into(),
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            resolution: "720p".into(),
            fps: 60,
            bitrate_kbps: 0,
            codec: "h264".into(),
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self { buffer_size: 19200 }
    }
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            keyboard: false,
            dualsense: true,
            motion: true,
        }
    }
}

impl Default for TakionTimings {
    fn default() -> Self {
        let takion = TakionConfig::default();
        let timings = SessionTimings::default();
        Self {
            connect_timeout_ms: millis(takion.connect_timeout),
            connect_attempts: takion.connect_attempts,
            retransmit_interval_ms: millis(takion.retransmit_interval),
            retransmit_attempts: takion.retransmit_attempts,
            heartbeat_interval_ms: millis(takion.heartbeat_interval),
            peer_timeout_ms: millis(takion.peer_timeout),
            handshake_timeout_ms: millis(timings.handshake_timeout),
            stream_timeout_ms: millis(timings.stream_timeout),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

// ── Loading ──────────────────────────────────────────────────────

impl ClientConfig {
    /// Load from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Default config as TOML text.
    pub fn default_toml() -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(&Self::default())
    }

    /// Apply a `--host` override: an IP address or hostname, optionally
    /// with a port. IPv6 addresses take a port only in brackets
    /// (`[fe80::1]:9296`).
    pub fn set_host(&mut self, arg: &str) {
        if let Ok(addr) = arg.parse::<SocketAddr>() {
            self.console.host = addr.ip().to_string();
            self.console.port = addr.port();
            return;
        }
        let bare = arg.trim_start_matches('[').trim_end_matches(']');
        if bare.parse::<IpAddr>().is_ok() {
            self.console.host = bare.to_string();
            return;
        }
        match arg.rsplit_once(':').map(|(h, p)| (h, p.parse::<u16>())) {
            Some((host, Ok(port))) if !host.contains(':') => {
                self.console.host = host.to_string();
                self.console.port = port;
            }
            _ => self.console.host = arg.to_string(),
        }
    }

    /// Validate and convert into session parameters.
    pub fn to_connect_info(&self) -> Result<ConnectInfo, ConfigError> {
        let host = self.console_addr()?;
        let mut info = ConnectInfo::new(host, self.credentials()?);
        info.generation = self.generation()?;
        info.video_profile = self.video_profile()?;
        info.audio_buffer_size = self.audio.buffer_size;
        info.features = self.features();

        let t = &self.takion;
        info.takion = TakionConfig {
            connect_timeout: Duration::from_millis(t.connect_timeout_ms),
            connect_attempts: t.connect_attempts,
            retransmit_interval: Duration::from_millis(t.retransmit_interval_ms),
            retransmit_attempts: t.retransmit_attempts,
            heartbeat_interval: Duration::from_millis(t.heartbeat_interval_ms),
            peer_timeout: Duration::from_millis(t.peer_timeout_ms),
            ..TakionConfig::default()
        };
        info.timings = SessionTimings {
            handshake_timeout: Duration::from_millis(t.handshake_timeout_ms),
            stream_timeout: Duration::from_millis(t.stream_timeout_ms),
            ..SessionTimings::default()
        };
        Ok(info)
    }

    fn console_addr(&self) -> Result<SocketAddr, ConfigError> {
        let host = self.console.host.trim_start_matches('[').trim_end_matches(']');
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(SocketAddr::new(ip, self.console.port));
        }
        let target = format!("{host}:{}", self.console.port);
        target
            .to_socket_addrs()
            .ok()
            .and_then(|mut addrs| addrs.next())
            .ok_or(ConfigError::Resolve(target))
    }

    fn credentials(&self) -> Result<Credentials, ConfigError> {
        let regist_key = hex::decode(&self.credentials.regist_key).map_err(|source| ConfigError::Hex {
            field: "credentials.regist_key",
            source,
        })?;
        if regist_key.is_empty() {
            return Err(ConfigError::Value {
                field: "credentials.regist_key",
                value: "empty".into(),
            });
        }
        let morning = hex::decode(&self.credentials.morning).map_err(|source| ConfigError::Hex {
            field: "credentials.morning",
            source,
        })?;
        let actual = morning.len();
        let morning: [u8; 16] = morning.try_into().map_err(|_| ConfigError::Length {
            field: "credentials.morning",
            expected: 16,
            actual,
        })?;
        Ok(Credentials { regist_key, morning })
    }

    fn generation(&self) -> Result<ConsoleGeneration, ConfigError> {
        match self.console.generation.to_ascii_lowercase().as_str() {
            "legacy" | "ps4" => Ok(ConsoleGeneration::Legacy),
            "newer" | "ps5" => Ok(ConsoleGeneration::Newer),
            other => Err(ConfigError::Value {
                field: "console.generation",
                value: other.into(),
            }),
        }
    }

    fn video_profile(&self) -> Result<VideoProfile, ConfigError> {
        let resolution: Resolution = self.stream.resolution.parse().map_err(|_| ConfigError::Value {
            field: "stream.resolution",
            value: self.stream.resolution.clone(),
        })?;
        let codec: VideoCodec = self.stream.codec.parse().map_err(|_| ConfigError::Value {
            field: "stream.codec",
            value: self.stream.codec.clone(),
        })?;
        let mut profile = VideoProfile::preset(resolution, self.stream.fps);
        profile.codec = codec;
        if self.stream.bitrate_kbps > 0 {
            profile.bitrate_kbps = self.stream.bitrate_kbps;
        }
        Ok(profile)
    }

    fn features(&self) -> InputFeatures {
        let mut features = InputFeatures::empty();
        features.set(InputFeatures::KEYBOARD, self.input.keyboard);
        features.set(InputFeatures::DUALSENSE, self.input.dualsense);
        features.set(InputFeatures::MOTION, self.input.motion);
        features
    }
}

// ── Tests ────────────────────────────────────────────────────────
