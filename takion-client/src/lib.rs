//! # takion-client: Headless Streaming Client
//!
//! Loads a TOML configuration, runs one Takion session against a console
//! and reports its lifecycle through `tracing`. Decoding and capture are
//! stood in for by counting sinks and a silent microphone encoder.

pub mod config;
pub mod sinks;
