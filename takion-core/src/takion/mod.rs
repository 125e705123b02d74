//! Takion: the UDP framing and transport layer beneath the media streams.
//!
//! | Module      | Purpose |
//! |-------------|---------|
//! | `state`     | `ConnectionState` lifecycle with validated transitions |
//! | `ack`       | Control-chunk acknowledgment and duplicate tracking |
//! | `transport` | `TakionTransport`: connect, control, media, keep-alive |

pub mod ack;
pub mod state;
pub mod transport;

pub use ack::{AckTracker, ReceivedWindow};
pub use state::ConnectionState;
pub use transport::{MediaSender, TakionConfig, TakionTransport, TransportEvent};
