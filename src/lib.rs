//! # camstream
//!
//! Streaming session engine for remote capture devices (phones and tablets
//! running a camera app).
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                           SessionController                              │
//! │   activation / visibility / device descriptor / tally  (external writes) │
//! │   stop ─┬─ reset ─┬─ wake                       (coordination signals)   │
//! └─────────┼─────────┼──────┼───────────────────────────────────────────────┘
//!           │         │      │
//!           ▼         ▼      ▼
//! ┌────────────────┐ ┌────────────────┐ ┌────────────────┐ ┌────────────────┐
//! │  Video Ingest  │ │  Video Decode  │ │  Audio Ingest  │ │    Control     │
//! │    (thread)    │ │    (thread)    │ │    (thread)    │ │    (thread)    │
//! └───────┬────────┘ └───────▲────────┘ └───────┬────────┘ └───────┬────────┘
//!         │                  │                  │                  │
//!         │  ready packets   │                  │                  │
//!         └──► PacketPool ───┘                  │                  │
//!         │                                     │                  │
//!         ▼                                     ▼                  ▼
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │               TransportConnector (network::connector)                    │
//! │     DirectIP  │  DebugBridge forward  │  Multiplexer  │  Discovery       │
//! └──────────────────────────────────────────────────────────────────────────┘
//!         │  [ts:u64 BE | len:u32 BE | payload]   (protocol::frame)
//!         ▼
//!   remote device
//! ```
//!
//! Decoded frames leave through the [`media::MediaSink`] collaborator; the
//! pixel and audio decode algorithms themselves sit behind
//! [`codec::Decoder`].

pub mod codec;
pub mod config;
pub mod device;
pub mod error;
pub mod media;
pub mod network;
pub mod pipeline;
pub mod protocol;
pub mod session;

pub use error::{Error, Result};
pub use session::SessionController;

/// Application-wide constants
pub mod constants {
    /// Default TCP port of the camera app on the device
    pub const DEFAULT_APP_PORT: u16 = 4747;

    /// Frame header: 8-byte timestamp + 4-byte length, both big-endian
    pub const FRAME_HEADER_SIZE: usize = 12;

    /// Timestamp value marking a configuration blob instead of a sample
    pub const NO_TIMESTAMP: u64 = u64::MAX;

    /// Largest configuration blob accepted from the device
    pub const MAX_CONFIG_LEN: usize = 1024;

    /// Largest media sample accepted from the device (16 MiB)
    pub const MAX_SAMPLE_LEN: usize = 16 * 1024 * 1024;

    /// Capability number advertised in stream-start requests
    pub const CLIENT_CAPABILITY: u32 = 5912;

    /// Receive buffer requested on video sockets
    pub const VIDEO_RECV_BUFFER: usize = 65536 * 4;

    /// Battery level at or below which a status alert is raised
    pub const BATTERY_WARN_LEVEL: u32 = 15;

    /// Nominal frame rate used for idle pacing
    pub const IDLE_FPS: u64 = 25;

    /// Width of the local port window used for debug-bridge forwards
    pub const FORWARD_WINDOW: u16 = 8;

    /// Port stride between debug-bridge instances
    pub const FORWARD_STRIDE: u16 = 10;
}
