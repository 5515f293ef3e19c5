//! Error types for the streaming session engine
//!
//! None of these are fatal to the process: transport and protocol errors
//! drop the current connection and the owning loop retries, codec errors
//! park the decoder in its failed state until the next connection.

use std::net::SocketAddr;
use thiserror::Error;

use crate::codec::VideoFormat;
use crate::device::DeviceKind;

/// Main error type for the engine
#[derive(Error, Debug)]
pub enum Error {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures turning a device descriptor into a connected stream
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("No transport resolved for device")]
    Unresolved,

    #[error("{kind:?} device not found: {id}")]
    NotFound { kind: DeviceKind, id: String },

    #[error("Device is offline: {0}")]
    Offline(String),

    #[error("Port forward {local} -> {remote} failed")]
    ForwardFailed { local: u16, remote: u16 },

    #[error("Connect to {addr} failed: {source}")]
    Dial {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Multiplexer connect failed: {0}")]
    Multiplexer(std::io::Error),

    #[error("Send failed: {0}")]
    SendFailed(std::io::Error),
}

/// Wire format violations; the connection is aborted
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Stop/error from device side")]
    PeerStopped,

    #[error("Invalid config length: {0}")]
    ConfigLength(u32),

    #[error("Second config blob before a sample")]
    DuplicateConfig,

    #[error("Invalid sample length: {0}")]
    SampleLength(u32),

    #[error("Short read: {0}")]
    ShortRead(#[from] std::io::Error),
}

/// Decoder errors
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Decoder initialization failed: {0}")]
    DecoderInit(String),

    #[error("Decoding failed: {0}")]
    DecodingFailed(String),

    #[error("Unsupported video format: {0:?}")]
    UnsupportedFormat(VideoFormat),
}

/// Invalid activation or configuration input
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Device id is empty")]
    EmptyDeviceId,

    #[error("Invalid port: {0}")]
    InvalidPort(u32),

    #[error("Target address is empty")]
    MissingAddress,

    #[error("Unable to determine device type for {0}, refresh the device list and try again")]
    UnresolvedDevice(String),

    #[error("Failed to read config: {0}")]
    Read(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Result type alias for the engine
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let e = ProtocolError::ConfigLength(2048);
        assert!(e.to_string().contains("2048"));

        let e = TransportError::ForwardFailed { local: 5575, remote: 5555 };
        assert!(e.to_string().contains("5575"));
        assert!(e.to_string().contains("5555"));
    }

    #[test]
    fn test_from_conversions() {
        let io_err = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof");
        let e: ProtocolError = io_err.into();
        assert!(matches!(e, ProtocolError::ShortRead(_)));

        let e: Error = e.into();
        assert!(matches!(e, Error::Protocol(_)));

        let e: Error = ConfigError::EmptyDeviceId.into();
        assert!(matches!(e, Error::Config(_)));
    }
}
