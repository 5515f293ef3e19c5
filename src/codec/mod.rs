//! Decoder capability and packet buffering
//!
//! The pixel and audio decode algorithms are supplied by the host through
//! [`DecoderFactory`]. This module owns everything around them: the packet
//! pool feeding a decoder and the shared slot that keeps a decoder alive
//! until every packet tied to it has been returned.

pub mod decoder;
pub mod pool;

pub use decoder::{DecoderHandle, DecoderStats};
pub use pool::{Packet, PacketPool};

use serde::{Deserialize, Serialize};

use crate::error::CodecError;
use crate::media::{AudioFrame, VideoFrame};

/// Codec a decoder is initialized for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodecKind {
    H264,
    Mjpeg,
    Aac,
}

/// Video format requested from the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoFormat {
    #[default]
    Avc,
    Mjpeg,
}

impl VideoFormat {
    /// Name used in the stream-start request
    pub fn wire_name(self) -> &'static str {
        match self {
            VideoFormat::Avc => "avc",
            VideoFormat::Mjpeg => "jpg",
        }
    }

    pub fn codec(self) -> CodecKind {
        match self {
            VideoFormat::Avc => CodecKind::H264,
            VideoFormat::Mjpeg => CodecKind::Mjpeg,
        }
    }
}

/// External decode capability.
///
/// `initialize` receives the configuration blob that preceded the first
/// sample (empty when the stream carries none).
pub trait Decoder: Send {
    type Output;

    fn initialize(&mut self, config: &[u8], codec: CodecKind, use_hw: bool) -> Result<(), CodecError>;

    /// Decode one packet. `Ok(None)` means the decoder consumed the packet
    /// without producing output yet.
    fn decode(&mut self, packet: &Packet) -> Result<Option<Self::Output>, CodecError>;
}

pub type VideoDecoder = dyn Decoder<Output = VideoFrame>;
pub type AudioDecoder = dyn Decoder<Output = AudioFrame>;

/// Creates decoders on demand
pub trait DecoderFactory: Send + Sync {
    /// `None` when the format is not supported
    fn video(&self, format: VideoFormat) -> Option<Box<VideoDecoder>>;

    fn audio(&self) -> Option<Box<AudioDecoder>>;
}
