//! Device wire protocol: media framing, requests and the control exchange

pub mod exchange;
pub mod frame;
pub mod request;

pub use exchange::{exchange, parse_percentage, ExchangeError};
pub use frame::{encode_frame, read_frame, FrameHeader};

use serde::{Deserialize, Serialize};

use crate::codec::VideoFormat;

/// Capture resolution requested from the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Resolution {
    #[serde(rename = "480p")]
    Sd480,
    #[default]
    #[serde(rename = "720p")]
    Hd720,
    #[serde(rename = "1080p")]
    Fhd1080,
    #[serde(rename = "2160p")]
    Uhd2160,
}

impl Resolution {
    pub fn label(self) -> &'static str {
        match self {
            Resolution::Sd480 => "640x480",
            Resolution::Hd720 => "1280x720",
            Resolution::Fhd1080 => "1920x1080",
            Resolution::Uhd2160 => "3840x2160",
        }
    }
}

/// What the video stream-start request asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreamParameters {
    pub format: VideoFormat,
    pub resolution: Resolution,
}

impl StreamParameters {
    pub fn new(format: VideoFormat, resolution: Resolution) -> Self {
        Self { format, resolution }
    }
}
