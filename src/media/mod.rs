//! Decoded media and the sink that consumes it

use std::time::Instant;

/// Decoded video picture
#[derive(Clone, Debug, Default)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    /// Decoder-defined pixel layout, opaque to the engine
    pub data: Vec<u8>,
    /// Presentation time in nanoseconds
    pub timestamp: u64,
}

/// Decoded audio containing interleaved samples
#[derive(Clone, Debug, Default)]
pub struct AudioFrame {
    pub samples: Vec<f32>,
    pub channels: u16,
    pub sample_rate: u32,
    /// Receive time in nanoseconds on the session clock
    pub timestamp: u64,
}

/// Session notifications for the host
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    /// The video decoder initialized on a fresh connection
    VideoConnected,
    /// A decoder that had been ready was torn down
    VideoDisconnected,
    /// Where the device was reached, e.g. `http://127.0.0.1:4747`
    RemoteAddress(String),
    /// Battery level reported by the device; empty when the control
    /// connection closed
    DeviceStatus { battery: String, alert: bool },
}

/// Consumer of decoded output
pub trait MediaSink: Send + Sync {
    /// `None` clears the picture
    fn publish_video_frame(&self, frame: Option<VideoFrame>);

    /// `None` signals that audio stopped
    fn publish_audio_frame(&self, frame: Option<AudioFrame>);

    fn on_event(&self, _event: SessionEvent) {}
}

/// Monotonic receive clock, in nanoseconds since session start
#[derive(Debug, Clone, Copy)]
pub struct MediaClock {
    epoch: Instant,
}

impl MediaClock {
    pub fn new() -> Self {
        Self { epoch: Instant::now() }
    }

    pub fn now_ns(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }
}

impl Default for MediaClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Device timestamps are microseconds; sinks want nanoseconds
pub fn pts_to_ns(pts: u64) -> u64 {
    pts.saturating_mul(1000)
}
