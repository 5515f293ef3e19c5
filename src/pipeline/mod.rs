//! Session loops
//!
//! Each loop runs on its own thread and walks the same connection cycle:
//!
//! ```text
//!   Idle ──► Connecting ──► Streaming
//!    ▲           │              │
//!    │           ▼              ▼
//!    └────────  Closing  ◄──────┘
//! ```
//!
//! `Closing` always tears the connection and decoder down before returning
//! to `Idle`; failures on the way sleep for the retry delay first.

pub mod audio;
pub mod control;
pub mod video;

pub use audio::AudioIngest;
pub use control::ControlChannel;
pub use video::{VideoDecodeWorker, VideoIngest};

use std::io::Write;
use std::net::TcpStream;
use std::sync::Arc;

use crate::codec::DecoderFactory;
use crate::config::AppConfig;
use crate::device::DeviceDescriptor;
use crate::error::TransportError;
use crate::media::{MediaClock, MediaSink};
use crate::network::{socket, SessionStream, TransportConnector};
use crate::session::state::SessionState;

/// Connection phase of an ingest loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Not connected; deciding whether to connect
    Idle,
    Connecting,
    Streaming,
    /// Tearing down before going idle
    Closing,
}

/// Everything a loop needs, cloned into each thread
#[derive(Clone)]
pub struct PipelineContext {
    pub state: Arc<SessionState>,
    pub connector: Arc<TransportConnector>,
    pub decoders: Arc<dyn DecoderFactory>,
    pub sink: Arc<dyn MediaSink>,
    pub config: Arc<AppConfig>,
    pub clock: MediaClock,
}

impl PipelineContext {
    /// Stop-aware sleep for the slow-retry delay
    pub(crate) fn retry_sleep(&self) {
        self.state.signals.sleep(self.config.timing.retry_delay());
    }

    pub(crate) fn idle_sleep(&self) {
        self.state.signals.sleep(self.config.timing.idle_period());
    }

    /// Connect to the current device and send the stream-start request
    pub(crate) fn open_stream(&self, device: &DeviceDescriptor, request: &[u8]) -> Result<TcpStream, TransportError> {
        let stream = self.connector.connect(device)?;

        let timing = &self.config.timing;
        socket::prepare(&stream, timing.stop_check(), self.config.network.io_timeout())
            .map_err(TransportError::SendFailed)?;

        self.session_stream(&stream, self.config.network.io_timeout())
            .write_all(request)
            .map_err(TransportError::SendFailed)?;

        Ok(stream)
    }

    pub(crate) fn session_stream<'a>(
        &'a self,
        stream: &'a TcpStream,
        idle_limit: std::time::Duration,
    ) -> SessionStream<'a> {
        SessionStream::new(stream, &self.state.signals, self.config.timing.stop_check(), idle_limit)
    }
}

impl std::fmt::Debug for PipelineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineContext")
            .field("session", &self.state.id)
            .finish_non_exhaustive()
    }
}
