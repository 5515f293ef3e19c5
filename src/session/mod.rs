//! Session lifecycle
//!
//! A [`SessionController`] owns the shared state and the four loop
//! threads. External triggers (activation, visibility, stream parameters,
//! tally) are its methods; the loops observe them through
//! [`SessionState`].

pub mod signal;
pub mod state;

pub use signal::{Event, Signals};
pub use state::{ControlCommand, SessionState, Tally};

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use uuid::Uuid;

use crate::codec::{DecoderFactory, VideoFormat};
use crate::config::AppConfig;
use crate::device::{DeviceDescriptor, DeviceKind, DeviceSelection, Locators};
use crate::error::Result;
use crate::media::{MediaClock, MediaSink};
use crate::network::TransportConnector;
use crate::pipeline::{AudioIngest, ControlChannel, PipelineContext, VideoDecodeWorker, VideoIngest};
use crate::protocol::{Resolution, StreamParameters};

/// Snapshot of what the session is doing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStatus {
    pub activated: bool,
    pub video_running: bool,
    pub audio_running: bool,
}

impl SessionStatus {
    pub const ACTIVATED: u32 = 1;
    pub const VIDEO_RUNNING: u32 = 2;
    pub const AUDIO_RUNNING: u32 = 4;

    pub fn bits(&self) -> u32 {
        let mut bits = 0;
        if self.activated {
            bits |= Self::ACTIVATED;
        }
        if self.video_running {
            bits |= Self::VIDEO_RUNNING;
        }
        if self.audio_running {
            bits |= Self::AUDIO_RUNNING;
        }
        bits
    }
}

/// Owns one device session and its loops
pub struct SessionController {
    ctx: PipelineContext,
    threads: Vec<JoinHandle<()>>,
}

impl SessionController {
    pub fn new(
        config: AppConfig,
        locators: Locators,
        decoders: Arc<dyn DecoderFactory>,
        sink: Arc<dyn MediaSink>,
    ) -> Self {
        let state = Arc::new(SessionState::new(&config.stream));
        let connector = Arc::new(TransportConnector::new(locators, config.network.clone()));

        Self {
            ctx: PipelineContext {
                state,
                connector,
                decoders,
                sink,
                config: Arc::new(config),
                clock: MediaClock::new(),
            },
            threads: Vec::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.ctx.state.id
    }

    pub fn state(&self) -> &Arc<SessionState> {
        &self.ctx.state
    }

    pub fn config(&self) -> &AppConfig {
        &self.ctx.config
    }

    /// Spawn the loop threads. If any thread fails to spawn, the ones
    /// already running are stopped and joined.
    pub fn start(&mut self) -> Result<()> {
        if !self.threads.is_empty() {
            return Ok(());
        }
        tracing::info!("starting session {}", self.id());

        let spawned = self
            .spawn("video-ingest", |ctx| VideoIngest::new(ctx).run())
            .and_then(|_| self.spawn("video-decode", |ctx| VideoDecodeWorker::new(ctx).run()))
            .and_then(|_| self.spawn("audio-ingest", |ctx| AudioIngest::new(ctx).run()))
            .and_then(|_| self.spawn("control", |ctx| ControlChannel::new(ctx).run()));

        if let Err(e) = spawned {
            tracing::error!("failed to start session loops: {}", e);
            self.shutdown();
            return Err(e.into());
        }
        Ok(())
    }

    fn spawn<F>(&mut self, name: &str, body: F) -> std::io::Result<()>
    where
        F: FnOnce(PipelineContext) + Send + 'static,
    {
        let ctx = self.ctx.clone();
        let span = tracing::info_span!("session", id = %self.ctx.state.id);
        let handle = thread::Builder::new().name(name.to_string()).spawn(move || {
            let _enter = span.enter();
            body(ctx);
        })?;
        self.threads.push(handle);
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        !self.threads.is_empty() && !self.ctx.state.signals.is_stopped()
    }

    /// Validate the selection and start streaming from it
    pub fn activate(&self, selection: &DeviceSelection) -> Result<DeviceDescriptor> {
        let state = &self.ctx.state;
        let device = match self.ctx.connector.locators().resolve(selection) {
            Ok(device) => device,
            Err(e) => {
                tracing::warn!("activation rejected: {}", e);
                self.deactivate();
                return Err(e.into());
            }
        };

        tracing::info!("activating {:?} device {} ({}:{})", device.kind, device.id, device.address, device.port);
        state.set_device(device.clone());
        state.set_activated(true);
        Ok(device)
    }

    pub fn deactivate(&self) {
        let state = &self.ctx.state;
        if state.is_activated() {
            tracing::info!("deactivating");
        }
        state.set_activated(false);
        state.set_device(DeviceDescriptor::default());
        self.ctx.connector.reset_local_port();
    }

    pub fn show(&self) {
        let state = &self.ctx.state;
        state.set_visible(true);
        state.update_tally(|t| t.previewing = true);
        state.enqueue_tally();
    }

    /// Stops streaming only when configured to deactivate while hidden
    pub fn hide(&self) {
        let state = &self.ctx.state;
        if state.deactivate_when_hidden() && state.is_activated() {
            state.set_visible(false);
        }
        state.update_tally(|t| t.previewing = false);
        state.enqueue_tally();
    }

    pub fn set_program(&self, on_program: bool) {
        let state = &self.ctx.state;
        state.update_tally(|t| t.program_active = on_program);
        state.enqueue_tally();
    }

    /// Replace the whole tally
    pub fn enqueue_tally(&self, tally: Tally) {
        let state = &self.ctx.state;
        state.update_tally(|t| *t = tally);
        state.enqueue_tally();
    }

    pub fn tally(&self) -> Tally {
        self.ctx.state.tally()
    }

    /// Reconnect with new parameters; no-op when nothing changed
    pub fn set_stream_parameters(&self, format: VideoFormat, resolution: Resolution) {
        let state = &self.ctx.state;
        if state.set_params(StreamParameters::new(format, resolution)) {
            tracing::info!("stream parameters: {} {}", format.wire_name(), resolution.label());
            state.signals.reset.set();
        }
    }

    pub fn set_audio_enabled(&self, enabled: bool) {
        self.ctx.state.set_audio_enabled(enabled);
    }

    pub fn set_use_hw(&self, use_hw: bool) {
        self.ctx.state.set_use_hw(use_hw);
    }

    pub fn set_deactivate_when_hidden(&self, value: bool) {
        self.ctx.state.set_deactivate_when_hidden(value);
    }

    /// Rescan every locator
    pub fn refresh_devices(&self) {
        self.ctx.connector.locators().reload_all();
    }

    pub fn list_devices(&self, kind: DeviceKind) -> Vec<DeviceDescriptor> {
        self.ctx.connector.locators().list_known(kind)
    }

    pub fn status(&self) -> SessionStatus {
        let state = &self.ctx.state;
        SessionStatus {
            activated: state.is_activated(),
            video_running: state.video_running(),
            audio_running: state.audio_running(),
        }
    }

    /// Raise stop and join every loop
    pub fn shutdown(&mut self) {
        if self.threads.is_empty() {
            self.ctx.state.signals.stop_all();
            return;
        }

        tracing::info!("stopping session {}", self.id());
        self.ctx.state.signals.stop_all();
        for handle in self.threads.drain(..) {
            let name = handle.thread().name().unwrap_or("loop").to_string();
            if handle.join().is_err() {
                tracing::error!("{} thread panicked", name);
            }
        }
        tracing::info!("session stopped");
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{AudioDecoder, VideoDecoder};
    use crate::media::{AudioFrame, VideoFrame};

    struct NoDecoders;

    impl DecoderFactory for NoDecoders {
        fn video(&self, _format: VideoFormat) -> Option<Box<VideoDecoder>> {
            None
        }

        fn audio(&self) -> Option<Box<AudioDecoder>> {
            None
        }
    }

    struct NullSink;

    impl MediaSink for NullSink {
        fn publish_video_frame(&self, _frame: Option<VideoFrame>) {}
        fn publish_audio_frame(&self, _frame: Option<AudioFrame>) {}
    }

    fn controller() -> SessionController {
        SessionController::new(
            AppConfig::default(),
            Locators::direct_only(),
            Arc::new(NoDecoders),
            Arc::new(NullSink),
        )
    }

    #[test]
    fn test_status_bits() {
        let status = SessionStatus {
            activated: true,
            video_running: false,
            audio_running: true,
        };
        assert_eq!(status.bits(), 5);
        assert_eq!(SessionStatus::default().bits(), 0);
    }

    #[test]
    fn test_activation_validation() {
        let session = controller();

        let err = session.activate(&DeviceSelection::Direct { address: String::new(), port: 4747 });
        assert!(err.is_err());
        assert!(!session.status().activated);

        let err = session.activate(&DeviceSelection::Direct { address: "10.0.0.2".into(), port: 70000 });
        assert!(err.is_err());

        let err = session.activate(&DeviceSelection::Known { id: "serial".into(), port: 4747 });
        assert!(err.is_err());

        let device = session
            .activate(&DeviceSelection::Direct { address: "10.0.0.2".into(), port: 4747 })
            .unwrap();
        assert_eq!(device.kind, DeviceKind::DirectIp);
        assert_eq!(session.status().bits(), SessionStatus::ACTIVATED);

        session.deactivate();
        assert!(!session.status().activated);
        assert_eq!(session.state().device(), DeviceDescriptor::default());
    }

    #[test]
    fn test_visibility_and_tally() {
        let session = controller();
        session.show();
        assert!(session.state().is_visible());
        assert!(session.tally().previewing);

        // Hiding keeps streaming unless configured otherwise
        session.hide();
        assert!(session.state().is_visible());
        assert!(!session.tally().previewing);

        session.set_deactivate_when_hidden(true);
        session
            .activate(&DeviceSelection::Direct { address: "10.0.0.2".into(), port: 4747 })
            .unwrap();
        session.hide();
        assert!(!session.state().is_visible());

        session.set_program(true);
        assert_eq!(session.tally().label(), "program");
        assert_eq!(session.state().pending_commands(), 4);
    }

    #[test]
    fn test_parameter_change_raises_reset() {
        let session = controller();
        let params = session.state().params();

        session.set_stream_parameters(params.format, params.resolution);
        assert!(!session.state().signals.reset.is_set());

        session.set_stream_parameters(VideoFormat::Mjpeg, Resolution::Fhd1080);
        assert!(session.state().signals.reset.is_set());
        assert_eq!(session.state().params().format, VideoFormat::Mjpeg);
    }

    #[test]
    fn test_start_and_shutdown() {
        let mut session = controller();
        session.start().unwrap();
        assert!(session.is_running());

        let begin = std::time::Instant::now();
        session.shutdown();
        assert!(!session.is_running());
        assert!(begin.elapsed() < std::time::Duration::from_secs(2));
    }
}
