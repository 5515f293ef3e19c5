//! State shared between the controller and its loops
//!
//! Single-writer fields:
//! - `activated`, `visible`, the device descriptor, stream parameters and
//!   tally are written only by the controller (external triggers).
//! - `video_running` and the video decoder slot are written only by the
//!   video ingest loop; `audio_running` only by the audio ingest loop.

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use crate::codec::DecoderHandle;
use crate::config::StreamConfig;
use crate::device::DeviceDescriptor;
use crate::media::VideoFrame;
use crate::protocol::StreamParameters;
use crate::session::signal::Signals;

/// On-air indicator shown by the device app
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    pub previewing: bool,
    pub program_active: bool,
}

impl Tally {
    /// Program wins over preview
    pub fn label(&self) -> &'static str {
        if self.program_active {
            "program"
        } else if self.previewing {
            "preview"
        } else {
            "idle"
        }
    }
}

/// Work queued for the control loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    /// The tally changed; push it as it stands when the queue is drained
    TallyChanged,
}

/// Fold a batch of queued commands into the single tally worth sending.
/// `current` is read after the batch was taken, so a send never carries a
/// state older than the latest change.
pub fn coalesce<I>(commands: I, current: impl FnOnce() -> Tally) -> Option<Tally>
where
    I: IntoIterator<Item = ControlCommand>,
{
    let send = commands
        .into_iter()
        .any(|command| matches!(command, ControlCommand::TallyChanged));
    send.then(current)
}

pub type SharedVideoDecoder = Arc<DecoderHandle<VideoFrame>>;

pub struct SessionState {
    pub id: Uuid,
    pub signals: Signals,

    activated: AtomicBool,
    visible: AtomicBool,
    audio_enabled: AtomicBool,
    use_hw: AtomicBool,
    deactivate_when_hidden: AtomicBool,
    video_running: AtomicBool,
    audio_running: AtomicBool,

    device: RwLock<DeviceDescriptor>,
    params: RwLock<StreamParameters>,
    tally: Mutex<Tally>,
    video_decoder: RwLock<Option<SharedVideoDecoder>>,

    commands_tx: Sender<ControlCommand>,
    commands_rx: Receiver<ControlCommand>,
}

impl SessionState {
    pub fn new(stream: &StreamConfig) -> Self {
        let (commands_tx, commands_rx) = unbounded();
        Self {
            id: Uuid::new_v4(),
            signals: Signals::new(),
            activated: AtomicBool::new(false),
            visible: AtomicBool::new(false),
            audio_enabled: AtomicBool::new(stream.enable_audio),
            use_hw: AtomicBool::new(stream.use_hw_accel),
            deactivate_when_hidden: AtomicBool::new(stream.deactivate_when_hidden),
            video_running: AtomicBool::new(false),
            audio_running: AtomicBool::new(false),
            device: RwLock::new(DeviceDescriptor::default()),
            params: RwLock::new(StreamParameters::new(stream.video_format, stream.resolution)),
            tally: Mutex::new(Tally::default()),
            video_decoder: RwLock::new(None),
            commands_tx,
            commands_rx,
        }
    }

    pub fn is_activated(&self) -> bool {
        self.activated.load(Ordering::SeqCst)
    }

    pub fn set_activated(&self, activated: bool) {
        self.activated.store(activated, Ordering::SeqCst);
    }

    pub fn is_visible(&self) -> bool {
        self.visible.load(Ordering::SeqCst)
    }

    pub fn set_visible(&self, visible: bool) {
        self.visible.store(visible, Ordering::SeqCst);
    }

    /// Video may stream: activated and visible
    pub fn wants_video(&self) -> bool {
        self.is_activated() && self.is_visible()
    }

    /// Audio may stream: video conditions plus audio enabled
    pub fn wants_audio(&self) -> bool {
        self.wants_video() && self.audio_enabled()
    }

    pub fn audio_enabled(&self) -> bool {
        self.audio_enabled.load(Ordering::SeqCst)
    }

    pub fn set_audio_enabled(&self, enabled: bool) {
        self.audio_enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn use_hw(&self) -> bool {
        self.use_hw.load(Ordering::SeqCst)
    }

    pub fn set_use_hw(&self, use_hw: bool) {
        self.use_hw.store(use_hw, Ordering::SeqCst);
    }

    pub fn deactivate_when_hidden(&self) -> bool {
        self.deactivate_when_hidden.load(Ordering::SeqCst)
    }

    pub fn set_deactivate_when_hidden(&self, value: bool) {
        self.deactivate_when_hidden.store(value, Ordering::SeqCst);
    }

    pub fn video_running(&self) -> bool {
        self.video_running.load(Ordering::SeqCst)
    }

    pub fn set_video_running(&self, running: bool) {
        self.video_running.store(running, Ordering::SeqCst);
    }

    pub fn audio_running(&self) -> bool {
        self.audio_running.load(Ordering::SeqCst)
    }

    pub fn set_audio_running(&self, running: bool) {
        self.audio_running.store(running, Ordering::SeqCst);
    }

    pub fn device(&self) -> DeviceDescriptor {
        self.device.read().clone()
    }

    pub fn set_device(&self, device: DeviceDescriptor) {
        *self.device.write() = device;
    }

    pub fn params(&self) -> StreamParameters {
        *self.params.read()
    }

    /// Store new parameters; returns whether they differ from the old ones
    pub fn set_params(&self, params: StreamParameters) -> bool {
        let mut current = self.params.write();
        if *current == params {
            return false;
        }
        *current = params;
        true
    }

    pub fn tally(&self) -> Tally {
        *self.tally.lock()
    }

    /// Apply `update` to the tally and return the result
    pub fn update_tally(&self, update: impl FnOnce(&mut Tally)) -> Tally {
        let mut tally = self.tally.lock();
        update(&mut tally);
        *tally
    }

    pub fn video_decoder(&self) -> Option<SharedVideoDecoder> {
        self.video_decoder.read().clone()
    }

    pub fn set_video_decoder(&self, decoder: Option<SharedVideoDecoder>) {
        *self.video_decoder.write() = decoder;
    }

    /// Queue a command for the control loop and wake it
    pub fn enqueue(&self, command: ControlCommand) {
        // Both ends live in self, so the channel never disconnects
        let _ = self.commands_tx.send(command);
        self.signals.wake.set();
    }

    /// Queue a tally push
    pub fn enqueue_tally(&self) {
        self.enqueue(ControlCommand::TallyChanged);
    }

    /// Take every queued command without blocking
    pub fn drain_commands(&self) -> Vec<ControlCommand> {
        self.commands_rx.try_iter().collect()
    }

    pub fn pending_commands(&self) -> usize {
        self.commands_rx.len()
    }
}

impl std::fmt::Debug for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionState")
            .field("id", &self.id)
            .field("activated", &self.is_activated())
            .field("visible", &self.is_visible())
            .field("video_running", &self.video_running())
            .field("audio_running", &self.audio_running())
            .field("device", &*self.device.read())
            .finish_non_exhaustive()
    }
}
