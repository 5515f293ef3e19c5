//! Shared fixtures: mock decoders, a recording sink and a fake device app
#![allow(dead_code)]

use bytes::BytesMut;
use parking_lot::Mutex;
use socket2::SockRef;
use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use camstream::codec::{AudioDecoder, CodecKind, Decoder, DecoderFactory, Packet, VideoDecoder, VideoFormat};
use camstream::config::AppConfig;
use camstream::constants::NO_TIMESTAMP;
use camstream::error::CodecError;
use camstream::media::{AudioFrame, MediaSink, SessionEvent, VideoFrame};
use camstream::protocol::encode_frame;

/// Config with short timings so tests run fast
pub fn fast_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.timing.idle_period_ms = 10;
    config.timing.retry_delay_ms = 100;
    config.timing.audio_dial_delay_ms = 50;
    config.timing.tally_retry_delay_ms = 100;
    config.timing.decode_poll_ms = 2;
    config.timing.stop_check_ms = 10;
    config.network.connect_timeout_ms = 500;
    config.network.io_timeout_ms = 2000;
    config.network.control_timeout_ms = 100;
    config
}

/// Poll `check` until it holds or `timeout` passes
pub fn wait_for(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    check()
}

// ---------------------------------------------------------------------------
// Decoders
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct DecodeLog {
    pub video_inits: Mutex<Vec<(Vec<u8>, CodecKind, bool)>>,
    pub audio_inits: Mutex<Vec<Vec<u8>>>,
    pub video_decoded: AtomicU64,
    pub audio_decoded: AtomicU64,
}

pub struct MockVideoDecoder {
    log: Arc<DecodeLog>,
    /// 1-based decode call that fails
    fail_on: Option<u64>,
}

impl Decoder for MockVideoDecoder {
    type Output = VideoFrame;

    fn initialize(&mut self, config: &[u8], codec: CodecKind, use_hw: bool) -> Result<(), CodecError> {
        self.log.video_inits.lock().push((config.to_vec(), codec, use_hw));
        Ok(())
    }

    fn decode(&mut self, packet: &Packet) -> Result<Option<VideoFrame>, CodecError> {
        let call = self.log.video_decoded.fetch_add(1, Ordering::SeqCst) + 1;
        if Some(call) == self.fail_on {
            return Err(CodecError::DecodingFailed("corrupt sample".to_string()));
        }
        Ok(Some(VideoFrame {
            width: 2,
            height: 2,
            data: packet.sample().to_vec(),
            timestamp: 0,
        }))
    }
}

pub struct MockAudioDecoder {
    log: Arc<DecodeLog>,
}

impl Decoder for MockAudioDecoder {
    type Output = AudioFrame;

    fn initialize(&mut self, config: &[u8], _codec: CodecKind, _use_hw: bool) -> Result<(), CodecError> {
        self.log.audio_inits.lock().push(config.to_vec());
        Ok(())
    }

    fn decode(&mut self, _packet: &Packet) -> Result<Option<AudioFrame>, CodecError> {
        self.log.audio_decoded.fetch_add(1, Ordering::SeqCst);
        Ok(Some(AudioFrame {
            samples: vec![0.0; 8],
            channels: 2,
            sample_rate: 48000,
            timestamp: 0,
        }))
    }
}

pub struct MockFactory {
    pub log: Arc<DecodeLog>,
    pub video_supported: bool,
    pub video_fail_on: Option<u64>,
}

impl MockFactory {
    pub fn new() -> Self {
        Self {
            log: Arc::new(DecodeLog::default()),
            video_supported: true,
            video_fail_on: None,
        }
    }

    /// Video decoder that errors on its `call`-th decode
    pub fn failing_video_at(call: u64) -> Self {
        Self {
            video_fail_on: Some(call),
            ..Self::new()
        }
    }

    pub fn without_video() -> Self {
        Self {
            video_supported: false,
            ..Self::new()
        }
    }
}

impl DecoderFactory for MockFactory {
    fn video(&self, _format: VideoFormat) -> Option<Box<VideoDecoder>> {
        if !self.video_supported {
            return None;
        }
        Some(Box::new(MockVideoDecoder {
            log: self.log.clone(),
            fail_on: self.video_fail_on,
        }))
    }

    fn audio(&self) -> Option<Box<AudioDecoder>> {
        Some(Box::new(MockAudioDecoder { log: self.log.clone() }))
    }
}

// ---------------------------------------------------------------------------
// Sink
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingSink {
    pub video: Mutex<Vec<Option<VideoFrame>>>,
    pub audio: Mutex<Vec<Option<AudioFrame>>>,
    pub events: Mutex<Vec<SessionEvent>>,
}

impl RecordingSink {
    pub fn video_frames(&self) -> Vec<VideoFrame> {
        self.video.lock().iter().flatten().cloned().collect()
    }

    pub fn audio_frames(&self) -> Vec<AudioFrame> {
        self.audio.lock().iter().flatten().cloned().collect()
    }

    pub fn video_cleared(&self) -> bool {
        self.video.lock().iter().any(Option::is_none)
    }

    pub fn audio_cleared(&self) -> bool {
        self.audio.lock().iter().any(Option::is_none)
    }

    pub fn events(&self) -> Vec<SessionEvent> {
        self.events.lock().clone()
    }

    pub fn has_event(&self, event: &SessionEvent) -> bool {
        self.events.lock().iter().any(|e| e == event)
    }
}

impl MediaSink for RecordingSink {
    fn publish_video_frame(&self, frame: Option<VideoFrame>) {
        self.video.lock().push(frame);
    }

    fn publish_audio_frame(&self, frame: Option<AudioFrame>) {
        self.audio.lock().push(frame);
    }

    fn on_event(&self, event: SessionEvent) {
        self.events.lock().push(event);
    }
}

// ---------------------------------------------------------------------------
// Fake device app
// ---------------------------------------------------------------------------

/// How the device answers a program tally request it refuses
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TallyFault {
    #[default]
    None,
    /// Abort the connection with a reset
    Reset,
    /// Close the connection cleanly without answering
    Close,
}

/// What the fake device sends on each stream
#[derive(Clone, Default)]
pub struct DeviceScript {
    pub video_config: Vec<u8>,
    /// `(timestamp, sample)` pairs
    pub video_samples: Vec<(u64, Vec<u8>)>,
    pub audio_config: Vec<u8>,
    pub audio_samples: Vec<(u64, Vec<u8>)>,
    /// Body returned for the battery request
    pub battery: String,
    /// Pause before answering the battery request
    pub battery_delay: Duration,
    pub program_fault: TallyFault,
    /// Number of program tally requests that get `program_fault`
    pub program_faults: usize,
}

impl DeviceScript {
    pub fn standard() -> Self {
        Self {
            video_config: vec![0x67, 0x42, 0x00, 0x1f, 0x68, 0xce],
            video_samples: vec![(1000, vec![1; 64]), (2000, vec![2; 64]), (3000, vec![3; 64])],
            audio_config: vec![0x12, 0x10],
            audio_samples: (0..4).map(|i| (i * 21_333, vec![9; 32])).collect(),
            battery: "57".to_string(),
            ..Self::default()
        }
    }

    fn stream(config: &[u8], samples: &[(u64, Vec<u8>)]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        if !config.is_empty() {
            encode_frame(&mut buf, NO_TIMESTAMP, config);
        }
        for (ts, sample) in samples {
            encode_frame(&mut buf, *ts, sample);
        }
        buf.to_vec()
    }
}

/// TCP server speaking just enough of the device app protocol
pub struct FakeDevice {
    addr: SocketAddr,
    stop: Arc<AtomicBool>,
    requests: Arc<Mutex<Vec<String>>>,
    connections: Arc<AtomicUsize>,
    accept: Option<JoinHandle<()>>,
}

impl FakeDevice {
    pub fn start(script: DeviceScript) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.set_nonblocking(true).unwrap();
        let addr = listener.local_addr().unwrap();

        let stop = Arc::new(AtomicBool::new(false));
        let requests = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(AtomicUsize::new(0));
        let faults_left = Arc::new(AtomicUsize::new(match script.program_fault {
            TallyFault::None => 0,
            _ => script.program_faults,
        }));

        let accept = {
            let stop = stop.clone();
            let requests = requests.clone();
            let connections = connections.clone();
            thread::spawn(move || {
                while !stop.load(Ordering::SeqCst) {
                    match listener.accept() {
                        Ok((stream, _)) => {
                            connections.fetch_add(1, Ordering::SeqCst);
                            let stop = stop.clone();
                            let requests = requests.clone();
                            let script = script.clone();
                            let faults_left = faults_left.clone();
                            thread::spawn(move || serve(stream, script, requests, faults_left, stop));
                        }
                        Err(e) if e.kind() == ErrorKind::WouldBlock => {
                            thread::sleep(Duration::from_millis(5));
                        }
                        Err(_) => break,
                    }
                }
            })
        };

        Self {
            addr,
            stop,
            requests,
            connections,
            accept: Some(accept),
        }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().clone()
    }

    pub fn saw_request(&self, prefix: &str) -> bool {
        self.requests.lock().iter().any(|r| r.starts_with(prefix))
    }

    pub fn count_requests(&self, prefix: &str) -> usize {
        self.requests.lock().iter().filter(|r| r.starts_with(prefix)).count()
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

impl Drop for FakeDevice {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(accept) = self.accept.take() {
            let _ = accept.join();
        }
    }
}

/// Read one `\r\n\r\n`-terminated request. `None` on close or stop.
fn read_request(stream: &mut TcpStream, stop: &AtomicBool) -> Option<String> {
    let mut buf = Vec::new();
    let mut byte = [0u8; 1];
    while !buf.ends_with(b"\r\n\r\n") {
        if stop.load(Ordering::SeqCst) {
            return None;
        }
        match stream.read(&mut byte) {
            Ok(0) => return None,
            Ok(_) => buf.push(byte[0]),
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
            Err(_) => return None,
        }
    }
    Some(String::from_utf8_lossy(&buf).into_owned())
}

fn hold_open(stream: &mut TcpStream, stop: &AtomicBool) {
    let mut scratch = [0u8; 64];
    while !stop.load(Ordering::SeqCst) {
        match stream.read(&mut scratch) {
            Ok(0) => return,
            Ok(_) => {}
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
            Err(_) => return,
        }
    }
}

fn serve(
    mut stream: TcpStream,
    script: DeviceScript,
    requests: Arc<Mutex<Vec<String>>>,
    faults_left: Arc<AtomicUsize>,
    stop: Arc<AtomicBool>,
) {
    let _ = stream.set_read_timeout(Some(Duration::from_millis(20)));

    let Some(first) = read_request(&mut stream, &stop) else {
        return;
    };
    requests.lock().push(first.clone());

    if first.starts_with("CMD /v4/video") {
        let _ = stream.write_all(&DeviceScript::stream(&script.video_config, &script.video_samples));
        hold_open(&mut stream, &stop);
        return;
    }

    if first.starts_with("CMD /v2/audio") {
        let _ = stream.write_all(&DeviceScript::stream(&script.audio_config, &script.audio_samples));
        hold_open(&mut stream, &stop);
        return;
    }

    // Control connection: answer every request and keep going
    let mut request = first;
    loop {
        if request.starts_with("PUT /v1/tally/program/")
            && faults_left.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1)).is_ok()
        {
            if script.program_fault == TallyFault::Reset {
                let _ = SockRef::from(&stream).set_linger(Some(Duration::ZERO));
            }
            return;
        }

        let body = if request.starts_with("GET /battery") {
            thread::sleep(script.battery_delay);
            script.battery.as_str()
        } else {
            ""
        };
        let response = format!("HTTP/1.1 200 OK\r\n\r\n{}", body);
        if stream.write_all(response.as_bytes()).is_err() {
            return;
        }

        match read_request(&mut stream, &stop) {
            Some(next) => {
                requests.lock().push(next.clone());
                request = next;
            }
            None => return,
        }
    }
}
