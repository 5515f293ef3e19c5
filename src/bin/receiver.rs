//! Stream Receiver Application
//!
//! Connects to a device over plain TCP and reports what arrives. Decoding
//! is stubbed out: packets are counted, not rendered.
//!
//! Usage: `receiver <address> [port]`

use anyhow::{bail, Context, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use camstream::{
    codec::{AudioDecoder, CodecKind, Decoder, DecoderFactory, Packet, VideoDecoder, VideoFormat},
    config::AppConfig,
    device::{DeviceSelection, Locators},
    error::CodecError,
    media::{AudioFrame, MediaSink, SessionEvent, VideoFrame},
    SessionController,
};

/// Passes every packet through as an empty frame
struct CountingDecoder<F> {
    bytes: Arc<AtomicU64>,
    make: fn(&Packet) -> F,
}

impl<F> Decoder for CountingDecoder<F> {
    type Output = F;

    fn initialize(&mut self, config: &[u8], codec: CodecKind, use_hw: bool) -> Result<(), CodecError> {
        tracing::info!("{:?} decoder: {} config bytes (hw={})", codec, config.len(), use_hw);
        Ok(())
    }

    fn decode(&mut self, packet: &Packet) -> Result<Option<F>, CodecError> {
        self.bytes.fetch_add(packet.used() as u64, Ordering::Relaxed);
        Ok(Some((self.make)(packet)))
    }
}

#[derive(Default)]
struct Stats {
    video_bytes: Arc<AtomicU64>,
    audio_bytes: Arc<AtomicU64>,
    video_frames: AtomicU64,
    audio_frames: AtomicU64,
}

struct CountingFactory {
    stats: Arc<Stats>,
}

impl DecoderFactory for CountingFactory {
    fn video(&self, _format: VideoFormat) -> Option<Box<VideoDecoder>> {
        Some(Box::new(CountingDecoder {
            bytes: self.stats.video_bytes.clone(),
            make: |_| VideoFrame::default(),
        }))
    }

    fn audio(&self) -> Option<Box<AudioDecoder>> {
        Some(Box::new(CountingDecoder {
            bytes: self.stats.audio_bytes.clone(),
            make: |_| AudioFrame::default(),
        }))
    }
}

struct LoggingSink {
    stats: Arc<Stats>,
}

impl MediaSink for LoggingSink {
    fn publish_video_frame(&self, frame: Option<VideoFrame>) {
        if frame.is_some() {
            self.stats.video_frames.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn publish_audio_frame(&self, frame: Option<AudioFrame>) {
        if frame.is_some() {
            self.stats.audio_frames.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn on_event(&self, event: SessionEvent) {
        match event {
            SessionEvent::DeviceStatus { battery, alert: true } => {
                tracing::warn!("Device battery low: {}", battery)
            }
            event => tracing::info!("{:?}", event),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut args = std::env::args().skip(1);
    let Some(address) = args.next() else {
        bail!("usage: receiver <address> [port]");
    };

    let config = AppConfig::load_or_default();
    let port = match args.next() {
        Some(port) => port.parse().with_context(|| format!("invalid port: {}", port))?,
        None => u32::from(config.stream.app_port),
    };

    tracing::info!("Starting stream receiver");

    let stats = Arc::new(Stats::default());
    let mut session = SessionController::new(
        config,
        Locators::direct_only(),
        Arc::new(CountingFactory { stats: stats.clone() }),
        Arc::new(LoggingSink { stats: stats.clone() }),
    );

    session.activate(&DeviceSelection::Direct { address, port })?;
    session.show();
    session.start()?;

    tracing::info!("Session {} running, press Ctrl+C to stop", session.id());

    let mut ticker = tokio::time::interval(Duration::from_secs(5));
    let mut last = (0, 0);
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => {
                let video = stats.video_frames.load(Ordering::Relaxed);
                let audio = stats.audio_frames.load(Ordering::Relaxed);
                tracing::info!(
                    "status={:#x} video: {} frames ({:.1} fps, {} KiB) audio: {} frames",
                    session.status().bits(),
                    video,
                    (video - last.0) as f64 / 5.0,
                    stats.video_bytes.load(Ordering::Relaxed) / 1024,
                    audio - last.1,
                );
                last = (video, audio);
            }
        }
    }

    tracing::info!("Shutting down...");
    tokio::task::spawn_blocking(move || session.shutdown()).await?;
    Ok(())
}
