//! Video pipeline: ingest loop plus decode worker
//!
//! The ingest loop owns the socket and the decoder's lifetime. It reads
//! frames into the decoder's pool and queues them as ready; the decode
//! worker pulls ready packets, decodes and publishes. Before a decoder is
//! released the ingest loop waits for the worker to hand back every packet.

use std::net::TcpStream;
use std::sync::Arc;

use crate::codec::DecoderHandle;
use crate::error::{CodecError, ProtocolError};
use crate::media::{pts_to_ns, SessionEvent, VideoFrame};
use crate::network::socket;
use crate::pipeline::{Phase, PipelineContext};
use crate::protocol::{read_frame, request};
use crate::session::state::SharedVideoDecoder;

pub struct VideoIngest {
    ctx: PipelineContext,
    phase: Phase,
    stream: Option<TcpStream>,
    decoder: Option<SharedVideoDecoder>,
}

impl VideoIngest {
    pub fn new(ctx: PipelineContext) -> Self {
        Self {
            ctx,
            phase: Phase::Idle,
            stream: None,
            decoder: None,
        }
    }

    pub fn run(mut self) {
        tracing::info!("video ingest started");
        let state = self.ctx.state.clone();

        // A session created already active skips one retry cycle
        if state.is_activated() {
            self.ctx.connector.locators().reload(state.device().kind);
        }

        while !state.signals.is_stopped() {
            self.phase = match self.phase {
                Phase::Idle => self.idle(),
                Phase::Connecting => self.connect(),
                Phase::Streaming => self.stream(),
                Phase::Closing => self.close(),
            };
        }

        state.set_video_running(false);
        self.stream = None;
        self.release_decoder();
        tracing::info!("video ingest stopped");
    }

    fn idle(&mut self) -> Phase {
        if self.ctx.state.wants_video() {
            Phase::Connecting
        } else {
            Phase::Closing
        }
    }

    fn connect(&mut self) -> Phase {
        let state = &self.ctx.state;
        if !state.wants_video() {
            return Phase::Closing;
        }

        let device = state.device();
        let req = request::video_request(
            &state.params(),
            self.ctx.connector.local_port(),
            &self.ctx.config.client,
        );
        tracing::debug!("{}", req.trim_end());

        let stream = match self.ctx.open_stream(&device, req.as_bytes()) {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!("video connect failed: {}", e);
                self.ctx.retry_sleep();
                return Phase::Closing;
            }
        };

        if let Err(e) = socket::set_recv_buffer(&stream, self.ctx.config.network.video_recv_buffer) {
            tracing::debug!("could not set receive buffer: {}", e);
        }

        state.set_video_running(true);
        tracing::debug!("starting video from {}", device.id);

        if let Some(url) = self.ctx.connector.remote_url(&device) {
            self.ctx.sink.on_event(SessionEvent::RemoteAddress(url));
        }

        state.signals.reset.reset();
        self.stream = Some(stream);
        Phase::Streaming
    }

    fn stream(&mut self) -> Phase {
        let state = self.ctx.state.clone();
        if !state.wants_video() {
            return Phase::Closing;
        }

        let result = if state.signals.reset.take() {
            tracing::info!("stream parameters changed, reconnecting");
            Ok(false)
        } else {
            self.recv_frame()
        };

        match result {
            Ok(true) => Phase::Streaming,
            Ok(false) => self.drop_stream(),
            Err(e) => {
                if !state.signals.is_stopped() {
                    tracing::warn!("video stream failed: {}", e);
                }
                self.drop_stream()
            }
        }
    }

    fn drop_stream(&mut self) -> Phase {
        self.ctx.state.set_video_running(false);
        tracing::debug!("closing failed video stream");
        self.stream = None;
        self.ctx.retry_sleep();
        Phase::Closing
    }

    /// Read one frame and route it. `Ok(true)` keeps the stream open.
    fn recv_frame(&mut self) -> Result<bool, ProtocolError> {
        let Some(stream) = self.stream.as_ref() else {
            return Ok(false);
        };
        let decoder = self.decoder.get_or_insert_with(|| {
            let handle = Arc::new(create_decoder(&self.ctx));
            self.ctx.state.set_video_decoder(Some(handle.clone()));
            handle
        });

        let mut reader = self.ctx.session_stream(stream, self.ctx.config.network.io_timeout());
        let packet = read_frame(&mut reader, decoder.pool())?;

        // A failed decoder keeps the connection; frames are dropped
        if decoder.is_failed() {
            tracing::trace!("discarding frame, decoder failed");
            decoder.discard(packet);
            return Ok(true);
        }

        if !decoder.is_ready() {
            tracing::debug!("init video decoder");
            match decoder.initialize(packet.config(), self.ctx.state.use_hw()) {
                Ok(()) => {
                    self.ctx.state.enqueue_tally();
                    self.ctx.sink.on_event(SessionEvent::VideoConnected);
                }
                Err(e) => {
                    tracing::error!("could not initialize decoder: {}", e);
                    decoder.discard(packet);
                    return Ok(true);
                }
            }
        }

        decoder.pool().push_ready(packet);
        Ok(true)
    }

    fn close(&mut self) -> Phase {
        self.ctx.state.set_video_running(false);
        if self.stream.take().is_some() {
            tracing::debug!("closing active video stream");
        }

        if let Some(decoder) = &self.decoder {
            if decoder.is_ready() {
                self.ctx.sink.on_event(SessionEvent::VideoDisconnected);
            }
        }
        self.release_decoder();

        self.ctx.sink.publish_video_frame(None);
        self.ctx.idle_sleep();
        Phase::Idle
    }

    /// Wait for the decode worker to return every packet, then drop the
    /// decoder
    fn release_decoder(&mut self) {
        let Some(decoder) = self.decoder.take() else {
            return;
        };

        let drained = decoder.wait_for_drain(&self.ctx.state.signals, self.ctx.config.timing.idle_period());
        self.ctx.state.set_video_decoder(None);

        if drained {
            tracing::debug!("release video decoder: {:?}", decoder.stats());
            decoder.release();
        } else {
            tracing::debug!("session stopped before the decode worker drained");
        }
    }
}

fn create_decoder(ctx: &PipelineContext) -> DecoderHandle<VideoFrame> {
    let format = ctx.state.params().format;
    match ctx.decoders.video(format) {
        Some(decoder) => DecoderHandle::new(decoder, format.codec()),
        None => DecoderHandle::failed(&CodecError::UnsupportedFormat(format)),
    }
}

/// Pulls ready packets, decodes them and publishes the pictures
pub struct VideoDecodeWorker {
    ctx: PipelineContext,
}

impl VideoDecodeWorker {
    pub fn new(ctx: PipelineContext) -> Self {
        Self { ctx }
    }

    pub fn run(self) {
        tracing::info!("video decode worker started");
        let state = &self.ctx.state;
        let poll = self.ctx.config.timing.decode_poll();

        while !state.signals.is_stopped() {
            let Some(decoder) = state.video_decoder() else {
                state.signals.sleep(poll);
                continue;
            };
            let Some(packet) = decoder.pool().pull_ready() else {
                state.signals.sleep(poll);
                continue;
            };

            if decoder.is_failed() {
                decoder.discard(packet);
                continue;
            }

            match decoder.decode(&packet) {
                Ok(Some(mut frame)) => {
                    frame.timestamp = pts_to_ns(packet.pts);
                    self.ctx.sink.publish_video_frame(Some(frame));
                    decoder.pool().push_empty(packet);
                }
                Ok(None) => decoder.pool().push_empty(packet),
                Err(e) => {
                    tracing::error!("error decoding video: {}", e);
                    decoder.discard(packet);
                }
            }
        }

        tracing::info!("video decode worker stopped");
    }
}
