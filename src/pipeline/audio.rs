//! Audio ingest
//!
//! One loop reads and decodes inline. Audio only connects once video is
//! running, and output is stamped with the receive clock rather than the
//! device timestamp.

use std::net::TcpStream;

use crate::codec::{CodecKind, DecoderHandle};
use crate::error::{CodecError, ProtocolError};
use crate::media::AudioFrame;
use crate::pipeline::{Phase, PipelineContext};
use crate::protocol::{read_frame, request};

pub struct AudioIngest {
    ctx: PipelineContext,
    phase: Phase,
    stream: Option<TcpStream>,
    decoder: Option<DecoderHandle<AudioFrame>>,
}

impl AudioIngest {
    pub fn new(ctx: PipelineContext) -> Self {
        Self {
            ctx,
            phase: Phase::Idle,
            stream: None,
            decoder: None,
        }
    }

    pub fn run(mut self) {
        tracing::info!("audio ingest started");
        let state = self.ctx.state.clone();

        while !state.signals.is_stopped() {
            self.phase = match self.phase {
                Phase::Idle => self.idle(),
                Phase::Connecting => self.connect(),
                Phase::Streaming => self.stream(),
                Phase::Closing => self.close(),
            };
        }

        state.set_audio_running(false);
        self.stream = None;
        self.decoder = None;
        tracing::info!("audio ingest stopped");
    }

    fn idle(&mut self) -> Phase {
        let state = &self.ctx.state;
        if state.wants_audio() && state.video_running() {
            Phase::Connecting
        } else {
            Phase::Closing
        }
    }

    fn connect(&mut self) -> Phase {
        // Give the video connection a head start
        if !self.ctx.state.signals.sleep(self.ctx.config.timing.audio_dial_delay()) {
            return Phase::Closing;
        }
        if !self.ctx.state.wants_audio() {
            return Phase::Closing;
        }

        let device = self.ctx.state.device();
        match self.ctx.open_stream(&device, request::AUDIO_REQUEST.as_bytes()) {
            Ok(stream) => {
                self.ctx.state.set_audio_running(true);
                tracing::debug!("starting audio from {}", device.id);
                self.stream = Some(stream);
                Phase::Streaming
            }
            Err(e) => {
                tracing::warn!("audio connect failed: {}", e);
                self.ctx.retry_sleep();
                Phase::Closing
            }
        }
    }

    fn stream(&mut self) -> Phase {
        if !self.ctx.state.wants_audio() {
            return Phase::Closing;
        }

        match self.recv_frame() {
            Ok(()) => Phase::Streaming,
            Err(e) => {
                if !self.ctx.state.signals.is_stopped() {
                    tracing::warn!("audio stream failed: {}", e);
                }
                self.ctx.state.set_audio_running(false);
                tracing::debug!("closing failed audio stream");
                self.stream = None;
                self.ctx.retry_sleep();
                Phase::Closing
            }
        }
    }

    fn recv_frame(&mut self) -> Result<(), ProtocolError> {
        let Some(stream) = self.stream.as_ref() else {
            return Err(ProtocolError::ShortRead(std::io::ErrorKind::NotConnected.into()));
        };
        let decoder = self.decoder.get_or_insert_with(|| {
            tracing::debug!("create audio decoder");
            match self.ctx.decoders.audio() {
                Some(decoder) => DecoderHandle::new(decoder, CodecKind::Aac),
                None => DecoderHandle::failed(&CodecError::DecoderInit("no audio decoder".to_string())),
            }
        });

        let mut reader = self.ctx.session_stream(stream, self.ctx.config.network.io_timeout());
        let packet = read_frame(&mut reader, decoder.pool())?;

        if decoder.is_failed() {
            tracing::trace!("discarding audio frame, decoder failed");
            decoder.discard(packet);
            return Ok(());
        }

        if packet.has_config() || !decoder.is_ready() {
            if decoder.is_ready() {
                tracing::warn!("unexpected audio config change while decoder is initialized");
                decoder.mark_failed();
            } else {
                let config = if packet.has_config() { packet.config() } else { packet.payload() };
                match decoder.initialize(config, false) {
                    Ok(()) => tracing::debug!("audio decoder ready"),
                    Err(e) => tracing::error!("could not initialize audio decoder: {}", e),
                }
            }
            decoder.discard(packet);
            return Ok(());
        }

        match decoder.decode(&packet) {
            Ok(Some(mut frame)) => {
                frame.timestamp = self.ctx.clock.now_ns();
                self.ctx.sink.publish_audio_frame(Some(frame));
                decoder.pool().push_empty(packet);
            }
            Ok(None) => decoder.pool().push_empty(packet),
            Err(e) => {
                tracing::error!("error decoding audio: {}", e);
                decoder.discard(packet);
            }
        }
        Ok(())
    }

    fn close(&mut self) -> Phase {
        self.ctx.state.set_audio_running(false);
        let had_stream = self.stream.take().is_some();
        if had_stream {
            tracing::debug!("closing active audio stream");
        }

        let decoder = self.decoder.take();
        if let Some(decoder) = &decoder {
            tracing::debug!("release audio decoder: {:?}", decoder.stats());
            decoder.release();
        }

        // Tell the sink once per teardown, not on every idle pass
        if had_stream || decoder.is_some() {
            self.ctx.sink.publish_audio_frame(None);
        }
        self.ctx.idle_sleep();
        Phase::Idle
    }
}
