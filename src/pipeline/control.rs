//! Control channel: battery polling and tally delivery
//!
//! One connection, open while the session is activated and video is
//! running. The loop wakes on the status poll timer or when a command is
//! queued. Queued tally changes collapse into a single send of the latest
//! state.

use std::net::TcpStream;

use crate::constants::BATTERY_WARN_LEVEL;
use crate::media::SessionEvent;
use crate::network::socket;
use crate::pipeline::PipelineContext;
use crate::protocol::{exchange, parse_percentage, request, ExchangeError};
use crate::session::state::{coalesce, ControlCommand, Tally};

const RESPONSE_BUF: usize = 4096 - 4;

/// Battery level assumed before the first poll
const FULL_BATTERY: u32 = 100;

pub struct ControlChannel {
    ctx: PipelineContext,
    stream: Option<TcpStream>,
    last_battery: u32,
    buf: Vec<u8>,
}

impl ControlChannel {
    pub fn new(ctx: PipelineContext) -> Self {
        Self {
            ctx,
            stream: None,
            last_battery: FULL_BATTERY,
            buf: vec![0; RESPONSE_BUF],
        }
    }

    pub fn run(mut self) {
        tracing::info!("control channel started");
        let state = self.ctx.state.clone();
        let poll = self.ctx.config.timing.status_poll();

        loop {
            let woken = state.signals.wake.wait_timeout(poll);
            if state.signals.is_stopped() {
                break;
            }
            state.signals.wake.reset();

            if state.is_activated() && state.video_running() {
                if self.stream.is_none() && !self.open() {
                    continue;
                }
            } else if self.stream.is_some() {
                self.last_battery = FULL_BATTERY;
                self.ctx.sink.on_event(SessionEvent::DeviceStatus {
                    battery: String::new(),
                    alert: false,
                });
                self.close();
            }

            if self.stream.is_none() {
                continue;
            }

            if !woken && !self.poll_status() {
                self.close();
                continue;
            }

            if let Some(tally) = coalesce(state.drain_commands(), || state.tally()) {
                self.send_tally(tally);
            }
        }

        self.close();
        tracing::info!("control channel stopped");
    }

    fn open(&mut self) -> bool {
        let device = self.ctx.state.device();
        let stream = match self.ctx.connector.connect(&device) {
            Ok(stream) => stream,
            Err(e) => {
                tracing::debug!("control connect failed: {}", e);
                return false;
            }
        };

        let slice = self.ctx.config.timing.stop_check();
        if let Err(e) = socket::prepare(&stream, slice, self.ctx.config.network.io_timeout()) {
            tracing::warn!("control socket setup failed: {}", e);
            return false;
        }

        tracing::debug!("control channel connected to {}", device.id);
        self.stream = Some(stream);
        true
    }

    fn close(&mut self) {
        if self.stream.take().is_some() {
            tracing::debug!("closing control channel");
        }
    }

    fn exchange(&mut self, req: &[u8]) -> Result<(usize, usize), ExchangeError> {
        let Some(stream) = self.stream.as_ref() else {
            return Err(ExchangeError::Closed);
        };
        let mut session = self.ctx.session_stream(stream, self.ctx.config.network.control_timeout());
        exchange(&mut session, req, &mut self.buf)
    }

    /// Ask for the battery level. Returns false if the exchange failed.
    fn poll_status(&mut self) -> bool {
        let (filled, body) = match self.exchange(request::BATTERY_REQUEST.as_bytes()) {
            Ok(response) => response,
            Err(e) => {
                tracing::debug!("battery poll failed: {}", e);
                return false;
            }
        };

        if let Some(level) = parse_percentage(&self.buf[body..filled]) {
            let alert = self.last_battery > BATTERY_WARN_LEVEL && level <= BATTERY_WARN_LEVEL;
            tracing::debug!("battery {} -> {} alert={}", self.last_battery, level, alert);
            self.ctx.sink.on_event(SessionEvent::DeviceStatus {
                battery: format!("{}%", level),
                alert,
            });
            self.last_battery = level;
        }
        true
    }

    fn send_tally(&mut self, tally: Tally) {
        let label = tally.label();
        let req = request::tally_request(label);

        match self.exchange(req.as_bytes()) {
            Ok(_) => tracing::debug!("tally -> {}", label),
            Err(e) => {
                if e.is_retryable() {
                    tracing::warn!("tally send failed, retrying: {}", e);
                    self.ctx.state.signals.sleep(self.ctx.config.timing.tally_retry_delay());
                    self.ctx.state.enqueue(ControlCommand::TallyChanged);
                } else {
                    tracing::debug!("tally not supported by device");
                }
                self.close();
            }
        }
    }
}
