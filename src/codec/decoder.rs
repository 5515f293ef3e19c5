//! Shared decoder slot
//!
//! A [`DecoderHandle`] is created by an ingest loop and, for video, shared
//! with the decode worker. The wrapped decoder is only released after the
//! pool has drained, and every decode call goes through the same lock as
//! the release, so a decode can never reach a released decoder.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use crate::codec::{CodecKind, Decoder, Packet, PacketPool};
use crate::error::CodecError;
use crate::session::signal::Signals;

/// Decoder plus its packet pool and health flags
pub struct DecoderHandle<F> {
    codec: Option<CodecKind>,
    pool: PacketPool,
    decoder: Mutex<Option<Box<dyn Decoder<Output = F>>>>,
    ready: AtomicBool,
    failed: AtomicBool,
    packets_decoded: AtomicU64,
    frames_produced: AtomicU64,
    packets_discarded: AtomicU64,
}

impl<F> DecoderHandle<F> {
    pub fn new(decoder: Box<dyn Decoder<Output = F>>, codec: CodecKind) -> Self {
        Self {
            codec: Some(codec),
            pool: PacketPool::new(),
            decoder: Mutex::new(Some(decoder)),
            ready: AtomicBool::new(false),
            failed: AtomicBool::new(false),
            packets_decoded: AtomicU64::new(0),
            frames_produced: AtomicU64::new(0),
            packets_discarded: AtomicU64::new(0),
        }
    }

    /// Handle that starts out failed, for configurations no decoder can
    /// serve. It still owns a pool so frames can be read and discarded.
    pub fn failed(reason: &CodecError) -> Self {
        tracing::error!("{}", reason);
        Self {
            codec: None,
            pool: PacketPool::new(),
            decoder: Mutex::new(None),
            ready: AtomicBool::new(false),
            failed: AtomicBool::new(true),
            packets_decoded: AtomicU64::new(0),
            frames_produced: AtomicU64::new(0),
            packets_discarded: AtomicU64::new(0),
        }
    }

    pub fn pool(&self) -> &PacketPool {
        &self.pool
    }

    pub fn codec(&self) -> Option<CodecKind> {
        self.codec
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub fn is_failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }

    /// Failed stays failed for the life of the handle
    pub fn mark_failed(&self) {
        self.failed.store(true, Ordering::SeqCst);
    }

    pub fn initialize(&self, config: &[u8], use_hw: bool) -> Result<(), CodecError> {
        let mut slot = self.decoder.lock();
        let (Some(decoder), Some(codec)) = (slot.as_mut(), self.codec) else {
            self.mark_failed();
            return Err(CodecError::DecoderInit("decoder released".to_string()));
        };

        match decoder.initialize(config, codec, use_hw) {
            Ok(()) => {
                self.ready.store(true, Ordering::SeqCst);
                Ok(())
            }
            Err(e) => {
                self.mark_failed();
                Err(e)
            }
        }
    }

    pub fn decode(&self, packet: &Packet) -> Result<Option<F>, CodecError> {
        let mut slot = self.decoder.lock();
        let Some(decoder) = slot.as_mut() else {
            self.mark_failed();
            return Err(CodecError::DecodingFailed("decoder released".to_string()));
        };

        match decoder.decode(packet) {
            Ok(output) => {
                self.packets_decoded.fetch_add(1, Ordering::Relaxed);
                if output.is_some() {
                    self.frames_produced.fetch_add(1, Ordering::Relaxed);
                }
                Ok(output)
            }
            Err(e) => {
                self.mark_failed();
                Err(e)
            }
        }
    }

    /// Return a packet to the pool without decoding it
    pub fn discard(&self, packet: Packet) {
        self.packets_discarded.fetch_add(1, Ordering::Relaxed);
        self.pool.push_empty(packet);
    }

    /// Wait until every packet is back in the empty queue, polling every
    /// `poll`. Gives up when the session stops; returns whether the pool
    /// drained.
    pub fn wait_for_drain(&self, signals: &Signals, poll: Duration) -> bool {
        loop {
            let outstanding = self.pool.outstanding();
            if outstanding == 0 {
                return true;
            }
            if signals.is_stopped() {
                return false;
            }
            tracing::debug!(
                "waiting for decode worker: {}/{} returned",
                self.pool.empty_len(),
                self.pool.allocated()
            );
            signals.sleep(poll);
        }
    }

    /// Drop the wrapped decoder. Later decode calls fail without touching it.
    pub fn release(&self) {
        let decoder = self.decoder.lock().take();
        self.ready.store(false, Ordering::SeqCst);
        drop(decoder);
    }

    pub fn is_released(&self) -> bool {
        self.decoder.lock().is_none()
    }

    pub fn stats(&self) -> DecoderStats {
        DecoderStats {
            packets_decoded: self.packets_decoded.load(Ordering::Relaxed),
            frames_produced: self.frames_produced.load(Ordering::Relaxed),
            packets_discarded: self.packets_discarded.load(Ordering::Relaxed),
            buffers_allocated: self.pool.allocated(),
        }
    }
}

impl<F> std::fmt::Debug for DecoderHandle<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecoderHandle")
            .field("codec", &self.codec)
            .field("ready", &self.is_ready())
            .field("failed", &self.is_failed())
            .field("pool", &self.pool)
            .finish()
    }
}

/// Decoder statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecoderStats {
    pub packets_decoded: u64,
    pub frames_produced: u64,
    pub packets_discarded: u64,
    pub buffers_allocated: usize,
}
