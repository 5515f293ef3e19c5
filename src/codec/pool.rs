//! Reusable packet buffers
//!
//! Each decoder owns one pool with two lock-free FIFOs: `empty` buffers
//! waiting to be filled by the ingest loop, and `ready` buffers waiting for
//! the decode worker. A packet lives in exactly one queue or is held by
//! exactly one thread. The pool only ever grows.

use crossbeam::queue::SegQueue;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::constants::NO_TIMESTAMP;

/// One media sample, optionally prefixed with the configuration blob that
/// preceded it on the wire
pub struct Packet {
    /// Presentation timestamp in microseconds, or [`NO_TIMESTAMP`]
    pub pts: u64,
    data: Vec<u8>,
    used: usize,
    config_len: usize,
}

impl Packet {
    fn with_capacity(size: usize) -> Self {
        Self {
            pts: NO_TIMESTAMP,
            data: vec![0; size],
            used: 0,
            config_len: 0,
        }
    }

    /// Bytes available in the buffer
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn used(&self) -> usize {
        self.used
    }

    /// Configuration blob followed by the sample
    pub fn payload(&self) -> &[u8] {
        &self.data[..self.used]
    }

    /// Configuration blob carried in front of the sample, possibly empty
    pub fn config(&self) -> &[u8] {
        &self.data[..self.config_len]
    }

    pub fn sample(&self) -> &[u8] {
        &self.data[self.config_len..self.used]
    }

    pub fn has_config(&self) -> bool {
        self.config_len > 0
    }

    /// Whole buffer, for filling
    pub fn buffer_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Record what was written into the buffer
    pub fn set_frame(&mut self, pts: u64, config_len: usize, used: usize) {
        let used = used.min(self.data.len());
        self.pts = pts;
        self.used = used;
        self.config_len = config_len.min(used);
    }

    fn clear(&mut self) {
        self.pts = NO_TIMESTAMP;
        self.used = 0;
        self.config_len = 0;
    }
}

impl std::fmt::Debug for Packet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Packet")
            .field("pts", &self.pts)
            .field("capacity", &self.data.len())
            .field("used", &self.used)
            .field("config_len", &self.config_len)
            .finish()
    }
}

/// Buffer pool shared by an ingest loop and a decode worker
#[derive(Default)]
pub struct PacketPool {
    empty: SegQueue<Packet>,
    ready: SegQueue<Packet>,
    allocated: AtomicUsize,
    held: AtomicUsize,
}

impl PacketPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a buffer of at least `size` bytes. Reuses an empty buffer when
    /// one is queued, growing it if needed; allocates otherwise.
    pub fn pull_empty(&self, size: usize) -> Packet {
        let packet = match self.empty.pop() {
            Some(mut packet) => {
                if packet.data.len() < size {
                    packet.data.resize(size, 0);
                }
                packet.clear();
                packet
            }
            None => {
                self.allocated.fetch_add(1, Ordering::SeqCst);
                Packet::with_capacity(size)
            }
        };
        self.held.fetch_add(1, Ordering::SeqCst);
        packet
    }

    pub fn push_empty(&self, packet: Packet) {
        self.empty.push(packet);
        self.held.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn push_ready(&self, packet: Packet) {
        self.ready.push(packet);
        self.held.fetch_sub(1, Ordering::SeqCst);
    }

    /// Next ready packet, or `None` immediately if there is none
    pub fn pull_ready(&self) -> Option<Packet> {
        let packet = self.ready.pop()?;
        self.held.fetch_add(1, Ordering::SeqCst);
        Some(packet)
    }

    /// Buffers ever allocated by this pool
    pub fn allocated(&self) -> usize {
        self.allocated.load(Ordering::SeqCst)
    }

    pub fn empty_len(&self) -> usize {
        self.empty.len()
    }

    pub fn ready_len(&self) -> usize {
        self.ready.len()
    }

    /// Buffers currently held by a thread
    pub fn in_flight(&self) -> usize {
        self.held.load(Ordering::SeqCst)
    }

    /// Buffers not yet back in the empty queue (held or ready)
    pub fn outstanding(&self) -> usize {
        self.allocated().saturating_sub(self.empty_len())
    }
}

impl std::fmt::Debug for PacketPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketPool")
            .field("allocated", &self.allocated())
            .field("empty", &self.empty_len())
            .field("ready", &self.ready_len())
            .field("in_flight", &self.in_flight())
            .finish()
    }
}
