//! Media stream framing
//!
//! ```text
//! ┌──────────────────────┬──────────────────┬───────────────────────┐
//! │ timestamp: u64 (BE)  │ length: u32 (BE) │ payload: length bytes │
//! └──────────────────────┴──────────────────┴───────────────────────┘
//! ```
//!
//! A header whose timestamp is [`NO_TIMESTAMP`] carries a codec
//! configuration blob instead of a sample. The blob is held and copied in
//! front of the next sample, so a decoder sees `config ++ sample` in one
//! packet.

use bytes::{Buf, BufMut, BytesMut};
use std::io::Read;

use crate::codec::{Packet, PacketPool};
use crate::constants::{FRAME_HEADER_SIZE, MAX_CONFIG_LEN, MAX_SAMPLE_LEN, NO_TIMESTAMP};
use crate::error::ProtocolError;

/// Parsed frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub timestamp: u64,
    pub length: u32,
}

impl FrameHeader {
    pub fn parse(bytes: &[u8; FRAME_HEADER_SIZE]) -> Self {
        let mut buf = &bytes[..];
        let timestamp = buf.get_u64();
        let length = buf.get_u32();
        Self { timestamp, length }
    }

    pub fn is_config(&self) -> bool {
        self.timestamp == NO_TIMESTAMP
    }

    /// The device signals stop/error with a config header of length -1
    pub fn is_peer_stop(&self) -> bool {
        self.is_config() && self.length as i32 == -1
    }

    pub fn put(&self, dst: &mut BytesMut) {
        dst.put_u64(self.timestamp);
        dst.put_u32(self.length);
    }
}

/// Append one frame to `dst`
pub fn encode_frame(dst: &mut BytesMut, timestamp: u64, payload: &[u8]) {
    dst.reserve(FRAME_HEADER_SIZE + payload.len());
    FrameHeader { timestamp, length: payload.len() as u32 }.put(dst);
    dst.put_slice(payload);
}

/// Accepted configuration lengths are `1..=1024`
pub fn check_config_len(length: u32) -> Result<usize, ProtocolError> {
    match length as usize {
        len @ 1..=MAX_CONFIG_LEN => Ok(len),
        _ => Err(ProtocolError::ConfigLength(length)),
    }
}

/// Accepted sample lengths are `1..=16 MiB`
pub fn check_sample_len(length: u32) -> Result<usize, ProtocolError> {
    match length as usize {
        len @ 1..=MAX_SAMPLE_LEN => Ok(len),
        _ => Err(ProtocolError::SampleLength(length)),
    }
}

fn read_header<R: Read>(reader: &mut R) -> Result<FrameHeader, ProtocolError> {
    let mut header = [0u8; FRAME_HEADER_SIZE];
    reader.read_exact(&mut header)?;
    Ok(FrameHeader::parse(&header))
}

/// Read the next sample, consuming any configuration blob in front of it.
///
/// The returned packet comes from `pool` and must go back to it. On error
/// the connection is unusable and any buffer taken has been returned.
pub fn read_frame<R: Read>(reader: &mut R, pool: &PacketPool) -> Result<Packet, ProtocolError> {
    let mut config = [0u8; MAX_CONFIG_LEN];
    let mut config_len = 0;

    loop {
        let header = read_header(reader)?;

        if header.is_config() {
            if header.is_peer_stop() {
                tracing::error!("stop/error from device side");
                return Err(ProtocolError::PeerStopped);
            }
            if config_len != 0 {
                tracing::error!("second config blob before a sample");
                return Err(ProtocolError::DuplicateConfig);
            }

            let len = check_config_len(header.length)?;
            reader.read_exact(&mut config[..len])?;
            tracing::debug!("have config: {}", len);
            config_len = len;
            continue;
        }

        let len = check_sample_len(header.length)?;
        let total = config_len + len;
        let mut packet = pool.pull_empty(total);
        let buf = packet.buffer_mut();
        buf[..config_len].copy_from_slice(&config[..config_len]);

        if let Err(e) = reader.read_exact(&mut buf[config_len..total]) {
            tracing::error!("read_frame: wanted {} bytes: {}", len, e);
            pool.push_empty(packet);
            return Err(e.into());
        }

        packet.set_frame(header.timestamp, config_len, total);
        return Ok(packet);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn stream(frames: &[(u64, Vec<u8>)]) -> Cursor<Vec<u8>> {
        let mut buf = BytesMut::new();
        for (ts, payload) in frames {
            encode_frame(&mut buf, *ts, payload);
        }
        Cursor::new(buf.to_vec())
    }

    fn raw_header(timestamp: u64, length: u32) -> Cursor<Vec<u8>> {
        let mut buf = BytesMut::new();
        FrameHeader { timestamp, length }.put(&mut buf);
        Cursor::new(buf.to_vec())
    }

    #[test]
    fn test_header_is_big_endian() {
        let bytes = [0, 0, 0, 0, 0, 0, 0x03, 0xE8, 0, 0, 0x07, 0xD0];
        let header = FrameHeader::parse(&bytes);
        assert_eq!(header, FrameHeader { timestamp: 1000, length: 2000 });
        assert!(!header.is_config());
    }

    #[test]
    fn test_config_prepended_to_sample() {
        let config: Vec<u8> = (0..500).map(|i| i as u8).collect();
        let sample = vec![0xAB; 2000];
        let mut reader = stream(&[(NO_TIMESTAMP, config.clone()), (1000, sample.clone())]);
        let pool = PacketPool::new();

        let packet = read_frame(&mut reader, &pool).unwrap();
        assert_eq!(packet.used(), 2500);
        assert_eq!(packet.pts, 1000);
        assert_eq!(&packet.payload()[..500], &config[..]);
        assert_eq!(packet.sample(), &sample[..]);
        assert!(packet.has_config());
        assert_eq!(pool.allocated(), 1);
    }

    #[test]
    fn test_plain_sample() {
        let mut reader = stream(&[(42, vec![1, 2, 3])]);
        let pool = PacketPool::new();
        let packet = read_frame(&mut reader, &pool).unwrap();
        assert_eq!(packet.payload(), &[1, 2, 3]);
        assert!(!packet.has_config());
    }

    #[test]
    fn test_duplicate_config_rejected() {
        let mut reader = stream(&[(NO_TIMESTAMP, vec![1; 10]), (NO_TIMESTAMP, vec![2; 10]), (5, vec![3; 10])]);
        let pool = PacketPool::new();
        assert!(matches!(read_frame(&mut reader, &pool), Err(ProtocolError::DuplicateConfig)));
        assert_eq!(pool.allocated(), 0);
    }

    #[test]
    fn test_peer_stop() {
        let mut reader = raw_header(NO_TIMESTAMP, u32::MAX);
        let pool = PacketPool::new();
        assert!(matches!(read_frame(&mut reader, &pool), Err(ProtocolError::PeerStopped)));
    }

    #[test]
    fn test_config_length_limits() {
        let pool = PacketPool::new();
        for len in [0, 1025, 4096] {
            let mut reader = raw_header(NO_TIMESTAMP, len);
            assert!(matches!(read_frame(&mut reader, &pool), Err(ProtocolError::ConfigLength(l)) if l == len));
        }
        assert_eq!(check_config_len(1).unwrap(), 1);
        assert_eq!(check_config_len(1024).unwrap(), 1024);
    }

    #[test]
    fn test_sample_length_limits() {
        let pool = PacketPool::new();
        for len in [0, (MAX_SAMPLE_LEN + 1) as u32] {
            let mut reader = raw_header(7, len);
            assert!(matches!(read_frame(&mut reader, &pool), Err(ProtocolError::SampleLength(l)) if l == len));
        }
        assert_eq!(check_sample_len(MAX_SAMPLE_LEN as u32).unwrap(), MAX_SAMPLE_LEN);
    }

    #[test]
    fn test_short_sample_returns_buffer() {
        let mut buf = BytesMut::new();
        FrameHeader { timestamp: 9, length: 100 }.put(&mut buf);
        buf.put_slice(&[0; 40]);
        let mut reader = Cursor::new(buf.to_vec());
        let pool = PacketPool::new();

        assert!(matches!(read_frame(&mut reader, &pool), Err(ProtocolError::ShortRead(_))));
        assert_eq!(pool.allocated(), 1);
        assert_eq!(pool.empty_len(), 1);
        assert_eq!(pool.in_flight(), 0);
    }

    #[test]
    fn test_short_header() {
        let mut reader = Cursor::new(vec![0u8; 5]);
        let pool = PacketPool::new();
        assert!(matches!(read_frame(&mut reader, &pool), Err(ProtocolError::ShortRead(_))));
    }

    #[test]
    fn test_config_does_not_leak_into_next_frame() {
        let mut reader = stream(&[(NO_TIMESTAMP, vec![9; 4]), (1, vec![1; 4]), (2, vec![2; 4])]);
        let pool = PacketPool::new();

        let first = read_frame(&mut reader, &pool).unwrap();
        assert_eq!(first.used(), 8);
        pool.push_empty(first);

        let second = read_frame(&mut reader, &pool).unwrap();
        assert_eq!(second.payload(), &[2; 4]);
        assert!(!second.has_config());
        assert_eq!(pool.allocated(), 1);
    }
}
