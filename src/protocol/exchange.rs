//! Minimal request/response exchange for the control channel
//!
//! The reader collects bytes until the buffer is full or the peer goes
//! quiet, then looks for the blank line that ends the header block.

use std::io::{self, ErrorKind, Read, Write};

use thiserror::Error;

const HEADER_END: &[u8] = b"\r\n\r\n";

#[derive(Error, Debug)]
pub enum ExchangeError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Connection closed by peer")]
    Closed,

    #[error("Response without a header terminator")]
    Incomplete,
}

impl ExchangeError {
    /// A clean close means the device does not handle this request
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ExchangeError::Closed)
    }
}

/// Send `request` and read the response into `buf`.
///
/// Returns `(filled, body_start)`: the number of bytes read and the index
/// just past the header terminator.
pub fn exchange<S: Read + Write>(
    stream: &mut S,
    request: &[u8],
    buf: &mut [u8],
) -> Result<(usize, usize), ExchangeError> {
    stream.write_all(request)?;
    stream.flush()?;

    let mut filled = 0;
    while filled < buf.len() {
        match stream.read(&mut buf[filled..]) {
            Ok(0) => return Err(ExchangeError::Closed),
            Ok(n) => filled += n,
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => break,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }

    find_body(&buf[..filled])
        .map(|body| (filled, body))
        .ok_or(ExchangeError::Incomplete)
}

/// Index just past the first `\r\n\r\n`
pub fn find_body(response: &[u8]) -> Option<usize> {
    response
        .windows(HEADER_END.len())
        .position(|w| w == HEADER_END)
        .map(|i| i + HEADER_END.len())
}

/// Leading decimal digits of a response body
pub fn parse_percentage(body: &[u8]) -> Option<u32> {
    let digits = body.iter().take_while(|b| b.is_ascii_digit()).count();
    if digits == 0 {
        return None;
    }
    std::str::from_utf8(&body[..digits]).ok()?.parse().ok()
}
