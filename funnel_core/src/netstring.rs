//! Netstring framing: `<decimal-length>:<raw-bytes>,`.
//!
//! The same encode/decode pair is used for both directions of the fixer
//! exchange. Decoding checks the declared length against a ceiling before
//! allocating anything, so a hostile peer cannot make us reserve more than
//! the ceiling.

use std::io::{self, BufRead, Read, Write};
use thiserror::Error;

/// Largest payload accepted anywhere in the loop (10 MiB).
pub const MAX_CANDIDATE_LEN: usize = 10 * 1024 * 1024;

/// Longest length prefix we are willing to scan for the `:` delimiter.
/// `u64::MAX` has 20 digits.
const MAX_PREFIX_DIGITS: u64 = 20;

#[derive(Error, Debug)]
pub enum NetstringError {
    #[error("netstring I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("stream ended before a length prefix")]
    Eof,

    #[error("error parsing length {0:?}")]
    BadLength(String),

    #[error("proposed length {declared} exceeds maximum of {max} bytes")]
    TooLong { declared: u64, max: usize },

    #[error("stream ended after {read} of {expected} payload bytes")]
    Truncated { read: usize, expected: usize },

    #[error("missing terminator")]
    MissingTerminator,
}

/// Frames `payload` as a netstring.
pub fn encode(payload: &[u8]) -> Vec<u8> {
    let prefix = payload.len().to_string();
    let mut frame = Vec::with_capacity(prefix.len() + payload.len() + 2);
    frame.extend_from_slice(prefix.as_bytes());
    frame.push(b':');
    frame.extend_from_slice(payload);
    frame.push(b',');
    frame
}

/// Writes one netstring frame to `writer` and flushes it.
pub fn write_frame<W: Write + ?Sized>(writer: &mut W, payload: &[u8]) -> io::Result<()> {
    writer.write_all(&encode(payload))?;
    writer.flush()
}

/// Reads exactly one frame, accepting payloads up to [`MAX_CANDIDATE_LEN`].
pub fn decode<R: BufRead + ?Sized>(reader: &mut R) -> Result<Vec<u8>, NetstringError> {
    decode_with_limit(reader, MAX_CANDIDATE_LEN)
}

/// Reads exactly one frame, rejecting declared lengths above `max`.
pub fn decode_with_limit<R: BufRead + ?Sized>(
    reader: &mut R,
    max: usize,
) -> Result<Vec<u8>, NetstringError> {
    let mut prefix = Vec::with_capacity(8);
    (&mut *reader)
        .take(MAX_PREFIX_DIGITS + 1)
        .read_until(b':', &mut prefix)?;

    match prefix.pop() {
        Some(b':') => {}
        Some(other) => {
            prefix.push(other);
            return Err(NetstringError::BadLength(
                String::from_utf8_lossy(&prefix).into_owned(),
            ));
        }
        None => return Err(NetstringError::Eof),
    }

    let declared = parse_length(&prefix)?;
    if declared > max as u64 {
        return Err(NetstringError::TooLong { declared, max });
    }
    let expected = declared as usize;

    let mut payload = Vec::with_capacity(expected);
    let read = (&mut *reader).take(declared).read_to_end(&mut payload)?;
    if read != expected {
        return Err(NetstringError::Truncated { read, expected });
    }

    let mut terminator = [0u8; 1];
    match reader.read_exact(&mut terminator) {
        Ok(()) if terminator[0] == b',' => Ok(payload),
        Ok(()) => Err(NetstringError::MissingTerminator),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            Err(NetstringError::MissingTerminator)
        }
        Err(e) => Err(NetstringError::Io(e)),
    }
}

// Only plain ASCII digits: no sign, no whitespace, no empty prefix.
fn parse_length(digits: &[u8]) -> Result<u64, NetstringError> {
    let bad = || NetstringError::BadLength(String::from_utf8_lossy(digits).into_owned());
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return Err(bad());
    }
    std::str::from_utf8(digits)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .ok_or_else(bad)
}
