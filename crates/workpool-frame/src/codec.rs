use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};

/// Message-type code for a start-request frame (host → worker).
pub const MSG_START_REQUEST: u64 = 1;

/// Message-type code for an exit frame (host → worker).
pub const MSG_EXIT: u64 = 2;

/// Sanity cap on a declared payload length: 64 MiB.
pub const MAX_PAYLOAD: usize = 64 * 1024 * 1024;

// A u64 never has more decimal digits than this; longer prefixes are garbage.
const MAX_PREFIX_DIGITS: usize = 20;

/// A decoded host → worker message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Start handling the contained payload.
    Start(Bytes),
    /// Shut the worker down.
    Exit,
}

/// Encode a start-request frame: `"<START>;<N>\n"` + N payload bytes.
pub fn encode_start_request(payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    if payload.len() > MAX_PAYLOAD {
        return Err(FrameError::PayloadTooLarge {
            size: payload.len(),
            max: MAX_PAYLOAD,
        });
    }
    let header = format!("{MSG_START_REQUEST};{}\n", payload.len());
    dst.reserve(header.len() + payload.len());
    dst.put_slice(header.as_bytes());
    dst.put_slice(payload);
    Ok(())
}

/// Encode an exit frame: `"<EXIT>;\n"`.
pub fn encode_exit(dst: &mut BytesMut) {
    dst.put_slice(format!("{MSG_EXIT};\n").as_bytes());
}

/// Encode a response frame: `"<N>;"` + N payload bytes.
pub fn encode_response(payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    if payload.len() > MAX_PAYLOAD {
        return Err(FrameError::PayloadTooLarge {
            size: payload.len(),
            max: MAX_PAYLOAD,
        });
    }
    let header = format!("{};", payload.len());
    dst.reserve(header.len() + payload.len());
    dst.put_slice(header.as_bytes());
    dst.put_slice(payload);
    Ok(())
}

/// Decode one host → worker message from the front of `src`.
///
/// Returns `Ok(None)` if the buffer does not yet hold a complete frame.
/// On success, consumes the frame bytes from the buffer. Grammar
/// violations are reported as soon as the offending byte is seen, even if
/// the delimiter has not arrived yet.
pub fn decode_request(src: &mut BytesMut) -> Result<Option<Request>> {
    let Some((code, after_code)) = scan_prefix(src, 0, b';')? else {
        return Ok(None);
    };

    match code {
        MSG_START_REQUEST => {
            let Some((length, after_len)) = scan_prefix(src, after_code, b'\n')? else {
                return Ok(None);
            };
            let length = checked_len(length)?;
            if src.len() < after_len + length {
                return Ok(None); // Need more data
            }
            src.advance(after_len);
            let payload = src.split_to(length).freeze();
            Ok(Some(Request::Start(payload)))
        }
        MSG_EXIT => {
            src.advance(after_code);
            // The exit frame carries a trailing newline; eat it if it is
            // already buffered, but do not wait for it.
            if src.first() == Some(&b'\n') {
                src.advance(1);
            }
            Ok(Some(Request::Exit))
        }
        code => Err(FrameError::UnknownMessageType { code }),
    }
}

/// Decode one worker → host response from the front of `src`.
///
/// Returns `Ok(None)` if the buffer does not yet hold a complete frame.
/// On success, consumes the frame bytes and yields the payload.
pub fn decode_response(src: &mut BytesMut) -> Result<Option<Bytes>> {
    let Some((length, after_len)) = scan_prefix(src, 0, b';')? else {
        return Ok(None);
    };
    let length = checked_len(length)?;
    if src.len() < after_len + length {
        return Ok(None); // Need more data
    }
    src.advance(after_len);
    Ok(Some(src.split_to(length).freeze()))
}

/// Scan a decimal prefix starting at `start`, terminated by `delim`.
///
/// Returns the parsed value and the index just past the delimiter, or
/// `Ok(None)` if the delimiter is not buffered yet. Anything other than
/// `[0-9]+` before the delimiter fails with `UnexpectedMessage`.
fn scan_prefix(src: &BytesMut, start: usize, delim: u8) -> Result<Option<(u64, usize)>> {
    let mut value: u64 = 0;
    for (offset, &byte) in src[start..].iter().enumerate() {
        if byte == delim {
            if offset == 0 {
                return Err(FrameError::UnexpectedMessage);
            }
            return Ok(Some((value, start + offset + 1)));
        }
        if !byte.is_ascii_digit() || offset >= MAX_PREFIX_DIGITS {
            return Err(FrameError::UnexpectedMessage);
        }
        value = value
            .checked_mul(10)
            .and_then(|v| v.checked_add(u64::from(byte - b'0')))
            .ok_or(FrameError::UnexpectedMessage)?;
    }
    Ok(None)
}

fn checked_len(length: u64) -> Result<usize> {
    let length = usize::try_from(length).map_err(|_| FrameError::UnexpectedMessage)?;
    if length > MAX_PAYLOAD {
        return Err(FrameError::PayloadTooLarge {
            size: length,
            max: MAX_PAYLOAD,
        });
    }
    Ok(length)
}
