//! Length-prefixed framing for program uploads and captured output
//!
//! Both directions of the hub link carry UTF-8 text framed as:
//! ```text
//! [ 4 bytes: length (u32, big-endian) ][ N bytes: UTF-8 text ]
//! ```
//!
//! One frame out (the program), one frame back (everything the program
//! printed, newline-delimited).

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Maximum frame size (64 KB); programs and their output are tiny
pub const MAX_FRAME_SIZE: u32 = 64 * 1024;

/// Errors that can occur during frame encoding/decoding
#[derive(Error, Debug)]
pub enum FrameError {
    #[error("frame too large: {0} bytes (max: {MAX_FRAME_SIZE})")]
    FrameTooLarge(usize),

    #[error("invalid frame length prefix: {0}")]
    InvalidLength(u32),

    #[error("frame payload is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
}

/// Encode a text payload into a length-prefixed frame
pub fn encode(text: &str) -> Result<Bytes, FrameError> {
    let payload = text.as_bytes();

    if payload.len() > MAX_FRAME_SIZE as usize {
        return Err(FrameError::FrameTooLarge(payload.len()));
    }

    let mut buf = BytesMut::with_capacity(4 + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.put_slice(payload);

    Ok(buf.freeze())
}

/// Try to decode a length-prefixed frame from a buffer
///
/// Returns:
/// - `Ok(Some(text))` if a complete frame was decoded
/// - `Ok(None)` if more data is needed
/// - `Err(...)` if the data is invalid
pub fn decode(buf: &mut BytesMut) -> Result<Option<String>, FrameError> {
    if buf.len() < 4 {
        return Ok(None);
    }

    // Peek at the length prefix without consuming
    let frame_len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);

    if frame_len > MAX_FRAME_SIZE {
        return Err(FrameError::InvalidLength(frame_len));
    }

    let total_len = 4 + frame_len as usize;
    if buf.len() < total_len {
        return Ok(None);
    }

    buf.advance(4);
    let payload = buf.split_to(frame_len as usize);

    Ok(Some(String::from_utf8(payload.to_vec())?))
}

/// Decoder state machine for streaming decoding
#[derive(Debug, Default)]
pub struct FrameDecoder {
    /// Partial frame data being accumulated
    buffer: BytesMut,
}

impl FrameDecoder {
    /// Create a new frame decoder
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
        }
    }

    /// Add data to the decoder buffer
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Try to decode the next frame from the buffer
    pub fn decode_next(&mut self) -> Result<Option<String>, FrameError> {
        decode(&mut self.buffer)
    }
}
