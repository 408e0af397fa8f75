//! Wire field utilities
//!
//! Length-prefixed field helpers shared by the packet codec. Every variable
//! field is a 4-byte big-endian length followed by that many raw bytes.

use anyhow::Result;
use bytes::{Buf, BufMut, BytesMut};
use tracing::trace;

use crate::error::ShareError;

/// Size of a field length prefix
pub const LEN_PREFIX_SIZE: usize = 4;

/// Write a length-prefixed field to the buffer
pub fn write_field(buf: &mut BytesMut, field: &[u8]) {
    buf.put_u32(field.len() as u32);
    buf.put_slice(field);
}

/// Read a length-prefixed field, advancing the cursor past it
pub fn read_field(buf: &mut &[u8], name: &str) -> Result<Vec<u8>> {
    if buf.remaining() < LEN_PREFIX_SIZE {
        return Err(ShareError::protocol_error_with_source(
            "Missing field length",
            format!("field: {}, remaining: {}", name, buf.remaining()),
        )
        .into());
    }

    let length = buf.get_u32() as usize;
    if buf.remaining() < length {
        return Err(ShareError::protocol_error_with_source(
            "Field runs past end of packet",
            format!("field: {}, length: {}, remaining: {}", name, length, buf.remaining()),
        )
        .into());
    }

    let field = buf[..length].to_vec();
    buf.advance(length);
    trace!("Read field {} ({} bytes)", name, length);
    Ok(field)
}

/// Read a length-prefixed text field; invalid UTF-8 is replaced, never rejected
pub fn read_text_field(buf: &mut &[u8], name: &str) -> Result<String> {
    let raw = read_field(buf, name)?;
    Ok(match String::from_utf8(raw) {
        Ok(text) => text,
        Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
    })
}

/// Encoded size of a field including its prefix
pub fn field_len(field: &[u8]) -> usize {
    LEN_PREFIX_SIZE + field.len()
}
