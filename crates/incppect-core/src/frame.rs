//! Aggregate frame encoding/decoding
//!
//! Server→client frame layout (all integers little-endian):
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ u32 outer_type   0 = full aggregate                          │
//! │                  1 = XOR/RLE diff vs the previous aggregate  │
//! ├──────────────────────────────────────────────────────────────┤
//! │ repeated:                                                    │
//! │   u32 request_id                                             │
//! │   u32 inner_type   0 = payload padded to 4 bytes             │
//! │                    1 = XOR/RLE diff vs the previous payload  │
//! │   u32 payload_size                                           │
//! │   u8  payload[payload_size]                                  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! When `outer_type == 1` the body after the header is a single XOR/RLE
//! stream over the previous aggregate's body.

use crate::diff::padded_len;
use crate::error::{Error, Result};

/// Size of the outer-type header
pub const HEADER_SIZE: usize = 4;

/// Outer/inner type: full payload
pub const TYPE_FULL: u32 = 0;

/// Outer/inner type: XOR/RLE diff against the previous payload
pub const TYPE_DIFF: u32 = 1;

/// Payloads and aggregates switch to diff encoding only above this size
pub const DIFF_THRESHOLD: usize = 256;

/// Frames above this size are flagged for per-message compression
pub const COMPRESS_MIN_BYTES: usize = 64;

/// Size of one entry header (request id, inner type, payload size)
const ENTRY_HEADER: usize = 12;

/// Clear `buf` and start a full aggregate frame.
pub fn begin(buf: &mut Vec<u8>) {
    buf.clear();
    buf.extend_from_slice(&TYPE_FULL.to_le_bytes());
}

/// Append a full-payload entry, zero-padding the payload to a cell boundary.
pub fn push_full(buf: &mut Vec<u8>, request_id: i32, payload: &[u8]) {
    let padded = padded_len(payload.len());
    buf.extend_from_slice(&request_id.to_le_bytes());
    buf.extend_from_slice(&TYPE_FULL.to_le_bytes());
    buf.extend_from_slice(&(padded as u32).to_le_bytes());
    buf.extend_from_slice(payload);
    buf.resize(buf.len() + (padded - payload.len()), 0);
}

/// Append a diff-payload entry carrying an XOR/RLE stream.
pub fn push_diff(buf: &mut Vec<u8>, request_id: i32, stream: &[u8]) {
    buf.extend_from_slice(&request_id.to_le_bytes());
    buf.extend_from_slice(&TYPE_DIFF.to_le_bytes());
    buf.extend_from_slice(&(stream.len() as u32).to_le_bytes());
    buf.extend_from_slice(stream);
}

/// One `(request_id, inner_type, payload)` entry of an aggregate body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entry<'a> {
    pub request_id: i32,
    pub inner_type: u32,
    pub payload: &'a [u8],
}

/// Split a frame into its outer type and raw body.
pub fn split(frame: &[u8]) -> Result<(u32, &[u8])> {
    if frame.len() < HEADER_SIZE {
        return Err(Error::BufferTooSmall {
            needed: HEADER_SIZE,
            have: frame.len(),
        });
    }
    let outer = u32::from_le_bytes(frame[..4].try_into().unwrap());
    Ok((outer, &frame[HEADER_SIZE..]))
}

/// Walk the entries of a full aggregate body.
pub fn entries(body: &[u8]) -> Result<Vec<Entry<'_>>> {
    let mut out = Vec::new();
    let mut offset = 0;

    while offset < body.len() {
        if body.len() - offset < ENTRY_HEADER {
            return Err(Error::TruncatedFrame(offset));
        }
        let request_id = i32::from_le_bytes(body[offset..offset + 4].try_into().unwrap());
        let inner_type = u32::from_le_bytes(body[offset + 4..offset + 8].try_into().unwrap());
        let size = u32::from_le_bytes(body[offset + 8..offset + 12].try_into().unwrap()) as usize;

        let start = offset + ENTRY_HEADER;
        if body.len() - start < size {
            return Err(Error::TruncatedFrame(offset));
        }
        out.push(Entry {
            request_id,
            inner_type,
            payload: &body[start..start + size],
        });
        offset = start + size;
    }

    Ok(out)
}
