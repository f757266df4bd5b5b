//! Record framing codec
//!
//! Handles the length-prefixed envelope wrapped around each message on disk
//! and in the object store.
//!
//! Frame format:
//! ```text
//! +------+------------+--------------------+------+---------+
//! | 0x1E | header len | uvarint payload len| 0x1F | payload |
//! +------+------------+--------------------+------+---------+
//! ```
//!
//! The payload therefore starts `2 + header_len + 1` bytes into the frame;
//! that offset is what the offset index records, so a byte-range fetch of
//! `(offset, length)` returns exactly the payload.
//!
//! The decoder is resilient: bytes that do not parse as a frame are skipped
//! until the next record separator, and a frame whose declared length
//! exceeds the maximum yields an in-band [`SplitEvent::Oversize`] instead of
//! terminating the stream. A non-empty tail at end of stream is reported as
//! [`SplitEvent::Trailing`] so callers can account for it.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{Error, Result};

/// Marks the start of a frame.
pub const RECORD_SEPARATOR: u8 = 0x1e;

/// Separates the frame header from the payload.
pub const UNIT_SEPARATOR: u8 = 0x1f;

/// Maximum payload size accepted by the codec (64MB).
pub const MAX_RECORD_SIZE: usize = 64 * 1024 * 1024;

/// One event from the stream splitter.
#[derive(Debug, Clone, PartialEq)]
pub enum SplitEvent {
    /// A complete record. `offset` is the absolute position of the payload
    /// within the stream (after the framing header).
    Record { offset: u64, payload: Bytes },

    /// A frame declared a payload larger than the maximum. The frame header
    /// was consumed; scanning continues at the next record separator.
    Oversize { declared: usize },

    /// Bytes left over at end of stream that do not form a complete frame.
    Trailing { bytes: usize },
}

/// Encode an unsigned varint.
fn put_uvarint(buf: &mut BytesMut, mut value: u64) {
    loop {
        let mut byte = (value & 0x7F) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        buf.put_u8(byte);
        if value == 0 {
            break;
        }
    }
}

/// Decode an unsigned varint from the start of `buf`, returning the value
/// and the number of bytes consumed. `None` if the buffer ends mid-varint
/// or the varint is longer than 64 bits.
fn get_uvarint(buf: &[u8]) -> Option<(u64, usize)> {
    let mut value: u64 = 0;
    let mut shift = 0;
    for (i, &byte) in buf.iter().enumerate() {
        if shift >= 64 {
            return None;
        }
        value |= ((byte & 0x7F) as u64) << shift;
        if byte & 0x80 == 0 {
            return Some((value, i + 1));
        }
        shift += 7;
    }
    None
}

fn uvarint_len(value: u64) -> usize {
    let mut len = 1;
    let mut v = value >> 7;
    while v != 0 {
        len += 1;
        v >>= 7;
    }
    len
}

/// Number of envelope bytes preceding the payload of a frame.
pub fn frame_header_len(payload_len: usize) -> usize {
    2 + uvarint_len(payload_len as u64) + 1
}

/// Wrap a payload in a frame.
pub fn frame(payload: &[u8]) -> Result<Bytes> {
    let mut codec = FrameCodec::new();
    let mut buf = BytesMut::with_capacity(frame_header_len(payload.len()) + payload.len());
    codec.encode(Bytes::copy_from_slice(payload), &mut buf)?;
    Ok(buf.freeze())
}

/// Streaming frame codec with byte-position accounting.
pub struct FrameCodec {
    max_record_size: usize,
    /// Absolute stream offset of the first byte currently in the buffer.
    position: u64,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameCodec {
    pub fn new() -> Self {
        Self {
            max_record_size: MAX_RECORD_SIZE,
            position: 0,
        }
    }

    pub fn with_max_record_size(max_record_size: usize) -> Self {
        Self {
            max_record_size,
            position: 0,
        }
    }

    /// Total bytes consumed from the stream so far.
    pub fn position(&self) -> u64 {
        self.position
    }
}

impl Decoder for FrameCodec {
    type Item = SplitEvent;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<SplitEvent>> {
        loop {
            // Resynchronize on the next record separator; anything before it
            // is not a frame.
            let start = match src.iter().position(|&b| b == RECORD_SEPARATOR) {
                Some(i) => i,
                None => {
                    self.position += src.len() as u64;
                    src.clear();
                    return Ok(None);
                }
            };
            if start > 0 {
                src.advance(start);
                self.position += start as u64;
            }

            if src.len() < 2 {
                return Ok(None);
            }
            let header_len = src[1] as usize;
            let data_start = 2 + header_len + 1;
            if src.len() < data_start {
                src.reserve(data_start - src.len());
                return Ok(None);
            }

            let payload_len = match get_uvarint(&src[2..2 + header_len]) {
                Some((v, consumed)) if consumed == header_len => v as usize,
                // The separator did not start a frame; skip it and rescan.
                _ => {
                    src.advance(1);
                    self.position += 1;
                    continue;
                }
            };
            if src[2 + header_len] != UNIT_SEPARATOR {
                src.advance(1);
                self.position += 1;
                continue;
            }

            if payload_len > self.max_record_size {
                src.advance(data_start);
                self.position += data_start as u64;
                return Ok(Some(SplitEvent::Oversize {
                    declared: payload_len,
                }));
            }

            let frame_len = data_start + payload_len;
            if src.len() < frame_len {
                src.reserve(frame_len - src.len());
                return Ok(None);
            }

            let offset = self.position + data_start as u64;
            src.advance(data_start);
            let payload = src.split_to(payload_len).freeze();
            self.position += frame_len as u64;
            return Ok(Some(SplitEvent::Record { offset, payload }));
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<SplitEvent>> {
        if let Some(event) = self.decode(src)? {
            return Ok(Some(event));
        }
        if !src.is_empty() {
            // A partial frame at end of stream; report and discard it.
            let bytes = src.len();
            self.position += bytes as u64;
            src.clear();
            return Ok(Some(SplitEvent::Trailing { bytes }));
        }
        Ok(None)
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = Error;

    fn encode(&mut self, payload: Bytes, dst: &mut BytesMut) -> Result<()> {
        if payload.len() > self.max_record_size {
            return Err(Error::RecordTooLarge {
                declared: payload.len(),
                max: self.max_record_size,
            });
        }

        let header_len = uvarint_len(payload.len() as u64);
        dst.reserve(2 + header_len + 1 + payload.len());
        dst.put_u8(RECORD_SEPARATOR);
        dst.put_u8(header_len as u8);
        put_uvarint(dst, payload.len() as u64);
        dst.put_u8(UNIT_SEPARATOR);
        dst.extend_from_slice(&payload);
        Ok(())
    }
}
