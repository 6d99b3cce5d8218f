//! Frame and TLV codec shared by discovery and control.
//!
//! Frame format:
//! ```text
//! +--------+--------+------------------+--------+
//! | Type   | Length |     Payload      | CRC32  |
//! | u16 BE | u16 BE |    (variable)    | u32 BE |
//! +--------+--------+------------------+--------+
//! | 2 bytes| 2 bytes|  Length bytes    | 4 bytes|
//! ```
//!
//! The CRC covers type, length and payload. Payloads are a sequence of TLV
//! fields `[tag:u8][len:varlen][value]`, where `len` is one byte below
//! `0x80` and two bytes (low seven bits first, high bit set) otherwise.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::FrameError;
use crate::types::{HEADER_SIZE, MAX_PAYLOAD_SIZE, MAX_TLV_VALUE_SIZE, TRAILER_SIZE};

/// Encode a frame with type, length, payload and CRC trailer.
pub fn encode_frame(packet_type: u16, payload: &[u8]) -> Result<Bytes, FrameError> {
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(FrameError::TooLarge(payload.len(), MAX_PAYLOAD_SIZE));
    }
    Ok(write_frame(packet_type, payload))
}

/// Frame a payload already known to fit in [`MAX_PAYLOAD_SIZE`].
pub(crate) fn write_frame(packet_type: u16, payload: &[u8]) -> Bytes {
    debug_assert!(payload.len() <= MAX_PAYLOAD_SIZE);
    let mut frame = BytesMut::with_capacity(HEADER_SIZE + payload.len() + TRAILER_SIZE);
    frame.put_u16(packet_type);
    frame.put_u16(payload.len() as u16);
    frame.put_slice(payload);
    let crc = crc32(&frame);
    frame.put_u32(crc);
    frame.freeze()
}

/// Decode a complete frame, returning its type and payload.
///
/// Bytes past the end of the frame are ignored.
pub fn decode_frame(buf: &[u8]) -> Result<(u16, Bytes), FrameError> {
    let total_len = match peek_frame_len(buf) {
        Some(len) => len,
        None => return Err(FrameError::truncated(HEADER_SIZE + TRAILER_SIZE, buf.len())),
    };
    if buf.len() < total_len {
        return Err(FrameError::truncated(total_len, buf.len()));
    }

    let crc_offset = total_len - TRAILER_SIZE;
    let mut trailer = &buf[crc_offset..total_len];
    let received = trailer.get_u32();
    let computed = crc32(&buf[..crc_offset]);
    if received != computed {
        return Err(FrameError::CrcMismatch { received, computed });
    }

    let packet_type = u16::from_be_bytes([buf[0], buf[1]]);
    let payload = Bytes::copy_from_slice(&buf[HEADER_SIZE..crc_offset]);
    Ok((packet_type, payload))
}

/// Total length of the frame starting at `buf`, once the header is available.
/// Returns None if there's not enough data yet.
pub fn peek_frame_len(buf: &[u8]) -> Option<usize> {
    if buf.len() < HEADER_SIZE {
        return None;
    }
    let payload_len = u16::from_be_bytes([buf[2], buf[3]]) as usize;
    Some(HEADER_SIZE + payload_len + TRAILER_SIZE)
}

/// Calculate CRC-32/ISO-HDLC (reflected polynomial 0xEDB88320).
pub fn crc32(data: &[u8]) -> u32 {
    static CRC_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                if crc & 1 != 0 {
                    crc = (crc >> 1) ^ 0xEDB8_8320;
                } else {
                    crc >>= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFFu32;
    for &byte in data {
        let index = ((crc ^ byte as u32) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC_TABLE[index];
    }
    crc ^ 0xFFFF_FFFF
}

// ============================================================================
// TLV fields
// ============================================================================

/// Append a TLV field. Values longer than the two-byte length form are
/// rejected.
pub fn put_tlv(buf: &mut BytesMut, tag: u8, value: &[u8]) -> Result<(), FrameError> {
    let len = value.len();
    if len > MAX_TLV_VALUE_SIZE {
        return Err(FrameError::TooLarge(len, MAX_TLV_VALUE_SIZE));
    }

    buf.put_u8(tag);
    if len < 0x80 {
        buf.put_u8(len as u8);
    } else {
        buf.put_u8((len & 0x7F) as u8 | 0x80);
        buf.put_u8((len >> 7) as u8);
    }
    buf.put_slice(value);
    Ok(())
}

/// Append a big-endian u32 TLV field.
pub fn put_tlv_u32(buf: &mut BytesMut, tag: u8, value: u32) {
    buf.put_u8(tag);
    buf.put_u8(4);
    buf.put_u32(value);
}

/// Append a NUL-terminated string TLV field.
pub fn put_tlv_str(buf: &mut BytesMut, tag: u8, value: &str) -> Result<(), FrameError> {
    let mut bytes = Vec::with_capacity(value.len() + 1);
    bytes.extend_from_slice(value.as_bytes());
    bytes.push(0);
    put_tlv(buf, tag, &bytes)
}

/// Iterator over the TLV fields of a payload.
///
/// Yields `(tag, value)` pairs. A field whose declared length runs past the
/// end of the payload yields [`FrameError::Truncated`] and ends iteration.
#[derive(Debug, Clone)]
pub struct TlvReader {
    buf: Bytes,
    failed: bool,
}

impl TlvReader {
    pub fn new(payload: Bytes) -> Self {
        Self {
            buf: payload,
            failed: false,
        }
    }

    fn read_field(&mut self) -> Result<(u8, Bytes), FrameError> {
        if self.buf.remaining() < 2 {
            return Err(FrameError::truncated(2, self.buf.remaining()));
        }
        let tag = self.buf.get_u8();
        let mut len = self.buf.get_u8() as usize;
        if len & 0x80 != 0 {
            if self.buf.remaining() < 1 {
                return Err(FrameError::truncated(1, 0));
            }
            len = (len & 0x7F) | ((self.buf.get_u8() as usize) << 7);
        }
        if self.buf.remaining() < len {
            return Err(FrameError::truncated(len, self.buf.remaining()));
        }
        Ok((tag, self.buf.split_to(len)))
    }
}

impl Iterator for TlvReader {
    type Item = Result<(u8, Bytes), FrameError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || !self.buf.has_remaining() {
            return None;
        }
        let field = self.read_field();
        if field.is_err() {
            self.failed = true;
        }
        Some(field)
    }
}

/// Read a big-endian u32 TLV value.
pub fn tlv_u32(value: &[u8]) -> Result<u32, FrameError> {
    match value.try_into() {
        Ok(bytes) => Ok(u32::from_be_bytes(bytes)),
        Err(_) => Err(FrameError::truncated(4, value.len())),
    }
}

// ============================================================================
// Strings
// ============================================================================

/// Decode a NUL-terminated (or NUL-padded) string value.
pub fn decode_c_str(value: &[u8]) -> String {
    let end = value.iter().position(|&b| b == 0).unwrap_or(value.len());
    String::from_utf8_lossy(&value[..end]).into_owned()
}

/// Longest prefix of `s` that fits in `max_len` bytes on a char boundary.
pub fn truncate_str(s: &str, max_len: usize) -> &str {
    if s.len() <= max_len {
        return s;
    }
    let mut end = max_len;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Append a fixed-capacity, zero-padded string field.
///
/// At most `capacity - 1` bytes are written so the field stays
/// NUL-terminated.
pub fn put_fixed_str(buf: &mut BytesMut, s: &str, capacity: usize) {
    let s = truncate_str(s, capacity.saturating_sub(1));
    buf.put_slice(s.as_bytes());
    buf.put_bytes(0, capacity - s.len());
}

/// Read a fixed-capacity string field. The caller checks `remaining()`.
pub fn get_fixed_str(buf: &mut Bytes, capacity: usize) -> String {
    let field = buf.split_to(capacity);
    decode_c_str(&field)
}
