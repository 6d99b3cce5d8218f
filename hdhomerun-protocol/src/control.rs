//! Get/set request and reply payloads carried over the control connection.

use bytes::{Bytes, BytesMut};

use crate::codec::{decode_c_str, decode_frame, encode_frame, put_tlv, put_tlv_str, put_tlv_u32, tlv_u32, TlvReader};
use crate::error::FrameError;
use crate::types::{tag, PacketType};

/// A decoded get/set request (device side).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetSetRequest {
    pub name: String,
    pub value: Option<String>,
    pub lockkey: Option<u32>,
}

impl GetSetRequest {
    pub fn is_set(&self) -> bool {
        self.value.is_some()
    }
}

/// A decoded get/set reply.
///
/// The value is kept as raw bytes: most attributes are NUL-terminated
/// strings, but channel scan records are binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetSetReply {
    pub name: String,
    pub value: Option<Bytes>,
    pub error: Option<String>,
}

impl GetSetReply {
    /// Value decoded as a string, up to the first NUL.
    pub fn value_str(&self) -> Option<String> {
        self.value.as_deref().map(decode_c_str)
    }
}

/// Encode a get (no value) or set (with value) request frame.
pub fn encode_getset_request(
    name: &str,
    value: Option<&str>,
    lockkey: Option<u32>,
) -> Result<Bytes, FrameError> {
    let mut payload = BytesMut::new();
    put_tlv_str(&mut payload, tag::GETSET_NAME, name)?;
    if let Some(value) = value {
        put_tlv_str(&mut payload, tag::GETSET_VALUE, value)?;
        if let Some(lockkey) = lockkey {
            put_tlv_u32(&mut payload, tag::GETSET_LOCKKEY, lockkey);
        }
    }
    encode_frame(PacketType::GetSetRequest.into(), &payload)
}

pub fn decode_getset_request(buf: &[u8]) -> Result<GetSetRequest, FrameError> {
    let (packet_type, payload) = decode_frame(buf)?;
    if packet_type != u16::from(PacketType::GetSetRequest) {
        return Err(FrameError::InvalidField {
            field: "packet_type",
            value: packet_type as u32,
        });
    }

    let mut name = None;
    let mut value = None;
    let mut lockkey = None;
    for field in TlvReader::new(payload) {
        let (field_tag, data) = field?;
        match field_tag {
            tag::GETSET_NAME => name = Some(decode_c_str(&data)),
            tag::GETSET_VALUE => value = Some(decode_c_str(&data)),
            tag::GETSET_LOCKKEY => lockkey = Some(tlv_u32(&data)?),
            _ => {}
        }
    }

    Ok(GetSetRequest {
        name: name.ok_or(FrameError::MissingField("getset_name"))?,
        value,
        lockkey,
    })
}

/// Encode a reply frame (device side). `Ok` carries the raw value,
/// `Err` an error message.
pub fn encode_getset_reply(name: &str, result: Result<&[u8], &str>) -> Result<Bytes, FrameError> {
    let mut payload = BytesMut::new();
    put_tlv_str(&mut payload, tag::GETSET_NAME, name)?;
    match result {
        Ok(value) => put_tlv(&mut payload, tag::GETSET_VALUE, value)?,
        Err(message) => put_tlv_str(&mut payload, tag::ERROR_MESSAGE, message)?,
    }
    encode_frame(PacketType::GetSetReply.into(), &payload)
}

pub fn decode_getset_reply(buf: &[u8]) -> Result<GetSetReply, FrameError> {
    let (packet_type, payload) = decode_frame(buf)?;
    if packet_type != u16::from(PacketType::GetSetReply) {
        return Err(FrameError::InvalidField {
            field: "packet_type",
            value: packet_type as u32,
        });
    }

    let mut reply = GetSetReply {
        name: String::new(),
        value: None,
        error: None,
    };
    for field in TlvReader::new(payload) {
        let (field_tag, data) = field?;
        match field_tag {
            tag::GETSET_NAME => reply.name = decode_c_str(&data),
            tag::GETSET_VALUE => reply.value = Some(data),
            tag::ERROR_MESSAGE => reply.error = Some(decode_c_str(&data)),
            _ => {}
        }
    }
    Ok(reply)
}
