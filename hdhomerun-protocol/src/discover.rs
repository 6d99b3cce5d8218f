//! Discovery request/reply payloads.
//!
//! A request carries the device type and device id filters; a reply carries
//! the responding device's identity plus optional tuner count, base URL and
//! authorisation string. The device's IP address is taken from the datagram
//! source, not from the payload.

use std::net::Ipv4Addr;

use bytes::{Bytes, BytesMut};

use crate::codec::{
    decode_c_str, decode_frame, encode_frame, put_tlv_str, put_tlv_u32, tlv_u32, truncate_str,
    write_frame, TlvReader,
};
use crate::error::FrameError;
use crate::types::{
    tag, DiscoveredDevice, PacketType, BASE_URL_CAPACITY, DEVICE_AUTH_CAPACITY,
    DEVICE_ID_WILDCARD, DEVICE_TYPE_TUNER, DEVICE_TYPE_WILDCARD,
};

/// Encode a discovery request frame.
pub fn encode_discover_request(device_type: u32, device_id: u32) -> Bytes {
    let mut payload = BytesMut::with_capacity(12);
    put_tlv_u32(&mut payload, tag::DEVICE_TYPE, device_type);
    put_tlv_u32(&mut payload, tag::DEVICE_ID, device_id);
    write_frame(PacketType::DiscoverRequest.into(), &payload)
}

/// Filters carried by a discovery request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoverFilter {
    pub device_type: u32,
    pub device_id: u32,
}

impl DiscoverFilter {
    /// Returns true if a device with this identity should answer.
    pub fn matches(&self, device_type: u32, device_id: u32) -> bool {
        (self.device_type == DEVICE_TYPE_WILDCARD || self.device_type == device_type)
            && (self.device_id == DEVICE_ID_WILDCARD || self.device_id == device_id)
    }
}

/// Decode a discovery request frame (device side).
///
/// Missing filters default to the wildcard.
pub fn decode_discover_request(buf: &[u8]) -> Result<DiscoverFilter, FrameError> {
    let (packet_type, payload) = decode_frame(buf)?;
    expect_packet_type(packet_type, PacketType::DiscoverRequest)?;

    let mut filter = DiscoverFilter {
        device_type: DEVICE_TYPE_WILDCARD,
        device_id: DEVICE_ID_WILDCARD,
    };
    for field in TlvReader::new(payload) {
        let (field_tag, value) = field?;
        match field_tag {
            tag::DEVICE_TYPE => filter.device_type = tlv_u32(&value)?,
            tag::DEVICE_ID => filter.device_id = tlv_u32(&value)?,
            _ => {}
        }
    }
    Ok(filter)
}

/// Encode a discovery reply frame (device side).
pub fn encode_discover_reply(device: &DiscoveredDevice) -> Result<Bytes, FrameError> {
    let mut payload = BytesMut::new();
    put_tlv_u32(&mut payload, tag::DEVICE_TYPE, device.device_type);
    put_tlv_u32(&mut payload, tag::DEVICE_ID, device.device_id);
    if device.tuner_count > 0 {
        put_tlv_u8(&mut payload, tag::TUNER_COUNT, device.tuner_count);
    }
    if !device.base_url.is_empty() {
        put_tlv_str(&mut payload, tag::BASE_URL, &device.base_url)?;
    }
    if !device.device_auth.is_empty() {
        put_tlv_str(&mut payload, tag::DEVICE_AUTH_STR, &device.device_auth)?;
    }
    encode_frame(PacketType::DiscoverReply.into(), &payload)
}

fn put_tlv_u8(buf: &mut BytesMut, field_tag: u8, value: u8) {
    use bytes::BufMut;
    buf.put_u8(field_tag);
    buf.put_u8(1);
    buf.put_u8(value);
}

/// Decode a discovery reply datagram received from `src_ip`.
pub fn decode_discover_reply(buf: &[u8], src_ip: Ipv4Addr) -> Result<DiscoveredDevice, FrameError> {
    let (packet_type, payload) = decode_frame(buf)?;
    expect_packet_type(packet_type, PacketType::DiscoverReply)?;

    let mut device_type = None;
    let mut device_id = None;
    let mut tuner_count = 0u8;
    let mut base_url = String::new();
    let mut device_auth = String::new();

    for field in TlvReader::new(payload) {
        let (field_tag, value) = field?;
        match field_tag {
            tag::DEVICE_TYPE => device_type = Some(tlv_u32(&value)?),
            tag::DEVICE_ID => device_id = Some(tlv_u32(&value)?),
            tag::TUNER_COUNT => {
                tuner_count = *value.first().ok_or(FrameError::truncated(1, 0))?;
            }
            tag::BASE_URL => {
                base_url = truncate_str(&decode_c_str(&value), BASE_URL_CAPACITY - 1).to_string();
            }
            tag::DEVICE_AUTH_STR => {
                device_auth =
                    truncate_str(&decode_c_str(&value), DEVICE_AUTH_CAPACITY - 1).to_string();
            }
            _ => {}
        }
    }

    let device_type = device_type.ok_or(FrameError::MissingField("device_type"))?;
    let device_id = device_id.ok_or(FrameError::MissingField("device_id"))?;

    if tuner_count == 0 {
        tuner_count = default_tuner_count(device_id);
    }

    let is_legacy =
        device_type == DEVICE_TYPE_TUNER && (is_legacy_device_id(device_id) || base_url.is_empty());

    Ok(DiscoveredDevice {
        ip_addr: src_ip,
        device_type,
        device_id,
        tuner_count,
        is_legacy,
        device_auth,
        base_url,
    })
}

fn expect_packet_type(actual: u16, expected: PacketType) -> Result<(), FrameError> {
    if actual == u16::from(expected) {
        Ok(())
    } else {
        Err(FrameError::InvalidField {
            field: "packet_type",
            value: actual as u32,
        })
    }
}

/// Tuner count for old firmware that does not report one.
fn default_tuner_count(device_id: u32) -> u8 {
    match device_id >> 20 {
        0x102 => 1,
        0x100 | 0x101 | 0x121 => 2,
        _ => 0,
    }
}

/// Returns true if the device id belongs to a model family that predates the
/// HTTP interface.
pub fn is_legacy_device_id(device_id: u32) -> bool {
    match device_id >> 20 {
        // TECH-US / TECH3-US
        0x100 => device_id < 0x1004_0000,
        // TECH3-EU
        0x120 => device_id < 0x1203_0000,
        // HDHR-US, HDHR-T1-US, HDHR3-US, HDHR3-DT, HDHR-EU, HDHR3-EU
        0x101 | 0x102 | 0x103 | 0x111 | 0x121 | 0x122 => true,
        _ => false,
    }
}

/// Validate the checksum nibble embedded in a device id.
pub fn validate_device_id(device_id: u32) -> bool {
    const LOOKUP: [u8; 16] = [
        0xA, 0x5, 0xF, 0x6, 0x7, 0xC, 0x1, 0xB, 0x9, 0x2, 0x8, 0xD, 0x4, 0x3, 0xE, 0x0,
    ];

    let nibble = |shift: u32| ((device_id >> shift) & 0x0F) as u8;
    let checksum = LOOKUP[nibble(28) as usize]
        ^ nibble(24)
        ^ LOOKUP[nibble(20) as usize]
        ^ nibble(16)
        ^ LOOKUP[nibble(12) as usize]
        ^ nibble(8)
        ^ LOOKUP[nibble(4) as usize]
        ^ nibble(0);
    checksum == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{encode_frame, put_tlv};

    fn device(device_id: u32) -> DiscoveredDevice {
        DiscoveredDevice {
            ip_addr: Ipv4Addr::new(192, 168, 1, 50),
            device_type: DEVICE_TYPE_TUNER,
            device_id,
            tuner_count: 4,
            is_legacy: false,
            device_auth: "abcdefghijklmnopqrstuvwx".to_string(),
            base_url: "http://192.168.1.50:80".to_string(),
        }
    }

    #[test]
    fn test_request_layout() {
        let encoded = encode_discover_request(DEVICE_TYPE_TUNER, DEVICE_ID_WILDCARD);
        assert_eq!(&encoded[0..4], &[0x00, 0x02, 0x00, 0x0C]);
        assert_eq!(
            &encoded[4..16],
            &[0x01, 0x04, 0x00, 0x00, 0x00, 0x01, 0x02, 0x04, 0xFF, 0xFF, 0xFF, 0xFF]
        );

        let filter = decode_discover_request(&encoded).unwrap();
        assert!(filter.matches(DEVICE_TYPE_TUNER, 0x1040_A1B6));
        assert!(!filter.matches(0x0000_0005, 0x1040_A1B6));
    }

    #[test]
    fn test_reply_roundtrip() {
        let original = device(0x1040_A1B6);
        let encoded = encode_discover_reply(&original).unwrap();
        let decoded = decode_discover_reply(&encoded, original.ip_addr).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_reply_without_base_url_is_legacy() {
        let mut original = device(0x1040_A1B6);
        original.base_url.clear();
        original.device_auth.clear();
        let encoded = encode_discover_reply(&original).unwrap();
        let decoded = decode_discover_reply(&encoded, original.ip_addr).unwrap();
        assert!(decoded.is_legacy);
        assert!(decoded.device_auth.is_empty());
    }

    #[test]
    fn test_legacy_family_and_tuner_fixup() {
        let mut original = device(0x1010_0000);
        original.tuner_count = 0;
        let encoded = encode_discover_reply(&original).unwrap();
        let decoded = decode_discover_reply(&encoded, original.ip_addr).unwrap();
        assert!(decoded.is_legacy);
        assert_eq!(decoded.tuner_count, 2);
    }

    #[test]
    fn test_reply_strings_are_capped() {
        let mut payload = BytesMut::new();
        put_tlv_u32(&mut payload, tag::DEVICE_TYPE, DEVICE_TYPE_TUNER);
        put_tlv_u32(&mut payload, tag::DEVICE_ID, 0x1040_A1B6);
        put_tlv_str(&mut payload, tag::BASE_URL, &"x".repeat(60)).unwrap();
        put_tlv(&mut payload, 0x99, b"ignored").unwrap();
        let frame = encode_frame(PacketType::DiscoverReply.into(), &payload).unwrap();

        let decoded = decode_discover_reply(&frame, Ipv4Addr::LOCALHOST).unwrap();
        assert_eq!(decoded.base_url.len(), BASE_URL_CAPACITY - 1);
    }

    #[test]
    fn test_reply_missing_id() {
        let mut payload = BytesMut::new();
        put_tlv_u32(&mut payload, tag::DEVICE_TYPE, DEVICE_TYPE_TUNER);
        let frame = encode_frame(PacketType::DiscoverReply.into(), &payload).unwrap();
        assert_eq!(
            decode_discover_reply(&frame, Ipv4Addr::LOCALHOST),
            Err(FrameError::MissingField("device_id"))
        );
    }

    #[test]
    fn test_request_is_not_a_reply() {
        let encoded = encode_discover_request(DEVICE_TYPE_TUNER, DEVICE_ID_WILDCARD);
        assert!(matches!(
            decode_discover_reply(&encoded, Ipv4Addr::LOCALHOST),
            Err(FrameError::InvalidField { field: "packet_type", .. })
        ));
    }

    #[test]
    fn test_validate_device_id() {
        assert!(validate_device_id(0x1040_A1B6));
        assert!(validate_device_id(0x1010_0000));
        assert!(validate_device_id(0x10A2_C3DB));
        assert!(!validate_device_id(0x1040_A1B0));
    }

    #[test]
    fn test_legacy_thresholds() {
        assert!(is_legacy_device_id(0x1003_FFFF));
        assert!(!is_legacy_device_id(0x1004_0000));
        assert!(is_legacy_device_id(0x1220_0000));
        assert!(!is_legacy_device_id(0x1040_A1B6));
    }
}
