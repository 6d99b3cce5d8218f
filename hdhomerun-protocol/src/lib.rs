//! Wire protocol definitions for HDHomeRun discovery and control.
//!
//! Both the UDP discovery exchange and the TCP get/set exchange use the same
//! frame format:
//!
//! ```text
//! +--------+--------+------------------+--------+
//! | Type   | Length |  TLV payload     | CRC32  |
//! | u16 BE | u16 BE |  (Length bytes)  | u32 BE |
//! +--------+--------+------------------+--------+
//! ```
//!
//! The CRC is the standard reflected CRC-32 over type, length and payload.
//! Payload fields are `tag:u8`, a one- or two-byte length, then the value.
//!
//! # Example
//!
//! ```rust
//! use hdhomerun_protocol::{decode_getset_reply, encode_getset_reply, encode_getset_request};
//!
//! let request = encode_getset_request("/sys/model", None, None).unwrap();
//! assert_eq!(&request[0..2], &[0x00, 0x04]);
//!
//! let reply = encode_getset_reply("/sys/model", Ok(&b"hdhomerun4_atsc\0"[..])).unwrap();
//! let decoded = decode_getset_reply(&reply).unwrap();
//! assert_eq!(decoded.value_str().as_deref(), Some("hdhomerun4_atsc"));
//! ```

pub mod codec;
pub mod control;
pub mod discover;
pub mod error;
pub mod scan;
pub mod status;
pub mod types;

pub use codec::{crc32, decode_c_str, decode_frame, encode_frame, peek_frame_len, TlvReader};
pub use control::{
    decode_getset_reply, decode_getset_request, encode_getset_reply, encode_getset_request,
    GetSetReply, GetSetRequest,
};
pub use discover::{
    decode_discover_reply, decode_discover_request, encode_discover_reply,
    encode_discover_request, is_legacy_device_id, validate_device_id, DiscoverFilter,
};
pub use error::FrameError;
pub use scan::{decode_scan_result, encode_scan_result};
pub use types::{
    ChannelScanProgram, ChannelScanResult, DiscoveredDevice, PacketType, ProgramType,
    TunerStatus, CHANNELSCAN_MAX_PROGRAM_COUNT, CONTROL_TCP_PORT, DEVICE_ID_WILDCARD,
    DEVICE_TYPE_TUNER, DEVICE_TYPE_WILDCARD, DISCOVER_UDP_PORT, HEADER_SIZE, MAX_PAYLOAD_SIZE,
    MAX_TUNE_TO_DATA_TIME_MS, STATUS_COLOR_GREEN, STATUS_COLOR_NEUTRAL, STATUS_COLOR_RED,
    STATUS_COLOR_YELLOW, TRAILER_SIZE,
};
