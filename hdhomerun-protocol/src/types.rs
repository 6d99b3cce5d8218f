//! Constants and data types shared by the discovery and control protocols.

use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

/// UDP port devices listen on for discovery requests.
pub const DISCOVER_UDP_PORT: u16 = 65001;

/// TCP port devices accept control connections on.
pub const CONTROL_TCP_PORT: u16 = 65001;

/// Frame header size: 2 (type) + 2 (length) = 4 bytes.
pub const HEADER_SIZE: usize = 4;

/// CRC trailer size.
pub const TRAILER_SIZE: usize = 4;

/// Largest payload a single frame can carry.
pub const MAX_PAYLOAD_SIZE: usize = u16::MAX as usize - HEADER_SIZE - TRAILER_SIZE;

/// Largest value a single TLV field can carry (two-byte variable length).
pub const MAX_TLV_VALUE_SIZE: usize = 0x7FFF;

/// Matches any device type in a discovery filter.
pub const DEVICE_TYPE_WILDCARD: u32 = 0xFFFF_FFFF;

/// Device type reported by tuner devices.
pub const DEVICE_TYPE_TUNER: u32 = 0x0000_0001;

/// Matches any device id in a discovery filter.
pub const DEVICE_ID_WILDCARD: u32 = 0xFFFF_FFFF;

/// Worst-case time for a tuner to lock after a tune request (ms).
pub const MAX_TUNE_TO_LOCK_TIME_MS: u64 = 1500;

/// Worst-case time from lock to the first transport stream data (ms).
pub const MAX_LOCK_TO_DATA_TIME_MS: u64 = 2000;

/// Worst-case time from a tune request to data (ms).
pub const MAX_TUNE_TO_DATA_TIME_MS: u64 = MAX_TUNE_TO_LOCK_TIME_MS + MAX_LOCK_TO_DATA_TIME_MS;

/// Maximum number of programs reported for one scanned channel.
pub const CHANNELSCAN_MAX_PROGRAM_COUNT: usize = 64;

/// Status colours (ARGB) used by signal quality helpers.
pub const STATUS_COLOR_NEUTRAL: u32 = 0xFFFF_FFFF;
pub const STATUS_COLOR_RED: u32 = 0xFFFF_0000;
pub const STATUS_COLOR_YELLOW: u32 = 0xFFFF_FF00;
pub const STATUS_COLOR_GREEN: u32 = 0xFF00_C000;

/// Fixed string capacities (including the terminating NUL).
pub const DEVICE_AUTH_CAPACITY: usize = 25;
pub const BASE_URL_CAPACITY: usize = 29;
pub const STATUS_STR_CAPACITY: usize = 32;
pub const CHANNEL_STR_CAPACITY: usize = 64;
pub const PROGRAM_STR_CAPACITY: usize = 64;
pub const PROGRAM_NAME_CAPACITY: usize = 32;

/// Packet type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum PacketType {
    /// Discovery request (client to device, UDP).
    DiscoverRequest = 0x0002,
    /// Discovery reply (device to client, UDP).
    DiscoverReply = 0x0003,
    /// Get/set request (client to device, TCP).
    GetSetRequest = 0x0004,
    /// Get/set reply (device to client, TCP).
    GetSetReply = 0x0005,
}

impl TryFrom<u16> for PacketType {
    type Error = u16;

    fn try_from(value: u16) -> Result<Self, u16> {
        match value {
            0x0002 => Ok(PacketType::DiscoverRequest),
            0x0003 => Ok(PacketType::DiscoverReply),
            0x0004 => Ok(PacketType::GetSetRequest),
            0x0005 => Ok(PacketType::GetSetReply),
            _ => Err(value),
        }
    }
}

impl From<PacketType> for u16 {
    fn from(value: PacketType) -> Self {
        value as u16
    }
}

/// TLV tags carried inside frame payloads.
pub mod tag {
    pub const DEVICE_TYPE: u8 = 0x01;
    pub const DEVICE_ID: u8 = 0x02;
    pub const GETSET_NAME: u8 = 0x03;
    pub const GETSET_VALUE: u8 = 0x04;
    pub const ERROR_MESSAGE: u8 = 0x05;
    pub const TUNER_COUNT: u8 = 0x10;
    pub const GETSET_LOCKKEY: u8 = 0x15;
    pub const BASE_URL: u8 = 0x2A;
    pub const DEVICE_AUTH_STR: u8 = 0x2B;
}

/// A device found by one discovery round.
///
/// Identity is `(device_id, ip_addr)`; see [`DiscoveredDevice::key`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredDevice {
    pub ip_addr: Ipv4Addr,
    pub device_type: u32,
    pub device_id: u32,
    pub tuner_count: u8,
    pub is_legacy: bool,
    /// Device authorisation string (at most 24 bytes).
    pub device_auth: String,
    /// HTTP base URL (at most 28 bytes).
    pub base_url: String,
}

impl DiscoveredDevice {
    /// Deduplication key.
    pub fn key(&self) -> (u32, Ipv4Addr) {
        (self.device_id, self.ip_addr)
    }
}

/// Snapshot of a tuner's signal state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunerStatus {
    pub channel: String,
    pub lock_str: String,
    pub signal_present: bool,
    pub lock_supported: bool,
    pub lock_unsupported: bool,
    pub signal_strength: u32,
    pub signal_to_noise_quality: u32,
    pub symbol_error_quality: u32,
    pub raw_bits_per_second: u32,
    pub packets_per_second: u32,
}

/// Program classification reported by a channel scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum ProgramType {
    Normal = 0,
    NoData = 1,
    Control = 2,
    Encrypted = 3,
}

impl TryFrom<u16> for ProgramType {
    type Error = u16;

    fn try_from(value: u16) -> Result<Self, u16> {
        match value {
            0 => Ok(ProgramType::Normal),
            1 => Ok(ProgramType::NoData),
            2 => Ok(ProgramType::Control),
            3 => Ok(ProgramType::Encrypted),
            _ => Err(value),
        }
    }
}

impl From<ProgramType> for u16 {
    fn from(value: ProgramType) -> Self {
        value as u16
    }
}

/// One program (service) found on a scanned channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelScanProgram {
    /// Program descriptor, e.g. `"3: 7.1 WSBK"` (at most 63 bytes).
    pub program: String,
    pub program_number: u16,
    pub virtual_major: u16,
    pub virtual_minor: u16,
    pub program_type: ProgramType,
    /// Short service name (at most 31 bytes).
    pub name: String,
}

/// Outcome of scanning one candidate channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelScanResult {
    /// Channel descriptor, e.g. `"us-bcast:7"` (at most 63 bytes).
    pub channel_str: String,
    pub channelmap: u32,
    pub frequency: u32,
    pub status: TunerStatus,
    /// Programs on the channel, at most [`CHANNELSCAN_MAX_PROGRAM_COUNT`].
    pub programs: Vec<ChannelScanProgram>,
    pub transport_stream_id: Option<u16>,
    pub original_network_id: Option<u16>,
}

impl ChannelScanResult {
    /// Returns true if the tuner locked onto this channel.
    pub fn is_locked(&self) -> bool {
        self.status.lock_supported
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_type_roundtrip() {
        let types = [
            PacketType::DiscoverRequest,
            PacketType::DiscoverReply,
            PacketType::GetSetRequest,
            PacketType::GetSetReply,
        ];

        for packet_type in types {
            let value: u16 = packet_type.into();
            assert_eq!(PacketType::try_from(value).unwrap(), packet_type);
        }
        assert_eq!(PacketType::try_from(0x0006), Err(0x0006));
    }

    #[test]
    fn test_program_type_rejects_unknown() {
        assert_eq!(ProgramType::try_from(3).unwrap(), ProgramType::Encrypted);
        assert!(ProgramType::try_from(4).is_err());
    }

    #[test]
    fn test_tune_to_data_time() {
        assert_eq!(MAX_TUNE_TO_DATA_TIME_MS, 3500);
        assert_eq!(MAX_PAYLOAD_SIZE, 65535 - 8);
    }
}
