//! Text and JSON rendering of command results.

use std::net::Ipv4Addr;

use hdhomerun_client::{ChannelScanResult, DiscoveredDevice, ScanState, TunerStatus};
use serde::Serialize;

/// What `info` reports about one tuner.
#[derive(Debug, Serialize)]
pub struct DeviceInfo {
    pub device_id: String,
    pub ip_addr: Ipv4Addr,
    pub tuner: u32,
    pub model: String,
    pub channelmap: Option<String>,
    pub status: Option<TunerStatus>,
}

/// What `scan` reports once the scan stops.
#[derive(Debug, Serialize)]
pub struct ScanReport<'a> {
    pub channelmap: &'a str,
    pub scan_group: Option<&'a str>,
    pub state: ScanState,
    pub progress: u8,
    pub channels: &'a [ChannelScanResult],
}

pub fn device_line(device: &DiscoveredDevice) -> String {
    let mut line = format!(
        "hdhomerun device {:08X} found at {}",
        device.device_id, device.ip_addr
    );
    if device.is_legacy {
        line.push_str(" (legacy)");
    }
    line
}

pub fn status_line(status: &TunerStatus) -> String {
    format!(
        "ch={} lock={} ss={} snq={} seq={} bps={} pps={}",
        status.channel,
        status.lock_str,
        status.signal_strength,
        status.signal_to_noise_quality,
        status.symbol_error_quality,
        status.raw_bits_per_second,
        status.packets_per_second
    )
}

pub fn info_lines(info: &DeviceInfo) -> Vec<String> {
    let mut lines = vec![
        format!("device: {}-{} at {}", info.device_id, info.tuner, info.ip_addr),
        format!("model: {}", info.model),
    ];
    if let Some(channelmap) = &info.channelmap {
        lines.push(format!("channelmap: {}", channelmap));
    }
    if let Some(status) = &info.status {
        lines.push(format!("status: {}", status_line(status)));
    }
    lines
}

/// Lines for one locked channel, in the style of a scan log.
pub fn channel_lines(result: &ChannelScanResult) -> Vec<String> {
    let mut lines = vec![
        format!("SCANNING: {} ({})", result.frequency, result.channel_str),
        format!(
            "LOCK: {} (ss={} snq={} seq={})",
            result.status.lock_str,
            result.status.signal_strength,
            result.status.signal_to_noise_quality,
            result.status.symbol_error_quality
        ),
    ];
    if let Some(tsid) = result.transport_stream_id {
        lines.push(format!("TSID: 0x{:04X}", tsid));
    }
    if let Some(onid) = result.original_network_id {
        lines.push(format!("ONID: 0x{:04X}", onid));
    }
    lines.extend(
        result
            .programs
            .iter()
            .map(|program| format!("PROGRAM {}", program.program)),
    );
    lines
}

pub fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hdhomerun_client::{ChannelScanProgram, ProgramType};

    fn device() -> DiscoveredDevice {
        DiscoveredDevice {
            ip_addr: Ipv4Addr::new(192, 168, 1, 20),
            device_type: 1,
            device_id: 0x1040_A1B6,
            tuner_count: 2,
            is_legacy: false,
            device_auth: String::new(),
            base_url: "http://192.168.1.20:80".to_string(),
        }
    }

    #[test]
    fn test_device_line() {
        let mut device = device();
        assert_eq!(
            device_line(&device),
            "hdhomerun device 1040A1B6 found at 192.168.1.20"
        );
        device.is_legacy = true;
        assert!(device_line(&device).ends_with("(legacy)"));
    }

    #[test]
    fn test_channel_lines() {
        let result = ChannelScanResult {
            channel_str: "us-bcast:7".to_string(),
            channelmap: 0,
            frequency: 177_000_000,
            status: TunerStatus::parse("ch=8vsb:177000000 lock=8vsb ss=85 snq=90 seq=100"),
            programs: vec![ChannelScanProgram {
                program: "3: 7.1 WSBK".to_string(),
                program_number: 3,
                virtual_major: 7,
                virtual_minor: 1,
                program_type: ProgramType::Normal,
                name: "WSBK".to_string(),
            }],
            transport_stream_id: Some(0x0811),
            original_network_id: None,
        };

        assert_eq!(
            channel_lines(&result),
            [
                "SCANNING: 177000000 (us-bcast:7)",
                "LOCK: 8vsb (ss=85 snq=90 seq=100)",
                "TSID: 0x0811",
                "PROGRAM 3: 7.1 WSBK",
            ]
        );
    }

    #[test]
    fn test_info_lines_skip_missing_fields() {
        let info = DeviceInfo {
            device_id: "1040A1B6".to_string(),
            ip_addr: Ipv4Addr::new(192, 168, 1, 20),
            tuner: 1,
            model: "hdhomerun4_atsc".to_string(),
            channelmap: None,
            status: None,
        };
        assert_eq!(
            info_lines(&info),
            ["device: 1040A1B6-1 at 192.168.1.20", "model: hdhomerun4_atsc"]
        );
    }

    #[test]
    fn test_json_device_list() {
        let json = to_json(&[device()][..]).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed[0]["device_id"], 0x1040_A1B6u32);
        assert_eq!(parsed[0]["ip_addr"], "192.168.1.20");
        assert_eq!(parsed[0]["tuner_count"], 2);
    }
}
