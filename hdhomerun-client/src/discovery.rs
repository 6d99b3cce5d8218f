//! Device discovery over UDP.
//!
//! One request is sent (broadcast or unicast), then replies are collected
//! until the timeout expires or enough distinct devices have answered.
//! There are no retries.

use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::Duration;

use hdhomerun_protocol::{
    decode_discover_reply, encode_discover_request, DiscoverFilter, DiscoveredDevice,
    DEVICE_ID_WILDCARD, DEVICE_TYPE_TUNER, DISCOVER_UDP_PORT,
};
use log::{debug, trace, warn};

use crate::config::ClientConfig;
use crate::error::TransportError;
use crate::transport::Transport;

/// Parameters for one discovery round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoverQuery {
    /// Unicast target; `None` broadcasts to `255.255.255.255`.
    pub target: Option<Ipv4Addr>,
    pub device_type: u32,
    pub device_id: u32,
    /// Stop once this many distinct devices are held. 0 means no limit.
    pub max_results: usize,
    pub timeout: Duration,
    pub port: u16,
}

impl Default for DiscoverQuery {
    fn default() -> Self {
        Self {
            target: None,
            device_type: DEVICE_TYPE_TUNER,
            device_id: DEVICE_ID_WILDCARD,
            max_results: 64,
            timeout: Duration::from_millis(500),
            port: DISCOVER_UDP_PORT,
        }
    }
}

impl DiscoverQuery {
    /// Broadcast query for all tuners using the configured port and limits.
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            max_results: config.max_results,
            timeout: config.discover_timeout(),
            port: config.discovery_port,
            ..Self::default()
        }
    }

    pub fn target(mut self, target: Ipv4Addr) -> Self {
        self.target = Some(target);
        self
    }

    pub fn device_type(mut self, device_type: u32) -> Self {
        self.device_type = device_type;
        self
    }

    pub fn device_id(mut self, device_id: u32) -> Self {
        self.device_id = device_id;
        self
    }

    pub fn max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn accepts(&self, device: &DiscoveredDevice) -> bool {
        let filter = DiscoverFilter {
            device_type: self.device_type,
            device_id: self.device_id,
        };
        filter.matches(device.device_type, device.device_id)
    }

    fn is_full(&self, found: usize) -> bool {
        self.max_results != 0 && found >= self.max_results
    }
}

/// Run one discovery round.
///
/// Devices are returned in first-seen order, deduplicated by
/// `(device_id, ip_addr)`; a repeated reply replaces the earlier entry in
/// place. Replies that fail to decode or do not match the query filters are
/// dropped.
pub async fn discover(
    transport: &dyn Transport,
    query: &DiscoverQuery,
) -> Result<Vec<DiscoveredDevice>, TransportError> {
    let request = encode_discover_request(query.device_type, query.device_id);

    let mut socket = transport.open_datagram().await?;
    let dest = SocketAddrV4::new(query.target.unwrap_or(Ipv4Addr::BROADCAST), query.port);
    socket.send_to(&request, dest).await?;
    debug!(
        "Sent discovery request to {} (type={:08X}, id={:08X})",
        dest, query.device_type, query.device_id
    );

    let mut devices: Vec<DiscoveredDevice> = Vec::new();
    let mut dropped = 0usize;
    let deadline = tokio::time::Instant::now() + query.timeout;

    while !query.is_full(devices.len()) {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            break;
        }

        let (data, src_ip) = match socket.recv_from(remaining).await {
            Ok(Some(datagram)) => datagram,
            Ok(None) => break,
            Err(e) => {
                warn!("Discovery receive failed: {}", e);
                break;
            }
        };

        let device = match decode_discover_reply(&data, src_ip) {
            Ok(device) => device,
            Err(e) => {
                trace!("Dropping reply from {}: {}", src_ip, e);
                dropped += 1;
                continue;
            }
        };
        if !query.accepts(&device) {
            trace!(
                "Dropping reply from {}: {:08X} does not match filter",
                src_ip,
                device.device_id
            );
            dropped += 1;
            continue;
        }

        trace!("Discovered {:08X} at {}", device.device_id, device.ip_addr);
        match devices.iter_mut().find(|d| d.key() == device.key()) {
            Some(existing) => *existing = device,
            None => devices.push(device),
        }
    }

    debug!(
        "Discovery complete: {} device(s), {} reply(ies) dropped",
        devices.len(),
        dropped
    );
    Ok(devices)
}
