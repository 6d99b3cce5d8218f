//! Control handle for one tuner on one device.
//!
//! The TCP control connection is opened lazily by the first operation and
//! closed on timeout, transport or decode failure. A well-formed error reply
//! leaves it open.
//!
//! A connection found closed while sending is reopened once and the request
//! sent again. Once a request is out it is never repeated: commands such as
//! `channelscan/advance` move device state, so a close seen while waiting for
//! the reply is returned as [`ControlError::ConnectionClosed`].

use std::fmt;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use hdhomerun_protocol::{
    decode_c_str, decode_getset_reply, decode_scan_result, encode_getset_request, peek_frame_len,
    validate_device_id, ChannelScanResult, DiscoveredDevice, FrameError, GetSetReply,
    TunerStatus, DEVICE_ID_WILDCARD, DEVICE_TYPE_TUNER, MAX_TUNE_TO_DATA_TIME_MS,
};
use log::{debug, trace, warn};

use crate::config::ClientConfig;
use crate::discovery::{discover, DiscoverQuery};
use crate::error::{ControlError, DeviceStrError};
use crate::transport::{Connection, Transport};

const UNKNOWN_VARIABLE_PREFIX: &str = "ERROR: unknown getset variable";
const RECV_CHUNK_SIZE: usize = 4096;

/// Which device a handle addresses, as written by the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceSelector {
    Id { device_id: u32, tuner: u32 },
    Ip { ip: Ipv4Addr, tuner: u32 },
}

impl DeviceSelector {
    pub fn tuner(&self) -> u32 {
        match *self {
            DeviceSelector::Id { tuner, .. } | DeviceSelector::Ip { tuner, .. } => tuner,
        }
    }
}

impl FromStr for DeviceSelector {
    type Err = DeviceStrError;

    /// Parse `"<hex id>[-<tuner>]"` or `"<ipv4>[-<tuner>]"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(DeviceStrError::Empty);
        }

        let (base, tuner) = match s.split_once('-') {
            Some((base, tuner)) => {
                let tuner = tuner
                    .parse::<u32>()
                    .map_err(|_| DeviceStrError::InvalidTuner(tuner.to_string()))?;
                (base, tuner)
            }
            None => (s, 0),
        };

        if base.contains('.') {
            let ip = base
                .parse::<Ipv4Addr>()
                .map_err(|_| DeviceStrError::InvalidFormat(s.to_string()))?;
            return Ok(DeviceSelector::Ip { ip, tuner });
        }

        if base.len() > 8 || !base.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(DeviceStrError::InvalidFormat(s.to_string()));
        }
        let device_id = u32::from_str_radix(base, 16)
            .map_err(|_| DeviceStrError::InvalidFormat(s.to_string()))?;
        if !validate_device_id(device_id) {
            return Err(DeviceStrError::InvalidDeviceId(device_id));
        }
        Ok(DeviceSelector::Id { device_id, tuner })
    }
}

/// A handle to one tuner.
pub struct DeviceHandle {
    transport: Arc<dyn Transport>,
    config: ClientConfig,
    device_id: u32,
    device_ip: Ipv4Addr,
    tuner_index: u32,
    lockkey: Option<u32>,
    connection: Option<Box<dyn Connection>>,
    recv_buf: BytesMut,
}

impl fmt::Debug for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceHandle")
            .field("device_id", &format_args!("{:08X}", self.device_id))
            .field("device_ip", &self.device_ip)
            .field("tuner_index", &self.tuner_index)
            .field("connected", &self.connection.is_some())
            .finish()
    }
}

impl DeviceHandle {
    /// Create a handle. Either identity may be unresolved: a wildcard id is
    /// looked up from the IP, an unspecified or broadcast IP from the id.
    pub fn new(
        transport: Arc<dyn Transport>,
        config: ClientConfig,
        device_id: u32,
        device_ip: Ipv4Addr,
        tuner_index: u32,
    ) -> Self {
        Self {
            transport,
            config,
            device_id,
            device_ip,
            tuner_index,
            lockkey: None,
            connection: None,
            recv_buf: BytesMut::new(),
        }
    }

    pub fn from_discovered(
        transport: Arc<dyn Transport>,
        config: ClientConfig,
        device: &DiscoveredDevice,
        tuner_index: u32,
    ) -> Self {
        Self::new(
            transport,
            config,
            device.device_id,
            device.ip_addr,
            tuner_index,
        )
    }

    pub fn from_selector(
        transport: Arc<dyn Transport>,
        config: ClientConfig,
        selector: DeviceSelector,
    ) -> Self {
        match selector {
            DeviceSelector::Id { device_id, tuner } => {
                Self::new(transport, config, device_id, Ipv4Addr::UNSPECIFIED, tuner)
            }
            DeviceSelector::Ip { ip, tuner } => {
                Self::new(transport, config, DEVICE_ID_WILDCARD, ip, tuner)
            }
        }
    }

    /// Create a handle from a device string, see [`DeviceSelector`].
    pub fn from_device_str(
        transport: Arc<dyn Transport>,
        config: ClientConfig,
        s: &str,
    ) -> Result<Self, DeviceStrError> {
        let selector = s.parse::<DeviceSelector>()?;
        Ok(Self::from_selector(transport, config, selector))
    }

    pub fn tuner_index(&self) -> u32 {
        self.tuner_index
    }

    pub fn set_tuner_index(&mut self, tuner_index: u32) {
        self.tuner_index = tuner_index;
    }

    /// Lock key sent with set requests.
    pub fn set_lockkey(&mut self, lockkey: Option<u32>) {
        self.lockkey = lockkey;
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Device id, discovering it from the IP on first use if needed.
    pub async fn get_device_id(&mut self) -> Result<u32, ControlError> {
        if self.device_id != DEVICE_ID_WILDCARD {
            return Ok(self.device_id);
        }
        let query = DiscoverQuery::from_config(&self.config)
            .target(self.device_ip)
            .device_type(DEVICE_TYPE_TUNER)
            .max_results(1);
        let device = discover_one(self.transport.as_ref(), &query).await?;
        self.device_id = device.device_id;
        Ok(self.device_id)
    }

    /// Device IP, discovering it from the id on first use if needed.
    pub async fn get_device_ip(&mut self) -> Result<Ipv4Addr, ControlError> {
        if !is_unresolved_ip(self.device_ip) {
            return Ok(self.device_ip);
        }
        let query = DiscoverQuery::from_config(&self.config)
            .device_type(DEVICE_TYPE_TUNER)
            .device_id(self.device_id)
            .max_results(1);
        let device = discover_one(self.transport.as_ref(), &query).await?;
        self.device_ip = device.ip_addr;
        Ok(self.device_ip)
    }

    pub async fn get_model_str(&mut self) -> Result<String, ControlError> {
        self.get_var("/sys/model").await
    }

    pub async fn get_tuner_channelmap(&mut self) -> Result<String, ControlError> {
        let name = self.tuner_var("channelmap");
        self.get_var(&name).await
    }

    pub async fn get_tuner_status(&mut self) -> Result<TunerStatus, ControlError> {
        let name = self.tuner_var("status");
        let value = self.get_var(&name).await?;
        Ok(TunerStatus::parse(&value))
    }

    pub async fn set_channelscan_channelmap(&mut self, channelmap: &str) -> Result<(), ControlError> {
        let name = self.tuner_var("channelscan/channelmap");
        self.set_var(&name, channelmap).await.map(drop)
    }

    /// Reset the device's scan cursor to the start of `scan_group`.
    pub async fn channelscan_init(&mut self, scan_group: &str) -> Result<(), ControlError> {
        let name = self.tuner_var("channelscan/init");
        self.set_var(&name, scan_group).await.map(drop)
    }

    /// Tune the next channel in the scan group. `None` once the group is
    /// exhausted.
    pub async fn channelscan_advance(&mut self) -> Result<Option<ChannelScanResult>, ControlError> {
        let name = self.tuner_var("channelscan/advance");
        self.get_scan_record(&name).await
    }

    /// Re-read the programs on the current scan channel. `None` if the
    /// device has nothing to report.
    pub async fn channelscan_detect(&mut self) -> Result<Option<ChannelScanResult>, ControlError> {
        let name = self.tuner_var("channelscan/detect");
        self.get_scan_record(&name).await
    }

    /// Scan progress in percent, clamped to 100.
    pub async fn channelscan_get_progress(&mut self) -> Result<u8, ControlError> {
        let name = self.tuner_var("channelscan/progress");
        let value = self.get_var(&name).await?;
        let progress = value.trim().parse::<u32>().map_err(|_| {
            ControlError::Protocol(FrameError::InvalidField {
                field: "progress",
                value: 0,
            })
        })?;
        Ok(progress.min(100) as u8)
    }

    async fn get_scan_record(&mut self, name: &str) -> Result<Option<ChannelScanResult>, ControlError> {
        let timeout =
            self.config.control_timeout() + Duration::from_millis(MAX_TUNE_TO_DATA_TIME_MS);
        let value = self.request(name, None, timeout).await?;
        if value.iter().all(|&b| b == 0) {
            return Ok(None);
        }
        match decode_scan_result(&value) {
            Ok(result) => Ok(Some(result)),
            Err(e) => {
                self.close().await;
                Err(e.into())
            }
        }
    }

    /// Get a variable as a string.
    pub async fn get_var(&mut self, name: &str) -> Result<String, ControlError> {
        let timeout = self.config.control_timeout();
        let value = self.request(name, None, timeout).await?;
        Ok(decode_c_str(&value))
    }

    /// Set a variable, returning the value the device echoes back.
    pub async fn set_var(&mut self, name: &str, value: &str) -> Result<String, ControlError> {
        let timeout = self.config.control_timeout();
        let echoed = self.request(name, Some(value), timeout).await?;
        Ok(decode_c_str(&echoed))
    }

    /// Close the control connection. The next operation reopens it.
    pub async fn close(&mut self) {
        if let Some(mut connection) = self.connection.take() {
            connection.close().await;
            debug!("Closed control connection to {}", self.device_ip);
        }
        self.recv_buf.clear();
    }

    fn tuner_var(&self, suffix: &str) -> String {
        format!("/tuner{}/{}", self.tuner_index, suffix)
    }

    async fn request(
        &mut self,
        name: &str,
        value: Option<&str>,
        timeout: Duration,
    ) -> Result<Bytes, ControlError> {
        let lockkey = value.and(self.lockkey);
        let frame = encode_getset_request(name, value, lockkey)?;

        let reply = self.roundtrip(name, &frame, timeout).await?;
        if reply.name != name {
            trace!("Reply names {:?}, expected {:?}", reply.name, name);
        }
        reply_value(name, reply)
    }

    async fn roundtrip(
        &mut self,
        name: &str,
        frame: &[u8],
        timeout: Duration,
    ) -> Result<GetSetReply, ControlError> {
        let result = match self.send_frame(frame).await {
            Err(ControlError::ConnectionClosed) => {
                debug!("Connection to {} was closed, resending {}", self.device_ip, name);
                self.close().await;
                self.send_frame(frame).await
            }
            other => other,
        };
        let result = match result {
            Ok(()) => self.receive_reply(timeout).await,
            Err(e) => Err(e),
        };

        if let Err(e) = &result {
            warn!("Control request {} to {} failed: {}", name, self.device_ip, e);
            self.close().await;
        }
        result
    }

    async fn send_frame(&mut self, frame: &[u8]) -> Result<(), ControlError> {
        self.ensure_connected().await?;
        let connection = self
            .connection
            .as_mut()
            .ok_or(ControlError::ConnectionClosed)?;
        connection.send(frame).await?;
        Ok(())
    }

    async fn receive_reply(&mut self, timeout: Duration) -> Result<GetSetReply, ControlError> {
        let connection = self
            .connection
            .as_mut()
            .ok_or(ControlError::ConnectionClosed)?;

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(len) = peek_frame_len(&self.recv_buf) {
                if self.recv_buf.len() >= len {
                    let reply = self.recv_buf.split_to(len);
                    return Ok(decode_getset_reply(&reply)?);
                }
            }

            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Err(ControlError::Timeout);
            }
            let chunk = connection.recv(RECV_CHUNK_SIZE, remaining).await?;
            self.recv_buf.extend_from_slice(&chunk);
        }
    }

    async fn ensure_connected(&mut self) -> Result<(), ControlError> {
        if self.connection.is_some() {
            return Ok(());
        }

        let ip = self.get_device_ip().await?;
        let addr = SocketAddrV4::new(ip, self.config.control_port);
        let connection = self
            .transport
            .connect(addr, self.config.connect_timeout())
            .await
            .map_err(|e| ControlError::Unreachable(format!("{}: {}", addr, e)))?;
        debug!("Opened control connection to {}", addr);

        self.recv_buf.clear();
        self.connection = Some(connection);
        Ok(())
    }
}

async fn discover_one(
    transport: &dyn Transport,
    query: &DiscoverQuery,
) -> Result<DiscoveredDevice, ControlError> {
    let devices = discover(transport, query)
        .await
        .map_err(|e| ControlError::Unreachable(e.to_string()))?;
    devices.into_iter().next().ok_or_else(|| {
        ControlError::Unreachable(format!(
            "no reply for id {:08X} at {}",
            query.device_id,
            query.target.unwrap_or(Ipv4Addr::BROADCAST)
        ))
    })
}

fn is_unresolved_ip(ip: Ipv4Addr) -> bool {
    ip.is_unspecified() || ip.is_broadcast()
}

fn reply_value(name: &str, reply: GetSetReply) -> Result<Bytes, ControlError> {
    if let Some(message) = reply.error {
        if message.starts_with(UNKNOWN_VARIABLE_PREFIX) {
            return Err(ControlError::Unsupported(name.to_string()));
        }
        return Err(ControlError::Rejected(message));
    }
    reply
        .value
        .ok_or_else(|| ControlError::Unsupported(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selector_id() {
        assert_eq!(
            "1040A1B6".parse::<DeviceSelector>().unwrap(),
            DeviceSelector::Id {
                device_id: 0x1040_A1B6,
                tuner: 0
            }
        );
        assert_eq!(
            "1040a1b6-1".parse::<DeviceSelector>().unwrap(),
            DeviceSelector::Id {
                device_id: 0x1040_A1B6,
                tuner: 1
            }
        );
    }

    #[test]
    fn test_selector_ip() {
        let selector = "192.168.1.50-2".parse::<DeviceSelector>().unwrap();
        assert_eq!(
            selector,
            DeviceSelector::Ip {
                ip: Ipv4Addr::new(192, 168, 1, 50),
                tuner: 2
            }
        );
        assert_eq!(selector.tuner(), 2);
    }

    #[test]
    fn test_selector_errors() {
        assert_eq!("".parse::<DeviceSelector>(), Err(DeviceStrError::Empty));
        assert_eq!(
            "1040A1B0".parse::<DeviceSelector>(),
            Err(DeviceStrError::InvalidDeviceId(0x1040_A1B0))
        );
        assert!(matches!(
            "1040A1B6-x".parse::<DeviceSelector>(),
            Err(DeviceStrError::InvalidTuner(_))
        ));
        assert!(matches!(
            "192.168.1".parse::<DeviceSelector>(),
            Err(DeviceStrError::InvalidFormat(_))
        ));
        assert!(matches!(
            "tuner0".parse::<DeviceSelector>(),
            Err(DeviceStrError::InvalidFormat(_))
        ));
        assert!(matches!(
            "11040A1B6".parse::<DeviceSelector>(),
            Err(DeviceStrError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_reply_value_classification() {
        let reply = |value: Option<&[u8]>, error: Option<&str>| GetSetReply {
            name: "/sys/x".to_string(),
            value: value.map(Bytes::copy_from_slice),
            error: error.map(str::to_string),
        };

        assert_eq!(
            reply_value("/sys/x", reply(Some(&b"ok\0"[..]), None)).unwrap(),
            Bytes::from_static(b"ok\0")
        );
        assert_eq!(
            reply_value("/sys/x", reply(None, None)),
            Err(ControlError::Unsupported("/sys/x".to_string()))
        );
        assert_eq!(
            reply_value(
                "/sys/x",
                reply(None, Some("ERROR: unknown getset variable"))
            ),
            Err(ControlError::Unsupported("/sys/x".to_string()))
        );
        assert_eq!(
            reply_value("/sys/x", reply(None, Some("ERROR: resource locked"))),
            Err(ControlError::Rejected("ERROR: resource locked".to_string()))
        );
    }
}
