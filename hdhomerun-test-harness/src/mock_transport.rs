//! Scripted in-memory [`Transport`].
//!
//! Discovery replies are scripted per device with a delay measured from the
//! moment the request is sent; control connections are served by
//! [`SimulatedTuner`]s registered by IP. Timing uses the tokio clock, so
//! tests can run with a paused clock.

use std::collections::{HashMap, VecDeque};
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use hdhomerun_client::{Connection, DatagramSocket, Transport, TransportError};
use hdhomerun_protocol::{decode_discover_request, encode_discover_reply, DiscoveredDevice};
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::simulated_tuner::{SimulatedTuner, TunerResponse};

#[derive(Debug, Clone)]
enum ScriptedReply {
    /// Answers requests whose filters and target match the device.
    Device {
        delay: Duration,
        device: DiscoveredDevice,
    },
    /// Sent in response to any request.
    Raw {
        delay: Duration,
        src: Ipv4Addr,
        data: Bytes,
    },
}

#[derive(Debug, Default)]
struct MockState {
    replies: Vec<ScriptedReply>,
    sent: Vec<(Bytes, SocketAddrV4)>,
    tuners: HashMap<Ipv4Addr, SimulatedTuner>,
    connects: Vec<SocketAddrV4>,
    chunk_size: Option<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Have `device` answer matching discovery requests after `delay`.
    pub fn add_device(&self, delay: Duration, device: DiscoveredDevice) {
        self.state
            .lock()
            .replies
            .push(ScriptedReply::Device { delay, device });
    }

    /// Deliver `data` from `src` after `delay`, whatever the request.
    pub fn add_raw_reply(&self, delay: Duration, src: Ipv4Addr, data: Bytes) {
        self.state
            .lock()
            .replies
            .push(ScriptedReply::Raw { delay, src, data });
    }

    /// Serve control connections to `ip` from `tuner`.
    pub fn add_tuner(&self, ip: Ipv4Addr, tuner: SimulatedTuner) {
        self.state.lock().tuners.insert(ip, tuner);
    }

    /// Split control replies into reads of at most `size` bytes.
    pub fn set_chunk_size(&self, size: usize) {
        self.state.lock().chunk_size = Some(size.max(1));
    }

    /// Datagrams sent so far, with their destinations.
    pub fn sent_datagrams(&self) -> Vec<(Bytes, SocketAddrV4)> {
        self.state.lock().sent.clone()
    }

    /// Number of control connections opened so far.
    pub fn connect_count(&self) -> usize {
        self.state.lock().connects.len()
    }

    pub fn connected_addrs(&self) -> Vec<SocketAddrV4> {
        self.state.lock().connects.clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open_datagram(&self) -> Result<Box<dyn DatagramSocket>, TransportError> {
        Ok(Box::new(MockDatagram {
            state: Arc::clone(&self.state),
            inbox: VecDeque::new(),
        }))
    }

    async fn connect(
        &self,
        addr: SocketAddrV4,
        _timeout: Duration,
    ) -> Result<Box<dyn Connection>, TransportError> {
        let mut state = self.state.lock();
        state.connects.push(addr);
        let tuner = state.tuners.get(addr.ip()).cloned().ok_or_else(|| {
            TransportError::Io(std::io::Error::from(std::io::ErrorKind::ConnectionRefused))
        })?;
        Ok(Box::new(MockConnection {
            epoch: tuner.epoch(),
            tuner,
            pending: BytesMut::new(),
            closed: false,
            chunk_size: state.chunk_size,
        }))
    }
}

struct MockDatagram {
    state: Arc<Mutex<MockState>>,
    inbox: VecDeque<(Instant, Bytes, Ipv4Addr)>,
}

#[async_trait]
impl DatagramSocket for MockDatagram {
    async fn send_to(&mut self, data: &[u8], addr: SocketAddrV4) -> Result<(), TransportError> {
        let now = Instant::now();
        let mut state = self.state.lock();
        state.sent.push((Bytes::copy_from_slice(data), addr));

        let filter = decode_discover_request(data).ok();
        let broadcast = addr.ip().is_broadcast();

        for reply in &state.replies {
            match reply {
                ScriptedReply::Device { delay, device } => {
                    let Some(filter) = filter else { continue };
                    if !filter.matches(device.device_type, device.device_id) {
                        continue;
                    }
                    if !broadcast && *addr.ip() != device.ip_addr {
                        continue;
                    }
                    if let Ok(frame) = encode_discover_reply(device) {
                        self.inbox.push_back((now + *delay, frame, device.ip_addr));
                    }
                }
                ScriptedReply::Raw { delay, src, data } => {
                    self.inbox.push_back((now + *delay, data.clone(), *src));
                }
            }
        }

        self.inbox.make_contiguous().sort_by_key(|(due, _, _)| *due);
        Ok(())
    }

    async fn recv_from(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<(Bytes, Ipv4Addr)>, TransportError> {
        let deadline = Instant::now() + timeout;
        match self.inbox.front() {
            Some((due, _, _)) if *due <= deadline => {
                tokio::time::sleep_until(*due).await;
                Ok(self.inbox.pop_front().map(|(_, data, src)| (data, src)))
            }
            _ => {
                tokio::time::sleep_until(deadline).await;
                Ok(None)
            }
        }
    }
}

struct MockConnection {
    tuner: SimulatedTuner,
    epoch: u64,
    pending: BytesMut,
    closed: bool,
    chunk_size: Option<usize>,
}

#[async_trait]
impl Connection for MockConnection {
    async fn send(&mut self, data: &[u8]) -> Result<(), TransportError> {
        if self.tuner.epoch() != self.epoch {
            self.closed = true;
        }
        if self.closed {
            return Err(TransportError::Closed);
        }
        match self.tuner.handle_frame(data) {
            TunerResponse::Reply(frame) => self.pending.extend_from_slice(&frame),
            TunerResponse::Silence => {}
            TunerResponse::HangUp => self.closed = true,
        }
        Ok(())
    }

    async fn recv(&mut self, max_len: usize, timeout: Duration) -> Result<Bytes, TransportError> {
        if !self.pending.is_empty() {
            let len = self
                .pending
                .len()
                .min(max_len)
                .min(self.chunk_size.unwrap_or(usize::MAX));
            return Ok(self.pending.split_to(len).freeze());
        }
        if self.closed {
            return Err(TransportError::Closed);
        }
        tokio::time::sleep(timeout).await;
        Err(TransportError::Timeout)
    }

    async fn close(&mut self) {
        self.closed = true;
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hdhomerun_protocol::{encode_discover_request, DEVICE_ID_WILDCARD, DEVICE_TYPE_TUNER};

    fn device(ip: Ipv4Addr, device_id: u32) -> DiscoveredDevice {
        DiscoveredDevice {
            ip_addr: ip,
            device_type: DEVICE_TYPE_TUNER,
            device_id,
            tuner_count: 2,
            is_legacy: false,
            device_auth: String::new(),
            base_url: format!("http://{}:80", ip),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_scripted_discovery_order() {
        let transport = MockTransport::new();
        let a = Ipv4Addr::new(10, 0, 0, 2);
        let b = Ipv4Addr::new(10, 0, 0, 3);
        transport.add_device(Duration::from_millis(150), device(a, 0x1040_A1B6));
        transport.add_device(Duration::from_millis(50), device(b, 0x1010_0000));

        let mut socket = transport.open_datagram().await.unwrap();
        let request = encode_discover_request(DEVICE_TYPE_TUNER, DEVICE_ID_WILDCARD);
        socket
            .send_to(&request, SocketAddrV4::new(Ipv4Addr::BROADCAST, 65001))
            .await
            .unwrap();

        let start = Instant::now();
        let (_, first) = socket.recv_from(Duration::from_secs(1)).await.unwrap().unwrap();
        assert_eq!(first, b);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(50) && elapsed < Duration::from_millis(150));
        let (_, second) = socket.recv_from(Duration::from_secs(1)).await.unwrap().unwrap();
        assert_eq!(second, a);
        assert!(socket.recv_from(Duration::from_millis(100)).await.unwrap().is_none());
        assert_eq!(transport.sent_datagrams().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unicast_only_reaches_target() {
        let transport = MockTransport::new();
        let a = Ipv4Addr::new(10, 0, 0, 2);
        transport.add_device(Duration::ZERO, device(a, 0x1040_A1B6));
        transport.add_device(Duration::ZERO, device(Ipv4Addr::new(10, 0, 0, 3), 0x1010_0000));

        let mut socket = transport.open_datagram().await.unwrap();
        let request = encode_discover_request(DEVICE_TYPE_TUNER, DEVICE_ID_WILDCARD);
        socket.send_to(&request, SocketAddrV4::new(a, 65001)).await.unwrap();

        let (_, src) = socket.recv_from(Duration::from_millis(10)).await.unwrap().unwrap();
        assert_eq!(src, a);
        assert!(socket.recv_from(Duration::from_millis(10)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_dropped_connection_fails_send() {
        let transport = MockTransport::new();
        let ip = Ipv4Addr::new(10, 0, 0, 2);
        let tuner = SimulatedTuner::new("x");
        transport.add_tuner(ip, tuner.clone());

        let mut connection = transport
            .connect(SocketAddrV4::new(ip, 65001), Duration::from_secs(1))
            .await
            .unwrap();
        tuner.drop_connections();

        let frame = hdhomerun_protocol::encode_getset_request("/sys/model", None, None).unwrap();
        assert!(matches!(
            connection.send(&frame).await,
            Err(TransportError::Closed)
        ));
        assert!(tuner.requests().is_empty());
    }

    #[tokio::test]
    async fn test_connect_unknown_ip_is_refused() {
        let transport = MockTransport::new();
        let result = transport
            .connect(
                SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 9), 65001),
                Duration::from_secs(1),
            )
            .await;
        assert!(matches!(result, Err(TransportError::Io(_))));
        assert_eq!(transport.connect_count(), 1);
    }
}
