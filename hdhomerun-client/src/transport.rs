//! Byte-level transport used by discovery and device control.
//!
//! Discovery and control code never touch sockets directly; they go through
//! [`Transport`], so tests can substitute a scripted implementation.
//! [`TokioTransport`] is the real one.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use log::trace;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};

use crate::error::TransportError;

/// Factory for datagram sockets and stream connections.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a broadcast-capable datagram socket on an ephemeral port.
    async fn open_datagram(&self) -> Result<Box<dyn DatagramSocket>, TransportError>;

    /// Open a stream connection to `addr`, giving up after `timeout`.
    async fn connect(
        &self,
        addr: SocketAddrV4,
        timeout: Duration,
    ) -> Result<Box<dyn Connection>, TransportError>;
}

/// A datagram socket owned by one discovery round.
#[async_trait]
pub trait DatagramSocket: Send {
    async fn send_to(&mut self, data: &[u8], addr: SocketAddrV4) -> Result<(), TransportError>;

    /// Wait up to `timeout` for one datagram. `Ok(None)` means the timeout
    /// elapsed with nothing received.
    async fn recv_from(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<(Bytes, Ipv4Addr)>, TransportError>;
}

/// A stream connection to one device.
#[async_trait]
pub trait Connection: Send {
    /// Write all of `data`.
    async fn send(&mut self, data: &[u8]) -> Result<(), TransportError>;

    /// Read up to `max_len` bytes, waiting at most `timeout`.
    ///
    /// Returns [`TransportError::Timeout`] if nothing arrives and
    /// [`TransportError::Closed`] once the peer has closed the stream.
    async fn recv(&mut self, max_len: usize, timeout: Duration) -> Result<Bytes, TransportError>;

    async fn close(&mut self);
}

/// Tokio-backed UDP/TCP transport.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioTransport;

impl TokioTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for TokioTransport {
    async fn open_datagram(&self) -> Result<Box<dyn DatagramSocket>, TransportError> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
        socket.set_broadcast(true)?;
        Ok(Box::new(TokioDatagram { socket }))
    }

    async fn connect(
        &self,
        addr: SocketAddrV4,
        timeout: Duration,
    ) -> Result<Box<dyn Connection>, TransportError> {
        let stream = match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => return Err(TransportError::Timeout),
        };
        stream.set_nodelay(true)?;
        trace!("Connected to {}", addr);
        Ok(Box::new(TokioConnection {
            stream: Some(stream),
        }))
    }
}

struct TokioDatagram {
    socket: UdpSocket,
}

#[async_trait]
impl DatagramSocket for TokioDatagram {
    async fn send_to(&mut self, data: &[u8], addr: SocketAddrV4) -> Result<(), TransportError> {
        self.socket.send_to(data, addr).await?;
        Ok(())
    }

    async fn recv_from(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<(Bytes, Ipv4Addr)>, TransportError> {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut buf = vec![0u8; 4096];

        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }

            match tokio::time::timeout(remaining, self.socket.recv_from(&mut buf)).await {
                Ok(Ok((n, SocketAddr::V4(src)))) => {
                    return Ok(Some((Bytes::copy_from_slice(&buf[..n]), *src.ip())));
                }
                Ok(Ok((_, src))) => {
                    trace!("Ignoring datagram from non-IPv4 source {}", src);
                }
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => return Ok(None),
            }
        }
    }
}

struct TokioConnection {
    stream: Option<TcpStream>,
}

#[async_trait]
impl Connection for TokioConnection {
    async fn send(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::Closed)?;
        stream.write_all(data).await?;
        Ok(())
    }

    async fn recv(&mut self, max_len: usize, timeout: Duration) -> Result<Bytes, TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::Closed)?;
        let mut buf = vec![0u8; max_len];
        match tokio::time::timeout(timeout, stream.read(&mut buf)).await {
            Ok(Ok(0)) => {
                self.stream = None;
                Err(TransportError::Closed)
            }
            Ok(Ok(n)) => {
                buf.truncate(n);
                Ok(Bytes::from(buf))
            }
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(TransportError::Timeout),
        }
    }

    async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_tcp_echo_and_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 5];
            socket.read_exact(&mut buf).await.unwrap();
            socket.write_all(&buf).await.unwrap();
        });

        let transport = TokioTransport::new();
        let mut conn = transport
            .connect(
                SocketAddrV4::new(Ipv4Addr::LOCALHOST, port),
                Duration::from_secs(1),
            )
            .await
            .unwrap();
        conn.send(b"hello").await.unwrap();

        let mut received = Vec::new();
        while received.len() < 5 {
            let chunk = conn.recv(16, Duration::from_secs(1)).await.unwrap();
            received.extend_from_slice(&chunk);
        }
        assert_eq!(received, b"hello");

        server.await.unwrap();
        assert!(matches!(
            conn.recv(16, Duration::from_secs(1)).await,
            Err(TransportError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_udp_recv_timeout() {
        let transport = TokioTransport::new();
        let mut socket = transport.open_datagram().await.unwrap();
        let received = socket.recv_from(Duration::from_millis(20)).await.unwrap();
        assert!(received.is_none());
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let transport = TokioTransport::new();
        let result = transport
            .connect(
                SocketAddrV4::new(Ipv4Addr::LOCALHOST, port),
                Duration::from_secs(1),
            )
            .await;
        assert!(result.is_err());
    }
}
