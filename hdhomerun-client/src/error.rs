//! Error types for discovery, device control and channel scanning.

use std::io;

use hdhomerun_protocol::FrameError;
use thiserror::Error;

use crate::scan::ScanState;

/// Failures reported by a [`Transport`](crate::transport::Transport)
/// implementation.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Operation timed out")]
    Timeout,

    #[error("Connection closed by peer")]
    Closed,
}

/// Failures of a single control (get/set) operation.
///
/// Every variant closes the control connection; the next operation
/// reconnects.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ControlError {
    #[error("Timed out waiting for reply")]
    Timeout,

    #[error("Protocol error: {0}")]
    Protocol(#[from] FrameError),

    #[error("Unsupported variable: {0}")]
    Unsupported(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Rejected by device: {0}")]
    Rejected(String),

    #[error("Device unreachable: {0}")]
    Unreachable(String),
}

impl From<TransportError> for ControlError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Timeout => ControlError::Timeout,
            TransportError::Closed => ControlError::ConnectionClosed,
            TransportError::Io(e) => match e.kind() {
                io::ErrorKind::TimedOut => ControlError::Timeout,
                io::ErrorKind::ConnectionRefused
                | io::ErrorKind::AddrNotAvailable
                | io::ErrorKind::NotFound => ControlError::Unreachable(e.to_string()),
                _ => ControlError::ConnectionClosed,
            },
        }
    }
}

/// Unknown channel map name.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolverError {
    #[error("Unknown channel map: {0}")]
    UnknownChannelmap(String),
}

/// Channel scan failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScanError {
    #[error("Unknown channel map: {0}")]
    UnknownChannelmap(String),

    #[error("Device rejected the request: {0}")]
    DeviceRejected(String),

    #[error("Device unreachable: {0}")]
    DeviceUnreachable(#[source] ControlError),

    #[error("Operation not valid in state {0:?}")]
    InvalidState(ScanState),
}

impl From<ResolverError> for ScanError {
    fn from(err: ResolverError) -> Self {
        match err {
            ResolverError::UnknownChannelmap(name) => ScanError::UnknownChannelmap(name),
        }
    }
}

impl From<ControlError> for ScanError {
    fn from(err: ControlError) -> Self {
        match err {
            ControlError::Rejected(msg) => ScanError::DeviceRejected(msg),
            ControlError::Unsupported(name) => {
                ScanError::DeviceRejected(format!("unsupported variable {}", name))
            }
            other => ScanError::DeviceUnreachable(other),
        }
    }
}

/// Errors parsing a device string such as `"1040A1B6-1"` or
/// `"192.168.1.50"`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceStrError {
    #[error("Empty device string")]
    Empty,

    #[error("Invalid device string: {0}")]
    InvalidFormat(String),

    #[error("Invalid device id {0:08X}: checksum mismatch")]
    InvalidDeviceId(u32),

    #[error("Invalid tuner index: {0}")]
    InvalidTuner(String),
}

/// Configuration loading failures.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_mapping() {
        assert_eq!(ControlError::from(TransportError::Timeout), ControlError::Timeout);
        assert_eq!(
            ControlError::from(TransportError::Closed),
            ControlError::ConnectionClosed
        );
        let reset = io::Error::new(io::ErrorKind::ConnectionReset, "reset");
        assert_eq!(
            ControlError::from(TransportError::Io(reset)),
            ControlError::ConnectionClosed
        );
        let refused = io::Error::new(io::ErrorKind::ConnectionRefused, "refused");
        assert!(matches!(
            ControlError::from(TransportError::Io(refused)),
            ControlError::Unreachable(_)
        ));
    }

    #[test]
    fn test_scan_error_mapping() {
        assert_eq!(
            ScanError::from(ControlError::Rejected("ERROR: busy".into())),
            ScanError::DeviceRejected("ERROR: busy".into())
        );
        assert_eq!(
            ScanError::from(ControlError::Timeout),
            ScanError::DeviceUnreachable(ControlError::Timeout)
        );
        assert_eq!(
            ScanError::from(ResolverError::UnknownChannelmap("xx".into())),
            ScanError::UnknownChannelmap("xx".into())
        );
    }
}
