//! Control-plane client for HDHomeRun network tuners.
//!
//! - [`discover`] finds devices on the local segment.
//! - [`DeviceHandle`] issues get/set operations to one tuner.
//! - [`ScanSession`] drives a channel scan through a handle.
//!
//! All network I/O goes through a [`Transport`]; [`TokioTransport`] is the
//! real one.
//!
//! ```no_run
//! use std::sync::Arc;
//! use hdhomerun_client::{discover, ClientConfig, DeviceHandle, DiscoverQuery, ScanSession, ScanStep, TokioTransport};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ClientConfig::default();
//! let transport = Arc::new(TokioTransport::new());
//!
//! let devices = discover(transport.as_ref(), &DiscoverQuery::from_config(&config)).await?;
//! let Some(first) = devices.first() else { return Ok(()) };
//!
//! let device = DeviceHandle::from_discovered(transport, config, first, 0);
//! let mut scan = ScanSession::new(device);
//! scan.init("us-bcast").await?;
//! while scan.advance().await? != ScanStep::Finished {}
//! println!("{} channels", scan.results().len());
//! # Ok(())
//! # }
//! ```

pub mod channelmap;
pub mod config;
pub mod device;
pub mod discovery;
pub mod error;
pub mod scan;
pub mod transport;

pub use channelmap::{resolve_scan_group, supported_channelmaps};
pub use config::ClientConfig;
pub use device::{DeviceHandle, DeviceSelector};
pub use discovery::{discover, DiscoverQuery};
pub use error::{ConfigError, ControlError, DeviceStrError, ResolverError, ScanError, TransportError};
pub use scan::{ScanSession, ScanState, ScanStep};
pub use transport::{Connection, DatagramSocket, TokioTransport, Transport};

pub use hdhomerun_protocol::{
    ChannelScanProgram, ChannelScanResult, DiscoveredDevice, ProgramType, TunerStatus,
};
