//! Channel scan session.
//!
//! ```text
//!            init            advance
//!   Idle ────────► Initialized ────────► Scanning ──(Finished)──► Complete
//!     │                │                    │
//!     └────────────────┴──── error ─────────┴──────────────────► Failed
//! ```
//!
//! The caller drives the scan: each [`ScanSession::advance`] tunes one
//! candidate channel. Locked channels are recorded in scan order.

use hdhomerun_protocol::ChannelScanResult;
use log::{debug, info, warn};
use serde::Serialize;

use crate::channelmap::resolve_scan_group;
use crate::device::DeviceHandle;
use crate::error::ScanError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ScanState {
    Idle,
    Initialized,
    Scanning,
    Complete,
    Failed,
}

/// Outcome of one advance or detect step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanStep {
    /// The tuner locked; the result has been recorded.
    LockedWithData(ChannelScanResult),
    /// Nothing to record for this step.
    NoLock,
    /// The scan group is exhausted.
    Finished,
}

/// A channel scan on one tuner.
#[derive(Debug)]
pub struct ScanSession {
    device: DeviceHandle,
    state: ScanState,
    channelmap: Option<String>,
    scan_group: Option<&'static str>,
    results: Vec<ChannelScanResult>,
    /// Index in `results` of the channel the tuner is currently parked on.
    pending: Option<usize>,
    last_progress: u8,
}

impl ScanSession {
    pub fn new(device: DeviceHandle) -> Self {
        Self {
            device,
            state: ScanState::Idle,
            channelmap: None,
            scan_group: None,
            results: Vec::new(),
            pending: None,
            last_progress: 0,
        }
    }

    pub fn state(&self) -> ScanState {
        self.state
    }

    pub fn channelmap(&self) -> Option<&str> {
        self.channelmap.as_deref()
    }

    pub fn scan_group(&self) -> Option<&'static str> {
        self.scan_group
    }

    /// Locked channels found so far, in scan order.
    pub fn results(&self) -> &[ChannelScanResult] {
        &self.results
    }

    pub fn into_results(self) -> Vec<ChannelScanResult> {
        self.results
    }

    pub fn device(&self) -> &DeviceHandle {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut DeviceHandle {
        &mut self.device
    }

    pub fn into_device(self) -> DeviceHandle {
        self.device
    }

    /// Configure the tuner for `channelmap` and reset its scan cursor.
    pub async fn init(&mut self, channelmap: &str) -> Result<(), ScanError> {
        if self.state != ScanState::Idle {
            return Err(ScanError::InvalidState(self.state));
        }

        let scan_group = match resolve_scan_group(channelmap) {
            Ok(group) => group,
            Err(e) => return Err(self.fail(e.into())),
        };

        if let Err(e) = self.device.set_channelscan_channelmap(channelmap).await {
            return Err(self.fail(e.into()));
        }
        if let Err(e) = self.device.channelscan_init(scan_group).await {
            return Err(self.fail(e.into()));
        }

        info!(
            "Channel scan initialised: channelmap={} group={:?}",
            channelmap, scan_group
        );
        self.channelmap = Some(channelmap.to_string());
        self.scan_group = Some(scan_group);
        self.state = ScanState::Initialized;
        Ok(())
    }

    /// Tune the next candidate channel.
    pub async fn advance(&mut self) -> Result<ScanStep, ScanError> {
        match self.state {
            ScanState::Initialized | ScanState::Scanning => {}
            ScanState::Complete => return Ok(ScanStep::Finished),
            state => return Err(ScanError::InvalidState(state)),
        }

        let result = match self.device.channelscan_advance().await {
            Ok(result) => result,
            Err(e) => return Err(self.fail(e.into())),
        };
        self.pending = None;

        let Some(result) = result else {
            info!("Channel scan complete: {} channel(s) found", self.results.len());
            self.state = ScanState::Complete;
            self.last_progress = 100;
            return Ok(ScanStep::Finished);
        };
        self.state = ScanState::Scanning;

        if !result.is_locked() {
            debug!("{}: no lock", result.channel_str);
            return Ok(ScanStep::NoLock);
        }

        debug!(
            "{}: locked ({}), {} program(s)",
            result.channel_str,
            result.status.lock_str,
            result.programs.len()
        );
        self.pending = Some(self.results.len());
        self.results.push(result.clone());
        Ok(ScanStep::LockedWithData(result))
    }

    /// Re-read the programs on the most recently locked channel and update
    /// its recorded result in place.
    pub async fn detect(&mut self) -> Result<ScanStep, ScanError> {
        match self.state {
            ScanState::Initialized | ScanState::Scanning | ScanState::Complete => {}
            state => return Err(ScanError::InvalidState(state)),
        }

        let Some(index) = self.pending else {
            return Ok(ScanStep::NoLock);
        };

        let detected = match self.device.channelscan_detect().await {
            Ok(detected) => detected,
            Err(e) => return Err(self.fail(e.into())),
        };

        match detected {
            Some(result) if result.is_locked() => {
                debug!(
                    "{}: detected {} program(s)",
                    result.channel_str,
                    result.programs.len()
                );
                self.results[index] = result.clone();
                Ok(ScanStep::LockedWithData(result))
            }
            _ => Ok(ScanStep::NoLock),
        }
    }

    /// Scan progress in percent.
    ///
    /// A failed poll is not fatal: the last known value is returned.
    pub async fn progress(&mut self) -> u8 {
        match self.state {
            ScanState::Idle => return 0,
            ScanState::Complete => return 100,
            ScanState::Failed => return self.last_progress,
            ScanState::Initialized | ScanState::Scanning => {}
        }

        match self.device.channelscan_get_progress().await {
            Ok(progress) => self.last_progress = progress.min(100),
            Err(e) => warn!("Progress poll failed, keeping {}%: {}", self.last_progress, e),
        }
        self.last_progress
    }

    fn fail(&mut self, err: ScanError) -> ScanError {
        warn!("Channel scan failed: {}", err);
        self.state = ScanState::Failed;
        self.pending = None;
        err
    }
}
