//! An in-memory device that answers get/set requests.
//!
//! [`SimulatedTuner`] keeps a variable table and a scripted channel scan.
//! Clones share state, so a test can keep one clone for inspection while
//! the [`MockTransport`](crate::MockTransport) serves the other.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use hdhomerun_protocol::{
    decode_getset_request, encode_getset_reply, encode_scan_result, ChannelScanProgram,
    ChannelScanResult, GetSetRequest, ProgramType, TunerStatus,
};
use log::trace;
use parking_lot::Mutex;

const UNKNOWN_VARIABLE: &str = "ERROR: unknown getset variable";

/// What the device does with one request frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TunerResponse {
    /// A reply frame.
    Reply(Bytes),
    /// Nothing is sent back.
    Silence,
    /// The device ran the request, then dropped the connection without
    /// answering.
    HangUp,
}

#[derive(Debug, Default)]
struct TunerState {
    vars: HashMap<String, String>,
    errors: HashMap<String, String>,
    scan_plan: Vec<ChannelScanResult>,
    detect_overrides: HashMap<usize, ChannelScanResult>,
    scan_group: Option<String>,
    cursor: usize,
    current: Option<usize>,
    silent: bool,
    hangups: usize,
    epoch: u64,
    requests: Vec<GetSetRequest>,
}

#[derive(Debug, Clone, Default)]
pub struct SimulatedTuner {
    state: Arc<Mutex<TunerState>>,
}

impl SimulatedTuner {
    pub fn new(model: &str) -> Self {
        Self::default().with_var("/sys/model", model)
    }

    pub fn with_var(self, name: &str, value: &str) -> Self {
        self.state
            .lock()
            .vars
            .insert(name.to_string(), value.to_string());
        self
    }

    /// Channels returned, in order, by successive advance requests.
    pub fn with_scan_plan(self, plan: Vec<ChannelScanResult>) -> Self {
        self.state.lock().scan_plan = plan;
        self
    }

    /// Result returned by detect while parked on plan entry `index`.
    pub fn with_detect(self, index: usize, result: ChannelScanResult) -> Self {
        self.state.lock().detect_overrides.insert(index, result);
        self
    }

    /// Answer requests for `name` with an error message.
    pub fn reject(&self, name: &str, message: &str) {
        self.state
            .lock()
            .errors
            .insert(name.to_string(), message.to_string());
    }

    /// Stop answering (or resume).
    pub fn set_silent(&self, silent: bool) {
        self.state.lock().silent = silent;
    }

    /// Run the next `count` requests, then drop the connection instead of
    /// replying.
    pub fn hang_up_after_next(&self, count: usize) {
        self.state.lock().hangups = count;
    }

    /// Close every open connection. Sends on them fail until the client
    /// reconnects.
    pub fn drop_connections(&self) {
        self.state.lock().epoch += 1;
    }

    /// Bumped by [`drop_connections`](Self::drop_connections); connections
    /// opened under an older epoch are closed.
    pub fn epoch(&self) -> u64 {
        self.state.lock().epoch
    }

    pub fn var(&self, name: &str) -> Option<String> {
        self.state.lock().vars.get(name).cloned()
    }

    pub fn scan_group(&self) -> Option<String> {
        self.state.lock().scan_group.clone()
    }

    /// Every request received so far, including unanswered ones.
    pub fn requests(&self) -> Vec<GetSetRequest> {
        self.state.lock().requests.clone()
    }

    /// Handle one request frame.
    pub fn handle_frame(&self, frame: &[u8]) -> TunerResponse {
        let request = match decode_getset_request(frame) {
            Ok(request) => request,
            Err(e) => {
                trace!("Simulated tuner ignoring bad frame: {}", e);
                return TunerResponse::Silence;
            }
        };

        let mut state = self.state.lock();
        state.requests.push(request.clone());

        if state.silent {
            return TunerResponse::Silence;
        }

        let result = state.answer(&request);
        if state.hangups > 0 {
            state.hangups -= 1;
            return TunerResponse::HangUp;
        }
        let encoded = match &result {
            Ok(value) => encode_getset_reply(&request.name, Ok(value.as_slice())),
            Err(message) => encode_getset_reply(&request.name, Err(message.as_str())),
        };
        match encoded {
            Ok(frame) => TunerResponse::Reply(frame),
            Err(e) => {
                trace!("Simulated tuner failed to encode reply: {}", e);
                TunerResponse::Silence
            }
        }
    }
}

impl TunerState {
    fn answer(&mut self, request: &GetSetRequest) -> Result<Vec<u8>, String> {
        if let Some(message) = self.errors.get(&request.name) {
            return Err(message.clone());
        }

        let suffix = tuner_suffix(&request.name);
        match (suffix, request.value.as_deref()) {
            (Some("channelscan/init"), Some(group)) => {
                self.scan_group = Some(group.to_string());
                self.cursor = 0;
                self.current = None;
                Ok(c_string(group))
            }
            (Some("channelscan/advance"), None) => {
                if self.scan_group.is_none() {
                    return Err("ERROR: channel scan not initialized".to_string());
                }
                if self.cursor >= self.scan_plan.len() {
                    self.current = None;
                    return Ok(Vec::new());
                }
                let index = self.cursor;
                self.cursor += 1;
                self.current = Some(index);
                encode_record(&self.scan_plan[index])
            }
            (Some("channelscan/detect"), None) => match self.current {
                Some(index) => {
                    let result = self
                        .detect_overrides
                        .get(&index)
                        .unwrap_or(&self.scan_plan[index]);
                    encode_record(result)
                }
                None => Ok(Vec::new()),
            },
            (Some("channelscan/progress"), None) => {
                let progress = if self.scan_plan.is_empty() {
                    100
                } else {
                    self.cursor * 100 / self.scan_plan.len()
                };
                Ok(c_string(&progress.to_string()))
            }
            (_, None) => self
                .vars
                .get(&request.name)
                .map(|value| c_string(value))
                .ok_or_else(|| UNKNOWN_VARIABLE.to_string()),
            (_, Some(value)) => {
                self.vars.insert(request.name.clone(), value.to_string());
                Ok(c_string(value))
            }
        }
    }
}

/// `"/tuner0/channelscan/init"` → `Some("channelscan/init")`.
fn tuner_suffix(name: &str) -> Option<&str> {
    let rest = name.strip_prefix("/tuner")?;
    let digits = rest.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits == 0 {
        return None;
    }
    rest[digits..].strip_prefix('/')
}

fn c_string(value: &str) -> Vec<u8> {
    let mut bytes = value.as_bytes().to_vec();
    bytes.push(0);
    bytes
}

fn encode_record(result: &ChannelScanResult) -> Result<Vec<u8>, String> {
    encode_scan_result(result)
        .map(|bytes| bytes.to_vec())
        .map_err(|e| format!("ERROR: {}", e))
}

/// A scan plan entry for a channel that locks and carries `programs`
/// (`(program_number, name)` pairs).
pub fn locked_channel(channel_str: &str, frequency: u32, programs: &[(u16, &str)]) -> ChannelScanResult {
    let channel_number: u16 = channel_str
        .rsplit(':')
        .next()
        .and_then(|n| n.parse().ok())
        .unwrap_or(0);

    ChannelScanResult {
        channel_str: channel_str.to_string(),
        channelmap: 0,
        frequency,
        status: TunerStatus::parse(&format!(
            "ch=auto:{} lock=8vsb ss=80 snq=72 seq=100 bps=19394080 pps=1000",
            frequency
        )),
        programs: programs
            .iter()
            .enumerate()
            .map(|(i, (number, name))| ChannelScanProgram {
                program: format!("{}: {}.{} {}", number, channel_number, i + 1, name),
                program_number: *number,
                virtual_major: channel_number,
                virtual_minor: i as u16 + 1,
                program_type: ProgramType::Normal,
                name: name.to_string(),
            })
            .collect(),
        transport_stream_id: Some(0x0800 + channel_number),
        original_network_id: None,
    }
}

/// A scan plan entry for a channel with no signal.
pub fn unlocked_channel(channel_str: &str, frequency: u32) -> ChannelScanResult {
    ChannelScanResult {
        channel_str: channel_str.to_string(),
        channelmap: 0,
        frequency,
        status: TunerStatus::parse(&format!(
            "ch=auto:{} lock=none ss=20 snq=0 seq=0 bps=0 pps=0",
            frequency
        )),
        programs: Vec::new(),
        transport_stream_id: None,
        original_network_id: None,
    }
}
