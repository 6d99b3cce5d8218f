//! Tuner status string parsing and signal quality colours.

use crate::codec::truncate_str;
use crate::types::{
    TunerStatus, STATUS_COLOR_GREEN, STATUS_COLOR_NEUTRAL, STATUS_COLOR_RED, STATUS_COLOR_YELLOW,
    STATUS_STR_CAPACITY,
};

/// Minimum signal strength reported as "signal present".
const SIGNAL_PRESENT_THRESHOLD: u32 = 45;

impl TunerStatus {
    /// Parse a `/tunerN/status` value:
    /// `ch=<channel> lock=<lock> ss=<n> snq=<n> seq=<n> bps=<n> pps=<n>`.
    ///
    /// Unknown keys are ignored and malformed numbers read as 0.
    pub fn parse(s: &str) -> Self {
        let mut status = TunerStatus::default();

        for token in s.split_whitespace() {
            let Some((key, value)) = token.split_once('=') else {
                continue;
            };
            let number = || value.parse::<u32>().unwrap_or(0);
            match key {
                "ch" => {
                    status.channel = truncate_str(value, STATUS_STR_CAPACITY - 1).to_string()
                }
                "lock" => {
                    status.lock_str = truncate_str(value, STATUS_STR_CAPACITY - 1).to_string()
                }
                "ss" => status.signal_strength = number(),
                "snq" => status.signal_to_noise_quality = number(),
                "seq" => status.symbol_error_quality = number(),
                "bps" => status.raw_bits_per_second = number(),
                "pps" => status.packets_per_second = number(),
                _ => {}
            }
        }

        status.signal_present = status.signal_strength >= SIGNAL_PRESENT_THRESHOLD;
        if !status.lock_str.is_empty() && status.lock_str != "none" {
            if status.lock_str.starts_with('(') {
                status.lock_unsupported = true;
            } else {
                status.lock_supported = true;
            }
        }
        status
    }

    /// Colour for the signal strength meter.
    pub fn signal_strength_color(&self) -> u32 {
        if !self.lock_supported {
            return STATUS_COLOR_NEUTRAL;
        }
        let (green, yellow) = if self.lock_str == "8vsb" { (75, 50) } else { (90, 80) };
        grade(self.signal_strength, green, yellow)
    }

    /// Colour for the signal-to-noise quality meter.
    pub fn signal_to_noise_color(&self) -> u32 {
        if !self.lock_supported {
            return STATUS_COLOR_NEUTRAL;
        }
        grade(self.signal_to_noise_quality, 70, 50)
    }

    /// Colour for the symbol error quality meter.
    pub fn symbol_error_color(&self) -> u32 {
        if !self.lock_supported {
            return STATUS_COLOR_NEUTRAL;
        }
        if self.symbol_error_quality >= 100 {
            STATUS_COLOR_GREEN
        } else {
            STATUS_COLOR_RED
        }
    }
}

fn grade(value: u32, green: u32, yellow: u32) -> u32 {
    if value >= green {
        STATUS_COLOR_GREEN
    } else if value >= yellow {
        STATUS_COLOR_YELLOW
    } else {
        STATUS_COLOR_RED
    }
}
