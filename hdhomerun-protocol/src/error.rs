//! Error types for the HDHomeRun wire protocol.

use thiserror::Error;

/// Wire-level errors raised while encoding or decoding frames.
///
/// Every variant is recoverable: the caller drops the offending datagram
/// (discovery) or resynchronises the stream (control) and carries on.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Buffer is shorter than its header, declared length or record layout.
    #[error("Truncated frame: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    /// CRC trailer does not match the frame contents.
    #[error("CRC mismatch: frame carries 0x{received:08X}, computed 0x{computed:08X}")]
    CrcMismatch { received: u32, computed: u32 },

    /// Payload does not fit in a single frame.
    #[error("Payload too large: {0} bytes (max: {1})")]
    TooLarge(usize, usize),

    /// A field holds a value outside its defined range.
    #[error("Invalid field {field}: {value}")]
    InvalidField { field: &'static str, value: u32 },

    /// A required TLV field is absent.
    #[error("Missing field: {0}")]
    MissingField(&'static str),
}

impl FrameError {
    pub(crate) fn truncated(expected: usize, actual: usize) -> Self {
        FrameError::Truncated { expected, actual }
    }
}
