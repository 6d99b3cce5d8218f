//! Binary channel scan record carried in advance/detect reply values.
//!
//! ```text
//! channel_str[64] channelmap:u32 frequency:u32
//! status: channel[32] lock_str[32] present:u8 supported:u8 unsupported:u8
//!         ss:u32 snq:u32 seq:u32 bps:u32 pps:u32
//! flags:u8 tsid:u16 onid:u16 program_count:u8
//! program_count x { program[64] number:u16 major:u16 minor:u16 type:u16 name[32] }
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::codec::{get_fixed_str, put_fixed_str};
use crate::error::FrameError;
use crate::types::{
    ChannelScanProgram, ChannelScanResult, ProgramType, TunerStatus, CHANNELSCAN_MAX_PROGRAM_COUNT,
    CHANNEL_STR_CAPACITY, PROGRAM_NAME_CAPACITY, PROGRAM_STR_CAPACITY, STATUS_STR_CAPACITY,
};

/// Size of the fixed part of a scan record.
pub const SCAN_RECORD_HEADER_SIZE: usize = 165;

/// Size of one program entry.
pub const SCAN_PROGRAM_SIZE: usize = PROGRAM_STR_CAPACITY + 8 + PROGRAM_NAME_CAPACITY;

const FLAG_TSID: u8 = 0x01;
const FLAG_ONID: u8 = 0x02;

/// Encode a scan record.
pub fn encode_scan_result(result: &ChannelScanResult) -> Result<Bytes, FrameError> {
    let count = result.programs.len();
    if count > CHANNELSCAN_MAX_PROGRAM_COUNT {
        return Err(FrameError::InvalidField {
            field: "program_count",
            value: count as u32,
        });
    }

    let mut buf = BytesMut::with_capacity(SCAN_RECORD_HEADER_SIZE + count * SCAN_PROGRAM_SIZE);
    put_fixed_str(&mut buf, &result.channel_str, CHANNEL_STR_CAPACITY);
    buf.put_u32(result.channelmap);
    buf.put_u32(result.frequency);
    put_status(&mut buf, &result.status);

    let mut flags = 0u8;
    if result.transport_stream_id.is_some() {
        flags |= FLAG_TSID;
    }
    if result.original_network_id.is_some() {
        flags |= FLAG_ONID;
    }
    buf.put_u8(flags);
    buf.put_u16(result.transport_stream_id.unwrap_or(0));
    buf.put_u16(result.original_network_id.unwrap_or(0));
    buf.put_u8(count as u8);

    for program in &result.programs {
        put_fixed_str(&mut buf, &program.program, PROGRAM_STR_CAPACITY);
        buf.put_u16(program.program_number);
        buf.put_u16(program.virtual_major);
        buf.put_u16(program.virtual_minor);
        buf.put_u16(program.program_type.into());
        put_fixed_str(&mut buf, &program.name, PROGRAM_NAME_CAPACITY);
    }

    Ok(buf.freeze())
}

fn put_status(buf: &mut BytesMut, status: &TunerStatus) {
    put_fixed_str(buf, &status.channel, STATUS_STR_CAPACITY);
    put_fixed_str(buf, &status.lock_str, STATUS_STR_CAPACITY);
    buf.put_u8(status.signal_present as u8);
    buf.put_u8(status.lock_supported as u8);
    buf.put_u8(status.lock_unsupported as u8);
    buf.put_u32(status.signal_strength);
    buf.put_u32(status.signal_to_noise_quality);
    buf.put_u32(status.symbol_error_quality);
    buf.put_u32(status.raw_bits_per_second);
    buf.put_u32(status.packets_per_second);
}

/// Decode a scan record. Bytes past the declared programs are ignored.
pub fn decode_scan_result(data: &[u8]) -> Result<ChannelScanResult, FrameError> {
    if data.len() < SCAN_RECORD_HEADER_SIZE {
        return Err(FrameError::truncated(SCAN_RECORD_HEADER_SIZE, data.len()));
    }

    let mut buf = Bytes::copy_from_slice(data);
    let channel_str = get_fixed_str(&mut buf, CHANNEL_STR_CAPACITY);
    let channelmap = buf.get_u32();
    let frequency = buf.get_u32();
    let status = get_status(&mut buf);

    let flags = buf.get_u8();
    let tsid = buf.get_u16();
    let onid = buf.get_u16();
    let count = buf.get_u8() as usize;

    if count > CHANNELSCAN_MAX_PROGRAM_COUNT {
        return Err(FrameError::truncated(
            SCAN_RECORD_HEADER_SIZE + CHANNELSCAN_MAX_PROGRAM_COUNT * SCAN_PROGRAM_SIZE,
            SCAN_RECORD_HEADER_SIZE + count * SCAN_PROGRAM_SIZE,
        ));
    }
    let needed = count * SCAN_PROGRAM_SIZE;
    if buf.remaining() < needed {
        return Err(FrameError::truncated(
            SCAN_RECORD_HEADER_SIZE + needed,
            data.len(),
        ));
    }

    let mut programs = Vec::with_capacity(count);
    for _ in 0..count {
        let program = get_fixed_str(&mut buf, PROGRAM_STR_CAPACITY);
        let program_number = buf.get_u16();
        let virtual_major = buf.get_u16();
        let virtual_minor = buf.get_u16();
        let raw_type = buf.get_u16();
        let program_type = ProgramType::try_from(raw_type).map_err(|v| FrameError::InvalidField {
            field: "program_type",
            value: v as u32,
        })?;
        let name = get_fixed_str(&mut buf, PROGRAM_NAME_CAPACITY);
        programs.push(ChannelScanProgram {
            program,
            program_number,
            virtual_major,
            virtual_minor,
            program_type,
            name,
        });
    }

    Ok(ChannelScanResult {
        channel_str,
        channelmap,
        frequency,
        status,
        programs,
        transport_stream_id: (flags & FLAG_TSID != 0).then_some(tsid),
        original_network_id: (flags & FLAG_ONID != 0).then_some(onid),
    })
}

fn get_status(buf: &mut Bytes) -> TunerStatus {
    TunerStatus {
        channel: get_fixed_str(buf, STATUS_STR_CAPACITY),
        lock_str: get_fixed_str(buf, STATUS_STR_CAPACITY),
        signal_present: buf.get_u8() != 0,
        lock_supported: buf.get_u8() != 0,
        lock_unsupported: buf.get_u8() != 0,
        signal_strength: buf.get_u32(),
        signal_to_noise_quality: buf.get_u32(),
        symbol_error_quality: buf.get_u32(),
        raw_bits_per_second: buf.get_u32(),
        packets_per_second: buf.get_u32(),
    }
}
