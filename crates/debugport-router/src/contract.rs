//! Payload layouts shared with the target firmware.
//!
//! Every command request, command response and log record starts with a
//! 16-byte [`CommandHeader`]. Field offsets below are fixed by the firmware's
//! packed structs and must not change.

use bytes::BufMut;
use debugport_frame::{
    Field, FrameError, StructLayout, COMMAND_HEADER_SIZE, LOG_RECORD_SIZE, WIRE_ENDIAN,
};

/// Opcode: no command.
pub const OPCODE_NONE: u16 = 0;
/// Opcode: self-test ping.
pub const OPCODE_PING: u16 = 1;
/// Opcode: debug port router control.
pub const OPCODE_DEBUG_PORT_ROUTER: u16 = 2;
/// Opcode: proxied framework command.
pub const OPCODE_CEF_COMMAND_PROXY: u16 = 3;
/// Opcode: reserved invalid value.
pub const OPCODE_INVALID: u16 = 0xFFFF;

/// Error code reported by a target that executed a command successfully.
pub const ERROR_CODE_OK: u32 = 0;

/// Ping request values. Distinct bit patterns at every width expose
/// byte-order and alignment mistakes end to end.
pub const PING_UINT8_VALUE: u8 = 0xA3;
pub const PING_UINT16_VALUE: u16 = 0x93A3;
pub const PING_UINT32_VALUE: u32 = 0x2084_61A3;
pub const PING_UINT64_VALUE: u64 = 0x9362_1799_5202_A373;

/// Human-readable opcode name.
pub fn opcode_name(opcode: u16) -> &'static str {
    match opcode {
        OPCODE_NONE => "none",
        OPCODE_PING => "ping",
        OPCODE_DEBUG_PORT_ROUTER => "debug-port-router",
        OPCODE_CEF_COMMAND_PROXY => "cef-command-proxy",
        OPCODE_INVALID => "invalid",
        _ => "unknown",
    }
}

/// Command header fields, shared by every layout below.
const HEADER_FIELDS: [Field; 5] = [
    Field::uint("opcode", 0, 2),
    Field::uint("sequence_number", 2, 2),
    Field::uint("error_code", 4, 4),
    Field::uint("num_bytes", 8, 4),
    Field::padding("header_padding", 12, 4),
];

pub static COMMAND_HEADER: StructLayout = StructLayout {
    name: "command-header",
    size: COMMAND_HEADER_SIZE,
    fields: &HEADER_FIELDS,
};

pub static PING_REQUEST: StructLayout = StructLayout {
    name: "ping-request",
    size: 48,
    fields: &[
        HEADER_FIELDS[0],
        HEADER_FIELDS[1],
        HEADER_FIELDS[2],
        HEADER_FIELDS[3],
        HEADER_FIELDS[4],
        Field::uint("uint8_value", 16, 1),
        Field::padding("padding1", 17, 1),
        Field::uint("uint16_value", 18, 2),
        Field::uint("test_value", 20, 4),
        Field::uint("uint32_value", 24, 4),
        Field::padding("padding2", 28, 4),
        Field::uint("offset_to_add_to_response", 32, 8),
        Field::uint("uint64_value", 40, 8),
    ],
};

pub static PING_RESPONSE: StructLayout = StructLayout {
    name: "ping-response",
    size: 40,
    fields: &[
        HEADER_FIELDS[0],
        HEADER_FIELDS[1],
        HEADER_FIELDS[2],
        HEADER_FIELDS[3],
        HEADER_FIELDS[4],
        Field::uint("uint8_value", 16, 1),
        Field::padding("padding1", 17, 1),
        Field::uint("uint16_value", 18, 2),
        Field::uint("test_value", 20, 4),
        Field::uint("uint32_value", 24, 4),
        Field::padding("padding2", 28, 4),
        Field::uint("uint64_value", 32, 8),
    ],
};

pub static LOG_RECORD: StructLayout = StructLayout {
    name: "log-record",
    size: LOG_RECORD_SIZE,
    fields: &[
        HEADER_FIELDS[0],
        HEADER_FIELDS[1],
        HEADER_FIELDS[2],
        HEADER_FIELDS[3],
        HEADER_FIELDS[4],
        Field::uint("variable1", 16, 8),
        Field::uint("variable2", 24, 8),
        Field::uint("variable3", 32, 8),
        Field::uint("timestamp", 40, 8),
        Field::bytes("template", 48, 128),
        Field::bytes("filename", 176, 40),
        Field::uint("line_number", 216, 4),
        Field::uint("log_sequence_number", 220, 2),
        Field::uint("module_id", 222, 1),
        Field::uint("severity", 223, 1),
    ],
};

/// The header at the start of every command and log payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CommandHeader {
    pub opcode: u16,
    pub sequence_number: u16,
    pub error_code: u32,
    /// Size of the whole request or response struct, header included.
    pub num_bytes: u32,
}

impl CommandHeader {
    /// A fresh header for a command whose request struct is `num_bytes` long.
    pub fn new(opcode: u16, num_bytes: usize) -> Self {
        Self {
            opcode,
            sequence_number: 0,
            error_code: ERROR_CODE_OK,
            num_bytes: num_bytes as u32,
        }
    }

    /// Append the encoded header, padding included.
    pub fn encode(&self, dst: &mut impl BufMut) {
        WIRE_ENDIAN.put_uint(dst, u64::from(self.opcode), 2);
        WIRE_ENDIAN.put_uint(dst, u64::from(self.sequence_number), 2);
        WIRE_ENDIAN.put_uint(dst, u64::from(self.error_code), 4);
        WIRE_ENDIAN.put_uint(dst, u64::from(self.num_bytes), 4);
        dst.put_bytes(0, 4);
    }

    /// Encoded header bytes.
    pub fn to_bytes(&self) -> [u8; COMMAND_HEADER_SIZE] {
        let mut out = [0u8; COMMAND_HEADER_SIZE];
        self.encode(&mut &mut out[..]);
        out
    }

    /// Decode the header prefix of `src`.
    pub fn decode(src: &[u8]) -> Result<Self, FrameError> {
        let prefix = src.get(..COMMAND_HEADER_SIZE).ok_or(FrameError::LayoutSizeMismatch {
            layout: COMMAND_HEADER.name,
            expected: COMMAND_HEADER_SIZE,
            actual: src.len(),
        })?;
        Ok(Self {
            opcode: WIRE_ENDIAN.get_uint(&prefix[0..2]) as u16,
            sequence_number: WIRE_ENDIAN.get_uint(&prefix[2..4]) as u16,
            error_code: WIRE_ENDIAN.get_uint(&prefix[4..8]) as u32,
            num_bytes: WIRE_ENDIAN.get_uint(&prefix[8..12]) as u32,
        })
    }
}

/// Log record severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Severity {
    Debug = 0,
    Info = 1,
    Warning = 2,
    Error = 3,
    Fatal = 4,
}

impl Severity {
    /// Level name as written to log files.
    pub fn name(self) -> &'static str {
        match self {
            Severity::Debug => "DEBUG",
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
            Severity::Fatal => "CRITICAL",
        }
    }
}

impl TryFrom<u8> for Severity {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        match value {
            0 => Ok(Severity::Debug),
            1 => Ok(Severity::Info),
            2 => Ok(Severity::Warning),
            3 => Ok(Severity::Error),
            4 => Ok(Severity::Fatal),
            other => Err(other),
        }
    }
}
