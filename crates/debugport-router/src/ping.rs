//! Self-test ping command.
//!
//! The request carries one fixed bit pattern per integer width, a test value
//! and an offset. A healthy target answers with every pattern plus the
//! offset (wrapping at each field width) and the test value unchanged.

use bytes::Bytes;
use debugport_frame::{DecodedFields, StructLayout};

use crate::command::{expect_field, Command, Rejection};
use crate::contract::{
    CommandHeader, OPCODE_PING, PING_REQUEST, PING_RESPONSE, PING_UINT16_VALUE,
    PING_UINT32_VALUE, PING_UINT64_VALUE, PING_UINT8_VALUE,
};

/// The ping command.
#[derive(Debug, Clone)]
pub struct PingCommand {
    header: CommandHeader,
    offset: u64,
    test_value: u32,
}

impl Default for PingCommand {
    fn default() -> Self {
        Self::new()
    }
}

impl PingCommand {
    /// A ping with offset 0 and test value 0.
    pub fn new() -> Self {
        Self {
            header: CommandHeader::new(OPCODE_PING, PING_REQUEST.size),
            offset: 0,
            test_value: 0,
        }
    }

    /// Ask the target to add `offset` to every returned pattern.
    pub fn with_offset(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }

    /// Value the target must echo unchanged.
    pub fn with_test_value(mut self, test_value: u32) -> Self {
        self.test_value = test_value;
        self
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn test_value(&self) -> u32 {
        self.test_value
    }

    /// Field values a correct response must carry.
    pub fn expected_response(&self) -> [(&'static str, u64); 5] {
        let offset = self.offset;
        [
            (
                "uint8_value",
                u64::from(PING_UINT8_VALUE.wrapping_add(offset as u8)),
            ),
            (
                "uint16_value",
                u64::from(PING_UINT16_VALUE.wrapping_add(offset as u16)),
            ),
            (
                "uint32_value",
                u64::from(PING_UINT32_VALUE.wrapping_add(offset as u32)),
            ),
            ("uint64_value", PING_UINT64_VALUE.wrapping_add(offset)),
            ("test_value", u64::from(self.test_value)),
        ]
    }
}

impl Command for PingCommand {
    fn opcode(&self) -> u16 {
        OPCODE_PING
    }

    fn sequence_number(&self) -> u16 {
        self.header.sequence_number
    }

    fn set_sequence_number(&mut self, sequence: u16) {
        self.header.sequence_number = sequence;
    }

    fn payload(&self) -> debugport_frame::Result<Bytes> {
        Ok(PING_REQUEST
            .builder()
            .prefix(&self.header.to_bytes())
            .uint("uint8_value", u64::from(PING_UINT8_VALUE))?
            .uint("uint16_value", u64::from(PING_UINT16_VALUE))?
            .uint("test_value", u64::from(self.test_value))?
            .uint("uint32_value", u64::from(PING_UINT32_VALUE))?
            .uint("offset_to_add_to_response", self.offset)?
            .uint("uint64_value", PING_UINT64_VALUE)?
            .build())
    }

    fn expected_response_type(&self) -> &'static StructLayout {
        &PING_RESPONSE
    }

    fn validate_response_body(&self, body: &DecodedFields) -> Result<(), Rejection> {
        for (field, expected) in self.expected_response() {
            expect_field(body, field, expected)?;
        }
        Ok(())
    }
}
