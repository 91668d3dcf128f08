use bytes::Bytes;
use debugport_frame::{DecodedFields, FrameError, StructLayout, COMMAND_HEADER_SIZE};

use crate::contract::{opcode_name, CommandHeader, ERROR_CODE_OK};

/// Why a command response was not accepted.
///
/// A rejection is a protocol-level outcome of one command, not a router
/// failure; the router stays usable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("response length {actual} does not match expected {expected}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("response sequence number {received} does not match sent {sent}")]
    SequenceMismatch { sent: u16, received: u16 },

    #[error("target reported error code {0}")]
    ErrorCode(u32),

    #[error("response opcode {received} does not match sent {sent}")]
    OpcodeMismatch { sent: u16, received: u16 },

    #[error("field {field} is {received:#x}, expected {expected:#x}")]
    FieldMismatch {
        field: &'static str,
        expected: u64,
        received: u64,
    },

    #[error("response is missing field {0}")]
    MissingField(&'static str),

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl From<FrameError> for Rejection {
    fn from(err: FrameError) -> Self {
        Rejection::Malformed(err.to_string())
    }
}

/// A request the router can send and whose response it can validate.
///
/// One implementation per opcode. An instance is built once, stamped with a
/// sequence number right before it is sent, and read-only afterwards.
pub trait Command: Send {
    /// Opcode carried in the command header.
    fn opcode(&self) -> u16;

    /// Sequence number stamped by the last send.
    fn sequence_number(&self) -> u16;

    /// Stamp the sequence number into the command header.
    fn set_sequence_number(&mut self, sequence: u16);

    /// Serialized request, command header included.
    fn payload(&self) -> debugport_frame::Result<Bytes>;

    /// Layout of a well-formed response.
    fn expected_response_type(&self) -> &'static StructLayout;

    /// Byte length of a well-formed response.
    fn expected_response_length(&self) -> usize {
        self.expected_response_type().size
    }

    /// Check the echoed header against the one that was sent.
    fn validate_response_header(&self, header: &CommandHeader) -> Result<(), Rejection> {
        if header.sequence_number != self.sequence_number() {
            return Err(Rejection::SequenceMismatch {
                sent: self.sequence_number(),
                received: header.sequence_number,
            });
        }
        if header.error_code != ERROR_CODE_OK {
            return Err(Rejection::ErrorCode(header.error_code));
        }
        if header.opcode != self.opcode() {
            return Err(Rejection::OpcodeMismatch {
                sent: self.opcode(),
                received: header.opcode,
            });
        }
        Ok(())
    }

    /// Check command-specific response fields.
    fn validate_response_body(&self, body: &DecodedFields) -> Result<(), Rejection>;

    /// Name used in logs.
    fn name(&self) -> &'static str {
        opcode_name(self.opcode())
    }
}

/// Run the full response check for `command` against a response payload.
///
/// The length is checked first and nothing is decoded on a mismatch. The
/// header prefix is validated next; body fields are decoded only after
/// the header passes.
pub fn validate_response(command: &dyn Command, payload: &[u8]) -> Result<(), Rejection> {
    let expected = command.expected_response_length();
    if payload.len() != expected {
        return Err(Rejection::LengthMismatch {
            expected,
            actual: payload.len(),
        });
    }

    let header = CommandHeader::decode(payload)?;
    command.validate_response_header(&header)?;

    let body = command
        .expected_response_type()
        .decode_from(payload, COMMAND_HEADER_SIZE)?;
    command.validate_response_body(&body)
}

/// Compare one decoded field against its expected value.
pub fn expect_field(body: &DecodedFields, field: &'static str, expected: u64) -> Result<(), Rejection> {
    let received = body.get(field).ok_or(Rejection::MissingField(field))?;
    if received != expected {
        return Err(Rejection::FieldMismatch {
            field,
            expected,
            received,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use debugport_frame::Field;

    use super::*;

    static ECHO_RESPONSE: StructLayout = StructLayout {
        name: "echo-response",
        size: 24,
        fields: &[
            Field::uint("opcode", 0, 2),
            Field::uint("sequence_number", 2, 2),
            Field::uint("error_code", 4, 4),
            Field::uint("num_bytes", 8, 4),
            Field::padding("header_padding", 12, 4),
            Field::uint("value", 16, 8),
        ],
    };

    struct Echo {
        header: CommandHeader,
        value: u64,
    }

    impl Command for Echo {
        fn opcode(&self) -> u16 {
            self.header.opcode
        }

        fn sequence_number(&self) -> u16 {
            self.header.sequence_number
        }

        fn set_sequence_number(&mut self, sequence: u16) {
            self.header.sequence_number = sequence;
        }

        fn payload(&self) -> debugport_frame::Result<Bytes> {
            Ok(Bytes::copy_from_slice(&self.header.to_bytes()))
        }

        fn expected_response_type(&self) -> &'static StructLayout {
            &ECHO_RESPONSE
        }

        fn validate_response_body(&self, body: &DecodedFields) -> Result<(), Rejection> {
            expect_field(body, "value", self.value)
        }
    }

    fn echo() -> Echo {
        let mut header = CommandHeader::new(0x77, 16);
        header.sequence_number = 5;
        Echo { header, value: 42 }
    }

    fn response(header: CommandHeader, value: u64) -> Bytes {
        ECHO_RESPONSE
            .builder()
            .prefix(&header.to_bytes())
            .uint("value", value)
            .unwrap()
            .build()
    }

    #[test]
    fn matching_response_is_accepted() {
        let cmd = echo();
        assert_eq!(validate_response(&cmd, &response(cmd.header, 42)), Ok(()));
    }

    #[test]
    fn length_is_checked_before_anything_else() {
        let cmd = echo();
        let err = validate_response(&cmd, &[0u8; 3]).unwrap_err();
        assert_eq!(
            err,
            Rejection::LengthMismatch {
                expected: 24,
                actual: 3
            }
        );
    }

    #[test]
    fn header_mismatches_are_rejected() {
        let cmd = echo();

        let mut header = cmd.header;
        header.sequence_number = 6;
        assert!(matches!(
            validate_response(&cmd, &response(header, 42)),
            Err(Rejection::SequenceMismatch { sent: 5, received: 6 })
        ));

        let mut header = cmd.header;
        header.error_code = 3;
        assert_eq!(
            validate_response(&cmd, &response(header, 42)),
            Err(Rejection::ErrorCode(3))
        );

        let mut header = cmd.header;
        header.opcode = 0x78;
        assert!(matches!(
            validate_response(&cmd, &response(header, 42)),
            Err(Rejection::OpcodeMismatch { .. })
        ));
    }

    #[test]
    fn header_is_checked_before_body() {
        let cmd = echo();
        let mut header = cmd.header;
        header.error_code = 1;
        assert_eq!(
            validate_response(&cmd, &response(header, 0)),
            Err(Rejection::ErrorCode(1))
        );
    }

    #[test]
    fn body_mismatch_is_rejected() {
        let cmd = echo();
        assert_eq!(
            validate_response(&cmd, &response(cmd.header, 43)),
            Err(Rejection::FieldMismatch {
                field: "value",
                expected: 42,
                received: 43
            })
        );
    }

    #[test]
    fn missing_field_is_reported() {
        let body = ECHO_RESPONSE.decode(&[0u8; 24]).unwrap();
        assert_eq!(
            expect_field(&body, "absent", 0),
            Err(Rejection::MissingField("absent"))
        );
    }
}
