use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};

/// Debug port header: signature (4) + payload checksum (4) + payload size (4)
/// + packet type (1) + reserve (1) + header checksum (2) = 16 bytes.
///
/// A multiple of 8 so whatever follows stays 64-bit aligned.
pub const HEADER_SIZE: usize = 16;

/// Framing signature: "CEFS". Every byte is distinct, so a failed partial
/// match can only restart on the first byte.
pub const FRAMING_SIGNATURE: [u8; 4] = [0x43, 0x45, 0x46, 0x53];

/// Size of the command header carried at the start of every command payload.
pub const COMMAND_HEADER_SIZE: usize = 16;

/// Size of a log record payload.
pub const LOG_RECORD_SIZE: usize = 224;

/// Largest application payload for a command: command header + 512 bytes.
pub const MAX_APPLICATION_PAYLOAD_COMMAND: usize = COMMAND_HEADER_SIZE + 512;

/// Default maximum payload size.
pub const DEFAULT_MAX_PAYLOAD: usize = if MAX_APPLICATION_PAYLOAD_COMMAND > LOG_RECORD_SIZE {
    MAX_APPLICATION_PAYLOAD_COMMAND
} else {
    LOG_RECORD_SIZE
};

/// Largest packet on the wire.
pub const MAX_PACKET_SIZE: usize = HEADER_SIZE + DEFAULT_MAX_PAYLOAD;

const PAYLOAD_CHECKSUM_OFFSET: usize = 4;
const PAYLOAD_SIZE_OFFSET: usize = 8;
const PACKET_TYPE_OFFSET: usize = 12;
const RESERVE_OFFSET: usize = 13;
const HEADER_CHECKSUM_OFFSET: usize = 14;

/// Byte order of every multi-byte field on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

/// Wire byte order, fixed at build time by the `big-endian` feature.
pub const WIRE_ENDIAN: Endian = if cfg!(feature = "big-endian") {
    Endian::Big
} else {
    Endian::Little
};

impl Endian {
    /// Append `value` as a `width`-byte unsigned integer.
    pub fn put_uint(self, dst: &mut impl BufMut, value: u64, width: usize) {
        match self {
            Endian::Little => dst.put_uint_le(value, width),
            Endian::Big => dst.put_uint(value, width),
        }
    }

    /// Read an unsigned integer spanning all of `src` (1 to 8 bytes).
    pub fn get_uint(self, mut src: &[u8]) -> u64 {
        let width = src.len();
        match self {
            Endian::Little => src.get_uint_le(width),
            Endian::Big => src.get_uint(width),
        }
    }
}

/// Debug port packet types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    CommandRequest = 0,
    CommandResponse = 1,
    LoggingData = 2,
}

impl PacketType {
    /// Human-readable name.
    pub fn name(self) -> &'static str {
        match self {
            PacketType::CommandRequest => "command-request",
            PacketType::CommandResponse => "command-response",
            PacketType::LoggingData => "logging-data",
        }
    }
}

impl TryFrom<u8> for PacketType {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(PacketType::CommandRequest),
            1 => Ok(PacketType::CommandResponse),
            2 => Ok(PacketType::LoggingData),
            other => Err(FrameError::UnknownPacketType(other)),
        }
    }
}

/// Additive checksum: the wrapping sum of every byte.
pub fn checksum(bytes: &[u8]) -> u32 {
    bytes
        .iter()
        .fold(0u32, |sum, &byte| sum.wrapping_add(u32::from(byte)))
}

/// The 16-byte debug port header. The framing signature is implied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebugPortHeader {
    pub payload_checksum: u32,
    pub payload_size: u32,
    /// Raw packet type byte; see [`DebugPortHeader::packet_type`].
    pub packet_type: u8,
    pub reserve: u8,
    pub header_checksum: u16,
}

impl DebugPortHeader {
    /// Build a header for `payload` with both checksums filled in.
    pub fn for_payload(payload: &[u8], packet_type: PacketType) -> Self {
        let mut header = Self {
            payload_checksum: checksum(payload),
            payload_size: payload.len() as u32,
            packet_type: packet_type as u8,
            reserve: 0,
            header_checksum: 0,
        };
        header.header_checksum = header.compute_header_checksum();
        header
    }

    /// Checksum over the encoded header with the checksum field zeroed.
    pub fn compute_header_checksum(&self) -> u16 {
        let zeroed = Self {
            header_checksum: 0,
            ..*self
        };
        checksum(&zeroed.to_bytes()) as u16
    }

    /// Whether the stored header checksum matches the header contents.
    pub fn header_checksum_valid(&self) -> bool {
        self.header_checksum == self.compute_header_checksum()
    }

    /// Decoded packet type.
    pub fn packet_type(&self) -> Result<PacketType> {
        PacketType::try_from(self.packet_type)
    }

    /// Append the encoded header, signature included.
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_slice(&FRAMING_SIGNATURE);
        WIRE_ENDIAN.put_uint(dst, u64::from(self.payload_checksum), 4);
        WIRE_ENDIAN.put_uint(dst, u64::from(self.payload_size), 4);
        dst.put_u8(self.packet_type);
        dst.put_u8(self.reserve);
        WIRE_ENDIAN.put_uint(dst, u64::from(self.header_checksum), 2);
    }

    /// Encoded header bytes.
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        self.encode(&mut &mut out[..]);
        out
    }

    /// Decode a header. Checksums are not verified here.
    pub fn decode(src: &[u8; HEADER_SIZE]) -> Result<Self> {
        if src[..FRAMING_SIGNATURE.len()] != FRAMING_SIGNATURE {
            return Err(FrameError::InvalidSignature);
        }
        Ok(Self {
            payload_checksum: WIRE_ENDIAN
                .get_uint(&src[PAYLOAD_CHECKSUM_OFFSET..PAYLOAD_SIZE_OFFSET])
                as u32,
            payload_size: WIRE_ENDIAN.get_uint(&src[PAYLOAD_SIZE_OFFSET..PACKET_TYPE_OFFSET])
                as u32,
            packet_type: src[PACKET_TYPE_OFFSET],
            reserve: src[RESERVE_OFFSET],
            header_checksum: WIRE_ENDIAN.get_uint(&src[HEADER_CHECKSUM_OFFSET..HEADER_SIZE])
                as u16,
        })
    }
}

/// A validated packet: header plus exactly `payload_size` payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub header: DebugPortHeader,
    pub payload: Bytes,
}

impl Packet {
    /// Build a packet for `payload`, computing the header.
    pub fn new(packet_type: PacketType, payload: impl Into<Bytes>) -> Self {
        let payload = payload.into();
        Self {
            header: DebugPortHeader::for_payload(&payload, packet_type),
            payload,
        }
    }

    /// Decoded packet type.
    pub fn packet_type(&self) -> Result<PacketType> {
        self.header.packet_type()
    }

    /// The total wire size of this packet (header + payload).
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }
}

/// Encode a packet into the wire format.
///
/// Wire format:
/// ```text
/// ┌───────────┬──────────┬──────────┬──────┬─────────┬──────────┬─────────────┐
/// │ "CEFS"    │ Payload  │ Payload  │ Type │ Reserve │ Header   │ Payload     │
/// │ (4B)      │ checksum │ size     │ (1B) │ (1B, 0) │ checksum │ (size B)    │
/// │           │ (4B)     │ (4B)     │      │         │ (2B)     │             │
/// └───────────┴──────────┴──────────┴──────┴─────────┴──────────┴─────────────┘
/// ```
pub fn encode_packet(
    packet_type: PacketType,
    payload: &[u8],
    max_payload: usize,
    dst: &mut BytesMut,
) -> Result<()> {
    if payload.len() > max_payload {
        return Err(FrameError::PayloadTooLarge {
            size: payload.len(),
            max: max_payload,
        });
    }
    dst.reserve(HEADER_SIZE + payload.len());
    DebugPortHeader::for_payload(payload, packet_type).encode(dst);
    dst.put_slice(payload);
    Ok(())
}

/// Decode a packet from a buffer that starts at a framing signature.
///
/// Strict counterpart of [`PacketReader`](crate::PacketReader): there is no
/// resynchronization, and any checksum failure is returned as an error.
/// Returns `Ok(None)` if the buffer doesn't contain a complete packet yet.
/// On success, consumes the packet bytes from the buffer.
pub fn decode_packet(src: &mut BytesMut, max_payload: usize) -> Result<Option<Packet>> {
    if src.len() < HEADER_SIZE {
        return Ok(None);
    }

    let mut raw = [0u8; HEADER_SIZE];
    raw.copy_from_slice(&src[..HEADER_SIZE]);
    let header = DebugPortHeader::decode(&raw)?;

    let computed = header.compute_header_checksum();
    if computed != header.header_checksum {
        return Err(FrameError::HeaderChecksumMismatch {
            received: u32::from(header.header_checksum),
            computed: u32::from(computed),
        });
    }

    let payload_len = header.payload_size as usize;
    if payload_len > max_payload {
        return Err(FrameError::PayloadTooLarge {
            size: payload_len,
            max: max_payload,
        });
    }

    if src.len() < HEADER_SIZE + payload_len {
        return Ok(None);
    }

    src.advance(HEADER_SIZE);
    let payload = src.split_to(payload_len).freeze();

    let computed = checksum(&payload);
    if computed != header.payload_checksum {
        return Err(FrameError::PayloadChecksumMismatch {
            received: header.payload_checksum,
            computed,
        });
    }

    Ok(Some(Packet { header, payload }))
}

/// Configuration for the packet transport.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Maximum payload size in bytes, both directions. Default: 528.
    pub max_payload_size: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
        }
    }
}
