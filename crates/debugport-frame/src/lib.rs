//! Checksummed packet framing for embedded debug ports.
//!
//! Every packet on the wire is a 16-byte header followed by its payload:
//! - A 4-byte signature ("CEFS") for stream synchronization
//! - A 4-byte additive checksum and a 4-byte length for the payload
//! - A 1-byte packet type, 1 reserved byte, and a 2-byte header checksum
//!
//! The reader resynchronizes after noise or corruption; bad packets are
//! counted and dropped, never delivered.

pub mod codec;
pub mod error;
pub mod layout;
pub mod reader;
pub mod transport;
pub mod writer;

pub use codec::{
    checksum, decode_packet, encode_packet, DebugPortHeader, Endian, Packet, PacketType,
    TransportConfig, COMMAND_HEADER_SIZE, DEFAULT_MAX_PAYLOAD, FRAMING_SIGNATURE, HEADER_SIZE,
    LOG_RECORD_SIZE, MAX_APPLICATION_PAYLOAD_COMMAND, MAX_PACKET_SIZE, WIRE_ENDIAN,
};
pub use error::{FrameError, Result};
pub use layout::{DecodedFields, Field, FieldKind, LayoutBuilder, StructLayout};
pub use reader::{FrameStats, FrameStatsSnapshot, PacketReader, SignatureMatcher};
pub use transport::{PacketSender, PacketTransport};
pub use writer::PacketWriter;
