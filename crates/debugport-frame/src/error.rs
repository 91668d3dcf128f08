use std::time::Duration;

/// Errors that can occur during packet framing and transport.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The header does not start with the framing signature.
    #[error("invalid framing signature (expected \"CEFS\")")]
    InvalidSignature,

    /// The header checksum does not match the header contents.
    #[error("header checksum mismatch (received {received:#06x}, computed {computed:#06x})")]
    HeaderChecksumMismatch { received: u32, computed: u32 },

    /// The payload checksum does not match the payload bytes.
    #[error("payload checksum mismatch (received {received:#010x}, computed {computed:#010x})")]
    PayloadChecksumMismatch { received: u32, computed: u32 },

    /// The payload exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The packet type byte is not a known packet type.
    #[error("unknown packet type {0:#04x}")]
    UnknownPacketType(u8),

    /// A struct layout has no field with this name.
    #[error("layout {layout} has no field '{field}'")]
    UnknownField { layout: &'static str, field: String },

    /// A buffer does not have the size its struct layout requires.
    #[error("layout {layout} expects {expected} bytes, got {actual}")]
    LayoutSizeMismatch {
        layout: &'static str,
        expected: usize,
        actual: usize,
    },

    /// The underlying driver failed.
    #[error("transport error: {0}")]
    Transport(#[from] debugport_transport::TransportError),

    /// The byte stream was closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// The transport was asked to stop.
    #[error("transport shut down")]
    Shutdown,

    /// The writer did not finish sending within the allowed time.
    #[error("send timed out after {0:?}")]
    SendTimeout(Duration),
}

pub type Result<T> = std::result::Result<T, FrameError>;
