//! Host-side link layer for embedded debug ports.
//!
//! debugport talks to an embedded target over a noisy byte stream such as a
//! UART: checksummed packet framing with resynchronization, one command in
//! flight at a time with sequence-number correlation and timeouts, and
//! decoding of the target's binary log records.
//!
//! # Crate Structure
//!
//! - [`transport`]: Byte-stream drivers (in-memory loopback, serial port)
//! - [`frame`]: Packet framing, checksums and the threaded packet link
//! - [`router`]: Command routing, ping, log decoding (behind `router` feature)

/// Re-export transport types.
pub mod transport {
    pub use debugport_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use debugport_frame::*;
}

/// Re-export router types (requires `router` feature).
#[cfg(feature = "router")]
pub mod router {
    pub use debugport_router::*;
}
