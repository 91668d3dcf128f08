//! Byte-stream driver abstraction for embedded debug ports.
//!
//! The link layer above only needs open/close, "write these bytes" and
//! "give me the next byte". This crate defines that contract
//! ([`DebugPortDriver`]) and ships two drivers:
//! - [`MemoryPort`]: an in-memory loopback pair for tests and simulations
//! - [`SerialPort`]: a serial device opened through `serialport`
//!
//! This is the lowest layer of debugport. Everything else builds on top of
//! the [`DebugPortDriver`] trait provided here.

pub mod error;
pub mod memory;
pub mod serial;
pub mod traits;

pub use error::{Result, TransportError};
pub use memory::MemoryPort;
pub use serial::{SerialConfig, SerialPort};
pub use traits::{send_all, DebugPortDriver};
