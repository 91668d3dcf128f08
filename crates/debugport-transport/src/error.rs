use std::path::PathBuf;

/// Errors that can occur in debug port driver operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to open the device.
    #[error("failed to open {}: {source}", path.display())]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Line settings (baud rate, read timeout) were rejected.
    #[error("failed to configure {}: {source}", path.display())]
    Configure {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The requested baud rate cannot be applied.
    #[error("unsupported baud rate {0}")]
    UnsupportedBaudRate(u32),

    /// An I/O error occurred on the byte stream.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No byte arrived within the driver's read timeout.
    #[error("read timed out")]
    Timeout,

    /// The driver is not open.
    #[error("port is not open")]
    NotOpen,

    /// The remote end closed the stream.
    #[error("port closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, TransportError>;
