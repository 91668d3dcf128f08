use std::io::{self, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serialport::{DataBits, FlowControl, Parity, StopBits};
use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::traits::DebugPortDriver;

/// Line settings for a serial debug port.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Baud rate. Default: 115200.
    pub baud_rate: u32,
    /// How long a single-byte read may block. Must be non-zero: the reader
    /// half only notices a shutdown request when a read times out.
    pub read_timeout: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud_rate: 115_200,
            read_timeout: Duration::from_millis(100),
        }
    }
}

/// Serial port driver (8N1, no flow control).
///
/// Closing one handle does not wake a read blocked on a clone; the clone
/// returns [`TransportError::Timeout`] within `read_timeout` instead.
pub struct SerialPort {
    path: PathBuf,
    config: SerialConfig,
    port: Option<Box<dyn serialport::SerialPort>>,
}

impl SerialPort {
    /// Create a driver for `path`. The device is not touched until
    /// [`open`](DebugPortDriver::open).
    pub fn new(path: impl AsRef<Path>, config: SerialConfig) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            config,
            port: None,
        }
    }

    /// Create and open a driver in one step.
    pub fn open_path(path: impl AsRef<Path>, config: SerialConfig) -> Result<Self> {
        let mut port = Self::new(path, config);
        port.open()?;
        Ok(port)
    }

    /// The device path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The line settings this driver applies on open.
    pub fn config(&self) -> &SerialConfig {
        &self.config
    }

    fn port(&mut self) -> Result<&mut Box<dyn serialport::SerialPort>> {
        self.port.as_mut().ok_or(TransportError::NotOpen)
    }

    fn validate(&self) -> Result<()> {
        if self.config.baud_rate == 0 {
            return Err(TransportError::UnsupportedBaudRate(0));
        }
        if self.config.read_timeout.is_zero() {
            return Err(TransportError::Configure {
                path: self.path.clone(),
                source: io::Error::new(ErrorKind::InvalidInput, "read timeout must be non-zero"),
            });
        }
        Ok(())
    }

    fn open_error(&self, err: serialport::Error) -> TransportError {
        let path = self.path.clone();
        match err.kind() {
            serialport::ErrorKind::InvalidInput => TransportError::Configure {
                path,
                source: err.into(),
            },
            _ => TransportError::Open {
                path,
                source: err.into(),
            },
        }
    }
}

/// Map a read failure onto the driver contract.
fn read_error(err: io::Error) -> TransportError {
    match err.kind() {
        ErrorKind::TimedOut | ErrorKind::WouldBlock => TransportError::Timeout,
        ErrorKind::BrokenPipe | ErrorKind::UnexpectedEof => TransportError::Closed,
        _ => TransportError::Io(err),
    }
}

impl DebugPortDriver for SerialPort {
    fn open(&mut self) -> Result<()> {
        if self.port.is_some() {
            return Ok(());
        }
        self.validate()?;
        let port = serialport::new(self.path.to_string_lossy(), self.config.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(self.config.read_timeout)
            .open()
            .map_err(|err| self.open_error(err))?;
        info!(path = ?self.path, baud = self.config.baud_rate, "opened serial port");
        self.port = Some(port);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.port.take().is_some() {
            debug!(path = ?self.path, "closed serial port");
        }
        Ok(())
    }

    fn send(&mut self, bytes: &[u8]) -> Result<usize> {
        let port = self.port()?;
        loop {
            match port.write(bytes) {
                Ok(n) => return Ok(n),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            }
        }
    }

    fn receive(&mut self) -> Result<u8> {
        let port = self.port()?;
        let mut byte = [0u8; 1];
        loop {
            match port.read(&mut byte) {
                Ok(1) => return Ok(byte[0]),
                Ok(_) => return Err(TransportError::Closed),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(read_error(err)),
            }
        }
    }

    fn try_clone(&self) -> Result<Self> {
        let port = match &self.port {
            Some(port) => Some(port.try_clone().map_err(io::Error::from)?),
            None => None,
        };
        Ok(Self {
            path: self.path.clone(),
            config: self.config.clone(),
            port,
        })
    }

    fn driver_name(&self) -> &'static str {
        "serial"
    }
}

impl std::fmt::Debug for SerialPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialPort")
            .field("path", &self.path)
            .field("config", &self.config)
            .field("open", &self.port.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_before_open_is_rejected() {
        let mut port = SerialPort::new("/dev/null", SerialConfig::default());
        assert!(matches!(port.send(b"x"), Err(TransportError::NotOpen)));
        assert!(matches!(port.receive(), Err(TransportError::NotOpen)));
    }

    #[test]
    fn open_missing_device_reports_path() {
        let mut port = SerialPort::new(
            "/dev/debugport-does-not-exist",
            SerialConfig::default(),
        );
        let err = port.open().unwrap_err();
        assert!(matches!(err, TransportError::Open { .. }));
        assert!(err.to_string().contains("debugport-does-not-exist"));
    }

    #[test]
    #[cfg(unix)]
    fn open_non_tty_fails() {
        let mut port = SerialPort::new("/dev/null", SerialConfig::default());
        let err = port.open().unwrap_err();
        assert!(matches!(
            err,
            TransportError::Open { .. } | TransportError::Configure { .. }
        ));
    }

    #[test]
    fn zero_baud_rate_is_rejected_before_opening() {
        let mut port = SerialPort::new(
            "/dev/debugport-does-not-exist",
            SerialConfig {
                baud_rate: 0,
                ..SerialConfig::default()
            },
        );
        assert!(matches!(
            port.open(),
            Err(TransportError::UnsupportedBaudRate(0))
        ));
    }

    #[test]
    fn zero_read_timeout_is_rejected_before_opening() {
        let mut port = SerialPort::new(
            "/dev/debugport-does-not-exist",
            SerialConfig {
                read_timeout: Duration::ZERO,
                ..SerialConfig::default()
            },
        );
        let err = port.open().unwrap_err();
        assert!(matches!(err, TransportError::Configure { .. }));
    }

    #[test]
    fn read_timeouts_map_to_driver_timeout() {
        assert!(matches!(
            read_error(io::Error::from(ErrorKind::TimedOut)),
            TransportError::Timeout
        ));
        assert!(matches!(
            read_error(io::Error::from(ErrorKind::BrokenPipe)),
            TransportError::Closed
        ));
        assert!(matches!(
            read_error(io::Error::from(ErrorKind::PermissionDenied)),
            TransportError::Io(_)
        ));
    }

    #[test]
    fn clone_of_closed_port_stays_closed() {
        let port = SerialPort::new("/dev/null", SerialConfig::default());
        let mut clone = port.try_clone().unwrap();
        assert!(matches!(clone.receive(), Err(TransportError::NotOpen)));
    }
}
