use crate::error::Result;

/// A byte-stream driver for a debug port.
///
/// This is the only thing the link layer needs from the physical transport:
/// open/close, write a fully framed packet, and read one byte at a time.
/// The reader and writer halves run on different threads, so a driver must
/// be able to hand out a second handle onto the same device via
/// [`try_clone`](DebugPortDriver::try_clone).
pub trait DebugPortDriver: Send + 'static {
    /// Open the underlying device. Opening an already-open driver is a no-op.
    fn open(&mut self) -> Result<()>;

    /// Close the underlying device. A read blocked on another handle either
    /// observes [`TransportError::Closed`](crate::TransportError::Closed) or
    /// returns [`TransportError::Timeout`](crate::TransportError::Timeout)
    /// once its read timeout elapses.
    fn close(&mut self) -> Result<()>;

    /// Write `bytes` and return how many were written.
    fn send(&mut self, bytes: &[u8]) -> Result<usize>;

    /// Block until one byte is available.
    ///
    /// Drivers with a read timeout return
    /// [`TransportError::Timeout`](crate::TransportError::Timeout) when it
    /// elapses so the caller can check for shutdown and call again.
    fn receive(&mut self) -> Result<u8>;

    /// Create a second handle onto the same device.
    fn try_clone(&self) -> Result<Self>
    where
        Self: Sized;

    /// Driver name for diagnostics.
    fn driver_name(&self) -> &'static str;
}

/// Write every byte of `bytes`, looping over short writes.
pub fn send_all<D: DebugPortDriver + ?Sized>(driver: &mut D, bytes: &[u8]) -> Result<()> {
    let mut offset = 0usize;
    while offset < bytes.len() {
        match driver.send(&bytes[offset..])? {
            0 => return Err(crate::TransportError::Closed),
            n => offset += n,
        }
    }
    Ok(())
}
