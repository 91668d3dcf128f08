//! In-memory loopback driver.
//!
//! [`MemoryPort::pair`] returns two connected ends: bytes sent on one end are
//! received on the other. Used to run the link layer against a simulated
//! target without hardware.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::{Result, TransportError};
use crate::traits::DebugPortDriver;

#[derive(Debug, Default)]
struct PipeState {
    buf: VecDeque<u8>,
    closed: bool,
    stalled: bool,
}

/// One direction of the loopback.
#[derive(Debug, Default)]
struct Pipe {
    state: Mutex<PipeState>,
    changed: Condvar,
}

impl Pipe {
    fn lock(&self) -> MutexGuard<'_, PipeState> {
        // A panicking peer thread must not take the other end down with it.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn close(&self) {
        self.lock().closed = true;
        self.changed.notify_all();
    }
}

/// One end of an in-memory byte pipe pair.
#[derive(Debug, Clone)]
pub struct MemoryPort {
    rx: Arc<Pipe>,
    tx: Arc<Pipe>,
    read_timeout: Option<Duration>,
}

impl MemoryPort {
    /// Create two connected, already-open ends.
    pub fn pair() -> (Self, Self) {
        let a_to_b = Arc::new(Pipe::default());
        let b_to_a = Arc::new(Pipe::default());
        let a = Self {
            rx: Arc::clone(&b_to_a),
            tx: Arc::clone(&a_to_b),
            read_timeout: None,
        };
        let b = Self {
            rx: a_to_b,
            tx: b_to_a,
            read_timeout: None,
        };
        (a, b)
    }

    /// Make [`receive`](DebugPortDriver::receive) give up with
    /// [`TransportError::Timeout`] after `timeout`.
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    /// Block every subsequent `send` on this end until
    /// [`resume_writes`](Self::resume_writes) or close.
    ///
    /// Simulates a device whose transmit path has stopped draining.
    pub fn stall_writes(&self) {
        self.tx.lock().stalled = true;
    }

    /// Undo [`stall_writes`](Self::stall_writes).
    pub fn resume_writes(&self) {
        self.tx.lock().stalled = false;
        self.tx.changed.notify_all();
    }

    /// Inject raw bytes as if the peer had sent them.
    pub fn inject(&self, bytes: &[u8]) {
        self.rx.lock().buf.extend(bytes.iter().copied());
        self.rx.changed.notify_all();
    }

    /// Number of bytes waiting to be received on this end.
    pub fn pending(&self) -> usize {
        self.rx.lock().buf.len()
    }
}

impl DebugPortDriver for MemoryPort {
    fn open(&mut self) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        debug!("closing memory port");
        self.tx.close();
        self.rx.close();
        Ok(())
    }

    fn send(&mut self, bytes: &[u8]) -> Result<usize> {
        let mut state = self.tx.lock();
        while state.stalled && !state.closed {
            state = self
                .tx
                .changed
                .wait(state)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        if state.closed {
            return Err(TransportError::Closed);
        }
        state.buf.extend(bytes.iter().copied());
        drop(state);
        self.tx.changed.notify_all();
        Ok(bytes.len())
    }

    fn receive(&mut self) -> Result<u8> {
        let deadline = self.read_timeout.map(|timeout| Instant::now() + timeout);
        let mut state = self.rx.lock();
        loop {
            if let Some(byte) = state.buf.pop_front() {
                return Ok(byte);
            }
            if state.closed {
                return Err(TransportError::Closed);
            }
            state = match deadline {
                None => self
                    .rx
                    .changed
                    .wait(state)
                    .unwrap_or_else(|poisoned| poisoned.into_inner()),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(TransportError::Timeout);
                    }
                    self.rx
                        .changed
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(|poisoned| poisoned.into_inner())
                        .0
                }
            };
        }
    }

    fn try_clone(&self) -> Result<Self> {
        Ok(self.clone())
    }

    fn driver_name(&self) -> &'static str {
        "memory"
    }
}
