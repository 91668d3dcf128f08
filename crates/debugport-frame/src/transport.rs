//! Threaded packet transport.
//!
//! [`PacketTransport::start`] splits a driver into a reader thread, which
//! runs the resynchronizing receive loop and appends validated packets to a
//! FIFO queue, and a writer thread, which owns the send side. Callers send
//! through a [`PacketSender`] with an optional bounded wait, and pop
//! received packets without blocking.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use debugport_transport::DebugPortDriver;
use tracing::{debug, error, info};

use crate::codec::{Packet, TransportConfig};
use crate::error::{FrameError, Result};
use crate::reader::{FrameStats, FrameStatsSnapshot, PacketReader};
use crate::writer::PacketWriter;

struct WriteRequest {
    payload: Bytes,
    done: Sender<Result<()>>,
}

/// Cloneable handle for sending command payloads through the writer thread.
#[derive(Clone)]
pub struct PacketSender {
    requests: Sender<WriteRequest>,
    max_payload_size: usize,
}

impl PacketSender {
    /// Send `payload` as a command request and wait for the write to finish.
    pub fn send(&self, payload: impl Into<Bytes>) -> Result<()> {
        let done = self.submit(payload.into())?;
        done.recv().map_err(|_| FrameError::ConnectionClosed)?
    }

    /// Send `payload`, waiting at most `timeout` for the write to finish.
    ///
    /// On timeout the write is abandoned by the caller but may still complete
    /// later on the writer thread.
    pub fn send_with_timeout(&self, payload: impl Into<Bytes>, timeout: Duration) -> Result<()> {
        let done = self.submit(payload.into())?;
        match done.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(FrameError::SendTimeout(timeout)),
            Err(RecvTimeoutError::Disconnected) => Err(FrameError::ConnectionClosed),
        }
    }

    fn submit(&self, payload: Bytes) -> Result<Receiver<Result<()>>> {
        if payload.len() > self.max_payload_size {
            return Err(FrameError::PayloadTooLarge {
                size: payload.len(),
                max: self.max_payload_size,
            });
        }
        let (done, wait) = mpsc::channel();
        self.requests
            .send(WriteRequest { payload, done })
            .map_err(|_| FrameError::ConnectionClosed)?;
        Ok(wait)
    }
}

impl std::fmt::Debug for PacketSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketSender")
            .field("max_payload_size", &self.max_payload_size)
            .finish()
    }
}

/// Owns one driver's reader and writer threads and the inbound packet queue.
///
/// Dropping the transport requests shutdown and closes the driver.
pub struct PacketTransport {
    queue: Receiver<Packet>,
    sender: PacketSender,
    stats: Arc<FrameStats>,
    shutdown: Arc<AtomicBool>,
    control: Box<dyn DebugPortDriver>,
}

impl PacketTransport {
    /// Open `driver` and start the reader and writer threads.
    pub fn start<D: DebugPortDriver>(mut driver: D, config: TransportConfig) -> Result<Self> {
        driver.open()?;
        let name = driver.driver_name();
        let reader_port = driver.try_clone()?;
        let writer_port = driver.try_clone()?;

        let stats = Arc::new(FrameStats::default());
        let shutdown = Arc::new(AtomicBool::new(false));

        let (packet_tx, queue) = mpsc::channel();
        let mut reader = PacketReader::with_config(reader_port, config.clone())
            .with_stats(Arc::clone(&stats))
            .with_shutdown(Arc::clone(&shutdown));
        thread::Builder::new()
            .name(format!("debugport-rx-{name}"))
            .spawn(move || loop {
                match reader.read_packet() {
                    Ok(packet) => {
                        if packet_tx.send(packet).is_err() {
                            debug!("packet queue dropped, stopping receive loop");
                            break;
                        }
                    }
                    Err(FrameError::Shutdown) | Err(FrameError::ConnectionClosed) => {
                        debug!("receive loop finished");
                        break;
                    }
                    Err(err) => {
                        error!(error = %err, "receive loop failed");
                        break;
                    }
                }
            })
            .map_err(|err| FrameError::Transport(err.into()))?;

        let (requests, request_rx) = mpsc::channel::<WriteRequest>();
        let mut writer = PacketWriter::with_config(writer_port, config.clone());
        thread::Builder::new()
            .name(format!("debugport-tx-{name}"))
            .spawn(move || {
                for request in request_rx {
                    let result = writer.send(&request.payload);
                    if let Err(err) = &result {
                        error!(error = %err, "packet send failed");
                    }
                    // The caller may have given up waiting.
                    let _ = request.done.send(result);
                }
                debug!("send loop finished");
            })
            .map_err(|err| FrameError::Transport(err.into()))?;

        info!(driver = name, max_payload = config.max_payload_size, "packet transport started");

        Ok(Self {
            queue,
            sender: PacketSender {
                requests,
                max_payload_size: config.max_payload_size,
            },
            stats,
            shutdown,
            control: Box::new(driver),
        })
    }

    /// Pop the oldest received packet without blocking.
    pub fn get_next_packet(&self) -> Option<Packet> {
        match self.queue.try_recv() {
            Ok(packet) => Some(packet),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Pop the oldest received packet, waiting at most `timeout`.
    ///
    /// Returns `Ok(None)` on timeout and [`FrameError::ConnectionClosed`] once
    /// the receive loop has ended and the queue is drained.
    pub fn next_packet_timeout(&self, timeout: Duration) -> Result<Option<Packet>> {
        match self.queue.recv_timeout(timeout) {
            Ok(packet) => Ok(Some(packet)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(FrameError::ConnectionClosed),
        }
    }

    /// Send a command payload and wait for the write to complete.
    pub fn send(&self, payload: impl Into<Bytes>) -> Result<()> {
        self.sender.send(payload)
    }

    /// A handle for sending from other threads.
    pub fn sender(&self) -> PacketSender {
        self.sender.clone()
    }

    /// Shared framing counters.
    pub fn stats_handle(&self) -> Arc<FrameStats> {
        Arc::clone(&self.stats)
    }

    /// Framing counters.
    pub fn stats(&self) -> FrameStatsSnapshot {
        self.stats.snapshot()
    }

    /// Stop the receive loop and close the driver.
    pub fn shutdown(&mut self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Err(err) = self.control.close() {
            error!(error = %err, "failed to close driver");
        }
        debug!("packet transport shut down");
    }
}

impl Drop for PacketTransport {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for PacketTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketTransport")
            .field("driver", &self.control.driver_name())
            .field("stats", &self.stats.snapshot())
            .finish()
    }
}
