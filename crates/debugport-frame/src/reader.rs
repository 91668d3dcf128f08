use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::{BufMut, BytesMut};
use debugport_transport::{DebugPortDriver, TransportError};
use tracing::{trace, warn};

use crate::codec::{
    checksum, DebugPortHeader, Packet, TransportConfig, FRAMING_SIGNATURE, HEADER_SIZE,
};
use crate::error::{FrameError, Result};

/// Tracks how much of the framing signature has been seen.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SignatureMatcher {
    matched: usize,
}

impl SignatureMatcher {
    /// Feed one byte. Returns `true` once the full signature has been seen,
    /// after which the matcher is reset for the next packet.
    ///
    /// A mismatching byte restarts the search; if that byte is itself the
    /// first signature byte the match restarts at position 1, so a false
    /// start like `C E C E F S` still locks onto the second `C`.
    pub fn push(&mut self, byte: u8) -> bool {
        if byte == FRAMING_SIGNATURE[self.matched] {
            self.matched += 1;
        } else if byte == FRAMING_SIGNATURE[0] {
            self.matched = 1;
        } else {
            self.matched = 0;
        }

        if self.matched == FRAMING_SIGNATURE.len() {
            self.matched = 0;
            return true;
        }
        false
    }

    /// Number of signature bytes matched so far.
    pub fn matched(&self) -> usize {
        self.matched
    }
}

/// Counters for framing problems observed by a reader.
#[derive(Debug, Default)]
pub struct FrameStats {
    packets: AtomicU64,
    header_checksum_failures: AtomicU64,
    payload_checksum_failures: AtomicU64,
    oversized_headers: AtomicU64,
    discarded_bytes: AtomicU64,
}

/// Point-in-time copy of [`FrameStats`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FrameStatsSnapshot {
    /// Packets that passed every check.
    pub packets: u64,
    pub header_checksum_failures: u64,
    pub payload_checksum_failures: u64,
    /// Headers whose payload size exceeded the configured maximum.
    pub oversized_headers: u64,
    /// Bytes skipped while searching for a framing signature.
    pub discarded_bytes: u64,
}

impl FrameStats {
    pub fn snapshot(&self) -> FrameStatsSnapshot {
        FrameStatsSnapshot {
            packets: self.packets.load(Ordering::Relaxed),
            header_checksum_failures: self.header_checksum_failures.load(Ordering::Relaxed),
            payload_checksum_failures: self.payload_checksum_failures.load(Ordering::Relaxed),
            oversized_headers: self.oversized_headers.load(Ordering::Relaxed),
            discarded_bytes: self.discarded_bytes.load(Ordering::Relaxed),
        }
    }
}

/// Carves validated packets out of a noisy byte stream.
///
/// Reads one byte at a time from the driver, hunts for the framing
/// signature, then validates header and payload checksums. Corrupt packets
/// are reported and skipped; the reader always resumes the signature search
/// on the byte after the rejected signature, so a packet starting inside a
/// rejected header is still found.
pub struct PacketReader<D> {
    inner: D,
    config: TransportConfig,
    matcher: SignatureMatcher,
    /// Bytes of a rejected header, rescanned before reading the driver again.
    pushback: VecDeque<u8>,
    stats: Arc<FrameStats>,
    shutdown: Option<Arc<AtomicBool>>,
}

impl<D: DebugPortDriver> PacketReader<D> {
    /// Create a new packet reader with default configuration.
    pub fn new(inner: D) -> Self {
        Self::with_config(inner, TransportConfig::default())
    }

    /// Create a new packet reader with explicit configuration.
    pub fn with_config(inner: D, config: TransportConfig) -> Self {
        Self {
            inner,
            config,
            matcher: SignatureMatcher::default(),
            pushback: VecDeque::new(),
            stats: Arc::new(FrameStats::default()),
            shutdown: None,
        }
    }

    /// Stop with [`FrameError::Shutdown`] at the next driver read timeout
    /// after `flag` is set.
    pub fn with_shutdown(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown = Some(flag);
        self
    }

    /// Record counters into `stats` instead of a private instance.
    pub fn with_stats(mut self, stats: Arc<FrameStats>) -> Self {
        self.stats = stats;
        self
    }

    /// Read the next valid packet (blocking).
    ///
    /// Checksum failures never surface here; they are logged, counted and
    /// skipped. Errors are limited to the stream ending, shutdown, or a
    /// driver failure.
    pub fn read_packet(&mut self) -> Result<Packet> {
        loop {
            self.sync()?;

            let mut raw = [0u8; HEADER_SIZE];
            raw[..FRAMING_SIGNATURE.len()].copy_from_slice(&FRAMING_SIGNATURE);
            for slot in raw.iter_mut().skip(FRAMING_SIGNATURE.len()) {
                *slot = self.read_byte()?;
            }
            let header = DebugPortHeader::decode(&raw)?;

            let computed = header.compute_header_checksum();
            if computed != header.header_checksum {
                warn!(
                    received = header.header_checksum,
                    computed, "header checksum mismatch, resynchronizing"
                );
                self.stats
                    .header_checksum_failures
                    .fetch_add(1, Ordering::Relaxed);
                self.rescan(&raw[1..]);
                continue;
            }

            let payload_len = header.payload_size as usize;
            if payload_len > self.config.max_payload_size {
                warn!(
                    size = payload_len,
                    max = self.config.max_payload_size,
                    "header claims oversized payload, discarding"
                );
                self.stats.oversized_headers.fetch_add(1, Ordering::Relaxed);
                self.rescan(&raw[1..]);
                continue;
            }

            let mut payload = BytesMut::with_capacity(payload_len);
            for _ in 0..payload_len {
                payload.put_u8(self.read_byte()?);
            }

            let computed = checksum(&payload);
            if computed != header.payload_checksum {
                warn!(
                    received = header.payload_checksum,
                    computed,
                    packet_type = header.packet_type,
                    "payload checksum mismatch, dropping packet"
                );
                self.stats
                    .payload_checksum_failures
                    .fetch_add(1, Ordering::Relaxed);
                continue;
            }

            self.stats.packets.fetch_add(1, Ordering::Relaxed);
            trace!(
                packet_type = header.packet_type,
                size = payload_len,
                "packet received"
            );
            return Ok(Packet {
                header,
                payload: payload.freeze(),
            });
        }
    }

    /// Consume bytes until a complete framing signature has been seen.
    fn sync(&mut self) -> Result<()> {
        let mut consumed = 0u64;
        loop {
            let byte = self.read_byte()?;
            consumed += 1;
            if self.matcher.push(byte) {
                break;
            }
        }
        let skipped = consumed.saturating_sub(FRAMING_SIGNATURE.len() as u64);
        if skipped > 0 {
            trace!(skipped, "resynchronized on framing signature");
            self.stats
                .discarded_bytes
                .fetch_add(skipped, Ordering::Relaxed);
        }
        Ok(())
    }

    /// Queue `bytes` to be read again, ahead of anything already queued.
    fn rescan(&mut self, bytes: &[u8]) {
        for &byte in bytes.iter().rev() {
            self.pushback.push_front(byte);
        }
    }

    fn read_byte(&mut self) -> Result<u8> {
        if let Some(byte) = self.pushback.pop_front() {
            return Ok(byte);
        }
        loop {
            match self.inner.receive() {
                Ok(byte) => return Ok(byte),
                Err(TransportError::Timeout) => {
                    if self.is_shutdown() {
                        return Err(FrameError::Shutdown);
                    }
                }
                Err(TransportError::Closed) => return Err(FrameError::ConnectionClosed),
                Err(err) => return Err(FrameError::Transport(err)),
            }
        }
    }

    fn is_shutdown(&self) -> bool {
        self.shutdown
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Acquire))
    }

    /// Framing counters for this reader.
    pub fn stats(&self) -> FrameStatsSnapshot {
        self.stats.snapshot()
    }

    /// Borrow the underlying driver.
    pub fn get_ref(&self) -> &D {
        &self.inner
    }

    /// Mutably borrow the underlying driver.
    pub fn get_mut(&mut self) -> &mut D {
        &mut self.inner
    }

    /// Consume the reader and return the inner driver.
    pub fn into_inner(self) -> D {
        self.inner
    }

    /// Current reader configuration.
    pub fn config(&self) -> &TransportConfig {
        &self.config
    }
}
