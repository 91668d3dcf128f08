use bytes::BytesMut;
use debugport_transport::{send_all, DebugPortDriver, TransportError};
use tracing::trace;

use crate::codec::{encode_packet, PacketType, TransportConfig, MAX_PACKET_SIZE};
use crate::error::{FrameError, Result};

/// Frames payloads and writes complete packets to a driver.
pub struct PacketWriter<D> {
    inner: D,
    buf: BytesMut,
    config: TransportConfig,
}

impl<D: DebugPortDriver> PacketWriter<D> {
    /// Create a new packet writer with default configuration.
    pub fn new(inner: D) -> Self {
        Self::with_config(inner, TransportConfig::default())
    }

    /// Create a new packet writer with explicit configuration.
    pub fn with_config(inner: D, config: TransportConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(MAX_PACKET_SIZE),
            config,
        }
    }

    /// Frame `payload` as a command request and write it (blocking).
    pub fn send(&mut self, payload: &[u8]) -> Result<()> {
        self.send_packet(PacketType::CommandRequest, payload)
    }

    /// Frame `payload` with an explicit packet type and write it (blocking).
    ///
    /// The host only ever originates command requests; other types are for
    /// target simulations.
    pub fn send_packet(&mut self, packet_type: PacketType, payload: &[u8]) -> Result<()> {
        self.buf.clear();
        encode_packet(
            packet_type,
            payload,
            self.config.max_payload_size,
            &mut self.buf,
        )?;

        send_all(&mut self.inner, &self.buf).map_err(|err| match err {
            TransportError::Closed => FrameError::ConnectionClosed,
            other => FrameError::Transport(other),
        })?;
        trace!(
            packet_type = packet_type.name(),
            size = payload.len(),
            "packet sent"
        );
        Ok(())
    }

    /// Borrow the underlying driver.
    pub fn get_ref(&self) -> &D {
        &self.inner
    }

    /// Mutably borrow the underlying driver.
    pub fn get_mut(&mut self) -> &mut D {
        &mut self.inner
    }

    /// Consume the writer and return the inner driver.
    pub fn into_inner(self) -> D {
        self.inner
    }

    /// Current writer configuration.
    pub fn config(&self) -> &TransportConfig {
        &self.config
    }
}
