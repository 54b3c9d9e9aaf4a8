//! Error types for the RPC framing driver.

use std::io;

use chainpack_wire::UnpackError;
use thiserror::Error;

/// Errors surfaced by [`RpcDriver`](crate::driver::RpcDriver).
///
/// Every variant except [`DriverError::QueueFull`] is fatal to its
/// connection: the stream position can no longer be trusted, so the caller
/// should close the transport and discard the driver.
#[derive(Error, Debug)]
pub enum DriverError {
    /// Inbound bytes can never decode into a value.
    #[error("malformed inbound data: {0}")]
    Malformed(#[source] UnpackError),
    /// Peer announced a protocol revision this driver does not speak.
    #[error("unsupported protocol version {0}")]
    ProtocolVersionMismatch(u64),
    /// Inbound packet advertises a length above the configured cap.
    #[error("inbound packet of {0} bytes exceeds the configured maximum")]
    FrameTooLarge(usize),
    /// Send queue is at capacity; retry once queued bytes drain.
    #[error("send queue full")]
    QueueFull,
    /// Transport accepted only part of a packet header.
    #[error("packet header split across writes")]
    HeaderWrite,
    /// Transport reported writable but accepted zero bytes.
    #[error("transport accepted no bytes")]
    Stalled,
    /// Message carries none of the request, response, or notify shapes.
    #[error("message has no rpc type")]
    UndefinedMessage,
    /// Transport-level I/O failure.
    #[error("transport: {0}")]
    Transport(#[from] io::Error),
}

impl DriverError {
    /// Whether the connection can keep running after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, DriverError::QueueFull)
    }
}
