//! Transport layer abstraction.
//!
//! Two seams: `SerialLink` moves raw bytes to and from the DMX interface, and
//! `RdmTransport` turns an RDM request into a classified reply. Keeping them
//! apart lets the Robe framing run against a mock link in tests, and lets the
//! discovery logic run against a simulated bus with no framing at all.

use std::time::Duration;

use thiserror::Error;

use crate::protocol::rdm::{RdmError, RdmRequest, RdmResponse};
use crate::protocol::uid::Uid;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Failed to open device: {0}")]
    OpenFailed(String),

    #[error("Envelope checksum mismatch: expected 0x{expected:02X}, got 0x{actual:02X}")]
    Checksum { expected: u8, actual: u8 },

    #[error("Truncated frame: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("Framing error: {0}")]
    Framing(String),

    #[error("Timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Device disconnected")]
    Disconnected,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("RDM error: {0}")]
    Rdm(#[from] RdmError),
}

impl TransportError {
    /// Errors caused by corrupted data rather than a dead link. During a
    /// unique branch these mean several responders answered at once.
    pub fn is_garbled(&self) -> bool {
        matches!(
            self,
            TransportError::Checksum { .. }
                | TransportError::Truncated { .. }
                | TransportError::Framing(_)
                | TransportError::Rdm(_)
        )
    }

    /// The link itself is gone; nothing more can be sent on it.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            TransportError::Disconnected | TransportError::Io(_) | TransportError::OpenFailed(_)
        )
    }
}

/// Raw byte link to a serial device.
pub trait SerialLink: Send {
    /// Write the whole buffer.
    fn write(&mut self, data: &[u8]) -> Result<usize, TransportError>;

    /// Read whatever arrives within `timeout`. Returns at least one byte or
    /// `TransportError::Timeout`.
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError>;

    /// Discard bytes received but not yet read.
    fn clear_input(&mut self) -> Result<(), TransportError>;

    /// Check if the link is still usable.
    fn is_connected(&self) -> bool;

    /// Port name for logs and record bus positions.
    fn name(&self) -> &str;
}

/// Classified answer to one RDM request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RdmReply {
    /// Nobody answered (or the request was a broadcast).
    Silent,
    /// A single clean discovery response.
    Discovered(Uid),
    /// A decoded RDM message.
    Response(RdmResponse),
}

/// Request/response RDM transactions.
pub trait RdmTransport: Send {
    fn transact(&mut self, request: &RdmRequest) -> Result<RdmReply, TransportError>;

    /// Name of the bus, used as the record's bus position.
    fn port_name(&self) -> &str;
}

impl<T: RdmTransport + ?Sized> RdmTransport for Box<T> {
    fn transact(&mut self, request: &RdmRequest) -> Result<RdmReply, TransportError> {
        (**self).transact(request)
    }

    fn port_name(&self) -> &str {
        (**self).port_name()
    }
}
