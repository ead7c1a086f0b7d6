//! RDM over the Robe Universal Interface serial API.
//!
//! Envelope: `A5 type len_lo len_hi hdr_crc data.. crc`, both checksums being
//! the low byte of a plain byte sum. RDM messages travel without their 0xCC
//! start code, and the interface appends four bytes after the RDM data in
//! both directions.

use std::time::{Duration, Instant};

use tracing::{debug, instrument, trace, warn};

use super::traits::{RdmReply, RdmTransport, SerialLink, TransportError};
use crate::protocol::constants::*;
use crate::protocol::rdm::{RdmRequest, RdmResponse, decode_discovery_response};
use crate::protocol::uid::Uid;

/// Default wait for one transaction.
pub const DEFAULT_TRANSACTION_TIMEOUT: Duration = Duration::from_millis(200);

fn byte_sum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

/// One decoded envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RobeFrame {
    pub packet_type: u8,
    pub data: Vec<u8>,
}

impl RobeFrame {
    pub fn new(packet_type: u8, data: Vec<u8>) -> Self {
        Self { packet_type, data }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let len = self.data.len() as u16;
        let mut buf = Vec::with_capacity(ROBE_HEADER_LEN + self.data.len() + 1);
        buf.push(ROBE_HEADER);
        buf.push(self.packet_type);
        buf.extend_from_slice(&len.to_le_bytes());
        buf.push(byte_sum(&buf));
        buf.extend_from_slice(&self.data);
        buf.push(byte_sum(&buf));
        buf
    }

    /// RDM payload with the interface trailer removed.
    pub fn rdm_data(&self) -> &[u8] {
        let end = self.data.len().saturating_sub(ROBE_TRAILER_LEN);
        &self.data[..end]
    }

    /// Try to take one complete frame off the front of `buf`.
    ///
    /// Bytes before the first 0xA5 are discarded. `Ok(None)` means more bytes
    /// are needed.
    pub fn take_from(buf: &mut Vec<u8>) -> Result<Option<RobeFrame>, TransportError> {
        match buf.iter().position(|b| *b == ROBE_HEADER) {
            Some(0) => {}
            Some(start) => {
                trace!(skipped = start, "Discarding bytes before envelope");
                buf.drain(..start);
            }
            None => {
                buf.clear();
                return Ok(None);
            }
        }
        if buf.len() < ROBE_HEADER_LEN {
            return Ok(None);
        }
        let header_crc = byte_sum(&buf[..4]);
        if header_crc != buf[4] {
            let actual = buf[4];
            buf.clear();
            return Err(TransportError::Checksum {
                expected: header_crc,
                actual,
            });
        }
        let total = match Self::expected_len(buf) {
            Some(total) if buf.len() >= total => total,
            _ => return Ok(None),
        };
        let crc = byte_sum(&buf[..total - 1]);
        let actual = buf[total - 1];
        let frame = RobeFrame {
            packet_type: buf[1],
            data: buf[ROBE_HEADER_LEN..total - 1].to_vec(),
        };
        buf.drain(..total);
        if crc != actual {
            return Err(TransportError::Checksum {
                expected: crc,
                actual,
            });
        }
        Ok(Some(frame))
    }

    /// Full envelope length once the header is in.
    fn expected_len(buf: &[u8]) -> Option<usize> {
        if buf.len() < 4 {
            return None;
        }
        let len = u16::from_le_bytes([buf[2], buf[3]]) as usize;
        Some(ROBE_HEADER_LEN + len + 1)
    }
}

/// `RdmTransport` speaking the Robe envelope over any `SerialLink`.
pub struct RobeTransport<L: SerialLink> {
    link: L,
    transaction: u8,
    timeout: Duration,
    source: Uid,
    /// Received bytes not yet consumed as a frame.
    rx: Vec<u8>,
}

impl<L: SerialLink> RobeTransport<L> {
    pub fn new(link: L) -> Self {
        Self {
            link,
            transaction: 0,
            timeout: DEFAULT_TRANSACTION_TIMEOUT,
            source: Uid::new(CONTROLLER_UID),
            rx: Vec::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn into_link(self) -> L {
        self.link
    }

    /// Ask the interface to identify itself.
    #[instrument(level = "debug", skip(self), fields(port = %self.link.name()))]
    pub fn probe(&mut self) -> Result<bool, TransportError> {
        self.send_frame(&RobeFrame::new(PACKET_TYPE_RDM_INFO_COMMAND, Vec::new()))?;
        let deadline = Instant::now() + self.timeout;
        loop {
            match self.read_frame(deadline) {
                Ok(Some(reply)) if reply.packet_type == PACKET_TYPE_RDM_INFO_RESPONSE => return Ok(true),
                Ok(Some(reply)) => trace!(packet_type = reply.packet_type, "Skipping frame while probing"),
                Ok(None) => return Ok(false),
                Err(e) if e.is_garbled() => return Ok(false),
                Err(e) => return Err(e),
            }
        }
    }

    fn next_transaction(&mut self) -> u8 {
        let tn = self.transaction;
        self.transaction = self.transaction.wrapping_add(1);
        tn
    }

    /// Drop whatever arrived since the last transaction, then write `frame`.
    fn send_frame(&mut self, frame: &RobeFrame) -> Result<(), TransportError> {
        self.link.clear_input()?;
        if !self.rx.is_empty() {
            debug!(len = self.rx.len(), "Discarding stale input");
            self.rx.clear();
        }
        self.link.write(&frame.to_bytes())?;
        Ok(())
    }

    /// Read until one frame is assembled. `Ok(None)` when nothing arrived
    /// before `deadline`.
    fn read_frame(&mut self, deadline: Instant) -> Result<Option<RobeFrame>, TransportError> {
        let mut chunk = [0u8; 256];
        loop {
            if let Some(frame) = RobeFrame::take_from(&mut self.rx)? {
                trace!(packet_type = frame.packet_type, len = frame.data.len(), "Frame received");
                return Ok(Some(frame));
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            let read = if remaining.is_zero() {
                Err(TransportError::Timeout {
                    timeout_ms: self.timeout.as_millis() as u64,
                })
            } else {
                self.link.read(&mut chunk, remaining)
            };
            match read {
                Ok(n) => self.rx.extend_from_slice(&chunk[..n]),
                Err(TransportError::Timeout { .. }) if self.rx.is_empty() => return Ok(None),
                Err(TransportError::Timeout { .. }) => {
                    let expected = RobeFrame::expected_len(&self.rx).unwrap_or(ROBE_HEADER_LEN + 1);
                    let actual = self.rx.len();
                    self.rx.clear();
                    return Err(TransportError::Truncated { expected, actual });
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Classify one frame against the request it should answer. `None` when
    /// the frame belongs to some other transaction.
    fn match_reply(
        &self,
        request: &RdmRequest,
        tn: u8,
        reply: &RobeFrame,
    ) -> Result<Option<RdmReply>, TransportError> {
        let branch = request.is_unique_branch();
        match reply.packet_type {
            PACKET_TYPE_RDM_DISCOVERY_RESPONSE if branch => {
                let rdm = reply.rdm_data();
                if rdm.is_empty() {
                    return Ok(Some(RdmReply::Silent));
                }
                Ok(Some(RdmReply::Discovered(decode_discovery_response(rdm)?)))
            }
            PACKET_TYPE_RDM_RESPONSE if !branch => {
                let rdm = reply.rdm_data();
                if rdm.is_empty() || request.is_broadcast() {
                    return Ok(Some(RdmReply::Silent));
                }
                let mut message = Vec::with_capacity(rdm.len() + 1);
                message.push(RDM_START_CODE);
                message.extend_from_slice(rdm);
                let response = RdmResponse::from_bytes(&message)?;
                let answers = response.transaction == tn
                    && response.pid == request.pid
                    && response.command_class == request.response_class()
                    && response.source == request.destination;
                if !answers {
                    warn!(
                        tn,
                        got_tn = response.transaction,
                        expected = pid_name(request.pid),
                        got = pid_name(response.pid),
                        source = %response.source,
                        "Skipping response to another request"
                    );
                    return Ok(None);
                }
                Ok(Some(RdmReply::Response(response)))
            }
            PACKET_TYPE_RDM_DISCOVERY_RESPONSE | PACKET_TYPE_RDM_RESPONSE | PACKET_TYPE_RDM_INFO_RESPONSE => {
                debug!(packet_type = reply.packet_type, "Skipping frame of another request kind");
                Ok(None)
            }
            other => Err(TransportError::Framing(format!(
                "unexpected packet type 0x{other:02X}"
            ))),
        }
    }
}

impl<L: SerialLink> RdmTransport for RobeTransport<L> {
    fn transact(&mut self, request: &RdmRequest) -> Result<RdmReply, TransportError> {
        if !self.link.is_connected() {
            return Err(TransportError::Disconnected);
        }
        let tn = self.next_transaction();
        let message = request.encode(self.source, tn)?;
        let packet_type = if request.is_unique_branch() {
            PACKET_TYPE_RDM_DISCOVERY_UNIQUE_BRANCH
        } else {
            PACKET_TYPE_RDM_PACKET_OUT
        };

        // Start code stays out of the envelope.
        let mut data = message[1..].to_vec();
        data.extend_from_slice(&rand::random::<[u8; ROBE_TRAILER_LEN]>());
        debug!(
            pid = pid_name(request.pid),
            dest = %request.destination,
            tn,
            "RDM request"
        );
        self.send_frame(&RobeFrame::new(packet_type, data))?;

        let deadline = Instant::now() + self.timeout;
        loop {
            let Some(reply) = self.read_frame(deadline)? else {
                return Ok(RdmReply::Silent);
            };
            if let Some(classified) = self.match_reply(request, tn, &reply)? {
                return Ok(classified);
            }
        }
    }

    fn port_name(&self) -> &str {
        self.link.name()
    }
}
