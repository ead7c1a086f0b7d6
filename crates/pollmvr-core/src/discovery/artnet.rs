//! ArtPoll discovery over UDP.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use tracing::{debug, info, instrument, trace, warn};

use super::{CancellationToken, DiscoveryError, ScanOutcome};
use crate::heuristics::AddressPatterns;
use crate::protocol::artnet::{ArtPollReply, decode_art_poll_reply, encode_art_poll};
use crate::protocol::constants::{ARTNET_PORT, POLL_FLAG_REPLY_ON_CHANGE};
use crate::record::{DeviceKey, DeviceRecord};

/// Largest datagram we care about; ArtPollReply is 239 bytes.
const RECV_BUFFER_LEN: usize = 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtNetConfig {
    /// Address of the interface to poll from.
    pub bind_ip: Ipv4Addr,
    pub port: u16,
    /// Where the ArtPoll goes.
    pub broadcast: SocketAddrV4,
    /// Read timeout of one receive poll, in milliseconds.
    pub poll_interval_ms: u64,
}

impl Default for ArtNetConfig {
    fn default() -> Self {
        Self {
            bind_ip: Ipv4Addr::UNSPECIFIED,
            port: ARTNET_PORT,
            broadcast: SocketAddrV4::new(Ipv4Addr::BROADCAST, ARTNET_PORT),
            poll_interval_ms: 100,
        }
    }
}

impl ArtNetConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

pub struct ArtNetDiscoverer {
    config: ArtNetConfig,
    patterns: AddressPatterns,
}

impl ArtNetDiscoverer {
    pub fn new(config: ArtNetConfig) -> Self {
        Self::with_patterns(config, AddressPatterns::builtin())
    }

    pub fn with_patterns(config: ArtNetConfig, patterns: AddressPatterns) -> Self {
        Self { config, patterns }
    }

    pub fn config(&self) -> &ArtNetConfig {
        &self.config
    }

    /// Bind, broadcast one ArtPoll and hand back the receive side.
    #[instrument(skip_all, fields(bind = %self.config.bind_ip, port = self.config.port))]
    pub fn discover(
        &self,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<ArtNetScan, DiscoveryError> {
        let socket = bind_socket(self.config.bind_ip, self.config.port)?;
        let poll = encode_art_poll(POLL_FLAG_REPLY_ON_CHANGE);
        socket.send_to(&poll, self.config.broadcast)?;
        info!(target = %self.config.broadcast, "ArtPoll sent");

        Ok(ArtNetScan {
            socket,
            deadline,
            cancel: cancel.clone(),
            poll_interval: self.config.poll_interval(),
            patterns: self.patterns.clone(),
            seen: HashMap::new(),
            dropped: 0,
            received: 0,
            outcome: None,
        })
    }
}

/// UDP socket with SO_REUSEADDR and SO_BROADCAST, bound to `ip:port`.
fn bind_socket(ip: Ipv4Addr, port: u16) -> Result<UdpSocket, DiscoveryError> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;
    socket.set_broadcast(true)?;
    let addr: SockAddr = SocketAddr::V4(SocketAddrV4::new(ip, port)).into();
    socket.bind(&addr)?;
    debug!(addr = %SocketAddrV4::new(ip, port), "Socket bound");
    Ok(socket.into())
}

/// Lazy stream of records from ArtPollReplies.
///
/// Ends at the deadline or on cancellation. Repeated identical replies from
/// one node are suppressed; a changed reply is yielded again.
pub struct ArtNetScan {
    socket: UdpSocket,
    deadline: Instant,
    cancel: CancellationToken,
    poll_interval: Duration,
    patterns: AddressPatterns,
    seen: HashMap<DeviceKey, ArtPollReply>,
    dropped: usize,
    received: usize,
    outcome: Option<ScanOutcome>,
}

impl ArtNetScan {
    /// Datagrams that were not ArtPollReplies, our own ArtPoll included.
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    /// Valid replies received, repeats included.
    pub fn received(&self) -> usize {
        self.received
    }

    /// Set once the scan has ended.
    pub fn outcome(&self) -> Option<ScanOutcome> {
        self.outcome
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    fn finish(&mut self, outcome: ScanOutcome) -> Option<DeviceRecord> {
        if self.outcome.is_none() {
            debug!(outcome = ?outcome, dropped = self.dropped, received = self.received, "ArtNet scan ended");
        }
        self.outcome = Some(outcome);
        None
    }

    /// Decode one datagram; `None` when it was dropped or a repeat.
    fn accept(&mut self, data: &[u8], from: SocketAddr) -> Option<DeviceRecord> {
        let reply = match decode_art_poll_reply(data) {
            Ok(reply) => reply,
            Err(e) => {
                trace!(from = %from, error = %e, "Dropping datagram");
                self.dropped += 1;
                return None;
            }
        };
        self.received += 1;

        let patch = self.patterns.extract(&reply.long_name);
        let record = DeviceRecord::from_art_poll_reply(&reply, patch);
        if self.seen.get(&record.key) == Some(&reply) {
            trace!(key = %record.key, "Repeated reply");
            return None;
        }
        debug!(key = %record.key, name = %record.name, from = %from, "ArtPollReply");
        self.seen.insert(record.key.clone(), reply);
        Some(record)
    }
}

impl Iterator for ArtNetScan {
    type Item = DeviceRecord;

    fn next(&mut self) -> Option<DeviceRecord> {
        if self.outcome.is_some() {
            return None;
        }
        let mut buf = [0u8; RECV_BUFFER_LEN];
        loop {
            if self.cancel.is_cancelled() {
                return self.finish(ScanOutcome::Cancelled);
            }
            let remaining = self.deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return self.finish(ScanOutcome::Completed);
            }
            let wait = remaining.min(self.poll_interval);
            if let Err(e) = self.socket.set_read_timeout(Some(wait)) {
                warn!(error = %e, "Cannot set read timeout");
                return self.finish(ScanOutcome::Completed);
            }
            match self.socket.recv_from(&mut buf) {
                Ok((n, from)) => {
                    if let Some(record) = self.accept(&buf[..n], from) {
                        return Some(record);
                    }
                }
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
                Err(e) => {
                    // ICMP port unreachable surfaces here on some platforms.
                    trace!(error = %e, "Receive error");
                    self.dropped += 1;
                }
            }
        }
    }
}
