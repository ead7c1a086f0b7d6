//! E1.20 discovery over an `RdmTransport`.
//!
//! Binary search of the UID space driven by an explicit worklist of ranges,
//! followed by identification queries for every responder found.

use std::collections::HashSet;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, instrument, warn};

use super::{CancellationToken, DiscoveryError, ScanOutcome};
use crate::events::{BranchResult, DiscoveryEvent, DiscoveryObserver};
use crate::protocol::constants::*;
use crate::protocol::rdm::{DeviceInfo, RdmRequest, parse_label};
use crate::protocol::uid::{Uid, UidRange};
use crate::record::{BusPosition, DeviceKey, DeviceRecord, DiscoverySource, RdmDetails};
use crate::transport::{RdmReply, RdmTransport, RobeTransport, SerialPortLink, TransportError};

/// Attempts made to open the serial port.
pub const OPEN_ATTEMPTS: u32 = 3;

const OPEN_RETRY_DELAY: Duration = Duration::from_millis(250);

/// Open and wrap a Robe interface, retrying a few times.
#[instrument(level = "info")]
pub fn open_interface(
    port: &str,
    baud_rate: u32,
    transaction_timeout: Duration,
) -> Result<RobeTransport<SerialPortLink>, DiscoveryError> {
    let mut attempt = 1;
    loop {
        match SerialPortLink::open(port, baud_rate) {
            Ok(link) => {
                let mut transport = RobeTransport::new(link).with_timeout(transaction_timeout);
                match transport.probe() {
                    Ok(true) => debug!(port, "Robe interface answered info request"),
                    Ok(false) => warn!(port, "No info response; port may not be a Robe interface"),
                    Err(e) => warn!(port, error = %e, "Info request failed"),
                }
                return Ok(transport);
            }
            Err(e) if attempt < OPEN_ATTEMPTS => {
                warn!(port, attempt, error = %e, "Open failed, retrying");
                attempt += 1;
                thread::sleep(OPEN_RETRY_DELAY);
            }
            Err(e) => {
                return Err(DiscoveryError::DeviceUnavailable {
                    port: port.to_string(),
                    source: e,
                });
            }
        }
    }
}

/// Result of one RDM run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RdmSummary {
    pub outcome: ScanOutcome,
    /// UIDs in discovery order.
    pub uids: Vec<Uid>,
    pub transactions: usize,
}

pub struct RdmDiscoverer<T: RdmTransport> {
    transport: T,
    transactions: usize,
}

impl<T: RdmTransport> RdmDiscoverer<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            transactions: 0,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Find every responder, then describe each one through `sink`.
    ///
    /// Cancellation and the deadline are checked between transactions. When
    /// either fires, responders found so far are still emitted, without the
    /// queried details.
    #[instrument(skip_all, fields(port = %self.transport.port_name()))]
    pub fn discover(
        &mut self,
        deadline: Instant,
        cancel: &CancellationToken,
        observer: &dyn DiscoveryObserver,
        sink: &mut dyn FnMut(DeviceRecord),
    ) -> Result<RdmSummary, DiscoveryError> {
        self.transactions = 0;
        self.un_mute_all()?;

        let mut uids = Vec::new();
        let mut outcome = self.search(deadline, cancel, observer, &mut uids)?;
        info!(found = uids.len(), outcome = ?outcome, "UID search finished");

        self.un_mute_all()?;

        for (index, uid) in uids.iter().copied().enumerate() {
            if outcome == ScanOutcome::Completed {
                if cancel.is_cancelled() {
                    outcome = ScanOutcome::Cancelled;
                } else if Instant::now() >= deadline {
                    outcome = ScanOutcome::DeadlineReached;
                }
            }
            let record = if outcome == ScanOutcome::Completed {
                self.describe(uid, index)?
            } else {
                self.bare_record(uid, index)
            };
            sink(record);
        }

        Ok(RdmSummary {
            outcome,
            uids,
            transactions: self.transactions,
        })
    }

    fn search(
        &mut self,
        deadline: Instant,
        cancel: &CancellationToken,
        observer: &dyn DiscoveryObserver,
        found: &mut Vec<Uid>,
    ) -> Result<ScanOutcome, DiscoveryError> {
        let mut known = HashSet::new();
        let mut work = vec![UidRange::FULL];

        while let Some(range) = work.pop() {
            if cancel.is_cancelled() {
                return Ok(ScanOutcome::Cancelled);
            }
            if Instant::now() >= deadline {
                return Ok(ScanOutcome::DeadlineReached);
            }

            if range.is_single() {
                let uid = range.low;
                // A mute sent here would reach a whole group of responders.
                if uid.is_broadcast() {
                    continue;
                }
                if self.mute(uid)? && known.insert(uid) {
                    found.push(uid);
                    observer.on_event(&DiscoveryEvent::UidFound { uid });
                }
                continue;
            }

            let result = match self.send(&RdmRequest::disc_unique_branch(range)) {
                Ok(RdmReply::Silent) => BranchResult::Empty,
                Ok(RdmReply::Discovered(uid)) => BranchResult::Single(uid),
                Ok(RdmReply::Response(_)) => BranchResult::Collision,
                Err(TransportError::Timeout { .. }) => BranchResult::Empty,
                Err(e) if e.is_garbled() => {
                    debug!(range = %range, error = %e, "Garbled branch response");
                    BranchResult::Collision
                }
                Err(e) => return Err(e.into()),
            };
            observer.on_event(&DiscoveryEvent::BranchSearched { range, result });

            let split = match result {
                BranchResult::Empty => false,
                BranchResult::Collision => true,
                // Already muted yet still answering, or a phantom that names a
                // group: only bisection gets past it.
                BranchResult::Single(uid)
                    if known.contains(&uid) || !range.contains(uid) || uid.is_broadcast() =>
                {
                    true
                }
                BranchResult::Single(uid) => {
                    if self.mute(uid)? {
                        known.insert(uid);
                        found.push(uid);
                        observer.on_event(&DiscoveryEvent::UidFound { uid });
                        work.push(range);
                        false
                    } else {
                        // Phantom UID from overlapping answers.
                        true
                    }
                }
            };

            if split && let Some((lower, upper)) = range.bisect() {
                work.push(upper);
                work.push(lower);
            }
        }
        Ok(ScanOutcome::Completed)
    }

    fn send(&mut self, request: &RdmRequest) -> Result<RdmReply, TransportError> {
        self.transactions += 1;
        self.transport.transact(request)
    }

    fn un_mute_all(&mut self) -> Result<(), DiscoveryError> {
        match self.send(&RdmRequest::disc_un_mute(Uid::BROADCAST)) {
            Err(e) if e.is_fatal() => Err(e.into()),
            _ => Ok(()),
        }
    }

    /// True when `uid` acknowledged DISC_MUTE.
    fn mute(&mut self, uid: Uid) -> Result<bool, DiscoveryError> {
        match self.send(&RdmRequest::disc_mute(uid)) {
            Ok(RdmReply::Response(r)) => Ok(r.is_ack() && r.source == uid),
            Ok(_) => Ok(false),
            Err(e) if e.is_fatal() => Err(e.into()),
            Err(e) => {
                debug!(uid = %uid, error = %e, "Mute not acknowledged");
                Ok(false)
            }
        }
    }

    /// Parameter data of an ACKed GET, `None` for anything else.
    fn get(&mut self, uid: Uid, pid: u16) -> Result<Option<Vec<u8>>, DiscoveryError> {
        match self.send(&RdmRequest::get(uid, pid)) {
            Ok(RdmReply::Response(r)) if r.is_ack() => Ok(Some(r.data)),
            Ok(RdmReply::Response(r)) => {
                debug!(uid = %uid, pid = pid_name(pid), response_type = r.response_type, "GET not acknowledged");
                Ok(None)
            }
            Ok(_) => Ok(None),
            Err(e) if e.is_fatal() => Err(e.into()),
            Err(e) => {
                debug!(uid = %uid, pid = pid_name(pid), error = %e, "GET failed");
                Ok(None)
            }
        }
    }

    fn get_label(&mut self, uid: Uid, pid: u16) -> Result<Option<String>, DiscoveryError> {
        Ok(self
            .get(uid, pid)?
            .map(|data| parse_label(&data))
            .filter(|s| !s.is_empty()))
    }

    fn describe(&mut self, uid: Uid, index: usize) -> Result<DeviceRecord, DiscoveryError> {
        let info = self
            .get(uid, PID_DEVICE_INFO)?
            .and_then(|data| DeviceInfo::from_bytes(&data).ok());
        let model = self.get_label(uid, PID_DEVICE_MODEL_DESCRIPTION)?;
        let manufacturer = self.get_label(uid, PID_MANUFACTURER_LABEL)?;
        let label = self.get_label(uid, PID_DEVICE_LABEL)?;
        let software = self.get_label(uid, PID_SOFTWARE_VERSION_LABEL)?;

        let mut record = self.bare_record(uid, index);
        if let Some(name) = model.clone().or_else(|| label.clone()) {
            record.name = name;
        }
        record.address = info.as_ref().and_then(DeviceInfo::dmx_address);
        record.manufacturer = manufacturer;
        record.model = model;
        let mut details = info.as_ref().map(RdmDetails::from).unwrap_or_default();
        details.device_label = label;
        details.software_version_label = software;
        record.rdm = Some(details);
        Ok(record)
    }

    fn bare_record(&self, uid: Uid, index: usize) -> DeviceRecord {
        let mut record = DeviceRecord::new(DeviceKey::Uid(uid), uid.to_string(), DiscoverySource::Rdm);
        record.bus = Some(BusPosition {
            port: self.transport.port_name().to_string(),
            index,
        });
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NullObserver;
    use crate::transport::{SimulatedBus, SimulatedResponder};

    fn run(bus: SimulatedBus) -> (RdmSummary, Vec<DeviceRecord>, SimulatedBus) {
        let mut discoverer = RdmDiscoverer::new(bus);
        let mut records = Vec::new();
        let summary = discoverer
            .discover(
                Instant::now() + Duration::from_secs(30),
                &CancellationToken::new(),
                &NullObserver,
                &mut |r: DeviceRecord| records.push(r),
            )
            .unwrap();
        (summary, records, discoverer.into_transport())
    }

    #[test]
    fn test_empty_bus() {
        let (summary, records, _) = run(SimulatedBus::new());
        assert_eq!(summary.outcome, ScanOutcome::Completed);
        assert!(records.is_empty());
        // Un-mute, one empty branch, un-mute.
        assert_eq!(summary.transactions, 3);
    }

    #[test]
    fn test_single_device_record() {
        let uid = Uid::from_parts(0x5253, 0x0045_07f8);
        let mut bus = SimulatedBus::new();
        bus.add(SimulatedResponder::new(uid).with_model("Robin 600 LEDWash").with_address(101));
        let (summary, records, bus) = run(bus);

        assert_eq!(summary.uids, vec![uid]);
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.key, DeviceKey::Uid(uid));
        assert_eq!(record.name, "Robin 600 LEDWash");
        assert_eq!(record.address, Some(101));
        assert_eq!(record.universe, None);
        assert_eq!(record.manufacturer.as_deref(), Some("Simulated"));
        assert_eq!(record.bus, Some(BusPosition { port: "simulated".into(), index: 0 }));
        let details = record.rdm.as_ref().unwrap();
        assert_eq!(details.footprint, 16);
        assert_eq!(details.software_version_label.as_deref(), Some("1.0"));
        assert_eq!(details.device_label, None);
        // Everybody is un-muted at the end.
        assert!(bus.responders().iter().all(|r| !r.is_muted()));
    }

    #[test]
    fn test_extremes_and_neighbours() {
        let uids = [
            Uid::new(0),
            Uid::new(1),
            Uid::new(2),
            Uid::new(0xFFFF_FFFF_FFFE),
            Uid::from_parts(0x5253, 0x10),
            Uid::from_parts(0x5253, 0x11),
        ];
        let (summary, records, _) = run(SimulatedBus::with_uids(uids));
        let mut found = summary.uids.clone();
        found.sort();
        let mut expected = uids.to_vec();
        expected.sort();
        assert_eq!(found, expected);
        assert_eq!(records.len(), uids.len());
    }

    #[test]
    fn test_non_compliant_responder_is_bounded() {
        let mut bus = SimulatedBus::new();
        bus.add(SimulatedResponder::new(Uid::new(0x1000)).non_compliant());
        bus.add(SimulatedResponder::new(Uid::new(0x2000)));
        let (summary, _, _) = run(bus);

        let mut found = summary.uids.clone();
        found.sort();
        assert_eq!(found, vec![Uid::new(0x1000), Uid::new(0x2000)]);
        assert!(summary.transactions < 1000);
    }

    #[test]
    fn test_missing_model_falls_back_to_label_then_uid() {
        let uid = Uid::new(9);
        let mut bus = SimulatedBus::new();
        let mut responder = SimulatedResponder::new(uid).with_model("");
        responder.label = "Truss 2 left".into();
        bus.add(responder);
        let (_, records, _) = run(bus);
        assert_eq!(records[0].name, "Truss 2 left");

        let mut bus = SimulatedBus::new();
        bus.add(SimulatedResponder::new(uid).with_model(""));
        let (_, records, _) = run(bus);
        assert_eq!(records[0].name, uid.to_string());
    }

    #[test]
    fn test_pre_cancelled_run_returns_immediately() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut discoverer = RdmDiscoverer::new(SimulatedBus::with_uids([Uid::new(5)]));
        let mut count = 0;
        let summary = discoverer
            .discover(
                Instant::now() + Duration::from_secs(30),
                &cancel,
                &NullObserver,
                &mut |_: DeviceRecord| count += 1,
            )
            .unwrap();
        assert_eq!(summary.outcome, ScanOutcome::Cancelled);
        assert_eq!(count, 0);
    }

    /// Passes requests through and remembers them.
    struct Recording<T> {
        inner: T,
        requests: Vec<RdmRequest>,
    }

    impl<T: RdmTransport> RdmTransport for Recording<T> {
        fn transact(&mut self, request: &RdmRequest) -> Result<RdmReply, TransportError> {
            self.requests.push(request.clone());
            self.inner.transact(request)
        }

        fn port_name(&self) -> &str {
            self.inner.port_name()
        }
    }

    #[test]
    fn test_no_directed_mute_to_group_addresses() {
        let mut bus = SimulatedBus::new();
        bus.add(SimulatedResponder::new(Uid::from_parts(0x5253, 0xFFFF_FFFE)).non_compliant());
        bus.add(SimulatedResponder::new(Uid::from_parts(0x5253, 0x10)));
        let mut discoverer = RdmDiscoverer::new(Recording {
            inner: bus,
            requests: Vec::new(),
        });
        let summary = discoverer
            .discover(
                Instant::now() + Duration::from_secs(30),
                &CancellationToken::new(),
                &NullObserver,
                &mut |_: DeviceRecord| {},
            )
            .unwrap();

        let mut found = summary.uids.clone();
        found.sort();
        assert_eq!(
            found,
            vec![Uid::from_parts(0x5253, 0x10), Uid::from_parts(0x5253, 0xFFFF_FFFE)]
        );
        let recording = discoverer.into_transport();
        assert!(recording.requests.iter().all(|r| {
            r.pid != PID_DISC_MUTE || !r.destination.is_broadcast()
        }));
    }
}
