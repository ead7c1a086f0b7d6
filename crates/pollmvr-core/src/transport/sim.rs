//! In-memory population of E1.20 responders.
//!
//! Answers at the `RdmTransport` level, so discovery runs without any
//! framing. Overlapping discovery responses are combined the way a real line
//! combines them (wired-AND of the encoded bytes) and then decoded, so a
//! collision either fails its checksum or yields a phantom UID that never
//! acknowledges a mute.

use std::thread;
use std::time::Duration;

use super::traits::{RdmReply, RdmTransport, TransportError};
use crate::protocol::constants::*;
use crate::protocol::rdm::{
    DeviceInfo, RdmRequest, RdmResponse, decode_discovery_response, encode_discovery_response,
};
use crate::protocol::uid::{Uid, UidRange};

/// NACK reason: unknown PID.
const NR_UNKNOWN_PID: u16 = 0x0000;

#[derive(Debug, Clone)]
pub struct SimulatedResponder {
    pub uid: Uid,
    pub info: DeviceInfo,
    pub model_description: String,
    pub manufacturer: String,
    pub label: String,
    pub software_version: String,
    /// Keeps answering unique branches while muted.
    pub ignores_mute: bool,
    muted: bool,
}

impl SimulatedResponder {
    pub fn new(uid: Uid) -> Self {
        Self {
            uid,
            info: DeviceInfo {
                rdm_version: 0x0100,
                model_id: 0x0001,
                product_category: 0x0101,
                software_version: 1,
                footprint: 16,
                current_personality: 1,
                personality_count: 1,
                start_address: 1,
                sub_device_count: 0,
                sensor_count: 0,
            },
            model_description: format!("Sim {}", uid),
            manufacturer: "Simulated".to_string(),
            label: String::new(),
            software_version: "1.0".to_string(),
            ignores_mute: false,
            muted: false,
        }
    }

    pub fn with_address(mut self, address: u16) -> Self {
        self.info.start_address = address;
        self
    }

    pub fn with_model(mut self, description: &str) -> Self {
        self.model_description = description.to_string();
        self
    }

    pub fn non_compliant(mut self) -> Self {
        self.ignores_mute = true;
        self
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    fn answers_branch(&self, range: &UidRange) -> bool {
        range.contains(self.uid) && (!self.muted || self.ignores_mute)
    }

    fn get(&self, request: &RdmRequest) -> RdmResponse {
        let text = |s: &str| s.as_bytes().iter().take(32).copied().collect::<Vec<u8>>();
        let data = match request.pid {
            PID_DEVICE_INFO => self.info.to_bytes().ok(),
            PID_DEVICE_MODEL_DESCRIPTION => Some(text(&self.model_description)),
            PID_MANUFACTURER_LABEL => Some(text(&self.manufacturer)),
            PID_DEVICE_LABEL => Some(text(&self.label)),
            PID_SOFTWARE_VERSION_LABEL => Some(text(&self.software_version)),
            _ => None,
        };
        match data {
            Some(data) => RdmResponse::ack(request, self.uid, data),
            None => {
                let mut nack =
                    RdmResponse::ack(request, self.uid, NR_UNKNOWN_PID.to_be_bytes().to_vec());
                nack.response_type = RESPONSE_TYPE_NACK_REASON;
                nack
            }
        }
    }
}

/// A simulated RDM line.
#[derive(Debug, Clone, Default)]
pub struct SimulatedBus {
    responders: Vec<SimulatedResponder>,
    delay: Option<Duration>,
    transactions: usize,
    name: String,
}

impl SimulatedBus {
    pub fn new() -> Self {
        Self {
            name: "simulated".to_string(),
            ..Default::default()
        }
    }

    /// Bus populated with default responders for `uids`.
    pub fn with_uids<I: IntoIterator<Item = Uid>>(uids: I) -> Self {
        let mut bus = Self::new();
        for uid in uids {
            bus.add(SimulatedResponder::new(uid));
        }
        bus
    }

    pub fn add(&mut self, responder: SimulatedResponder) {
        self.responders.push(responder);
    }

    /// Sleep this long in every transaction.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn responders(&self) -> &[SimulatedResponder] {
        &self.responders
    }

    pub fn transactions(&self) -> usize {
        self.transactions
    }

    fn unique_branch(&self, request: &RdmRequest) -> Result<RdmReply, TransportError> {
        let Some(range) = parse_range(&request.data) else {
            return Ok(RdmReply::Silent);
        };
        let mut answers = self
            .responders
            .iter()
            .filter(|r| r.answers_branch(&range))
            .map(|r| encode_discovery_response(r.uid));
        let Some(first) = answers.next() else {
            return Ok(RdmReply::Silent);
        };
        let line = answers.fold(first, |acc, next| {
            acc.iter().zip(&next).map(|(a, b)| a & b).collect()
        });
        Ok(RdmReply::Discovered(decode_discovery_response(&line)?))
    }

    fn set_muted(&mut self, request: &RdmRequest, muted: bool) -> RdmReply {
        if request.is_broadcast() {
            for r in self.responders.iter_mut().filter(|r| request.destination.reaches(r.uid)) {
                r.muted = muted;
            }
            return RdmReply::Silent;
        }
        match self.responders.iter_mut().find(|r| r.uid == request.destination) {
            Some(r) => {
                r.muted = muted;
                // Control field: no flags set.
                RdmReply::Response(RdmResponse::ack(request, r.uid, vec![0x00, 0x00]))
            }
            None => RdmReply::Silent,
        }
    }
}

impl RdmTransport for SimulatedBus {
    fn transact(&mut self, request: &RdmRequest) -> Result<RdmReply, TransportError> {
        self.transactions += 1;
        if let Some(delay) = self.delay {
            thread::sleep(delay);
        }
        match (request.command_class, request.pid) {
            (DISCOVERY_COMMAND, PID_DISC_UNIQUE_BRANCH) => self.unique_branch(request),
            (DISCOVERY_COMMAND, PID_DISC_MUTE) => Ok(self.set_muted(request, true)),
            (DISCOVERY_COMMAND, PID_DISC_UN_MUTE) => Ok(self.set_muted(request, false)),
            (GET_COMMAND, _) if !request.is_broadcast() => Ok(self
                .responders
                .iter()
                .find(|r| r.uid == request.destination)
                .map(|r| RdmReply::Response(r.get(request)))
                .unwrap_or(RdmReply::Silent)),
            _ => Ok(RdmReply::Silent),
        }
    }

    fn port_name(&self) -> &str {
        &self.name
    }
}

fn parse_range(data: &[u8]) -> Option<UidRange> {
    if data.len() < 12 {
        return None;
    }
    let mut low = [0u8; 6];
    let mut high = [0u8; 6];
    low.copy_from_slice(&data[..6]);
    high.copy_from_slice(&data[6..12]);
    Some(UidRange::new(Uid::from_bytes(low), Uid::from_bytes(high)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uid(n: u64) -> Uid {
        Uid::new(n)
    }

    #[test]
    fn test_single_responder_is_discovered() {
        let mut bus = SimulatedBus::with_uids([uid(42)]);
        let reply = bus.transact(&RdmRequest::disc_unique_branch(UidRange::FULL)).unwrap();
        assert_eq!(reply, RdmReply::Discovered(uid(42)));

        let outside = UidRange::new(uid(43), Uid::MAX);
        let reply = bus.transact(&RdmRequest::disc_unique_branch(outside)).unwrap();
        assert_eq!(reply, RdmReply::Silent);
    }

    #[test]
    fn test_muted_responder_goes_quiet() {
        let mut bus = SimulatedBus::with_uids([uid(42)]);
        let reply = bus.transact(&RdmRequest::disc_mute(uid(42))).unwrap();
        assert!(matches!(reply, RdmReply::Response(r) if r.is_ack()));
        assert!(bus.responders()[0].is_muted());

        let reply = bus.transact(&RdmRequest::disc_unique_branch(UidRange::FULL)).unwrap();
        assert_eq!(reply, RdmReply::Silent);

        bus.transact(&RdmRequest::disc_un_mute(Uid::BROADCAST)).unwrap();
        assert!(!bus.responders()[0].is_muted());
    }

    #[test]
    fn test_manufacturer_broadcast_mutes_one_vendor() {
        let robe = Uid::from_parts(0x5253, 1);
        let other = Uid::from_parts(0x4150, 1);
        let mut bus = SimulatedBus::with_uids([robe, other]);
        let reply = bus
            .transact(&RdmRequest::disc_mute(Uid::from_parts(0x5253, 0xFFFF_FFFF)))
            .unwrap();
        assert_eq!(reply, RdmReply::Silent);
        assert!(bus.responders()[0].is_muted());
        assert!(!bus.responders()[1].is_muted());
    }

    #[test]
    fn test_collision_is_garbled() {
        let mut bus = SimulatedBus::with_uids([
            Uid::from_parts(0x5253, 0x0000_0001),
            Uid::from_parts(0x4142, 0x8000_0000),
        ]);
        let err = bus
            .transact(&RdmRequest::disc_unique_branch(UidRange::FULL))
            .unwrap_err();
        assert!(err.is_garbled());
    }

    #[test]
    fn test_get_queries() {
        let mut bus = SimulatedBus::new();
        bus.add(SimulatedResponder::new(uid(7)).with_model("Robin 600").with_address(101));

        let reply = bus.transact(&RdmRequest::get(uid(7), PID_DEVICE_MODEL_DESCRIPTION)).unwrap();
        let RdmReply::Response(r) = reply else {
            panic!("expected response");
        };
        assert_eq!(r.data, b"Robin 600");

        let reply = bus.transact(&RdmRequest::get(uid(7), PID_DEVICE_INFO)).unwrap();
        let RdmReply::Response(r) = reply else {
            panic!("expected response");
        };
        assert_eq!(DeviceInfo::from_bytes(&r.data).unwrap().start_address, 101);

        let reply = bus.transact(&RdmRequest::get(uid(7), 0x1234)).unwrap();
        let RdmReply::Response(r) = reply else {
            panic!("expected response");
        };
        assert_eq!(r.nack_reason(), Some(NR_UNKNOWN_PID));

        let reply = bus.transact(&RdmRequest::get(uid(8), PID_DEVICE_INFO)).unwrap();
        assert_eq!(reply, RdmReply::Silent);
        assert_eq!(bus.transactions(), 4);
    }
}
