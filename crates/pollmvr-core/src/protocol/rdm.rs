//! ANSI E1.20 message codec.
//!
//! Messages here always include the 0xCC start code; the Robe envelope strips
//! it on the wire and `transport::robe` puts it back before decoding.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read};
use thiserror::Error;

use super::constants::*;
use super::uid::{Uid, UidRange};

#[derive(Error, Debug)]
pub enum RdmError {
    #[error("Message too short: expected {expected}, got {actual}")]
    TooShort { expected: usize, actual: usize },
    #[error("Bad start code: 0x{0:02X}")]
    BadStartCode(u8),
    #[error("Bad message length {declared} (pdl {pdl})")]
    BadLength { declared: usize, pdl: usize },
    #[error("Checksum mismatch: expected 0x{expected:04X}, got 0x{actual:04X}")]
    Checksum { expected: u16, actual: u16 },
    #[error("Discovery response missing 0xAA separator")]
    MissingSeparator,
    #[error("Parameter data too long: {0} bytes")]
    DataTooLong(usize),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Sum of all bytes mod 0x10000.
pub fn checksum(bytes: &[u8]) -> u16 {
    bytes.iter().fold(0u16, |acc, b| acc.wrapping_add(*b as u16))
}

/// What a controller asks of a responder. Source UID and transaction number
/// are filled in by the transport when the request is encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RdmRequest {
    pub destination: Uid,
    pub sub_device: u16,
    pub command_class: u8,
    pub pid: u16,
    pub data: Vec<u8>,
}

impl RdmRequest {
    pub fn new(destination: Uid, command_class: u8, pid: u16, data: Vec<u8>) -> Self {
        Self {
            destination,
            sub_device: 0,
            command_class,
            pid,
            data,
        }
    }

    /// DISC_UNIQUE_BRANCH to all devices for `range`.
    pub fn disc_unique_branch(range: UidRange) -> Self {
        Self::new(
            Uid::BROADCAST,
            DISCOVERY_COMMAND,
            PID_DISC_UNIQUE_BRANCH,
            range.to_bytes().to_vec(),
        )
    }

    pub fn disc_mute(uid: Uid) -> Self {
        Self::new(uid, DISCOVERY_COMMAND, PID_DISC_MUTE, Vec::new())
    }

    pub fn disc_un_mute(uid: Uid) -> Self {
        Self::new(uid, DISCOVERY_COMMAND, PID_DISC_UN_MUTE, Vec::new())
    }

    pub fn get(uid: Uid, pid: u16) -> Self {
        Self::new(uid, GET_COMMAND, pid, Vec::new())
    }

    /// Sent to all devices or to all devices of one manufacturer.
    pub fn is_broadcast(&self) -> bool {
        self.destination.is_broadcast()
    }

    /// Command class a responder answers this request with.
    pub fn response_class(&self) -> u8 {
        match self.command_class {
            DISCOVERY_COMMAND => DISCOVERY_COMMAND_RESPONSE,
            GET_COMMAND => GET_COMMAND_RESPONSE,
            other => other.wrapping_add(1),
        }
    }

    pub fn is_unique_branch(&self) -> bool {
        self.command_class == DISCOVERY_COMMAND && self.pid == PID_DISC_UNIQUE_BRANCH
    }

    /// Full message, start code through checksum.
    pub fn encode(&self, source: Uid, transaction: u8) -> Result<Vec<u8>, RdmError> {
        encode_message(&MessageFields {
            destination: self.destination,
            source,
            transaction,
            port_or_response: 0x01,
            message_count: 0,
            sub_device: self.sub_device,
            command_class: self.command_class,
            pid: self.pid,
            data: &self.data,
        })
    }
}

/// A decoded responder message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RdmResponse {
    pub destination: Uid,
    pub source: Uid,
    pub transaction: u8,
    pub response_type: u8,
    pub message_count: u8,
    pub sub_device: u16,
    pub command_class: u8,
    pub pid: u16,
    pub data: Vec<u8>,
}

impl RdmResponse {
    /// An ACK answering `request`, as a responder would build it.
    pub fn ack(request: &RdmRequest, responder: Uid, data: Vec<u8>) -> Self {
        Self {
            destination: Uid::new(CONTROLLER_UID),
            source: responder,
            transaction: 0,
            response_type: RESPONSE_TYPE_ACK,
            message_count: 0,
            sub_device: request.sub_device,
            command_class: request.response_class(),
            pid: request.pid,
            data,
        }
    }

    pub fn is_ack(&self) -> bool {
        self.response_type == RESPONSE_TYPE_ACK
    }

    /// NACK reason code, when the responder refused.
    pub fn nack_reason(&self) -> Option<u16> {
        if self.response_type == RESPONSE_TYPE_NACK_REASON && self.data.len() >= 2 {
            Some(u16::from_be_bytes([self.data[0], self.data[1]]))
        } else {
            None
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, RdmError> {
        encode_message(&MessageFields {
            destination: self.destination,
            source: self.source,
            transaction: self.transaction,
            port_or_response: self.response_type,
            message_count: self.message_count,
            sub_device: self.sub_device,
            command_class: self.command_class,
            pid: self.pid,
            data: &self.data,
        })
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, RdmError> {
        let minimum = RDM_HEADER_LEN + 2;
        if data.len() < minimum {
            return Err(RdmError::TooShort {
                expected: minimum,
                actual: data.len(),
            });
        }
        if data[0] != RDM_START_CODE {
            return Err(RdmError::BadStartCode(data[0]));
        }
        if data[1] != RDM_SUB_START_CODE {
            return Err(RdmError::BadStartCode(data[1]));
        }
        let declared = data[2] as usize;
        let pdl = data[RDM_HEADER_LEN - 1] as usize;
        if declared != RDM_HEADER_LEN + pdl {
            return Err(RdmError::BadLength { declared, pdl });
        }
        if data.len() < declared + 2 {
            return Err(RdmError::TooShort {
                expected: declared + 2,
                actual: data.len(),
            });
        }
        let expected = checksum(&data[..declared]);
        let actual = u16::from_be_bytes([data[declared], data[declared + 1]]);
        if expected != actual {
            return Err(RdmError::Checksum { expected, actual });
        }

        let mut cursor = Cursor::new(&data[3..declared]);
        let destination = read_uid(&mut cursor)?;
        let source = read_uid(&mut cursor)?;
        let transaction = cursor.read_u8()?;
        let response_type = cursor.read_u8()?;
        let message_count = cursor.read_u8()?;
        let sub_device = cursor.read_u16::<BigEndian>()?;
        let command_class = cursor.read_u8()?;
        let pid = cursor.read_u16::<BigEndian>()?;
        let _pdl = cursor.read_u8()?;
        let mut pd = vec![0u8; pdl];
        cursor.read_exact(&mut pd)?;

        Ok(Self {
            destination,
            source,
            transaction,
            response_type,
            message_count,
            sub_device,
            command_class,
            pid,
            data: pd,
        })
    }
}

struct MessageFields<'a> {
    destination: Uid,
    source: Uid,
    transaction: u8,
    port_or_response: u8,
    message_count: u8,
    sub_device: u16,
    command_class: u8,
    pid: u16,
    data: &'a [u8],
}

fn encode_message(m: &MessageFields<'_>) -> Result<Vec<u8>, RdmError> {
    if m.data.len() > RDM_MAX_PDL {
        return Err(RdmError::DataTooLong(m.data.len()));
    }
    let length = RDM_HEADER_LEN + m.data.len();
    let mut buf = Vec::with_capacity(length + 2);
    buf.write_u8(RDM_START_CODE)?;
    buf.write_u8(RDM_SUB_START_CODE)?;
    buf.write_u8(length as u8)?;
    buf.extend_from_slice(&m.destination.to_bytes());
    buf.extend_from_slice(&m.source.to_bytes());
    buf.write_u8(m.transaction)?;
    buf.write_u8(m.port_or_response)?;
    buf.write_u8(m.message_count)?;
    buf.write_u16::<BigEndian>(m.sub_device)?;
    buf.write_u8(m.command_class)?;
    buf.write_u16::<BigEndian>(m.pid)?;
    buf.write_u8(m.data.len() as u8)?;
    buf.extend_from_slice(m.data);
    let sum = checksum(&buf);
    buf.write_u16::<BigEndian>(sum)?;
    Ok(buf)
}

fn read_uid(cursor: &mut Cursor<&[u8]>) -> Result<Uid, RdmError> {
    let mut raw = [0u8; 6];
    cursor.read_exact(&mut raw)?;
    Ok(Uid::from_bytes(raw))
}

// ============================================================================
// Discovery (DISC_UNIQUE_BRANCH) response
// ============================================================================

/// Decode the preamble-separated, bit-doubled UID a responder sends to a
/// unique branch. Overlapping answers corrupt the encoding, which surfaces as
/// a checksum mismatch.
pub fn decode_discovery_response(data: &[u8]) -> Result<Uid, RdmError> {
    let preamble = data.iter().take(7).take_while(|b| **b == DISC_PREAMBLE).count();
    let rest = &data[preamble..];
    match rest.first() {
        Some(&DISC_SEPARATOR) => {}
        Some(_) => return Err(RdmError::MissingSeparator),
        None => {
            return Err(RdmError::TooShort {
                expected: preamble + 1 + DISC_EUID_LEN,
                actual: data.len(),
            })
        }
    }
    let euid = &rest[1..];
    if euid.len() < DISC_EUID_LEN {
        return Err(RdmError::TooShort {
            expected: preamble + 1 + DISC_EUID_LEN,
            actual: data.len(),
        });
    }

    let mut raw = [0u8; 6];
    for (i, byte) in raw.iter_mut().enumerate() {
        *byte = euid[2 * i] & euid[2 * i + 1];
    }
    let expected = checksum(&euid[..12]);
    let actual = (((euid[12] & euid[13]) as u16) << 8) | (euid[14] & euid[15]) as u16;
    if expected != actual {
        return Err(RdmError::Checksum { expected, actual });
    }
    Ok(Uid::from_bytes(raw))
}

/// Encode a discovery response with the full seven byte preamble.
pub fn encode_discovery_response(uid: Uid) -> Vec<u8> {
    let mut buf = vec![DISC_PREAMBLE; 7];
    buf.push(DISC_SEPARATOR);
    let mut euid = Vec::with_capacity(12);
    for b in uid.to_bytes() {
        euid.push(b | 0xAA);
        euid.push(b | 0x55);
    }
    let sum = checksum(&euid);
    buf.extend_from_slice(&euid);
    for b in sum.to_be_bytes() {
        buf.push(b | 0xAA);
        buf.push(b | 0x55);
    }
    buf
}

// ============================================================================
// Parameter data
// ============================================================================

/// DEVICE_INFO parameter data (19 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceInfo {
    pub rdm_version: u16,
    pub model_id: u16,
    pub product_category: u16,
    pub software_version: u32,
    pub footprint: u16,
    pub current_personality: u8,
    pub personality_count: u8,
    pub start_address: u16,
    pub sub_device_count: u16,
    pub sensor_count: u8,
}

impl DeviceInfo {
    pub const SIZE: usize = DEVICE_INFO_LEN;

    pub fn from_bytes(data: &[u8]) -> Result<Self, RdmError> {
        if data.len() < Self::SIZE {
            return Err(RdmError::TooShort {
                expected: Self::SIZE,
                actual: data.len(),
            });
        }
        let mut cursor = Cursor::new(data);
        Ok(Self {
            rdm_version: cursor.read_u16::<BigEndian>()?,
            model_id: cursor.read_u16::<BigEndian>()?,
            product_category: cursor.read_u16::<BigEndian>()?,
            software_version: cursor.read_u32::<BigEndian>()?,
            footprint: cursor.read_u16::<BigEndian>()?,
            current_personality: cursor.read_u8()?,
            personality_count: cursor.read_u8()?,
            start_address: cursor.read_u16::<BigEndian>()?,
            sub_device_count: cursor.read_u16::<BigEndian>()?,
            sensor_count: cursor.read_u8()?,
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, RdmError> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        buf.write_u16::<BigEndian>(self.rdm_version)?;
        buf.write_u16::<BigEndian>(self.model_id)?;
        buf.write_u16::<BigEndian>(self.product_category)?;
        buf.write_u32::<BigEndian>(self.software_version)?;
        buf.write_u16::<BigEndian>(self.footprint)?;
        buf.write_u8(self.current_personality)?;
        buf.write_u8(self.personality_count)?;
        buf.write_u16::<BigEndian>(self.start_address)?;
        buf.write_u16::<BigEndian>(self.sub_device_count)?;
        buf.write_u8(self.sensor_count)?;
        Ok(buf)
    }

    /// DMX start address, `None` for devices without a footprint (0xFFFF).
    pub fn dmx_address(&self) -> Option<u16> {
        (1..=512).contains(&self.start_address).then_some(self.start_address)
    }
}

/// Text PIDs (labels, descriptions): up to 32 ASCII characters, maybe NUL padded.
pub fn parse_label(data: &[u8]) -> String {
    let end = data.iter().position(|b| *b == 0).unwrap_or(data.len());
    String::from_utf8_lossy(&data[..end]).trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURE: Uid = Uid::from_parts(0x5253, 0x0045_07f8);

    #[test]
    fn test_request_encoding() {
        let req = RdmRequest::get(FIXTURE, PID_DEVICE_INFO);
        let bytes = req.encode(Uid::new(CONTROLLER_UID), 7).unwrap();
        assert_eq!(bytes.len(), 26);
        assert_eq!(bytes[0], RDM_START_CODE);
        assert_eq!(bytes[2], 24);
        assert_eq!(&bytes[3..9], &FIXTURE.to_bytes());
        assert_eq!(&bytes[9..15], &[0x52, 0x53, 0x02, 0x00, 0x00, 0x15]);
        assert_eq!(bytes[15], 7);
        assert_eq!(bytes[20], GET_COMMAND);
        assert_eq!(&bytes[21..23], &[0x00, 0x60]);
        let sum = checksum(&bytes[..24]);
        assert_eq!(&bytes[24..], &sum.to_be_bytes());
    }

    #[test]
    fn test_unique_branch_carries_bounds() {
        let range = UidRange::new(Uid::new(0x10), Uid::new(0x20));
        let bytes = RdmRequest::disc_unique_branch(range)
            .encode(Uid::new(CONTROLLER_UID), 0)
            .unwrap();
        assert_eq!(bytes[2] as usize, RDM_HEADER_LEN + 12);
        assert_eq!(&bytes[3..9], &[0xFF; 6]);
        assert_eq!(&bytes[24..36], &range.to_bytes());
    }

    #[test]
    fn test_response_classes() {
        assert_eq!(RdmRequest::disc_mute(FIXTURE).response_class(), DISCOVERY_COMMAND_RESPONSE);
        let get = RdmRequest::get(FIXTURE, PID_DEVICE_INFO);
        assert_eq!(get.response_class(), GET_COMMAND_RESPONSE);
        assert_eq!(RdmResponse::ack(&get, FIXTURE, Vec::new()).command_class, GET_COMMAND_RESPONSE);
        assert_eq!(RdmRequest::new(FIXTURE, 0x30, PID_DEVICE_LABEL, Vec::new()).response_class(), 0x31);
    }

    #[test]
    fn test_response_roundtrip_and_checksum() {
        let req = RdmRequest::get(FIXTURE, PID_DEVICE_LABEL);
        let resp = RdmResponse::ack(&req, FIXTURE, b"Stage left".to_vec());
        let mut bytes = resp.to_bytes().unwrap();
        let parsed = RdmResponse::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, resp);
        assert_eq!(parsed.command_class, GET_COMMAND_RESPONSE);
        assert!(parsed.is_ack());

        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        assert!(matches!(
            RdmResponse::from_bytes(&bytes),
            Err(RdmError::Checksum { .. })
        ));
    }

    #[test]
    fn test_response_rejects_bad_framing() {
        assert!(matches!(
            RdmResponse::from_bytes(&[0xCC, 0x01]),
            Err(RdmError::TooShort { .. })
        ));
        let req = RdmRequest::get(FIXTURE, PID_DEVICE_LABEL);
        let mut bytes = RdmResponse::ack(&req, FIXTURE, vec![]).to_bytes().unwrap();
        bytes[0] = 0x00;
        assert!(matches!(
            RdmResponse::from_bytes(&bytes),
            Err(RdmError::BadStartCode(0x00))
        ));
    }

    #[test]
    fn test_nack_reason() {
        let req = RdmRequest::get(FIXTURE, PID_DEVICE_LABEL);
        let mut resp = RdmResponse::ack(&req, FIXTURE, vec![0x00, 0x05]);
        resp.response_type = RESPONSE_TYPE_NACK_REASON;
        assert_eq!(resp.nack_reason(), Some(5));
        assert!(!resp.is_ack());
    }

    #[test]
    fn test_discovery_response_roundtrip() {
        let encoded = encode_discovery_response(FIXTURE);
        assert_eq!(encoded.len(), 7 + 1 + DISC_EUID_LEN);
        assert_eq!(decode_discovery_response(&encoded).unwrap(), FIXTURE);
        // Preamble is optional.
        assert_eq!(decode_discovery_response(&encoded[7..]).unwrap(), FIXTURE);
    }

    #[test]
    fn test_overlapping_discovery_responses_fail() {
        let a = encode_discovery_response(Uid::from_parts(0x5253, 0x0000_0001));
        let b = encode_discovery_response(Uid::from_parts(0x4142, 0x8000_0000));
        let collided: Vec<u8> = a.iter().zip(&b).map(|(x, y)| x & y).collect();
        assert!(decode_discovery_response(&collided).is_err());
        assert!(matches!(
            decode_discovery_response(&[0xFE, 0xFE, 0x00]),
            Err(RdmError::MissingSeparator)
        ));
        assert!(matches!(
            decode_discovery_response(&[0xFE, 0xAA, 0xFF]),
            Err(RdmError::TooShort { .. })
        ));
    }

    #[test]
    fn test_device_info() {
        let info = DeviceInfo {
            rdm_version: 0x0100,
            model_id: 0x0123,
            product_category: 0x0101,
            software_version: 0x0002_0003,
            footprint: 24,
            current_personality: 2,
            personality_count: 4,
            start_address: 101,
            sub_device_count: 0,
            sensor_count: 3,
        };
        let bytes = info.to_bytes().unwrap();
        assert_eq!(bytes.len(), DEVICE_INFO_LEN);
        assert_eq!(DeviceInfo::from_bytes(&bytes).unwrap(), info);
        assert_eq!(info.dmx_address(), Some(101));

        let unpatched = DeviceInfo {
            start_address: 0xFFFF,
            ..info
        };
        assert_eq!(unpatched.dmx_address(), None);
        assert!(DeviceInfo::from_bytes(&bytes[..10]).is_err());
    }

    #[test]
    fn test_parse_label() {
        assert_eq!(parse_label(b"Robin 600\0\0\0"), "Robin 600");
        assert_eq!(parse_label(b""), "");
    }
}
