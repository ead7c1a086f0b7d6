//! ArtPoll / ArtPollReply codec (Art-Net 4).
//!
//! Only the two discovery packets are handled. Multi-byte fields follow the
//! Art-Net mix of byte orders: op-codes and the UDP port are little-endian,
//! everything else big-endian, except the ESTA code which is sent low byte
//! first.

use std::net::Ipv4Addr;

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use thiserror::Error;

use super::constants::*;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PacketError {
    #[error("Packet too short: expected at least {expected} bytes, got {actual}")]
    TooShort { expected: usize, actual: usize },
    #[error("Bad signature: not an Art-Net packet")]
    BadSignature,
    #[error("Wrong op-code: 0x{0:04X}")]
    WrongOpCode(u16),
}

// Field offsets inside ArtPollReply.
const OFF_IP: usize = 10;
const OFF_PORT: usize = 14;
const OFF_VERSION: usize = 16;
const OFF_NET_SWITCH: usize = 18;
const OFF_SUB_SWITCH: usize = 19;
const OFF_OEM: usize = 20;
const OFF_UBEA: usize = 22;
const OFF_STATUS1: usize = 23;
const OFF_ESTA: usize = 24;
const OFF_SHORT_NAME: usize = 26;
const OFF_LONG_NAME: usize = 44;
const OFF_NODE_REPORT: usize = 108;
const OFF_NUM_PORTS: usize = 172;
const OFF_PORT_TYPES: usize = 174;
const OFF_GOOD_INPUT: usize = 178;
const OFF_GOOD_OUTPUT: usize = 182;
const OFF_SW_IN: usize = 186;
const OFF_SW_OUT: usize = 190;
const OFF_STYLE: usize = 200;
const OFF_MAC: usize = 201;
const OFF_BIND_IP: usize = 207;
const OFF_BIND_INDEX: usize = 211;
const OFF_STATUS2: usize = 212;

/// Build an ArtPoll packet.
///
/// `flags` is the TalkToMe byte; diagnostics priority is always the lowest.
pub fn encode_art_poll(flags: u8) -> [u8; ART_POLL_LEN] {
    let mut buf = [0u8; ART_POLL_LEN];
    buf[..8].copy_from_slice(ARTNET_ID);
    LittleEndian::write_u16(&mut buf[8..10], OP_POLL);
    BigEndian::write_u16(&mut buf[10..12], ARTNET_PROTOCOL_VERSION);
    buf[12] = flags;
    buf[13] = DIAG_PRIORITY_LOW;
    buf
}

/// Read the op-code of any Art-Net packet after checking its signature.
pub fn op_code(data: &[u8]) -> Result<u16, PacketError> {
    if data.len() < 10 {
        return Err(PacketError::TooShort {
            expected: 10,
            actual: data.len(),
        });
    }
    if &data[..8] != ARTNET_ID {
        return Err(PacketError::BadSignature);
    }
    Ok(LittleEndian::read_u16(&data[8..10]))
}

/// Decoded ArtPollReply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtPollReply {
    /// Node IP as reported inside the packet.
    pub ip: Ipv4Addr,
    pub port: u16,
    /// Firmware revision (VersInfo).
    pub version: u16,
    pub net_switch: u8,
    pub sub_switch: u8,
    pub oem: u16,
    pub ubea_version: u8,
    pub status1: u8,
    pub esta_code: u16,
    pub short_name: String,
    pub long_name: String,
    pub node_report: String,
    pub num_ports: u16,
    pub port_types: [u8; 4],
    pub good_input: [u8; 4],
    pub good_output: [u8; 4],
    pub sw_in: [u8; 4],
    pub sw_out: [u8; 4],
    pub style: u8,
    pub mac: [u8; 6],
    /// Art-Net 4 fields, zero when the sender stops at the MAC.
    pub bind_ip: Ipv4Addr,
    pub bind_index: u8,
    pub status2: u8,
}

impl Default for ArtPollReply {
    fn default() -> Self {
        Self {
            ip: Ipv4Addr::UNSPECIFIED,
            port: 0,
            version: 0,
            net_switch: 0,
            sub_switch: 0,
            oem: 0,
            ubea_version: 0,
            status1: 0,
            esta_code: 0,
            short_name: String::new(),
            long_name: String::new(),
            node_report: String::new(),
            num_ports: 0,
            port_types: [0; 4],
            good_input: [0; 4],
            good_output: [0; 4],
            sw_in: [0; 4],
            sw_out: [0; 4],
            style: 0,
            mac: [0; 6],
            bind_ip: Ipv4Addr::UNSPECIFIED,
            bind_index: 0,
            status2: 0,
        }
    }
}

impl ArtPollReply {
    pub const SIZE: usize = ART_POLL_REPLY_LEN;

    pub fn from_bytes(data: &[u8]) -> Result<Self, PacketError> {
        if data.len() < ART_POLL_REPLY_MIN_LEN {
            return Err(PacketError::TooShort {
                expected: ART_POLL_REPLY_MIN_LEN,
                actual: data.len(),
            });
        }
        let op = op_code(data)?;
        if op != OP_POLL_REPLY {
            return Err(PacketError::WrongOpCode(op));
        }

        let quad = |off: usize| -> [u8; 4] { [data[off], data[off + 1], data[off + 2], data[off + 3]] };
        let mut mac = [0u8; 6];
        mac.copy_from_slice(&data[OFF_MAC..OFF_MAC + 6]);

        let (bind_ip, bind_index, status2) = if data.len() > OFF_STATUS2 {
            (
                Ipv4Addr::from(quad(OFF_BIND_IP)),
                data[OFF_BIND_INDEX],
                data[OFF_STATUS2],
            )
        } else {
            (Ipv4Addr::UNSPECIFIED, 0, 0)
        };

        Ok(Self {
            ip: Ipv4Addr::from(quad(OFF_IP)),
            port: LittleEndian::read_u16(&data[OFF_PORT..OFF_PORT + 2]),
            version: BigEndian::read_u16(&data[OFF_VERSION..OFF_VERSION + 2]),
            net_switch: data[OFF_NET_SWITCH],
            sub_switch: data[OFF_SUB_SWITCH],
            oem: BigEndian::read_u16(&data[OFF_OEM..OFF_OEM + 2]),
            ubea_version: data[OFF_UBEA],
            status1: data[OFF_STATUS1],
            esta_code: LittleEndian::read_u16(&data[OFF_ESTA..OFF_ESTA + 2]),
            short_name: read_string(&data[OFF_SHORT_NAME..OFF_SHORT_NAME + SHORT_NAME_LEN]),
            long_name: read_string(&data[OFF_LONG_NAME..OFF_LONG_NAME + LONG_NAME_LEN]),
            node_report: read_string(&data[OFF_NODE_REPORT..OFF_NODE_REPORT + NODE_REPORT_LEN]),
            num_ports: BigEndian::read_u16(&data[OFF_NUM_PORTS..OFF_NUM_PORTS + 2]),
            port_types: quad(OFF_PORT_TYPES),
            good_input: quad(OFF_GOOD_INPUT),
            good_output: quad(OFF_GOOD_OUTPUT),
            sw_in: quad(OFF_SW_IN),
            sw_out: quad(OFF_SW_OUT),
            style: data[OFF_STYLE],
            mac,
            bind_ip,
            bind_index,
            status2,
        })
    }

    /// Encode as a full 239-byte Art-Net 4 reply.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = vec![0u8; Self::SIZE];
        buf[..8].copy_from_slice(ARTNET_ID);
        LittleEndian::write_u16(&mut buf[8..10], OP_POLL_REPLY);
        buf[OFF_IP..OFF_IP + 4].copy_from_slice(&self.ip.octets());
        LittleEndian::write_u16(&mut buf[OFF_PORT..OFF_PORT + 2], self.port);
        BigEndian::write_u16(&mut buf[OFF_VERSION..OFF_VERSION + 2], self.version);
        buf[OFF_NET_SWITCH] = self.net_switch;
        buf[OFF_SUB_SWITCH] = self.sub_switch;
        BigEndian::write_u16(&mut buf[OFF_OEM..OFF_OEM + 2], self.oem);
        buf[OFF_UBEA] = self.ubea_version;
        buf[OFF_STATUS1] = self.status1;
        LittleEndian::write_u16(&mut buf[OFF_ESTA..OFF_ESTA + 2], self.esta_code);
        write_string(&mut buf[OFF_SHORT_NAME..OFF_SHORT_NAME + SHORT_NAME_LEN], &self.short_name);
        write_string(&mut buf[OFF_LONG_NAME..OFF_LONG_NAME + LONG_NAME_LEN], &self.long_name);
        write_string(&mut buf[OFF_NODE_REPORT..OFF_NODE_REPORT + NODE_REPORT_LEN], &self.node_report);
        BigEndian::write_u16(&mut buf[OFF_NUM_PORTS..OFF_NUM_PORTS + 2], self.num_ports);
        buf[OFF_PORT_TYPES..OFF_PORT_TYPES + 4].copy_from_slice(&self.port_types);
        buf[OFF_GOOD_INPUT..OFF_GOOD_INPUT + 4].copy_from_slice(&self.good_input);
        buf[OFF_GOOD_OUTPUT..OFF_GOOD_OUTPUT + 4].copy_from_slice(&self.good_output);
        buf[OFF_SW_IN..OFF_SW_IN + 4].copy_from_slice(&self.sw_in);
        buf[OFF_SW_OUT..OFF_SW_OUT + 4].copy_from_slice(&self.sw_out);
        buf[OFF_STYLE] = self.style;
        buf[OFF_MAC..OFF_MAC + 6].copy_from_slice(&self.mac);
        buf[OFF_BIND_IP..OFF_BIND_IP + 4].copy_from_slice(&self.bind_ip.octets());
        buf[OFF_BIND_INDEX] = self.bind_index;
        buf[OFF_STATUS2] = self.status2;
        buf
    }

    /// True when the node reports no usable MAC address.
    pub fn mac_is_zero(&self) -> bool {
        self.mac.iter().all(|b| *b == 0)
    }

    /// Colon separated lower-case MAC.
    pub fn mac_string(&self) -> String {
        format_mac(&self.mac)
    }
}

/// Shorthand for [`ArtPollReply::from_bytes`].
pub fn decode_art_poll_reply(data: &[u8]) -> Result<ArtPollReply, PacketError> {
    ArtPollReply::from_bytes(data)
}

pub fn format_mac(mac: &[u8; 6]) -> String {
    mac.iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(":")
}

/// NUL terminated, lossily decoded and trimmed.
fn read_string(field: &[u8]) -> String {
    let end = field.iter().position(|b| *b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).trim().to_string()
}

/// Copies at most `field.len() - 1` bytes so the terminator always fits.
fn write_string(field: &mut [u8], value: &str) {
    let bytes = value.as_bytes();
    let n = bytes.len().min(field.len() - 1);
    field[..n].copy_from_slice(&bytes[..n]);
}
