//! Protocol constants for ArtNet discovery and RDM over the Robe interface.
//!
//! ArtNet values follow Art-Net 4; RDM values follow ANSI E1.20; the envelope
//! values follow the Robe Universal Interface serial API.

// ============================================================================
// ArtNet
// ============================================================================

/// UDP port used by every ArtNet node.
pub const ARTNET_PORT: u16 = 6454;

/// Packet signature, NUL terminated.
pub const ARTNET_ID: &[u8; 8] = b"Art-Net\0";

/// ArtPoll op-code (sent little-endian).
pub const OP_POLL: u16 = 0x2000;

/// ArtPollReply op-code (sent little-endian).
pub const OP_POLL_REPLY: u16 = 0x2100;

/// Protocol revision carried in ArtPoll (sent big-endian).
pub const ARTNET_PROTOCOL_VERSION: u16 = 14;

/// ArtPoll flag: send ArtPollReply whenever node conditions change.
pub const POLL_FLAG_REPLY_ON_CHANGE: u8 = 0x02;

/// Lowest diagnostic priority.
pub const DIAG_PRIORITY_LOW: u8 = 0x10;

/// Length of an ArtPoll packet as built by this crate.
pub const ART_POLL_LEN: usize = 14;

/// Length of a full Art-Net 4 ArtPollReply.
pub const ART_POLL_REPLY_LEN: usize = 239;

/// Shortest ArtPollReply accepted: everything up to and including the MAC.
pub const ART_POLL_REPLY_MIN_LEN: usize = 207;

pub const SHORT_NAME_LEN: usize = 18;
pub const LONG_NAME_LEN: usize = 64;
pub const NODE_REPORT_LEN: usize = 64;

// ============================================================================
// RDM (ANSI E1.20)
// ============================================================================

pub const RDM_START_CODE: u8 = 0xCC;
pub const RDM_SUB_START_CODE: u8 = 0x01;

/// Message length of an RDM message without parameter data or checksum.
pub const RDM_HEADER_LEN: usize = 24;

/// Largest parameter data length allowed by E1.20.
pub const RDM_MAX_PDL: usize = 231;

/// Discovery response preamble byte and its separator.
pub const DISC_PREAMBLE: u8 = 0xFE;
pub const DISC_SEPARATOR: u8 = 0xAA;

/// Encoded UID (12 bytes) plus encoded checksum (4 bytes).
pub const DISC_EUID_LEN: usize = 16;

// Command classes
pub const DISCOVERY_COMMAND: u8 = 0x10;
pub const DISCOVERY_COMMAND_RESPONSE: u8 = 0x11;
pub const GET_COMMAND: u8 = 0x20;
pub const GET_COMMAND_RESPONSE: u8 = 0x21;

// Response types
pub const RESPONSE_TYPE_ACK: u8 = 0x00;
pub const RESPONSE_TYPE_NACK_REASON: u8 = 0x02;

// Parameter IDs
pub const PID_DISC_UNIQUE_BRANCH: u16 = 0x0001;
pub const PID_DISC_MUTE: u16 = 0x0002;
pub const PID_DISC_UN_MUTE: u16 = 0x0003;
pub const PID_DEVICE_INFO: u16 = 0x0060;
pub const PID_DEVICE_MODEL_DESCRIPTION: u16 = 0x0080;
pub const PID_MANUFACTURER_LABEL: u16 = 0x0081;
pub const PID_DEVICE_LABEL: u16 = 0x0082;
pub const PID_SOFTWARE_VERSION_LABEL: u16 = 0x00C0;

/// Length of the DEVICE_INFO parameter data.
pub const DEVICE_INFO_LEN: usize = 19;

/// Human readable PID name for logs.
pub fn pid_name(pid: u16) -> &'static str {
    match pid {
        PID_DISC_UNIQUE_BRANCH => "DISC_UNIQUE_BRANCH",
        PID_DISC_MUTE => "DISC_MUTE",
        PID_DISC_UN_MUTE => "DISC_UN_MUTE",
        PID_DEVICE_INFO => "DEVICE_INFO",
        PID_DEVICE_MODEL_DESCRIPTION => "DEVICE_MODEL_DESCRIPTION",
        PID_MANUFACTURER_LABEL => "MANUFACTURER_LABEL",
        PID_DEVICE_LABEL => "DEVICE_LABEL",
        PID_SOFTWARE_VERSION_LABEL => "SOFTWARE_VERSION_LABEL",
        _ => "UNKNOWN",
    }
}

// ============================================================================
// Robe Universal Interface envelope
// ============================================================================

/// First byte of every envelope.
pub const ROBE_HEADER: u8 = 0xA5;

/// Header bytes before the data: marker, type, length (LE u16), header CRC.
pub const ROBE_HEADER_LEN: usize = 5;

/// Bytes the interface appends to RDM data in both directions.
pub const ROBE_TRAILER_LEN: usize = 4;

pub const PACKET_TYPE_RDM_PACKET_OUT: u8 = 0x10;
pub const PACKET_TYPE_RDM_RESPONSE: u8 = 0x11;
pub const PACKET_TYPE_RDM_DISCOVERY_UNIQUE_BRANCH: u8 = 0x12;
pub const PACKET_TYPE_RDM_DISCOVERY_RESPONSE: u8 = 0x13;
pub const PACKET_TYPE_RDM_INFO_COMMAND: u8 = 0x14;
pub const PACKET_TYPE_RDM_INFO_RESPONSE: u8 = 0x15;

/// Baud rate of the interface's virtual serial port.
pub const ROBE_BAUD_RATE: u32 = 250_000;

/// USB product string the interface enumerates with.
pub const ROBE_PRODUCT_NAME: &str = "Runit WTX";

/// UID of the interface itself, used as the controller (source) UID.
pub const CONTROLLER_UID: u64 = 0x5253_0200_0015;
