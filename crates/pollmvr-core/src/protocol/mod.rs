//! Protocol module - ArtNet and RDM wire formats.

pub mod artnet;
pub mod constants;
pub mod rdm;
pub mod uid;

pub use artnet::{ArtPollReply, PacketError, decode_art_poll_reply, encode_art_poll};
pub use constants::*;
pub use rdm::{DeviceInfo, RdmError, RdmRequest, RdmResponse};
pub use uid::{Uid, UidRange};
