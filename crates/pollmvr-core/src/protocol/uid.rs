//! RDM unique identifiers and UID ranges.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A 48-bit RDM UID: 16-bit ESTA manufacturer id, 32-bit device id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Uid(u64);

impl Uid {
    /// Highest representable UID.
    pub const MAX: Uid = Uid(0xFFFF_FFFF_FFFF);

    /// All-devices broadcast UID.
    pub const BROADCAST: Uid = Uid(0xFFFF_FFFF_FFFF);

    /// Build from the low 48 bits of `value`.
    pub const fn new(value: u64) -> Self {
        Self(value & 0xFFFF_FFFF_FFFF)
    }

    pub const fn from_parts(manufacturer: u16, device: u32) -> Self {
        Self(((manufacturer as u64) << 32) | device as u64)
    }

    pub fn from_bytes(bytes: [u8; 6]) -> Self {
        let mut value = 0u64;
        for b in bytes {
            value = (value << 8) | b as u64;
        }
        Self(value)
    }

    pub fn to_bytes(self) -> [u8; 6] {
        let be = self.0.to_be_bytes();
        [be[2], be[3], be[4], be[5], be[6], be[7]]
    }

    pub const fn value(self) -> u64 {
        self.0
    }

    pub const fn manufacturer(self) -> u16 {
        (self.0 >> 32) as u16
    }

    pub const fn device(self) -> u32 {
        self.0 as u32
    }

    /// All-devices or manufacturer broadcast (`mmmm:ffffffff`).
    pub const fn is_broadcast(self) -> bool {
        self.device() == 0xFFFF_FFFF
    }

    /// True when a message sent to `self` is addressed to `responder`.
    pub fn reaches(self, responder: Uid) -> bool {
        self == responder
            || self == Uid::BROADCAST
            || (self.is_broadcast() && self.manufacturer() == responder.manufacturer())
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}:{:08x}", self.manufacturer(), self.device())
    }
}

impl FromStr for Uid {
    type Err = String;

    /// Accepts `mmmm:dddddddd` or twelve bare hex digits.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits: String = s.chars().filter(|c| *c != ':').collect();
        if digits.len() != 12 {
            return Err(format!("invalid UID: {s}"));
        }
        u64::from_str_radix(&digits, 16)
            .map(Uid::new)
            .map_err(|_| format!("invalid UID: {s}"))
    }
}

impl From<Uid> for String {
    fn from(uid: Uid) -> Self {
        uid.to_string()
    }
}

impl TryFrom<String> for Uid {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// Inclusive `[low, high]` interval of UIDs searched by one discovery branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UidRange {
    pub low: Uid,
    pub high: Uid,
}

impl UidRange {
    /// The whole UID space.
    pub const FULL: UidRange = UidRange {
        low: Uid::new(0),
        high: Uid::MAX,
    };

    pub fn new(low: Uid, high: Uid) -> Self {
        Self { low, high }
    }

    pub fn is_single(&self) -> bool {
        self.low == self.high
    }

    pub fn contains(&self, uid: Uid) -> bool {
        self.low <= uid && uid <= self.high
    }

    /// Split at the midpoint. `None` for a single-UID range.
    pub fn bisect(&self) -> Option<(UidRange, UidRange)> {
        if self.is_single() {
            return None;
        }
        let (low, high) = (self.low.value(), self.high.value());
        let mid = low + (high - low) / 2;
        Some((
            UidRange::new(self.low, Uid::new(mid)),
            UidRange::new(Uid::new(mid + 1), self.high),
        ))
    }

    /// Parameter data for DISC_UNIQUE_BRANCH: lower bound then upper bound.
    pub fn to_bytes(&self) -> [u8; 12] {
        let mut pd = [0u8; 12];
        pd[..6].copy_from_slice(&self.low.to_bytes());
        pd[6..].copy_from_slice(&self.high.to_bytes());
        pd
    }
}

impl fmt::Display for UidRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.low, self.high)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uid_bytes_and_display() {
        let uid = Uid::from_bytes([0x52, 0x53, 0x00, 0x45, 0x07, 0xf8]);
        assert_eq!(uid.manufacturer(), 0x5253);
        assert_eq!(uid.device(), 0x004507f8);
        assert_eq!(uid.to_string(), "5253:004507f8");
        assert_eq!(uid.to_bytes(), [0x52, 0x53, 0x00, 0x45, 0x07, 0xf8]);
        assert_eq!("5253:004507f8".parse::<Uid>().unwrap(), uid);
    }

    #[test]
    fn test_broadcast_reach() {
        let vendor = Uid::from_parts(0x5253, 0xFFFF_FFFF);
        assert!(vendor.is_broadcast());
        assert!(Uid::BROADCAST.is_broadcast());
        assert!(!Uid::from_parts(0x5253, 0xFFFF_FFFE).is_broadcast());

        let robe = Uid::from_parts(0x5253, 7);
        let other = Uid::from_parts(0x4150, 7);
        assert!(vendor.reaches(robe));
        assert!(!vendor.reaches(other));
        assert!(Uid::BROADCAST.reaches(other));
        assert!(robe.reaches(robe));
        assert!(!robe.reaches(other));
    }

    #[test]
    fn test_uid_parse_rejects_garbage() {
        assert!("5253:0045".parse::<Uid>().is_err());
        assert!("zzzz:004507f8".parse::<Uid>().is_err());
    }

    #[test]
    fn test_bisect_full_range() {
        let (lower, upper) = UidRange::FULL.bisect().unwrap();
        assert_eq!(lower.low, Uid::new(0));
        assert_eq!(lower.high, Uid::new(0x7FFF_FFFF_FFFF));
        assert_eq!(upper.low, Uid::new(0x8000_0000_0000));
        assert_eq!(upper.high, Uid::MAX);
    }

    #[test]
    fn test_bisect_pair_and_single() {
        let pair = UidRange::new(Uid::new(10), Uid::new(11));
        let (a, b) = pair.bisect().unwrap();
        assert!(a.is_single() && b.is_single());
        assert_eq!(a.low, Uid::new(10));
        assert_eq!(b.low, Uid::new(11));
        assert!(a.bisect().is_none());
    }

    #[test]
    fn test_range_parameter_data() {
        let pd = UidRange::FULL.to_bytes();
        assert_eq!(&pd[..6], &[0u8; 6]);
        assert_eq!(&pd[6..], &[0xFFu8; 6]);
    }
}
